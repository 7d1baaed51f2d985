use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    chat_handler, create_knowledge_base_handler, delete_knowledge_base_handler, health_handler,
    ingest_handler, list_knowledge_bases_handler,
};
use super::server::AppState;

#[derive(Clone)]
struct AuthConfig {
    token: Option<String>,
}

pub(crate) fn build_router(
    state: AppState,
    auth_token: Option<String>,
    max_body_size: usize,
) -> Router {
    let auth_cfg = AuthConfig { token: auth_token };

    let protected = Router::new()
        .route(
            "/knowledge-bases",
            get(list_knowledge_bases_handler).post(create_knowledge_base_handler),
        )
        .route("/knowledge-bases/{id}", delete(delete_knowledge_base_handler))
        .route("/ingest", post(ingest_handler))
        .route("/chat", post(chat_handler))
        .layer(middleware::from_fn_with_state(auth_cfg, auth_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    axum::extract::State(cfg): axum::extract::State<AuthConfig>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ref expected) = cfg.token {
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        // Fixed-length digests keep the comparison independent of token length.
        let token_hash = blake3::hash(token.as_bytes());
        let expected_hash = blake3::hash(expected.as_bytes());
        if !bool::from(token_hash.as_bytes().ct_eq(expected_hash.as_bytes())) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use lore_core::{App, Config};
    use lore_index::InMemoryIndex;
    use lore_llm::AnyProvider;
    use lore_llm::mock::MockProvider;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;

    fn make_router(auth: Option<String>, max_body_size: usize) -> Router {
        let state = AppState {
            app: Arc::new(App::new(
                AnyProvider::Mock(MockProvider::default()),
                Arc::new(InMemoryIndex::new()),
                Config::default(),
            )),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        };
        build_router(state, auth, max_body_size)
    }

    fn list_request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/knowledge-bases");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = make_router(None, 1_048_576);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].is_u64());
    }

    #[tokio::test]
    async fn auth_rejects_missing_token() {
        let app = make_router(Some("secret".into()), 1_048_576);
        let resp = app.oneshot(list_request(None)).await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn auth_rejects_wrong_token() {
        let app = make_router(Some("secret".into()), 1_048_576);
        let resp = app.oneshot(list_request(Some("Bearer wrong"))).await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn auth_accepts_valid_token() {
        let app = make_router(Some("secret".into()), 1_048_576);
        let resp = app
            .oneshot(list_request(Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn health_skips_auth() {
        let app = make_router(Some("secret".into()), 1_048_576);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn body_size_limit() {
        let app = make_router(None, 64);
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(vec![b'a'; 128]))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 413);
    }
}
