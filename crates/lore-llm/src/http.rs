//! HTTP client construction shared by the HTTP-based backends.

use std::time::Duration;

use crate::error::LlmError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client with a connect timeout, the given request timeout and a
/// `lore/{version}` user-agent.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub(crate) fn build_client(request_timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .user_agent(concat!("lore/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(LlmError::Http)
}
