use lore_index::{Chunk, QdrantIndex, VectorIndex};
use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup() -> (QdrantIndex, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let url = format!("http://127.0.0.1:{grpc_port}");
    let index = QdrantIndex::new(&url, "kb_test", None).unwrap();
    (index, container)
}

fn chunk(kb: &str, hash: &str, vector: Vec<f32>) -> Chunk {
    Chunk {
        id: hash.into(),
        knowledge_base: kb.into(),
        source: "notes.md".into(),
        position: 0,
        text: format!("text {hash}"),
        vector: Some(vector),
        tags: vec!["t".into()],
        content_hash: hash.into(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn missing_collection_behaves_as_empty() {
    let (index, _container) = setup().await;

    assert!(index.list_knowledge_bases().await.unwrap().is_empty());
    let results = index
        .search(&["hr".to_owned()], vec![1.0, 0.0], 5)
        .await
        .unwrap();
    assert!(results.is_empty());
    index.delete_knowledge_base("hr").await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn upsert_search_list_delete() {
    let (index, _container) = setup().await;

    index.ensure_collection(2).await.unwrap();
    index.ensure_collection(2).await.unwrap();

    index
        .upsert(vec![
            chunk("hr", "h1", vec![1.0, 0.0]),
            chunk("hr", "h2", vec![0.0, 1.0]),
            chunk("legal", "l1", vec![0.9, 0.1]),
            chunk("ops", "o1", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

    let kbs = vec!["hr".to_owned(), "legal".to_owned()];
    let results = index.search(&kbs, vec![1.0, 0.0], 10).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].chunk.id, "h1");
    assert!(results.iter().all(|r| r.chunk.knowledge_base != "ops"));

    let counts = index.list_knowledge_bases().await.unwrap();
    assert_eq!(counts.get("hr"), Some(&2));
    assert_eq!(counts.get("ops"), Some(&1));

    index.delete_knowledge_base("hr").await.unwrap();
    let counts = index.list_knowledge_bases().await.unwrap();
    assert!(!counts.contains_key("hr"));
    assert_eq!(counts.len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reupsert_same_hash_overwrites() {
    let (index, _container) = setup().await;

    index.ensure_collection(2).await.unwrap();
    index
        .upsert(vec![chunk("hr", "same", vec![1.0, 0.0])])
        .await
        .unwrap();
    index
        .upsert(vec![chunk("hr", "same", vec![1.0, 0.0])])
        .await
        .unwrap();

    let counts = index.list_knowledge_bases().await.unwrap();
    assert_eq!(counts.get("hr"), Some(&1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn same_hash_in_two_knowledge_bases_is_kept_twice() {
    let (index, _container) = setup().await;

    index.ensure_collection(2).await.unwrap();
    index
        .upsert(vec![chunk("alpha", "same", vec![1.0, 0.0])])
        .await
        .unwrap();
    index
        .upsert(vec![chunk("beta", "same", vec![1.0, 0.0])])
        .await
        .unwrap();

    let counts = index.list_knowledge_bases().await.unwrap();
    assert_eq!(counts.get("alpha"), Some(&1));
    assert_eq!(counts.get("beta"), Some(&1));

    index.delete_knowledge_base("beta").await.unwrap();
    let results = index
        .search(&["alpha".to_owned()], vec![1.0, 0.0], 5)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.id, "same");
}
