#![allow(dead_code)]

use serde_json::{json, Value};
use std::time::Duration;
use stories_api_kernel::kernel::{build_app, Plugin};
use stories_api_kernel::plugins::communication::stories::{StoriesPlugin, StoryRepository};
use stories_api_kernel::plugins::health::HealthPlugin;
use stories_api_kernel::plugins::metrics::MetricsPlugin;
use stories_api_kernel::store::{Document, DynStore, InMemoryDocumentStore};
use tokio::net::TcpListener;

pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

const CONCURRENT_WRITERS: i64 = 16;

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(d) => d,
        other => panic!("expected an object, got {}", other),
    }
}

/// A collection name no other test run shares.
pub fn unique_collection(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

pub fn stories_plugins(store: DynStore) -> Vec<Box<dyn Plugin>> {
    let repo = StoryRepository::new(store.clone(), "stories", TTL);
    vec![Box::new(HealthPlugin::new(store)), Box::new(StoriesPlugin::new(repo))]
}

pub async fn spawn_app_with_plugins(plugins: Vec<Box<dyn Plugin>>, metrics: Option<MetricsPlugin>) -> anyhow::Result<(String, tokio::task::JoinHandle<()>)> {
    let mut app = build_app(&plugins, metrics.clone()).await;
    if let Some(metrics) = metrics {
        app = app.nest("/metrics", metrics.router());
    }
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });
    Ok((format!("http://{}", addr), server_handle))
}

pub async fn spawn_in_memory() -> anyhow::Result<(String, tokio::task::JoinHandle<()>, DynStore)> {
    let store = InMemoryDocumentStore::new().into_arc();
    let (base, handle) = spawn_app_with_plugins(stories_plugins(store.clone()), None).await?;
    Ok((base, handle, store))
}

/// Merge-write contract every `DocumentStore` backend has to honour.
pub async fn exercise_store(store: &DynStore, collection: &str) -> anyhow::Result<()> {
    assert!(store.get(collection, "u1").await?.is_none());

    store
        .merge(collection, "u1", doc(json!({"userId": "u1", "username": "alice", "stories": {"story-1000": {"views": 0, "likes": false}}})))
        .await?;
    store
        .merge(collection, "u1", doc(json!({"stories": {"story-2000": {"views": 5, "likes": true}}})))
        .await?;
    store
        .merge(collection, "u1", doc(json!({"stories": {"story-1000": {"views": 1}}})))
        .await?;

    let got = store.get(collection, "u1").await?.expect("document exists");
    assert_eq!(got["username"], json!("alice"));
    assert_eq!(got["stories"]["story-1000"], json!({"views": 1, "likes": false}));
    assert_eq!(got["stories"]["story-2000"], json!({"views": 5, "likes": true}));

    // a scalar replaces an object and vice versa
    store.merge(collection, "u1", doc(json!({"username": {"first": "al"}}))).await?;
    store.merge(collection, "u1", doc(json!({"username": "alice2"}))).await?;
    let got = store.get(collection, "u1").await?.expect("document exists");
    assert_eq!(got["username"], json!("alice2"));

    // an empty object merged over a subtree leaves it intact
    store.merge(collection, "u1", doc(json!({"stories": {}}))).await?;
    store.merge(collection, "u1", doc(json!({"stories": {"story-1000": {}}}))).await?;
    let got = store.get(collection, "u1").await?.expect("document exists");
    assert_eq!(got["stories"]["story-1000"], json!({"views": 1, "likes": false}));
    assert_eq!(got["stories"]["story-2000"], json!({"views": 5, "likes": true}));

    // and is kept where nothing was nested
    store.merge(collection, "u1", doc(json!({"tags": {}}))).await?;
    let got = store.get(collection, "u1").await?.expect("document exists");
    assert_eq!(got["tags"], json!({}));

    // concurrent increments all land
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..CONCURRENT_WRITERS {
        let store = store.clone();
        let collection = collection.to_string();
        tasks.spawn(async move { store.increment(&collection, "u1", &["stories", "story-2000", "views"], 1).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }
    let got = store.get(collection, "u1").await?.expect("document exists");
    assert_eq!(got["stories"]["story-2000"]["views"], json!(5 + CONCURRENT_WRITERS));
    assert_eq!(got["stories"]["story-2000"]["likes"], json!(true));
    assert_eq!(got["stories"]["story-1000"]["views"], json!(1));

    // a counter under missing parents is created from zero
    assert_eq!(store.increment(collection, "u1", &["stories", "story-3000", "views"], 2).await?, 2);
    store.delete_field(collection, "u1", &["stories", "story-3000"]).await?;

    store.delete_field(collection, "u1", &["stories", "story-2000"]).await?;
    store.delete_field(collection, "u1", &["stories", "story-9999"]).await?;
    let got = store.get(collection, "u1").await?.expect("document exists");
    assert!(got["stories"].get("story-2000").is_none());
    assert!(got["stories"].get("story-1000").is_some());

    store.merge(collection, "u0", doc(json!({"userId": "u0"}))).await?;
    let ids: Vec<String> = store.list(collection).await?.into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["u0".to_string(), "u1".to_string()]);

    store.delete(collection, "u1").await?;
    store.delete(collection, "u0").await?;
    assert!(store.get(collection, "u1").await?.is_none());
    assert!(store.list(collection).await?.is_empty());

    store.ping().await?;
    Ok(())
}
