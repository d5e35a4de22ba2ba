use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::StoreBackend;

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Remote document store. Writes go through `merge`, which only touches the
/// keys present in the patch, so two writers adding different stories to the
/// same document do not clobber each other.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;
    /// All documents of a collection, ordered by id.
    async fn list(&self, collection: &str) -> anyhow::Result<Vec<(String, Document)>>;
    /// Deep merge of `patch` into the document, creating it when absent.
    async fn merge(&self, collection: &str, id: &str, patch: Document) -> anyhow::Result<()>;
    /// Removes one nested field. Missing paths are a no-op.
    async fn delete_field(&self, collection: &str, id: &str, path: &[&str]) -> anyhow::Result<()>;
    /// Atomically adds `by` to the integer at `path` and returns the new
    /// value. A missing field counts as 0; missing parents and documents are
    /// created.
    async fn increment(&self, collection: &str, id: &str, path: &[&str], by: i64) -> anyhow::Result<i64>;
    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<()>;
    async fn ping(&self) -> anyhow::Result<()>;
    fn backend(&self) -> &'static str;
}

pub type DynStore = Arc<dyn DocumentStore>;

/// Objects merge key by key; any other value replaces what was there.
pub fn merge_documents(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match value {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_documents(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}

/// Removes the field at `path`, returning whether anything was removed.
pub fn remove_path(target: &mut Document, path: &[&str]) -> bool {
    match path {
        [] => false,
        [last] => target.remove(*last).is_some(),
        [head, rest @ ..] => match target.get_mut(*head) {
            Some(Value::Object(inner)) => remove_path(inner, rest),
            _ => false,
        },
    }
}

/// In-place counter bump used by the in-memory backend. Non-object parents
/// are replaced, as a merge would.
pub fn increment_path(target: &mut Document, path: &[&str], by: i64) -> anyhow::Result<i64> {
    match path {
        [] => anyhow::bail!("empty counter path"),
        [last] => {
            let current = match target.get(*last) {
                None | Some(Value::Null) => 0,
                Some(value) => value
                    .as_i64()
                    .ok_or_else(|| anyhow::anyhow!("field {:?} is not an integer", last))?,
            };
            let next = current
                .checked_add(by)
                .ok_or_else(|| anyhow::anyhow!("counter {:?} overflowed", last))?;
            target.insert(last.to_string(), Value::from(next));
            Ok(next)
        }
        [head, rest @ ..] => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !slot.is_object() {
                *slot = Value::Object(Document::new());
            }
            match slot {
                Value::Object(inner) => increment_path(inner, rest, by),
                _ => anyhow::bail!("field {:?} is not an object", head),
            }
        }
    }
}

pub async fn connect_store(backend: &StoreBackend) -> anyhow::Result<DynStore> {
    let store = match backend {
        StoreBackend::Memory => InMemoryDocumentStore::new().into_arc(),
        StoreBackend::Redis(url) => RedisDocumentStore::new(url).await?.into_arc(),
        StoreBackend::Postgres(url) => PgDocumentStore::connect(url).await?.into_arc(),
    };
    tracing::info!(backend = store.backend(), "document store ready");
    Ok(store)
}

mod inmem {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct InMemoryDocumentStore {
        inner: Mutex<BTreeMap<String, BTreeMap<String, Document>>>,
    }

    impl InMemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn into_arc(self) -> DynStore {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl DocumentStore for InMemoryDocumentStore {
        async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
            Ok(self.inner.lock().get(collection).and_then(|docs| docs.get(id)).cloned())
        }

        async fn list(&self, collection: &str) -> anyhow::Result<Vec<(String, Document)>> {
            let guard = self.inner.lock();
            Ok(guard
                .get(collection)
                .map(|docs| docs.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
                .unwrap_or_default())
        }

        async fn merge(&self, collection: &str, id: &str, patch: Document) -> anyhow::Result<()> {
            let mut guard = self.inner.lock();
            let doc = guard
                .entry(collection.to_string())
                .or_default()
                .entry(id.to_string())
                .or_default();
            merge_documents(doc, patch);
            Ok(())
        }

        async fn delete_field(&self, collection: &str, id: &str, path: &[&str]) -> anyhow::Result<()> {
            if let Some(doc) = self.inner.lock().get_mut(collection).and_then(|docs| docs.get_mut(id)) {
                remove_path(doc, path);
            }
            Ok(())
        }

        async fn increment(&self, collection: &str, id: &str, path: &[&str], by: i64) -> anyhow::Result<i64> {
            let mut guard = self.inner.lock();
            let doc = guard
                .entry(collection.to_string())
                .or_default()
                .entry(id.to_string())
                .or_default();
            increment_path(doc, path, by)
        }

        async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<()> {
            if let Some(docs) = self.inner.lock().get_mut(collection) {
                docs.remove(id);
            }
            Ok(())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "memory"
        }
    }
}

pub use inmem::InMemoryDocumentStore;

mod redis_backend {
    use super::*;
    use anyhow::bail;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;
    use redis::Client;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc as StdArc;
    use tokio::sync::Mutex as AsyncMutex;

    /// Each document is a Redis hash whose fields are dotted paths to JSON
    /// leaves, e.g. `stories.story-1000.views -> 3`. Empty objects are stored
    /// as a `{}` leaf. A set per collection indexes document ids.
    pub struct RedisDocumentStore {
        conn: StdArc<AsyncMutex<MultiplexedConnection>>,
    }

    impl RedisDocumentStore {
        pub async fn new(url: &str) -> anyhow::Result<Self> {
            let client = Client::open(url)?;
            let conn = client.get_multiplexed_tokio_connection().await?;
            Ok(Self {
                conn: StdArc::new(AsyncMutex::new(conn)),
            })
        }

        pub fn into_arc(self) -> DynStore {
            Arc::new(self)
        }

        fn doc_key(collection: &str, id: &str) -> String {
            format!("{}:{}", collection, id)
        }

        fn index_key(collection: &str) -> String {
            format!("{}:__ids", collection)
        }
    }

    pub(super) fn flatten(doc: &Document) -> anyhow::Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        flatten_into(None, doc, &mut out)?;
        Ok(out)
    }

    fn flatten_into(prefix: Option<&str>, doc: &Document, out: &mut Vec<(String, String)>) -> anyhow::Result<()> {
        for (key, value) in doc {
            if key.contains('.') {
                bail!("field name {:?} contains '.'", key);
            }
            let path = match prefix {
                Some(p) => format!("{}.{}", p, key),
                None => key.clone(),
            };
            match value {
                Value::Object(inner) if !inner.is_empty() => flatten_into(Some(&path), inner, out)?,
                leaf => out.push((path, leaf.to_string())),
            }
        }
        Ok(())
    }

    pub(super) fn unflatten(fields: HashMap<String, String>) -> anyhow::Result<Document> {
        let mut doc = Document::new();
        for (path, raw) in fields {
            let value: Value = serde_json::from_str(&raw)?;
            let segments: Vec<&str> = path.split('.').collect();
            insert_path(&mut doc, &segments, value);
        }
        Ok(doc)
    }

    fn insert_path(doc: &mut Document, segments: &[&str], value: Value) {
        match segments {
            [] => {}
            [last] => {
                let keep_existing = matches!((doc.get(*last), &value), (Some(Value::Object(_)), Value::Object(v)) if v.is_empty());
                if !keep_existing {
                    doc.insert(last.to_string(), value);
                }
            }
            [head, rest @ ..] => {
                let slot = doc
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Document::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Document::new());
                }
                if let Value::Object(inner) = slot {
                    insert_path(inner, rest, value);
                }
            }
        }
    }

    /// Drops `{}` leaves that would land on a path already holding nested
    /// fields: merging an empty object into an object changes nothing.
    pub(super) fn skip_covered_empty_objects(existing: &[String], incoming: Vec<(String, String)>) -> Vec<(String, String)> {
        incoming
            .into_iter()
            .filter(|(path, raw)| {
                if raw != "{}" {
                    return true;
                }
                let nested = format!("{}.", path);
                !existing.iter().any(|f| f.starts_with(&nested))
            })
            .collect()
    }

    /// Existing fields a merge of `incoming` leaves would make inconsistent:
    /// descendants of a new leaf, and old leaves sitting on a new leaf's ancestors.
    pub(super) fn stale_fields(existing: &[String], incoming: &[(String, String)]) -> Vec<String> {
        let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let mut stale: HashSet<String> = HashSet::new();
        for (path, _) in incoming {
            let nested = format!("{}.", path);
            for field in existing.iter().filter(|f| f.starts_with(&nested)) {
                stale.insert(field.to_string());
            }
            let mut ancestor = String::new();
            let segments: Vec<&str> = path.split('.').collect();
            for segment in &segments[..segments.len().saturating_sub(1)] {
                if !ancestor.is_empty() {
                    ancestor.push('.');
                }
                ancestor.push_str(segment);
                if existing.contains(ancestor.as_str()) {
                    stale.insert(ancestor.clone());
                }
            }
        }
        let mut stale: Vec<String> = stale.into_iter().collect();
        stale.sort();
        stale
    }

    #[async_trait]
    impl DocumentStore for RedisDocumentStore {
        async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
            let mut guard = self.conn.lock().await;
            let known: bool = guard.sismember(Self::index_key(collection), id).await?;
            if !known {
                return Ok(None);
            }
            let fields: HashMap<String, String> = guard.hgetall(Self::doc_key(collection, id)).await?;
            Ok(Some(unflatten(fields)?))
        }

        async fn list(&self, collection: &str) -> anyhow::Result<Vec<(String, Document)>> {
            let mut guard = self.conn.lock().await;
            let mut ids: Vec<String> = guard.smembers(Self::index_key(collection)).await?;
            ids.sort();
            let mut docs = Vec::with_capacity(ids.len());
            for id in ids {
                let fields: HashMap<String, String> = guard.hgetall(Self::doc_key(collection, &id)).await?;
                docs.push((id, unflatten(fields)?));
            }
            Ok(docs)
        }

        async fn merge(&self, collection: &str, id: &str, patch: Document) -> anyhow::Result<()> {
            let incoming = flatten(&patch)?;
            let key = Self::doc_key(collection, id);
            let mut guard = self.conn.lock().await;
            let existing: Vec<String> = guard.hkeys(&key).await?;
            let incoming = skip_covered_empty_objects(&existing, incoming);
            let stale = stale_fields(&existing, &incoming);

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !stale.is_empty() {
                pipe.hdel(&key, stale).ignore();
            }
            if !incoming.is_empty() {
                pipe.hset_multiple(&key, incoming.as_slice()).ignore();
            }
            pipe.sadd(Self::index_key(collection), id).ignore();
            let _: () = pipe.query_async(&mut *guard).await?;
            Ok(())
        }

        async fn delete_field(&self, collection: &str, id: &str, path: &[&str]) -> anyhow::Result<()> {
            if path.is_empty() {
                return Ok(());
            }
            let key = Self::doc_key(collection, id);
            let target = path.join(".");
            let nested = format!("{}.", target);
            let mut guard = self.conn.lock().await;
            let existing: Vec<String> = guard.hkeys(&key).await?;
            let doomed: Vec<String> = existing
                .into_iter()
                .filter(|f| *f == target || f.starts_with(&nested))
                .collect();
            if !doomed.is_empty() {
                let _: () = guard.hdel(&key, doomed).await?;
            }
            Ok(())
        }

        async fn increment(&self, collection: &str, id: &str, path: &[&str], by: i64) -> anyhow::Result<i64> {
            if path.is_empty() {
                bail!("empty counter path");
            }
            if let Some(segment) = path.iter().find(|s| s.contains('.')) {
                bail!("field name {:?} contains '.'", segment);
            }
            let key = Self::doc_key(collection, id);
            let field = path.join(".");
            let mut guard = self.conn.lock().await;
            let existing: Vec<String> = guard.hkeys(&key).await?;
            let stale = stale_fields(&existing, &[(field.clone(), String::new())]);

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !stale.is_empty() {
                pipe.hdel(&key, stale).ignore();
            }
            pipe.hincr(&key, &field, by);
            pipe.sadd(Self::index_key(collection), id).ignore();
            let (value,): (i64,) = pipe.query_async(&mut *guard).await?;
            Ok(value)
        }

        async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<()> {
            let mut guard = self.conn.lock().await;
            let _: () = redis::pipe()
                .atomic()
                .del(Self::doc_key(collection, id))
                .ignore()
                .srem(Self::index_key(collection), id)
                .ignore()
                .query_async(&mut *guard)
                .await?;
            Ok(())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            let mut guard = self.conn.lock().await;
            let _: String = redis::cmd("PING").query_async(&mut *guard).await?;
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "redis"
        }
    }
}

pub use redis_backend::RedisDocumentStore;

mod pg_backend {
    use super::*;
    use anyhow::bail;
    use sqlx::{Pool, Postgres};

    pub struct PgDocumentStore {
        pool: Pool<Postgres>,
    }

    /// `{"a": {"b": {}}}` for `["a", "b"]`, merged in so a counter's parents exist.
    fn parents_skeleton(parents: &[&str]) -> Document {
        let mut doc = Document::new();
        if let Some((head, rest)) = parents.split_first() {
            doc.insert(head.to_string(), Value::Object(parents_skeleton(rest)));
        }
        doc
    }

    fn into_document(body: Value) -> anyhow::Result<Document> {
        match body {
            Value::Object(doc) => Ok(doc),
            other => bail!("stored document is not an object: {}", other),
        }
    }

    impl PgDocumentStore {
        pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;

            sqlx::migrate!().run(&pool).await?;

            Ok(Self { pool })
        }

        pub fn into_arc(self) -> DynStore {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl DocumentStore for PgDocumentStore {
        async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
            let body: Option<Value> = sqlx::query_scalar::<_, Value>("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            body.map(into_document).transpose()
        }

        async fn list(&self, collection: &str) -> anyhow::Result<Vec<(String, Document)>> {
            let rows: Vec<(String, Value)> = sqlx::query_as::<_, (String, Value)>("SELECT id, body FROM documents WHERE collection = $1 ORDER BY id")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter()
                .map(|(id, body)| into_document(body).map(|doc| (id, doc)))
                .collect()
        }

        async fn merge(&self, collection: &str, id: &str, patch: Document) -> anyhow::Result<()> {
            sqlx::query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) ON CONFLICT (collection, id) DO UPDATE SET body = jsonb_merge_deep(documents.body, EXCLUDED.body), updated_at = now()")
                .bind(collection)
                .bind(id)
                .bind(Value::Object(patch))
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn delete_field(&self, collection: &str, id: &str, path: &[&str]) -> anyhow::Result<()> {
            let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
            sqlx::query("UPDATE documents SET body = body #- $3::text[], updated_at = now() WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .bind(path)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn increment(&self, collection: &str, id: &str, path: &[&str], by: i64) -> anyhow::Result<i64> {
            let Some((_, parents)) = path.split_last() else {
                bail!("empty counter path");
            };
            let skeleton = parents_skeleton(parents);
            let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();

            sqlx::query("INSERT INTO documents (collection, id) VALUES ($1, $2) ON CONFLICT (collection, id) DO NOTHING")
                .bind(collection)
                .bind(id)
                .execute(&self.pool)
                .await?;
            // the row lock taken by UPDATE serialises concurrent increments
            let value: i64 = sqlx::query_scalar::<_, i64>(
                "UPDATE documents \
                 SET body = jsonb_set(jsonb_merge_deep(body, $3), $4::text[], to_jsonb(COALESCE((body #>> $4::text[])::bigint, 0) + $5), true), \
                     updated_at = now() \
                 WHERE collection = $1 AND id = $2 \
                 RETURNING (body #>> $4::text[])::bigint",
            )
            .bind(collection)
            .bind(id)
            .bind(Value::Object(skeleton))
            .bind(path)
            .bind(by)
            .fetch_one(&self.pool)
            .await?;
            Ok(value)
        }

        async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<()> {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "postgres"
        }
    }
}

pub use pg_backend::PgDocumentStore;
