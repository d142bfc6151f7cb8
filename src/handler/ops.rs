//! CRUD operations
//!
//! Each operation consumes its session: reconcile, apply, persist (writes
//! only), respond. No operation retries.

use crate::handler::error::HandlerError;
use crate::handler::schema::MISSING_RECORD_MESSAGE;
use crate::handler::session::{Phase, Session};
use crate::record::Record;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

fn into_object(body: Value) -> Result<Map<String, Value>, HandlerError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(HandlerError::InvalidBody(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<'a> Session<'a> {
    /// All records, in the in-memory store's insertion order
    pub async fn list(mut self) -> Result<Vec<Record>, HandlerError> {
        self.load(false).await?;
        let records = self.primary.snapshot();
        debug!("{}: list returned {} records", self.key, records.len());
        Ok(self.respond(records))
    }

    /// One record by id. A miss is `None`, not an error.
    pub async fn get(mut self, id: &str) -> Result<Option<Record>, HandlerError> {
        self.load(false).await?;
        let record = self.primary.find_one(id).cloned();
        Ok(self.respond(record))
    }

    /// Store the body as a new record under a server-generated id
    pub async fn create(mut self, body: Value) -> Result<Record, HandlerError> {
        let fields = into_object(body)?;
        self.load(true).await?;

        let record = Record::from_object(Uuid::new_v4().to_string(), fields);
        self.check_foreign_keys(&record)?;

        self.primary.insert(record.clone())?;
        self.advance(Phase::Mutated);
        self.save().await?;

        info!("{}: created {}", self.key, record.id());
        Ok(self.respond(record))
    }

    /// Merge the body into an existing record using the session's merge strategy
    pub async fn update(mut self, id: &str, body: Value) -> Result<Record, HandlerError> {
        let incoming = into_object(body)?;
        self.load(true).await?;

        let mut record = self
            .primary
            .find_one(id)
            .cloned()
            .ok_or_else(|| HandlerError::NotFound(MISSING_RECORD_MESSAGE.to_string()))?;

        for field in self.schema.updatable_fields {
            let value = incoming.get(*field);
            if self.merge.replaces(value) {
                if let Some(value) = value {
                    record.set(field, value.clone());
                }
            }
        }
        self.check_foreign_keys(&record)?;

        self.primary.update(record.clone())?;
        self.advance(Phase::Mutated);
        self.save().await?;

        info!("{}: updated {}", self.key, id);
        Ok(self.respond(record))
    }

    /// Remove by id. Deleting a missing id still persists and succeeds.
    pub async fn delete(mut self, id: &str) -> Result<(), HandlerError> {
        self.load(false).await?;

        let removed = self.primary.remove(id).is_some();
        self.advance(Phase::Mutated);
        self.save().await?;

        info!("{}: delete {} (existed: {})", self.key, id, removed);
        Ok(self.respond(()))
    }
}

#[cfg(test)]
mod tests {
    use crate::handler::error::HandlerError;
    use crate::handler::schema::{MergeStrategy, LEVELS, WEBSITES};
    use crate::handler::session::Session;
    use crate::store::{DurableStore, InMemoryDurableStore};
    use crate::sync::SyncOptions;
    use serde_json::{json, Value};

    fn levels(store: &InMemoryDurableStore) -> Session<'_> {
        Session::new(store, SyncOptions::default(), MergeStrategy::default(), &LEVELS, "acme")
    }

    fn websites(store: &InMemoryDurableStore) -> Session<'_> {
        Session::new(store, SyncOptions::default(), MergeStrategy::default(), &WEBSITES, "acme")
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = InMemoryDurableStore::new();
        let created = levels(&store)
            .create(json!({"name": "gold", "number": 3, "requestsPerDay": 1000}))
            .await
            .unwrap();
        assert!(!created.id().is_empty());

        let fetched = levels(&store).get(created.id()).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.get("name"), Some(&json!("gold")));
        assert_eq!(fetched.get("requestsPerDay"), Some(&json!(1000)));
    }

    #[tokio::test]
    async fn test_create_ignores_client_id() {
        let store = InMemoryDurableStore::new();
        let created = levels(&store)
            .create(json!({"id": "chosen-by-client", "name": "x"}))
            .await
            .unwrap();
        assert_ne!(created.id(), "chosen-by-client");
    }

    #[tokio::test]
    async fn test_create_rejects_non_object() {
        let store = InMemoryDurableStore::new();
        let err = levels(&store).create(json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidBody(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = InMemoryDurableStore::new();
        assert!(levels(&store).get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryDurableStore::new();
        let err = levels(&store).update("nope", json!({"name": "x"})).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "An access key with that id does not exist.");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_ignores_unlisted_fields() {
        let store = InMemoryDurableStore::new();
        let created = levels(&store).create(json!({"name": "gold"})).await.unwrap();

        let updated = levels(&store)
            .update(created.id(), json!({"color": "red", "id": "other"}))
            .await
            .unwrap();
        assert_eq!(updated.id(), created.id());
        assert_eq!(updated.get("color"), None);
    }

    #[tokio::test]
    async fn test_stripe_product_ref_updates_from_its_own_field() {
        let store = InMemoryDurableStore::new();
        let created = levels(&store)
            .create(json!({"token": "t1", "stripeProductRef": "prod_1"}))
            .await
            .unwrap();

        let updated = levels(&store)
            .update(created.id(), json!({"token": "t2"}))
            .await
            .unwrap();
        assert_eq!(updated.get("token"), Some(&json!("t2")));
        assert_eq!(updated.get("stripeProductRef"), Some(&json!("prod_1")));
    }

    #[tokio::test]
    async fn test_delete_then_list() {
        let store = InMemoryDurableStore::new();
        let a = levels(&store).create(json!({"name": "a"})).await.unwrap();
        let b = levels(&store).create(json!({"name": "b"})).await.unwrap();

        levels(&store).delete(a.id()).await.unwrap();

        assert!(levels(&store).get(a.id()).await.unwrap().is_none());
        let ids: Vec<String> = levels(&store)
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec![b.id().to_string()]);
    }

    #[tokio::test]
    async fn test_delete_missing_persists_empty_collection() {
        let store = InMemoryDurableStore::new();
        levels(&store).delete("ghost").await.unwrap();
        assert_eq!(store.raw("levels:acme"), Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn test_website_requires_platform() {
        let store = InMemoryDurableStore::new();
        let err = websites(&store)
            .create(json!({"frontendDomainName": "x.dev", "platformId": "p1"}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "The provided platform id foreign key does not exist.");
        assert!(store.raw("websites:acme").is_none());

        store.put("platforms:acme", br#"[{"id":"p1"}]"#).await.unwrap();
        let created = websites(&store)
            .create(json!({"frontendDomainName": "x.dev", "platformId": "p1"}))
            .await
            .unwrap();
        assert_eq!(created.get("platformId"), Some(&json!("p1")));
    }

    #[tokio::test]
    async fn test_website_update_rechecks_platform() {
        let store = InMemoryDurableStore::new();
        store.put("platforms:acme", br#"[{"id":"p1"}]"#).await.unwrap();
        let created = websites(&store)
            .create(json!({"frontendDomainName": "x.dev", "platformId": "p1"}))
            .await
            .unwrap();
        let before = store.raw("websites:acme");

        let err = websites(&store)
            .update(created.id(), json!({"platformId": "p9"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::ForeignKeyViolation { .. }));
        assert_eq!(store.raw("websites:acme"), before);

        let updated = websites(&store)
            .update(created.id(), json!({"frontendDomainName": "y.dev"}))
            .await
            .unwrap();
        assert_eq!(updated.get("frontendDomainName"), Some(&json!("y.dev")));
        assert_eq!(updated.get("platformId"), Some(&json!("p1")));
    }

    #[tokio::test]
    async fn test_platforms_are_never_written() {
        let store = InMemoryDurableStore::new();
        store.put("platforms:acme", br#"[{"id":"p1","$loki":4}]"#).await.unwrap();
        websites(&store)
            .create(json!({"platformId": "p1"}))
            .await
            .unwrap();
        assert_eq!(store.raw("platforms:acme"), Some(br#"[{"id":"p1","$loki":4}]"#.to_vec()));
    }

    #[tokio::test]
    async fn test_list_order_follows_blob_then_creates() {
        let store = InMemoryDurableStore::new();
        store
            .put("levels:acme", br#"[{"id":"z"},{"id":"a"}]"#)
            .await
            .unwrap();
        let created = levels(&store).create(json!({})).await.unwrap();

        let listed: Vec<Value> = levels(&store)
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| json!(r.id()))
            .collect();
        assert_eq!(listed, vec![json!("z"), json!("a"), json!(created.id())]);
    }
}
