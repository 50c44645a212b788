//! Circuit document store.
//!
//! Circuits are persisted as JSON documents keyed by circuit id. The first
//! write of a document records its insertion time; later writes leave it
//! untouched.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::evc::EvcDocument;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Persistent circuit storage.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    /// Inserts or replaces one circuit document.
    async fn upsert_evc(&self, doc: &EvcDocument) -> Result<(), StoreError>;

    /// Inserts or replaces several documents in one round trip.
    async fn update_evcs(&self, docs: &[EvcDocument]) -> Result<(), StoreError>;

    /// Returns stored circuits, optionally including archived ones.
    async fn get_circuits(&self, include_archived: bool) -> Result<Vec<EvcDocument>, StoreError>;

    /// Returns one circuit.
    async fn get_circuit(&self, id: &str) -> Result<Option<EvcDocument>, StoreError>;

    /// Returns the circuit owning the schedule entry `schedule_id`.
    async fn find_by_schedule_id(
        &self,
        schedule_id: &str,
    ) -> Result<Option<EvcDocument>, StoreError> {
        Ok(self
            .get_circuits(true)
            .await?
            .into_iter()
            .find(|doc| doc.circuit_scheduler.iter().any(|s| s.id == schedule_id)))
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryCircuitStore {
    docs: RwLock<BTreeMap<String, EvcDocument>>,
}

impl MemoryCircuitStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn put(&self, doc: &EvcDocument, now: DateTime<Utc>) {
        let mut docs = self.docs.write();
        let inserted_at = docs
            .get(&doc.id)
            .and_then(|existing| existing.inserted_at)
            .unwrap_or(now);
        let mut doc = doc.clone();
        doc.inserted_at = Some(inserted_at);
        docs.insert(doc.id.clone(), doc);
    }
}

#[async_trait]
impl CircuitStore for MemoryCircuitStore {
    async fn upsert_evc(&self, doc: &EvcDocument) -> Result<(), StoreError> {
        self.put(doc, Utc::now());
        Ok(())
    }

    async fn update_evcs(&self, docs: &[EvcDocument]) -> Result<(), StoreError> {
        let now = Utc::now();
        for doc in docs {
            self.put(doc, now);
        }
        Ok(())
    }

    async fn get_circuits(&self, include_archived: bool) -> Result<Vec<EvcDocument>, StoreError> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|doc| include_archived || !doc.archived)
            .cloned()
            .collect())
    }

    async fn get_circuit(&self, id: &str) -> Result<Option<EvcDocument>, StoreError> {
        Ok(self.docs.read().get(id).cloned())
    }
}

/// Redis-backed store: one hash of JSON documents plus a hash of insertion times.
#[derive(Clone)]
pub struct RedisCircuitStore {
    connection: ConnectionManager,
    docs_key: String,
    inserted_key: String,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for RedisCircuitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCircuitStore")
            .field("docs_key", &self.docs_key)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl RedisCircuitStore {
    /// Connects to Redis.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config.connection_url();
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::Connection(format!("{}: {}", url, e)))?;
        let connection = client.get_connection_manager().await.map_err(|e| {
            StoreError::Connection(format!("Failed to create connection manager: {}", e))
        })?;

        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Connected circuit store to Redis"
        );

        Ok(Self {
            connection,
            docs_key: format!("{}:evcs", config.key_prefix),
            inserted_key: format!("{}:evcs:inserted_at", config.key_prefix),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Exponential backoff with jitter in the upper half of the window.
    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = backoff_ceiling_ms(self.retry_backoff, attempt);
        let jitter = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(ceiling / 2 + jitter / 2)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f(self.connection.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(operation, attempt, error = %e, ?delay, "Store operation failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(StoreError::Command {
                        operation,
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    async fn write(&self, operation: &'static str, docs: &[EvcDocument]) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let mut entries = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = doc.clone();
            doc.inserted_at = None;
            entries.push((doc.id.clone(), serde_json::to_string(&doc)?));
        }

        let docs_key = self.docs_key.clone();
        let inserted_key = self.inserted_key.clone();
        self.with_retry(operation, |mut conn| {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (id, json) in &entries {
                pipe.hset_nx(&inserted_key, id, &now).ignore();
                pipe.hset(&docs_key, id, json).ignore();
            }
            async move { pipe.query_async::<()>(&mut conn).await }
        })
        .await
    }

    fn decode(
        id: &str,
        json: &str,
        inserted: &HashMap<String, String>,
    ) -> Result<EvcDocument, StoreError> {
        let mut doc: EvcDocument = serde_json::from_str(json)?;
        doc.inserted_at = inserted
            .get(id)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Ok(doc)
    }
}

#[async_trait]
impl CircuitStore for RedisCircuitStore {
    async fn upsert_evc(&self, doc: &EvcDocument) -> Result<(), StoreError> {
        self.write("upsert_evc", std::slice::from_ref(doc)).await
    }

    async fn update_evcs(&self, docs: &[EvcDocument]) -> Result<(), StoreError> {
        self.write("update_evcs", docs).await
    }

    async fn get_circuits(&self, include_archived: bool) -> Result<Vec<EvcDocument>, StoreError> {
        let docs_key = self.docs_key.clone();
        let raw: HashMap<String, String> = self
            .with_retry("get_circuits", |mut conn| {
                let key = docs_key.clone();
                async move { conn.hgetall(&key).await }
            })
            .await?;
        let inserted_key = self.inserted_key.clone();
        let inserted: HashMap<String, String> = self
            .with_retry("get_circuits", |mut conn| {
                let key = inserted_key.clone();
                async move { conn.hgetall(&key).await }
            })
            .await?;

        let mut docs = Vec::with_capacity(raw.len());
        for (id, json) in &raw {
            match Self::decode(id, json, &inserted) {
                Ok(doc) if include_archived || !doc.archived => docs.push(doc),
                Ok(_) => {}
                Err(e) => warn!(circuit = %id, error = %e, "Skipping undecodable circuit document"),
            }
        }
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn get_circuit(&self, id: &str) -> Result<Option<EvcDocument>, StoreError> {
        let (docs_key, inserted_key, field) = (&self.docs_key, &self.inserted_key, id);
        let (json, inserted_at): (Option<String>, Option<String>) = self
            .with_retry("get_circuit", |mut conn| {
                let mut pipe = redis::pipe();
                pipe.hget(&docs_key, &field).hget(&inserted_key, &field);
                async move { pipe.query_async(&mut conn).await }
            })
            .await?;

        match json {
            None => Ok(None),
            Some(json) => {
                let inserted: HashMap<String, String> = inserted_at
                    .map(|ts| HashMap::from([(id.to_string(), ts)]))
                    .unwrap_or_default();
                Self::decode(id, &json, &inserted).map(Some)
            }
        }
    }
}

/// Longest wait between two store attempts.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Upper bound of the retry delay for `attempt`, doubling from `base`.
fn backoff_ceiling_ms(base: Duration, attempt: u32) -> u64 {
    let base = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    base.saturating_mul(1u64 << attempt.min(10)).min(MAX_BACKOFF_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{CircuitSchedule, ScheduleAction};
    use pretty_assertions::assert_eq;

    fn doc(id: &str) -> EvcDocument {
        EvcDocument {
            id: id.to_string(),
            name: format!("evc-{}", id),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_memory_store_keeps_inserted_at() {
        let store = MemoryCircuitStore::new();
        store.upsert_evc(&doc("00000000000001")).await.unwrap();
        let first = store
            .get_circuit("00000000000001")
            .await
            .unwrap()
            .unwrap()
            .inserted_at;
        assert!(first.is_some());

        let mut updated = doc("00000000000001");
        updated.name = "renamed".to_string();
        store.upsert_evc(&updated).await.unwrap();
        let stored = store.get_circuit("00000000000001").await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.inserted_at, first);
    }

    #[tokio::test]
    async fn test_memory_store_filters_archived() {
        let store = MemoryCircuitStore::new();
        let mut archived = doc("00000000000002");
        archived.archived = true;
        store
            .update_evcs(&[doc("00000000000001"), archived])
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_circuits(false).await.unwrap().len(), 1);
        assert_eq!(store.get_circuits(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_schedule_id() {
        let store = MemoryCircuitStore::new();
        let mut scheduled = doc("00000000000003");
        scheduled.circuit_scheduler = vec![CircuitSchedule {
            id: "sched1".to_string(),
            date: None,
            interval: None,
            frequency: Some("* * * * *".to_string()),
            action: ScheduleAction::Create,
        }];
        store.upsert_evc(&scheduled).await.unwrap();
        store.upsert_evc(&doc("00000000000004")).await.unwrap();

        let found = store.find_by_schedule_id("sched1").await.unwrap().unwrap();
        assert_eq!(found.id, "00000000000003");
        assert!(store.find_by_schedule_id("nope").await.unwrap().is_none());
    }

    #[test]
    fn test_backoff_ceiling_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_ceiling_ms(base, 0), 100);
        assert_eq!(backoff_ceiling_ms(base, 3), 800);
        assert_eq!(backoff_ceiling_ms(base, 20), MAX_BACKOFF_MS);
        assert_eq!(backoff_ceiling_ms(Duration::from_secs(u64::MAX), 5), MAX_BACKOFF_MS);
    }

    #[test]
    fn test_decode_merges_inserted_at() {
        let json = serde_json::to_string(&doc("00000000000005")).unwrap();
        let inserted = HashMap::from([(
            "00000000000005".to_string(),
            "2024-01-01T00:00:00+00:00".to_string(),
        )]);
        let decoded = RedisCircuitStore::decode("00000000000005", &json, &inserted).unwrap();
        assert_eq!(
            decoded.inserted_at.map(|ts| ts.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
    }
}
