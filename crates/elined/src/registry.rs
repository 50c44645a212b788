//! In-memory arena of circuits.
//!
//! Every circuit lives in its own [`CircuitEntry`] guarded by a tokio mutex;
//! the map itself is a [`DashMap`] so unrelated circuits never contend.

use crate::context::EvcContext;
use crate::error::{EvcError, Result};
use crate::evc::{Evc, EvcDocument};
use crate::flows::id_from_cookie;
use crate::notify::EvcEventKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eline_types::Uni;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use tracing::{debug, info, instrument, warn};

/// One circuit and its lock.
///
/// The ordering keys are kept outside the lock so circuits can be sorted
/// without waiting on busy ones.
#[derive(Debug)]
pub struct CircuitEntry {
    id: String,
    creation_time: DateTime<Utc>,
    service_level: AtomicU8,
    evc: Mutex<Evc>,
}

impl CircuitEntry {
    fn new(evc: Evc) -> Self {
        Self {
            id: evc.id().to_string(),
            creation_time: evc.creation_time(),
            service_level: AtomicU8::new(evc.service_level()),
            evc: Mutex::new(evc),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn service_level(&self) -> u8 {
        self.service_level.load(Ordering::Relaxed)
    }

    /// Waits for the circuit lock.
    pub async fn lock(&self) -> MutexGuard<'_, Evc> {
        self.evc.lock().await
    }

    /// Takes the circuit lock if nobody holds it.
    pub fn try_lock(&self) -> std::result::Result<MutexGuard<'_, Evc>, TryLockError> {
        self.evc.try_lock()
    }

    fn refresh(&self, evc: &Evc) {
        self.service_level
            .store(evc.service_level(), Ordering::Relaxed);
    }
}

fn same_unis(a: (&Uni, &Uni), b: (&Uni, &Uni)) -> bool {
    (a.0 == b.0 && a.1 == b.1) || (a.0 == b.1 && a.1 == b.0)
}

/// Circuits currently managed by this process.
#[derive(Debug)]
pub struct CircuitRegistry {
    ctx: EvcContext,
    circuits: DashMap<String, Arc<CircuitEntry>>,
}

impl CircuitRegistry {
    pub fn new(ctx: EvcContext) -> Self {
        Self {
            ctx,
            circuits: DashMap::new(),
        }
    }

    pub fn ctx(&self) -> &EvcContext {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.circuits.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<CircuitEntry>> {
        self.circuits.get(id).map(|entry| entry.value().clone())
    }

    fn entry(&self, id: &str) -> Result<Arc<CircuitEntry>> {
        self.get(id)
            .ok_or_else(|| EvcError::NotFound(id.to_string()))
    }

    /// Snapshot of every entry, in no particular order.
    pub fn entries(&self) -> Vec<Arc<CircuitEntry>> {
        self.circuits
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Entries ordered by service level (highest first), then age (oldest first).
    pub fn by_service_level(&self) -> Vec<Arc<CircuitEntry>> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| {
            b.service_level()
                .cmp(&a.service_level())
                .then(a.creation_time().cmp(&b.creation_time()))
        });
        entries
    }

    /// Stored form of every circuit in memory.
    pub async fn documents(&self) -> Vec<EvcDocument> {
        let mut docs = Vec::with_capacity(self.len());
        for entry in self.by_service_level() {
            docs.push(entry.lock().await.as_document());
        }
        docs
    }

    async fn find_duplicate(&self, uni_a: &Uni, uni_z: &Uni) -> Option<String> {
        for entry in self.entries() {
            let evc = entry.lock().await;
            if !evc.is_archived() && same_unis((evc.uni_a(), evc.uni_z()), (uni_a, uni_z)) {
                return Some(evc.id().to_string());
            }
        }
        None
    }

    /// Creates a circuit from a request.
    ///
    /// The UNI tags are reserved and the circuit is persisted before it
    /// becomes visible. Circuits without schedules are deployed right away;
    /// a failed deploy still leaves the circuit created.
    #[instrument(skip(self, doc), fields(name = %doc.name))]
    pub async fn create(&self, doc: EvcDocument) -> Result<Arc<CircuitEntry>> {
        let evc = Evc::from_request(self.ctx.clone(), doc)?;
        if let Some(existing) = self.find_duplicate(evc.uni_a(), evc.uni_z()).await {
            return Err(EvcError::conflict(format!(
                "The EVC already exists as {}.",
                existing
            )));
        }
        evc.use_uni_tags()?;
        evc.sync().await;

        let deploy_now = evc.circuit_scheduler().is_empty();
        let entry = Arc::new(CircuitEntry::new(evc));
        self.circuits.insert(entry.id().to_string(), entry.clone());

        let mut evc = entry.lock().await;
        info!(evc = %*evc, "Circuit created");
        evc.notify(EvcEventKind::Created);
        if deploy_now && !evc.deploy().await {
            warn!(evc = %*evc, "Circuit created but not deployed");
        }
        drop(evc);
        Ok(entry)
    }

    /// Adds a stored circuit to memory.
    ///
    /// Archived circuits and circuits already loaded are skipped. Tags and
    /// transport VLANs recorded in the document are reserved again; a
    /// reservation conflict is logged and the circuit is loaded anyway.
    pub fn load(&self, doc: EvcDocument) -> Result<Option<Arc<CircuitEntry>>> {
        if doc.archived || self.contains(&doc.id) {
            return Ok(None);
        }
        let evc = Evc::from_document(self.ctx.clone(), doc)?;
        if let Err(e) = evc.use_uni_tags() {
            warn!(evc = %evc, error = %e, "Cannot reserve UNI tags of loaded circuit");
        }
        evc.use_path_vlans();
        debug!(evc = %evc, "Circuit loaded");
        let entry = Arc::new(CircuitEntry::new(evc));
        self.circuits
            .insert(entry.id().to_string(), entry.clone());
        Ok(Some(entry))
    }

    /// Loads every stored circuit not yet in memory; returns how many were added.
    pub async fn load_all(&self) -> Result<usize> {
        let docs = self.ctx.store.get_circuits(false).await?;
        let mut loaded = 0;
        for doc in docs {
            let id = doc.id.clone();
            match self.load(doc) {
                Ok(Some(_)) => loaded += 1,
                Ok(None) => {}
                Err(e) => warn!(evc = %id, error = %e, "Skipping invalid stored circuit"),
            }
        }
        if loaded > 0 {
            info!(loaded, total = self.len(), "Circuits loaded from store");
        }
        Ok(loaded)
    }

    /// Applies a partial update and redeploys when needed.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: &str, changes: &Map<String, Value>) -> Result<()> {
        let entry = self.entry(id)?;
        let mut evc = entry.lock().await;
        if evc.is_archived() {
            return Err(EvcError::conflict(format!("Can't update archived EVC {}", id)));
        }
        let (enable, redeploy) = evc.update(changes).await?;
        entry.refresh(&evc);

        if evc.is_active() {
            if enable == Some(false) {
                evc.remove().await;
            } else if redeploy == Some(true) {
                evc.remove().await;
                evc.deploy().await;
            }
        } else if enable == Some(true) || (redeploy == Some(true) && evc.is_enabled()) {
            evc.remove().await;
            evc.deploy().await;
        }
        Ok(())
    }

    /// Tears the circuit down and deploys it again. Returns whether it got deployed.
    #[instrument(skip(self))]
    pub async fn redeploy(&self, id: &str) -> Result<bool> {
        let entry = self.entry(id)?;
        let mut evc = entry.lock().await;
        if evc.is_archived() || !evc.is_enabled() {
            return Err(EvcError::conflict(format!(
                "Can't redeploy disabled EVC {}",
                id
            )));
        }
        evc.remove_current_flows().await;
        evc.remove_failover_flows(true).await;
        Ok(evc.deploy().await)
    }

    /// Removes the circuit's flows, releases its tags and archives it.
    ///
    /// The archived document stays in the store; the circuit leaves memory.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let mut evc = entry.lock().await;
        if evc.is_archived() {
            return Err(EvcError::NotFound(id.to_string()));
        }
        evc.remove_current_flows().await;
        evc.remove_failover_flows(false).await;
        evc.deactivate();
        evc.disable();
        evc.archive();
        evc.make_uni_tags_available();
        evc.sync().await;
        info!(evc = %*evc, "Circuit deleted");
        evc.notify(EvcEventKind::Deleted);
        drop(evc);
        self.circuits.remove(id);
        Ok(())
    }

    /// Merges `metadata` into the circuit metadata.
    pub async fn add_metadata(&self, id: &str, metadata: Map<String, Value>) -> Result<()> {
        let entry = self.entry(id)?;
        let mut evc = entry.lock().await;
        evc.extend_metadata(metadata);
        evc.sync().await;
        Ok(())
    }

    /// Deletes one metadata key.
    pub async fn remove_metadata(&self, id: &str, key: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let mut evc = entry.lock().await;
        if !evc.remove_metadata(key) {
            return Err(EvcError::NotFound(format!("{} metadata {}", id, key)));
        }
        evc.sync().await;
        Ok(())
    }

    /// Records a flow removal reported by a switch. Cookies of other
    /// applications are ignored; returns whether a circuit was marked.
    pub async fn set_flow_removed(&self, cookie: u64, at: DateTime<Utc>) -> bool {
        let prefix = self.ctx.settings.cookie_prefix;
        if cookie >> 56 != u64::from(prefix) {
            return false;
        }
        let Some(entry) = self.get(&id_from_cookie(cookie, prefix)) else {
            return false;
        };
        let mut evc = entry.lock().await;
        debug!(evc = %*evc, cookie = format!("{:#x}", cookie), "Flow removed");
        evc.set_flow_removed_at(at);
        true
    }

    /// The circuit carrying schedule `schedule_id`.
    pub async fn circuit_by_schedule(&self, schedule_id: &str) -> Result<Option<Arc<CircuitEntry>>> {
        let doc = self.ctx.store.find_by_schedule_id(schedule_id).await?;
        Ok(doc.and_then(|doc| self.get(&doc.id)))
    }
}
