//! The circuit entity.
//!
//! An [`Evc`] owns the configuration of one circuit together with its runtime
//! state: the path currently installed, the pre-installed failover path, the
//! administrative and operational flags. Its operations are split by concern:
//!
//! - this module: construction, validation, updates, persistence helpers;
//! - [`deploy`]: flow installation and removal, failover setup;
//! - [`protection`]: reactions to link and interface events.
//!
//! An `Evc` is not synchronized itself; the registry keeps each one behind
//! its own mutex.

pub mod deploy;
pub mod document;
pub mod protection;

pub use document::{EvcChanges, EvcDocument, READ_ONLY_ATTRIBUTES, REDEPLOY_ATTRIBUTES};

use crate::clients::PathConstraints;
use crate::context::EvcContext;
use crate::error::{EvcError, Result, TagError};
use crate::flows::{evc_cookie, FlowSettings, FlowSynthesizer};
use crate::notify::{EvcEvent, EvcEventKind};
use crate::path::Path;
use crate::scheduler::CircuitSchedule;
use crate::topology::TagAllocator;
use chrono::{DateTime, Utc};
use document::UPDATABLE_ATTRIBUTES;
use eline_types::{EntityStatus, Uni};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Length of a circuit id in hex characters.
pub const EVC_ID_LEN: usize = 14;

/// Highest service level.
pub const MAX_SERVICE_LEVEL: u8 = 7;

/// Generates a fresh circuit id.
pub fn new_circuit_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(EVC_ID_LEN);
    id
}

fn is_circuit_id(id: &str) -> bool {
    id.len() == EVC_ID_LEN && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// True if `ts` lies less than `window` in the past. Future timestamps count
/// as recent.
fn within(ts: Option<DateTime<Utc>>, window: Duration) -> bool {
    ts.is_some_and(|ts| {
        Utc::now()
            .signed_duration_since(ts)
            .to_std()
            .map_or(true, |age| age < window)
    })
}

fn validate_tag_symmetry(uni_a: &Uni, uni_z: &Uni) -> Result<()> {
    let same_shape = uni_a.has_tag_range() == uni_z.has_tag_range();
    if !same_shape || (uni_a.has_tag_range() && uni_a.masks() != uni_z.masks()) {
        return Err(EvcError::validation(
            "UNI_A and UNI_Z tag lists should be the same.",
        ));
    }
    Ok(())
}

fn validate_has_primary_or_dynamic(
    primary_path: &Path,
    dynamic_backup_path: bool,
    uni_a: &Uni,
    uni_z: &Uni,
) -> Result<()> {
    if primary_path.is_empty() && !dynamic_backup_path && uni_a.dpid() != uni_z.dpid() {
        return Err(EvcError::validation(
            "The EVC must have a primary path or allow dynamic paths.",
        ));
    }
    Ok(())
}

fn validate_service_level(level: u8) -> Result<()> {
    if level > MAX_SERVICE_LEVEL {
        return Err(EvcError::validation(format!(
            "service_level must be between 0 and {}",
            MAX_SERVICE_LEVEL
        )));
    }
    Ok(())
}

fn reserve_uni_tag(tags: &dyn TagAllocator, uni: &Uni) -> std::result::Result<(), TagError> {
    match &uni.user_tag {
        Some(tag) => tags.use_uni_tags(&uni.interface_id, tag),
        None => Ok(()),
    }
}

fn release_uni_tag(tags: &dyn TagAllocator, uni: &Uni) {
    if let Some(tag) = &uni.user_tag {
        if let Err(e) = tags.make_uni_tags_available(&uni.interface_id, tag) {
            warn!(uni = %uni, error = %e, "Failed to release UNI tag");
        }
    }
}

/// One Ethernet Virtual Circuit.
pub struct Evc {
    ctx: EvcContext,
    cookie: u64,

    id: String,
    name: String,
    uni_a: Uni,
    uni_z: Uni,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    queue_id: Option<u32>,
    bandwidth: u64,
    owner: Option<String>,
    sb_priority: Option<u16>,
    service_level: u8,
    circuit_scheduler: Vec<CircuitSchedule>,
    metadata: Map<String, Value>,

    primary_path: Path,
    backup_path: Path,
    dynamic_backup_path: bool,
    primary_constraints: PathConstraints,
    secondary_constraints: PathConstraints,

    current_path: Path,
    failover_path: Path,
    old_path: Path,

    active: bool,
    enabled: bool,
    archived: bool,
    execution_rounds: u32,
    creation_time: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    flow_removed_at: Option<DateTime<Utc>>,
    affected_by_link_at: Option<DateTime<Utc>>,
    inserted_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Evc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evc")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("uni_a", &self.uni_a)
            .field("uni_z", &self.uni_z)
            .field("current_path", &self.current_path)
            .field("active", &self.active)
            .field("enabled", &self.enabled)
            .field("archived", &self.archived)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Evc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVC({}, {})", self.id, self.name)
    }
}

impl Evc {
    /// Builds a new circuit from a creation request.
    ///
    /// A fresh id and creation time are assigned and any runtime state in the
    /// request is discarded. Explicit paths must be valid in the current
    /// topology, or merely well formed when the circuit is scheduled.
    pub fn from_request(ctx: EvcContext, mut doc: EvcDocument) -> Result<Self> {
        doc.id = new_circuit_id();
        doc.current_path = Path::default();
        doc.failover_path = Path::default();
        doc.old_path = Path::default();
        doc.active = false;
        doc.archived = false;
        doc.execution_rounds = 0;
        doc.creation_time = Utc::now();
        doc.updated_at = None;
        doc.flow_removed_at = None;
        doc.inserted_at = None;

        let evc = Self::from_document(ctx, doc)?;
        let is_scheduled = !evc.circuit_scheduler.is_empty();
        for (attribute, path) in [
            ("primary_path", &evc.primary_path),
            ("backup_path", &evc.backup_path),
        ] {
            evc.validate_path(attribute, path, is_scheduled)?;
        }
        Ok(evc)
    }

    /// Rebuilds a circuit from its stored document.
    pub fn from_document(ctx: EvcContext, doc: EvcDocument) -> Result<Self> {
        let EvcDocument {
            id,
            name,
            uni_a,
            uni_z,
            start_date,
            end_date,
            queue_id,
            bandwidth,
            primary_path,
            backup_path,
            current_path,
            failover_path,
            old_path,
            dynamic_backup_path,
            primary_constraints,
            secondary_constraints,
            owner,
            sb_priority,
            service_level,
            circuit_scheduler,
            metadata,
            active,
            enabled,
            archived,
            execution_rounds,
            creation_time,
            updated_at,
            flow_removed_at,
            inserted_at,
        } = doc;

        if name.trim().is_empty() {
            return Err(EvcError::validation("name is required."));
        }
        let uni_a = uni_a.ok_or_else(|| EvcError::validation("uni_a is required."))?;
        let uni_z = uni_z.ok_or_else(|| EvcError::validation("uni_z is required."))?;
        validate_tag_symmetry(&uni_a, &uni_z)?;
        validate_has_primary_or_dynamic(&primary_path, dynamic_backup_path, &uni_a, &uni_z)?;
        validate_service_level(service_level)?;
        for schedule in &circuit_scheduler {
            schedule.validate()?;
        }
        if !is_circuit_id(&id) {
            return Err(EvcError::validation(format!("Invalid circuit id '{}'", id)));
        }
        let cookie = evc_cookie(&id, ctx.settings.cookie_prefix)
            .ok_or_else(|| EvcError::validation(format!("Invalid circuit id '{}'", id)))?;

        Ok(Self {
            ctx,
            cookie,
            id,
            name,
            uni_a,
            uni_z,
            start_date,
            end_date,
            queue_id,
            bandwidth,
            owner,
            sb_priority,
            service_level,
            circuit_scheduler,
            metadata,
            primary_path,
            backup_path,
            dynamic_backup_path,
            primary_constraints,
            secondary_constraints,
            current_path,
            failover_path,
            old_path,
            active,
            enabled,
            archived,
            execution_rounds,
            creation_time,
            updated_at,
            flow_removed_at,
            affected_by_link_at: None,
            inserted_at,
        })
    }

    /// Snapshot of the persisted state.
    pub fn as_document(&self) -> EvcDocument {
        EvcDocument {
            id: self.id.clone(),
            name: self.name.clone(),
            uni_a: Some(self.uni_a.clone()),
            uni_z: Some(self.uni_z.clone()),
            start_date: self.start_date,
            end_date: self.end_date,
            queue_id: self.queue_id,
            bandwidth: self.bandwidth,
            primary_path: self.primary_path.clone(),
            backup_path: self.backup_path.clone(),
            current_path: self.current_path.clone(),
            failover_path: self.failover_path.clone(),
            old_path: self.old_path.clone(),
            dynamic_backup_path: self.dynamic_backup_path,
            primary_constraints: self.primary_constraints.clone(),
            secondary_constraints: self.secondary_constraints.clone(),
            owner: self.owner.clone(),
            sb_priority: self.sb_priority,
            service_level: self.service_level,
            circuit_scheduler: self.circuit_scheduler.clone(),
            metadata: self.metadata.clone(),
            active: self.active,
            enabled: self.enabled,
            archived: self.archived,
            execution_rounds: self.execution_rounds,
            creation_time: self.creation_time,
            updated_at: self.updated_at,
            flow_removed_at: self.flow_removed_at,
            inserted_at: self.inserted_at,
        }
    }

    fn validate_path(&self, attribute: &str, path: &Path, is_scheduled: bool) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        path.is_valid(
            self.uni_a.dpid(),
            self.uni_z.dpid(),
            is_scheduled,
            self.ctx.topology.as_ref(),
        )
        .map_err(|e| EvcError::validation(format!("{} is not a valid path: {}", attribute, e)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uni_a(&self) -> &Uni {
        &self.uni_a
    }

    pub fn uni_z(&self) -> &Uni {
        &self.uni_z
    }

    /// Flow cookie of this circuit.
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn queue_id(&self) -> Option<u32> {
        self.queue_id
    }

    pub fn service_level(&self) -> u8 {
        self.service_level
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn circuit_scheduler(&self) -> &[CircuitSchedule] {
        &self.circuit_scheduler
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn failover_path(&self) -> &Path {
        &self.failover_path
    }

    pub fn old_path(&self) -> &Path {
        &self.old_path
    }

    pub fn dynamic_backup_path(&self) -> bool {
        self.dynamic_backup_path
    }

    pub fn execution_rounds(&self) -> u32 {
        self.execution_rounds
    }

    pub fn affected_by_link_at(&self) -> Option<DateTime<Utc>> {
        self.affected_by_link_at
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Marks the circuit as deleted. Archived circuits never deploy again.
    pub fn archive(&mut self) {
        self.archived = true;
    }

    /// Records that a flow of this circuit was removed from a switch.
    pub fn set_flow_removed_at(&mut self, at: DateTime<Utc>) {
        self.flow_removed_at = Some(at);
    }

    /// Records that a link used by this circuit went down.
    pub fn set_affected_by_link_at(&mut self, at: DateTime<Utc>) {
        self.affected_by_link_at = Some(at);
    }

    pub fn reset_execution_rounds(&mut self) {
        self.execution_rounds = 0;
    }

    /// Counts one more failed consistency check and returns the new count.
    pub fn increment_execution_rounds(&mut self) -> u32 {
        self.execution_rounds = self.execution_rounds.saturating_add(1);
        self.execution_rounds
    }

    /// Merges `metadata` into the circuit metadata.
    pub fn extend_metadata(&mut self, metadata: Map<String, Value>) {
        self.metadata.extend(metadata);
    }

    /// Removes one metadata key; returns false if it was not set.
    pub fn remove_metadata(&mut self, key: &str) -> bool {
        self.metadata.remove(key).is_some()
    }

    /// Both UNIs on the same switch.
    pub fn is_intra_switch(&self) -> bool {
        self.uni_a.dpid() == self.uni_z.dpid()
    }

    pub fn is_using_primary_path(&self) -> bool {
        !self.primary_path.is_empty() && self.current_path == self.primary_path
    }

    pub fn is_using_backup_path(&self) -> bool {
        !self.backup_path.is_empty() && self.current_path == self.backup_path
    }

    /// Deployed on a discovered path that is still up.
    pub fn is_using_dynamic_path(&self) -> bool {
        !self.current_path.is_empty()
            && !self.is_using_primary_path()
            && !self.is_using_backup_path()
            && self.current_path.status(self.ctx.topology.as_ref()) == EntityStatus::Up
    }

    /// Dynamic circuits without explicit paths get a pre-installed failover path.
    pub fn is_eligible_for_failover_path(&self) -> bool {
        self.dynamic_backup_path && self.primary_path.is_empty() && self.backup_path.is_empty()
    }

    /// Both UNI interfaces are up.
    pub fn are_unis_active(&self) -> bool {
        let topology = self.ctx.topology.as_ref();
        topology.interface_status(&self.uni_a.interface_id) == EntityStatus::Up
            && topology.interface_status(&self.uni_z.interface_id) == EntityStatus::Up
    }

    pub fn has_recent_removed_flow(&self) -> bool {
        within(
            self.flow_removed_at,
            self.ctx.settings.time_recent_deleted_flows,
        )
    }

    pub fn is_recent_updated(&self) -> bool {
        within(self.updated_at, self.ctx.settings.time_recent_updated)
    }

    /// True if a link of this circuit went down less than `window` ago.
    pub fn is_recently_affected_by_link(&self, window: Duration) -> bool {
        within(self.affected_by_link_at, window)
    }

    /// Whether the consistency loop should trace this circuit.
    pub fn should_be_checked(&self) -> bool {
        self.enabled
            && !self.active
            && !self.archived
            && !self.has_recent_removed_flow()
            && !self.is_recent_updated()
            && self.are_unis_active()
            && (self.is_intra_switch() || !self.current_path.is_empty())
    }

    pub(crate) fn synthesizer<'a>(&'a self, settings: &'a FlowSettings) -> FlowSynthesizer<'a> {
        FlowSynthesizer::new(
            &self.uni_a,
            &self.uni_z,
            self.cookie,
            self.queue_id,
            self.sb_priority,
            settings,
        )
    }

    pub(crate) fn event(&self, kind: EvcEventKind) -> EvcEvent {
        EvcEvent {
            kind,
            evc_id: self.id.clone(),
            name: self.name.clone(),
            active: self.active,
            enabled: self.enabled,
            timestamp: Utc::now(),
        }
    }

    /// Emits a lifecycle notification for this circuit.
    pub fn notify(&self, kind: EvcEventKind) {
        self.ctx.notifier.emit(self.event(kind));
    }

    /// Persists the circuit. Store failures are logged, never raised.
    pub async fn sync(&self) {
        if let Err(e) = self.ctx.store.upsert_evc(&self.as_document()).await {
            error!(evc = %self, error = %e, "Failed to persist circuit");
        }
    }

    /// Reserves the tags of both UNIs; nothing stays reserved on failure.
    pub fn use_uni_tags(&self) -> Result<()> {
        let tags = self.ctx.tags.as_ref();
        reserve_uni_tag(tags, &self.uni_a)?;
        if let Err(e) = reserve_uni_tag(tags, &self.uni_z) {
            release_uni_tag(tags, &self.uni_a);
            return Err(e.into());
        }
        Ok(())
    }

    /// Releases the tags of both UNIs.
    pub fn make_uni_tags_available(&self) {
        let tags = self.ctx.tags.as_ref();
        release_uni_tag(tags, &self.uni_a);
        release_uni_tag(tags, &self.uni_z);
    }

    /// Re-reserves the transport VLANs of the installed paths after a restart.
    pub fn use_path_vlans(&self) {
        let tags = self.ctx.tags.as_ref();
        self.current_path.use_vlans(tags);
        self.failover_path.use_vlans(tags);
    }

    /// Moves UNI tag reservations to the new UNIs.
    ///
    /// Old tags are released before the new ones are reserved, so a new tag
    /// may overlap the circuit's own reservation. On failure the new
    /// reservations made by this call are undone and the old tags are
    /// reserved again.
    fn swap_uni_tags(&self, new_a: Option<&Uni>, new_z: Option<&Uni>) -> Result<()> {
        let tags = self.ctx.tags.as_ref();
        let pending: Vec<(&Uni, &Uni)> = [(&self.uni_a, new_a), (&self.uni_z, new_z)]
            .into_iter()
            .filter_map(|(old, new)| new.filter(|new| *new != old).map(|new| (old, new)))
            .collect();

        for (old, _) in &pending {
            release_uni_tag(tags, old);
        }
        let mut reserved: Vec<&Uni> = Vec::with_capacity(pending.len());
        for (_, new) in &pending {
            if let Err(e) = reserve_uni_tag(tags, new) {
                for uni in reserved {
                    release_uni_tag(tags, uni);
                }
                for (old, _) in &pending {
                    if let Err(restore) = reserve_uni_tag(tags, old) {
                        error!(uni = %old, error = %restore, "Failed to restore UNI tag");
                    }
                }
                return Err(e.into());
            }
            reserved.push(new);
        }
        Ok(())
    }

    /// Applies a partial update.
    ///
    /// Everything is validated before anything changes. Returns the
    /// requested `enabled` value, if any, and `Some(true)` when a changed
    /// attribute requires the circuit to be redeployed; the caller performs
    /// the redeploy.
    pub async fn update(
        &mut self,
        changes: &Map<String, Value>,
    ) -> Result<(Option<bool>, Option<bool>)> {
        for key in changes.keys() {
            if READ_ONLY_ATTRIBUTES.contains(&key.as_str()) {
                return Err(EvcError::validation(format!("{} can't be updated.", key)));
            }
            if !UPDATABLE_ATTRIBUTES.contains(&key.as_str()) {
                return Err(EvcError::validation(format!(
                    "The attribute \"{}\" is invalid.",
                    key
                )));
            }
        }
        let parsed: EvcChanges = serde_json::from_value(Value::Object(changes.clone()))
            .map_err(|e| EvcError::validation(e.to_string()))?;

        {
            let uni_a = parsed.uni_a.as_ref().unwrap_or(&self.uni_a);
            let uni_z = parsed.uni_z.as_ref().unwrap_or(&self.uni_z);
            validate_tag_symmetry(uni_a, uni_z)?;
            validate_has_primary_or_dynamic(
                parsed.primary_path.as_ref().unwrap_or(&self.primary_path),
                parsed
                    .dynamic_backup_path
                    .unwrap_or(self.dynamic_backup_path),
                uni_a,
                uni_z,
            )?;
            if let Some(name) = &parsed.name {
                if name.trim().is_empty() {
                    return Err(EvcError::validation("name is required."));
                }
            }
            if let Some(level) = parsed.service_level {
                validate_service_level(level)?;
            }
            if let Some(schedules) = &parsed.circuit_scheduler {
                for schedule in schedules {
                    schedule.validate()?;
                }
            }
            let is_scheduled = !self.circuit_scheduler.is_empty();
            for (attribute, path) in [
                ("primary_path", parsed.primary_path.as_ref()),
                ("backup_path", parsed.backup_path.as_ref()),
            ] {
                if let Some(path) = path.filter(|path| !path.is_empty()) {
                    path.is_valid(
                        uni_a.dpid(),
                        uni_z.dpid(),
                        is_scheduled,
                        self.ctx.topology.as_ref(),
                    )
                    .map_err(|e| {
                        EvcError::validation(format!("{} is not a valid path: {}", attribute, e))
                    })?;
                }
            }
        }

        self.swap_uni_tags(parsed.uni_a.as_ref(), parsed.uni_z.as_ref())?;

        let redeploy = REDEPLOY_ATTRIBUTES
            .iter()
            .any(|attribute| changes.contains_key(*attribute));
        let EvcChanges {
            name,
            uni_a,
            uni_z,
            start_date,
            end_date,
            queue_id,
            bandwidth,
            primary_path,
            backup_path,
            dynamic_backup_path,
            primary_constraints,
            secondary_constraints,
            owner,
            sb_priority,
            service_level,
            circuit_scheduler,
            metadata,
            enabled,
        } = parsed;

        if let Some(value) = name {
            self.name = value;
        }
        if let Some(value) = uni_a {
            self.uni_a = value;
        }
        if let Some(value) = uni_z {
            self.uni_z = value;
        }
        if let Some(value) = start_date {
            self.start_date = value;
        }
        if let Some(value) = end_date {
            self.end_date = value;
        }
        if let Some(value) = queue_id {
            self.queue_id = value;
        }
        if let Some(value) = bandwidth {
            self.bandwidth = value;
        }
        if let Some(value) = primary_path {
            self.primary_path = value;
        }
        if let Some(value) = backup_path {
            self.backup_path = value;
        }
        if let Some(value) = dynamic_backup_path {
            self.dynamic_backup_path = value;
        }
        if let Some(value) = primary_constraints {
            self.primary_constraints = value;
        }
        if let Some(value) = secondary_constraints {
            self.secondary_constraints = value;
        }
        if let Some(value) = owner {
            self.owner = value;
        }
        if let Some(value) = sb_priority {
            self.sb_priority = value;
        }
        if let Some(value) = service_level {
            self.service_level = value;
        }
        if let Some(value) = circuit_scheduler {
            self.circuit_scheduler = value;
        }
        if let Some(value) = metadata {
            self.metadata = value;
        }
        if let Some(enabled) = enabled {
            self.enabled = enabled;
        }
        self.updated_at = Some(Utc::now());
        self.sync().await;
        info!(evc = %self, redeploy, "Circuit updated");

        Ok((enabled, redeploy.then_some(true)))
    }
}
