//! Persisted circuit representation and update payloads.

use crate::clients::PathConstraints;
use crate::path::Path;
use crate::scheduler::CircuitSchedule;
use chrono::{DateTime, Utc};
use eline_types::Uni;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A circuit as stored and as accepted on creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvcDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uni_a: Option<Uni>,
    #[serde(default)]
    pub uni_z: Option<Uni>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<u32>,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub primary_path: Path,
    #[serde(default)]
    pub backup_path: Path,
    #[serde(default)]
    pub current_path: Path,
    #[serde(default)]
    pub failover_path: Path,
    #[serde(default)]
    pub old_path: Path,
    #[serde(default)]
    pub dynamic_backup_path: bool,
    #[serde(default)]
    pub primary_constraints: PathConstraints,
    #[serde(default)]
    pub secondary_constraints: PathConstraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sb_priority: Option<u16>,
    #[serde(default)]
    pub service_level: u8,
    #[serde(default)]
    pub circuit_scheduler: Vec<CircuitSchedule>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub execution_rounds: u32,
    #[serde(default = "Utc::now")]
    pub creation_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_removed_at: Option<DateTime<Utc>>,
    /// Set by the store on first insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_at: Option<DateTime<Utc>>,
}

/// Attributes that can never be changed through an update.
pub const READ_ONLY_ATTRIBUTES: [&str; 11] = [
    "id",
    "creation_time",
    "active",
    "current_path",
    "failover_path",
    "old_path",
    "archived",
    "execution_rounds",
    "updated_at",
    "flow_removed_at",
    "inserted_at",
];

/// Attributes whose change requires the circuit to be redeployed.
pub const REDEPLOY_ATTRIBUTES: [&str; 9] = [
    "primary_path",
    "backup_path",
    "dynamic_backup_path",
    "queue_id",
    "sb_priority",
    "primary_constraints",
    "secondary_constraints",
    "uni_a",
    "uni_z",
];

/// Attributes an update may carry.
pub const UPDATABLE_ATTRIBUTES: [&str; 18] = [
    "name",
    "uni_a",
    "uni_z",
    "start_date",
    "end_date",
    "queue_id",
    "bandwidth",
    "primary_path",
    "backup_path",
    "dynamic_backup_path",
    "primary_constraints",
    "secondary_constraints",
    "owner",
    "sb_priority",
    "service_level",
    "circuit_scheduler",
    "metadata",
    "enabled",
];

/// Maps an explicit `null` to `Some(None)` so it can clear a field.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvcChanges {
    pub name: Option<String>,
    pub uni_a: Option<Uni>,
    pub uni_z: Option<Uni>,
    #[serde(default, deserialize_with = "nullable")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub queue_id: Option<Option<u32>>,
    pub bandwidth: Option<u64>,
    pub primary_path: Option<Path>,
    pub backup_path: Option<Path>,
    pub dynamic_backup_path: Option<bool>,
    pub primary_constraints: Option<PathConstraints>,
    pub secondary_constraints: Option<PathConstraints>,
    #[serde(default, deserialize_with = "nullable")]
    pub owner: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub sb_priority: Option<Option<u16>>,
    pub service_level: Option<u8>,
    pub circuit_scheduler: Option<Vec<CircuitSchedule>>,
    pub metadata: Option<Map<String, Value>>,
    pub enabled: Option<bool>,
}
