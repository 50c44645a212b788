//! Shared collaborators and settings of the circuit engine.

use crate::clients::{CircuitStore, FlowManager};
use crate::config::ElineConfig;
use crate::dynamic_path::DynamicPathManager;
use crate::flows::{FlowSettings, TableGroups};
use crate::notify::Notifier;
use crate::topology::{TagAllocator, Topology};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Runtime settings shared by every circuit.
#[derive(Debug)]
pub struct EvcSettings {
    /// High byte of every circuit cookie.
    pub cookie_prefix: u8,
    flows: RwLock<FlowSettings>,
    /// Window after a flow removal during which the consistency loop skips a circuit.
    pub time_recent_deleted_flows: Duration,
    /// Window after an update during which the consistency loop skips a circuit.
    pub time_recent_updated: Duration,
    /// Failed trace rounds tolerated before a forced redeploy.
    pub wait_for_old_path: u32,
    /// Consistency sweep period; a circuit hit by a link event within this
    /// window does not get a new failover path yet.
    pub deploy_evcs_interval: Duration,
}

impl EvcSettings {
    /// Settings derived from the configuration file.
    pub fn from_config(config: &ElineConfig) -> Self {
        let flows = &config.flows;
        Self {
            cookie_prefix: flows.cookie_prefix,
            flows: RwLock::new(FlowSettings {
                owner: flows.owner.clone(),
                epl_priority: flows.epl_priority,
                evpl_priority: flows.evpl_priority,
                any_priority: flows.any_priority,
                untagged_priority: flows.untagged_priority,
                table_groups: TableGroups::from_map(&flows.table_groups),
            }),
            time_recent_deleted_flows: Duration::from_secs(
                config.consistency.time_recent_deleted_flows_secs,
            ),
            time_recent_updated: Duration::from_secs(config.consistency.time_recent_updated_secs),
            wait_for_old_path: config.consistency.wait_for_old_path,
            deploy_evcs_interval: config.deploy_evcs_interval(),
        }
    }

    /// Snapshot of the flow settings.
    pub fn flow_settings(&self) -> FlowSettings {
        self.flows.read().clone()
    }

    /// Replaces the table assignment used for flows built from now on.
    pub fn set_table_groups(&self, groups: TableGroups) {
        self.flows.write().table_groups = groups;
    }
}

impl Default for EvcSettings {
    fn default() -> Self {
        Self::from_config(&ElineConfig::default())
    }
}

/// Everything a circuit needs to act on the network.
#[derive(Clone)]
pub struct EvcContext {
    /// Topology view.
    pub topology: Arc<dyn Topology>,
    /// VLAN pools.
    pub tags: Arc<dyn TagAllocator>,
    /// Southbound flow service.
    pub flow_manager: Arc<dyn FlowManager>,
    /// Dynamic path computation.
    pub paths: DynamicPathManager,
    /// Circuit store.
    pub store: Arc<dyn CircuitStore>,
    /// Lifecycle notifications.
    pub notifier: Notifier,
    /// Shared settings.
    pub settings: Arc<EvcSettings>,
}

impl std::fmt::Debug for EvcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvcContext")
            .field("paths", &self.paths)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_settings_from_config() {
        let mut config = ElineConfig::default();
        config.flows.table_groups.insert("evpl".to_string(), 4);
        config.consistency.wait_for_old_path = 2;
        let settings = EvcSettings::from_config(&config);
        assert_eq!(settings.cookie_prefix, 0xAA);
        assert_eq!(settings.wait_for_old_path, 2);
        assert_eq!(settings.flow_settings().table_groups.evpl, 4);
    }

    #[test]
    fn test_set_table_groups() {
        let settings = EvcSettings::default();
        settings.set_table_groups(TableGroups { epl: 1, evpl: 2 });
        assert_eq!(
            settings.flow_settings().table_groups,
            TableGroups { epl: 1, evpl: 2 }
        );
    }
}
