//! Reactions to link and interface state changes.

use super::Evc;
use crate::notify::EvcEventKind;
use eline_types::{EntityStatus, InterfaceId, Link};
use tracing::{debug, info, warn};

impl Evc {
    /// True if the installed path uses `link`.
    pub fn is_affected_by_link(&self, link: &Link) -> bool {
        self.current_path.is_affected_by_link(link)
    }

    /// True if the pre-installed failover path uses `link`.
    pub fn is_failover_path_affected_by_link(&self, link: &Link) -> bool {
        self.failover_path.is_affected_by_link(link)
    }

    /// True if `iface` is one of the UNIs.
    pub fn is_uni_interface(&self, iface: &InterfaceId) -> bool {
        self.uni_a.interface_id == *iface || self.uni_z.interface_id == *iface
    }

    /// Moves the circuit away from a failed link.
    ///
    /// From the primary path try the backup path and vice versa, then a
    /// discovered path for dynamic circuits. When everything fails the
    /// circuit is torn down and left inactive.
    pub async fn handle_link_down(&mut self) -> bool {
        let mut success = false;
        if self.is_using_primary_path() {
            success = self.deploy_to_backup_path().await;
        } else if self.is_using_backup_path() {
            success = self.deploy_to_primary_path().await;
        }
        if !success && self.dynamic_backup_path {
            success = self.deploy_to_path(None).await;
        }

        if success {
            info!(evc = %self, path = %self.current_path, "Circuit redeployed after link down");
            return true;
        }
        self.remove_current_flows().await;
        self.deactivate();
        self.sync().await;
        warn!(evc = %self, "Circuit could not be redeployed after link down");
        false
    }

    fn redeploy_on_link_up(&self, redeployed: bool) -> bool {
        if redeployed {
            info!(evc = %self, path = %self.current_path, "Circuit redeployed after link up");
            self.notify(EvcEventKind::RedeployedLinkUp);
        }
        redeployed
    }

    /// Moves the circuit back onto a better path after `link` came up.
    ///
    /// The first matching case decides:
    /// 1. on the primary path: nothing to do;
    /// 2. intra-switch: nothing to do;
    /// 3. the primary path uses `link`: redeploy to the primary path;
    /// 4. on the backup path: nothing to do;
    /// 5. on a healthy discovered path: nothing to do;
    /// 6. the backup path uses `link`: redeploy to the backup path;
    /// 7. dynamic circuit: redeploy on a discovered path.
    pub async fn handle_link_up(&mut self, link: &Link) -> bool {
        if self.is_using_primary_path() || self.is_intra_switch() {
            return true;
        }
        if self.primary_path.is_affected_by_link(link) {
            let redeployed = self.deploy_to_primary_path().await;
            return self.redeploy_on_link_up(redeployed);
        }
        if self.is_using_backup_path() || self.is_using_dynamic_path() {
            return true;
        }
        if self.backup_path.is_affected_by_link(link) {
            let redeployed = self.deploy_to_backup_path().await;
            return self.redeploy_on_link_up(redeployed);
        }
        if self.dynamic_backup_path {
            let redeployed = self.deploy_to_path(None).await;
            return self.redeploy_on_link_up(redeployed);
        }
        debug!(evc = %self, link = %link, "Link up does not concern circuit");
        false
    }

    /// Activates the circuit when both UNIs are up again.
    ///
    /// Returns true if the active flag changed.
    pub async fn handle_interface_link_up(&mut self, iface: &InterfaceId) -> bool {
        if self.archived || !self.enabled || self.active || !self.is_uni_interface(iface) {
            return false;
        }
        if !self.are_unis_active() {
            return false;
        }
        if !self.is_intra_switch() && self.current_path.is_empty() {
            return false;
        }
        self.activate();
        info!(evc = %self, interface = %iface, "Circuit activated, UNIs are up");
        self.notify(EvcEventKind::UniActiveUpdated);
        self.sync().await;
        true
    }

    /// Deactivates the circuit when one of its UNIs went down.
    ///
    /// Returns true if the active flag changed.
    pub async fn handle_interface_link_down(&mut self, iface: &InterfaceId) -> bool {
        if self.archived || !self.active || !self.is_uni_interface(iface) {
            return false;
        }
        if self.ctx.topology.interface_status(iface) == EntityStatus::Up {
            return false;
        }
        self.deactivate();
        info!(evc = %self, interface = %iface, "Circuit deactivated, UNI is down");
        self.notify(EvcEventKind::UniActiveUpdated);
        self.sync().await;
        true
    }
}
