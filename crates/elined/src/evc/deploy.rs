//! Flow installation and removal.

use super::Evc;
use crate::error::InvalidPath;
use crate::flows::{deletions, flow_count, FlowMod, SwitchFlows};
use crate::notify::EvcEventKind;
use crate::path::Path;
use eline_types::EntityStatus;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

impl Evc {
    /// Flows realising the circuit over `path`.
    pub fn path_flows(
        &self,
        path: &Path,
        skip_in: bool,
        skip_out: bool,
    ) -> Result<SwitchFlows<FlowMod>, InvalidPath> {
        let settings = self.ctx.settings.flow_settings();
        self.synthesizer(&settings).path_flows(path, skip_in, skip_out)
    }

    /// Flows of the circuit when both UNIs sit on one switch.
    pub fn direct_flows(&self) -> SwitchFlows<FlowMod> {
        let settings = self.ctx.settings.flow_settings();
        self.synthesizer(&settings).direct_flows()
    }

    /// Ingress UNI flows of the failover path. Installing them is what
    /// switches traffic over to the pre-installed failover path.
    pub fn failover_ingress_flows(&self) -> Result<SwitchFlows<FlowMod>, InvalidPath> {
        let settings = self.ctx.settings.flow_settings();
        self.synthesizer(&settings)
            .uni_flows(&self.failover_path, false, true)
    }

    /// Deletes the flows of `flows`; returns false on failure.
    async fn delete(&self, flows: &SwitchFlows<FlowMod>) -> bool {
        match self
            .ctx
            .flow_manager
            .delete_flows(&deletions(flows), true)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(evc = %self, error = %e, "Error removing flows");
                false
            }
        }
    }

    /// Removes the flows of the installed path and releases its VLANs.
    ///
    /// The circuit ends up inactive with an empty current path even if the
    /// flow service refused the removal.
    #[instrument(skip(self), fields(evc = %self.id))]
    pub async fn remove_current_flows(&mut self) {
        let intra_switch = self.is_intra_switch();
        if self.current_path.is_empty() && !intra_switch {
            return;
        }

        let flows = if intra_switch && self.current_path.is_empty() {
            Ok(self.direct_flows())
        } else {
            self.path_flows(&self.current_path, false, false)
        };
        match flows {
            Ok(flows) => {
                if self.delete(&flows).await {
                    info!(evc = %self, "Current flows removed");
                }
            }
            Err(e) => warn!(evc = %self, error = %e, "Cannot rebuild current flows for removal"),
        }

        let mut path = std::mem::take(&mut self.current_path);
        path.make_vlans_available(self.ctx.tags.as_ref());
        self.deactivate();
        self.sync().await;
    }

    /// Removes the NNI and UNI flows of `path` by match and releases its
    /// VLANs. `skip_in` leaves the ingress flows alone.
    ///
    /// Returns false if the flow service failed; the VLANs stay reserved in
    /// that case.
    pub async fn remove_path_flows(&self, path: &mut Path, skip_in: bool) -> bool {
        if path.is_empty() {
            return true;
        }
        match self.path_flows(path, skip_in, false) {
            Ok(flows) => {
                if !self.delete(&flows).await {
                    return false;
                }
            }
            Err(e) => debug!(evc = %self, error = %e, "Path has no flows to remove"),
        }
        path.make_vlans_available(self.ctx.tags.as_ref());
        true
    }

    /// Tears down the failover path. On failure the failover path is kept.
    pub async fn remove_failover_flows(&mut self, sync: bool) -> bool {
        if self.failover_path.is_empty() {
            return true;
        }
        let mut path = std::mem::take(&mut self.failover_path);
        if !self.remove_path_flows(&mut path, true).await {
            self.failover_path = path;
            return false;
        }
        if sync {
            self.sync().await;
        }
        true
    }

    fn should_deploy(&self, path: &Path) -> bool {
        !path.is_empty() && self.enabled && !self.active
    }

    /// Candidate paths from path computation, best first.
    pub async fn discover_new_paths(&self) -> Vec<Path> {
        self.ctx
            .paths
            .get_best_paths(&self.uni_a, &self.uni_z, &self.primary_constraints)
            .await
    }

    /// Installs the circuit on `candidate`, or on a discovered path when no
    /// usable candidate is given.
    ///
    /// Installed flows are removed first. Intra-switch circuits fall back to
    /// direct flows. Returns false if nothing could be installed.
    #[instrument(skip(self, candidate), fields(evc = %self.id))]
    pub async fn deploy_to_path(&mut self, candidate: Option<Path>) -> bool {
        self.remove_current_flows().await;
        let tags = self.ctx.tags.clone();
        let no_avoid = HashMap::new();

        let mut chosen: Option<Path> = None;
        match candidate {
            Some(mut path) if self.should_deploy(&path) => {
                match path.choose_vlans(tags.as_ref(), &no_avoid) {
                    Ok(()) => chosen = Some(path),
                    Err(e) => warn!(evc = %self, error = %e, "No tag available on requested path"),
                }
            }
            _ => {
                for mut path in self.discover_new_paths().await {
                    if path.is_empty() {
                        continue;
                    }
                    match path.choose_vlans(tags.as_ref(), &no_avoid) {
                        Ok(()) => {
                            chosen = Some(path);
                            break;
                        }
                        Err(e) => debug!(evc = %self, path = %path, error = %e, "Skipping path"),
                    }
                }
            }
        }

        let (mut path, flows) = match chosen {
            Some(path) => match self.path_flows(&path, false, false) {
                Ok(flows) => (path, flows),
                Err(e) => {
                    error!(evc = %self, error = %e, "Cannot build flows");
                    let mut path = path;
                    path.make_vlans_available(tags.as_ref());
                    return false;
                }
            },
            None if self.is_intra_switch() => (Path::default(), self.direct_flows()),
            None => {
                warn!(evc = %self, "{} was not deployed. No available path was found.", self);
                return false;
            }
        };

        if let Err(e) = self.ctx.flow_manager.install_flows(&flows, true).await {
            error!(evc = %self, path = %path, error = %e, "Error deploying circuit");
            self.delete(&flows).await;
            path.make_vlans_available(tags.as_ref());
            return false;
        }

        info!(evc = %self, path = %path, flows = flow_count(&flows), "Circuit deployed");
        self.activate();
        self.current_path = path;
        self.sync().await;
        true
    }

    /// Deploys on the primary path when it is up.
    pub async fn deploy_to_primary_path(&mut self) -> bool {
        if self.is_using_primary_path() {
            return true;
        }
        if self.primary_path.status(self.ctx.topology.as_ref()) == EntityStatus::Up {
            return self.deploy_to_path(Some(self.primary_path.clone())).await;
        }
        false
    }

    /// Deploys on the backup path when it is up, else on a discovered path
    /// for dynamic or intra-switch circuits.
    pub async fn deploy_to_backup_path(&mut self) -> bool {
        if self.is_using_backup_path() {
            return true;
        }
        if self.backup_path.status(self.ctx.topology.as_ref()) == EntityStatus::Up
            && self.deploy_to_path(Some(self.backup_path.clone())).await
        {
            return true;
        }
        if self.dynamic_backup_path || self.is_intra_switch() {
            return self.deploy_to_path(None).await;
        }
        false
    }

    /// Enables the circuit and installs it on the best available path.
    pub async fn deploy(&mut self) -> bool {
        if self.archived {
            return false;
        }
        self.enable();
        let success =
            self.deploy_to_primary_path().await || self.deploy_to_backup_path().await;
        if success {
            self.notify(EvcEventKind::Deployed);
        } else {
            self.sync().await;
        }
        success
    }

    /// Removes every flow of the circuit and disables it.
    pub async fn remove(&mut self) {
        self.remove_current_flows().await;
        self.remove_failover_flows(false).await;
        self.disable();
        self.deactivate();
        self.sync().await;
        info!(evc = %self, "Circuit removed");
        self.notify(EvcEventKind::Undeployed);
    }

    /// Computes and pre-installs a failover path disjoint from the current one.
    ///
    /// Only the egress half of the UNI flows is installed so the failover
    /// path carries no traffic until its ingress flows are added. Returns
    /// false, with an empty failover path, when nothing was installed.
    #[instrument(skip(self), fields(evc = %self.id))]
    pub async fn setup_failover_path(&mut self) -> bool {
        if self.is_intra_switch() || !self.is_eligible_for_failover_path() {
            return false;
        }
        if !self.remove_failover_flows(false).await {
            warn!(evc = %self, "Failed to remove previous failover flows");
            let mut stale = std::mem::take(&mut self.failover_path);
            stale.make_vlans_available(self.ctx.tags.as_ref());
            self.sync().await;
            return false;
        }

        let tags = self.ctx.tags.clone();
        let avoid = self.current_path.s_vlans();
        let candidates = self
            .ctx
            .paths
            .get_disjoint_paths(
                &self.uni_a,
                &self.uni_z,
                &self.secondary_constraints,
                &self.current_path,
            )
            .await;

        let mut chosen = None;
        for mut path in candidates {
            if path.is_empty() {
                continue;
            }
            match path.choose_vlans(tags.as_ref(), &avoid) {
                Ok(()) => {
                    chosen = Some(path);
                    break;
                }
                Err(e) => debug!(evc = %self, error = %e, "Skipping failover candidate"),
            }
        }
        let Some(mut path) = chosen else {
            debug!(evc = %self, "No failover path available");
            self.sync().await;
            return false;
        };

        let installed = match self.path_flows(&path, true, false) {
            Ok(flows) => match self.ctx.flow_manager.install_flows(&flows, true).await {
                Ok(()) => true,
                Err(e) => {
                    error!(evc = %self, error = %e, "Error installing failover flows");
                    false
                }
            },
            Err(e) => {
                error!(evc = %self, error = %e, "Cannot build failover flows");
                false
            }
        };
        if !installed {
            if !self.remove_path_flows(&mut path, true).await {
                warn!(evc = %self, path = %path, "Failover flows left behind");
            }
            self.failover_path = Path::default();
            self.sync().await;
            return false;
        }

        info!(evc = %self, path = %path, "Failover path installed");
        self.failover_path = path;
        self.sync().await;
        self.notify(EvcEventKind::FailoverDeployed);
        true
    }

    /// Sets up a failover path unless one exists, the circuit is not
    /// deployed, or a link of it went down less than `wait` ago.
    pub async fn try_setup_failover_path(&mut self, wait: Duration) -> bool {
        if !self.failover_path.is_empty()
            || self.current_path.is_empty()
            || !self.active
            || self.is_recently_affected_by_link(wait)
        {
            return false;
        }
        self.setup_failover_path().await
    }

    /// Promotes the failover path to current path, remembering the previous
    /// one as the old path to clean up.
    pub fn activate_failover(&mut self) {
        self.old_path = std::mem::replace(
            &mut self.current_path,
            std::mem::take(&mut self.failover_path),
        );
        self.activate();
    }

    /// Removes the flows left on the old path after a failover, keeping
    /// the ingress flows that now belong to the current path.
    pub async fn remove_old_path_flows(&mut self) -> bool {
        let mut path = std::mem::take(&mut self.old_path);
        if !self.remove_path_flows(&mut path, true).await {
            self.old_path = path;
            return false;
        }
        true
    }
}
