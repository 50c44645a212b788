//! Topology, interface and flow event dispatch.
//!
//! Events update the [`TopologyCache`] first and are then routed to the
//! circuits they concern. Interface events are debounced per interface.
//! Link-down events switch circuits with a healthy failover path in one
//! batched flow install; the remaining work is queued as [`DeferredEvent`]s
//! processed by [`EventRouter::run_deferred`].

use crate::clients::FlowManager;
use crate::config::ElineConfig;
use crate::error::FlowModError;
use crate::flows::{flow_count, merge_flows, FlowMod, SwitchFlows, TableGroups};
use crate::notify::EvcEventKind;
use crate::path::Path;
use crate::registry::{CircuitEntry, CircuitRegistry};
use crate::topology::TopologyCache;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eline_types::{EntityStatus, InterfaceId, Link};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// An event published by the topology authority or the flow service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TopologyEvent {
    /// A link became operational.
    LinkUp { link: Link },
    /// A link stopped forwarding.
    LinkDown { link: Link },
    /// An interface came up.
    InterfaceUp {
        interface: InterfaceId,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// An interface went down.
    InterfaceDown {
        interface: InterfaceId,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// A switch removed a flow.
    FlowRemoved { cookie: u64 },
    /// The flow table assignment changed.
    TableGroupsUpdated { groups: BTreeMap<String, u8> },
}

/// Follow-up work queued by event handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredEvent {
    /// Move one circuit away from a failed link.
    LinkDown { evc_id: String, link: Link },
    /// Remove the flows left on the old paths after a failover switch and
    /// compute new failover paths.
    CleanupOldPaths { evc_ids: Vec<String> },
    /// The failover path of a circuit lost a link.
    FailoverLinkDown { evc_id: String },
}

/// Ingress flows of every circuit switched in one link-down pass.
struct FailoverBatch {
    flows: SwitchFlows<FlowMod>,
    circuits: Vec<(Arc<CircuitEntry>, Path)>,
}

struct PendingInterface {
    timestamp: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// Installs `flows` in rounds of at most `batch_size` flows per switch,
/// pausing `interval` between rounds. A `batch_size` of 0 sends everything
/// in one call.
pub async fn install_batched(
    flow_manager: &dyn FlowManager,
    flows: &SwitchFlows<FlowMod>,
    batch_size: usize,
    interval: Duration,
) -> Result<(), FlowModError> {
    if batch_size == 0 {
        return flow_manager.install_flows(flows, true).await;
    }
    let rounds = flows
        .values()
        .map(|switch_flows| switch_flows.len().div_ceil(batch_size))
        .max()
        .unwrap_or(0);
    for round in 0..rounds {
        if round > 0 {
            tokio::time::sleep(interval).await;
        }
        let batch: SwitchFlows<FlowMod> = flows
            .iter()
            .filter_map(|(dpid, switch_flows)| {
                let chunk: Vec<FlowMod> = switch_flows
                    .iter()
                    .skip(round * batch_size)
                    .take(batch_size)
                    .cloned()
                    .collect();
                (!chunk.is_empty()).then_some((*dpid, chunk))
            })
            .collect();
        flow_manager.install_flows(&batch, true).await?;
    }
    Ok(())
}

/// Routes events to circuits.
pub struct EventRouter {
    registry: Arc<CircuitRegistry>,
    topology: Arc<TopologyCache>,
    deferred: mpsc::UnboundedSender<DeferredEvent>,
    pending: DashMap<InterfaceId, PendingInterface>,
    processed: DashMap<InterfaceId, DateTime<Utc>>,
    uni_state_change_delay: Duration,
    batch_size: usize,
    batch_interval: Duration,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("uni_state_change_delay", &self.uni_state_change_delay)
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Creates a router and the receiving end of its deferred queue.
    pub fn new(
        registry: Arc<CircuitRegistry>,
        topology: Arc<TopologyCache>,
        config: &ElineConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DeferredEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Self {
            registry,
            topology,
            deferred: tx,
            pending: DashMap::new(),
            processed: DashMap::new(),
            uni_state_change_delay: config.uni_state_change_delay(),
            batch_size: config.flows.batch_size,
            batch_interval: config.batch_interval(),
        };
        (Arc::new(router), rx)
    }

    fn defer(&self, event: DeferredEvent) {
        if self.deferred.send(event).is_err() {
            warn!("Deferred event queue closed, dropping event");
        }
    }

    /// Applies `event` to the topology cache and dispatches it.
    pub async fn handle(self: &Arc<Self>, event: TopologyEvent) {
        match event {
            TopologyEvent::LinkUp { link } => {
                self.topology.set_link_active(&link, true);
                self.handle_link_up(&link).await;
            }
            TopologyEvent::LinkDown { link } => {
                self.topology.set_link_active(&link, false);
                self.handle_link_down(&link).await;
            }
            TopologyEvent::InterfaceUp {
                interface,
                timestamp,
            } => self.schedule_interface(interface, true, timestamp),
            TopologyEvent::InterfaceDown {
                interface,
                timestamp,
            } => self.schedule_interface(interface, false, timestamp),
            TopologyEvent::FlowRemoved { cookie } => {
                self.registry.set_flow_removed(cookie, Utc::now()).await;
            }
            TopologyEvent::TableGroupsUpdated { groups } => {
                let groups = TableGroups::from_map(&groups);
                info!(epl = groups.epl, evpl = groups.evpl, "Table groups updated");
                self.registry.ctx().settings.set_table_groups(groups);
            }
        }
    }

    /// Lets every enabled circuit react to `link` coming up.
    #[instrument(skip(self, link), fields(link = %link))]
    pub async fn handle_link_up(&self, link: &Link) {
        let entries = self.registry.entries();
        join_all(entries.iter().map(|entry| async move {
            let mut evc = entry.lock().await;
            if evc.is_enabled() && !evc.is_archived() {
                evc.handle_link_up(link).await;
            }
        }))
        .await;
    }

    /// Moves circuits away from `link`.
    ///
    /// Circuits with a healthy failover path get its ingress flows in one
    /// batched install and switch over right away. Every other affected
    /// circuit is queued for an individual redeploy.
    #[instrument(skip(self, link), fields(link = %link))]
    pub async fn handle_link_down(&self, link: &Link) {
        let now = Utc::now();
        let topology = self.registry.ctx().topology.clone();
        let mut batch = FailoverBatch {
            flows: SwitchFlows::new(),
            circuits: Vec::new(),
        };

        for entry in self.registry.entries() {
            let mut evc = entry.lock().await;
            if evc.is_archived() {
                continue;
            }
            if evc.is_affected_by_link(link) {
                evc.set_affected_by_link_at(now);
                let failover_usable = !evc.failover_path().is_empty()
                    && !evc.is_failover_path_affected_by_link(link)
                    && evc.failover_path().status(topology.as_ref()) == EntityStatus::Up;
                if !failover_usable {
                    self.defer(DeferredEvent::LinkDown {
                        evc_id: evc.id().to_string(),
                        link: link.clone(),
                    });
                    continue;
                }
                match evc.failover_ingress_flows() {
                    Ok(flows) => {
                        merge_flows(&mut batch.flows, flows);
                        batch
                            .circuits
                            .push((entry.clone(), evc.failover_path().clone()));
                    }
                    Err(e) => {
                        warn!(evc = %*evc, error = %e, "Cannot build failover flows");
                        self.defer(DeferredEvent::LinkDown {
                            evc_id: evc.id().to_string(),
                            link: link.clone(),
                        });
                    }
                }
            } else if evc.is_failover_path_affected_by_link(link) {
                self.defer(DeferredEvent::FailoverLinkDown {
                    evc_id: evc.id().to_string(),
                });
            }
        }

        if !batch.circuits.is_empty() {
            self.switch_to_failover(link, batch).await;
        }
    }

    async fn switch_to_failover(&self, link: &Link, batch: FailoverBatch) {
        let ctx = self.registry.ctx();
        let installed = install_batched(
            ctx.flow_manager.as_ref(),
            &batch.flows,
            self.batch_size,
            self.batch_interval,
        )
        .await;
        if let Err(e) = installed {
            error!(error = %e, circuits = batch.circuits.len(), "Failover install failed");
            for (entry, _) in &batch.circuits {
                self.defer(DeferredEvent::LinkDown {
                    evc_id: entry.id().to_string(),
                    link: link.clone(),
                });
            }
            return;
        }
        info!(
            circuits = batch.circuits.len(),
            flows = flow_count(&batch.flows),
            "Failover ingress flows installed"
        );

        let mut switched = Vec::with_capacity(batch.circuits.len());
        let mut docs = Vec::with_capacity(batch.circuits.len());
        for (entry, failover) in batch.circuits {
            let mut evc = entry.lock().await;
            if evc.failover_path() != &failover || !evc.is_affected_by_link(link) {
                debug!(evc = %*evc, "Circuit changed during failover, redeploying instead");
                self.defer(DeferredEvent::LinkDown {
                    evc_id: evc.id().to_string(),
                    link: link.clone(),
                });
                continue;
            }
            evc.activate_failover();
            info!(evc = %*evc, path = %evc.current_path(), "Circuit switched to failover path");
            evc.notify(EvcEventKind::RedeployedLinkDown);
            docs.push(evc.as_document());
            switched.push(evc.id().to_string());
        }

        if let Err(e) = ctx.store.update_evcs(&docs).await {
            error!(error = %e, circuits = docs.len(), "Failed to persist failover switch");
        }
        if !switched.is_empty() {
            self.defer(DeferredEvent::CleanupOldPaths { evc_ids: switched });
        }
    }

    fn is_stale(&self, interface: &InterfaceId, timestamp: DateTime<Utc>) -> bool {
        self.processed
            .get(interface)
            .is_some_and(|last| *last > timestamp)
            || self
                .pending
                .get(interface)
                .is_some_and(|pending| pending.timestamp > timestamp)
    }

    /// Records an interface status change and queues its processing,
    /// replacing any pending change of the same interface. Changes older
    /// than the last one seen are dropped.
    fn schedule_interface(
        self: &Arc<Self>,
        interface: InterfaceId,
        up: bool,
        timestamp: DateTime<Utc>,
    ) {
        if self.is_stale(&interface, timestamp) {
            debug!(interface = %interface, "Dropping out-of-order interface event");
            return;
        }
        self.topology.set_interface_active(&interface, up);

        let router = self.clone();
        let delay = self.uni_state_change_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            router
                .pending
                .remove_if(&interface, |_, pending| pending.timestamp == timestamp);
            router.processed.insert(interface, timestamp);
            router.handle_interface(&interface, up).await;
        });
        if let Some(previous) = self
            .pending
            .insert(interface, PendingInterface { timestamp, task })
        {
            previous.task.abort();
        }
    }

    /// Lets the circuits using `interface` as UNI react to its status.
    pub async fn handle_interface(&self, interface: &InterfaceId, up: bool) {
        let entries = self.registry.entries();
        let changed: usize = join_all(entries.iter().map(|entry| async move {
            let mut evc = entry.lock().await;
            if !evc.is_uni_interface(interface) {
                return 0;
            }
            let changed = if up {
                evc.handle_interface_link_up(interface).await
            } else {
                evc.handle_interface_link_down(interface).await
            };
            usize::from(changed)
        }))
        .await
        .into_iter()
        .sum();
        debug!(interface = %interface, up, changed, "Interface event handled");
    }

    /// Processes one deferred event.
    pub async fn process_deferred(&self, event: DeferredEvent) {
        match event {
            DeferredEvent::LinkDown { evc_id, link } => {
                let Some(entry) = self.registry.get(&evc_id) else {
                    return;
                };
                let mut evc = entry.lock().await;
                if evc.is_archived() || !evc.is_affected_by_link(&link) {
                    return;
                }
                if evc.handle_link_down().await {
                    evc.notify(EvcEventKind::RedeployedLinkDown);
                } else {
                    evc.notify(EvcEventKind::ErrorRedeployLinkDown);
                }
            }
            DeferredEvent::CleanupOldPaths { evc_ids } => {
                let ids: BTreeSet<String> = evc_ids.into_iter().collect();
                for id in ids {
                    let Some(entry) = self.registry.get(&id) else {
                        continue;
                    };
                    let mut evc = entry.lock().await;
                    if !evc.remove_old_path_flows().await {
                        warn!(evc = %*evc, "Old path flows left behind");
                    }
                    evc.sync().await;
                    evc.setup_failover_path().await;
                }
            }
            DeferredEvent::FailoverLinkDown { evc_id } => {
                let Some(entry) = self.registry.get(&evc_id) else {
                    return;
                };
                let mut evc = entry.lock().await;
                if evc.remove_failover_flows(true).await {
                    evc.setup_failover_path().await;
                }
            }
        }
    }

    /// Processes deferred events until `cancel` fires or the queue closes.
    pub async fn run_deferred(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<DeferredEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.process_deferred(event).await,
                    None => break,
                },
            }
        }
        debug!("Deferred event worker stopped");
    }
}
