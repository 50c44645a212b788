//! Shared fixtures for the elined integration tests.
//!
//! The network is a four-switch ring:
//!
//! ```text
//!          2:1 [s2] 2:2
//!         /            \
//! 1:1 [s1] 1:2        4:2 [s4] 4:1
//!     1:3 \            / 4:3
//!          3:1 [s3] 3:2
//! ```
//!
//! The primary path of the test circuit goes over s2, the backup over s3.

#![allow(dead_code)]

use async_trait::async_trait;
use eline_types::{Dpid, InterfaceId, Link, Uni, UniTag};
use elined::clients::{
    CircuitStore, FlowManager, MemoryCircuitStore, PathCandidate, PathFinder, PathRequest,
    TraceHop, TraceRequest, TraceService,
};
use elined::error::{ClientError, FlowCommand, FlowModError};
use elined::flows::{FlowDeletion, FlowMod, SwitchFlows};
use elined::{
    CircuitRegistry, ConsistencyLoop, DeferredEvent, DynamicPathManager, ElineConfig, EventRouter,
    EvcContext, EvcDocument, EvcSettings, Notifier, Path, TopologyCache,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn port(dpid: u64, port: u32) -> InterfaceId {
    InterfaceId::new(Dpid::new(dpid), port)
}

pub fn link(a: (u64, u32), b: (u64, u32)) -> Link {
    Link::new(port(a.0, a.1), port(b.0, b.1))
}

pub fn tagged(dpid: u64, number: u32, vlan: u16) -> Uni {
    Uni::new(port(dpid, number), Some(UniTag::Vlan(vlan)))
}

/// Flow service that records every call.
#[derive(Debug, Default)]
pub struct FakeFlowService {
    installed: Mutex<Vec<SwitchFlows<FlowMod>>>,
    deleted: Mutex<Vec<SwitchFlows<FlowDeletion>>>,
    down: Mutex<bool>,
}

impl FakeFlowService {
    pub fn installed(&self) -> Vec<SwitchFlows<FlowMod>> {
        self.installed.lock().clone()
    }

    pub fn deleted(&self) -> Vec<SwitchFlows<FlowDeletion>> {
        self.deleted.lock().clone()
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock() = down;
    }
}

#[async_trait]
impl FlowManager for FakeFlowService {
    async fn install_flows(
        &self,
        flows: &SwitchFlows<FlowMod>,
        _force: bool,
    ) -> Result<(), FlowModError> {
        if *self.down.lock() {
            return Err(FlowModError::Rejected {
                command: FlowCommand::Install,
                status: 503,
                body: "flow service unavailable".to_string(),
            });
        }
        self.installed.lock().push(flows.clone());
        Ok(())
    }

    async fn delete_flows(
        &self,
        flows: &SwitchFlows<FlowDeletion>,
        _force: bool,
    ) -> Result<(), FlowModError> {
        self.deleted.lock().push(flows.clone());
        Ok(())
    }
}

/// Path computation answering from a fixed candidate list.
#[derive(Debug, Default)]
pub struct FakePathService {
    candidates: Mutex<Vec<PathCandidate>>,
}

impl FakePathService {
    pub fn answer(&self, hop_lists: Vec<Vec<String>>) {
        *self.candidates.lock() = hop_lists
            .into_iter()
            .enumerate()
            .map(|(rank, hops)| PathCandidate {
                hops,
                cost: (rank + 1) as f64,
            })
            .collect();
    }
}

#[async_trait]
impl PathFinder for FakePathService {
    async fn find_paths(&self, _request: &PathRequest) -> Result<Vec<PathCandidate>, ClientError> {
        Ok(self.candidates.lock().clone())
    }
}

/// Trace service replaying queued answers, answering nothing once drained.
#[derive(Debug, Default)]
pub struct FakeTraceService {
    answers: Mutex<VecDeque<Vec<Vec<TraceHop>>>>,
    batches: Mutex<Vec<Vec<TraceRequest>>>,
}

impl FakeTraceService {
    pub fn queue(&self, answer: Vec<Vec<TraceHop>>) {
        self.answers.lock().push_back(answer);
    }

    pub fn batches(&self) -> Vec<Vec<TraceRequest>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl TraceService for FakeTraceService {
    async fn trace_bulk(
        &self,
        requests: &[TraceRequest],
        _timeout: Duration,
    ) -> Result<Vec<Vec<TraceHop>>, ClientError> {
        self.batches.lock().push(requests.to_vec());
        Ok(self.answers.lock().pop_front().unwrap_or_default())
    }
}

/// The ring network with fake collaborators around a registry.
pub struct Network {
    pub config: ElineConfig,
    pub topology: Arc<TopologyCache>,
    pub flows: Arc<FakeFlowService>,
    pub paths: Arc<FakePathService>,
    pub traces: Arc<FakeTraceService>,
    pub store: Arc<MemoryCircuitStore>,
    pub notifier: Notifier,
    pub registry: Arc<CircuitRegistry>,
}

impl Network {
    pub fn new() -> Self {
        Self::with_config(ElineConfig::default())
    }

    pub fn with_config(config: ElineConfig) -> Self {
        let topology = Arc::new(TopologyCache::new());
        for (dpid, number) in [(1, 1), (4, 1)] {
            topology.upsert_interface(port(dpid, number), true, true);
        }
        for ring_link in [
            link((1, 2), (2, 1)),
            link((2, 2), (4, 2)),
            link((1, 3), (3, 1)),
            link((3, 2), (4, 3)),
        ] {
            topology.upsert_link(ring_link, true, true);
        }

        let flows = Arc::new(FakeFlowService::default());
        let paths = Arc::new(FakePathService::default());
        let traces = Arc::new(FakeTraceService::default());
        let store = Arc::new(MemoryCircuitStore::new());
        let notifier = Notifier::new(128);
        let ctx = EvcContext {
            topology: topology.clone(),
            tags: topology.clone(),
            flow_manager: flows.clone(),
            paths: DynamicPathManager::new(
                paths.clone(),
                topology.clone(),
                config.paths.dynamic_max_paths,
                config.paths.disjoint_path_cutoff,
            ),
            store: store.clone() as Arc<dyn CircuitStore>,
            notifier: notifier.clone(),
            settings: Arc::new(EvcSettings::from_config(&config)),
        };

        Self {
            config,
            topology,
            flows,
            paths,
            traces,
            store,
            notifier,
            registry: Arc::new(CircuitRegistry::new(ctx)),
        }
    }

    pub fn router(&self) -> (Arc<EventRouter>, UnboundedReceiver<DeferredEvent>) {
        EventRouter::new(self.registry.clone(), self.topology.clone(), &self.config)
    }

    pub fn sweeper(&self) -> ConsistencyLoop {
        ConsistencyLoop::new(
            self.registry.clone(),
            self.traces.clone(),
            self.config.trace_timeout(),
        )
    }

    pub fn over_s2(&self) -> Path {
        Path::new(vec![link((1, 2), (2, 1)), link((2, 2), (4, 2))])
    }

    pub fn over_s3(&self) -> Path {
        Path::new(vec![link((1, 3), (3, 1)), link((3, 2), (4, 3))])
    }

    /// Hop list of the s2 path as returned by path computation.
    pub fn hops_over_s2(&self) -> Vec<String> {
        hop_list(&[(1, 1), (1, 2), (2, 1), (2, 2), (4, 2), (4, 1)])
    }

    pub fn hops_over_s3(&self) -> Vec<String> {
        hop_list(&[(1, 1), (1, 3), (3, 1), (3, 2), (4, 3), (4, 1)])
    }

    /// A circuit between 1:1 and 4:1 tagged `vlan` on both sides, with
    /// explicit primary and backup paths.
    pub fn protected_circuit(&self, vlan: u16) -> EvcDocument {
        EvcDocument {
            name: format!("protected-{vlan}"),
            uni_a: Some(tagged(1, 1, vlan)),
            uni_z: Some(tagged(4, 1, vlan)),
            primary_path: self.over_s2(),
            backup_path: self.over_s3(),
            ..Default::default()
        }
    }

    /// A circuit relying on path computation only.
    pub fn dynamic_circuit(&self, vlan: u16) -> EvcDocument {
        EvcDocument {
            name: format!("dynamic-{vlan}"),
            uni_a: Some(tagged(1, 1, vlan)),
            uni_z: Some(tagged(4, 1, vlan)),
            dynamic_backup_path: true,
            ..Default::default()
        }
    }

    /// Runs every queued deferred event.
    pub async fn drain(router: &EventRouter, rx: &mut UnboundedReceiver<DeferredEvent>) {
        while let Ok(event) = rx.try_recv() {
            router.process_deferred(event).await;
        }
    }
}

fn hop_list(interfaces: &[(u64, u32)]) -> Vec<String> {
    let mut hops = Vec::new();
    for pair in interfaces.chunks(2) {
        let (ingress, egress) = (port(pair[0].0, pair[0].1), port(pair[1].0, pair[1].1));
        hops.push(ingress.to_string());
        hops.push(ingress.dpid().to_string());
        hops.push(egress.to_string());
    }
    hops
}
