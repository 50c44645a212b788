//! Fakes and fixtures shared by unit tests.
//!
//! The fixture network has three switches:
//!
//! ```text
//!  1:1 [s1] 1:2 ---- 2:2 [s2] 2:3 ---- 3:2 [s3] 3:1
//!       1:4 1:3 ------------------------ 3:3
//! ```
//!
//! The primary path goes through s2, the backup path is the direct s1-s3 link.

use crate::clients::{
    CircuitStore, FlowManager, MemoryCircuitStore, PathCandidate, PathFinder, PathRequest,
    TraceHop, TraceRequest, TraceService,
};
use crate::config::ElineConfig;
use crate::context::{EvcContext, EvcSettings};
use crate::dynamic_path::DynamicPathManager;
use crate::error::{ClientError, FlowCommand, FlowModError};
use crate::evc::{Evc, EvcDocument};
use crate::flows::{FlowDeletion, FlowMod, SwitchFlows};
use crate::notify::Notifier;
use crate::path::Path;
use crate::topology::TopologyCache;
use async_trait::async_trait;
use eline_types::{Dpid, InterfaceId, Link, Uni, UniTag};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn iface(dpid: u64, port: u32) -> InterfaceId {
    InterfaceId::new(Dpid::new(dpid), port)
}

pub(crate) fn link(a: (u64, u32), b: (u64, u32)) -> Link {
    Link::new(iface(a.0, a.1), iface(b.0, b.1))
}

pub(crate) fn uni_vlan(dpid: u64, port: u32, vlan: u16) -> Uni {
    Uni::new(iface(dpid, port), Some(UniTag::Vlan(vlan)))
}

/// Records flow-service calls; installs and deletes can be made to fail.
#[derive(Debug, Default)]
pub(crate) struct RecordingFlowManager {
    installs: Mutex<Vec<SwitchFlows<FlowMod>>>,
    deletes: Mutex<Vec<SwitchFlows<FlowDeletion>>>,
    fail_installs: AtomicBool,
    fail_deletes: AtomicBool,
}

impl RecordingFlowManager {
    pub(crate) fn installs(&self) -> Vec<SwitchFlows<FlowMod>> {
        self.installs.lock().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<SwitchFlows<FlowDeletion>> {
        self.deletes.lock().clone()
    }

    pub(crate) fn fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FlowManager for RecordingFlowManager {
    async fn install_flows(
        &self,
        flows: &SwitchFlows<FlowMod>,
        _force: bool,
    ) -> Result<(), FlowModError> {
        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(FlowModError::Rejected {
                command: FlowCommand::Install,
                status: 500,
                body: "switch unreachable".to_string(),
            });
        }
        self.installs.lock().push(flows.clone());
        Ok(())
    }

    async fn delete_flows(
        &self,
        flows: &SwitchFlows<FlowDeletion>,
        _force: bool,
    ) -> Result<(), FlowModError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(FlowModError::Rejected {
                command: FlowCommand::Delete,
                status: 500,
                body: "switch unreachable".to_string(),
            });
        }
        self.deletes.lock().push(flows.clone());
        Ok(())
    }
}

/// Returns the same candidates for every request.
#[derive(Debug, Default)]
pub(crate) struct StaticPathFinder {
    paths: Mutex<Vec<PathCandidate>>,
}

impl StaticPathFinder {
    pub(crate) fn set_paths(&self, hops: Vec<Vec<String>>) {
        *self.paths.lock() = hops
            .into_iter()
            .enumerate()
            .map(|(index, hops)| PathCandidate {
                hops,
                cost: index as f64 + 1.0,
            })
            .collect();
    }
}

#[async_trait]
impl PathFinder for StaticPathFinder {
    async fn find_paths(&self, _request: &PathRequest) -> Result<Vec<PathCandidate>, ClientError> {
        Ok(self.paths.lock().clone())
    }
}

/// Answers trace batches from a queue; an empty queue answers nothing.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTraceService {
    responses: Mutex<VecDeque<Result<Vec<Vec<TraceHop>>, ClientError>>>,
    requests: Mutex<Vec<Vec<TraceRequest>>>,
}

impl ScriptedTraceService {
    pub(crate) fn push_response(&self, response: Result<Vec<Vec<TraceHop>>, ClientError>) {
        self.responses.lock().push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<Vec<TraceRequest>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TraceService for ScriptedTraceService {
    async fn trace_bulk(
        &self,
        requests: &[TraceRequest],
        _timeout: Duration,
    ) -> Result<Vec<Vec<TraceHop>>, ClientError> {
        self.requests.lock().push(requests.to_vec());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// The fixture network plus fake collaborators.
pub(crate) struct Harness {
    pub(crate) topology: Arc<TopologyCache>,
    pub(crate) flows: Arc<RecordingFlowManager>,
    pub(crate) finder: Arc<StaticPathFinder>,
    pub(crate) traces: Arc<ScriptedTraceService>,
    pub(crate) store: Arc<MemoryCircuitStore>,
    pub(crate) notifier: Notifier,
    pub(crate) settings: Arc<EvcSettings>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(&ElineConfig::default())
    }

    pub(crate) fn with_config(config: &ElineConfig) -> Self {
        let topology = Arc::new(TopologyCache::new());
        for (dpid, port) in [(1, 1), (1, 4), (3, 1)] {
            topology.upsert_interface(iface(dpid, port), true, true);
        }
        for link in [link((1, 2), (2, 2)), link((2, 3), (3, 2)), link((1, 3), (3, 3))] {
            topology.upsert_link(link, true, true);
        }
        Self {
            topology,
            flows: Arc::new(RecordingFlowManager::default()),
            finder: Arc::new(StaticPathFinder::default()),
            traces: Arc::new(ScriptedTraceService::default()),
            store: Arc::new(MemoryCircuitStore::new()),
            notifier: Notifier::new(64),
            settings: Arc::new(EvcSettings::from_config(config)),
        }
    }

    pub(crate) fn ctx(&self) -> EvcContext {
        EvcContext {
            topology: self.topology.clone(),
            tags: self.topology.clone(),
            flow_manager: self.flows.clone(),
            paths: DynamicPathManager::new(self.finder.clone(), self.topology.clone(), 2, 3),
            store: self.store.clone() as Arc<dyn CircuitStore>,
            notifier: self.notifier.clone(),
            settings: self.settings.clone(),
        }
    }

    pub(crate) fn primary(&self) -> Path {
        Path::new(vec![link((1, 2), (2, 2)), link((2, 3), (3, 2))])
    }

    pub(crate) fn backup(&self) -> Path {
        Path::new(vec![link((1, 3), (3, 3))])
    }

    pub(crate) fn primary_hops(&self) -> Vec<String> {
        hops(&[(1, 1), (1, 2), (2, 2), (2, 3), (3, 2), (3, 1)])
    }

    pub(crate) fn backup_hops(&self) -> Vec<String> {
        hops(&[(1, 1), (1, 3), (3, 3), (3, 1)])
    }

    pub(crate) fn evc(&self, doc: EvcDocument) -> Evc {
        Evc::from_request(self.ctx(), doc).expect("valid circuit")
    }

    /// A circuit between 1:1 and 3:1, both tagged 100.
    pub(crate) fn evc_with_paths(&self, primary: bool, backup: bool) -> Evc {
        self.evc(EvcDocument {
            name: "evc".to_string(),
            uni_a: Some(uni_vlan(1, 1, 100)),
            uni_z: Some(uni_vlan(3, 1, 100)),
            primary_path: if primary { self.primary() } else { Path::default() },
            backup_path: if backup { self.backup() } else { Path::default() },
            dynamic_backup_path: !primary,
            ..Default::default()
        })
    }
}

/// Hop list as returned by path computation, with the switch id between the
/// two interfaces of each traversed switch.
fn hops(interfaces: &[(u64, u32)]) -> Vec<String> {
    let mut hops = Vec::new();
    for (index, (dpid, port)) in interfaces.iter().enumerate() {
        let id = iface(*dpid, *port);
        if index % 2 == 1 {
            hops.push(id.dpid().to_string());
        }
        hops.push(id.to_string());
    }
    hops
}
