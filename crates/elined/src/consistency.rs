//! Periodic reconciliation of circuit state against the network.
//!
//! Each sweep loads circuits that appeared in the store, pre-installs missing
//! failover paths, then traces every enabled but inactive circuit in a single
//! bulk request. Confirmed circuits are activated; circuits that keep
//! failing are redeployed from scratch.

use crate::clients::{TraceHop, TraceRequest, TraceService};
use crate::registry::{CircuitEntry, CircuitRegistry};
use crate::trace::{check_traces, trace_requests};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Circuits loaded from the store.
    pub loaded: usize,
    /// Failover paths installed.
    pub failovers: usize,
    /// Circuits traced.
    pub checked: usize,
    /// Circuits activated after a matching trace.
    pub activated: usize,
    /// Circuits redeployed after too many failed traces.
    pub redeployed: usize,
}

/// The consistency loop.
pub struct ConsistencyLoop {
    registry: Arc<CircuitRegistry>,
    traces: Arc<dyn TraceService>,
    trace_timeout: Duration,
    sweep_lock: Mutex<()>,
}

impl std::fmt::Debug for ConsistencyLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyLoop")
            .field("trace_timeout", &self.trace_timeout)
            .finish_non_exhaustive()
    }
}

impl ConsistencyLoop {
    pub fn new(
        registry: Arc<CircuitRegistry>,
        traces: Arc<dyn TraceService>,
        trace_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            traces,
            trace_timeout,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Sweeps every `interval` until `cancel` fires.
    ///
    /// Sweeps run in their own task; a tick arriving while the previous
    /// sweep is still running is dropped by [`sweep`](Self::sweep).
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Consistency loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Some(report) = this.sweep().await {
                            debug!(?report, "Consistency sweep done");
                        }
                    });
                }
            }
        }
        info!("Consistency loop stopped");
    }

    /// Runs one sweep. Returns `None` if another sweep is in progress.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Option<SweepReport> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            debug!("Consistency sweep already running, skipping");
            return None;
        };
        let mut report = SweepReport::default();

        match self.registry.load_all().await {
            Ok(loaded) => report.loaded = loaded,
            Err(e) => warn!(error = %e, "Cannot load circuits from store"),
        }

        let wait = self.registry.ctx().settings.deploy_evcs_interval;
        let mut candidates: Vec<(Arc<CircuitEntry>, usize)> = Vec::new();
        let mut requests: Vec<TraceRequest> = Vec::new();
        for entry in self.registry.by_service_level() {
            {
                let mut evc = entry.lock().await;
                if evc.try_setup_failover_path(wait).await {
                    report.failovers += 1;
                }
            }
            let Ok(evc) = entry.try_lock() else {
                continue;
            };
            if !evc.should_be_checked() {
                continue;
            }
            let circuit_requests = trace_requests(&evc);
            candidates.push((entry.clone(), circuit_requests.len()));
            requests.extend(circuit_requests);
        }

        if candidates.is_empty() {
            return Some(report);
        }
        report.checked = candidates.len();

        let traces = self.run_traces(&requests).await;
        let mut offset = 0;
        for (entry, count) in candidates {
            let circuit_traces = traces
                .as_deref()
                .map(|traces| &traces[offset..offset + count]);
            offset += count;

            let mut evc = entry.lock().await;
            if !evc.should_be_checked() {
                continue;
            }
            if circuit_traces.is_some_and(|traces| check_traces(&evc, traces)) {
                evc.reset_execution_rounds();
                evc.activate();
                evc.sync().await;
                info!(evc = %*evc, "Circuit activated by consistency check");
                report.activated += 1;
                continue;
            }

            let rounds = evc.increment_execution_rounds();
            if rounds > self.registry.ctx().settings.wait_for_old_path {
                warn!(evc = %*evc, rounds, "Circuit not confirmed by traces, redeploying");
                evc.reset_execution_rounds();
                evc.remove_current_flows().await;
                if evc.deploy().await {
                    report.redeployed += 1;
                }
            } else {
                debug!(evc = %*evc, rounds, "Circuit not confirmed by traces");
                evc.sync().await;
            }
        }
        Some(report)
    }

    /// Runs the bulk trace. Any failure, or an answer of the wrong size,
    /// leaves every circuit unconfirmed.
    async fn run_traces(&self, requests: &[TraceRequest]) -> Option<Vec<Vec<TraceHop>>> {
        match self.traces.trace_bulk(requests, self.trace_timeout).await {
            Ok(traces) if traces.len() == requests.len() => Some(traces),
            Ok(traces) => {
                warn!(
                    expected = requests.len(),
                    received = traces.len(),
                    "Trace answer does not match the request"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Bulk trace failed");
                None
            }
        }
    }
}
