//! Circuit lifecycle notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvcEventKind {
    /// Circuit created.
    Created,
    /// Circuit deployed.
    Deployed,
    /// Circuit flows removed.
    Undeployed,
    /// Circuit deleted.
    Deleted,
    /// Circuit redeployed after a link came up.
    RedeployedLinkUp,
    /// Circuit moved away from a failed link.
    RedeployedLinkDown,
    /// Circuit could not move away from a failed link.
    ErrorRedeployLinkDown,
    /// Circuit active flag changed after a UNI status change.
    UniActiveUpdated,
    /// Failover path installed.
    FailoverDeployed,
}

impl fmt::Display for EvcEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvcEventKind::Created => "created",
            EvcEventKind::Deployed => "deployed",
            EvcEventKind::Undeployed => "undeployed",
            EvcEventKind::Deleted => "deleted",
            EvcEventKind::RedeployedLinkUp => "redeployed_link_up",
            EvcEventKind::RedeployedLinkDown => "redeployed_link_down",
            EvcEventKind::ErrorRedeployLinkDown => "error_redeploy_link_down",
            EvcEventKind::UniActiveUpdated => "uni_active_updated",
            EvcEventKind::FailoverDeployed => "failover_deployed",
        };
        f.write_str(s)
    }
}

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvcEvent {
    /// Event kind.
    pub kind: EvcEventKind,
    /// Circuit id.
    pub evc_id: String,
    /// Circuit name.
    pub name: String,
    /// Active flag at emission time.
    pub active: bool,
    /// Enabled flag at emission time.
    pub enabled: bool,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of lifecycle notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<EvcEvent>,
}

impl Notifier {
    /// Creates a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to notifications emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EvcEvent> {
        self.tx.subscribe()
    }

    /// Emits a notification; having no subscriber is fine.
    pub fn emit(&self, event: EvcEvent) {
        debug!(kind = %event.kind, evc = %event.evc_id, "Circuit notification");
        let _ = self.tx.send(event);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(1024)
    }
}
