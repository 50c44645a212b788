//! Southbound flow service.

use super::join_url;
use crate::error::{FlowCommand, FlowModError};
use crate::flows::{flow_count, FlowDeletion, FlowMod, SwitchFlows};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Installs and deletes flows on switches.
#[async_trait]
pub trait FlowManager: Send + Sync {
    /// Installs flows, one batch per switch.
    async fn install_flows(
        &self,
        flows: &SwitchFlows<FlowMod>,
        force: bool,
    ) -> Result<(), FlowModError>;

    /// Deletes flows, one batch per switch.
    async fn delete_flows(
        &self,
        flows: &SwitchFlows<FlowDeletion>,
        force: bool,
    ) -> Result<(), FlowModError>;
}

#[derive(Serialize)]
struct SwitchBatch<'a, T> {
    flows: &'a [T],
}

/// Flow service reached over HTTP (`flows_by_switch` endpoints).
#[derive(Debug, Clone)]
pub struct HttpFlowManager {
    client: Client,
    base_url: String,
}

impl HttpFlowManager {
    /// Creates a client for the flow service at `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn send<T: Serialize + Sync>(
        &self,
        command: FlowCommand,
        flows: &SwitchFlows<T>,
        force: bool,
    ) -> Result<(), FlowModError> {
        if flows.is_empty() {
            return Ok(());
        }

        let path = match command {
            FlowCommand::Install => "flows_by_switch/",
            FlowCommand::Delete => "delete/flows_by_switch/",
        };
        let url = join_url(&self.base_url, path);
        let body: BTreeMap<String, SwitchBatch<'_, T>> = flows
            .iter()
            .map(|(dpid, flows)| (dpid.to_string(), SwitchBatch { flows }))
            .collect();

        debug!(%command, switches = flows.len(), flows = flow_count(flows), force, "Sending flows");

        let response = self
            .client
            .post(&url)
            .query(&[("force", force)])
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowModError::Transport {
                command,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FlowModError::Rejected {
                command,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FlowManager for HttpFlowManager {
    async fn install_flows(
        &self,
        flows: &SwitchFlows<FlowMod>,
        force: bool,
    ) -> Result<(), FlowModError> {
        self.send(FlowCommand::Install, flows, force).await
    }

    async fn delete_flows(
        &self,
        flows: &SwitchFlows<FlowDeletion>,
        force: bool,
    ) -> Result<(), FlowModError> {
        self.send(FlowCommand::Delete, flows, force).await
    }
}
