//! Topology snapshot source.

use super::join_url;
use crate::error::ClientError;
use crate::topology::{InterfaceSnapshot, LinkState, TopologySnapshot};
use eline_types::{InterfaceId, Link};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct EndpointEntry {
    id: String,
}

#[derive(Deserialize)]
struct LinkEntry {
    endpoint_a: EndpointEntry,
    endpoint_b: EndpointEntry,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    active: bool,
}

#[derive(Deserialize)]
struct LinksResponse {
    #[serde(default)]
    links: HashMap<String, LinkEntry>,
}

#[derive(Deserialize)]
struct InterfaceEntry {
    id: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    active: bool,
}

#[derive(Deserialize)]
struct InterfacesResponse {
    #[serde(default)]
    interfaces: HashMap<String, InterfaceEntry>,
}

/// Fetches the link and interface inventory of the topology service.
#[derive(Debug, Clone)]
pub struct HttpTopologySource {
    client: Client,
    base_url: String,
}

impl HttpTopologySource {
    /// Creates a client for the topology service at `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .client
            .get(join_url(&self.base_url, path))
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest("topology", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "topology",
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::from_reqwest("topology", e))
    }

    /// Fetches a full snapshot.
    pub async fn fetch_snapshot(&self) -> Result<TopologySnapshot, ClientError> {
        let interfaces: InterfacesResponse = self.get("interfaces").await?;
        let links: LinksResponse = self.get("links").await?;
        let snapshot = build_snapshot(interfaces, links);
        debug!(
            interfaces = snapshot.interfaces.len(),
            links = snapshot.links.len(),
            "Fetched topology snapshot"
        );
        Ok(snapshot)
    }
}

fn build_snapshot(interfaces: InterfacesResponse, links: LinksResponse) -> TopologySnapshot {
    let mut snapshot = TopologySnapshot::default();

    for entry in interfaces.interfaces.into_values() {
        match entry.id.parse::<InterfaceId>() {
            Ok(id) => snapshot.interfaces.push(InterfaceSnapshot {
                id,
                enabled: entry.enabled,
                active: entry.active,
            }),
            Err(e) => warn!(interface = %entry.id, error = %e, "Ignoring interface"),
        }
    }

    for (id, entry) in links.links {
        let endpoints = (
            entry.endpoint_a.id.parse::<InterfaceId>(),
            entry.endpoint_b.id.parse::<InterfaceId>(),
        );
        match endpoints {
            (Ok(a), Ok(b)) => snapshot.links.push(LinkState {
                link: Link::new(a, b),
                enabled: entry.enabled,
                active: entry.active,
            }),
            _ => warn!(link = %id, "Ignoring link with malformed endpoints"),
        }
    }

    snapshot.interfaces.sort_by_key(|iface| iface.id);
    snapshot.links.sort_by_key(|state| state.link.id());
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_build_snapshot() {
        let interfaces: InterfacesResponse = serde_json::from_value(json!({"interfaces": {
            "00:00:00:00:00:00:00:01:1": {"id": "00:00:00:00:00:00:00:01:1", "enabled": true, "active": true, "speed": 1e9},
            "bogus": {"id": "bogus", "enabled": true, "active": true}
        }}))
        .unwrap();
        let links: LinksResponse = serde_json::from_value(json!({"links": {
            "abc": {
                "id": "abc",
                "endpoint_a": {"id": "00:00:00:00:00:00:00:01:2", "name": "eth2"},
                "endpoint_b": {"id": "00:00:00:00:00:00:00:02:2"},
                "enabled": true,
                "active": false,
                "metadata": {"link_name": "core"}
            }
        }}))
        .unwrap();

        let snapshot = build_snapshot(interfaces, links);
        assert_eq!(snapshot.interfaces.len(), 1);
        assert_eq!(snapshot.links.len(), 1);
        assert!(!snapshot.links[0].active);
        assert_eq!(
            snapshot.links[0].link.endpoint_b().to_string(),
            "00:00:00:00:00:00:00:02:2"
        );
    }
}
