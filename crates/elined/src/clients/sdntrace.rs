//! Control-plane trace service.

use super::join_url;
use crate::error::ClientError;
use async_trait::async_trait;
use eline_types::{Dpid, InterfaceId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Ethertype of an 802.1Q frame.
const ETH_TYPE_VLAN: u16 = 0x8100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TraceSwitch {
    dpid: Dpid,
    in_port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TraceEth {
    dl_type: u16,
    dl_vlan: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TraceBody {
    switch: TraceSwitch,
    #[serde(skip_serializing_if = "Option::is_none")]
    eth: Option<TraceEth>,
}

/// A trace probe injected at an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRequest {
    trace: TraceBody,
}

impl TraceRequest {
    /// Probe entering `iface`, tagged with `vlan` if any.
    pub fn new(iface: InterfaceId, vlan: Option<u16>) -> Self {
        Self {
            trace: TraceBody {
                switch: TraceSwitch {
                    dpid: iface.dpid(),
                    in_port: iface.port(),
                },
                eth: vlan.map(|dl_vlan| TraceEth {
                    dl_type: ETH_TYPE_VLAN,
                    dl_vlan,
                }),
            },
        }
    }
}

/// One hop of a trace result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceHop {
    /// Switch reached.
    pub dpid: Dpid,
    /// Ingress port on that switch.
    pub port: u32,
    /// VLAN carried on ingress.
    #[serde(default)]
    pub vlan: Option<u16>,
    /// Hop kind (`starting`, `intermediary`, `last`, ...).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Output description of the final hop.
    #[serde(default)]
    pub out: Option<Value>,
}

impl TraceHop {
    /// Hop at `dpid`/`port` without VLAN or output.
    pub fn new(dpid: Dpid, port: u32, vlan: Option<u16>) -> Self {
        Self {
            dpid,
            port,
            vlan,
            kind: None,
            out: None,
        }
    }
}

#[derive(Deserialize)]
struct TraceResponse {
    #[serde(default)]
    result: Vec<Vec<TraceHop>>,
}

/// Runs control-plane traces.
#[async_trait]
pub trait TraceService: Send + Sync {
    /// Runs every probe; the result is positional with `requests`.
    async fn trace_bulk(
        &self,
        requests: &[TraceRequest],
        timeout: Duration,
    ) -> Result<Vec<Vec<TraceHop>>, ClientError>;
}

/// Trace service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTraceService {
    client: Client,
    base_url: String,
}

impl HttpTraceService {
    /// Creates a client for the trace service at `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TraceService for HttpTraceService {
    async fn trace_bulk(
        &self,
        requests: &[TraceRequest],
        timeout: Duration,
    ) -> Result<Vec<Vec<TraceHop>>, ClientError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .put(join_url(&self.base_url, "traces"))
            .timeout(timeout)
            .json(requests)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest("sdntrace_cp", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "sdntrace_cp",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TraceResponse = response
            .json()
            .await
            .map_err(|e| ClientError::from_reqwest("sdntrace_cp", e))?;
        Ok(parsed.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_with_vlan() {
        let request = TraceRequest::new("00:00:00:00:00:00:00:01:3".parse().unwrap(), Some(100));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"trace": {
                "switch": {"dpid": "00:00:00:00:00:00:00:01", "in_port": 3},
                "eth": {"dl_type": 33024, "dl_vlan": 100}
            }})
        );
    }

    #[test]
    fn test_request_untagged_has_no_eth() {
        let request = TraceRequest::new("00:00:00:00:00:00:00:01:3".parse().unwrap(), None);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value["trace"].get("eth").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let parsed: TraceResponse = serde_json::from_value(json!({"result": [[
            {"dpid": "00:00:00:00:00:00:00:01", "port": 1, "type": "starting", "vlan": 100},
            {"dpid": "00:00:00:00:00:00:00:02", "port": 2, "type": "last", "vlan": 5,
             "out": {"port": 1, "vlan": 100}}
        ]]}))
        .unwrap();
        let trace = &parsed.result[0];
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].kind.as_deref(), Some("starting"));
        assert_eq!(trace[1].out, Some(json!({"port": 1, "vlan": 100})));
    }
}
