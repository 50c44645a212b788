//! Path computation service.

use crate::error::ClientError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Constraints forwarded to path computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConstraints {
    /// Link metadata attribute used as edge weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spf_attribute: Option<String>,

    /// Maximum total path cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spf_max_path_cost: Option<f64>,

    /// Metrics every link of the path must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory_metrics: Option<Map<String, Value>>,

    /// Metrics of which at least `minimum_flexible_hits` must be satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flexible_metrics: Option<Map<String, Value>>,

    /// Number of flexible metrics that must be satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_flexible_hits: Option<u32>,

    /// Link ids that must not be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undesired_links: Option<Vec<String>>,
}

impl PathConstraints {
    /// Returns true if no constraint is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Body of a path computation request.
#[derive(Debug, Clone, Serialize)]
pub struct PathRequest {
    /// Source interface id.
    pub source: String,
    /// Destination interface id.
    pub destination: String,
    /// Number of candidates requested.
    pub spf_max_paths: usize,
    /// Constraints.
    #[serde(flatten)]
    pub constraints: PathConstraints,
}

/// A candidate path as a hop list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PathCandidate {
    /// Interleaved interface and switch ids.
    pub hops: Vec<String>,
    /// Path cost.
    #[serde(default)]
    pub cost: f64,
}

#[derive(Deserialize)]
struct PathResponse {
    #[serde(default)]
    paths: Vec<PathCandidate>,
}

/// Computes candidate paths between two interfaces.
#[async_trait]
pub trait PathFinder: Send + Sync {
    /// Returns candidates ordered by preference.
    async fn find_paths(&self, request: &PathRequest) -> Result<Vec<PathCandidate>, ClientError>;
}

/// Path computation reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPathFinder {
    client: Client,
    url: String,
}

impl HttpPathFinder {
    /// Creates a client posting to `url`.
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PathFinder for HttpPathFinder {
    async fn find_paths(&self, request: &PathRequest) -> Result<Vec<PathCandidate>, ClientError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest("pathfinder", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "pathfinder",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PathResponse = response
            .json()
            .await
            .map_err(|e| ClientError::from_reqwest("pathfinder", e))?;
        debug!(
            source = %request.source,
            destination = %request.destination,
            candidates = parsed.paths.len(),
            "Received path candidates"
        );
        Ok(parsed.paths)
    }
}
