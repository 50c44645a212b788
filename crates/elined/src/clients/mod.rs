//! Collaborator clients.
//!
//! Each external service the engine depends on is reached through a trait so
//! the engine can run against in-memory fakes; the HTTP and Redis
//! implementations live next to their trait.

pub mod flow_manager;
pub mod pathfinder;
pub mod sdntrace;
pub mod storage;
pub mod topology;

pub use flow_manager::{FlowManager, HttpFlowManager};
pub use pathfinder::{HttpPathFinder, PathCandidate, PathConstraints, PathFinder, PathRequest};
pub use sdntrace::{HttpTraceService, TraceHop, TraceRequest, TraceService};
pub use storage::{CircuitStore, MemoryCircuitStore, RedisCircuitStore};
pub use topology::HttpTopologySource;

/// Joins a base URL and a path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::join_url;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h/api/", "/flows"), "http://h/api/flows");
        assert_eq!(join_url("http://h/api", "flows"), "http://h/api/flows");
    }
}
