//! Dynamic path computation on top of the path-computation service.

use crate::clients::{PathCandidate, PathConstraints, PathFinder, PathRequest};
use crate::path::Path;
use crate::topology::Topology;
use eline_types::{is_switch_id, Dpid, InterfaceId, Link, Uni};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns path-computation results into [`Path`]s.
#[derive(Clone)]
pub struct DynamicPathManager {
    finder: Arc<dyn PathFinder>,
    topology: Arc<dyn Topology>,
    max_paths: usize,
    disjoint_cutoff: usize,
}

impl std::fmt::Debug for DynamicPathManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicPathManager")
            .field("max_paths", &self.max_paths)
            .field("disjoint_cutoff", &self.disjoint_cutoff)
            .finish()
    }
}

impl DynamicPathManager {
    /// Creates a manager.
    pub fn new(
        finder: Arc<dyn PathFinder>,
        topology: Arc<dyn Topology>,
        max_paths: usize,
        disjoint_cutoff: usize,
    ) -> Self {
        Self {
            finder,
            topology,
            max_paths,
            disjoint_cutoff,
        }
    }

    /// Raw candidates between two UNIs. Failures are logged and yield no candidates.
    pub async fn get_paths(
        &self,
        uni_a: &Uni,
        uni_z: &Uni,
        max_paths: usize,
        constraints: &PathConstraints,
    ) -> Vec<PathCandidate> {
        let request = PathRequest {
            source: uni_a.interface_id.to_string(),
            destination: uni_z.interface_id.to_string(),
            spf_max_paths: max_paths,
            constraints: constraints.clone(),
        };
        match self.finder.find_paths(&request).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(source = %request.source, destination = %request.destination, error = %e,
                    "Path computation failed");
                Vec::new()
            }
        }
    }

    /// Builds a path from a hop list.
    ///
    /// Switch ids are dropped; the remaining interface ids must pair up into
    /// links known to the topology, otherwise there is no path.
    pub fn create_path(&self, hops: &[String]) -> Option<Path> {
        let clean: Vec<&str> = hops
            .iter()
            .map(String::as_str)
            .filter(|hop| !is_switch_id(hop))
            .collect();
        if clean.len() < 2 || clean.len() % 2 != 0 {
            return None;
        }

        let mut links = Vec::with_capacity(clean.len() / 2 - 1);
        let inner = &clean[1..clean.len() - 1];
        for pair in inner.chunks(2) {
            let a: InterfaceId = pair[0].parse().ok()?;
            let b: InterfaceId = pair[1].parse().ok()?;
            match self.topology.link_by_endpoints(&a, &b) {
                Some(link) => links.push(link),
                None => {
                    debug!(endpoint_a = %a, endpoint_b = %b, "No link between hop endpoints");
                    return None;
                }
            }
        }
        Some(Path::new(links))
    }

    /// Best paths for the circuit, in preference order.
    pub async fn get_best_paths(
        &self,
        uni_a: &Uni,
        uni_z: &Uni,
        constraints: &PathConstraints,
    ) -> Vec<Path> {
        self.get_paths(uni_a, uni_z, self.max_paths, constraints)
            .await
            .iter()
            .filter_map(|candidate| self.create_path(&candidate.hops))
            .collect()
    }

    /// The single best path, if any.
    pub async fn get_best_path(
        &self,
        uni_a: &Uni,
        uni_z: &Uni,
        constraints: &PathConstraints,
    ) -> Option<Path> {
        self.get_best_paths(uni_a, uni_z, constraints)
            .await
            .into_iter()
            .next()
    }

    /// Paths ranked by disjointness from `unwanted`, most disjoint first.
    ///
    /// Ties are broken by cost, then by hop count. Paths sharing every
    /// switch and link with `unwanted` are dropped.
    pub async fn get_disjoint_paths(
        &self,
        uni_a: &Uni,
        uni_z: &Uni,
        constraints: &PathConstraints,
        unwanted: &Path,
    ) -> Vec<Path> {
        let candidates = self
            .get_paths(uni_a, uni_z, self.disjoint_cutoff, constraints)
            .await;
        let endpoints = BTreeSet::from([uni_a.dpid(), uni_z.dpid()]);

        let mut ranked: Vec<(f64, f64, usize, Path)> = candidates
            .iter()
            .filter_map(|candidate| {
                let path = self.create_path(&candidate.hops)?;
                let score = disjointness(&path, unwanted, &endpoints);
                if score <= 0.0 {
                    return None;
                }
                Some((score, candidate.cost, candidate.hops.len(), path))
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                .then(a.2.cmp(&b.2))
        });
        ranked.into_iter().map(|(_, _, _, path)| path).collect()
    }
}

/// Share of `unwanted`'s transit switches and links that `path` avoids.
///
/// The UNI switches are excluded since every candidate shares them. An empty
/// `unwanted` yields 1.0.
pub fn disjointness(path: &Path, unwanted: &Path, endpoints: &BTreeSet<Dpid>) -> f64 {
    let unwanted_switches: BTreeSet<Dpid> = unwanted
        .switches()
        .difference(endpoints)
        .copied()
        .collect();
    let unwanted_links: Vec<&Link> = unwanted.iter().collect();
    let total = unwanted_switches.len() + unwanted_links.len();
    if total == 0 {
        return 1.0;
    }

    let shared_switches = path
        .switches()
        .intersection(&unwanted_switches)
        .count();
    let shared_links = path
        .iter()
        .filter(|link| unwanted_links.contains(link))
        .count();
    1.0 - (shared_switches + shared_links) as f64 / total as f64
}
