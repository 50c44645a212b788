//! Ordered link chains between two UNI switches.

use crate::error::{InvalidPath, TagError};
use crate::topology::{TagAllocator, Topology};
use eline_types::{Dpid, EntityStatus, InterfaceId, Link};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// An ordered sequence of links. The empty path means "no path".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Link>);

impl Path {
    /// Creates a path from links.
    pub fn new(links: Vec<Link>) -> Self {
        Self(links)
    }

    /// Returns the links.
    pub fn links(&self) -> &[Link] {
        &self.0
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the "no path" sentinel.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the links.
    pub fn iter(&self) -> std::slice::Iter<'_, Link> {
        self.0.iter()
    }

    /// Returns true if `link` is part of this path.
    pub fn is_affected_by_link(&self, link: &Link) -> bool {
        self.0.contains(link)
    }

    /// Returns the link of this path that terminates on `iface`, if any.
    pub fn link_affected_by_interface(&self, iface: &InterfaceId) -> Option<&Link> {
        self.0.iter().find(|link| link.has_endpoint(iface))
    }

    /// Every switch touched by the path.
    pub fn switches(&self) -> BTreeSet<Dpid> {
        self.0
            .iter()
            .flat_map(|link| {
                let (a, b) = link.switches();
                [a, b]
            })
            .collect()
    }

    /// Transport VLAN per link id.
    pub fn s_vlans(&self) -> HashMap<String, u16> {
        self.0
            .iter()
            .filter_map(|link| link.s_vlan().map(|vlan| (link.id(), vlan)))
            .collect()
    }

    /// Reserves a transport VLAN on every link.
    ///
    /// `avoid` maps link ids to a VLAN that should not be picked again on
    /// that link if another one is free. On failure every VLAN reserved by
    /// this call is released and the path is left without tags.
    pub fn choose_vlans(
        &mut self,
        tags: &dyn TagAllocator,
        avoid: &HashMap<String, u16>,
    ) -> Result<(), TagError> {
        for index in 0..self.0.len() {
            let link = &self.0[index];
            match tags.next_link_tag(link, avoid.get(&link.id()).copied()) {
                Ok(tag) => self.0[index].set_s_vlan(tag),
                Err(err) => {
                    for link in &mut self.0[..index] {
                        if let Some(tag) = link.clear_s_vlan() {
                            if let Err(release_err) = tags.release_link_tag(link, tag) {
                                warn!(link = %link.id(), error = %release_err, "Failed to release link tag");
                            }
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Re-reserves the transport VLANs already stamped on the path.
    pub fn use_vlans(&self, tags: &dyn TagAllocator) {
        for link in &self.0 {
            if let Some(tag) = link.metadata().s_vlan {
                if let Err(err) = tags.use_link_tag(link, tag) {
                    warn!(link = %link.id(), error = %err, "Could not reserve stored link tag");
                }
            }
        }
    }

    /// Releases every transport VLAN and strips it from the links.
    pub fn make_vlans_available(&mut self, tags: &dyn TagAllocator) {
        for link in &mut self.0 {
            if let Some(tag) = link.clear_s_vlan() {
                if let Err(err) = tags.release_link_tag(link, tag) {
                    warn!(link = %link.id(), error = %err, "Failed to release link tag");
                }
            }
        }
    }

    /// Checks that the path walks from `switch_a` to `switch_z`.
    ///
    /// Every link must touch the current switch and lead to exactly one new
    /// switch; revisiting a switch is a loop. Unless `is_scheduled`, every
    /// link must also be the live link bound to both of its endpoints.
    pub fn is_valid(
        &self,
        switch_a: Dpid,
        switch_z: Dpid,
        is_scheduled: bool,
        topology: &dyn Topology,
    ) -> Result<(), InvalidPath> {
        let mut visited: BTreeSet<Dpid> = BTreeSet::from([switch_a]);
        let mut current = switch_a;

        for link in &self.0 {
            if !is_scheduled {
                for endpoint in [link.endpoint_a(), link.endpoint_b()] {
                    let bound = topology
                        .interface(&endpoint)
                        .and_then(|iface| iface.link_id);
                    if bound.as_deref() != Some(link.id().as_str()) {
                        return Err(InvalidPath::new(format!(
                            "Link {} is not the live link of interface {}",
                            link, endpoint
                        )));
                    }
                }
            }

            let (a, b) = link.switches();
            let next = if a == current && b != current {
                b
            } else if b == current && a != current {
                a
            } else {
                return Err(InvalidPath::new(format!(
                    "Previous switch {} is not connected to {}",
                    current, link
                )));
            };

            if !visited.insert(next) {
                return Err(InvalidPath::new(format!(
                    "Loop detected on switch {} ({})",
                    next, link
                )));
            }
            current = next;
        }

        if current != switch_z {
            return Err(InvalidPath::new(format!(
                "Path does not end on switch {}",
                switch_z
            )));
        }
        Ok(())
    }

    /// Aggregated status of the links.
    ///
    /// Empty paths and paths with an absent or disabled link are DISABLED;
    /// otherwise any inactive link makes the path DOWN.
    pub fn status(&self, topology: &dyn Topology) -> EntityStatus {
        if self.0.is_empty() {
            return EntityStatus::Disabled;
        }

        let mut status = EntityStatus::Up;
        for link in &self.0 {
            match topology.link(&link.id()) {
                None => {
                    debug!(link = %link.id(), "Path link not found in topology");
                    return EntityStatus::Disabled;
                }
                Some(state) => match state.status() {
                    EntityStatus::Disabled => return EntityStatus::Disabled,
                    EntityStatus::Down => status = EntityStatus::Down,
                    EntityStatus::Up => {}
                },
            }
        }
        status
    }
}

impl From<Vec<Link>> for Path {
    fn from(links: Vec<Link>) -> Self {
        Self(links)
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Link;
    type IntoIter = std::slice::Iter<'a, Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links: Vec<String> = self.0.iter().map(|link| link.to_string()).collect();
        write!(f, "[{}]", links.join(", "))
    }
}
