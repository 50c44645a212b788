//! Topology view and VLAN tag pools.
//!
//! The engine only needs a narrow view of the network: link and interface
//! status, link lookup by endpoints, and per-interface VLAN pools. Those are
//! exposed as the [`Topology`] and [`TagAllocator`] traits; [`TopologyCache`]
//! is the in-process implementation fed by topology snapshots and events.

use crate::error::TagError;
use eline_types::{EntityStatus, InterfaceId, Link, Tag, UniTag};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Lowest allocatable VLAN.
const VLAN_MIN: u16 = 1;
/// Highest allocatable VLAN.
const VLAN_MAX: u16 = 4095;

/// Status snapshot of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    /// The link.
    pub link: Link,
    /// Administrative state.
    pub enabled: bool,
    /// Operational state.
    pub active: bool,
}

impl LinkState {
    /// Derived status.
    pub fn status(&self) -> EntityStatus {
        EntityStatus::from_flags(self.enabled, self.active)
    }
}

/// Status snapshot of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceState {
    /// Interface id.
    pub id: InterfaceId,
    /// Administrative state.
    pub enabled: bool,
    /// Operational state.
    pub active: bool,
    /// Id of the link currently bound to this interface.
    pub link_id: Option<String>,
}

impl InterfaceState {
    /// Derived status.
    pub fn status(&self) -> EntityStatus {
        EntityStatus::from_flags(self.enabled, self.active)
    }
}

/// Read access to the network topology.
pub trait Topology: Send + Sync {
    /// Looks up a link by id.
    fn link(&self, link_id: &str) -> Option<LinkState>;

    /// Finds the link joining two interfaces, in either orientation.
    fn link_by_endpoints(&self, a: &InterfaceId, b: &InterfaceId) -> Option<Link>;

    /// Looks up an interface.
    fn interface(&self, id: &InterfaceId) -> Option<InterfaceState>;

    /// Status of an interface; unknown interfaces are disabled.
    fn interface_status(&self, id: &InterfaceId) -> EntityStatus {
        self.interface(id)
            .map(|iface| iface.status())
            .unwrap_or(EntityStatus::Disabled)
    }
}

/// Per-interface VLAN pools.
///
/// UNI tags come out of the UNI interface pool; link tags (`s_vlan`) must be
/// free on both endpoints of the link.
pub trait TagAllocator: Send + Sync {
    /// Reserves the tags of a UNI.
    fn use_uni_tags(&self, iface: &InterfaceId, tag: &UniTag) -> Result<(), TagError>;

    /// Returns the tags of a UNI to its pool.
    fn make_uni_tags_available(&self, iface: &InterfaceId, tag: &UniTag) -> Result<(), TagError>;

    /// Reserves the lowest VLAN free on both endpoints, avoiding `try_avoid`
    /// unless it is the only one left.
    fn next_link_tag(&self, link: &Link, try_avoid: Option<u16>) -> Result<Tag, TagError>;

    /// Reserves a specific VLAN on both endpoints.
    fn use_link_tag(&self, link: &Link, tag: Tag) -> Result<(), TagError>;

    /// Releases a VLAN on both endpoints.
    fn release_link_tag(&self, link: &Link, tag: Tag) -> Result<(), TagError>;
}

#[derive(Debug, Clone)]
struct VlanPool {
    available: BTreeSet<u16>,
    untagged_free: bool,
    any_free: bool,
}

impl Default for VlanPool {
    fn default() -> Self {
        Self {
            available: (VLAN_MIN..=VLAN_MAX).collect(),
            untagged_free: true,
            any_free: true,
        }
    }
}

#[derive(Debug, Clone)]
struct InterfaceEntry {
    enabled: bool,
    active: bool,
    link_id: Option<String>,
    pool: VlanPool,
}

impl InterfaceEntry {
    fn new(enabled: bool, active: bool) -> Self {
        Self {
            enabled,
            active,
            link_id: None,
            pool: VlanPool::default(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    links: HashMap<String, LinkState>,
    interfaces: HashMap<InterfaceId, InterfaceEntry>,
}

impl CacheState {
    fn pool_mut(&mut self, iface: &InterfaceId) -> Result<&mut VlanPool, TagError> {
        self.interfaces
            .get_mut(iface)
            .map(|entry| &mut entry.pool)
            .ok_or_else(|| TagError::UnknownTarget(iface.to_string()))
    }
}

/// Interface entry of a topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    /// Interface id.
    pub id: InterfaceId,
    /// Administrative state.
    pub enabled: bool,
    /// Operational state.
    pub active: bool,
}

/// Full topology snapshot.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    /// Known interfaces.
    pub interfaces: Vec<InterfaceSnapshot>,
    /// Known links.
    pub links: Vec<LinkState>,
}

/// In-memory topology and tag pools.
#[derive(Debug, Default)]
pub struct TopologyCache {
    state: RwLock<CacheState>,
}

impl TopologyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces link and interface status with a snapshot.
    ///
    /// Tag pools of interfaces already known are preserved.
    pub fn load_snapshot(&self, snapshot: TopologySnapshot) {
        let interfaces = snapshot.interfaces.len();
        let links = snapshot.links.len();
        for iface in snapshot.interfaces {
            self.upsert_interface(iface.id, iface.enabled, iface.active);
        }
        for link in snapshot.links {
            self.upsert_link(link.link, link.enabled, link.active);
        }
        debug!(interfaces, links, "Loaded topology snapshot");
    }

    /// Adds an interface or updates its status.
    pub fn upsert_interface(&self, id: InterfaceId, enabled: bool, active: bool) {
        let mut state = self.state.write();
        state
            .interfaces
            .entry(id)
            .and_modify(|entry| {
                entry.enabled = enabled;
                entry.active = active;
            })
            .or_insert_with(|| InterfaceEntry::new(enabled, active));
    }

    /// Adds a link or updates its status, binding it to both endpoints.
    pub fn upsert_link(&self, link: Link, enabled: bool, active: bool) {
        let mut state = self.state.write();
        let id = link.id();
        for endpoint in [link.endpoint_a(), link.endpoint_b()] {
            state
                .interfaces
                .entry(endpoint)
                .or_insert_with(|| InterfaceEntry::new(true, true))
                .link_id = Some(id.clone());
        }
        state.links.insert(
            id,
            LinkState {
                link,
                enabled,
                active,
            },
        );
    }

    /// Updates the operational state of a link. Unknown links are added.
    pub fn set_link_active(&self, link: &Link, active: bool) {
        let known = {
            let mut state = self.state.write();
            match state.links.get_mut(&link.id()) {
                Some(entry) => {
                    entry.active = active;
                    true
                }
                None => false,
            }
        };
        if !known {
            self.upsert_link(link.clone(), true, active);
        }
    }

    /// Updates the operational state of an interface. Unknown interfaces are added.
    pub fn set_interface_active(&self, id: &InterfaceId, active: bool) {
        let mut state = self.state.write();
        state
            .interfaces
            .entry(*id)
            .and_modify(|entry| entry.active = active)
            .or_insert_with(|| InterfaceEntry::new(true, active));
    }

    /// Updates the administrative state of a link.
    pub fn set_link_enabled(&self, link_id: &str, enabled: bool) -> bool {
        let mut state = self.state.write();
        match state.links.get_mut(link_id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns true if `vlan` is free on `iface`.
    pub fn is_vlan_available(&self, iface: &InterfaceId, vlan: u16) -> bool {
        self.state
            .read()
            .interfaces
            .get(iface)
            .is_some_and(|entry| entry.pool.available.contains(&vlan))
    }

    /// Number of free VLANs on `iface`.
    pub fn available_vlan_count(&self, iface: &InterfaceId) -> usize {
        self.state
            .read()
            .interfaces
            .get(iface)
            .map_or(0, |entry| entry.pool.available.len())
    }
}

impl Topology for TopologyCache {
    fn link(&self, link_id: &str) -> Option<LinkState> {
        self.state.read().links.get(link_id).cloned()
    }

    fn link_by_endpoints(&self, a: &InterfaceId, b: &InterfaceId) -> Option<Link> {
        let probe = Link::new(*a, *b);
        self.state
            .read()
            .links
            .get(&probe.id())
            .map(|state| state.link.clone())
    }

    fn interface(&self, id: &InterfaceId) -> Option<InterfaceState> {
        self.state
            .read()
            .interfaces
            .get(id)
            .map(|entry| InterfaceState {
                id: *id,
                enabled: entry.enabled,
                active: entry.active,
                link_id: entry.link_id.clone(),
            })
    }
}

fn conflict(iface: &InterfaceId, tag: impl ToString) -> TagError {
    TagError::Conflict {
        target: iface.to_string(),
        tag: tag.to_string(),
    }
}

impl TagAllocator for TopologyCache {
    fn use_uni_tags(&self, iface: &InterfaceId, tag: &UniTag) -> Result<(), TagError> {
        let mut state = self.state.write();
        let pool = state.pool_mut(iface)?;
        match tag {
            UniTag::Vlan(vlan) => {
                if !pool.available.remove(vlan) {
                    return Err(conflict(iface, vlan));
                }
            }
            UniTag::Untagged => {
                if !pool.untagged_free {
                    return Err(conflict(iface, tag));
                }
                pool.untagged_free = false;
            }
            UniTag::Any => {
                if !pool.any_free {
                    return Err(conflict(iface, tag));
                }
                pool.any_free = false;
            }
            UniTag::Range(range) => {
                // All or nothing.
                for [start, end] in range.ranges() {
                    if let Some(vlan) = (*start..=*end).find(|v| !pool.available.contains(v)) {
                        return Err(conflict(iface, vlan));
                    }
                }
                for [start, end] in range.ranges() {
                    for vlan in *start..=*end {
                        pool.available.remove(&vlan);
                    }
                }
            }
        }
        Ok(())
    }

    fn make_uni_tags_available(&self, iface: &InterfaceId, tag: &UniTag) -> Result<(), TagError> {
        let mut state = self.state.write();
        let pool = state.pool_mut(iface)?;
        let already_free = match tag {
            UniTag::Vlan(vlan) => !pool.available.insert(*vlan),
            UniTag::Untagged => std::mem::replace(&mut pool.untagged_free, true),
            UniTag::Any => std::mem::replace(&mut pool.any_free, true),
            UniTag::Range(range) => {
                let mut any_free = false;
                for [start, end] in range.ranges() {
                    for vlan in *start..=*end {
                        any_free |= !pool.available.insert(vlan);
                    }
                }
                any_free
            }
        };
        if already_free {
            warn!(interface = %iface, tag = %tag, "Released UNI tag was already available");
        }
        Ok(())
    }

    fn next_link_tag(&self, link: &Link, try_avoid: Option<u16>) -> Result<Tag, TagError> {
        let mut state = self.state.write();
        let (a, b) = (link.endpoint_a(), link.endpoint_b());
        let chosen = {
            let pool_a = &state
                .interfaces
                .get(&a)
                .ok_or_else(|| TagError::UnknownTarget(a.to_string()))?
                .pool;
            let pool_b = &state
                .interfaces
                .get(&b)
                .ok_or_else(|| TagError::UnknownTarget(b.to_string()))?
                .pool;
            let mut common = pool_a
                .available
                .iter()
                .filter(|vlan| pool_b.available.contains(vlan));
            let first = common.next().copied();
            match (first, try_avoid) {
                (Some(vlan), Some(avoid)) if vlan == avoid => common.next().copied().or(first),
                _ => first,
            }
        };
        let vlan = chosen.ok_or_else(|| TagError::NoTagAvailable(link.id()))?;
        state.pool_mut(&a)?.available.remove(&vlan);
        state.pool_mut(&b)?.available.remove(&vlan);
        Ok(Tag::vlan(vlan))
    }

    fn use_link_tag(&self, link: &Link, tag: Tag) -> Result<(), TagError> {
        let mut state = self.state.write();
        let (a, b) = (link.endpoint_a(), link.endpoint_b());
        for endpoint in [a, b] {
            if !state.pool_mut(&endpoint)?.available.contains(&tag.value) {
                return Err(conflict(&endpoint, tag.value));
            }
        }
        state.pool_mut(&a)?.available.remove(&tag.value);
        state.pool_mut(&b)?.available.remove(&tag.value);
        Ok(())
    }

    fn release_link_tag(&self, link: &Link, tag: Tag) -> Result<(), TagError> {
        let mut state = self.state.write();
        for endpoint in [link.endpoint_a(), link.endpoint_b()] {
            if !state.pool_mut(&endpoint)?.available.insert(tag.value) {
                debug!(interface = %endpoint, vlan = tag.value, "Released link tag was already available");
            }
        }
        Ok(())
    }
}
