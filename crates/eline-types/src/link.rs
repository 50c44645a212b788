//! Inter-switch links.

use crate::interface::{Dpid, InterfaceId};
use crate::tag::Tag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Metadata attached to a link while it belongs to a circuit path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    /// Transport VLAN assigned to this hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s_vlan: Option<Tag>,
}

/// A link between two switch interfaces.
///
/// Links are identified by their unordered endpoint pair: the same physical
/// link reported in either orientation is the same link. Metadata does not
/// take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "LinkRepr", into = "LinkRepr")]
pub struct Link {
    endpoint_a: InterfaceId,
    endpoint_b: InterfaceId,
    metadata: LinkMetadata,
}

impl Link {
    /// Creates a link without metadata.
    pub fn new(endpoint_a: InterfaceId, endpoint_b: InterfaceId) -> Self {
        Self {
            endpoint_a,
            endpoint_b,
            metadata: LinkMetadata::default(),
        }
    }

    /// Returns the stable link id (`<lower endpoint>-<higher endpoint>`).
    pub fn id(&self) -> String {
        let (lo, hi) = if self.endpoint_a <= self.endpoint_b {
            (self.endpoint_a, self.endpoint_b)
        } else {
            (self.endpoint_b, self.endpoint_a)
        };
        format!("{}-{}", lo, hi)
    }

    /// Returns the first endpoint.
    pub fn endpoint_a(&self) -> InterfaceId {
        self.endpoint_a
    }

    /// Returns the second endpoint.
    pub fn endpoint_b(&self) -> InterfaceId {
        self.endpoint_b
    }

    /// Returns true if `iface` is one of the endpoints.
    pub fn has_endpoint(&self, iface: &InterfaceId) -> bool {
        self.endpoint_a == *iface || self.endpoint_b == *iface
    }

    /// Returns the endpoint located on `dpid`, if any.
    pub fn endpoint_on(&self, dpid: Dpid) -> Option<InterfaceId> {
        if self.endpoint_a.dpid() == dpid {
            Some(self.endpoint_a)
        } else if self.endpoint_b.dpid() == dpid {
            Some(self.endpoint_b)
        } else {
            None
        }
    }

    /// Returns the endpoint that is *not* located on `dpid`.
    ///
    /// When neither endpoint is on `dpid`, endpoint B is returned.
    pub fn endpoint_off(&self, dpid: Dpid) -> InterfaceId {
        if self.endpoint_a.dpid() != dpid {
            self.endpoint_a
        } else {
            self.endpoint_b
        }
    }

    /// Returns the pair of switches this link connects.
    pub fn switches(&self) -> (Dpid, Dpid) {
        (self.endpoint_a.dpid(), self.endpoint_b.dpid())
    }

    /// Returns the link metadata.
    pub fn metadata(&self) -> &LinkMetadata {
        &self.metadata
    }

    /// Returns the assigned transport VLAN, if any.
    pub fn s_vlan(&self) -> Option<u16> {
        self.metadata.s_vlan.map(|tag| tag.value)
    }

    /// Stamps a transport VLAN on the link.
    pub fn set_s_vlan(&mut self, tag: Tag) {
        self.metadata.s_vlan = Some(tag);
    }

    /// Clears the transport VLAN, returning the previous value.
    pub fn clear_s_vlan(&mut self) -> Option<Tag> {
        self.metadata.s_vlan.take()
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        (self.endpoint_a == other.endpoint_a && self.endpoint_b == other.endpoint_b)
            || (self.endpoint_a == other.endpoint_b && self.endpoint_b == other.endpoint_a)
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({}, {})", self.endpoint_a, self.endpoint_b)
    }
}

#[derive(Serialize, Deserialize)]
struct EndpointRepr {
    id: InterfaceId,
}

#[derive(Serialize, Deserialize)]
struct LinkRepr {
    #[serde(default, skip_deserializing)]
    id: String,
    endpoint_a: EndpointRepr,
    endpoint_b: EndpointRepr,
    #[serde(default)]
    metadata: LinkMetadata,
}

impl From<LinkRepr> for Link {
    fn from(repr: LinkRepr) -> Self {
        Self {
            endpoint_a: repr.endpoint_a.id,
            endpoint_b: repr.endpoint_b.id,
            metadata: repr.metadata,
        }
    }
}

impl From<Link> for LinkRepr {
    fn from(link: Link) -> Self {
        Self {
            id: link.id(),
            endpoint_a: EndpointRepr {
                id: link.endpoint_a,
            },
            endpoint_b: EndpointRepr {
                id: link.endpoint_b,
            },
            metadata: link.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn iface(dpid: u64, port: u32) -> InterfaceId {
        InterfaceId::new(Dpid::new(dpid), port)
    }

    #[test]
    fn test_link_equality_ignores_orientation() {
        let ab = Link::new(iface(1, 2), iface(2, 2));
        let ba = Link::new(iface(2, 2), iface(1, 2));
        assert_eq!(ab, ba);
        assert_eq!(ab.id(), ba.id());
    }

    #[test]
    fn test_link_equality_ignores_metadata() {
        let plain = Link::new(iface(1, 2), iface(2, 2));
        let mut tagged = plain.clone();
        tagged.set_s_vlan(Tag::vlan(10));
        assert_eq!(plain, tagged);
        assert_eq!(tagged.s_vlan(), Some(10));
        assert_eq!(tagged.clear_s_vlan(), Some(Tag::vlan(10)));
        assert_eq!(tagged.s_vlan(), None);
    }

    #[test]
    fn test_endpoint_lookup() {
        let link = Link::new(iface(1, 3), iface(2, 4));
        assert_eq!(link.endpoint_on(Dpid::new(2)), Some(iface(2, 4)));
        assert_eq!(link.endpoint_on(Dpid::new(9)), None);
        assert_eq!(link.endpoint_off(Dpid::new(1)), iface(2, 4));
        assert!(link.has_endpoint(&iface(1, 3)));
    }

    #[test]
    fn test_link_serde() {
        let json = r#"{
            "endpoint_a": {"id": "00:00:00:00:00:00:00:01:3"},
            "endpoint_b": {"id": "00:00:00:00:00:00:00:02:2"},
            "metadata": {"s_vlan": {"tag_type": "vlan", "value": 5}}
        }"#;
        let link: Link = serde_json::from_str(json).unwrap();
        assert_eq!(link.s_vlan(), Some(5));

        let value = serde_json::to_value(&link).unwrap();
        assert_eq!(value["id"], link.id());
        assert_eq!(value["endpoint_b"]["id"], "00:00:00:00:00:00:00:02:2");
    }
}
