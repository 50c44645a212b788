//! User Network Interface.

use crate::interface::{Dpid, InterfaceId};
use crate::tag::{UniTag, VlanMatch};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A customer-facing attachment point: an interface plus an optional tag.
///
/// A UNI without a tag is an EPL endpoint (all traffic on the port).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uni {
    /// The switch interface.
    pub interface_id: InterfaceId,
    /// Customer tag accepted on this UNI.
    #[serde(default, rename = "tag", skip_serializing_if = "Option::is_none")]
    pub user_tag: Option<UniTag>,
}

impl Uni {
    /// Creates a new UNI.
    pub fn new(interface_id: InterfaceId, user_tag: Option<UniTag>) -> Self {
        Self {
            interface_id,
            user_tag,
        }
    }

    /// Returns the switch this UNI is attached to.
    pub fn dpid(&self) -> Dpid {
        self.interface_id.dpid()
    }

    /// Returns the port number of the UNI interface.
    pub fn port(&self) -> u32 {
        self.interface_id.port()
    }

    /// Returns the single-value flow match of the tag (`None` for EPL and ranges).
    pub fn vlan(&self) -> Option<VlanMatch> {
        self.user_tag.as_ref().and_then(UniTag::vlan_match)
    }

    /// Returns true if the UNI carries a tag range.
    pub fn has_tag_range(&self) -> bool {
        self.user_tag.as_ref().is_some_and(UniTag::is_range)
    }

    /// Returns the mask list of a tag range, empty otherwise.
    pub fn masks(&self) -> Vec<VlanMatch> {
        match &self.user_tag {
            Some(tag @ UniTag::Range(_)) => tag.vlan_matches(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Uni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_tag {
            Some(tag) => write!(f, "{}:{}", self.interface_id, tag),
            None => write!(f, "{}", self.interface_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_uni_deserialize_without_tag() {
        let uni: Uni =
            serde_json::from_str(r#"{"interface_id": "00:00:00:00:00:00:00:01:1"}"#).unwrap();
        assert_eq!(uni.port(), 1);
        assert_eq!(uni.vlan(), None);
        assert!(!uni.has_tag_range());
    }

    #[test]
    fn test_uni_with_range() {
        let uni: Uni = serde_json::from_str(
            r#"{"interface_id": "00:00:00:00:00:00:00:01:1",
                "tag": {"tag_type": "vlan", "value": [[1, 2]]}}"#,
        )
        .unwrap();
        assert!(uni.has_tag_range());
        assert_eq!(uni.vlan(), None);
        assert_eq!(
            uni.masks(),
            vec![VlanMatch::Masked { value: 1, mask: 4095 }, VlanMatch::Masked { value: 2, mask: 4095 }]
        );
    }

    #[test]
    fn test_uni_display() {
        let uni = Uni::new("00:00:00:00:00:00:00:02:5".parse().unwrap(), Some(UniTag::Vlan(30)));
        assert_eq!(uni.to_string(), "00:00:00:00:00:00:00:02:5:30");
        assert_eq!(uni.dpid(), Dpid::new(2));
    }
}
