//! Common types for point-to-point Ethernet circuit provisioning.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the circuit engine and its collaborators:
//!
//! - [`Dpid`]: datapath (switch) identifiers
//! - [`InterfaceId`]: switch port identifiers (`<dpid>:<port>`)
//! - [`EntityStatus`]: derived UP/DOWN/DISABLED status
//! - [`Link`]: inter-switch links carrying a transport VLAN (`s_vlan`)
//! - [`UniTag`] / [`VlanMatch`]: customer tag specifications and their
//!   flow-match encodings
//! - [`Uni`]: a User Network Interface (interface plus optional tag)

mod interface;
mod link;
mod tag;
mod uni;

pub use interface::{is_switch_id, Dpid, EntityStatus, InterfaceId};
pub use link::{Link, LinkMetadata};
pub use tag::{range_masks, Tag, TagRange, TagType, UniTag, VlanMatch, VLAN_ANY_MASK};
pub use uni::Uni;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid datapath id: {0}")]
    InvalidDpid(String),

    #[error("invalid interface id: {0}")]
    InvalidInterfaceId(String),

    #[error("invalid VLAN tag: {0}")]
    InvalidTag(String),

    #[error("invalid tag range: {0}")]
    InvalidTagRange(String),

    #[error("invalid entity status: {0}")]
    InvalidStatus(String),
}
