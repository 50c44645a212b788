//! Switch and interface identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of colon-separated octets in a datapath id.
const DPID_OCTETS: usize = 8;

/// A 64-bit OpenFlow datapath id in its canonical colon form.
///
/// # Examples
///
/// ```
/// use eline_types::Dpid;
///
/// let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
/// assert_eq!(dpid.as_u64(), 1);
/// assert_eq!(dpid.to_string(), "00:00:00:00:00:00:00:01");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dpid(u64);

impl Dpid {
    /// Creates a datapath id from its numeric value.
    pub const fn new(value: u64) -> Self {
        Dpid(value)
    }

    /// Returns the numeric value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Dpid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != DPID_OCTETS {
            return Err(ParseError::InvalidDpid(s.to_string()));
        }

        let mut value: u64 = 0;
        for part in parts {
            if part.len() != 2 {
                return Err(ParseError::InvalidDpid(s.to_string()));
            }
            let byte =
                u8::from_str_radix(part, 16).map_err(|_| ParseError::InvalidDpid(s.to_string()))?;
            value = (value << 8) | u64::from(byte);
        }
        Ok(Dpid(value))
    }
}

impl TryFrom<String> for Dpid {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Dpid> for String {
    fn from(dpid: Dpid) -> String {
        dpid.to_string()
    }
}

/// Returns true if `id` is a bare switch id rather than an interface id.
///
/// Path-computation hop lists interleave switch ids with interface ids; a
/// switch id is the shorter eight-octet form without a port suffix.
pub fn is_switch_id(id: &str) -> bool {
    id.split(':').count() == DPID_OCTETS
}

/// Identifies a switch port as `<dpid>:<port>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceId {
    dpid: Dpid,
    port: u32,
}

impl InterfaceId {
    /// Creates a new interface id.
    pub const fn new(dpid: Dpid, port: u32) -> Self {
        Self { dpid, port }
    }

    /// Returns the switch this interface belongs to.
    pub const fn dpid(&self) -> Dpid {
        self.dpid
    }

    /// Returns the port number on the switch.
    pub const fn port(&self) -> u32 {
        self.port
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dpid, self.port)
    }
}

impl FromStr for InterfaceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (dpid, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidInterfaceId(s.to_string()))?;
        let dpid: Dpid = dpid
            .parse()
            .map_err(|_| ParseError::InvalidInterfaceId(s.to_string()))?;
        let port: u32 = port
            .parse()
            .map_err(|_| ParseError::InvalidInterfaceId(s.to_string()))?;
        Ok(Self { dpid, port })
    }
}

impl TryFrom<String> for InterfaceId {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InterfaceId> for String {
    fn from(id: InterfaceId) -> String {
        id.to_string()
    }
}

/// Status derived from administrative and operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    /// Enabled and active.
    Up,
    /// Enabled but not active.
    Down,
    /// Administratively disabled or absent.
    #[default]
    Disabled,
}

impl EntityStatus {
    /// Derives the status from the enabled/active flags.
    pub const fn from_flags(enabled: bool, active: bool) -> Self {
        match (enabled, active) {
            (false, _) => EntityStatus::Disabled,
            (true, false) => EntityStatus::Down,
            (true, true) => EntityStatus::Up,
        }
    }

    /// Returns true if the status is UP.
    pub const fn is_up(&self) -> bool {
        matches!(self, EntityStatus::Up)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityStatus::Up => "UP",
            EntityStatus::Down => "DOWN",
            EntityStatus::Disabled => "DISABLED",
        };
        f.write_str(s)
    }
}

impl FromStr for EntityStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(EntityStatus::Up),
            "DOWN" => Ok(EntityStatus::Down),
            "DISABLED" => Ok(EntityStatus::Disabled),
            _ => Err(ParseError::InvalidStatus(s.to_string())),
        }
    }
}
