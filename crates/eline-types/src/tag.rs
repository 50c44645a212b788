//! VLAN tag specifications for UNIs and links.
//!
//! A UNI tag takes one of several shapes, each with its own flow-match
//! encoding:
//!
//! | Shape          | Config value          | `dl_vlan` match |
//! |----------------|-----------------------|-----------------|
//! | single VLAN    | `100`                 | `100`           |
//! | untagged       | `0` / `"untagged"`    | `0`             |
//! | any tagged     | `"any"` / `"4096/4096"` | `"4096/4096"` |
//! | range          | `[[10, 20], [30, 30]]`| `"v/m"` per mask |

use crate::ParseError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Wire form of the "any tagged frame" match.
pub const VLAN_ANY_MASK: &str = "4096/4096";

/// Highest usable VLAN id.
const VLAN_MAX: u16 = 4095;

/// VLAN mask covering all 12 VID bits.
const VID_MASK: u32 = 4095;

/// Tag technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    /// IEEE 802.1Q VLAN.
    #[default]
    Vlan,
    /// IEEE 802.1ad stacked VLAN.
    VlanQinq,
}

/// A concrete tag value, as stamped on link metadata (`s_vlan`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag technology.
    #[serde(default)]
    pub tag_type: TagType,
    /// Tag value.
    pub value: u16,
}

impl Tag {
    /// Creates a VLAN tag.
    pub const fn vlan(value: u16) -> Self {
        Self {
            tag_type: TagType::Vlan,
            value,
        }
    }
}

/// The `dl_vlan` value of a flow match or a UNI tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VlanMatch {
    /// A specific VLAN id.
    Vid(u16),
    /// Untagged frames only (`0`).
    Untagged,
    /// Any tagged frame (`"4096/4096"`).
    Any,
    /// A masked VLAN match (`"value/mask"`), produced by tag ranges.
    Masked {
        /// Base value.
        value: u16,
        /// Bit mask.
        mask: u16,
    },
}

impl VlanMatch {
    /// Returns true for the shapes that never get a tag rewritten onto them.
    ///
    /// This is the special set `{untagged, any}`; the absent tag (EPL) is the
    /// third member and is represented by `None` at call sites.
    pub const fn is_special(&self) -> bool {
        matches!(self, VlanMatch::Untagged | VlanMatch::Any)
    }

    /// Returns the VLAN a trace probe should carry for this match.
    ///
    /// Untagged maps to no VLAN, "any" maps to VLAN 1, masks map to their
    /// lowest covered value.
    pub fn trace_vlan(&self) -> Option<u16> {
        match *self {
            VlanMatch::Untagged => None,
            VlanMatch::Any => Some(1),
            VlanMatch::Vid(v) => Some(v),
            VlanMatch::Masked { value, mask } => {
                Some((u32::from(value) & (u32::from(mask) & VID_MASK)) as u16)
            }
        }
    }
}

impl fmt::Display for VlanMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VlanMatch::Vid(v) => write!(f, "{}", v),
            VlanMatch::Untagged => f.write_str("0"),
            VlanMatch::Any => f.write_str(VLAN_ANY_MASK),
            VlanMatch::Masked { value, mask } => write!(f, "{}/{}", value, mask),
        }
    }
}

impl FromStr for VlanMatch {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" | VLAN_ANY_MASK => return Ok(VlanMatch::Any),
            "untagged" | "0" => return Ok(VlanMatch::Untagged),
            _ => {}
        }

        if let Some((value, mask)) = s.split_once('/') {
            let value: u16 = value
                .parse()
                .map_err(|_| ParseError::InvalidTag(s.to_string()))?;
            let mask: u16 = mask
                .parse()
                .map_err(|_| ParseError::InvalidTag(s.to_string()))?;
            return Ok(VlanMatch::Masked { value, mask });
        }

        let vid: u16 = s.parse().map_err(|_| ParseError::InvalidTag(s.to_string()))?;
        vid_to_match(vid)
    }
}

fn vid_to_match(vid: u16) -> Result<VlanMatch, ParseError> {
    match vid {
        0 => Ok(VlanMatch::Untagged),
        1..=VLAN_MAX => Ok(VlanMatch::Vid(vid)),
        _ => Err(ParseError::InvalidTag(vid.to_string())),
    }
}

impl Serialize for VlanMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VlanMatch::Vid(v) => serializer.serialize_u16(*v),
            VlanMatch::Untagged => serializer.serialize_u16(0),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VlanMatchRepr {
    Int(u16),
    Text(String),
}

impl<'de> Deserialize<'de> for VlanMatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match VlanMatchRepr::deserialize(deserializer)? {
            VlanMatchRepr::Int(v) => vid_to_match(v).map_err(D::Error::custom),
            VlanMatchRepr::Text(s) => s.parse().map_err(D::Error::custom),
        }
    }
}

/// Expands an inclusive VLAN range into aligned value/mask blocks.
///
/// # Examples
///
/// ```
/// use eline_types::{range_masks, VlanMatch};
///
/// let masks = range_masks(100, 104);
/// assert_eq!(masks[0], VlanMatch::Masked { value: 100, mask: 4092 });
/// assert_eq!(masks[1], VlanMatch::Masked { value: 104, mask: 4095 });
/// ```
pub fn range_masks(start: u16, end: u16) -> Vec<VlanMatch> {
    let mut masks = Vec::new();
    let mut current = u32::from(start);
    let end = u32::from(end);

    while current <= end {
        let mut size: u32 = 1;
        while current % (size * 2) == 0 && current + size * 2 - 1 <= end {
            size *= 2;
        }
        masks.push(VlanMatch::Masked {
            value: current as u16,
            mask: (VID_MASK & !(size - 1)) as u16,
        });
        current += size;
    }
    masks
}

/// A list of inclusive VLAN ranges with its precomputed mask expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRange {
    ranges: Vec<[u16; 2]>,
    masks: Vec<VlanMatch>,
}

impl TagRange {
    /// Creates a tag range, validating every `[start, end]` pair.
    pub fn new(ranges: Vec<[u16; 2]>) -> Result<Self, ParseError> {
        if ranges.is_empty() {
            return Err(ParseError::InvalidTagRange("empty range list".to_string()));
        }
        for [start, end] in &ranges {
            if *start == 0 || *end > VLAN_MAX || start > end {
                return Err(ParseError::InvalidTagRange(format!("[{}, {}]", start, end)));
            }
        }
        let masks = ranges
            .iter()
            .flat_map(|[start, end]| range_masks(*start, *end))
            .collect();
        Ok(Self { ranges, masks })
    }

    /// Returns the configured ranges.
    pub fn ranges(&self) -> &[[u16; 2]] {
        &self.ranges
    }

    /// Returns the value/mask expansion used for flow matches.
    pub fn masks(&self) -> &[VlanMatch] {
        &self.masks
    }
}

/// Customer tag carried by a UNI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniTag {
    /// A single VLAN id.
    Vlan(u16),
    /// Untagged traffic only.
    Untagged,
    /// Any tagged traffic.
    Any,
    /// A list of VLAN ranges.
    Range(TagRange),
}

impl UniTag {
    /// Returns true if this is a tag range.
    pub const fn is_range(&self) -> bool {
        matches!(self, UniTag::Range(_))
    }

    /// Returns the single flow-match value, or `None` for ranges.
    pub fn vlan_match(&self) -> Option<VlanMatch> {
        match self {
            UniTag::Vlan(v) => Some(VlanMatch::Vid(*v)),
            UniTag::Untagged => Some(VlanMatch::Untagged),
            UniTag::Any => Some(VlanMatch::Any),
            UniTag::Range(_) => None,
        }
    }

    /// Returns every flow-match value this tag covers.
    pub fn vlan_matches(&self) -> Vec<VlanMatch> {
        match self {
            UniTag::Range(range) => range.masks().to_vec(),
            other => other.vlan_match().into_iter().collect(),
        }
    }
}

impl fmt::Display for UniTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniTag::Vlan(v) => write!(f, "{}", v),
            UniTag::Untagged => f.write_str("untagged"),
            UniTag::Any => f.write_str("any"),
            UniTag::Range(range) => {
                let parts: Vec<String> = range
                    .ranges()
                    .iter()
                    .map(|[s, e]| format!("{}-{}", s, e))
                    .collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TagValueRepr {
    Int(u16),
    Text(String),
    Ranges(Vec<[u16; 2]>),
}

#[derive(Serialize, Deserialize)]
struct UniTagRepr {
    #[serde(default)]
    tag_type: TagType,
    value: TagValueRepr,
}

impl Serialize for UniTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            UniTag::Vlan(v) => TagValueRepr::Int(*v),
            UniTag::Untagged => TagValueRepr::Text("untagged".to_string()),
            UniTag::Any => TagValueRepr::Text("any".to_string()),
            UniTag::Range(range) => TagValueRepr::Ranges(range.ranges().to_vec()),
        };
        UniTagRepr {
            tag_type: TagType::Vlan,
            value,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UniTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = UniTagRepr::deserialize(deserializer)?;
        match repr.value {
            TagValueRepr::Int(0) => Ok(UniTag::Untagged),
            TagValueRepr::Int(v) if v <= VLAN_MAX => Ok(UniTag::Vlan(v)),
            TagValueRepr::Int(v) => Err(D::Error::custom(ParseError::InvalidTag(v.to_string()))),
            TagValueRepr::Text(s) => match s.as_str() {
                "untagged" => Ok(UniTag::Untagged),
                "any" | VLAN_ANY_MASK => Ok(UniTag::Any),
                other => Err(D::Error::custom(ParseError::InvalidTag(other.to_string()))),
            },
            TagValueRepr::Ranges(ranges) => TagRange::new(ranges)
                .map(UniTag::Range)
                .map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vlan_match_serde() {
        assert_eq!(serde_json::to_string(&VlanMatch::Vid(100)).unwrap(), "100");
        assert_eq!(serde_json::to_string(&VlanMatch::Untagged).unwrap(), "0");
        assert_eq!(
            serde_json::to_string(&VlanMatch::Any).unwrap(),
            "\"4096/4096\""
        );
        let masked: VlanMatch = serde_json::from_str("\"100/4092\"").unwrap();
        assert_eq!(masked, VlanMatch::Masked { value: 100, mask: 4092 });
        let untagged: VlanMatch = serde_json::from_str("0").unwrap();
        assert_eq!(untagged, VlanMatch::Untagged);
    }

    #[test]
    fn test_trace_vlan_mapping() {
        assert_eq!(VlanMatch::Untagged.trace_vlan(), None);
        assert_eq!(VlanMatch::Any.trace_vlan(), Some(1));
        assert_eq!(VlanMatch::Vid(42).trace_vlan(), Some(42));
        assert_eq!(
            VlanMatch::Masked { value: 100, mask: 4092 }.trace_vlan(),
            Some(100)
        );
    }

    #[test]
    fn test_range_masks_single_value() {
        assert_eq!(
            range_masks(7, 7),
            vec![VlanMatch::Masked { value: 7, mask: 4095 }]
        );
    }

    #[test]
    fn test_range_masks_unaligned() {
        // 5 | 6-7 | 8-11 | 12
        assert_eq!(
            range_masks(5, 12),
            vec![
                VlanMatch::Masked { value: 5, mask: 4095 },
                VlanMatch::Masked { value: 6, mask: 4094 },
                VlanMatch::Masked { value: 8, mask: 4092 },
                VlanMatch::Masked { value: 12, mask: 4095 },
            ]
        );
    }

    #[test]
    fn test_tag_range_validation() {
        assert!(TagRange::new(vec![]).is_err());
        assert!(TagRange::new(vec![[0, 10]]).is_err());
        assert!(TagRange::new(vec![[20, 10]]).is_err());
        assert!(TagRange::new(vec![[1, 4096]]).is_err());
        assert!(TagRange::new(vec![[1, 10], [20, 30]]).is_ok());
    }

    #[test]
    fn test_uni_tag_deserialize_shapes() {
        let tag: UniTag = serde_json::from_str(r#"{"tag_type":"vlan","value":100}"#).unwrap();
        assert_eq!(tag, UniTag::Vlan(100));

        let tag: UniTag = serde_json::from_str(r#"{"tag_type":"vlan","value":0}"#).unwrap();
        assert_eq!(tag, UniTag::Untagged);

        let tag: UniTag = serde_json::from_str(r#"{"value":"4096/4096"}"#).unwrap();
        assert_eq!(tag, UniTag::Any);

        let tag: UniTag = serde_json::from_str(r#"{"value":[[10,12]]}"#).unwrap();
        assert!(tag.is_range());
        assert_eq!(tag.vlan_matches().len(), 2);
    }

    #[test]
    fn test_uni_tag_rejects_bad_values() {
        assert!(serde_json::from_str::<UniTag>(r#"{"value":5000}"#).is_err());
        assert!(serde_json::from_str::<UniTag>(r#"{"value":"some"}"#).is_err());
    }
}
