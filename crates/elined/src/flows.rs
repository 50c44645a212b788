//! Flow synthesis for circuits.
//!
//! Builds the OpenFlow-style flow entries that realise a circuit: direct
//! flows for intra-switch circuits, and UNI push/pop plus NNI swap flows for
//! circuits that cross links. Every flow of a circuit carries the circuit
//! cookie so it can be matched back to its owner.

use crate::error::InvalidPath;
use crate::path::Path;
use eline_types::{Dpid, InterfaceId, Link, Uni, VlanMatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mask selecting every cookie bit.
pub const COOKIE_MASK: u64 = u64::MAX;

/// Flows keyed by switch.
pub type SwitchFlows<T> = BTreeMap<Dpid, Vec<T>>;

/// VLAN header type pushed by a `push_vlan` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanHeader {
    /// Customer tag (0x8100).
    C,
    /// Service tag (0x88a8).
    S,
}

/// A flow action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum FlowAction {
    /// Forward out of a port.
    Output {
        /// Output port.
        port: u32,
    },
    /// Select an egress queue.
    SetQueue {
        /// Queue id.
        queue_id: u32,
    },
    /// Rewrite the outermost VLAN id.
    SetVlan {
        /// New VLAN id.
        vlan_id: u16,
    },
    /// Push a VLAN header.
    PushVlan {
        /// Header type.
        tag_type: VlanHeader,
    },
    /// Pop the outermost VLAN header.
    PopVlan,
}

/// Flow match fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    /// Ingress port.
    pub in_port: u32,
    /// VLAN match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dl_vlan: Option<VlanMatch>,
}

/// Table group a flow is installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableGroup {
    /// Untagged-UNI circuits.
    Epl,
    /// Tagged-UNI circuits.
    Evpl,
}

/// Table assignment per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableGroups {
    /// Table of EPL flows.
    pub epl: u8,
    /// Table of EVPL flows.
    pub evpl: u8,
}

impl TableGroups {
    /// Builds the assignment from a `group -> table` map; missing groups use table 0.
    pub fn from_map(map: &BTreeMap<String, u8>) -> Self {
        Self {
            epl: map.get("epl").copied().unwrap_or_default(),
            evpl: map.get("evpl").copied().unwrap_or_default(),
        }
    }

    /// Table of a group.
    pub fn table(&self, group: TableGroup) -> u8 {
        match group {
            TableGroup::Epl => self.epl,
            TableGroup::Evpl => self.evpl,
        }
    }
}

/// A flow to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMod {
    /// Match fields.
    #[serde(rename = "match")]
    pub flow_match: FlowMatch,
    /// Circuit cookie.
    pub cookie: u64,
    /// Actions, in order.
    pub actions: Vec<FlowAction>,
    /// Flow owner.
    pub owner: String,
    /// Table group.
    pub table_group: TableGroup,
    /// Table id.
    pub table_id: u8,
    /// Priority.
    pub priority: u16,
}

impl FlowMod {
    /// The deletion entry removing exactly this flow.
    pub fn deletion(&self) -> FlowDeletion {
        FlowDeletion {
            cookie: self.cookie,
            cookie_mask: COOKIE_MASK,
            flow_match: Some(self.flow_match),
            owner: self.owner.clone(),
        }
    }

    fn prepend(&mut self, action: FlowAction) {
        self.actions.insert(0, action);
    }
}

/// A flow deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDeletion {
    /// Cookie to match.
    pub cookie: u64,
    /// Cookie mask.
    pub cookie_mask: u64,
    /// Optional match narrowing the deletion.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub flow_match: Option<FlowMatch>,
    /// Flow owner.
    pub owner: String,
}

/// Converts flows into their matching deletions.
pub fn deletions(flows: &SwitchFlows<FlowMod>) -> SwitchFlows<FlowDeletion> {
    flows
        .iter()
        .map(|(dpid, mods)| (*dpid, mods.iter().map(FlowMod::deletion).collect()))
        .collect()
}

/// Appends `other` into `target`, switch by switch.
pub fn merge_flows<T>(target: &mut SwitchFlows<T>, other: SwitchFlows<T>) {
    for (dpid, mut flows) in other {
        target.entry(dpid).or_default().append(&mut flows);
    }
}

/// Total number of flows.
pub fn flow_count<T>(flows: &SwitchFlows<T>) -> usize {
    flows.values().map(Vec::len).sum()
}

/// Builds the circuit cookie: the circuit id in the low 56 bits and `prefix`
/// in the high byte. Returns `None` if `id` is not hexadecimal.
pub fn evc_cookie(id: &str, prefix: u8) -> Option<u64> {
    let value = u64::from_str_radix(id, 16).ok()?;
    Some(value | (u64::from(prefix) << 56))
}

/// Recovers the 14-character circuit id from a cookie.
pub fn id_from_cookie(cookie: u64, prefix: u8) -> String {
    format!("{:014x}", cookie & !(u64::from(prefix) << 56))
}

/// Owner, priorities and table groups applied to every flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    /// Owner name.
    pub owner: String,
    /// EPL priority.
    pub epl_priority: u16,
    /// EVPL priority.
    pub evpl_priority: u16,
    /// "Any tagged" priority.
    pub any_priority: u16,
    /// "Untagged only" priority.
    pub untagged_priority: u16,
    /// Table assignment.
    pub table_groups: TableGroups,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            owner: "mef_eline".to_string(),
            epl_priority: 10000,
            evpl_priority: 20000,
            any_priority: 15000,
            untagged_priority: 20000,
            table_groups: TableGroups::default(),
        }
    }
}

impl FlowSettings {
    /// Priority for a flow matching `vlan`.
    pub fn priority(&self, vlan: Option<VlanMatch>) -> u16 {
        match vlan {
            None => self.epl_priority,
            Some(VlanMatch::Any) => self.any_priority,
            Some(VlanMatch::Untagged) => self.untagged_priority,
            Some(_) => self.evpl_priority,
        }
    }
}

type VlanPairs = Vec<(Option<VlanMatch>, Option<VlanMatch>)>;

/// A VLAN value that can be written into a header.
fn is_concrete(vlan: Option<VlanMatch>) -> bool {
    matches!(vlan, Some(v) if !v.is_special())
}

/// Absent or untagged.
fn is_falsy(vlan: Option<VlanMatch>) -> bool {
    matches!(vlan, None | Some(VlanMatch::Untagged))
}

fn set_vlan_value(vlan: VlanMatch) -> Option<u16> {
    match vlan {
        VlanMatch::Vid(v) => Some(v),
        VlanMatch::Masked { value, .. } => Some(value),
        VlanMatch::Untagged | VlanMatch::Any => None,
    }
}

/// Produces the flows of one circuit.
#[derive(Debug)]
pub struct FlowSynthesizer<'a> {
    uni_a: &'a Uni,
    uni_z: &'a Uni,
    cookie: u64,
    queue_id: Option<u32>,
    sb_priority: Option<u16>,
    settings: &'a FlowSettings,
}

impl<'a> FlowSynthesizer<'a> {
    /// Creates a synthesizer for a circuit.
    pub fn new(
        uni_a: &'a Uni,
        uni_z: &'a Uni,
        cookie: u64,
        queue_id: Option<u32>,
        sb_priority: Option<u16>,
        settings: &'a FlowSettings,
    ) -> Self {
        Self {
            uni_a,
            uni_z,
            cookie,
            queue_id,
            sb_priority,
            settings,
        }
    }

    /// Base flow: optional queue then output, with table and priority set.
    fn flow_mod(&self, in_port: u32, out_port: u32, vlan: Option<VlanMatch>) -> FlowMod {
        let table_group = match vlan {
            None => TableGroup::Epl,
            Some(_) => TableGroup::Evpl,
        };
        let mut actions = Vec::with_capacity(4);
        if let Some(queue_id) = self.queue_id {
            actions.push(FlowAction::SetQueue { queue_id });
        }
        actions.push(FlowAction::Output { port: out_port });

        FlowMod {
            flow_match: FlowMatch {
                in_port,
                dl_vlan: vlan,
            },
            cookie: self.cookie,
            actions,
            owner: self.settings.owner.clone(),
            table_group,
            table_id: self.settings.table_groups.table(table_group),
            priority: self
                .sb_priority
                .unwrap_or_else(|| self.settings.priority(vlan)),
        }
    }

    /// Flows of an intra-switch circuit, all on the UNI A switch.
    pub fn direct_flows(&self) -> SwitchFlows<FlowMod> {
        let mut flows = Vec::new();
        let (port_a, port_z) = (self.uni_a.port(), self.uni_z.port());

        if self.uni_a.has_tag_range() && self.uni_z.has_tag_range() {
            for (mask_a, mask_z) in self.uni_a.masks().into_iter().zip(self.uni_z.masks()) {
                flows.push(self.flow_mod(port_a, port_z, Some(mask_a)));
                flows.push(self.flow_mod(port_z, port_a, Some(mask_z)));
            }
            return BTreeMap::from([(self.uni_a.dpid(), flows)]);
        }

        let vlan_a = self.uni_a.vlan();
        let vlan_z = self.uni_z.vlan();
        let mut a_to_z = self.flow_mod(port_a, port_z, vlan_a);
        let mut z_to_a = self.flow_mod(port_z, port_a, vlan_z);

        if let Some(vlan) = vlan_z.filter(|_| is_concrete(vlan_z)).and_then(set_vlan_value) {
            a_to_z.prepend(FlowAction::SetVlan { vlan_id: vlan });
            if is_falsy(vlan_a) {
                a_to_z.prepend(FlowAction::PushVlan {
                    tag_type: VlanHeader::C,
                });
            }
            if vlan_a == Some(VlanMatch::Untagged) {
                z_to_a.prepend(FlowAction::PopVlan);
            }
        } else if vlan_a == Some(VlanMatch::Untagged) && vlan_z == Some(VlanMatch::Any) {
            z_to_a.prepend(FlowAction::PopVlan);
        }

        if let Some(vlan) = vlan_a.filter(|_| is_concrete(vlan_a)).and_then(set_vlan_value) {
            z_to_a.prepend(FlowAction::SetVlan { vlan_id: vlan });
            if is_falsy(vlan_z) {
                z_to_a.prepend(FlowAction::PushVlan {
                    tag_type: VlanHeader::C,
                });
            }
            if vlan_z == Some(VlanMatch::Untagged) {
                a_to_z.prepend(FlowAction::PopVlan);
            }
        } else if vlan_a == Some(VlanMatch::Any) && vlan_z == Some(VlanMatch::Untagged) {
            a_to_z.prepend(FlowAction::PopVlan);
        }

        flows.push(a_to_z);
        flows.push(z_to_a);
        BTreeMap::from([(self.uni_a.dpid(), flows)])
    }

    /// Ingress flow at a UNI: push the service tag, rewriting the customer
    /// tag towards the far UNI when needed.
    ///
    /// `new_c_vlan` is the far UNI's single tag; range UNIs pass `None`
    /// together with a masked `in_vlan`, which leaves the customer tag as is.
    pub fn push_flow(
        &self,
        in_iface: InterfaceId,
        out_iface: InterfaceId,
        in_vlan: Option<VlanMatch>,
        s_vlan: u16,
        new_c_vlan: Option<VlanMatch>,
    ) -> FlowMod {
        let mut flow = self.flow_mod(in_iface.port(), out_iface.port(), in_vlan);
        flow.prepend(FlowAction::SetVlan { vlan_id: s_vlan });
        flow.prepend(FlowAction::PushVlan {
            tag_type: VlanHeader::S,
        });

        if is_concrete(new_c_vlan) && in_vlan != new_c_vlan {
            if let Some(vlan) = new_c_vlan.and_then(set_vlan_value) {
                flow.prepend(FlowAction::SetVlan { vlan_id: vlan });
            }
        }

        let far_untagged = new_c_vlan == Some(VlanMatch::Untagged);
        if is_concrete(in_vlan) && far_untagged {
            flow.prepend(FlowAction::PopVlan);
        } else if in_vlan == Some(VlanMatch::Any) && far_untagged {
            flow.prepend(FlowAction::PopVlan);
        } else if is_falsy(in_vlan) && is_concrete(new_c_vlan) {
            flow.prepend(FlowAction::PushVlan {
                tag_type: VlanHeader::C,
            });
        }
        flow
    }

    /// Egress flow at a UNI: match the service tag and pop it.
    pub fn pop_flow(&self, in_iface: InterfaceId, out_iface: InterfaceId, s_vlan: u16) -> FlowMod {
        let mut flow = self.flow_mod(in_iface.port(), out_iface.port(), Some(VlanMatch::Vid(s_vlan)));
        flow.prepend(FlowAction::PopVlan);
        flow
    }

    /// Transit flow: match one service tag and swap it for another.
    pub fn nni_flow(
        &self,
        in_iface: InterfaceId,
        out_iface: InterfaceId,
        in_vlan: u16,
        out_vlan: u16,
    ) -> FlowMod {
        let mut flow = self.flow_mod(in_iface.port(), out_iface.port(), Some(VlanMatch::Vid(in_vlan)));
        flow.prepend(FlowAction::SetVlan { vlan_id: out_vlan });
        flow
    }

    /// Transit flows for every intermediate switch, both directions.
    pub fn nni_flows(&self, path: &Path) -> Result<SwitchFlows<FlowMod>, InvalidPath> {
        let mut flows: SwitchFlows<FlowMod> = BTreeMap::new();
        let mut previous = self.uni_a.dpid();

        for pair in path.links().windows(2) {
            let (incoming, outgoing) = (&pair[0], &pair[1]);
            let in_endpoint = incoming.endpoint_off(previous);
            let out_endpoint = outgoing
                .endpoint_on(in_endpoint.dpid())
                .unwrap_or_else(|| outgoing.endpoint_b());
            let in_vlan = s_vlan_of(incoming)?;
            let out_vlan = s_vlan_of(outgoing)?;

            let switch_flows = flows.entry(in_endpoint.dpid()).or_default();
            switch_flows.push(self.nni_flow(in_endpoint, out_endpoint, in_vlan, out_vlan));
            switch_flows.push(self.nni_flow(out_endpoint, in_endpoint, out_vlan, in_vlan));
            previous = in_endpoint.dpid();
        }
        Ok(flows)
    }

    /// Ingress (push) and egress (pop) flows on both UNI switches.
    ///
    /// `skip_in` omits the push flows, `skip_out` omits the pop flows.
    pub fn uni_flows(
        &self,
        path: &Path,
        skip_in: bool,
        skip_out: bool,
    ) -> Result<SwitchFlows<FlowMod>, InvalidPath> {
        let mut flows: SwitchFlows<FlowMod> = BTreeMap::new();
        let (Some(first), Some(last)) = (path.links().first(), path.links().last()) else {
            return Ok(flows);
        };

        let endpoint_a = first
            .endpoint_on(self.uni_a.dpid())
            .unwrap_or_else(|| first.endpoint_b());
        let endpoint_z = last
            .endpoint_on(self.uni_z.dpid())
            .unwrap_or_else(|| last.endpoint_b());
        let s_vlan_a = s_vlan_of(first)?;
        let s_vlan_z = s_vlan_of(last)?;
        let (iface_a, iface_z) = (self.uni_a.interface_id, self.uni_z.interface_id);

        if !skip_in {
            let (ins_a, ins_z) = self.ingress_pairs();
            let flows_a = flows.entry(self.uni_a.dpid()).or_default();
            for (in_vlan, far_vlan) in &ins_a {
                flows_a.push(self.push_flow(iface_a, endpoint_a, *in_vlan, s_vlan_a, *far_vlan));
            }
            let flows_z = flows.entry(self.uni_z.dpid()).or_default();
            for (in_vlan, far_vlan) in &ins_z {
                flows_z.push(self.push_flow(iface_z, endpoint_z, *in_vlan, s_vlan_z, *far_vlan));
            }
        }

        if !skip_out {
            flows
                .entry(self.uni_a.dpid())
                .or_default()
                .push(self.pop_flow(endpoint_a, iface_a, s_vlan_a));
            flows
                .entry(self.uni_z.dpid())
                .or_default()
                .push(self.pop_flow(endpoint_z, iface_z, s_vlan_z));
        }
        Ok(flows)
    }

    /// `(in_vlan, far_vlan)` pairs of the push flows at each side.
    fn ingress_pairs(&self) -> (VlanPairs, VlanPairs) {
        if self.uni_a.has_tag_range() && self.uni_z.has_tag_range() {
            let a = self.uni_a.masks().into_iter().map(|m| (Some(m), None)).collect();
            let z = self.uni_z.masks().into_iter().map(|m| (Some(m), None)).collect();
            return (a, z);
        }
        let (vlan_a, vlan_z) = (self.uni_a.vlan(), self.uni_z.vlan());
        (vec![(vlan_a, vlan_z)], vec![(vlan_z, vlan_a)])
    }

    /// All flows realising the circuit over `path`.
    pub fn path_flows(
        &self,
        path: &Path,
        skip_in: bool,
        skip_out: bool,
    ) -> Result<SwitchFlows<FlowMod>, InvalidPath> {
        let mut flows = self.nni_flows(path)?;
        merge_flows(&mut flows, self.uni_flows(path, skip_in, skip_out)?);
        Ok(flows)
    }
}

fn s_vlan_of(link: &Link) -> Result<u16, InvalidPath> {
    link.s_vlan()
        .ok_or_else(|| InvalidPath::new(format!("{} has no s_vlan assigned", link)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eline_types::{Tag, TagRange, UniTag};
    use pretty_assertions::assert_eq;

    const PREFIX: u8 = 0xAA;

    fn iface(dpid: u64, port: u32) -> InterfaceId {
        InterfaceId::new(Dpid::new(dpid), port)
    }

    fn uni(dpid: u64, port: u32, tag: Option<UniTag>) -> Uni {
        Uni::new(iface(dpid, port), tag)
    }

    fn tagged_link(a: InterfaceId, b: InterfaceId, vlan: u16) -> Link {
        let mut link = Link::new(a, b);
        link.set_s_vlan(Tag::vlan(vlan));
        link
    }

    const POP: FlowAction = FlowAction::PopVlan;
    const PUSH_C: FlowAction = FlowAction::PushVlan {
        tag_type: VlanHeader::C,
    };

    fn set(vlan_id: u16) -> FlowAction {
        FlowAction::SetVlan { vlan_id }
    }

    fn out(port: u32) -> FlowAction {
        FlowAction::Output { port }
    }

    #[test]
    fn test_cookie_round_trip_keeps_leading_zeros() {
        let id = "0000000000abcd";
        let cookie = evc_cookie(id, PREFIX).unwrap();
        assert_eq!(cookie >> 56, 0xAA);
        assert_eq!(id_from_cookie(cookie, PREFIX), id);
    }

    #[test]
    fn test_cookie_rejects_non_hex() {
        assert_eq!(evc_cookie("not-hex", PREFIX), None);
    }

    #[test]
    fn test_priority_classes() {
        let settings = FlowSettings::default();
        assert_eq!(settings.priority(None), 10000);
        assert_eq!(settings.priority(Some(VlanMatch::Any)), 15000);
        assert_eq!(settings.priority(Some(VlanMatch::Untagged)), 20000);
        assert_eq!(settings.priority(Some(VlanMatch::Vid(5))), 20000);
    }

    #[test]
    fn test_sb_priority_overrides() {
        let settings = FlowSettings::default();
        let a = uni(1, 1, None);
        let z = uni(1, 2, None);
        let synth = FlowSynthesizer::new(&a, &z, 1, Some(3), Some(123), &settings);
        let flows = synth.direct_flows();
        let flow = &flows[&Dpid::new(1)][0];
        assert_eq!(flow.priority, 123);
        assert_eq!(flow.table_group, TableGroup::Epl);
        assert_eq!(
            flow.actions,
            vec![FlowAction::SetQueue { queue_id: 3 }, out(2)]
        );
    }

    #[test]
    fn test_direct_flow_table() {
        let untagged = Some(UniTag::Untagged);
        let any = Some(UniTag::Any);
        let vid = |v| Some(UniTag::Vlan(v));
        // (uni_a tag, uni_z tag, a->z actions, z->a actions); uni_a uses
        // vlan 100 and uni_z vlan 50 when tagged with a single VLAN.
        let table: Vec<(Option<UniTag>, Option<UniTag>, Vec<FlowAction>, Vec<FlowAction>)> = vec![
            (None, None, vec![out(2)], vec![out(1)]),
            (None, untagged.clone(), vec![out(2)], vec![out(1)]),
            (None, any.clone(), vec![out(2)], vec![out(1)]),
            (None, vid(50), vec![PUSH_C, set(50), out(2)], vec![out(1)]),
            (untagged.clone(), None, vec![out(2)], vec![out(1)]),
            (untagged.clone(), untagged.clone(), vec![out(2)], vec![out(1)]),
            (untagged.clone(), any.clone(), vec![out(2)], vec![POP, out(1)]),
            (untagged.clone(), vid(50), vec![PUSH_C, set(50), out(2)], vec![POP, out(1)]),
            (any.clone(), None, vec![out(2)], vec![out(1)]),
            (any.clone(), untagged.clone(), vec![POP, out(2)], vec![out(1)]),
            (any.clone(), any.clone(), vec![out(2)], vec![out(1)]),
            (any.clone(), vid(50), vec![set(50), out(2)], vec![out(1)]),
            (vid(100), None, vec![out(2)], vec![PUSH_C, set(100), out(1)]),
            (vid(100), untagged.clone(), vec![POP, out(2)], vec![PUSH_C, set(100), out(1)]),
            (vid(100), any.clone(), vec![out(2)], vec![set(100), out(1)]),
            (vid(100), vid(50), vec![set(50), out(2)], vec![set(100), out(1)]),
        ];
        assert_eq!(table.len(), 16);

        let settings = FlowSettings::default();
        for (tag_a, tag_z, a_to_z, z_to_a) in table {
            let case = format!("{:?} / {:?}", tag_a, tag_z);
            let a = uni(1, 1, tag_a);
            let z = uni(1, 2, tag_z);
            let flows = FlowSynthesizer::new(&a, &z, 1, None, None, &settings).direct_flows();
            let flows = &flows[&Dpid::new(1)];
            assert_eq!(flows.len(), 2, "{case}");

            assert_eq!(flows[0].flow_match.in_port, 1, "{case}");
            assert_eq!(flows[0].flow_match.dl_vlan, a.vlan(), "{case}");
            assert_eq!(flows[0].actions, a_to_z, "{case}");
            assert_eq!(flows[0].priority, settings.priority(a.vlan()), "{case}");

            assert_eq!(flows[1].flow_match.in_port, 2, "{case}");
            assert_eq!(flows[1].flow_match.dl_vlan, z.vlan(), "{case}");
            assert_eq!(flows[1].actions, z_to_a, "{case}");
            assert_eq!(flows[1].priority, settings.priority(z.vlan()), "{case}");
        }
    }

    #[test]
    fn test_direct_matches() {
        let settings = FlowSettings::default();
        let a = uni(1, 1, Some(UniTag::Vlan(100)));
        let z = uni(1, 2, None);
        let flows = FlowSynthesizer::new(&a, &z, 9, None, None, &settings).direct_flows();
        let flows = &flows[&Dpid::new(1)];
        assert_eq!(
            flows[0].flow_match,
            FlowMatch {
                in_port: 1,
                dl_vlan: Some(VlanMatch::Vid(100))
            }
        );
        assert_eq!(flows[1].flow_match.dl_vlan, None);
        assert_eq!(flows[0].table_group, TableGroup::Evpl);
        assert_eq!(flows[1].table_group, TableGroup::Epl);
    }

    #[test]
    fn test_direct_ranges_pair_masks() {
        let range = || Some(UniTag::Range(TagRange::new(vec![[10, 11]]).unwrap()));
        let settings = FlowSettings::default();
        let a = uni(1, 1, range());
        let z = uni(1, 2, range());
        let flows = FlowSynthesizer::new(&a, &z, 9, None, None, &settings).direct_flows();
        let flows = &flows[&Dpid::new(1)];
        assert_eq!(flows.len(), 2);
        assert_eq!(
            flows[0].flow_match.dl_vlan,
            Some(VlanMatch::Masked { value: 10, mask: 4094 })
        );
        assert_eq!(flows[0].actions, vec![out(2)]);
        assert_eq!(flows[1].flow_match.in_port, 2);
    }

    #[test]
    fn test_push_flow_variants() {
        let settings = FlowSettings::default();
        let a = uni(1, 1, None);
        let z = uni(2, 1, None);
        let synth = FlowSynthesizer::new(&a, &z, 1, None, None, &settings);
        let push_s = FlowAction::PushVlan {
            tag_type: VlanHeader::S,
        };

        let flow = synth.push_flow(iface(1, 1), iface(1, 2), Some(VlanMatch::Vid(100)), 5, Some(VlanMatch::Vid(200)));
        assert_eq!(flow.actions, vec![set(200), push_s, set(5), out(2)]);

        let flow = synth.push_flow(iface(1, 1), iface(1, 2), Some(VlanMatch::Vid(100)), 5, Some(VlanMatch::Vid(100)));
        assert_eq!(flow.actions, vec![push_s, set(5), out(2)]);

        let flow = synth.push_flow(iface(1, 1), iface(1, 2), Some(VlanMatch::Vid(100)), 5, Some(VlanMatch::Untagged));
        assert_eq!(flow.actions, vec![POP, push_s, set(5), out(2)]);

        let flow = synth.push_flow(iface(1, 1), iface(1, 2), None, 5, Some(VlanMatch::Vid(30)));
        assert_eq!(flow.actions, vec![PUSH_C, set(30), push_s, set(5), out(2)]);
        assert_eq!(flow.flow_match.dl_vlan, None);

        let flow = synth.push_flow(iface(1, 1), iface(1, 2), Some(VlanMatch::Any), 5, Some(VlanMatch::Untagged));
        assert_eq!(flow.actions, vec![POP, push_s, set(5), out(2)]);
        assert_eq!(flow.priority, 15000);
    }

    /// UNI A on 1:1, UNI Z on 3:1, path 1:2-2:2 (s_vlan 5), 2:3-3:2 (s_vlan 6).
    fn two_hop() -> (Uni, Uni, Path) {
        let a = uni(1, 1, Some(UniTag::Vlan(100)));
        let z = uni(3, 1, Some(UniTag::Vlan(100)));
        let path = Path::new(vec![
            tagged_link(iface(1, 2), iface(2, 2), 5),
            tagged_link(iface(3, 2), iface(2, 3), 6),
        ]);
        (a, z, path)
    }

    #[test]
    fn test_nni_flows_swap_service_tags() {
        let (a, z, path) = two_hop();
        let settings = FlowSettings::default();
        let synth = FlowSynthesizer::new(&a, &z, 7, None, None, &settings);
        let flows = synth.nni_flows(&path).unwrap();
        assert_eq!(flows.len(), 1);
        let transit = &flows[&Dpid::new(2)];
        assert_eq!(transit[0].flow_match, FlowMatch { in_port: 2, dl_vlan: Some(VlanMatch::Vid(5)) });
        assert_eq!(transit[0].actions, vec![set(6), out(3)]);
        assert_eq!(transit[1].flow_match, FlowMatch { in_port: 3, dl_vlan: Some(VlanMatch::Vid(6)) });
        assert_eq!(transit[1].actions, vec![set(5), out(2)]);
    }

    #[test]
    fn test_uni_flows_and_skips() {
        let (a, z, path) = two_hop();
        let settings = FlowSettings::default();
        let synth = FlowSynthesizer::new(&a, &z, 7, None, None, &settings);

        let flows = synth.uni_flows(&path, false, false).unwrap();
        let at_a = &flows[&Dpid::new(1)];
        assert_eq!(at_a.len(), 2);
        assert_eq!(at_a[0].flow_match, FlowMatch { in_port: 1, dl_vlan: Some(VlanMatch::Vid(100)) });
        assert_eq!(at_a[1].flow_match, FlowMatch { in_port: 2, dl_vlan: Some(VlanMatch::Vid(5)) });
        assert_eq!(at_a[1].actions, vec![POP, out(1)]);
        let at_z = &flows[&Dpid::new(3)];
        assert_eq!(at_z[1].flow_match, FlowMatch { in_port: 2, dl_vlan: Some(VlanMatch::Vid(6)) });

        let ingress_only = synth.uni_flows(&path, false, true).unwrap();
        assert_eq!(flow_count(&ingress_only), 2);
        let egress_only = synth.uni_flows(&path, true, false).unwrap();
        assert!(egress_only
            .values()
            .flatten()
            .all(|flow| flow.actions[0] == POP));
    }

    #[test]
    fn test_path_flows_share_cookie() {
        let (a, z, path) = two_hop();
        let settings = FlowSettings::default();
        let cookie = evc_cookie("00000000000001", PREFIX).unwrap();
        let synth = FlowSynthesizer::new(&a, &z, cookie, None, None, &settings);
        let flows = synth.path_flows(&path, false, false).unwrap();
        assert_eq!(flow_count(&flows), 6);
        assert!(flows.values().flatten().all(|flow| flow.cookie == cookie));
    }

    #[test]
    fn test_path_flows_require_s_vlan() {
        let a = uni(1, 1, None);
        let z = uni(2, 1, None);
        let path = Path::new(vec![Link::new(iface(1, 2), iface(2, 2))]);
        let settings = FlowSettings::default();
        let synth = FlowSynthesizer::new(&a, &z, 1, None, None, &settings);
        assert!(synth.path_flows(&path, false, false).is_err());
    }

    #[test]
    fn test_range_uni_flows_one_push_per_mask() {
        let range = || Some(UniTag::Range(TagRange::new(vec![[10, 12]]).unwrap()));
        let a = uni(1, 1, range());
        let z = uni(2, 1, range());
        let path = Path::new(vec![tagged_link(iface(1, 2), iface(2, 2), 9)]);
        let settings = FlowSettings::default();
        let synth = FlowSynthesizer::new(&a, &z, 1, None, None, &settings);
        let flows = synth.uni_flows(&path, false, true).unwrap();
        let at_a = &flows[&Dpid::new(1)];
        assert_eq!(at_a.len(), 2);
        assert_eq!(
            at_a[0].actions,
            vec![FlowAction::PushVlan { tag_type: VlanHeader::S }, set(9), out(2)]
        );
    }

    #[test]
    fn test_deletions_keep_match() {
        let (a, z, path) = two_hop();
        let settings = FlowSettings::default();
        let synth = FlowSynthesizer::new(&a, &z, 7, None, None, &settings);
        let flows = synth.path_flows(&path, false, false).unwrap();
        let dels = deletions(&flows);
        let first = &dels[&Dpid::new(1)][0];
        assert_eq!(first.cookie_mask, COOKIE_MASK);
        assert_eq!(first.flow_match, Some(flows[&Dpid::new(1)][0].flow_match));
    }

    #[test]
    fn test_flow_mod_serialization() {
        let settings = FlowSettings::default();
        let a = uni(1, 1, Some(UniTag::Any));
        let z = uni(1, 2, Some(UniTag::Vlan(10)));
        let flows = FlowSynthesizer::new(&a, &z, 1, None, None, &settings).direct_flows();
        let value = serde_json::to_value(&flows[&Dpid::new(1)][0]).unwrap();
        assert_eq!(value["match"]["dl_vlan"], "4096/4096");
        assert_eq!(value["actions"][0]["action_type"], "set_vlan");
        assert_eq!(value["actions"][0]["vlan_id"], 10);
        assert_eq!(value["table_group"], "evpl");
    }
}
