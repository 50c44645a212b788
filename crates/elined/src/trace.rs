//! Comparison of control-plane traces against the installed path.
//!
//! Every circuit is probed from both UNIs, once per tag (once per mask for
//! tag ranges). A probe from UNI A must enter every switch of the current
//! path on the expected port and transport VLAN and leave through UNI Z with
//! the tag UNI Z expects; the probe from UNI Z walks the path backwards.

use crate::clients::{TraceHop, TraceRequest};
use crate::evc::Evc;
use crate::path::Path;
use eline_types::{InterfaceId, Uni, VlanMatch};
use serde_json::Value;
use tracing::debug;

/// Probe VLANs as `(from uni_a, from uni_z)` pairs.
pub fn probe_vlans(uni_a: &Uni, uni_z: &Uni) -> Vec<(Option<u16>, Option<u16>)> {
    if uni_a.has_tag_range() {
        return uni_a
            .masks()
            .iter()
            .zip(uni_z.masks().iter())
            .map(|(a, z)| (a.trace_vlan(), z.trace_vlan()))
            .collect();
    }
    vec![(
        uni_a.vlan().and_then(|vlan| vlan.trace_vlan()),
        uni_z.vlan().and_then(|vlan| vlan.trace_vlan()),
    )]
}

/// Trace requests of a circuit, two per probe pair.
pub fn trace_requests(evc: &Evc) -> Vec<TraceRequest> {
    let (uni_a, uni_z) = (evc.uni_a(), evc.uni_z());
    probe_vlans(uni_a, uni_z)
        .into_iter()
        .flat_map(|(vlan_a, vlan_z)| {
            [
                TraceRequest::new(uni_a.interface_id, vlan_a),
                TraceRequest::new(uni_z.interface_id, vlan_z),
            ]
        })
        .collect()
}

/// VLAN a probe carries when it leaves through `egress`.
fn expected_out_vlan(egress: &Uni, probe: Option<u16>) -> Option<u16> {
    match egress.vlan() {
        Some(VlanMatch::Vid(vlan)) => Some(vlan),
        Some(VlanMatch::Untagged) => None,
        _ => probe,
    }
}

fn hop_at(hop: &TraceHop, iface: InterfaceId, vlan: Option<u16>) -> bool {
    hop.dpid == iface.dpid()
        && hop.port == iface.port()
        && (hop.vlan.is_none() || hop.vlan == vlan)
}

fn leaves_through(hop: &TraceHop, egress: &Uni, vlan: Option<u16>) -> bool {
    let Some(out) = hop.out.as_ref() else {
        return false;
    };
    let port = out.get("port").and_then(Value::as_u64);
    let out_vlan = out
        .get("vlan")
        .and_then(Value::as_u64)
        .and_then(|vlan| u16::try_from(vlan).ok());
    hop.dpid == egress.dpid() && port == Some(u64::from(egress.port())) && out_vlan == vlan
}

/// Checks the traces of one probe pair against `path`.
pub fn check_trace(
    uni_a: &Uni,
    uni_z: &Uni,
    path: &Path,
    probes: (Option<u16>, Option<u16>),
    trace_a: &[TraceHop],
    trace_z: &[TraceHop],
) -> bool {
    let hops = path.len() + 1;
    if trace_a.len() != hops || trace_z.len() != hops {
        debug!(
            expected = hops,
            from_a = trace_a.len(),
            from_z = trace_z.len(),
            "Trace length mismatch"
        );
        return false;
    }
    if !hop_at(&trace_a[0], uni_a.interface_id, probes.0)
        || !hop_at(&trace_z[0], uni_z.interface_id, probes.1)
    {
        return false;
    }

    let mut switch = uni_a.dpid();
    for (index, link) in path.iter().enumerate() {
        let Some(near) = link.endpoint_on(switch) else {
            return false;
        };
        let far = link.endpoint_off(switch);
        let s_vlan = link.s_vlan();
        if !hop_at(&trace_a[index + 1], far, s_vlan)
            || !hop_at(&trace_z[hops - 1 - index], near, s_vlan)
        {
            debug!(link = %link, "Trace diverges from path");
            return false;
        }
        switch = far.dpid();
    }

    leaves_through(&trace_a[hops - 1], uni_z, expected_out_vlan(uni_z, probes.0))
        && leaves_through(&trace_z[hops - 1], uni_a, expected_out_vlan(uni_a, probes.1))
}

/// Checks every trace of a circuit, in the order of [`trace_requests`].
pub fn check_traces(evc: &Evc, traces: &[Vec<TraceHop>]) -> bool {
    let (uni_a, uni_z) = (evc.uni_a(), evc.uni_z());
    let probes = probe_vlans(uni_a, uni_z);
    if traces.len() != probes.len() * 2 {
        return false;
    }
    probes
        .into_iter()
        .zip(traces.chunks(2))
        .all(|(pair, chunk)| {
            check_trace(uni_a, uni_z, evc.current_path(), pair, &chunk[0], &chunk[1])
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{iface, link, uni_vlan};
    use eline_types::{Dpid, TagRange, UniTag};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn hop(dpid: u64, port: u32, vlan: Option<u16>) -> TraceHop {
        TraceHop::new(Dpid::new(dpid), port, vlan)
    }

    fn last(dpid: u64, port: u32, vlan: Option<u16>, out_port: u32, out_vlan: u16) -> TraceHop {
        let mut hop = hop(dpid, port, vlan);
        hop.out = Some(json!({"port": out_port, "vlan": out_vlan}));
        hop
    }

    /// Primary path s1-s2-s3 with transport VLANs 5 and 6.
    fn path() -> Path {
        let mut first = link((1, 2), (2, 2));
        let mut second = link((2, 3), (3, 2));
        first.set_s_vlan(eline_types::Tag::vlan(5));
        second.set_s_vlan(eline_types::Tag::vlan(6));
        Path::new(vec![first, second])
    }

    fn traces() -> (Vec<TraceHop>, Vec<TraceHop>) {
        let from_a = vec![
            hop(1, 1, Some(100)),
            hop(2, 2, Some(5)),
            last(3, 2, Some(6), 1, 100),
        ];
        let from_z = vec![
            hop(3, 1, Some(100)),
            hop(2, 3, Some(6)),
            last(1, 2, Some(5), 1, 100),
        ];
        (from_a, from_z)
    }

    #[test]
    fn test_probe_vlans() {
        let a = uni_vlan(1, 1, 100);
        let z = Uni::new(iface(3, 1), Some(UniTag::Untagged));
        assert_eq!(probe_vlans(&a, &z), vec![(Some(100), None)]);

        let range = TagRange::new(vec![[10, 11]]).unwrap();
        let a = Uni::new(iface(1, 1), Some(UniTag::Range(range.clone())));
        let z = Uni::new(iface(3, 1), Some(UniTag::Range(range)));
        assert_eq!(probe_vlans(&a, &z), vec![(Some(10), Some(10))]);
    }

    #[test]
    fn test_matching_trace() {
        let (from_a, from_z) = traces();
        assert!(check_trace(
            &uni_vlan(1, 1, 100),
            &uni_vlan(3, 1, 100),
            &path(),
            (Some(100), Some(100)),
            &from_a,
            &from_z,
        ));
    }

    #[test]
    fn test_wrong_transport_vlan() {
        let (mut from_a, from_z) = traces();
        from_a[1].vlan = Some(7);
        assert!(!check_trace(
            &uni_vlan(1, 1, 100),
            &uni_vlan(3, 1, 100),
            &path(),
            (Some(100), Some(100)),
            &from_a,
            &from_z,
        ));
    }

    #[test]
    fn test_short_trace() {
        let (mut from_a, from_z) = traces();
        from_a.truncate(2);
        assert!(!check_trace(
            &uni_vlan(1, 1, 100),
            &uni_vlan(3, 1, 100),
            &path(),
            (Some(100), Some(100)),
            &from_a,
            &from_z,
        ));
    }

    #[test]
    fn test_wrong_output() {
        let (from_a, mut from_z) = traces();
        from_z[2].out = Some(json!({"port": 4, "vlan": 100}));
        assert!(!check_trace(
            &uni_vlan(1, 1, 100),
            &uni_vlan(3, 1, 100),
            &path(),
            (Some(100), Some(100)),
            &from_a,
            &from_z,
        ));
        from_z[2].out = None;
        assert!(!check_trace(
            &uni_vlan(1, 1, 100),
            &uni_vlan(3, 1, 100),
            &path(),
            (Some(100), Some(100)),
            &from_a,
            &from_z,
        ));
    }

    #[test]
    fn test_intra_switch_trace() {
        let a = uni_vlan(1, 1, 100);
        let z = uni_vlan(1, 4, 200);
        let from_a = vec![last(1, 1, Some(100), 4, 200)];
        let from_z = vec![last(1, 4, Some(200), 1, 100)];
        assert!(check_trace(
            &a,
            &z,
            &Path::default(),
            (Some(100), Some(200)),
            &from_a,
            &from_z,
        ));
    }
}
