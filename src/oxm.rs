// Copyright 2026 Oxide Computer Company

//! Field projection: the boundary between flow-table records / packet
//! buffers and the canonical [`crate::rule::Rule`] / point-vector forms
//! everything downstream operates on.
//!
//! Nothing below this module knows about OXM fields or packet headers;
//! nothing above it knows about [`crate::rule::FieldRange`].

use crate::error::ClassifierError;
use crate::rule::{FieldRange, Point, Rule, RULE_ID_NONE};

/// OpenFlow Extensible Match field identifiers, numbered exactly as the
/// OpenFlow 1.3 `oxm_ofb_match_fields` enumeration (`OFPXMT_OFB_*`). This
/// numbering is part of the public contract: callers build [`Match`]
/// values against these ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OxmField {
    InPort = 0,
    InPhyPort = 1,
    Metadata = 2,
    EthDst = 3,
    EthSrc = 4,
    EthType = 5,
    VlanVid = 6,
    VlanPcp = 7,
    IpDscp = 8,
    IpEcn = 9,
    IpProto = 10,
    Ipv4Src = 11,
    Ipv4Dst = 12,
    TcpSrc = 13,
    TcpDst = 14,
    UdpSrc = 15,
    UdpDst = 16,
    SctpSrc = 17,
    SctpDst = 18,
    Icmpv4Type = 19,
    Icmpv4Code = 20,
    ArpOp = 21,
    ArpSpa = 22,
    ArpTpa = 23,
    ArpSha = 24,
    ArpTha = 25,
    Ipv6Src = 26,
    Ipv6Dst = 27,
    Ipv6Flabel = 28,
    Icmpv6Type = 29,
    Icmpv6Code = 30,
    Ipv6NdTarget = 31,
    Ipv6NdSll = 32,
    Ipv6NdTll = 33,
    MplsLabel = 34,
    MplsTc = 35,
    MplsBos = 36,
    PbbIsid = 37,
    TunnelId = 38,
    Ipv6Exthdr = 39,
}

pub const OXM_FIELD_COUNT: usize = 40;

const ALL_OXM_FIELDS: [OxmField; OXM_FIELD_COUNT] = [
    OxmField::InPort,
    OxmField::InPhyPort,
    OxmField::Metadata,
    OxmField::EthDst,
    OxmField::EthSrc,
    OxmField::EthType,
    OxmField::VlanVid,
    OxmField::VlanPcp,
    OxmField::IpDscp,
    OxmField::IpEcn,
    OxmField::IpProto,
    OxmField::Ipv4Src,
    OxmField::Ipv4Dst,
    OxmField::TcpSrc,
    OxmField::TcpDst,
    OxmField::UdpSrc,
    OxmField::UdpDst,
    OxmField::SctpSrc,
    OxmField::SctpDst,
    OxmField::Icmpv4Type,
    OxmField::Icmpv4Code,
    OxmField::ArpOp,
    OxmField::ArpSpa,
    OxmField::ArpTpa,
    OxmField::ArpSha,
    OxmField::ArpTha,
    OxmField::Ipv6Src,
    OxmField::Ipv6Dst,
    OxmField::Ipv6Flabel,
    OxmField::Icmpv6Type,
    OxmField::Icmpv6Code,
    OxmField::Ipv6NdTarget,
    OxmField::Ipv6NdSll,
    OxmField::Ipv6NdTll,
    OxmField::MplsLabel,
    OxmField::MplsTc,
    OxmField::MplsBos,
    OxmField::PbbIsid,
    OxmField::TunnelId,
    OxmField::Ipv6Exthdr,
];

/// Which parsed packet header a field is extracted from. Packets hand
/// the classifier one byte slice per base via [`Packet::set_header`];
/// a base with no slice set projects to zero for every field rooted in
/// it (spec 4.1: "missing headers yield 0").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderBase {
    /// Side-channel metadata carried alongside the packet rather than
    /// parsed from it: ingress port, ingress phy port, OF metadata.
    Meta,
    Eth,
    Vlan,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Sctp,
    Icmpv4,
    Icmpv6,
    Ipv6Nd,
    Arp,
    Mpls,
    Pbb,
    Tunnel,
    Ipv6Exthdr,
}

/// Where and how to pull one field's bits out of a header base's byte
/// slice. `width` is the number of bytes read starting at `offset`,
/// interpreted big-endian; the result is right-shifted by `shift` and
/// masked by `mask` before being folded to a [`Point`]. Fields wider
/// than 32 bits (MAC addresses, IPv6 addresses) are folded down by
/// keeping only the low 32 bits of the decoded value, matching the
/// source's `point = uint32_t` representation.
#[derive(Debug, Clone, Copy)]
struct FieldDescriptor {
    field: OxmField,
    base: HeaderBase,
    offset: usize,
    width: usize,
    shift: u32,
    mask: u32,
}

const fn fd(field: OxmField, base: HeaderBase, offset: usize, width: usize, shift: u32, mask: u32) -> FieldDescriptor {
    FieldDescriptor { field, base, offset, width, shift, mask }
}

/// The OXM-to-header mapping table (spec 4.1/6). Public contract: one
/// entry per field in [`OxmField`].
const FIELD_TABLE: [FieldDescriptor; OXM_FIELD_COUNT] = [
    fd(OxmField::InPort, HeaderBase::Meta, 0, 4, 0, u32::MAX),
    fd(OxmField::InPhyPort, HeaderBase::Meta, 4, 4, 0, u32::MAX),
    fd(OxmField::Metadata, HeaderBase::Meta, 8, 8, 0, u32::MAX),
    fd(OxmField::EthDst, HeaderBase::Eth, 0, 6, 0, u32::MAX),
    fd(OxmField::EthSrc, HeaderBase::Eth, 6, 6, 0, u32::MAX),
    fd(OxmField::EthType, HeaderBase::Eth, 12, 2, 0, 0xFFFF),
    fd(OxmField::VlanVid, HeaderBase::Vlan, 0, 2, 0, 0x0FFF),
    fd(OxmField::VlanPcp, HeaderBase::Vlan, 0, 2, 13, 0x7),
    fd(OxmField::IpDscp, HeaderBase::Ipv4, 1, 1, 2, 0x3F),
    fd(OxmField::IpEcn, HeaderBase::Ipv4, 1, 1, 0, 0x3),
    fd(OxmField::IpProto, HeaderBase::Ipv4, 9, 1, 0, 0xFF),
    fd(OxmField::Ipv4Src, HeaderBase::Ipv4, 12, 4, 0, u32::MAX),
    fd(OxmField::Ipv4Dst, HeaderBase::Ipv4, 16, 4, 0, u32::MAX),
    fd(OxmField::TcpSrc, HeaderBase::Tcp, 0, 2, 0, 0xFFFF),
    fd(OxmField::TcpDst, HeaderBase::Tcp, 2, 2, 0, 0xFFFF),
    fd(OxmField::UdpSrc, HeaderBase::Udp, 0, 2, 0, 0xFFFF),
    fd(OxmField::UdpDst, HeaderBase::Udp, 2, 2, 0, 0xFFFF),
    fd(OxmField::SctpSrc, HeaderBase::Sctp, 0, 2, 0, 0xFFFF),
    fd(OxmField::SctpDst, HeaderBase::Sctp, 2, 2, 0, 0xFFFF),
    fd(OxmField::Icmpv4Type, HeaderBase::Icmpv4, 0, 1, 0, 0xFF),
    fd(OxmField::Icmpv4Code, HeaderBase::Icmpv4, 1, 1, 0, 0xFF),
    fd(OxmField::ArpOp, HeaderBase::Arp, 6, 2, 0, 0xFFFF),
    fd(OxmField::ArpSpa, HeaderBase::Arp, 14, 4, 0, u32::MAX),
    fd(OxmField::ArpTpa, HeaderBase::Arp, 24, 4, 0, u32::MAX),
    fd(OxmField::ArpSha, HeaderBase::Arp, 8, 6, 0, u32::MAX),
    fd(OxmField::ArpTha, HeaderBase::Arp, 18, 6, 0, u32::MAX),
    fd(OxmField::Ipv6Src, HeaderBase::Ipv6, 8, 16, 0, u32::MAX),
    fd(OxmField::Ipv6Dst, HeaderBase::Ipv6, 24, 16, 0, u32::MAX),
    fd(OxmField::Ipv6Flabel, HeaderBase::Ipv6, 0, 4, 0, 0x000F_FFFF),
    fd(OxmField::Icmpv6Type, HeaderBase::Icmpv6, 0, 1, 0, 0xFF),
    fd(OxmField::Icmpv6Code, HeaderBase::Icmpv6, 1, 1, 0, 0xFF),
    fd(OxmField::Ipv6NdTarget, HeaderBase::Ipv6Nd, 0, 16, 0, u32::MAX),
    fd(OxmField::Ipv6NdSll, HeaderBase::Ipv6Nd, 16, 6, 0, u32::MAX),
    fd(OxmField::Ipv6NdTll, HeaderBase::Ipv6Nd, 22, 6, 0, u32::MAX),
    fd(OxmField::MplsLabel, HeaderBase::Mpls, 0, 4, 12, 0x000F_FFFF),
    fd(OxmField::MplsTc, HeaderBase::Mpls, 0, 4, 9, 0x7),
    fd(OxmField::MplsBos, HeaderBase::Mpls, 0, 4, 8, 0x1),
    fd(OxmField::PbbIsid, HeaderBase::Pbb, 0, 3, 0, 0x00FF_FFFF),
    fd(OxmField::TunnelId, HeaderBase::Tunnel, 0, 8, 0, u32::MAX),
    fd(OxmField::Ipv6Exthdr, HeaderBase::Ipv6Exthdr, 0, 2, 0, 0xFFFF),
];

fn descriptor_for(field: OxmField) -> &'static FieldDescriptor {
    &FIELD_TABLE[field as usize]
}

/// One match entry in a flow's match list.
#[derive(Debug, Clone)]
pub struct Match {
    pub field: OxmField,
    pub has_mask: bool,
    /// Declared width in bytes of `value` (and `mask`, if present).
    pub length: u8,
    pub value: Vec<u8>,
    pub mask: Option<Vec<u8>>,
}

/// A flow-table entry as handed to the classifier by the table
/// management layer (external collaborator; see spec 6).
#[derive(Debug, Clone)]
pub struct Flow {
    pub matches: Vec<Match>,
    pub priority: i64,
    /// Opaque handle returned verbatim by [`crate::combined::CombinedClassifier::classify`]
    /// on a match.
    pub handle: u64,
}

/// Packet header bases, as extracted by an external parser. Only bases
/// actually present on the wire need an entry; everything else reads
/// as zero.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    headers: std::collections::HashMap<HeaderBase, Vec<u8>>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_header(&mut self, base: HeaderBase, bytes: Vec<u8>) {
        self.headers.insert(base, bytes);
    }

    fn header(&self, base: HeaderBase) -> Option<&[u8]> {
        self.headers.get(&base).map(|v| v.as_slice())
    }
}

fn bytes_to_u128_be(bytes: &[u8]) -> u128 {
    let mut v: u128 = 0;
    for &b in bytes {
        v = (v << 8) | b as u128;
    }
    v
}

fn decode_field_bytes(bytes: &[u8]) -> Result<u32, ClassifierError> {
    if bytes.is_empty() || bytes.len() > 16 {
        return Err(ClassifierError::InvalidRule {
            reason: format!("field byte width {} out of range", bytes.len()),
        });
    }
    // Fold down to the low 32 bits, matching the source's uint32_t point
    // representation for wide fields (IPv6 addresses, MAC addresses).
    Ok(bytes_to_u128_be(bytes) as u32)
}

/// A mask is "contiguous" (prefix-shaped) iff its complement, plus one,
/// has at most a single bit set -- i.e. the complement is a run of
/// low-order 1-bits (spec 4.1).
fn mask_is_prefix(mask: u32) -> bool {
    let inv = !mask;
    inv.wrapping_add(1).count_ones() <= 1
}

/// Turn one flow into a canonical [`Rule`] over `chosen_fields`. The
/// rule's `id` is left at [`RULE_ID_NONE`]; the arena owner assigns it.
pub fn project_flow(flow: &Flow, chosen_fields: &[OxmField]) -> Result<Rule, ClassifierError> {
    let dim = chosen_fields.len();
    let mut fields: Vec<FieldRange> = vec![FieldRange::wildcard(); dim];
    let mut prefix_length: Vec<u32> = vec![0; dim];
    let mut contiguous = true;

    for m in &flow.matches {
        let Some(j) = chosen_fields.iter().position(|&f| f == m.field) else {
            continue;
        };
        if m.length == 0 || (m.length as usize) > 16 {
            return Err(ClassifierError::InvalidRule {
                reason: format!("{:?}: match length {} out of range", m.field, m.length),
            });
        }
        let len = m.length as usize;
        if m.value.len() < len {
            return Err(ClassifierError::InvalidRule {
                reason: format!("{:?}: value shorter than declared length", m.field),
            });
        }
        let raw_value = decode_field_bytes(&m.value[..len])?;

        if m.has_mask {
            let mask_bytes = m.mask.as_ref().ok_or_else(|| ClassifierError::InvalidRule {
                reason: format!("{:?}: has_mask set without mask bytes", m.field),
            })?;
            if mask_bytes.len() < len {
                return Err(ClassifierError::InvalidRule {
                    reason: format!("{:?}: mask shorter than declared length", m.field),
                });
            }
            let mask = decode_field_bytes(&mask_bytes[..len])?;
            let value = raw_value & mask;
            prefix_length[j] = mask.count_ones();
            contiguous = contiguous && mask_is_prefix(mask);
            fields[j] = FieldRange::ValueMask { value, mask };
        } else {
            prefix_length[j] = 8 * m.length as u32;
            fields[j] = FieldRange::ValueMask { value: raw_value, mask: 0xFFFF_FFFF };
        }
    }

    if contiguous {
        for f in fields.iter_mut() {
            if let FieldRange::ValueMask { value, mask } = *f {
                *f = FieldRange::Range { lo: value, hi: value | !mask };
            }
        }
    }

    Ok(Rule {
        fields: fields.into_boxed_slice(),
        prefix_length: prefix_length.into_boxed_slice(),
        priority: flow.priority,
        contiguous,
        master: flow.handle,
        id: RULE_ID_NONE,
    })
}

/// Project a packet into the point vector matching `chosen_fields`'s
/// order.
pub fn project_packet(packet: &Packet, chosen_fields: &[OxmField]) -> Vec<Point> {
    chosen_fields
        .iter()
        .map(|&field| {
            let d = descriptor_for(field);
            match packet.header(d.base) {
                None => 0,
                Some(bytes) => {
                    if bytes.len() < d.offset + d.width {
                        return 0;
                    }
                    let raw = bytes_to_u128_be(&bytes[d.offset..d.offset + d.width]) as u32;
                    (raw >> d.shift) & d.mask
                }
            }
        })
        .collect()
}

/// Tally how many flows reference each field (ignoring [`OxmField::EthType`],
/// which every flow implicitly carries and so is not discriminating),
/// and return the referenced fields in tally-descending order, ties
/// broken by ascending OXM id for determinism.
pub fn choose_fields(flows: &[Flow]) -> Vec<OxmField> {
    let mut tally = [0usize; OXM_FIELD_COUNT];
    for flow in flows {
        let mut seen = [false; OXM_FIELD_COUNT];
        for m in &flow.matches {
            if m.field == OxmField::EthType {
                continue;
            }
            let idx = m.field as usize;
            if !seen[idx] {
                seen[idx] = true;
                tally[idx] += 1;
            }
        }
    }
    let mut present: Vec<OxmField> = ALL_OXM_FIELDS.iter().copied().filter(|&f| tally[f as usize] > 0).collect();
    present.sort_by(|&a, &b| tally[b as usize].cmp(&tally[a as usize]).then((a as u8).cmp(&(b as u8))));
    present
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact_match(field: OxmField, value: u32) -> Match {
        Match {
            field,
            has_mask: false,
            length: 4,
            value: value.to_be_bytes().to_vec(),
            mask: None,
        }
    }

    fn masked_match(field: OxmField, value: u32, mask: u32) -> Match {
        Match {
            field,
            has_mask: true,
            length: 4,
            value: value.to_be_bytes().to_vec(),
            mask: Some(mask.to_be_bytes().to_vec()),
        }
    }

    #[test]
    fn exact_match_yields_contiguous_rule_with_range_form() {
        let flow = Flow {
            matches: vec![exact_match(OxmField::Ipv4Src, 0x0A00_0001)],
            priority: 10,
            handle: 1,
        };
        let chosen = vec![OxmField::Ipv4Src];
        let rule = project_flow(&flow, &chosen).unwrap();
        assert!(rule.contiguous);
        assert_eq!(rule.fields[0], FieldRange::Range { lo: 0x0A00_0001, hi: 0x0A00_0001 });
    }

    #[test]
    fn prefix_mask_yields_contiguous_range() {
        let flow = Flow {
            matches: vec![masked_match(OxmField::Ipv4Src, 0x0A00_0000, 0xFFFF_FF00)],
            priority: 5,
            handle: 2,
        };
        let chosen = vec![OxmField::Ipv4Src];
        let rule = project_flow(&flow, &chosen).unwrap();
        assert!(rule.contiguous);
        assert_eq!(rule.fields[0], FieldRange::Range { lo: 0x0A00_0000, hi: 0x0A00_00FF });
    }

    #[test]
    fn non_prefix_mask_yields_discontiguous_rule() {
        let flow = Flow {
            matches: vec![masked_match(OxmField::Ipv4Src, 0x0A00_0000, 0xF0F0_F0F0)],
            priority: 3,
            handle: 3,
        };
        let chosen = vec![OxmField::Ipv4Src];
        let rule = project_flow(&flow, &chosen).unwrap();
        assert!(!rule.contiguous);
        assert_eq!(rule.fields[0], FieldRange::ValueMask { value: 0x0A00_0000, mask: 0xF0F0_F0F0 });
    }

    #[test]
    fn unmentioned_field_defaults_to_wildcard() {
        let flow = Flow { matches: vec![], priority: 1, handle: 4 };
        let chosen = vec![OxmField::Ipv4Src, OxmField::TcpDst];
        let rule = project_flow(&flow, &chosen).unwrap();
        assert_eq!(rule.fields[0], FieldRange::wildcard());
        assert_eq!(rule.fields[1], FieldRange::wildcard());
    }

    #[test]
    fn overlong_match_is_rejected() {
        let flow = Flow {
            matches: vec![Match { field: OxmField::Ipv4Src, has_mask: false, length: 20, value: vec![0; 20], mask: None }],
            priority: 1,
            handle: 5,
        };
        let chosen = vec![OxmField::Ipv4Src];
        assert!(matches!(project_flow(&flow, &chosen), Err(ClassifierError::InvalidRule { .. })));
    }

    #[test]
    fn choose_fields_ignores_eth_type_and_tallies_descending() {
        let mk = |fields: &[OxmField]| Flow {
            matches: fields.iter().map(|&f| exact_match(f, 0)).collect(),
            priority: 0,
            handle: 0,
        };
        let flows = vec![
            mk(&[OxmField::Ipv4Src, OxmField::EthType]),
            mk(&[OxmField::Ipv4Src, OxmField::TcpDst]),
            mk(&[OxmField::TcpDst]),
        ];
        let chosen = choose_fields(&flows);
        assert_eq!(chosen, vec![OxmField::Ipv4Src, OxmField::TcpDst]);
    }

    #[test]
    fn project_packet_extracts_and_shifts_fields() {
        let mut packet = Packet::new();
        let mut ipv4 = vec![0u8; 20];
        ipv4[12..16].copy_from_slice(&0x0A00_0001u32.to_be_bytes());
        packet.set_header(HeaderBase::Ipv4, ipv4);
        let mut vlan = vec![0u8; 4];
        // pcp=5 (0b101), vid=0x123
        let tci: u16 = (5 << 13) | 0x123;
        vlan[0..2].copy_from_slice(&tci.to_be_bytes());
        packet.set_header(HeaderBase::Vlan, vlan);

        let chosen = vec![OxmField::Ipv4Src, OxmField::VlanVid, OxmField::VlanPcp, OxmField::TcpSrc];
        let point = project_packet(&packet, &chosen);
        assert_eq!(point[0], 0x0A00_0001);
        assert_eq!(point[1], 0x123);
        assert_eq!(point[2], 5);
        assert_eq!(point[3], 0); // missing Tcp header -> 0
    }
}
