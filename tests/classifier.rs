// Copyright 2026 Oxide Computer Company

//! Black-box integration tests against the public [`CombinedClassifier`]
//! API: the end-to-end scenarios from the design spec, plus a randomized
//! check of the correctness/determinism/delete-then-insert invariants
//! against a naive linear reference classifier.

use combined_classifier::{
    ClassifierConfig, CombinedClassifier, ConstructionMode, Flow, HeaderBase, Match, OxmField,
    Packet,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn exact(field: OxmField, value: u32) -> Match {
    Match {
        field,
        has_mask: false,
        length: 4,
        value: value.to_be_bytes().to_vec(),
        mask: None,
    }
}

fn prefix_mask(bits: u32) -> u32 {
    if bits == 0 {
        0
    } else if bits >= 32 {
        u32::MAX
    } else {
        !(u32::MAX >> bits)
    }
}

fn prefix(field: OxmField, value: u32, prefix_bits: u32) -> Match {
    let mask = prefix_mask(prefix_bits);
    Match {
        field,
        has_mask: true,
        length: 4,
        value: (value & mask).to_be_bytes().to_vec(),
        mask: Some(mask.to_be_bytes().to_vec()),
    }
}

fn masked(field: OxmField, value: u32, mask: u32) -> Match {
    Match {
        field,
        has_mask: true,
        length: 4,
        value: (value & mask).to_be_bytes().to_vec(),
        mask: Some(mask.to_be_bytes().to_vec()),
    }
}

fn ipv4_packet(src: u32, dst: u32) -> Packet {
    let mut p = Packet::new();
    let mut ipv4 = vec![0u8; 20];
    ipv4[12..16].copy_from_slice(&src.to_be_bytes());
    ipv4[16..20].copy_from_slice(&dst.to_be_bytes());
    p.set_header(HeaderBase::Ipv4, ipv4);
    p
}

#[test]
fn s1_exact_match() {
    let flows = vec![
        Flow {
            matches: vec![exact(OxmField::Ipv4Src, 0x0A00_0001)],
            priority: 10,
            handle: 100,
        },
        Flow {
            matches: vec![exact(OxmField::Ipv4Dst, 0x0A00_0002)],
            priority: 20,
            handle: 200,
        },
    ];
    let mut c = CombinedClassifier::new(ClassifierConfig::default());
    c.build(&flows).unwrap();

    assert_eq!(c.classify(&ipv4_packet(0x0A00_0001, 0x0A00_0002)), Some(200));
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0001, 0x0A00_0003)), Some(100));
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0004, 0x0A00_0004)), None);
}

#[test]
fn s2_prefix_match() {
    let flows = vec![
        Flow {
            matches: vec![prefix(OxmField::Ipv4Src, 0x0A00_0000, 24)],
            priority: 5,
            handle: 1,
        },
        Flow {
            matches: vec![prefix(OxmField::Ipv4Src, 0x0A00_0000, 28)],
            priority: 7,
            handle: 2,
        },
    ];
    let mut c = CombinedClassifier::new(ClassifierConfig::default());
    c.build(&flows).unwrap();

    assert_eq!(c.classify(&ipv4_packet(0x0A00_0005, 0)), Some(2));
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0064, 0)), Some(1));
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0100, 0)), None);
}

#[test]
fn s3_discontiguous_match() {
    let flows = vec![Flow {
        matches: vec![masked(OxmField::Ipv4Src, 0x0A00_0000, 0xF0F0_F0F0)],
        priority: 3,
        handle: 42,
    }];
    let mut c = CombinedClassifier::new(ClassifierConfig::default());
    c.build(&flows).unwrap();

    assert_eq!(c.classify(&ipv4_packet(0x0A05_0607, 0)), Some(42));
    assert_eq!(c.classify(&ipv4_packet(0x0B05_0607, 0)), None);
}

#[test]
fn s4_non_partitionable_rules_still_classify_correctly() {
    let flows = vec![
        Flow {
            matches: vec![prefix(OxmField::Ipv4Src, 0x0A00_0000, 24)],
            priority: 1,
            handle: 1,
        },
        Flow {
            matches: vec![prefix(OxmField::Ipv4Dst, 0x0A00_0000, 24)],
            priority: 1,
            handle: 2,
        },
    ];
    let mut c = CombinedClassifier::new(ClassifierConfig::default());
    c.build(&flows).unwrap();

    // Both rules claim every point for the field they don't match against,
    // so a packet that matches only the dst clause must still hit rule 2.
    assert_eq!(c.classify(&ipv4_packet(0x0B00_0001, 0x0A00_0001)), Some(2));
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0001, 0x0B00_0001)), Some(1));
}

#[test]
fn offline_and_online_construction_agree_on_a_fixed_rule_set() {
    let flows: Vec<Flow> = (0..40u32)
        .map(|i| Flow {
            matches: vec![
                prefix(OxmField::Ipv4Src, i << 20, 12),
                exact(OxmField::TcpDst, i % 7),
            ],
            priority: i as i64,
            handle: i as u64,
        })
        .collect();

    let mut offline = CombinedClassifier::new(ClassifierConfig {
        construction_mode: ConstructionMode::Offline,
        ..Default::default()
    });
    offline.build(&flows).unwrap();

    let mut online = CombinedClassifier::new(ClassifierConfig {
        construction_mode: ConstructionMode::Online,
        ..Default::default()
    });
    online.build(&flows).unwrap();

    for i in 0..40u32 {
        let pkt = ipv4_packet(i << 20, 0);
        assert_eq!(offline.classify(&pkt), online.classify(&pkt));
    }
}

/// A naive reference classifier: a direct port of spec 8's correctness
/// invariant (`argmax` over matching rules by priority, ties broken by
/// insertion order), used only to check the real classifier against.
struct ReferenceRule {
    src_lo: u32,
    src_hi: u32,
    dst_lo: u32,
    dst_hi: u32,
    priority: i64,
    handle: u64,
}

fn reference_classify(rules: &[ReferenceRule], src: u32, dst: u32) -> Option<u64> {
    rules
        .iter()
        .filter(|r| src >= r.src_lo && src <= r.src_hi && dst >= r.dst_lo && dst <= r.dst_hi)
        .max_by_key(|r| r.priority)
        .map(|r| r.handle)
}

fn random_prefix_rule(rng: &mut StdRng, priority: i64, handle: u64) -> (Flow, ReferenceRule) {
    let src_bits: u32 = rng.random_range(0..=32);
    let dst_bits: u32 = rng.random_range(0..=32);
    let src_val: u32 = rng.random();
    let dst_val: u32 = rng.random();
    let src_mask = prefix_mask(src_bits);
    let dst_mask = prefix_mask(dst_bits);
    let src_lo = src_val & src_mask;
    let dst_lo = dst_val & dst_mask;

    let flow = Flow {
        matches: vec![
            prefix(OxmField::Ipv4Src, src_lo, src_bits),
            prefix(OxmField::Ipv4Dst, dst_lo, dst_bits),
        ],
        priority,
        handle,
    };
    let reference = ReferenceRule {
        src_lo,
        src_hi: src_lo | !src_mask,
        dst_lo,
        dst_hi: dst_lo | !dst_mask,
        priority,
        handle,
    };
    (flow, reference)
}

#[test]
fn randomized_correctness_and_determinism_against_reference() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for trial in 0..20u64 {
        let n = rng.random_range(5..40);
        let mut flows = Vec::with_capacity(n);
        let mut reference = Vec::with_capacity(n);
        for i in 0..n {
            let (flow, r) = random_prefix_rule(&mut rng, (trial * 100 + i as u64) as i64, i as u64);
            flows.push(flow);
            reference.push(r);
        }

        let mut c = CombinedClassifier::new(ClassifierConfig::default());
        c.build(&flows).unwrap();

        for _ in 0..50 {
            let src: u32 = rng.random();
            let dst: u32 = rng.random();
            let expected = reference_classify(&reference, src, dst);
            let got = c.classify(&ipv4_packet(src, dst));
            assert_eq!(got, expected, "trial {trial}: src={src:#x} dst={dst:#x}");
            // determinism: repeating the same query must return the same answer
            assert_eq!(got, c.classify(&ipv4_packet(src, dst)));
        }
    }
}

#[test]
fn delete_then_insert_matches_a_fresh_build() {
    let mut rng = StdRng::seed_from_u64(0xDECADE);

    let n = 30;
    let mut flows = Vec::with_capacity(n);
    let mut reference = Vec::with_capacity(n);
    for i in 0..n {
        let (flow, r) = random_prefix_rule(&mut rng, i as i64, i as u64);
        flows.push(flow);
        reference.push(r);
    }

    let mut c = CombinedClassifier::new(ClassifierConfig::default());
    c.build(&flows).unwrap();

    // delete every third rule, then re-add it under a new id
    let mut kept: Vec<usize> = Vec::new();
    for i in 0..n {
        if i % 3 == 0 {
            c.delete_rule(i as u32);
        } else {
            kept.push(i);
        }
    }
    for i in 0..n {
        if i % 3 == 0 {
            c.insert_flow(&flows[i]).unwrap();
        }
    }

    let mut fresh = CombinedClassifier::new(ClassifierConfig::default());
    fresh.build(&flows).unwrap();

    for _ in 0..50 {
        let src: u32 = rng.random();
        let dst: u32 = rng.random();
        let expected = reference_classify(&reference, src, dst);
        assert_eq!(fresh.classify(&ipv4_packet(src, dst)), expected);
        assert_eq!(c.classify(&ipv4_packet(src, dst)), expected);
    }
}

#[test]
fn deleted_rule_does_not_resurrect_on_field_set_change_rebuild() {
    let flows = vec![
        Flow {
            matches: vec![exact(OxmField::Ipv4Src, 0x0A00_0001)],
            priority: 1,
            handle: 1,
        },
        Flow {
            matches: vec![exact(OxmField::Ipv4Src, 0x0A00_0002)],
            priority: 2,
            handle: 2,
        },
    ];
    let mut c = CombinedClassifier::new(ClassifierConfig::default());
    c.build(&flows).unwrap();
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0001, 0)), Some(1));

    // removing rule 0 must stick even across a later rebuild
    c.delete_rule(0);
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0001, 0)), None);

    // a field this classifier has never indexed forces insert_flow's
    // rebuild-from-to_flows path; the deleted rule must not come back
    let mut tcp_dst_match = vec![exact(OxmField::TcpDst, 80)];
    tcp_dst_match.push(exact(OxmField::Ipv4Src, 0x0A00_0003));
    let new_flow = Flow { matches: tcp_dst_match, priority: 3, handle: 3 };
    c.insert_flow(&new_flow).unwrap();

    assert_eq!(c.classify(&ipv4_packet(0x0A00_0001, 0)), None);
    assert_eq!(c.classify(&ipv4_packet(0x0A00_0002, 0)), Some(2));
}
