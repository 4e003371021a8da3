// Copyright 2026 Oxide Computer Company

//! Canonical rule representation shared by every classification subsystem.
//!
//! A [`Rule`] is the unit everything downstream of [`crate::oxm`] operates
//! on: [`crate::range_tree`] stores them, [`crate::generic`] scans them,
//! [`crate::partitioner`] reorders them. Nothing below this module knows
//! about flows, OXM fields, or packets.

/// A single projected packet field. Always host-order, always 32 bits
/// regardless of the field's native width on the wire (see
/// [`crate::oxm`] for how wider fields get folded down).
pub type Point = u32;

/// The index PartitionSort assigns a rule for O(1) deletion. Doubles as
/// the arena index into `CombinedClassifier`'s `Vec<Rule>` (see
/// [`crate::combined`]).
pub type RuleId = u32;

/// Sentinel meaning "no id assigned yet" -- used for rules that live only
/// in the `GenericClassifier` and never need a `PartitionSort` slot.
pub const RULE_ID_NONE: RuleId = u32::MAX;

/// One field's match criterion, in whichever of the two representations
/// the rule's `contiguous` flag says applies. Both forms occupy the same
/// logical 64 bits of information; conversion between them is lossless
/// only for contiguous (prefix-masked) fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRange {
    /// Inclusive range form, used by contiguous rules.
    Range { lo: u32, hi: u32 },
    /// Value/mask form, used by discontiguous rules.
    ValueMask { value: u32, mask: u32 },
}

impl FieldRange {
    pub fn wildcard() -> Self {
        FieldRange::Range { lo: 0, hi: u32::MAX }
    }

    /// Convert to range form. Valid for any contiguous field (mask is a
    /// prefix, or absent); callers must not call this on a field from a
    /// discontiguous rule, since `hi = value | !mask` is meaningless once
    /// `mask` has gaps.
    pub fn as_range(&self) -> (u32, u32) {
        match self {
            FieldRange::Range { lo, hi } => (*lo, *hi),
            FieldRange::ValueMask { value, mask } => (*value, *value | !*mask),
        }
    }

    pub fn as_value_mask(&self) -> (u32, u32) {
        match self {
            FieldRange::ValueMask { value, mask } => (*value, *mask),
            FieldRange::Range { lo, hi } => (*lo, !(*lo ^ *hi)),
        }
    }

    pub fn matches_point(&self, p: Point) -> bool {
        match self {
            FieldRange::Range { lo, hi } => p >= *lo && p <= *hi,
            FieldRange::ValueMask { value, mask } => (p & mask) == *value,
        }
    }

    /// Popcount of the field's mask -- `prefix_length` for this field.
    pub fn prefix_length(&self) -> u32 {
        match self {
            FieldRange::Range { lo, hi } => (!(lo ^ hi)).count_ones(),
            FieldRange::ValueMask { mask, .. } => mask.count_ones(),
        }
    }
}

/// Three-way relation between two intervals in range form, used at every
/// level of a [`crate::range_tree::RangeTree`] to decide whether a new
/// key can share a node with an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    Less,
    Greater,
    /// Overlapping but not identical -- forbidden inside one RangeTree
    /// level; the caller must reject the insert.
    Overlap,
}

pub fn relate(a: (u32, u32), b: (u32, u32)) -> Relation {
    if a == b {
        Relation::Equal
    } else if a.1 < b.0 {
        Relation::Less
    } else if a.0 > b.1 {
        Relation::Greater
    } else {
        Relation::Overlap
    }
}

/// A canonical rule: one per flow-table entry, after field projection.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Per-field match criteria, length `dim`, in the classifier's fixed
    /// field order (not the SortableTree's chosen field order -- that
    /// indirection is applied by the tree, not stored on the rule).
    pub fields: Box<[FieldRange]>,
    pub prefix_length: Box<[u32]>,
    pub priority: i64,
    /// True iff every field's mask is a prefix (or absent). Derived once
    /// at construction, never mutated.
    pub contiguous: bool,
    /// Opaque handle to the owning flow record, returned verbatim on a
    /// match.
    pub master: u64,
    /// Assigned by `PartitionSort` on insertion; `RULE_ID_NONE` until
    /// then.
    pub id: RuleId,
}

impl Rule {
    pub fn dim(&self) -> usize {
        self.fields.len()
    }

    pub fn matches(&self, point: &[Point]) -> bool {
        debug_assert_eq!(point.len(), self.fields.len());
        self.fields
            .iter()
            .zip(point.iter())
            .all(|(f, p)| f.matches_point(*p))
    }

    /// Sort/compare key for "highest priority, earliest insertion wins"
    /// (Open Question resolution in DESIGN.md: pointer identity, here
    /// realized as arena-index identity; lower id is earlier).
    pub fn rank_key(&self) -> (i64, std::cmp::Reverse<RuleId>) {
        (self.priority, std::cmp::Reverse(self.id))
    }
}
