// Copyright 2026 Oxide Computer Company

//! A single partition: a fixed field order plus the [`RangeTree`] that
//! stores it, with adaptive field-order reconstruction while young.

use crate::error::ClassifierError;
use crate::partitioner::fast_greedy_field_order;
use crate::range_tree::RangeTree;
use crate::rule::{Rule, RuleId};

/// Outcome of a speculative insert. Rejection is the expected,
/// recoverable path `PartitionSort` relies on to open a new tree -- it
/// is not surfaced as a `ClassifierError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { priority_changed: bool },
    Rejected,
}

/// Default `binth`-equivalent reconstruction threshold (spec 4.5).
pub const DEFAULT_RECONSTRUCT_THRESHOLD: usize = 10;

#[derive(Debug, Clone)]
pub struct SortableTree {
    pub field_order: Vec<usize>,
    tree: RangeTree,
    num_rules: usize,
    max_priority: Option<i64>,
    is_mature: bool,
    reconstruct_threshold: usize,
}

impl SortableTree {
    pub fn new(field_order: Vec<usize>) -> Self {
        SortableTree {
            field_order,
            tree: RangeTree::new(),
            num_rules: 0,
            max_priority: None,
            is_mature: false,
            reconstruct_threshold: DEFAULT_RECONSTRUCT_THRESHOLD,
        }
    }

    pub fn with_threshold(field_order: Vec<usize>, reconstruct_threshold: usize) -> Self {
        SortableTree {
            reconstruct_threshold,
            ..Self::new(field_order)
        }
    }

    pub fn num_rules(&self) -> usize {
        self.num_rules
    }

    pub fn max_priority(&self) -> Option<i64> {
        self.max_priority
    }

    pub fn is_mature(&self) -> bool {
        self.is_mature
    }

    /// Try to insert `rule_id`. The underlying `RangeTree::insert` never
    /// leaves partial state behind on a `ForbiddenOverlap`, so this
    /// doubles as `can_insert`: there is no separate non-mutating dry
    /// run, and no wasted clone-and-try.
    pub fn try_insert(&mut self, rules: &[Rule], rule_id: RuleId) -> Result<InsertOutcome, ClassifierError> {
        let priority = rules[rule_id as usize].priority;
        match self.tree.insert(rules, 0, &self.field_order, rule_id) {
            Ok(()) => {
                self.num_rules += 1;
                let priority_changed = self.max_priority.map(|p| priority > p).unwrap_or(true);
                if priority_changed {
                    self.max_priority = Some(priority);
                }
                self.reconstruct_if_not_mature(rules);
                Ok(InsertOutcome::Inserted { priority_changed })
            }
            Err(ClassifierError::ForbiddenOverlap) => Ok(InsertOutcome::Rejected),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&mut self, rules: &[Rule], rule_id: RuleId) -> bool {
        let removed = self.tree.delete(rules, 0, &self.field_order, rule_id);
        if removed {
            self.num_rules -= 1;
            self.max_priority = self.tree.max_priority();
        }
        removed
    }

    pub fn classify(&self, point: &[u32], best_so_far: i64) -> Option<RuleId> {
        if let Some(max) = self.max_priority {
            if best_so_far > max {
                return None;
            }
        } else {
            return None;
        }
        self.tree.classify(point, 0, &self.field_order)
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Every rule id currently stored, in no particular order. Used by
    /// `PartitionSort` to rebuild its id -> tree-slot map after a
    /// resort.
    pub fn rule_ids(&self) -> Vec<RuleId> {
        let mut ids = Vec::new();
        self.tree.collect_rule_ids(&mut ids);
        ids
    }

    /// While young, re-derive the field order from the rules currently
    /// stored and rebuild if it differs. Becomes mature (and permanently
    /// frozen) the first time `num_rules` crosses the threshold.
    fn reconstruct_if_not_mature(&mut self, rules: &[Rule]) {
        if self.is_mature {
            return;
        }
        if self.num_rules >= self.reconstruct_threshold {
            self.is_mature = true;
            return;
        }
        let mut ids = Vec::new();
        self.tree.collect_rule_ids(&mut ids);
        let dim = rules[ids[0] as usize].dim();
        let new_order = fast_greedy_field_order(rules, &ids, dim);
        if new_order != self.field_order {
            // `fast_greedy_field_order` only ranks fields by their
            // standalone weight; unlike `greedy`'s full variant it never
            // narrows, so its top field is not guaranteed overlap-free
            // for the rules currently stored. If rebuilding on it fails,
            // abandon the attempt and keep the tree on its current
            // (already known-good) order rather than losing a rule.
            let mut rebuilt = RangeTree::new();
            let mut ok = true;
            for &id in &ids {
                if rebuilt.insert(rules, 0, &new_order, id).is_err() {
                    ok = false;
                    break;
                }
            }
            if ok {
                self.tree = rebuilt;
                self.field_order = new_order;
            }
        }
    }
}
