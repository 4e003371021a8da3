// Copyright 2026 Oxide Computer Company

//! Greedy field selection: decides, for a set of rules, which fields
//! (and in what order) let them be threaded through a single
//! [`crate::sortable_tree::SortableTree`], and splits an arbitrary rule
//! set into one or more such sortable subsets.
//!
//! Two variants exist, per spec 4.3: the "full" variant here
//! ([`greedy`]/[`partition`]) narrows the candidate rule set at every
//! iteration via [`crate::interval::mwis`] and is used for offline bulk
//! construction; the "fast" variant ([`fast_greedy_field_order`]) skips
//! the narrowing (the input is already known sortable as a whole) and
//! is cheap enough to run after every insertion into an immature tree.

use crate::interval::{unique_intervals, mwis, WeightedInterval};
use crate::rule::{Rule, RuleId};

/// One partition produced by [`partition`]: a subset of the input rules
/// together with the field order that makes them sortable.
#[derive(Debug, Clone)]
pub struct SortableRuleset {
    pub rule_ids: Vec<RuleId>,
    pub field_order: Vec<usize>,
}

/// Group `ids` by the interval their field `field` projects to, run
/// MWIS over the grouped weights (`count + 1` each, per
/// [`unique_intervals`]), and return the surviving rule ids (whole
/// groups, not partial) plus the total weight selected.
fn mwis_subset_on_field(rules: &[Rule], ids: &[RuleId], field: usize) -> (Vec<RuleId>, u64) {
    let mut groups: Vec<(u32, u32, Vec<RuleId>)> = Vec::new();
    for &id in ids {
        let (lo, hi) = rules[id as usize].fields[field].as_range();
        if let Some(g) = groups.iter_mut().find(|g| g.0 == lo && g.1 == hi) {
            g.2.push(id);
        } else {
            groups.push((lo, hi, vec![id]));
        }
    }
    let weighted: Vec<WeightedInterval> = groups
        .iter()
        .map(|g| WeightedInterval { lo: g.0, hi: g.1, weight: g.2.len() as u64 + 1 })
        .collect();
    let picked = mwis(&weighted);
    let total: u64 = picked.iter().map(|&i| weighted[i].weight).sum();
    let subset: Vec<RuleId> = picked.iter().flat_map(|&i| groups[i].2.clone()).collect();
    (subset, total)
}

/// Greedy field selection (spec 4.3): picks a field order one field at
/// a time, always taking the field whose per-partition MWIS total is
/// highest among the fields not yet chosen, then narrows each partition
/// down to its MWIS subset on the chosen field -- including the first
/// field picked. Without narrowing on round zero, `chosen` would only be
/// guaranteed pairwise non-overlapping-or-identical on `field_order[1..]`;
/// two distinct rules could still overlap on `field_order[0]`, which a
/// `RangeTree` built on this order can't hold at its top level. Returns
/// the union of the final partitions (the sortable subset) and the field
/// order that sorts it.
pub fn greedy(rules: &[Rule], ids: &[RuleId], dim: usize) -> (Vec<RuleId>, Vec<usize>) {
    if dim == 0 || ids.is_empty() {
        return (ids.to_vec(), Vec::new());
    }
    let mut current_partitions: Vec<Vec<RuleId>> = vec![ids.to_vec()];
    let mut field_order: Vec<usize> = Vec::with_capacity(dim);

    for _ in 0..dim {
        let mut best: Option<(usize, u64, Vec<Vec<RuleId>>)> = None;
        for j in 0..dim {
            if field_order.contains(&j) {
                continue;
            }
            let mut total = 0u64;
            let mut subsets = Vec::with_capacity(current_partitions.len());
            for part in &current_partitions {
                let (subset, weight) = mwis_subset_on_field(rules, part, j);
                total += weight;
                subsets.push(subset);
            }
            let better = match &best {
                None => true,
                Some((_, best_total, _)) => total > *best_total,
            };
            if better {
                best = Some((j, total, subsets));
            }
        }
        let (jstar, _total, subsets) = best.expect("dim - field_order.len() > 0 guarantees a candidate");
        field_order.push(jstar);
        current_partitions = subsets;
    }

    let chosen: Vec<RuleId> = current_partitions.into_iter().flatten().collect();
    (chosen, field_order)
}

/// Offline bulk entry point: repeatedly run [`greedy`] on whatever
/// rules remain, peeling off one [`SortableRuleset`] per round, until
/// none are left.
pub fn partition(rules: &[Rule], dim: usize) -> Vec<SortableRuleset> {
    partition_subset(rules, &(0..rules.len() as RuleId).collect::<Vec<_>>(), dim)
}

/// Like [`partition`] but scoped to an explicit subset of rule ids
/// (e.g. only the contiguous rules of a mixed rule set).
pub fn partition_subset(rules: &[Rule], ids: &[RuleId], dim: usize) -> Vec<SortableRuleset> {
    let mut remaining: Vec<RuleId> = ids.to_vec();
    let mut out = Vec::new();
    while !remaining.is_empty() {
        let (chosen, field_order) = greedy(rules, &remaining, dim);
        let chosen_set: std::collections::HashSet<RuleId> = chosen.iter().copied().collect();
        remaining.retain(|id| !chosen_set.contains(id));
        out.push(SortableRuleset { rule_ids: chosen, field_order });
    }
    out
}

/// Fast variant (spec 4.3): ranks every field once by its
/// [`unique_intervals`] weight over the full `ids` set -- valid because
/// the caller (`SortableTree::reconstruct_if_num_rules_leq`) only ever
/// calls this on a rule set already known to fit one tree, so there is
/// no partition to narrow between fields.
pub fn fast_greedy_field_order(rules: &[Rule], ids: &[RuleId], dim: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, u64)> = (0..dim)
        .map(|j| {
            let intervals: Vec<(u32, u32)> = ids.iter().map(|&id| rules[id as usize].fields[j].as_range()).collect();
            let weight: u64 = unique_intervals(&intervals).iter().map(|w| w.weight).sum();
            (j, weight)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().map(|(j, _)| j).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::FieldRange as FR;

    fn rule(fields: &[(u32, u32)], priority: i64, id: RuleId) -> Rule {
        Rule {
            fields: fields.iter().map(|&(lo, hi)| FR::Range { lo, hi }).collect(),
            prefix_length: fields.iter().map(|_| 0).collect(),
            priority,
            contiguous: true,
            master: id as u64,
            id,
        }
    }

    #[test]
    fn greedy_picks_the_field_that_sorts_everything_when_one_exists() {
        let rules = vec![
            rule(&[(0, 10), (0, 1000)], 1, 0),
            rule(&[(20, 30), (0, 1000)], 2, 1),
            rule(&[(40, 50), (0, 1000)], 3, 2),
        ];
        let ids: Vec<RuleId> = vec![0, 1, 2];
        let (chosen, order) = greedy(&rules, &ids, 2);
        assert_eq!(order[0], 0);
        let mut chosen_sorted = chosen.clone();
        chosen_sorted.sort();
        assert_eq!(chosen_sorted, vec![0, 1, 2]);
    }

    #[test]
    fn greedy_drops_a_rule_that_only_the_second_field_would_have_saved() {
        // Field 0 overlaps for rules 0 and 1; field 1 is fully disjoint.
        // The greedy MWIS criterion picks field 1 first (it scores higher
        // in isolation), keeps both rules after narrowing on it, then the
        // second round narrows on field 0 and drops one of them -- it
        // gets picked up by the next round's tree (see `partition`). This
        // mirrors the source heuristic: greedy field selection is not
        // globally optimal.
        let rules = vec![rule(&[(0, 20), (0, 10)], 1, 0), rule(&[(10, 30), (20, 30)], 2, 1)];
        let ids: Vec<RuleId> = vec![0, 1];
        let (chosen, order) = greedy(&rules, &ids, 2);
        assert_eq!(order, vec![1, 0]);
        assert_eq!(chosen.len(), 1);
    }

    #[test]
    fn greedy_narrows_the_very_first_field_too() {
        // Four rules, two fields. Field 1 scores highest at round zero
        // (6 vs. field 0's 4) but still has its own overlap (rule 1
        // sits inside rule 0's field-1 range); if round zero doesn't
        // narrow on its own winning field, rule 1 rides along unchecked
        // and only gets caught later if some other field happens to
        // conflict with it too -- it doesn't here, since rule 1 is
        // identical to rule 0 on field 0 and field 0 is evaluated last.
        let rules = vec![
            rule(&[(0, 100), (0, 50)], 1, 0),
            rule(&[(0, 100), (25, 75)], 1, 1),
            rule(&[(0, 100), (100, 110)], 1, 2),
            rule(&[(50, 60), (120, 130)], 1, 3),
        ];
        let ids: Vec<RuleId> = vec![0, 1, 2, 3];
        let (chosen, order) = greedy(&rules, &ids, 2);
        assert_eq!(order, vec![1, 0]);
        let mut sorted_chosen = chosen.clone();
        sorted_chosen.sort();
        assert_eq!(sorted_chosen, vec![0, 2]);

        // Every surviving pair must be Equal or non-overlapping on every
        // field in `order`, not just the last one chosen.
        for &field in &order {
            for i in 0..chosen.len() {
                for j in (i + 1)..chosen.len() {
                    let a = rules[chosen[i] as usize].fields[field].as_range();
                    let b = rules[chosen[j] as usize].fields[field].as_range();
                    assert_ne!(crate::rule::relate(a, b), crate::rule::Relation::Overlap);
                }
            }
        }
    }

    #[test]
    fn partition_covers_every_rule_across_rounds() {
        let rules = vec![
            rule(&[(0, 10), (0, 10)], 1, 0),
            rule(&[(5, 15), (20, 30)], 1, 1),
            rule(&[(0, 10), (40, 50)], 1, 2),
        ];
        let psets = partition(&rules, 2);
        let mut all: Vec<RuleId> = psets.iter().flat_map(|p| p.rule_ids.clone()).collect();
        all.sort();
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn fast_variant_matches_full_variant_when_fully_sortable() {
        let rules = vec![
            rule(&[(0, 10), (0, 1000)], 1, 0),
            rule(&[(20, 30), (0, 1000)], 2, 1),
            rule(&[(40, 50), (0, 1000)], 3, 2),
        ];
        let ids: Vec<RuleId> = vec![0, 1, 2];
        let (_, full_order) = greedy(&rules, &ids, 2);
        let fast_order = fast_greedy_field_order(&rules, &ids, 2);
        assert_eq!(full_order, fast_order);
    }
}
