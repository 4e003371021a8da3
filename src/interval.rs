// Copyright 2026 Oxide Computer Company

//! Interval arithmetic used by the [`crate::partitioner`] to decide
//! whether a rule set can be sorted on a given field, and which subset
//! to keep if not everything fits.

/// An interval in range form together with a weight -- either "how many
/// rules collapse onto this exact interval" (`unique_intervals`) or an
/// arbitrary caller-supplied weight (`mwis`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedInterval {
    pub lo: u32,
    pub hi: u32,
    pub weight: u64,
}

/// Counts the maximum number of intervals covering any single point.
///
/// A sweep over start/end events: a set is sortable on this field iff
/// this returns <= 1 once identical intervals are collapsed (see
/// [`unique_intervals`]).
pub fn max_overlap(intervals: &[(u32, u32)]) -> usize {
    if intervals.is_empty() {
        return 0;
    }
    // Event: (coordinate, is_start). Starts before ends at a shared
    // coordinate, since coverage is inclusive on both ends.
    let mut events: Vec<(u32, bool)> = Vec::with_capacity(intervals.len() * 2);
    for &(lo, hi) in intervals {
        events.push((lo, true));
        events.push((hi, false));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    let mut depth: isize = 0;
    let mut max_depth: isize = 0;
    for (_, is_start) in events {
        if is_start {
            depth += 1;
            max_depth = max_depth.max(depth);
        } else {
            depth -= 1;
        }
    }
    max_depth.max(0) as usize
}

/// Groups identical `[lo,hi]` intervals; the weight of each group is
/// `count + 1` (matching the source's `iu_set_weight_by_size_plus_one`:
/// a singleton interval still "counts double" against the alternative of
/// not sorting on this field at all).
pub fn unique_intervals(intervals: &[(u32, u32)]) -> Vec<WeightedInterval> {
    let mut sorted: Vec<(u32, u32)> = intervals.to_vec();
    sorted.sort();
    let mut out: Vec<WeightedInterval> = Vec::new();
    for (lo, hi) in sorted {
        if let Some(last) = out.last_mut() {
            if last.lo == lo && last.hi == hi {
                last.weight += 1;
                continue;
            }
        }
        out.push(WeightedInterval { lo, hi, weight: 2 });
    }
    out
}

/// Maximum-weighted independent (pairwise non-overlapping) subset of
/// `weighted`. Returns indices into `weighted`, sorted ascending.
///
/// Classic sweep-line DP: sort by right endpoint, `chi[i] = weight[i] +
/// max{chi[j] : right[j] < left[i]}`, recover by backtracking. Ties are
/// broken in favour of the path touching the smallest indices, by
/// scanning candidates in index order and only replacing the running
/// best on a strict improvement.
pub fn mwis(weighted: &[WeightedInterval]) -> Vec<usize> {
    let n = weighted.len();
    if n == 0 {
        return Vec::new();
    }
    // Order by (right endpoint, then left ascending as is_left tie-break
    // so coincident endpoints get a deterministic total order).
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        weighted[a]
            .hi
            .cmp(&weighted[b].hi)
            .then(weighted[a].lo.cmp(&weighted[b].lo))
            .then(a.cmp(&b))
    });

    // chi[k] = best weight achievable using only order[0..=k].
    // prev[k] = predecessor chosen index in `order` space, or None.
    let mut chi: Vec<u64> = vec![0; n];
    let mut take: Vec<bool> = vec![false; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];

    for k in 0..n {
        let i = order[k];
        let left = weighted[i].lo;
        // Largest k' < k with order[k'].hi < left, found by linear scan
        // for clarity (classifier rule counts are small; a binary search
        // over a separately-sorted `hi` array is the obvious speedup).
        let mut best_prev: Option<usize> = None;
        for kp in (0..k).rev() {
            if weighted[order[kp]].hi < left {
                best_prev = Some(kp);
                break;
            }
        }
        let without = if k == 0 { 0 } else { chi[k - 1] };
        let with = weighted[i].weight + best_prev.map(|kp| chi[kp]).unwrap_or(0);
        if with > without {
            chi[k] = with;
            take[k] = true;
            prev[k] = best_prev;
        } else {
            chi[k] = without;
            take[k] = false;
            prev[k] = if k == 0 { None } else { Some(k - 1) };
        }
    }

    let mut result = Vec::new();
    let mut cursor = Some(n - 1);
    while let Some(k) = cursor {
        if take[k] {
            result.push(order[k]);
            cursor = prev[k];
        } else if k == 0 {
            cursor = None;
        } else {
            cursor = Some(k - 1);
        }
    }
    result.sort_unstable();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_overlap_disjoint_is_one() {
        assert_eq!(max_overlap(&[(0, 5), (6, 10), (11, 20)]), 1);
    }

    #[test]
    fn max_overlap_detects_triple_cover() {
        assert_eq!(max_overlap(&[(0, 10), (5, 15), (8, 20)]), 3);
    }

    #[test]
    fn unique_intervals_groups_and_weights() {
        let grouped = unique_intervals(&[(0, 5), (0, 5), (6, 10)]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].weight, 3);
        assert_eq!(grouped[1].weight, 2);
    }

    #[test]
    fn mwis_picks_disjoint_max_weight_set() {
        let w = vec![
            WeightedInterval { lo: 0, hi: 5, weight: 2 },
            WeightedInterval { lo: 3, hi: 8, weight: 10 },
            WeightedInterval { lo: 6, hi: 10, weight: 2 },
        ];
        // Overlapping middle interval has much higher weight but
        // conflicts with both neighbours; MWIS should still prefer the
        // pair over the single heavy one since 2+2 < 10, so it should
        // pick just the heavy one here.
        let picked = mwis(&w);
        assert_eq!(picked, vec![1]);
    }

    #[test]
    fn mwis_prefers_pair_when_it_outweighs_singleton() {
        let w = vec![
            WeightedInterval { lo: 0, hi: 5, weight: 5 },
            WeightedInterval { lo: 3, hi: 8, weight: 6 },
            WeightedInterval { lo: 6, hi: 10, weight: 5 },
        ];
        let picked = mwis(&w);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn mwis_all_disjoint_keeps_everything() {
        let w = vec![
            WeightedInterval { lo: 0, hi: 5, weight: 1 },
            WeightedInterval { lo: 6, hi: 10, weight: 1 },
            WeightedInterval { lo: 11, hi: 20, weight: 1 },
        ];
        assert_eq!(mwis(&w), vec![0, 1, 2]);
    }
}
