// Copyright 2026 Oxide Computer Company

//! A nested red-black tree of disjoint intervals with path compression.
//!
//! One [`RangeTree`] represents *all remaining levels* of nesting for a
//! given [`crate::sortable_tree::SortableTree`]'s field order, starting
//! at some depth `L`. Its state is a three-way sum type:
//!
//! - [`TreeState::Empty`] -- no rule has reached this point yet.
//! - [`TreeState::Compressed`] -- exactly one distinct path through the
//!   remaining levels is stored (the "chain-box"), possibly carrying
//!   more than one rule id if those rules are identical on every
//!   remaining field.
//! - [`TreeState::Materialized`] -- two or more distinct values exist at
//!   level `L`, so a real red-black tree node exists here; each node's
//!   `next` field is itself a nested `RangeTree` for levels `L+1..dim`.
//!
//! This is the arena+index, sum-type redesign called for in the
//! specification: there is no raw-pointer sentinel, and chain-box
//! divergence is a single exhaustive match rather than a family of
//! special cases.

use crate::error::ClassifierError;
use crate::rule::{relate, FieldRange, Relation, Rule, RuleId};

type NodeId = u32;
const NIL: NodeId = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct RbNode {
    lo: u32,
    hi: u32,
    color: Color,
    parent: NodeId,
    left: NodeId,
    right: NodeId,
    next: RangeTree,
}

#[derive(Debug, Clone)]
struct ChainBox {
    /// Intervals for levels `L..dim`, in range form, one per remaining
    /// level.
    remaining: Vec<FieldRange>,
    rules: Vec<RuleId>,
}

#[derive(Debug, Clone)]
struct Materialized {
    arena: Vec<RbNode>,
    root: NodeId,
}

#[derive(Debug, Clone)]
enum TreeState {
    Empty,
    Compressed(ChainBox),
    Materialized(Materialized),
}

#[derive(Debug, Clone)]
pub struct RangeTree {
    state: TreeState,
    count: usize,
    max: Option<(RuleId, i64)>,
}

impl Default for RangeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeTree {
    pub fn new() -> Self {
        RangeTree {
            state: TreeState::Empty,
            count: 0,
            max: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn max_rule(&self) -> Option<RuleId> {
        self.max.map(|(id, _)| id)
    }

    pub fn max_priority(&self) -> Option<i64> {
        self.max.map(|(_, p)| p)
    }

    /// Insert `rule_id` (whose canonical fields live in `rules`) at
    /// field order `field_order`, starting at level `depth`. Fails with
    /// `ForbiddenOverlap` iff some level finds two distinct, overlapping
    /// intervals -- and in that case, nothing is mutated: overlap is
    /// always detected by comparison before any structural change, so
    /// this doubles as the "dry run" `can_insert` the design calls for
    /// (see `SortableTree::try_insert`, which relies on that property
    /// instead of performing a separate non-mutating walk).
    pub fn insert(
        &mut self,
        rules: &[Rule],
        depth: usize,
        field_order: &[usize],
        rule_id: RuleId,
    ) -> Result<(), ClassifierError> {
        let priority = rules[rule_id as usize].priority;
        match &mut self.state {
            TreeState::Empty => {
                let remaining = remaining_key(rules, field_order, depth, rule_id);
                self.state = TreeState::Compressed(ChainBox {
                    remaining,
                    rules: vec![rule_id],
                });
                self.count = 1;
                self.max = Some((rule_id, priority));
                Ok(())
            }
            TreeState::Compressed(_) => self.insert_into_compressed(rules, depth, field_order, rule_id),
            TreeState::Materialized(_) => {
                self.insert_into_materialized(rules, depth, field_order, rule_id)?;
                self.count += 1;
                self.bump_max(rule_id, priority);
                Ok(())
            }
        }
    }

    fn bump_max(&mut self, rule_id: RuleId, priority: i64) {
        if self.max.map(|(_, p)| priority > p).unwrap_or(true) {
            self.max = Some((rule_id, priority));
        }
    }

    fn insert_into_compressed(
        &mut self,
        rules: &[Rule],
        depth: usize,
        field_order: &[usize],
        rule_id: RuleId,
    ) -> Result<(), ClassifierError> {
        let new_remaining = remaining_key(rules, field_order, depth, rule_id);
        let priority = rules[rule_id as usize].priority;

        let divergence = {
            let TreeState::Compressed(chain) = &self.state else {
                unreachable!()
            };
            let mut found = None;
            for i in 0..new_remaining.len() {
                let rel = relate(chain.remaining[i].as_range(), new_remaining[i].as_range());
                if rel != Relation::Equal {
                    found = Some((i, rel));
                    break;
                }
            }
            found
        };

        match divergence {
            None => {
                // Identical through every remaining level: just append.
                let TreeState::Compressed(chain) = &mut self.state else {
                    unreachable!()
                };
                chain.rules.push(rule_id);
                self.count += 1;
                self.bump_max(rule_id, priority);
                Ok(())
            }
            Some((_, Relation::Overlap)) => Err(ClassifierError::ForbiddenOverlap),
            Some((i, rel)) => {
                let old_chain = match std::mem::replace(&mut self.state, TreeState::Empty) {
                    TreeState::Compressed(c) => c,
                    _ => unreachable!(),
                };
                let old_tail: Vec<FieldRange> = old_chain.remaining[i + 1..].to_vec();
                let new_tail: Vec<FieldRange> = new_remaining[i + 1..].to_vec();

                let mut old_leaf = RangeTree::new();
                old_leaf.state = TreeState::Compressed(ChainBox {
                    remaining: old_tail,
                    rules: old_chain.rules.clone(),
                });
                old_leaf.count = old_chain.rules.len();
                old_leaf.max = subtree_max_of_rule_list(&old_chain.rules, rules);

                let mut new_leaf = RangeTree::new();
                new_leaf.state = TreeState::Compressed(ChainBox {
                    remaining: new_tail,
                    rules: vec![rule_id],
                });
                new_leaf.count = 1;
                new_leaf.max = Some((rule_id, priority));

                let (old_lo, old_hi) = old_chain.remaining[i].as_range();
                let (new_lo, new_hi) = new_remaining[i].as_range();

                let mut arena = Vec::with_capacity(2);
                let (first_interval, first_leaf, second_interval, second_leaf) = match rel {
                    Relation::Less => ((old_lo, old_hi), old_leaf, (new_lo, new_hi), new_leaf),
                    Relation::Greater => ((new_lo, new_hi), new_leaf, (old_lo, old_hi), old_leaf),
                    _ => unreachable!(),
                };
                let root_id: NodeId = 0;
                arena.push(RbNode {
                    lo: first_interval.0,
                    hi: first_interval.1,
                    color: Color::Black,
                    parent: NIL,
                    left: NIL,
                    right: NIL,
                    next: first_leaf,
                });
                let mut divergence_tree = Materialized { arena, root: root_id };
                let child_id = rb_insert_node(
                    &mut divergence_tree,
                    root_id,
                    second_interval.0,
                    second_interval.1,
                    second_leaf,
                )
                .expect("two distinct, ordered intervals always insert");
                let _ = child_id;

                // Wrap the shared-prefix levels depth..depth+i as a
                // chain of degenerate single-node trees, innermost being
                // `divergence_tree`.
                let mut inner = RangeTree {
                    state: TreeState::Materialized(divergence_tree),
                    count: old_chain.rules.len() + 1,
                    max: None,
                };
                inner.max = inner.recompute_max(rules);

                for lvl in (0..i).rev() {
                    let (lo, hi) = old_chain.remaining[lvl].as_range();
                    let node = RbNode {
                        lo,
                        hi,
                        color: Color::Black,
                        parent: NIL,
                        left: NIL,
                        right: NIL,
                        next: inner,
                    };
                    let max = node.next.max;
                    let count = node.next.count;
                    inner = RangeTree {
                        state: TreeState::Materialized(Materialized {
                            arena: vec![node],
                            root: 0,
                        }),
                        count,
                        max,
                    };
                }

                self.state = inner.state;
                self.count = inner.count;
                self.max = inner.max;
                Ok(())
            }
        }
    }

    fn insert_into_materialized(
        &mut self,
        rules: &[Rule],
        depth: usize,
        field_order: &[usize],
        rule_id: RuleId,
    ) -> Result<(), ClassifierError> {
        let TreeState::Materialized(m) = &mut self.state else {
            unreachable!()
        };
        insert_materialized_recursive(m, m.root, rules, depth, field_order, rule_id)
    }

    /// Recompute the cached max by walking the live tree structure
    /// (never raw arena order, since deleted nodes leave tombstoned
    /// slots behind). Used after deleting the cached maximum.
    fn recompute_max(&self, rules: &[Rule]) -> Option<(RuleId, i64)> {
        match &self.state {
            TreeState::Empty => None,
            TreeState::Compressed(chain) => subtree_max_of_rule_list(&chain.rules, rules),
            TreeState::Materialized(m) => materialized_max(m, m.root, rules),
        }
    }

    /// Remove `rule_id` if present anywhere below this tree. Returns
    /// true iff something was removed. A missing id is a silent no-op
    /// (mirrors the source's `ps_rule_delete` contract).
    pub fn delete(&mut self, rules: &[Rule], depth: usize, field_order: &[usize], rule_id: RuleId) -> bool {
        let removed = match &mut self.state {
            TreeState::Empty => false,
            TreeState::Compressed(chain) => {
                if let Some(pos) = chain.rules.iter().position(|&r| r == rule_id) {
                    chain.rules.remove(pos);
                    if chain.rules.is_empty() {
                        self.state = TreeState::Empty;
                    }
                    true
                } else {
                    false
                }
            }
            TreeState::Materialized(m) => delete_materialized(m, rules, depth, field_order, rule_id),
        };
        if removed {
            self.count -= 1;
            if self.max.map(|(id, _)| id == rule_id).unwrap_or(false) {
                self.max = self.recompute_max(rules);
            }
            // A materialized tree that collapsed to exactly one
            // remaining rule re-compresses into a chain-box (spec
            // 4.4's "count == 2 collapses back").
            if let TreeState::Materialized(m) = &self.state {
                if self.count <= 1 {
                    self.state = recompress(m, field_order, depth);
                }
            }
        }
        removed
    }

    /// Look up the packet's projected point vector against this (sub)
    /// tree, returning the stored max-priority rule on a full match.
    pub fn classify(&self, point: &[u32], depth: usize, field_order: &[usize]) -> Option<RuleId> {
        match &self.state {
            TreeState::Empty => None,
            TreeState::Compressed(chain) => {
                for (k, range) in chain.remaining.iter().enumerate() {
                    let f = field_order[depth + k];
                    let (lo, hi) = range.as_range();
                    if point[f] < lo || point[f] > hi {
                        return None;
                    }
                }
                self.max.map(|(id, _)| id)
            }
            TreeState::Materialized(m) => {
                let f = field_order[depth];
                let mut cur = m.root;
                loop {
                    if cur == NIL {
                        return None;
                    }
                    let node = &m.arena[cur as usize];
                    let p = point[f];
                    if p < node.lo {
                        cur = node.left;
                    } else if p > node.hi {
                        cur = node.right;
                    } else {
                        return node.next.classify(point, depth + 1, field_order);
                    }
                }
            }
        }
    }

    /// Flatten every rule id stored anywhere below this tree, for
    /// `SortableTree::reconstruct_if_num_rules_leq`'s serialize step.
    pub fn collect_rule_ids(&self, out: &mut Vec<RuleId>) {
        match &self.state {
            TreeState::Empty => {}
            TreeState::Compressed(chain) => out.extend_from_slice(&chain.rules),
            TreeState::Materialized(m) => collect_materialized(m, m.root, out),
        }
    }
}

fn remaining_key(rules: &[Rule], field_order: &[usize], depth: usize, rule_id: RuleId) -> Vec<FieldRange> {
    let rule = &rules[rule_id as usize];
    field_order[depth..].iter().map(|&f| rule.fields[f]).collect()
}

fn subtree_max_of_rule_list(rule_ids: &[RuleId], rules: &[Rule]) -> Option<(RuleId, i64)> {
    rule_ids
        .iter()
        .map(|&id| (id, rules[id as usize].priority))
        .max_by_key(|&(_, p)| p)
}

fn materialized_max(m: &Materialized, id: NodeId, rules: &[Rule]) -> Option<(RuleId, i64)> {
    if id == NIL {
        return None;
    }
    let node = &m.arena[id as usize];
    let mut best = node.next.max;
    if let Some((lid, lp)) = materialized_max(m, node.left, rules) {
        if best.map(|(_, bp)| lp > bp).unwrap_or(true) {
            best = Some((lid, lp));
        }
    }
    if let Some((rid, rp)) = materialized_max(m, node.right, rules) {
        if best.map(|(_, bp)| rp > bp).unwrap_or(true) {
            best = Some((rid, rp));
        }
    }
    best
}

fn collect_materialized(m: &Materialized, id: NodeId, out: &mut Vec<RuleId>) {
    if id == NIL {
        return;
    }
    let node = &m.arena[id as usize];
    collect_materialized(m, node.left, out);
    node.next.collect_rule_ids(out);
    collect_materialized(m, node.right, out);
}

// ---- red-black tree machinery over the arena ----

fn color_of(m: &Materialized, id: NodeId) -> Color {
    if id == NIL {
        Color::Black
    } else {
        m.arena[id as usize].color
    }
}

fn left_rotate(m: &mut Materialized, x: NodeId) {
    let y = m.arena[x as usize].right;
    m.arena[x as usize].right = m.arena[y as usize].left;
    if m.arena[y as usize].left != NIL {
        let yl = m.arena[y as usize].left;
        m.arena[yl as usize].parent = x;
    }
    m.arena[y as usize].parent = m.arena[x as usize].parent;
    let xp = m.arena[x as usize].parent;
    if xp == NIL {
        m.root = y;
    } else if m.arena[xp as usize].left == x {
        m.arena[xp as usize].left = y;
    } else {
        m.arena[xp as usize].right = y;
    }
    m.arena[y as usize].left = x;
    m.arena[x as usize].parent = y;
}

fn right_rotate(m: &mut Materialized, x: NodeId) {
    let y = m.arena[x as usize].left;
    m.arena[x as usize].left = m.arena[y as usize].right;
    if m.arena[y as usize].right != NIL {
        let yr = m.arena[y as usize].right;
        m.arena[yr as usize].parent = x;
    }
    m.arena[y as usize].parent = m.arena[x as usize].parent;
    let xp = m.arena[x as usize].parent;
    if xp == NIL {
        m.root = y;
    } else if m.arena[xp as usize].right == x {
        m.arena[xp as usize].right = y;
    } else {
        m.arena[xp as usize].left = y;
    }
    m.arena[y as usize].right = x;
    m.arena[x as usize].parent = y;
}

/// Insert a fresh leaf with interval `(lo,hi)` and payload `next` into
/// an already-materialized tree, returning its node id. Used only when
/// the two intervals are already known not to overlap (the divergence
/// case in `insert_into_compressed`, where CLRS fixup on a 2-node tree
/// is trivial).
fn rb_insert_node(
    m: &mut Materialized,
    start: NodeId,
    lo: u32,
    hi: u32,
    next: RangeTree,
) -> Result<NodeId, ClassifierError> {
    let mut cur = start;
    let mut parent = NIL;
    let mut went_left = false;
    loop {
        if cur == NIL {
            break;
        }
        let node = &m.arena[cur as usize];
        match relate((node.lo, node.hi), (lo, hi)) {
            Relation::Equal => unreachable!("caller guarantees distinct intervals"),
            Relation::Overlap => return Err(ClassifierError::ForbiddenOverlap),
            Relation::Less => {
                parent = cur;
                went_left = false;
                cur = node.right;
            }
            Relation::Greater => {
                parent = cur;
                went_left = true;
                cur = node.left;
            }
        }
    }
    let id = m.arena.len() as NodeId;
    m.arena.push(RbNode {
        lo,
        hi,
        color: Color::Red,
        parent,
        left: NIL,
        right: NIL,
        next,
    });
    if parent == NIL {
        m.root = id;
        m.arena[id as usize].color = Color::Black;
    } else if went_left {
        m.arena[parent as usize].left = id;
    } else {
        m.arena[parent as usize].right = id;
    }
    rb_insert_fixup(m, id);
    Ok(id)
}

fn rb_insert_fixup(m: &mut Materialized, mut z: NodeId) {
    while m.arena[z as usize].parent != NIL && color_of(m, m.arena[z as usize].parent) == Color::Red {
        let zp = m.arena[z as usize].parent;
        let zpp = m.arena[zp as usize].parent;
        if zpp == NIL {
            break;
        }
        if zp == m.arena[zpp as usize].left {
            let y = m.arena[zpp as usize].right;
            if color_of(m, y) == Color::Red {
                m.arena[zp as usize].color = Color::Black;
                m.arena[y as usize].color = Color::Black;
                m.arena[zpp as usize].color = Color::Red;
                z = zpp;
            } else {
                if z == m.arena[zp as usize].right {
                    z = zp;
                    left_rotate(m, z);
                }
                let zp = m.arena[z as usize].parent;
                let zpp = m.arena[zp as usize].parent;
                m.arena[zp as usize].color = Color::Black;
                m.arena[zpp as usize].color = Color::Red;
                right_rotate(m, zpp);
            }
        } else {
            let y = m.arena[zpp as usize].left;
            if color_of(m, y) == Color::Red {
                m.arena[zp as usize].color = Color::Black;
                m.arena[y as usize].color = Color::Black;
                m.arena[zpp as usize].color = Color::Red;
                z = zpp;
            } else {
                if z == m.arena[zp as usize].left {
                    z = zp;
                    right_rotate(m, z);
                }
                let zp = m.arena[z as usize].parent;
                let zpp = m.arena[zp as usize].parent;
                m.arena[zp as usize].color = Color::Black;
                m.arena[zpp as usize].color = Color::Red;
                left_rotate(m, zpp);
            }
        }
    }
    m.arena[m.root as usize].color = Color::Black;
}

fn insert_materialized_recursive(
    m: &mut Materialized,
    node_id: NodeId,
    rules: &[Rule],
    depth: usize,
    field_order: &[usize],
    rule_id: RuleId,
) -> Result<(), ClassifierError> {
    let f = field_order[depth];
    let (lo, hi) = rules[rule_id as usize].fields[f].as_range();
    let rel = relate((m.arena[node_id as usize].lo, m.arena[node_id as usize].hi), (lo, hi));
    match rel {
        Relation::Overlap => Err(ClassifierError::ForbiddenOverlap),
        Relation::Equal => {
            let mut next = std::mem::replace(&mut m.arena[node_id as usize].next, RangeTree::new());
            let res = next.insert(rules, depth + 1, field_order, rule_id);
            m.arena[node_id as usize].next = next;
            res
        }
        Relation::Less => {
            let right = m.arena[node_id as usize].right;
            if right == NIL {
                let mut leaf = RangeTree::new();
                leaf.insert(rules, depth + 1, field_order, rule_id)?;
                let id = m.arena.len() as NodeId;
                m.arena.push(RbNode {
                    lo,
                    hi,
                    color: Color::Red,
                    parent: node_id,
                    left: NIL,
                    right: NIL,
                    next: leaf,
                });
                m.arena[node_id as usize].right = id;
                rb_insert_fixup(m, id);
                Ok(())
            } else {
                insert_materialized_recursive(m, right, rules, depth, field_order, rule_id)
            }
        }
        Relation::Greater => {
            let left = m.arena[node_id as usize].left;
            if left == NIL {
                let mut leaf = RangeTree::new();
                leaf.insert(rules, depth + 1, field_order, rule_id)?;
                let id = m.arena.len() as NodeId;
                m.arena.push(RbNode {
                    lo,
                    hi,
                    color: Color::Red,
                    parent: node_id,
                    left: NIL,
                    right: NIL,
                    next: leaf,
                });
                m.arena[node_id as usize].left = id;
                rb_insert_fixup(m, id);
                Ok(())
            } else {
                insert_materialized_recursive(m, left, rules, depth, field_order, rule_id)
            }
        }
    }
}

fn transplant(m: &mut Materialized, u: NodeId, v: NodeId) {
    let up = m.arena[u as usize].parent;
    if up == NIL {
        m.root = v;
    } else if m.arena[up as usize].left == u {
        m.arena[up as usize].left = v;
    } else {
        m.arena[up as usize].right = v;
    }
    if v != NIL {
        m.arena[v as usize].parent = up;
    }
}

fn tree_minimum(m: &Materialized, mut id: NodeId) -> NodeId {
    while m.arena[id as usize].left != NIL {
        id = m.arena[id as usize].left;
    }
    id
}

/// Find the node matching `rule_id` at this level -- either as a direct
/// hit (node carries it in a compressed/empty-remaining `next`) or by
/// recursing into `next` -- and delete it. Returns true if found.
fn delete_materialized(
    m: &mut Materialized,
    rules: &[Rule],
    depth: usize,
    field_order: &[usize],
    rule_id: RuleId,
) -> bool {
    let Some(node_id) = find_node_for_rule(m, m.root, rules, depth, field_order, rule_id) else {
        return false;
    };
    // Delete from the node's `next` subtree first.
    let mut next = std::mem::replace(&mut m.arena[node_id as usize].next, RangeTree::new());
    let removed = next.delete(rules, depth + 1, field_order, rule_id);
    let next_empty = next.is_empty();
    m.arena[node_id as usize].next = next;
    if !removed {
        return false;
    }
    if next_empty {
        rb_delete_node(m, node_id);
    }
    true
}

fn find_node_for_rule(
    m: &Materialized,
    node_id: NodeId,
    rules: &[Rule],
    depth: usize,
    field_order: &[usize],
    rule_id: RuleId,
) -> Option<NodeId> {
    if node_id == NIL {
        return None;
    }
    let f = field_order[depth];
    let (lo, hi) = rules[rule_id as usize].fields[f].as_range();
    let node = &m.arena[node_id as usize];
    match relate((node.lo, node.hi), (lo, hi)) {
        Relation::Equal => Some(node_id),
        Relation::Less => find_node_for_rule(m, node.right, rules, depth, field_order, rule_id),
        Relation::Greater => find_node_for_rule(m, node.left, rules, depth, field_order, rule_id),
        Relation::Overlap => None,
    }
}

fn rb_delete_node(m: &mut Materialized, z: NodeId) {
    let mut y = z;
    let mut y_original_color = m.arena[y as usize].color;
    let x: NodeId;
    let x_parent: NodeId;

    if m.arena[z as usize].left == NIL {
        x = m.arena[z as usize].right;
        x_parent = m.arena[z as usize].parent;
        transplant(m, z, x);
    } else if m.arena[z as usize].right == NIL {
        x = m.arena[z as usize].left;
        x_parent = m.arena[z as usize].parent;
        transplant(m, z, x);
    } else {
        y = tree_minimum(m, m.arena[z as usize].right);
        y_original_color = m.arena[y as usize].color;
        x = m.arena[y as usize].right;
        if m.arena[y as usize].parent == z {
            x_parent = y;
            if x != NIL {
                m.arena[x as usize].parent = y;
            }
        } else {
            x_parent = m.arena[y as usize].parent;
            transplant(m, y, x);
            let zr = m.arena[z as usize].right;
            m.arena[y as usize].right = zr;
            m.arena[zr as usize].parent = y;
        }
        transplant(m, z, y);
        let zl = m.arena[z as usize].left;
        m.arena[y as usize].left = zl;
        m.arena[zl as usize].parent = y;
        m.arena[y as usize].color = m.arena[z as usize].color;
    }

    if y_original_color == Color::Black {
        rb_delete_fixup(m, x, x_parent);
    }
}

fn rb_delete_fixup(m: &mut Materialized, mut x: NodeId, mut parent: NodeId) {
    while x != m.root && color_of(m, x) == Color::Black && parent != NIL {
        if x == m.arena[parent as usize].left {
            let mut w = m.arena[parent as usize].right;
            if color_of(m, w) == Color::Red {
                m.arena[w as usize].color = Color::Black;
                m.arena[parent as usize].color = Color::Red;
                left_rotate(m, parent);
                w = m.arena[parent as usize].right;
            }
            let wl = m.arena[w as usize].left;
            let wr = m.arena[w as usize].right;
            if color_of(m, wl) == Color::Black && color_of(m, wr) == Color::Black {
                m.arena[w as usize].color = Color::Red;
                x = parent;
                parent = m.arena[x as usize].parent;
            } else {
                if color_of(m, wr) == Color::Black {
                    if wl != NIL {
                        m.arena[wl as usize].color = Color::Black;
                    }
                    m.arena[w as usize].color = Color::Red;
                    right_rotate(m, w);
                    w = m.arena[parent as usize].right;
                }
                m.arena[w as usize].color = m.arena[parent as usize].color;
                m.arena[parent as usize].color = Color::Black;
                let wr = m.arena[w as usize].right;
                if wr != NIL {
                    m.arena[wr as usize].color = Color::Black;
                }
                left_rotate(m, parent);
                x = m.root;
                parent = NIL;
            }
        } else {
            let mut w = m.arena[parent as usize].left;
            if color_of(m, w) == Color::Red {
                m.arena[w as usize].color = Color::Black;
                m.arena[parent as usize].color = Color::Red;
                right_rotate(m, parent);
                w = m.arena[parent as usize].left;
            }
            let wl = m.arena[w as usize].left;
            let wr = m.arena[w as usize].right;
            if color_of(m, wl) == Color::Black && color_of(m, wr) == Color::Black {
                m.arena[w as usize].color = Color::Red;
                x = parent;
                parent = m.arena[x as usize].parent;
            } else {
                if color_of(m, wl) == Color::Black {
                    if wr != NIL {
                        m.arena[wr as usize].color = Color::Black;
                    }
                    m.arena[w as usize].color = Color::Red;
                    left_rotate(m, w);
                    w = m.arena[parent as usize].left;
                }
                m.arena[w as usize].color = m.arena[parent as usize].color;
                m.arena[parent as usize].color = Color::Black;
                let wl = m.arena[w as usize].left;
                if wl != NIL {
                    m.arena[wl as usize].color = Color::Black;
                }
                right_rotate(m, parent);
                x = m.root;
                parent = NIL;
            }
        }
    }
    if x != NIL {
        m.arena[x as usize].color = Color::Black;
    }
}

/// If a materialized tree has collapsed to a single remaining rule (or
/// none), fold it back into a chain-box rather than keeping a
/// degenerate one-node red-black tree around.
fn recompress(m: &Materialized, field_order: &[usize], depth: usize) -> TreeState {
    let mut ids = Vec::new();
    collect_materialized(m, m.root, &mut ids);
    if ids.is_empty() {
        return TreeState::Empty;
    }
    debug_assert_eq!(ids.len(), 1, "recompress called with >1 rule remaining");
    // Walk down to the sole surviving node, synthesising the chain-box
    // from the concatenated level intervals plus its own (now terminal)
    // remaining box.
    let mut remaining = Vec::new();
    let mut cur = m.root;
    let mut leaf_remaining: Vec<FieldRange> = Vec::new();
    loop {
        let node = &m.arena[cur as usize];
        remaining.push(FieldRange::Range { lo: node.lo, hi: node.hi });
        match &node.next.state {
            TreeState::Empty => break,
            TreeState::Compressed(chain) => {
                leaf_remaining = chain.remaining.clone();
                break;
            }
            TreeState::Materialized(inner) => {
                cur = inner.root;
            }
        }
    }
    remaining.extend(leaf_remaining);
    let _ = (field_order, depth);
    TreeState::Compressed(ChainBox { remaining, rules: ids })
}
