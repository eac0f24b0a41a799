//! # Nesting-depth tree
//!
//! The cover tree tracks, across all live handles of one allocation
//! family, how many handles cover each position of the backing region.
//! It is a binary search tree keyed by endpoint offsets. Each node holds
//! a depth `adjust` (the delta contributed when crossing its offset from
//! the left) and a `pins` count (live handles using the node as an
//! endpoint locator), plus two subtree aggregates: the `total` adjust and
//! the `min` depth reached while traversing the subtree in key order from
//! entry depth zero.
//!
//! The aggregates are what make reclamation cheap: a caller carrying a
//! running depth `d` can skip a whole subtree during hole search whenever
//! `d + min` stays positive, and the total lets [`CoverTree::include`]
//! audit itself after every mutation. Trees with a zero total can be
//! severed at every hole boundary ([`CoverTree::partition_at_holes`]), so
//! later operations on one covered segment never traverse unrelated
//! segments.
//!
//! Balance comes from a rank heuristic over offsets rather than strict
//! rebalancing: `rank(x) = x ^ (x - 1)` puts offsets that are multiples
//! of higher powers of two nearer the root. Adversarial offset patterns
//! degrade the shape but never the results.

mod node;

use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;

use crate::interval::Interval;
pub use node::NodeId;
use node::{rank, Node, Side};

/// A broken internal invariant of the tree.
///
/// These are programmer errors. They abort the current operation, leave
/// the tree in an unspecified state, and are surfaced unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// An `include` changed the tree's total adjust by something other
    /// than the requested delta.
    TotalDrift { expected: i64, found: i64 },
    /// The tree's adjustments do not balance out to zero.
    OpenTree { total: i64 },
    /// The transition stream produced two consecutive events of the same
    /// polarity, or ended inside a covered segment.
    UnpairedTransition { offset: usize },
    /// An operation was handed a node that still has a parent where a
    /// tree root was required.
    IncludeBelowRoot { offset: usize },
    /// A pin count would have gone negative.
    PinUnderflow { offset: usize },
    /// A pinned endpoint node vanished from the tree.
    LostEndpoint { offset: usize },
    /// A node's key violates the search order.
    KeyOrder { offset: usize },
    /// A parent and child disagree about their link.
    BrokenLink { offset: usize },
    /// A stored subtree aggregate differs from its recomputed value.
    CorruptAggregate { offset: usize },
    /// A node with neither an adjustment nor pins survived in the tree.
    IdleNode { offset: usize },
    /// The nesting depth dips below zero somewhere in the tree.
    NegativeDepth { min: i64 },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::TotalDrift { expected, found } => {
                write!(f, "total adjust drifted: expected {expected}, found {found}")
            }
            InvariantViolation::OpenTree { total } => {
                write!(f, "tree total adjust is {total}, not zero")
            }
            InvariantViolation::UnpairedTransition { offset } => {
                write!(f, "unpaired coverage transition at offset {offset}")
            }
            InvariantViolation::IncludeBelowRoot { offset } => {
                write!(f, "node at offset {offset} is not a tree root")
            }
            InvariantViolation::PinUnderflow { offset } => {
                write!(f, "pin count at offset {offset} would drop below zero")
            }
            InvariantViolation::LostEndpoint { offset } => {
                write!(f, "pinned endpoint at offset {offset} vanished")
            }
            InvariantViolation::KeyOrder { offset } => {
                write!(f, "search order violated at offset {offset}")
            }
            InvariantViolation::BrokenLink { offset } => {
                write!(f, "parent/child link broken at offset {offset}")
            }
            InvariantViolation::CorruptAggregate { offset } => {
                write!(f, "stale subtree aggregate at offset {offset}")
            }
            InvariantViolation::IdleNode { offset } => {
                write!(f, "idle node at offset {offset}")
            }
            InvariantViolation::NegativeDepth { min } => {
                write!(f, "nesting depth reaches {min}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Arena holding the forest of nesting-depth trees of one allocation
/// family.
///
/// The arena owns every node; callers address trees by the [`NodeId`] of
/// their root and individual nodes by the ids handed back from
/// [`CoverTree::include`]. Partitioning splits one tree into several
/// within the same arena, so ids stay valid across structural changes for
/// as long as their nodes are pinned.
#[derive(Debug, Default)]
pub struct CoverTree {
    nodes: Vec<Node>,
    spare: Vec<NodeId>,
}

impl CoverTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes across the whole forest.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.spare.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `d_adjust` and `d_pins` at offset `at` in the tree under
    /// `root`, creating the node if absent and destroying it when both
    /// stored values reach zero.
    ///
    /// Returns the new root (rotations may change it) and the node that
    /// was created or modified, `None` if it was destroyed. The total
    /// adjust of the returned tree is audited against the old total; any
    /// drift other than `d_adjust` is reported as a violation.
    pub fn include(
        &mut self,
        root: Option<NodeId>,
        at: usize,
        d_adjust: i64,
        d_pins: i32,
    ) -> Result<(Option<NodeId>, Option<NodeId>), InvariantViolation> {
        if let Some(r) = root {
            if self.node(r).parent.is_some() {
                return Err(InvariantViolation::IncludeBelowRoot {
                    offset: self.node(r).offset,
                });
            }
        }
        let before = self.subtotal(root);
        let (new_root, touched) = self.include_at(root, at, d_adjust, d_pins)?;
        let found = self.subtotal(new_root);
        if found - before != d_adjust {
            return Err(InvariantViolation::TotalDrift {
                expected: before + d_adjust,
                found,
            });
        }
        Ok((new_root, touched))
    }

    fn include_at(
        &mut self,
        root: Option<NodeId>,
        at: usize,
        d_adjust: i64,
        d_pins: i32,
    ) -> Result<(Option<NodeId>, Option<NodeId>), InvariantViolation> {
        let Some(r) = root else {
            if d_adjust == 0 && d_pins == 0 {
                return Ok((None, None));
            }
            let pins = u32::try_from(d_pins)
                .map_err(|_| InvariantViolation::PinUnderflow { offset: at })?;
            let id = self.alloc(at, d_adjust, pins);
            return Ok((Some(id), Some(id)));
        };
        let offset = self.node(r).offset;
        if at == offset {
            let pins = self
                .node(r)
                .pins
                .checked_add_signed(d_pins)
                .ok_or(InvariantViolation::PinUnderflow { offset: at })?;
            let n = self.node_mut(r);
            n.adjust += d_adjust;
            n.pins = pins;
            if n.adjust == 0 && n.pins == 0 {
                return Ok((self.implode(r), None));
            }
            self.refresh(r);
            return Ok((Some(r), Some(r)));
        }
        let side = if at < offset { Side::Left } else { Side::Right };
        let (sub, touched) = self.include_at(self.child(r, side), at, d_adjust, d_pins)?;
        self.set_child(r, side, sub);
        self.refresh(r);
        if let Some(s) = sub {
            // a child outranking its parent gets rotated into its place
            if rank(self.node(s).offset) > rank(offset) {
                self.lift(r, side, s);
                return Ok((Some(s), touched));
            }
        }
        Ok((Some(r), touched))
    }

    /// Walks parent links from `node` to the root of its tree.
    pub fn root_of(&self, node: NodeId) -> NodeId {
        let mut cursor = node;
        while let Some(parent) = self.node(cursor).parent {
            cursor = parent;
        }
        cursor
    }

    /// Locates the node keyed `offset` in the tree under `root`.
    pub fn find(&self, root: Option<NodeId>, offset: usize) -> Option<NodeId> {
        let mut cursor = root;
        while let Some(id) = cursor {
            let n = self.node(id);
            cursor = match offset.cmp(&n.offset) {
                Ordering::Equal => return Some(id),
                Ordering::Less => n.left,
                Ordering::Greater => n.right,
            };
        }
        None
    }

    /// Nesting depth at `position`: the sum of `adjust` over all nodes
    /// with an offset at or below it.
    pub fn depth_at(&self, root: Option<NodeId>, position: usize) -> i64 {
        let mut depth = 0;
        let mut cursor = root;
        while let Some(id) = cursor {
            let n = self.node(id);
            if n.offset <= position {
                depth += self.subtotal(n.left) + n.adjust;
                cursor = n.right;
            } else {
                cursor = n.left;
            }
        }
        depth
    }

    /// Total adjust of the tree under `root`; zero whenever every opened
    /// coverage has been closed.
    pub fn total(&self, root: Option<NodeId>) -> i64 {
        self.subtotal(root)
    }

    /// Leftmost and rightmost key offsets of the tree under `root`.
    pub fn extent(&self, root: NodeId) -> (usize, usize) {
        let mut lo = root;
        while let Some(l) = self.node(lo).left {
            lo = l;
        }
        let mut hi = root;
        while let Some(r) = self.node(hi).right {
            hi = r;
        }
        (self.node(lo).offset, self.node(hi).offset)
    }

    /// Every maximal sub-interval of `query` on which the nesting depth
    /// is zero, in ascending order.
    ///
    /// The returned holes are pairwise disjoint, have nonzero length, lie
    /// inside `query`, and their complement within `query` is exactly the
    /// covered part of `query`.
    pub fn holes_in(
        &self,
        query: Interval,
        root: Option<NodeId>,
    ) -> Result<Vec<Interval>, InvariantViolation> {
        let covered = self.covered_segments(root)?;
        let mut holes = Vec::new();
        let mut cursor = query.offset;
        for segment in &covered {
            if segment.end() <= query.offset || query.end() <= segment.offset {
                continue;
            }
            if cursor < segment.offset {
                holes.push(Interval::new(cursor, segment.offset - cursor));
            }
            cursor = cursor.max(segment.end());
        }
        if cursor < query.end() {
            holes.push(Interval::new(cursor, query.end() - cursor));
        }
        Ok(holes)
    }

    /// Severs the tree under `root` at every hole boundary so that each
    /// resulting tree lies entirely within a single covered segment.
    ///
    /// All transitions are identified before the first cut; interleaving
    /// the traversal with the cuts would invalidate its depth arithmetic.
    pub fn partition_at_holes(&mut self, root: Option<NodeId>) -> Result<(), InvariantViolation> {
        let total = self.subtotal(root);
        if total != 0 {
            return Err(InvariantViolation::OpenTree { total });
        }
        let events = self.checked_transitions(root)?;
        for (id, into_hole) in events {
            let side = if into_hole { Side::Right } else { Side::Left };
            self.cut(id, side);
        }
        Ok(())
    }

    /// Recomputes every aggregate and structural invariant of the tree
    /// under `root` from scratch. Logarithmic operations maintain all of
    /// this incrementally; this walk exists for tests and diagnostics.
    pub fn verify(&self, root: Option<NodeId>) -> Result<(), InvariantViolation> {
        let Some(root) = root else {
            return Ok(());
        };
        if self.node(root).parent.is_some() {
            return Err(InvariantViolation::BrokenLink {
                offset: self.node(root).offset,
            });
        }
        let (_, min) = self.verify_node(root, None, None)?;
        if min < 0 {
            return Err(InvariantViolation::NegativeDepth { min });
        }
        Ok(())
    }

    fn verify_node(
        &self,
        id: NodeId,
        lower: Option<usize>,
        upper: Option<usize>,
    ) -> Result<(i64, i64), InvariantViolation> {
        let n = self.node(id);
        if lower.is_some_and(|b| n.offset <= b) || upper.is_some_and(|b| n.offset >= b) {
            return Err(InvariantViolation::KeyOrder { offset: n.offset });
        }
        if n.adjust == 0 && n.pins == 0 {
            return Err(InvariantViolation::IdleNode { offset: n.offset });
        }
        let mut left_total = 0;
        let mut left_min = None;
        if let Some(l) = n.left {
            if self.node(l).parent != Some(id) {
                return Err(InvariantViolation::BrokenLink {
                    offset: self.node(l).offset,
                });
            }
            let (t, m) = self.verify_node(l, lower, Some(n.offset))?;
            left_total = t;
            left_min = Some(m);
        }
        let before = left_total + n.adjust;
        let mut total = before;
        let mut min = before.min(left_min.unwrap_or(before));
        if let Some(r) = n.right {
            if self.node(r).parent != Some(id) {
                return Err(InvariantViolation::BrokenLink {
                    offset: self.node(r).offset,
                });
            }
            let (t, m) = self.verify_node(r, Some(n.offset), upper)?;
            total += t;
            min = min.min(before + m);
        }
        if total != n.total || min != n.min {
            return Err(InvariantViolation::CorruptAggregate { offset: n.offset });
        }
        Ok((total, min))
    }

    /// In-order walk emitting every node at which the running depth
    /// crosses zero, `true` marking a transition into a hole. Subtrees
    /// whose depth provably stays positive are skipped via the `min`
    /// aggregate. Returns the exit depth.
    fn transitions_from(
        &self,
        node: Option<NodeId>,
        entry: i64,
        out: &mut Vec<(NodeId, bool)>,
    ) -> i64 {
        let Some(id) = node else {
            return entry;
        };
        let n = self.node(id);
        if entry > 0 && entry + n.min > 0 {
            return entry + n.total;
        }
        let before = self.transitions_from(n.left, entry, out);
        let after = before + n.adjust;
        let (was_hole, now_hole) = (before <= 0, after <= 0);
        if was_hole != now_hole {
            out.push((id, now_hole));
        }
        self.transitions_from(n.right, after, out)
    }

    /// Collects the transition stream and checks that it alternates,
    /// opening out of the surrounding hole and closing back into one.
    fn checked_transitions(
        &self,
        root: Option<NodeId>,
    ) -> Result<Vec<(NodeId, bool)>, InvariantViolation> {
        let mut events = Vec::new();
        self.transitions_from(root, 0, &mut events);
        if let Some(&(first, into_hole)) = events.first() {
            if into_hole {
                return Err(InvariantViolation::UnpairedTransition {
                    offset: self.node(first).offset,
                });
            }
        }
        for (&(_, a), &(id, b)) in events.iter().tuple_windows() {
            if a == b {
                return Err(InvariantViolation::UnpairedTransition {
                    offset: self.node(id).offset,
                });
            }
        }
        if events.len() % 2 != 0 {
            let (last, _) = events[events.len() - 1];
            return Err(InvariantViolation::UnpairedTransition {
                offset: self.node(last).offset,
            });
        }
        Ok(events)
    }

    /// Maximal covered segments of the tree under `root`, paired up from
    /// the transition stream.
    fn covered_segments(&self, root: Option<NodeId>) -> Result<Vec<Interval>, InvariantViolation> {
        let events = self.checked_transitions(root)?;
        let segments = events
            .iter()
            .tuples()
            .map(|(&(open, _), &(close, _))| {
                let start = self.node(open).offset;
                let end = self.node(close).offset;
                Interval::new(start, end - start)
            })
            .collect();
        Ok(segments)
    }

    /// Severs the tree beside `from` on `side`, splitting it in two.
    ///
    /// The walk climbs toward the root carrying the detached subtree.
    /// Whenever the climb crosses the cut, the carried piece takes the
    /// vacated child slot and the subtree below becomes the carried
    /// piece, with the crossing direction flipped.
    fn cut(&mut self, from: NodeId, side: Side) {
        let mut dir = side;
        let mut orphan = self.take_child(from, dir);
        self.refresh(from);
        let mut cursor = from;
        while let Some(parent) = self.node(cursor).parent {
            if self.side_of(parent, cursor) == dir.opposite() {
                self.node_mut(cursor).parent = None;
                self.set_child(parent, dir.opposite(), orphan);
                orphan = Some(cursor);
                dir = dir.opposite();
            }
            self.refresh(parent);
            cursor = parent;
        }
    }
}
