//! Arena storage and structural surgery for tree nodes.
//!
//! Nodes reference their parent and both children, so the node graph is
//! cyclic. Keeping every node in a slot arena and linking by index keeps
//! the cycles trivially sound: destroying an imploded node frees its slot
//! without any possibility of a dangling pointer surviving in a neighbor.
//!
//! All mutation of the link structure funnels through [`CoverTree::set_child`]
//! and the helpers below, and every structural change is followed by an
//! unconditional aggregate [`CoverTree::refresh`] on the touched nodes.
//! Hole detection reads the aggregates, so a stale `total` or `min`
//! silently corrupts reclamation.

use super::CoverTree;

/// Index of a node slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

/// Child direction within the search tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    pub(crate) fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Balance rank of a key offset.
///
/// Offsets that are multiples of higher powers of two rank higher and sit
/// closer to the root; consecutive integers interleave as
/// `1, 3, 1, 7, 1, 3, 1, 15, …`. Offset zero wraps and outranks everything.
pub(crate) fn rank(offset: usize) -> usize {
    offset ^ offset.wrapping_sub(1)
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// Immutable key; the position at which `adjust` takes effect.
    pub(crate) offset: usize,
    /// Depth delta applied when crossing from `offset - 1` to `offset`.
    pub(crate) adjust: i64,
    /// Number of live handles holding this node as an endpoint locator.
    /// A pinned node stays in the tree even with `adjust == 0`.
    pub(crate) pins: u32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    /// Sum of `adjust` over this node's subtree.
    pub(crate) total: i64,
    /// Minimum depth reached traversing the subtree in key order,
    /// relative to entry depth zero at the subtree's left edge.
    pub(crate) min: i64,
}

impl CoverTree {
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Claims a slot for a fresh leaf node.
    pub(crate) fn alloc(&mut self, offset: usize, adjust: i64, pins: u32) -> NodeId {
        let node = Node {
            offset,
            adjust,
            pins,
            parent: None,
            left: None,
            right: None,
            total: adjust,
            min: adjust,
        };
        match self.spare.pop() {
            Some(id) => {
                self.nodes[id.0 as usize] = node;
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(node);
                id
            }
        }
    }

    /// Returns a destroyed node's slot to the arena.
    pub(crate) fn retire(&mut self, id: NodeId) {
        self.spare.push(id);
    }

    pub(crate) fn child(&self, id: NodeId, side: Side) -> Option<NodeId> {
        let n = self.node(id);
        match side {
            Side::Left => n.left,
            Side::Right => n.right,
        }
    }

    /// Links `child` under `parent` on `side`, maintaining both directions.
    pub(crate) fn set_child(&mut self, parent: NodeId, side: Side, child: Option<NodeId>) {
        match side {
            Side::Left => self.node_mut(parent).left = child,
            Side::Right => self.node_mut(parent).right = child,
        }
        if let Some(c) = child {
            self.node_mut(c).parent = Some(parent);
        }
    }

    /// Detaches and returns `parent`'s child on `side`.
    pub(crate) fn take_child(&mut self, parent: NodeId, side: Side) -> Option<NodeId> {
        let child = self.child(parent, side);
        match side {
            Side::Left => self.node_mut(parent).left = None,
            Side::Right => self.node_mut(parent).right = None,
        }
        if let Some(c) = child {
            self.node_mut(c).parent = None;
        }
        child
    }

    /// Which side of `parent` holds `child`.
    pub(crate) fn side_of(&self, parent: NodeId, child: NodeId) -> Side {
        if self.node(parent).left == Some(child) {
            Side::Left
        } else {
            Side::Right
        }
    }

    pub(crate) fn subtotal(&self, id: Option<NodeId>) -> i64 {
        id.map_or(0, |id| self.node(id).total)
    }

    /// Recomputes `total` and `min` of `id` from its children.
    ///
    /// Must run on every node whose subtree changed, leaf to root, before
    /// the enclosing operation returns.
    pub(crate) fn refresh(&mut self, id: NodeId) {
        let n = self.node(id);
        let (left, right, adjust) = (n.left, n.right, n.adjust);
        let before = self.subtotal(left) + adjust;
        let mut min = before;
        if let Some(l) = left {
            min = min.min(self.node(l).min);
        }
        if let Some(r) = right {
            min = min.min(before + self.node(r).min);
        }
        let total = before + self.subtotal(right);
        let n = self.node_mut(id);
        n.total = total;
        n.min = min;
    }

    /// Rotates `above`, currently `below`'s child on `side`, into
    /// `below`'s place. `below` becomes `above`'s child on the opposite
    /// side and `above`'s displaced grandchild moves under `below`.
    ///
    /// `above` comes back with its parent pointer cleared; the caller
    /// links it into the surrounding tree.
    pub(crate) fn lift(&mut self, below: NodeId, side: Side, above: NodeId) {
        let grandchild = self.child(above, side.opposite());
        self.set_child(below, side, grandchild);
        self.node_mut(above).parent = None;
        self.set_child(above, side.opposite(), Some(below));
        self.refresh(below);
        self.refresh(above);
    }

    /// Removes a node whose `adjust` and `pins` both reached zero and
    /// returns the root of the subtree taking its place.
    ///
    /// With two children the higher-ranked child is promoted and the
    /// other subtree is reattached at the promoted child's flank facing
    /// it, refreshing aggregates from the attachment point upward. This
    /// walk is O(depth) and runs at most once per node lifetime.
    pub(crate) fn implode(&mut self, id: NodeId) -> Option<NodeId> {
        let n = self.node(id);
        let (left, right) = (n.left, n.right);
        let survivor = match (left, right) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => {
                self.node_mut(only).parent = None;
                Some(only)
            }
            (Some(l), Some(r)) => {
                let (keep, strand, flank) =
                    if rank(self.node(l).offset) >= rank(self.node(r).offset) {
                        (l, r, Side::Right)
                    } else {
                        (r, l, Side::Left)
                    };
                let mut spot = keep;
                while let Some(next) = self.child(spot, flank) {
                    spot = next;
                }
                self.set_child(spot, flank, Some(strand));
                let mut cursor = Some(spot);
                while let Some(c) = cursor {
                    self.refresh(c);
                    if c == keep {
                        break;
                    }
                    cursor = self.node(c).parent;
                }
                self.node_mut(keep).parent = None;
                Some(keep)
            }
        };
        self.retire(id);
        survivor
    }
}
