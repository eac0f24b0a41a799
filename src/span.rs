//! Interval handles.
//!
//! A [`Span`] is a handle into the backing store that pins the cells of
//! its interval: as long as the span is live, no cell it covers can be
//! reclaimed. Spans slice into narrower child spans in logarithmic time,
//! and releasing any span frees exactly the maximal sub-ranges of its
//! interval that no surviving span still covers.
//!
//! Every span of one allocation family shares a single [`CoverTree`]
//! arena and the backing store. The span's only anchor into the tree is
//! the id of its pinned right-endpoint node; walking parent links from
//! there finds the tree even after partitioning has reshaped the forest.
//!
//! Release is the required cleanup action and is idempotent. Dropping a
//! span runs it as a safety net, discarding any error; call
//! [`Span::release`] directly where failures must be observable.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::covertree::{CoverTree, InvariantViolation, NodeId};
use crate::interval::Interval;
use crate::store::{self, CellStore};

/// Backing store shared by every span allocated from it.
pub type SharedStore = Rc<RefCell<CellStore>>;

/// A failed read or write through a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    OutOfRange { index: usize, length: usize },
    UseAfterRelease,
    Cell(store::AccessError),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::OutOfRange { index, length } => {
                write!(f, "index {index} is outside a span of length {length}")
            }
            AccessError::UseAfterRelease => {
                write!(f, "span was already released")
            }
            AccessError::Cell(err) => write!(f, "cell access failed: {err}"),
        }
    }
}

impl std::error::Error for AccessError {}

impl From<store::AccessError> for AccessError {
    fn from(err: store::AccessError) -> Self {
        AccessError::Cell(err)
    }
}

/// A rejected `slice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceError {
    OutOfRange { sub: Interval, length: usize },
    UseAfterRelease,
    Invariant(InvariantViolation),
}

impl fmt::Display for SliceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceError::OutOfRange { sub, length } => {
                write!(f, "sub-range {sub} is outside a span of length {length}")
            }
            SliceError::UseAfterRelease => {
                write!(f, "span was already released")
            }
            SliceError::Invariant(err) => write!(f, "coverage tree violation: {err}"),
        }
    }
}

impl std::error::Error for SliceError {}

impl From<InvariantViolation> for SliceError {
    fn from(err: InvariantViolation) -> Self {
        SliceError::Invariant(err)
    }
}

/// A failed release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    Invariant(InvariantViolation),
    Free(store::FreeError),
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseError::Invariant(err) => write!(f, "coverage tree violation: {err}"),
            ReleaseError::Free(err) => write!(f, "backing store rejected a free: {err}"),
        }
    }
}

impl std::error::Error for ReleaseError {}

impl From<InvariantViolation> for ReleaseError {
    fn from(err: InvariantViolation) -> Self {
        ReleaseError::Invariant(err)
    }
}

impl From<store::FreeError> for ReleaseError {
    fn from(err: store::FreeError) -> Self {
        ReleaseError::Free(err)
    }
}

/// A handle pinning one interval of the backing store.
pub struct Span {
    store: SharedStore,
    tree: Rc<RefCell<CoverTree>>,
    interval: Interval,
    /// Pinned right-endpoint node; `None` for degenerate spans.
    locator: Option<NodeId>,
    released: bool,
}

impl Span {
    /// Allocates `length` fresh cells and covers them with a new span.
    ///
    /// Zero-length spans are degenerate: they allocate nothing, own no
    /// tree nodes, and release without any tree or store work.
    pub fn new(length: usize, store: &SharedStore) -> Result<Self, InvariantViolation> {
        let interval = store.borrow_mut().allocate(length);
        let tree = Rc::new(RefCell::new(CoverTree::new()));
        let locator = if interval.is_empty() {
            None
        } else {
            Some(Self::cover(&mut tree.borrow_mut(), None, interval)?)
        };
        Ok(Span {
            store: store.clone(),
            tree,
            interval,
            locator,
            released: false,
        })
    }

    /// Opens coverage for `interval` in the tree under `root` and
    /// returns the pinned right-endpoint node.
    fn cover(
        tree: &mut CoverTree,
        root: Option<NodeId>,
        interval: Interval,
    ) -> Result<NodeId, InvariantViolation> {
        let (root, _) = tree.include(root, interval.offset, 1, 1)?;
        let (_, right) = tree.include(root, interval.end(), -1, 1)?;
        // the endpoint was pinned by the same call, so it cannot implode
        right.ok_or(InvariantViolation::LostEndpoint {
            offset: interval.end(),
        })
    }

    /// Covers `[offset + sub.offset, offset + sub.offset + sub.length)`
    /// with a child span sharing this span's family.
    pub fn slice(&self, sub: Interval) -> Result<Span, SliceError> {
        if self.released {
            return Err(SliceError::UseAfterRelease);
        }
        let out_of_range = SliceError::OutOfRange {
            sub,
            length: self.interval.length,
        };
        let end = sub
            .offset
            .checked_add(sub.length)
            .ok_or(out_of_range)?;
        if end > self.interval.length {
            return Err(out_of_range);
        }
        let interval = Interval::new(self.interval.offset + sub.offset, sub.length);
        let locator = if interval.is_empty() {
            None
        } else {
            let mut tree = self.tree.borrow_mut();
            let root = self.locator.map(|loc| tree.root_of(loc));
            Some(Self::cover(&mut tree, root, interval)?)
        };
        Ok(Span {
            store: self.store.clone(),
            tree: self.tree.clone(),
            interval,
            locator,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.interval.length
    }

    pub fn is_empty(&self) -> bool {
        self.interval.is_empty()
    }

    /// The backing cells this span exposes.
    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn position(&self, index: usize) -> Result<usize, AccessError> {
        if self.released {
            return Err(AccessError::UseAfterRelease);
        }
        if index >= self.interval.length {
            return Err(AccessError::OutOfRange {
                index,
                length: self.interval.length,
            });
        }
        Ok(self.interval.offset + index)
    }

    pub fn read(&self, index: usize) -> Result<u64, AccessError> {
        let position = self.position(index)?;
        Ok(self.store.borrow().read(position)?)
    }

    pub fn write(&self, index: usize, value: u64) -> Result<(), AccessError> {
        let position = self.position(index)?;
        Ok(self.store.borrow_mut().write(position, value)?)
    }

    /// Withdraws this span's coverage, frees every sub-range of the
    /// backing region that thereby became uncovered, and severs the
    /// coverage tree at the new hole boundaries. Idempotent.
    ///
    /// The ordering is two-phase: the span's adjustments are reversed
    /// first while both endpoint pins still hold the nodes in place, so
    /// hole discovery runs against the reduced coverage; only then are
    /// the pins dropped and the tree partitioned.
    pub fn release(&mut self) -> Result<(), ReleaseError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let Some(locator) = self.locator else {
            return Ok(());
        };
        let holes = {
            let mut tree = self.tree.borrow_mut();
            let root_id = tree.root_of(locator);
            let root = Some(root_id);
            let total = tree.total(root);
            if total != 0 {
                return Err(InvariantViolation::OpenTree { total }.into());
            }
            let (lo, hi) = tree.extent(root_id);
            let enclosing = Interval::new(lo, hi - lo);
            let left = self.interval.offset;
            let right = self.interval.end();
            let (root, _) = tree.include(root, right, 1, 0)?;
            let (root, _) = tree.include(root, left, -1, 0)?;
            let holes = tree.holes_in(enclosing, root)?;
            let (root, _) = tree.include(root, right, 0, -1)?;
            let (root, _) = tree.include(root, left, 0, -1)?;
            tree.partition_at_holes(root)?;
            holes
        };
        let mut store = self.store.borrow_mut();
        for hole in &holes {
            store.free(*hole)?;
        }
        Ok(())
    }

    /// Nesting depth of this span's coverage tree at an absolute store
    /// position. Exposed for tests and diagnostics.
    pub fn coverage_depth_at(&self, position: usize) -> i64 {
        let tree = self.tree.borrow();
        let root = self.locator.map(|loc| tree.root_of(loc));
        tree.depth_at(root, position)
    }

    /// Total adjust of this span's coverage tree. Exposed for tests.
    pub fn tree_total(&self) -> i64 {
        let tree = self.tree.borrow();
        let root = self.locator.map(|loc| tree.root_of(loc));
        tree.total(root)
    }

    /// Full structural validation of this span's coverage tree. Exposed
    /// for tests.
    pub fn verify_tree(&self) -> Result<(), InvariantViolation> {
        let tree = self.tree.borrow();
        let root = self.locator.map(|loc| tree.root_of(loc));
        tree.verify(root)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("interval", &self.interval)
            .field("locator", &self.locator)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
