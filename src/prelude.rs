//! Re-exports of the most commonly used types.
//! Intended to be glob imported as `use spanpin::prelude::*;`.

pub use crate::covertree::CoverTree;
pub use crate::covertree::InvariantViolation;
pub use crate::covertree::NodeId;
pub use crate::interval::Interval;
pub use crate::span::ReleaseError;
pub use crate::span::SharedStore;
pub use crate::span::SliceError;
pub use crate::span::Span;
pub use crate::store::CellStore;
pub use crate::store::Word;
