//! Read-path building blocks: filter expressions, MVCC visibility and
//! cross-segment result merging.

pub mod filter;
pub mod merge;
pub mod visibility;

pub use filter::{CompareOp, FilterExpr, FilterParser, Literal, MAX_FILTER_DEPTH};
pub use merge::{merge_rows, merge_top_k};
pub use visibility::{visible_offsets, SegmentView, TombstoneSet};
