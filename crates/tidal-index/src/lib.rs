//! Segment index abstractions for Tidal.
//!
//! - `IndexBuilder` / `SegmentIndex`: the seam between the lifecycle engine
//!   and index internals
//! - `FlatIndex`: exact vector index, built for every vector index type
//! - `InvertedIndex`: scalar term index
//! - `brute_force_search`: unindexed fallback scan

mod builder;
mod flat;
mod inverted;
mod scan;
mod types;

pub use builder::{BuildFailure, DefaultIndexBuilder, FlakyIndexBuilder};
pub use flat::FlatIndex;
pub use inverted::InvertedIndex;
pub use scan::brute_force_search;
pub use types::{IndexBuilder, ScoredOffset, SegmentIndex};
