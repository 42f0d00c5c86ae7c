// Grid module - dense beat generation, queries, and edits
// The dense list is a pure function of the markers and stream info

pub mod beat;
pub mod edit;
pub mod generate;
pub mod query;

pub use beat::{Beat, BeatGrid, ChangeFlags};
pub use edit::ScaleMode;
pub use generate::generate;
pub use query::{BeatNeighbors, BeatRange};
