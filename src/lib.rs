// Beatgrid - beat, tempo and time signature timelines for audio tracks
// Sparse markers in, dense queryable beat grid out

pub mod codec;
pub mod grid;
pub mod marker;
pub mod stats;
pub mod stream;
pub mod timeline;

pub use codec::CodecError;
pub use grid::{Beat, BeatGrid, BeatNeighbors, BeatRange, ChangeFlags, ScaleMode};
pub use marker::{MarkerStore, SignatureMarker, TempoMarker, TimeSignature};
pub use stream::StreamInfo;
pub use timeline::{BeatTimeline, TimelineCore, TimelineObserver};
