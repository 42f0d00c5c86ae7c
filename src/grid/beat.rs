// Dense beat events derived from the sparse markers
// A Beat is never persisted; the whole list is rebuilt on every edit

use serde::{Deserialize, Serialize};

use crate::marker::TimeSignature;

/// What changed on a beat relative to its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeFlags {
    /// A tempo marker took effect on this beat
    pub tempo: bool,

    /// A signature marker took effect on this beat (or this is the first
    /// downbeat)
    pub signature: bool,
}

/// One generated beat event on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Frame position on the audio timeline
    pub frame_position: f64,

    /// Index of this beat in the dense list (0-based)
    pub index: usize,

    /// Bar this beat belongs to; -1 for pickup beats before the first
    /// downbeat
    pub bar_index: i64,

    /// Position of this beat within its bar (0 = downbeat)
    pub beat_in_bar_index: u32,

    /// Tempo in effect on this beat
    pub bpm: f64,

    /// Time signature in effect on this beat
    pub signature: TimeSignature,

    /// Marker changes that landed on this beat
    pub change: ChangeFlags,
}

impl Beat {
    /// A downbeat is the first beat of a bar
    pub fn is_downbeat(&self) -> bool {
        self.beat_in_bar_index == 0
    }
}

/// The dense, query-able beat list plus its cached aggregate BPM.
/// Produced by the grid generator; strictly increasing in frame position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BeatGrid {
    pub(crate) beats: Vec<Beat>,
    pub(crate) average_bpm: Option<f64>,
    pub(crate) sample_rate: u32,
}

impl BeatGrid {
    /// A grid is valid when it has beats and a known sample rate. All
    /// queries on an invalid grid degrade to empty/none results.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && !self.beats.is_empty()
    }

    /// Number of beats in the grid
    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// All beats, ordered by frame position
    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    /// Aggregate BPM over the whole track, `None` for an invalid grid
    pub fn average_bpm(&self) -> Option<f64> {
        if self.is_valid() {
            self.average_bpm
        } else {
            None
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Beat at a dense-list index, `None` out of range
    pub fn beat_at_index(&self, index: usize) -> Option<Beat> {
        self.beats.get(index).copied()
    }

    /// Frame position of the first beat, `None` for an empty grid
    pub fn first_beat_position(&self) -> Option<f64> {
        self.beats.first().map(|beat| beat.frame_position)
    }

    /// Frame position of the last beat, `None` for an empty grid
    pub fn last_beat_position(&self) -> Option<f64> {
        self.beats.last().map(|beat| beat.frame_position)
    }
}
