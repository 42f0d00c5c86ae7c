// Sparse beat markers - the canonical, persistable representation
// Tempo and time signature change points plus the first-beat anchor

use serde::{Deserialize, Serialize};

/// Relative tolerance for treating two BPM values as equal when
/// compacting adjacent tempo markers
const BPM_COMPARE_EPSILON: f64 = 1e-9;

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Number of beats per bar (e.g. 4 in 4/4, 3 in 3/4)
    pub beats_per_bar: u32,

    /// Note value that gets one beat (4 = quarter note)
    pub note_value: u32,
}

impl TimeSignature {
    pub fn new(beats_per_bar: u32, note_value: u32) -> Self {
        TimeSignature {
            beats_per_bar,
            note_value,
        }
    }

    /// Both components must be positive for the signature to be usable
    pub fn is_valid(&self) -> bool {
        self.beats_per_bar > 0 && self.note_value > 0
    }
}

impl Default for TimeSignature {
    /// Common time, 4/4
    fn default() -> Self {
        TimeSignature {
            beats_per_bar: 4,
            note_value: 4,
        }
    }
}

/// A tempo change point: from `beat_index` onwards the track runs at `bpm`
/// until the next marker takes over
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoMarker {
    /// Index of the beat where this tempo takes effect (0-based)
    pub beat_index: usize,

    /// Beats per minute, positive
    pub bpm: f64,
}

impl TempoMarker {
    pub fn new(beat_index: usize, bpm: f64) -> Self {
        TempoMarker { beat_index, bpm }
    }
}

/// A time signature change point, keyed on a bar number. Signature changes
/// only take effect at bar boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMarker {
    /// Index of the bar (downbeat) where this signature takes effect
    pub downbeat_index: usize,

    /// The signature in effect from that bar onwards
    pub signature: TimeSignature,
}

impl SignatureMarker {
    pub fn new(downbeat_index: usize, signature: TimeSignature) -> Self {
        SignatureMarker {
            downbeat_index,
            signature,
        }
    }
}

/// The sparse, canonical beat representation. This is the only state that
/// is ever persisted; the dense beat list is derived from it by the grid
/// generator and rebuilt wholesale after every change.
///
/// Invariants (restored by `canonicalize`):
/// - both marker sequences are ordered ascending by index, unique per index
/// - no two adjacent markers carry an equal value (minimal form)
/// - `first_downbeat_index` is less than the first signature's beats per bar
///
/// A store without tempo markers, or carrying a zero-component time
/// signature, is invalid: no grid can be produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerStore {
    /// Frame position of the first generated beat
    pub first_beat_frame: f64,

    /// Offset of the first downbeat, counted in beats from the first beat
    pub first_downbeat_index: usize,

    /// Tempo change points, ordered ascending by beat index
    pub tempo_markers: Vec<TempoMarker>,

    /// Time signature change points, ordered ascending by downbeat index
    pub signature_markers: Vec<SignatureMarker>,
}

impl MarkerStore {
    /// A store can produce a grid only if it carries at least one tempo
    /// marker and no degenerate time signature
    pub fn is_valid(&self) -> bool {
        !self.tempo_markers.is_empty()
            && self
                .signature_markers
                .iter()
                .all(|marker| marker.signature.is_valid())
    }

    /// Time signature in effect at the start of the track
    pub fn first_signature(&self) -> TimeSignature {
        self.signature_markers
            .first()
            .map(|marker| marker.signature)
            .unwrap_or_default()
    }

    /// Active time signature for a bar: the last marker at or before
    /// `downbeat_index`, default 4/4 when none applies. Markers addressing
    /// bars past the track end are visible here even though they never
    /// influence the generated grid.
    pub fn signature_at_bar(&self, downbeat_index: usize) -> TimeSignature {
        let insert_at = self
            .signature_markers
            .partition_point(|marker| marker.downbeat_index <= downbeat_index);
        if insert_at == 0 {
            TimeSignature::default()
        } else {
            self.signature_markers[insert_at - 1].signature
        }
    }

    /// Insert a tempo marker keeping the sequence ordered, replacing any
    /// existing marker at the same beat index
    pub fn set_tempo_marker(&mut self, marker: TempoMarker) {
        let insert_at = self
            .tempo_markers
            .partition_point(|existing| existing.beat_index < marker.beat_index);
        if let Some(existing) = self.tempo_markers.get_mut(insert_at) {
            if existing.beat_index == marker.beat_index {
                *existing = marker;
                return;
            }
        }
        self.tempo_markers.insert(insert_at, marker);
    }

    /// Insert a signature marker keeping the sequence ordered, replacing
    /// any existing marker at the same downbeat index
    pub fn set_signature_marker(&mut self, marker: SignatureMarker) {
        let insert_at = self
            .signature_markers
            .partition_point(|existing| existing.downbeat_index < marker.downbeat_index);
        if let Some(existing) = self.signature_markers.get_mut(insert_at) {
            if existing.downbeat_index == marker.downbeat_index {
                *existing = marker;
                return;
            }
        }
        self.signature_markers.insert(insert_at, marker);
    }

    /// Drop all markers and the first-beat anchor, leaving the store
    /// invalid
    pub fn clear(&mut self) {
        self.first_beat_frame = 0.0;
        self.first_downbeat_index = 0;
        self.tempo_markers.clear();
        self.signature_markers.clear();
    }

    /// Restore the store invariants: ensure a signature marker exists,
    /// reduce the first downbeat offset modulo the first bar length, and
    /// merge adjacent markers with equal values. Generation calls this
    /// before every walk, so serialize -> deserialize -> generate is
    /// stable.
    pub fn canonicalize(&mut self) {
        // A signature for bar 0 must exist: a first marker addressing a
        // later bar leaves the opening bars in common time rather than
        // taking effect retroactively
        let missing_opening = self
            .signature_markers
            .first()
            .map_or(true, |marker| marker.downbeat_index > 0);
        if missing_opening {
            self.signature_markers
                .insert(0, SignatureMarker::new(0, TimeSignature::default()));
        }

        // The initial downbeat offset must stay below the number of beats
        // in the first bar
        let beats_per_bar = self.first_signature().beats_per_bar as usize;
        if beats_per_bar > 0 && self.first_downbeat_index >= beats_per_bar {
            self.first_downbeat_index %= beats_per_bar;
        }

        self.signature_markers
            .dedup_by(|next, kept| next.signature == kept.signature);
        self.tempo_markers
            .dedup_by(|next, kept| bpm_eq(next.bpm, kept.bpm));
    }
}

/// Fuzzy BPM equality used for marker compaction
pub(crate) fn bpm_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= BPM_COMPARE_EPSILON * a.abs().max(b.abs()).max(1.0)
}
