// Beat timeline - the owning facade over markers, stream info and grid
// A lock-free value core wrapped by a mutex-guarded, observable handle

use std::sync::{Arc, Mutex};

use crate::codec::{self, CodecError};
use crate::grid::beat::BeatGrid;
use crate::grid::generate::generate;
use crate::grid::query::BeatNeighbors;
use crate::grid::Beat;
use crate::marker::{bpm_eq, MarkerStore, SignatureMarker, TempoMarker, TimeSignature};
use crate::stream::StreamInfo;

const SECONDS_PER_MINUTE: f64 = 60.0;

/// The complete beat timeline state as a plain value: the sparse marker
/// store, the stream info it was generated against, and the cached dense
/// grid. Cloning it yields an immutable snapshot that can be queried
/// without any locking.
///
/// All mutations regenerate the dense grid before returning, so the grid
/// and store never disagree.
#[derive(Debug, Clone, Default)]
pub struct TimelineCore {
    pub(crate) store: MarkerStore,
    pub(crate) stream: StreamInfo,
    pub(crate) grid: BeatGrid,
}

impl TimelineCore {
    /// Empty timeline for a stream; invalid until markers arrive
    pub fn new(stream: StreamInfo) -> Self {
        let mut core = TimelineCore {
            store: MarkerStore::default(),
            stream,
            grid: BeatGrid::default(),
        };
        core.regenerate();
        core
    }

    /// Build a timeline from raw analyzer output: an ordered sequence of
    /// beat frame positions plus optional signature markers.
    ///
    /// Non-monotonic or negative positions are dropped with a warning.
    /// One tempo marker is derived per change in the instantaneous
    /// per-gap BPM; with no signature markers the track defaults to 4/4
    /// with the first beat as downbeat. The generated grid reproduces
    /// every surviving input position and may extend past the last one by
    /// extrapolating the final tempo.
    pub fn from_analyzer(
        beat_positions: &[f64],
        signature_markers: &[SignatureMarker],
        stream: StreamInfo,
    ) -> Self {
        let mut store = MarkerStore::default();

        let mut kept: Vec<f64> = Vec::with_capacity(beat_positions.len());
        for &position in beat_positions {
            let monotonic = kept.last().map_or(true, |&last| position > last);
            if position < 0.0 || !monotonic {
                log::warn!(
                    "dropping analyzer beat at frame {}: negative or not strictly increasing",
                    position
                );
                continue;
            }
            kept.push(position);
        }

        if let Some(&first) = kept.first() {
            store.first_beat_frame = first;
            for (index, gap) in kept.windows(2).enumerate() {
                let beat_length = gap[1] - gap[0];
                let bpm = SECONDS_PER_MINUTE * stream.sample_rate as f64 / beat_length;
                let changed = store
                    .tempo_markers
                    .last()
                    .map_or(true, |marker| !bpm_eq(marker.bpm, bpm));
                if changed {
                    store.set_tempo_marker(TempoMarker::new(index, bpm));
                }
            }
        }
        for marker in signature_markers {
            if !marker.signature.is_valid() {
                log::warn!(
                    "dropping signature marker at bar {}: zero component",
                    marker.downbeat_index
                );
                continue;
            }
            store.set_signature_marker(*marker);
        }

        let mut core = TimelineCore {
            store,
            stream,
            grid: BeatGrid::default(),
        };
        core.regenerate();
        core
    }

    /// Restore a timeline from a serialized marker store blob
    pub fn from_bytes(blob: &[u8], stream: StreamInfo) -> Result<Self, CodecError> {
        let store = codec::decode(blob)?;
        let mut core = TimelineCore {
            store,
            stream,
            grid: BeatGrid::default(),
        };
        core.regenerate();
        Ok(core)
    }

    /// Serialize the marker store to its versioned binary form
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(&self.store)
    }

    /// Replace the stream info and rebuild the grid against it
    pub fn update_stream_info(&mut self, stream: StreamInfo) {
        self.stream = stream;
        self.regenerate();
    }

    /// The sparse canonical store
    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    /// The cached dense grid; all read queries live on it
    pub fn grid(&self) -> &BeatGrid {
        &self.grid
    }

    pub fn stream_info(&self) -> StreamInfo {
        self.stream
    }

    /// Active time signature for a bar, resolved against the sparse
    /// markers
    pub fn signature_at_bar(&self, downbeat_index: usize) -> TimeSignature {
        self.store.signature_at_bar(downbeat_index)
    }

    /// A timeline is valid once it has a generated grid to answer queries
    /// from
    pub fn is_valid(&self) -> bool {
        self.grid.is_valid()
    }

    /// Rebuild the dense grid from the markers. Every mutation funnels
    /// through here; the grid is never patched incrementally.
    pub(crate) fn regenerate(&mut self) {
        self.grid = generate(&mut self.store, self.stream);
    }
}

/// Callback invoked after a timeline mutation, outside the lock
pub type TimelineObserver = Arc<dyn Fn() + Send + Sync>;

/// Thread-safe handle around a [`TimelineCore`].
///
/// Single-writer, any-reader: every public operation takes the one
/// non-reentrant mutex for its full duration and delegates to a lock-free
/// core method; no public method calls another public method. Observers
/// registered with [`subscribe`](Self::subscribe) are notified after each
/// mutation, once the lock has been released; delivery is at-least-once
/// with no ordering guarantee across rapid edits.
///
/// Real-time consumers must not block on this lock: take a
/// [`snapshot`](Self::snapshot) under a brief lock and query the returned
/// value lock-free.
pub struct BeatTimeline {
    inner: Mutex<TimelineCore>,
    observers: Mutex<Vec<TimelineObserver>>,
}

impl BeatTimeline {
    /// Empty timeline for a stream
    pub fn new(stream: StreamInfo) -> Arc<Self> {
        Arc::new(BeatTimeline {
            inner: Mutex::new(TimelineCore::new(stream)),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Timeline seeded from analyzer output; see
    /// [`TimelineCore::from_analyzer`]
    pub fn from_analyzer(
        beat_positions: &[f64],
        signature_markers: &[SignatureMarker],
        stream: StreamInfo,
    ) -> Arc<Self> {
        Arc::new(BeatTimeline {
            inner: Mutex::new(TimelineCore::from_analyzer(
                beat_positions,
                signature_markers,
                stream,
            )),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Timeline restored from a serialized blob; a malformed blob is an
    /// explicit error, not a panic
    pub fn from_bytes(blob: &[u8], stream: StreamInfo) -> Result<Arc<Self>, CodecError> {
        let core = TimelineCore::from_bytes(blob, stream)?;
        Ok(Arc::new(BeatTimeline {
            inner: Mutex::new(core),
            observers: Mutex::new(Vec::new()),
        }))
    }

    /// Register a change observer. Observers run on the mutating thread
    /// after the timeline lock has been released.
    pub fn subscribe(&self, observer: TimelineObserver) {
        let mut observers = match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        observers.push(observer);
    }

    // Callbacks run with neither lock held, so an observer may re-enter
    // the public API, including subscribe
    fn notify(&self) {
        let observers: Vec<TimelineObserver> = {
            let guard = match self.observers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        for observer in &observers {
            observer();
        }
    }

    // A panic mid-edit leaves a stale but structurally sound core, so a
    // poisoned lock is recoverable
    fn lock(&self) -> std::sync::MutexGuard<'_, TimelineCore> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Immutable snapshot of the whole timeline state
    pub fn snapshot(&self) -> TimelineCore {
        self.lock().clone()
    }

    // Mutations: lock, edit, unlock, notify.

    pub fn set_grid(&self, bpm: f64, first_beat_frame: f64) {
        self.lock().set_grid(bpm, first_beat_frame);
        self.notify();
    }

    pub fn set_bpm(&self, bpm: f64, beat_index: usize) {
        self.lock().set_bpm(bpm, beat_index);
        self.notify();
    }

    pub fn set_signature(&self, signature: TimeSignature, downbeat_index: usize) {
        self.lock().set_signature(signature, downbeat_index);
        self.notify();
    }

    pub fn translate(&self, delta_frames: f64) {
        self.lock().translate(delta_frames);
        self.notify();
    }

    pub fn set_as_downbeat(&self, beat_index: usize) {
        self.lock().set_as_downbeat(beat_index);
        self.notify();
    }

    pub fn scale(&self, mode: crate::grid::ScaleMode) {
        self.lock().scale(mode);
        self.notify();
    }

    pub fn update_stream_info(&self, stream: StreamInfo) {
        self.lock().update_stream_info(stream);
        self.notify();
    }

    // Reads: lock for the duration of the query only.

    pub fn is_valid(&self) -> bool {
        self.lock().is_valid()
    }

    pub fn len(&self) -> usize {
        self.lock().grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().grid.is_empty()
    }

    pub fn average_bpm(&self) -> Option<f64> {
        self.lock().grid.average_bpm()
    }

    pub fn first_beat_position(&self) -> Option<f64> {
        self.lock().grid.first_beat_position()
    }

    pub fn last_beat_position(&self) -> Option<f64> {
        self.lock().grid.last_beat_position()
    }

    pub fn beat_at_index(&self, index: usize) -> Option<Beat> {
        self.lock().grid.beat_at_index(index)
    }

    pub fn find_nth_beat(&self, frame: f64, n: i64) -> Option<Beat> {
        self.lock().grid.find_nth_beat(frame, n)
    }

    pub fn find_next_beat(&self, frame: f64) -> Option<Beat> {
        self.lock().grid.find_next_beat(frame)
    }

    pub fn find_prev_beat(&self, frame: f64) -> Option<Beat> {
        self.lock().grid.find_prev_beat(frame)
    }

    pub fn find_prev_next_beats(&self, frame: f64) -> BeatNeighbors {
        self.lock().grid.find_prev_next_beats(frame)
    }

    pub fn find_closest_beat(&self, frame: f64) -> Option<Beat> {
        self.lock().grid.find_closest_beat(frame)
    }

    pub fn find_n_beats_from_frame(&self, frame: f64, beats_offset: f64) -> Option<f64> {
        self.lock().grid.find_n_beats_from_frame(frame, beats_offset)
    }

    pub fn num_beats_in_range(&self, start: f64, end: f64) -> i64 {
        self.lock().grid.num_beats_in_range(start, end)
    }

    pub fn bpm_around_position(&self, frame: f64, n: usize) -> Option<f64> {
        self.lock().grid.bpm_around_position(frame, n)
    }

    pub fn bpm_at_position(&self, frame: f64) -> Option<f64> {
        self.lock().grid.bpm_at_position(frame)
    }

    pub fn signature_at_bar(&self, downbeat_index: usize) -> TimeSignature {
        self.lock().signature_at_bar(downbeat_index)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.lock().to_bytes()
    }
}

impl std::fmt::Debug for BeatTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock();
        f.debug_struct("BeatTimeline")
            .field("beats", &core.grid.len())
            .field("average_bpm", &core.grid.average_bpm())
            .field("stream", &core.stream)
            .finish()
    }
}
