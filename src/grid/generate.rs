// Grid generation - expands the sparse markers into the dense beat list
// Deterministic and idempotent; the only producer of BeatGrid values

use crate::grid::beat::{Beat, BeatGrid, ChangeFlags};
use crate::marker::{MarkerStore, TimeSignature};
use crate::stream::StreamInfo;

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Length of one beat in frames at the given tempo and signature.
/// The note value scales the beat relative to a quarter note.
pub(crate) fn beat_length_frames(bpm: f64, sample_rate: u32, signature: TimeSignature) -> f64 {
    SECONDS_PER_MINUTE * sample_rate as f64 * (4.0 / signature.note_value as f64) / bpm
}

/// Average BPM across a span of beats: `beat_count` beats covering the
/// frame range [`lower`, `upper`]. `None` for degenerate spans.
pub(crate) fn average_bpm_over_span(
    beat_count: usize,
    sample_rate: u32,
    lower: f64,
    upper: f64,
) -> Option<f64> {
    if beat_count < 2 || upper <= lower {
        return None;
    }
    Some(SECONDS_PER_MINUTE * sample_rate as f64 * (beat_count - 1) as f64 / (upper - lower))
}

/// Expand the marker store into a dense beat list.
///
/// Walks forward from the first beat frame, advancing a tempo cursor on
/// beat indexes and a signature cursor on bar boundaries, until a candidate
/// beat would fall past the end of the track. Canonicalizes the store as a
/// side effect, so generation after a serialization round trip is stable.
///
/// Fails soft: an invalid stream or a store without tempo markers yields
/// an empty grid, never an error.
pub fn generate(store: &mut MarkerStore, stream: StreamInfo) -> BeatGrid {
    if !stream.is_valid() || !store.is_valid() {
        return BeatGrid {
            beats: Vec::new(),
            average_bpm: None,
            sample_rate: stream.sample_rate,
        };
    }

    store.canonicalize();

    let track_last_frame = stream.last_frame();
    let tempo_markers = &store.tempo_markers;
    let signature_markers = &store.signature_markers;

    let mut beats: Vec<Beat> = Vec::new();
    let mut tempo_cursor = 0;
    let mut signature_cursor = 0;
    let mut bar_index: i64 = -1;
    // Beats until the first downbeat; 0 when the first beat is a downbeat
    let first_beats_per_bar = store.first_signature().beats_per_bar as usize;
    let mut bar_relative_index =
        (first_beats_per_bar - store.first_downbeat_index) % first_beats_per_bar;

    loop {
        let mut change = ChangeFlags::default();

        // The spacing to this beat is governed by the tempo in effect
        // before any marker landing on it takes over
        let bpm_before_this_beat = tempo_markers[tempo_cursor].bpm;
        if tempo_cursor < tempo_markers.len() - 1
            && tempo_markers[tempo_cursor + 1].beat_index == beats.len()
        {
            tempo_cursor += 1;
        }
        let current_tempo = tempo_markers[tempo_cursor];
        if current_tempo.beat_index == beats.len() {
            change.tempo = true;
        }

        let mut current_signature = signature_markers[signature_cursor].signature;
        let beat_length =
            beat_length_frames(bpm_before_this_beat, stream.sample_rate, current_signature);
        if !beat_length.is_finite() || beat_length <= 0.0 {
            break;
        }

        // Signature markers only take effect at bar boundaries
        if bar_relative_index % current_signature.beats_per_bar as usize == 0 {
            bar_index += 1;
            if store.first_downbeat_index == beats.len() {
                change.signature = true;
            }
            if signature_cursor < signature_markers.len() - 1
                && signature_markers[signature_cursor + 1].downbeat_index as i64 == bar_index
            {
                signature_cursor += 1;
                current_signature = signature_markers[signature_cursor].signature;
                change.signature = true;
            }
        }

        let beats_per_bar = current_signature.beats_per_bar as usize;
        let frame_position = match beats.last() {
            Some(last) => last.frame_position + beat_length,
            None => store.first_beat_frame,
        };
        if frame_position > track_last_frame {
            // The candidate past the end is discarded; the walk is done
            break;
        }

        beats.push(Beat {
            frame_position,
            index: beats.len(),
            bar_index,
            beat_in_bar_index: (bar_relative_index % beats_per_bar) as u32,
            bpm: current_tempo.bpm,
            signature: current_signature,
            change,
        });
        bar_relative_index = (bar_relative_index + 1) % beats_per_bar;
    }

    let average_bpm = if beats.is_empty() {
        None
    } else if tempo_markers.len() == 1 {
        // A single marker is the aggregate by definition
        Some(tempo_markers[0].bpm)
    } else {
        average_bpm_over_span(
            beats.len(),
            stream.sample_rate,
            beats[0].frame_position,
            beats[beats.len() - 1].frame_position,
        )
    };

    log::debug!(
        "regenerated beat grid: {} beats, average bpm {:?}",
        beats.len(),
        average_bpm
    );

    BeatGrid {
        beats,
        average_bpm,
        sample_rate: stream.sample_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{SignatureMarker, TempoMarker};

    fn sixty_bpm_store(first_beat_frame: f64) -> MarkerStore {
        let mut store = MarkerStore::default();
        store.first_beat_frame = first_beat_frame;
        store.set_tempo_marker(TempoMarker::new(0, 60.0));
        store
    }

    #[test]
    fn test_invalid_inputs_yield_empty_grid() {
        let mut store = MarkerStore::default();
        let grid = generate(&mut store, StreamInfo::new(44100, 180.0));
        assert!(grid.is_empty());

        let mut store = sixty_bpm_store(0.0);
        let grid = generate(&mut store, StreamInfo::new(0, 180.0));
        assert!(grid.is_empty());
        let grid = generate(&mut store, StreamInfo::new(44100, 0.0));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_constant_tempo_spacing() {
        let mut store = sixty_bpm_store(7.0);
        let grid = generate(&mut store, StreamInfo::new(22050, 180.0));

        // 60 BPM at 22050 frames/s puts a beat every 22050 frames
        assert_eq!(grid.len(), 180);
        assert_eq!(grid.beats()[0].frame_position, 7.0);
        for pair in grid.beats().windows(2) {
            assert_eq!(pair[1].frame_position - pair[0].frame_position, 22050.0);
        }
        assert_eq!(grid.average_bpm(), Some(60.0));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let mut store = sixty_bpm_store(7.0);
        store.set_tempo_marker(TempoMarker::new(16, 120.0));
        store.set_signature_marker(SignatureMarker::new(2, TimeSignature::new(3, 4)));
        let stream = StreamInfo::new(44100, 120.0);

        let first = generate(&mut store.clone(), stream);
        let second = generate(&mut store, stream);
        assert_eq!(first, second);
    }

    #[test]
    fn test_positions_strictly_increasing() {
        let mut store = sixty_bpm_store(0.0);
        store.set_tempo_marker(TempoMarker::new(8, 96.0));
        store.set_tempo_marker(TempoMarker::new(24, 64.0));
        let grid = generate(&mut store, StreamInfo::new(44100, 120.0));

        assert!(grid.len() > 24);
        for pair in grid.beats().windows(2) {
            assert!(pair[1].frame_position > pair[0].frame_position);
        }
    }

    #[test]
    fn test_tempo_change_flag_and_spacing() {
        let mut store = sixty_bpm_store(0.0);
        store.set_tempo_marker(TempoMarker::new(4, 120.0));
        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));

        let beats = grid.beats();
        assert!(beats[4].change.tempo);
        assert!(!beats[3].change.tempo);
        assert_eq!(beats[4].bpm, 120.0);
        // The gap onto the changed beat still uses the previous tempo
        assert_eq!(beats[4].frame_position - beats[3].frame_position, 22050.0);
        // After the change the beats come twice as fast
        assert_eq!(beats[5].frame_position - beats[4].frame_position, 11025.0);
    }

    #[test]
    fn test_signature_change_lands_on_bar_boundary() {
        let mut store = sixty_bpm_store(0.0);
        store.set_signature_marker(SignatureMarker::new(0, TimeSignature::new(4, 4)));
        store.set_signature_marker(SignatureMarker::new(2, TimeSignature::new(3, 4)));
        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));

        let beats = grid.beats();
        // Bars 0 and 1 have four beats, bar 2 onwards three
        assert_eq!(beats[8].bar_index, 2);
        assert!(beats[8].change.signature);
        assert_eq!(beats[8].signature, TimeSignature::new(3, 4));
        assert!(beats[8].is_downbeat());
        assert_eq!(beats[11].bar_index, 3);
        assert!(beats[11].is_downbeat());
        assert_eq!(beats[7].signature, TimeSignature::new(4, 4));
    }

    #[test]
    fn test_first_downbeat_offset() {
        let mut store = sixty_bpm_store(0.0);
        store.first_downbeat_index = 2;
        let grid = generate(&mut store, StreamInfo::new(22050, 30.0));

        let beats = grid.beats();
        assert!(!beats[0].is_downbeat());
        assert_eq!(beats[0].bar_index, -1);
        assert!(!beats[1].is_downbeat());
        assert!(beats[2].is_downbeat());
        assert_eq!(beats[2].bar_index, 0);
        assert!(beats[6].is_downbeat());
    }

    #[test]
    fn test_lone_signature_marker_at_later_bar_keeps_opening_in_common_time() {
        let mut store = sixty_bpm_store(0.0);
        store.set_signature_marker(SignatureMarker::new(2, TimeSignature::new(3, 4)));
        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));

        // Bars 0 and 1 run in 4/4; the 3/4 takes over at its own bar
        let beats = grid.beats();
        assert_eq!(beats[0].signature, TimeSignature::default());
        assert_eq!(beats[7].signature, TimeSignature::default());
        assert_eq!(beats[8].signature, TimeSignature::new(3, 4));
        assert!(beats[8].is_downbeat());
        assert_eq!(store.signature_markers[0].downbeat_index, 0);
    }

    #[test]
    fn test_degenerate_signature_marker_yields_empty_grid() {
        let mut store = sixty_bpm_store(0.0);
        store.set_signature_marker(SignatureMarker::new(0, TimeSignature::new(0, 4)));

        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));
        assert!(grid.is_empty());
        assert_eq!(grid.average_bpm(), None);
    }

    #[test]
    fn test_unreached_signature_marker_is_inert_but_retained() {
        let mut store = sixty_bpm_store(0.0);
        let baseline = generate(&mut store.clone(), StreamInfo::new(22050, 60.0));

        store.set_signature_marker(SignatureMarker::new(1_000_000, TimeSignature::new(5, 4)));
        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));

        assert_eq!(baseline.beats(), grid.beats());
        assert_eq!(store.signature_markers.len(), 2);
    }

    #[test]
    fn test_note_value_scales_beat_length() {
        let mut store = sixty_bpm_store(0.0);
        store.set_signature_marker(SignatureMarker::new(0, TimeSignature::new(4, 8)));
        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));

        // Eighth-note beats run at half the quarter-note length
        let beats = grid.beats();
        assert_eq!(beats[1].frame_position - beats[0].frame_position, 11025.0);
    }

    #[test]
    fn test_first_beat_past_track_end() {
        let mut store = sixty_bpm_store(1.0e9);
        let grid = generate(&mut store, StreamInfo::new(22050, 60.0));
        assert!(grid.is_empty());
        assert_eq!(grid.average_bpm(), None);
    }
}
