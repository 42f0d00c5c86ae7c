// Grid editing - mutation operations over the marker store
// Every edit rewrites the sparse markers and rebuilds the dense list

use serde::{Deserialize, Serialize};

use crate::marker::{MarkerStore, SignatureMarker, TempoMarker, TimeSignature};
use crate::timeline::TimelineCore;

/// Tempo scaling modes, each composed from the two primitives of
/// multiplying or dividing every tempo marker's beat index and BPM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Double,
    Halve,
    TwoThirds,
    ThreeFourths,
    FourThirds,
    ThreeHalves,
}

impl ScaleMode {
    /// Composition table: multiply by the first factor, then divide by
    /// the second
    fn factors(&self) -> (usize, usize) {
        match self {
            ScaleMode::Double => (2, 1),
            ScaleMode::Halve => (1, 2),
            ScaleMode::TwoThirds => (2, 3),
            ScaleMode::ThreeFourths => (3, 4),
            ScaleMode::FourThirds => (4, 3),
            ScaleMode::ThreeHalves => (3, 2),
        }
    }
}

/// Multiply every tempo marker's beat index and BPM
fn scale_multiple(store: &mut MarkerStore, multiple: usize) {
    for marker in &mut store.tempo_markers {
        marker.beat_index *= multiple;
        marker.bpm *= multiple as f64;
    }
}

/// Divide every tempo marker's beat index and BPM; beat indexes divide
/// as integers, matching the removed-beat interpretation of downscaling.
/// Markers whose indexes collide after the division merge last-wins, so
/// the store stays strictly ordered.
fn scale_fraction(store: &mut MarkerStore, fraction: usize) {
    let markers = std::mem::take(&mut store.tempo_markers);
    for mut marker in markers {
        marker.beat_index /= fraction;
        marker.bpm /= fraction as f64;
        store.set_tempo_marker(marker);
    }
}

impl TimelineCore {
    /// Replace all tempo markers with a single constant-tempo grid
    /// anchored at `first_beat_frame`
    pub fn set_grid(&mut self, bpm: f64, first_beat_frame: f64) {
        self.store.tempo_markers.clear();
        self.store.first_beat_frame = first_beat_frame;
        self.store.set_tempo_marker(TempoMarker::new(0, bpm));
        self.regenerate();
    }

    /// Insert or replace the tempo marker at `beat_index`
    pub fn set_bpm(&mut self, bpm: f64, beat_index: usize) {
        if !self.is_valid() {
            return;
        }
        self.store.set_tempo_marker(TempoMarker::new(beat_index, bpm));
        self.regenerate();
    }

    /// Insert or replace the signature marker at bar `downbeat_index`.
    /// Signatures take effect at bar boundaries; a marker addressing a bar
    /// the track never reaches stays in the store without affecting the
    /// grid.
    pub fn set_signature(&mut self, signature: TimeSignature, downbeat_index: usize) {
        if !self.is_valid() || !signature.is_valid() {
            return;
        }
        self.store
            .set_signature_marker(SignatureMarker::new(downbeat_index, signature));
        self.regenerate();
    }

    /// Shift every beat by `delta_frames`. Beats pushed before the start
    /// of the track or past its end are not pruned.
    pub fn translate(&mut self, delta_frames: f64) {
        if !self.is_valid() {
            return;
        }
        self.store.first_beat_frame += delta_frames;
        self.regenerate();
    }

    /// Turn the beat at `beat_index` into a downbeat, shifting all
    /// downbeats accordingly
    pub fn set_as_downbeat(&mut self, beat_index: usize) {
        let Some(beat) = self.grid.beat_at_index(beat_index) else {
            return;
        };
        self.store.first_downbeat_index += beat.beat_in_bar_index as usize;
        self.regenerate();
    }

    /// Scale the tempo markers by one of the fixed ratios
    pub fn scale(&mut self, mode: ScaleMode) {
        if !self.is_valid() {
            return;
        }
        let (multiple, fraction) = mode.factors();
        if multiple > 1 {
            scale_multiple(&mut self.store, multiple);
        }
        if fraction > 1 {
            scale_fraction(&mut self.store, fraction);
        }
        self.regenerate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamInfo;

    const SAMPLE_RATE: u32 = 22050;

    fn sixty_bpm_core() -> TimelineCore {
        let mut core = TimelineCore::new(StreamInfo::new(SAMPLE_RATE, 180.0));
        core.set_grid(60.0, 7.0);
        core
    }

    #[test]
    fn test_set_grid_resets_tempo_markers() {
        let mut core = sixty_bpm_core();
        core.set_bpm(90.0, 16);
        assert_eq!(core.store().tempo_markers.len(), 2);

        core.set_grid(120.0, 0.0);
        assert_eq!(core.store().tempo_markers.len(), 1);
        assert_eq!(core.grid().average_bpm(), Some(120.0));
        assert_eq!(core.grid().first_beat_position(), Some(0.0));
    }

    #[test]
    fn test_scale_double_and_halve_are_inverse() {
        let mut core = sixty_bpm_core();
        assert_eq!(core.grid().average_bpm(), Some(60.0));

        core.scale(ScaleMode::Double);
        assert_eq!(core.grid().average_bpm(), Some(120.0));

        core.scale(ScaleMode::Halve);
        assert_eq!(core.grid().average_bpm(), Some(60.0));
    }

    #[test]
    fn test_scale_two_thirds_and_three_halves_are_inverse() {
        let mut core = sixty_bpm_core();

        core.scale(ScaleMode::TwoThirds);
        assert_eq!(core.grid().average_bpm(), Some(40.0));

        core.scale(ScaleMode::ThreeHalves);
        assert_eq!(core.grid().average_bpm(), Some(60.0));
    }

    #[test]
    fn test_scale_three_fourths_and_four_thirds_are_inverse() {
        let mut core = sixty_bpm_core();

        core.scale(ScaleMode::ThreeFourths);
        assert_eq!(core.grid().average_bpm(), Some(45.0));

        core.scale(ScaleMode::FourThirds);
        assert_eq!(core.grid().average_bpm(), Some(60.0));
    }

    #[test]
    fn test_scale_halve_merges_colliding_markers() {
        let mut core = sixty_bpm_core();
        core.set_bpm(120.0, 4);
        core.set_bpm(90.0, 5);

        // Indexes 4 and 5 both land on 2; the later marker wins
        core.scale(ScaleMode::Halve);
        let markers = &core.store().tempo_markers;
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].beat_index, 0);
        assert_eq!(markers[1].beat_index, 2);
        assert_eq!(markers[1].bpm, 45.0);

        // The scaled store still round-trips through the codec
        let blob = core.to_bytes();
        assert!(crate::codec::decode(&blob).is_ok());
    }

    #[test]
    fn test_set_signature_ignores_zero_components() {
        let mut core = sixty_bpm_core();
        let before = core.grid().clone();

        core.set_signature(TimeSignature::new(0, 4), 0);
        core.set_signature(TimeSignature::new(4, 0), 1);

        assert_eq!(core.grid(), &before);
        assert_eq!(core.store().signature_markers.len(), 1);
        assert_eq!(core.signature_at_bar(0), TimeSignature::default());
    }

    #[test]
    fn test_set_bpm_inserts_and_replaces() {
        let mut core = sixty_bpm_core();
        core.set_bpm(90.0, 16);
        assert_eq!(core.store().tempo_markers.len(), 2);
        assert_eq!(core.grid().beats()[16].bpm, 90.0);

        core.set_bpm(100.0, 16);
        assert_eq!(core.store().tempo_markers.len(), 2);
        assert_eq!(core.grid().beats()[16].bpm, 100.0);
    }

    #[test]
    fn test_translate_moves_every_beat() {
        let mut core = sixty_bpm_core();
        let before: Vec<f64> = core
            .grid()
            .beats()
            .iter()
            .map(|beat| beat.frame_position)
            .collect();

        core.translate(500.0);
        let after = core.grid().beats();

        for (beat, original) in after.iter().zip(&before) {
            assert_eq!(beat.frame_position, original + 500.0);
        }
    }

    #[test]
    fn test_translate_before_track_start_keeps_beats() {
        let mut core = sixty_bpm_core();
        core.translate(-30000.0);
        // The first beat now lies before frame 0 and is retained
        assert_eq!(core.grid().first_beat_position(), Some(7.0 - 30000.0));
    }

    #[test]
    fn test_set_signature_scenario() {
        let mut core = sixty_bpm_core();

        assert_eq!(core.signature_at_bar(0), TimeSignature::default());

        core.set_signature(TimeSignature::new(3, 4), 0);
        core.set_signature(TimeSignature::new(5, 4), 1_000_000);
        core.set_signature(TimeSignature::new(5, 3), 5_000_000);

        assert_eq!(core.signature_at_bar(500_000), TimeSignature::new(3, 4));
        assert_eq!(core.signature_at_bar(1_000_000), TimeSignature::new(5, 4));
        assert_eq!(core.signature_at_bar(5_000_000), TimeSignature::new(5, 3));
        assert_eq!(core.signature_at_bar(100_000_000), TimeSignature::new(5, 3));

        // A signature addressing a bar past the track end never shows up
        // on any generated beat
        let before = core.grid().clone();
        core.set_signature(TimeSignature::new(6, 4), 10_000_000);
        assert_eq!(core.grid().beats(), before.beats());
        for beat in core.grid().beats() {
            assert_eq!(beat.signature, TimeSignature::new(3, 4));
        }
    }

    #[test]
    fn test_set_as_downbeat() {
        let mut core = sixty_bpm_core();
        // Beat 2 sits two beats into bar 0
        assert!(!core.grid().beats()[2].is_downbeat());

        core.set_as_downbeat(2);
        let beats = core.grid().beats();
        assert!(beats[2].is_downbeat());
        assert_eq!(beats[2].bar_index, 0);
        assert!(!beats[0].is_downbeat());
        assert!(beats[6].is_downbeat());
    }

    #[test]
    fn test_set_as_downbeat_twice_round_trips() {
        let mut core = sixty_bpm_core();
        core.set_as_downbeat(2);
        // Reassigning a beat that already is a downbeat changes nothing
        let before = core.grid().clone();
        core.set_as_downbeat(6);
        assert_eq!(core.grid().beats(), before.beats());
    }

    #[test]
    fn test_edits_on_invalid_core_are_ignored() {
        let mut core = TimelineCore::new(StreamInfo::new(SAMPLE_RATE, 180.0));
        core.set_bpm(120.0, 0);
        core.translate(100.0);
        core.scale(ScaleMode::Double);
        core.set_signature(TimeSignature::new(3, 4), 0);
        assert!(!core.is_valid());
        assert!(core.grid().is_empty());
    }
}
