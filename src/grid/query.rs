// Read queries over the dense beat list
// Epsilon-tolerant position matching, neighbor search and windowed tempo

use crate::grid::beat::{Beat, BeatGrid};
use crate::grid::generate::{average_bpm_over_span, beat_length_frames};
use crate::marker::TimeSignature;

/// Fraction of the average beat length within which a query position is
/// treated as sitting on a beat
const BEAT_VICINITY_FACTOR: f64 = 0.1;

/// The beats bracketing a query position. Either side is `None` when the
/// position lies outside the grid on that side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatNeighbors {
    /// Beat at or before the position (the position itself when on a beat)
    pub prev: Option<Beat>,

    /// Beat after the position (the following beat when on a beat)
    pub next: Option<Beat>,
}

impl BeatNeighbors {
    /// True when both sides resolved
    pub fn is_complete(&self) -> bool {
        self.prev.is_some() && self.next.is_some()
    }
}

/// Forward-only iterator over the beats inside a frame range
#[derive(Debug, Clone)]
pub struct BeatRange<'a> {
    iter: std::slice::Iter<'a, Beat>,
}

impl<'a> Iterator for BeatRange<'a> {
    type Item = &'a Beat;

    fn next(&mut self) -> Option<&'a Beat> {
        self.iter.next()
    }
}

/// How a query position relates to the beats around it
struct Bracket {
    on: Option<usize>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl BeatGrid {
    /// Frame distance below which a position counts as on a beat
    fn vicinity_epsilon(&self) -> Option<f64> {
        let bpm = self.average_bpm()?;
        Some(
            BEAT_VICINITY_FACTOR
                * beat_length_frames(bpm, self.sample_rate, TimeSignature::default()),
        )
    }

    /// Locate `frame` between beats: binary-search the first beat at or
    /// past the position, step back one to bracket, then scan forward.
    /// A beat within the vicinity epsilon captures the position as "on"
    /// that beat.
    fn bracket(&self, frame: f64) -> Option<Bracket> {
        let epsilon = self.vicinity_epsilon()?;

        let mut start = self.beats.partition_point(|beat| beat.frame_position < frame);
        if start > 0 {
            start -= 1;
        }

        let mut on = None;
        let mut prev = None;
        let mut next = None;
        for index in start..self.beats.len() {
            let delta = self.beats[index].frame_position - frame;
            if delta.abs() < epsilon {
                on = Some(index);
                break;
            }
            if delta < 0.0 {
                prev = Some(index);
            } else {
                next = Some(index);
                break;
            }
        }

        Some(Bracket { on, prev, next })
    }

    /// Find the Nth beat from `frame`. Positive `n` counts forward from
    /// the next beat, negative backward from the previous beat; a position
    /// on a beat counts that beat as both. `n == 0` and stepping past
    /// either end of the grid resolve to `None`.
    pub fn find_nth_beat(&self, frame: f64, n: i64) -> Option<Beat> {
        if n == 0 || !self.is_valid() {
            return None;
        }
        let bracket = self.bracket(frame)?;

        if n > 0 {
            let start = bracket.on.or(bracket.next)?;
            self.beats.get(start + (n - 1) as usize).copied()
        } else {
            let start = bracket.on.or(bracket.prev)?;
            let steps = (-n - 1) as usize;
            if steps > start {
                return None;
            }
            Some(self.beats[start - steps])
        }
    }

    /// Next beat at or after `frame` (the same beat when on one)
    pub fn find_next_beat(&self, frame: f64) -> Option<Beat> {
        self.find_nth_beat(frame, 1)
    }

    /// Previous beat at or before `frame` (the same beat when on one)
    pub fn find_prev_beat(&self, frame: f64) -> Option<Beat> {
        self.find_nth_beat(frame, -1)
    }

    /// Both neighbors of `frame`. On a beat, that beat is the previous
    /// neighbor and the following beat the next one.
    pub fn find_prev_next_beats(&self, frame: f64) -> BeatNeighbors {
        let unresolved = BeatNeighbors {
            prev: None,
            next: None,
        };
        if !self.is_valid() {
            return unresolved;
        }
        let Some(bracket) = self.bracket(frame) else {
            return unresolved;
        };

        if let Some(on) = bracket.on {
            return BeatNeighbors {
                prev: Some(self.beats[on]),
                next: self.beats.get(on + 1).copied(),
            };
        }
        BeatNeighbors {
            prev: bracket.prev.map(|index| self.beats[index]),
            next: bracket.next.map(|index| self.beats[index]),
        }
    }

    /// The beat nearest to `frame` by absolute distance; an exact tie
    /// resolves to the next beat
    pub fn find_closest_beat(&self, frame: f64) -> Option<Beat> {
        if !self.is_valid() {
            return None;
        }
        let neighbors = self.find_prev_next_beats(frame);
        match (neighbors.prev, neighbors.next) {
            (None, next) => next,
            (prev, None) => prev,
            (Some(prev), Some(next)) => {
                if next.frame_position - frame > frame - prev.frame_position {
                    Some(prev)
                } else {
                    Some(next)
                }
            }
        }
    }

    /// Frame position `beats_offset` beats away from `frame`. The integer
    /// part steps along the grid, the fractional remainder interpolates
    /// linearly between the resolved beat and its successor. `None` when
    /// the walk leaves the grid.
    pub fn find_n_beats_from_frame(&self, frame: f64, beats_offset: f64) -> Option<f64> {
        let neighbors = self.find_prev_next_beats(frame);
        let prev = neighbors.prev?;
        let next = neighbors.next?;

        let from_fraction =
            (frame - prev.frame_position) / (next.frame_position - prev.frame_position);
        let total = from_fraction + beats_offset;
        let full = total.trunc() as i64;
        let fraction = total - full as f64;

        let resolved = if full > 0 {
            self.find_nth_beat(next.frame_position, full)?
        } else {
            self.find_nth_beat(prev.frame_position, full - 1)?
        };

        let mut position = resolved.frame_position;
        if fraction != 0.0 {
            let following = self.find_nth_beat(position, 2)?;
            position += (following.frame_position - position) * fraction;
        }
        Some(position)
    }

    /// Iterate the beats with a frame position in `[start, end]`. Empty
    /// for an invalid grid or an inverted range.
    pub fn find_beats(&self, start: f64, end: f64) -> BeatRange<'_> {
        if !self.is_valid() || start > end {
            return BeatRange { iter: [].iter() };
        }
        let first = self.beats.partition_point(|beat| beat.frame_position < start);
        let last = self.beats.partition_point(|beat| beat.frame_position <= end);
        BeatRange {
            iter: self.beats[first..last].iter(),
        }
    }

    /// Count beats by walking forward from `start` until a beat at or past
    /// `end` terminates the walk. O(n) in the beat count; the bracketing
    /// beat starting the walk and the terminating beat are both excluded
    /// from the count.
    pub fn num_beats_in_range(&self, start: f64, end: f64) -> i64 {
        let mut last_counted = 0.0;
        let mut count: i64 = 1;
        while last_counted < end {
            match self.find_nth_beat(start, count) {
                Some(beat) => last_counted = beat.frame_position,
                None => break,
            }
            count += 1;
        }
        count - 2
    }

    /// Average tempo across up to `n` beats on each side of the beat
    /// bracketing `frame`; the window clamps at the ends of the track.
    /// `None` when the window degenerates to fewer than two beats.
    pub fn bpm_around_position(&self, frame: f64, n: usize) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        let at_or_before = self.beats.partition_point(|beat| beat.frame_position <= frame);
        let center = at_or_before.saturating_sub(1);

        let lower = center.saturating_sub(n);
        let upper = (center + n).min(self.beats.len() - 1);
        average_bpm_over_span(
            upper - lower + 1,
            self.sample_rate,
            self.beats[lower].frame_position,
            self.beats[upper].frame_position,
        )
    }

    /// Tempo in effect at `frame`: the BPM of the bracketing beat, or the
    /// first beat's BPM before the start of the grid
    pub fn bpm_at_position(&self, frame: f64) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        if frame < self.beats[0].frame_position {
            return Some(self.beats[0].bpm);
        }
        self.find_prev_beat(frame).map(|beat| beat.bpm)
    }
}
