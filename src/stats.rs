// Beat statistics - aggregate tempo estimation over raw analyzer beats
// Operates on plain frame positions, before any marker store exists

use std::collections::BTreeMap;

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Beats per sliding window when estimating local tempo
const BPM_WINDOW_BEATS: usize = 8;

/// Local BPM values are rounded to two decimals before entering the
/// histogram
const HISTOGRAM_SCALE: f64 = 100.0;

/// Maximum deviation from the global BPM for a window to count as
/// correctly detected
const MAX_BPM_ERROR: f64 = 0.05;

/// Estimate the global BPM of a raw beat sequence.
///
/// Slides a fixed-size window over the beats, computes the local BPM of
/// each window, and takes the statistical median of the rounded values.
/// A histogram median is robust against the odd spurious or missed beat
/// that would wreck a plain mean. The result is folded into
/// [`min_bpm`, `max_bpm`] by octave shifts.
pub fn calculate_bpm(beats: &[f64], sample_rate: u32, min_bpm: f64, max_bpm: f64) -> Option<f64> {
    if beats.len() < 2 || sample_rate == 0 {
        return None;
    }

    let window = BPM_WINDOW_BEATS.min(beats.len() - 1);
    let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
    let mut total = 0usize;
    for start in 0..beats.len() - window {
        let span = beats[start + window] - beats[start];
        if span <= 0.0 {
            continue;
        }
        let local_bpm = SECONDS_PER_MINUTE * sample_rate as f64 * window as f64 / span;
        let key = (local_bpm * HISTOGRAM_SCALE).round() as i64;
        *histogram.entry(key).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return None;
    }

    // Median by cumulative count over the ordered histogram
    let middle = (total + 1) / 2;
    let mut seen = 0usize;
    let mut median_key = 0i64;
    for (&key, &count) in &histogram {
        seen += count;
        median_key = key;
        if seen >= middle {
            break;
        }
    }

    let median_bpm = median_key as f64 / HISTOGRAM_SCALE;
    Some(constrain_bpm(median_bpm, min_bpm, max_bpm, false))
}

/// Fold a BPM into [`min_bpm`, `max_bpm`] by doubling or halving.
///
/// With `above_range` set, values above the range are trusted and only
/// values below it are folded up. Non-finite input collapses to 0.0;
/// a non-positive BPM or a degenerate range passes through untouched.
pub fn constrain_bpm(bpm: f64, min_bpm: f64, max_bpm: f64, above_range: bool) -> f64 {
    if !bpm.is_finite() {
        return 0.0;
    }
    if bpm <= 0.0 || min_bpm <= 0.0 || max_bpm <= 0.0 || min_bpm >= max_bpm {
        return bpm;
    }

    let mut folded = bpm;
    if !above_range {
        while folded > max_bpm {
            folded /= 2.0;
        }
    }
    while folded < min_bpm {
        folded *= 2.0;
    }
    folded
}

/// Frame offset that best aligns one beat sequence onto another.
///
/// Tries every whole-frame offset within half a beat length either way
/// and scores it by how many shifted beats land within a hundredth of a
/// beat length of some reference beat. Returns 0.0 when no candidate
/// scores at all.
pub fn calculate_offset(
    beats: &[f64],
    bpm: f64,
    reference_beats: &[f64],
    sample_rate: u32,
) -> f64 {
    if beats.is_empty() || reference_beats.is_empty() || sample_rate == 0 {
        return 0.0;
    }
    if !bpm.is_finite() || bpm <= 0.0 {
        return 0.0;
    }

    let beat_length = SECONDS_PER_MINUTE * sample_rate as f64 / bpm;
    let tolerance = beat_length / 100.0;
    let half = (beat_length / 2.0) as i64;

    let mut best_offset = 0.0;
    let mut best_score = 0usize;
    let mut best_error = f64::INFINITY;
    for candidate in -half..=half {
        let offset = candidate as f64;
        let mut score = 0usize;
        let mut error = 0.0;
        for &position in beats {
            let shifted = position + offset;
            let at = reference_beats.partition_point(|&b| b < shifted - tolerance);
            if let Some(&matched) = reference_beats.get(at) {
                let distance = (matched - shifted).abs();
                if distance <= tolerance {
                    score += 1;
                    error += distance;
                }
            }
        }
        // Neighboring offsets tie on count; the tightest alignment wins
        if score > best_score || (score == best_score && score > 0 && error < best_error) {
            best_score = score;
            best_offset = offset;
            best_error = error;
        }
    }
    best_offset
}

/// First raw beat that opens a window whose local BPM agrees with the
/// global BPM. Analyzers often mis-track the intro; this skips it.
/// Falls back to the very first beat when no window agrees.
pub fn find_first_correct_beat(
    raw_beats: &[f64],
    sample_rate: u32,
    global_bpm: f64,
) -> Option<f64> {
    if raw_beats.is_empty() || sample_rate == 0 {
        return None;
    }

    if raw_beats.len() > BPM_WINDOW_BEATS {
        for start in 0..raw_beats.len() - BPM_WINDOW_BEATS {
            let span = raw_beats[start + BPM_WINDOW_BEATS] - raw_beats[start];
            if span <= 0.0 {
                continue;
            }
            let local_bpm =
                SECONDS_PER_MINUTE * sample_rate as f64 * BPM_WINDOW_BEATS as f64 / span;
            if (local_bpm - global_bpm).abs() < MAX_BPM_ERROR {
                return Some(raw_beats[start]);
            }
        }
    }
    raw_beats.first().copied()
}

/// Anchor frame for a fixed-tempo grid: the first correct beat folded
/// back toward the start of the sequence by whole beat lengths, so the
/// grid keeps the detected phase but starts as early as possible.
pub fn calculate_fixed_tempo_first_beat(
    raw_beats: &[f64],
    sample_rate: u32,
    global_bpm: f64,
) -> Option<f64> {
    if !global_bpm.is_finite() || global_bpm <= 0.0 || sample_rate == 0 {
        return None;
    }
    let first = *raw_beats.first()?;
    let anchor = find_first_correct_beat(raw_beats, sample_rate, global_bpm)?;

    let beat_length = SECONDS_PER_MINUTE * sample_rate as f64 / global_bpm;
    let whole_beats_back = ((anchor - first) / beat_length).floor();
    Some(anchor - whole_beats_back * beat_length)
}
