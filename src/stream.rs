// Audio stream metadata
// Sample rate and duration supplied by the owning track

use serde::{Deserialize, Serialize};

/// Sample rate and duration of the audio stream a beat timeline belongs to.
/// Supplied and updated by the owning track; every update forces a full
/// regeneration of the dense beat list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Sample rate in Hz (frames per second; one frame spans all channels)
    pub sample_rate: u32,

    /// Track duration in seconds
    pub duration_seconds: f64,
}

impl StreamInfo {
    /// Create stream info for a track
    pub fn new(sample_rate: u32, duration_seconds: f64) -> Self {
        StreamInfo {
            sample_rate,
            duration_seconds,
        }
    }

    /// A stream is usable for beat generation only with a positive sample
    /// rate and duration
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.duration_seconds > 0.0
    }

    /// Last addressable frame position of the track
    pub fn last_frame(&self) -> f64 {
        self.sample_rate as f64 * self.duration_seconds
    }
}

impl Default for StreamInfo {
    fn default() -> Self {
        StreamInfo {
            sample_rate: 0,
            duration_seconds: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_invalid() {
        assert!(!StreamInfo::default().is_valid());
    }

    #[test]
    fn test_last_frame() {
        let info = StreamInfo::new(44100, 180.0);
        assert!(info.is_valid());
        assert_eq!(info.last_frame(), 44100.0 * 180.0);
    }

    #[test]
    fn test_zero_duration_is_invalid() {
        assert!(!StreamInfo::new(44100, 0.0).is_valid());
    }
}
