// Marker store serialization - versioned binary blob and JSON interchange
// Only the sparse markers are persisted; the dense grid is regenerated

use thiserror::Error;

use crate::marker::{MarkerStore, SignatureMarker, TempoMarker, TimeSignature};

/// Identifies a serialized marker store
const MAGIC: &[u8; 4] = b"BGRD";

/// Current blob format version
const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("not a beat grid blob (bad magic)")]
    BadMagic,

    #[error("unsupported beat grid blob version {0}")]
    UnsupportedVersion(u16),

    #[error("beat grid blob truncated")]
    Truncated,

    #[error("invalid beat grid blob: {0}")]
    InvalidValue(&'static str),

    #[error("beat grid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a marker store into the versioned little-endian layout:
/// magic, version, first beat frame, first downbeat index, then the
/// tempo and signature marker lists each prefixed with their count.
pub fn encode(store: &MarkerStore) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        MAGIC.len()
            + 2
            + 8
            + 8
            + 4
            + store.tempo_markers.len() * 16
            + 4
            + store.signature_markers.len() * 16,
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&store.first_beat_frame.to_le_bytes());
    out.extend_from_slice(&(store.first_downbeat_index as u64).to_le_bytes());

    out.extend_from_slice(&(store.tempo_markers.len() as u32).to_le_bytes());
    for marker in &store.tempo_markers {
        out.extend_from_slice(&(marker.beat_index as u64).to_le_bytes());
        out.extend_from_slice(&marker.bpm.to_le_bytes());
    }

    out.extend_from_slice(&(store.signature_markers.len() as u32).to_le_bytes());
    for marker in &store.signature_markers {
        out.extend_from_slice(&(marker.downbeat_index as u64).to_le_bytes());
        out.extend_from_slice(&marker.signature.beats_per_bar.to_le_bytes());
        out.extend_from_slice(&marker.signature.note_value.to_le_bytes());
    }
    out
}

/// Deserialize a marker store blob, validating structure and values.
/// A malformed blob is an error, never a panic or a silently empty store.
pub fn decode(blob: &[u8]) -> Result<MarkerStore, CodecError> {
    let mut reader = Reader::new(blob);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = reader.take_u16()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let first_beat_frame = reader.take_f64()?;
    if !first_beat_frame.is_finite() {
        return Err(CodecError::InvalidValue("first beat frame not finite"));
    }
    let first_downbeat_index = reader.take_u64()? as usize;

    let tempo_count = reader.take_u32()? as usize;
    let mut tempo_markers = Vec::with_capacity(tempo_count.min(1024));
    for _ in 0..tempo_count {
        let beat_index = reader.take_u64()? as usize;
        let bpm = reader.take_f64()?;
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(CodecError::InvalidValue("tempo marker bpm out of range"));
        }
        let ordered = tempo_markers
            .last()
            .map_or(true, |prev: &TempoMarker| prev.beat_index < beat_index);
        if !ordered {
            return Err(CodecError::InvalidValue("tempo markers out of order"));
        }
        tempo_markers.push(TempoMarker::new(beat_index, bpm));
    }

    let signature_count = reader.take_u32()? as usize;
    let mut signature_markers = Vec::with_capacity(signature_count.min(1024));
    for _ in 0..signature_count {
        let downbeat_index = reader.take_u64()? as usize;
        let beats_per_bar = reader.take_u32()?;
        let note_value = reader.take_u32()?;
        if beats_per_bar == 0 || note_value == 0 {
            return Err(CodecError::InvalidValue("zero time signature component"));
        }
        let ordered = signature_markers
            .last()
            .map_or(true, |prev: &SignatureMarker| {
                prev.downbeat_index < downbeat_index
            });
        if !ordered {
            return Err(CodecError::InvalidValue("signature markers out of order"));
        }
        signature_markers.push(SignatureMarker::new(
            downbeat_index,
            TimeSignature::new(beats_per_bar, note_value),
        ));
    }

    if !reader.is_empty() {
        return Err(CodecError::InvalidValue("trailing bytes"));
    }

    Ok(MarkerStore {
        first_beat_frame,
        first_downbeat_index,
        tempo_markers,
        signature_markers,
    })
}

/// JSON rendition of the marker store, for tooling and debugging
pub fn to_json(store: &MarkerStore) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(store)?)
}

pub fn from_json(json: &str) -> Result<MarkerStore, CodecError> {
    Ok(serde_json::from_str(json)?)
}

/// Bounds-checked little-endian cursor over the blob
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() < n {
            return Err(CodecError::Truncated);
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn take_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.take_u64()?))
    }
}
