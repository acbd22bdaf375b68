use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Immutable camera still. `payload` holds the encoded JPEG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(payload: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            captured_at,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Archive file name for this frame, e.g. `2024-05-01T07:00:00Z.jpg`.
    /// Sorting these names lexically sorts them by capture time.
    pub fn archive_name(&self) -> String {
        archive_name_for(self.captured_at)
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            captured_at: self.captured_at,
            size_bytes: self.payload.len(),
        }
    }
}

pub fn archive_name_for(at: DateTime<Utc>) -> String {
    format!("{}.jpg", at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Metadata view of a cached frame, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub captured_at: DateTime<Utc>,
    pub size_bytes: usize,
}
