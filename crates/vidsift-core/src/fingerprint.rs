//! Perceptual fingerprint records.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Hex characters produced by one 64-bit perceptual hash.
pub const SEGMENT_LEN: usize = 16;

/// Bucket id of a fingerprint that belongs to no duplicate group.
pub const UNASSIGNED_BUCKET: i64 = -1;

/// Hashes of featureless (solid color) samples.
///
/// The all-low pattern, and the all-high pattern in both of its spellings.
pub const DEGENERATE_SENTINELS: [&str; 3] =
    ["0000000000000000", "ffffffffffffffff", "8000000000000000"];

/// Fingerprinting mode.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HashKind {
    /// One hash over a collage of frames from the middle of the video.
    #[default]
    Fast,
    /// One hash per second of footage, concatenated.
    Slow,
}

/// One perceptual hash record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Stable identity, shared by every video row referencing this record.
    pub uid: Uuid,

    /// Store row id once persisted.
    #[serde(default)]
    pub id: Option<i64>,

    /// Mode that produced the value.
    pub kind: HashKind,

    /// Hex hash value; slow mode concatenates `SEGMENT_LEN` segments.
    pub value: String,

    /// Duration of the source video in seconds.
    pub duration: f64,

    /// Store-order indices of similar fingerprints (rebuilt every clustering pass).
    #[serde(default)]
    pub neighbors: Vec<usize>,

    /// Duplicate bucket, or `UNASSIGNED_BUCKET`.
    pub bucket: i64,
}

impl Fingerprint {
    /// Create a new, unpersisted and unclustered fingerprint.
    pub fn new(kind: HashKind, value: impl Into<String>, duration: f64) -> Self {
        Self {
            uid: Uuid::new_v4(),
            id: None,
            kind,
            value: value.into(),
            duration,
            neighbors: Vec::new(),
            bucket: UNASSIGNED_BUCKET,
        }
    }

    /// Iterate the fixed-length segments of the value.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.value
            .as_bytes()
            .chunks(SEGMENT_LEN)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
    }

    /// Check if every segment is a degenerate sentinel.
    ///
    /// An empty value carries no information and counts as degenerate.
    pub fn is_degenerate(&self) -> bool {
        self.segments().all(is_degenerate_segment)
    }

    /// Check if the fingerprint has been placed in a bucket.
    pub fn is_bucketed(&self) -> bool {
        self.bucket >= 0
    }

    /// Forget neighbors and bucket ahead of a clustering pass.
    pub fn reset_cluster_state(&mut self) {
        self.bucket = UNASSIGNED_BUCKET;
        self.neighbors.clear();
    }
}

/// Check a single hash segment against the sentinels.
pub fn is_degenerate_segment(segment: &str) -> bool {
    DEGENERATE_SENTINELS
        .iter()
        .any(|sentinel| sentinel.eq_ignore_ascii_case(segment))
}

/// Encoded preview image kept alongside a video row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    /// Position in the source video, in seconds.
    pub timestamp: f64,
    /// PNG bytes.
    pub data: Vec<u8>,
}

impl Thumbnail {
    /// Create a thumbnail.
    pub fn new(timestamp: f64, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}
