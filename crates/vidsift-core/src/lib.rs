//! Core types and traits for vidsift.
//!
//! This crate provides the data model shared by every stage of the pipeline:
//! video descriptors and their identity keys, fingerprints, the similarity
//! predicate, configuration, errors, and the contracts for the store and the
//! media collaborators.

mod config;
mod error;
mod fingerprint;
mod identity;
mod media;
mod store;
mod video;

pub use config::{DEFAULT_VIDEO_EXTENSIONS, ScanConfig, ScanConfigBuilder};
pub use error::{
    CompareError, FingerprintError, MediaError, PipelineError, ScanError, ScanWarning, StoreError,
    WarningKind,
};
pub use fingerprint::{
    DEGENERATE_SENTINELS, Fingerprint, HashKind, SEGMENT_LEN, Thumbnail, UNASSIGNED_BUCKET,
    is_degenerate_segment,
};
pub use identity::{symbol_distance, within_bounds};
pub use media::{FrameExtractor, MediaProbe};
pub use store::{PersistRecord, VideoStore};
pub use video::{ContentKey, FingerprintRef, InodeInfo, MediaInfo, VideoDescriptor};
