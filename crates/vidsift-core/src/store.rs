//! Contract for the persistent video store.

use std::sync::Arc;

use crate::error::StoreError;
use crate::fingerprint::{Fingerprint, Thumbnail};
use crate::video::{FingerprintRef, VideoDescriptor};

/// One video row waiting to be written, with the fingerprint it references.
#[derive(Debug, Clone)]
pub struct PersistRecord {
    /// Video to upsert.
    pub video: VideoDescriptor,
    /// Fingerprint shared with every other member of the video's group.
    pub fingerprint: FingerprintRef,
    /// Preview frames for display.
    pub thumbnails: Arc<[Thumbnail]>,
}

impl PersistRecord {
    /// Create a persistence record.
    pub fn new(
        video: VideoDescriptor,
        fingerprint: FingerprintRef,
        thumbnails: Arc<[Thumbnail]>,
    ) -> Self {
        Self {
            video,
            fingerprint,
            thumbnails,
        }
    }
}

/// Persistent store for videos and their fingerprints.
///
/// Fingerprint rows are identified by `Fingerprint::uid`, so several video rows
/// written in different calls can point at one fingerprint row.
pub trait VideoStore: Send {
    /// Every known video, with fingerprints shared by reference.
    fn all_videos(&self) -> Result<Vec<VideoDescriptor>, StoreError>;

    /// Every fingerprint referenced by at least one video, in store order.
    fn all_fingerprints(&self) -> Result<Vec<Fingerprint>, StoreError>;

    /// Write one video row and its fingerprint in a single transaction.
    fn create_video_with_fingerprint(
        &mut self,
        video: &VideoDescriptor,
        fingerprint: &Fingerprint,
        thumbnails: &[Thumbnail],
    ) -> Result<(), StoreError>;

    /// Write a batch of records in a single transaction, returning rows written.
    fn create_videos_with_fingerprints(
        &mut self,
        records: &[PersistRecord],
    ) -> Result<usize, StoreError>;

    /// Update bucket ids and neighbor lists, matched by `uid`.
    fn bulk_update_fingerprints(&mut self, fingerprints: &[Fingerprint])
    -> Result<(), StoreError>;
}
