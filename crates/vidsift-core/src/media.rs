//! Contracts for the frame extraction and metadata probe collaborators.

use std::path::Path;

use crate::error::MediaError;
use crate::video::MediaInfo;

/// Reads container and stream metadata for a video file.
pub trait MediaProbe: Send + Sync {
    /// Probe a file. `MediaError::Unreadable` means the file itself is corrupt.
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;
}

/// Extracts single encoded frames from a video file.
pub trait FrameExtractor: Send + Sync {
    /// Extract the frame at `timestamp` seconds as encoded image bytes.
    fn extract_frame(&self, path: &Path, timestamp: f64) -> Result<Vec<u8>, MediaError>;
}

impl<T: MediaProbe + ?Sized> MediaProbe for std::sync::Arc<T> {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        (**self).probe(path)
    }
}

impl<T: FrameExtractor + ?Sized> FrameExtractor for std::sync::Arc<T> {
    fn extract_frame(&self, path: &Path, timestamp: f64) -> Result<Vec<u8>, MediaError> {
        (**self).extract_frame(path, timestamp)
    }
}
