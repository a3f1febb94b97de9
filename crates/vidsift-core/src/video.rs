//! Video file descriptors and the identity keys used to reconcile them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Shared handle to a fingerprint. Videos proven identical hold the same `Arc`.
pub type FingerprintRef = Arc<Fingerprint>;

/// Inode information for hardlink detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }
}

/// File size paired with its streaming content digest (seeded with the size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    /// File size in bytes.
    pub size: u64,
    /// 64-bit content digest.
    pub hash: u64,
}

impl ContentKey {
    /// Create a new content key.
    pub fn new(size: u64, hash: u64) -> Self {
        Self { size, hash }
    }

    /// Digest as a fixed-width hex string.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.hash)
    }
}

/// Media metadata reported by the probe collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds.
    pub duration: f64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Codec of the first video stream.
    pub video_codec: CompactString,
    /// Codec of the first audio stream, if any.
    pub audio_codec: Option<CompactString>,
    /// Overall bitrate in bits per second.
    pub bitrate: u64,
    /// Container size in bytes as reported by the probe.
    pub size: u64,
}

/// One physical video file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoDescriptor {
    /// Store row id once persisted.
    #[serde(default)]
    pub id: Option<i64>,

    /// Full path of the file.
    pub path: PathBuf,

    /// File name (not full path).
    pub file_name: CompactString,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified: SystemTime,

    /// Filesystem identity.
    pub inode: InodeInfo,

    /// Number of hard links to the inode.
    pub nlink: u64,

    /// Link target when the path was reached through a symbolic link.
    #[serde(default)]
    pub symlink_target: Option<CompactString>,

    /// Streaming content digest, computed on demand.
    #[serde(default)]
    pub content_hash: Option<u64>,

    /// Probe results.
    #[serde(default)]
    pub media: Option<MediaInfo>,

    /// Set when probing found the file unreadable.
    #[serde(default)]
    pub corrupted: bool,

    /// Fingerprint shared with every identical video.
    #[serde(skip)]
    pub fingerprint: Option<FingerprintRef>,
}

impl VideoDescriptor {
    /// Create a descriptor for a freshly enumerated file.
    pub fn new(
        path: impl Into<PathBuf>,
        size: u64,
        modified: SystemTime,
        inode: InodeInfo,
    ) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_default();

        Self {
            id: None,
            path,
            file_name,
            size,
            modified,
            inode,
            nlink: 1,
            symlink_target: None,
            content_hash: None,
            media: None,
            corrupted: false,
            fingerprint: None,
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file was reached through a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.symlink_target.is_some()
    }

    /// Check if other hard links to this inode exist.
    pub fn is_hardlinked(&self) -> bool {
        self.nlink > 1
    }

    /// Content key, available once the digest has been computed.
    pub fn content_key(&self) -> Option<ContentKey> {
        self.content_hash.map(|hash| ContentKey::new(self.size, hash))
    }

    /// Probed duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.media.as_ref().map(|m| m.duration)
    }

    /// Check whether `other` describes the same unmodified file on disk.
    pub fn is_unchanged_from(&self, other: &VideoDescriptor) -> bool {
        self.path == other.path
            && self.inode == other.inode
            && self.size == other.size
            && self.modified == other.modified
    }

    /// Attach a shared fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: FingerprintRef) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_file_name() {
        let video = VideoDescriptor::new(
            "/media/clips/holiday.mp4",
            1024,
            SystemTime::UNIX_EPOCH,
            InodeInfo::new(7, 1),
        );
        assert_eq!(video.file_name, "holiday.mp4");
        assert!(!video.is_symlink());
        assert!(video.content_key().is_none());
    }

    #[test]
    fn test_content_key_hex() {
        let key = ContentKey::new(10, 0xab);
        assert_eq!(key.to_hex(), "00000000000000ab");
    }

    #[test]
    fn test_unchanged_requires_same_inode() {
        let a = VideoDescriptor::new("/a.mkv", 5, SystemTime::UNIX_EPOCH, InodeInfo::new(1, 1));
        let mut b = a.clone();
        assert!(a.is_unchanged_from(&b));

        b.inode = InodeInfo::new(2, 1);
        assert!(!a.is_unchanged_from(&b));
    }
}
