//! Error types shared across the vidsift crates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation was interrupted.
    #[error("Operation interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Symbolic link target does not exist.
    BrokenSymlink,
    /// Error reading file/directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
}

/// Non-fatal warning encountered during scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a broken symlink warning.
    pub fn broken_symlink(path: impl Into<PathBuf>, target: &str) -> Self {
        let path = path.into();
        Self {
            message: format!("Broken symlink: {} -> {target}", path.display()),
            path,
            kind: WarningKind::BrokenSymlink,
        }
    }

    /// Create a warning from an I/O error, keeping permission problems distinct.
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::PermissionDenied => WarningKind::PermissionDenied,
            _ => WarningKind::ReadError,
        };
        Self::new(path, error.to_string(), kind)
    }
}

/// Errors raised by the frame extraction and metadata probe collaborators.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The file is corrupt or cannot be read as media.
    #[error("Unreadable media file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// The external tool is not installed.
    #[error("{tool} not found, is it installed and on PATH?")]
    ToolMissing { tool: String },

    /// The external tool failed for another reason.
    #[error("{tool} failed for {path}: {message}")]
    ToolFailed {
        tool: String,
        path: PathBuf,
        message: String,
    },

    /// Extracted bytes could not be decoded as an image.
    #[error("Could not decode frame of {path} at {timestamp:.2}s: {message}")]
    Decode {
        path: PathBuf,
        timestamp: f64,
        message: String,
    },

    /// The call was cancelled while in flight.
    #[error("Media operation cancelled")]
    Cancelled,

    /// I/O error talking to the external tool.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MediaError {
    /// Check if the error means the file itself is unusable.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable { .. } | Self::Decode { .. })
    }
}

/// Errors raised by a video store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is contended; the operation may succeed if retried.
    #[error("Store busy: {message}")]
    Busy { message: String },

    /// The store could not be opened or reached.
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// A statement failed.
    #[error("Store query failed: {message}")]
    Query { message: String },

    /// A stored row could not be mapped back into a model.
    #[error("Corrupt store row: {message}")]
    CorruptRow { message: String },
}

impl StoreError {
    /// Check if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Errors comparing two fingerprint hash strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompareError {
    /// Hash strings of different lengths are never comparable.
    #[error("Hash length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

/// Errors producing one fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The video was never probed, or reported no usable duration.
    #[error("No duration known for {path}")]
    MissingDuration { path: PathBuf },

    /// A frame could not be extracted.
    #[error(transparent)]
    Frame(#[from] MediaError),

    /// A frame could not be decoded or composed.
    #[error("Image error for {path}: {message}")]
    Image { path: PathBuf, message: String },

    /// Slow mode produced no hash at all.
    #[error("No usable frames in {path}")]
    NoUsableFrames { path: PathBuf },

    /// Cancelled between frames.
    #[error("Fingerprinting cancelled")]
    Cancelled,
}

impl FingerprintError {
    /// Check if the error came from cancellation rather than the file.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Frame(MediaError::Cancelled))
    }
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The store could not be read at startup.
    #[error("Store unreachable: {source}")]
    StoreUnreachable {
        #[source]
        source: StoreError,
    },

    /// Discovery found nothing to work on.
    #[error("No video files found under {}", join_paths(.roots))]
    NoInput { roots: Vec<PathBuf> },

    /// Discovery failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// A store call outside the batched writer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The run was cancelled.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// A background task panicked or was aborted.
    #[error("Background task failed: {message}")]
    Task { message: String },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
