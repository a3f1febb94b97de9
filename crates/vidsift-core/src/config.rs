//! Scan configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// File extensions treated as video by default.
pub const DEFAULT_VIDEO_EXTENSIONS: [&str; 12] = [
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "3gp",
];

/// Configuration for discovering and probing video files.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Root paths to scan.
    pub roots: Vec<PathBuf>,

    /// Follow symbolic links.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Cross filesystem boundaries.
    #[builder(default = "false")]
    #[serde(default)]
    pub cross_filesystems: bool,

    /// Maximum depth to traverse (None = unlimited).
    #[builder(default)]
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Glob patterns to ignore, matched against file and directory names.
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Number of threads for walking (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Include hidden files (starting with .).
    #[builder(default = "false")]
    #[serde(default)]
    pub include_hidden: bool,

    /// Lowercase extensions accepted as video.
    #[builder(default = "default_extensions()")]
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Number of concurrent metadata probes.
    #[builder(default = "default_probe_threads()")]
    #[serde(default = "default_probe_threads")]
    pub probe_threads: usize,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_probe_threads() -> usize {
    4
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.roots {
            Some(ref roots) if roots.is_empty() => {
                return Err("At least one root path is required".to_string());
            }
            Some(ref roots) if roots.iter().any(|r| r.as_os_str().is_empty()) => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root paths are required".to_string()),
            _ => {}
        }
        if self.probe_threads == Some(0) {
            return Err("probe_threads must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning a single path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
            follow_symlinks: false,
            cross_filesystems: false,
            max_depth: None,
            ignore_patterns: Vec::new(),
            threads: 0,
            include_hidden: false,
            extensions: default_extensions(),
            probe_threads: default_probe_threads(),
        }
    }

    /// Check if a path carries one of the accepted video extensions.
    pub fn is_video(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }

    /// Check if hidden files should be skipped.
    pub fn should_skip_hidden(&self, name: &str) -> bool {
        !self.include_hidden && name.starts_with('.')
    }

    /// Roots with duplicates and nested roots removed, sorted.
    ///
    /// A root inside another root is dropped so no file is walked twice.
    pub fn non_overlapping_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.roots.clone();
        roots.sort();
        roots.dedup();

        let mut kept: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            // Sorted order puts every ancestor before its descendants.
            if kept.iter().any(|k| root.starts_with(k)) {
                continue;
            }
            kept.push(root);
        }
        kept
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
