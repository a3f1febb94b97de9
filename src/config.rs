//! Application configuration loaded from TOML.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};

use vidsift_analyze::{ClusterConfig, FingerprintConfig};
use vidsift_core::{DEFAULT_VIDEO_EXTENSIONS, ScanConfig};
use vidsift_media::FfmpegConfig;
use vidsift_pipeline::OrchestratorConfig;

/// Everything the binary can be configured with.
///
/// Every section is optional in the file; missing keys keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file.
    pub database: PathBuf,
    pub scan: ScanSettings,
    pub fingerprint: FingerprintConfig,
    pub orchestrator: OrchestratorConfig,
    pub cluster: ClusterConfig,
    pub ffmpeg: FfmpegConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vidsift");

        Self {
            database: data_dir.join("vidsift.db"),
            scan: ScanSettings::default(),
            fingerprint: FingerprintConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            cluster: ClusterConfig::default(),
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

/// Scan options that do not depend on the roots given on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub follow_symlinks: bool,
    pub cross_filesystems: bool,
    pub include_hidden: bool,
    pub max_depth: Option<u32>,
    pub ignore_patterns: Vec<String>,
    pub extensions: Vec<String>,
    pub threads: usize,
    pub probe_threads: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let defaults = ScanConfig::new(".");
        Self {
            follow_symlinks: defaults.follow_symlinks,
            cross_filesystems: defaults.cross_filesystems,
            include_hidden: defaults.include_hidden,
            max_depth: defaults.max_depth,
            ignore_patterns: defaults.ignore_patterns,
            extensions: DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            threads: defaults.threads,
            probe_threads: defaults.probe_threads,
        }
    }
}

impl ScanSettings {
    /// Build a validated scan config for `roots`.
    pub fn to_scan_config(&self, roots: Vec<PathBuf>) -> Result<ScanConfig> {
        ScanConfig::builder()
            .roots(roots)
            .follow_symlinks(self.follow_symlinks)
            .cross_filesystems(self.cross_filesystems)
            .include_hidden(self.include_hidden)
            .max_depth(self.max_depth)
            .ignore_patterns(self.ignore_patterns.clone())
            .extensions(self.extensions.clone())
            .threads(self.threads)
            .probe_threads(self.probe_threads)
            .build()
            .wrap_err("Invalid scan configuration")
    }
}

impl AppConfig {
    /// `<config_dir>/vidsift/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vidsift").join("config.toml"))
    }

    /// Load `explicit`, or the default file when it exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the same checks the config builders apply.
    pub fn validate(&self) -> Result<()> {
        self.scan
            .to_scan_config(vec![PathBuf::from(".")])
            .wrap_err("[scan]")?;
        self.fingerprint
            .validate()
            .map_err(|e| eyre!("[fingerprint] {e}"))?;
        self.orchestrator
            .validate()
            .map_err(|e| eyre!("[orchestrator] {e}"))?;
        self.cluster
            .validate()
            .map_err(|e| eyre!("[cluster] {e}"))?;
        if self.ffmpeg.poll_interval.is_zero() {
            bail!("[ffmpeg] poll_interval must be positive");
        }
        Ok(())
    }
}
