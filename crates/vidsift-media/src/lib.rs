//! Media collaborators for vidsift backed by the `ffprobe` and `ffmpeg` tools.
//!
//! [`FfmpegTool`] implements both [`MediaProbe`] and [`FrameExtractor`] by
//! running the external binaries as child processes. Children are polled and
//! killed as soon as the attached cancellation token fires.

mod ffmpeg;
mod probe;

pub use ffmpeg::{FfmpegConfig, FfmpegTool};
pub use probe::parse_probe_output;

pub use vidsift_core::{FrameExtractor, MediaError, MediaInfo, MediaProbe};
