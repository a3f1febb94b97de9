//! Child-process runner for `ffprobe` and `ffmpeg`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use vidsift_core::{FrameExtractor, MediaError, MediaInfo, MediaProbe};

use crate::probe::parse_probe_output;

/// stderr fragments ffmpeg prints for files it cannot read as media.
const UNREADABLE_MARKERS: &[&str] = &[
    "Invalid data found when processing input",
    "moov atom not found",
    "No such file or directory",
    "could not find codec parameters",
    "Invalid argument",
    "End of file",
];

/// Locations of the external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Path or name of the `ffmpeg` binary.
    pub ffmpeg: PathBuf,
    /// Path or name of the `ffprobe` binary.
    pub ffprobe: PathBuf,
    /// How often a running child is checked for exit and cancellation.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            poll_interval: Duration::from_millis(10),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Media probe and frame extractor running the ffmpeg tool suite.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    config: FfmpegConfig,
    cancel: CancellationToken,
}

/// Captured result of one finished child process.
struct ToolOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
}

impl FfmpegTool {
    /// Create a tool with its own, never-fired cancellation token.
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Kill in-flight children when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tool configuration.
    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }

    fn probe_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.ffprobe);
        cmd.args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);
        cmd
    }

    fn frame_command(&self, path: &Path, timestamp: f64) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg);
        cmd.args(["-v", "error", "-nostdin", "-ss"])
            .arg(format!("{timestamp:.3}"))
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"]);
        cmd
    }

    /// Run a command to completion, killing it if the token fires.
    fn run(&self, mut cmd: Command, tool: &Path, path: &Path) -> Result<ToolOutput, MediaError> {
        if self.cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let tool_name = tool.display().to_string();
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::ToolMissing {
                    tool: tool_name.clone(),
                },
                _ => MediaError::Io {
                    path: tool.to_path_buf(),
                    source: e,
                },
            })?;

        // Drain both pipes on their own threads so a large frame cannot block the child.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill(&mut child);
                    return Err(MediaError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            }
            if self.cancel.is_cancelled() {
                debug!(tool = %tool_name, path = %path.display(), "Killing cancelled child");
                kill(&mut child);
                return Err(MediaError::Cancelled);
            }
            std::thread::sleep(self.config.poll_interval);
        };

        let stdout = join(stdout);
        let stderr = String::from_utf8_lossy(&join(stderr)).trim().to_string();
        trace!(tool = %tool_name, path = %path.display(), ?status, bytes = stdout.len(), "Child finished");

        Ok(ToolOutput {
            status,
            stdout,
            stderr,
        })
    }

    fn failure(&self, tool: &Path, path: &Path, output: &ToolOutput) -> MediaError {
        let message = if output.stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            output.stderr.clone()
        };

        if UNREADABLE_MARKERS.iter().any(|m| output.stderr.contains(m)) {
            MediaError::Unreadable {
                path: path.to_path_buf(),
                message,
            }
        } else {
            MediaError::ToolFailed {
                tool: tool.display().to_string(),
                path: path.to_path_buf(),
                message,
            }
        }
    }
}

impl MediaProbe for FfmpegTool {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        let tool = &self.config.ffprobe;
        let output = self.run(self.probe_command(path), tool, path)?;
        if !output.status.success() {
            return Err(self.failure(tool, path, &output));
        }
        parse_probe_output(path, &output.stdout)
    }
}

impl FrameExtractor for FfmpegTool {
    fn extract_frame(&self, path: &Path, timestamp: f64) -> Result<Vec<u8>, MediaError> {
        let tool = &self.config.ffmpeg;
        let output = self.run(self.frame_command(path, timestamp), tool, path)?;
        if !output.status.success() {
            return Err(self.failure(tool, path, &output));
        }
        if output.stdout.is_empty() {
            return Err(MediaError::Decode {
                path: path.to_path_buf(),
                timestamp,
                message: "no frame at timestamp".to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
