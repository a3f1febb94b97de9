//! Perceptual fingerprint generation.
//!
//! Fast mode hashes one collage of frames sampled from the middle of the
//! video. Slow mode hashes one frame per second and concatenates the hashes.

use std::path::Path;

use derive_builder::Builder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use vidsift_core::{
    Fingerprint, FingerprintError, FrameExtractor, HashKind, MediaError, Thumbnail,
    VideoDescriptor,
};

/// Configuration for fingerprint generation.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(private, name = "build_unchecked"))]
#[serde(default)]
pub struct FingerprintConfig {
    /// Fingerprinting mode.
    #[builder(default)]
    pub kind: HashKind,

    /// Frames sampled in fast mode.
    #[builder(default = "16")]
    pub frame_count: usize,

    /// Edge length of one collage tile in pixels.
    #[builder(default = "160")]
    pub tile_size: u32,

    /// Fraction of the duration skipped at each end in fast mode.
    #[builder(default = "0.1")]
    pub edge_skip: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            kind: HashKind::Fast,
            frame_count: 16,
            tile_size: 160,
            edge_skip: 0.1,
        }
    }
}

impl FingerprintConfigBuilder {
    /// Build a validated config.
    pub fn build(&self) -> Result<FingerprintConfig, FingerprintConfigBuilderError> {
        let config = self.build_unchecked()?;
        config.validate()?;
        Ok(config)
    }
}

impl FingerprintConfig {
    /// Create a new config builder.
    pub fn builder() -> FingerprintConfigBuilder {
        FingerprintConfigBuilder::default()
    }

    /// Check the values the builder and deserialized files must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_count == 0 {
            return Err("frame_count must be at least 1".to_string());
        }
        if self.tile_size == 0 {
            return Err("tile_size must be at least 1".to_string());
        }
        if !(0.0..0.5).contains(&self.edge_skip) {
            return Err("edge_skip must be in [0, 0.5)".to_string());
        }
        Ok(())
    }

    /// Fast-mode sample positions, evenly spaced over the middle of `duration`.
    pub fn fast_timestamps(&self, duration: f64) -> Vec<f64> {
        let start = duration * self.edge_skip;
        let span = duration - 2.0 * start;
        match self.frame_count {
            1 => vec![start + span / 2.0],
            n => (0..n)
                .map(|i| start + span * i as f64 / (n - 1) as f64)
                .collect(),
        }
    }

    /// Slow-mode sample positions, one per whole second.
    pub fn slow_timestamps(duration: f64) -> Vec<f64> {
        let frames = duration.max(0.0).floor() as usize;
        (0..frames).map(|i| i as f64).collect()
    }
}

/// Result of fingerprinting one video.
#[derive(Debug, Clone)]
pub enum FingerprintOutcome {
    /// A usable fingerprint and its preview frames.
    Generated {
        fingerprint: Fingerprint,
        thumbnails: Vec<Thumbnail>,
    },
    /// Every hashed segment was a featureless sentinel.
    Degenerate { value: String },
}

/// Produces fingerprints for single videos through a frame extractor.
pub struct FingerprintGenerator<E> {
    extractor: E,
    config: FingerprintConfig,
}

impl<E: FrameExtractor> FingerprintGenerator<E> {
    /// Create a generator.
    pub fn new(extractor: E, config: FingerprintConfig) -> Self {
        Self { extractor, config }
    }

    /// Generator configuration.
    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Fingerprint `video`, which must have been probed.
    pub fn generate(
        &self,
        video: &VideoDescriptor,
        cancel: &CancellationToken,
    ) -> Result<FingerprintOutcome, FingerprintError> {
        let duration = video
            .duration()
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| FingerprintError::MissingDuration {
                path: video.path.clone(),
            })?;

        let (value, thumbnails) = match self.config.kind {
            HashKind::Fast => self.fast(&video.path, duration, cancel)?,
            HashKind::Slow => self.slow(&video.path, duration, cancel)?,
        };

        let fingerprint = Fingerprint::new(self.config.kind, value, duration);
        if fingerprint.is_degenerate() {
            debug!(path = %video.path.display(), value = %fingerprint.value, "Degenerate fingerprint");
            return Ok(FingerprintOutcome::Degenerate {
                value: fingerprint.value,
            });
        }

        Ok(FingerprintOutcome::Generated {
            fingerprint,
            thumbnails,
        })
    }

    /// One hash over a square collage of all sampled frames.
    fn fast(
        &self,
        path: &Path,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<Thumbnail>), FingerprintError> {
        let timestamps = self.config.fast_timestamps(duration);
        let tile = self.config.tile_size;
        let grid = (timestamps.len() as f64).sqrt().ceil() as u32;
        let mut collage = RgbImage::new(grid * tile, grid * tile);
        let mut thumbnails = Vec::with_capacity(timestamps.len());

        for (i, &timestamp) in timestamps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FingerprintError::Cancelled);
            }
            let bytes = self.extractor.extract_frame(path, timestamp)?;
            let frame = decode(path, timestamp, &bytes)?
                .resize_exact(tile, tile, FilterType::Triangle)
                .to_rgb8();

            let (col, row) = (i as u32 % grid, i as u32 / grid);
            imageops::replace(
                &mut collage,
                &frame,
                i64::from(col * tile),
                i64::from(row * tile),
            );
            thumbnails.push(Thumbnail::new(timestamp, bytes));
        }

        let hash = perceptual_hasher().hash_image(&DynamicImage::ImageRgb8(collage));
        Ok((hex::encode(hash.as_bytes()), thumbnails))
    }

    /// One hash per second of footage, skipping frames that fail.
    fn slow(
        &self,
        path: &Path,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<Thumbnail>), FingerprintError> {
        let hasher = perceptual_hasher();
        let middle = duration / 2.0;
        let mut value = String::new();
        let mut representative: Option<Thumbnail> = None;

        for timestamp in FingerprintConfig::slow_timestamps(duration) {
            if cancel.is_cancelled() {
                return Err(FingerprintError::Cancelled);
            }
            let bytes = match self.extractor.extract_frame(path, timestamp) {
                Ok(bytes) => bytes,
                Err(MediaError::Cancelled) => return Err(FingerprintError::Cancelled),
                Err(err) => {
                    trace!(path = %path.display(), timestamp, "Skipping frame: {err}");
                    continue;
                }
            };
            let frame = match decode(path, timestamp, &bytes) {
                Ok(frame) => frame,
                Err(err) => {
                    trace!(path = %path.display(), timestamp, "Skipping frame: {err}");
                    continue;
                }
            };

            value.push_str(&hex::encode(hasher.hash_image(&frame).as_bytes()));

            let closer = representative
                .as_ref()
                .is_none_or(|t| (timestamp - middle).abs() < (t.timestamp - middle).abs());
            if closer {
                representative = Some(Thumbnail::new(timestamp, bytes));
            }
        }

        if value.is_empty() {
            return Err(FingerprintError::NoUsableFrames {
                path: path.to_path_buf(),
            });
        }
        Ok((value, representative.into_iter().collect()))
    }
}

/// 64-bit DCT mean hash.
fn perceptual_hasher() -> Hasher {
    HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher()
}

fn decode(path: &Path, timestamp: f64, bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    image::load_from_memory(bytes).map_err(|e| MediaError::Decode {
        path: path.to_path_buf(),
        timestamp,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;
    use image::{ImageFormat, Rgb};
    use vidsift_core::{InodeInfo, MediaInfo, SEGMENT_LEN};

    fn png(pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb(pixel(x, y)));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Serves a checkerboard, a solid frame, or garbage depending on the second.
    struct PatternExtractor {
        calls: AtomicUsize,
        solid: bool,
        broken_seconds: Vec<u64>,
    }

    impl PatternExtractor {
        fn checker() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                solid: false,
                broken_seconds: Vec::new(),
            }
        }
    }

    impl FrameExtractor for PatternExtractor {
        fn extract_frame(&self, _path: &Path, timestamp: f64) -> Result<Vec<u8>, MediaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken_seconds.contains(&(timestamp as u64)) {
                return Ok(b"not an image".to_vec());
            }
            if self.solid {
                return Ok(png(|_, _| [0, 0, 0]));
            }
            let shift = timestamp as u32;
            Ok(png(move |x, y| {
                if ((x + shift) / 8 + y / 8) % 2 == 0 { [255, 255, 255] } else { [0, 0, 0] }
            }))
        }
    }

    fn probed(duration: f64) -> VideoDescriptor {
        let mut v = VideoDescriptor::new("/v/a.mp4", 1, SystemTime::UNIX_EPOCH, InodeInfo::new(1, 1));
        v.media = Some(MediaInfo {
            duration,
            ..MediaInfo::default()
        });
        v
    }

    fn config(kind: HashKind) -> FingerprintConfig {
        FingerprintConfig::builder()
            .kind(kind)
            .frame_count(4usize)
            .tile_size(32u32)
            .build()
            .unwrap()
    }

    #[test]
    fn test_fast_timestamps_skip_edges() {
        let ts = FingerprintConfig::default().fast_timestamps(100.0);
        assert_eq!(ts.len(), 16);
        assert_eq!(ts[0], 10.0);
        assert!((ts[15] - 90.0).abs() < 1e-9);
        assert!(ts.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_slow_timestamps_per_second() {
        assert_eq!(FingerprintConfig::slow_timestamps(3.9), vec![0.0, 1.0, 2.0]);
        assert!(FingerprintConfig::slow_timestamps(0.5).is_empty());
    }

    #[test]
    fn test_builder_validation() {
        assert!(FingerprintConfig::builder().frame_count(0usize).build().is_err());
        assert!(FingerprintConfig::builder().edge_skip(0.5).build().is_err());
        assert!(FingerprintConfig::builder().build().is_ok());
    }

    #[test]
    fn test_fast_mode_hash_and_thumbnails() {
        let generator = FingerprintGenerator::new(PatternExtractor::checker(), config(HashKind::Fast));
        let outcome = generator.generate(&probed(60.0), &CancellationToken::new()).unwrap();

        match outcome {
            FingerprintOutcome::Generated { fingerprint, thumbnails } => {
                assert_eq!(fingerprint.value.len(), SEGMENT_LEN);
                assert_eq!(fingerprint.kind, HashKind::Fast);
                assert_eq!(fingerprint.duration, 60.0);
                assert_eq!(thumbnails.len(), 4);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(generator.extractor.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_slow_mode_skips_bad_frames() {
        let extractor = PatternExtractor {
            broken_seconds: vec![1],
            ..PatternExtractor::checker()
        };
        let generator = FingerprintGenerator::new(extractor, config(HashKind::Slow));
        let outcome = generator.generate(&probed(4.2), &CancellationToken::new()).unwrap();

        match outcome {
            FingerprintOutcome::Generated { fingerprint, thumbnails } => {
                assert_eq!(fingerprint.value.len(), 3 * SEGMENT_LEN);
                assert_eq!(thumbnails.len(), 1);
                assert_eq!(thumbnails[0].timestamp, 2.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_slow_mode_without_frames_fails() {
        let generator = FingerprintGenerator::new(PatternExtractor::checker(), config(HashKind::Slow));
        let err = generator.generate(&probed(0.4), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, FingerprintError::NoUsableFrames { .. }));
    }

    #[test]
    fn test_solid_frames_are_degenerate() {
        for kind in [HashKind::Fast, HashKind::Slow] {
            let extractor = PatternExtractor {
                solid: true,
                ..PatternExtractor::checker()
            };
            let generator = FingerprintGenerator::new(extractor, config(kind));
            let outcome = generator.generate(&probed(3.0), &CancellationToken::new()).unwrap();
            assert!(matches!(outcome, FingerprintOutcome::Degenerate { .. }), "{kind}");
        }
    }

    #[test]
    fn test_fast_mode_fails_on_bad_frame() {
        let extractor = PatternExtractor {
            broken_seconds: (0..100).collect(),
            ..PatternExtractor::checker()
        };
        let generator = FingerprintGenerator::new(extractor, config(HashKind::Fast));
        let err = generator.generate(&probed(10.0), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, FingerprintError::Frame(MediaError::Decode { .. })));
    }

    #[test]
    fn test_missing_duration() {
        let generator = FingerprintGenerator::new(PatternExtractor::checker(), config(HashKind::Fast));
        let video = VideoDescriptor::new("/v/a.mp4", 1, SystemTime::UNIX_EPOCH, InodeInfo::new(1, 1));
        let err = generator.generate(&video, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, FingerprintError::MissingDuration { .. }));
    }

    #[test]
    fn test_cancelled_between_frames() {
        let generator = FingerprintGenerator::new(PatternExtractor::checker(), config(HashKind::Slow));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = generator.generate(&probed(30.0), &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(generator.extractor.calls.load(Ordering::SeqCst), 0);
    }
}
