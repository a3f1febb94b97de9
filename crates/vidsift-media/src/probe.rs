//! Parsing of `ffprobe -print_format json` output.

use std::path::Path;

use compact_str::CompactString;
use serde::Deserialize;

use vidsift_core::{MediaError, MediaInfo};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

/// Build `MediaInfo` from ffprobe's JSON report.
///
/// ffprobe prints numbers as strings. A report without a video stream or
/// without any duration describes an unusable file.
pub fn parse_probe_output(path: &Path, json: &[u8]) -> Result<MediaInfo, MediaError> {
    let unreadable = |message: String| MediaError::Unreadable {
        path: path.to_path_buf(),
        message,
    };

    let output: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| unreadable(format!("malformed ffprobe output: {e}")))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| unreadable("no video stream".to_string()))?;
    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| parse_number::<f64>(f.duration.as_deref()))
        .or_else(|| parse_number::<f64>(video.duration.as_deref()))
        .ok_or_else(|| unreadable("no duration reported".to_string()))?;

    let bitrate = format
        .and_then(|f| parse_number::<u64>(f.bit_rate.as_deref()))
        .or_else(|| parse_number::<u64>(video.bit_rate.as_deref()))
        .unwrap_or(0);

    Ok(MediaInfo {
        duration,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        video_codec: video
            .codec_name
            .as_deref()
            .map(CompactString::new)
            .unwrap_or_default(),
        audio_codec: audio
            .and_then(|a| a.codec_name.as_deref())
            .map(CompactString::new),
        bitrate,
        size: format
            .and_then(|f| parse_number::<u64>(f.size.as_deref()))
            .unwrap_or(0),
    })
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 1920, "height": 1080, "duration": "61.400000"},
            {"index": 1, "codec_name": "aac", "codec_type": "audio", "duration": "61.393000"}
        ],
        "format": {"filename": "clip.mp4", "duration": "61.440000", "size": "10485760", "bit_rate": "1365333"}
    }"#;

    #[test]
    fn test_parse_full_report() {
        let info = parse_probe_output(Path::new("clip.mp4"), SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.duration, 61.44);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.bitrate, 1_365_333);
        assert_eq!(info.size, 10_485_760);
    }

    #[test]
    fn test_stream_duration_fallback() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "vp9", "duration": "12.5"}], "format": {}}"#;
        let info = parse_probe_output(Path::new("a.webm"), json.as_bytes()).unwrap();
        assert_eq!(info.duration, 12.5);
        assert!(info.audio_codec.is_none());
    }

    #[test]
    fn test_audio_only_is_unreadable() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}], "format": {"duration": "3.0"}}"#;
        let err = parse_probe_output(Path::new("a.mp4"), json.as_bytes()).unwrap_err();
        assert!(err.is_unreadable());
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let err = parse_probe_output(Path::new("a.mp4"), b"not json").unwrap_err();
        assert!(err.is_unreadable());
    }
}
