//! Media transcoding abstraction: one still from a live source, many stills into a video.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapsecam_types::{LapseError, Result};
use tokio::time::{sleep, Duration};
use tracing::info;

mod ffmpeg;

pub use ffmpeg::FfmpegTranscoder;

/// Parameters for assembling stills into a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub fps: u32,
    pub resolution: (u32, u32),
    pub crf: u8,
}

impl EncodeOptions {
    pub fn new(fps: u32, resolution: (u32, u32)) -> Self {
        Self {
            fps,
            resolution,
            crf: 17,
        }
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }
}

/// Aggregated transcoder counters.
#[derive(Debug, Default, Clone)]
pub struct TranscoderMetrics {
    pub captures: u64,
    pub encodes: u64,
    pub failures: u64,
    pub last_capture_ms: Option<u64>,
    pub last_encode_ms: Option<u64>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Fetch the live source and return a single JPEG still.
    async fn capture_still(&self, source: &str) -> Result<Vec<u8>>;
    /// Encode `frames`, in the given order, into a video at `output`.
    async fn encode_video(
        &self,
        frames: &[PathBuf],
        options: &EncodeOptions,
        output: &Path,
    ) -> Result<()>;
    fn metrics(&self) -> TranscoderMetrics;
}

/// One recorded `encode_video` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeCall {
    pub frames: Vec<PathBuf>,
    pub options: EncodeOptions,
    pub output: PathBuf,
}

#[derive(Debug, Default)]
struct MockState {
    metrics: TranscoderMetrics,
    fail_captures: bool,
    fail_encodes: bool,
    encodes: Vec<EncodeCall>,
}

/// In-process transcoder used for tests and dry runs.
///
/// Captures return `JPEG_MAGIC` followed by a capture counter, so successive stills differ.
/// Encodes write a small text "video" listing the input file names and the frame rate.
#[derive(Clone, Default)]
pub struct MockTranscoder {
    capture_delay: Duration,
    state: Arc<Mutex<MockState>>,
}

pub const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

impl MockTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn set_fail_captures(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_captures = fail;
        }
    }

    pub fn set_fail_encodes(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_encodes = fail;
        }
    }

    pub fn capture_count(&self) -> u64 {
        self.metrics().captures
    }

    pub fn encode_calls(&self) -> Vec<EncodeCall> {
        self.state
            .lock()
            .map(|s| s.encodes.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| transcoder_error("failed to lock mock state"))
    }

    /// Rendered body of a mock video, so tests can compare artifacts.
    pub fn render(frames: &[PathBuf], options: &EncodeOptions) -> String {
        let mut body = format!("fps={}\n", options.fps);
        for frame in frames {
            let name = frame
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            body.push_str(&name);
            body.push('\n');
        }
        body
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn capture_still(&self, source: &str) -> Result<Vec<u8>> {
        info!("Mock capture from {}", source);
        let start = Instant::now();
        if !self.capture_delay.is_zero() {
            sleep(self.capture_delay).await;
        }
        let mut state = self.lock()?;
        if state.fail_captures {
            state.metrics.failures += 1;
            return Err(transcoder_error(format!("mock capture failed for {source}")));
        }
        state.metrics.captures += 1;
        state.metrics.last_capture_ms = Some(start.elapsed().as_millis() as u64);
        state.metrics.last_success_at = Some(Utc::now());
        let mut still = JPEG_MAGIC.to_vec();
        still.extend_from_slice(&state.metrics.captures.to_be_bytes());
        Ok(still)
    }

    async fn encode_video(
        &self,
        frames: &[PathBuf],
        options: &EncodeOptions,
        output: &Path,
    ) -> Result<()> {
        info!("Mock encode of {} frames at {} fps", frames.len(), options.fps);
        let start = Instant::now();
        {
            let mut state = self.lock()?;
            if state.fail_encodes || frames.is_empty() {
                state.metrics.failures += 1;
                ensure_frames_present(frames)?;
                return Err(transcoder_error("mock encode failed"));
            }
        }
        tokio::fs::write(output, Self::render(frames, options))
            .await
            .map_err(|err| transcoder_error(format!("mock encode write failed: {err}")))?;
        let mut state = self.lock()?;
        state.metrics.encodes += 1;
        state.metrics.last_encode_ms = Some(start.elapsed().as_millis() as u64);
        state.metrics.last_success_at = Some(Utc::now());
        state.encodes.push(EncodeCall {
            frames: frames.to_vec(),
            options: *options,
            output: output.to_path_buf(),
        });
        Ok(())
    }

    fn metrics(&self) -> TranscoderMetrics {
        self.state
            .lock()
            .map(|s| s.metrics.clone())
            .unwrap_or_default()
    }
}

/// Generate an error aligned with transcoder semantics.
pub fn transcoder_error(message: impl Into<String>) -> LapseError {
    LapseError::SourceUnavailable(message.into())
}

/// Encoding needs at least one input still.
pub fn ensure_frames_present(frames: &[PathBuf]) -> Result<()> {
    if frames.is_empty() {
        Err(transcoder_error("no input frames to encode"))
    } else {
        Ok(())
    }
}

/// Reject captures that did not decode into a JPEG still.
pub fn ensure_jpeg(bytes: &[u8]) -> Result<()> {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => Ok(()),
        Ok(other) => Err(transcoder_error(format!(
            "capture produced {other:?} instead of JPEG"
        ))),
        Err(err) => Err(transcoder_error(format!(
            "capture produced unrecognised data ({} bytes): {err}",
            bytes.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_stills_differ_and_are_jpeg() {
        let mock = MockTranscoder::new();
        let a = mock.capture_still("cam").await.expect("first");
        let b = mock.capture_still("cam").await.expect("second");
        assert_ne!(a, b);
        ensure_jpeg(&a).expect("jpeg magic");
        assert_eq!(mock.capture_count(), 2);
    }

    #[tokio::test]
    async fn mock_capture_failure_is_source_unavailable() {
        let mock = MockTranscoder::new();
        mock.set_fail_captures(true);
        let err = mock.capture_still("cam").await.unwrap_err();
        assert!(matches!(err, LapseError::SourceUnavailable(_)));
        assert_eq!(mock.metrics().failures, 1);
    }

    #[tokio::test]
    async fn mock_encode_rejects_empty_input() {
        let mock = MockTranscoder::new();
        let output = std::env::temp_dir().join("lapsecam-mock-empty.mp4");
        let err = mock
            .encode_video(&[], &EncodeOptions::new(10, (1920, 1080)), &output)
            .await
            .unwrap_err();
        assert!(matches!(err, LapseError::SourceUnavailable(_)));
        assert!(mock.encode_calls().is_empty());
    }

    #[test]
    fn ensure_jpeg_rejects_png() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert!(ensure_jpeg(&png).is_err());
        assert!(ensure_jpeg(b"").is_err());
    }

    #[test]
    fn render_lists_inputs_in_order() {
        let frames = vec![PathBuf::from("/a/1.jpg"), PathBuf::from("/a/2.jpg")];
        let body = MockTranscoder::render(&frames, &EncodeOptions::new(2, (1, 1)));
        assert_eq!(body, "fps=2\n1.jpg\n2.jpg\n");
    }
}
