use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chrono::Utc;
use lapsecam_types::{storage_error, Result};
use tempfile::TempDir;
use tokio::{fs, process::Command, time::Duration};

use crate::{
    ensure_frames_present, ensure_jpeg, transcoder_error, EncodeOptions, Transcoder,
    TranscoderMetrics,
};

const DEFAULT_FFMPEG: &str = "ffmpeg";
const STAGED_PATTERN: &str = "frame_%06d.jpg";

/// Transcoder that shells out to the `ffmpeg` binary.
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    capture_timeout: Option<Duration>,
    encode_timeout: Option<Duration>,
    metrics: Arc<Mutex<TranscoderMetrics>>,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: Option<&str>) -> Self {
        let ffmpeg_path = ffmpeg_path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));

        Self {
            ffmpeg_path,
            capture_timeout: None,
            encode_timeout: None,
            metrics: Arc::new(Mutex::new(TranscoderMetrics::default())),
        }
    }

    pub fn with_timeouts(mut self, capture: Option<Duration>, encode: Option<Duration>) -> Self {
        self.capture_timeout = capture;
        self.encode_timeout = encode;
        self
    }

    async fn run_ffmpeg(&self, args: &[String], timeout: Option<Duration>) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg_path);
        command.args(args).kill_on_drop(true);
        let pending = command.output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                transcoder_error(format!("ffmpeg timed out after {}s", limit.as_secs()))
            })?,
            None => pending.await,
        }
        .map_err(|err| {
            transcoder_error(format!(
                "failed to run ffmpeg ({:?}): {}",
                args.join(" "),
                err
            ))
        })?;

        if output.status.success() {
            if !output.stderr.is_empty() {
                tracing::debug!(
                    "ffmpeg output: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(())
        } else {
            Err(transcoder_error(format!(
                "ffmpeg exited with {} ({:?}): {}",
                output.status,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn record(&self, start: Instant, encode: bool) {
        if let Ok(mut guard) = self.metrics.lock() {
            let elapsed = Some(start.elapsed().as_millis() as u64);
            if encode {
                guard.encodes += 1;
                guard.last_encode_ms = elapsed;
            } else {
                guard.captures += 1;
                guard.last_capture_ms = elapsed;
            }
            guard.last_success_at = Some(Utc::now());
        }
    }

    fn record_failure(&self) {
        if let Ok(mut guard) = self.metrics.lock() {
            guard.failures += 1;
        }
    }

    async fn capture_inner(&self, source: &str, scratch: &TempDir) -> Result<Vec<u8>> {
        let still = scratch.path().join("frame.jpg");
        let args = capture_args(source, &still);
        self.run_ffmpeg(&args, self.capture_timeout).await?;

        let bytes = fs::read(&still)
            .await
            .map_err(|err| transcoder_error(format!("failed to read captured still: {err}")))?;
        ensure_jpeg(&bytes)?;
        Ok(bytes)
    }

    async fn encode_inner(
        &self,
        frames: &[PathBuf],
        options: &EncodeOptions,
        output: &Path,
        scratch: &TempDir,
    ) -> Result<()> {
        stage_frames(frames, scratch.path()).await?;
        let args = encode_args(&scratch.path().join(STAGED_PATTERN), options, output);
        self.run_ffmpeg(&args, self.encode_timeout).await
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn capture_still(&self, source: &str) -> Result<Vec<u8>> {
        let start = Instant::now();
        let scratch = scratch_dir("lapsecam-capture")?;
        match self.capture_inner(source, &scratch).await {
            Ok(bytes) => {
                self.record(start, false);
                Ok(bytes)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    async fn encode_video(
        &self,
        frames: &[PathBuf],
        options: &EncodeOptions,
        output: &Path,
    ) -> Result<()> {
        ensure_frames_present(frames)?;
        let start = Instant::now();
        let scratch = scratch_dir("lapsecam-encode")?;
        tracing::info!(
            "Encoding {} frames at {} fps into {}",
            frames.len(),
            options.fps,
            output.display()
        );
        match self.encode_inner(frames, options, output, &scratch).await {
            Ok(()) => {
                self.record(start, true);
                Ok(())
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn metrics(&self) -> TranscoderMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

fn capture_args(source: &str, still: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-ss".into(),
        "00:00".into(),
        "-i".into(),
        source.into(),
        "-vframes".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        "-update".into(),
        "1".into(),
        still.display().to_string(),
    ]
}

fn encode_args(pattern: &Path, options: &EncodeOptions, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-framerate".into(),
        options.fps.to_string(),
        "-i".into(),
        pattern.display().to_string(),
        "-s:v".into(),
        format!("{}x{}", options.resolution.0, options.resolution.1),
        "-c:v".into(),
        "libx264".into(),
        "-crf".into(),
        options.crf.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output.display().to_string(),
    ]
}

fn scratch_dir(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|err| storage_error(format!("create {prefix} scratch dir"), err))
}

/// Link (or copy, across filesystems) the inputs into `dir` as a numbered sequence
/// so ffmpeg reads them in exactly the given order.
async fn stage_frames(frames: &[PathBuf], dir: &Path) -> Result<()> {
    for (idx, frame) in frames.iter().enumerate() {
        let staged = dir.join(format!("frame_{:06}.jpg", idx + 1));
        if fs::hard_link(frame, &staged).await.is_err() {
            fs::copy(frame, &staged).await.map_err(|err| {
                transcoder_error(format!("failed to stage {}: {err}", frame.display()))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_args_carry_rate_and_resolution() {
        let options = EncodeOptions::new(2, (1920, 1080));
        let args = encode_args(Path::new("/tmp/x/frame_%06d.jpg"), &options, Path::new("/tmp/o.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-framerate 2 -i /tmp/x/frame_%06d.jpg"));
        assert!(joined.contains("-s:v 1920x1080"));
        assert!(joined.contains("-crf 17"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/o.mp4"));
    }

    #[test]
    fn capture_args_extract_one_frame() {
        let args = capture_args("http://cam/frame.mp4", Path::new("/tmp/s/frame.jpg"));
        let joined = args.join(" ");
        assert!(joined.contains("-i http://cam/frame.mp4 -vframes 1"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/s/frame.jpg"));
    }

    #[tokio::test]
    async fn staging_numbers_frames_in_order() {
        let source = tempfile::tempdir().expect("src");
        let target = tempfile::tempdir().expect("dst");
        let frames: Vec<PathBuf> = ["b.jpg", "a.jpg"]
            .iter()
            .map(|name| {
                let path = source.path().join(name);
                std::fs::write(&path, name.as_bytes()).expect("write");
                path
            })
            .collect();

        stage_frames(&frames, target.path()).await.expect("stage");
        let staged = |name: &str| std::fs::read(target.path().join(name)).expect("staged");
        assert_eq!(staged("frame_000001.jpg"), b"b.jpg");
        assert_eq!(staged("frame_000002.jpg"), b"a.jpg");
    }

    #[tokio::test]
    async fn staging_missing_input_is_transcoder_error() {
        let target = tempfile::tempdir().expect("dst");
        let err = stage_frames(&[target.path().join("gone.jpg")], target.path())
            .await
            .unwrap_err();
        assert!(matches!(err, lapsecam_types::LapseError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_source_unavailable() {
        let transcoder = FfmpegTranscoder::new(Some("/nonexistent/ffmpeg-binary"));
        let err = transcoder.capture_still("http://cam").await.unwrap_err();
        assert!(matches!(err, lapsecam_types::LapseError::SourceUnavailable(_)));
        assert_eq!(transcoder.metrics().failures, 1);
    }

    #[tokio::test]
    async fn empty_encode_fails_before_spawning() {
        let transcoder = FfmpegTranscoder::new(Some("/nonexistent/ffmpeg-binary"));
        let err = transcoder
            .encode_video(&[], &EncodeOptions::new(10, (1920, 1080)), Path::new("/tmp/x.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no input frames"));
    }
}
