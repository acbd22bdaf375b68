//! Frame archival and time-lapse assembly.
//!
//! Lock scope (the archive lock, independent of the frame cache's):
//! - `archive_current_frame`: frame fetched first with no archive lock held, then
//!   exclusive for the file write.
//! - frame selection: shared for the directory scan.
//! - encode: no lock; the selected entries are never rewritten.
//! - publish: no lock while the new artifact is copied next to the published one,
//!   exclusive only for the rename over the published name.
//! - `open_lapse`: shared, held by the returned [`LapseReader`] until it is dropped.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Timelike, Utc};
use lapsecam_camera::FrameCache;
use lapsecam_transcoder::{EncodeOptions, Transcoder};
use lapsecam_types::{
    clock::Clock,
    config::ArchiveConfig,
    lapse::{complete_artifact_name, date_artifact_name, FrameSelector, JobOutcome, LapseRange},
    storage_error, LapseError, Result,
};
use tempfile::TempDir;
use tokio::{fs, sync::RwLock};
use tracing::{debug, info};

mod reader;

pub use reader::LapseReader;

/// Prefix of artifacts still being installed; hidden from listings.
const PENDING_PREFIX: &str = ".pending-";

/// Archival runs when `start <= hour <= end`. With the defaults (7, 18) a call at
/// 18:45 still archives and 19:00 does not.
pub fn within_archive_window(hour: u32, start: u32, end: u32) -> bool {
    !(hour < start || hour > end)
}

/// The intra-day lapse stops rebuilding at `cutoff` so it cannot race the daily
/// complete rebuild.
pub fn latest_lapse_allowed(hour: u32, cutoff: u32) -> bool {
    hour < cutoff
}

pub struct ArchivePipeline {
    cache: Arc<FrameCache>,
    transcoder: Arc<dyn Transcoder>,
    clock: Arc<dyn Clock>,
    config: ArchiveConfig,
    frames_dir: PathBuf,
    lapse_dir: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl ArchivePipeline {
    /// Build the pipeline, creating the archive and publish directories if needed.
    pub fn new(
        config: ArchiveConfig,
        cache: Arc<FrameCache>,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let frames_dir = PathBuf::from(&config.frames_dir);
        let lapse_dir = PathBuf::from(&config.lapse_dir);
        for dir in [&frames_dir, &lapse_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|err| storage_error(format!("create {}", dir.display()), err))?;
        }

        Ok(Self {
            cache,
            transcoder,
            clock,
            config,
            frames_dir,
            lapse_dir,
            lock: Arc::new(RwLock::new(())),
        })
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn lapse_dir(&self) -> &Path {
        &self.lapse_dir
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    /// Persist the current frame as a new archive entry, inside the active window only.
    pub async fn archive_current_frame(&self) -> Result<JobOutcome> {
        let hour = self.clock.now().hour();
        if !within_archive_window(
            hour,
            self.config.active_start_hour,
            self.config.active_end_hour,
        ) {
            info!("Skipping frame archival at hour {hour}");
            return Ok(JobOutcome::skipped(format!(
                "hour {hour} outside {}..={}",
                self.config.active_start_hour, self.config.active_end_hour
            )));
        }

        let frame = self.cache.get_frame().await?;
        let path = self.frames_dir.join(frame.archive_name());

        let _guard = self.lock.write().await;
        fs::write(&path, frame.payload())
            .await
            .map_err(|err| storage_error(format!("write {}", path.display()), err))?;
        info!("Archived frame {}", path.display());
        Ok(JobOutcome::completed(path.display().to_string()))
    }

    /// Rebuild today's intra-day lapse at the preview frame rate.
    pub async fn update_latest_lapse(&self) -> Result<JobOutcome> {
        let now = self.clock.now();
        let hour = now.hour();
        if !latest_lapse_allowed(hour, self.config.latest_cutoff_hour) {
            info!("Skipping latest lapse update at hour {hour}");
            return Ok(JobOutcome::skipped(format!(
                "hour {hour} at or after {}",
                self.config.latest_cutoff_hour
            )));
        }

        let today = now.date_naive();
        let frames = self.select_frames(FrameSelector::DatePrefix(today)).await?;
        if frames.is_empty() {
            return Err(LapseError::NotFound(format!("no frames for date {today}")));
        }

        let name = date_artifact_name(today);
        let published = self
            .build_and_publish(&frames, &name, self.config.preview_fps)
            .await?;
        Ok(JobOutcome::completed(published.display().to_string()))
    }

    /// Rebuild the lapse over every archived frame. An empty archive surfaces as the
    /// transcoder's error.
    pub async fn update_complete_lapse(&self) -> Result<JobOutcome> {
        let published = self
            .rebuild_lapse(
                FrameSelector::All,
                &complete_artifact_name(),
                self.config.complete_fps,
            )
            .await?;
        Ok(JobOutcome::completed(published.display().to_string()))
    }

    /// Encode the entries matching `selector` into `output_name` and publish it.
    pub async fn rebuild_lapse(
        &self,
        selector: FrameSelector,
        output_name: &str,
        fps: u32,
    ) -> Result<PathBuf> {
        let frames = self.select_frames(selector).await?;
        self.build_and_publish(&frames, output_name, fps).await
    }

    /// Archive entries matching `selector`, sorted by file name (capture time).
    pub async fn select_frames(&self, selector: FrameSelector) -> Result<Vec<PathBuf>> {
        let _guard = self.lock.read().await;
        let mut entries = fs::read_dir(&self.frames_dir)
            .await
            .map_err(|err| storage_error(format!("read {}", self.frames_dir.display()), err))?;

        let mut frames = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| storage_error(format!("read {}", self.frames_dir.display()), err))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !selector.matches(name) {
                continue;
            }
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                frames.push(entry.path());
            }
        }
        frames.sort();
        debug!("Selected {} frames for {selector}", frames.len());
        Ok(frames)
    }

    /// Names of the published lapse artifacts, sorted.
    pub async fn published_lapses(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().await;
        let mut entries = fs::read_dir(&self.lapse_dir)
            .await
            .map_err(|err| storage_error(format!("read {}", self.lapse_dir.display()), err))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| storage_error(format!("read {}", self.lapse_dir.display()), err))?
        {
            match entry.file_name().to_str() {
                Some(name) if !name.starts_with('.') => names.push(name.to_string()),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    /// Parse a boundary range key and open the matching artifact.
    pub async fn open_lapse_key(&self, raw: &str) -> Result<LapseReader> {
        let range = LapseRange::parse(raw)?;
        self.open_lapse(range).await
    }

    /// Open a published artifact for reading under the shared lock.
    pub async fn open_lapse(&self, range: LapseRange) -> Result<LapseReader> {
        let name = range.artifact_name(self.today());
        let path = self.lapse_dir.join(&name);

        let guard = Arc::clone(&self.lock).read_owned().await;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(LapseError::NotFound(format!("no data for {name}")));
            }
            Err(err) => return Err(storage_error(format!("open {}", path.display()), err)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|err| storage_error(format!("stat {}", path.display()), err))?
            .len();
        Ok(LapseReader::new(file, len, name, guard))
    }

    fn today(&self) -> chrono::NaiveDate {
        let now: DateTime<Utc> = self.clock.now();
        now.date_naive()
    }

    fn scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("lapsecam-lapse");
        let dir = match &self.config.scratch_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|err| storage_error("create lapse scratch dir", err))
    }

    async fn build_and_publish(
        &self,
        frames: &[PathBuf],
        output_name: &str,
        fps: u32,
    ) -> Result<PathBuf> {
        let scratch = self.scratch()?;
        let staged = scratch.path().join(output_name);
        let options =
            EncodeOptions::new(fps, self.config.resolution).with_crf(self.config.crf);

        self.transcoder
            .encode_video(frames, &options, &staged)
            .await?;
        self.publish(&staged, output_name).await
    }

    /// Replace `<lapse_dir>/<output_name>` with `staged`.
    ///
    /// The bytes are copied into a pending file inside `lapse_dir` first, so the
    /// exclusive section is a same-directory rename. Any failure drops the pending
    /// file and leaves the published artifact untouched.
    async fn publish(&self, staged: &Path, output_name: &str) -> Result<PathBuf> {
        let dest = self.lapse_dir.join(output_name);
        let pending = tempfile::Builder::new()
            .prefix(PENDING_PREFIX)
            .tempfile_in(&self.lapse_dir)
            .map_err(|err| storage_error(format!("create {PENDING_PREFIX}{output_name}"), err))?;

        fs::copy(staged, pending.path())
            .await
            .map_err(|err| storage_error(format!("stage {}", staged.display()), err))?;
        let permissions = fs::metadata(staged)
            .await
            .map_err(|err| storage_error(format!("stat {}", staged.display()), err))?
            .permissions();
        fs::set_permissions(pending.path(), permissions)
            .await
            .map_err(|err| storage_error(format!("chmod {}", pending.path().display()), err))?;

        let _guard = self.lock.write().await;
        pending
            .persist(&dest)
            .map_err(|err| storage_error(format!("install {}", dest.display()), err))?;

        info!("Published lapse {}", dest.display());
        Ok(dest)
    }
}
