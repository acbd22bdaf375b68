//! Bounded-staleness cache over the live camera still.
//!
//! Lock scope: `current` is taken shared to read/clone the cached frame and exclusive
//! only to install a finished capture. `refresh_gate` serialises refreshers so a burst
//! of callers that all see a stale frame triggers one capture. Neither lock is held
//! while any other component's lock is taken.

use std::sync::Arc;

use chrono::Duration;
use lapsecam_transcoder::Transcoder;
use lapsecam_types::{
    clock::Clock,
    config::CameraConfig,
    frame::{Frame, FrameInfo},
    Result,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_TTL_SECS: i64 = 60;

pub struct FrameCache {
    source: String,
    ttl: Duration,
    transcoder: Arc<dyn Transcoder>,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Frame>>,
    refresh_gate: Mutex<()>,
}

impl FrameCache {
    pub fn new(
        source: impl Into<String>,
        ttl: Duration,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source: source.into(),
            ttl,
            transcoder,
            clock,
            current: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &CameraConfig,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = i64::try_from(config.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_TTL_SECS));
        Self::new(
            config.source_url.clone(),
            ttl,
            transcoder,
            clock,
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current frame, refreshed first if absent or older than the TTL.
    ///
    /// The returned frame owns its payload; nothing done to it reaches the cache.
    pub async fn get_frame(&self) -> Result<Frame> {
        if let Some(frame) = self.fresh_copy().await {
            return Ok(frame);
        }

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while we waited on the gate.
        if let Some(frame) = self.fresh_copy().await {
            debug!("Frame refreshed by a concurrent caller");
            return Ok(frame);
        }
        self.refresh().await
    }

    /// Metadata of the cached frame without triggering a refresh.
    pub async fn cached(&self) -> Option<FrameInfo> {
        self.current.read().await.as_ref().map(Frame::info)
    }

    async fn fresh_copy(&self) -> Option<Frame> {
        let cutoff = self.clock.now() - self.ttl;
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|frame| frame.captured_at() >= cutoff)
            .cloned()
    }

    async fn refresh(&self) -> Result<Frame> {
        let payload = match self.transcoder.capture_still(&self.source).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Frame refresh from {} failed: {err}", self.source);
                return Err(err);
            }
        };
        let frame = Frame::new(payload, self.clock.now());

        let mut slot = self.current.write().await;
        *slot = Some(frame.clone());
        info!(
            "Cached new frame captured at {} ({} bytes)",
            frame.captured_at(),
            frame.payload().len()
        );
        Ok(frame)
    }
}
