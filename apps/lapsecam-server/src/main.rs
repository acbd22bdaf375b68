use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lapsecam_archive::ArchivePipeline;
use lapsecam_camera::FrameCache;
use lapsecam_http::AppState;
use lapsecam_ops::{init_tracing, JobLog};
use lapsecam_scheduler::Scheduler;
use lapsecam_transcoder::{FfmpegTranscoder, MockTranscoder, Transcoder};
use lapsecam_types::{
    clock::{Clock, SystemClock},
    config::LapsecamConfig,
    lapse::JobKind,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "lapsecam-server", about = "Live snapshot and time-lapse service")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "LAPSECAM_CONFIG", default_value = "configs/dev.toml")]
    config: String,
    /// Overrides `server.token`.
    #[arg(long, env = "LAPSECAM_TOKEN")]
    token: Option<String>,
    /// Run a single job and exit instead of serving.
    #[arg(long, value_enum)]
    run_once: Option<JobArg>,
    /// Use the in-process mock transcoder instead of ffmpeg.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobArg {
    ArchiveFrame,
    LatestLapse,
    CompleteLapse,
}

impl From<JobArg> for JobKind {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::ArchiveFrame => JobKind::ArchiveFrame,
            JobArg::LatestLapse => JobKind::LatestLapse,
            JobArg::CompleteLapse => JobKind::CompleteLapse,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.config);
    if let Some(token) = args.token.clone() {
        config.server.token = Some(token);
    }
    init_tracing(&config.ops)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transcoder: Arc<dyn Transcoder> = if args.dry_run {
        warn!("Dry run: using the mock transcoder");
        Arc::new(MockTranscoder::new())
    } else {
        Arc::new(
            FfmpegTranscoder::new(config.camera.ffmpeg_path.as_deref()).with_timeouts(
                config.camera.capture_timeout_secs.map(Duration::from_secs),
                config.archive.encode_timeout_secs.map(Duration::from_secs),
            ),
        )
    };

    let cache = Arc::new(FrameCache::from_config(
        &config.camera,
        Arc::clone(&transcoder),
        Arc::clone(&clock),
    ));
    let archive = Arc::new(ArchivePipeline::new(
        config.archive.clone(),
        Arc::clone(&cache),
        transcoder,
        Arc::clone(&clock),
    )?);
    let jobs = JobLog::new(config.ops.job_log_capacity);
    let scheduler = Arc::new(Scheduler::new(
        &config.schedule,
        Arc::clone(&archive),
        clock,
        jobs.clone(),
    ));

    if let Some(job) = args.run_once {
        let report = scheduler.fire(job.into()).await;
        anyhow::ensure!(!report.is_failure(), "{} failed", report.job);
        return Ok(());
    }

    if config.schedule.enabled {
        tokio::spawn(async move {
            if let Err(err) = scheduler.run().await {
                warn!("Scheduler stopped: {err}");
            }
        });
    } else {
        info!("Scheduler disabled by configuration");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.port)
        .parse()
        .context("invalid server.bind_addr/server.port")?;
    let state = AppState::new(cache, archive, jobs, config.server.token.clone());
    lapsecam_http::serve(state, addr).await
}

fn load_config(path: &str) -> LapsecamConfig {
    match LapsecamConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                default_config()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            default_config()
        }
    }
}

fn default_config() -> LapsecamConfig {
    let config = LapsecamConfig::default();
    debug_assert!(config.validate().is_ok());
    config
}
