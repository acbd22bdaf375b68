//! Operational helpers: logging setup and the in-memory job log.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use lapsecam_types::{
    config::OpsConfig,
    lapse::{JobKind, JobOutcome},
    LapseError, Result,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| LapseError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| LapseError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// One finished run of a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub id: Uuid,
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub result: JobResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Outcome(JobOutcome),
    Failed(String),
}

impl JobReport {
    pub fn new(
        job: JobKind,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        result: &Result<JobOutcome>,
    ) -> Self {
        let result = match result {
            Ok(outcome) => JobResult::Outcome(outcome.clone()),
            Err(err) => JobResult::Failed(err.to_string()),
        };
        Self {
            id: Uuid::new_v4(),
            job,
            started_at,
            duration_ms,
            result,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.result, JobResult::Failed(_))
    }
}

/// Bounded history of job runs; oldest entries fall off first.
#[derive(Clone)]
pub struct JobLog {
    capacity: usize,
    reports: Arc<Mutex<VecDeque<JobReport>>>,
}

impl Default for JobLog {
    fn default() -> Self {
        Self::new(64)
    }
}

impl JobLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            reports: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub async fn record(&self, report: JobReport) {
        let mut reports = self.reports.lock().await;
        if reports.len() == self.capacity {
            if let Some(evicted) = reports.pop_front() {
                debug!("Job log full, dropping {} report {}", evicted.job, evicted.id);
            }
        }
        reports.push_back(report);
    }

    /// Reports, newest first.
    pub async fn recent(&self) -> Vec<JobReport> {
        self.reports.lock().await.iter().rev().cloned().collect()
    }

    pub async fn last_for(&self, job: JobKind) -> Option<JobReport> {
        self.reports
            .lock()
            .await
            .iter()
            .rev()
            .find(|r| r.job == job)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(job: JobKind, result: Result<JobOutcome>) -> JobReport {
        JobReport::new(job, Utc::now(), 5, &result)
    }

    #[tokio::test]
    async fn log_is_bounded_and_newest_first() {
        let log = JobLog::new(2);
        log.record(report(JobKind::ArchiveFrame, Ok(JobOutcome::skipped("early"))))
            .await;
        log.record(report(JobKind::LatestLapse, Ok(JobOutcome::completed("x"))))
            .await;
        log.record(report(
            JobKind::CompleteLapse,
            Err(LapseError::SourceUnavailable("ffmpeg".into())),
        ))
        .await;

        let recent = log.recent().await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].job, JobKind::CompleteLapse);
        assert!(recent[0].is_failure());
        assert_eq!(recent[1].job, JobKind::LatestLapse);
        assert!(log.last_for(JobKind::ArchiveFrame).await.is_none());
    }

    #[test]
    fn report_serializes_outcome() {
        let r = report(JobKind::ArchiveFrame, Ok(JobOutcome::skipped("hour 6")));
        let json = serde_json::to_value(&r).expect("json");
        assert_eq!(json["job"], "archive_frame");
        assert_eq!(json["outcome"]["status"], "skipped");
        assert_eq!(json["outcome"]["reason"], "hour 6");
    }
}
