//! Periodic triggers for archival and lapse rebuilds.
//!
//! Each job runs in its own task on a cron-like UTC schedule. A failed tick is logged
//! and recorded; the job simply waits for its next tick. Nothing is retried early.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use lapsecam_archive::ArchivePipeline;
use lapsecam_ops::{JobLog, JobReport};
use lapsecam_types::{
    clock::Clock,
    config::ScheduleConfig,
    lapse::{JobKind, JobOutcome},
    LapseError, Result,
};
use tokio::time::sleep;
use tracing::{info, warn};

/// When a job fires, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Minutes divisible by `n` (`*/n * * * *`).
    EveryMinutes(u32),
    /// On the hour (`0 * * * *`).
    Hourly,
    /// Once a day at `HH:00` (`0 HH * * *`).
    DailyAt(u32),
}

impl Schedule {
    /// First firing time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::EveryMinutes(step) => {
                let step = step.clamp(1, 60);
                let mut candidate = truncate(after, 60) + Duration::minutes(1);
                while candidate.minute() % step != 0 {
                    candidate += Duration::minutes(1);
                }
                candidate
            }
            Schedule::Hourly => truncate(after, 3600) + Duration::hours(1),
            Schedule::DailyAt(hour) => {
                let today = truncate(after, 86_400) + Duration::hours(i64::from(hour.min(23)));
                if today > after {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}

fn truncate(at: DateTime<Utc>, unit_secs: i64) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(unit_secs), 0).unwrap_or(at)
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: JobKind) -> Result<JobOutcome>;
}

#[async_trait]
impl JobRunner for ArchivePipeline {
    async fn run_job(&self, job: JobKind) -> Result<JobOutcome> {
        match job {
            JobKind::ArchiveFrame => self.archive_current_frame().await,
            JobKind::LatestLapse => self.update_latest_lapse().await,
            JobKind::CompleteLapse => self.update_complete_lapse().await,
        }
    }
}

pub fn default_jobs(config: &ScheduleConfig) -> Vec<(JobKind, Schedule)> {
    vec![
        (
            JobKind::ArchiveFrame,
            Schedule::EveryMinutes(config.archive_interval_minutes),
        ),
        (JobKind::LatestLapse, Schedule::Hourly),
        (JobKind::CompleteLapse, Schedule::DailyAt(config.complete_hour)),
    ]
}

pub struct Scheduler<R>
where
    R: JobRunner,
{
    runner: Arc<R>,
    clock: Arc<dyn Clock>,
    jobs: Vec<(JobKind, Schedule)>,
    log: JobLog,
}

impl<R> Scheduler<R>
where
    R: JobRunner + 'static,
{
    pub fn new(
        config: &ScheduleConfig,
        runner: Arc<R>,
        clock: Arc<dyn Clock>,
        log: JobLog,
    ) -> Self {
        Self {
            runner,
            clock,
            jobs: default_jobs(config),
            log,
        }
    }

    pub fn jobs(&self) -> &[(JobKind, Schedule)] {
        &self.jobs
    }

    /// Run one job now and record the result.
    pub async fn fire(&self, job: JobKind) -> JobReport {
        let started_at = self.clock.now();
        let start = Instant::now();
        info!("Running {job}");
        let result = self.runner.run_job(job).await;
        match &result {
            Ok(JobOutcome::Completed { detail }) => info!("{job} completed: {detail}"),
            Ok(JobOutcome::Skipped { reason }) => info!("{job} skipped: {reason}"),
            Err(err) => warn!("{job} failed: {err}"),
        }
        let report = JobReport::new(job, started_at, start.elapsed().as_millis() as u64, &result);
        self.log.record(report.clone()).await;
        report
    }

    /// Drive every job on its schedule until the process exits.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let loops = self.jobs.clone().into_iter().map(|(job, schedule)| {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move { scheduler.job_loop(job, schedule).await })
        });

        for joined in futures::future::join_all(loops).await {
            joined.map_err(|err| LapseError::Ops(format!("scheduler task ended: {err}")))?;
        }
        Ok(())
    }

    async fn job_loop(&self, job: JobKind, schedule: Schedule) {
        loop {
            let now = self.clock.now();
            let next = schedule.next_after(now);
            info!("Next {job} at {next}");
            sleep((next - now).to_std().unwrap_or_default()).await;
            self.fire(job).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lapsecam_types::clock::ManualClock;
    use std::sync::Mutex;

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, minute, second).unwrap()
    }

    #[test]
    fn every_fifteen_minutes() {
        let schedule = Schedule::EveryMinutes(15);
        assert_eq!(schedule.next_after(at(1, 7, 0, 0)), at(1, 7, 15, 0));
        assert_eq!(schedule.next_after(at(1, 7, 14, 59)), at(1, 7, 15, 0));
        assert_eq!(schedule.next_after(at(1, 7, 52, 10)), at(1, 8, 0, 0));
        assert_eq!(schedule.next_after(at(1, 23, 50, 0)), at(2, 0, 0, 0));
    }

    #[test]
    fn hourly_on_the_hour() {
        assert_eq!(Schedule::Hourly.next_after(at(1, 9, 0, 0)), at(1, 10, 0, 0));
        assert_eq!(Schedule::Hourly.next_after(at(1, 9, 59, 59)), at(1, 10, 0, 0));
    }

    #[test]
    fn daily_at_twenty() {
        let schedule = Schedule::DailyAt(20);
        assert_eq!(schedule.next_after(at(1, 19, 59, 0)), at(1, 20, 0, 0));
        assert_eq!(schedule.next_after(at(1, 20, 0, 0)), at(2, 20, 0, 0));
        assert_eq!(schedule.next_after(at(1, 21, 0, 0)), at(2, 20, 0, 0));
    }

    struct ScriptedRunner {
        results: Mutex<Vec<Result<JobOutcome>>>,
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run_job(&self, _job: JobKind) -> Result<JobOutcome> {
            self.results
                .lock()
                .map_err(|_| LapseError::Ops("poisoned".into()))?
                .pop()
                .unwrap_or_else(|| Ok(JobOutcome::completed("default")))
        }
    }

    #[tokio::test]
    async fn failed_tick_is_recorded_and_next_tick_runs() {
        let runner = Arc::new(ScriptedRunner {
            results: Mutex::new(vec![
                Ok(JobOutcome::completed("frame saved")),
                Err(LapseError::SourceUnavailable("camera offline".into())),
            ]),
        });
        let clock = ManualClock::new(at(1, 9, 0, 0));
        let log = JobLog::new(8);
        let scheduler = Scheduler::new(
            &ScheduleConfig {
                archive_interval_minutes: 15,
                complete_hour: 20,
                enabled: true,
            },
            runner,
            Arc::new(clock),
            log.clone(),
        );

        let first = scheduler.fire(JobKind::ArchiveFrame).await;
        assert!(first.is_failure());
        let second = scheduler.fire(JobKind::ArchiveFrame).await;
        assert!(!second.is_failure());

        let recent = log.recent().await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].started_at, at(1, 9, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn job_loop_keeps_ticking_after_a_failure() {
        let runner = Arc::new(ScriptedRunner {
            results: Mutex::new(vec![
                Ok(JobOutcome::completed("frame saved")),
                Err(LapseError::SourceUnavailable("camera offline".into())),
            ]),
        });
        let log = JobLog::new(8);
        let scheduler = Arc::new(Scheduler::new(
            &ScheduleConfig {
                archive_interval_minutes: 15,
                complete_hour: 20,
                enabled: true,
            },
            runner,
            Arc::new(ManualClock::new(at(1, 9, 0, 0))),
            log.clone(),
        ));

        let ticking = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move {
            ticking
                .job_loop(JobKind::ArchiveFrame, Schedule::EveryMinutes(15))
                .await
        });
        let minutes = |n: u64| std::time::Duration::from_secs(n * 60);

        sleep(minutes(14)).await;
        assert!(log.recent().await.is_empty());

        sleep(minutes(2)).await;
        let recent = log.recent().await;
        assert_eq!(recent.len(), 1);
        assert!(recent[0].is_failure());

        sleep(minutes(15)).await;
        let recent = log.recent().await;
        assert_eq!(recent.len(), 2);
        assert!(!recent[0].is_failure());
        assert!(recent[1].is_failure());
        assert!(recent.iter().all(|r| r.job == JobKind::ArchiveFrame));

        handle.abort();
    }

    #[test]
    fn default_jobs_follow_config() {
        let jobs = default_jobs(&ScheduleConfig {
            archive_interval_minutes: 10,
            complete_hour: 21,
            enabled: true,
        });
        assert_eq!(
            jobs,
            vec![
                (JobKind::ArchiveFrame, Schedule::EveryMinutes(10)),
                (JobKind::LatestLapse, Schedule::Hourly),
                (JobKind::CompleteLapse, Schedule::DailyAt(21)),
            ]
        );
    }
}
