use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{LapseError, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const COMPLETE_KEY: &str = "complete";
pub const LAPSE_EXTENSION: &str = "mp4";
pub const FRAME_EXTENSION: &str = "jpg";

/// Range selector accepted by lapse retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapseRange {
    Today,
    Complete,
    Date(NaiveDate),
}

impl LapseRange {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" => Ok(LapseRange::Today),
            COMPLETE_KEY => Ok(LapseRange::Complete),
            // `%m`/`%d` accept unpadded fields, so pin the `YYYY-MM-DD` width first.
            other if other.len() != 10 => Err(LapseError::InvalidInput(format!(
                "invalid range {other:?}: expected YYYY-MM-DD"
            ))),
            other => NaiveDate::parse_from_str(other, DATE_FORMAT)
                .map(LapseRange::Date)
                .map_err(|err| LapseError::InvalidInput(format!("invalid range {other:?}: {err}"))),
        }
    }

    /// Artifact file name once `Today` has been pinned to a date.
    pub fn artifact_name(&self, today: NaiveDate) -> String {
        match self {
            LapseRange::Today => date_artifact_name(today),
            LapseRange::Complete => complete_artifact_name(),
            LapseRange::Date(date) => date_artifact_name(*date),
        }
    }
}

pub fn date_artifact_name(date: NaiveDate) -> String {
    format!("{}.{LAPSE_EXTENSION}", date.format(DATE_FORMAT))
}

pub fn complete_artifact_name() -> String {
    format!("{COMPLETE_KEY}.{LAPSE_EXTENSION}")
}

/// Filename filter over the archive directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSelector {
    /// `*.jpg`
    All,
    /// `<date>*.jpg`
    DatePrefix(NaiveDate),
}

impl FrameSelector {
    pub fn matches(&self, file_name: &str) -> bool {
        let Some(stem) = file_name.strip_suffix(&format!(".{FRAME_EXTENSION}")) else {
            return false;
        };
        match self {
            FrameSelector::All => !stem.is_empty(),
            FrameSelector::DatePrefix(date) => stem.starts_with(&date.format(DATE_FORMAT).to_string()),
        }
    }
}

impl fmt::Display for FrameSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSelector::All => write!(f, "*.{FRAME_EXTENSION}"),
            FrameSelector::DatePrefix(date) => {
                write!(f, "{}*.{FRAME_EXTENSION}", date.format(DATE_FORMAT))
            }
        }
    }
}

/// Periodic jobs driven by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ArchiveFrame,
    LatestLapse,
    CompleteLapse,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::ArchiveFrame,
        JobKind::LatestLapse,
        JobKind::CompleteLapse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ArchiveFrame => "archive_frame",
            JobKind::LatestLapse => "latest_lapse",
            JobKind::CompleteLapse => "complete_lapse",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a job that did not fail. A skip is a deliberate no-op from a time gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { detail: String },
    Skipped { reason: String },
}

impl JobOutcome {
    pub fn completed(detail: impl Into<String>) -> Self {
        JobOutcome::Completed {
            detail: detail.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        JobOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_keys() {
        assert_eq!(LapseRange::parse("").unwrap(), LapseRange::Today);
        assert_eq!(LapseRange::parse("complete").unwrap(), LapseRange::Complete);
        let date = NaiveDate::from_ymd_opt(2023, 5, 15).unwrap();
        assert_eq!(LapseRange::parse("2023-05-15").unwrap(), LapseRange::Date(date));
    }

    #[test]
    fn reject_malformed_range() {
        for raw in [
            "not-a-date",
            "2023-13-01",
            "2023/05/15",
            "Complete",
            "2024-5-1",
            "2024-05-1",
            "+2024-05-01",
        ] {
            let err = LapseRange::parse(raw).unwrap_err();
            assert!(err.is_invalid_input(), "{raw} -> {err}");
        }
    }

    #[test]
    fn artifact_names() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(LapseRange::Today.artifact_name(today), "2024-05-01.mp4");
        assert_eq!(LapseRange::Complete.artifact_name(today), "complete.mp4");
        let other = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        assert_eq!(LapseRange::Date(other).artifact_name(today), "2023-01-02.mp4");
    }

    #[test]
    fn selector_matching() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let day = FrameSelector::DatePrefix(date);
        assert!(day.matches("2024-05-01T07:00:00Z.jpg"));
        assert!(!day.matches("2024-05-02T07:00:00Z.jpg"));
        assert!(!day.matches("2024-05-01T07:00:00Z.png"));
        assert!(FrameSelector::All.matches("2024-05-02T07:00:00Z.jpg"));
        assert!(!FrameSelector::All.matches("notes.txt"));
        assert_eq!(day.to_string(), "2024-05-01*.jpg");
    }
}
