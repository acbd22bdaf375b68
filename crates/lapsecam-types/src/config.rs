use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{LapseError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Live source handed to the transcoder, e.g. a go2rtc `frame.mp4` URL.
    pub source_url: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    pub ffmpeg_path: Option<String>,
    pub capture_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub frames_dir: String,
    pub lapse_dir: String,
    #[serde(default = "default_active_start_hour")]
    pub active_start_hour: u32,
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: u32,
    #[serde(default = "default_latest_cutoff_hour")]
    pub latest_cutoff_hour: u32,
    #[serde(default = "default_preview_fps")]
    pub preview_fps: u32,
    #[serde(default = "default_complete_fps")]
    pub complete_fps: u32,
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),
    #[serde(default = "default_crf")]
    pub crf: u8,
    pub encode_timeout_secs: Option<u64>,
    /// Parent for private encode directories; the system temp dir when unset.
    pub scratch_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_archive_interval")]
    pub archive_interval_minutes: u32,
    #[serde(default = "default_complete_hour")]
    pub complete_hour: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    #[serde(default = "default_job_log_capacity")]
    pub job_log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapsecamConfig {
    pub camera: CameraConfig,
    pub archive: ArchiveConfig,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
    pub ops: OpsConfig,
}

/// Upper bound for `camera.ttl_secs`; a day-old snapshot is never "live".
pub const MAX_TTL_SECS: u64 = 86_400;

fn default_ttl_secs() -> u64 {
    60
}

fn default_active_start_hour() -> u32 {
    7
}

fn default_active_end_hour() -> u32 {
    18
}

fn default_latest_cutoff_hour() -> u32 {
    20
}

fn default_preview_fps() -> u32 {
    2
}

fn default_complete_fps() -> u32 {
    10
}

fn default_resolution() -> (u32, u32) {
    (1920, 1080)
}

fn default_crf() -> u8 {
    17
}

fn default_complete_hour() -> u32 {
    20
}

fn default_archive_interval() -> u32 {
    15
}

fn default_true() -> bool {
    true
}

fn default_job_log_capacity() -> usize {
    64
}

impl Default for LapsecamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                source_url: "http://frigate:1984/api/frame.mp4?src=house".into(),
                ttl_secs: default_ttl_secs(),
                ffmpeg_path: None,
                capture_timeout_secs: Some(30),
            },
            archive: ArchiveConfig {
                frames_dir: "/service/data/frames".into(),
                lapse_dir: "/service/data/lapse".into(),
                active_start_hour: default_active_start_hour(),
                active_end_hour: default_active_end_hour(),
                latest_cutoff_hour: default_latest_cutoff_hour(),
                preview_fps: default_preview_fps(),
                complete_fps: default_complete_fps(),
                resolution: default_resolution(),
                crf: default_crf(),
                encode_timeout_secs: None,
                scratch_dir: None,
            },
            schedule: ScheduleConfig {
                archive_interval_minutes: default_archive_interval(),
                complete_hour: default_complete_hour(),
                enabled: true,
            },
            server: ServerConfig {
                bind_addr: "0.0.0.0".into(),
                port: 8080,
                token: None,
            },
            ops: OpsConfig {
                log_level: "info".into(),
                job_log_capacity: default_job_log_capacity(),
            },
        }
    }
}

impl LapsecamConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            LapseError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            LapseError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.source_url.trim().is_empty() {
            return Err(LapseError::Configuration(
                "camera.source_url must not be empty".into(),
            ));
        }
        if !(1..=MAX_TTL_SECS).contains(&self.camera.ttl_secs) {
            return Err(LapseError::Configuration(format!(
                "camera.ttl_secs must be between 1 and {MAX_TTL_SECS}"
            )));
        }
        for (name, hour) in [
            ("archive.active_start_hour", self.archive.active_start_hour),
            ("archive.active_end_hour", self.archive.active_end_hour),
            ("archive.latest_cutoff_hour", self.archive.latest_cutoff_hour),
            ("schedule.complete_hour", self.schedule.complete_hour),
        ] {
            if hour > 23 {
                return Err(LapseError::Configuration(format!(
                    "{name} must be between 0 and 23"
                )));
            }
        }
        if self.archive.active_start_hour > self.archive.active_end_hour {
            return Err(LapseError::Configuration(
                "archive.active_start_hour must not exceed archive.active_end_hour".into(),
            ));
        }
        if self.archive.preview_fps == 0 || self.archive.complete_fps == 0 {
            return Err(LapseError::Configuration(
                "archive frame rates must be greater than zero".into(),
            ));
        }
        if self.archive.resolution.0 == 0 || self.archive.resolution.1 == 0 {
            return Err(LapseError::Configuration(
                "archive.resolution must be non-zero".into(),
            ));
        }
        if !(1..=60).contains(&self.schedule.archive_interval_minutes) {
            return Err(LapseError::Configuration(
                "schedule.archive_interval_minutes must be between 1 and 60".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(LapseError::Configuration(
                "server.port must be a valid port (>0)".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let temp_path = dir.path().join("lapsecam.toml");
        let mut config = LapsecamConfig::default();
        config.archive.preview_fps = 4;
        config.server.token = Some("token".into());

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = LapsecamConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.archive.preview_fps, 4);
        assert_eq!(loaded.server.token.as_deref(), Some("token"));
        assert_eq!(loaded.archive.resolution, (1920, 1080));
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let doc = r#"
            [camera]
            source_url = "http://camera/frame.mp4"

            [archive]
            frames_dir = "data/frames"
            lapse_dir = "data/lapse"

            [schedule]

            [server]
            bind_addr = "127.0.0.1"
            port = 8080

            [ops]
            log_level = "debug"
        "#;
        let config: LapsecamConfig = toml::from_str(doc).expect("parse");
        assert_eq!(config.camera.ttl_secs, 60);
        assert_eq!(config.archive.active_start_hour, 7);
        assert_eq!(config.archive.active_end_hour, 18);
        assert_eq!(config.archive.latest_cutoff_hour, 20);
        assert_eq!(config.archive.preview_fps, 2);
        assert_eq!(config.archive.complete_fps, 10);
        assert_eq!(config.schedule.archive_interval_minutes, 15);
        assert_eq!(config.schedule.complete_hour, 20);
        assert!(config.schedule.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = LapsecamConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, LapseError::Configuration(_)));
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = LapsecamConfig::default();
        assert!(config.validate().is_ok());

        config.camera.ttl_secs = 0;
        assert!(config.validate().is_err());
        config.camera.ttl_secs = MAX_TTL_SECS + 1;
        assert!(config.validate().is_err());
        config.camera.ttl_secs = u64::MAX;
        assert!(config.validate().is_err());
        config.camera.ttl_secs = MAX_TTL_SECS;
        assert!(config.validate().is_ok());
        config.camera.ttl_secs = 60;

        config.archive.active_start_hour = 19;
        assert!(config.validate().is_err());
        config.archive.active_start_hour = 7;

        config.archive.latest_cutoff_hour = 24;
        assert!(config.validate().is_err());
        config.archive.latest_cutoff_hour = 20;

        config.archive.complete_fps = 0;
        assert!(config.validate().is_err());
        config.archive.complete_fps = 10;

        config.archive.resolution = (0, 1080);
        assert!(config.validate().is_err());
        config.archive.resolution = (1920, 1080);

        config.schedule.archive_interval_minutes = 0;
        assert!(config.validate().is_err());
        config.schedule.archive_interval_minutes = 15;

        config.server.port = 0;
        assert!(config.validate().is_err());
        config.server.port = 8080;

        assert!(config.validate().is_ok());
    }
}
