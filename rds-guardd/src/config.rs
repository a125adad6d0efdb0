// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Config Resolver (spec.md §4.5 step 0 / SPEC_FULL.md §1).
//!
//! All fallible parsing happens once, here, producing a frozen [`RunPlan`];
//! the rest of the program never re-reads `std::env` (mirrors the
//! teacher's habit in `trx-server/src/main.rs` of resolving config before
//! any task spawns).

use std::env;
use std::path::PathBuf;

use rds_core::RdsError;

const MIN_STATIONS: usize = 2;
const MAX_STATIONS: usize = 4;
const MAX_SPAN_HZ: f64 = 2_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscribeBackendKind {
    Local,
    Remote,
    None,
}

#[derive(Debug, Clone)]
pub struct TranscribeConfig {
    pub backend: TranscribeBackendKind,
    pub remote_url: Option<String>,
    pub language: String,
    pub remote_timeout_sec: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: Option<String>,
    pub port: u16,
    pub topic_prefix: String,
    pub client_id: String,
    pub publish_raw: bool,
    pub status_interval_sec: u64,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub listen: String,
    pub port: u16,
}

/// Frozen, validated run plan (spec.md §4.5, §6 "CLI / env").
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub mode: PipelineMode,
    pub station_freqs_hz: Vec<f64>,
    pub rtl_sdr_device: String,
    pub rtl_sdr_bin: String,
    pub rtl_fm_bin: String,
    pub redsea_bin: String,
    pub ffmpeg_bin: String,
    pub audio_dir: PathBuf,
    pub db_path: PathBuf,
    pub retention_days: i64,
    pub max_recording_sec: u64,
    pub min_duration_sec: u64,
    pub transcribe: TranscribeConfig,
    pub alert_hold_timeout_sec: u64,
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    pub shutdown_grace_sec: u64,
    pub log_level: Option<String>,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, RdsError> {
    match env_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| RdsError::Config(format!("{key}={raw:?} is not a valid value"))),
        None => Ok(default),
    }
}

/// Parses one frequency token: plain Hz (`103300000`) or `M`-suffixed MHz
/// (`103.3M`).
fn parse_frequency(token: &str) -> Result<f64, RdsError> {
    let token = token.trim();
    if let Some(mhz) = token.strip_suffix(['M', 'm']) {
        mhz.parse::<f64>()
            .map(|v| v * 1_000_000.0)
            .map_err(|_| RdsError::Config(format!("invalid frequency {token:?}")))
    } else {
        token
            .parse::<f64>()
            .map_err(|_| RdsError::Config(format!("invalid frequency {token:?}")))
    }
}

impl RunPlan {
    /// Parses the environment into a frozen run plan, deciding single vs
    /// multi-station mode and validating the frequency span
    /// (spec.md §4.1 "Constraints", §2 L0).
    pub fn from_env() -> Result<Self, RdsError> {
        let freqs_raw = env::var("FM_FREQUENCIES")
            .map_err(|_| RdsError::Config("FM_FREQUENCIES is required".to_string()))?;
        let station_freqs_hz: Vec<f64> = freqs_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_frequency)
            .collect::<Result<_, _>>()?;

        if station_freqs_hz.is_empty() {
            return Err(RdsError::Config("FM_FREQUENCIES must list at least one frequency".into()));
        }
        if station_freqs_hz.len() > MAX_STATIONS {
            return Err(RdsError::Config(format!(
                "FM_FREQUENCIES lists {} stations, max is {MAX_STATIONS}",
                station_freqs_hz.len()
            )));
        }

        let mode = if station_freqs_hz.len() >= MIN_STATIONS {
            let min = station_freqs_hz.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = station_freqs_hz.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let span = max - min;
            if span > MAX_SPAN_HZ {
                return Err(RdsError::Config(format!(
                    "frequency span {:.3} MHz exceeds the 2.0 MHz limit",
                    span / 1_000_000.0
                )));
            }
            PipelineMode::Multi
        } else {
            PipelineMode::Single
        };

        let backend = match env_or("TRANSCRIBE_BACKEND", "none").as_str() {
            "local" => TranscribeBackendKind::Local,
            "remote" => TranscribeBackendKind::Remote,
            "none" => TranscribeBackendKind::None,
            other => {
                return Err(RdsError::Config(format!(
                    "TRANSCRIBE_BACKEND={other:?} must be one of local, remote, none"
                )))
            }
        };
        if backend == TranscribeBackendKind::Remote && env_var("TRANSCRIBE_REMOTE_URL").is_none() {
            return Err(RdsError::Config(
                "TRANSCRIBE_REMOTE_URL is required when TRANSCRIBE_BACKEND=remote".into(),
            ));
        }

        Ok(Self {
            mode,
            station_freqs_hz,
            rtl_sdr_device: env_or("RTL_SDR_DEVICE", "0"),
            rtl_sdr_bin: env_or("RTL_SDR_BIN", "rtl_sdr"),
            rtl_fm_bin: env_or("RTL_FM_BIN", "rtl_fm"),
            redsea_bin: env_or("REDSEA_BIN", "redsea"),
            ffmpeg_bin: env_or("FFMPEG_BIN", "ffmpeg"),
            audio_dir: PathBuf::from(env_or("AUDIO_DIR", "/data/audio")),
            db_path: PathBuf::from(env_or("DB_PATH", "/data/events.db")),
            retention_days: env_parse_or("RETENTION_DAYS", 30)?,
            max_recording_sec: env_parse_or("MAX_RECORDING_SEC", 600)?,
            min_duration_sec: env_parse_or("MIN_DURATION_SEC", 2)?,
            transcribe: TranscribeConfig {
                backend,
                remote_url: env_var("TRANSCRIBE_REMOTE_URL"),
                language: env_or("TRANSCRIBE_LANGUAGE", "sv"),
                remote_timeout_sec: env_parse_or("TRANSCRIBE_REMOTE_TIMEOUT_SEC", 120)?,
                queue_capacity: env_parse_or("TRANSCRIBE_QUEUE_CAPACITY", 16)?,
            },
            alert_hold_timeout_sec: env_parse_or("ALERT_HOLD_TIMEOUT_SEC", 120)?,
            mqtt: MqttConfig {
                host: env_var("MQTT_HOST"),
                port: env_parse_or("MQTT_PORT", 1883)?,
                topic_prefix: env_or("MQTT_TOPIC_PREFIX", "rds"),
                client_id: env_or("MQTT_CLIENT_ID", "rds-guardd"),
                publish_raw: env_parse_or("MQTT_PUBLISH_RAW", false)?,
                status_interval_sec: env_parse_or("MQTT_STATUS_INTERVAL_SEC", 30)?,
            },
            http: HttpConfig {
                listen: env_or("HTTP_LISTEN", "0.0.0.0"),
                port: env_parse_or("HTTP_PORT", 8080)?,
            },
            shutdown_grace_sec: env_parse_or("SHUTDOWN_GRACE_SEC", 10)?,
            log_level: env_var("LOG_LEVEL").or_else(|| env_var("RUST_LOG")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "FM_FREQUENCIES",
            "TRANSCRIBE_BACKEND",
            "TRANSCRIBE_REMOTE_URL",
            "RETENTION_DAYS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn single_station_below_two_stays_single_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FM_FREQUENCIES", "100.0M");
        let plan = RunPlan::from_env().unwrap();
        assert_eq!(plan.mode, PipelineMode::Single);
        assert_eq!(plan.station_freqs_hz, vec![100_000_000.0]);
        clear_env();
    }

    #[test]
    fn two_or_more_stations_is_multi_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FM_FREQUENCIES", "100.0M,101.5M");
        let plan = RunPlan::from_env().unwrap();
        assert_eq!(plan.mode, PipelineMode::Multi);
        clear_env();
    }

    #[test]
    fn span_over_two_mhz_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FM_FREQUENCIES", "100.0M,103.0M");
        assert!(RunPlan::from_env().is_err());
        clear_env();
    }

    #[test]
    fn span_under_two_mhz_is_accepted() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FM_FREQUENCIES", "100.0M,101.99M");
        assert!(RunPlan::from_env().is_ok());
        clear_env();
    }

    #[test]
    fn more_than_four_stations_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FM_FREQUENCIES", "100.0M,100.2M,100.4M,100.6M,100.8M");
        assert!(RunPlan::from_env().is_err());
        clear_env();
    }

    #[test]
    fn remote_backend_without_url_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FM_FREQUENCIES", "100.0M,101.0M");
        env::set_var("TRANSCRIBE_BACKEND", "remote");
        assert!(RunPlan::from_env().is_err());
        clear_env();
    }

    #[test]
    fn missing_fm_frequencies_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(RunPlan::from_env().is_err());
    }
}
