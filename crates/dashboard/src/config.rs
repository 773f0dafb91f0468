//! TOML config file loading and validation for the dashboard service.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use time::UtcOffset;

use crate::reconciler::SCHEDULE_INTENT_TIMEOUT;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1";
const DEFAULT_SERVER_POLLING_SEC: u64 = 5;
const DEFAULT_STATUS_POLLING_SEC: u64 = 30;
/// Delay before re-checking whether status polling should resume.
const DEFAULT_STATUS_BACKOFF_SEC: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 10;

/// UTC offsets are limited to whole minutes within +/- 18 hours.
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

// ---------------------------------------------------------------------------
// Config file structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the device's web server.
    pub device_url: String,
    pub server_polling_interval_sec: u64,
    pub status_polling_interval_sec: u64,
    pub status_backoff_sec: u64,
    pub schedule_intent_timeout_sec: u64,
    /// Offset of the device's wall clock from UTC, for the security schedule.
    pub utc_offset_minutes: i32,
    pub request_timeout_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_url: DEFAULT_DEVICE_URL.to_string(),
            server_polling_interval_sec: DEFAULT_SERVER_POLLING_SEC,
            status_polling_interval_sec: DEFAULT_STATUS_POLLING_SEC,
            status_backoff_sec: DEFAULT_STATUS_BACKOFF_SEC,
            schedule_intent_timeout_sec: SCHEDULE_INTENT_TIMEOUT.as_secs(),
            utc_offset_minutes: 0,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
        }
    }
}

impl Config {
    pub fn server_polling_interval(&self) -> Duration {
        Duration::from_secs(self.server_polling_interval_sec)
    }

    pub fn status_polling_interval(&self) -> Duration {
        Duration::from_secs(self.status_polling_interval_sec)
    }

    pub fn status_backoff(&self) -> Duration {
        Duration::from_secs(self.status_backoff_sec)
    }

    pub fn schedule_intent_timeout(&self) -> Duration {
        Duration::from_secs(self.schedule_intent_timeout_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// Validated offsets always convert; anything else falls back to UTC.
    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or(UtcOffset::UTC)
    }

    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // ── Device ──────────────────────────────────────────
        let url = self.device_url.trim();
        if url.is_empty() {
            errors.push("device_url is empty".to_string());
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!(
                "device_url '{url}' must start with http:// or https://"
            ));
        }

        // ── Timing values (all must be positive) ────────────
        let positive = [
            ("server_polling_interval_sec", self.server_polling_interval_sec),
            ("status_polling_interval_sec", self.status_polling_interval_sec),
            ("status_backoff_sec", self.status_backoff_sec),
            ("schedule_intent_timeout_sec", self.schedule_intent_timeout_sec),
            ("request_timeout_sec", self.request_timeout_sec),
        ];
        for (name, value) in positive {
            if value == 0 {
                errors.push(format!("{name} must be positive, got 0"));
            }
        }

        // ── Clock ───────────────────────────────────────────
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            errors.push(format!(
                "utc_offset_minutes {} out of range [-{MAX_UTC_OFFSET_MINUTES}, {MAX_UTC_OFFSET_MINUTES}]",
                self.utc_offset_minutes
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate TOML config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let cfg = parse(
            r#"
device_url = "http://10.0.0.42"
server_polling_interval_sec = 10
status_polling_interval_sec = 15
status_backoff_sec = 90
schedule_intent_timeout_sec = 8
utc_offset_minutes = -300
request_timeout_sec = 3
"#,
        )
        .unwrap();
        assert_eq!(cfg.device_url, "http://10.0.0.42");
        assert_eq!(cfg.server_polling_interval(), Duration::from_secs(10));
        assert_eq!(cfg.status_backoff(), Duration::from_secs(90));
        assert_eq!(cfg.schedule_intent_timeout(), Duration::from_secs(8));
        assert_eq!(cfg.utc_offset().whole_minutes(), -300);
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.device_url, DEFAULT_DEVICE_URL);
        assert_eq!(cfg.server_polling_interval(), Duration::from_secs(5));
        assert_eq!(cfg.status_polling_interval(), Duration::from_secs(30));
        assert_eq!(cfg.status_backoff(), Duration::from_secs(60));
        assert_eq!(cfg.schedule_intent_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.utc_offset(), UtcOffset::UTC);
    }

    #[test]
    fn parse_rejects_unknown_types() {
        assert!(parse("server_polling_interval_sec = \"fast\"").is_err());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn default_config_passes() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_device_url_rejected() {
        let cfg = Config {
            device_url: "  ".into(),
            ..Config::default()
        };
        assert_validation_err(&cfg, "device_url is empty");
    }

    #[test]
    fn device_url_without_scheme_rejected() {
        let cfg = Config {
            device_url: "192.168.4.1".into(),
            ..Config::default()
        };
        assert_validation_err(&cfg, "must start with http://");
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = Config {
            status_polling_interval_sec: 0,
            ..Config::default()
        };
        assert_validation_err(&cfg, "status_polling_interval_sec must be positive");
    }

    #[test]
    fn utc_offset_out_of_range_rejected() {
        let cfg = Config {
            utc_offset_minutes: 20 * 60,
            ..Config::default()
        };
        assert_validation_err(&cfg, "utc_offset_minutes 1200 out of range");
    }

    #[test]
    fn multiple_errors_collected() {
        let cfg = Config {
            device_url: "".into(),
            server_polling_interval_sec: 0,
            request_timeout_sec: 0,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("3 errors"), "got: {msg}");
        assert!(msg.contains("device_url is empty"), "got: {msg}");
        assert!(msg.contains("server_polling_interval_sec"), "got: {msg}");
        assert!(msg.contains("request_timeout_sec"), "got: {msg}");
    }
}
