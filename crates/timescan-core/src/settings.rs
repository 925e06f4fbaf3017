//! Application settings using Figment
//!
//! Tunables that do not belong in the persisted rc record. Settings are
//! loaded from:
//! 1. built-in defaults
//! 2. an optional TOML file (`timescan.toml` by default)
//! 3. environment variables prefixed with `TIMESCAN_`
//!
//! # Example
//! ```no_run
//! use timescan_core::settings::Settings;
//!
//! let settings = Settings::load()?;
//! println!("poll interval: {} ms", settings.scan.poll_interval_ms);
//! # Ok::<(), timescan_core::error::TimescanError>(())
//! ```
//!
//! Environment overrides use `__` between section and key, e.g.
//! `TIMESCAN_SCAN__CONVERGENCE_TIMEOUT_MS=5000`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{TimescanError, TsResult};

/// Default settings file path.
pub const DEFAULT_SETTINGS_FILE: &str = "timescan.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging output
    pub logging: LoggingSettings,
    /// Actuator convergence
    pub scan: ScanSettings,
    /// Continuous-jitter mode
    pub jitter: JitterSettings,
    /// Calibration scan and fit
    pub calibration: CalibrationSettings,
    /// Remote analysis dispatch
    pub remote: RemoteSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
    /// Log span open and close (scan, calibrate, settle)
    pub span_events: bool,
    /// Include source file and line
    pub file_and_line: bool,
    /// Colour the pretty format
    pub ansi: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            span_events: false,
            file_and_line: false,
            ansi: true,
        }
    }
}

/// Actuator convergence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Absolute convergence tolerance in channel-native units
    pub tolerance: f64,
    /// Sleep between convergence polls
    pub poll_interval_ms: u64,
    /// Give up on convergence after this long
    pub convergence_timeout_ms: u64,
    /// Grace period for channels to connect after opening
    pub connect_grace_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            poll_interval_ms: 1,
            convergence_timeout_ms: 30_000,
            connect_grace_ms: 100,
        }
    }
}

impl ScanSettings {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Convergence timeout as a `Duration`.
    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_millis(self.convergence_timeout_ms)
    }

    /// Connect grace period as a `Duration`.
    pub fn connect_grace(&self) -> Duration {
        Duration::from_millis(self.connect_grace_ms)
    }
}

/// Continuous-jitter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterSettings {
    /// Full width of the random window around the current delay (fs)
    pub window_fs: f64,
    /// Pause between random moves
    pub cadence_ms: u64,
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            window_fs: 500.0,
            cadence_ms: 1000,
        }
    }
}

impl JitterSettings {
    /// Pause between random moves.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}

/// Inclusive `[min, max]` acceptance bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl Bounds {
    /// Whether `value` lies inside the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Event acceptance windows applied before fitting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceSettings {
    /// Edge amplitude bounds
    pub amplitude: Option<Bounds>,
    /// Edge FWHM bounds (pixels)
    pub fwhm: Option<Bounds>,
    /// Edge pixel-position bounds
    pub pixel: Option<Bounds>,
}

/// Calibration scan and fit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Experiment name used for event lookup and export paths
    pub experiment: String,
    /// Number of delay points in the calibration window
    pub points: usize,
    /// Half-width of the symmetric delay window (ns)
    pub window_ns: f64,
    /// Events acquired per delay point
    pub events_per_point: u32,
    /// Pixel bin width for local RMSE
    pub bin_size: f64,
    /// Root directory for raw-sample exports
    pub export_dir: PathBuf,
    /// Acceptance windows
    pub acceptance: AcceptanceSettings,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            experiment: "cxi00000".into(),
            points: 41,
            window_ns: 0.001,
            events_per_point: 120,
            bin_size: 1.0,
            export_dir: PathBuf::from("calib"),
            acceptance: AcceptanceSettings::default(),
        }
    }
}

/// Remote analysis dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Whether to submit the analysis job after calibration scans
    pub enabled: bool,
    /// SSH hops, outermost first
    pub hops: Vec<String>,
    /// Interpreter on the analysis host
    pub python: String,
    /// Analysis script on the analysis host
    pub script: String,
    /// Abandon the submission after this long
    pub timeout_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hops: vec!["psdev".into(), "psana".into()],
            python: "python".into(),
            script: "ts.calibrun".into(),
            timeout_ms: 60_000,
        }
    }
}

impl RemoteSettings {
    /// Submission timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Load from `timescan.toml` (if present) and the environment.
    pub fn load() -> TsResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Load from a specific file path (missing files are skipped) and the
    /// environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> TsResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TIMESCAN_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> TsResult<()> {
        let invalid = |msg: String| Err(TimescanError::Settings(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return invalid(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        if !(self.scan.tolerance > 0.0) {
            return invalid(format!("scan.tolerance must be positive, got {}", self.scan.tolerance));
        }
        if self.scan.convergence_timeout_ms == 0 {
            return invalid("scan.convergence_timeout_ms must be non-zero".into());
        }

        if !(self.jitter.window_fs > 0.0) {
            return invalid(format!("jitter.window_fs must be positive, got {}", self.jitter.window_fs));
        }

        let cal = &self.calibration;
        if cal.points < 3 {
            return invalid(format!("calibration.points must be at least 3, got {}", cal.points));
        }
        if !(cal.window_ns > 0.0) {
            return invalid(format!("calibration.window_ns must be positive, got {}", cal.window_ns));
        }
        if cal.events_per_point == 0 {
            return invalid("calibration.events_per_point must be non-zero".into());
        }
        if !(cal.bin_size > 0.0) {
            return invalid(format!("calibration.bin_size must be positive, got {}", cal.bin_size));
        }
        for (name, bounds) in [
            ("amplitude", cal.acceptance.amplitude),
            ("fwhm", cal.acceptance.fwhm),
            ("pixel", cal.acceptance.pixel),
        ] {
            if let Some(b) = bounds {
                if !(b.min <= b.max) {
                    return invalid(format!(
                        "calibration.acceptance.{} bounds inverted: [{}, {}]",
                        name, b.min, b.max
                    ));
                }
            }
        }

        if self.remote.enabled && self.remote.hops.is_empty() {
            return invalid("remote.hops must name at least one host when remote.enabled".into());
        }
        if self.remote.timeout_ms == 0 {
            return invalid("remote.timeout_ms must be non-zero".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.calibration.points, 41);
        assert_eq!(settings.scan.poll_interval_ms, 1);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timescan.toml");
        std::fs::write(
            &path,
            r#"
[scan]
convergence_timeout_ms = 5000

[calibration]
experiment = "cxii2415"
bin_size = 0.5

[calibration.acceptance.pixel]
min = 100.0
max = 900.0
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.scan.convergence_timeout_ms, 5000);
        assert_eq!(settings.scan.poll_interval_ms, 1);
        assert_eq!(settings.calibration.experiment, "cxii2415");
        assert_eq!(
            settings.calibration.acceptance.pixel,
            Some(Bounds { min: 100.0, max: 900.0 })
        );
        assert!(settings.calibration.acceptance.amplitude.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.logging.level = "verbose".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.calibration.bin_size = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.calibration.acceptance.fwhm = Some(Bounds { min: 10.0, max: 1.0 });
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.remote.enabled = true;
        settings.remote.hops.clear();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.remote.timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let b = Bounds { min: 1.0, max: 2.0 };
        assert!(b.contains(1.0));
        assert!(b.contains(2.0));
        assert!(!b.contains(2.0001));
    }
}
