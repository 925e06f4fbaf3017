//! Persisted controller record (`~/.timescanrc`).
//!
//! A newline-delimited `key = value` file holding the channel identities,
//! the acquisition platform, and the current calibration. It is read once
//! when the controller is built and rewritten in full after every
//! successful calibration.
//!
//! ```text
//! daq_host = cxi-daq
//! daq_platform = 4
//! laser_delay_pv_name = LAS:FS5:VIT:FS_TGT_TIME_DIAL
//! tt_stage_position_pv_name = CXI:LAS:MMN:04
//! t0_pv_name = LAS:FS5:VIT:FS_TGT_TIME_OFFSET
//! laser_lock_pv_name = LAS:FS5:VIT:PHASE_LOCKED
//! tt_travel_offset = 0
//! tt_fit_coeff = [0 1 0]
//! calibrated = false
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{TimescanError, TsResult};

/// File name used under the home directory.
pub const RC_FILE_NAME: &str = ".timescanrc";

const KEY_DAQ_HOST: &str = "daq_host";
const KEY_DAQ_PLATFORM: &str = "daq_platform";
const KEY_LASER_DELAY: &str = "laser_delay_pv_name";
const KEY_TT_STAGE: &str = "tt_stage_position_pv_name";
const KEY_T0: &str = "t0_pv_name";
const KEY_LASER_LOCK: &str = "laser_lock_pv_name";
const KEY_TRAVEL_OFFSET: &str = "tt_travel_offset";
const KEY_FIT_COEFF: &str = "tt_fit_coeff";
const KEY_CALIBRATED: &str = "calibrated";

/// Names of the four process-variable channels the controller drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    /// Laser delay (ns).
    pub laser_delay: String,
    /// Timing-diagnostic stage position (mm).
    pub tt_stage_position: String,
    /// Time-zero offset.
    pub t0: String,
    /// Laser phase-lock status.
    pub laser_lock: String,
}

/// Timing-diagnostic calibration carried by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// Stage position (mm) at which the diagnostic matches zero delay.
    pub travel_offset: f64,
    /// `[a, b, c]` for `time = a + b*x + c*x^2`.
    pub fit_coefficients: [f64; 3],
    /// Whether the coefficients come from a successful calibration.
    pub is_calibrated: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            travel_offset: 0.0,
            fit_coefficients: [0.0, 1.0, 0.0],
            is_calibrated: false,
        }
    }
}

/// Contents of the rc file.
#[derive(Debug, Clone, PartialEq)]
pub struct TimescanRc {
    /// Acquisition host.
    pub daq_host: String,
    /// Acquisition platform number.
    pub daq_platform: u32,
    /// Channel identities.
    pub channels: ChannelNames,
    /// Calibration state.
    pub calibration: CalibrationState,
}

impl TimescanRc {
    /// Uncalibrated record for a new installation.
    pub fn new(daq_host: impl Into<String>, daq_platform: u32, channels: ChannelNames) -> Self {
        Self {
            daq_host: daq_host.into(),
            daq_platform,
            channels,
            calibration: CalibrationState::default(),
        }
    }

    /// `$HOME/.timescanrc`.
    pub fn default_path() -> TsResult<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(RC_FILE_NAME))
            .ok_or_else(|| TimescanError::Settings("cannot determine home directory".into()))
    }

    /// Load and parse an rc file.
    pub fn load(path: impl AsRef<Path>) -> TsResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let rc = Self::parse(&text)?;
        info!(path = %path.display(), "Loaded timescan rc");
        Ok(rc)
    }

    /// Parse rc text. Fails fast on the first missing or unparsable key.
    pub fn parse(text: &str) -> TsResult<Self> {
        let mut settings: HashMap<&str, &str> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) =
                line.split_once('=')
                    .ok_or_else(|| TimescanError::ConfigurationCorrupt {
                        key: line.to_string(),
                        value: String::new(),
                    })?;
            let (key, value) = (key.trim(), value.trim());
            debug!(key, value, "rc entry");
            settings.insert(key, value);
        }

        let get = |key: &str| require(&settings, key);

        let daq_host = get(KEY_DAQ_HOST)?.to_string();
        let platform_raw = get(KEY_DAQ_PLATFORM)?;
        let daq_platform = platform_raw
            .parse::<u32>()
            .map_err(|_| corrupt(KEY_DAQ_PLATFORM, platform_raw))?;

        let channels = ChannelNames {
            laser_delay: get(KEY_LASER_DELAY)?.to_string(),
            tt_stage_position: get(KEY_TT_STAGE)?.to_string(),
            t0: get(KEY_T0)?.to_string(),
            laser_lock: get(KEY_LASER_LOCK)?.to_string(),
        };

        let offset_raw = get(KEY_TRAVEL_OFFSET)?;
        let travel_offset = offset_raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| corrupt(KEY_TRAVEL_OFFSET, offset_raw))?;

        let coeff_raw = get(KEY_FIT_COEFF)?;
        let fit_coefficients =
            parse_coefficients(coeff_raw).ok_or_else(|| corrupt(KEY_FIT_COEFF, coeff_raw))?;

        let calibrated_raw = get(KEY_CALIBRATED)?;
        let is_calibrated =
            parse_bool(calibrated_raw).ok_or_else(|| corrupt(KEY_CALIBRATED, calibrated_raw))?;

        Ok(Self {
            daq_host,
            daq_platform,
            channels,
            calibration: CalibrationState {
                travel_offset,
                fit_coefficients,
                is_calibrated,
            },
        })
    }

    /// Render the record in file order.
    pub fn render(&self) -> String {
        let [a, b, c] = self.calibration.fit_coefficients;
        let entries: [(&str, String); 9] = [
            (KEY_DAQ_HOST, self.daq_host.clone()),
            (KEY_DAQ_PLATFORM, self.daq_platform.to_string()),
            (KEY_LASER_DELAY, self.channels.laser_delay.clone()),
            (KEY_TT_STAGE, self.channels.tt_stage_position.clone()),
            (KEY_T0, self.channels.t0.clone()),
            (KEY_LASER_LOCK, self.channels.laser_lock.clone()),
            (KEY_TRAVEL_OFFSET, self.calibration.travel_offset.to_string()),
            (KEY_FIT_COEFF, format!("[{} {} {}]", a, b, c)),
            (KEY_CALIBRATED, self.calibration.is_calibrated.to_string()),
        ];
        entries
            .iter()
            .map(|(k, v)| format!("{} = {}\n", k, v))
            .collect()
    }

    /// Overwrite `path` with this record.
    ///
    /// The text goes to a sibling temp file first and is renamed over the
    /// target, so readers never see a half-written record.
    pub fn save(&self, path: impl AsRef<Path>) -> TsResult<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, self.render())?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), "Wrote timescan rc");
        Ok(())
    }
}

/// A required key must be present with a non-empty value.
fn require<'a>(settings: &HashMap<&str, &'a str>, key: &str) -> TsResult<&'a str> {
    settings
        .get(key)
        .copied()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TimescanError::ConfigurationIncomplete(key.to_string()))
}

fn corrupt(key: &str, value: &str) -> TimescanError {
    TimescanError::ConfigurationCorrupt {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_coefficients(raw: &str) -> Option<[f64; 3]> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let values: Vec<f64> = inner
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [a, b, c] if values.iter().all(|v| v.is_finite()) => Some([*a, *b, *c]),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TimescanRc {
        TimescanRc {
            daq_host: "cxi-daq".into(),
            daq_platform: 4,
            channels: ChannelNames {
                laser_delay: "LAS:FS5:VIT:FS_TGT_TIME_DIAL".into(),
                tt_stage_position: "CXI:LAS:MMN:04".into(),
                t0: "LAS:FS5:VIT:FS_TGT_TIME_OFFSET".into(),
                laser_lock: "LAS:FS5:VIT:PHASE_LOCKED".into(),
            },
            calibration: CalibrationState {
                travel_offset: 12.75,
                fit_coefficients: [-0.0012, 3.5e-6, -1.25e-10],
                is_calibrated: true,
            },
        }
    }

    #[test]
    fn test_render_then_parse_preserves_record() {
        let rc = sample();
        let parsed = TimescanRc::parse(&rc.render()).unwrap();
        assert_eq!(parsed, rc);
    }

    #[test]
    fn test_save_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RC_FILE_NAME);
        std::fs::write(&path, "stale contents that are not an rc file").unwrap();

        let rc = sample();
        rc.save(&path).unwrap();

        assert_eq!(TimescanRc::load(&path).unwrap(), rc);
        assert!(!dir.path().join(".timescanrc.tmp").exists());
    }

    #[test]
    fn test_missing_key_is_incomplete() {
        let text = sample().render().replace("t0_pv_name = LAS:FS5:VIT:FS_TGT_TIME_OFFSET\n", "");
        match TimescanRc::parse(&text) {
            Err(TimescanError::ConfigurationIncomplete(key)) => assert_eq!(key, "t0_pv_name"),
            other => panic!("expected ConfigurationIncomplete, got {other:?}"),
        }
    }

    fn with_line(rc: &TimescanRc, key: &str, line: &str) -> String {
        rc.render()
            .lines()
            .map(|l| if l.starts_with(key) { line } else { l })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_bad_coefficients_are_corrupt() {
        let text = with_line(&sample(), "tt_fit_coeff", "tt_fit_coeff = [1.0 2.0]");
        match TimescanRc::parse(&text) {
            Err(TimescanError::ConfigurationCorrupt { key, .. }) => assert_eq!(key, "tt_fit_coeff"),
            other => panic!("expected ConfigurationCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_platform_is_corrupt() {
        let text = with_line(&sample(), "daq_platform", "daq_platform = four");
        match TimescanRc::parse(&text) {
            Err(TimescanError::ConfigurationCorrupt { key, value }) => {
                assert_eq!(key, "daq_platform");
                assert_eq!(value, "four");
            }
            other => panic!("expected ConfigurationCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_false_string_is_false() {
        let text = sample().render().replace("calibrated = true", "calibrated = False");
        let rc = TimescanRc::parse(&text).unwrap();
        assert!(!rc.calibration.is_calibrated);
    }

    #[test]
    fn test_unparsable_bool_is_corrupt() {
        let text = sample().render().replace("calibrated = true", "calibrated = maybe");
        assert!(matches!(
            TimescanRc::parse(&text),
            Err(TimescanError::ConfigurationCorrupt { .. })
        ));
    }

    #[test]
    fn test_line_without_separator_is_corrupt() {
        let text = format!("{}garbage line\n", sample().render());
        assert!(matches!(
            TimescanRc::parse(&text),
            Err(TimescanError::ConfigurationCorrupt { .. })
        ));
    }

    #[test]
    fn test_comma_separated_coefficients_accepted() {
        assert_eq!(parse_coefficients("[1, 2, 3]"), Some([1.0, 2.0, 3.0]));
        assert_eq!(parse_coefficients("[ 0.0  1.0 0.0 ]"), Some([0.0, 1.0, 0.0]));
        assert_eq!(parse_coefficients("[nan 1 2]"), None);
    }

    #[test]
    fn test_empty_value_is_incomplete() {
        let text = with_line(&sample(), "daq_host", "daq_host =");
        match TimescanRc::parse(&text) {
            Err(TimescanError::ConfigurationIncomplete(key)) => assert_eq!(key, "daq_host"),
            other => panic!("expected ConfigurationIncomplete, got {other:?}"),
        }
    }
}
