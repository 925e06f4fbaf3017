//! Error types for the scan controller.
//!
//! `TimescanError` is the single error type surfaced by the controller. The
//! capability traits in [`crate::capabilities`] return `anyhow::Result`, and
//! those failures are folded into [`TimescanError::Driver`] at the proxy and
//! session boundary so callers always see a structured failure.
//!
//! ## Error Categories
//!
//! 1. **Construction / load errors** - `NotConnected`, `ConfigurationIncomplete`,
//!    `ConfigurationCorrupt`, `Settings`
//!    - Raised before any scan starts.
//!    - Recovery: fix the rc file or channel names and reconstruct.
//!
//! 2. **Scan-fatal errors** - `ActuatorTimeout`, `Driver`
//!    - Terminate the current scan. The acquisition session is still
//!      disconnected before the error reaches the caller.
//!
//! 3. **Rejected requests** - `InvalidSchedule`, `InvalidParameter`
//!    - Raised before any hardware is touched.
//!
//! 4. **Calibration errors** - `CalibrationInsufficientData`,
//!    `CalibrationFitFailure`
//!    - Calibration aborted, previous calibration state retained.
//!
//! 5. **Programming errors** - `InvalidSessionState`
//!    - The acquisition session protocol was violated.
//!
//! Cancellation is not an error: an interrupted scan returns `Ok` with its
//! report marked as interrupted.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a capability failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Channel could not be opened.
    Connection,
    /// Reading a channel value failed.
    Read,
    /// Writing a channel value failed.
    Write,
    /// The acquisition backend rejected a request.
    Acquisition,
    /// The event source failed while streaming events.
    EventStream,
    /// The operation did not complete in time.
    Timeout,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Connection => "connection",
            DriverErrorKind::Read => "read",
            DriverErrorKind::Write => "write",
            DriverErrorKind::Acquisition => "acquisition",
            DriverErrorKind::EventStream => "event_stream",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A capability failure tagged with the channel or backend it came from.
#[derive(Error, Debug, Clone)]
#[error("'{source_name}' {kind} error: {message}")]
pub struct DriverError {
    /// Channel name or backend identifier.
    pub source_name: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Rendered message from the underlying driver.
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(
        source_name: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wrap an `anyhow` error coming out of a capability call.
    pub fn from_anyhow(
        source_name: impl Into<String>,
        kind: DriverErrorKind,
        err: &anyhow::Error,
    ) -> Self {
        // `{:#}` keeps the whole context chain on one line.
        Self::new(source_name, kind, format!("{:#}", err))
    }
}

/// Convenience alias for results using the controller error type.
pub type TsResult<T> = std::result::Result<T, TimescanError>;

/// Primary error type for the scan controller.
#[derive(Error, Debug)]
pub enum TimescanError {
    /// An actuator channel failed to connect.
    ///
    /// **Error Type**: Fatal at construction. No scan can start.
    #[error("Cannot connect to channel: {0}")]
    NotConnected(String),

    /// A commanded value was not reached within tolerance before the timeout.
    ///
    /// **Error Type**: Scan-fatal. The acquisition session is disconnected
    /// before this error is returned.
    #[error(
        "Channel '{channel}' did not reach {target} within {timeout_ms} ms \
         (last reported {last_value})"
    )]
    ActuatorTimeout {
        /// Channel name.
        channel: String,
        /// Commanded value.
        target: f64,
        /// Last value reported by the hardware.
        last_value: f64,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The acquisition session protocol was violated.
    ///
    /// **Error Type**: Programming error.
    #[error("Invalid acquisition session state: cannot {operation} while {state}")]
    InvalidSessionState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: String,
    },

    /// Malformed schedule parameters.
    ///
    /// **Error Type**: Rejected before any hardware is touched.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Not enough usable samples to fit the calibration curve.
    #[error("Insufficient calibration data: {0}")]
    CalibrationInsufficientData(String),

    /// The calibration fit could not be computed.
    #[error("Calibration fit failed: {0}")]
    CalibrationFitFailure(String),

    /// A required key is missing from the persisted configuration record.
    #[error("Configuration incomplete: key '{0}' missing")]
    ConfigurationIncomplete(String),

    /// A value in the persisted configuration record does not parse.
    #[error("Configuration corrupt: key '{key}' has unparsable value '{value}'")]
    ConfigurationCorrupt {
        /// Offending key.
        key: String,
        /// Raw value as found in the file.
        value: String,
    },

    /// A capability call failed.
    #[error("{0}")]
    Driver(DriverError),

    /// Application settings could not be loaded or failed validation.
    #[error("Settings error: {0}")]
    Settings(String),

    /// An argument was outside its valid domain.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DriverError> for TimescanError {
    fn from(err: DriverError) -> Self {
        TimescanError::Driver(err)
    }
}

impl From<figment::Error> for TimescanError {
    fn from(err: figment::Error) -> Self {
        TimescanError::Settings(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TimescanError::NotConnected("LAS:FS5:VIT:FS_TGT_TIME_DIAL".to_string());
        assert_eq!(
            err.to_string(),
            "Cannot connect to channel: LAS:FS5:VIT:FS_TGT_TIME_DIAL"
        );
    }

    #[test]
    fn test_driver_error_display() {
        let err = TimescanError::from(DriverError::new(
            "mock_daq",
            DriverErrorKind::Acquisition,
            "begin rejected",
        ));
        assert!(err
            .to_string()
            .contains("'mock_daq' acquisition error: begin rejected"));
    }

    #[test]
    fn test_driver_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("socket closed").context("put failed");
        let err = DriverError::from_anyhow("CXI:LAS:MMN:04", DriverErrorKind::Write, &inner);
        assert_eq!(err.message, "put failed: socket closed");
    }

    #[test]
    fn test_actuator_timeout_display() {
        let err = TimescanError::ActuatorTimeout {
            channel: "CXI:LAS:MMN:04".into(),
            target: 1.5,
            last_value: 1.0,
            timeout_ms: 250,
        };
        let msg = err.to_string();
        assert!(msg.contains("CXI:LAS:MMN:04"));
        assert!(msg.contains("250 ms"));
    }
}
