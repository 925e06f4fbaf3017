//! Core types for the pump-probe delay scan controller.
//!
//! This crate holds everything the experiment layer and the drivers share:
//!
//! - [`capabilities`] - async traits for channels, the acquisition backend
//!   and the recorded-event source
//! - [`error`] - [`TimescanError`](error::TimescanError) and driver error tagging
//! - [`rc`] - the persisted `~/.timescanrc` record
//! - [`settings`] - figment-backed application settings
//! - [`logging`] - tracing subscriber setup
//! - [`stop_signal`] - cooperative cancellation flag
//! - [`units`] - path-length / time conversions

#![warn(missing_docs)]

pub mod capabilities;
pub mod error;
pub mod logging;
pub mod rc;
pub mod settings;
pub mod stop_signal;
pub mod units;

pub use capabilities::{
    AcquisitionBackend, Channel, ChannelProvider, ControlValue, DaqConfig, DiagnosticEvent,
    EventSource, RunNumber,
};
pub use error::{DriverError, DriverErrorKind, TimescanError, TsResult};
pub use rc::{CalibrationState, ChannelNames, TimescanRc};
pub use settings::Settings;
pub use stop_signal::StopSignal;
