//! Hardware capabilities consumed by the scan controller.
//!
//! The controller never talks to hardware directly. It is handed
//! implementations of three small traits:
//!
//! - [`ChannelProvider`] / [`Channel`] - named process-variable channels
//!   (laser delay, timing-diagnostic stage, t0, laser lock)
//! - [`AcquisitionBackend`] - the DAQ recording backend
//! - [`EventSource`] - replay of recorded events for calibration
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for state
//!
//! Typed failures (`NotConnected`, `ActuatorTimeout`, ...) are produced one
//! layer up, by the actuator proxy and acquisition session.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

// =============================================================================
// Channels
// =============================================================================

/// Capability: a single named process variable.
///
/// # Contract
/// - Values are in channel-native units (ns for the laser delay, mm for the
///   timing-diagnostic stage)
/// - `put` issues the write and returns; it does not wait for the hardware to
///   reach the value
/// - `get` returns the value currently reported by the hardware
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. `LAS:FS5:VIT:FS_TGT_TIME_DIAL`).
    fn name(&self) -> &str;

    /// Whether the channel currently reports a live connection.
    async fn is_connected(&self) -> bool;

    /// Read the reported value.
    async fn get(&self) -> Result<f64>;

    /// Write a target value.
    async fn put(&self, value: f64) -> Result<()>;
}

/// Capability: opens channels by name.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Open a channel handle. The handle may not be connected yet; callers
    /// check [`Channel::is_connected`] after a grace period.
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>>;
}

// =============================================================================
// Acquisition backend
// =============================================================================

/// Run number assigned by the acquisition backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunNumber(pub u32);

impl fmt::Display for RunNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(channel name, value)` pair tagged onto an acquisition cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlValue {
    /// Channel name.
    pub name: String,
    /// Value in channel-native units.
    pub value: f64,
}

impl ControlValue {
    /// Build a control value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Configuration sent once per scan before the first cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DaqConfig {
    /// Whether the backend should record to disk.
    pub record: bool,
    /// Events to acquire per cycle.
    pub events: u32,
    /// Control channels scanned, with their values at configure time.
    pub controls: Vec<ControlValue>,
    /// Monitored channels (recorded, not scanned).
    pub monitors: Vec<String>,
}

/// Capability: a recording backend driven in begin/end cycles.
///
/// # Contract
/// - `configure` precedes any `begin`
/// - `begin` starts one cycle and `end` blocks until its event budget is
///   acquired
/// - `stop` aborts a cycle in progress
/// - `disconnect` releases the backend; `run_number` must be queried first
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    /// Backend identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Configure the next run.
    async fn configure(&self, config: &DaqConfig) -> Result<()>;

    /// Begin one acquisition cycle tagged with control values.
    async fn begin(&self, controls: &[ControlValue]) -> Result<()>;

    /// Wait for the current cycle to finish.
    async fn end(&self) -> Result<()>;

    /// Abort the current cycle.
    async fn stop(&self) -> Result<()>;

    /// Run number assigned to the current run.
    async fn run_number(&self) -> Result<RunNumber>;

    /// Release the backend.
    async fn disconnect(&self) -> Result<()>;
}

// =============================================================================
// Event source
// =============================================================================

/// One recorded event as seen by the calibration pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticEvent {
    /// Edge position on the timing-diagnostic camera (pixels).
    pub pixel: f64,
    /// Laser delay recorded with the event (ns).
    pub delay: f64,
    /// Edge amplitude, when the source provides it.
    pub amplitude: Option<f64>,
    /// Edge FWHM in pixels, when the source provides it.
    pub fwhm: Option<f64>,
}

impl DiagnosticEvent {
    /// Event with only the pixel/delay pair populated.
    pub fn new(pixel: f64, delay: f64) -> Self {
        Self {
            pixel,
            delay,
            amplitude: None,
            fwhm: None,
        }
    }
}

/// Capability: iterate recorded events of a run.
pub trait EventSource: Send + Sync {
    /// Stream the events of `run` in experiment `experiment`.
    fn events<'a>(
        &'a self,
        experiment: &'a str,
        run: RunNumber,
    ) -> BoxStream<'a, Result<DiagnosticEvent>>;
}
