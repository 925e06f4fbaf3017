//! Scan control for pump-probe timing experiments.
//!
//! [`ScanController`] owns the four controlled channels and drives the
//! acquisition backend through an [`AcquisitionSession`]:
//!
//! - **Scans** over a [`Schedule`] of delays, moving the laser delay and the
//!   timing-diagnostic stage together ([`ScanController::scan_range`],
//!   [`ScanController::scan_times`])
//! - **Jitter** acquisition while the delay wanders randomly
//!   ([`ScanController::jitter`])
//! - **Calibration** of the diagnostic's pixel-to-time curve
//!   ([`ScanController::calibrate`])
//!
//! Hardware is reached only through the capability traits in
//! [`timescan_core::capabilities`].

pub mod actuator;
pub mod calibration;
pub mod dispatch;
pub mod fit;
pub mod scan;
pub mod schedule;
pub mod session;

pub use actuator::{ActuatorProxy, ConvergencePolicy, WriteOutcome};
pub use calibration::{CalibrationOutcome, CalibrationReport};
pub use dispatch::DispatchOutcome;
pub use fit::{fit_errors, fit_quadratic, BinnedError, FitDiagnostics};
pub use scan::{
    ControllerStatus, CycleRecord, DelayWindow, Hardware, ScanController, ScanOptions,
    ScanReport, StageMode,
};
pub use schedule::Schedule;
pub use session::{AcquisitionSession, SessionState};
