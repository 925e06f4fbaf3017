//! Mock hardware for the timescan controller.
//!
//! Simulated implementations of the capability traits in
//! `timescan_core::capabilities`, for tests and for running the CLI without
//! beamline hardware. Nothing here sleeps unless asked to (see
//! [`MockDaq::with_cycle_time`]).
//!
//! # Available Mocks
//!
//! - [`MockChannel`] / [`MockChannelProvider`] - process-variable channels
//!   with configurable convergence and connectivity
//! - [`MockDaq`] - acquisition backend that records every call
//! - [`MockEventSource`] - fixed event replay
//! - [`SimulatedTimetool`] - timing-diagnostic events derived from the
//!   cycles a [`MockDaq`] recorded
//!
//! All mocks accept an [`ErrorConfig`] for failure injection.

pub mod common;
mod mock_channel;
mod mock_daq;
mod mock_events;

pub use common::{ErrorConfig, ErrorScenario, MockRng};
pub use mock_channel::{Convergence, MockChannel, MockChannelBuilder, MockChannelProvider};
pub use mock_daq::{DaqCall, MockDaq, RecordedCycle};
pub use mock_events::{MockEventSource, SimulatedTimetool};
