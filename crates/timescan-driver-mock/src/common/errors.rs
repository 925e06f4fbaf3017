//! Error injection for mock drivers.
//!
//! Failures are reported as [`DriverError`]s so they travel through
//! `anyhow` like a real driver failure would.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use timescan_core::error::{DriverError, DriverErrorKind};

/// Error injection configuration shared by all clones.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    scenarios: Arc<Vec<ErrorScenario>>,
    state: Arc<Mutex<ErrorState>>,
}

/// A deterministic failure pattern.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call to `operation` after `count` successes.
    FailAfterN {
        /// Operation name (`get`, `put`, `begin`, ...)
        operation: &'static str,
        /// Successful calls before failures start
        count: u32,
    },
    /// Every call to `operation` times out.
    Timeout {
        /// Operation name
        operation: &'static str,
    },
    /// First call of any operation loses the connection; all later calls fail.
    ConnectionLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    connection_lost: bool,
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` on `source` fails this time.
    pub fn check_operation(
        &self,
        source: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.connection_lost {
            return Err(DriverError::new(
                source,
                DriverErrorKind::Connection,
                "Connection lost",
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            source,
                            kind_for(operation),
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        source,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::ConnectionLoss => {
                    state.connection_lost = true;
                    return Err(DriverError::new(
                        source,
                        DriverErrorKind::Connection,
                        "Connection lost",
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

fn kind_for(operation: &str) -> DriverErrorKind {
    match operation {
        "open" => DriverErrorKind::Connection,
        "get" => DriverErrorKind::Read,
        "put" => DriverErrorKind::Write,
        "configure" | "begin" | "end" | "stop" | "run_number" | "disconnect" => {
            DriverErrorKind::Acquisition
        }
        "events" => DriverErrorKind::EventStream,
        _ => DriverErrorKind::Unknown,
    }
}
