//! Mock acquisition backend.
//!
//! Records every call so tests can assert on the begin/end protocol and on
//! how many times the backend was released. Cycles take `cycle_time` to
//! complete (zero by default).

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use timescan_core::capabilities::{AcquisitionBackend, ControlValue, DaqConfig, RunNumber};

use crate::common::ErrorConfig;

/// One call made on the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum DaqCall {
    /// `configure`
    Configure(DaqConfig),
    /// `begin` with its control values
    Begin(Vec<ControlValue>),
    /// `end`
    End,
    /// `stop`
    Stop,
    /// `disconnect`
    Disconnect,
}

/// A cycle as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCycle {
    /// Run the cycle belongs to
    pub run: RunNumber,
    /// Control values passed to `begin`
    pub controls: Vec<ControlValue>,
    /// Event budget of the cycle
    pub events: u32,
    /// False when the cycle was stopped before `end` returned
    pub completed: bool,
}

impl RecordedCycle {
    /// Value of a control channel in this cycle.
    pub fn control(&self, name: &str) -> Option<f64> {
        self.controls.iter().find(|c| c.name == name).map(|c| c.value)
    }
}

#[derive(Debug, Default)]
struct DaqState {
    calls: Vec<DaqCall>,
    cycles: Vec<RecordedCycle>,
    events_per_cycle: u32,
    current_run: Option<RunNumber>,
    next_run: u32,
}

/// Simulated DAQ.
#[derive(Debug)]
pub struct MockDaq {
    name: String,
    cycle_time: Duration,
    state: Mutex<DaqState>,
    error_config: ErrorConfig,
}

impl MockDaq {
    /// Backend whose first recorded run is `first_run`.
    pub fn new(first_run: u32) -> Self {
        Self {
            name: "mock_daq".into(),
            cycle_time: Duration::ZERO,
            state: Mutex::new(DaqState {
                next_run: first_run,
                ..DaqState::default()
            }),
            error_config: ErrorConfig::none(),
        }
    }

    /// How long each `end` takes.
    pub fn with_cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    /// Error injection.
    pub fn with_error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// All calls, in order.
    pub fn calls(&self) -> Vec<DaqCall> {
        self.state.lock().calls.clone()
    }

    /// All cycles, in order.
    pub fn cycles(&self) -> Vec<RecordedCycle> {
        self.state.lock().cycles.clone()
    }

    /// Cycles belonging to `run`.
    pub fn cycles_for(&self, run: RunNumber) -> Vec<RecordedCycle> {
        self.state
            .lock()
            .cycles
            .iter()
            .filter(|c| c.run == run)
            .cloned()
            .collect()
    }

    /// Number of `configure` calls.
    pub fn configure_count(&self) -> usize {
        self.count(|c| matches!(c, DaqCall::Configure(_)))
    }

    /// Number of `begin` calls.
    pub fn begin_count(&self) -> usize {
        self.count(|c| matches!(c, DaqCall::Begin(_)))
    }

    /// Number of `end` calls that completed.
    pub fn end_count(&self) -> usize {
        self.count(|c| matches!(c, DaqCall::End))
    }

    /// Number of `stop` calls.
    pub fn stop_count(&self) -> usize {
        self.count(|c| matches!(c, DaqCall::Stop))
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> usize {
        self.count(|c| matches!(c, DaqCall::Disconnect))
    }

    fn count(&self, pred: impl Fn(&DaqCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

impl Default for MockDaq {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl AcquisitionBackend for MockDaq {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&self, config: &DaqConfig) -> Result<()> {
        self.error_config.check_operation(&self.name, "configure")?;
        let mut state = self.state.lock();
        // Unrecorded runs report run 0, as the real DAQ does.
        let run = if config.record {
            let run = RunNumber(state.next_run);
            state.next_run += 1;
            run
        } else {
            RunNumber(0)
        };
        state.current_run = Some(run);
        state.events_per_cycle = config.events;
        state.calls.push(DaqCall::Configure(config.clone()));
        tracing::debug!(run = %run, events = config.events, "MockDaq: configured");
        Ok(())
    }

    async fn begin(&self, controls: &[ControlValue]) -> Result<()> {
        self.error_config.check_operation(&self.name, "begin")?;
        let mut state = self.state.lock();
        let run = state
            .current_run
            .ok_or_else(|| anyhow!("begin before configure"))?;
        let events = state.events_per_cycle;
        state.calls.push(DaqCall::Begin(controls.to_vec()));
        state.cycles.push(RecordedCycle {
            run,
            controls: controls.to_vec(),
            events,
            completed: false,
        });
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        self.error_config.check_operation(&self.name, "end")?;
        if !self.cycle_time.is_zero() {
            tokio::time::sleep(self.cycle_time).await;
        }
        let mut state = self.state.lock();
        state.calls.push(DaqCall::End);
        if let Some(cycle) = state.cycles.last_mut() {
            cycle.completed = true;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.error_config.check_operation(&self.name, "stop")?;
        let mut state = self.state.lock();
        state.calls.push(DaqCall::Stop);
        tracing::debug!("MockDaq: cycle stopped");
        Ok(())
    }

    async fn run_number(&self) -> Result<RunNumber> {
        self.error_config.check_operation(&self.name, "run_number")?;
        self.state
            .lock()
            .current_run
            .ok_or_else(|| anyhow!("no run configured"))
    }

    async fn disconnect(&self) -> Result<()> {
        self.error_config.check_operation(&self.name, "disconnect")?;
        let mut state = self.state.lock();
        state.calls.push(DaqCall::Disconnect);
        Ok(())
    }
}
