//! Acquisition session: the begin/end protocol over one backend.
//!
//! ```text
//! Idle -> Configured -> Recording -> Configured -> ... -> (disconnect)
//! ```
//!
//! [`AcquisitionSession::disconnect`] consumes the session, so a session can
//! be released at most once. Dropping a session that was never
//! disconnected logs an error.

use std::fmt;
use std::sync::Arc;

use timescan_core::capabilities::{AcquisitionBackend, ControlValue, DaqConfig, RunNumber};
use timescan_core::error::{DriverError, DriverErrorKind, TimescanError, TsResult};
use tracing::{debug, error, instrument};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not configured yet
    Idle,
    /// Ready to begin a cycle
    Configured,
    /// A cycle is in progress
    Recording,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Configured => "configured",
            SessionState::Recording => "recording",
        };
        write!(f, "{}", label)
    }
}

/// One scan's hold on the acquisition backend.
pub struct AcquisitionSession {
    backend: Arc<dyn AcquisitionBackend>,
    state: SessionState,
    cycles: usize,
    released: bool,
}

impl fmt::Debug for AcquisitionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionSession")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .finish()
    }
}

impl AcquisitionSession {
    /// Open a session on `backend`.
    pub fn new(backend: Arc<dyn AcquisitionBackend>) -> Self {
        Self {
            backend,
            state: SessionState::Idle,
            cycles: 0,
            released: false,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Cycles completed or stopped so far.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Configure the run. Illegal while recording.
    #[instrument(skip(self, controls, monitors), fields(backend = %self.backend.name()), err)]
    pub async fn configure(
        &mut self,
        events: u32,
        record: bool,
        controls: Vec<ControlValue>,
        monitors: Vec<String>,
    ) -> TsResult<()> {
        if self.state == SessionState::Recording {
            return Err(self.invalid("configure"));
        }
        let config = DaqConfig {
            record,
            events,
            controls,
            monitors,
        };
        self.backend
            .configure(&config)
            .await
            .map_err(|e| self.driver_error(&e))?;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Start one cycle tagged with `controls`.
    pub async fn begin(&mut self, controls: &[ControlValue]) -> TsResult<()> {
        if self.state != SessionState::Configured {
            return Err(self.invalid("begin"));
        }
        self.backend
            .begin(controls)
            .await
            .map_err(|e| self.driver_error(&e))?;
        self.state = SessionState::Recording;
        Ok(())
    }

    /// Wait for the current cycle to finish.
    ///
    /// Dropping this future before it resolves leaves the session
    /// `Recording`, so [`stop`](Self::stop) can still abort the cycle.
    pub async fn end(&mut self) -> TsResult<()> {
        if self.state != SessionState::Recording {
            return Err(self.invalid("end"));
        }
        self.backend.end().await.map_err(|e| self.driver_error(&e))?;
        self.state = SessionState::Configured;
        self.cycles += 1;
        Ok(())
    }

    /// Abort the current cycle.
    pub async fn stop(&mut self) -> TsResult<()> {
        if self.state != SessionState::Recording {
            return Err(self.invalid("stop"));
        }
        self.backend.stop().await.map_err(|e| self.driver_error(&e))?;
        self.state = SessionState::Configured;
        self.cycles += 1;
        debug!(backend = %self.backend.name(), "cycle stopped early");
        Ok(())
    }

    /// Release the backend and return the run number.
    ///
    /// The backend is disconnected even if querying the run number fails.
    #[instrument(skip(self), fields(backend = %self.backend.name()), err)]
    pub async fn disconnect(mut self) -> TsResult<RunNumber> {
        self.released = true;
        let run = self
            .backend
            .run_number()
            .await
            .map_err(|e| self.driver_error(&e));
        self.backend
            .disconnect()
            .await
            .map_err(|e| self.driver_error(&e))?;
        let run = run?;
        debug!(run = %run, cycles = self.cycles, "session released");
        Ok(run)
    }

    fn invalid(&self, operation: &'static str) -> TimescanError {
        TimescanError::InvalidSessionState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn driver_error(&self, err: &anyhow::Error) -> TimescanError {
        DriverError::from_anyhow(self.backend.name(), DriverErrorKind::Acquisition, err).into()
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if !self.released {
            error!(
                backend = %self.backend.name(),
                state = %self.state,
                "acquisition session dropped without disconnect"
            );
        }
    }
}
