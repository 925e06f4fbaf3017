//! Actuator proxy: a named channel with write-and-wait semantics.
//!
//! The proxy owns the convergence policy (tolerance, poll interval,
//! timeout) and turns capability failures into [`TimescanError`]s. Its
//! last-known value is only ever updated from a hardware read, never from a
//! commanded target.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use timescan_core::capabilities::{Channel, ChannelProvider};
use timescan_core::error::{DriverError, DriverErrorKind, TimescanError, TsResult};
use timescan_core::settings::ScanSettings;
use timescan_core::stop_signal::StopSignal;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// How a write-and-wait finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Write issued without waiting.
    Issued,
    /// Reported value is within tolerance of the target.
    Settled,
    /// The stop signal was raised while polling.
    Interrupted,
}

/// Convergence parameters for write-and-wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    /// Absolute tolerance in channel-native units
    pub tolerance: f64,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for ConvergencePolicy {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            tolerance: settings.tolerance,
            poll_interval: settings.poll_interval(),
            timeout: settings.convergence_timeout(),
        }
    }
}

/// Handle to one actuator channel. Clones share the channel and the
/// last-known value.
#[derive(Clone)]
pub struct ActuatorProxy {
    channel: Arc<dyn Channel>,
    policy: ConvergencePolicy,
    last_known: Arc<RwLock<Option<f64>>>,
}

impl std::fmt::Debug for ActuatorProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorProxy")
            .field("channel", &self.channel.name())
            .field("policy", &self.policy)
            .field("last_known", &*self.last_known.read())
            .finish()
    }
}

impl ActuatorProxy {
    /// Open `name` and verify it connects within `grace`.
    ///
    /// Any failure to open, connect or take the first reading is reported
    /// as [`TimescanError::NotConnected`].
    #[instrument(skip(provider, policy), err)]
    pub async fn connect(
        provider: &dyn ChannelProvider,
        name: &str,
        grace: Duration,
        policy: ConvergencePolicy,
    ) -> TsResult<Self> {
        let channel = provider
            .open(name)
            .await
            .map_err(|e| TimescanError::NotConnected(format!("{}: {:#}", name, e)))?;

        if !channel.is_connected().await {
            tokio::time::sleep(grace).await;
            if !channel.is_connected().await {
                return Err(TimescanError::NotConnected(name.to_string()));
            }
        }

        let proxy = Self {
            channel,
            policy,
            last_known: Arc::new(RwLock::new(None)),
        };
        proxy
            .read()
            .await
            .map_err(|e| TimescanError::NotConnected(format!("{}: {}", name, e)))?;
        debug!(channel = name, "actuator connected");
        Ok(proxy)
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Last value reported by the hardware, if any read has succeeded.
    pub fn last_known(&self) -> Option<f64> {
        *self.last_known.read()
    }

    /// Read the reported value and remember it.
    pub async fn read(&self) -> TsResult<f64> {
        let value = self.channel.get().await.map_err(|e| {
            DriverError::from_anyhow(self.channel.name(), DriverErrorKind::Read, &e)
        })?;
        *self.last_known.write() = Some(value);
        Ok(value)
    }

    /// Write `value`; with `wait` block until the hardware reports it.
    pub async fn write(&self, value: f64, wait: bool) -> TsResult<WriteOutcome> {
        self.put(value).await?;
        if !wait {
            return Ok(WriteOutcome::Issued);
        }
        self.settle(value, None).await
    }

    /// Write `value` and wait for it, giving up early if `stop` is raised.
    ///
    /// The write itself is always issued; `stop` is only checked between
    /// polls.
    pub async fn write_until(&self, value: f64, stop: &StopSignal) -> TsResult<WriteOutcome> {
        self.put(value).await?;
        self.settle(value, Some(stop)).await
    }

    /// Issue the write. On failure the hardware is re-read so the
    /// last-known value does not go stale.
    async fn put(&self, value: f64) -> TsResult<()> {
        let Err(e) = self.channel.put(value).await else {
            return Ok(());
        };
        let err = DriverError::from_anyhow(self.channel.name(), DriverErrorKind::Write, &e);
        if let Err(read_err) = self.read().await {
            warn!(channel = %self.channel.name(), error = %read_err, "re-read after failed write also failed");
        }
        Err(err.into())
    }

    #[instrument(skip(self, stop), fields(channel = %self.channel.name()), err)]
    async fn settle(&self, target: f64, stop: Option<&StopSignal>) -> TsResult<WriteOutcome> {
        let start = Instant::now();

        loop {
            let value = self.read().await?;
            if (value - target).abs() <= self.policy.tolerance {
                debug!(target, value, elapsed_ms = start.elapsed().as_millis() as u64, "settled");
                return Ok(WriteOutcome::Settled);
            }

            if stop.is_some_and(StopSignal::is_triggered) {
                debug!(target, value, "stop requested while settling");
                return Ok(WriteOutcome::Interrupted);
            }

            if start.elapsed() >= self.policy.timeout {
                return Err(TimescanError::ActuatorTimeout {
                    channel: self.channel.name().to_string(),
                    target,
                    last_value: value,
                    timeout_ms: self.policy.timeout.as_millis() as u64,
                });
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }
}
