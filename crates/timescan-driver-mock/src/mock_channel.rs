//! Mock process-variable channels.
//!
//! A [`MockChannel`] stores a reported value and a commanded target. How the
//! reported value follows the target is set by [`Convergence`], which lets
//! tests model a slow actuator or one that never arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use timescan_core::capabilities::{Channel, ChannelProvider};
use timescan_core::error::{DriverError, DriverErrorKind};

use crate::common::ErrorConfig;

/// How the reported value follows a write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convergence {
    /// Reported value equals the target as soon as `put` returns.
    Immediate,
    /// Reported value reaches the target after this many `get` calls.
    AfterReads(u32),
    /// Reported value stays `offset` away from every target.
    Never {
        /// Persistent error between target and reported value
        offset: f64,
    },
}

#[derive(Debug)]
struct ChannelState {
    reported: f64,
    target: f64,
    reads_until_settled: u32,
    writes: Vec<f64>,
    reads: u64,
}

/// Simulated channel.
#[derive(Debug)]
pub struct MockChannel {
    name: String,
    connected: AtomicBool,
    convergence: Convergence,
    state: Mutex<ChannelState>,
    error_config: ErrorConfig,
}

impl MockChannel {
    /// Connected channel that converges immediately.
    pub fn new(name: impl Into<String>, initial: f64) -> Self {
        Self::builder(name).initial_value(initial).build()
    }

    /// Builder for a configured channel.
    pub fn builder(name: impl Into<String>) -> MockChannelBuilder {
        MockChannelBuilder::new(name)
    }

    /// Current reported value, bypassing error injection.
    pub fn value(&self) -> f64 {
        self.state.lock().reported
    }

    /// Force the reported value, as if the hardware moved on its own.
    pub fn set_value(&self, value: f64) {
        let mut state = self.state.lock();
        state.reported = value;
        state.target = value;
        state.reads_until_settled = 0;
    }

    /// Every value written with `put`, in order.
    pub fn writes(&self) -> Vec<f64> {
        self.state.lock().writes.clone()
    }

    /// Number of successful `get` calls.
    pub fn read_count(&self) -> u64 {
        self.state.lock().reads
    }

    /// Change the connection status.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::new(&self.name, DriverErrorKind::Connection, "channel disconnected").into())
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self) -> Result<f64> {
        self.ensure_connected()?;
        self.error_config.check_operation(&self.name, "get")?;

        let mut state = self.state.lock();
        state.reads += 1;
        if let Convergence::AfterReads(_) = self.convergence {
            if state.reads_until_settled > 0 {
                state.reads_until_settled -= 1;
                if state.reads_until_settled == 0 {
                    state.reported = state.target;
                }
            }
        }
        Ok(state.reported)
    }

    async fn put(&self, value: f64) -> Result<()> {
        self.ensure_connected()?;
        self.error_config.check_operation(&self.name, "put")?;

        let mut state = self.state.lock();
        state.writes.push(value);
        state.target = value;
        match self.convergence {
            Convergence::Immediate => state.reported = value,
            Convergence::AfterReads(0) => state.reported = value,
            Convergence::AfterReads(n) => state.reads_until_settled = n,
            Convergence::Never { offset } => state.reported = value + offset,
        }
        tracing::trace!(channel = %self.name, value, "MockChannel: put");
        Ok(())
    }
}

/// Builder for [`MockChannel`].
#[derive(Debug)]
pub struct MockChannelBuilder {
    name: String,
    initial: f64,
    connected: bool,
    convergence: Convergence,
    error_config: ErrorConfig,
}

impl MockChannelBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: 0.0,
            connected: true,
            convergence: Convergence::Immediate,
            error_config: ErrorConfig::none(),
        }
    }

    /// Initial reported value
    pub fn initial_value(mut self, value: f64) -> Self {
        self.initial = value;
        self
    }

    /// Start disconnected
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Convergence behaviour
    pub fn convergence(mut self, convergence: Convergence) -> Self {
        self.convergence = convergence;
        self
    }

    /// Error injection
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Build the channel.
    pub fn build(self) -> MockChannel {
        MockChannel {
            name: self.name,
            connected: AtomicBool::new(self.connected),
            convergence: self.convergence,
            state: Mutex::new(ChannelState {
                reported: self.initial,
                target: self.initial,
                reads_until_settled: 0,
                writes: Vec::new(),
                reads: 0,
            }),
            error_config: self.error_config,
        }
    }
}

/// Registry of mock channels keyed by name.
///
/// Unknown names are created on first `open` (connected, value 0) unless the
/// provider is [`strict`](Self::strict).
#[derive(Debug, Default)]
pub struct MockChannelProvider {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    strict: bool,
}

impl MockChannelProvider {
    /// Provider that auto-creates unknown channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that refuses to open unknown channels.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Register a channel, replacing any channel with the same name.
    pub fn insert(&self, channel: MockChannel) -> Arc<MockChannel> {
        let channel = Arc::new(channel);
        self.channels
            .lock()
            .insert(channel.name.clone(), Arc::clone(&channel));
        channel
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_channel(self, channel: MockChannel) -> Self {
        self.insert(channel);
        self
    }

    /// Look up a registered channel.
    pub fn channel(&self, name: &str) -> Option<Arc<MockChannel>> {
        self.channels.lock().get(name).cloned()
    }
}

#[async_trait]
impl ChannelProvider for MockChannelProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn Channel>> {
        let mut channels = self.channels.lock();
        if let Some(channel) = channels.get(name) {
            return Ok(Arc::clone(channel) as Arc<dyn Channel>);
        }
        if self.strict {
            return Err(DriverError::new(name, DriverErrorKind::Connection, "unknown channel").into());
        }
        let channel = Arc::new(MockChannel::new(name, 0.0));
        channels.insert(name.to_string(), Arc::clone(&channel));
        Ok(channel as Arc<dyn Channel>)
    }
}
