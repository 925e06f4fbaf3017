//! Mock recorded-event sources.
//!
//! - [`MockEventSource`] replays a fixed list of events for any run.
//! - [`SimulatedTimetool`] synthesises timing-diagnostic events from the
//!   cycles a [`MockDaq`] recorded, using a known pixel/delay response so
//!   calibration results can be checked against it.

use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, BoxStream, StreamExt};
use timescan_core::capabilities::{DiagnosticEvent, EventSource, RunNumber};

use crate::common::{ErrorConfig, MockRng};
use crate::mock_daq::MockDaq;

/// Replays the same events for every run.
#[derive(Debug, Default)]
pub struct MockEventSource {
    events: Vec<DiagnosticEvent>,
    error_config: ErrorConfig,
}

impl MockEventSource {
    /// Source yielding `events`.
    pub fn new(events: Vec<DiagnosticEvent>) -> Self {
        Self {
            events,
            error_config: ErrorConfig::none(),
        }
    }

    /// Source yielding `(pixel, delay)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|&(pixel, delay)| DiagnosticEvent::new(pixel, delay))
                .collect(),
        )
    }

    /// Error injection, checked once per event.
    pub fn with_error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }
}

impl EventSource for MockEventSource {
    fn events<'a>(
        &'a self,
        _experiment: &'a str,
        _run: RunNumber,
    ) -> BoxStream<'a, Result<DiagnosticEvent>> {
        stream::iter(self.events.iter().map(move |event| -> Result<DiagnosticEvent> {
            self.error_config.check_operation("mock_events", "events")?;
            Ok(*event)
        }))
        .boxed()
    }
}

/// Timing-diagnostic simulator driven by a [`MockDaq`]'s recorded cycles.
///
/// For each completed cycle of the requested run, emits the cycle's event
/// budget with `delay` taken from the laser-delay control value and
/// `pixel = center + delay / ns_per_pixel + noise`.
#[derive(Debug)]
pub struct SimulatedTimetool {
    daq: Arc<MockDaq>,
    delay_channel: String,
    center_pixel: f64,
    ns_per_pixel: f64,
    noise_px: f64,
    dropout_rate: f64,
    rng: MockRng,
}

impl SimulatedTimetool {
    /// Simulator reading cycles from `daq`, keyed on `delay_channel`.
    pub fn new(daq: Arc<MockDaq>, delay_channel: impl Into<String>) -> Self {
        Self {
            daq,
            delay_channel: delay_channel.into(),
            center_pixel: 500.0,
            ns_per_pixel: 2.5e-6,
            noise_px: 0.0,
            dropout_rate: 0.0,
            rng: MockRng::new(None),
        }
    }

    /// Linear response: pixel at zero delay and delay per pixel (ns).
    pub fn with_response(mut self, center_pixel: f64, ns_per_pixel: f64) -> Self {
        self.center_pixel = center_pixel;
        self.ns_per_pixel = ns_per_pixel;
        self
    }

    /// Gaussian pixel jitter (standard deviation in pixels).
    pub fn with_noise(mut self, noise_px: f64) -> Self {
        self.noise_px = noise_px;
        self
    }

    /// Fraction of events with no edge found (zero amplitude).
    pub fn with_dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = rate;
        self
    }

    /// Seed the noise generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = MockRng::new(Some(seed));
        self
    }

    /// Expected pixel for a given delay, without noise.
    pub fn pixel_for_delay(&self, delay: f64) -> f64 {
        self.center_pixel + delay / self.ns_per_pixel
    }

    fn synthesise(&self, run: RunNumber) -> Vec<DiagnosticEvent> {
        let mut events = Vec::new();
        for cycle in self.daq.cycles_for(run).iter().filter(|c| c.completed) {
            let Some(delay) = cycle.control(&self.delay_channel) else {
                continue;
            };
            for _ in 0..cycle.events {
                let pixel = self.pixel_for_delay(delay) + self.rng.gaussian(self.noise_px);
                let amplitude = if self.rng.should_fail(self.dropout_rate) {
                    0.0
                } else {
                    0.05 + 0.01 * self.rng.next_f64()
                };
                events.push(DiagnosticEvent {
                    pixel,
                    delay,
                    amplitude: Some(amplitude),
                    fwhm: Some(40.0 + self.rng.gaussian(2.0)),
                });
            }
        }
        events
    }
}

impl EventSource for SimulatedTimetool {
    fn events<'a>(
        &'a self,
        experiment: &'a str,
        run: RunNumber,
    ) -> BoxStream<'a, Result<DiagnosticEvent>> {
        let events = self.synthesise(run);
        tracing::debug!(experiment, run = %run, count = events.len(), "SimulatedTimetool: replaying run");
        stream::iter(events.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use futures::TryStreamExt;
    use timescan_core::capabilities::{AcquisitionBackend, ControlValue, DaqConfig};

    #[tokio::test]
    async fn test_static_source_replays() {
        let source = MockEventSource::from_pairs(&[(1.0, 0.1), (2.0, 0.2)]);
        let events: Vec<_> = source.events("exp", RunNumber(1)).try_collect().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].pixel, 2.0);
    }

    #[tokio::test]
    async fn test_static_source_error_injection() {
        let source = MockEventSource::from_pairs(&[(1.0, 0.1), (2.0, 0.2), (3.0, 0.3)])
            .with_error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "events",
                count: 2,
            }));
        let result: Result<Vec<_>> = source.events("exp", RunNumber(1)).try_collect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_simulator_follows_recorded_cycles() {
        let daq = Arc::new(MockDaq::new(3));
        daq.configure(&DaqConfig {
            record: true,
            events: 4,
            controls: vec![],
            monitors: vec![],
        })
        .await
        .unwrap();
        for delay in [-1e-4, 1e-4] {
            daq.begin(&[ControlValue::new("LAS:DELAY", delay)]).await.unwrap();
            daq.end().await.unwrap();
        }

        let sim = SimulatedTimetool::new(Arc::clone(&daq), "LAS:DELAY").with_seed(1);
        let events: Vec<_> = sim.events("exp", RunNumber(3)).try_collect().await.unwrap();
        assert_eq!(events.len(), 8);
        for event in &events {
            assert!((event.pixel - sim.pixel_for_delay(event.delay)).abs() < 1e-9);
        }

        let other: Vec<_> = sim.events("exp", RunNumber(4)).try_collect().await.unwrap();
        assert!(other.is_empty());
    }
}
