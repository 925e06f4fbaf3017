//! Scan controller: synchronised actuator moves driving acquisition cycles.
//!
//! Every scan owns one [`AcquisitionSession`] for its whole duration and
//! releases it exactly once, whether the scan completes, is interrupted
//! through the [`StopSignal`], or fails.
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = ScanController::connect(rc, rc_path, settings, hardware).await?;
//! let report = controller
//!     .scan_times(&[-0.001, 0.0, 0.001], &ScanOptions::default())
//!     .await?;
//! println!("run {}", report.run_number);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use timescan_core::capabilities::{
    AcquisitionBackend, ChannelProvider, ControlValue, EventSource, RunNumber,
};
use timescan_core::error::{TimescanError, TsResult};
use timescan_core::rc::{CalibrationState, TimescanRc};
use timescan_core::settings::Settings;
use timescan_core::stop_signal::StopSignal;
use timescan_core::units::{delay_for_stage_position, fs_to_ns, stage_position_for_delay};
use tracing::{debug, error, info, instrument, warn};

use crate::actuator::{ActuatorProxy, ConvergencePolicy, WriteOutcome};
use crate::schedule::Schedule;
use crate::session::AcquisitionSession;

/// Half-width of the delay window the timing diagnostic can measure at a
/// fixed stage position (fs).
pub const MEASURABLE_HALF_WIDTH_FS: f64 = 300.0;

/// Which actuators a scan moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// Laser delay and timing-diagnostic stage move together.
    Tracking,
    /// Only the laser delay moves; the stage stays put.
    Static,
}

/// One completed acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleRecord {
    /// Position in the schedule
    pub index: usize,
    /// Commanded laser delay (ns)
    pub delay: f64,
    /// Commanded stage position (mm); `None` in [`StageMode::Static`]
    pub stage_position: Option<f64>,
    /// Run the cycle was recorded in
    pub run: RunNumber,
}

/// Result of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Run number reported by the backend at release
    pub run_number: RunNumber,
    /// Cycles that ran to completion, in order
    pub cycles: Vec<CycleRecord>,
    /// Whether the scan ended early on the stop signal
    pub interrupted: bool,
}

/// Per-scan options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOptions {
    /// Events acquired at each delay
    pub events_per_point: u32,
    /// Times each delay is visited
    pub repeats: u32,
    /// Shuffle the expanded schedule
    pub randomize: bool,
    /// Record to disk
    pub record: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            events_per_point: 100,
            repeats: 1,
            randomize: false,
            record: true,
        }
    }
}

/// Delay range measurable at the current stage position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayWindow {
    /// Lower bound (ns)
    pub lower: f64,
    /// Upper bound (ns)
    pub upper: f64,
}

impl DelayWindow {
    /// Whether `delay` lies inside the window.
    pub fn contains(&self, delay: f64) -> bool {
        delay >= self.lower && delay <= self.upper
    }
}

/// Snapshot of the controlled channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerStatus {
    /// Laser delay (ns)
    pub laser_delay: f64,
    /// Timing-diagnostic stage position (mm)
    pub tt_stage_position: f64,
    /// Time-zero offset
    pub t0: f64,
    /// Whether the laser reports phase lock
    pub laser_locked: bool,
    /// Window measurable at the current stage position
    pub window: DelayWindow,
    /// Calibration in use
    pub calibration: CalibrationState,
}

/// Hardware capabilities handed to the controller.
#[derive(Clone)]
pub struct Hardware {
    /// Opens actuator channels
    pub channels: Arc<dyn ChannelProvider>,
    /// Acquisition backend
    pub backend: Arc<dyn AcquisitionBackend>,
    /// Recorded-event source for calibration
    pub events: Arc<dyn EventSource>,
}

#[derive(Debug, Default)]
struct Progress {
    cycles: Vec<(usize, f64, Option<f64>)>,
    interrupted: bool,
}

impl Progress {
    fn into_report(self, run: RunNumber) -> ScanReport {
        ScanReport {
            run_number: run,
            cycles: self
                .cycles
                .into_iter()
                .map(|(index, delay, stage_position)| CycleRecord {
                    index,
                    delay,
                    stage_position,
                    run,
                })
                .collect(),
            interrupted: self.interrupted,
        }
    }
}

/// Drives the laser delay, the timing-diagnostic stage and the DAQ.
pub struct ScanController {
    pub(crate) rc: TimescanRc,
    pub(crate) rc_path: PathBuf,
    pub(crate) settings: Settings,
    pub(crate) laser_delay: ActuatorProxy,
    pub(crate) tt_stage: ActuatorProxy,
    t0: ActuatorProxy,
    laser_lock: ActuatorProxy,
    backend: Arc<dyn AcquisitionBackend>,
    pub(crate) events: Arc<dyn EventSource>,
    pub(crate) stop: StopSignal,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("rc_path", &self.rc_path)
            .field("laser_delay", &self.laser_delay.name())
            .field("tt_stage", &self.tt_stage.name())
            .field("backend", &self.backend.name())
            .field("calibration", &self.rc.calibration)
            .finish_non_exhaustive()
    }
}

impl ScanController {
    /// Connect every channel named in `rc`.
    ///
    /// `rc_path` is where successful calibrations are persisted.
    #[instrument(skip_all, fields(rc_path = %rc_path.display()), err)]
    pub async fn connect(
        rc: TimescanRc,
        rc_path: PathBuf,
        settings: Settings,
        hardware: Hardware,
    ) -> TsResult<Self> {
        let policy = ConvergencePolicy::from(&settings.scan);
        let grace = settings.scan.connect_grace();
        let provider = hardware.channels.as_ref();

        let laser_delay =
            ActuatorProxy::connect(provider, &rc.channels.laser_delay, grace, policy).await?;
        let tt_stage =
            ActuatorProxy::connect(provider, &rc.channels.tt_stage_position, grace, policy).await?;
        let t0 = ActuatorProxy::connect(provider, &rc.channels.t0, grace, policy).await?;
        let laser_lock =
            ActuatorProxy::connect(provider, &rc.channels.laser_lock, grace, policy).await?;

        info!(
            daq_host = %rc.daq_host,
            platform = rc.daq_platform,
            calibrated = rc.calibration.is_calibrated,
            "scan controller connected"
        );

        Ok(Self {
            rc,
            rc_path,
            settings,
            laser_delay,
            tt_stage,
            t0,
            laser_lock,
            backend: hardware.backend,
            events: hardware.events,
            stop: StopSignal::new(),
        })
    }

    /// Signal that interrupts the scan in progress. Clones share state.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Current persisted record.
    pub fn rc(&self) -> &TimescanRc {
        &self.rc
    }

    /// Where calibrations are persisted.
    pub fn rc_path(&self) -> &Path {
        &self.rc_path
    }

    /// Calibration in use.
    pub fn calibration(&self) -> CalibrationState {
        self.rc.calibration
    }

    /// Settings in use.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stage position (mm) matched to `delay` (ns).
    pub fn stage_position_for(&self, delay: f64) -> f64 {
        stage_position_for_delay(delay, self.rc.calibration.travel_offset)
    }

    /// Scan `start..=stop` (first point past `stop` included) in steps of `step`.
    pub async fn scan_range(
        &self,
        start: f64,
        stop: f64,
        step: f64,
        options: &ScanOptions,
    ) -> TsResult<ScanReport> {
        let schedule = {
            let mut rng = rand::thread_rng();
            Schedule::from_range(start, stop, step, options.repeats, options.randomize, &mut rng)?
        };
        self.run_schedule(&schedule, options.events_per_point, options.record, StageMode::Tracking)
            .await
    }

    /// Scan an explicit list of delays.
    pub async fn scan_times(&self, times: &[f64], options: &ScanOptions) -> TsResult<ScanReport> {
        let schedule = {
            let mut rng = rand::thread_rng();
            Schedule::from_times(times, options.repeats, options.randomize, &mut rng)?
        };
        self.run_schedule(&schedule, options.events_per_point, options.record, StageMode::Tracking)
            .await
    }

    /// Execute a prepared schedule: one acquisition cycle per delay.
    ///
    /// The stop signal is re-armed on entry. Interrupts are honoured between
    /// polls and during a cycle; an interrupted scan still returns `Ok`.
    #[instrument(skip(self, schedule), fields(cycles = schedule.len()), err)]
    pub async fn run_schedule(
        &self,
        schedule: &Schedule,
        events_per_point: u32,
        record: bool,
        mode: StageMode,
    ) -> TsResult<ScanReport> {
        if events_per_point == 0 {
            return Err(TimescanError::InvalidParameter(
                "events per point must be non-zero".into(),
            ));
        }
        self.arm_stop();
        if !record {
            warn!("not recording");
        }
        info!(
            points = schedule.len(),
            events_per_point, "scan requested"
        );

        let mut session = AcquisitionSession::new(Arc::clone(&self.backend));
        let outcome = self
            .drive(&mut session, schedule, events_per_point, record, mode)
            .await;
        let released = session.disconnect().await;

        match (outcome, released) {
            (Ok(progress), Ok(run)) => {
                info!(run = %run, cycles = progress.cycles.len(), interrupted = progress.interrupted, "scan finished, daq released");
                Ok(progress.into_report(run))
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(run)) => {
                warn!(run = %run, error = %e, "scan aborted, daq released");
                Err(e)
            }
            (Err(e), Err(release)) => {
                error!(error = %release, "failed to release acquisition session");
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut AcquisitionSession,
        schedule: &Schedule,
        events_per_point: u32,
        record: bool,
        mode: StageMode,
    ) -> TsResult<Progress> {
        let controls = self.current_controls(mode).await?;
        session
            .configure(events_per_point, record, controls, self.monitors())
            .await?;
        debug!("daq configured");

        let total = schedule.len();
        let mut progress = Progress::default();

        for (index, &delay) in schedule.iter().enumerate() {
            if self.stop.is_triggered() {
                progress.interrupted = true;
                break;
            }

            let stage = match mode {
                StageMode::Tracking => Some(self.stage_position_for(delay)),
                StageMode::Static => None,
            };
            info!(cycle = index, total, delay_ns = delay, stage_mm = ?stage, "cycle");

            if self.move_to(delay, stage, Some(&self.stop)).await? == WriteOutcome::Interrupted {
                progress.interrupted = true;
                break;
            }

            session.begin(&self.cycle_tags(delay, stage)).await?;
            let stopped = tokio::select! {
                biased;
                res = session.end() => {
                    res?;
                    false
                }
                _ = self.stop.triggered() => true,
            };
            if stopped {
                warn!(cycle = index, reason = ?self.stop.reason(), "interrupt received, stopping daq");
                session.stop().await?;
                progress.interrupted = true;
                break;
            }
            progress.cycles.push((index, delay, stage));
        }

        Ok(progress)
    }

    /// Move both actuators to `delay` and wait for them to settle.
    ///
    /// Returns [`WriteOutcome::Interrupted`] if the stop signal is raised
    /// before both have settled.
    #[instrument(skip(self), err)]
    pub async fn set_delay(&self, delay: f64) -> TsResult<WriteOutcome> {
        self.arm_stop();
        let old_delay = self.laser_delay.read().await?;
        let old_stage = self.tt_stage.read().await?;
        let stage = self.stage_position_for(delay);

        let outcome = self.move_to(delay, Some(stage), Some(&self.stop)).await?;
        if outcome == WriteOutcome::Interrupted {
            warn!(delay_ns = delay, reason = ?self.stop.reason(), "set delay interrupted");
            return Ok(outcome);
        }

        info!(from = old_delay, to = delay, "laser delay");
        info!(from = old_stage, to = stage, "tt stage");
        Ok(outcome)
    }

    /// Delay window measurable at the current stage position.
    pub async fn measurable_window(&self) -> TsResult<DelayWindow> {
        let position = self.tt_stage.read().await?;
        let centre = delay_for_stage_position(position, self.rc.calibration.travel_offset);
        let half = fs_to_ns(MEASURABLE_HALF_WIDTH_FS);
        Ok(DelayWindow {
            lower: centre - half,
            upper: centre + half,
        })
    }

    /// Current laser delay. Warns when the stage cannot measure it.
    pub async fn current_delay(&self) -> TsResult<f64> {
        let delay = self.laser_delay.read().await?;
        let window = self.measurable_window().await?;
        if !window.contains(delay) {
            warn!(
                delay_ns = delay,
                lower = window.lower,
                upper = window.upper,
                "tt stage out of range for delay"
            );
        }
        Ok(delay)
    }

    /// Read every controlled channel.
    pub async fn status(&self) -> TsResult<ControllerStatus> {
        Ok(ControllerStatus {
            laser_delay: self.laser_delay.read().await?,
            tt_stage_position: self.tt_stage.read().await?,
            t0: self.t0.read().await?,
            laser_locked: self.laser_lock.read().await? != 0.0,
            window: self.measurable_window().await?,
            calibration: self.rc.calibration,
        })
    }

    /// One acquisition cycle of `events` while the laser delay wanders
    /// randomly around its current value.
    ///
    /// The delay is restored before the session is released.
    #[instrument(skip(self), err)]
    pub async fn jitter(&self, events: u32, record: bool) -> TsResult<ScanReport> {
        if events == 0 {
            return Err(TimescanError::InvalidParameter("events must be non-zero".into()));
        }
        self.arm_stop();
        let original = self.laser_delay.read().await?;
        info!(
            window_fs = self.settings.jitter.window_fs,
            events, "jitter scan requested"
        );

        let mut session = AcquisitionSession::new(Arc::clone(&self.backend));
        let outcome = self.drive_jitter(&mut session, events, record, original).await;

        let restored = self.laser_delay.write(original, true).await;
        if let Err(e) = &restored {
            error!(error = %e, delay = original, "failed to restore laser delay");
        }
        let released = session.disconnect().await;
        let (interrupted, run) = match (outcome, released) {
            (Ok(interrupted), Ok(run)) => (interrupted, run),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
            (Err(e), Err(release)) => {
                error!(error = %release, "failed to release acquisition session");
                return Err(e);
            }
        };
        restored?;

        info!(run = %run, interrupted, "jitter scan finished, daq released");
        let cycles = if interrupted {
            Vec::new()
        } else {
            vec![CycleRecord {
                index: 0,
                delay: original,
                stage_position: None,
                run,
            }]
        };
        Ok(ScanReport {
            run_number: run,
            cycles,
            interrupted,
        })
    }

    async fn drive_jitter(
        &self,
        session: &mut AcquisitionSession,
        events: u32,
        record: bool,
        centre: f64,
    ) -> TsResult<bool> {
        session.configure(events, record, Vec::new(), self.monitors()).await?;

        let worker_stop = StopSignal::new();
        let worker = tokio::spawn(jitter_worker(
            self.laser_delay.clone(),
            centre,
            fs_to_ns(self.settings.jitter.window_fs),
            self.settings.jitter.cadence(),
            worker_stop.clone(),
        ));

        let acquired = async {
            session.begin(&[]).await?;
            let stopped = tokio::select! {
                biased;
                res = session.end() => {
                    res?;
                    false
                }
                _ = self.stop.triggered() => true,
            };
            if stopped {
                warn!(reason = ?self.stop.reason(), "interrupt received, stopping daq");
                session.stop().await?;
            }
            Ok::<bool, TimescanError>(stopped)
        }
        .await;

        worker_stop.trigger("acquisition cycle finished");
        match worker.await {
            Ok(Ok(moves)) => debug!(moves, "jitter worker finished"),
            Ok(Err(e)) => warn!(error = %e, "jitter worker failed"),
            Err(e) => error!(error = %e, "jitter worker aborted"),
        }

        acquired
    }

    /// Clear the stop signal for new work. A request nothing consumed is
    /// logged before it is dropped.
    fn arm_stop(&self) {
        if self.stop.is_triggered() {
            warn!(reason = ?self.stop.reason(), "discarding stop request raised before this operation");
        }
        self.stop.reset();
    }

    async fn current_controls(&self, mode: StageMode) -> TsResult<Vec<ControlValue>> {
        let mut controls = vec![ControlValue::new(
            self.laser_delay.name(),
            self.laser_delay.read().await?,
        )];
        if mode == StageMode::Tracking {
            controls.push(ControlValue::new(
                self.tt_stage.name(),
                self.tt_stage.read().await?,
            ));
        }
        Ok(controls)
    }

    fn cycle_tags(&self, delay: f64, stage: Option<f64>) -> Vec<ControlValue> {
        let mut tags = vec![ControlValue::new(self.laser_delay.name(), delay)];
        if let Some(position) = stage {
            tags.push(ControlValue::new(self.tt_stage.name(), position));
        }
        tags
    }

    fn monitors(&self) -> Vec<String> {
        vec![self.t0.name().to_string(), self.laser_lock.name().to_string()]
    }

    /// Command the laser delay (and the stage, if given) concurrently and
    /// wait until both settle.
    pub(crate) async fn move_to(
        &self,
        delay: f64,
        stage: Option<f64>,
        stop: Option<&StopSignal>,
    ) -> TsResult<WriteOutcome> {
        let laser = settle(&self.laser_delay, delay, stop);
        let outcome = match stage {
            Some(position) => {
                let (laser, stage) =
                    tokio::try_join!(laser, settle(&self.tt_stage, position, stop))?;
                if laser == WriteOutcome::Interrupted || stage == WriteOutcome::Interrupted {
                    WriteOutcome::Interrupted
                } else {
                    WriteOutcome::Settled
                }
            }
            None => laser.await?,
        };
        Ok(outcome)
    }
}

async fn settle(
    proxy: &ActuatorProxy,
    value: f64,
    stop: Option<&StopSignal>,
) -> TsResult<WriteOutcome> {
    match stop {
        Some(stop) => proxy.write_until(value, stop).await,
        None => proxy.write(value, true).await,
    }
}

/// Move the laser delay to a uniform random point of `window_ns` centred on
/// `centre`, once per `cadence`, until `stop` is raised.
async fn jitter_worker(
    proxy: ActuatorProxy,
    centre: f64,
    window_ns: f64,
    cadence: Duration,
    stop: StopSignal,
) -> TsResult<usize> {
    let mut rng = StdRng::from_entropy();
    let half = window_ns / 2.0;
    let mut moves = 0;

    while !stop.is_triggered() {
        let target = centre + rng.gen_range(-half..=half);
        if proxy.write_until(target, &stop).await? == WriteOutcome::Interrupted {
            break;
        }
        moves += 1;
        debug!(target, "jitter move");
        tokio::select! {
            _ = tokio::time::sleep(cadence) => {}
            _ = stop.triggered() => break,
        }
    }
    Ok(moves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use timescan_core::rc::ChannelNames;
    use timescan_core::units::ns_to_mm;
    use timescan_driver_mock::{MockChannel, MockChannelProvider, MockDaq, MockEventSource};

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.scan.poll_interval_ms = 1;
        settings.scan.convergence_timeout_ms = 200;
        settings.scan.connect_grace_ms = 0;
        settings
    }

    fn rc(travel_offset: f64) -> TimescanRc {
        let mut rc = TimescanRc::new(
            "daq-host",
            0,
            ChannelNames {
                laser_delay: "LAS:DELAY".into(),
                tt_stage_position: "TT:STAGE".into(),
                t0: "LAS:T0".into(),
                laser_lock: "LAS:LOCK".into(),
            },
        );
        rc.calibration.travel_offset = travel_offset;
        rc
    }

    fn hardware(provider: &Arc<MockChannelProvider>) -> Hardware {
        Hardware {
            channels: provider.clone(),
            backend: Arc::new(MockDaq::default()),
            events: Arc::new(MockEventSource::new(Vec::new())),
        }
    }

    async fn controller(travel_offset: f64) -> (Arc<MockChannelProvider>, ScanController) {
        let provider = Arc::new(MockChannelProvider::new());
        let controller = ScanController::connect(
            rc(travel_offset),
            PathBuf::from("unused"),
            fast_settings(),
            hardware(&provider),
        )
        .await
        .unwrap();
        (provider, controller)
    }

    #[test]
    fn test_window_contains_is_inclusive() {
        let window = DelayWindow { lower: -1.0, upper: 1.0 };
        assert!(window.contains(-1.0));
        assert!(window.contains(1.0));
        assert!(!window.contains(1.0 + 1e-12));
    }

    #[tokio::test]
    async fn test_set_delay_moves_both_channels() {
        let (provider, controller) = controller(10.0).await;
        assert_eq!(controller.set_delay(0.002).await.unwrap(), WriteOutcome::Settled);

        let laser = provider.channel(&controller.rc().channels.laser_delay).unwrap();
        let stage = provider.channel(&controller.rc().channels.tt_stage_position).unwrap();
        assert_eq!(laser.value(), 0.002);
        assert!((stage.value() - (10.0 + ns_to_mm(0.002) / 2.0)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_measurable_window_follows_stage() {
        let (_provider, controller) = controller(3.0).await;
        controller.set_delay(0.001).await.unwrap();

        let window = controller.measurable_window().await.unwrap();
        assert!((window.lower - (0.001 - 300e-6)).abs() < 1e-12);
        assert!((window.upper - (0.001 + 300e-6)).abs() < 1e-12);
        assert_eq!(controller.current_delay().await.unwrap(), 0.001);
    }

    #[tokio::test]
    async fn test_status_reads_every_channel() {
        let (provider, controller) = controller(0.0).await;
        provider
            .channel(&controller.rc().channels.laser_lock)
            .unwrap()
            .set_value(1.0);

        let status = controller.status().await.unwrap();
        assert!(status.laser_locked);
        assert_eq!(status.laser_delay, 0.0);
        assert!(!status.calibration.is_calibrated);
    }

    #[tokio::test]
    async fn test_zero_events_rejected() {
        let (_provider, controller) = controller(0.0).await;
        let schedule =
            Schedule::from_times(&[0.0], 1, false, &mut rand::thread_rng()).unwrap();
        let err = controller
            .run_schedule(&schedule, 0, false, StageMode::Tracking)
            .await
            .unwrap_err();
        assert!(matches!(err, TimescanError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_missing_channel_fails_connect() {
        let provider = Arc::new(
            MockChannelProvider::strict().with_channel(MockChannel::new("LAS:DELAY", 0.0)),
        );
        let err = ScanController::connect(
            rc(0.0),
            PathBuf::from("unused"),
            fast_settings(),
            hardware(&provider),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TimescanError::NotConnected(ref msg) if msg.starts_with("TT:STAGE")));
    }
}
