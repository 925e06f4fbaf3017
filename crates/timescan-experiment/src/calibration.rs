//! Timing-diagnostic calibration.
//!
//! A calibration scans a dense symmetric delay window with the stage held
//! still, harvests the recorded (pixel, delay) samples, fits
//! `delay = a + b*pixel + c*pixel^2`, and persists the coefficients.
//!
//! Calibration state changes only after the fit succeeds and the rc file
//! has been written. The remote analysis job is submitted last, so a slow
//! or unreachable analysis host never holds up the new calibration.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use timescan_core::capabilities::{DiagnosticEvent, RunNumber};
use timescan_core::error::{DriverError, DriverErrorKind, TsResult};
use timescan_core::settings::{AcceptanceSettings, Bounds, CalibrationSettings};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{self, DispatchOutcome};
use crate::fit::{fit_errors, fit_quadratic, FitDiagnostics};
use crate::scan::{ScanController, StageMode};
use crate::schedule::{linspace, Schedule};

/// A successful calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    /// Run the samples were recorded in
    pub run_number: RunNumber,
    /// `[a, b, c]` now in use
    pub coefficients: [f64; 3],
    /// Fit quality
    pub diagnostics: FitDiagnostics,
    /// Events read from the run
    pub samples_total: usize,
    /// Events that passed the acceptance windows
    pub samples_accepted: usize,
    /// Raw-sample table
    pub export_path: PathBuf,
    /// Remote analysis submission
    pub dispatch: DispatchOutcome,
}

/// How a calibration call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    /// Fit succeeded and was persisted.
    Completed(CalibrationReport),
    /// The scan was stopped; calibration state is unchanged.
    Interrupted {
        /// Run the partial scan was recorded in
        run_number: RunNumber,
    },
}

#[derive(Debug, Default)]
struct Harvest {
    total: usize,
    pixels: Vec<f64>,
    delays: Vec<f64>,
}

impl ScanController {
    /// Run a calibration scan and refit the pixel-to-time curve.
    ///
    /// # Errors
    /// Scan errors as for [`run_schedule`](Self::run_schedule), plus
    /// `CalibrationInsufficientData` and `CalibrationFitFailure` from the
    /// fit. On any error the calibration state and rc file are left as they
    /// were.
    #[instrument(skip(self), err)]
    pub async fn calibrate(&mut self) -> TsResult<CalibrationOutcome> {
        let cal = self.settings.calibration.clone();
        let schedule = {
            let mut rng = rand::thread_rng();
            let delays = linspace(-cal.window_ns, cal.window_ns, cal.points);
            Schedule::from_times(&delays, 1, false, &mut rng)?
        };
        info!(
            points = cal.points,
            window_ns = cal.window_ns,
            events_per_point = cal.events_per_point,
            "calibrating"
        );

        let scan = self
            .run_schedule(&schedule, cal.events_per_point, true, StageMode::Static)
            .await?;
        let run = scan.run_number;
        if scan.interrupted {
            warn!(run = %run, "calibration scan interrupted, calibration unchanged");
            return Ok(CalibrationOutcome::Interrupted { run_number: run });
        }

        let harvest = self.harvest(&cal, run).await?;
        info!(
            run = %run,
            total = harvest.total,
            accepted = harvest.pixels.len(),
            "calibration samples harvested"
        );
        let export_path = export_samples(&cal.export_dir, &cal.experiment, run, &harvest).await?;

        let coefficients = fit_quadratic(&harvest.pixels, &harvest.delays)?;
        let diagnostics = fit_errors(&harvest.pixels, &harvest.delays, &coefficients, cal.bin_size)?;

        let mut rc = self.rc.clone();
        rc.calibration.fit_coefficients = coefficients;
        rc.calibration.is_calibrated = true;
        rc.save(&self.rc_path)?;
        self.rc = rc;

        info!(
            run = %run,
            a = coefficients[0],
            b = coefficients[1],
            c = coefficients[2],
            r_squared = diagnostics.r_squared,
            rmse = diagnostics.rmse,
            "calibration updated"
        );

        let dispatch = dispatch::submit(
            &self.settings.remote,
            &cal.experiment,
            run,
            &self.rc.channels.laser_delay,
            &self.stop,
        )
        .await;

        Ok(CalibrationOutcome::Completed(CalibrationReport {
            run_number: run,
            coefficients,
            diagnostics,
            samples_total: harvest.total,
            samples_accepted: harvest.pixels.len(),
            export_path,
            dispatch,
        }))
    }

    async fn harvest(&self, cal: &CalibrationSettings, run: RunNumber) -> TsResult<Harvest> {
        let source = format!("{}/r{:04}", cal.experiment, run.0);
        let mut stream = self.events.events(&cal.experiment, run);
        let mut harvest = Harvest::default();

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| {
                DriverError::from_anyhow(source.as_str(), DriverErrorKind::EventStream, &e)
            })?;
            harvest.total += 1;
            if accepts(&cal.acceptance, &event) {
                harvest.pixels.push(event.pixel);
                harvest.delays.push(event.delay);
            }
        }

        debug!(
            rejected = harvest.total - harvest.pixels.len(),
            "acceptance windows applied"
        );
        Ok(harvest)
    }
}

/// Whether `event` passes every configured acceptance window.
///
/// A window on a field the event does not carry rejects the event.
pub fn accepts(acceptance: &AcceptanceSettings, event: &DiagnosticEvent) -> bool {
    fn within(bounds: Option<Bounds>, value: Option<f64>) -> bool {
        match bounds {
            None => true,
            Some(bounds) => value.is_some_and(|v| bounds.contains(v)),
        }
    }

    event.pixel.is_finite()
        && event.delay.is_finite()
        && within(acceptance.pixel, Some(event.pixel))
        && within(acceptance.amplitude, event.amplitude)
        && within(acceptance.fwhm, event.fwhm)
}

/// `<root>/<experiment>/r<run:04>_timetool_calib.txt`
pub fn export_path(root: &Path, experiment: &str, run: RunNumber) -> PathBuf {
    root.join(experiment)
        .join(format!("r{:04}_timetool_calib.txt", run.0))
}

async fn export_samples(
    root: &Path,
    experiment: &str,
    run: RunNumber,
    harvest: &Harvest,
) -> TsResult<PathBuf> {
    let path = export_path(root, experiment, run);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut table = String::from("# pixel delay_ns\n");
    for (pixel, delay) in harvest.pixels.iter().zip(&harvest.delays) {
        table.push_str(&format!("{} {}\n", pixel, delay));
    }
    tokio::fs::write(&path, table).await?;

    debug!(path = %path.display(), samples = harvest.pixels.len(), "calibration samples exported");
    Ok(path)
}
