//! CLI entry point for timescan
//!
//! Drives delay scans, jitter runs and timing-diagnostic calibration
//! against simulated hardware built from the controller record.
//!
//! # Usage
//!
//! ```bash
//! timescan init-rc cxi-daq 4 LAS:DELAY CXI:TT:STAGE LAS:T0 LAS:LOCK
//! timescan scan-times -0.001 0 0.001 --events 120 --repeats 2
//! timescan scan-range -0.001 0.001 0.0001 --randomize
//! timescan calibrate
//! ```
//!
//! Ctrl+C interrupts the scan in progress; the acquisition is stopped and
//! released before the process exits. A second Ctrl+C exits at once.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use timescan_core::logging;
use timescan_core::rc::{ChannelNames, TimescanRc};
use timescan_core::settings::{Settings, DEFAULT_SETTINGS_FILE};
use timescan_driver_mock::{
    Convergence, MockChannel, MockChannelProvider, MockDaq, SimulatedTimetool,
};
use timescan_experiment::{
    CalibrationOutcome, DispatchOutcome, Hardware, ScanController, ScanOptions, ScanReport,
    WriteOutcome,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "timescan")]
#[command(about = "Pump-probe delay scans with timing-diagnostic calibration", long_about = None)]
struct Cli {
    /// Controller record [default: ~/.timescanrc]
    #[arg(long, global = true)]
    rc: Option<PathBuf>,

    /// Application settings (TOML)
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new uncalibrated controller record
    InitRc {
        /// Acquisition host
        daq_host: String,
        /// Acquisition platform
        daq_platform: u32,
        /// Laser delay channel
        laser_delay: String,
        /// Timing-diagnostic stage channel
        tt_stage_position: String,
        /// Time-zero channel
        t0: String,
        /// Laser phase-lock channel
        laser_lock: String,
        /// Overwrite an existing record
        #[arg(long)]
        force: bool,
    },

    #[command(flatten)]
    Controller(ControllerCommand),
}

/// Commands that need a connected controller.
#[derive(Subcommand)]
enum ControllerCommand {
    /// Scan from START to STOP (first point past STOP included) in steps of STEP (ns)
    ScanRange {
        #[arg(allow_negative_numbers = true)]
        start: f64,
        #[arg(allow_negative_numbers = true)]
        stop: f64,
        step: f64,
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Scan an explicit list of delays (ns)
    ScanTimes {
        #[arg(required = true, allow_negative_numbers = true)]
        times: Vec<f64>,
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Calibrate the timing diagnostic and persist the fit
    Calibrate,

    /// Move laser delay and diagnostic stage to DELAY (ns)
    SetDelay {
        #[arg(allow_negative_numbers = true)]
        delay: f64,
    },

    /// Acquire one cycle while the delay jitters around its current value
    Jitter {
        /// Events to acquire
        #[arg(long, default_value_t = 100)]
        events: u32,
        /// Do not record to disk
        #[arg(long)]
        no_record: bool,
    },

    /// Show channel values and calibration
    Status,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Events per delay point
    #[arg(long, default_value_t = 100)]
    events: u32,
    /// Times each delay is visited
    #[arg(long, default_value_t = 1)]
    repeats: u32,
    /// Shuffle the schedule
    #[arg(long)]
    randomize: bool,
    /// Do not record to disk
    #[arg(long)]
    no_record: bool,
}

impl From<&ScanArgs> for ScanOptions {
    fn from(args: &ScanArgs) -> Self {
        Self {
            events_per_point: args.events,
            repeats: args.repeats,
            randomize: args.randomize,
            record: !args.no_record,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.settings)
        .with_context(|| format!("loading settings from {}", cli.settings.display()))?;
    logging::init_from_settings(&settings)?;

    let rc_path = match cli.rc {
        Some(path) => path,
        None => TimescanRc::default_path()?,
    };

    match cli.command {
        Commands::InitRc {
            daq_host,
            daq_platform,
            laser_delay,
            tt_stage_position,
            t0,
            laser_lock,
            force,
        } => {
            let channels = ChannelNames {
                laser_delay,
                tt_stage_position,
                t0,
                laser_lock,
            };
            init_rc(&rc_path, TimescanRc::new(daq_host, daq_platform, channels), force)
        }
        Commands::Controller(command) => run(command, rc_path, settings).await,
    }
}

async fn run(command: ControllerCommand, rc_path: PathBuf, settings: Settings) -> Result<()> {
    let rc = TimescanRc::load(&rc_path)
        .with_context(|| format!("loading controller record {}", rc_path.display()))?;
    let hardware = simulated_hardware(&rc);
    let mut controller = ScanController::connect(rc, rc_path, settings, hardware).await?;

    let stop = controller.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Ctrl+C received, interrupting (press again to exit immediately)");
        stop.trigger("ctrl-c");

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("second Ctrl+C, exiting without cleanup");
            std::process::exit(130);
        }
    });

    match command {
        ControllerCommand::ScanRange {
            start,
            stop,
            step,
            scan,
        } => {
            println!("scanning {} --> {} ns in steps of {} ns", start, stop, step);
            let report = controller
                .scan_range(start, stop, step, &ScanOptions::from(&scan))
                .await?;
            print_scan(&report);
        }
        ControllerCommand::ScanTimes { times, scan } => {
            let report = controller
                .scan_times(&times, &ScanOptions::from(&scan))
                .await?;
            print_scan(&report);
        }
        ControllerCommand::Calibrate => calibrate(&mut controller).await?,
        ControllerCommand::SetDelay { delay } => {
            if controller.set_delay(delay).await? == WriteOutcome::Interrupted {
                println!("interrupted before reaching {} ns", delay);
                return Ok(());
            }
            let window = controller.measurable_window().await?;
            println!(
                "delay {} ns, measurable window [{}, {}] ns",
                delay, window.lower, window.upper
            );
        }
        ControllerCommand::Jitter { events, no_record } => {
            let report = controller.jitter(events, !no_record).await?;
            print_scan(&report);
        }
        ControllerCommand::Status => {
            let status = controller.status().await?;
            let delay = controller.current_delay().await?;
            println!("laser delay     {} ns", delay);
            println!("tt stage        {} mm", status.tt_stage_position);
            println!("t0              {}", status.t0);
            println!("laser locked    {}", status.laser_locked);
            println!(
                "window          [{}, {}] ns",
                status.window.lower, status.window.upper
            );
            let [a, b, c] = status.calibration.fit_coefficients;
            println!(
                "calibration     [{} {} {}] (calibrated: {})",
                a, b, c, status.calibration.is_calibrated
            );
        }
    }

    Ok(())
}

fn init_rc(path: &Path, rc: TimescanRc, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    rc.save(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

/// Mock channels, DAQ and a simulated timing diagnostic keyed on `rc`'s
/// channel names.
fn simulated_hardware(rc: &TimescanRc) -> Hardware {
    let provider = MockChannelProvider::new();
    provider.insert(
        MockChannel::builder(rc.channels.tt_stage_position.as_str())
            .initial_value(rc.calibration.travel_offset)
            .convergence(Convergence::AfterReads(3))
            .build(),
    );
    provider.insert(MockChannel::new(rc.channels.laser_lock.as_str(), 1.0));

    let daq = Arc::new(MockDaq::default().with_cycle_time(Duration::from_millis(20)));
    let timetool =
        SimulatedTimetool::new(Arc::clone(&daq), rc.channels.laser_delay.as_str()).with_noise(1.5);

    info!("using simulated hardware");
    Hardware {
        channels: Arc::new(provider),
        backend: daq,
        events: Arc::new(timetool),
    }
}

async fn calibrate(controller: &mut ScanController) -> Result<()> {
    println!("calibrating...");
    match controller.calibrate().await? {
        CalibrationOutcome::Completed(report) => {
            let [a, b, c] = report.coefficients;
            println!("run {}", report.run_number);
            println!(
                "accepted {} / {} events",
                report.samples_accepted, report.samples_total
            );
            println!("fit: delay = {} + {} * px + {} * px^2", a, b, c);
            println!(
                "R^2 {:.6}, rmse {:.3e} ns",
                report.diagnostics.r_squared, report.diagnostics.rmse
            );
            println!("{:>6} {:>8} {:>12} {:>12}", "bin", "count", "pixel", "rmse");
            for bin in &report.diagnostics.bins {
                println!(
                    "{:>6} {:>8} {:>12.2} {:>12.3e}",
                    bin.bin, bin.count, bin.mean_pixel, bin.rmse
                );
            }
            println!("samples written to {}", report.export_path.display());
            if let DispatchOutcome::Failed { manual_command } = &report.dispatch {
                println!("automatic analysis submission failed, run on any analysis host:");
                println!("\t{}", manual_command);
            }
        }
        CalibrationOutcome::Interrupted { run_number } => {
            println!("calibration interrupted (run {}), calibration unchanged", run_number);
        }
    }
    Ok(())
}

fn print_scan(report: &ScanReport) {
    for cycle in &report.cycles {
        match cycle.stage_position {
            Some(stage) => println!(
                "cycle {:>4}  delay {:>12} ns  stage {:.6} mm",
                cycle.index, cycle.delay, stage
            ),
            None => println!("cycle {:>4}  delay {:>12} ns", cycle.index, cycle.delay),
        }
    }
    if report.interrupted {
        println!("interrupted after {} cycles", report.cycles.len());
    }
    println!("run {}", report.run_number);
}
