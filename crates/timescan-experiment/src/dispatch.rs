//! Remote submission of the calibration analysis job.
//!
//! The job runs on an analysis host reached through a chain of SSH hops.
//! Submission never fails a calibration: on error, timeout or stop the
//! command to run by hand is returned instead.

use std::process::Stdio;

use timescan_core::capabilities::RunNumber;
use timescan_core::settings::RemoteSettings;
use timescan_core::stop_signal::StopSignal;
use tokio::process::Command;
use tracing::{info, warn};

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Remote dispatch is turned off.
    Disabled,
    /// The job ran and exited successfully.
    Submitted,
    /// The job could not be submitted; run `manual_command` on an analysis host.
    Failed {
        /// Analysis command line
        manual_command: String,
    },
}

/// Analysis command as run on the analysis host.
pub fn analysis_command(
    remote: &RemoteSettings,
    experiment: &str,
    run: RunNumber,
    laser_channel: &str,
) -> Vec<String> {
    vec![
        remote.python.clone(),
        remote.script.clone(),
        "-e".into(),
        experiment.to_string(),
        "-r".into(),
        run.0.to_string(),
        "-l".into(),
        laser_channel.to_string(),
    ]
}

/// Full argv: `ssh -A <hop>` for every hop, then the analysis command.
pub fn build_command(
    remote: &RemoteSettings,
    experiment: &str,
    run: RunNumber,
    laser_channel: &str,
) -> Vec<String> {
    let mut argv: Vec<String> = remote
        .hops
        .iter()
        .flat_map(|hop| ["ssh".to_string(), "-A".to_string(), hop.clone()])
        .collect();
    argv.extend(analysis_command(remote, experiment, run, laser_channel));
    argv
}

/// Submit the analysis job for `run` and forward its output to the log.
///
/// The child is killed if it outlives `remote.timeout()` or `stop` is
/// raised first.
pub async fn submit(
    remote: &RemoteSettings,
    experiment: &str,
    run: RunNumber,
    laser_channel: &str,
    stop: &StopSignal,
) -> DispatchOutcome {
    if !remote.enabled {
        return DispatchOutcome::Disabled;
    }

    let manual_command = analysis_command(remote, experiment, run, laser_channel).join(" ");
    let argv = build_command(remote, experiment, run, laser_channel);
    let Some((program, args)) = argv.split_first() else {
        return DispatchOutcome::Failed { manual_command };
    };

    info!(command = %manual_command, hops = ?remote.hops, "submitting calibration analysis");

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = tokio::select! {
        biased;
        _ = stop.triggered() => {
            warn!(
                run = %run,
                reason = ?stop.reason(),
                command = %manual_command,
                "analysis submission abandoned on stop, run the command on any analysis host"
            );
            return DispatchOutcome::Failed { manual_command };
        }
        res = tokio::time::timeout(remote.timeout(), command.output()) => res,
    };

    match output {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            for line in stdout.lines().chain(stderr.lines()) {
                info!(target: "timescan::remote", "{}", line.trim());
            }
            if output.status.success() {
                DispatchOutcome::Submitted
            } else {
                warn!(
                    run = %run,
                    status = %output.status,
                    command = %manual_command,
                    "automatic submission of analysis job failed, run the command on any analysis host"
                );
                DispatchOutcome::Failed { manual_command }
            }
        }
        Ok(Err(e)) => {
            warn!(
                run = %run,
                error = %e,
                command = %manual_command,
                "automatic submission of analysis job failed, run the command on any analysis host"
            );
            DispatchOutcome::Failed { manual_command }
        }
        Err(_) => {
            warn!(
                run = %run,
                timeout_ms = remote.timeout_ms,
                command = %manual_command,
                "analysis submission timed out, run the command on any analysis host"
            );
            DispatchOutcome::Failed { manual_command }
        }
    }
}
