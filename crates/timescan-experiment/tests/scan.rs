//! Scan execution against mock hardware.

mod common;

use std::time::Duration;

use common::{Rig, LASER, LOCK, STAGE, T0, TRAVEL_OFFSET};
use timescan_core::capabilities::RunNumber;
use timescan_core::error::TimescanError;
use timescan_core::units::stage_position_for_delay;
use timescan_driver_mock::{Convergence, DaqCall, MockChannel, MockDaq};
use timescan_experiment::{ScanOptions, WriteOutcome};

fn options(events_per_point: u32, repeats: u32) -> ScanOptions {
    ScanOptions {
        events_per_point,
        repeats,
        randomize: false,
        record: true,
    }
}

#[tokio::test]
async fn scan_times_visits_every_delay_in_order() {
    let rig = Rig::new(MockDaq::new(7));
    let controller = rig.controller().await;

    let report = controller
        .scan_times(&[-0.001, 0.0, 0.001], &options(10, 2))
        .await
        .unwrap();

    assert_eq!(report.run_number, RunNumber(7));
    assert!(!report.interrupted);
    let delays: Vec<f64> = report.cycles.iter().map(|c| c.delay).collect();
    assert_eq!(delays, vec![-0.001, -0.001, 0.0, 0.0, 0.001, 0.001]);
    assert!(report.cycles.iter().all(|c| c.run == RunNumber(7)));

    assert_eq!(rig.daq.configure_count(), 1);
    assert_eq!(rig.daq.disconnect_count(), 1);
    assert_eq!(rig.daq.stop_count(), 0);

    let cycles = rig.daq.cycles();
    assert_eq!(cycles.len(), 6);
    for (cycle, record) in cycles.iter().zip(&report.cycles) {
        assert!(cycle.completed);
        assert_eq!(cycle.events, 10);
        assert_eq!(cycle.control(LASER), Some(record.delay));
        let expected_stage = stage_position_for_delay(record.delay, TRAVEL_OFFSET);
        assert_eq!(cycle.control(STAGE), Some(expected_stage));
        assert_eq!(record.stage_position, Some(expected_stage));
    }

    assert_eq!(rig.channel(LASER).value(), 0.001);
    assert_eq!(
        rig.channel(STAGE).value(),
        stage_position_for_delay(0.001, TRAVEL_OFFSET)
    );
}

#[tokio::test]
async fn configure_carries_current_values_and_monitors() {
    let rig = Rig::new(MockDaq::new(1));
    rig.insert(MockChannel::new(LASER, 0.0004));
    rig.insert(MockChannel::new(STAGE, 7.25));
    let controller = rig.controller().await;

    controller.scan_times(&[0.0], &options(3, 1)).await.unwrap();

    let calls = rig.daq.calls();
    let DaqCall::Configure(config) = &calls[0] else {
        panic!("first call was {:?}", calls[0]);
    };
    assert!(config.record);
    assert_eq!(config.events, 3);
    assert_eq!(config.controls.len(), 2);
    assert_eq!(config.controls[0].name, LASER);
    assert_eq!(config.controls[0].value, 0.0004);
    assert_eq!(config.controls[1].name, STAGE);
    assert_eq!(config.controls[1].value, 7.25);
    assert_eq!(config.monitors, vec![T0.to_string(), LOCK.to_string()]);
    assert_eq!(calls.last(), Some(&DaqCall::Disconnect));
}

#[tokio::test]
async fn scan_range_includes_stop() {
    let rig = Rig::new(MockDaq::new(2));
    let controller = rig.controller().await;

    let report = controller
        .scan_range(-0.001, 0.001, 0.0005, &options(1, 1))
        .await
        .unwrap();

    let delays: Vec<f64> = report.cycles.iter().map(|c| c.delay).collect();
    assert_eq!(delays.len(), 5);
    assert_eq!(delays[0], -0.001);
    assert_eq!(delays[4], 0.001);
}

#[tokio::test]
async fn unrecorded_scan_reports_run_zero() {
    let rig = Rig::new(MockDaq::new(30));
    let controller = rig.controller().await;

    let mut opts = options(2, 1);
    opts.record = false;
    let report = controller.scan_times(&[0.0], &opts).await.unwrap();
    assert_eq!(report.run_number, RunNumber(0));
}

#[tokio::test]
async fn invalid_schedule_never_touches_daq() {
    let rig = Rig::new(MockDaq::new(1));
    let controller = rig.controller().await;

    let err = controller
        .scan_range(0.001, -0.001, 0.0001, &options(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TimescanError::InvalidSchedule(_)));

    let err = controller.scan_times(&[0.0], &options(1, 0)).await.unwrap_err();
    assert!(matches!(err, TimescanError::InvalidSchedule(_)));

    assert!(rig.daq.calls().is_empty());
}

#[tokio::test]
async fn stuck_stage_times_out_and_releases_daq() {
    let rig = Rig::new(MockDaq::new(1));
    rig.insert(
        MockChannel::builder(STAGE)
            .convergence(Convergence::Never { offset: 1e-3 })
            .build(),
    );
    let controller = rig.controller().await;

    let err = controller
        .scan_times(&[0.0, 0.001], &options(5, 1))
        .await
        .unwrap_err();

    match err {
        TimescanError::ActuatorTimeout { channel, .. } => assert_eq!(channel, STAGE),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(rig.daq.begin_count(), 0);
    assert_eq!(rig.daq.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn interrupt_stops_cycle_and_releases_daq() {
    let rig = Rig::new(MockDaq::new(11).with_cycle_time(Duration::from_millis(50)));
    let controller = rig.controller().await;

    let stop = controller.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        stop.trigger("operator interrupt");
    });

    let report = controller
        .scan_times(&[0.0, 0.0001, 0.0002, 0.0003, 0.0004], &options(10, 1))
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.run_number, RunNumber(11));
    assert_eq!(report.cycles.len(), 2);
    assert_eq!(rig.daq.stop_count(), 1);
    assert_eq!(rig.daq.disconnect_count(), 1);

    let cycles = rig.daq.cycles();
    assert_eq!(cycles.len(), 3);
    assert!(!cycles[2].completed);
}

#[tokio::test(start_paused = true)]
async fn interrupt_ends_set_delay_before_timeout() {
    let rig = Rig::new(MockDaq::new(1));
    rig.insert(
        MockChannel::builder(STAGE)
            .convergence(Convergence::Never { offset: 1e-3 })
            .build(),
    );
    let controller = rig.controller().await;

    let stop = controller.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.trigger("operator interrupt");
    });

    let started = tokio::time::Instant::now();
    let outcome = controller.set_delay(0.001).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Interrupted);
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(
        rig.channel(STAGE).writes(),
        vec![stage_position_for_delay(0.001, TRAVEL_OFFSET)]
    );
    assert!(rig.daq.calls().is_empty());
}

#[tokio::test]
async fn next_scan_clears_previous_interrupt() {
    let rig = Rig::new(MockDaq::new(1));
    let controller = rig.controller().await;

    controller.stop_signal().trigger("left over");
    let report = controller.scan_times(&[0.0], &options(1, 1)).await.unwrap();
    assert!(!report.interrupted);
    assert_eq!(report.cycles.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn jitter_restores_delay() {
    let rig = Rig::new(MockDaq::new(20).with_cycle_time(Duration::from_millis(60)));
    rig.insert(MockChannel::new(LASER, 0.002));
    let controller = rig.controller().await;

    let report = controller.jitter(50, true).await.unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.run_number, RunNumber(20));
    assert_eq!(report.cycles.len(), 1);

    let laser = rig.channel(LASER);
    assert_eq!(laser.value(), 0.002);
    let writes = laser.writes();
    assert!(writes.len() >= 3, "only {} writes", writes.len());
    assert_eq!(*writes.last().unwrap(), 0.002);
    // 500 fs full width
    for w in &writes[..writes.len() - 1] {
        assert!((w - 0.002).abs() <= 250e-6 + 1e-15, "write {w} outside window");
    }

    assert_eq!(rig.daq.begin_count(), 1);
    assert_eq!(rig.daq.disconnect_count(), 1);
    assert!(rig.channel(STAGE).writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupted_jitter_still_restores_delay() {
    let rig = Rig::new(MockDaq::new(3).with_cycle_time(Duration::from_secs(10)));
    rig.insert(MockChannel::new(LASER, -0.0005));
    let controller = rig.controller().await;

    let stop = controller.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.trigger("operator interrupt");
    });

    let report = controller.jitter(1000, false).await.unwrap();
    assert!(report.interrupted);
    assert!(report.cycles.is_empty());
    assert_eq!(rig.channel(LASER).value(), -0.0005);
    assert_eq!(rig.daq.stop_count(), 1);
    assert_eq!(rig.daq.disconnect_count(), 1);
}

#[tokio::test]
async fn begin_failure_releases_daq() {
    use timescan_driver_mock::{ErrorConfig, ErrorScenario};

    let rig = Rig::new(MockDaq::new(1).with_error_config(ErrorConfig::scenario(
        ErrorScenario::FailAfterN {
            operation: "begin",
            count: 1,
        },
    )));
    let controller = rig.controller().await;

    let err = controller
        .scan_times(&[0.0, 0.001], &options(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, TimescanError::Driver(_)));
    assert_eq!(rig.daq.disconnect_count(), 1);
}
