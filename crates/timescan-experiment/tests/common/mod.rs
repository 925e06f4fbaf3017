//! Shared fixtures: a scan controller wired to mock hardware.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use timescan_core::capabilities::EventSource;
use timescan_core::rc::{ChannelNames, TimescanRc};
use timescan_core::settings::Settings;
use timescan_driver_mock::{MockChannel, MockChannelProvider, MockDaq, MockEventSource};
use timescan_experiment::{Hardware, ScanController};

pub const LASER: &str = "LAS:FS5:VIT:FS_TGT_TIME_DIAL";
pub const STAGE: &str = "CXI:LAS:MMN:04";
pub const T0: &str = "LAS:FS5:VIT:FS_TGT_TIME_OFFSET";
pub const LOCK: &str = "LAS:FS5:VIT:PHASE_LOCKED";

pub const TRAVEL_OFFSET: f64 = 5.0;

pub struct Rig {
    pub provider: Arc<MockChannelProvider>,
    pub daq: Arc<MockDaq>,
    pub settings: Settings,
    pub rc_path: PathBuf,
    pub dir: TempDir,
}

impl Rig {
    pub fn new(daq: MockDaq) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let rc_path = dir.path().join("timescanrc");

        let mut rc = TimescanRc::new(
            "cxi-daq",
            4,
            ChannelNames {
                laser_delay: LASER.into(),
                tt_stage_position: STAGE.into(),
                t0: T0.into(),
                laser_lock: LOCK.into(),
            },
        );
        rc.calibration.travel_offset = TRAVEL_OFFSET;
        rc.save(&rc_path).unwrap();

        let mut settings = Settings::default();
        settings.scan.poll_interval_ms = 1;
        settings.scan.convergence_timeout_ms = 50;
        settings.scan.connect_grace_ms = 0;
        settings.jitter.cadence_ms = 5;
        settings.calibration.experiment = "cxi12345".into();
        settings.calibration.events_per_point = 5;
        settings.calibration.export_dir = dir.path().join("calib");

        Self {
            provider: Arc::new(MockChannelProvider::new()),
            daq: Arc::new(daq),
            settings,
            rc_path,
            dir,
        }
    }

    pub fn channel(&self, name: &str) -> Arc<MockChannel> {
        self.provider.channel(name).unwrap()
    }

    pub fn insert(&self, channel: MockChannel) {
        self.provider.insert(channel);
    }

    pub fn rc_text(&self) -> String {
        std::fs::read_to_string(&self.rc_path).unwrap()
    }

    pub async fn controller(&self) -> ScanController {
        self.controller_with_events(Arc::new(MockEventSource::new(Vec::new())))
            .await
    }

    pub async fn controller_with_events(&self, events: Arc<dyn EventSource>) -> ScanController {
        let hardware = Hardware {
            channels: self.provider.clone(),
            backend: self.daq.clone(),
            events,
        };
        let rc = TimescanRc::load(&self.rc_path).unwrap();
        ScanController::connect(rc, self.rc_path.clone(), self.settings.clone(), hardware)
            .await
            .unwrap()
    }
}
