mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use liblablogger::channel_list::{ChannelList, MetaChannel};
use liblablogger::config::Config;
use liblablogger::context::RunControl;
use liblablogger::instrument::Generation;
use liblablogger::process::{process_with_connector, RunMode};
use liblablogger::simulator::SimulatedMassSpec;
use liblablogger::status::{OperatingMode, StatusBoard};

fn fast_config() -> Config {
    let mut config = Config::default();
    config.chamber = CHAMBER.to_string();
    config.saver.backoff_start_ms = 10;
    config.saver.backoff_cap_ms = 50;
    config.scheduler.channel_settle_ms = 1;
    config.scheduler.cycle_pause_ms = 1;
    config.scheduler.scan_poll_ms = 5;
    config.pollers.period_ms = 50;
    config.pollers.udp_timeout_ms = 200;
    config
}

fn pressure_list(port: u16) -> ChannelList {
    ChannelList {
        meta: vec![MetaChannel {
            label: String::from("Pirani"),
            host: String::from("127.0.0.1"),
            port,
            command: String::from("read_pressure"),
            repeat_interval: None,
            measurement_type: None,
        }],
        ..Default::default()
    }
}

#[test]
fn meta_only_run_until_stopped() {
    let (_dir, db) = temp_database();
    let port = udp_responder(&["1.0e-6"]);
    let control = Arc::new(RunControl::new());
    let board = Arc::new(StatusBoard::new());

    let stopper = control.clone();
    let watcher = board.clone();
    let stop_thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(400));
        let mode = watcher.mode();
        stopper.request_stop();
        mode
    });

    let summary = process_with_connector(
        &fast_config(),
        Box::new(sqlite(&db)),
        &pressure_list(port),
        SimulatedMassSpec::new(Generation::Qmg422),
        RunMode::MetaOnly,
        control,
        board.clone(),
    )
    .unwrap();
    assert_eq!(stop_thread.join().unwrap(), OperatingMode::MetaOnly);
    assert_eq!(board.mode(), OperatingMode::Idle);
    assert_eq!(summary.pollers, 1);
    assert_eq!(summary.unsaved, 0);
    assert!(summary.mass_time.is_none());

    let headers = headers(&db);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].1, 5);
    assert!(sample_count(&db) >= 2);
}

#[test]
fn mass_time_run_with_pollers() {
    let (_dir, db) = temp_database();
    let port = udp_responder(&["1.0e-6"]);
    let control = Arc::new(RunControl::new());
    let mut channels = pressure_list(port);
    channels.ms = vec![ms_channel("M18", 18.0, 5), ms_channel("M28", 28.0, 5)];
    let instrument =
        SimulatedMassSpec::new(Generation::Qmg422).stop_after_cycles(20, control.clone());

    let summary = process_with_connector(
        &fast_config(),
        Box::new(sqlite(&db)),
        &channels,
        instrument,
        RunMode::MassTime,
        control,
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    let mass_time = summary.mass_time.unwrap();
    assert_eq!(mass_time.cycles, 20);
    assert_eq!(mass_time.samples, 40);
    assert_eq!(summary.unsaved, 0);

    let headers = headers(&db);
    assert_eq!(headers.len(), 3);
    let ms_samples: usize = mass_time
        .sessions
        .iter()
        .map(|session| samples(&db, *session).len())
        .sum();
    assert_eq!(ms_samples, 40);
}

#[test]
fn mass_scan_run_returns_on_its_own() {
    let (_dir, db) = temp_database();
    let summary = process_with_connector(
        &fast_config(),
        Box::new(sqlite(&db)),
        &ChannelList::default(),
        SimulatedMassSpec::new(Generation::Qmg422).with_sweep(200, 1),
        RunMode::MassScan {
            first: 0.0,
            width: 100.0,
            comment: String::from("overview"),
        },
        Arc::new(RunControl::new()),
        Arc::new(StatusBoard::new()),
    )
    .unwrap();
    let scan = summary.scan.unwrap();
    assert_eq!(scan.samples, 200);
    assert_eq!(summary.pollers, 0);
    assert_eq!(sample_count(&db), 200);
}
