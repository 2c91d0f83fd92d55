mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use liblablogger::channel_list::RunSettings;
use liblablogger::error::SchedulerError;
use liblablogger::instrument::Generation;
use liblablogger::saver::SaverState;
use liblablogger::scheduler::ChannelScheduler;
use liblablogger::session::{SessionId, SessionMetadata};
use liblablogger::simulator::SimulatedMassSpec;

#[test]
fn outage_loses_nothing() {
    let (_dir, db) = temp_database();
    let (connector, online) = FlakyConnector::new(sqlite(&db));
    let (mut saver, ctx) = start(Box::new(connector));
    let session = ctx
        .registry
        .open_session(SessionMetadata::meta_channel(
            "Pirani",
            "2024-05-01 12:00:00",
            "",
            None,
        ))
        .unwrap();

    for i in 0..50 {
        ctx.registry.append(session, i as f64, 1.0);
    }
    ctx.saver.wait_for_drain();

    online.store(false, Ordering::SeqCst);
    for i in 50..100 {
        ctx.registry.append(session, i as f64, 1.0);
    }
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(ctx.saver.state(), SaverState::Reconnecting);
    assert_eq!(ctx.saver.queue_depth(), 50);
    assert!(ctx
        .board
        .render()
        .iter()
        .any(|line| line.contains("RECONNECTING")));

    online.store(true, Ordering::SeqCst);
    ctx.saver.wait_for_drain();
    assert!(ctx.saver.stats().reconnects() >= 1);
    assert_eq!(saver.stop(), 0);

    let points = samples(&db, session);
    assert_eq!(points.len(), 100);
    for (i, (x, _)) in points.iter().enumerate() {
        assert_eq!(*x, i as f64);
    }
}

#[test]
fn outage_during_mass_time_run() {
    let (_dir, db) = temp_database();
    let (connector, online) = FlakyConnector::new(sqlite(&db));
    let (mut saver, ctx) = start(Box::new(connector));
    let mut settings = fast_scheduler_settings();
    settings.cycle_pause = Duration::from_millis(10);
    let mut scheduler = ChannelScheduler::new(
        SimulatedMassSpec::new(Generation::Qmg422),
        ctx.clone(),
        settings,
    );
    scheduler
        .configure(
            RunSettings::default(),
            &[ms_channel("M18", 18.0, 5), ms_channel("M28", 28.0, 5)],
        )
        .unwrap();
    let run = std::thread::spawn(move || scheduler.run_mass_time("2024-05-01 12:00:00"));

    std::thread::sleep(Duration::from_millis(150));
    online.store(false, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(ctx.saver.state(), SaverState::Reconnecting);
    assert!(ctx.saver.queue_depth() > 0);
    online.store(true, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(150));
    ctx.control.request_stop();

    let summary = run.join().unwrap().unwrap();
    assert!(summary.cycles > 0);
    assert_eq!(summary.skipped_cycles, 0);
    ctx.saver.wait_for_drain();
    assert_eq!(saver.stop(), 0);

    assert_eq!(sample_count(&db), (summary.cycles * 2) as i64);
    for session in summary.sessions.iter() {
        let points = samples(&db, *session);
        assert_eq!(points.len(), summary.cycles);
        assert!(points.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}

#[test]
fn mass_time_fails_when_sessions_cannot_be_opened() {
    let (_dir, db) = temp_database();
    let (mut saver, ctx) = start(Box::new(sqlite(&db)));
    saver.stop();
    let mut scheduler = ChannelScheduler::new(
        SimulatedMassSpec::new(Generation::Qmg422),
        ctx.clone(),
        fast_scheduler_settings(),
    );
    scheduler
        .configure(RunSettings::default(), &[ms_channel("M18", 18.0, 5)])
        .unwrap();
    assert!(matches!(
        scheduler.run_mass_time("2024-05-01 12:00:00"),
        Err(SchedulerError::Session(_))
    ));
    assert_eq!(scheduler.instrument().cycles(), 0);
    assert!(headers(&db).is_empty());
    assert_eq!(sample_count(&db), 0);
}

#[test]
fn stop_drains_pending_items() {
    let (_dir, db) = temp_database();
    let (mut saver, ctx) = start(Box::new(sqlite(&db)));
    let session = ctx
        .registry
        .open_session(SessionMetadata::meta_channel(
            "TC",
            "2024-05-01 12:00:00",
            "",
            None,
        ))
        .unwrap();
    for i in 0..100 {
        ctx.registry.append(session, i as f64, i as f64 * 2.0);
    }
    assert_eq!(saver.stop(), 0);
    assert_eq!(samples(&db, session).len(), 100);
}

#[test]
fn idle_worker_stays_connected() {
    let (_dir, db) = temp_database();
    let (mut saver, ctx) = start(Box::new(sqlite(&db)));
    ctx.registry.append(SessionId(1), 0.0, 0.0);
    ctx.saver.wait_for_drain();
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(ctx.saver.state(), SaverState::Connected);
    // the orphan sample was rejected by the foreign key
    assert_eq!(ctx.saver.stats().rejected(), 1);
    assert_eq!(saver.stop(), 0);
}

#[test]
fn session_allocation_fails_when_saver_gone() {
    let (_dir, db) = temp_database();
    let (mut saver, ctx) = start(Box::new(sqlite(&db)));
    saver.stop();
    let result = ctx.registry.open_session(SessionMetadata::meta_channel(
        "late",
        "2024-05-01 12:00:00",
        "",
        None,
    ));
    assert!(result.is_err());
}
