#![allow(dead_code)]
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use liblablogger::autorange::RangeCode;
use liblablogger::channel_list::MsChannel;
use liblablogger::context::{AcquisitionContext, RunControl};
use liblablogger::error::StoreError;
use liblablogger::saver::{DataSaver, SaverSettings};
use liblablogger::scheduler::SchedulerSettings;
use liblablogger::session::{Sample, SessionId, SessionMetadata};
use liblablogger::sqlite_store::SqliteConnector;
use liblablogger::status::StatusBoard;
use liblablogger::store::{Connection, Connector, Interrupt};

pub const CHAMBER: &str = "test";

pub fn temp_database() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lablogger.sqlite");
    (dir, path)
}

pub fn sqlite(path: &Path) -> SqliteConnector {
    SqliteConnector::new(path, CHAMBER, Duration::from_secs(1)).unwrap()
}

pub fn fast_saver_settings() -> SaverSettings {
    SaverSettings {
        execute_timeout: Duration::from_millis(500),
        backoff_start: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(50),
    }
}

pub fn fast_scheduler_settings() -> SchedulerSettings {
    SchedulerSettings {
        channel_settle: Duration::from_millis(1),
        cycle_pause: Duration::from_millis(1),
        scan_poll: Duration::from_millis(5),
        ..Default::default()
    }
}

/// Start a saver on `connector` and build a context around it
pub fn start(connector: Box<dyn Connector>) -> (DataSaver, AcquisitionContext) {
    let saver = DataSaver::start(connector, fast_saver_settings()).unwrap();
    let ctx = AcquisitionContext::new(
        saver.handle(),
        Duration::from_secs(5),
        Arc::new(RunControl::new()),
        Arc::new(StatusBoard::new()),
    );
    (saver, ctx)
}

pub fn ms_channel(label: &str, mass: f64, range: i8) -> MsChannel {
    MsChannel {
        masslabel: label.to_string(),
        mass,
        speed: 11,
        amp_range: RangeCode(range),
        enabled: true,
    }
}

fn open(path: &Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).unwrap()
}

/// (id, type, label) of every header, in id order
pub fn headers(path: &Path) -> Vec<(i64, u8, String)> {
    let conn = open(path);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, type, mass_label FROM measurements_{CHAMBER} ORDER BY id"
        ))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// (x, y) of every sample of a session, in insert order
pub fn samples(path: &Path, session: SessionId) -> Vec<(f64, f64)> {
    let conn = open(path);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT x, y FROM xy_values_{CHAMBER} WHERE measurement = ?1 ORDER BY id"
        ))
        .unwrap();
    stmt.query_map([session.0], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

pub fn sample_count(path: &Path) -> i64 {
    open(path)
        .query_row(
            &format!("SELECT COUNT(*) FROM xy_values_{CHAMBER}"),
            [],
            |row| row.get(0),
        )
        .unwrap()
}

/// Wraps SQLite with a switch that simulates the network link going down
pub struct FlakyConnector {
    inner: SqliteConnector,
    online: Arc<AtomicBool>,
}

impl FlakyConnector {
    pub fn new(inner: SqliteConnector) -> (Self, Arc<AtomicBool>) {
        let online = Arc::new(AtomicBool::new(true));
        (
            Self {
                inner,
                online: online.clone(),
            },
            online,
        )
    }
}

struct FlakyConnection {
    inner: Box<dyn Connection>,
    online: Arc<AtomicBool>,
}

impl FlakyConnection {
    fn check(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(String::from("link down")))
        }
    }
}

impl Connector for FlakyConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, StoreError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(String::from("link down")));
        }
        Ok(Box::new(FlakyConnection {
            inner: self.inner.connect()?,
            online: self.online.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }
}

impl Connection for FlakyConnection {
    fn insert_session(&mut self, metadata: &SessionMetadata) -> Result<SessionId, StoreError> {
        self.check()?;
        self.inner.insert_session(metadata)
    }

    fn insert_sample(&mut self, sample: &Sample) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_sample(sample)
    }

    fn interrupt_handle(&self) -> Arc<dyn Interrupt> {
        self.inner.interrupt_handle()
    }
}

/// Answer UDP requests on 127.0.0.1 with scripted replies, repeating the last one.
/// The responder exits after two idle seconds.
pub fn udp_responder(replies: &[&str]) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();
    let replies: Vec<String> = replies.iter().map(|r| r.to_string()).collect();
    std::thread::spawn(move || {
        let mut buffer = [0u8; 1024];
        let mut served = 0;
        while let Ok((_, peer)) = socket.recv_from(&mut buffer) {
            let reply = &replies[served.min(replies.len() - 1)];
            served += 1;
            if socket.send_to(reply.as_bytes(), peer).is_err() {
                break;
            }
        }
    });
    port
}

/// A localhost port with nothing listening on it
pub fn dead_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}
