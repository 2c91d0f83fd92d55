use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, ErrorCode, InterruptHandle};

use super::error::StoreError;
use super::session::{Sample, SessionId, SessionMetadata};
use super::store::{Connection, Connector, Interrupt, TableNames};

/// Connects to a file-backed SQLite database holding one chamber's tables.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE measurements_<chamber> (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     time TEXT NOT NULL,
///     type INTEGER NOT NULL,
///     mass_label TEXT NOT NULL,
///     comment TEXT NOT NULL,
///     sem_voltage TEXT NOT NULL,
///     preamp_range TEXT NOT NULL,
///     timestep TEXT NOT NULL
/// );
/// CREATE TABLE xy_values_<chamber> (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     measurement INTEGER NOT NULL REFERENCES measurements_<chamber>(id),
///     x REAL NOT NULL,
///     y REAL NOT NULL
/// );
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    tables: TableNames,
    execute_timeout: Duration,
}

impl SqliteConnector {
    /// `execute_timeout` is also the busy timeout of every connection. An interrupt does not
    /// end SQLite's wait on a locked database, so the lock wait has to carry the same bound.
    pub fn new(
        path: impl Into<PathBuf>,
        chamber: &str,
        execute_timeout: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            path: path.into(),
            tables: TableNames::for_chamber(chamber)?,
            execute_timeout,
        })
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    fn init_schema(&self, conn: &rusqlite::Connection) -> Result<(), StoreError> {
        let TableNames {
            measurements,
            xy_values,
        } = &self.tables;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {measurements} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                type INTEGER NOT NULL,
                mass_label TEXT NOT NULL,
                comment TEXT NOT NULL,
                sem_voltage TEXT NOT NULL,
                preamp_range TEXT NOT NULL,
                timestep TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {xy_values} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                measurement INTEGER NOT NULL REFERENCES {measurements}(id),
                x REAL NOT NULL,
                y REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{xy_values}_measurement ON {xy_values}(measurement);"
        ))
        .map_err(classify)
    }
}

impl Connector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, StoreError> {
        let conn = rusqlite::Connection::open(&self.path).map_err(classify)?;
        conn.busy_timeout(self.execute_timeout).map_err(classify)?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(classify)?;
        self.init_schema(&conn)?;
        spdlog::debug!("Opened SQLite database {}", self.path.display());

        Ok(Box::new(SqliteConnection {
            insert_session_sql: format!(
                "INSERT INTO {} (time, type, mass_label, comment, sem_voltage, preamp_range, timestep)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.tables.measurements
            ),
            insert_sample_sql: format!(
                "INSERT INTO {} (measurement, x, y) VALUES (?1, ?2, ?3)",
                self.tables.xy_values
            ),
            conn,
        }))
    }

    fn describe(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
    insert_session_sql: String,
    insert_sample_sql: String,
}

impl Connection for SqliteConnection {
    fn insert_session(&mut self, metadata: &SessionMetadata) -> Result<SessionId, StoreError> {
        {
            let mut stmt = self
                .conn
                .prepare_cached(&self.insert_session_sql)
                .map_err(classify)?;
            stmt.execute(params![
                metadata.timestamp,
                metadata.kind.code(),
                metadata.label,
                metadata.comment,
                metadata.snapshot.sem_voltage,
                metadata.snapshot.preamp_range,
                metadata.snapshot.timestep,
            ])
            .map_err(classify)?;
        }
        Ok(SessionId(self.conn.last_insert_rowid()))
    }

    fn insert_sample(&mut self, sample: &Sample) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&self.insert_sample_sql)
            .map_err(classify)?;
        stmt.execute(params![sample.session.0, sample.x, sample.y])
            .map_err(classify)?;
        Ok(())
    }

    fn interrupt_handle(&self) -> Arc<dyn Interrupt> {
        Arc::new(SqliteInterrupt(self.conn.get_interrupt_handle()))
    }
}

struct SqliteInterrupt(InterruptHandle);

impl Interrupt for SqliteInterrupt {
    fn interrupt(&self) {
        self.0.interrupt();
    }
}

/// Map a rusqlite error onto the retry policy of the persistence worker
fn classify(error: rusqlite::Error) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::FileLockingProtocolFailed
            | ErrorCode::OutOfMemory
            | ErrorCode::OperationInterrupted
            | ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt => StoreError::Unavailable(error.to_string()),
            _ => StoreError::Rejected(error.to_string()),
        },
        _ => StoreError::Rejected(error.to_string()),
    }
}
