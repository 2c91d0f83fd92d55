use std::fmt::Display;
use std::time::Instant;

use crossbeam_channel::Sender;
use time::macros::format_description;
use time::OffsetDateTime;

use super::error::StoreError;

/// Server-assigned identifier of a session header row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i64);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acquisition type written to the `type` column of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    XpsScan,
    MassScan,
    MassTime,
    MetaChannel,
    Generic(u8),
}

impl SessionKind {
    pub fn code(&self) -> u8 {
        match self {
            Self::XpsScan => 2,
            Self::MassScan => 4,
            Self::MassTime => 5,
            // meta channels are stored like mass-time traces unless overridden
            Self::MetaChannel => 5,
            Self::Generic(code) => *code,
        }
    }

    /// Meta channels may override their stored type code
    pub fn meta(measurement_type: Option<u8>) -> Self {
        match measurement_type {
            Some(code) => Self::Generic(code),
            None => Self::MetaChannel,
        }
    }
}

/// Instrument state recorded with a header
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSnapshot {
    pub sem_voltage: String,
    pub preamp_range: String,
    pub timestep: String,
}

impl InstrumentSnapshot {
    /// Channels that are not backed by the instrument store "-1" in every column
    pub fn virtual_channel() -> Self {
        Self {
            sem_voltage: String::from("-1"),
            preamp_range: String::from("-1"),
            timestep: String::from("-1"),
        }
    }
}

/// Everything needed to insert one session header
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub channel: Option<u8>,
    pub timestamp: String,
    pub kind: SessionKind,
    pub label: String,
    pub comment: String,
    pub snapshot: InstrumentSnapshot,
}

impl SessionMetadata {
    pub fn meta_channel(
        label: &str,
        timestamp: &str,
        comment: &str,
        measurement_type: Option<u8>,
    ) -> Self {
        Self {
            channel: None,
            timestamp: timestamp.to_string(),
            kind: SessionKind::meta(measurement_type),
            label: label.to_string(),
            comment: comment.to_string(),
            snapshot: InstrumentSnapshot::virtual_channel(),
        }
    }
}

/// One (x, y) point of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub session: SessionId,
    pub x: f64,
    pub y: f64,
}

/// Unit of work consumed by the persistence worker
#[derive(Debug)]
pub enum Work {
    OpenSession {
        metadata: SessionMetadata,
        reply: Sender<Result<SessionId, StoreError>>,
    },
    AppendSample(Sample),
}

/// Clock origin of a run. x values are milliseconds since `start`
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    t0: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self { t0: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.t0.elapsed().as_secs_f64() * 1000.0
    }
}

/// Wall-clock start time of a run, shared by every header of that run.
/// Falls back to UTC when the local offset cannot be determined.
pub fn wall_clock_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
