use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::constants::MAX_MASS_TIME_CHANNELS;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("SQL endpoint is unavailable: {0}")]
    Unavailable(String),
    #[error("SQL execute did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("SQL endpoint rejected the statement: {0}")]
    Rejected(String),
    #[error("Invalid SQL identifier {0:?}; only a-z, A-Z, 0-9 and '_' are allowed")]
    InvalidIdentifier(String),
    #[error("The persistence worker stopped before the request was executed")]
    SaverStopped,
}

impl StoreError {
    /// Transient errors are recovered by reconnecting; everything else is final for the statement
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut(_))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session allocation failed due to store error: {0}")]
    Store(#[from] StoreError),
    #[error("Session allocation got no answer from the persistence worker within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("Instrument failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Instrument replied with unexpected data: {0}")]
    Protocol(String),
    #[error("Instrument has no physical channel {0}")]
    BadChannel(u8),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadingError {
    #[error("Reply was empty")]
    Empty,
    #[error("Could not convert {0:?} to a float")]
    NotANumber(String),
    #[error("Malformed compound field {0:?}; expected <position>:<value>")]
    BadField(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler failed due to session error: {0}")]
    Session(#[from] SessionError),
    #[error("Scheduler failed due to instrument error: {0}")]
    Instrument(#[from] InstrumentError),
    #[error("Scheduler was given {0} channels; at most {max} are supported", max=MAX_MASS_TIME_CHANNELS)]
    TooManyChannels(usize),
    #[error("Scan width must be positive, got {0}")]
    BadScanWidth(f64),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Poller failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Poller failed due to session error: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config chamber {0:?} is not a valid SQL identifier")]
    InvalidChamber(String),
    #[error("Config is missing the database credentials")]
    MissingCredentials,
}

#[derive(Debug, Error)]
pub enum ChannelListError {
    #[error("Failed to load channel list as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Channel list failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Channel list failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Channel list line {line}: expected <key>: <value>")]
    BadLine { line: usize },
    #[error("Channel list line {line}: unknown key {key:?}")]
    UnknownKey { line: usize, key: String },
    #[error("Channel list line {line}: missing parameter {key:?}")]
    MissingKey { line: usize, key: String },
    #[error("Channel list line {line}: could not parse {key:?} from {value:?}")]
    BadValue {
        line: usize,
        key: String,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Processor failed due to Scheduler error: {0}")]
    SchedulerError(#[from] SchedulerError),
    #[error("Processor failed due to Poller error: {0}")]
    PollerError(#[from] PollerError),
    #[error("Processor failed because a worker thread panicked")]
    WorkerPanic,
}
