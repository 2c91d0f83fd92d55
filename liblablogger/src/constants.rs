use std::time::Duration;

// Instrument layout
/// Number of physical parameter channels on the QMG control units
pub const PHYSICAL_CHANNELS: u8 = 16;
/// Channel 0 is reserved for sweeps, so mass-time runs use 1..=15
pub const MAX_MASS_TIME_CHANNELS: usize = 15;
/// Mass written to every channel when it is parked before a run
pub const PARKED_MASS: f64 = 99.0;
/// Speed code written to every channel when it is parked before a run
pub const PARKED_SPEED: u8 = 1;

// Persistence worker
pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_EXECUTE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_BACKOFF_START_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

// Metadata pollers
pub const DEFAULT_POLL_PERIOD_MS: u64 = 5_000;
pub const DEFAULT_UDP_TIMEOUT_MS: u64 = 1_000;
pub const UDP_REPLY_SIZE: usize = 1024;

// Channel scheduler
pub const DEFAULT_CHANNEL_SETTLE_MS: u64 = 250;
pub const DEFAULT_CYCLE_PAUSE_MS: u64 = 100;
pub const DEFAULT_SCAN_POLL_MS: u64 = 1_000;
pub const DEFAULT_INTERLEAVED_SCAN_WIDTH: f64 = 50.0;
/// Delay after starting a measurement before the running flag is trusted
pub const START_SETTLE: Duration = Duration::from_millis(100);
pub const SCAN_BATCH_SIZE: usize = 100;
pub const MAX_CYCLE_ERRORS: usize = 3;

/// Exponent offset used by instruments that report range-relative readings
pub const RANGE_EXPONENT_OFFSET: i32 = 5;
