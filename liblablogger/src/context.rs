use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::autorange::RangeCode;
use super::registry::SessionRegistry;
use super::saver::SaverHandle;
use super::status::StatusBoard;

const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `duration` in short slices, returning early if `stop` is raised.
/// Returns true if the full duration elapsed.
pub fn pause(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

const NO_OVERRIDE: i8 = i8::MIN;

/// Operator controls shared by every acquisition thread
#[derive(Debug)]
pub struct RunControl {
    stop: AtomicBool,
    range_override: AtomicI8,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            stop: AtomicBool::new(false),
            range_override: AtomicI8::new(NO_OVERRIDE),
        }
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Pause until `duration` elapsed or a stop was requested
    pub fn pause(&self, duration: Duration) -> bool {
        pause(duration, &self.stop)
    }

    /// Pin every channel to `range`, or hand control back to auto-ranging with None
    pub fn set_range_override(&self, range: Option<RangeCode>) {
        let raw = range.map(|r| r.0).unwrap_or(NO_OVERRIDE);
        self.range_override.store(raw, Ordering::Release);
    }

    pub fn range_override(&self) -> Option<RangeCode> {
        match self.range_override.load(Ordering::Acquire) {
            NO_OVERRIDE => None,
            raw => Some(RangeCode(raw)),
        }
    }
}

/// Everything an acquisition thread needs, passed explicitly instead of through globals
#[derive(Debug, Clone)]
pub struct AcquisitionContext {
    pub saver: SaverHandle,
    pub registry: SessionRegistry,
    pub control: Arc<RunControl>,
    pub board: Arc<StatusBoard>,
}

impl AcquisitionContext {
    pub fn new(
        saver: SaverHandle,
        session_timeout: Duration,
        control: Arc<RunControl>,
        board: Arc<StatusBoard>,
    ) -> Self {
        board.attach_saver(saver.clone());
        Self {
            registry: SessionRegistry::new(saver.clone(), session_timeout),
            saver,
            control,
            board,
        }
    }
}
