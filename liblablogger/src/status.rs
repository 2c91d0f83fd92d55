use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::autorange::{range_from_key, RangeCode};
use super::saver::{SaverHandle, SaverState};
use super::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    #[default]
    Idle,
    MassTime,
    MassScan,
    MetaOnly,
}

impl OperatingMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::MassTime,
            2 => Self::MassScan,
            3 => Self::MetaOnly,
            _ => Self::Idle,
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::MassTime => 1,
            Self::MassScan => 2,
            Self::MetaOnly => 3,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::MassTime => write!(f, "Mass-time"),
            Self::MassScan => write!(f, "Mass-scan"),
            Self::MetaOnly => write!(f, "Meta channels only"),
        }
    }
}

/// Most recent value of one channel, updated by its producer
#[derive(Debug)]
pub struct ChannelGauge {
    label: String,
    session: SessionId,
    last: AtomicU64,
    samples: AtomicU64,
}

impl ChannelGauge {
    pub fn record(&self, value: f64) {
        self.last.store(value.to_bits(), Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn last(&self) -> Option<f64> {
        match self.samples() {
            0 => None,
            _ => Some(f64::from_bits(self.last.load(Ordering::Relaxed))),
        }
    }
}

/// Shared, read-mostly view of what the acquisition threads are doing
#[derive(Debug, Default)]
pub struct StatusBoard {
    mode: AtomicU8,
    timestamp: RwLock<String>,
    started: RwLock<Option<Instant>>,
    action: RwLock<String>,
    gauges: RwLock<Vec<Arc<ChannelGauge>>>,
    errors: AtomicU64,
    last_error: RwLock<String>,
    saver: RwLock<Option<SaverHandle>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&self, timestamp: &str) {
        *self.timestamp.write().unwrap_or_else(PoisonError::into_inner) = timestamp.to_string();
        *self.started.write().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Connect the board to the persistence worker it reports on
    pub fn attach_saver(&self, saver: SaverHandle) {
        *self.saver.write().unwrap_or_else(PoisonError::into_inner) = Some(saver);
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_action(&self, action: &str) {
        *self.action.write().unwrap_or_else(PoisonError::into_inner) = action.to_string();
    }

    pub fn register_gauge(&self, label: &str, session: SessionId) -> Arc<ChannelGauge> {
        let gauge = Arc::new(ChannelGauge {
            label: label.to_string(),
            session,
            last: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        });
        self.gauges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(gauge.clone());
        gauge
    }

    /// Count a steady-state error and remember its message for the console
    pub fn record_error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = message.to_string();
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn gauges(&self) -> Vec<Arc<ChannelGauge>> {
        self.gauges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Render the console view, one string per line
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let started = *self.started.read().unwrap_or_else(PoisonError::into_inner);
        let runtime = started.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
        lines.push(format!(
            "Mode: {}   Run started: {}   Runtime: {:.1} s",
            self.mode(),
            self.timestamp.read().unwrap_or_else(PoisonError::into_inner),
            runtime.as_secs_f64()
        ));
        let action = self.action.read().unwrap_or_else(PoisonError::into_inner);
        if !action.is_empty() {
            lines.push(format!("Action: {action}"));
        }

        match self
            .saver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(saver) => {
                let stats = saver.stats();
                let connection = match saver.state() {
                    SaverState::Reconnecting => String::from("RECONNECTING"),
                    state => state.to_string(),
                };
                lines.push(format!(
                    "SQL: {connection}   Queue: {}   Commits: {}   Rejected: {}   Reconnects: {}   Last execute: {:.2} ms",
                    saver.queue_depth(),
                    stats.commits(),
                    stats.rejected(),
                    stats.reconnects(),
                    stats.last_execute().as_secs_f64() * 1000.0
                ));
            }
            None => lines.push(String::from("SQL: not connected")),
        }

        for gauge in self.gauges() {
            let value = match gauge.last() {
                Some(v) => format!("{v:.4e}"),
                None => String::from("-"),
            };
            lines.push(format!(
                "  {:<20} session {:>6}   last {:>12}   samples {}",
                gauge.label(),
                gauge.session(),
                value,
                gauge.samples()
            ));
        }

        let last_error = self.last_error.read().unwrap_or_else(PoisonError::into_inner);
        lines.push(format!(
            "Errors: {}   Last: {}",
            self.error_count(),
            if last_error.is_empty() { "-" } else { last_error.as_str() }
        ));
        lines.push(String::from(KEY_HELP));
        lines
    }
}

/// Console key bindings
pub const KEY_HELP: &str =
    "Keys: q quit | s stop run | 2/4/5/6/7 fix preamp range | a auto range";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    StopRun,
    RangeOverride(RangeCode),
    ClearOverride,
}

pub fn key_action(key: char) -> Option<KeyAction> {
    match key {
        'q' | 'Q' => Some(KeyAction::Quit),
        's' | 'S' => Some(KeyAction::StopRun),
        'a' | 'A' => Some(KeyAction::ClearOverride),
        other => range_from_key(other).map(KeyAction::RangeOverride),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autorange::RANGE_D;
    use crate::saver::{DataSaver, SaverSettings};
    use crate::sqlite_store::SqliteConnector;

    #[test]
    fn test_keys() {
        assert_eq!(key_action('q'), Some(KeyAction::Quit));
        assert_eq!(key_action('s'), Some(KeyAction::StopRun));
        assert_eq!(key_action('a'), Some(KeyAction::ClearOverride));
        assert_eq!(key_action('6'), Some(KeyAction::RangeOverride(RANGE_D)));
        assert_eq!(key_action('x'), None);
    }

    #[test]
    fn test_gauge() {
        let board = StatusBoard::new();
        let gauge = board.register_gauge("M18", SessionId(3));
        assert_eq!(gauge.last(), None);
        gauge.record(2.5e-9);
        gauge.record(3.5e-9);
        assert_eq!(gauge.last(), Some(3.5e-9));
        assert_eq!(gauge.samples(), 2);
        assert_eq!(board.gauges().len(), 1);
    }

    #[test]
    fn test_render() {
        let dir = tempfile::tempdir().unwrap();
        let connector =
            SqliteConnector::new(dir.path().join("db.sqlite"), "unit", Duration::from_secs(1))
                .unwrap();
        let mut saver = DataSaver::start(Box::new(connector), SaverSettings::default()).unwrap();
        let board = StatusBoard::new();
        assert!(board.render().iter().any(|l| l.contains("not connected")));
        board.attach_saver(saver.handle());
        board.set_mode(OperatingMode::MassTime);
        board.begin_run("2024-05-01 12:00:00");
        board.register_gauge("M28", SessionId(12)).record(1.0e-9);
        board.record_error("instrument reported no data");

        let lines = board.render();
        assert!(lines[0].contains("Mass-time"));
        assert!(lines.iter().any(|l| l.contains("Queue: 0")));
        assert!(lines.iter().any(|l| l.contains("M28") && l.contains("12")));
        assert!(lines
            .iter()
            .any(|l| l.contains("Errors: 1") && l.contains("no data")));
        saver.stop();
    }
}
