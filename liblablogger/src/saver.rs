use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};

use super::backoff::Backoff;
use super::constants::{
    DEFAULT_BACKOFF_CAP_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_EXECUTE_TIMEOUT_MS,
    QUEUE_POLL_INTERVAL,
};
use super::context::pause;
use super::error::StoreError;
use super::session::{Sample, SessionId, Work};
use super::store::{Connection, Connector, Interrupt};
use super::watchdog::Watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaverState {
    Initial,
    Connected,
    Draining,
    Reconnecting,
    Stopped,
}

impl SaverState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Draining,
            3 => Self::Reconnecting,
            4 => Self::Stopped,
            _ => Self::Initial,
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Connected => 1,
            Self::Draining => 2,
            Self::Reconnecting => 3,
            Self::Stopped => 4,
        }
    }
}

impl std::fmt::Display for SaverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Connected => write!(f, "connected"),
            Self::Draining => write!(f, "draining"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaverSettings {
    pub execute_timeout: Duration,
    pub backoff_start: Duration,
    pub backoff_cap: Duration,
}

impl Default for SaverSettings {
    fn default() -> Self {
        Self {
            execute_timeout: Duration::from_millis(DEFAULT_EXECUTE_TIMEOUT_MS),
            backoff_start: Duration::from_millis(DEFAULT_BACKOFF_START_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        }
    }
}

/// Counters published by the worker thread
#[derive(Debug, Default)]
pub struct SaverStats {
    commits: AtomicU64,
    rejected: AtomicU64,
    reconnects: AtomicU64,
    last_execute_us: AtomicU64,
}

impl SaverStats {
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn last_execute(&self) -> Duration {
        Duration::from_micros(self.last_execute_us.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    /// Items enqueued but not yet committed or discarded
    outstanding: AtomicUsize,
    stop: AtomicBool,
    stats: SaverStats,
}

impl Shared {
    fn set_state(&self, state: SaverState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn state(&self) -> SaverState {
        SaverState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn settle_one(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Producer side of the persistence worker. Cheap to clone, one per producer thread.
#[derive(Debug, Clone)]
pub struct SaverHandle {
    tx: Sender<Work>,
    shared: Arc<Shared>,
}

impl SaverHandle {
    /// Queue a work item. Never blocks.
    pub fn enqueue(&self, work: Work) {
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        if let Err(SendError(work)) = self.tx.send(work) {
            self.shared.settle_one();
            spdlog::error!(
                "Persistence worker has stopped; dropping {}",
                describe_work(&work)
            );
        }
    }

    pub fn append_sample(&self, session: SessionId, x: f64, y: f64) {
        self.enqueue(Work::AppendSample(Sample { session, x, y }));
    }

    /// Number of items not yet committed or discarded
    pub fn queue_depth(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SaverState {
        self.shared.state()
    }

    pub fn stats(&self) -> &SaverStats {
        &self.shared.stats
    }

    /// Block until every queued item has been executed, or the worker has stopped
    pub fn wait_for_drain(&self) {
        while self.queue_depth() > 0 && self.state() != SaverState::Stopped {
            std::thread::sleep(QUEUE_POLL_INTERVAL);
        }
    }
}

/// Owns the worker thread that executes every SQL statement of the process
pub struct DataSaver {
    handle: SaverHandle,
    worker: Option<JoinHandle<()>>,
}

impl DataSaver {
    /// Connect and launch the worker. The first connection must succeed.
    pub fn start(
        connector: Box<dyn Connector>,
        settings: SaverSettings,
    ) -> Result<Self, StoreError> {
        spdlog::info!("Connecting to {}", connector.describe());
        let live = Live::new(connector.connect()?);

        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());
        shared.set_state(SaverState::Connected);

        let worker = Worker {
            connector,
            rx,
            shared: shared.clone(),
            settings,
            watchdog: Watchdog::spawn(),
        };
        let thread = std::thread::spawn(move || worker.run(live));
        spdlog::info!("Persistence worker started");

        Ok(Self {
            handle: SaverHandle { tx, shared },
            worker: Some(thread),
        })
    }

    pub fn handle(&self) -> SaverHandle {
        self.handle.clone()
    }

    /// Drain the queue and join the worker. Returns the number of items left unsaved,
    /// which is only non-zero if the endpoint was down when the stop was requested.
    pub fn stop(&mut self) -> usize {
        self.handle.shared.stop.store(true, Ordering::Release);
        if let Some(thread) = self.worker.take() {
            spdlog::info!(
                "Stopping persistence worker with {} items queued",
                self.handle.queue_depth()
            );
            if thread.join().is_err() {
                spdlog::error!("Persistence worker panicked");
                self.handle.shared.set_state(SaverState::Stopped);
            }
        }
        let remaining = self.handle.queue_depth();
        if remaining > 0 {
            spdlog::error!("Persistence worker stopped with {remaining} unsaved items");
        }
        remaining
    }
}

impl Drop for DataSaver {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

struct Live {
    connection: Box<dyn Connection>,
    interrupt: Arc<dyn Interrupt>,
}

impl Live {
    fn new(connection: Box<dyn Connection>) -> Self {
        let interrupt = connection.interrupt_handle();
        Self {
            connection,
            interrupt,
        }
    }
}

struct Worker {
    connector: Box<dyn Connector>,
    rx: Receiver<Work>,
    shared: Arc<Shared>,
    settings: SaverSettings,
    watchdog: Watchdog,
}

impl Worker {
    fn run(self, mut live: Live) {
        // an item that failed transiently stays at the head of the line
        let mut pending: Option<Work> = None;
        loop {
            let work = match pending.take() {
                Some(work) => work,
                None => match self.rx.recv_timeout(QUEUE_POLL_INTERVAL) {
                    Ok(work) => work,
                    Err(RecvTimeoutError::Timeout) => {
                        if self.shared.stop.load(Ordering::Acquire) {
                            break;
                        }
                        self.shared.set_state(SaverState::Connected);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };
            self.shared.set_state(SaverState::Draining);

            match self.execute(&mut live, &work) {
                Err(e) if e.is_transient() => {
                    spdlog::warn!(
                        "Lost connection while executing {}: {e}",
                        describe_work(&work)
                    );
                    pending = Some(work);
                    match self.reconnect() {
                        Some(fresh) => live = fresh,
                        None => break,
                    }
                }
                result => self.settle(work, result),
            }
        }
        self.shared.set_state(SaverState::Stopped);
        spdlog::info!(
            "Persistence worker exiting after {} commits",
            self.shared.stats.commits()
        );
    }

    /// Run one statement under the execute timeout.
    /// Returns the session the statement wrote to.
    fn execute(&self, live: &mut Live, work: &Work) -> Result<SessionId, StoreError> {
        let timeout = self.settings.execute_timeout;
        self.watchdog.arm(live.interrupt.clone(), timeout);
        let started = Instant::now();
        let result = match work {
            Work::OpenSession { metadata, .. } => live.connection.insert_session(metadata),
            Work::AppendSample(sample) => live
                .connection
                .insert_sample(sample)
                .map(|_| sample.session),
        };
        let fired = self.watchdog.disarm();
        self.shared
            .stats
            .last_execute_us
            .store(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        match result {
            Err(_) if fired => Err(StoreError::TimedOut(timeout)),
            result => result,
        }
    }

    /// Acknowledge a committed or rejected item
    fn settle(&self, work: Work, result: Result<SessionId, StoreError>) {
        match &result {
            Ok(_) => {
                self.shared.stats.commits.fetch_add(1, Ordering::Relaxed);
                spdlog::trace!("Committed {}", describe_work(&work));
            }
            Err(e) => {
                self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
                spdlog::error!("Discarding {} rejected by endpoint: {e}", describe_work(&work));
            }
        }
        if let Work::OpenSession { metadata, reply } = work {
            if let Err(SendError(Ok(id))) = reply.send(result) {
                spdlog::warn!(
                    "Session {id} ({}) was created after its caller gave up waiting",
                    metadata.label
                );
            }
        }
        self.shared.settle_one();
    }

    /// Re-establish the connection with bounded back-off. Returns None if a stop was
    /// requested while the endpoint was still unreachable.
    fn reconnect(&self) -> Option<Live> {
        self.shared.set_state(SaverState::Reconnecting);
        let mut backoff = Backoff::new(self.settings.backoff_start, self.settings.backoff_cap);
        loop {
            let delay = backoff.next_delay();
            spdlog::warn!(
                "Reconnecting to {} in {:.1} s with {} items waiting",
                self.connector.describe(),
                delay.as_secs_f64(),
                self.shared.outstanding.load(Ordering::Acquire)
            );
            let stopping = !pause(delay, &self.shared.stop);
            self.shared.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            match self.connector.connect() {
                Ok(connection) => {
                    spdlog::info!("Reconnected to {}", self.connector.describe());
                    self.shared.set_state(SaverState::Draining);
                    return Some(Live::new(connection));
                }
                Err(e) if stopping => {
                    spdlog::error!("Stop requested while the endpoint is unreachable: {e}");
                    return None;
                }
                Err(e) => spdlog::warn!("Reconnect failed: {e}"),
            }
        }
    }
}

fn describe_work(work: &Work) -> String {
    match work {
        Work::OpenSession { metadata, .. } => format!("session header {:?}", metadata.label),
        Work::AppendSample(sample) => format!(
            "sample ({}, {}) of session {}",
            sample.x, sample.y, sample.session
        ),
    }
}
