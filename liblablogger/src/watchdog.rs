use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::store::Interrupt;

#[derive(Default)]
struct Armed {
    deadline: Option<Instant>,
    target: Option<Arc<dyn Interrupt>>,
    fired: bool,
    shutdown: bool,
}

type Shared = Arc<(Mutex<Armed>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<'_, Armed> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels a statement that runs past its deadline.
///
/// The persistence worker arms the watchdog before each execute and disarms it after.
/// While disarmed the thread sleeps on a condition variable.
pub struct Watchdog {
    shared: Shared,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn() -> Self {
        let shared: Shared = Arc::new((Mutex::new(Armed::default()), Condvar::new()));
        let thread_shared = shared.clone();
        let thread = std::thread::spawn(move || watch(thread_shared));
        Self {
            shared,
            thread: Some(thread),
        }
    }

    pub fn arm(&self, target: Arc<dyn Interrupt>, timeout: Duration) {
        let mut armed = lock(&self.shared);
        armed.deadline = Some(Instant::now() + timeout);
        armed.target = Some(target);
        armed.fired = false;
        self.shared.1.notify_all();
    }

    /// Returns true if the deadline passed and the statement was interrupted
    pub fn disarm(&self) -> bool {
        let mut armed = lock(&self.shared);
        armed.deadline = None;
        armed.target = None;
        std::mem::take(&mut armed.fired)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        {
            let mut armed = lock(&self.shared);
            armed.shutdown = true;
            self.shared.1.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                spdlog::error!("Watchdog thread panicked");
            }
        }
    }
}

fn watch(shared: Shared) {
    let mut armed = lock(&shared);
    loop {
        if armed.shutdown {
            return;
        }
        match armed.deadline {
            None => {
                armed = shared
                    .1
                    .wait(armed)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    if let Some(target) = armed.target.take() {
                        target.interrupt();
                    }
                    armed.deadline = None;
                    armed.fired = true;
                } else {
                    armed = shared
                        .1
                        .wait_timeout(armed, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
