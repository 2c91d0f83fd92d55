use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use super::error::{SessionError, StoreError};
use super::saver::SaverHandle;
use super::session::{SessionId, SessionMetadata, Work};

/// Allocates session headers through the persistence worker.
///
/// The header insert travels through the same queue as the samples, so it is committed
/// before any sample that is enqueued after `open_session` returns.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    saver: SaverHandle,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(saver: SaverHandle, timeout: Duration) -> Self {
        Self { saver, timeout }
    }

    /// Insert a header and block until the endpoint has assigned its id
    pub fn open_session(&self, metadata: SessionMetadata) -> Result<SessionId, SessionError> {
        let label = metadata.label.clone();
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.saver.enqueue(Work::OpenSession { metadata, reply });
        match answer.recv_timeout(self.timeout) {
            Ok(Ok(id)) => {
                spdlog::info!("Opened session {id} for {label}");
                Ok(id)
            }
            Ok(Err(e)) => Err(SessionError::Store(e)),
            Err(RecvTimeoutError::Timeout) => Err(SessionError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SessionError::Store(StoreError::SaverStopped))
            }
        }
    }

    /// Queue one sample for a session returned by [`SessionRegistry::open_session`]
    pub fn append(&self, session: SessionId, x: f64, y: f64) {
        self.saver.append_sample(session, x, y);
    }
}
