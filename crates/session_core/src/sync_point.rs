use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use shared::error::StanzaError;
use shared::stanza::Stanza;
use transport::TransportSession;

use crate::error::EngineError;

/// Lifecycle of one request/response exchange. Transitions are
/// monotonic: Initial, then RequestSent, then exactly one terminal
/// state, until `init()` resets for reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Initial,
    RequestSent,
    NoResponse,
    Success,
    Failure(StanzaError),
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    Failure(StanzaError),
    NoResponse,
}

/// A bounded rendezvous between the task issuing a request and the
/// receive path reporting its outcome. The issuing component owns the
/// point and waits on it; the receive path only calls the report
/// methods. One waiter at a time.
pub struct SyncPoint {
    state: Mutex<SyncState>,
    notify: Notify,
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncPoint {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncState::Initial),
            notify: Notify::new(),
        }
    }

    /// Reset for reuse. Required once a terminal state was reached.
    pub async fn init(&self) {
        *self.state.lock().await = SyncState::Initial;
    }

    /// Send `request` (when present) exactly once and wait up to
    /// `timeout` for the receive path to report an outcome.
    pub async fn send_and_wait(
        &self,
        session: &dyn TransportSession,
        request: Option<Stanza>,
        timeout: Duration,
    ) -> Result<SyncOutcome, EngineError> {
        if let Some(stanza) = request {
            session
                .send_stanza(stanza)
                .await
                .map_err(EngineError::transport)?;
            let mut state = self.state.lock().await;
            // The response may already have been reported between the
            // send completing and this lock being taken.
            if *state == SyncState::Initial {
                *state = SyncState::RequestSent;
            }
        }
        Ok(self.wait_for_report(timeout).await)
    }

    /// Like `send_and_wait`, but folds non-success outcomes into the
    /// error taxonomy. `operation` names the exchange for the timeout
    /// error.
    pub async fn send_and_wait_or_err(
        &self,
        session: &dyn TransportSession,
        request: Option<Stanza>,
        timeout: Duration,
        operation: &str,
    ) -> Result<(), EngineError> {
        match self.send_and_wait(session, request, timeout).await? {
            SyncOutcome::Success => Ok(()),
            SyncOutcome::Failure(err) => Err(EngineError::protocol(err)),
            SyncOutcome::NoResponse => Err(EngineError::no_response(operation)),
        }
    }

    /// Wait without sending anything, for exchanges transmitted by
    /// other means. Returns immediately when already successful.
    pub async fn check_if_success_or_wait(&self, timeout: Duration) -> SyncOutcome {
        {
            let state = self.state.lock().await;
            if *state == SyncState::Success {
                return SyncOutcome::Success;
            }
        }
        self.wait_for_report(timeout).await
    }

    /// Receive path: the exchange succeeded.
    pub async fn report_success(&self) {
        let mut state = self.state.lock().await;
        *state = SyncState::Success;
        self.notify.notify_one();
    }

    /// Receive path: the exchange failed with the given payload.
    pub async fn report_failure(&self, error: StanzaError) {
        let mut state = self.state.lock().await;
        *state = SyncState::Failure(error);
        self.notify.notify_one();
    }

    pub async fn was_successful(&self) -> bool {
        *self.state.lock().await == SyncState::Success
    }

    pub async fn request_sent(&self) -> bool {
        *self.state.lock().await == SyncState::RequestSent
    }

    /// Loop until the state leaves {Initial, RequestSent} or the
    /// deadline passes. Remaining time is recomputed after every wakeup,
    /// so a spurious or stale notification never shortens the wait.
    async fn wait_for_report(&self, timeout: Duration) -> SyncOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                match &*state {
                    SyncState::Success => return SyncOutcome::Success,
                    SyncState::Failure(err) => return SyncOutcome::Failure(err.clone()),
                    SyncState::NoResponse => return SyncOutcome::NoResponse,
                    SyncState::Initial | SyncState::RequestSent => {
                        if Instant::now() >= deadline {
                            *state = SyncState::NoResponse;
                            return SyncOutcome::NoResponse;
                        }
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/sync_point_tests.rs"]
mod tests;
