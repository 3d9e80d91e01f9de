//! Streaming session lifecycle.
//!
//! A session owns one pass over a transport: open, subscribe, run until
//! a deadline, a stop request, or a transport fault, then tear down. One
//! state machine covers both bounded and unbounded runs; the only
//! difference is whether a deadline is set.

use std::future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::RecordBuffer;
use crate::listener::{IngestListener, StreamListener};
use crate::stats::ArrivalStats;
use crate::transport::{StreamTransport, TransportFault};

/// Errors a session run can end with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session already started, state is {0:?}")]
    AlreadyStarted(SessionState),

    #[error("Transport fault: {0}")]
    Transport(#[from] TransportFault),
}

/// Lifecycle states of a streaming session.
///
/// Transitions only move forward: Idle, Open, Running, Stopping, Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Open = 1,
    Running = 2,
    Stopping = 3,
    Closed = 4,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Open,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Closed,
        }
    }
}

/// Run shape for a session. A deadline makes the run bounded; without one
/// the session runs until [`StreamSession::stop`] or a transport fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub deadline: Option<Duration>,
}

impl SessionConfig {
    pub fn bounded(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn unbounded() -> Self {
        Self { deadline: None }
    }
}

/// One streaming session over a transport.
///
/// The session is driven by [`run`](Self::run) and stopped from any task
/// via [`stop`](Self::stop). All methods take `&self`, so the session is
/// shared behind an [`Arc`] between the running task and its controller.
pub struct StreamSession<T: StreamTransport> {
    session_id: Uuid,
    transport: T,
    listener: Arc<IngestListener>,
    config: SessionConfig,
    state: AtomicU8,
    stop_tx: broadcast::Sender<()>,
    stop_rx: Mutex<Option<broadcast::Receiver<()>>>,
}

impl<T: StreamTransport> StreamSession<T> {
    pub fn new(transport: T, listener: Arc<IngestListener>, config: SessionConfig) -> Self {
        let (stop_tx, stop_rx) = broadcast::channel(16);
        Self {
            session_id: Uuid::new_v4(),
            transport,
            listener,
            config,
            state: AtomicU8::new(SessionState::Idle as u8),
            stop_tx,
            stop_rx: Mutex::new(Some(stop_rx)),
        }
    }

    /// Drives one full session lifecycle.
    ///
    /// Opens the transport, subscribes the listener, then waits for the
    /// deadline (if any), a stop request, or a transport fault. Teardown
    /// runs exactly once on every path that obtained a connection.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyStarted`] when called a second time, and
    /// [`SessionError::Transport`] when the transport fails to open or
    /// subscribe, or reports a fault mid-run.
    pub async fn run(&self) -> Result<(), SessionError> {
        if let Err(actual) = self.state.compare_exchange(
            SessionState::Idle as u8,
            SessionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(SessionError::AlreadyStarted(SessionState::from(actual)));
        }

        // The receiver was created at construction, so a stop issued
        // before this point is already buffered and will be seen below.
        let mut stop_rx = self
            .stop_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_else(|| self.stop_tx.subscribe());

        let mut conn = match self.transport.open().await {
            Ok(conn) => conn,
            Err(fault) => {
                self.state
                    .store(SessionState::Closed as u8, Ordering::Release);
                return Err(SessionError::Transport(fault));
            }
        };

        let listener: Arc<dyn StreamListener> = self.listener.clone();
        let mut fault_rx = match self.transport.subscribe(&mut conn, listener).await {
            Ok(fault_rx) => fault_rx,
            Err(fault) => {
                warn!("Session {} failed to subscribe: {fault}", self.session_id);
                self.teardown(conn).await;
                return Err(SessionError::Transport(fault));
            }
        };

        self.state
            .store(SessionState::Running as u8, Ordering::Release);
        match self.config.deadline {
            Some(deadline) => info!("Session {} running for {:?}", self.session_id, deadline),
            None => info!("Session {} running until stopped", self.session_id),
        }

        let fault = tokio::select! {
            _ = stop_rx.recv() => {
                info!("Session {} stop requested", self.session_id);
                None
            }
            _ = deadline_wait(self.config.deadline) => {
                info!("Session {} deadline reached", self.session_id);
                None
            }
            reported = &mut fault_rx => {
                let fault = reported.unwrap_or_else(|_| {
                    TransportFault::StreamEnded("delivery ended without reporting".to_string())
                });
                warn!("Session {} transport fault: {fault}", self.session_id);
                Some(fault)
            }
        };

        self.teardown(conn).await;
        match fault {
            Some(fault) => Err(SessionError::Transport(fault)),
            None => Ok(()),
        }
    }

    /// Requests a graceful stop. Idempotent, safe to call before the run
    /// starts, and a no-op once the session is closed.
    pub fn stop(&self) {
        debug!("Session {} stop signal", self.session_id);
        let _ = self.stop_tx.send(());
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> Arc<ArrivalStats> {
        self.listener.stats()
    }

    pub fn buffer(&self) -> Arc<RecordBuffer> {
        self.listener.buffer()
    }

    /// Winds the transport down. Cleanup always runs before shutdown, and
    /// shutdown is attempted even when cleanup fails.
    async fn teardown(&self, mut conn: T::Conn) {
        self.state
            .store(SessionState::Stopping as u8, Ordering::Release);
        debug!("Session {} stopping", self.session_id);

        if let Err(fault) = self.transport.cleanup(&mut conn).await {
            warn!("Session {} cleanup failed: {fault}", self.session_id);
        }
        if let Err(fault) = self.transport.shutdown(conn).await {
            warn!("Session {} shutdown failed: {fault}", self.session_id);
        }

        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
        let stats = self.listener.stats().snapshot();
        info!(
            "Session {} closed: {} arrivals, mean interval {:.3} ms, {} records buffered",
            self.session_id,
            stats.arrivals,
            stats.mean_us / 1000.0,
            self.listener.buffer().len()
        );
    }
}

async fn deadline_wait(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => tokio::time::sleep(deadline).await,
        None => future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            SessionState::Idle,
            SessionState::Open,
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from(state as u8), state);
        }
        assert_eq!(SessionState::from(250), SessionState::Closed);
    }

    #[test]
    fn test_config_constructors() {
        let bounded = SessionConfig::bounded(Duration::from_secs(2));
        assert_eq!(bounded.deadline, Some(Duration::from_secs(2)));
        assert_eq!(SessionConfig::unbounded().deadline, None);
        assert_eq!(SessionConfig::default().deadline, None);
    }
}
