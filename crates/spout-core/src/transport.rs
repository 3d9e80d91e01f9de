//! Streaming transport abstraction.
//!
//! This module defines the collaborator contract a session drives and the
//! error taxonomy shared across transports. The same session code works
//! with:
//! - Live network transports (e.g. the websocket client in the capture
//!   binary)
//! - The in-process [`scripted`] transport for tests and offline rehearsal
//!
//! A session calls the contract in a fixed order: `open`, `subscribe`,
//! then `cleanup` followed by `shutdown`. Teardown runs exactly once,
//! regardless of how the run ended.

pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::listener::StreamListener;

/// Errors that are fatal to a streaming session.
#[derive(Debug, Clone, Error)]
pub enum TransportFault {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Stream ended: {0}")]
    StreamEnded(String),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}

/// Errors scoped to a single delivered record.
///
/// These are reported through [`StreamListener::on_error`], logged, and
/// skipped; they never change session state.
#[derive(Debug, Clone, Error)]
pub enum RecordDeliveryError {
    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Delivery interrupted: {0}")]
    Interrupted(String),
}

/// Streaming transport collaborator.
///
/// Implementations own connection establishment and record delivery.
/// Delivery happens on transport-owned tasks that invoke the subscribed
/// [`StreamListener`] once per record, possibly from more than one context
/// at a time.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Per-subscription connection state handed back by [`open`](Self::open)
    /// and threaded through the rest of the lifecycle.
    type Conn: Send;

    /// Establishes the upstream connection.
    ///
    /// # Errors
    ///
    /// Fails fast: a connection that cannot be established here is surfaced
    /// synchronously to whoever started the session.
    async fn open(&self) -> Result<Self::Conn, TransportFault>;

    /// Starts record delivery to `listener` and returns immediately.
    ///
    /// The returned receiver fires at most once, when the transport has
    /// given up on the stream mid-run; the session treats that as fatal.
    ///
    /// # Errors
    ///
    /// Fails when the subscription request itself is rejected.
    async fn subscribe(
        &self,
        conn: &mut Self::Conn,
        listener: Arc<dyn StreamListener>,
    ) -> Result<oneshot::Receiver<TransportFault>, TransportFault>;

    /// Stops delivery and waits, best effort, for in-flight records to land.
    ///
    /// Always attempted before [`shutdown`](Self::shutdown), even when the
    /// session never reached its running phase.
    async fn cleanup(&self, conn: &mut Self::Conn) -> Result<(), TransportFault>;

    /// Releases the connection. Called exactly once, after `cleanup`.
    async fn shutdown(&self, conn: Self::Conn) -> Result<(), TransportFault>;
}
