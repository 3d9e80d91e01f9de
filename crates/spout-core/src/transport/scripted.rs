//! Scripted in-process transport.
//!
//! Plays a fixed sequence of frames to the subscribed listener with
//! configurable delays. Used by the lifecycle tests and for offline
//! rehearsal of session behavior without a network peer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::listener::StreamListener;
use crate::transport::{RecordDeliveryError, StreamTransport, TransportFault};

/// One step of a scripted delivery sequence.
///
/// Each frame waits its own delay before acting, so a script doubles as a
/// timing profile for the arrival statistics.
#[derive(Debug, Clone)]
pub enum ScriptedFrame {
    /// Deliver a record payload.
    Record { delay: Duration, payload: String },

    /// Report a per-record delivery failure.
    DeliveryError {
        delay: Duration,
        error: RecordDeliveryError,
    },

    /// Fail the stream. Delivery stops here.
    Fault { delay: Duration, fault: TransportFault },
}

impl ScriptedFrame {
    pub fn record(delay_ms: u64, payload: &str) -> Self {
        Self::Record {
            delay: Duration::from_millis(delay_ms),
            payload: payload.to_string(),
        }
    }

    pub fn delivery_error(delay_ms: u64, error: RecordDeliveryError) -> Self {
        Self::DeliveryError {
            delay: Duration::from_millis(delay_ms),
            error,
        }
    }

    pub fn fault(delay_ms: u64, fault: TransportFault) -> Self {
        Self::Fault {
            delay: Duration::from_millis(delay_ms),
            fault,
        }
    }

    fn delay(&self) -> Duration {
        match self {
            Self::Record { delay, .. }
            | Self::DeliveryError { delay, .. }
            | Self::Fault { delay, .. } => *delay,
        }
    }
}

/// Connection state for a scripted subscription.
pub struct ScriptedConn {
    stop_tx: broadcast::Sender<()>,
    delivery: Option<JoinHandle<()>>,
}

/// Transport that replays a frame script instead of reading a network feed.
///
/// Records every lifecycle call it receives; [`call_log`](Self::call_log)
/// exposes the order for assertions.
pub struct ScriptedTransport {
    frames: Vec<ScriptedFrame>,
    looping: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedTransport {
    pub fn new(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            frames,
            looping: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replays the script from the top after the last frame instead of
    /// parking. An endless feed for deadline tests.
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Lifecycle calls seen so far, in order.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.calls.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn push_call(&self, name: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name);
        }
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    type Conn = ScriptedConn;

    async fn open(&self) -> Result<Self::Conn, TransportFault> {
        self.push_call("open");
        debug!("Scripted transport open, {} frames", self.frames.len());
        let (stop_tx, _) = broadcast::channel(8);
        Ok(ScriptedConn {
            stop_tx,
            delivery: None,
        })
    }

    async fn subscribe(
        &self,
        conn: &mut Self::Conn,
        listener: Arc<dyn StreamListener>,
    ) -> Result<oneshot::Receiver<TransportFault>, TransportFault> {
        self.push_call("subscribe");
        let (fault_tx, fault_rx) = oneshot::channel();
        let frames = self.frames.clone();
        let looping = self.looping;
        let mut stop_rx = conn.stop_tx.subscribe();

        conn.delivery = Some(tokio::spawn(async move {
            let mut fault_tx = Some(fault_tx);
            loop {
                for frame in &frames {
                    tokio::select! {
                        _ = tokio::time::sleep(frame.delay()) => {}
                        _ = stop_rx.recv() => return,
                    }
                    match frame {
                        ScriptedFrame::Record { payload, .. } => {
                            listener.on_record(payload.clone());
                        }
                        ScriptedFrame::DeliveryError { error, .. } => {
                            listener.on_error(error.clone());
                        }
                        ScriptedFrame::Fault { fault, .. } => {
                            if let Some(tx) = fault_tx.take() {
                                let _ = tx.send(fault.clone());
                            }
                            return;
                        }
                    }
                }
                if !looping {
                    break;
                }
            }
            // Script exhausted. Park without dropping the fault channel so
            // the session keeps running until stopped from outside.
            let _ = stop_rx.recv().await;
        }));

        Ok(fault_rx)
    }

    async fn cleanup(&self, conn: &mut Self::Conn) -> Result<(), TransportFault> {
        self.push_call("cleanup");
        let _ = conn.stop_tx.send(());
        if let Some(delivery) = conn.delivery.take() {
            let _ = delivery.await;
        }
        Ok(())
    }

    async fn shutdown(&self, conn: Self::Conn) -> Result<(), TransportFault> {
        self.push_call("shutdown");
        drop(conn);
        Ok(())
    }
}
