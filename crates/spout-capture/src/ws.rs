//! WebSocket transport for live record capture.
//!
//! Connects to a websocket feed and delivers every text frame to the
//! subscribed listener. When the peer drops the connection the delivery
//! task reconnects with exponential backoff; the session only sees a
//! fault once the reconnect budget is exhausted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use spout_core::{RecordDeliveryError, StreamListener, StreamTransport, TransportFault};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the websocket transport.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Feed URL (e.g., "wss://host/stream").
    pub url: String,
    /// Optional message sent right after connecting.
    pub subscribe_message: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Reconnect after the peer drops the connection.
    pub reconnect: bool,
    /// Initial reconnect delay.
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Reconnect attempts before giving up, 0 for unlimited.
    pub max_reconnect_attempts: u64,
    /// How long cleanup waits for the delivery task to drain.
    pub drain_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001/stream".to_string(),
            subscribe_message: None,
            connect_timeout: Duration::from_secs(10),
            reconnect: true,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            max_reconnect_attempts: 0,
            drain_timeout: Duration::from_millis(500),
        }
    }
}

/// Connection state for one websocket subscription.
pub struct WsConnection {
    stream: Option<WsStream>,
    stop_tx: broadcast::Sender<()>,
    delivery: Option<JoinHandle<()>>,
}

/// Websocket implementation of the streaming transport contract.
pub struct WsTransport {
    config: WsConfig,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    type Conn = WsConnection;

    async fn open(&self) -> Result<Self::Conn, TransportFault> {
        let stream = connect(&self.config).await?;
        info!("Connected to {}", self.config.url);
        let (stop_tx, _) = broadcast::channel(8);
        Ok(WsConnection {
            stream: Some(stream),
            stop_tx,
            delivery: None,
        })
    }

    async fn subscribe(
        &self,
        conn: &mut Self::Conn,
        listener: Arc<dyn StreamListener>,
    ) -> Result<oneshot::Receiver<TransportFault>, TransportFault> {
        let Some(stream) = conn.stream.take() else {
            return Err(TransportFault::Subscribe(
                "connection already subscribed".to_string(),
            ));
        };

        let (fault_tx, fault_rx) = oneshot::channel();
        let stop_rx = conn.stop_tx.subscribe();
        conn.delivery = Some(tokio::spawn(run_delivery(
            self.config.clone(),
            stream,
            listener,
            stop_rx,
            fault_tx,
        )));
        Ok(fault_rx)
    }

    async fn cleanup(&self, conn: &mut Self::Conn) -> Result<(), TransportFault> {
        let _ = conn.stop_tx.send(());
        let Some(mut delivery) = conn.delivery.take() else {
            return Ok(());
        };

        match timeout(self.config.drain_timeout, &mut delivery).await {
            Ok(Ok(())) => debug!("Delivery task drained"),
            Ok(Err(e)) => warn!("Delivery task failed during drain: {e}"),
            Err(_) => {
                warn!(
                    "Delivery task did not drain within {:?}, aborting",
                    self.config.drain_timeout
                );
                delivery.abort();
            }
        }
        Ok(())
    }

    async fn shutdown(&self, mut conn: Self::Conn) -> Result<(), TransportFault> {
        // Still present only when subscribe never ran; the delivery task
        // closes the stream it took.
        if let Some(mut stream) = conn.stream.take()
            && let Err(e) = stream.close(None).await
        {
            return Err(TransportFault::Shutdown(e.to_string()));
        }
        debug!("Websocket connection released");
        Ok(())
    }
}

/// Establishes a websocket connection with a timeout.
async fn connect(config: &WsConfig) -> Result<WsStream, TransportFault> {
    debug!("Connecting to {}", config.url);

    match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(TransportFault::Connection(e.to_string())),
        Err(_) => Err(TransportFault::Timeout),
    }
}

/// Outcome of a single connection read loop.
enum ConnectionEnd {
    Stopped,
    Dropped(String),
}

/// Delivery loop: reads one connection at a time, reconnecting with
/// exponential backoff in between. Reports a fault and exits when the
/// budget runs out or reconnection is disabled.
async fn run_delivery(
    config: WsConfig,
    stream: WsStream,
    listener: Arc<dyn StreamListener>,
    mut stop_rx: broadcast::Receiver<()>,
    fault_tx: oneshot::Sender<TransportFault>,
) {
    let mut stream = Some(stream);
    let mut reconnect_delay = config.initial_reconnect_delay;
    let mut attempts: u64 = 0;

    loop {
        let current = match stream.take() {
            Some(stream) => stream,
            None => {
                if !config.reconnect {
                    let _ = fault_tx.send(TransportFault::StreamEnded(
                        "reconnect disabled".to_string(),
                    ));
                    return;
                }
                if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
                    let _ = fault_tx.send(TransportFault::StreamEnded(format!(
                        "reconnect budget exhausted after {attempts} attempts"
                    )));
                    return;
                }
                attempts += 1;

                // Wait before reconnecting, but keep listening for stop
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = stop_rx.recv() => {
                        debug!("Stop received during reconnect delay");
                        return;
                    }
                }
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);

                match connect(&config).await {
                    Ok(stream) => {
                        info!("Reconnected to {} (attempt {attempts})", config.url);
                        reconnect_delay = config.initial_reconnect_delay;
                        attempts = 0;
                        stream
                    }
                    Err(fault) => {
                        warn!("Reconnect attempt {attempts} failed: {fault}");
                        continue;
                    }
                }
            }
        };

        match run_connection(&config, current, &listener, &mut stop_rx).await {
            ConnectionEnd::Stopped => return,
            ConnectionEnd::Dropped(reason) => {
                warn!("Connection dropped: {reason}");
            }
        }
    }
}

/// Reads a single websocket connection until it is stopped or dropped.
async fn run_connection(
    config: &WsConfig,
    stream: WsStream,
    listener: &Arc<dyn StreamListener>,
    stop_rx: &mut broadcast::Receiver<()>,
) -> ConnectionEnd {
    let (mut write, mut read) = stream.split();

    if let Some(subscribe_message) = &config.subscribe_message {
        if let Err(e) = write
            .send(Message::Text(subscribe_message.clone().into()))
            .await
        {
            return ConnectionEnd::Dropped(format!("subscribe message failed: {e}"));
        }
        debug!("Sent subscribe message");
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        listener.on_record(text.to_string());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        listener.on_error(RecordDeliveryError::Malformed(format!(
                            "non-text frame of {} bytes",
                            data.len()
                        )));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return ConnectionEnd::Dropped(format!("pong failed: {e}"));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("Received pong");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return ConnectionEnd::Dropped(format!("closed by peer: {frame:?}"));
                    }
                    Some(Ok(_)) => {
                        // Raw frames, nothing to deliver
                    }
                    Some(Err(e)) => {
                        return ConnectionEnd::Dropped(e.to_string());
                    }
                    None => {
                        return ConnectionEnd::Dropped("stream ended".to_string());
                    }
                }
            }

            _ = stop_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                debug!("Sent close frame");
                return ConnectionEnd::Stopped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WsConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:9001/stream");
        assert_eq!(config.subscribe_message, None);
        assert!(config.reconnect);
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.drain_timeout, Duration::from_millis(500));
    }
}
