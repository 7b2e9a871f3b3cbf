//! # Realtime AI WebSocket Leg
//!
//! Opens the upstream leg of a session with tokio-tungstenite. Once the
//! handshake completes the socket is split in two tasks:
//!
//! - **writer**: drains an unbounded channel of frames into the socket, so
//!   sending from the session never blocks
//! - **reader**: turns every inbound frame into a `LegEvent` for the session
//!
//! Closing the `UpstreamHandle` sends a close frame and gives the peer
//! `CLOSE_HANDSHAKE_TIMEOUT` to answer. After that both tasks are aborted,
//! which drops the socket whether or not the peer ever replied. Dropping the
//! handle without closing it does the same.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::relay::leg::{LegEvent, LegHandle};

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// How long a closed leg waits for the peer's close frame before the socket is dropped.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens upstream legs. The session runtime only sees this trait, so tests
/// can supply a connector that never touches the network.
pub trait UpstreamConnector {
    type Handle: LegHandle;

    /// Open a leg whose inbound traffic is reported on `events`.
    fn connect(
        &self,
        events: mpsc::UnboundedSender<LegEvent>,
    ) -> impl Future<Output = Result<Self::Handle, RelayError>>;
}

/// Connector for the realtime AI WebSocket API.
#[derive(Clone)]
pub struct RealtimeConnector {
    url: String,
    api_key: String,
}

impl RealtimeConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.upstream_url.clone(), config.api_key.clone())
    }
}

impl UpstreamConnector for RealtimeConnector {
    type Handle = UpstreamHandle;

    async fn connect(&self, events: mpsc::UnboundedSender<LegEvent>) -> Result<UpstreamHandle, RelayError> {
        let mut request = self.url.as_str().into_client_request()?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| RelayError::UpstreamConnectFailure(format!("invalid API key header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, response) = connect_async(request).await?;
        info!("Upstream leg open (HTTP {})", response.status());

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sink.send(message).await {
                    debug!("Upstream write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let reader = tokio::spawn(async move {
            loop {
                match ws_stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(LegEvent::Text(text)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Upstream leg closed by peer: {:?}", frame);
                        let _ = events.send(LegEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Upstream leg error: {}", e);
                        let _ = events.send(LegEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = events.send(LegEvent::Closed);
                        break;
                    }
                }
            }
        });

        Ok(UpstreamHandle {
            outbound: Some(outbound_tx),
            tasks: Some(SocketTasks { reader, writer }),
        })
    }
}

/// The two tasks that own the halves of one upstream socket.
struct SocketTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SocketTasks {
    /// Let the close handshake run for a bounded time, then abort both tasks.
    /// The socket is dropped with the last of its halves.
    fn release(self) {
        let SocketTasks { mut reader, writer } = self;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if timeout(CLOSE_HANDSHAKE_TIMEOUT, &mut reader).await.is_err() {
                        debug!("Upstream peer did not answer the close frame, dropping the socket");
                        reader.abort();
                    }
                    writer.abort();
                });
            }
            Err(_) => {
                reader.abort();
                writer.abort();
            }
        }
    }
}

/// The session's handle on its realtime leg.
pub struct UpstreamHandle {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    tasks: Option<SocketTasks>,
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl LegHandle for UpstreamHandle {
    fn send_text(&mut self, text: String) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Message::Close(None));
        }
        if let Some(tasks) = self.tasks.take() {
            tasks.release();
        }
    }

    fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
