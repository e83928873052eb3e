//! Websocket frame pump.
//!
//! Owns the persistent connection: outbound stanzas are serialized
//! through a pluggable [`FrameCodec`] and written by a single send task;
//! inbound frames are decoded and handed to the pipeline in arrival
//! order; a heartbeat ping keeps stale connections detectable. The pump
//! performs no protocol interpretation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::stanza::Node;

/// Seam to the external binary stanza codec.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, node: &Node) -> Result<Vec<u8>>;
    fn decode(&self, frame: &[u8]) -> Result<Node>;
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Ping interval for stale-connection detection.
    pub heartbeat: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat: Duration::from_secs(30),
        }
    }
}

enum Outbound {
    Frame(Vec<u8>),
    Ping,
}

pub struct WsConnection {
    outbound: mpsc::Sender<Outbound>,
    codec: Arc<dyn FrameCodec>,
    open: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl WsConnection {
    /// Connects and starts the read/write/heartbeat tasks. Every decoded
    /// inbound frame is fed to `client` serially, preserving arrival
    /// order across chats.
    pub async fn connect(
        config: WsConfig,
        codec: Arc<dyn FrameCodec>,
        client: Client,
    ) -> Result<Self> {
        let (stream, _response) = connect_async(config.url.as_str()).await?;
        let (mut sink, mut stream) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);
        let open = Arc::new(AtomicBool::new(true));

        let mut send_task = tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                let message = match command {
                    Outbound::Frame(frame) => Message::Binary(frame),
                    Outbound::Ping => Message::Ping(Vec::new()),
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let recv_codec = codec.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Binary(data)) => match recv_codec.decode(&data) {
                        Ok(node) => client.feed(node).await,
                        Err(err) => warn!(error = %err, "dropping undecodable frame"),
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        debug!("peer closed the websocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "websocket read failed");
                        break;
                    }
                }
            }
        });

        // The heartbeat holds only a weak sender so dropping the
        // connection handle is enough to wind everything down.
        let weak_tx = outbound_tx.downgrade();
        let heartbeat = config.heartbeat;
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tx) = weak_tx.upgrade() else { break };
                if tx.send(Outbound::Ping).await.is_err() {
                    break;
                }
            }
        });

        let open_flag = open.clone();
        let driver = tokio::spawn(async move {
            tokio::select! {
                _ = &mut send_task => {
                    recv_task.abort();
                }
                _ = &mut recv_task => {
                    send_task.abort();
                }
            }
            heartbeat_task.abort();
            open_flag.store(false, Ordering::SeqCst);
            info!("websocket connection closed");
        });

        Ok(Self {
            outbound: outbound_tx,
            codec,
            open,
            driver,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Encodes and queues one stanza for the send task.
    pub async fn send_node(&self, node: &Node) -> Result<()> {
        if !self.is_open() {
            return Err(Error::TransportClosed);
        }
        let frame = self.codec.encode(node)?;
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    /// Flushes a close frame and waits for the tasks to finish.
    pub async fn close(self) {
        drop(self.outbound);
        let _ = self.driver.await;
    }
}
