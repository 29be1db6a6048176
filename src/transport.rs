use crate::error::{RemoteError, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Where a protocol adapter wants its link opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Plain TCP stream, framed by `\n`
    Tcp { host: String, port: u16 },
    /// WebSocket, one text frame per message
    WebSocket { url: String },
}

/// Bidirectional text-message channel between a session and a device
///
/// A `Link` is a pair of channels. For the built-in transports a writer task
/// forwards outgoing text to the socket and a reader task forwards every
/// complete incoming message, so socket events never touch session state
/// directly. The link closes when the device hangs up or the `Link` is dropped.
pub struct Link {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    /// Build a link from caller-owned channels
    ///
    /// Text sent by the session appears on the receiver paired with
    /// `outgoing`; text pushed into the sender paired with `incoming` is
    /// delivered to the session. Dropping that sender closes the link.
    pub fn from_channels(
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            reader: None,
        }
    }

    /// Open a link to `endpoint`, failing if it is not up within `within`
    pub async fn open(endpoint: &Endpoint, within: Duration) -> Result<Self> {
        let connecting = async {
            match endpoint {
                Endpoint::Tcp { host, port } => Self::tcp(host, *port).await,
                Endpoint::WebSocket { url } => Self::websocket(url).await,
            }
        };

        match timeout(within, connecting).await {
            Ok(link) => link,
            Err(_) => {
                tracing::error!("Connecting to {:?} timed out after {:?}", endpoint, within);
                Err(RemoteError::ConnectTimeout)
            }
        }
    }

    async fn tcp(host: &str, port: u16) -> Result<Self> {
        tracing::info!("Connecting to {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read, mut write) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.write_all(text.as_bytes()).await {
                    tracing::error!("Failed to send line: {}", e);
                    break;
                }
            }
            let _ = write.shutdown().await;
        });

        let reader = tokio::spawn(async move {
            let mut read = BufReader::new(read);
            loop {
                let mut line = Vec::new();
                match read.read_until(b'\n', &mut line).await {
                    Ok(0) => {
                        tracing::info!("TCP connection closed by peer");
                        break;
                    }
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("TCP read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            reader: Some(reader),
        })
    }

    async fn websocket(url: &str) -> Result<Self> {
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            reader: Some(reader),
        })
    }

    pub(crate) fn send(&self, text: String) -> Result<()> {
        self.outgoing
            .send(text)
            .map_err(|_| RemoteError::ConnectionClosed)
    }

    /// Next incoming message, `None` once the link is closed
    pub(crate) async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Incoming message that is already buffered, if any
    pub(crate) fn try_recv(&mut self) -> Option<String> {
        self.incoming.try_recv().ok()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
