//! WebSocket relay channel (tokio-tungstenite)

use super::relay::{
    RelayChannel, RelayConnector, RelayEvent, RelaySink, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for the relay to acknowledge our close frame
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens relay channels over WebSocket
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    _private: (),
}

impl WebSocketConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelayConnector for WebSocketConnector {
    fn open(&self, url: &str, events: RelaySink) -> Box<dyn RelayChannel> {
        let (tx, rx) = mpsc::unbounded_channel();
        let opened = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(channel_task(
            url.to_string(),
            rx,
            events,
            Arc::clone(&opened),
        ));

        Box::new(WebSocketChannel {
            tx,
            opened,
            task,
            closed: false,
        })
    }
}

/// Handle to one WebSocket relay channel
///
/// Dropping the handle closes the channel.
pub struct WebSocketChannel {
    /// Outgoing message sender
    tx: mpsc::UnboundedSender<Message>,
    /// Set once the handshake completed
    opened: Arc<AtomicBool>,
    /// Connection task
    task: JoinHandle<()>,
    closed: bool,
}

impl RelayChannel for WebSocketChannel {
    fn send(&self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::WebSocketError("Channel already closed".to_string()));
        }

        self.tx
            .send(Message::Text(text))
            .map_err(|e| Error::WebSocketError(format!("Failed to queue message: {}", e)))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.opened.load(Ordering::SeqCst) {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Owned(reason.to_string()),
            };
            if self.tx.send(Message::Close(Some(frame))).is_err() {
                debug!("Relay channel task already finished");
            }
        } else {
            debug!("Closing relay channel before handshake completed");
            self.task.abort();
        }
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if !self.opened.load(Ordering::SeqCst) {
            self.task.abort();
        }
    }
}

/// Connect, then pump messages both ways until either side closes
async fn channel_task(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: RelaySink,
    opened: Arc<AtomicBool>,
) {
    info!("Connecting to relay: {}", url);

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("Relay connection to {} failed: {}", url, e);
            events.emit(RelayEvent::Error(format!("Failed to connect: {}", e)));
            return;
        }
    };

    opened.store(true, Ordering::SeqCst);
    info!("Connected to relay: {}", url);

    if !events.emit(RelayEvent::Opened) {
        debug!("Nobody listening for relay events, dropping channel");
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    let mut close_sent = false;

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    // Handle dropped without an explicit close
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };

                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("Failed to send relay message: {}", e);
                    events.emit(RelayEvent::Error(format!("Send failed: {}", e)));
                    break;
                }

                if closing {
                    close_sent = true;
                    break;
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !events.emit(RelayEvent::Message(text)) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                        info!("Relay closed the channel, code: {}, reason: {}", code, reason);
                        events.emit(RelayEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Relay channel error: {}", e);
                        events.emit(RelayEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        events.emit(RelayEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: String::new(),
                        });
                        break;
                    }
                }
            }
        }
    }

    if close_sent {
        let _ = tokio::time::timeout(CLOSE_GRACE, drain(&mut read)).await;
        events.emit(RelayEvent::Closed {
            code: NORMAL_CLOSURE,
            reason: "closed by viewer".to_string(),
        });
    }

    debug!("Relay channel task terminated");
}

/// Read until the relay acknowledges the close or the stream ends
async fn drain(read: &mut futures::stream::SplitStream<WsStream>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}
