//! WebSocket live channel.
//!
//! A supervisor task owns the socket. It connects, re-joins every room that
//! has a subscriber, pumps outbound frames, and fans inbound frames out to the
//! subscribers. When the socket drops it reconnects with capped exponential
//! backoff plus jitter. The rest of the process only sees the
//! [`LiveChannel`] trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use parlor_shared::constants::{
    LIVE_EVENT_BUFFER, RECONNECT_BASE_MS, RECONNECT_JITTER_MS, RECONNECT_MAX_MS,
};
use parlor_shared::error::TransportError;
use parlor_shared::protocol::{self, ClientFrame, LiveEvent};
use parlor_shared::transport::{LiveChannel, TokenSource};
use parlor_shared::types::ChatId;

use crate::error::NetError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live channel tunables.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub url: Url,
    /// First reconnect delay; doubles per failed attempt.
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Upper bound of the random delay added to each reconnect.
    pub reconnect_jitter: Duration,
    /// Per-subscriber frame buffer.
    pub buffer: usize,
}

impl LiveConfig {
    pub fn new(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(NetError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(Self {
            url,
            reconnect_base: Duration::from_millis(RECONNECT_BASE_MS),
            reconnect_max: Duration::from_millis(RECONNECT_MAX_MS),
            reconnect_jitter: Duration::from_millis(RECONNECT_JITTER_MS),
            buffer: LIVE_EVENT_BUFFER,
        })
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .reconnect_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.reconnect_max);
        let jitter_ms = self.reconnect_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    connected: AtomicBool,
    rooms: Mutex<HashMap<ChatId, mpsc::Sender<Value>>>,
}

impl Shared {
    fn rooms(&self) -> MutexGuard<'_, HashMap<ChatId, mpsc::Sender<Value>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn room_ids(&self) -> Vec<ChatId> {
        self.rooms().keys().cloned().collect()
    }

    /// Route one inbound text frame to its room, or to every room when the
    /// frame names none.
    fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring non-JSON frame");
                return;
            }
        };
        let Some(event) = LiveEvent::from_frame(&frame) else {
            return;
        };
        if protocol::message_text(&event.payload).is_none() {
            trace!(frame = %frame, "Ignoring non-message frame");
            return;
        }

        let mut rooms = self.rooms();
        rooms.retain(|_, tx| !tx.is_closed());
        match &event.chat_id {
            Some(chat_id) => match rooms.get(chat_id) {
                Some(tx) => deliver(chat_id, tx, frame),
                None => trace!(chat_id = %chat_id, "Frame for a room we have not joined"),
            },
            None => {
                for (chat_id, tx) in rooms.iter() {
                    deliver(chat_id, tx, frame.clone());
                }
            }
        }
    }
}

fn deliver(chat_id: &ChatId, tx: &mpsc::Sender<Value>, frame: Value) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
        warn!(chat_id = %chat_id, "Subscriber lagging, dropping live frame");
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// [`LiveChannel`] over a reconnecting WebSocket.
///
/// Dropping the channel stops the supervisor task.
pub struct WsLiveChannel {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<ClientFrame>,
    shutdown: watch::Sender<bool>,
    buffer: usize,
}

impl WsLiveChannel {
    /// Start the supervisor. Must be called inside a tokio runtime.
    pub fn spawn(config: LiveConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            rooms: Mutex::new(HashMap::new()),
        });
        let (outbound_tx, outbound_rx) = mpsc::channel(config.buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let buffer = config.buffer;

        tokio::spawn(supervise(
            shared.clone(),
            config,
            tokens,
            outbound_rx,
            shutdown_rx,
        ));

        Self {
            shared,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            buffer,
        }
    }

    /// Close the socket and stop reconnecting.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl LiveChannel for WsLiveChannel {
    async fn subscribe(&self, chat_id: &ChatId) -> Result<mpsc::Receiver<Value>, TransportError> {
        if *self.shutdown.borrow() || self.outbound.is_closed() {
            return Err(TransportError::ChannelClosed);
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        self.shared.rooms().insert(chat_id.clone(), tx);
        debug!(chat_id = %chat_id, "Subscribed to live room");

        // While disconnected the supervisor joins on connect.
        if self.is_connected() {
            let _ = self
                .outbound
                .send(ClientFrame::Join { chat_id: chat_id.clone() })
                .await;
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, chat_id: &ChatId) {
        if self.shared.rooms().remove(chat_id).is_none() {
            return;
        }
        debug!(chat_id = %chat_id, "Left live room");
        if self.is_connected() {
            let _ = self
                .outbound
                .send(ClientFrame::Leave { chat_id: chat_id.clone() })
                .await;
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, chat_id: &ChatId, text: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound
            .try_send(ClientFrame::Message {
                chat_id: chat_id.clone(),
                text: text.to_string(),
            })
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Reconnect,
    Stop,
}

async fn supervise(
    shared: Arc<Shared>,
    config: LiveConfig,
    tokens: Arc<dyn TokenSource>,
    mut outbound: mpsc::Receiver<ClientFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect(&config.url, tokens.as_ref()).await {
            Ok(socket) => {
                attempt = 0;
                info!(url = %config.url, "Live channel connected");
                let flow = run_connection(&shared, socket, &mut outbound, &mut shutdown).await;
                shared.connected.store(false, Ordering::SeqCst);
                if flow == Flow::Stop {
                    break;
                }
                warn!("Live channel disconnected");
            }
            Err(e) => {
                warn!(url = %config.url, attempt, error = %e, "Live channel connect failed");
            }
        }

        let delay = config.backoff(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting live channel");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    info!("Live channel stopped");
}

async fn connect(url: &Url, tokens: &dyn TokenSource) -> Result<Socket, TransportError> {
    let token = tokens.bearer_token().ok_or(TransportError::NotAuthenticated)?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Network(e.to_string()))?;
    let header = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| TransportError::NotAuthenticated)?;
    request.headers_mut().insert("Authorization", header);

    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    Ok(socket)
}

async fn run_connection(
    shared: &Shared,
    socket: Socket,
    outbound: &mut mpsc::Receiver<ClientFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> Flow {
    let (mut sink, mut stream) = socket.split();

    // Mark connected before reading the room list: a subscribe racing with
    // this then sends its own join.
    shared.connected.store(true, Ordering::SeqCst);
    for chat_id in shared.room_ids() {
        if write(&mut sink, &ClientFrame::Join { chat_id }).await.is_err() {
            return Flow::Reconnect;
        }
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write(&mut sink, &frame).await {
                        warn!(error = %e, "Live channel write failed");
                        return Flow::Reconnect;
                    }
                }
                None => return Flow::Stop,
            },

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return Flow::Reconnect,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Live channel read failed");
                    return Flow::Reconnect;
                }
            },

            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Flow::Stop;
            }
        }
    }
}

async fn write<S>(sink: &mut S, frame: &ClientFrame) -> Result<(), TransportError>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = frame
        .to_json()
        .map_err(|e| TransportError::Decode(e.to_string()))?;
    trace!(frame = %json, "Live frame out");
    sink.send(Message::text(json))
        .await
        .map_err(|e| TransportError::Network(e.to_string()))
}
