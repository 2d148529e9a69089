//! Hub connection.
//!
//! [`HubConnection`] is the capability the simulation engine consumes: start
//! the link, ask whether it is open, fire an invocation. [`HubClient`] is the
//! WebSocket implementation.
//!
//! The client runs its socket on a spawned task. The engine never waits on
//! it: `send` only pushes an encoded frame into a bounded queue, and the open
//! flag is an atomic the task flips on every state change.
//!
//! Link behaviour:
//! - handshake with the JSON hub protocol, then pump frames both ways;
//! - ping every keep-alive interval, drop the session when the hub is silent
//!   for longer than the server timeout;
//! - after a session ends or an attempt fails, retry after the reconnect
//!   interval, up to `max_attempts` consecutive failures.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::{self, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::{
    config::HubPolicy,
    net::{self, HubMessage},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Connection state as seen by the link task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Connecting,
    Open,
    /// Waiting before reconnect attempt `attempt`.
    Retrying { attempt: u32 },
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open)
    }
}

/// Link state shared between the link task and its readers.
#[derive(Debug)]
pub struct LinkStatus {
    open: AtomicBool,
    state: watch::Sender<LinkState>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            open: AtomicBool::new(false),
            state,
        }
    }
}

impl LinkStatus {
    pub fn set(&self, next: LinkState) {
        self.open.store(next.is_open(), Ordering::Release);
        self.state.send_replace(next);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn current(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }
}

/// Remote coordinator link as consumed by the simulation.
#[async_trait]
pub trait HubConnection: Send + Sync {
    /// Begins connecting. Returns once the attempt is under way, not when open.
    async fn start(&self) -> anyhow::Result<()>;

    /// Non-blocking read of the open flag.
    fn is_open(&self) -> bool;

    /// Open/close notifications.
    fn subscribe(&self) -> watch::Receiver<LinkState>;

    /// Fire-and-forget invocation of `target` on the hub.
    fn send(&self, target: &str, arguments: Vec<Value>) -> anyhow::Result<()>;
}

/// WebSocket hub client speaking the JSON hub protocol.
pub struct HubClient {
    url: String,
    policy: HubPolicy,
    status: Arc<LinkStatus>,
    outbound: mpsc::Sender<String>,
    pending: Mutex<Option<mpsc::Receiver<String>>>,
}

impl HubClient {
    pub fn new(url: impl Into<String>, policy: HubPolicy) -> Self {
        let (outbound, rx) = mpsc::channel(policy.outbound_capacity.max(1));
        Self {
            url: url.into(),
            policy,
            status: Arc::new(LinkStatus::default()),
            outbound,
            pending: Mutex::new(Some(rx)),
        }
    }

    pub fn state(&self) -> LinkState {
        self.status.current()
    }
}

#[async_trait]
impl HubConnection for HubClient {
    async fn start(&self) -> anyhow::Result<()> {
        let rx = self
            .pending
            .lock()
            .map_err(|_| anyhow!("hub client lock poisoned"))?
            .take()
            .context("hub client already started")?;
        let ws_url = websocket_url(&self.url)?;

        info!(url = %ws_url, "Starting hub connection");
        tokio::spawn(run_link(ws_url, self.policy, Arc::clone(&self.status), rx));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.status.is_open()
    }

    fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.status.subscribe()
    }

    fn send(&self, target: &str, arguments: Vec<Value>) -> anyhow::Result<()> {
        let frame = net::encode_invocation(target, arguments)?;
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("hub outbound queue full"),
            TrySendError::Closed(_) => anyhow!("hub link stopped"),
        })
    }
}

/// Maps an `http(s)` hub endpoint to its WebSocket URL.
pub fn websocket_url(url: &str) -> anyhow::Result<String> {
    let mapped = if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        bail!("unsupported hub url scheme: {url}");
    };
    Ok(mapped)
}

/// Why a session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Transport loss, timeout or a close that permits reconnecting.
    Dropped(String),
    /// The hub closed and asked not to reconnect.
    Refused(String),
    /// Every sender is gone; nothing left to deliver.
    Finished,
}

async fn run_link(
    url: String,
    policy: HubPolicy,
    status: Arc<LinkStatus>,
    mut outbound: mpsc::Receiver<String>,
) {
    let mut failures = 0u32;

    loop {
        status.set(LinkState::Connecting);
        match time::timeout(policy.server_timeout().max(MIN_PERIOD), open_session(&url)).await {
            Ok(Ok((ws, leftover))) => {
                failures = 0;
                discard_stale(&mut outbound);
                status.set(LinkState::Open);
                info!(url = %url, "Hub open");

                let end = pump(ws, &leftover, &policy, &mut outbound).await;
                status.set(LinkState::Closed);
                match end {
                    SessionEnd::Dropped(reason) => {
                        warn!(url = %url, reason = %reason, "Hub closed");
                    }
                    SessionEnd::Refused(reason) => {
                        error!(url = %url, reason = %reason, "Hub closed without reconnect");
                        return;
                    }
                    SessionEnd::Finished => {
                        info!(url = %url, "Hub link finished");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                warn!(url = %url, attempt = failures, error = %format!("{e:#}"), "Hub error");
            }
            Err(_) => {
                failures += 1;
                warn!(url = %url, attempt = failures, "Hub handshake timed out");
            }
        }

        if failures >= policy.max_attempts {
            error!(url = %url, attempts = failures, "Giving up on hub connection");
            status.set(LinkState::Closed);
            return;
        }
        status.set(LinkState::Retrying {
            attempt: failures + 1,
        });
        time::sleep(policy.reconnect_interval()).await;
    }
}

/// Connects and completes the handshake; returns any messages that arrived
/// in the same frame as the handshake response.
async fn open_session(url: &str) -> anyhow::Result<(WsStream, String)> {
    let (mut ws, _response) = connect_async(url).await.context("websocket connect")?;
    ws.send(Message::Text(net::encode_handshake()?))
        .await
        .context("send handshake")?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let rest = net::decode_handshake_response(&text)?.to_string();
                return Ok((ws, rest));
            }
            Some(Ok(Message::Close(frame))) => bail!("hub closed during handshake: {frame:?}"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).context("read handshake response"),
            None => bail!("hub closed during handshake"),
        }
    }
}

fn discard_stale(outbound: &mut mpsc::Receiver<String>) {
    let mut dropped = 0usize;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, "Discarded frames queued while disconnected");
    }
}

async fn pump(
    ws: WsStream,
    leftover: &str,
    policy: &HubPolicy,
    outbound: &mut mpsc::Receiver<String>,
) -> SessionEnd {
    if let Some(end) = handle_inbound(leftover) {
        return end;
    }

    let (mut sink, mut stream) = ws.split();
    let keep_alive_every = policy.keep_alive().max(MIN_PERIOD);
    let server_timeout = policy.server_timeout().max(MIN_PERIOD);
    let mut keep_alive = time::interval_at(Instant::now() + keep_alive_every, keep_alive_every);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        return SessionEnd::Dropped(format!("send failed: {e}"));
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return SessionEnd::Finished;
                }
            },
            _ = keep_alive.tick() => {
                if let Err(e) = sink.send(Message::Text(net::encode_ping())).await {
                    return SessionEnd::Dropped(format!("keep-alive failed: {e}"));
                }
            }
            _ = time::sleep_until(last_inbound + server_timeout) => {
                return SessionEnd::Dropped("server timeout".to_string());
            }
            inbound = stream.next() => {
                last_inbound = Instant::now();
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = handle_inbound(&text) {
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Dropped(format!("websocket closed: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("stream ended".to_string()),
                }
            }
        }
    }
}

fn handle_inbound(text: &str) -> Option<SessionEnd> {
    let messages = match net::decode_frame(text) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Undecodable hub frame");
            return None;
        }
    };

    for msg in messages {
        match msg {
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let reason = error.unwrap_or_else(|| "no reason given".to_string());
                return Some(if allow_reconnect {
                    SessionEnd::Dropped(reason)
                } else {
                    SessionEnd::Refused(reason)
                });
            }
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                debug!(method = %target, args = arguments.len(), "Ignoring hub invocation");
            }
            HubMessage::Ping => {}
            HubMessage::Other(kind) => {
                debug!(kind, "Ignoring hub message");
            }
        }
    }
    None
}
