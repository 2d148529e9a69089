//! `swarm_tests`
//!
//! A minimal in-process coordinator hub for socket-level tests. It accepts
//! WebSocket clients on an ephemeral port, answers the JSON hub protocol
//! handshake and records whatever the client invokes.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use anyhow::{bail, ensure, Context};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use swarm_shared::net::{self, BotRecord, HubMessage, SYNC_METHOD};
use tokio::{
    net::{TcpListener, TcpStream},
    time,
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, info};

/// Listening side of the mock hub.
pub struct MockHub {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockHub {
    /// Binds to an ephemeral localhost port.
    pub async fn bind_ephemeral() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("tcp bind")?;
        let addr = listener.local_addr().context("local_addr")?;
        Ok(Self { listener, addr })
    }

    /// Hub endpoint in the form the load generator is configured with.
    pub fn url(&self) -> String {
        format!("http://{}/gamehub", self.addr)
    }

    /// Accepts one client and completes the hub handshake.
    pub async fn accept_one(&self) -> anyhow::Result<HubSession> {
        let (stream, peer) = self.listener.accept().await.context("tcp accept")?;
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .context("websocket upgrade")?;

        let request = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => bail!("expected handshake, got {other:?}"),
        };
        let (protocol, version) = net::decode_handshake(&request)?;
        ensure!(
            protocol == net::PROTOCOL_NAME && version == net::PROTOCOL_VERSION,
            "unexpected protocol {protocol} v{version}"
        );
        ws.send(Message::Text(net::encode_handshake_response(None)?))
            .await
            .context("send handshake response")?;

        info!(%peer, "Mock hub session open");
        Ok(HubSession {
            ws,
            pending: VecDeque::new(),
        })
    }

    /// Accepts with a deadline; `None` when nobody connected in time.
    pub async fn try_accept(&self, timeout: Duration) -> anyhow::Result<Option<HubSession>> {
        match time::timeout(timeout, self.accept_one()).await {
            Ok(session) => session.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Accepts a TCP connection and never answers it.
    pub async fn accept_silent(&self) -> anyhow::Result<TcpStream> {
        let (stream, _) = self.listener.accept().await.context("tcp accept")?;
        Ok(stream)
    }
}

/// One client connected to the mock hub.
pub struct HubSession {
    ws: WebSocketStream<TcpStream>,
    pending: VecDeque<HubMessage>,
}

impl HubSession {
    /// Next hub message from the client, pings included. `None` on timeout.
    pub async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<HubMessage>> {
        let deadline = time::Instant::now() + timeout;
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Ok(Some(msg));
            }

            let frame = match time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => bail!("client disconnected"),
                Ok(Some(frame)) => frame.context("websocket read")?,
            };
            if let Message::Text(text) = frame {
                self.pending.extend(net::decode_frame(&text)?);
            }
        }
    }

    /// Next invocation from the client, skipping pings. `None` on timeout.
    pub async fn next_invocation(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<(String, Vec<Value>)>> {
        let deadline = time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            match self.next_message(remaining).await? {
                None => return Ok(None),
                Some(HubMessage::Invocation {
                    target, arguments, ..
                }) => return Ok(Some((target, arguments))),
                Some(other) => debug!(?other, "Mock hub skipping message"),
            }
        }
    }

    /// Waits until the client drops the connection. `false` on timeout.
    pub async fn wait_disconnect(&mut self, timeout: Duration) -> bool {
        let deadline = time::Instant::now() + timeout;
        loop {
            match time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Reads sync batches until `records` bot records have arrived.
    pub async fn collect_sync(
        &mut self,
        records: usize,
        timeout: Duration,
    ) -> anyhow::Result<Vec<Vec<BotRecord>>> {
        let deadline = time::Instant::now() + timeout;
        let mut batches = Vec::new();
        let mut seen = 0;

        while seen < records {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            let Some((target, mut args)) = self.next_invocation(remaining).await? else {
                bail!("timed out after {seen} of {records} records");
            };
            ensure!(target == SYNC_METHOD, "unexpected target {target}");
            ensure!(args.len() == 1, "expected one argument, got {}", args.len());

            let batch: Vec<BotRecord> =
                serde_json::from_value(args.remove(0)).context("decode batch")?;
            seen += batch.len();
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Sends a hub close message.
    pub async fn close(&mut self, allow_reconnect: bool) -> anyhow::Result<()> {
        let frame = net::encode_close(Some("mock hub closing"), allow_reconnect)?;
        self.ws
            .send(Message::Text(frame))
            .await
            .context("send close")?;
        Ok(())
    }
}
