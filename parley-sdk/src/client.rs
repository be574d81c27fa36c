//! Async session driver.
//!
//! One tokio task owns the [`ConnectionStateMachine`], the
//! [`MessageStreamMerger`] and the live socket. Every trigger (a command from
//! a [`ClientHandle`], a dial or history result, an inbound frame, the
//! reconnect timer) is handled on that task one at a time, so transitions
//! never interleave. Consumers receive [`Event`]s on an mpsc channel.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::api::{HttpApi, is_auth_status};
use crate::auth::AuthTokenGateway;
use crate::backoff::ReconnectPolicy;
use crate::connection::{Action, AttemptId, ConnectionState, ConnectionStateMachine, TimerId};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::feed::{FeedEntry, OutboundFrame};
use crate::merger::{FeedView, MessageStreamMerger};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time allowed for the live-stream handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default time allowed for one `/history` fetch.
pub const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for a live session.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address; the live-stream URL is derived from it.
    pub endpoint: Endpoint,
    /// Delay schedule between reconnect attempts.
    pub reconnect: ReconnectPolicy,
    /// A dial that has not completed its handshake by then counts as failed.
    pub handshake_timeout: Duration,
    /// A history fetch that has not completed by then counts as failed.
    /// Live entries are held back while a fetch is outstanding.
    pub history_timeout: Duration,
    /// Pull `/history` on connect and on every resume.
    pub pull_history: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
            pull_history: true,
        }
    }
}

/// Commands the consumer can send to the session task.
#[derive(Debug)]
enum Command {
    Connect { reply: oneshot::Sender<Result<()>> },
    Disconnect { reply: oneshot::Sender<()> },
    CheckLiveness,
    SendChat { text: String, reply: oneshot::Sender<Result<()>> },
    Feed { reply: oneshot::Sender<FeedView> },
    State { reply: oneshot::Sender<ConnectionState> },
}

/// A handle to a running session.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Start (or restart after `disconnect`) the session.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// End the session. No reconnect is attempted until the next `connect`.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// The app came back to the foreground: if a reconnect is waiting on its
    /// timer, dial now.
    pub async fn check_liveness(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::CheckLiveness)
            .await
            .map_err(|_| Error::Closed)
    }

    /// Send a chat line. Surrounding whitespace is trimmed and empty text is
    /// ignored.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let text = text.to_string();
        self.request(|reply| Command::SendChat { text, reply }).await?
    }

    /// The merged feed as of now.
    pub async fn feed(&self) -> Result<FeedView> {
        self.request(|reply| Command::Feed { reply }).await
    }

    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(|reply| Command::State { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(make(reply)).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Spawn an idle session task. Call [`ClientHandle::connect`] to go live.
///
/// The task exits once every handle is dropped.
pub fn spawn(
    config: ConnectConfig,
    gateway: Arc<AuthTokenGateway>,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (internal_tx, internal_rx) = mpsc::channel(64);

    let session = Session {
        machine: ConnectionStateMachine::new(config.reconnect),
        merger: MessageStreamMerger::new(),
        api: HttpApi::with_timeout(config.endpoint.clone(), config.history_timeout),
        config,
        gateway,
        socket: None,
        dial: None,
        timer: None,
        history: None,
        history_generation: 0,
        history_attempt: 0,
        history_retry: None,
        internal_tx,
        event_tx,
    };
    tokio::spawn(session.run(cmd_rx, internal_rx));

    (ClientHandle { cmd_tx }, event_rx)
}

/// Spawn a session and connect it.
///
/// Fails with [`Error::NotAuthenticated`] when `gateway` holds no credential.
pub async fn connect(
    config: ConnectConfig,
    gateway: Arc<AuthTokenGateway>,
) -> Result<(ClientHandle, mpsc::Receiver<Event>)> {
    let (handle, events) = spawn(config, gateway);
    handle.connect().await?;
    Ok((handle, events))
}

/// Results from tasks spawned by the session.
enum Internal {
    Dialed {
        attempt: AttemptId,
        result: Result<Socket>,
    },
    History {
        generation: u64,
        result: Result<Vec<FeedEntry>>,
    },
}

struct Session {
    config: ConnectConfig,
    gateway: Arc<AuthTokenGateway>,
    api: HttpApi,
    machine: ConnectionStateMachine,
    merger: MessageStreamMerger,
    socket: Option<Socket>,
    dial: Option<(AttemptId, JoinHandle<()>)>,
    timer: Option<(TimerId, Pin<Box<Sleep>>)>,
    history: Option<JoinHandle<()>>,
    history_generation: u64,
    /// Consecutive failed fetches since the last pull the machine asked for.
    history_attempt: u32,
    history_retry: Option<Pin<Box<Sleep>>>,
    internal_tx: mpsc::Sender<Internal>,
    event_tx: mpsc::Sender<Event>,
}

impl Session {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::Receiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.command(cmd).await,
                    None => break,
                },
                Some(msg) = internal_rx.recv() => self.internal(msg).await,
                frame = next_frame(&mut self.socket) => self.frame(frame).await,
                timer = fire(&mut self.timer) => {
                    self.timer = None;
                    let actions = self.machine.timer_fired(timer, &self.gateway);
                    self.apply(actions).await;
                }
                () = elapsed(&mut self.history_retry) => {
                    self.history_retry = None;
                    if self.wants_history() {
                        self.pull_history();
                    }
                }
            }
        }

        tracing::debug!("all handles dropped, ending session");
        let actions = self.machine.disconnect();
        self.apply(actions).await;
    }

    async fn command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => {
                let result = self.machine.connect(&self.gateway);
                match result {
                    Ok(actions) => {
                        self.apply(actions).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Disconnect { reply } => {
                let actions = self.machine.disconnect();
                self.apply(actions).await;
                let _ = reply.send(());
            }
            Command::CheckLiveness => {
                let actions = self.machine.check_liveness(&self.gateway);
                self.apply(actions).await;
            }
            Command::SendChat { text, reply } => {
                let _ = reply.send(self.send_chat(text).await);
            }
            Command::Feed { reply } => {
                let _ = reply.send(self.merger.current_feed());
            }
            Command::State { reply } => {
                let _ = reply.send(self.machine.state());
            }
        }
    }

    async fn send_chat(&mut self, text: String) -> Result<()> {
        let ws = match self.socket.as_mut() {
            Some(ws) if self.machine.state() == ConnectionState::Open => ws,
            _ => return Err(Error::TransientConnectionFailure("not connected".into())),
        };
        let frame = OutboundFrame::Chat { text }.to_json();
        if let Err(e) = ws.send(Message::text(frame)).await {
            let reason = e.to_string();
            self.socket = None;
            let actions = self.machine.connection_lost(&reason);
            self.apply(actions).await;
            return Err(Error::TransientConnectionFailure(reason));
        }
        Ok(())
    }

    async fn internal(&mut self, msg: Internal) {
        match msg {
            Internal::Dialed { attempt, result } => self.dialed(attempt, result).await,
            Internal::History { generation, result } => {
                if generation != self.history_generation {
                    tracing::debug!(generation, "ignoring superseded history fetch");
                    return;
                }
                self.history = None;
                self.history_fetched(result).await;
            }
        }
    }

    async fn dialed(&mut self, attempt: AttemptId, result: Result<Socket>) {
        if self.dial.as_ref().is_some_and(|(a, _)| *a == attempt) {
            self.dial = None;
        }
        let actions = match result {
            Ok(mut ws) => {
                let actions = self.machine.handshake_succeeded(attempt);
                if actions.is_empty() {
                    let _ = ws.close(None).await;
                    return;
                }
                tracing::info!(server = %self.config.endpoint, "live stream open");
                self.socket = Some(ws);
                actions
            }
            Err(Error::AuthenticationFailed(reason)) => {
                let actions = self.machine.handshake_rejected(attempt, &reason);
                if !actions.is_empty() {
                    self.gateway.clear();
                }
                actions
            }
            Err(e) => self.machine.handshake_failed(attempt, &e.to_string()),
        };
        self.apply(actions).await;
    }

    async fn history_fetched(&mut self, result: Result<Vec<FeedEntry>>) {
        match result {
            Ok(entries) => {
                self.history_attempt = 0;
                self.merger.replace_snapshot(entries);
            }
            Err(Error::AuthenticationFailed(reason)) => {
                self.merger.abort_snapshot();
                self.gateway.clear();
                let actions = self.machine.authentication_rejected(&reason);
                self.apply(actions).await;
            }
            Err(e) => {
                self.merger.abort_snapshot();
                if self.wants_history() {
                    // Entries posted while we were away are only in history.
                    self.history_attempt += 1;
                    let delay = self.config.reconnect.next_delay(self.history_attempt);
                    tracing::warn!(
                        attempt = self.history_attempt,
                        ?delay,
                        "history fetch failed, retrying: {e}"
                    );
                    self.history_retry = Some(Box::pin(tokio::time::sleep(delay)));
                } else {
                    tracing::warn!("history fetch failed: {e}");
                }
            }
        }
        self.flush_feed().await;
    }

    async fn frame(&mut self, frame: Option<std::result::Result<Message, tungstenite::Error>>) {
        let reason = match frame {
            Some(Ok(Message::Text(text))) => {
                match self.machine.inbound(text.as_str(), Utc::now()) {
                    Ok(Some(entry)) => {
                        self.merger.append_live(entry);
                        self.flush_feed().await;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("dropping inbound frame: {e}"),
                }
                return;
            }
            Some(Ok(Message::Close(Some(f)))) => {
                format!("closed by server ({}): {}", u16::from(f.code), f.reason.as_str())
            }
            Some(Ok(Message::Close(None))) => "closed by server".to_string(),
            Some(Ok(_)) => return,
            Some(Err(e)) => e.to_string(),
            None => "stream ended".to_string(),
        };
        self.socket = None;
        let actions = self.machine.connection_lost(&reason);
        self.apply(actions).await;
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Dial { attempt, credential } => {
                    let url = self.config.endpoint.live_url(credential.token());
                    let timeout = self.config.handshake_timeout;
                    let tx = self.internal_tx.clone();
                    let task = tokio::spawn(async move {
                        let result = dial(&url, timeout).await;
                        let _ = tx.send(Internal::Dialed { attempt, result }).await;
                    });
                    if let Some((_, old)) = self.dial.replace((attempt, task)) {
                        old.abort();
                    }
                }
                Action::AbortDial { attempt } => {
                    if let Some((a, task)) = self.dial.take() {
                        if a == attempt {
                            task.abort();
                        } else {
                            self.dial = Some((a, task));
                        }
                    }
                }
                Action::ScheduleReconnect { timer, delay } => {
                    self.timer = Some((timer, Box::pin(tokio::time::sleep(delay))));
                }
                Action::CancelReconnect { timer } => {
                    if self.timer.as_ref().is_some_and(|(t, _)| *t == timer) {
                        self.timer = None;
                    }
                }
                Action::PullHistory => {
                    self.history_attempt = 0;
                    self.pull_history();
                }
                Action::CloseSocket => {
                    if let Some(mut ws) = self.socket.take() {
                        let _ = tokio::time::timeout(Duration::from_secs(1), ws.close(None)).await;
                    }
                }
                Action::Emit(event) => self.emit(event).await,
            }
        }

        if self.machine.state() == ConnectionState::Disconnected {
            self.cancel_history();
            self.flush_feed().await;
        }
    }

    fn pull_history(&mut self) {
        if !self.config.pull_history {
            return;
        }
        let Ok(credential) = self.gateway.credential() else {
            return;
        };
        self.cancel_history();
        self.merger.begin_snapshot();
        self.history_generation += 1;
        if self.history_attempt > 0 {
            tracing::debug!(attempt = self.history_attempt, "retrying history fetch");
        }

        let generation = self.history_generation;
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        self.history = Some(tokio::spawn(async move {
            let result = api.history(&credential).await;
            let _ = tx.send(Internal::History { generation, result }).await;
        }));
    }

    /// Whether a snapshot is still owed: the stream is open or about to be.
    fn wants_history(&self) -> bool {
        matches!(
            self.machine.state(),
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    fn cancel_history(&mut self) {
        self.history_retry = None;
        if let Some(task) = self.history.take() {
            task.abort();
            self.history_generation += 1;
        }
        self.merger.abort_snapshot();
    }

    async fn flush_feed(&mut self) {
        for n in self.merger.drain_notifications() {
            self.emit(Event::Feed(n)).await;
        }
    }

    async fn emit(&mut self, event: Event) {
        let _ = self.event_tx.send(event).await;
    }
}

async fn dial(url: &str, timeout: Duration) -> Result<Socket> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(tungstenite::Error::Http(resp))) => {
            let status = resp.status().as_u16();
            if is_auth_status(status) {
                Err(Error::AuthenticationFailed(format!("live stream refused: HTTP {status}")))
            } else {
                Err(Error::TransientConnectionFailure(format!("live stream HTTP {status}")))
            }
        }
        Ok(Err(e)) => Err(Error::TransientConnectionFailure(e.to_string())),
        Err(_) => Err(Error::TransientConnectionFailure(format!(
            "handshake timed out after {timeout:?}"
        ))),
    }
}

async fn next_frame(
    socket: &mut Option<Socket>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn fire(timer: &mut Option<(TimerId, Pin<Box<Sleep>>)>) -> TimerId {
    match timer {
        Some((id, sleep)) => {
            sleep.as_mut().await;
            *id
        }
        None => std::future::pending().await,
    }
}

async fn elapsed(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
