//! Async chat client.
//!
//! Each connection is driven by one dispatch task. It owns the [`Session`]
//! and the transport, and multiplexes four inputs with `tokio::select!`:
//! consumer commands, inbound frames, finished decryptions and the idle
//! timer. Everything that touches session state happens on that task, in
//! arrival order; only decryption runs elsewhere, on blocking workers.
//!
//! Consumers see the session through a `watch` channel of snapshots and a
//! bounded stream of [`SessionEvent`]s.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};

use crate::chat::config::ChatConfig;
use crate::chat::delivery::Delivery;
use crate::chat::error::ChatError;
use crate::chat::protocol::Identity;
use crate::chat::roster::RosterChange;
use crate::chat::session::{
    CloseReason, DecryptResult, Inbound, Session, SessionSnapshot, SessionState,
};
use crate::chat::transport::{Connector, FrameTransport, WebSocketConnector};
use crate::crypto::PeerKey;

/// Something the consumer should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Lifecycle state changed.
    StateChanged(SessionState),
    /// Roster membership changed.
    Roster(RosterChange),
    /// A history item was released in order.
    Delivered(Delivery),
    /// The session ended.
    Closed {
        /// Why it ended.
        reason: CloseReason,
    },
}

enum Command {
    Send {
        to: PeerKey,
        text: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Select {
        peer: PeerKey,
        reply: oneshot::Sender<Result<Identity, ChatError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    fn reject(self, error: ChatError) {
        match self {
            Command::Send { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Select { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

/// Handle to an encrypted chat over a relay.
pub struct ChatClient {
    config: ChatConfig,
    connector: Arc<dyn Connector>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    commands: Option<mpsc::Sender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Create an idle client that opens connections through `connector`.
    pub fn new(config: ChatConfig, connector: impl Connector + 'static) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            config,
            connector: Arc::new(connector),
            snapshot_tx: Arc::new(snapshot_tx),
            snapshot_rx,
            events_tx,
            events_rx,
            commands: None,
            task: None,
        }
    }

    /// Create a client for the WebSocket relay named in `config`.
    pub fn websocket(config: ChatConfig) -> Self {
        let connector = WebSocketConnector::new(config.relay_url.clone());
        Self::new(config, connector)
    }

    /// The configuration this client runs with.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.snapshot_rx.borrow().state
    }

    /// Current session view.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Take an event if one is ready.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Start a session as `name`.
    ///
    /// Returns once the session is `Connecting`; use
    /// [`wait_active`](Self::wait_active) to wait for the connection.
    pub async fn connect(&mut self, name: &str) -> Result<(), ChatError> {
        if matches!(
            self.state(),
            SessionState::Connecting | SessionState::Active
        ) {
            return Err(ChatError::AlreadyConnected);
        }

        let mut session = Session::new(self.config.max_message_len);
        session.connect(name)?;

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "previous dispatch task failed");
            }
        }

        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let mut dispatch = Dispatch {
            session,
            snapshot: self.snapshot_tx.clone(),
            events: self.events_tx.clone(),
            idle: self.config.idle_timeout(),
            dropped_events: 0,
        };
        dispatch.publish();
        dispatch.emit(SessionEvent::StateChanged(SessionState::Connecting));

        self.task = Some(tokio::spawn(
            dispatch.run(self.connector.clone(), commands_rx),
        ));
        self.commands = Some(commands_tx);
        Ok(())
    }

    /// Wait until a connection attempt has settled.
    ///
    /// Fails with the close reason if the session closed instead of going
    /// `Active`.
    pub async fn wait_active(&self) -> Result<(), ChatError> {
        let mut rx = self.snapshot_rx.clone();
        let (state, reason) = {
            let snapshot = rx
                .wait_for(|s| s.state != SessionState::Connecting)
                .await
                .map_err(|_| ChatError::NotConnected)?;
            (snapshot.state, snapshot.close_reason.clone())
        };
        match (state, reason) {
            (SessionState::Active, _) => Ok(()),
            (_, Some(reason)) => Err(reason.to_error()),
            _ => Err(ChatError::NotConnected),
        }
    }

    /// Encrypt and send `text` to `to`.
    pub async fn send(&self, to: &PeerKey, text: &str) -> Result<(), ChatError> {
        if self.state() != SessionState::Active {
            return Err(ChatError::NotConnected);
        }
        let commands = self.commands.as_ref().ok_or(ChatError::NotConnected)?;
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Send {
                to: *to,
                text: text.to_string(),
                reply,
            })
            .await
            .map_err(|_| ChatError::NotConnected)?;
        response.await.map_err(|_| ChatError::NotConnected)?
    }

    /// Make `peer` the current conversation target.
    pub async fn select(&self, peer: &PeerKey) -> Result<Identity, ChatError> {
        if self.state() != SessionState::Active {
            return Err(ChatError::NotConnected);
        }
        let commands = self.commands.as_ref().ok_or(ChatError::NotConnected)?;
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Select { peer: *peer, reply })
            .await
            .map_err(|_| ChatError::NotConnected)?;
        response.await.map_err(|_| ChatError::NotConnected)?
    }

    /// End the current session, if any, and wait for it to shut down.
    pub async fn disconnect(&mut self) {
        if let Some(commands) = self.commands.take() {
            let (reply, done) = oneshot::channel();
            if commands.send(Command::Disconnect { reply }).await.is_ok() {
                let _ = done.await;
            }
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "dispatch task failed");
            }
        }
    }
}

/// How the dispatch loop ended.
struct Exit {
    reason: CloseReason,
    reply: Option<oneshot::Sender<()>>,
}

impl Exit {
    fn new(reason: CloseReason) -> Self {
        Self {
            reason,
            reply: None,
        }
    }

    fn disconnect(reply: oneshot::Sender<()>) -> Self {
        Self {
            reason: CloseReason::ExplicitDisconnect,
            reply: Some(reply),
        }
    }
}

struct Dispatch {
    session: Session,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    events: mpsc::Sender<SessionEvent>,
    idle: Option<Duration>,
    /// Events dropped since the consumer last kept up.
    dropped_events: u64,
}

impl Dispatch {
    async fn run(mut self, connector: Arc<dyn Connector>, mut commands: mpsc::Receiver<Command>) {
        let exit = match self.open(connector.as_ref(), &mut commands).await {
            Ok(mut transport) => {
                let exit = self.serve(transport.as_mut(), &mut commands).await;
                if let Err(e) = transport.close().await {
                    tracing::debug!(error = %e, "transport close failed");
                }
                exit
            }
            Err(exit) => exit,
        };
        self.finish(exit, &mut commands);
    }

    /// Connect, then send `hello`. Commands that arrive meanwhile are
    /// rejected, except disconnect which aborts the attempt.
    async fn open(
        &mut self,
        connector: &dyn Connector,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Result<Box<dyn FrameTransport>, Exit> {
        let connect = connector.connect();
        tokio::pin!(connect);

        let mut transport = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(transport) => break transport,
                    Err(e) => return Err(Exit::new(CloseReason::TransportError(transport_detail(e)))),
                },
                command = commands.recv() => match command {
                    None => return Err(Exit::new(CloseReason::ExplicitDisconnect)),
                    Some(Command::Disconnect { reply }) => return Err(Exit::disconnect(reply)),
                    Some(other) => other.reject(ChatError::NotConnected),
                },
            }
        };

        let hello = self
            .session
            .on_open()
            .map_err(|e| Exit::new(CloseReason::TransportError(e.to_string())))?;
        transport
            .send(&hello)
            .await
            .map_err(|e| Exit::new(CloseReason::TransportError(transport_detail(e))))?;

        if let Ok(peer) = transport.peer_addr() {
            tracing::info!(peer = %peer, "connected to relay");
        }
        self.publish();
        self.emit(SessionEvent::StateChanged(SessionState::Active));
        Ok(transport)
    }

    async fn serve(
        &mut self,
        transport: &mut dyn FrameTransport,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Exit {
        let mut decrypts: JoinSet<DecryptResult> = JoinSet::new();
        let mut deadline = self.idle.map(|d| Instant::now() + d);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None => return Exit::new(CloseReason::ExplicitDisconnect),
                    Some(Command::Disconnect { reply }) => return Exit::disconnect(reply),
                    Some(Command::Send { to, text, reply }) => {
                        if let Err(reason) = self.handle_send(transport, &to, &text, reply).await {
                            return Exit::new(reason);
                        }
                    }
                    Some(Command::Select { peer, reply }) => {
                        let result = self.session.select(&peer);
                        if result.is_ok() {
                            self.publish();
                        }
                        let _ = reply.send(result);
                    }
                },
                frame = transport.receive() => match frame {
                    Ok(Some(frame)) => {
                        deadline = self.idle.map(|d| Instant::now() + d);
                        self.handle_frame(&frame, &mut decrypts);
                    }
                    Ok(None) => return Exit::new(CloseReason::RemoteClosed),
                    Err(e) => return Exit::new(CloseReason::TransportError(transport_detail(e))),
                },
                Some(joined) = decrypts.join_next() => match joined {
                    Ok(result) => {
                        let released = self.session.complete_decrypt(result);
                        self.deliver(released);
                    }
                    Err(e) => tracing::error!(error = %e, "decrypt worker failed"),
                },
                _ = idle_expiry(deadline) => return Exit::new(CloseReason::IdleTimeout),
            }
        }
    }

    fn handle_frame(&mut self, frame: &str, decrypts: &mut JoinSet<DecryptResult>) {
        match self.session.on_frame(frame) {
            Inbound::Roster(change) => {
                self.publish();
                if !change.is_empty() {
                    self.emit(SessionEvent::Roster(change));
                }
            }
            Inbound::Decrypt(job) => {
                decrypts.spawn_blocking(move || job.run());
            }
            Inbound::Settled => {
                let released = self.session.drain_ready();
                self.deliver(released);
            }
            Inbound::Ignored => {}
        }
    }

    /// Returns `Err` when the transport failed and the session must close.
    async fn handle_send(
        &mut self,
        transport: &mut dyn FrameTransport,
        to: &PeerKey,
        text: &str,
        reply: oneshot::Sender<Result<(), ChatError>>,
    ) -> Result<(), CloseReason> {
        let outbound = match self.session.prepare_send(to, text) {
            Ok(outbound) => outbound,
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            }
        };

        match transport.send(&outbound.frame).await {
            Ok(()) => {
                let released = self.session.record_sent(outbound.entry);
                self.deliver(released);
                let _ = reply.send(Ok(()));
                Ok(())
            }
            Err(e) => {
                let reason = CloseReason::TransportError(transport_detail(e));
                let _ = reply.send(Err(reason.to_error()));
                Err(reason)
            }
        }
    }

    fn finish(&mut self, exit: Exit, commands: &mut mpsc::Receiver<Command>) {
        self.session.close(exit.reason.clone());

        commands.close();
        while let Ok(command) = commands.try_recv() {
            command.reject(ChatError::NotConnected);
        }

        self.publish();
        self.emit(SessionEvent::StateChanged(SessionState::Closed));
        self.emit(SessionEvent::Closed {
            reason: exit.reason,
        });
        if let Some(reply) = exit.reply {
            let _ = reply.send(());
        }
    }

    fn deliver(&mut self, released: Vec<Delivery>) {
        if released.is_empty() {
            return;
        }
        self.publish();
        for delivery in released {
            self.emit(SessionEvent::Delivered(delivery));
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.snapshot());
    }

    /// Queue an event. A full buffer is reported once per stretch of drops.
    fn emit(&mut self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {
                if self.dropped_events > 0 {
                    tracing::debug!(dropped = self.dropped_events, "event consumer caught up");
                    self.dropped_events = 0;
                }
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                if self.dropped_events == 0 {
                    tracing::warn!("event buffer full, dropping events until the consumer catches up");
                }
                self.dropped_events += 1;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

async fn idle_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending::<()>().await,
    }
}

fn transport_detail(error: ChatError) -> String {
    match error {
        ChatError::TransportError(detail) => detail,
        other => other.to_string(),
    }
}
