//! Session state machine.
//!
//! `Session` holds everything that lives for exactly one connection: the key
//! manager, the roster and the delivery queue. It performs no I/O. The async
//! dispatch loop in [`crate::chat::ChatClient`] feeds it frames and commands
//! and carries out the transport work it asks for.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::chat::delivery::{
    ConversationEntry, Delivery, DeliveryQueue, Direction, HistoryItem, HistoryView,
};
use crate::chat::error::ChatError;
use crate::chat::protocol::{Envelope, Identity, MessageEnvelope};
use crate::chat::roster::{RosterChange, RosterTracker};
use crate::crypto::{KeyManager, PeerKey, SharedKey};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected.
    Idle,
    /// Transport connection in progress.
    Connecting,
    /// Hello sent; messages may flow.
    Active,
    /// Session ended. A new `connect` is allowed.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The relay closed the connection.
    RemoteClosed,
    /// The transport failed.
    TransportError(String),
    /// No inbound frame within the idle timeout.
    IdleTimeout,
    /// The local user disconnected.
    ExplicitDisconnect,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::RemoteClosed => f.write_str("remote closed"),
            CloseReason::TransportError(detail) => write!(f, "transport error: {}", detail),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::ExplicitDisconnect => f.write_str("explicit disconnect"),
        }
    }
}

impl CloseReason {
    /// The terminal error reported to callers waiting on this session.
    pub fn to_error(&self) -> ChatError {
        ChatError::ConnectionClosed {
            reason: self.to_string(),
        }
    }
}

/// A message waiting to be decrypted off the dispatch path.
#[derive(Debug)]
pub struct DecryptJob {
    seq: u64,
    envelope: MessageEnvelope,
    key: SharedKey,
}

impl DecryptJob {
    /// Sequence slot reserved for this message.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Open the envelope. Runs on a blocking worker.
    ///
    /// Always yields a result for the slot, even if decryption panics;
    /// otherwise every later message would wait on it forever.
    pub fn run(self) -> DecryptResult {
        self.run_with(MessageEnvelope::open)
    }

    fn run_with(
        self,
        open: impl FnOnce(&MessageEnvelope, &SharedKey) -> Result<String, ChatError>,
    ) -> DecryptResult {
        let opened = panic::catch_unwind(AssertUnwindSafe(|| open(&self.envelope, &self.key)))
            .unwrap_or_else(|_| {
                tracing::error!(seq = self.seq, "decryption panicked");
                Err(ChatError::MalformedEnvelope("decryption aborted".to_string()))
            });
        let item = match opened {
            Ok(text) => HistoryItem::Entry(ConversationEntry {
                from: self.envelope.from,
                to: self.envelope.to,
                text,
                timestamp: self.envelope.timestamp,
                direction: Direction::Received,
            }),
            Err(error) => HistoryItem::Failed {
                from: self.envelope.from,
                to: self.envelope.to,
                timestamp: self.envelope.timestamp,
                error,
            },
        };
        DecryptResult {
            seq: self.seq,
            item,
        }
    }
}

/// Outcome of a [`DecryptJob`].
#[derive(Debug)]
pub struct DecryptResult {
    /// Slot to fill.
    pub seq: u64,
    /// Decrypted entry or failure marker.
    pub item: HistoryItem,
}

/// What an inbound frame turned into.
#[derive(Debug)]
pub enum Inbound {
    /// Roster replaced.
    Roster(RosterChange),
    /// Message addressed to us; decrypt it and hand back the result.
    Decrypt(DecryptJob),
    /// Message addressed to us whose slot was already settled (key agreement
    /// failed). Drain the queue.
    Settled,
    /// Nothing to do.
    Ignored,
}

/// An encrypted frame ready to go out, plus the local echo to record once
/// the transport accepts it.
#[derive(Debug)]
pub struct Outbound {
    /// Serialized envelope.
    pub frame: String,
    /// Local echo for the conversation history.
    pub entry: ConversationEntry,
}

/// Point-in-time view of a session for consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Local identity while active.
    pub me: Option<Identity>,
    /// Roster without the local identity.
    pub peers: Vec<Identity>,
    /// Current conversation target.
    pub selected: Option<Identity>,
    /// Released history in arrival order.
    pub history: HistoryView,
    /// Set once the session has closed.
    pub close_reason: Option<CloseReason>,
    /// Number of per-peer secrets currently cached.
    pub cached_secrets: usize,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            me: None,
            peers: Vec::new(),
            selected: None,
            history: HistoryView::default(),
            close_reason: None,
            cached_secrets: 0,
        }
    }
}

/// State for one connection lifetime.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    name: String,
    keys: KeyManager,
    roster: RosterTracker,
    delivery: DeliveryQueue,
    max_message_len: usize,
    close_reason: Option<CloseReason>,
}

impl Session {
    /// Create an idle session that rejects messages longer than
    /// `max_message_len` characters.
    pub fn new(max_message_len: usize) -> Self {
        Self {
            state: SessionState::Idle,
            name: String::new(),
            keys: KeyManager::new(),
            roster: RosterTracker::new(),
            delivery: DeliveryQueue::new(),
            max_message_len,
            close_reason: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reason the session closed, if it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Begin connecting as `name`.
    ///
    /// The name is trimmed and must not be empty. Allowed from `Idle` or
    /// `Closed`; everything from a previous session is discarded.
    pub fn connect(&mut self, name: &str) -> Result<(), ChatError> {
        if matches!(self.state, SessionState::Connecting | SessionState::Active) {
            return Err(ChatError::AlreadyConnected);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidName);
        }

        self.name = name.to_string();
        self.keys.clear();
        self.roster.clear();
        self.delivery.reset();
        self.close_reason = None;
        self.state = SessionState::Connecting;
        tracing::info!(name = %self.name, "session connecting");
        Ok(())
    }

    /// Transport is up: generate key material and go `Active`.
    ///
    /// Returns the `hello` frame, which must be the first frame sent.
    pub fn on_open(&mut self) -> Result<String, ChatError> {
        if self.state != SessionState::Connecting {
            return Err(ChatError::NotConnected);
        }

        let public = self.keys.generate_session_key_pair();
        self.roster.set_self(public);
        let hello = Envelope::Hello {
            identity: Identity::new(self.name.clone(), public),
        }
        .to_frame()?;

        self.state = SessionState::Active;
        tracing::info!(name = %self.name, key = %public.fingerprint(), "session active");
        Ok(hello)
    }

    /// Classify one inbound frame.
    ///
    /// Malformed frames and frames that are not for us are logged and
    /// dropped; they never change the session state.
    pub fn on_frame(&mut self, frame: &str) -> Inbound {
        if self.state != SessionState::Active {
            tracing::debug!(state = %self.state, "frame outside active session dropped");
            return Inbound::Ignored;
        }

        let envelope = match Envelope::from_frame(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return Inbound::Ignored;
            }
        };

        match envelope {
            Envelope::Roster { identities } => {
                let change = self.roster.apply_update(identities);
                tracing::debug!(
                    size = self.roster.identities().len(),
                    joined = change.joined.len(),
                    departed = change.departed.len(),
                    "roster updated"
                );
                if let Some(key) = change.deselected {
                    tracing::info!(peer = %key.fingerprint(), "selected peer left");
                }
                Inbound::Roster(change)
            }
            Envelope::Message(message) => self.classify_message(message),
            Envelope::Hello { identity } => {
                tracing::warn!(peer = %identity.public_key.fingerprint(), "unexpected hello from relay");
                Inbound::Ignored
            }
        }
    }

    fn classify_message(&mut self, message: MessageEnvelope) -> Inbound {
        if self.roster.is_self(&message.from) {
            tracing::debug!("ignoring message sent by self");
            return Inbound::Ignored;
        }
        if !self.roster.is_self(&message.to) {
            tracing::debug!(
                from = %message.from.fingerprint(),
                to = %message.to.fingerprint(),
                "ignoring message for another participant"
            );
            return Inbound::Ignored;
        }

        let seq = self.delivery.reserve();
        tracing::debug!(seq, from = %message.from.fingerprint(), "message queued");

        match self.keys.derive_shared_secret(&message.from) {
            Ok(key) => Inbound::Decrypt(DecryptJob {
                seq,
                envelope: message,
                key,
            }),
            Err(error) => {
                tracing::warn!(seq, error = %error, "cannot derive key for sender");
                self.delivery.complete(
                    seq,
                    HistoryItem::Failed {
                        from: message.from,
                        to: message.to,
                        timestamp: message.timestamp,
                        error,
                    },
                );
                Inbound::Settled
            }
        }
    }

    /// Apply a finished decryption and release whatever is now in order.
    pub fn complete_decrypt(&mut self, result: DecryptResult) -> Vec<Delivery> {
        if let HistoryItem::Failed { error, from, .. } = &result.item {
            tracing::warn!(seq = result.seq, from = %from.fingerprint(), error = %error, "message rejected");
        }
        if !self.delivery.complete(result.seq, result.item) {
            tracing::debug!(seq = result.seq, "stale decrypt result discarded");
        }
        self.delivery.drain_ready()
    }

    /// Release whatever is ready without completing anything.
    pub fn drain_ready(&mut self) -> Vec<Delivery> {
        self.delivery.drain_ready()
    }

    /// Encrypt `text` for `to`.
    ///
    /// Nothing is recorded until the caller confirms the frame went out with
    /// [`record_sent`](Self::record_sent).
    pub fn prepare_send(&mut self, to: &PeerKey, text: &str) -> Result<Outbound, ChatError> {
        if self.state != SessionState::Active {
            return Err(ChatError::NotConnected);
        }
        let me = self.roster.self_key().ok_or(ChatError::NotConnected)?;
        self.roster.validate_target(to)?;

        let len = text.chars().count();
        if len > self.max_message_len {
            return Err(ChatError::MessageTooLong {
                max: self.max_message_len,
                got: len,
            });
        }

        let key = self.keys.derive_shared_secret(to)?;
        let sealed = MessageEnvelope::seal(me, *to, text, &key)?;
        let entry = ConversationEntry {
            from: me,
            to: *to,
            text: text.to_string(),
            timestamp: sealed.timestamp.clone(),
            direction: Direction::Sent,
        };
        let frame = Envelope::Message(sealed).to_frame()?;
        Ok(Outbound { frame, entry })
    }

    /// Record a sent message in its own slot and release what is ready.
    pub fn record_sent(&mut self, entry: ConversationEntry) -> Vec<Delivery> {
        let seq = self.delivery.record_sent(entry);
        tracing::debug!(seq, "message sent");
        self.delivery.drain_ready()
    }

    /// Make `peer` the current conversation target.
    pub fn select(&mut self, peer: &PeerKey) -> Result<Identity, ChatError> {
        if self.state != SessionState::Active {
            return Err(ChatError::NotConnected);
        }
        let identity = self.roster.select(peer)?;
        tracing::debug!(peer = %peer.fingerprint(), "peer selected");
        Ok(identity)
    }

    /// End the session: zeroize key material, clear the roster, drop
    /// pending slots.
    ///
    /// Returns `false` if there was no session to close.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if matches!(self.state, SessionState::Idle | SessionState::Closed) {
            return false;
        }

        self.keys.clear();
        self.roster.clear();
        let dropped = self.delivery.discard_pending();
        self.state = SessionState::Closed;
        tracing::info!(reason = %reason, dropped_pending = dropped, "session closed");
        self.close_reason = Some(reason);
        true
    }

    /// Number of cached per-peer secrets.
    pub fn cached_secrets(&self) -> usize {
        self.keys.cached_secrets()
    }

    /// Local identity while active.
    pub fn me(&self) -> Option<Identity> {
        self.roster
            .self_key()
            .map(|key| Identity::new(self.name.clone(), key))
    }

    /// Consumer view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            me: self.me(),
            peers: self.roster.peers().cloned().collect(),
            selected: self.roster.selected().cloned(),
            history: self.delivery.history(),
            close_reason: self.close_reason.clone(),
            cached_secrets: self.keys.cached_secrets(),
        }
    }
}
