//! Ordered delivery of conversation entries.
//!
//! Decryption runs off the dispatch path and may finish in any order. Each
//! inbound message therefore reserves a slot when it is classified, and
//! results are written into that slot. Only the contiguous completed prefix is
//! released to the consumer, so history always follows arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::chat::ChatError;
use crate::crypto::PeerKey;

/// Whether an entry was written locally or received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the local participant.
    Sent,
    /// Received from a peer and successfully decrypted.
    Received,
}

/// A decrypted, displayable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    /// Sender's public key.
    pub from: PeerKey,
    /// Recipient's public key.
    pub to: PeerKey,
    /// Message text.
    pub text: String,
    /// Timestamp carried by the envelope.
    pub timestamp: String,
    /// Sent or received.
    pub direction: Direction,
}

/// One position in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryItem {
    /// A message that was sent or successfully decrypted.
    Entry(ConversationEntry),
    /// An inbound message that could not be decrypted.
    Failed {
        /// Claimed sender.
        from: PeerKey,
        /// Claimed recipient.
        to: PeerKey,
        /// Timestamp carried by the envelope.
        timestamp: String,
        /// Why the message was rejected.
        error: ChatError,
    },
}

impl HistoryItem {
    /// The entry, if this slot holds a readable message.
    pub fn entry(&self) -> Option<&ConversationEntry> {
        match self {
            HistoryItem::Entry(entry) => Some(entry),
            HistoryItem::Failed { .. } => None,
        }
    }

    /// True for error markers.
    pub fn is_failure(&self) -> bool {
        matches!(self, HistoryItem::Failed { .. })
    }
}

/// A history item released to the consumer, with its arrival sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Arrival sequence number (starts at 1).
    pub seq: u64,
    /// The released item.
    pub item: HistoryItem,
}

/// Released history as of one point in time.
///
/// The queue only ever appends to the shared list, so a view is an `Arc` and
/// a length; taking one is O(1) no matter how long the conversation is.
#[derive(Clone, Default)]
pub struct HistoryView {
    shared: Arc<RwLock<Vec<Delivery>>>,
    len: usize,
}

impl HistoryView {
    /// Number of released items in this view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing had been released yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The item at `index`, in sequence order.
    pub fn get(&self, index: usize) -> Option<Delivery> {
        self.with(|items| items.get(index).cloned())
    }

    /// The most recently released item.
    pub fn last(&self) -> Option<Delivery> {
        self.with(|items| items.last().cloned())
    }

    /// Copy the view out.
    pub fn to_vec(&self) -> Vec<Delivery> {
        self.with(<[Delivery]>::to_vec)
    }

    /// Borrow the items without copying them.
    pub fn with<R>(&self, f: impl FnOnce(&[Delivery]) -> R) -> R {
        let items = self.shared.read();
        f(&items[..self.len.min(items.len())])
    }
}

impl fmt::Debug for HistoryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|items| f.debug_list().entries(items).finish())
    }
}

impl PartialEq for HistoryView {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        if Arc::ptr_eq(&self.shared, &other.shared) {
            return true;
        }
        let mine = self.to_vec();
        other.with(|theirs| mine.as_slice() == theirs)
    }
}

impl Eq for HistoryView {}

#[derive(Debug)]
enum Slot {
    Pending,
    Ready(HistoryItem),
}

/// Slot array keyed by arrival sequence number.
#[derive(Debug)]
pub struct DeliveryQueue {
    /// Unreleased slots; `slots[0]` has sequence number `next_release`.
    slots: VecDeque<Slot>,
    next_release: u64,
    /// Append-only between resets; snapshots share it.
    history: Arc<RwLock<Vec<Delivery>>>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryQueue {
    /// Create an empty queue. The first reserved sequence number is 1.
    pub fn new() -> Self {
        Self {
            slots: VecDeque::new(),
            next_release: 1,
            history: Arc::default(),
        }
    }

    /// Reserve the next slot in arrival order.
    pub fn reserve(&mut self) -> u64 {
        let seq = self.next_seq();
        self.slots.push_back(Slot::Pending);
        seq
    }

    /// Reserve and immediately fill a slot for a locally sent message.
    pub fn record_sent(&mut self, entry: ConversationEntry) -> u64 {
        let seq = self.reserve();
        self.complete(seq, HistoryItem::Entry(entry));
        seq
    }

    /// Fill a reserved slot.
    ///
    /// Returns `false` when the slot is unknown (never reserved, already
    /// released, or dropped by [`reset`](Self::reset)) or already filled.
    pub fn complete(&mut self, seq: u64, item: HistoryItem) -> bool {
        if seq < self.next_release {
            return false;
        }
        let index = (seq - self.next_release) as usize;
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Pending) => {
                *slot = Slot::Ready(item);
                true
            }
            _ => false,
        }
    }

    /// Release every completed slot at the head of the queue, in order.
    pub fn drain_ready(&mut self) -> Vec<Delivery> {
        let mut released = Vec::new();
        let mut history = self.history.write();
        while let Some(Slot::Ready(_)) = self.slots.front() {
            if let Some(Slot::Ready(item)) = self.slots.pop_front() {
                let delivery = Delivery {
                    seq: self.next_release,
                    item,
                };
                self.next_release += 1;
                history.push(delivery.clone());
                released.push(delivery);
            }
        }
        released
    }

    /// Everything released so far, in sequence order.
    pub fn history(&self) -> HistoryView {
        let len = self.history.read().len();
        HistoryView {
            shared: Arc::clone(&self.history),
            len,
        }
    }

    /// Number of reserved slots not yet released.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    /// Sequence number the next reservation will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_release + self.slots.len() as u64
    }

    /// Drop reserved slots that never completed. Released history is kept.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.slots.len();
        self.next_release += dropped as u64;
        self.slots.clear();
        dropped
    }

    /// Drop all slots and history for a fresh session.
    ///
    /// Sequence numbers keep counting up, so a result reserved before the
    /// reset can never fill a slot reserved after it. Views taken earlier keep
    /// showing the old history.
    pub fn reset(&mut self) {
        self.discard_pending();
        self.history = Arc::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(text: &str) -> HistoryItem {
        HistoryItem::Entry(ConversationEntry {
            from: PeerKey::from_bytes([2; 32]),
            to: PeerKey::from_bytes([1; 32]),
            text: text.to_string(),
            timestamp: "t".to_string(),
            direction: Direction::Received,
        })
    }

    fn texts(deliveries: &[Delivery]) -> Vec<String> {
        deliveries
            .iter()
            .map(|d| match &d.item {
                HistoryItem::Entry(e) => e.text.clone(),
                HistoryItem::Failed { .. } => "<failed>".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_sequence_starts_at_one() {
        let mut queue = DeliveryQueue::new();
        assert_eq!(queue.reserve(), 1);
        assert_eq!(queue.reserve(), 2);
        assert_eq!(queue.next_seq(), 3);
    }

    #[test]
    fn test_out_of_order_completion_released_in_order() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();
        let s2 = queue.reserve();
        let s3 = queue.reserve();

        // Completion order 2, 1, 3
        assert!(queue.complete(s2, received("two")));
        assert!(queue.drain_ready().is_empty());

        assert!(queue.complete(s1, received("one")));
        let released = queue.drain_ready();
        assert_eq!(texts(&released), vec!["one", "two"]);

        assert!(queue.complete(s3, received("three")));
        assert_eq!(texts(&queue.drain_ready()), vec!["three"]);

        assert_eq!(texts(&queue.history().to_vec()), vec!["one", "two", "three"]);
        let seqs: Vec<u64> = queue.history().to_vec().iter().map(|d| d.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_failure_occupies_slot() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();
        let s2 = queue.reserve();

        queue.complete(s2, received("after"));
        queue.complete(
            s1,
            HistoryItem::Failed {
                from: PeerKey::from_bytes([2; 32]),
                to: PeerKey::from_bytes([1; 32]),
                timestamp: "t".to_string(),
                error: ChatError::AuthenticationFailure,
            },
        );

        let released = queue.drain_ready();
        assert_eq!(released.len(), 2);
        assert!(released[0].item.is_failure());
        assert_eq!(released[1].item.entry().unwrap().text, "after");
    }

    #[test]
    fn test_gap_holds_later_results() {
        let mut queue = DeliveryQueue::new();
        let _s1 = queue.reserve();
        let s2 = queue.reserve();
        queue.complete(s2, received("two"));

        assert!(queue.drain_ready().is_empty());
        assert_eq!(queue.pending(), 2);
        assert!(queue.history().is_empty());
    }

    #[test]
    fn test_sent_entries_interleave() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();
        queue.record_sent(ConversationEntry {
            from: PeerKey::from_bytes([1; 32]),
            to: PeerKey::from_bytes([2; 32]),
            text: "reply".to_string(),
            timestamp: "t".to_string(),
            direction: Direction::Sent,
        });

        // Sent entry waits behind the pending inbound message
        assert!(queue.drain_ready().is_empty());

        queue.complete(s1, received("question"));
        assert_eq!(texts(&queue.drain_ready()), vec!["question", "reply"]);
    }

    #[test]
    fn test_double_and_stale_completion_ignored() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();

        assert!(queue.complete(s1, received("first")));
        assert!(!queue.complete(s1, received("again")));
        queue.drain_ready();

        assert!(!queue.complete(s1, received("late")));
        assert!(!queue.complete(99, received("unknown")));
        assert_eq!(texts(&queue.history().to_vec()), vec!["first"]);
    }

    #[test]
    fn test_discard_pending_keeps_history() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();
        queue.complete(s1, received("kept"));
        queue.drain_ready();
        let s2 = queue.reserve();

        assert_eq!(queue.discard_pending(), 1);
        assert!(!queue.complete(s2, received("late")));
        assert_eq!(texts(&queue.history().to_vec()), vec!["kept"]);
        assert_eq!(queue.reserve(), 3);
    }

    #[test]
    fn test_reset_discards_in_flight() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();
        queue.reset();

        assert!(!queue.complete(s1 + 5, received("stale")));
        assert_eq!(queue.pending(), 0);
        assert!(queue.history().is_empty());
    }

    #[test]
    fn test_sequence_survives_reset() {
        let mut queue = DeliveryQueue::new();
        let old = queue.reserve();
        queue.reset();

        let new = queue.reserve();
        assert!(new > old);

        // The result for the old slot must not land in the new one
        assert!(!queue.complete(old, received("old session")));
        assert!(queue.drain_ready().is_empty());

        assert!(queue.complete(new, received("new session")));
        assert_eq!(texts(&queue.drain_ready()), vec!["new session"]);
        assert_eq!(texts(&queue.history().to_vec()), vec!["new session"]);
    }

    #[test]
    fn test_history_view_is_point_in_time() {
        let mut queue = DeliveryQueue::new();
        let s1 = queue.reserve();
        queue.complete(s1, received("one"));
        queue.drain_ready();
        let before = queue.history();

        let s2 = queue.reserve();
        queue.complete(s2, received("two"));
        queue.drain_ready();
        let after = queue.history();

        assert_eq!(texts(&before.to_vec()), vec!["one"]);
        assert_eq!(texts(&after.to_vec()), vec!["one", "two"]);
        assert_ne!(before, after);
        assert_eq!(after.last().map(|d| d.seq), Some(2));

        queue.reset();
        assert_eq!(after.len(), 2);
        assert_eq!(after.get(1).map(|d| d.seq), Some(2));
        assert!(queue.history().is_empty());
    }
}
