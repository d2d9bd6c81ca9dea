//! Roster tracking.
//!
//! The relay broadcasts the full participant list whenever membership changes.
//! Each update replaces the roster wholesale; anyone missing from the latest
//! update has left, whether or not a departure was ever announced.

use std::collections::HashSet;

use crate::chat::protocol::Identity;
use crate::chat::ChatError;
use crate::crypto::PeerKey;

/// What changed between two consecutive roster updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChange {
    /// Identities present now but not before.
    pub joined: Vec<Identity>,
    /// Identities present before but not now.
    pub departed: Vec<Identity>,
    /// Selected peer that vanished and was deselected.
    pub deselected: Option<PeerKey>,
}

impl RosterChange {
    /// True when the update did not change membership.
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.departed.is_empty() && self.deselected.is_none()
    }
}

/// Authoritative view of the currently connected participants.
#[derive(Debug, Default)]
pub struct RosterTracker {
    me: Option<PeerKey>,
    identities: Vec<Identity>,
    selected: Option<PeerKey>,
}

impl RosterTracker {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the local public key so it can be excluded from peers.
    pub fn set_self(&mut self, key: PeerKey) {
        self.me = Some(key);
    }

    /// The local public key, once a session is active.
    pub fn self_key(&self) -> Option<PeerKey> {
        self.me
    }

    /// Replace the roster with `identities`.
    ///
    /// Duplicate public keys are collapsed (first occurrence wins). If the
    /// currently selected peer is gone it is deselected and reported.
    pub fn apply_update(&mut self, identities: Vec<Identity>) -> RosterChange {
        let mut seen = HashSet::new();
        let next: Vec<Identity> = identities
            .into_iter()
            .filter(|i| seen.insert(i.public_key))
            .collect();

        let before: HashSet<PeerKey> = self.identities.iter().map(|i| i.public_key).collect();
        let joined = next
            .iter()
            .filter(|i| !before.contains(&i.public_key))
            .cloned()
            .collect();
        let departed = self
            .identities
            .iter()
            .filter(|i| !seen.contains(&i.public_key))
            .cloned()
            .collect();

        self.identities = next;

        let deselected = match self.selected {
            Some(key) if !self.contains(&key) => {
                self.selected = None;
                Some(key)
            }
            _ => None,
        };

        RosterChange {
            joined,
            departed,
            deselected,
        }
    }

    /// Every identity in relay order, including the local one.
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Selectable peers: the roster minus the local identity.
    pub fn peers(&self) -> impl Iterator<Item = &Identity> {
        let me = self.me;
        self.identities
            .iter()
            .filter(move |i| Some(i.public_key) != me)
    }

    /// Whether `key` is currently on the roster.
    pub fn contains(&self, key: &PeerKey) -> bool {
        self.identities.iter().any(|i| &i.public_key == key)
    }

    /// Look up an identity by public key.
    pub fn get(&self, key: &PeerKey) -> Option<&Identity> {
        self.identities.iter().find(|i| &i.public_key == key)
    }

    /// Whether `key` is the local identity.
    pub fn is_self(&self, key: &PeerKey) -> bool {
        self.me.as_ref() == Some(key)
    }

    /// Check that `key` can receive messages: not self, and on the roster.
    pub fn validate_target(&self, key: &PeerKey) -> Result<&Identity, ChatError> {
        if self.is_self(key) {
            return Err(ChatError::InvalidTarget(
                "cannot message yourself".to_string(),
            ));
        }
        self.get(key).ok_or_else(|| {
            ChatError::InvalidTarget(format!("{} is not on the roster", key.fingerprint()))
        })
    }

    /// Select a peer as the current conversation target.
    pub fn select(&mut self, key: &PeerKey) -> Result<Identity, ChatError> {
        let identity = self.validate_target(key)?.clone();
        self.selected = Some(identity.public_key);
        Ok(identity)
    }

    /// The currently selected peer, if any.
    pub fn selected(&self) -> Option<&Identity> {
        self.selected.as_ref().and_then(|k| self.get(k))
    }

    /// Peers whose display name matches `name` exactly. Names may collide.
    pub fn find_by_name(&self, name: &str) -> Vec<&Identity> {
        self.peers().filter(|i| i.name == name).collect()
    }

    /// Forget everything, including the local key.
    pub fn clear(&mut self) {
        self.me = None;
        self.identities.clear();
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str, byte: u8) -> Identity {
        Identity::new(name, PeerKey::from_bytes([byte; 32]))
    }

    fn tracker_with_self() -> RosterTracker {
        let mut roster = RosterTracker::new();
        roster.set_self(PeerKey::from_bytes([1; 32]));
        roster
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("alice", 1), id("bob", 2), id("carol", 3)]);

        let change = roster.apply_update(vec![id("alice", 1), id("dave", 4)]);

        assert_eq!(roster.identities().len(), 2);
        assert_eq!(change.joined, vec![id("dave", 4)]);
        assert_eq!(change.departed, vec![id("bob", 2), id("carol", 3)]);
    }

    #[test]
    fn test_same_roster_twice_is_idempotent() {
        let mut roster = tracker_with_self();
        let update = vec![id("alice", 1), id("bob", 2)];

        roster.apply_update(update.clone());
        let first: Vec<Identity> = roster.peers().cloned().collect();

        let change = roster.apply_update(update);
        let second: Vec<Identity> = roster.peers().cloned().collect();

        assert!(change.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_self_never_a_peer() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("alice", 1), id("bob", 2)]);

        let peers: Vec<&str> = roster.peers().map(|i| i.name.as_str()).collect();
        assert_eq!(peers, vec!["bob"]);
    }

    #[test]
    fn test_select_self_rejected() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("alice", 1), id("bob", 2)]);

        let result = roster.select(&PeerKey::from_bytes([1; 32]));
        assert!(matches!(result, Err(ChatError::InvalidTarget(_))));
        assert!(roster.selected().is_none());
    }

    #[test]
    fn test_select_unknown_rejected() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("alice", 1)]);

        let result = roster.select(&PeerKey::from_bytes([9; 32]));
        assert!(matches!(result, Err(ChatError::InvalidTarget(_))));
    }

    #[test]
    fn test_departed_selection_is_cleared() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("alice", 1), id("bob", 2)]);
        roster.select(&PeerKey::from_bytes([2; 32])).unwrap();
        assert_eq!(roster.selected().unwrap().name, "bob");

        let change = roster.apply_update(vec![id("alice", 1)]);

        assert_eq!(change.deselected, Some(PeerKey::from_bytes([2; 32])));
        assert!(roster.selected().is_none());
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("bob", 2), id("bobby", 2), id("carol", 3)]);

        assert_eq!(roster.identities().len(), 2);
        assert_eq!(roster.get(&PeerKey::from_bytes([2; 32])).unwrap().name, "bob");
    }

    #[test]
    fn test_name_collisions_are_allowed() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("bob", 2), id("bob", 3)]);

        assert_eq!(roster.find_by_name("bob").len(), 2);
        assert_eq!(roster.find_by_name("alice").len(), 0);
    }

    #[test]
    fn test_clear() {
        let mut roster = tracker_with_self();
        roster.apply_update(vec![id("alice", 1), id("bob", 2)]);
        roster.select(&PeerKey::from_bytes([2; 32])).unwrap();

        roster.clear();

        assert!(roster.identities().is_empty());
        assert!(roster.self_key().is_none());
        assert!(roster.selected().is_none());
    }
}
