//! Awareness: ephemeral per-client presence metadata.
//!
//! Awareness carries state that needs sharing but not conflict resolution
//! or persistence: who is in the room, what color their cursor is, where it
//! sits. Each client's entry carries a monotonically increasing logical
//! clock, so updates arriving late or duplicated simply lose to fresher
//! data — last writer wins per client id.
//!
//! Departures are driven by channel membership, not timeouts: the relay
//! reports who left, and only entries whose stored identity matches the
//! departed member are removed. The local client's own entry is never
//! cleared by somebody else's departure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use yrs::sync::awareness::{Awareness, AwarenessUpdate};
use yrs::Doc;

use crate::error::{Result, SyncError};

/// Cursor colors assigned to users without an explicit color, keyed off the
/// user id so every replica picks the same one.
const CURSOR_COLORS: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E9",
];

/// Presence state for one client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AwarenessState {
    /// Who this client is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,

    /// Current cursor/selection in the shared buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorSelection>,
}

/// User identification shown to other participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable user id; matches the channel member id.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Cursor highlight color, e.g. "#FF6B6B".
    pub color: String,
}

impl UserInfo {
    /// Create a user with a palette color derived from the id.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let color = Self::color_for(&id).to_string();
        Self {
            id,
            name: name.into(),
            color,
        }
    }

    /// Create a user with an explicit color.
    pub fn with_color(
        id: impl Into<String>,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }

    /// Deterministic palette color for a user id.
    pub fn color_for(id: &str) -> &'static str {
        let index = id.as_bytes().first().copied().unwrap_or(0) as usize;
        CURSOR_COLORS[index % CURSOR_COLORS.len()]
    }
}

/// A cursor position or selection range, as offsets into the shared buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSelection {
    /// Selection start (equal to `head` for a bare cursor).
    pub anchor: u32,

    /// Selection end / caret position.
    pub head: u32,
}

impl CursorSelection {
    pub fn caret(offset: u32) -> Self {
        Self {
            anchor: offset,
            head: offset,
        }
    }
}

/// Awareness table for a room, wrapping the CRDT awareness primitive.
pub struct RoomAwareness {
    inner: Awareness,
}

impl RoomAwareness {
    /// Create an awareness instance bound to a document.
    pub fn new(doc: &Doc) -> Self {
        Self {
            inner: Awareness::new(doc.clone()),
        }
    }

    /// The local awareness client id.
    pub fn client_id(&self) -> u64 {
        self.inner.client_id()
    }

    /// Set the local user identity, keeping any existing cursor.
    pub fn set_local_user(&mut self, user: UserInfo) -> Result<()> {
        let mut state: AwarenessState = self.inner.local_state().unwrap_or_default();
        state.user = Some(user);
        self.set_local_state(&state)
    }

    /// Set the local cursor, keeping the user identity.
    pub fn set_local_cursor(&mut self, cursor: Option<CursorSelection>) -> Result<()> {
        let mut state: AwarenessState = self.inner.local_state().unwrap_or_default();
        state.cursor = cursor;
        self.set_local_state(&state)
    }

    /// Replace the local client's full awareness state.
    pub fn set_local_state(&mut self, state: &AwarenessState) -> Result<()> {
        self.inner
            .set_local_state(state)
            .map_err(|e| SyncError::AwarenessFailure(e.to_string()))
    }

    /// Clear the local client's state (mark as gone).
    pub fn clear_local_state(&mut self) {
        self.inner.clean_local_state();
    }

    /// The local client's awareness state, if set.
    pub fn local_state(&self) -> Option<AwarenessState> {
        self.inner.local_state()
    }

    /// All live awareness states, keyed by client id.
    pub fn states(&self) -> HashMap<u64, AwarenessState> {
        let mut result = HashMap::new();
        for (client_id, client_state) in self.inner.iter() {
            if let Some(ref json_str) = client_state.data {
                if let Ok(state) = serde_json::from_str(json_str) {
                    result.insert(client_id, state);
                }
            }
        }
        result
    }

    /// Users currently present in the room, ordered by user id.
    pub fn connected_users(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self
            .states()
            .into_values()
            .filter_map(|state| state.user)
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users.dedup_by(|a, b| a.id == b.id);
        users
    }

    /// Encode an update carrying only the local client's entry.
    ///
    /// Broadcasts always describe the clients that changed — for local
    /// mutations that is exactly the local entry. Each participant speaks
    /// for itself, which keeps message size flat as the room grows.
    pub fn encode_local_update(&self) -> Result<AwarenessUpdate> {
        self.inner
            .update_with_clients(vec![self.inner.client_id()])
            .map_err(|e| SyncError::AwarenessFailure(e.to_string()))
    }

    /// Merge an awareness update from a peer. Entries with stale clocks are
    /// ignored by the underlying primitive.
    pub fn apply_update(&mut self, update: AwarenessUpdate) -> Result<()> {
        self.inner
            .apply_update(update)
            .map_err(|e| SyncError::AwarenessFailure(e.to_string()))
    }

    /// Remove the entries belonging to a departed channel member.
    ///
    /// Matching is by stored user identity against the member id — not by
    /// table cardinality, and never the local client's own entry, so an
    /// unrelated departure cannot wipe the wrong user's presence.
    /// Returns the awareness client ids that were removed.
    pub fn remove_departed(&mut self, member_id: &str) -> Vec<u64> {
        let local_id = self.inner.client_id();
        let mut departed = Vec::new();
        for (client_id, client_state) in self.inner.iter() {
            if client_id == local_id {
                continue;
            }
            let Some(ref json_str) = client_state.data else {
                continue;
            };
            let Ok(state) = serde_json::from_str::<AwarenessState>(json_str) else {
                continue;
            };
            if state.user.as_ref().is_some_and(|user| user.id == member_id) {
                departed.push(client_id);
            }
        }
        for &client_id in &departed {
            self.inner.remove_state(client_id);
        }
        departed
    }
}

impl std::fmt::Debug for RoomAwareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomAwareness")
            .field("client_id", &self.client_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awareness_with_user(id: &str, name: &str) -> RoomAwareness {
        let doc = Doc::new();
        let mut awareness = RoomAwareness::new(&doc);
        awareness.set_local_user(UserInfo::new(id, name)).unwrap();
        awareness
    }

    #[test]
    fn test_set_and_get_local_user() {
        let awareness = awareness_with_user("u1", "Alice");
        let state = awareness.local_state().unwrap();
        assert_eq!(state.user.as_ref().unwrap().name, "Alice");
    }

    #[test]
    fn test_cursor_update_preserves_user() {
        let mut awareness = awareness_with_user("u1", "Alice");
        awareness
            .set_local_cursor(Some(CursorSelection::caret(7)))
            .unwrap();

        let state = awareness.local_state().unwrap();
        assert_eq!(state.user.as_ref().unwrap().id, "u1");
        assert_eq!(state.cursor.as_ref().unwrap().head, 7);
    }

    #[test]
    fn test_color_assignment_is_deterministic() {
        let a = UserInfo::new("carol", "Carol");
        let b = UserInfo::new("carol", "Carol");
        assert_eq!(a.color, b.color);
        assert!(CURSOR_COLORS.contains(&a.color.as_str()));
    }

    #[test]
    fn test_local_update_reaches_peer() {
        let alice = awareness_with_user("u1", "Alice");
        let mut bob = awareness_with_user("u2", "Bob");

        let update = alice.encode_local_update().unwrap();
        bob.apply_update(update).unwrap();

        let users = bob.connected_users();
        let names: Vec<_> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let mut alice = awareness_with_user("u1", "Alice");
        let mut bob = awareness_with_user("u2", "Bob");

        let older = alice.encode_local_update().unwrap();
        alice
            .set_local_cursor(Some(CursorSelection::caret(3)))
            .unwrap();
        let newer = alice.encode_local_update().unwrap();

        bob.apply_update(newer).unwrap();
        bob.apply_update(older).unwrap();

        // The stale frame lost: the cursor set in the newer state survives.
        let states = bob.states();
        let alice_state = states
            .values()
            .find(|s| s.user.as_ref().is_some_and(|u| u.id == "u1"))
            .expect("alice should be present");
        assert_eq!(alice_state.cursor.as_ref().unwrap().head, 3);
    }

    #[test]
    fn test_departure_removes_only_matching_identity() {
        // Members {A, B, C}: B departs, A keeps exactly {A, C}.
        let mut a = awareness_with_user("user-a", "Alice");
        let b = awareness_with_user("user-b", "Bob");
        let c = awareness_with_user("user-c", "Carol");

        let from_b = b.encode_local_update().unwrap();
        let from_c = c.encode_local_update().unwrap();
        a.apply_update(from_b).unwrap();
        a.apply_update(from_c).unwrap();
        assert_eq!(a.connected_users().len(), 3);

        let removed = a.remove_departed("user-b");
        assert_eq!(removed.len(), 1);

        let ids: Vec<_> = a.connected_users().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["user-a", "user-c"]);
    }

    #[test]
    fn test_departure_never_clears_local_entry() {
        // Even if the departing member id matches the local user's id, the
        // local entry survives; only foreign entries are cleared.
        let mut a = awareness_with_user("user-a", "Alice");
        let removed = a.remove_departed("user-a");
        assert!(removed.is_empty());
        assert!(a.local_state().is_some());
    }

    #[test]
    fn test_departure_of_unknown_member_is_a_noop() {
        let mut a = awareness_with_user("user-a", "Alice");
        let b = awareness_with_user("user-b", "Bob");
        let from_b = b.encode_local_update().unwrap();
        a.apply_update(from_b).unwrap();

        let removed = a.remove_departed("user-z");
        assert!(removed.is_empty());
        assert_eq!(a.connected_users().len(), 2);
    }

    #[test]
    fn test_encode_local_update_contains_only_local_client() {
        let mut alice = awareness_with_user("u1", "Alice");
        let bob = awareness_with_user("u2", "Bob");
        let from_bob = bob.encode_local_update().unwrap();
        alice.apply_update(from_bob).unwrap();

        let update = alice.encode_local_update().unwrap();
        assert_eq!(update.clients.len(), 1);
        assert!(update.clients.contains_key(&alice.client_id()));
    }
}
