//! Sync protocol state machine.
//!
//! One state machine per channel connection, not per peer: messages are
//! broadcast to the whole channel, and convergence rests on the merge
//! semantics of the document rather than on point-to-point ordering.
//! Updates may arrive in any order, duplicated, or both; applying them is
//! commutative and idempotent, so the engine never tracks which peer has
//! seen what. It only tracks how far the local replica has come:
//!
//! ```text
//! Disconnected → Connecting → AwaitingSync → Synced
//! ```
//!
//! `Synced` flips on the first cleanly merged SyncStep2 (or Update), or
//! immediately when the local client turns out to be the only channel
//! member — there is nobody to sync from, so the local replica is by
//! definition complete.

use tracing::debug;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::doc::RELAY_ORIGIN;
use crate::error::{Result, SyncError};

use super::message::{Message, SyncMessage};

/// Connection/sync state of a channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No subscription; nothing is processed.
    #[default]
    Disconnected,
    /// Subscribe attempt in flight, not yet confirmed by the relay.
    Connecting,
    /// Subscribed and announced; waiting for the first inbound state.
    AwaitingSync,
    /// Local replica has incorporated peer state (or has no peers).
    Synced,
}

/// Protocol handler driving document synchronization over a channel.
#[derive(Debug, Default)]
pub struct SyncProtocol {
    state: ConnectionState,
}

impl SyncProtocol {
    /// Create a new sync protocol handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the channel subscription has been confirmed.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::AwaitingSync | ConnectionState::Synced
        )
    }

    /// Whether the initial sync is complete.
    pub fn is_synced(&self) -> bool {
        self.state == ConnectionState::Synced
    }

    /// Mark the subscribe attempt as started.
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Handle subscription confirmation and produce the opening SyncStep1.
    ///
    /// `peer_count` is the number of *other* members reported with the
    /// subscription. With no peers there is nothing to reconcile against
    /// and the replica is synced on the spot; the SyncStep1 still goes out
    /// so the flow is identical either way.
    pub fn channel_subscribed(&mut self, doc: &Doc, peer_count: usize) -> Message {
        let sv = {
            let txn = doc.transact();
            txn.state_vector()
        };
        self.state = if peer_count == 0 {
            debug!("sole channel member, marking synced");
            ConnectionState::Synced
        } else {
            ConnectionState::AwaitingSync
        };
        Message::sync_step1(&sv)
    }

    /// Record a failed subscription. Surfaced to callers through
    /// `is_connected`; retrying is the caller's policy, not this engine's.
    pub fn subscription_failed(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Record a transport disconnect.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Record that the last remaining peer left while we were still waiting
    /// for inbound state. Nobody is left to sync from.
    pub fn peers_gone(&mut self) {
        if self.state == ConnectionState::AwaitingSync {
            debug!("all peers departed before first sync reply, marking synced");
            self.state = ConnectionState::Synced;
        }
    }

    /// Handle an incoming sync message and produce any replies.
    pub fn handle_sync_message(&mut self, doc: &Doc, msg: &SyncMessage) -> Result<Vec<Message>> {
        match msg {
            SyncMessage::SyncStep1(sv_data) => self.handle_sync_step1(doc, sv_data),
            SyncMessage::SyncStep2(update_data) => self.handle_inbound_update(doc, update_data),
            SyncMessage::Update(update_data) => self.handle_inbound_update(doc, update_data),
        }
    }

    /// Answer a peer's state vector with the minimal diff it is missing.
    ///
    /// Never the full history: the reply contains exactly the updates the
    /// peer's state vector lacks.
    fn handle_sync_step1(&mut self, doc: &Doc, sv_data: &[u8]) -> Result<Vec<Message>> {
        let remote_sv = StateVector::decode_v1(sv_data).map_err(|e| {
            SyncError::MalformedMessage(format!("failed to decode state vector: {e}"))
        })?;

        let txn = doc.transact();
        let diff = txn.encode_state_as_update_v1(&remote_sv);
        Ok(vec![Message::sync_step2(diff)])
    }

    /// Apply a SyncStep2 or Update. The first clean merge while awaiting
    /// sync completes the initial handshake.
    fn handle_inbound_update(&mut self, doc: &Doc, update_data: &[u8]) -> Result<Vec<Message>> {
        Self::apply_update(doc, update_data)?;
        if self.state == ConnectionState::AwaitingSync {
            debug!("first inbound sync merged, marking synced");
            self.state = ConnectionState::Synced;
        }
        Ok(vec![])
    }

    /// Apply an encoded update to the document under the relay origin, so
    /// the local-update observer does not rebroadcast it.
    fn apply_update(doc: &Doc, update_data: &[u8]) -> Result<()> {
        if update_data.is_empty() {
            return Ok(());
        }

        let update = Update::decode_v1(update_data)
            .map_err(|e| SyncError::MalformedMessage(format!("failed to decode update: {e}")))?;

        let mut txn = doc.transact_mut_with(RELAY_ORIGIN);
        txn.apply_update(update)
            .map_err(|e| SyncError::MergeFailure(e.to_string()))?;

        Ok(())
    }

    /// Full document state as a SyncStep2, computed against the empty state
    /// vector.
    ///
    /// Sent proactively when a brand-new member joins: the joiner has not
    /// had a chance to announce its own SyncStep1 yet, and seeding it
    /// immediately lets it converge without waiting for the handshake.
    pub fn full_state(doc: &Doc) -> Message {
        let txn = doc.transact();
        let update = txn.encode_state_as_update_v1(&StateVector::default());
        Message::sync_step2(update)
    }
}
