//! Relay provider: binds a document and its awareness to a presence channel.
//!
//! The provider is the event-driven heart of a collaboration session. It
//! subscribes to the room's channel, routes inbound channel events into the
//! sync engine and the awareness table, and republishes local changes as
//! relay messages:
//!
//! - subscription confirmed → announce our state vector (SyncStep1) and our
//!   awareness entry
//! - member added → proactively seed the joiner with full document state
//!   and rebroadcast our awareness entry
//! - member removed → drop the departed member's awareness entries
//! - inbound frame → decode and dispatch; malformed frames are logged and
//!   dropped, never escalated into the dispatch path
//!
//! Everything runs on whatever task polls [`RelayProvider::process_next`]
//! (or drains [`RelayProvider::pump`]); the provider itself spawns nothing
//! and holds no locks.

use std::collections::HashSet;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, warn};
use yrs::sync::awareness::AwarenessUpdate;
use yrs::updates::decoder::Decode;
use yrs::Subscription;

use presence_relay::{events, ChannelEvent, ChannelName, Envelope, Member, RelayChannel, RelayClient};

use crate::doc::PlaygroundDoc;
use crate::error::{Result, SyncError};
use crate::protocol::awareness::{CursorSelection, RoomAwareness, UserInfo};
use crate::protocol::message::Message;
use crate::protocol::sync::{ConnectionState, SyncProtocol};

/// One processed input, either from the channel or from the local document.
enum Pumped {
    Channel(ChannelEvent),
    ChannelClosed,
    LocalUpdate(Vec<u8>),
    LocalClosed,
}

/// Binds a shared document and awareness table to one relay channel.
pub struct RelayProvider {
    doc: PlaygroundDoc,
    awareness: RoomAwareness,
    protocol: SyncProtocol,
    channel: Option<RelayChannel>,
    local_updates: UnboundedReceiver<Vec<u8>>,
    update_subscription: Option<Subscription>,
    local_member: Member,
    peers: HashSet<String>,
}

impl RelayProvider {
    /// Subscribe to `channel_name` and start relaying for `doc`.
    ///
    /// The relay client is injected by the caller, which also owns its
    /// lifecycle; the provider only holds the one channel subscription it
    /// creates here.
    pub fn connect(
        relay: &dyn RelayClient,
        channel_name: ChannelName,
        local_member: Member,
        doc: PlaygroundDoc,
        awareness: RoomAwareness,
    ) -> Result<Self> {
        let (tx, local_updates) = unbounded_channel();
        let update_subscription = doc.subscribe_local_updates(tx)?;

        let mut protocol = SyncProtocol::new();
        protocol.begin_connect();
        debug!(channel = %channel_name, member = %local_member.id, "subscribing to relay channel");

        let channel = relay
            .subscribe(&channel_name, local_member.clone())
            .map_err(|e| SyncError::SubscriptionFailure(e.to_string()))?;

        Ok(Self {
            doc,
            awareness,
            protocol,
            channel: Some(channel),
            local_updates,
            update_subscription: Some(update_subscription),
            local_member,
            peers: HashSet::new(),
        })
    }

    /// The shared document.
    pub fn doc(&self) -> &PlaygroundDoc {
        &self.doc
    }

    /// The awareness table.
    pub fn awareness(&self) -> &RoomAwareness {
        &self.awareness
    }

    /// Whether the channel subscription is live.
    pub fn is_connected(&self) -> bool {
        self.protocol.is_connected()
    }

    /// Whether initial sync has completed.
    pub fn is_synced(&self) -> bool {
        self.protocol.is_synced()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.protocol.state()
    }

    /// Ids of the other channel members currently present.
    pub fn peers(&self) -> &HashSet<String> {
        &self.peers
    }

    /// Users currently visible in awareness, ordered by id.
    pub fn connected_users(&self) -> Vec<UserInfo> {
        self.awareness.connected_users()
    }

    /// Set the local user identity and broadcast the change.
    pub fn set_local_user(&mut self, user: UserInfo) -> Result<()> {
        self.awareness.set_local_user(user)?;
        self.broadcast_local_awareness();
        Ok(())
    }

    /// Set the local cursor and broadcast the change.
    pub fn set_local_cursor(&mut self, cursor: Option<CursorSelection>) -> Result<()> {
        self.awareness.set_local_cursor(cursor)?;
        self.broadcast_local_awareness();
        Ok(())
    }

    /// Wait for and process the next input (channel event or local edit).
    ///
    /// Returns `false` once the channel is gone and no further processing
    /// will happen. Cancellation-safe, so it can sit inside `select!`.
    pub async fn process_next(&mut self) -> Result<bool> {
        let pumped = {
            let Some(channel) = self.channel.as_mut() else {
                return Ok(false);
            };
            tokio::select! {
                event = channel.recv() => match event {
                    Some(event) => Pumped::Channel(event),
                    None => Pumped::ChannelClosed,
                },
                update = self.local_updates.recv() => match update {
                    Some(update) => Pumped::LocalUpdate(update),
                    None => Pumped::LocalClosed,
                },
            }
        };
        self.dispatch(pumped)
    }

    /// Drain everything that is immediately available, without waiting.
    ///
    /// Returns the number of inputs processed. Useful for deterministic
    /// stepping in tests and for callers running their own poll loop.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let pumped = if let Some(event) = self.channel.as_mut().and_then(RelayChannel::try_recv)
            {
                Pumped::Channel(event)
            } else if let Ok(update) = self.local_updates.try_recv() {
                Pumped::LocalUpdate(update)
            } else {
                break;
            };
            match self.dispatch(pumped) {
                Ok(true) => processed += 1,
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "error while pumping relay events");
                    break;
                }
            }
        }
        processed
    }

    fn dispatch(&mut self, pumped: Pumped) -> Result<bool> {
        match pumped {
            Pumped::Channel(event) => {
                self.handle_channel_event(event);
                Ok(true)
            }
            Pumped::LocalUpdate(update) => {
                self.broadcast_doc_update(update);
                Ok(true)
            }
            Pumped::ChannelClosed | Pumped::LocalClosed => {
                debug!(channel = ?self.channel.as_ref().map(RelayChannel::name), "relay channel closed");
                self.protocol.disconnect();
                self.channel = None;
                Ok(false)
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::SubscriptionSucceeded { members } => {
                self.peers = members
                    .iter()
                    .filter(|member| member.id != self.local_member.id)
                    .map(|member| member.id.clone())
                    .collect();
                debug!(peers = self.peers.len(), "channel subscription succeeded");

                let step1 = self.protocol.channel_subscribed(self.doc.doc(), self.peers.len());
                self.publish_or_log(events::DOC_SYNC, &step1);
                self.broadcast_local_awareness();
            }
            ChannelEvent::SubscriptionError { reason } => {
                warn!(%reason, "channel subscription failed");
                self.protocol.subscription_failed();
            }
            ChannelEvent::MemberAdded { member } => {
                debug!(member = %member.id, "member joined channel");
                if member.id != self.local_member.id {
                    self.peers.insert(member.id.clone());
                }
                // The joiner hasn't announced a state vector yet; seed it
                // with full state so it converges without waiting for the
                // handshake, and let it see our presence right away.
                let seed = SyncProtocol::full_state(self.doc.doc());
                self.publish_or_log(events::DOC_SYNC, &seed);
                self.broadcast_local_awareness();
            }
            ChannelEvent::MemberRemoved { member } => {
                debug!(member = %member.id, "member left channel");
                self.peers.remove(&member.id);
                let removed = self.awareness.remove_departed(&member.id);
                if !removed.is_empty() {
                    debug!(member = %member.id, entries = removed.len(), "cleared departed awareness entries");
                }
                if self.peers.is_empty() {
                    self.protocol.peers_gone();
                }
            }
            ChannelEvent::Message { event, payload } => {
                if let Err(e) = self.handle_relay_message(&event, &payload) {
                    // A bad frame never takes the session down; drop it.
                    warn!(%event, error = %e, "dropping relay message");
                }
            }
        }
    }

    fn handle_relay_message(&mut self, event: &str, payload: &str) -> Result<()> {
        let envelope = Envelope::from_json(payload)
            .map_err(|e| SyncError::MalformedMessage(format!("bad envelope: {e}")))?;
        let message = Message::decode(&envelope.message)?;

        match (event, message) {
            (events::DOC_SYNC, Message::Sync(sync_msg)) => {
                let replies = self.protocol.handle_sync_message(self.doc.doc(), &sync_msg)?;
                for reply in replies {
                    self.publish_or_log(events::DOC_SYNC, &reply);
                }
            }
            (events::AWARENESS, Message::Awareness(data)) => {
                let update = AwarenessUpdate::decode_v1(&data).map_err(|e| {
                    SyncError::MalformedMessage(format!("bad awareness update: {e}"))
                })?;
                self.awareness.apply_update(update)?;
            }
            (event, message) => {
                debug!(%event, ?message, "ignoring frame on unexpected event");
            }
        }
        Ok(())
    }

    /// Broadcast a locally-originated document update.
    fn broadcast_doc_update(&mut self, update: Vec<u8>) {
        if !self.protocol.is_connected() {
            warn!("cannot broadcast document update, not connected");
            return;
        }
        let message = Message::update(update);
        self.publish_or_log(events::DOC_SYNC, &message);
    }

    /// Broadcast the local awareness entry (and only that entry).
    fn broadcast_local_awareness(&mut self) {
        if !self.protocol.is_connected() {
            debug!("not broadcasting awareness, not connected");
            return;
        }
        match self.awareness.encode_local_update() {
            Ok(update) => {
                let message = Message::awareness(&update);
                self.publish_or_log(events::AWARENESS, &message);
            }
            Err(e) => debug!(error = %e, "no local awareness state to broadcast"),
        }
    }

    fn publish_or_log(&self, event: &str, message: &Message) {
        let Some(channel) = self.channel.as_ref() else {
            warn!(%event, "cannot publish, channel is gone");
            return;
        };
        let envelope = Envelope::new(message.encode());
        if let Err(e) = channel.publish(event, &envelope) {
            warn!(%event, error = %e, "failed to publish relay message");
        }
    }

    /// Tear the session down: unsubscribe from the channel, detach the
    /// document observer, and clear the local awareness entry.
    ///
    /// There is no partial resume: a caller that wants the room back
    /// constructs a fresh provider with fresh instances.
    pub fn destroy(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.unsubscribe();
        }
        self.update_subscription = None;
        self.awareness.clear_local_state();
        self.protocol.disconnect();
        self.peers.clear();
    }
}

impl Drop for RelayProvider {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_relay::LocalRelayHub;

    fn provider(hub: &LocalRelayHub, room: &str, user: &str) -> RelayProvider {
        let doc = PlaygroundDoc::new();
        let awareness = RoomAwareness::new(doc.doc());
        let mut provider = RelayProvider::connect(
            hub,
            ChannelName::for_room(room),
            Member::new(user),
            doc,
            awareness,
        )
        .unwrap();
        provider
            .set_local_user(UserInfo::new(user, user))
            .unwrap();
        provider
    }

    #[test]
    fn test_connect_starts_connecting() {
        let hub = LocalRelayHub::new();
        let provider = provider(&hub, "r1", "alice");
        assert_eq!(provider.connection_state(), ConnectionState::Connecting);
        assert!(!provider.is_connected());
    }

    #[test]
    fn test_pump_processes_subscription_and_solo_sync() {
        let hub = LocalRelayHub::new();
        let mut provider = provider(&hub, "r1", "alice");

        assert!(provider.pump() > 0);
        assert!(provider.is_connected());
        assert!(provider.is_synced());
        assert!(provider.peers().is_empty());
    }

    #[test]
    fn test_malformed_envelope_is_dropped_without_state_change() {
        let hub = LocalRelayHub::new();
        let mut provider = provider(&hub, "r1", "alice");
        provider.pump();

        let result = provider.handle_relay_message(events::DOC_SYNC, "not json");
        assert!(matches!(result, Err(SyncError::MalformedMessage(_))));
        assert!(provider.is_synced());
        assert_eq!(provider.doc().content(), "");
    }

    #[test]
    fn test_unknown_frame_tag_is_dropped() {
        let hub = LocalRelayHub::new();
        let mut provider = provider(&hub, "r1", "alice");
        provider.pump();

        let envelope = Envelope::new(vec![42, 1, 2]).to_json().unwrap();
        let result = provider.handle_relay_message(events::DOC_SYNC, &envelope);
        assert!(matches!(result, Err(SyncError::UnknownMessageType(42))));
        assert!(provider.is_synced());
    }

    #[test]
    fn test_destroy_unsubscribes_and_disconnects() {
        let hub = LocalRelayHub::new();
        let name = ChannelName::for_room("r1");
        let mut provider = provider(&hub, "r1", "alice");
        provider.pump();
        assert_eq!(hub.member_count(&name), 1);

        provider.destroy();
        assert_eq!(hub.member_count(&name), 0);
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);
    }
}
