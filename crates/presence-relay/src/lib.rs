//! Presence-channel relay contract.
//!
//! This crate defines the pub/sub transport interface the collaboration
//! protocol runs over, without binding to any particular relay SDK. The
//! relay is assumed to provide presence channels: subscribing reports the
//! current member list, membership changes arrive as events, and clients
//! fan small messages out to each other through the relay with no
//! server-side compute and no persistence.
//!
//! ## Contract
//!
//! - [`RelayClient::subscribe`] joins a named channel and returns a
//!   [`RelayChannel`]: a stream of [`ChannelEvent`]s plus a publish handle.
//! - Published messages are **client events**: they reach every other
//!   subscriber on the channel but are never echoed back to the sender.
//! - Payloads are JSON envelopes wrapping a byte array ([`Envelope`]),
//!   because the relay only carries JSON-serializable payloads.
//! - Per-message payloads are capped at [`MAX_CLIENT_EVENT_BYTES`].
//!
//! [`local::LocalRelayHub`] implements the contract in-process for tests,
//! examples, and local development.

pub mod local;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

pub use local::LocalRelayHub;

/// Client event names used on a collaboration channel.
///
/// Relay providers require the `client-` prefix for client-to-client events
/// on presence channels.
pub mod events {
    /// Document sync traffic (sync steps and incremental updates).
    pub const DOC_SYNC: &str = "client-sync";
    /// Awareness (presence metadata) traffic.
    pub const AWARENESS: &str = "client-awareness";
}

/// Maximum size of a single published payload, in bytes.
///
/// Hosted relays enforce a limit of this order on client events; the local
/// hub enforces it too so oversized frames fail the same way everywhere.
pub const MAX_CLIENT_EVENT_BYTES: usize = 10 * 1024;

/// Errors surfaced by the relay transport.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("subscription to {channel} failed: {reason}")]
    Subscription { channel: String, reason: String },

    #[error("payload of {size} bytes exceeds the relay limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("channel is closed")]
    ChannelClosed,

    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Name of a presence channel scoped to a room.
///
/// Rooms map to `presence-room-{room}`. When a room hosts several
/// independent documents (one per problem), the channel is further scoped
/// with a problem suffix so switching problems lands on an isolated channel
/// and old document state does not bleed into the new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Channel for a room's shared document.
    pub fn for_room(room: &str) -> Self {
        Self(format!("presence-room-{room}"))
    }

    /// Channel for a specific problem inside a room.
    pub fn for_room_problem(room: &str, problem: &str) -> Self {
        Self(format!("presence-room-{room}-problem-{problem}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A member of a presence channel, keyed by the authenticated user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
}

impl Member {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// JSON envelope wrapping a binary protocol frame.
///
/// The relay only carries JSON payloads, so binary frames travel as
/// `{"message": [0, 1, 2, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Vec<u8>,
}

impl Envelope {
    pub fn new(message: Vec<u8>) -> Self {
        Self { message }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Events delivered on a subscribed channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The subscription completed; `members` lists everyone currently on
    /// the channel, including the local member.
    SubscriptionSucceeded { members: Vec<Member> },
    /// The subscription was rejected by the relay.
    SubscriptionError { reason: String },
    /// Another member joined the channel.
    MemberAdded { member: Member },
    /// A member left the channel.
    MemberRemoved { member: Member },
    /// A client event published by another member. `payload` is the raw
    /// JSON envelope as delivered by the relay.
    Message { event: String, payload: String },
}

/// Backend half of a subscribed channel: publishing and teardown.
///
/// Implemented per relay backend; [`RelayChannel`] wraps it with envelope
/// handling so protocol code never sees raw payload strings on the way out.
pub trait ChannelBackend: Send + Sync {
    /// Fan `payload` out to every other subscriber of the channel.
    fn publish(&self, event: &str, payload: &str) -> Result<()>;

    /// Leave the channel. Must be idempotent.
    fn unsubscribe(&self);
}

/// A live subscription to a presence channel.
///
/// Dropping the handle unsubscribes, so every subscribe has a guaranteed
/// matching teardown.
pub struct RelayChannel {
    name: ChannelName,
    events: UnboundedReceiver<ChannelEvent>,
    backend: std::sync::Arc<dyn ChannelBackend>,
}

impl RelayChannel {
    pub fn new(
        name: ChannelName,
        events: UnboundedReceiver<ChannelEvent>,
        backend: std::sync::Arc<dyn ChannelBackend>,
    ) -> Self {
        Self {
            name,
            events,
            backend,
        }
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Wait for the next channel event. Returns `None` once the relay side
    /// has gone away (hub dropped, connection lost).
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.events.try_recv().ok()
    }

    /// Publish an envelope as a client event to the other members.
    pub fn publish(&self, event: &str, envelope: &Envelope) -> Result<()> {
        let payload = envelope.to_json()?;
        self.backend.publish(event, &payload)
    }

    /// Leave the channel explicitly. Also happens on drop.
    pub fn unsubscribe(&self) {
        self.backend.unsubscribe();
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.backend.unsubscribe();
    }
}

impl std::fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayChannel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A relay client able to join presence channels.
///
/// Passed explicitly into the session layer; ownership and lifecycle belong
/// to the caller, not to a process-wide singleton.
pub trait RelayClient: Send + Sync {
    fn subscribe(&self, channel: &ChannelName, local_member: Member) -> Result<RelayChannel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_for_room() {
        let name = ChannelName::for_room("a1b2");
        assert_eq!(name.as_str(), "presence-room-a1b2");
    }

    #[test]
    fn test_channel_name_for_room_problem() {
        let name = ChannelName::for_room_problem("a1b2", "two-sum");
        assert_eq!(name.as_str(), "presence-room-a1b2-problem-two-sum");
    }

    #[test]
    fn test_problem_scope_isolates_channels() {
        let plain = ChannelName::for_room("a1b2");
        let scoped = ChannelName::for_room_problem("a1b2", "two-sum");
        assert_ne!(plain, scoped);
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = Envelope::new(vec![0, 1, 255]);
        let json = envelope.to_json().unwrap();
        assert_eq!(json, r#"{"message":[0,1,255]}"#);

        let back = Envelope::from_json(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_envelope_rejects_bad_json() {
        assert!(Envelope::from_json("not json").is_err());
        assert!(Envelope::from_json(r#"{"message":"nope"}"#).is_err());
    }
}
