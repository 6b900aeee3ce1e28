//! In-process presence relay hub.
//!
//! [`LocalRelayHub`] implements the relay contract entirely in memory:
//! channels are hash-map entries, events are delivered over unbounded mpsc
//! queues, and client events fan out to every subscriber except the sender,
//! matching the no-echo semantics of hosted relays. Used by tests, examples,
//! and local development; a production deployment swaps in a client backed
//! by a real relay service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::debug;

use crate::{
    ChannelBackend, ChannelEvent, ChannelName, Member, RelayChannel, RelayClient, RelayError,
    Result, MAX_CLIENT_EVENT_BYTES,
};

#[derive(Default)]
struct HubState {
    next_handle: u64,
    channels: HashMap<String, Vec<SubscriberSlot>>,
}

struct SubscriberSlot {
    handle: u64,
    member: Member,
    tx: UnboundedSender<ChannelEvent>,
}

/// An in-memory presence relay shared by every subscriber cloned from it.
#[derive(Clone, Default)]
pub struct LocalRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members currently subscribed to `channel`.
    pub fn member_count(&self, channel: &ChannelName) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .channels
                    .get(channel.as_str())
                    .map(|slots| slots.len())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

impl RelayClient for LocalRelayHub {
    fn subscribe(&self, channel: &ChannelName, local_member: Member) -> Result<RelayChannel> {
        let (tx, rx) = unbounded_channel();

        let mut state = self.state.lock().map_err(|_| RelayError::ChannelClosed)?;
        state.next_handle += 1;
        let handle = state.next_handle;

        let slots = state.channels.entry(channel.as_str().to_string()).or_default();

        // The joiner sees everyone already present plus itself; everyone
        // already present sees the joiner arrive.
        let mut members: Vec<Member> = slots.iter().map(|slot| slot.member.clone()).collect();
        members.push(local_member.clone());
        let _ = tx.send(ChannelEvent::SubscriptionSucceeded { members });

        for slot in slots.iter() {
            let _ = slot.tx.send(ChannelEvent::MemberAdded {
                member: local_member.clone(),
            });
        }

        slots.push(SubscriberSlot {
            handle,
            member: local_member.clone(),
            tx,
        });
        debug!(channel = %channel, member = %local_member.id, "subscribed to local relay");

        let backend = Arc::new(LocalChannelBackend {
            state: Arc::clone(&self.state),
            channel: channel.as_str().to_string(),
            handle,
        });
        Ok(RelayChannel::new(channel.clone(), rx, backend))
    }
}

struct LocalChannelBackend {
    state: Arc<Mutex<HubState>>,
    channel: String,
    handle: u64,
}

impl ChannelBackend for LocalChannelBackend {
    fn publish(&self, event: &str, payload: &str) -> Result<()> {
        if payload.len() > MAX_CLIENT_EVENT_BYTES {
            return Err(RelayError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_CLIENT_EVENT_BYTES,
            });
        }

        let state = self.state.lock().map_err(|_| RelayError::ChannelClosed)?;
        let slots = state
            .channels
            .get(&self.channel)
            .ok_or(RelayError::ChannelClosed)?;

        // Client events never echo back to the publisher.
        for slot in slots.iter().filter(|slot| slot.handle != self.handle) {
            let _ = slot.tx.send(ChannelEvent::Message {
                event: event.to_string(),
                payload: payload.to_string(),
            });
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(slots) = state.channels.get_mut(&self.channel) else {
            return;
        };
        let Some(index) = slots.iter().position(|slot| slot.handle == self.handle) else {
            return; // already unsubscribed
        };

        let departed = slots.remove(index);
        for slot in slots.iter() {
            let _ = slot.tx.send(ChannelEvent::MemberRemoved {
                member: departed.member.clone(),
            });
        }
        if slots.is_empty() {
            state.channels.remove(&self.channel);
        }
        debug!(channel = %self.channel, member = %departed.member.id, "unsubscribed from local relay");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Envelope;

    fn drain(channel: &mut RelayChannel) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Some(event) = channel.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_subscribe_reports_member_list() {
        let hub = LocalRelayHub::new();
        let name = ChannelName::for_room("r1");

        let mut a = hub.subscribe(&name, Member::new("alice")).unwrap();
        let mut b = hub.subscribe(&name, Member::new("bob")).unwrap();

        let a_events = drain(&mut a);
        match &a_events[0] {
            ChannelEvent::SubscriptionSucceeded { members } => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].id, "alice");
            }
            other => panic!("expected SubscriptionSucceeded, got {other:?}"),
        }
        assert!(matches!(
            &a_events[1],
            ChannelEvent::MemberAdded { member } if member.id == "bob"
        ));

        let b_events = drain(&mut b);
        match &b_events[0] {
            ChannelEvent::SubscriptionSucceeded { members } => {
                let ids: Vec<_> = members.iter().map(|m| m.id.as_str()).collect();
                assert_eq!(ids, ["alice", "bob"]);
            }
            other => panic!("expected SubscriptionSucceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_publish_fans_out_without_echo() {
        let hub = LocalRelayHub::new();
        let name = ChannelName::for_room("r1");

        let mut a = hub.subscribe(&name, Member::new("alice")).unwrap();
        let mut b = hub.subscribe(&name, Member::new("bob")).unwrap();
        let mut c = hub.subscribe(&name, Member::new("carol")).unwrap();
        drain(&mut a);
        drain(&mut b);
        drain(&mut c);

        a.publish("client-sync", &Envelope::new(vec![1, 2, 3])).unwrap();

        assert!(drain(&mut a).is_empty(), "publisher must not hear its own event");
        for channel in [&mut b, &mut c] {
            let events = drain(channel);
            assert_eq!(events.len(), 1);
            match &events[0] {
                ChannelEvent::Message { event, payload } => {
                    assert_eq!(event, "client-sync");
                    assert_eq!(Envelope::from_json(payload).unwrap().message, vec![1, 2, 3]);
                }
                other => panic!("expected Message, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unsubscribe_notifies_remaining_members() {
        let hub = LocalRelayHub::new();
        let name = ChannelName::for_room("r1");

        let mut a = hub.subscribe(&name, Member::new("alice")).unwrap();
        let b = hub.subscribe(&name, Member::new("bob")).unwrap();
        drain(&mut a);

        drop(b);

        let events = drain(&mut a);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChannelEvent::MemberRemoved { member } if member.id == "bob"
        ));
        assert_eq!(hub.member_count(&name), 1);
    }

    #[test]
    fn test_explicit_unsubscribe_is_idempotent() {
        let hub = LocalRelayHub::new();
        let name = ChannelName::for_room("r1");

        let mut a = hub.subscribe(&name, Member::new("alice")).unwrap();
        let b = hub.subscribe(&name, Member::new("bob")).unwrap();
        drain(&mut a);

        b.unsubscribe();
        drop(b); // second teardown must be a no-op

        let removed = drain(&mut a)
            .into_iter()
            .filter(|event| matches!(event, ChannelEvent::MemberRemoved { .. }))
            .count();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_publish_enforces_payload_limit() {
        let hub = LocalRelayHub::new();
        let name = ChannelName::for_room("r1");
        let a = hub.subscribe(&name, Member::new("alice")).unwrap();
        let _b = hub.subscribe(&name, Member::new("bob")).unwrap();

        let oversized = Envelope::new(vec![0u8; MAX_CLIENT_EVENT_BYTES]);
        let result = a.publish("client-sync", &oversized);
        assert!(matches!(result, Err(RelayError::PayloadTooLarge { .. })));
    }
}
