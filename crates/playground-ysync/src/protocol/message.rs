//! Protocol message framing.
//!
//! Messages are tagged binary frames in lib0 encoding. The relay already
//! delimits whole messages, so frames carry only a leading varint tag and
//! the payload; sync sub-messages additionally length-prefix their buffers.
//! The format matches the framing spoken by the y-protocols ecosystem, so
//! replicas written against other stacks interoperate on the same channel.

use yrs::encoding::read::Cursor;
use yrs::encoding::read::Read;
use yrs::encoding::write::Write;
use yrs::sync::awareness::AwarenessUpdate;
use yrs::updates::encoder::Encode;
use yrs::StateVector;

use crate::error::{Result, SyncError};

/// Message type tags.
pub mod message_type {
    /// Sync protocol messages (SyncStep1, SyncStep2, Update)
    pub const SYNC: u8 = 0;
    /// Awareness update messages
    pub const AWARENESS: u8 = 1;
}

/// Sync message kind tags.
pub mod sync_type {
    /// Initial sync request carrying a state vector
    pub const SYNC_STEP1: u8 = 0;
    /// Response carrying missing updates
    pub const SYNC_STEP2: u8 = 1;
    /// Incremental document update
    pub const UPDATE: u8 = 2;
}

/// A protocol message exchanged through the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Document synchronization traffic.
    Sync(SyncMessage),
    /// Awareness update carrying presence metadata.
    Awareness(Vec<u8>),
}

impl Message {
    /// Decode a message from bytes.
    ///
    /// Empty or truncated buffers fail with `MalformedMessage`; a tag this
    /// protocol doesn't know fails with `UnknownMessageType`. Either way the
    /// caller drops the frame — a bad message never takes the session down.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        Self::decode_from(&mut cursor)
    }

    /// Decode a message from a reader.
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let tag = reader
            .read_var::<u8>()
            .map_err(|e| SyncError::MalformedMessage(format!("failed to read message tag: {e}")))?;

        match tag {
            message_type::SYNC => {
                let sync_msg = SyncMessage::decode_from(reader)?;
                Ok(Message::Sync(sync_msg))
            }
            message_type::AWARENESS => {
                let data = reader.read_buf().map_err(|e| {
                    SyncError::MalformedMessage(format!("failed to read awareness data: {e}"))
                })?;
                Ok(Message::Awareness(data.to_vec()))
            }
            other => Err(SyncError::UnknownMessageType(other)),
        }
    }

    /// Encode this message to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    /// Encode this message to a writer.
    pub fn encode_to<W: Write>(&self, writer: &mut W) {
        match self {
            Message::Sync(sync_msg) => {
                writer.write_var(message_type::SYNC);
                sync_msg.encode_to(writer);
            }
            Message::Awareness(data) => {
                writer.write_var(message_type::AWARENESS);
                writer.write_buf(data);
            }
        }
    }

    /// Create a SyncStep1 message from a state vector.
    pub fn sync_step1(sv: &StateVector) -> Self {
        Message::Sync(SyncMessage::SyncStep1(sv.encode_v1()))
    }

    /// Create a SyncStep2 message from an update.
    pub fn sync_step2(update: Vec<u8>) -> Self {
        Message::Sync(SyncMessage::SyncStep2(update))
    }

    /// Create an Update message.
    pub fn update(update: Vec<u8>) -> Self {
        Message::Sync(SyncMessage::Update(update))
    }

    /// Create an Awareness message from an awareness update.
    pub fn awareness(update: &AwarenessUpdate) -> Self {
        Message::Awareness(update.encode_v1())
    }
}

/// A sync protocol message for document synchronization.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Initial sync request containing the sender's state vector. The
    /// receiver answers with SyncStep2 containing the updates the sender
    /// is missing.
    SyncStep1(Vec<u8>),

    /// Response to SyncStep1 with the requester's missing updates, as an
    /// encoded Y.Doc update.
    SyncStep2(Vec<u8>),

    /// An incremental document update, broadcast after initial sync
    /// whenever the document changes. Applied the same way as SyncStep2.
    Update(Vec<u8>),
}

impl SyncMessage {
    /// Decode a sync message from a reader.
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let tag = reader.read_var::<u8>().map_err(|e| {
            SyncError::MalformedMessage(format!("failed to read sync message tag: {e}"))
        })?;

        let data = reader.read_buf().map_err(|e| {
            SyncError::MalformedMessage(format!("failed to read sync message data: {e}"))
        })?;

        match tag {
            sync_type::SYNC_STEP1 => Ok(SyncMessage::SyncStep1(data.to_vec())),
            sync_type::SYNC_STEP2 => Ok(SyncMessage::SyncStep2(data.to_vec())),
            sync_type::UPDATE => Ok(SyncMessage::Update(data.to_vec())),
            other => Err(SyncError::UnknownMessageType(other)),
        }
    }

    /// Encode this sync message to a writer.
    pub fn encode_to<W: Write>(&self, writer: &mut W) {
        match self {
            SyncMessage::SyncStep1(data) => {
                writer.write_var(sync_type::SYNC_STEP1);
                writer.write_buf(data);
            }
            SyncMessage::SyncStep2(data) => {
                writer.write_var(sync_type::SYNC_STEP2);
                writer.write_buf(data);
            }
            SyncMessage::Update(data) => {
                writer.write_var(sync_type::UPDATE);
                writer.write_buf(data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_step1_roundtrip() {
        let sv = StateVector::default();
        let msg = Message::sync_step1(&sv);
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_sync_step2_roundtrip() {
        let update = vec![1, 2, 3, 4, 5];
        let msg = Message::sync_step2(update.clone());
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_update_roundtrip() {
        let msg = Message::update(vec![10, 20, 30]);
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_awareness_roundtrip() {
        let msg = Message::Awareness(vec![7, 8, 9]);
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_empty_buffer_is_malformed() {
        let result = Message::decode(&[]);
        assert!(matches!(result, Err(SyncError::MalformedMessage(_))));
    }

    #[test]
    fn test_truncated_sync_message_is_malformed() {
        // Sync tag followed by a sync kind but no buffer.
        let result = Message::decode(&[message_type::SYNC, sync_type::UPDATE]);
        assert!(matches!(result, Err(SyncError::MalformedMessage(_))));
    }

    #[test]
    fn test_unknown_tag_is_rejected_not_panicked() {
        let result = Message::decode(&[42, 0, 0]);
        assert!(matches!(result, Err(SyncError::UnknownMessageType(42))));
    }

    #[test]
    fn test_unknown_sync_kind_is_rejected() {
        let result = Message::decode(&[message_type::SYNC, 9, 1, 0]);
        assert!(matches!(result, Err(SyncError::UnknownMessageType(9))));
    }

    #[test]
    fn test_message_type_tags() {
        assert_eq!(message_type::SYNC, 0);
        assert_eq!(message_type::AWARENESS, 1);
        assert_eq!(sync_type::SYNC_STEP1, 0);
        assert_eq!(sync_type::SYNC_STEP2, 1);
        assert_eq!(sync_type::UPDATE, 2);
    }
}
