//! Y-sync wire protocol for playground room collaboration.
//!
//! Frames exchanged through the relay carry either document sync traffic or
//! awareness (presence) traffic:
//!
//! ```text
//! Frame = varUint(message_type) • message_payload
//!
//! message_type:
//!   0 = Sync protocol message
//!   1 = Awareness message
//! ```
//!
//! Sync payloads split further into the two-step reconciliation handshake
//! plus incremental updates:
//!
//! 1. **SyncStep1**: a replica announces its state vector
//! 2. **SyncStep2**: a peer answers with the updates the announcer is missing
//! 3. **Update**: incremental changes broadcast as edits happen
//!
//! Awareness payloads are lib0-encoded awareness updates carrying per-client
//! logical clocks, so stale presence data loses to fresher data regardless
//! of delivery order.

pub mod awareness;
pub mod message;
pub mod sync;

pub use awareness::{AwarenessState, CursorSelection, RoomAwareness, UserInfo};
pub use message::{Message, SyncMessage};
pub use sync::{ConnectionState, SyncProtocol};
