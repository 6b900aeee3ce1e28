//! # playground-ysync
//!
//! Realtime document synchronization for collaborative playground rooms,
//! built on [yrs](https://docs.rs/yrs) (Rust port of Y.js) and relayed
//! through a presence pub/sub channel with no server-side compute.
//!
//! ## What it does
//!
//! - **PlaygroundDoc**: CRDT document holding the room's shared code buffer
//! - **Protocol**: y-sync v1 message framing, the two-step sync handshake,
//!   and awareness (presence) propagation with identity-matched departures
//! - **RelayProvider**: binds a document to a presence channel — routes
//!   membership and message events, seeds new joiners with full state, and
//!   rebroadcasts local edits as incremental updates
//! - **RoomSession**: high-level join/leave surface exposing connection and
//!   sync state, connected users, and cursor updates
//!
//! ## How it fits together
//!
//! The relay carries small JSON-wrapped binary frames between clients and
//! reports channel membership; it stores nothing and resolves nothing.
//! Conflict resolution is entirely the CRDT's: updates commute, so
//! duplicated or reordered delivery converges anyway. The protocol layer's
//! job is the session choreography — who announces what when, how late
//! joiners catch up, and how presence tracks membership.
//!
//! ## Example
//!
//! ```rust,no_run
//! use playground_ysync::{RoomSession, SessionConfig, UserInfo};
//! use presence_relay::LocalRelayHub;
//!
//! # async fn run() -> playground_ysync::Result<()> {
//! let relay = LocalRelayHub::new();
//! let mut session = RoomSession::connect(
//!     &relay,
//!     SessionConfig::new("a1b2", UserInfo::new("u1", "Alice")),
//! )?;
//! session
//!     .wait_until_synced(std::time::Duration::from_secs(5))
//!     .await?;
//!
//! session.doc().insert(0, "fn main() {}");
//! # Ok(())
//! # }
//! ```

pub mod doc;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod session;

pub use doc::{PlaygroundDoc, RELAY_ORIGIN};
pub use error::{Result, SyncError};
pub use protocol::{
    AwarenessState, ConnectionState, CursorSelection, Message, RoomAwareness, SyncMessage,
    SyncProtocol, UserInfo,
};
pub use provider::RelayProvider;
pub use session::{RoomSession, SessionConfig};
