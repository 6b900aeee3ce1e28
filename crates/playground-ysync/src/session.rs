//! Room session: the caller-facing surface of a collaboration session.
//!
//! A session owns the shared document, its awareness table, and the relay
//! provider wiring them to the room's channel. Tearing a session down and
//! building a new one is the reconnection model: nothing is kept across
//! destroy/reconnect cycles.
//!
//! ## Example
//!
//! ```rust,no_run
//! use playground_ysync::{RoomSession, SessionConfig, UserInfo};
//! use presence_relay::LocalRelayHub;
//!
//! # async fn run() -> playground_ysync::Result<()> {
//! let relay = LocalRelayHub::new();
//! let config = SessionConfig::new("a1b2", UserInfo::new("u1", "Alice"))
//!     .with_problem("two-sum")
//!     .with_seed("// write your solution here\n");
//!
//! let mut session = RoomSession::connect(&relay, config)?;
//! session
//!     .wait_until_synced(std::time::Duration::from_secs(5))
//!     .await?;
//! println!("{}", session.content());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use presence_relay::{ChannelName, Member, RelayClient};
use tracing::debug;

use crate::doc::PlaygroundDoc;
use crate::error::{Result, SyncError};
use crate::protocol::awareness::{CursorSelection, RoomAwareness, UserInfo};
use crate::provider::RelayProvider;

/// Configuration for joining a room.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Room code identifying the shared channel.
    pub room_code: String,
    /// Problem scope inside the room. Each problem gets its own channel so
    /// switching problems never leaks old document state into the new one.
    pub problem_id: Option<String>,
    /// Local user identity, broadcast through awareness.
    pub user: UserInfo,
    /// Default content applied only if the document is still empty once
    /// initial sync completes.
    pub seed: Option<String>,
}

impl SessionConfig {
    /// Create a configuration for a room.
    pub fn new(room_code: impl Into<String>, user: UserInfo) -> Self {
        Self {
            room_code: room_code.into(),
            problem_id: None,
            user,
            seed: None,
        }
    }

    /// Scope the session to a problem inside the room.
    pub fn with_problem(mut self, problem_id: impl Into<String>) -> Self {
        self.problem_id = Some(problem_id.into());
        self
    }

    /// Set the default content for a brand-new document.
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// The presence channel this configuration maps to.
    pub fn channel_name(&self) -> ChannelName {
        match &self.problem_id {
            Some(problem) => ChannelName::for_room_problem(&self.room_code, problem),
            None => ChannelName::for_room(&self.room_code),
        }
    }
}

/// A live collaboration session for one room (and optionally one problem).
pub struct RoomSession {
    provider: RelayProvider,
    config: SessionConfig,
}

impl RoomSession {
    /// Join a room with a fresh document.
    pub fn connect(relay: &dyn RelayClient, config: SessionConfig) -> Result<Self> {
        Self::connect_with_doc(relay, config, PlaygroundDoc::new())
    }

    /// Join a room reusing an existing document replica.
    pub fn connect_with_doc(
        relay: &dyn RelayClient,
        config: SessionConfig,
        doc: PlaygroundDoc,
    ) -> Result<Self> {
        let awareness = RoomAwareness::new(doc.doc());
        let mut provider = RelayProvider::connect(
            relay,
            config.channel_name(),
            Member::new(config.user.id.clone()),
            doc,
            awareness,
        )?;
        provider.set_local_user(config.user.clone())?;
        Ok(Self { provider, config })
    }

    /// The shared document.
    pub fn doc(&self) -> &PlaygroundDoc {
        self.provider.doc()
    }

    /// Current content of the shared buffer.
    pub fn content(&self) -> String {
        self.provider.doc().content()
    }

    /// The awareness table for the room.
    pub fn awareness(&self) -> &RoomAwareness {
        self.provider.awareness()
    }

    /// Whether the channel subscription is live.
    pub fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }

    /// Whether initial sync has completed.
    pub fn is_synced(&self) -> bool {
        self.provider.is_synced()
    }

    /// Users currently present in the room, ordered by id.
    pub fn connected_users(&self) -> Vec<UserInfo> {
        self.provider.connected_users()
    }

    /// Update the local user identity.
    pub fn set_local_user(&mut self, user: UserInfo) -> Result<()> {
        self.config.user = user.clone();
        self.provider.set_local_user(user)
    }

    /// Update the local cursor/selection.
    pub fn set_local_cursor(&mut self, cursor: Option<CursorSelection>) -> Result<()> {
        self.provider.set_local_cursor(cursor)
    }

    /// Wait for and process the next input. See
    /// [`RelayProvider::process_next`].
    pub async fn process_next(&mut self) -> Result<bool> {
        self.provider.process_next().await
    }

    /// Drain all immediately available inputs without waiting. Returns the
    /// number processed.
    pub fn pump(&mut self) -> usize {
        let processed = self.provider.pump();
        if self.provider.is_synced() {
            self.apply_seed_if_needed();
        }
        processed
    }

    /// Process events until initial sync completes or `timeout` elapses.
    ///
    /// The protocol engine only exposes sync state; this bounded wait is
    /// the session-level convenience built on top of it.
    pub async fn wait_until_synced(&mut self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.provider.is_synced() {
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return Err(SyncError::SyncTimeout);
            };
            match tokio::time::timeout(remaining, self.provider.process_next()).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    return Err(SyncError::SubscriptionFailure(
                        "channel closed before initial sync completed".into(),
                    ))
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(SyncError::SyncTimeout),
            }
        }
        self.apply_seed_if_needed();
        Ok(())
    }

    /// Seed the document with the configured default, but only when sync
    /// left it empty — peer content always wins over the seed.
    fn apply_seed_if_needed(&mut self) {
        if let Some(seed) = self.config.seed.take() {
            if self.provider.doc().seed_if_empty(&seed) {
                debug!(room = %self.config.room_code, "seeded empty document with default content");
            }
        }
    }

    /// Leave the room and release the session's resources.
    pub fn close(mut self) {
        self.provider.destroy();
    }
}
