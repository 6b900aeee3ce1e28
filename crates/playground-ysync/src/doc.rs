//! Shared editor document built on a Y.Doc.
//!
//! The document holds a single Y.Text root with the room's code buffer.
//! All mutation goes through transactions; updates applied on behalf of the
//! relay carry [`RELAY_ORIGIN`] so the local-update observer can tell them
//! apart from editor-originated changes and skip rebroadcasting them.

use tokio::sync::mpsc::UnboundedSender;
use yrs::{Doc, GetString, Origin, ReadTxn, StateVector, Subscription, Text, TextRef, Transact, WriteTxn};

use crate::error::{Result, SyncError};

/// Y.Doc schema keys.
pub mod keys {
    /// The shared code buffer bound to the editor.
    pub const EDITOR: &str = "editor";
}

/// Origin tag attached to transactions that apply relay-received updates.
///
/// The local-update observer skips transactions carrying this tag, so
/// updates merged from the channel are never broadcast back to it.
pub const RELAY_ORIGIN: &str = "sync-relay";

/// A CRDT document for a collaborative playground room.
///
/// Schema:
/// ```text
/// Y.Doc {
///   editor: Y.Text
/// }
/// ```
///
/// The document has no single owner: every participant holds a replica and
/// replicas converge through update exchange. Cloning shares the underlying
/// Y.Doc.
#[derive(Debug, Clone)]
pub struct PlaygroundDoc {
    doc: Doc,
}

impl PlaygroundDoc {
    /// Create a new empty document.
    pub fn new() -> Self {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            txn.get_or_insert_text(keys::EDITOR);
        }
        Self { doc }
    }

    /// Wrap an existing Y.Doc.
    pub fn from_doc(doc: Doc) -> Self {
        {
            let mut txn = doc.transact_mut();
            txn.get_or_insert_text(keys::EDITOR);
        }
        Self { doc }
    }

    /// Get a reference to the underlying Y.Doc.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The Y.Doc client id of this replica.
    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    /// Get the editor text reference.
    ///
    /// # Panics
    /// Panics if the editor text doesn't exist (can't happen for documents
    /// created through this type).
    pub fn text<T: ReadTxn>(&self, txn: &T) -> TextRef {
        txn.get_text(keys::EDITOR).expect("editor text should exist")
    }

    /// Current content of the shared buffer.
    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        self.text(&txn).get_string(&txn)
    }

    /// Length of the shared buffer, in unicode code units.
    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.text(&txn).len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `chunk` at `index`.
    pub fn insert(&self, index: u32, chunk: &str) {
        let mut txn = self.doc.transact_mut();
        let text = self.text(&txn);
        text.insert(&mut txn, index, chunk);
    }

    /// Remove `len` units starting at `index`.
    pub fn remove(&self, index: u32, len: u32) {
        let mut txn = self.doc.transact_mut();
        let text = self.text(&txn);
        text.remove_range(&mut txn, index, len);
    }

    /// Replace the whole buffer with `content`.
    pub fn replace_all(&self, content: &str) {
        let mut txn = self.doc.transact_mut();
        let text = self.text(&txn);
        let len = text.len(&txn);
        text.remove_range(&mut txn, 0, len);
        text.insert(&mut txn, 0, content);
    }

    /// Seed the buffer with `content` if it is still empty.
    ///
    /// Used after initial sync: a joiner that received no content from any
    /// peer initializes the room from the provided default instead.
    /// Returns whether the seed was applied.
    pub fn seed_if_empty(&self, content: &str) -> bool {
        let mut txn = self.doc.transact_mut();
        let text = self.text(&txn);
        if text.len(&txn) > 0 {
            return false;
        }
        text.insert(&mut txn, 0, content);
        true
    }

    /// Current state vector of this replica.
    pub fn state_vector(&self) -> StateVector {
        let txn = self.doc.transact();
        txn.state_vector()
    }

    /// Forward every locally-originated update to `tx`.
    ///
    /// Updates applied under [`RELAY_ORIGIN`] are filtered out: they came
    /// from the channel and must not loop back onto it. The returned
    /// subscription detaches the observer when dropped.
    pub fn subscribe_local_updates(&self, tx: UnboundedSender<Vec<u8>>) -> Result<Subscription> {
        let relay_origin = Origin::from(RELAY_ORIGIN);
        self.doc
            .observe_update_v1(move |txn, event| {
                if txn.origin() == Some(&relay_origin) {
                    return;
                }
                let _ = tx.send(event.update.clone());
            })
            .map_err(|e| {
                SyncError::SubscriptionFailure(format!("failed to attach update observer: {e}"))
            })
    }
}

impl Default for PlaygroundDoc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::updates::decoder::Decode;
    use yrs::Update;

    #[test]
    fn test_new_doc_is_empty() {
        let doc = PlaygroundDoc::new();
        assert!(doc.is_empty());
        assert_eq!(doc.content(), "");
    }

    #[test]
    fn test_insert_and_remove() {
        let doc = PlaygroundDoc::new();
        doc.insert(0, "hello world");
        doc.remove(5, 6);
        assert_eq!(doc.content(), "hello");
    }

    #[test]
    fn test_replace_all() {
        let doc = PlaygroundDoc::new();
        doc.insert(0, "old content");
        doc.replace_all("fn main() {}");
        assert_eq!(doc.content(), "fn main() {}");
    }

    #[test]
    fn test_seed_only_applies_to_empty_doc() {
        let doc = PlaygroundDoc::new();
        assert!(doc.seed_if_empty("// starter"));
        assert_eq!(doc.content(), "// starter");

        assert!(!doc.seed_if_empty("// other"));
        assert_eq!(doc.content(), "// starter");
    }

    #[test]
    fn test_local_updates_are_observed() {
        let doc = PlaygroundDoc::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = doc.subscribe_local_updates(tx).unwrap();

        doc.insert(0, "abc");

        let update = rx.try_recv().expect("local edit should emit an update");
        assert!(!update.is_empty());
    }

    #[test]
    fn test_relay_origin_updates_are_filtered() {
        let source = PlaygroundDoc::new();
        source.insert(0, "abc");
        let update = {
            let txn = source.doc().transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };

        let doc = PlaygroundDoc::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = doc.subscribe_local_updates(tx).unwrap();

        {
            let mut txn = doc.doc().transact_mut_with(RELAY_ORIGIN);
            txn.apply_update(Update::decode_v1(&update).unwrap()).unwrap();
        }

        assert_eq!(doc.content(), "abc");
        assert!(rx.try_recv().is_err(), "relay-applied update must not be rebroadcast");
    }
}
