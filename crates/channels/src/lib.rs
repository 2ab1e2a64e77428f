//! Persisted channel records and their collaborator stores.
//!
//! The sync engine and message router only see the traits in [`store`];
//! [`sqlite`] provides the SQLite-backed implementations. There is no
//! delete anywhere in this crate: reconciliation flips a channel's status
//! to inactive instead of removing the row.

pub mod model;
pub mod sqlite;
pub mod store;

pub use {
    model::{
        ChannelPatch, ChannelStatus, ConversationEntry, LocalChannel, NewChannel,
        NewConversationEntry, SyncStatus, SyncStatusPatch, now_ms,
    },
    sqlite::{SqliteChannelStore, SqliteConversationStore, SqliteSyncStatusStore},
    store::{ChannelStore, ConversationStore, SyncStatusStore},
};
