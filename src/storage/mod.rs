//! The persistence boundary consumed by event handlers.
//!
//! Backed by a database in production and `MemoryStore` in single-process
//! deployments and tests. All calls are return-or-fail; the core never
//! retries them.

pub mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::models::{
    Conversation, Message, NewConversation, NewMessage, Participant, UnreadMarker,
};

pub use memory::MemoryStore;

/// A failed storage call. Read-path failures surface as `ok:false` replies;
/// failures while creating a conversation or message are fatal to the
/// connection.
#[derive(Debug)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn add_conversation(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, StoreError>;

    async fn conversation_by_application_id(
        &self,
        application_id: u64,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn conversations_by_user_id(
        &self,
        user_id: u64,
    ) -> Result<Vec<Conversation>, StoreError>;

    async fn add_participant(&self, participant: Participant) -> Result<(), StoreError>;

    async fn participants_by_conversation_id(
        &self,
        conversation_id: u64,
    ) -> Result<Vec<Participant>, StoreError>;

    async fn add_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn messages_by_conversation_id(
        &self,
        conversation_id: u64,
    ) -> Result<Vec<Message>, StoreError>;

    /// Messages carrying an unread marker in the given participant's scope,
    /// the global scope included. Used by the moderator-only listing.
    async fn unread_messages_for_user(
        &self,
        participant_id: u64,
    ) -> Result<Vec<Message>, StoreError>;

    async fn add_unread_marker(&self, marker: UnreadMarker) -> Result<(), StoreError>;

    async fn unread_markers_by_message_id(
        &self,
        message_id: u64,
    ) -> Result<Vec<UnreadMarker>, StoreError>;

    async fn mark_read(&self, message_id: u64, participant_id: u64) -> Result<(), StoreError>;

    /// Distinct unread message count in the personal scope only.
    async fn count_unread_for_user(&self, participant_id: u64) -> Result<u64, StoreError>;

    /// Distinct unread message count in the personal plus global scope.
    async fn count_unread_for_user_and_global(
        &self,
        participant_id: u64,
    ) -> Result<u64, StoreError>;
}
