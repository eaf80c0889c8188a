//! Domain value objects owned by the persistence collaborator and consumed
//! by event handlers as immutable values within one request.

use chrono::{DateTime, Utc};

/// Plain text message content.
pub const CONTENT_TEXT: u32 = 1;
/// Image message content.
pub const CONTENT_IMAGE: u32 = 2;

/// Participant scope of an unread marker that belongs to no one in
/// particular; any moderator may claim it.
pub const GLOBAL_PARTICIPANT: u64 = 0;

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: u64,
    pub application_id: u64,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub user_id: u64,
    pub conversation_id: u64,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub conversation_id: u64,
    pub application_id: u64,
    pub sender_id: u64,
    pub content: String,
    pub content_type: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A record that a given message is unread for a given participant scope.
/// `participant_id == GLOBAL_PARTICIPANT` marks the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadMarker {
    pub message_id: u64,
    pub conversation_id: u64,
    pub participant_id: u64,
    pub read: bool,
}

/// Conversation to be persisted; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub application_id: u64,
    pub participants: Vec<u64>,
}

/// Message to be persisted; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: u64,
    pub application_id: u64,
    pub sender_id: u64,
    pub content: String,
    pub content_type: u32,
}
