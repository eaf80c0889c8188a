//! In-memory `ChatStore` implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::models::{
    Conversation, Message, NewConversation, NewMessage, Participant, UnreadMarker,
    GLOBAL_PARTICIPANT,
};

use super::{ChatStore, StoreError};

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    markers: Vec<UnreadMarker>,
    next_conversation_id: u64,
    next_message_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                conversations: Vec::new(),
                messages: Vec::new(),
                markers: Vec::new(),
                next_conversation_id: 1,
                next_message_id: 1,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn unread_message_ids(&self, participant_id: u64, include_global: bool) -> HashSet<u64> {
        self.markers
            .iter()
            .filter(|m| !m.read)
            .filter(|m| {
                m.participant_id == participant_id
                    || (include_global && m.participant_id == GLOBAL_PARTICIPANT)
            })
            .map(|m| m.message_id)
            .collect()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn add_conversation(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock();
        let id = inner.next_conversation_id;
        inner.next_conversation_id += 1;

        let now = Utc::now();
        let stored = Conversation {
            id,
            application_id: conversation.application_id,
            participants: conversation
                .participants
                .iter()
                .map(|&user_id| Participant {
                    user_id,
                    conversation_id: id,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };
        inner.conversations.push(stored.clone());
        Ok(stored)
    }

    async fn conversation_by_application_id(
        &self,
        application_id: u64,
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .conversations
            .iter()
            .find(|c| c.application_id == application_id)
            .cloned())
    }

    async fn conversations_by_user_id(
        &self,
        user_id: u64,
    ) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .conversations
            .iter()
            .filter(|c| c.participants.iter().any(|p| p.user_id == user_id))
            .cloned()
            .collect())
    }

    async fn add_participant(&self, participant: Participant) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let conversation = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == participant.conversation_id)
            .ok_or_else(|| StoreError("conversation does not exist".to_string()))?;
        if !conversation
            .participants
            .iter()
            .any(|p| p.user_id == participant.user_id)
        {
            conversation.participants.push(participant);
        }
        Ok(())
    }

    async fn participants_by_conversation_id(
        &self,
        conversation_id: u64,
    ) -> Result<Vec<Participant>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.participants.clone())
            .unwrap_or_default())
    }

    async fn add_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock();
        let id = inner.next_message_id;
        inner.next_message_id += 1;

        let now = Utc::now();
        let stored = Message {
            id,
            conversation_id: message.conversation_id,
            application_id: message.application_id,
            sender_id: message.sender_id,
            content: message.content,
            content_type: message.content_type,
            created_at: now,
            updated_at: now,
        };
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn messages_by_conversation_id(
        &self,
        conversation_id: u64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn unread_messages_for_user(
        &self,
        participant_id: u64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock();
        let unread = inner.unread_message_ids(participant_id, true);
        Ok(inner
            .messages
            .iter()
            .filter(|m| unread.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn add_unread_marker(&self, marker: UnreadMarker) -> Result<(), StoreError> {
        self.inner.lock().markers.push(marker);
        Ok(())
    }

    async fn unread_markers_by_message_id(
        &self,
        message_id: u64,
    ) -> Result<Vec<UnreadMarker>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .markers
            .iter()
            .filter(|m| m.message_id == message_id)
            .copied()
            .collect())
    }

    async fn mark_read(&self, message_id: u64, participant_id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for marker in inner
            .markers
            .iter_mut()
            .filter(|m| m.message_id == message_id && m.participant_id == participant_id)
        {
            marker.read = true;
        }
        Ok(())
    }

    async fn count_unread_for_user(&self, participant_id: u64) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.unread_message_ids(participant_id, false).len() as u64)
    }

    async fn count_unread_for_user_and_global(
        &self,
        participant_id: u64,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.unread_message_ids(participant_id, true).len() as u64)
    }
}
