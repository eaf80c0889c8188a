//! Message event handlers: history, send with fallback broadcast, read
//! markers, and unread counts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::events::{Event, EventName, EventResult, SessionChannel};
use crate::gateway::hub::{Chatter, HubError};
use crate::models::{
    Message, NewMessage, UnreadMarker, CONTENT_IMAGE, CONTENT_TEXT, GLOBAL_PARTICIPANT,
};
use crate::storage::StoreError;
use crate::AppState;

use super::{ERR_BAD_ARGS, ERR_UNAUTHORIZED};

const ERR_CONVERSATION_NOT_FOUND: &str = "conversation not found";
const ERR_GET_MESSAGES: &str = "error while getting messages by conversation id";
const ERR_READ_MESSAGES: &str = "error while reading user messages";
const ERR_UPDATE_MESSAGE: &str = "error while updating a message";
const ERR_ROOM_NOT_FOUND: &str = "error finding a chat room, you should join first";
const ERR_MARSHAL_RESPONSE: &str = "error marshaling result from a server";

#[derive(Debug, Deserialize)]
struct GetMessageListArgs {
    session_channel: String,
    executor_id: u64,
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    session_channel: String,
    content: String,
    /// 1 is text, 2 is an image; anything else is treated as text.
    #[serde(default)]
    content_type: u32,
    sender_id: u64,
}

#[derive(Debug, Deserialize)]
struct ReadMessageArgs {
    executor_id: u64,
    message_id: u64,
}

#[derive(Debug, Serialize)]
struct ReadMessageResult {
    executor_id: u64,
    message_id: u64,
}

#[derive(Debug, Deserialize)]
struct GetUnreadInfoArgs {
    user_id: u64,
}

#[derive(Debug, Serialize)]
struct GetUnreadInfoResult {
    user_id: u64,
    unread_count: u64,
}

#[derive(Debug, Deserialize)]
struct GetUnreadMessagesArgs {
    executor_id: u64,
}

#[derive(Debug, Serialize)]
struct MessageListResult {
    #[serde(rename = "Messages")]
    messages: Vec<MessageDto>,
}

#[derive(Debug, Serialize)]
struct MessageEnvelope {
    message: MessageDto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDto {
    pub id: u64,
    pub session_channel: String,
    pub content: String,
    pub content_type: u32,
    pub sender_id: u64,
    pub read: bool,
    #[serde(rename = "create_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "update_at")]
    pub updated_at: DateTime<Utc>,
}

impl MessageDto {
    fn new(message: &Message, read: bool) -> Self {
        let channel = SessionChannel {
            application_id: message.application_id,
        };
        Self {
            id: message.id,
            session_channel: channel.to_string(),
            content: message.content.clone(),
            content_type: message.content_type,
            sender_id: message.sender_id,
            read,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// A message is read in the viewer's scope unless an unread marker in that
/// scope says otherwise; no marker at all means read. A moderator's scope
/// includes the global (participant 0) markers.
fn is_message_read(
    markers: &[UnreadMarker],
    message: &Message,
    viewer_id: u64,
    is_moderator: bool,
) -> bool {
    markers
        .iter()
        .filter(|m| m.message_id == message.id && m.conversation_id == message.conversation_id)
        .filter(|m| {
            m.participant_id == viewer_id
                || (is_moderator && m.participant_id == GLOBAL_PARTICIPANT)
        })
        .all(|m| m.read)
}

async fn conversation_for(
    state: &AppState,
    channel: &SessionChannel,
) -> Result<Option<crate::models::Conversation>, StoreError> {
    state
        .store
        .conversation_by_application_id(channel.application_id)
        .await
}

pub async fn on_get_message_list(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    let args: GetMessageListArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    let channel = match SessionChannel::parse(&args.session_channel) {
        Ok(channel) => channel,
        Err(err) => {
            tracing::error!(%err, value = %args.session_channel, "bad session channel");
            return Ok(event.error_reply(err));
        }
    };

    if args.executor_id != chatter.user_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    tracing::info!(event = %event.name, session_channel = %channel, "event received");

    let conversation = match conversation_for(state, &channel).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return Ok(event.error_reply(ERR_CONVERSATION_NOT_FOUND)),
        Err(err) => {
            tracing::error!(%err, "conversation lookup failed");
            return Ok(event.error_reply(ERR_CONVERSATION_NOT_FOUND));
        }
    };

    let messages = match state
        .store
        .messages_by_conversation_id(conversation.id)
        .await
    {
        Ok(messages) => messages,
        Err(err) => {
            tracing::error!(%err, "message listing failed");
            return Ok(event.error_reply(ERR_GET_MESSAGES));
        }
    };

    let mut dtos = Vec::with_capacity(messages.len());
    for message in &messages {
        let markers = match state.store.unread_markers_by_message_id(message.id).await {
            Ok(markers) => markers,
            Err(err) => {
                tracing::error!(%err, message_id = message.id, "unread marker lookup failed");
                return Ok(event.error_reply(ERR_GET_MESSAGES));
            }
        };
        let read = is_message_read(&markers, message, chatter.user_id, chatter.is_moderator);
        dtos.push(MessageDto::new(message, read));
    }

    Ok(event.ok_reply(&MessageListResult { messages: dtos }))
}

/// Persist the message, mark it unread for every other participant, and
/// deliver it: first to the room excluding the sender, and when nobody else
/// is there, to every connected moderator plus a global unread marker so
/// any moderator can claim the conversation later.
pub async fn on_send_message(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    let args: SendMessageArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    if chatter.user_id != args.sender_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    let channel = match SessionChannel::parse(&args.session_channel) {
        Ok(channel) => channel,
        Err(err) => {
            tracing::error!(%err, value = %args.session_channel, "bad session channel");
            return Ok(event.error_reply(err));
        }
    };

    tracing::info!(event = %event.name, session_channel = %channel, "event received");

    let conversation = match conversation_for(state, &channel).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return Ok(event.error_reply(ERR_CONVERSATION_NOT_FOUND)),
        Err(err) => {
            tracing::error!(%err, "conversation lookup failed");
            return Ok(event.error_reply(ERR_CONVERSATION_NOT_FOUND));
        }
    };

    let key = channel.to_string();
    if !chatter.in_room(&key) {
        return Ok(event.error_reply(ERR_ROOM_NOT_FOUND));
    }

    let content_type = match args.content_type {
        CONTENT_TEXT | CONTENT_IMAGE => args.content_type,
        _ => CONTENT_TEXT,
    };

    // Persistence failure here is fatal to the connection.
    let message = state
        .store
        .add_message(NewMessage {
            conversation_id: conversation.id,
            application_id: conversation.application_id,
            sender_id: args.sender_id,
            content: args.content,
            content_type,
        })
        .await?;

    // Every other participant gets a marker to clear on read.
    for participant in &conversation.participants {
        if participant.user_id == message.sender_id {
            continue;
        }
        let marker = UnreadMarker {
            message_id: message.id,
            conversation_id: message.conversation_id,
            participant_id: participant.user_id,
            read: false,
        };
        if let Err(err) = state.store.add_unread_marker(marker).await {
            tracing::error!(%err, participant = participant.user_id, "unread marker insert failed");
        }
    }

    let dto = MessageDto::new(&message, false);
    let push = EventResult {
        name: EventName::RECEIVE_MESSAGE.to_string(),
        ok: true,
        result: match serde_json::to_value(&MessageEnvelope {
            message: dto.clone(),
        }) {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%err, "push serialization failed");
                return Ok(event.error_reply(ERR_MARSHAL_RESPONSE));
            }
        },
    };
    let raw = match serde_json::to_string(&push) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(%err, "push serialization failed");
            return Ok(event.error_reply(ERR_MARSHAL_RESPONSE));
        }
    };

    let delivered = state
        .hub
        .broadcast_room(&key, &raw, |peer| peer.conn_id != chatter.conn_id);
    if delivered == Err(HubError::NoMatch) {
        // Nobody else in the room: fall back to every connected moderator
        // and leave a marker any moderator can claim.
        if let Err(err) = state.hub.broadcast(&raw, |peer| {
            peer.conn_id != chatter.conn_id && peer.is_moderator
        }) {
            tracing::debug!(%err, "no moderators connected for fallback broadcast");
        }

        let marker = UnreadMarker {
            message_id: message.id,
            conversation_id: message.conversation_id,
            participant_id: GLOBAL_PARTICIPANT,
            read: false,
        };
        if let Err(err) = state.store.add_unread_marker(marker).await {
            tracing::error!(%err, "global unread marker insert failed");
        }
    }

    Ok(event.ok_reply(&MessageEnvelope { message: dto }))
}

/// A moderator clears both the global and its own marker; everyone else
/// clears only their own.
pub async fn on_read_message(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    let args: ReadMessageArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    tracing::info!(event = %event.name, "event received");

    if chatter.user_id != args.executor_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    if chatter.is_moderator {
        if let Err(err) = state
            .store
            .mark_read(args.message_id, GLOBAL_PARTICIPANT)
            .await
        {
            tracing::error!(%err, "marking global scope read failed");
            return Ok(event.error_reply(ERR_UPDATE_MESSAGE));
        }
    }

    if let Err(err) = state.store.mark_read(args.message_id, chatter.user_id).await {
        tracing::error!(%err, "marking personal scope read failed");
        return Ok(event.error_reply(ERR_UPDATE_MESSAGE));
    }

    Ok(event.ok_reply(&ReadMessageResult {
        executor_id: args.executor_id,
        message_id: args.message_id,
    }))
}

pub async fn on_get_unread_info(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    let args: GetUnreadInfoArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    if chatter.user_id != args.user_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    tracing::info!(event = %event.name, user_id = args.user_id, "event received");

    let count = if chatter.is_moderator {
        state.store.count_unread_for_user_and_global(args.user_id).await
    } else {
        state.store.count_unread_for_user(args.user_id).await
    };

    let count = match count {
        Ok(count) => count,
        Err(err) => {
            tracing::error!(%err, "unread count failed");
            return Ok(event.error_reply(ERR_READ_MESSAGES));
        }
    };

    Ok(event.ok_reply(&GetUnreadInfoResult {
        user_id: args.user_id,
        unread_count: count,
    }))
}

/// Moderator-only listing of every message unread in the caller's scope.
pub async fn on_get_unread_messages(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    if !chatter.is_moderator {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    let args: GetUnreadMessagesArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    if args.executor_id != chatter.user_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    let messages = match state.store.unread_messages_for_user(chatter.user_id).await {
        Ok(messages) => messages,
        Err(err) => {
            tracing::error!(%err, "unread listing failed");
            return Ok(event.error_reply(ERR_READ_MESSAGES));
        }
    };

    Ok(event.ok_reply(&MessageListResult {
        messages: messages.iter().map(|m| MessageDto::new(m, false)).collect(),
    }))
}
