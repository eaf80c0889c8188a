//! Conversation event handlers: create/join and listing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::events::{Event, EventResult, SessionChannel};
use crate::gateway::hub::Chatter;
use crate::models::{Conversation, NewConversation, Participant};
use crate::storage::StoreError;
use crate::AppState;

use super::{ERR_BAD_ARGS, ERR_UNAUTHORIZED};

const ERR_GET_CONVERSATIONS: &str = "error while getting list of conversations";
const ERR_GET_CONVERSATION: &str = "error while getting a conversation";
const ERR_JOINING_CHAT: &str = "error while joining a chat room";

#[derive(Debug, Deserialize)]
struct AddConversationArgs {
    user_id: u64,
    application_id: u64,
}

#[derive(Debug, Deserialize)]
struct GetConversationListArgs {
    user_id: u64,
}

#[derive(Debug, Serialize)]
struct GetConversationListResult {
    conversations: Vec<ConversationDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationDto {
    pub id: u64,
    pub session_channel: String,
    pub application_id: u64,
    #[serde(rename = "create_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "update_at")]
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationDto {
    fn from(conversation: &Conversation) -> Self {
        let channel = SessionChannel {
            application_id: conversation.application_id,
        };
        Self {
            id: conversation.id,
            session_channel: channel.to_string(),
            application_id: conversation.application_id,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

/// Look up the conversation by application id, create it seeded with the
/// caller if absent, add the caller as a participant if missing, and join
/// the caller into the hub room either way.
pub async fn on_add_conversation(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    let args: AddConversationArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    if args.user_id != chatter.user_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    let channel = SessionChannel {
        application_id: args.application_id,
    };
    tracing::info!(event = %event.name, session_channel = %channel, "event received");

    let existing = match state
        .store
        .conversation_by_application_id(args.application_id)
        .await
    {
        Ok(existing) => existing,
        Err(err) => {
            tracing::error!(%err, "conversation lookup failed");
            return Ok(event.error_reply(ERR_GET_CONVERSATION));
        }
    };

    let conversation = match existing {
        // Creation failure is fatal to the connection.
        None => {
            state
                .store
                .add_conversation(NewConversation {
                    application_id: args.application_id,
                    participants: vec![chatter.user_id],
                })
                .await?
        }
        Some(conversation) => {
            let already_in = conversation
                .participants
                .iter()
                .any(|p| p.user_id == chatter.user_id);
            if !already_in {
                let participant = Participant {
                    user_id: chatter.user_id,
                    conversation_id: conversation.id,
                };
                if let Err(err) = state.store.add_participant(participant).await {
                    tracing::error!(%err, "adding participant failed");
                    return Ok(event.error_reply(ERR_JOINING_CHAT));
                }
            }
            conversation
        }
    };

    if let Err(err) = state.hub.join(chatter, &channel.to_string()) {
        tracing::error!(%err, user_id = chatter.user_id, "room join failed");
        return Ok(event.error_reply(ERR_JOINING_CHAT));
    }

    Ok(event.ok_reply(&ConversationDto::from(&conversation)))
}

pub async fn on_get_conversation_list(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: &Event,
) -> Result<EventResult, StoreError> {
    let args: GetConversationListArgs = match serde_json::from_value(event.args.clone()) {
        Ok(args) => args,
        Err(err) => {
            tracing::error!(%err, event = %event.name, "bad event arguments");
            return Ok(event.error_reply(ERR_BAD_ARGS));
        }
    };

    if args.user_id != chatter.user_id {
        return Ok(event.error_reply(ERR_UNAUTHORIZED));
    }

    tracing::info!(event = %event.name, user_id = args.user_id, "event received");

    let conversations = match state.store.conversations_by_user_id(args.user_id).await {
        Ok(conversations) => conversations,
        Err(err) => {
            tracing::error!(%err, "conversation listing failed");
            return Ok(event.error_reply(ERR_GET_CONVERSATIONS));
        }
    };

    Ok(event.ok_reply(&GetConversationListResult {
        conversations: conversations.iter().map(ConversationDto::from).collect(),
    }))
}
