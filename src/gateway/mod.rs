//! The connection hub and its event-dispatch protocol.

pub mod chatter;
pub mod conversations;
pub mod events;
pub mod hub;
pub mod messages;
pub mod server;

use std::sync::Arc;

use events::{Event, EventKind, EventResult};
use hub::Chatter;

use crate::storage::StoreError;
use crate::AppState;

/// Identity-mismatch reply, shared by every handler.
pub(crate) const ERR_UNAUTHORIZED: &str =
    "a registered user is different from one you are trying to use";
/// Typed-argument decode failure reply.
pub(crate) const ERR_BAD_ARGS: &str = "error marshaling message";

/// Route one inbound event to its handler.
///
/// Unknown names and handler-level failures become `ok:false` replies and
/// the connection lives on; only a `StoreError` bubbling out of a create
/// path is fatal and unwinds the connection.
pub async fn dispatch(
    state: &AppState,
    chatter: &Arc<Chatter>,
    event: Event,
) -> Result<EventResult, StoreError> {
    let Some(kind) = EventKind::parse(&event.name) else {
        tracing::error!(event = %event.name, "not supported event");
        return Ok(event.error_reply(format_args!("not supported event: {}", event.name)));
    };

    match kind {
        EventKind::AddConversation => conversations::on_add_conversation(state, chatter, &event).await,
        EventKind::GetConversationList => {
            conversations::on_get_conversation_list(state, chatter, &event).await
        }
        EventKind::GetMessageList => messages::on_get_message_list(state, chatter, &event).await,
        EventKind::SendMessage => messages::on_send_message(state, chatter, &event).await,
        EventKind::ReadMessage => messages::on_read_message(state, chatter, &event).await,
        EventKind::GetUnreadInfo => messages::on_get_unread_info(state, chatter, &event).await,
        EventKind::GetUnreadMessages => {
            messages::on_get_unread_messages(state, chatter, &event).await
        }
    }
}
