//! Event envelope, wire names, and the session channel key.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire names of the events exchanged with clients.
pub struct EventName;

impl EventName {
    pub const ADD_CONVERSATION: &'static str = "Event.AddConversation";
    pub const GET_CONVERSATION_LIST: &'static str = "Event.GetConversationList";
    pub const GET_MESSAGE_LIST: &'static str = "Event.GetMessageList";
    pub const SEND_MESSAGE: &'static str = "Event.SendMessage";
    /// Push-only: delivered to room peers, never a reply to a request.
    pub const RECEIVE_MESSAGE: &'static str = "Event.ReceiveMessage";
    pub const READ_MESSAGE: &'static str = "Event.ReadMessage";
    pub const GET_UNREAD_INFO: &'static str = "Event.GetUnreadInfo";
    pub const GET_UNREAD_MESSAGES: &'static str = "Event.GetUnreadMessages";
}

/// The closed set of events a connection can request. Built once; an
/// unknown wire name simply fails `parse` and yields an `ok:false` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AddConversation,
    GetConversationList,
    GetMessageList,
    SendMessage,
    ReadMessage,
    GetUnreadInfo,
    GetUnreadMessages,
}

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            EventName::ADD_CONVERSATION => Some(Self::AddConversation),
            EventName::GET_CONVERSATION_LIST => Some(Self::GetConversationList),
            EventName::GET_MESSAGE_LIST => Some(Self::GetMessageList),
            EventName::SEND_MESSAGE => Some(Self::SendMessage),
            EventName::READ_MESSAGE => Some(Self::ReadMessage),
            EventName::GET_UNREAD_INFO => Some(Self::GetUnreadInfo),
            EventName::GET_UNREAD_MESSAGES => Some(Self::GetUnreadMessages),
            _ => None,
        }
    }
}

/// Inbound envelope: `{"name": ..., "args": {...}}`.
#[derive(Debug, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Outbound envelope: `{"name": ..., "ok": ..., "result": ...}`. On failure
/// `result` carries a string message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResult {
    pub name: String,
    pub ok: bool,
    pub result: Value,
}

impl Event {
    pub fn error_reply(&self, message: impl fmt::Display) -> EventResult {
        EventResult {
            name: self.name.clone(),
            ok: false,
            result: Value::String(message.to_string()),
        }
    }

    pub fn ok_reply<T: Serialize>(&self, payload: &T) -> EventResult {
        match serde_json::to_value(payload) {
            Ok(result) => EventResult {
                name: self.name.clone(),
                ok: true,
                result,
            },
            Err(err) => {
                tracing::error!(%err, event = %self.name, "result serialization failed");
                self.error_reply("error marshaling result from a server")
            }
        }
    }
}

/// The room key: a decimal application id today. The format is versioned by
/// segment count, so a future key shape extends `parse` without touching
/// callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionChannel {
    pub application_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSessionChannel;

impl fmt::Display for InvalidSessionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("received session channel value is invalid")
    }
}

impl std::error::Error for InvalidSessionChannel {}

impl SessionChannel {
    pub fn parse(value: &str) -> Result<Self, InvalidSessionChannel> {
        if value.is_empty() {
            return Err(InvalidSessionChannel);
        }

        let mut segments = value.split('_');
        let first = segments.next().ok_or(InvalidSessionChannel)?;
        if segments.next().is_some() {
            return Err(InvalidSessionChannel);
        }

        let application_id = first.parse().map_err(|_| InvalidSessionChannel)?;
        Ok(Self { application_id })
    }
}

impl fmt::Display for SessionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.application_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_channel_round_trip() {
        let channel = SessionChannel::parse("42").unwrap();
        assert_eq!(channel.application_id, 42);
        assert_eq!(channel.to_string(), "42");
    }

    #[test]
    fn session_channel_rejects_bad_values() {
        for value in ["", "a", "1_2", "_", "-1", "1.5"] {
            assert!(SessionChannel::parse(value).is_err(), "{value:?}");
        }
    }

    #[test]
    fn envelope_decodes_name_and_args() {
        let event: Event =
            serde_json::from_str(r#"{"name":"Event.SendMessage","args":{"content":"hi"}}"#)
                .unwrap();
        assert_eq!(event.name, EventName::SEND_MESSAGE);
        assert_eq!(event.args["content"], "hi");
    }

    #[test]
    fn envelope_args_default_to_null() {
        let event: Event = serde_json::from_str(r#"{"name":"Event.GetUnreadInfo"}"#).unwrap();
        assert!(event.args.is_null());
    }

    #[test]
    fn every_wire_name_parses_and_unknown_does_not() {
        for name in [
            EventName::ADD_CONVERSATION,
            EventName::GET_CONVERSATION_LIST,
            EventName::GET_MESSAGE_LIST,
            EventName::SEND_MESSAGE,
            EventName::READ_MESSAGE,
            EventName::GET_UNREAD_INFO,
            EventName::GET_UNREAD_MESSAGES,
        ] {
            assert!(EventKind::parse(name).is_some(), "{name}");
        }
        // The push event is not requestable.
        assert!(EventKind::parse(EventName::RECEIVE_MESSAGE).is_none());
        assert!(EventKind::parse("Event.Bogus").is_none());
    }

    #[test]
    fn error_reply_carries_the_event_name() {
        let event: Event = serde_json::from_str(r#"{"name":"Event.SendMessage"}"#).unwrap();
        let reply = event.error_reply("boom");
        assert_eq!(reply.name, EventName::SEND_MESSAGE);
        assert!(!reply.ok);
        assert_eq!(reply.result, "boom");
    }

    #[test]
    fn reply_round_trips_through_the_wire() {
        let event: Event = serde_json::from_str(r#"{"name":"Event.GetUnreadInfo"}"#).unwrap();
        let reply = event.ok_reply(&serde_json::json!({ "user_id": 7, "unread_count": 3 }));

        let raw = serde_json::to_string(&reply).unwrap();
        let parsed: EventResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.name, reply.name);
        assert_eq!(parsed.ok, reply.ok);
        assert_eq!(parsed.result, reply.result);
    }
}
