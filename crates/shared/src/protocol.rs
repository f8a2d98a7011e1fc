use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{EntityId, UuidCode};

/// Events the client emits on the realtime connection.
///
/// Serialized as `{"event": "<name>", "data": {...}}`; the event names are the
/// server contract and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    UserJoined {
        email: String,
    },
    DirectMessageToUser {
        sender_uuid: EntityId,
        receiver_uuid: EntityId,
        message: String,
    },
    GroupChatMessage {
        sender_uuid: EntityId,
        group_id: EntityId,
        message: String,
    },
    /// Message into a server-named room; `username` is the sender's full name.
    SendMessage {
        room: String,
        message: String,
        username: String,
    },
    FetchHistory {
        room: String,
    },
    DirectMessagesHistory {
        sender_uuid: EntityId,
        receiver_uuid: EntityId,
    },
    ChatGroupCreate {
        user_uuid: EntityId,
        group_name: String,
    },
    CreateRoom {
        target_uuid: UuidCode,
        logged_in_uuid_code: UuidCode,
    },
}

impl ClientRequest {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::UserJoined { .. } => "user_joined",
            Self::DirectMessageToUser { .. } => "direct_message_to_user",
            Self::GroupChatMessage { .. } => "group_chat_message",
            Self::SendMessage { .. } => "send_message",
            Self::FetchHistory { .. } => "fetch_history",
            Self::DirectMessagesHistory { .. } => "direct_messages_history",
            Self::ChatGroupCreate { .. } => "chat_group_create",
            Self::CreateRoom { .. } => "create_room",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub entity_id: EntityId,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid_code: Option<UuidCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(rename = "_id")]
    pub entity_id: EntityId,
    pub group_name: String,
}

/// One entry of a `direct_messages` history batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectHistoryItem {
    pub sender: EntityId,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "deserialize_wire_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_date: Option<DateTime<Utc>>,
}

/// One entry of a `chat_history` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomHistoryItem {
    pub username: String,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "deserialize_wire_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_date: Option<DateTime<Utc>>,
}

/// Events the server pushes on the realtime connection.
///
/// The addressing fields marked optional are not sent by every server build;
/// receivers fall back to the currently open conversation when they are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReturnJoinedDataList {
        #[serde(default)]
        users: Vec<UserRecord>,
        #[serde(default)]
        groups: Vec<GroupRecord>,
    },
    DirectMessages {
        messages: Vec<DirectHistoryItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_uuid: Option<EntityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_uuid: Option<EntityId>,
    },
    ChatHistory {
        history: Vec<RoomHistoryItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    NewMessage {
        username: String,
        message: String,
        #[serde(
            default,
            deserialize_with = "deserialize_wire_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        created_date: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_uuid: Option<EntityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_uuid: Option<EntityId>,
    },
    GroupMessage {
        message: String,
        user_id: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<EntityId>,
        #[serde(
            default,
            deserialize_with = "deserialize_wire_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        created_date: Option<DateTime<Utc>>,
    },
    RoomCreatedSuccess {
        room: String,
    },
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ReturnJoinedDataList { .. } => "return_joined_data_list",
            Self::DirectMessages { .. } => "direct_messages",
            Self::ChatHistory { .. } => "chat_history",
            Self::NewMessage { .. } => "new_message",
            Self::GroupMessage { .. } => "group_message",
            Self::RoomCreatedSuccess { .. } => "room_created_success",
        }
    }
}

/// Accepts RFC 3339 timestamps as well as the naive ISO form
/// (`2024-05-01T10:00:00.123456`) some servers emit; naive values are read as UTC.
/// Unparseable values are treated as missing.
pub fn parse_wire_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_wire_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_wire_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_events_use_wire_names() {
        let request = ClientRequest::DirectMessageToUser {
            sender_uuid: EntityId::from("u1"),
            receiver_uuid: EntityId::from("u2"),
            message: "hi".into(),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["event"], "direct_message_to_user");
        assert_eq!(value["data"]["receiver_uuid"], "u2");
        assert_eq!(request.event_name(), "direct_message_to_user");
    }

    #[test]
    fn room_send_carries_the_sender_name() {
        let request = ClientRequest::SendMessage {
            room: "AB12CD34".into(),
            message: "hi".into(),
            username: "Alice".into(),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["event"], "send_message");
        assert_eq!(value["data"]["room"], "AB12CD34");
        assert_eq!(value["data"]["username"], "Alice");
    }

    #[test]
    fn roster_snapshot_parses_mongo_style_ids() {
        let raw = r#"{"event":"return_joined_data_list","data":{
            "users":[{"_id":"u1","full_name":"Alice","email":"a@x.io"}],
            "groups":[{"_id":"g1","group_name":"Ops"}]}}"#;
        let event: ServerEvent = serde_json::from_str(raw).expect("parse");
        let ServerEvent::ReturnJoinedDataList { users, groups } = event else {
            panic!("unexpected event");
        };
        assert_eq!(users[0].entity_id.as_str(), "u1");
        assert_eq!(users[0].uuid_code, None);
        assert_eq!(groups[0].group_name, "Ops");
    }

    #[test]
    fn live_message_accepts_naive_timestamp() {
        let raw = r#"{"event":"new_message","data":{
            "username":"Bob","message":"yo","created_date":"2024-05-01T10:00:00.123456"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).expect("parse");
        let ServerEvent::NewMessage {
            created_date, room, ..
        } = event
        else {
            panic!("unexpected event");
        };
        assert!(created_date.is_some());
        assert_eq!(room, None);
    }

    #[test]
    fn garbage_timestamp_is_treated_as_missing() {
        assert_eq!(parse_wire_timestamp("yesterday"), None);
        assert!(parse_wire_timestamp("2024-05-01T10:00:00Z").is_some());
    }
}
