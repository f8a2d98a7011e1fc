use shared::domain::EntityId;
use thiserror::Error;

/// Outcomes of the synchronization core that are not successful state changes.
///
/// None of these abort the session. The user-facing ones become notices; the
/// rest are dropped after logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("no conversation is open")]
    NoActiveConversation,
    #[error("unknown conversation target {entity_id}")]
    UnknownTarget { entity_id: EntityId },
    #[error("response for abandoned conversation {room}")]
    StaleResponse { room: String },
    #[error("ambiguous room address {room}")]
    MalformedAddress { room: String },
    #[error("message body is empty")]
    EmptyMessage,
    #[error("group name is empty")]
    EmptyGroupName,
    #[error("no uuid code known for {entity_id}")]
    MissingUuidCode { entity_id: EntityId },
    #[error("no session has been established")]
    NotJoined,
}

impl SyncError {
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Self::StaleResponse { .. } | Self::MalformedAddress { .. }
        )
    }
}
