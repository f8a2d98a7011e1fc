use chrono::{DateTime, Utc};
use shared::domain::{EntityId, RoomKind};

use crate::{error::SyncError, room_address::RoomAddress};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: EntityId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// History requested, live messages are held back.
    Opening,
    Open,
}

/// What the transport has to send for one outgoing chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDispatch {
    pub target_kind: RoomKind,
    pub target_id: EntityId,
    pub sender_id: EntityId,
    pub body: String,
}

/// The single conversation currently open in the client.
#[derive(Debug, Default)]
pub struct ConversationSession {
    address: Option<RoomAddress>,
    messages: Vec<Message>,
    history_loaded: bool,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        match (&self.address, self.history_loaded) {
            (None, _) => SessionState::Closed,
            (Some(_), false) => SessionState::Opening,
            (Some(_), true) => SessionState::Open,
        }
    }

    pub fn address(&self) -> Option<&RoomAddress> {
        self.address.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Starts a fresh session for `address`. The previous log is discarded even
    /// when the same room is reopened; the caller requests history.
    pub fn open(&mut self, address: RoomAddress) {
        self.address = Some(address);
        self.messages.clear();
        self.history_loaded = false;
    }

    pub fn apply_history(
        &mut self,
        address: &RoomAddress,
        messages: Vec<Message>,
    ) -> Result<(), SyncError> {
        if self.state() != SessionState::Opening || self.address.as_ref() != Some(address) {
            return Err(SyncError::StaleResponse {
                room: address.encode(),
            });
        }
        self.messages = messages;
        self.history_loaded = true;
        Ok(())
    }

    pub fn append_live(
        &mut self,
        message: Message,
        for_address: &RoomAddress,
    ) -> Result<(), SyncError> {
        if self.state() != SessionState::Open || self.address.as_ref() != Some(for_address) {
            return Err(SyncError::StaleResponse {
                room: for_address.encode(),
            });
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn send(&self, body: &str, self_id: &EntityId) -> Result<OutgoingDispatch, SyncError> {
        let address = self
            .address
            .as_ref()
            .ok_or(SyncError::NoActiveConversation)?;
        if body.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        Ok(OutgoingDispatch {
            target_kind: address.kind,
            target_id: address.target_id.clone(),
            sender_id: self_id.clone(),
            body: body.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, body: &str) -> Message {
        Message {
            sender_id: EntityId::from(sender),
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    fn bodies(session: &ConversationSession) -> Vec<&str> {
        session.messages().iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn history_precedes_live_messages() {
        let room = RoomAddress::direct("u2");
        let mut session = ConversationSession::new();
        session.open(room.clone());
        assert_eq!(session.state(), SessionState::Opening);

        session
            .apply_history(&room, vec![message("u2", "m1"), message("u1", "m2")])
            .expect("history");
        session
            .append_live(message("u2", "m3"), &room)
            .expect("m3");
        session
            .append_live(message("u1", "m4"), &room)
            .expect("m4");

        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(bodies(&session), ["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn live_messages_before_history_are_dropped() {
        let room = RoomAddress::group("g1");
        let mut session = ConversationSession::new();
        session.open(room.clone());

        let err = session
            .append_live(message("u2", "early"), &room)
            .expect_err("not loaded yet");
        assert!(matches!(err, SyncError::StaleResponse { .. }));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn history_for_another_room_is_stale() {
        let mut session = ConversationSession::new();
        session.open(RoomAddress::direct("u3"));

        let err = session
            .apply_history(&RoomAddress::direct("u2"), vec![message("u2", "old")])
            .expect_err("stale");
        assert_eq!(err, SyncError::StaleResponse { room: "u2".into() });
        assert!(!session.history_loaded());
        assert!(session.messages().is_empty());
    }

    #[test]
    fn reopening_discards_the_previous_log() {
        let room = RoomAddress::direct("u2");
        let mut session = ConversationSession::new();
        session.open(room.clone());
        session
            .apply_history(&room, vec![message("u2", "m1")])
            .expect("history");

        session.open(RoomAddress::group("g1"));
        assert_eq!(session.state(), SessionState::Opening);
        assert!(session.messages().is_empty());
    }

    #[test]
    fn send_requires_an_open_room() {
        let session = ConversationSession::new();
        assert_eq!(
            session.send("hi", &EntityId::from("u1")),
            Err(SyncError::NoActiveConversation)
        );
        assert!(session.messages().is_empty());
    }

    #[test]
    fn send_targets_the_current_address() {
        let mut session = ConversationSession::new();
        session.open(RoomAddress::group("g1"));

        let dispatch = session.send("hi", &EntityId::from("u1")).expect("dispatch");
        assert_eq!(dispatch.target_kind, RoomKind::Group);
        assert_eq!(dispatch.target_id.as_str(), "g1");
        assert_eq!(dispatch.sender_id.as_str(), "u1");
        assert_eq!(
            session.send("   ", &EntityId::from("u1")),
            Err(SyncError::EmptyMessage)
        );
    }
}
