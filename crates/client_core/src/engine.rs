use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use shared::{
    domain::{EntityId, RoomKind, SessionIdentity},
    protocol::{
        ClientRequest, DirectHistoryItem, GroupRecord, RoomHistoryItem, ServerEvent, UserRecord,
    },
};
use tracing::{debug, info, warn};

use crate::{
    conversation::{ConversationSession, Message, OutgoingDispatch},
    error::SyncError,
    room_address::RoomAddress,
    roster::RosterStore,
};

/// Label used for the user's own messages in a transcript.
pub const OWN_SENDER_LABEL: &str = "You";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    RosterUpdated {
        users: usize,
        groups: usize,
    },
    ConversationOpened {
        address: RoomAddress,
    },
    HistoryLoaded {
        address: RoomAddress,
        count: usize,
    },
    MessageAppended {
        address: RoomAddress,
        message: Message,
        is_own: bool,
    },
    RoomCreated {
        room: String,
    },
    Notice(SyncError),
    Connection(ConnectionState),
    Error(String),
}

/// User-originated actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    OpenConversation(EntityId),
    SendMessage(String),
    CreateGroup(String),
    CreateRoom(EntityId),
}

/// One rendered row of the open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub sender_label: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_own: bool,
}

/// Binds inbound server events and user intents to the roster and the open
/// conversation.
///
/// The engine performs no I/O. Requests for the server accumulate in an outbox
/// and observable changes in an event queue; the driver drains both after
/// every step, so handlers never run concurrently and never wait on the
/// network.
#[derive(Debug)]
pub struct SyncEngine {
    identity: Option<SessionIdentity>,
    connection: ConnectionState,
    joined: bool,
    roster: RosterStore,
    conversation: ConversationSession,
    pending_history: VecDeque<RoomAddress>,
    outbox: Vec<ClientRequest>,
    events: Vec<ClientEvent>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            identity: None,
            connection: ConnectionState::Disconnected,
            joined: false,
            roster: RosterStore::new(),
            conversation: ConversationSession::new(),
            pending_history: VecDeque::new(),
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn conversation(&self) -> &ConversationSession {
        &self.conversation
    }

    pub fn take_outbox(&mut self) -> Vec<ClientRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Dispatch table for inbound events. Failures are settled here and never
    /// leave the engine.
    pub fn handle(&mut self, event: ServerEvent) {
        debug!(event = event.event_name(), "sync: inbound event");
        let result = match event {
            ServerEvent::ReturnJoinedDataList { users, groups } => {
                self.on_roster_snapshot(users, groups);
                Ok(())
            }
            ServerEvent::DirectMessages {
                messages,
                sender_uuid,
                receiver_uuid,
            } => {
                let address = self
                    .direct_peer(sender_uuid, receiver_uuid)
                    .map(RoomAddress::direct);
                let messages = messages.into_iter().map(direct_history_message).collect();
                self.on_history_response(address, messages)
            }
            ServerEvent::ChatHistory { history, room } => {
                let address = room.as_deref().map(|room| self.resolve_room(room));
                let messages = history
                    .into_iter()
                    .map(|item| self.room_history_message(item))
                    .collect();
                self.on_history_response(address, messages)
            }
            live @ (ServerEvent::NewMessage { .. } | ServerEvent::GroupMessage { .. }) => {
                self.on_live_message(live)
            }
            ServerEvent::RoomCreatedSuccess { room } => {
                self.on_room_created(room);
                Ok(())
            }
        };
        self.settle(result);
    }

    pub fn apply(&mut self, intent: Intent) {
        let result = match intent {
            Intent::OpenConversation(entity_id) => self.on_open_request(&entity_id),
            Intent::SendMessage(body) => self.on_send_request(&body),
            Intent::CreateGroup(name) => self.on_group_create(&name),
            Intent::CreateRoom(entity_id) => self.on_create_room(&entity_id),
        };
        self.settle(result);
    }

    /// Records the authenticated user and announces it on the connection.
    /// Credentials are checked by the login endpoint, not here.
    pub fn establish_session(&mut self, identity: SessionIdentity) {
        info!(entity_id = %identity.entity_id, "sync: session established");
        self.outbox.push(ClientRequest::UserJoined {
            email: identity.email.clone(),
        });
        self.identity = Some(identity);
        self.joined = true;
    }

    pub fn on_connection(&mut self, state: ConnectionState) {
        info!(?state, "sync: connection state changed");
        self.connection = state;
        match state {
            ConnectionState::Connected => {
                if let (Some(identity), false) = (&self.identity, self.joined) {
                    self.outbox.push(ClientRequest::UserJoined {
                        email: identity.email.clone(),
                    });
                    self.joined = true;
                }
            }
            ConnectionState::Disconnected => {
                self.joined = false;
                self.pending_history.clear();
            }
        }
        self.events.push(ClientEvent::Connection(state));
    }

    pub fn on_roster_snapshot(&mut self, users: Vec<UserRecord>, groups: Vec<GroupRecord>) {
        self.roster.apply_snapshot(users, groups);
        self.events.push(ClientEvent::RosterUpdated {
            users: self.roster.users().count(),
            groups: self.roster.groups().count(),
        });
    }

    pub fn on_open_request(&mut self, entity_id: &EntityId) -> Result<(), SyncError> {
        let self_id = self.self_id()?.clone();
        let entry = self
            .roster
            .lookup(entity_id)
            .ok_or_else(|| SyncError::UnknownTarget {
                entity_id: entity_id.clone(),
            })?;
        let address = RoomAddress::for_entry(entry);
        let request = match address.kind {
            RoomKind::Direct => ClientRequest::DirectMessagesHistory {
                sender_uuid: self_id,
                receiver_uuid: address.target_id.clone(),
            },
            RoomKind::Group | RoomKind::Named => ClientRequest::FetchHistory {
                room: address.encode(),
            },
        };
        self.open_room(address, request);
        Ok(())
    }

    /// `address` is `None` when the server did not say which room the batch
    /// belongs to; it is then matched against the oldest outstanding request.
    pub fn on_history_response(
        &mut self,
        address: Option<RoomAddress>,
        messages: Vec<Message>,
    ) -> Result<(), SyncError> {
        let address = match address {
            Some(address) => {
                if let Some(position) = self.pending_history.iter().position(|p| *p == address) {
                    self.pending_history.drain(..=position);
                }
                address
            }
            None => self
                .pending_history
                .pop_front()
                .ok_or_else(|| SyncError::StaleResponse {
                    room: String::new(),
                })?,
        };

        let count = messages.len();
        self.conversation.apply_history(&address, messages)?;
        info!(room = %address, count, "sync: history loaded");
        self.events.push(ClientEvent::HistoryLoaded { address, count });
        Ok(())
    }

    pub fn on_live_message(&mut self, event: ServerEvent) -> Result<(), SyncError> {
        let current = self.conversation.address().cloned();
        let (address, message) = match event {
            ServerEvent::NewMessage {
                username,
                message,
                created_date,
                room,
                sender_uuid,
                receiver_uuid,
            } => {
                let address = match room {
                    Some(room) => Some(self.resolve_room(&room)),
                    None => self
                        .direct_peer(sender_uuid.clone(), receiver_uuid)
                        .map(RoomAddress::direct)
                        .or_else(|| {
                            current_of_kind(&current, &[RoomKind::Direct, RoomKind::Named])
                        }),
                };
                let message = Message {
                    sender_id: sender_uuid.unwrap_or_else(|| self.sender_by_name(&username)),
                    body: message,
                    sent_at: created_date.unwrap_or_else(Utc::now),
                };
                (address, message)
            }
            ServerEvent::GroupMessage {
                message,
                user_id,
                group_id,
                created_date,
            } => {
                let address = group_id
                    .map(RoomAddress::group)
                    .or_else(|| current_of_kind(&current, &[RoomKind::Group]));
                let message = Message {
                    sender_id: user_id,
                    body: message,
                    sent_at: created_date.unwrap_or_else(Utc::now),
                };
                (address, message)
            }
            other => {
                warn!(event = other.event_name(), "sync: not a live message event");
                return Ok(());
            }
        };

        let address = address.ok_or_else(|| SyncError::StaleResponse {
            room: String::new(),
        })?;
        let is_own = self.is_self(&message.sender_id);
        self.conversation.append_live(message.clone(), &address)?;
        self.events.push(ClientEvent::MessageAppended {
            address,
            message,
            is_own,
        });
        Ok(())
    }

    /// The message is not added to the log here; the server echoes it back as
    /// a live event attributed to the user.
    pub fn on_send_request(&mut self, body: &str) -> Result<(), SyncError> {
        let identity = self.identity.as_ref().ok_or(SyncError::NotJoined)?;
        let self_id = identity.entity_id.clone();
        let full_name = identity.full_name.clone();
        let OutgoingDispatch {
            target_kind,
            target_id,
            sender_id,
            body,
        } = self.conversation.send(body, &self_id)?;
        let request = match target_kind {
            RoomKind::Direct => ClientRequest::DirectMessageToUser {
                sender_uuid: sender_id,
                receiver_uuid: target_id,
                message: body,
            },
            RoomKind::Group => ClientRequest::GroupChatMessage {
                sender_uuid: sender_id,
                group_id: target_id,
                message: body,
            },
            RoomKind::Named => ClientRequest::SendMessage {
                room: target_id.to_string(),
                message: body,
                username: full_name,
            },
        };
        self.outbox.push(request);
        Ok(())
    }

    /// The new group appears with the next roster snapshot; the server assigns
    /// its identifier.
    pub fn on_group_create(&mut self, name: &str) -> Result<(), SyncError> {
        let self_id = self.self_id()?.clone();
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::EmptyGroupName);
        }
        self.outbox.push(ClientRequest::ChatGroupCreate {
            user_uuid: self_id,
            group_name: name.to_string(),
        });
        Ok(())
    }

    /// Asks the server for a shared room with a contact, addressed by the two
    /// users' uuid codes. The server answers with `room_created_success`.
    pub fn on_create_room(&mut self, entity_id: &EntityId) -> Result<(), SyncError> {
        let identity = self.identity.as_ref().ok_or(SyncError::NotJoined)?;
        let own_code = identity
            .uuid_code
            .clone()
            .ok_or_else(|| SyncError::MissingUuidCode {
                entity_id: identity.entity_id.clone(),
            })?;
        let target = self
            .roster
            .lookup(entity_id)
            .filter(|entry| entry.kind() == RoomKind::Direct)
            .ok_or_else(|| SyncError::UnknownTarget {
                entity_id: entity_id.clone(),
            })?;
        let target_code = target
            .uuid_code()
            .cloned()
            .ok_or_else(|| SyncError::MissingUuidCode {
                entity_id: entity_id.clone(),
            })?;
        self.outbox.push(ClientRequest::CreateRoom {
            target_uuid: target_code,
            logged_in_uuid_code: own_code,
        });
        Ok(())
    }

    /// Opens the room the server created. Its id is opaque, so it is kept as a
    /// named room rather than decoded.
    pub fn on_room_created(&mut self, room: String) {
        let address = RoomAddress::named(room.as_str());
        self.open_room(address, ClientRequest::FetchHistory { room: room.clone() });
        self.events.push(ClientEvent::RoomCreated { room });
    }

    /// Rows of the open conversation with the user's own messages labelled
    /// [`OWN_SENDER_LABEL`] and everyone else by roster name.
    pub fn transcript(&self) -> Vec<TranscriptLine> {
        self.conversation
            .messages()
            .iter()
            .map(|message| {
                let is_own = self.is_self(&message.sender_id);
                TranscriptLine {
                    sender_label: self.sender_label(&message.sender_id),
                    body: message.body.clone(),
                    sent_at: message.sent_at,
                    is_own,
                }
            })
            .collect()
    }

    /// [`OWN_SENDER_LABEL`] for the user, the roster name for known senders,
    /// otherwise the raw sender id.
    pub fn sender_label(&self, sender_id: &EntityId) -> String {
        if self.is_self(sender_id) {
            return OWN_SENDER_LABEL.to_string();
        }
        self.roster
            .lookup(sender_id)
            .map(|entry| entry.display_name().to_string())
            .unwrap_or_else(|| sender_id.to_string())
    }

    fn open_room(&mut self, address: RoomAddress, history_request: ClientRequest) {
        info!(room = %address, "sync: opening conversation");
        self.conversation.open(address.clone());
        self.pending_history.push_back(address.clone());
        self.outbox.push(history_request);
        self.events.push(ClientEvent::ConversationOpened { address });
    }

    fn settle(&mut self, result: Result<(), SyncError>) {
        let Err(err) = result else {
            return;
        };
        if err.is_user_facing() {
            info!(error = %err, "sync: notice");
            self.events.push(ClientEvent::Notice(err));
        } else if matches!(err, SyncError::MalformedAddress { .. }) {
            warn!(error = %err, "sync: malformed address");
        } else {
            debug!(error = %err, "sync: dropped stale event");
        }
    }

    fn self_id(&self) -> Result<&EntityId, SyncError> {
        self.identity
            .as_ref()
            .map(|identity| &identity.entity_id)
            .ok_or(SyncError::NotJoined)
    }

    /// Room-style events name the sender by full name only; the user's own
    /// name maps back to their entity id.
    fn sender_by_name(&self, username: &str) -> EntityId {
        match &self.identity {
            Some(identity) if identity.full_name == username => identity.entity_id.clone(),
            _ => EntityId::from(username),
        }
    }

    /// A room string from the server, matched against the open and requested
    /// named rooms before falling back to suffix decoding.
    fn resolve_room(&self, room: &str) -> RoomAddress {
        self.conversation
            .address()
            .into_iter()
            .chain(self.pending_history.iter())
            .find(|address| address.kind == RoomKind::Named && address.target_id.as_str() == room)
            .cloned()
            .unwrap_or_else(|| RoomAddress::decode(room))
    }

    fn room_history_message(&self, item: RoomHistoryItem) -> Message {
        Message {
            sender_id: self.sender_by_name(&item.username),
            body: item.message,
            sent_at: item.created_date.unwrap_or_else(Utc::now),
        }
    }

    fn is_self(&self, entity_id: &EntityId) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| identity.entity_id == *entity_id)
    }

    /// The other party of a direct exchange described by sender/receiver ids.
    fn direct_peer(
        &self,
        sender: Option<EntityId>,
        receiver: Option<EntityId>,
    ) -> Option<EntityId> {
        match (sender, receiver) {
            (Some(sender), Some(receiver)) if self.is_self(&sender) => Some(receiver),
            (Some(sender), _) if !self.is_self(&sender) => Some(sender),
            (_, receiver) => receiver.filter(|receiver| !self.is_self(receiver)),
        }
    }
}

fn current_of_kind(current: &Option<RoomAddress>, kinds: &[RoomKind]) -> Option<RoomAddress> {
    current
        .as_ref()
        .filter(|address| kinds.contains(&address.kind))
        .cloned()
}

fn direct_history_message(item: DirectHistoryItem) -> Message {
    Message {
        sender_id: item.sender,
        body: item.message,
        sent_at: item.created_date.unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
