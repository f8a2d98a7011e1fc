use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{EntityId, SessionIdentity},
    error::{ApiError, ApiException},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod room_address;
pub mod roster;
pub mod session_store;
pub mod transport;

pub use config::{load_settings, ClientSettings};
pub use conversation::{ConversationSession, Message, OutgoingDispatch, SessionState};
pub use engine::{ClientEvent, ConnectionState, Intent, SyncEngine, TranscriptLine};
pub use error::SyncError;
pub use room_address::RoomAddress;
pub use roster::{RosterEntry, RosterStore};
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::{
    EventTransport, MissingTransport, TransportConnector, TransportSignal, WebSocketConnector,
};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Roster rows as the two list tabs show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterView {
    pub users: Vec<(EntityId, String)>,
    pub groups: Vec<(EntityId, String)>,
}

/// Async driver around [`SyncEngine`]: owns the HTTP client, the realtime
/// connection and the event fan-out. Every engine step runs under one lock and
/// its outgoing requests are emitted before the lock is released, so inbound
/// events and user actions are applied strictly one at a time.
pub struct ChatClient {
    http: Client,
    settings: ClientSettings,
    connector: Arc<dyn TransportConnector>,
    session_store: Arc<dyn SessionStore>,
    engine: Mutex<SyncEngine>,
    transport: Mutex<Option<Arc<dyn EventTransport>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(settings: ClientSettings) -> Arc<Self> {
        let connector = Arc::new(WebSocketConnector::new(settings.event_buffer));
        let session_store = Arc::new(FileSessionStore::new(settings.session_file.clone()));
        Self::new_with_dependencies(settings, connector, session_store)
    }

    pub fn new_with_dependencies(
        settings: ClientSettings,
        connector: Arc<dyn TransportConnector>,
        session_store: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Arc::new(Self {
            http: Client::new(),
            settings,
            connector,
            session_store,
            engine: Mutex::new(SyncEngine::new()),
            transport: Mutex::new(None),
            pump: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Authenticates against the login endpoint, persists the identity and
    /// joins the realtime session.
    pub async fn login(self: &Arc<Self>, email: &str, password: &str) -> Result<SessionIdentity> {
        let res = self
            .http
            .post(self.settings.login_url())
            .json(&LoginRequest { email, password })
            .send()
            .await
            .context("login request failed")?;

        let status = res.status();
        if !status.is_success() {
            let detail = res
                .json::<ApiError>()
                .await
                .map(|body| body.detail)
                .unwrap_or_else(|_| "Login failed".to_string());
            return Err(ApiException::new(status.as_u16(), detail).into());
        }
        let identity: SessionIdentity = res.json().await.context("invalid login response")?;
        info!(entity_id = %identity.entity_id, "login: authenticated");

        self.session_store.save(&identity).await?;
        self.start_session(identity.clone()).await?;
        Ok(identity)
    }

    /// Rejoins with a previously persisted identity. Returns `None` when there
    /// is nothing stored; the caller then has to log in.
    pub async fn restore_session(self: &Arc<Self>) -> Result<Option<SessionIdentity>> {
        let Some(identity) = self.session_store.load().await? else {
            info!("login: no stored session");
            return Ok(None);
        };
        info!(entity_id = %identity.entity_id, "login: restoring stored session");
        self.start_session(identity.clone()).await?;
        Ok(Some(identity))
    }

    pub async fn logout(&self) -> Result<()> {
        self.session_store.clear().await?;
        self.transport.lock().await.take();
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        *self.engine.lock().await = SyncEngine::new();
        Ok(())
    }

    pub async fn open_conversation(&self, entity_id: &EntityId) -> Result<()> {
        let intent = Intent::OpenConversation(entity_id.clone());
        self.drive(|engine| engine.apply(intent)).await
    }

    pub async fn send_message(&self, body: &str) -> Result<()> {
        let intent = Intent::SendMessage(body.to_string());
        self.drive(|engine| engine.apply(intent)).await
    }

    pub async fn create_group(&self, name: &str) -> Result<()> {
        let intent = Intent::CreateGroup(name.to_string());
        self.drive(|engine| engine.apply(intent)).await
    }

    pub async fn create_room(&self, entity_id: &EntityId) -> Result<()> {
        let intent = Intent::CreateRoom(entity_id.clone());
        self.drive(|engine| engine.apply(intent)).await
    }

    pub async fn roster(&self) -> RosterView {
        let guard = self.engine.lock().await;
        let self_id = guard.identity().map(|identity| identity.entity_id.clone());
        let row = |entry: &RosterEntry| {
            let name = self_id
                .as_ref()
                .and_then(|self_id| guard.roster().display_name(entry.entity_id(), self_id))
                .unwrap_or_else(|| entry.display_name().to_string());
            (entry.entity_id().clone(), name)
        };
        RosterView {
            users: guard.roster().users().map(row).collect(),
            groups: guard.roster().groups().map(row).collect(),
        }
    }

    /// The label a transcript row uses for `sender_id`.
    pub async fn sender_label(&self, sender_id: &EntityId) -> String {
        self.engine.lock().await.sender_label(sender_id)
    }

    pub async fn transcript(&self) -> Vec<TranscriptLine> {
        self.engine.lock().await.transcript()
    }

    pub async fn conversation_state(&self) -> (Option<RoomAddress>, SessionState) {
        let guard = self.engine.lock().await;
        (
            guard.conversation().address().cloned(),
            guard.conversation().state(),
        )
    }

    async fn start_session(self: &Arc<Self>, identity: SessionIdentity) -> Result<()> {
        self.connect().await?;
        self.drive(|engine| engine.establish_session(identity)).await
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.transport.lock().await.is_some() {
            return Ok(());
        }
        let socket_url = self.settings.socket_url()?;
        let (transport, inbound) = self
            .connector
            .connect(&socket_url)
            .await
            .with_context(|| format!("failed to open realtime connection to {socket_url}"))?;
        *self.transport.lock().await = Some(transport);

        let client = Arc::clone(self);
        let pump = tokio::spawn(async move { client.pump_inbound(inbound).await });
        if let Some(previous) = self.pump.lock().await.replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    async fn pump_inbound(self: Arc<Self>, mut inbound: mpsc::Receiver<TransportSignal>) {
        while let Some(signal) = inbound.recv().await {
            let result = match signal {
                TransportSignal::Connected => {
                    self.drive(|engine| engine.on_connection(ConnectionState::Connected))
                        .await
                }
                TransportSignal::Event(event) => self.drive(|engine| engine.handle(event)).await,
                TransportSignal::Malformed(reason) => {
                    warn!(%reason, "sync: skipping unreadable event");
                    let _ = self.events.send(ClientEvent::Error(reason));
                    Ok(())
                }
                TransportSignal::Disconnected(reason) => {
                    self.transport.lock().await.take();
                    if let Some(reason) = reason {
                        let _ = self.events.send(ClientEvent::Error(reason));
                    }
                    let _ = self
                        .drive(|engine| engine.on_connection(ConnectionState::Disconnected))
                        .await;
                    break;
                }
            };
            if let Err(err) = result {
                error!(error = %err, "sync: failed to emit outgoing event");
            }
        }
    }

    /// Runs one engine step, then emits its requests in order and publishes
    /// its events.
    async fn drive<F>(&self, step: F) -> Result<()>
    where
        F: FnOnce(&mut SyncEngine),
    {
        let mut engine = self.engine.lock().await;
        step(&mut *engine);
        let outbox = engine.take_outbox();
        let events = engine.take_events();

        let mut outcome = Ok(());
        if !outbox.is_empty() {
            let transport = self.transport.lock().await.clone();
            let transport: Arc<dyn EventTransport> = match transport {
                Some(transport) => transport,
                None => Arc::new(MissingTransport),
            };
            for request in &outbox {
                if let Err(err) = transport.emit(request).await {
                    let _ = self.events.send(ClientEvent::Error(err.to_string()));
                    outcome = Err(err);
                    break;
                }
            }
        }

        for event in events {
            let _ = self.events.send(event);
        }
        outcome
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
