use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::identity::{RoomId, TargetId, UserId};
use shared::stanza::{ChatMessage, ParticipantStatus, Presence, PresenceKind};
use transport::{RoomEvent, RoomSession};

use crate::connection::Connection;
use crate::error::EngineError;
use crate::CredentialHandler;

const NICKNAME_PROMPT: &str = "Nickname";

/// Container lifecycle notifications, in the order they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

/// A chat message delivered in a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomMessage {
    pub from: Option<UserId>,
    pub body: String,
}

#[async_trait]
pub trait RoomAdminListener: Send + Sync {
    async fn subject_changed(&self, from: Option<UserId>, subject: &str);
}

#[async_trait]
pub trait ParticipantListener: Send + Sync {
    async fn joined(&self, participant: UserId);
    async fn left(&self, participant: UserId);
}

#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn message_received(&self, message: RoomMessage);
}

#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn status_changed(&self, event: LifecycleEvent);
}

struct RoomState {
    phase: Phase,
    room_id: Option<RoomId>,
    session: Option<Arc<dyn RoomSession>>,
    dispatch_task: Option<JoinHandle<()>>,
}

/// Join/leave state machine for one room membership. Callers serialize
/// connect/disconnect; the internal locks protect state against the
/// dispatch task only.
pub struct RoomContainer {
    connection: Arc<Connection>,
    state: Mutex<RoomState>,
    occupants: Mutex<Vec<String>>,
    admin_listeners: Mutex<Vec<Arc<dyn RoomAdminListener>>>,
    participant_listeners: Mutex<Vec<Arc<dyn ParticipantListener>>>,
    message_listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
    lifecycle_listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
    admin_sender: Mutex<Option<Arc<RoomAdminSender>>>,
}

impl RoomContainer {
    pub fn new(connection: Arc<Connection>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            state: Mutex::new(RoomState {
                phase: Phase::Disconnected,
                room_id: None,
                session: None,
                dispatch_task: None,
            }),
            occupants: Mutex::new(Vec::new()),
            admin_listeners: Mutex::new(Vec::new()),
            participant_listeners: Mutex::new(Vec::new()),
            message_listeners: Mutex::new(Vec::new()),
            lifecycle_listeners: Mutex::new(Vec::new()),
            admin_sender: Mutex::new(None),
        })
    }

    /// Join the room named by `remote`. The nickname comes from the
    /// credential handler when one is supplied, falling back to the
    /// room's default. Any failure rolls the container back to
    /// Disconnected and surfaces as `ConnectFailed`.
    pub async fn connect(
        self: &Arc<Self>,
        remote: &TargetId,
        credentials: Option<Arc<dyn CredentialHandler>>,
    ) -> Result<(), EngineError> {
        let room_id = match remote {
            TargetId::Room(room) => room.clone(),
            TargetId::User(_) => {
                return Err(EngineError::invalid_target(
                    "room containers connect to room targets only",
                ))
            }
        };

        self.fire_lifecycle(LifecycleEvent::Connecting).await;

        let mut state = self.state.lock().await;
        state.phase = Phase::Connecting;
        state.room_id = None;

        match self.join_room(&mut state, &room_id, credentials).await {
            Ok(()) => {
                state.phase = Phase::Connected;
                state.room_id = Some(room_id.clone());
                drop(state);
                info!(room = %room_id, "joined room");
                self.fire_lifecycle(LifecycleEvent::Connected).await;
                Ok(())
            }
            Err(err) => {
                if let Some(task) = state.dispatch_task.take() {
                    task.abort();
                }
                state.session = None;
                state.phase = Phase::Disconnected;
                state.room_id = None;
                drop(state);
                Err(EngineError::connect_failed(room_id.muc_address(), err))
            }
        }
    }

    /// Leave the room. Emits Disconnecting/Disconnected around the
    /// leave; a failed leave is logged, never propagated. Safe when
    /// already disconnected.
    pub async fn disconnect(&self) {
        self.fire_lifecycle(LifecycleEvent::Disconnecting).await;
        {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Connected {
                if let Some(session) = &state.session {
                    if let Err(err) = session.leave().await {
                        warn!(error = %err, "room leave failed during disconnect");
                    }
                }
            }
            state.phase = Phase::Disconnected;
            state.room_id = None;
            state.session = None;
            if let Some(task) = state.dispatch_task.take() {
                task.abort();
            }
        }
        self.occupants.lock().await.clear();
        self.fire_lifecycle(LifecycleEvent::Disconnected).await;
    }

    /// Disconnect and drop every registered listener.
    pub async fn dispose(&self) {
        self.disconnect().await;
        self.admin_listeners.lock().await.clear();
        self.participant_listeners.lock().await.clear();
        self.message_listeners.lock().await.clear();
        self.lifecycle_listeners.lock().await.clear();
        *self.admin_sender.lock().await = None;
    }

    /// Invite a user into this room. The body travels as the
    /// invitation reason; the subject is advisory and not transmitted.
    pub async fn send_invitation(
        &self,
        target: &UserId,
        _subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<(), EngineError> {
        let session = self.room_session().await?;
        session
            .invite(&target.fq_name(), body.unwrap_or(""))
            .await
            .map_err(EngineError::transport)
    }

    /// Send a chat message into the room.
    pub async fn send_message(&self, body: &str) -> Result<(), EngineError> {
        let session = self.room_session().await?;
        session.send_text(body).await.map_err(EngineError::transport)
    }

    /// The admin sender for this container, created once and cached for
    /// the container lifetime.
    pub async fn admin_sender(self: &Arc<Self>) -> Arc<RoomAdminSender> {
        let mut guard = self.admin_sender.lock().await;
        if let Some(sender) = &*guard {
            return Arc::clone(sender);
        }
        let sender = Arc::new(RoomAdminSender {
            container: Arc::downgrade(self),
        });
        *guard = Some(Arc::clone(&sender));
        sender
    }

    /// The joined room's id; `Some` exactly while Connected.
    pub async fn connected_id(&self) -> Option<RoomId> {
        let state = self.state.lock().await;
        if state.phase == Phase::Connected {
            state.room_id.clone()
        } else {
            None
        }
    }

    /// Occupant names currently known to be in the room.
    pub async fn room_participants(&self) -> Vec<String> {
        self.occupants.lock().await.clone()
    }

    pub async fn add_admin_listener(&self, listener: Arc<dyn RoomAdminListener>) {
        self.admin_listeners.lock().await.push(listener);
    }

    pub async fn remove_admin_listener(&self, listener: &Arc<dyn RoomAdminListener>) {
        self.admin_listeners
            .lock()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub async fn add_participant_listener(&self, listener: Arc<dyn ParticipantListener>) {
        self.participant_listeners.lock().await.push(listener);
    }

    pub async fn remove_participant_listener(&self, listener: &Arc<dyn ParticipantListener>) {
        self.participant_listeners
            .lock()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub async fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.message_listeners.lock().await.push(listener);
    }

    pub async fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.message_listeners
            .lock()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub async fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle_listeners.lock().await.push(listener);
    }

    pub async fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        self.lifecycle_listeners
            .lock()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    async fn join_room(
        self: &Arc<Self>,
        state: &mut RoomState,
        room_id: &RoomId,
        credentials: Option<Arc<dyn CredentialHandler>>,
    ) -> Result<(), EngineError> {
        let transport = self.connection.transport_session().await?;
        let session = transport.room(&room_id.muc_address());
        let events = session.subscribe_events();
        state.session = Some(Arc::clone(&session));
        state.dispatch_task = Some(self.spawn_dispatch_task(room_id.clone(), events));

        let nickname = self.resolve_nickname(room_id, credentials).await;
        session.join(&nickname).await.map_err(EngineError::transport)
    }

    async fn resolve_nickname(
        &self,
        room_id: &RoomId,
        credentials: Option<Arc<dyn CredentialHandler>>,
    ) -> String {
        let suggested = room_id.nickname();
        if let Some(handler) = credentials {
            if let Some(nick) = handler.resolve_name(NICKNAME_PROMPT, suggested).await {
                if !nick.is_empty() {
                    return nick;
                }
            }
        }
        suggested.to_string()
    }

    async fn room_session(&self) -> Result<Arc<dyn RoomSession>, EngineError> {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::NotConnected)
    }

    fn spawn_dispatch_task(
        self: &Arc<Self>,
        room: RoomId,
        mut events: broadcast::Receiver<RoomEvent>,
    ) -> JoinHandle<()> {
        let container = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => container.dispatch_room_event(&room, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room = %room, skipped, "room event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn dispatch_room_event(&self, room: &RoomId, event: RoomEvent) {
        // Anything arriving after the container left the room, a stale
        // join response included, is dropped without effect.
        {
            let state = self.state.lock().await;
            if state.phase == Phase::Disconnected {
                debug!(room = %room, "dropping room event after disconnect");
                return;
            }
        }
        match event {
            RoomEvent::SubjectChanged { subject, from } => {
                let from = from.and_then(|f| f.parse::<UserId>().ok());
                for listener in self.admin_snapshot().await {
                    listener.subject_changed(from.clone(), &subject).await;
                }
            }
            RoomEvent::Message(message) => self.dispatch_message(message).await,
            RoomEvent::Presence(presence) => self.dispatch_presence(room, presence).await,
            RoomEvent::Participant { occupant, status } => match status {
                ParticipantStatus::Joined => self.occupant_arrived(room, &occupant).await,
                ParticipantStatus::Left => self.occupant_departed(room, &occupant).await,
                other => {
                    debug!(room = %room, occupant = %occupant, status = ?other,
                        "role change with no container-level meaning");
                }
            },
            RoomEvent::InvitationDeclined { invitee, reason } => {
                debug!(room = %room, invitee = %invitee, reason = ?reason,
                    "invitation declined");
            }
        }
    }

    async fn dispatch_message(&self, message: ChatMessage) {
        let Some(body) = message.body else {
            return;
        };
        let from = message.from.and_then(|f| f.parse::<UserId>().ok());
        let delivered = RoomMessage { from, body };
        for listener in self.message_snapshot().await {
            listener.message_received(delivered.clone()).await;
        }
    }

    async fn dispatch_presence(&self, room: &RoomId, presence: Presence) {
        let Some(occupant) = presence.from else {
            return;
        };
        match presence.kind {
            PresenceKind::Available => self.occupant_arrived(room, &occupant).await,
            PresenceKind::Unavailable => self.occupant_departed(room, &occupant).await,
        }
    }

    /// Membership changes are idempotent: presence and participant
    /// status both report them, and only the first sighting fires
    /// listeners.
    async fn occupant_arrived(&self, room: &RoomId, occupant: &str) {
        {
            let mut occupants = self.occupants.lock().await;
            if occupants.iter().any(|o| o == occupant) {
                return;
            }
            occupants.push(occupant.to_string());
        }
        let Ok(participant) = occupant.parse::<UserId>() else {
            debug!(room = %room, occupant = %occupant, "unparsable occupant name");
            return;
        };
        for listener in self.participant_snapshot().await {
            listener.joined(participant.clone()).await;
        }
    }

    async fn occupant_departed(&self, room: &RoomId, occupant: &str) {
        {
            let mut occupants = self.occupants.lock().await;
            let before = occupants.len();
            occupants.retain(|o| o != occupant);
            if occupants.len() == before {
                return;
            }
        }
        let Ok(participant) = occupant.parse::<UserId>() else {
            debug!(room = %room, occupant = %occupant, "unparsable occupant name");
            return;
        };
        for listener in self.participant_snapshot().await {
            listener.left(participant.clone()).await;
        }
    }

    async fn fire_lifecycle(&self, event: LifecycleEvent) {
        for listener in self.lifecycle_snapshot().await {
            listener.status_changed(event).await;
        }
    }

    async fn admin_snapshot(&self) -> Vec<Arc<dyn RoomAdminListener>> {
        self.admin_listeners.lock().await.clone()
    }

    async fn participant_snapshot(&self) -> Vec<Arc<dyn ParticipantListener>> {
        self.participant_listeners.lock().await.clone()
    }

    async fn message_snapshot(&self) -> Vec<Arc<dyn MessageListener>> {
        self.message_listeners.lock().await.clone()
    }

    async fn lifecycle_snapshot(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.lifecycle_listeners.lock().await.clone()
    }
}

/// Sends room administration requests. Obtained from
/// `RoomContainer::admin_sender` and valid for the container lifetime.
pub struct RoomAdminSender {
    container: std::sync::Weak<RoomContainer>,
}

impl RoomAdminSender {
    pub async fn send_subject_change(&self, subject: &str) -> Result<(), EngineError> {
        let container = self.container.upgrade().ok_or(EngineError::NotConnected)?;
        let session = container.room_session().await?;
        session
            .change_subject(subject)
            .await
            .map_err(EngineError::transport)
    }
}

#[cfg(test)]
#[path = "tests/room_container_tests.rs"]
mod tests;
