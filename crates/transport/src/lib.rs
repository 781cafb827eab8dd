use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use shared::stanza::{ChatMessage, ParticipantStatus, Presence, Stanza};

/// How to reach the server. `service_name` is the logical service the
/// account lives under; `host_override`, when set, is where the socket
/// actually goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub service_name: String,
    pub host_override: Option<String>,
    pub port: Option<u16>,
    pub accept_all_certificates: bool,
    pub reply_timeout: Duration,
}

/// Inbound traffic from an open session. The transport serializes
/// delivery; subscribers see stanzas in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportNotice {
    Stanza(Stanza),
    Closed { error: Option<String> },
}

/// Traffic scoped to one joined room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    SubjectChanged {
        subject: String,
        from: Option<String>,
    },
    Message(ChatMessage),
    Presence(Presence),
    Participant {
        occupant: String,
        status: ParticipantStatus,
    },
    InvitationDeclined {
        invitee: String,
        reason: Option<String>,
    },
}

/// An invitation to join a room, as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationNotice {
    pub room_address: String,
    pub inviter: String,
    pub recipient: String,
    pub subject: Option<String>,
    pub reason: Option<String>,
    pub password: Option<String>,
}

/// One entry of a service discovery listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoItem {
    pub entity: String,
    pub name: Option<String>,
}

/// Room metadata as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub description: String,
    pub subject: String,
    pub occupant_count: u32,
    pub persistent: bool,
    pub password_protected: bool,
    pub moderated: bool,
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self, options: TransportOptions) -> anyhow::Result<Arc<dyn TransportSession>>;
}

#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn login(&self, username: &str, password: &str, resource: &str) -> anyhow::Result<()>;
    async fn send_stanza(&self, stanza: Stanza) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
    fn subscribe_notices(&self) -> broadcast::Receiver<TransportNotice>;
    fn subscribe_invitations(&self) -> broadcast::Receiver<InvitationNotice>;

    /// Handle for a room on this session. Acquisition never touches the
    /// wire; join/create do.
    fn room(&self, muc_address: &str) -> Arc<dyn RoomSession>;

    async fn discover_items(&self, domain: &str) -> anyhow::Result<Vec<DiscoItem>>;
    async fn room_info(&self, muc_address: &str) -> anyhow::Result<RoomInfo>;
    async fn muc_services(&self) -> anyhow::Result<Vec<String>>;
    fn service_host(&self) -> String;

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        attributes: HashMap<String, String>,
    ) -> anyhow::Result<()>;
    async fn change_password(&self, new_password: &str) -> anyhow::Result<()>;
    async fn delete_account(&self) -> anyhow::Result<()>;
    async fn account_instructions(&self) -> anyhow::Result<String>;
    async fn account_attribute_names(&self) -> anyhow::Result<Vec<String>>;
    async fn supports_account_creation(&self) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait RoomSession: Send + Sync {
    async fn join(&self, nickname: &str) -> anyhow::Result<()>;
    async fn create(&self, nickname: &str) -> anyhow::Result<()>;
    async fn submit_default_config(&self) -> anyhow::Result<()>;
    async fn leave(&self) -> anyhow::Result<()>;
    async fn invite(&self, target: &str, reason: &str) -> anyhow::Result<()>;
    async fn send_text(&self, body: &str) -> anyhow::Result<()>;
    async fn change_subject(&self, subject: &str) -> anyhow::Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<RoomEvent>;
}
