use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub mod account;
pub mod connection;
pub mod error;
pub mod room_container;
pub mod room_manager;
pub mod sync_point;

pub use account::AccountManager;
pub use connection::{Connection, ConnectionEvent, EventSink, CONSUMER_SERVICE_HOST};
pub use error::EngineError;
pub use room_container::{
    LifecycleEvent, LifecycleListener, MessageListener, ParticipantListener, RoomAdminListener,
    RoomAdminSender, RoomContainer, RoomMessage,
};
pub use room_manager::{CreateRoomOptions, InvitationListener, RoomDescriptor, RoomManager};
pub use sync_point::{SyncOutcome, SyncPoint, SyncState};

/// Engine tunables. Everything else is protocol-defined.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the server to acknowledge resource binding.
    pub bind_timeout: Duration,
    /// How long to wait for a reply to an individual exchange.
    pub reply_timeout: Duration,
    /// Skip certificate verification on the transport. Off by default.
    pub accept_all_certificates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_secs(15),
            reply_timeout: Duration::from_secs(5),
            accept_all_certificates: false,
        }
    }
}

/// Asked for a name the caller did not supply up front, such as the
/// nickname to join a room under. Returning `None` accepts the suggested
/// default.
#[async_trait]
pub trait CredentialHandler: Send + Sync {
    async fn resolve_name(&self, prompt: &str, suggested: &str) -> Option<String>;
}

#[cfg(test)]
#[path = "tests/mock_transport.rs"]
pub(crate) mod mock_transport;
