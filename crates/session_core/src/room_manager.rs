use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::identity::{fix_conference_domain, RoomId, UserId, DOMAIN_DEFAULT};
use transport::{DiscoItem, InvitationNotice, RoomInfo, TransportSession};

use crate::connection::Connection;
use crate::error::EngineError;
use crate::room_container::RoomContainer;

#[async_trait]
pub trait InvitationListener: Send + Sync {
    async fn invitation_received(
        &self,
        room: RoomId,
        from: Option<UserId>,
        subject: Option<String>,
        body: Option<String>,
    );
}

#[derive(Debug, Clone, Default)]
pub struct CreateRoomOptions {
    /// Conference domain the room lives under. Defaults to the
    /// well-known conference label, qualified against the server host.
    pub conference: Option<String>,
    /// Initial subject to set after creation.
    pub subject: Option<String>,
}

/// What is known about a room after creation or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDescriptor {
    pub room_id: RoomId,
    pub name: String,
    pub description: String,
    pub subject: String,
    pub occupant_count: u32,
    pub persistent: bool,
    pub moderated: bool,
    pub requires_password: bool,
}

impl RoomDescriptor {
    fn from_info(room_id: RoomId, info: RoomInfo) -> Self {
        let name = room_id.long_name().to_string();
        Self {
            room_id,
            name,
            description: info.description,
            subject: info.subject,
            occupant_count: info.occupant_count,
            persistent: info.persistent,
            moderated: info.moderated,
            requires_password: info.password_protected,
        }
    }
}

struct ManagerState {
    connected_id: Option<UserId>,
    connection: Option<Arc<Connection>>,
    invitation_task: Option<JoinHandle<()>>,
}

/// Registry of room containers for one connection, plus room discovery,
/// creation and invitation routing.
pub struct RoomManager {
    containers: Mutex<Vec<Arc<RoomContainer>>>,
    invitation_listeners: Mutex<Vec<Arc<dyn InvitationListener>>>,
    inner: Mutex<ManagerState>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            containers: Mutex::new(Vec::new()),
            invitation_listeners: Mutex::new(Vec::new()),
            inner: Mutex::new(ManagerState {
                connected_id: None,
                connection: None,
                invitation_task: None,
            }),
        })
    }

    /// Attach to a live connection, or detach with `None`. Attaching
    /// starts the invitation converter; detaching stops it and disposes
    /// every registered container.
    pub async fn set_connection(
        self: &Arc<Self>,
        connected_id: Option<UserId>,
        connection: Option<Arc<Connection>>,
    ) -> Result<(), EngineError> {
        match connection {
            Some(connection) => {
                let transport = connection.transport_session().await?;
                let invitations = transport.subscribe_invitations();
                let task = self.spawn_invitation_task(invitations);
                let mut inner = self.inner.lock().await;
                if let Some(previous) = inner.invitation_task.take() {
                    previous.abort();
                }
                inner.connected_id = connected_id;
                inner.connection = Some(connection);
                inner.invitation_task = Some(task);
                Ok(())
            }
            None => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.connected_id = None;
                    inner.connection = None;
                    if let Some(task) = inner.invitation_task.take() {
                        task.abort();
                    }
                }
                self.dispose_containers().await;
                Ok(())
            }
        }
    }

    /// Build and register a container on the current connection.
    pub async fn create_room_container(&self) -> Result<Arc<RoomContainer>, EngineError> {
        let connection = {
            let inner = self.inner.lock().await;
            inner.connection.clone()
        }
        .ok_or(EngineError::NotConnected)?;
        let container = RoomContainer::new(connection);
        self.containers.lock().await.push(Arc::clone(&container));
        Ok(container)
    }

    pub async fn remove_room_container(&self, container: &Arc<RoomContainer>) {
        self.containers
            .lock()
            .await
            .retain(|c| !Arc::ptr_eq(c, container));
    }

    /// The registered container currently joined to `room`, if any.
    /// First match in registration order.
    pub async fn find_room_container(&self, room: &RoomId) -> Option<Arc<RoomContainer>> {
        let snapshot = self.containers.lock().await.clone();
        for container in snapshot {
            if container.connected_id().await.as_ref() == Some(room) {
                return Some(container);
            }
        }
        None
    }

    pub async fn add_invitation_listener(&self, listener: Arc<dyn InvitationListener>) {
        self.invitation_listeners.lock().await.push(listener);
    }

    pub async fn remove_invitation_listener(&self, listener: &Arc<dyn InvitationListener>) {
        self.invitation_listeners
            .lock()
            .await
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Invite `target` into `room` through the container joined to it.
    pub async fn send_invitation(
        &self,
        room: &RoomId,
        target: &UserId,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<(), EngineError> {
        let container = self
            .find_room_container(room)
            .await
            .ok_or_else(|| {
                EngineError::invalid_target(format!("no joined room {}", room.muc_address()))
            })?;
        container.send_invitation(target, subject, body).await
    }

    /// Create (or adopt) the room `name` and describe it. An existing
    /// room is left untouched; a missing one is created, configured
    /// with server defaults, and given the requested subject.
    pub async fn create_room(
        &self,
        name: &str,
        options: &CreateRoomOptions,
    ) -> Result<RoomDescriptor, EngineError> {
        let (connected_id, transport) = self.connection_context().await?;
        match self
            .create_room_inner(name, options, &connected_id, transport.as_ref())
            .await
        {
            Ok(descriptor) => {
                info!(room = %descriptor.room_id, "room ready");
                Ok(descriptor)
            }
            Err(source) => Err(EngineError::create_failed(name, source)),
        }
    }

    /// Hosted rooms across the server's conference services, described.
    /// Failures degrade to an empty listing.
    pub async fn room_infos(&self) -> Vec<RoomDescriptor> {
        let Ok((connected_id, transport)) = self.connection_context().await else {
            return Vec::new();
        };
        let services = match transport.muc_services().await {
            Ok(services) => services,
            Err(err) => {
                warn!(error = %err, "could not enumerate conference services");
                return Vec::new();
            }
        };
        let mut descriptors = Vec::new();
        for service in services {
            let items = match transport.discover_items(&service).await {
                Ok(items) => items,
                Err(err) => {
                    warn!(service = %service, error = %err, "conference listing failed");
                    continue;
                }
            };
            for item in items {
                if let Some(descriptor) = self
                    .describe_item(transport.as_ref(), &connected_id, &item)
                    .await
                {
                    descriptors.push(descriptor);
                }
            }
        }
        descriptors
    }

    /// Describe the room called `name` under the default conference
    /// domain. `None` when the room cannot be described.
    pub async fn room_info(&self, name: &str) -> Option<RoomDescriptor> {
        let (connected_id, transport) = self.connection_context().await.ok()?;
        let conference = fix_conference_domain(DOMAIN_DEFAULT, &transport.service_host());
        let address = format!("{name}@{conference}");
        let info = match transport.room_info(&address).await {
            Ok(info) => info,
            Err(err) => {
                debug!(room = %address, error = %err, "room info lookup failed");
                return None;
            }
        };
        let room_id =
            RoomId::from_muc_address(&address, address.clone(), connected_id.node()).ok()?;
        Some(RoomDescriptor::from_info(room_id, info))
    }

    /// Drop listeners, containers and the connection reference.
    pub async fn dispose(self: &Arc<Self>) {
        self.invitation_listeners.lock().await.clear();
        if let Err(err) = self.set_connection(None, None).await {
            warn!(error = %err, "dispose could not detach cleanly");
        }
    }

    async fn create_room_inner(
        &self,
        name: &str,
        options: &CreateRoomOptions,
        connected_id: &UserId,
        transport: &dyn TransportSession,
    ) -> Result<RoomDescriptor, EngineError> {
        let nickname = connected_id.node().to_string();
        let domain = options
            .conference
            .clone()
            .unwrap_or_else(|| DOMAIN_DEFAULT.to_string());
        let conference = fix_conference_domain(&domain, &transport.service_host());
        let address = format!("{name}@{conference}");

        if !self.room_exists(transport, &conference, &address).await? {
            let session = transport.room(&address);
            session.create(&nickname).await.map_err(EngineError::transport)?;
            session
                .submit_default_config()
                .await
                .map_err(EngineError::transport)?;
            if let Some(subject) = &options.subject {
                session
                    .change_subject(subject)
                    .await
                    .map_err(EngineError::transport)?;
            }
            debug!(room = %address, "room created and configured");
        }

        let info = transport
            .room_info(&address)
            .await
            .map_err(EngineError::transport)?;
        let room_id = RoomId::from_muc_address(&address, address.clone(), nickname)
            .map_err(|err| EngineError::invalid_target(err.to_string()))?;
        Ok(RoomDescriptor::from_info(room_id, info))
    }

    /// Existence probe over service discovery. A failed probe surfaces
    /// with its cause intact, never treated as "room absent".
    async fn room_exists(
        &self,
        transport: &dyn TransportSession,
        conference: &str,
        address: &str,
    ) -> Result<bool, EngineError> {
        let items: Vec<DiscoItem> = transport
            .discover_items(conference)
            .await
            .map_err(|err| {
                EngineError::transport(
                    err.context(format!("could not discover items of {conference}")),
                )
            })?;
        Ok(items.iter().any(|item| item.entity == address))
    }

    async fn describe_item(
        &self,
        transport: &dyn TransportSession,
        connected_id: &UserId,
        item: &DiscoItem,
    ) -> Option<RoomDescriptor> {
        let info = match transport.room_info(&item.entity).await {
            Ok(info) => info,
            Err(err) => {
                debug!(room = %item.entity, error = %err, "room info lookup failed");
                return None;
            }
        };
        let long_name = item.name.clone().unwrap_or_else(|| item.entity.clone());
        let room_id =
            RoomId::from_muc_address(&item.entity, long_name, connected_id.node()).ok()?;
        Some(RoomDescriptor::from_info(room_id, info))
    }

    async fn connection_context(
        &self,
    ) -> Result<(UserId, Arc<dyn TransportSession>), EngineError> {
        let (connected_id, connection) = {
            let inner = self.inner.lock().await;
            (inner.connected_id.clone(), inner.connection.clone())
        };
        let connection = connection.ok_or(EngineError::NotConnected)?;
        let connected_id = connected_id.ok_or(EngineError::NotConnected)?;
        let transport = connection.transport_session().await?;
        Ok((connected_id, transport))
    }

    async fn dispose_containers(&self) {
        let drained: Vec<_> = {
            let mut containers = self.containers.lock().await;
            containers.drain(..).collect()
        };
        for container in drained {
            container.dispose().await;
        }
    }

    fn spawn_invitation_task(
        self: &Arc<Self>,
        mut invitations: broadcast::Receiver<InvitationNotice>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match invitations.recv().await {
                    Ok(notice) => manager.convert_invitation(notice).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "invitation stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn convert_invitation(&self, notice: InvitationNotice) {
        let nickname = {
            let inner = self.inner.lock().await;
            inner
                .connected_id
                .as_ref()
                .map(|id| id.node().to_string())
                .unwrap_or_default()
        };
        let room = match RoomId::from_muc_address(
            &notice.room_address,
            notice.room_address.clone(),
            nickname,
        ) {
            Ok(room) => room,
            Err(err) => {
                warn!(room = %notice.room_address, error = %err,
                    "dropping invitation with unparsable room address");
                return;
            }
        };
        let from = notice.inviter.parse::<UserId>().ok();
        let listeners = self.invitation_listeners.lock().await.clone();
        for listener in listeners {
            listener
                .invitation_received(
                    room.clone(),
                    from.clone(),
                    notice.subject.clone(),
                    notice.reason.clone(),
                )
                .await;
        }
    }
}

#[cfg(test)]
#[path = "tests/room_manager_tests.rs"]
mod tests;
