use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::identity::{TargetId, UserId};
use shared::stanza::{ChatMessage, Iq, IqKind, MessageKind, Stanza};
use transport::{TransportConnector, TransportNotice, TransportOptions, TransportSession};

use crate::error::EngineError;
use crate::sync_point::{SyncOutcome, SyncPoint};
use crate::SessionConfig;

/// Where the socket goes when the consumer service needs a fixed host.
pub const CONSUMER_SERVICE_HOST: &str = "talk.google.com";

/// Prefix of the resource derived from the event sink's handler id when
/// the remote id carries none.
pub const CLIENT_RESOURCE_PREFIX: &str = "client.";

/// An inbound stanza after classification. A message carrying the
/// well-known object property slot is an object delivery; everything
/// else is plain traffic.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ObjectStanza { stanza: Stanza, payload: Vec<u8> },
    Stanza(Stanza),
}

/// The component a connection delivers into: classified inbound events
/// plus the one-shot report of an abrupt close.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn handler_id(&self) -> String;
    async fn handle_event(&self, event: ConnectionEvent);
    async fn handle_disconnect(&self, reason: String);
}

struct ConnState {
    transport: Option<Arc<dyn TransportSession>>,
    connected: bool,
    started: bool,
    disconnecting: bool,
    session_id: Option<String>,
    receive_task: Option<JoinHandle<()>>,
}

/// Owns the transport session for one account login. Single-use: after
/// `disconnect` construct a fresh instance to reconnect.
pub struct Connection {
    connector: Arc<dyn TransportConnector>,
    sink: Arc<dyn EventSink>,
    consumer_service: bool,
    config: SessionConfig,
    bind: SyncPoint,
    // Held across the whole connect sequence; `inner` only protects
    // state snapshots.
    connect_gate: Mutex<()>,
    inner: Mutex<ConnState>,
}

impl Connection {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::build(connector, sink, config, false)
    }

    /// A connection to the consumer service, which routes to a fixed
    /// host unless the remote id names an explicit override.
    pub fn with_consumer_service(
        connector: Arc<dyn TransportConnector>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::build(connector, sink, config, true)
    }

    fn build(
        connector: Arc<dyn TransportConnector>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
        consumer_service: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            sink,
            consumer_service,
            config,
            bind: SyncPoint::new(),
            connect_gate: Mutex::new(()),
            inner: Mutex::new(ConnState {
                transport: None,
                connected: false,
                started: false,
                disconnecting: false,
                session_id: None,
                receive_task: None,
            }),
        })
    }

    /// Open the transport, log in and wait for the server to bind the
    /// resource. Returns the bound jid. Any failure tears the transport
    /// back down; the connection is never left half-initialized.
    /// Concurrent calls serialize: the second sees the installed
    /// transport and fails.
    pub async fn connect(
        self: &Arc<Self>,
        remote: &UserId,
        password: &str,
    ) -> Result<String, EngineError> {
        let _gate = self.connect_gate.lock().await;
        {
            let inner = self.inner.lock().await;
            if inner.transport.is_some() {
                return Err(EngineError::illegal_state("already connected"));
            }
        }

        let (service_name, host_override) =
            split_host_override(remote.domain(), self.consumer_service);
        let resource = match remote.resource() {
            Some(r) if r != "/" => r.to_string(),
            _ => format!("{CLIENT_RESOURCE_PREFIX}{}", self.sink.handler_id()),
        };
        let options = TransportOptions {
            service_name: service_name.clone(),
            host_override: host_override.clone(),
            port: remote.port(),
            accept_all_certificates: self.config.accept_all_certificates,
            reply_timeout: self.config.reply_timeout,
        };

        let transport = match self.connector.open(options).await {
            Ok(transport) => transport,
            Err(source) => {
                return Err(EngineError::connect_failed(
                    remote.to_string(),
                    EngineError::transport(source),
                ))
            }
        };

        self.bind.init().await;
        let notices = transport.subscribe_notices();
        let task = self.spawn_receive_task(notices);
        {
            let mut inner = self.inner.lock().await;
            inner.transport = Some(Arc::clone(&transport));
            inner.receive_task = Some(task);
            inner.disconnecting = false;
        }

        // Accounts on the consumer service authenticate with the full
        // service-qualified name.
        let username = if self.consumer_service
            || host_override.as_deref() == Some(CONSUMER_SERVICE_HOST)
        {
            format!("{}@{service_name}", remote.node())
        } else {
            remote.node().to_string()
        };

        if let Err(source) = transport.login(&username, password, &resource).await {
            self.disconnect().await;
            return Err(EngineError::connect_failed(
                remote.to_string(),
                EngineError::transport(source),
            ));
        }

        match self.bind.check_if_success_or_wait(self.config.bind_timeout).await {
            SyncOutcome::Success => {}
            SyncOutcome::Failure(err) => {
                self.disconnect().await;
                return Err(EngineError::connect_failed(
                    remote.to_string(),
                    EngineError::protocol(err),
                ));
            }
            SyncOutcome::NoResponse => {
                self.disconnect().await;
                return Err(EngineError::connect_failed(
                    remote.to_string(),
                    EngineError::no_response("resource bind"),
                ));
            }
        }

        let jid = {
            let mut inner = self.inner.lock().await;
            inner.connected = true;
            inner
                .session_id
                .clone()
                .ok_or_else(|| EngineError::illegal_state("bind reported without a jid"))?
        };
        info!(jid = %jid, service = %service_name, "connected");
        Ok(jid)
    }

    /// Idempotent. Aborts the receive path, closes the transport and
    /// clears connection state. Safe on an already-disconnected
    /// instance.
    pub async fn disconnect(&self) {
        let transport = {
            let mut inner = self.inner.lock().await;
            inner.disconnecting = true;
            inner.connected = false;
            inner.started = false;
            inner.session_id = None;
            if let Some(task) = inner.receive_task.take() {
                task.abort();
            }
            inner.transport.take()
        };
        if let Some(transport) = transport {
            if let Err(err) = transport.close().await {
                warn!(error = %err, "transport close failed during disconnect");
            }
        }
    }

    /// Send a serialized application object to a peer or room.
    pub async fn send_object(&self, target: &TargetId, payload: &[u8]) -> Result<(), EngineError> {
        if payload.is_empty() {
            return Err(EngineError::invalid_target("empty payload"));
        }
        let mut message = ChatMessage::default();
        message.set_object_payload(payload);
        self.send_message(target, message).await
    }

    /// Send a plain text message to a peer or room.
    pub async fn send_text(&self, target: &TargetId, text: &str) -> Result<(), EngineError> {
        let message = ChatMessage {
            body: Some(text.to_string()),
            ..ChatMessage::default()
        };
        self.send_message(target, message).await
    }

    /// The jid the server bound this session to. `None` unless
    /// connected.
    pub async fn local_session_id(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        if inner.connected {
            inner.session_id.clone()
        } else {
            None
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn start(&self) {
        self.inner.lock().await.started = true;
    }

    pub async fn stop(&self) {
        self.inner.lock().await.started = false;
    }

    pub async fn is_started(&self) -> bool {
        self.inner.lock().await.started
    }

    /// The live transport, for components layered on this connection.
    pub async fn transport_session(&self) -> Result<Arc<dyn TransportSession>, EngineError> {
        let inner = self.inner.lock().await;
        match &inner.transport {
            Some(transport) if inner.connected => Ok(Arc::clone(transport)),
            _ => Err(EngineError::NotConnected),
        }
    }

    async fn send_message(
        &self,
        target: &TargetId,
        mut message: ChatMessage,
    ) -> Result<(), EngineError> {
        let transport = self.transport_session().await?;
        match target {
            TargetId::User(user) => {
                message.kind = MessageKind::Chat;
                message.to = Some(user.fq_name());
            }
            TargetId::Room(room) => {
                message.kind = MessageKind::GroupChat;
                message.to = Some(room.muc_address());
            }
        }
        transport
            .send_stanza(Stanza::Message(message))
            .await
            .map_err(EngineError::transport)
    }

    fn spawn_receive_task(
        self: &Arc<Self>,
        mut notices: broadcast::Receiver<TransportNotice>,
    ) -> JoinHandle<()> {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(TransportNotice::Stanza(stanza)) => conn.handle_stanza(stanza).await,
                    Ok(TransportNotice::Closed { error }) => {
                        let reason =
                            error.unwrap_or_else(|| "connection closed by peer".to_string());
                        conn.handle_connection_closed(reason).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "receive path lagged behind transport delivery");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_stanza(&self, stanza: Stanza) {
        self.observe_bind(&stanza).await;
        let event = match stanza.object_payload() {
            Some(payload) => ConnectionEvent::ObjectStanza { stanza, payload },
            None => ConnectionEvent::Stanza(stanza),
        };
        self.sink.handle_event(event).await;
    }

    /// The jid is recorded from the first bind acknowledgement only;
    /// later results never rebind a live session.
    async fn observe_bind(&self, stanza: &Stanza) {
        let Stanza::Iq(Iq {
            kind: IqKind::Result,
            bound_jid: Some(jid),
            ..
        }) = stanza
        else {
            return;
        };
        let fresh = {
            let mut inner = self.inner.lock().await;
            if inner.session_id.is_none() {
                inner.session_id = Some(jid.clone());
                true
            } else {
                false
            }
        };
        if fresh {
            debug!(jid = %jid, "resource bound");
            self.bind.report_success().await;
        }
    }

    async fn handle_connection_closed(&self, reason: String) {
        let report = {
            let mut inner = self.inner.lock().await;
            if inner.disconnecting {
                false
            } else {
                inner.disconnecting = true;
                true
            }
        };
        if report {
            warn!(reason = %reason, "transport closed unexpectedly");
            self.sink.handle_disconnect(reason).await;
        }
    }
}

/// Split the `;host` override off a remote domain. The suffix after the
/// last `;` wins; the consumer-service host applies only when no
/// explicit override was given.
fn split_host_override(domain: &str, consumer_service: bool) -> (String, Option<String>) {
    match domain.rsplit_once(';') {
        Some((service, over)) => (service.to_string(), Some(over.to_string())),
        None if consumer_service => (
            domain.to_string(),
            Some(CONSUMER_SERVICE_HOST.to_string()),
        ),
        None => (domain.to_string(), None),
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
