use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use shared::stanza::{Iq, Stanza};
use transport::{
    DiscoItem, InvitationNotice, RoomEvent, RoomInfo, RoomSession, TransportConnector,
    TransportNotice, TransportOptions, TransportSession,
};

use crate::connection::{ConnectionEvent, EventSink};

pub struct MockTransport {
    pub notices: broadcast::Sender<TransportNotice>,
    pub invitations: broadcast::Sender<InvitationNotice>,
    pub sent: Mutex<Vec<Stanza>>,
    pub logins: Mutex<Vec<(String, String, String)>>,
    pub close_calls: Mutex<u32>,
    pub rooms: Mutex<HashMap<String, Arc<MockRoomSession>>>,
    pub disco: Mutex<HashMap<String, Vec<DiscoItem>>>,
    pub infos: Mutex<HashMap<String, RoomInfo>>,
    pub services: Mutex<Vec<String>>,
    pub host: String,
    /// When set, a successful login immediately delivers a bind result
    /// carrying this jid.
    pub bind_jid_on_login: Mutex<Option<String>>,
    pub fail_login: Mutex<Option<String>>,
    pub fail_discovery: Mutex<bool>,
    pub fail_account_ops: Mutex<bool>,
    pub password_changes: Mutex<Vec<String>>,
    pub created_accounts: Mutex<Vec<(String, String)>>,
    pub deleted_accounts: Mutex<u32>,
}

impl MockTransport {
    pub fn new(host: &str) -> Arc<Self> {
        let (notices, _) = broadcast::channel(64);
        let (invitations, _) = broadcast::channel(64);
        Arc::new(Self {
            notices,
            invitations,
            sent: Mutex::new(Vec::new()),
            logins: Mutex::new(Vec::new()),
            close_calls: Mutex::new(0),
            rooms: Mutex::new(HashMap::new()),
            disco: Mutex::new(HashMap::new()),
            infos: Mutex::new(HashMap::new()),
            services: Mutex::new(Vec::new()),
            host: host.to_string(),
            bind_jid_on_login: Mutex::new(None),
            fail_login: Mutex::new(None),
            fail_discovery: Mutex::new(false),
            fail_account_ops: Mutex::new(false),
            password_changes: Mutex::new(Vec::new()),
            created_accounts: Mutex::new(Vec::new()),
            deleted_accounts: Mutex::new(0),
        })
    }

    pub fn room_handle(&self, address: &str) -> Arc<MockRoomSession> {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .entry(address.to_string())
            .or_insert_with(MockRoomSession::new)
            .clone()
    }

    pub fn push_stanza(&self, stanza: Stanza) {
        let _ = self.notices.send(TransportNotice::Stanza(stanza));
    }

    pub fn push_closed(&self, error: Option<&str>) {
        let _ = self.notices.send(TransportNotice::Closed {
            error: error.map(str::to_string),
        });
    }
}

#[async_trait]
impl TransportSession for MockTransport {
    async fn login(&self, username: &str, password: &str, resource: &str) -> anyhow::Result<()> {
        self.logins.lock().unwrap().push((
            username.to_string(),
            password.to_string(),
            resource.to_string(),
        ));
        if let Some(reason) = self.fail_login.lock().unwrap().clone() {
            anyhow::bail!("{reason}");
        }
        let bind_jid = self.bind_jid_on_login.lock().unwrap().clone();
        if let Some(jid) = bind_jid {
            self.push_stanza(Stanza::Iq(Iq::bind_result(jid)));
        }
        Ok(())
    }

    async fn send_stanza(&self, stanza: Stanza) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(stanza);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        *self.close_calls.lock().unwrap() += 1;
        Ok(())
    }

    fn subscribe_notices(&self) -> broadcast::Receiver<TransportNotice> {
        self.notices.subscribe()
    }

    fn subscribe_invitations(&self) -> broadcast::Receiver<InvitationNotice> {
        self.invitations.subscribe()
    }

    fn room(&self, muc_address: &str) -> Arc<dyn RoomSession> {
        self.room_handle(muc_address)
    }

    async fn discover_items(&self, domain: &str) -> anyhow::Result<Vec<DiscoItem>> {
        if *self.fail_discovery.lock().unwrap() {
            anyhow::bail!("discovery unavailable");
        }
        Ok(self
            .disco
            .lock()
            .unwrap()
            .get(domain)
            .cloned()
            .unwrap_or_default())
    }

    async fn room_info(&self, muc_address: &str) -> anyhow::Result<RoomInfo> {
        self.infos
            .lock()
            .unwrap()
            .get(muc_address)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no room info for {muc_address}"))
    }

    async fn muc_services(&self) -> anyhow::Result<Vec<String>> {
        if *self.fail_discovery.lock().unwrap() {
            anyhow::bail!("discovery unavailable");
        }
        Ok(self.services.lock().unwrap().clone())
    }

    fn service_host(&self) -> String {
        self.host.clone()
    }

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        _attributes: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        if *self.fail_account_ops.lock().unwrap() {
            anyhow::bail!("registration rejected");
        }
        self.created_accounts
            .lock()
            .unwrap()
            .push((username.to_string(), password.to_string()));
        Ok(())
    }

    async fn change_password(&self, new_password: &str) -> anyhow::Result<()> {
        if *self.fail_account_ops.lock().unwrap() {
            anyhow::bail!("password change rejected");
        }
        self.password_changes
            .lock()
            .unwrap()
            .push(new_password.to_string());
        Ok(())
    }

    async fn delete_account(&self) -> anyhow::Result<()> {
        if *self.fail_account_ops.lock().unwrap() {
            anyhow::bail!("deletion rejected");
        }
        *self.deleted_accounts.lock().unwrap() += 1;
        Ok(())
    }

    async fn account_instructions(&self) -> anyhow::Result<String> {
        if *self.fail_account_ops.lock().unwrap() {
            anyhow::bail!("query failed");
        }
        Ok("Choose a username and password".to_string())
    }

    async fn account_attribute_names(&self) -> anyhow::Result<Vec<String>> {
        if *self.fail_account_ops.lock().unwrap() {
            anyhow::bail!("query failed");
        }
        Ok(vec!["username".to_string(), "password".to_string()])
    }

    async fn supports_account_creation(&self) -> anyhow::Result<bool> {
        if *self.fail_account_ops.lock().unwrap() {
            anyhow::bail!("query failed");
        }
        Ok(true)
    }
}

pub struct MockRoomSession {
    pub events: broadcast::Sender<RoomEvent>,
    pub joins: Mutex<Vec<String>>,
    pub creates: Mutex<Vec<String>>,
    pub config_submissions: Mutex<u32>,
    pub subjects: Mutex<Vec<String>>,
    pub invites: Mutex<Vec<(String, String)>>,
    pub texts: Mutex<Vec<String>>,
    pub leave_calls: Mutex<u32>,
    pub fail_join: Mutex<Option<String>>,
}

impl MockRoomSession {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            joins: Mutex::new(Vec::new()),
            creates: Mutex::new(Vec::new()),
            config_submissions: Mutex::new(0),
            subjects: Mutex::new(Vec::new()),
            invites: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
            leave_calls: Mutex::new(0),
            fail_join: Mutex::new(None),
        })
    }

    pub fn push_event(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl RoomSession for MockRoomSession {
    async fn join(&self, nickname: &str) -> anyhow::Result<()> {
        if let Some(reason) = self.fail_join.lock().unwrap().clone() {
            anyhow::bail!("{reason}");
        }
        self.joins.lock().unwrap().push(nickname.to_string());
        Ok(())
    }

    async fn create(&self, nickname: &str) -> anyhow::Result<()> {
        self.creates.lock().unwrap().push(nickname.to_string());
        Ok(())
    }

    async fn submit_default_config(&self) -> anyhow::Result<()> {
        *self.config_submissions.lock().unwrap() += 1;
        Ok(())
    }

    async fn leave(&self) -> anyhow::Result<()> {
        *self.leave_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn invite(&self, target: &str, reason: &str) -> anyhow::Result<()> {
        self.invites
            .lock()
            .unwrap()
            .push((target.to_string(), reason.to_string()));
        Ok(())
    }

    async fn send_text(&self, body: &str) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn change_subject(&self, subject: &str) -> anyhow::Result<()> {
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }
}

pub struct MockConnector {
    pub session: Arc<MockTransport>,
    pub options_seen: Mutex<Vec<TransportOptions>>,
    pub fail_open: Mutex<Option<String>>,
    pub open_delay: Mutex<Option<Duration>>,
}

impl MockConnector {
    pub fn new(session: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            session,
            options_seen: Mutex::new(Vec::new()),
            fail_open: Mutex::new(None),
            open_delay: Mutex::new(None),
        })
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(&self, options: TransportOptions) -> anyhow::Result<Arc<dyn TransportSession>> {
        self.options_seen.lock().unwrap().push(options);
        let delay = *self.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.fail_open.lock().unwrap().clone() {
            anyhow::bail!("{reason}");
        }
        Ok(self.session.clone())
    }
}

pub struct RecordingSink {
    pub id: String,
    pub events: Mutex<Vec<ConnectionEvent>>,
    pub disconnects: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            events: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn handler_id(&self) -> String {
        self.id.clone()
    }

    async fn handle_event(&self, event: ConnectionEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn handle_disconnect(&self, reason: String) {
        self.disconnects.lock().unwrap().push(reason);
    }
}
