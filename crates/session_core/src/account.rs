use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use transport::TransportSession;

use crate::error::EngineError;

/// Account maintenance against the logged-in server: password change,
/// in-band registration and deletion. Holds the transport only while a
/// connection is attached.
pub struct AccountManager {
    session: Mutex<Option<Arc<dyn TransportSession>>>,
}

impl Default for AccountManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountManager {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    pub async fn set_connection(&self, session: Option<Arc<dyn TransportSession>>) {
        *self.session.lock().await = session;
    }

    pub async fn change_password(&self, new_password: &str) -> Result<(), EngineError> {
        let session = self.attached().await?;
        session
            .change_password(new_password)
            .await
            .map_err(EngineError::transport)
    }

    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), EngineError> {
        let session = self.attached().await?;
        session
            .create_account(username, password, attributes)
            .await
            .map_err(|err| {
                EngineError::create_failed(username, EngineError::transport(err))
            })
    }

    pub async fn delete_account(&self) -> Result<(), EngineError> {
        let session = self.attached().await?;
        session.delete_account().await.map_err(EngineError::transport)
    }

    /// Server-provided registration instructions; empty when the server
    /// offers none or the lookup fails.
    pub async fn account_creation_instructions(&self) -> String {
        let Ok(session) = self.attached().await else {
            return String::new();
        };
        match session.account_instructions().await {
            Ok(instructions) => instructions,
            Err(err) => {
                warn!(error = %err, "could not fetch account instructions");
                String::new()
            }
        }
    }

    /// Attribute names the server's registration form accepts; empty on
    /// failure.
    pub async fn account_attribute_names(&self) -> Vec<String> {
        let Ok(session) = self.attached().await else {
            return Vec::new();
        };
        match session.account_attribute_names().await {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "could not fetch account attribute names");
                Vec::new()
            }
        }
    }

    pub async fn supports_account_creation(&self) -> bool {
        let Ok(session) = self.attached().await else {
            return false;
        };
        match session.supports_account_creation().await {
            Ok(supported) => supported,
            Err(err) => {
                warn!(error = %err, "could not query account creation support");
                false
            }
        }
    }

    pub async fn dispose(&self) {
        *self.session.lock().await = None;
    }

    async fn attached(&self) -> Result<Arc<dyn TransportSession>, EngineError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::NotConnected)
    }
}

#[cfg(test)]
#[path = "tests/account_tests.rs"]
mod tests;
