use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conference domains with no dot are qualified against this label.
pub const DOMAIN_DEFAULT: &str = "conference";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("identifier {0:?} has no node part")]
    MissingNode(String),
    #[error("identifier {0:?} has no domain part")]
    MissingDomain(String),
    #[error("identifier {0:?} carries an unparsable port")]
    BadPort(String),
}

/// A user address: `node@domain[:port][/resource]`.
///
/// The domain is kept verbatim, including a trailing `;host` override
/// suffix when one is present; splitting the override off is the
/// connection's job, not the identifier's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId {
    node: String,
    domain: String,
    port: Option<u16>,
    resource: Option<String>,
}

impl UserId {
    pub fn new(
        node: impl Into<String>,
        domain: impl Into<String>,
        port: Option<u16>,
        resource: Option<String>,
    ) -> Self {
        Self {
            node: node.into(),
            domain: domain.into(),
            port,
            resource,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// `node@domain/resource`, resource omitted when absent. The port is
    /// connection routing detail and never part of the wire name.
    pub fn fq_name(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}@{}/{}", self.node, self.domain, resource),
            None => format!("{}@{}", self.node, self.domain),
        }
    }

    /// Compare ignoring resource and port.
    pub fn bare_eq(&self, other: &UserId) -> bool {
        self.node == other.node && self.domain == other.domain
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node, self.domain)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

impl FromStr for UserId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("xmpp:").unwrap_or(s);
        let (node, rest) = raw
            .split_once('@')
            .ok_or_else(|| IdParseError::MissingNode(s.to_string()))?;
        if node.is_empty() {
            return Err(IdParseError::MissingNode(s.to_string()));
        }
        let (host_part, resource) = match rest.split_once('/') {
            Some((host, resource)) if !resource.is_empty() => (host, Some(resource.to_string())),
            Some((host, _)) => (host, None),
            None => (rest, None),
        };
        let (domain, port) = match host_part.rsplit_once(':') {
            Some((domain, port_text)) => {
                let port = port_text
                    .parse::<u16>()
                    .map_err(|_| IdParseError::BadPort(s.to_string()))?;
                (domain.to_string(), Some(port))
            }
            None => (host_part.to_string(), None),
        };
        if domain.is_empty() {
            return Err(IdParseError::MissingDomain(s.to_string()));
        }
        Ok(UserId {
            node: node.to_string(),
            domain,
            port,
            resource,
        })
    }
}

/// A chat room address: `room@conference-domain`, plus the display name
/// and the default nickname used when joining.
///
/// Equality and hashing consider the wire address only; display name and
/// nickname are presentation detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomId {
    room: String,
    domain: String,
    long_name: String,
    nickname: String,
}

impl RoomId {
    pub fn new(
        room: impl Into<String>,
        domain: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        let room = room.into();
        let long_name = room.clone();
        Self {
            room,
            domain: domain.into(),
            long_name,
            nickname: nickname.into(),
        }
    }

    pub fn from_muc_address(
        address: &str,
        long_name: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Result<Self, IdParseError> {
        let (room, domain) = address
            .split_once('@')
            .ok_or_else(|| IdParseError::MissingDomain(address.to_string()))?;
        if room.is_empty() {
            return Err(IdParseError::MissingNode(address.to_string()));
        }
        if domain.is_empty() {
            return Err(IdParseError::MissingDomain(address.to_string()));
        }
        Ok(Self {
            room: room.to_string(),
            domain: domain.to_string(),
            long_name: long_name.into(),
            nickname: nickname.into(),
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// The wire address, `room@domain`.
    pub fn muc_address(&self) -> String {
        format!("{}@{}", self.room, self.domain)
    }
}

impl PartialEq for RoomId {
    fn eq(&self, other: &Self) -> bool {
        self.room == other.room && self.domain == other.domain
    }
}

impl Eq for RoomId {}

impl std::hash::Hash for RoomId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.room.hash(state);
        self.domain.hash(state);
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.room, self.domain)
    }
}

/// The operand of every send/join operation: either a one-to-one peer or
/// a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetId {
    User(UserId),
    Room(RoomId),
}

impl TargetId {
    pub fn as_user(&self) -> Option<&UserId> {
        match self {
            TargetId::User(user) => Some(user),
            TargetId::Room(_) => None,
        }
    }

    pub fn as_room(&self) -> Option<&RoomId> {
        match self {
            TargetId::Room(room) => Some(room),
            TargetId::User(_) => None,
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetId::User(user) => user.fmt(f),
            TargetId::Room(room) => room.fmt(f),
        }
    }
}

/// Qualify a bare conference domain against the server host. A domain
/// already carrying a dot passes through unchanged.
pub fn fix_conference_domain(domain: &str, server: &str) -> String {
    if domain.contains('.') {
        domain.to_string()
    } else {
        format!("{domain}.{server}")
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
