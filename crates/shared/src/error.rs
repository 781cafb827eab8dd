use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defined error conditions a remote error reply can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCondition {
    NotAuthorized,
    Conflict,
    ItemNotFound,
    ServiceUnavailable,
    UnexpectedRequest,
    Undefined,
}

impl ErrorCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCondition::NotAuthorized => "not-authorized",
            ErrorCondition::Conflict => "conflict",
            ErrorCondition::ItemNotFound => "item-not-found",
            ErrorCondition::ServiceUnavailable => "service-unavailable",
            ErrorCondition::UnexpectedRequest => "unexpected-request",
            ErrorCondition::Undefined => "undefined-condition",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure payload of an explicit error reply. Preserved verbatim
/// through the engine so callers see what the remote reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{condition}: {text}")]
pub struct StanzaError {
    pub condition: ErrorCondition,
    pub text: String,
}

impl StanzaError {
    pub fn new(condition: ErrorCondition, text: impl Into<String>) -> Self {
        Self {
            condition,
            text: text.into(),
        }
    }
}
