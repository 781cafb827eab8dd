use shared::error::StanzaError;
use thiserror::Error;

/// Engine failure taxonomy. Every public operation either completes or
/// returns one of these with the original cause attached.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not connected")]
    NotConnected,

    #[error("no response from server for {operation}")]
    NoResponse { operation: String },

    #[error("protocol error")]
    Protocol {
        #[source]
        source: StanzaError,
    },

    #[error("invalid target: {reason}")]
    InvalidTarget { reason: String },

    #[error("connect to {target} failed")]
    ConnectFailed {
        target: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("could not create {name}")]
    CreateFailed {
        name: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("transport failure")]
    Transport {
        #[source]
        source: anyhow::Error,
    },

    #[error("illegal state: {reason}")]
    IllegalState { reason: String },
}

impl EngineError {
    pub fn transport(source: anyhow::Error) -> Self {
        EngineError::Transport { source }
    }

    pub fn protocol(source: StanzaError) -> Self {
        EngineError::Protocol { source }
    }

    pub fn no_response(operation: impl Into<String>) -> Self {
        EngineError::NoResponse {
            operation: operation.into(),
        }
    }

    pub fn invalid_target(reason: impl Into<String>) -> Self {
        EngineError::InvalidTarget {
            reason: reason.into(),
        }
    }

    pub fn connect_failed(target: impl Into<String>, source: EngineError) -> Self {
        EngineError::ConnectFailed {
            target: target.into(),
            source: Box::new(source),
        }
    }

    pub fn create_failed(name: impl Into<String>, source: EngineError) -> Self {
        EngineError::CreateFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn illegal_state(reason: impl Into<String>) -> Self {
        EngineError::IllegalState {
            reason: reason.into(),
        }
    }
}
