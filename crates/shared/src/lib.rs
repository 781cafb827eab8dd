pub mod error;
pub mod identity;
pub mod stanza;

pub use error::{ErrorCondition, StanzaError};
pub use identity::{fix_conference_domain, IdParseError, RoomId, TargetId, UserId, DOMAIN_DEFAULT};
pub use stanza::{
    ChatMessage, Iq, IqKind, MessageKind, ParticipantStatus, Presence, PresenceKind, Stanza,
    OBJECT_PROPERTY_NAME,
};
