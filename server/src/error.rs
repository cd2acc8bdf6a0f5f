//! Error types for the authoritative match state.

use thiserror::Error;
use tpk_shared::{EntityId, Field, PlayerId, Role, ValueKind};

/// Errors raised by the authority gate, the registry and request validation.
///
/// None of these abort a match: the boundary that receives them logs and
/// skips the offending operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplicationError {
    /// A role tried to write state it is not the authority for.
    #[error("{requester} may not write entity {entity} (authority is {authority})")]
    Authorization {
        entity: EntityId,
        requester: Role,
        authority: Role,
    },

    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("no entity registered for player {0}")]
    PlayerNotFound(PlayerId),

    #[error("entity {entity} has no field {field:?}")]
    FieldNotFound { entity: EntityId, field: Field },

    #[error("entity {0} is already registered")]
    DuplicateEntity(EntityId),

    #[error("field {field:?} expects {expected}")]
    TypeMismatch { field: Field, expected: ValueKind },

    /// A client request failed server-side validation.
    #[error("rejected request from player {player}: {reason}")]
    InvalidRequest { player: PlayerId, reason: String },
}

impl ReplicationError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReplicationError::EntityNotFound(_)
                | ReplicationError::PlayerNotFound(_)
                | ReplicationError::FieldNotFound { .. }
        )
    }

    pub fn invalid(player: PlayerId, reason: impl Into<String>) -> Self {
        ReplicationError::InvalidRequest {
            player,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_message() {
        let err = ReplicationError::Authorization {
            entity: 4,
            requester: Role::Client(2),
            authority: Role::Server,
        };
        assert_eq!(
            err.to_string(),
            "client 2 may not write entity 4 (authority is server)"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ReplicationError::EntityNotFound(1).is_not_found());
        assert!(ReplicationError::PlayerNotFound(1).is_not_found());
        assert!(ReplicationError::FieldNotFound {
            entity: 1,
            field: Field::Score
        }
        .is_not_found());
        assert!(!ReplicationError::DuplicateEntity(1).is_not_found());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = ReplicationError::TypeMismatch {
            field: Field::KnockedOut,
            expected: ValueKind::Flag,
        };
        assert_eq!(err.to_string(), "field KnockedOut expects a flag");
    }
}
