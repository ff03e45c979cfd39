//! Engine error taxonomy.
//!
//! A closed set of tagged variants carrying the entity kind and id, matched
//! exhaustively by callers. Store-level absence never surfaces as an error;
//! the engine translates it into `NotFound` at its boundary.

use std::fmt;

use thiserror::Error;

use crate::model::{PrId, UserId};
use crate::store::StoreError;

/// The kind of entity an id failed to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Team,
    PullRequest,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Team => f.write_str("team"),
            Self::PullRequest => f.write_str("pull request"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("pull request {0} already exists")]
    PrAlreadyExists(PrId),

    #[error("pull request {0} is already merged")]
    AlreadyMerged(PrId),

    #[error("user {reviewer} is not assigned to pull request {pr}")]
    ReviewerNotAssigned { pr: PrId, reviewer: UserId },

    #[error("no active replacement candidate in team {team}")]
    NoCandidate { team: String },

    #[error("invalid user id {0:?}")]
    InvalidUserId(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn user_not_found(id: UserId) -> Self {
        Self::NotFound {
            kind: EntityKind::User,
            id: id.to_string(),
        }
    }

    pub fn team_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: EntityKind::Team,
            id: name.into(),
        }
    }

    pub fn pr_not_found(id: &PrId) -> Self {
        Self::NotFound {
            kind: EntityKind::PullRequest,
            id: id.to_string(),
        }
    }
}
