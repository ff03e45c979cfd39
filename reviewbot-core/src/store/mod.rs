//! Store abstraction for users, teams, and pull requests.
//!
//! The engine consumes these traits and is indifferent to how records are
//! persisted. Absence is data (`Ok(None)`, `InsertOutcome::DuplicateId`,
//! `UpdateOutcome::Missing`), never an error; `StoreError` is reserved for
//! storage failures and corrupt records.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{PrId, PullRequest, Team, User, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt record: {what}")]
    Corruption { what: String },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

/// Outcome of inserting a record under a caller-supplied id.
///
/// Duplicates are reported as data so that a create race between two callers
/// surfaces deterministically instead of as a backend-specific error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateId,
}

/// Outcome of a versioned pull request update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write applied; the returned record carries the bumped version.
    Applied(PullRequest),
    /// The stored version differs from the expected one; nothing was written.
    Conflict,
    /// No record with this id exists.
    Missing,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by id, `None` if absent.
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// All users whose team affiliation equals `team_name`, ordered by id.
    async fn list_users_by_team(&self, team_name: &str) -> Result<Vec<User>, StoreError>;

    /// Create-or-replace a user by id.
    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Look up a team by name. The returned roster is empty; membership is
    /// derived from the user directory, not stored with the team.
    async fn find_team(&self, name: &str) -> Result<Option<Team>, StoreError>;

    /// Create a team record.
    async fn create_team(&self, name: &str) -> Result<InsertOutcome, StoreError>;
}

#[async_trait]
pub trait PrStore: Send + Sync {
    async fn find_pr(&self, id: &PrId) -> Result<Option<PullRequest>, StoreError>;

    async fn create_pr(&self, pr: PullRequest) -> Result<InsertOutcome, StoreError>;

    /// Compare-and-set: the write applies only if the stored version equals
    /// `pr.version`. All read-modify-write cycles on a pull request go
    /// through this, which serializes concurrent merges and reassignments.
    async fn update_pr(&self, pr: PullRequest) -> Result<UpdateOutcome, StoreError>;

    /// All pull requests on which `reviewer` currently appears in the
    /// assigned reviewer list.
    async fn list_prs_by_reviewer(&self, reviewer: UserId) -> Result<Vec<PullRequest>, StoreError>;
}
