//! Reviewer assignment and pull request lifecycle engine.
//!
//! Tracks pull requests inside teams and assigns or reassigns code
//! reviewers: random selection from the author's active teammates at
//! creation, an idempotent OPEN -> MERGED transition, and in-place
//! replacement of a reviewer mid-flight. Storage and transport are
//! collaborators behind the `store` traits; all business rules live in
//! `engine`.

pub mod engine;
pub mod error;
pub mod model;
pub mod selection;
pub mod store;

pub use engine::{PrEngine, TeamEngine, TeamUpsert, UserEngine};
pub use error::{EngineError, EntityKind};
pub use model::{
    NewTeamMember, PrId, PrStatus, PullRequest, Team, TeamMember, User, UserId,
};
pub use store::{
    InsertOutcome, MemoryStore, PrStore, StoreError, TeamStore, UpdateOutcome, UserStore,
};
