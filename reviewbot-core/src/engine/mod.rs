//! Business rules for reviewer assignment and the pull request lifecycle.
//!
//! The engines orchestrate reads and writes against the store traits and
//! contain every rule about eligibility, uniqueness, and team membership.
//! Nothing below this layer makes decisions.

mod pr;
mod team;
mod user;

pub use pr::PrEngine;
pub use team::{TeamEngine, TeamUpsert};
pub use user::UserEngine;
