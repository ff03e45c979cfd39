pub mod config;
pub mod sqlite;
pub mod web;

use reviewbot_core::{PrEngine, TeamEngine, UserEngine};

/// Shared state for the HTTP layer: one engine per concern, all backed by
/// the same store.
pub struct AppState {
    pub pr_engine: PrEngine,
    pub team_engine: TeamEngine,
    pub user_engine: UserEngine,
}
