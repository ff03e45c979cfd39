//! Team creation and membership refresh.

use std::sync::Arc;

use tracing::info;

use crate::error::EngineError;
use crate::model::{NewTeamMember, Team, TeamMember, User, UserId};
use crate::store::{InsertOutcome, TeamStore, UserStore};

/// Outcome of a team upsert.
///
/// A duplicate "create" is not an error: the existing team's member roster
/// is refreshed anyway, and `Refreshed` is the signal that lets callers
/// tell a no-op create from a fresh one. This mutate-then-signal contract
/// is intentional and depended on for roster refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamUpsert {
    /// The team was newly created.
    Created(Team),
    /// The team already existed; its members were upserted regardless.
    Refreshed(Team),
}

impl TeamUpsert {
    pub fn team(&self) -> &Team {
        match self {
            Self::Created(team) | Self::Refreshed(team) => team,
        }
    }

    pub fn already_existed(&self) -> bool {
        matches!(self, Self::Refreshed(_))
    }
}

/// Manages teams and the users affiliated with them.
pub struct TeamEngine {
    teams: Arc<dyn TeamStore>,
    users: Arc<dyn UserStore>,
}

impl TeamEngine {
    pub fn new(teams: Arc<dyn TeamStore>, users: Arc<dyn UserStore>) -> Self {
        Self { teams, users }
    }

    /// Create the team if absent, then upsert every listed member either
    /// way, binding each member's affiliation to this team.
    ///
    /// Member ids are parsed up front so a malformed id rejects the request
    /// before any write.
    pub async fn create_or_update(
        &self,
        name: &str,
        members: &[NewTeamMember],
    ) -> Result<TeamUpsert, EngineError> {
        let parsed: Vec<(UserId, &NewTeamMember)> = members
            .iter()
            .map(|m| {
                m.user_id
                    .parse::<UserId>()
                    .map(|id| (id, m))
                    .map_err(|_| EngineError::InvalidUserId(m.user_id.clone()))
            })
            .collect::<Result<_, _>>()?;

        let created = if self.teams.find_team(name).await?.is_some() {
            false
        } else {
            match self.teams.create_team(name).await? {
                InsertOutcome::Inserted => true,
                // Lost a create race; treat the team as pre-existing.
                InsertOutcome::DuplicateId => false,
            }
        };

        for (id, member) in &parsed {
            self.users
                .upsert_user(User {
                    id: *id,
                    username: member.username.clone(),
                    team_name: name.to_string(),
                    is_active: member.is_active,
                })
                .await?;
        }

        let team = self.assemble(name).await?;
        if created {
            info!("Created team {} with {} members", name, team.members.len());
            Ok(TeamUpsert::Created(team))
        } else {
            info!("Refreshed members of existing team {}", name);
            Ok(TeamUpsert::Refreshed(team))
        }
    }

    /// Fetch a team with its roster computed fresh from the user directory.
    pub async fn get_team(&self, name: &str) -> Result<Team, EngineError> {
        if self.teams.find_team(name).await?.is_none() {
            return Err(EngineError::team_not_found(name));
        }
        self.assemble(name).await
    }

    async fn assemble(&self, name: &str) -> Result<Team, EngineError> {
        let users = self.users.list_users_by_team(name).await?;
        Ok(Team {
            name: name.to_string(),
            members: users
                .into_iter()
                .map(|u| TeamMember {
                    user_id: u.id,
                    username: u.username,
                    is_active: u.is_active,
                })
                .collect(),
        })
    }
}
