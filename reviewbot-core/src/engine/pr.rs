//! Pull request lifecycle: creation, merge, reviewer reassignment.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{PrId, PrStatus, PullRequest, UserId};
use crate::selection;
use crate::store::{InsertOutcome, PrStore, UpdateOutcome, UserStore};

/// Upper bound on reviewers assigned at creation.
const MAX_REVIEWERS: usize = 2;

/// How often a read-modify-write cycle retries after losing a version race
/// before giving up.
const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Orchestrates pull request state: assigns reviewers at creation, advances
/// the OPEN -> MERGED transition, and swaps reviewers mid-flight.
///
/// The rng is seedable for deterministic tests and mutex-guarded so the
/// engine stays safe under concurrent calls. Merge and reassignment go
/// through the store's versioned update, retrying on conflict, which
/// serializes all mutations of a single pull request.
pub struct PrEngine {
    prs: Arc<dyn PrStore>,
    users: Arc<dyn UserStore>,
    rng: Mutex<StdRng>,
}

impl PrEngine {
    pub fn new(prs: Arc<dyn PrStore>, users: Arc<dyn UserStore>) -> Self {
        Self::with_rng(prs, users, StdRng::from_entropy())
    }

    /// Build an engine with an explicit rng, for deterministic selection.
    pub fn with_rng(prs: Arc<dyn PrStore>, users: Arc<dyn UserStore>, rng: StdRng) -> Self {
        Self {
            prs,
            users,
            rng: Mutex::new(rng),
        }
    }

    /// Create a pull request and assign up to two reviewers drawn from the
    /// author's active teammates. A pool of zero or one eligible teammates
    /// yields that many reviewers; only a duplicate id or an unknown author
    /// fails.
    pub async fn create_pr(
        &self,
        id: PrId,
        name: String,
        author_id: UserId,
    ) -> Result<PullRequest, EngineError> {
        if self.prs.find_pr(&id).await?.is_some() {
            return Err(EngineError::PrAlreadyExists(id));
        }

        let author = self
            .users
            .find_user(author_id)
            .await?
            .ok_or_else(|| EngineError::user_not_found(author_id))?;

        let teammates = self.users.list_users_by_team(&author.team_name).await?;
        let pool: Vec<UserId> = teammates
            .iter()
            .filter(|u| u.id != author_id && u.is_active)
            .map(|u| u.id)
            .collect();

        let reviewers = {
            let mut rng = self.rng.lock().unwrap();
            selection::random_prefix(&pool, MAX_REVIEWERS, &mut *rng)
        };

        let pr = PullRequest {
            id,
            name,
            author_id,
            status: PrStatus::Open,
            assigned_reviewers: reviewers,
            created_at: Utc::now(),
            merged_at: None,
            version: 0,
        };

        match self.prs.create_pr(pr.clone()).await? {
            InsertOutcome::Inserted => {
                info!(
                    "Created PR {} with reviewers {:?}",
                    pr.id, pr.assigned_reviewers
                );
                Ok(pr)
            }
            // Lost a create race after the duplicate check.
            InsertOutcome::DuplicateId => Err(EngineError::PrAlreadyExists(pr.id)),
        }
    }

    /// Mark a pull request as merged. Idempotent: merging an already-merged
    /// record returns it unchanged.
    pub async fn merge_pr(&self, id: &PrId) -> Result<PullRequest, EngineError> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let pr = self
                .prs
                .find_pr(id)
                .await?
                .ok_or_else(|| EngineError::pr_not_found(id))?;

            if pr.is_merged() {
                return Ok(pr);
            }

            let mut updated = pr;
            updated.status = PrStatus::Merged;
            updated.merged_at = Some(Utc::now());

            match self.prs.update_pr(updated).await? {
                UpdateOutcome::Applied(pr) => {
                    info!("Merged PR {}", pr.id);
                    return Ok(pr);
                }
                UpdateOutcome::Conflict => {
                    warn!("Concurrent update on PR {}, retrying merge", id);
                    continue;
                }
                UpdateOutcome::Missing => return Err(EngineError::pr_not_found(id)),
            }
        }

        Err(EngineError::Internal(format!(
            "merge of PR {} kept conflicting after {} attempts",
            id, MAX_UPDATE_ATTEMPTS
        )))
    }

    /// Replace one currently-assigned reviewer with a random active member
    /// of the old reviewer's team, in place, leaving any other reviewer slot
    /// untouched. Returns the updated record and the replacement's id.
    ///
    /// The candidate pool excludes the departing reviewer and anyone already
    /// holding the other slot (reviewer entries stay distinct). The PR's
    /// author is deliberately NOT excluded, mirroring the eligibility basis
    /// the assignment has always used.
    pub async fn reassign_reviewer(
        &self,
        pr_id: &PrId,
        old_reviewer: UserId,
    ) -> Result<(PullRequest, UserId), EngineError> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let pr = self
                .prs
                .find_pr(pr_id)
                .await?
                .ok_or_else(|| EngineError::pr_not_found(pr_id))?;

            if pr.is_merged() {
                return Err(EngineError::AlreadyMerged(pr_id.clone()));
            }

            let Some(slot) = pr
                .assigned_reviewers
                .iter()
                .position(|r| *r == old_reviewer)
            else {
                return Err(EngineError::ReviewerNotAssigned {
                    pr: pr_id.clone(),
                    reviewer: old_reviewer,
                });
            };

            let old_user = self
                .users
                .find_user(old_reviewer)
                .await?
                .ok_or_else(|| EngineError::user_not_found(old_reviewer))?;

            let teammates = self.users.list_users_by_team(&old_user.team_name).await?;
            let pool: Vec<UserId> = teammates
                .iter()
                .filter(|u| u.is_active && !pr.assigned_reviewers.contains(&u.id))
                .map(|u| u.id)
                .collect();

            let picked = {
                let mut rng = self.rng.lock().unwrap();
                selection::pick_one(&pool, &mut *rng)
            };
            let Some(new_reviewer) = picked else {
                return Err(EngineError::NoCandidate {
                    team: old_user.team_name,
                });
            };

            let mut updated = pr;
            updated.assigned_reviewers[slot] = new_reviewer;

            match self.prs.update_pr(updated).await? {
                UpdateOutcome::Applied(pr) => {
                    info!(
                        "Reassigned reviewer {} -> {} on PR {}",
                        old_reviewer, new_reviewer, pr.id
                    );
                    return Ok((pr, new_reviewer));
                }
                UpdateOutcome::Conflict => {
                    warn!("Concurrent update on PR {}, retrying reassignment", pr_id);
                    continue;
                }
                UpdateOutcome::Missing => return Err(EngineError::pr_not_found(pr_id)),
            }
        }

        Err(EngineError::Internal(format!(
            "reassignment on PR {} kept conflicting after {} attempts",
            pr_id, MAX_UPDATE_ATTEMPTS
        )))
    }

    /// All pull requests on which the user is currently an assigned
    /// reviewer. Fails if the user itself is unknown.
    pub async fn prs_for_reviewer(&self, user_id: UserId) -> Result<Vec<PullRequest>, EngineError> {
        if self.users.find_user(user_id).await?.is_none() {
            return Err(EngineError::user_not_found(user_id));
        }
        Ok(self.prs.list_prs_by_reviewer(user_id).await?)
    }
}
