//! In-memory store implementation.
//!
//! Records live in `HashMap`s behind `RwLock`s; everything is lost on
//! restart. The engine test suite runs against this backend, and it serves
//! as the reference implementation for the versioned update semantics.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{InsertOutcome, PrStore, StoreError, TeamStore, UpdateOutcome, UserStore};
use crate::model::{PrId, PullRequest, Team, User, UserId};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    teams: RwLock<HashSet<String>>,
    prs: RwLock<HashMap<PrId, PullRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn list_users_by_team(&self, team_name: &str) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        let mut members: Vec<User> = users
            .values()
            .filter(|u| u.team_name == team_name)
            .cloned()
            .collect();
        members.sort_by_key(|u| u.id.0);
        Ok(members)
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        users.insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn find_team(&self, name: &str) -> Result<Option<Team>, StoreError> {
        let teams = self.teams.read().await;
        Ok(teams.get(name).map(|name| Team {
            name: name.clone(),
            members: Vec::new(),
        }))
    }

    async fn create_team(&self, name: &str) -> Result<InsertOutcome, StoreError> {
        let mut teams = self.teams.write().await;
        if teams.insert(name.to_string()) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::DuplicateId)
        }
    }
}

#[async_trait]
impl PrStore for MemoryStore {
    async fn find_pr(&self, id: &PrId) -> Result<Option<PullRequest>, StoreError> {
        let prs = self.prs.read().await;
        Ok(prs.get(id).cloned())
    }

    async fn create_pr(&self, pr: PullRequest) -> Result<InsertOutcome, StoreError> {
        use std::collections::hash_map::Entry;

        let mut prs = self.prs.write().await;
        match prs.entry(pr.id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::DuplicateId),
            Entry::Vacant(entry) => {
                entry.insert(pr);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn update_pr(&self, pr: PullRequest) -> Result<UpdateOutcome, StoreError> {
        let mut prs = self.prs.write().await;
        match prs.get_mut(&pr.id) {
            None => Ok(UpdateOutcome::Missing),
            Some(stored) if stored.version != pr.version => Ok(UpdateOutcome::Conflict),
            Some(stored) => {
                let mut updated = pr;
                updated.version += 1;
                *stored = updated.clone();
                Ok(UpdateOutcome::Applied(updated))
            }
        }
    }

    async fn list_prs_by_reviewer(&self, reviewer: UserId) -> Result<Vec<PullRequest>, StoreError> {
        let prs = self.prs.read().await;
        let mut matching: Vec<PullRequest> = prs
            .values()
            .filter(|pr| pr.has_reviewer(reviewer))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrStatus;
    use chrono::Utc;

    fn user(id: i64, team: &str, active: bool) -> User {
        User {
            id: UserId(id),
            username: format!("user{}", id),
            team_name: team.to_string(),
            is_active: active,
        }
    }

    fn open_pr(id: &str, author: i64, reviewers: &[i64]) -> PullRequest {
        PullRequest {
            id: PrId::from(id),
            name: format!("{} change", id),
            author_id: UserId(author),
            status: PrStatus::Open,
            assigned_reviewers: reviewers.iter().copied().map(UserId).collect(),
            created_at: Utc::now(),
            merged_at: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_find_user_missing() {
        let store = MemoryStore::new();
        assert!(store.find_user(UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = MemoryStore::new();
        store.upsert_user(user(1, "infra", true)).await.unwrap();

        let mut moved = user(1, "platform", false);
        moved.username = "renamed".to_string();
        store.upsert_user(moved.clone()).await.unwrap();

        let found = store.find_user(UserId(1)).await.unwrap().unwrap();
        assert_eq!(found, moved);
    }

    #[tokio::test]
    async fn test_list_users_by_team_is_ordered_and_filtered() {
        let store = MemoryStore::new();
        store.upsert_user(user(3, "infra", true)).await.unwrap();
        store.upsert_user(user(1, "infra", false)).await.unwrap();
        store.upsert_user(user(2, "platform", true)).await.unwrap();

        let infra = store.list_users_by_team("infra").await.unwrap();
        let ids: Vec<i64> = infra.iter().map(|u| u.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_create_team_reports_duplicates() {
        let store = MemoryStore::new();
        assert_eq!(
            store.create_team("infra").await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.create_team("infra").await.unwrap(),
            InsertOutcome::DuplicateId
        );
        assert!(store.find_team("infra").await.unwrap().is_some());
        assert!(store.find_team("platform").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_pr_reports_duplicates() {
        let store = MemoryStore::new();
        assert_eq!(
            store.create_pr(open_pr("pr-1", 1, &[2])).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.create_pr(open_pr("pr-1", 9, &[])).await.unwrap(),
            InsertOutcome::DuplicateId
        );
        // the original record survives the rejected insert
        let stored = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        assert_eq!(stored.author_id, UserId(1));
    }

    #[tokio::test]
    async fn test_update_applies_and_bumps_version() {
        let store = MemoryStore::new();
        store.create_pr(open_pr("pr-1", 1, &[2])).await.unwrap();

        let mut pr = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        pr.assigned_reviewers = vec![UserId(3)];
        let outcome = store.update_pr(pr).await.unwrap();

        match outcome {
            UpdateOutcome::Applied(updated) => {
                assert_eq!(updated.version, 1);
                assert_eq!(updated.assigned_reviewers, vec![UserId(3)]);
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_without_writing() {
        let store = MemoryStore::new();
        store.create_pr(open_pr("pr-1", 1, &[2])).await.unwrap();

        let stale = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();

        // Another writer wins the race first.
        let mut winner = stale.clone();
        winner.assigned_reviewers = vec![UserId(3)];
        assert!(matches!(
            store.update_pr(winner).await.unwrap(),
            UpdateOutcome::Applied(_)
        ));

        let mut loser = stale;
        loser.assigned_reviewers = vec![UserId(4)];
        assert_eq!(
            store.update_pr(loser).await.unwrap(),
            UpdateOutcome::Conflict
        );

        let stored = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        assert_eq!(stored.assigned_reviewers, vec![UserId(3)]);
    }

    #[tokio::test]
    async fn test_update_missing_pr() {
        let store = MemoryStore::new();
        assert_eq!(
            store.update_pr(open_pr("pr-404", 1, &[])).await.unwrap(),
            UpdateOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_list_prs_by_reviewer() {
        let store = MemoryStore::new();
        store.create_pr(open_pr("pr-1", 1, &[2, 3])).await.unwrap();
        store.create_pr(open_pr("pr-2", 4, &[3])).await.unwrap();
        store.create_pr(open_pr("pr-3", 2, &[5])).await.unwrap();

        let for_three = store.list_prs_by_reviewer(UserId(3)).await.unwrap();
        let ids: Vec<&str> = for_three.iter().map(|pr| pr.id.0.as_str()).collect();
        assert_eq!(ids, vec!["pr-1", "pr-2"]);

        // authorship alone does not put a PR in the reviewer listing
        assert!(store.list_prs_by_reviewer(UserId(1)).await.unwrap().is_empty());
    }
}
