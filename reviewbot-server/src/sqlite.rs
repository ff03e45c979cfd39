//! SQLite implementation of the store traits.
//!
//! Provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and
//! add a migration in `run_migrations()`. Migrations run sequentially from
//! the current version to the target version.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use reviewbot_core::{
    InsertOutcome, PrId, PrStatus, PrStore, PullRequest, StoreError, Team, TeamStore,
    UpdateOutcome, User, UserId, UserStore,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed store for users, teams, and pull requests.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs
    /// any pending migrations if the database has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        // Verify WAL mode was actually enabled - SQLite can silently keep
        // DELETE mode on filesystems without shared-memory support. For
        // in-memory databases SQLite reports "memory", which is fine since
        // they are ephemeral by design.
        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        // Current version, 0 if the table is empty (fresh database)
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS teams (
                    name TEXT PRIMARY KEY
                );

                CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY,
                    username TEXT NOT NULL,
                    team_name TEXT NOT NULL,
                    is_active INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_users_team ON users(team_name);

                CREATE TABLE IF NOT EXISTS pull_requests (
                    pull_request_id TEXT PRIMARY KEY,
                    pull_request_name TEXT NOT NULL,
                    author_id INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    assigned_reviewers TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    merged_at TEXT,
                    version INTEGER NOT NULL DEFAULT 0
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        Ok(())
    }
}

// =============================================================================
// Conversion helpers
// =============================================================================

/// Convert a record version (u64) to i64 for SQLite storage.
fn version_to_i64(version: u64, operation: &'static str) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| {
        StoreError::storage(
            operation,
            format!("version {} exceeds maximum storable value", version),
        )
    })
}

/// Convert an i64 from SQLite back to a record version.
fn i64_to_version(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::corruption(format!("negative version {} in database", value)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::corruption(format!("timestamp {:?}", s)))
}

/// Raw row shape of the `pull_requests` table.
type PrRow = (
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<String>,
    i64,
);

fn pr_from_row(row: PrRow) -> Result<PullRequest, StoreError> {
    let (id, name, author_id, status, reviewers_json, created_at, merged_at, version) = row;

    let status = PrStatus::parse(&status)
        .ok_or_else(|| StoreError::corruption(format!("unknown status {:?}", status)))?;
    let assigned_reviewers: Vec<UserId> = serde_json::from_str(&reviewers_json)
        .map_err(|_| StoreError::corruption("assigned reviewers JSON"))?;

    Ok(PullRequest {
        id: PrId::from(id),
        name,
        author_id: UserId(author_id),
        status,
        assigned_reviewers,
        created_at: parse_timestamp(&created_at)?,
        merged_at: merged_at.as_deref().map(parse_timestamp).transpose()?,
        version: i64_to_version(version)?,
    })
}

fn reviewers_to_json(
    reviewers: &[UserId],
    operation: &'static str,
) -> Result<String, StoreError> {
    serde_json::to_string(reviewers).map_err(|e| StoreError::storage(operation, e.to_string()))
}

/// True when an insert failed on a primary key collision.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// =============================================================================
// Store trait implementations
// =============================================================================

#[async_trait]
impl UserStore for SqliteStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let result: Option<(i64, String, String, bool)> = conn
                .query_row(
                    "SELECT user_id, username, team_name, is_active
                     FROM users WHERE user_id = ?1",
                    params![id.0],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(|e| StoreError::storage("find_user", e.to_string()))?;

            Ok(result.map(|(id, username, team_name, is_active)| User {
                id: UserId(id),
                username,
                team_name,
                is_active,
            }))
        })
        .await
        .map_err(|e| StoreError::storage("find_user", e.to_string()))?
    }

    async fn list_users_by_team(&self, team_name: &str) -> Result<Vec<User>, StoreError> {
        let conn = self.conn.clone();
        let team_name = team_name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut stmt = conn
                .prepare(
                    "SELECT user_id, username, team_name, is_active
                     FROM users WHERE team_name = ?1 ORDER BY user_id",
                )
                .map_err(|e| StoreError::storage("list_users_by_team", e.to_string()))?;

            let rows = stmt
                .query_map(params![team_name], |row| {
                    Ok(User {
                        id: UserId(row.get(0)?),
                        username: row.get(1)?,
                        team_name: row.get(2)?,
                        is_active: row.get(3)?,
                    })
                })
                .map_err(|e| StoreError::storage("list_users_by_team", e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::storage("list_users_by_team", e.to_string()))
        })
        .await
        .map_err(|e| StoreError::storage("list_users_by_team", e.to_string()))?
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            conn.execute(
                "INSERT INTO users (user_id, username, team_name, is_active)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     username = excluded.username,
                     team_name = excluded.team_name,
                     is_active = excluded.is_active",
                params![user.id.0, user.username, user.team_name, user.is_active],
            )
            .map_err(|e| StoreError::storage("upsert_user", e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| StoreError::storage("upsert_user", e.to_string()))?
    }
}

#[async_trait]
impl TeamStore for SqliteStore {
    async fn find_team(&self, name: &str) -> Result<Option<Team>, StoreError> {
        let conn = self.conn.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM teams WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("find_team", e.to_string()))?;

            Ok(found.map(|name| Team {
                name,
                members: Vec::new(),
            }))
        })
        .await
        .map_err(|e| StoreError::storage("find_team", e.to_string()))?
    }

    async fn create_team(&self, name: &str) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            match conn.execute("INSERT INTO teams (name) VALUES (?1)", params![name]) {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(e) if is_constraint_violation(&e) => Ok(InsertOutcome::DuplicateId),
                Err(e) => Err(StoreError::storage("create_team", e.to_string())),
            }
        })
        .await
        .map_err(|e| StoreError::storage("create_team", e.to_string()))?
    }
}

#[async_trait]
impl PrStore for SqliteStore {
    async fn find_pr(&self, id: &PrId) -> Result<Option<PullRequest>, StoreError> {
        let conn = self.conn.clone();
        let id = id.0.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let row: Option<PrRow> = conn
                .query_row(
                    "SELECT pull_request_id, pull_request_name, author_id, status,
                            assigned_reviewers, created_at, merged_at, version
                     FROM pull_requests WHERE pull_request_id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| StoreError::storage("find_pr", e.to_string()))?;

            row.map(pr_from_row).transpose()
        })
        .await
        .map_err(|e| StoreError::storage("find_pr", e.to_string()))?
    }

    async fn create_pr(&self, pr: PullRequest) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn.clone();
        let reviewers_json = reviewers_to_json(&pr.assigned_reviewers, "create_pr")?;
        let version = version_to_i64(pr.version, "create_pr")?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let result = conn.execute(
                "INSERT INTO pull_requests (pull_request_id, pull_request_name, author_id,
                                            status, assigned_reviewers, created_at,
                                            merged_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    pr.id.0,
                    pr.name,
                    pr.author_id.0,
                    pr.status.as_str(),
                    reviewers_json,
                    pr.created_at.to_rfc3339(),
                    pr.merged_at.map(|t| t.to_rfc3339()),
                    version
                ],
            );

            match result {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(e) if is_constraint_violation(&e) => Ok(InsertOutcome::DuplicateId),
                Err(e) => Err(StoreError::storage("create_pr", e.to_string())),
            }
        })
        .await
        .map_err(|e| StoreError::storage("create_pr", e.to_string()))?
    }

    async fn update_pr(&self, pr: PullRequest) -> Result<UpdateOutcome, StoreError> {
        let conn = self.conn.clone();
        let reviewers_json = reviewers_to_json(&pr.assigned_reviewers, "update_pr")?;
        let expected_version = version_to_i64(pr.version, "update_pr")?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let changed = conn
                .execute(
                    "UPDATE pull_requests
                     SET status = ?1, assigned_reviewers = ?2, merged_at = ?3,
                         version = version + 1
                     WHERE pull_request_id = ?4 AND version = ?5",
                    params![
                        pr.status.as_str(),
                        reviewers_json,
                        pr.merged_at.map(|t| t.to_rfc3339()),
                        pr.id.0,
                        expected_version
                    ],
                )
                .map_err(|e| StoreError::storage("update_pr", e.to_string()))?;

            if changed == 1 {
                let mut updated = pr;
                updated.version += 1;
                return Ok(UpdateOutcome::Applied(updated));
            }

            // No row matched: either the id is absent or the version is stale.
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM pull_requests WHERE pull_request_id = ?1",
                    params![pr.id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("update_pr", e.to_string()))?;

            if exists.is_some() {
                Ok(UpdateOutcome::Conflict)
            } else {
                Ok(UpdateOutcome::Missing)
            }
        })
        .await
        .map_err(|e| StoreError::storage("update_pr", e.to_string()))?
    }

    async fn list_prs_by_reviewer(&self, reviewer: UserId) -> Result<Vec<PullRequest>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut stmt = conn
                .prepare(
                    "SELECT pull_request_id, pull_request_name, author_id, status,
                            assigned_reviewers, created_at, merged_at, version
                     FROM pull_requests ORDER BY pull_request_id",
                )
                .map_err(|e| StoreError::storage("list_prs_by_reviewer", e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })
                .map_err(|e| StoreError::storage("list_prs_by_reviewer", e.to_string()))?;

            // Reviewer lists live in a JSON column, so filtering happens here
            // rather than in SQL.
            let mut matching = Vec::new();
            for row in rows {
                let row: PrRow =
                    row.map_err(|e| StoreError::storage("list_prs_by_reviewer", e.to_string()))?;
                let pr = pr_from_row(row)?;
                if pr.has_reviewer(reviewer) {
                    matching.push(pr);
                }
            }
            Ok(matching)
        })
        .await
        .map_err(|e| StoreError::storage("list_prs_by_reviewer", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn test_user_round_trip() {
        let store = SqliteStore::new_in_memory().unwrap();

        store.upsert_user(user(1, "infra", true)).await.unwrap();
        let found = store.find_user(UserId(1)).await.unwrap().unwrap();
        assert_eq!(found.username, "user1");
        assert!(found.is_active);

        assert!(store.find_user(UserId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_user_replaces_existing() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.upsert_user(user(1, "infra", true)).await.unwrap();

        let mut moved = user(1, "platform", false);
        moved.username = "renamed".to_string();
        store.upsert_user(moved).await.unwrap();

        let found = store.find_user(UserId(1)).await.unwrap().unwrap();
        assert_eq!(found.team_name, "platform");
        assert_eq!(found.username, "renamed");
        assert!(!found.is_active);
    }

    #[tokio::test]
    async fn test_list_users_by_team_orders_by_id() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.upsert_user(user(3, "infra", true)).await.unwrap();
        store.upsert_user(user(1, "infra", false)).await.unwrap();
        store.upsert_user(user(2, "platform", true)).await.unwrap();

        let infra = store.list_users_by_team("infra").await.unwrap();
        let ids: Vec<i64> = infra.iter().map(|u| u.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_create_team_reports_duplicate() {
        let store = SqliteStore::new_in_memory().unwrap();

        assert_eq!(
            store.create_team("infra").await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.create_team("infra").await.unwrap(),
            InsertOutcome::DuplicateId
        );
        assert!(store.find_team("infra").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pr_round_trip_preserves_fields() {
        let store = SqliteStore::new_in_memory().unwrap();

        let mut pr = open_pr("pr-1", 1, &[2, 3]);
        pr.status = PrStatus::Merged;
        pr.merged_at = Some(Utc::now());
        store.create_pr(pr.clone()).await.unwrap();

        let found = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        assert_eq!(found.assigned_reviewers, vec![UserId(2), UserId(3)]);
        assert_eq!(found.status, PrStatus::Merged);
        assert_eq!(found.merged_at, pr.merged_at);
        assert_eq!(found.created_at, pr.created_at);
        assert_eq!(found.version, 0);
    }

    #[tokio::test]
    async fn test_create_pr_reports_duplicate() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.create_pr(open_pr("pr-1", 1, &[])).await.unwrap();

        assert_eq!(
            store.create_pr(open_pr("pr-1", 2, &[])).await.unwrap(),
            InsertOutcome::DuplicateId
        );

        // the original record survives the rejected insert
        let stored = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        assert_eq!(stored.author_id, UserId(1));
    }

    #[tokio::test]
    async fn test_update_pr_applies_with_matching_version() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.create_pr(open_pr("pr-1", 1, &[2])).await.unwrap();

        let mut pr = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        pr.assigned_reviewers = vec![UserId(3)];

        match store.update_pr(pr).await.unwrap() {
            UpdateOutcome::Applied(updated) => assert_eq!(updated.version, 1),
            other => panic!("expected Applied, got {:?}", other),
        }

        let stored = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();
        assert_eq!(stored.assigned_reviewers, vec![UserId(3)]);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_update_pr_stale_version_conflicts() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.create_pr(open_pr("pr-1", 1, &[2])).await.unwrap();

        let stale = store.find_pr(&PrId::from("pr-1")).await.unwrap().unwrap();

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
    async fn test_update_pr_missing_record() {
        let store = SqliteStore::new_in_memory().unwrap();

        assert_eq!(
            store.update_pr(open_pr("pr-404", 1, &[])).await.unwrap(),
            UpdateOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_list_prs_by_reviewer_filters_on_membership() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.create_pr(open_pr("pr-1", 1, &[2, 3])).await.unwrap();
        store.create_pr(open_pr("pr-2", 4, &[3])).await.unwrap();
        store.create_pr(open_pr("pr-3", 2, &[5])).await.unwrap();

        let for_three = store.list_prs_by_reviewer(UserId(3)).await.unwrap();
        let ids: Vec<&str> = for_three.iter().map(|pr| pr.id.0.as_str()).collect();
        assert_eq!(ids, vec!["pr-1", "pr-2"]);

        assert!(store
            .list_prs_by_reviewer(UserId(1))
            .await
            .unwrap()
            .is_empty());
    }
}
