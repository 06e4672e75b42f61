//! Durable scheduling state
//!
//! Trait-based store abstraction so the execution loop never touches SQLite
//! directly. Production uses [`SqliteStateStore`] (single connection behind a
//! `Mutex`, WAL mode); tests can use [`MemoryStateStore`] or an in-memory
//! SQLite database.
//!
//! The one operation with real atomicity requirements is [`StateStore::record_post`]:
//! the post row, the slot outcome and the quota increment commit in a single
//! transaction so a crash can never count a post that was not recorded, or
//! record a post without counting it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};

use crate::plan::DailyPlan;
use crate::quota::QuotaRecord;
use crate::scheduler::outcome::{ExecutionAttempt, SlotOutcome};

/// Persistence boundary of the scheduler
///
/// All methods are synchronous and complete before returning, so async
/// callers never hold the connection lock across an await point.
pub trait StateStore: Send + Sync {
    /// Load the persisted plan for a date, if one was saved
    fn load_plan(&self, date: NaiveDate) -> Result<Option<DailyPlan>>;

    /// Persist a freshly generated plan
    fn save_plan(&self, plan: &DailyPlan) -> Result<()>;

    /// Load the quota record for a date
    fn load_quota(&self, date: NaiveDate) -> Result<Option<QuotaRecord>>;

    /// Persist a quota record (used when opening a fresh day)
    fn save_quota(&self, quota: &QuotaRecord) -> Result<()>;

    /// All terminal outcomes recorded for a date, keyed by slot index
    fn slot_outcomes(&self, date: NaiveDate) -> Result<BTreeMap<usize, SlotOutcome>>;

    /// Record a non-publishing terminal outcome (skip or fatal failure)
    fn record_outcome(&self, date: NaiveDate, attempt: &ExecutionAttempt) -> Result<()>;

    /// Record a successful publish atomically
    ///
    /// Writes the slot outcome, the post row and the quota increment in one
    /// transaction and returns the updated quota record.
    fn record_post(
        &self,
        date: NaiveDate,
        attempt: &ExecutionAttempt,
        content: &str,
        content_hash: &str,
    ) -> Result<QuotaRecord>;

    /// Check whether identical content was already published
    fn is_content_duplicate(&self, content_hash: &str) -> Result<bool>;

    /// Number of post rows for a date
    fn posts_on(&self, date: NaiveDate) -> Result<usize>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite-backed [`StateStore`]
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // WAL mode for crash tolerance and concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite state store initialized");
        Ok(store)
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS plans (
                    date TEXT PRIMARY KEY,
                    plan_json TEXT NOT NULL,
                    saved_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS quotas (
                    date TEXT PRIMARY KEY,
                    posts_made INTEGER NOT NULL DEFAULT 0,
                    last_post_at TEXT
                );

                CREATE TABLE IF NOT EXISTS slot_outcomes (
                    date TEXT NOT NULL,
                    slot_index INTEGER NOT NULL,
                    attempt_id TEXT NOT NULL,
                    planned_at TEXT NOT NULL,
                    actual_at TEXT NOT NULL,
                    outcome_json TEXT NOT NULL,
                    PRIMARY KEY (date, slot_index)
                );

                CREATE TABLE IF NOT EXISTS posts (
                    post_id TEXT PRIMARY KEY,
                    date TEXT NOT NULL,
                    slot_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    posted_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_posts_date ON posts(date);
                CREATE INDEX IF NOT EXISTS idx_posts_hash ON posts(content_hash);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn quota_row(conn: &Connection, date: NaiveDate) -> Result<Option<QuotaRecord>> {
        let row = conn
            .query_row(
                "SELECT posts_made, last_post_at FROM quotas WHERE date = ?1",
                params![date.to_string()],
                |row| {
                    let posts_made: u32 = row.get(0)?;
                    let last_post_at: Option<String> = row.get(1)?;
                    Ok((posts_made, last_post_at))
                },
            )
            .optional()
            .context("Failed to query quota")?;

        let Some((posts_made, last_post_at)) = row else {
            return Ok(None);
        };

        let last_post_at = last_post_at
            .map(|s| DateTime::parse_from_rfc3339(&s))
            .transpose()
            .context("Invalid last_post_at timestamp in quota row")?;

        Ok(Some(QuotaRecord {
            date,
            posts_made,
            last_post_at,
        }))
    }

    fn insert_outcome(
        conn: &Connection,
        date: NaiveDate,
        attempt: &ExecutionAttempt,
    ) -> Result<()> {
        let outcome_json =
            serde_json::to_string(&attempt.outcome).context("Failed to serialize outcome")?;
        conn.execute(
            "INSERT OR REPLACE INTO slot_outcomes
                 (date, slot_index, attempt_id, planned_at, actual_at, outcome_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                date.to_string(),
                attempt.slot_index as i64,
                attempt.attempt_id.to_string(),
                attempt.planned_at.to_rfc3339(),
                attempt.actual_at.to_rfc3339(),
                outcome_json,
            ],
        )
        .context("Failed to insert slot outcome")?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn load_plan(&self, date: NaiveDate) -> Result<Option<DailyPlan>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT plan_json FROM plans WHERE date = ?1",
                params![date.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query plan")?;

        json.map(|j| DailyPlan::from_json(&j).context("Corrupt plan row"))
            .transpose()
    }

    fn save_plan(&self, plan: &DailyPlan) -> Result<()> {
        let json = plan.to_json().context("Failed to serialize plan")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO plans (date, plan_json, saved_at) VALUES (?1, ?2, ?3)",
            params![plan.date.to_string(), json, chrono::Utc::now().to_rfc3339()],
        )
        .context("Failed to save plan")?;
        Ok(())
    }

    fn load_quota(&self, date: NaiveDate) -> Result<Option<QuotaRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::quota_row(&conn, date)
    }

    fn save_quota(&self, quota: &QuotaRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO quotas (date, posts_made, last_post_at) VALUES (?1, ?2, ?3)",
            params![
                quota.date.to_string(),
                quota.posts_made,
                quota.last_post_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to save quota")?;
        Ok(())
    }

    fn slot_outcomes(&self, date: NaiveDate) -> Result<BTreeMap<usize, SlotOutcome>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT slot_index, outcome_json FROM slot_outcomes WHERE date = ?1")
            .context("Failed to prepare outcome query")?;

        let rows = stmt
            .query_map(params![date.to_string()], |row| {
                let index: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                Ok((index, json))
            })
            .context("Failed to query outcomes")?;

        let mut outcomes = BTreeMap::new();
        for row in rows {
            let (index, json) = row?;
            let outcome: SlotOutcome =
                serde_json::from_str(&json).context("Corrupt outcome row")?;
            outcomes.insert(index as usize, outcome);
        }
        Ok(outcomes)
    }

    fn record_outcome(&self, date: NaiveDate, attempt: &ExecutionAttempt) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::insert_outcome(&conn, date, attempt)
    }

    fn record_post(
        &self,
        date: NaiveDate,
        attempt: &ExecutionAttempt,
        content: &str,
        content_hash: &str,
    ) -> Result<QuotaRecord> {
        let post_id = attempt
            .outcome
            .post_id()
            .context("record_post called with a non-success outcome")?
            .to_string();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to open transaction")?;

        Self::insert_outcome(&tx, date, attempt)?;

        tx.execute(
            "INSERT INTO posts (post_id, date, slot_index, content, content_hash, posted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                post_id,
                date.to_string(),
                attempt.slot_index as i64,
                content,
                content_hash,
                attempt.actual_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert post")?;

        tx.execute(
            "INSERT INTO quotas (date, posts_made, last_post_at) VALUES (?1, 1, ?2)
             ON CONFLICT(date) DO UPDATE SET
                 posts_made = posts_made + 1,
                 last_post_at = excluded.last_post_at",
            params![date.to_string(), attempt.actual_at.to_rfc3339()],
        )
        .context("Failed to increment quota")?;

        let quota =
            Self::quota_row(&tx, date)?.context("Quota row missing after increment")?;

        tx.commit().context("Failed to commit post transaction")?;
        Ok(quota)
    }

    fn is_content_duplicate(&self, content_hash: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM posts WHERE content_hash = ?1)",
                params![content_hash],
                |row| row.get(0),
            )
            .context("Failed to check content hash")?;
        Ok(exists)
    }

    fn posts_on(&self, date: NaiveDate) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM posts WHERE date = ?1",
                params![date.to_string()],
                |row| row.get(0),
            )
            .context("Failed to count posts")?;
        Ok(count as usize)
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    plans: HashMap<NaiveDate, DailyPlan>,
    quotas: HashMap<NaiveDate, QuotaRecord>,
    outcomes: HashMap<NaiveDate, BTreeMap<usize, SlotOutcome>>,
    posts: Vec<StoredPost>,
}

#[derive(Debug, Clone)]
struct StoredPost {
    date: NaiveDate,
    content_hash: String,
}

/// HashMap-backed [`StateStore`] for tests and dry runs
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load_plan(&self, date: NaiveDate) -> Result<Option<DailyPlan>> {
        Ok(self.inner.lock().unwrap().plans.get(&date).cloned())
    }

    fn save_plan(&self, plan: &DailyPlan) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .plans
            .insert(plan.date, plan.clone());
        Ok(())
    }

    fn load_quota(&self, date: NaiveDate) -> Result<Option<QuotaRecord>> {
        Ok(self.inner.lock().unwrap().quotas.get(&date).cloned())
    }

    fn save_quota(&self, quota: &QuotaRecord) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .quotas
            .insert(quota.date, quota.clone());
        Ok(())
    }

    fn slot_outcomes(&self, date: NaiveDate) -> Result<BTreeMap<usize, SlotOutcome>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .outcomes
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    fn record_outcome(&self, date: NaiveDate, attempt: &ExecutionAttempt) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .outcomes
            .entry(date)
            .or_default()
            .insert(attempt.slot_index, attempt.outcome.clone());
        Ok(())
    }

    fn record_post(
        &self,
        date: NaiveDate,
        attempt: &ExecutionAttempt,
        _content: &str,
        content_hash: &str,
    ) -> Result<QuotaRecord> {
        anyhow::ensure!(
            attempt.outcome.is_success(),
            "record_post called with a non-success outcome"
        );

        let mut inner = self.inner.lock().unwrap();
        inner
            .outcomes
            .entry(date)
            .or_default()
            .insert(attempt.slot_index, attempt.outcome.clone());
        inner.posts.push(StoredPost {
            date,
            content_hash: content_hash.to_string(),
        });

        let quota = inner.quotas.entry(date).or_insert_with(|| QuotaRecord {
            date,
            posts_made: 0,
            last_post_at: None,
        });
        quota.posts_made += 1;
        quota.last_post_at = Some(attempt.actual_at);
        Ok(quota.clone())
    }

    fn is_content_duplicate(&self, content_hash: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .posts
            .iter()
            .any(|p| p.content_hash == content_hash))
    }

    fn posts_on(&self, date: NaiveDate) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| p.date == date)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanGenerator, PlanParams};
    use crate::window::PostingWindow;
    use chrono::{FixedOffset, TimeZone};
    use uuid::Uuid;

    fn sample_plan(date: NaiveDate) -> DailyPlan {
        let window = PostingWindow::new(20, 26, 21, 25).unwrap();
        let gen = PlanGenerator::new(
            window,
            chrono_tz::Asia::Taipei,
            PlanParams {
                min_daily_posts: 3,
                max_daily_posts: 5,
                prime_bias: 0.7,
                prime_min_gap: 30,
                prime_max_gap: 60,
                other_min_gap: 90,
                other_max_gap: 180,
            },
            42,
        );
        gen.generate(date)
    }

    fn success_attempt(slot_index: usize, post_id: &str) -> ExecutionAttempt {
        let at = FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 1, 21, 0, 0)
            .unwrap();
        ExecutionAttempt {
            attempt_id: Uuid::new_v4(),
            slot_index,
            planned_at: at,
            actual_at: at,
            outcome: SlotOutcome::Success {
                post_id: post_id.to_string(),
            },
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    #[test]
    fn test_plan_roundtrip_sqlite() {
        let store = SqliteStateStore::in_memory().unwrap();
        let plan = sample_plan(date());

        assert!(store.load_plan(date()).unwrap().is_none());
        store.save_plan(&plan).unwrap();

        let loaded = store.load_plan(date()).unwrap().unwrap();
        assert_eq!(loaded.date, plan.date);
        assert_eq!(loaded.len(), plan.len());
        assert_eq!(loaded.slots, plan.slots);
    }

    #[test]
    fn test_record_post_increments_quota_atomically() {
        let store = SqliteStateStore::in_memory().unwrap();

        let quota = store
            .record_post(date(), &success_attempt(0, "p-1"), "hello", "h1")
            .unwrap();
        assert_eq!(quota.posts_made, 1);
        assert!(quota.last_post_at.is_some());

        let quota = store
            .record_post(date(), &success_attempt(1, "p-2"), "world", "h2")
            .unwrap();
        assert_eq!(quota.posts_made, 2);

        // posts, outcomes and quota agree
        assert_eq!(store.posts_on(date()).unwrap(), 2);
        let outcomes = store.slot_outcomes(date()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[&0].is_success());
        assert_eq!(store.load_quota(date()).unwrap().unwrap().posts_made, 2);
    }

    #[test]
    fn test_record_post_rejects_non_success() {
        let store = SqliteStateStore::in_memory().unwrap();
        let mut attempt = success_attempt(0, "p-1");
        attempt.outcome = SlotOutcome::SkippedQuotaExceeded;

        assert!(store.record_post(date(), &attempt, "x", "h").is_err());
        // nothing committed
        assert_eq!(store.posts_on(date()).unwrap(), 0);
        assert!(store.load_quota(date()).unwrap().is_none());
    }

    #[test]
    fn test_skip_outcomes_do_not_touch_quota() {
        let store = SqliteStateStore::in_memory().unwrap();
        let mut attempt = success_attempt(2, "unused");
        attempt.outcome = SlotOutcome::SkippedOutsideWindow;

        store.record_outcome(date(), &attempt).unwrap();

        let outcomes = store.slot_outcomes(date()).unwrap();
        assert_eq!(outcomes[&2], SlotOutcome::SkippedOutsideWindow);
        assert!(store.load_quota(date()).unwrap().is_none());
        assert_eq!(store.posts_on(date()).unwrap(), 0);
    }

    #[test]
    fn test_content_dedup() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert!(!store.is_content_duplicate("abc").unwrap());

        store
            .record_post(date(), &success_attempt(0, "p-1"), "text", "abc")
            .unwrap();
        assert!(store.is_content_duplicate("abc").unwrap());
        assert!(!store.is_content_duplicate("def").unwrap());
    }

    #[test]
    fn test_memory_store_matches_sqlite_behaviour() {
        let store = MemoryStateStore::new();
        let plan = sample_plan(date());
        store.save_plan(&plan).unwrap();
        assert_eq!(store.load_plan(date()).unwrap().unwrap().len(), plan.len());

        let quota = store
            .record_post(date(), &success_attempt(0, "p-1"), "text", "abc")
            .unwrap();
        assert_eq!(quota.posts_made, 1);
        assert!(store.is_content_duplicate("abc").unwrap());
        assert_eq!(store.posts_on(date()).unwrap(), 1);
    }
}
