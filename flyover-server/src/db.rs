//! SQLite persistence for users, locations, filters, conditions and alerts.
//!
//! `Database` is the synchronous rusqlite layer. `SqliteStore` wraps it in a
//! mutex and exposes it to the cycle orchestrator through the `RuleStore`
//! and `HistoryStore` traits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use serde_json::Value;

use flyover_core::rules::{Condition, ConditionDef, FilterDef};
use flyover_core::types::{AlertRecord, FlyoverError, Position3D, Result, UserId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT UNIQUE NOT NULL,
    topic TEXT,
    created_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS last_locations (
    user_id INTEGER PRIMARY KEY REFERENCES users(id),
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    altitude_ft REAL NOT NULL,
    updated_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS filters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    rank INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS conditions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filter_id INTEGER NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    kind TEXT NOT NULL,
    params TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    hex TEXT NOT NULL,
    filter_name TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_filters_user ON filters(user_id, rank);
CREATE INDEX IF NOT EXISTS idx_conditions_filter ON conditions(filter_id, position);
CREATE INDEX IF NOT EXISTS idx_alerts_pair ON alerts(user_id, hex, timestamp);
CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);
"#;

/// A user as seen by the polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    /// Delivery topic; `None` means the user gets no alerts.
    pub topic: Option<String>,
    pub location: Position3D,
}

#[derive(Debug)]
pub struct DbStats {
    pub users: i64,
    pub located_users: i64,
    pub filters: i64,
    pub conditions: i64,
    pub alerts: i64,
}

/// SQLite database for flyover users, rules and alert history.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Database { conn })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    // -----------------------------------------------------------------------
    // Users and locations
    // -----------------------------------------------------------------------

    pub fn add_user(&mut self, email: &str, topic: Option<&str>) -> SqlResult<UserId> {
        self.conn.execute(
            "INSERT INTO users (email, topic, created_at) VALUES (?1, ?2, ?3)",
            params![email, topic, crate::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn user_id_by_email(&self, email: &str) -> SqlResult<Option<UserId>> {
        self.conn
            .query_row("SELECT id FROM users WHERE email = ?1", params![email], |r| {
                r.get(0)
            })
            .optional()
    }

    /// All users as (id, email, topic), oldest first.
    pub fn list_users(&self) -> SqlResult<Vec<(UserId, String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, topic FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        rows.collect()
    }

    /// Insert or replace the user's last reported location.
    pub fn update_location(
        &mut self,
        user_id: UserId,
        location: &Position3D,
        timestamp: f64,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO last_locations (user_id, lat, lon, altitude_ft, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 lat = excluded.lat,
                 lon = excluded.lon,
                 altitude_ft = excluded.altitude_ft,
                 updated_at = excluded.updated_at",
            params![
                user_id,
                location.lat,
                location.lon,
                location.altitude_ft,
                timestamp
            ],
        )?;
        Ok(())
    }

    /// Users that have reported a location at least once.
    pub fn located_users(&self) -> SqlResult<Vec<UserProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.email, u.topic, l.lat, l.lon, l.altitude_ft
             FROM users u JOIN last_locations l ON l.user_id = u.id
             ORDER BY u.id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(UserProfile {
                id: r.get(0)?,
                email: r.get(1)?,
                topic: r.get(2)?,
                location: Position3D::new(r.get(3)?, r.get(4)?, r.get(5)?),
            })
        })?;
        rows.collect()
    }

    // -----------------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------------

    /// Add a filter with typed conditions. Returns filter id.
    pub fn add_filter(
        &mut self,
        user_id: UserId,
        name: &str,
        rank: i32,
        conditions: &[Condition],
    ) -> SqlResult<i64> {
        let defs: Vec<ConditionDef> = conditions.iter().copied().map(ConditionDef::from).collect();
        self.add_filter_defs(user_id, name, rank, &defs)
    }

    /// Add a filter from stored-form conditions, without validating them.
    pub fn add_filter_defs(
        &mut self,
        user_id: UserId,
        name: &str,
        rank: i32,
        conditions: &[ConditionDef],
    ) -> SqlResult<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO filters (user_id, name, rank) VALUES (?1, ?2, ?3)",
            params![user_id, name, rank],
        )?;
        let filter_id = tx.last_insert_rowid();
        for (position, c) in conditions.iter().enumerate() {
            tx.execute(
                "INSERT INTO conditions (filter_id, position, kind, params) VALUES (?1, ?2, ?3, ?4)",
                params![filter_id, position as i64, c.kind, c.params.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(filter_id)
    }

    /// A user's filters ordered by rank, then insertion order.
    ///
    /// Condition parameters that are not valid JSON come back as `null` and
    /// are reported when the filter is compiled.
    pub fn filters_for_user(&self, user_id: UserId) -> SqlResult<Vec<FilterDef>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, rank FROM filters WHERE user_id = ?1 ORDER BY rank, id",
        )?;
        let mut filters: Vec<FilterDef> = stmt
            .query_map(params![user_id], |r| {
                Ok(FilterDef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    rank: r.get(2)?,
                    conditions: Vec::new(),
                })
            })?
            .collect::<SqlResult<_>>()?;

        let mut cond_stmt = self.conn.prepare(
            "SELECT kind, params FROM conditions WHERE filter_id = ?1 ORDER BY position, id",
        )?;
        for filter in &mut filters {
            filter.conditions = cond_stmt
                .query_map(params![filter.id], |r| {
                    let params: String = r.get(1)?;
                    Ok(ConditionDef {
                        kind: r.get(0)?,
                        params: serde_json::from_str(&params).unwrap_or(Value::Null),
                    })
                })?
                .collect::<SqlResult<_>>()?;
        }
        Ok(filters)
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    pub fn append_alert(&mut self, record: &AlertRecord) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO alerts (user_id, hex, filter_name, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.user_id,
                record.hex,
                record.filter_name,
                record.message,
                record.timestamp
            ],
        )?;
        Ok(())
    }

    /// Alerts for one (user, aircraft) pair in `[since, until]`, oldest first.
    pub fn alerts_between(
        &self,
        user_id: UserId,
        hex: &str,
        since: f64,
        until: f64,
    ) -> SqlResult<Vec<AlertRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, hex, timestamp, filter_name, message FROM alerts
             WHERE user_id = ?1 AND hex = ?2 COLLATE NOCASE
               AND timestamp >= ?3 AND timestamp <= ?4
             ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![user_id, hex, since, until], row_to_alert)?;
        rows.collect()
    }

    /// All alerts at or after `since`, oldest first.
    pub fn alerts_since(&self, since: f64) -> SqlResult<Vec<AlertRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, hex, timestamp, filter_name, message FROM alerts
             WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![since], row_to_alert)?;
        rows.collect()
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    fn count(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            users: self.count("users"),
            located_users: self.count("last_locations"),
            filters: self.count("filters"),
            conditions: self.count("conditions"),
            alerts: self.count("alerts"),
        }
    }
}

fn row_to_alert(r: &rusqlite::Row<'_>) -> SqlResult<AlertRecord> {
    Ok(AlertRecord {
        user_id: r.get(0)?,
        hex: r.get(1)?,
        timestamp: r.get(2)?,
        filter_name: r.get(3)?,
        message: r.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Source of users and their alert rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Users with a known location.
    async fn located_users(&self) -> Result<Vec<UserProfile>>;
    async fn filters_for(&self, user_id: UserId) -> Result<Vec<FilterDef>>;
}

/// Append-only alert history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &AlertRecord) -> Result<()>;
    async fn alerts_between(
        &self,
        user_id: UserId,
        hex: &str,
        since: f64,
        until: f64,
    ) -> Result<Vec<AlertRecord>>;
    async fn alerts_since(&self, since: f64) -> Result<Vec<AlertRecord>>;
}

fn store_err(e: rusqlite::Error) -> FlyoverError {
    FlyoverError::Store(e.to_string())
}

/// Thread-safe handle over a single SQLite connection.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        SqliteStore { db: Mutex::new(db) }
    }

    /// Lock the underlying database for direct use.
    pub fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| FlyoverError::Store("database lock poisoned".into()))
    }

    /// Record a location report for the user with this email.
    ///
    /// Returns false when no such user exists.
    pub fn report_location(&self, email: &str, location: &Position3D, timestamp: f64) -> Result<bool> {
        let mut db = self.lock()?;
        let Some(user_id) = db.user_id_by_email(email).map_err(store_err)? else {
            return Ok(false);
        };
        db.update_location(user_id, location, timestamp)
            .map_err(store_err)?;
        Ok(true)
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn located_users(&self) -> Result<Vec<UserProfile>> {
        self.lock()?.located_users().map_err(store_err)
    }

    async fn filters_for(&self, user_id: UserId) -> Result<Vec<FilterDef>> {
        self.lock()?.filters_for_user(user_id).map_err(store_err)
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append(&self, record: &AlertRecord) -> Result<()> {
        self.lock()?.append_alert(record).map_err(store_err)
    }

    async fn alerts_between(
        &self,
        user_id: UserId,
        hex: &str,
        since: f64,
        until: f64,
    ) -> Result<Vec<AlertRecord>> {
        self.lock()?
            .alerts_between(user_id, hex, since, until)
            .map_err(store_err)
    }

    async fn alerts_since(&self, since: f64) -> Result<Vec<AlertRecord>> {
        self.lock()?.alerts_since(since).map_err(store_err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
