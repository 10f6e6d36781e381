//! Engine-specific SQL fragments.
//!
//! The rest of the crate writes portable SQL and asks the dialect for the few
//! pieces that differ between engines: bind placeholders, the store clock,
//! timestamp rendering and optional locking and returning clauses.

use crate::error::{Error, Result};
use sqlx::migrate::Migrator;
use std::sync::Arc;

static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");
static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");
static MYSQL_MIGRATOR: Migrator = sqlx::migrate!("./migrations/mysql");

/// SQL capabilities of one relational engine.
pub trait Dialect: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Bind placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Expression for the store's current time.
    fn now(&self) -> String;

    /// Expression for the store's current time plus `seconds`.
    fn now_plus_interval(&self, seconds: f64) -> String;

    /// Expression rendering a timestamp column as RFC 3339 UTC text.
    fn timestamp_text(&self, column: &str) -> String;

    fn supports_returning_on_delete(&self) -> bool;

    fn supports_skip_locked(&self) -> bool;

    /// Suffix that makes the `refresh_state` insert skip rows whose
    /// `entity_ref` already exists. `None` when the engine has no such clause
    /// that leaves the transaction usable; callers then catch the violation.
    fn upsert_ignore_conflict(&self) -> Option<&'static str>;

    fn migrator(&self) -> &'static Migrator;

    /// Comma-separated placeholders for `count` parameters starting at `first`.
    fn placeholders(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `VALUES` tuples for `rows` rows of `columns` parameters each.
    fn values_rows(&self, rows: usize, columns: usize) -> String {
        (0..rows)
            .map(|row| format!("({})", self.placeholders(1 + row * columns, columns)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Pick the dialect matching a connection URL.
pub fn dialect_for_url(url: &str) -> Result<Arc<dyn Dialect>> {
    let scheme = url.split(':').next().unwrap_or_default();
    match scheme {
        "postgres" | "postgresql" => Ok(Arc::new(Postgres)),
        "sqlite" => Ok(Arc::new(Sqlite)),
        "mysql" | "mariadb" => Ok(Arc::new(MySql)),
        other => Err(Error::Config(format!(
            "unsupported database scheme {other:?}"
        ))),
    }
}

/// Intervals are clamped to finite, non-negative seconds before they are
/// spliced into SQL.
pub(crate) fn clamp_seconds(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn now(&self) -> String {
        "now()".to_string()
    }

    fn now_plus_interval(&self, seconds: f64) -> String {
        format!(
            "now() + interval '{:.3} seconds'",
            clamp_seconds(seconds)
        )
    }

    fn timestamp_text(&self, column: &str) -> String {
        format!(
            "to_char({column} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.US\"Z\"')"
        )
    }

    fn supports_returning_on_delete(&self) -> bool {
        true
    }

    fn supports_skip_locked(&self) -> bool {
        true
    }

    fn upsert_ignore_conflict(&self) -> Option<&'static str> {
        // A failed INSERT aborts a Postgres transaction, so never let one fail.
        Some("ON CONFLICT (entity_ref) DO NOTHING")
    }

    fn migrator(&self) -> &'static Migrator {
        &POSTGRES_MIGRATOR
    }
}

/// Timestamps are RFC 3339 text with millisecond precision, which sorts
/// chronologically.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn now(&self) -> String {
        "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')".to_string()
    }

    fn now_plus_interval(&self, seconds: f64) -> String {
        format!(
            "strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '+{:.3} seconds')",
            clamp_seconds(seconds)
        )
    }

    fn timestamp_text(&self, column: &str) -> String {
        column.to_string()
    }

    fn supports_returning_on_delete(&self) -> bool {
        false
    }

    fn supports_skip_locked(&self) -> bool {
        false
    }

    fn upsert_ignore_conflict(&self) -> Option<&'static str> {
        None
    }

    fn migrator(&self) -> &'static Migrator {
        &SQLITE_MIGRATOR
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn now(&self) -> String {
        "UTC_TIMESTAMP(6)".to_string()
    }

    fn now_plus_interval(&self, seconds: f64) -> String {
        let micros = (clamp_seconds(seconds) * 1_000_000.0).round() as u64;
        format!("DATE_ADD(UTC_TIMESTAMP(6), INTERVAL {micros} MICROSECOND)")
    }

    fn timestamp_text(&self, column: &str) -> String {
        format!("DATE_FORMAT({column}, '%Y-%m-%dT%H:%i:%s.%fZ')")
    }

    fn supports_returning_on_delete(&self) -> bool {
        false
    }

    fn supports_skip_locked(&self) -> bool {
        true
    }

    fn upsert_ignore_conflict(&self) -> Option<&'static str> {
        // INSERT IGNORE would also swallow unrelated errors.
        None
    }

    fn migrator(&self) -> &'static Migrator {
        &MYSQL_MIGRATOR
    }
}
