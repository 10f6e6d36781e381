//! Database connection pool, migrations, health check and transactions.
//!
//! Every operation on the refresh state runs inside [`Db::transaction`] and
//! receives a [`StateTx`] handle. The handle carries the engine dialect and the
//! processing options, so the operation modules (`discovery`, `claim`,
//! `commit`, `lookup`) only ever talk to the store through it.

pub mod claim;
pub mod commit;
pub mod dialect;
pub mod discovery;
pub mod lookup;
pub mod options;

use crate::config::Config;
use crate::error::{Error, Result};
use dialect::{Dialect, dialect_for_url};
use futures_util::future::BoxFuture;
use options::{ProcessingOptions, random_refresh_interval};
use sqlx::any::AnyPoolOptions;
use sqlx::{Any, AnyConnection, AnyPool};
use std::sync::Arc;
use std::time::Instant;

/// Database handle. Owns the connection pool and the dialect chosen for it.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct Db {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
    options: ProcessingOptions,
}

impl Db {
    /// Connect to the store named by `url` and create a connection pool.
    pub async fn connect(url: &str, options: ProcessingOptions) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = dialect_for_url(url)?;

        let mut pool_options = AnyPoolOptions::new();
        if dialect.name() == dialect::Sqlite.name() {
            // SQLite has a single writer; in-memory databases also vanish
            // with their connection, so keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(options.max_connections);
        }
        let pool = pool_options.connect(url).await?;

        tracing::debug!(dialect = dialect.name(), ?options, "connected");
        Ok(Self {
            pool,
            dialect,
            options,
        })
    }

    /// Connect using loaded configuration.
    pub async fn connect_with_config(config: &Config) -> Result<Self> {
        use secrecy::ExposeSecret;

        let processing = &config.processing;
        let options = ProcessingOptions::default()
            .insert_batch_size(processing.insert_batch_size)
            .max_connections(processing.max_connections)
            .refresh_interval(random_refresh_interval(
                processing.refresh_interval_min_secs,
                processing.refresh_interval_max_secs,
            ));
        Self::connect(config.database_url.expose_secret(), options).await
    }

    /// Run all pending migrations for this engine.
    pub async fn migrate(&self) -> Result<()> {
        self.dialect.migrator().run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    /// Run `work` inside one transaction.
    ///
    /// Commits and returns `Some` when `work` succeeds. When `work` returns
    /// [`Error::Rollback`] the transaction is rolled back and `None` is
    /// returned. Any other error rolls back and is propagated.
    ///
    /// ```ignore
    /// let claimed = db
    ///     .transaction(|tx| Box::pin(async move { tx.claim_batch(10).await }))
    ///     .await?;
    /// ```
    pub async fn transaction<F, T>(&self, work: F) -> Result<Option<T>>
    where
        F: for<'c> FnOnce(&'c mut StateTx) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let start = Instant::now();
        let mut tx = StateTx {
            inner: self.pool.begin().await?,
            dialect: Arc::clone(&self.dialect),
            options: self.options.clone(),
        };

        let outcome = work(&mut tx).await;
        let result = match outcome {
            Ok(value) => {
                tx.inner.commit().await?;
                Ok(Some(value))
            }
            Err(Error::Rollback) => {
                tx.inner.rollback().await?;
                tracing::debug!("transaction rolled back on request");
                Ok(None)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.inner.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        };

        let elapsed = start.elapsed();
        if elapsed.as_millis() > 500 {
            tracing::warn!(
                duration_ms = elapsed.as_millis() as u64,
                "slow refresh-state transaction"
            );
        }
        result
    }
}

/// Opaque handle to one open transaction.
///
/// Obtained only through [`Db::transaction`]; the operation methods live in
/// the `discovery`, `claim`, `commit` and `lookup` modules.
pub struct StateTx {
    inner: sqlx::Transaction<'static, Any>,
    dialect: Arc<dyn Dialect>,
    options: ProcessingOptions,
}

impl StateTx {
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub(crate) fn conn(&mut self) -> &mut AnyConnection {
        &mut self.inner
    }

    pub(crate) fn options(&self) -> &ProcessingOptions {
        &self.options
    }
}

/// Store failures as the core sees them.
#[derive(Debug)]
pub(crate) enum StoreFailure {
    UniqueViolation,
    Other(sqlx::Error),
}

/// Sort a raw store error into the closed set the core branches on.
pub(crate) fn classify(err: sqlx::Error) -> StoreFailure {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreFailure::UniqueViolation
        }
        _ => StoreFailure::Other(err),
    }
}

/// Parse a timestamp rendered by [`Dialect::timestamp_text`].
pub(crate) fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|e| Error::InvalidData(format!("timestamp {raw:?}: {e}")))
}
