//! Discovery: upsert unprocessed entities and record who discovered them.
//!
//! Each entity goes through update, then insert, then (if neither landed)
//! a location-key conflict check. No explicit locks are taken; concurrent
//! discoveries of the same reference converge because at most one insert
//! wins and the loser retries its update.

use super::{StateTx, StoreFailure, classify};
use crate::codec;
use crate::error::{Error, Result};
use crate::model::{DeferredEntity, DiscoveryOutcome, EntityId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::HashSet;

/// Outcome of upserting a single unprocessed entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Inserted,
    /// The row belongs to another location key and was left untouched.
    Conflict { existing_location_key: String },
    /// Nothing changed and no conflict was found; only possible when the row
    /// vanished between the insert and the re-check.
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_upserted(&self) -> bool {
        matches!(self, UpsertOutcome::Updated | UpsertOutcome::Inserted)
    }

    fn label(&self) -> &'static str {
        match self {
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Conflict { .. } => "conflict",
            UpsertOutcome::Unchanged => "unchanged",
        }
    }
}

impl StateTx {
    /// Upsert a discovery batch from `source_ref` and replace that source's
    /// outgoing reference edges.
    ///
    /// Edges to entities that hit a location-key conflict are kept as they
    /// were; all other edges from the source are replaced by the entities
    /// upserted in this batch.
    pub async fn add_unprocessed_entities(
        &mut self,
        source_ref: &str,
        entities: &[DeferredEntity],
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();

        for deferred in entities {
            let entity_ref = deferred.entity.entity_ref();
            let serialized = codec::serialize_entity(&deferred.entity)?;
            let hash = codec::entity_hash(&deferred.entity)?;

            let result = self
                .upsert_unprocessed(
                    &entity_ref,
                    &serialized,
                    &hash,
                    deferred.location_key.as_deref(),
                )
                .await?;

            metrics::entities_upserted().add(1, &[KeyValue::new("result", result.label())]);

            match result {
                UpsertOutcome::Updated | UpsertOutcome::Inserted => {
                    outcome.upserted.push(entity_ref);
                }
                UpsertOutcome::Conflict {
                    existing_location_key,
                } => {
                    tracing::warn!(
                        entity_ref = %entity_ref,
                        existing_location_key = %existing_location_key,
                        location_key = deferred.location_key.as_deref().unwrap_or("<none>"),
                        source_ref = %source_ref,
                        "detected conflicting entity ref already owned by another location key",
                    );
                    metrics::location_key_conflicts()
                        .add(1, &[KeyValue::new("operation", "discovery")]);
                    outcome.conflicting.push(entity_ref);
                }
                UpsertOutcome::Unchanged => {}
            }
        }

        self.replace_references(source_ref, &outcome.upserted, &outcome.conflicting)
            .await?;

        Ok(outcome)
    }

    /// Alias of [`StateTx::add_unprocessed_entities`].
    pub async fn upsert_discovered(
        &mut self,
        source_ref: &str,
        entities: &[DeferredEntity],
    ) -> Result<DiscoveryOutcome> {
        self.add_unprocessed_entities(source_ref, entities).await
    }

    /// Update-then-insert one unprocessed entity.
    ///
    /// `serialized` and `hash` come from [`codec`]. A presented location key
    /// may take over rows with the same key or none; an absent key updates any
    /// row and keeps its key.
    pub async fn upsert_unprocessed(
        &mut self,
        entity_ref: &str,
        serialized: &str,
        hash: &str,
        location_key: Option<&str>,
    ) -> Result<UpsertOutcome> {
        if self
            .update_unprocessed(entity_ref, serialized, hash, location_key)
            .await?
        {
            return Ok(UpsertOutcome::Updated);
        }

        if self
            .insert_unprocessed(entity_ref, serialized, hash, location_key)
            .await?
        {
            return Ok(UpsertOutcome::Inserted);
        }

        // Lost an insert race; the winner's row may still be ours to update.
        if self
            .update_unprocessed(entity_ref, serialized, hash, location_key)
            .await?
        {
            return Ok(UpsertOutcome::Updated);
        }

        match self.location_key_conflict(entity_ref, location_key).await? {
            Some(existing_location_key) => Ok(UpsertOutcome::Conflict {
                existing_location_key,
            }),
            None => Ok(UpsertOutcome::Unchanged),
        }
    }

    async fn update_unprocessed(
        &mut self,
        entity_ref: &str,
        serialized: &str,
        hash: &str,
        location_key: Option<&str>,
    ) -> Result<bool> {
        let d = self.dialect();
        let now = d.now();
        let sql = match location_key {
            Some(_) => format!(
                "UPDATE refresh_state
                 SET unprocessed_entity = {}, unprocessed_hash = {}, location_key = {},
                     last_discovery_at = {now}, next_update_at = {now}
                 WHERE entity_ref = {} AND (location_key = {} OR location_key IS NULL)",
                d.placeholder(1),
                d.placeholder(2),
                d.placeholder(3),
                d.placeholder(4),
                d.placeholder(5),
            ),
            None => format!(
                "UPDATE refresh_state
                 SET unprocessed_entity = {}, unprocessed_hash = {},
                     last_discovery_at = {now}, next_update_at = {now}
                 WHERE entity_ref = {}",
                d.placeholder(1),
                d.placeholder(2),
                d.placeholder(3),
            ),
        };

        let mut query = sqlx::query(&sql).bind(serialized).bind(hash);
        query = match location_key {
            Some(key) => query.bind(key).bind(entity_ref).bind(key),
            None => query.bind(entity_ref),
        };
        let rows_affected = query.execute(self.conn()).await?.rows_affected();
        Ok(rows_affected == 1)
    }

    /// Returns false when another transaction already inserted the reference.
    async fn insert_unprocessed(
        &mut self,
        entity_ref: &str,
        serialized: &str,
        hash: &str,
        location_key: Option<&str>,
    ) -> Result<bool> {
        let d = self.dialect();
        let now = d.now();
        let ignore_conflict = d.upsert_ignore_conflict();
        let sql = format!(
            "INSERT INTO refresh_state
                (entity_id, entity_ref, unprocessed_entity, unprocessed_hash, errors,
                 location_key, next_update_at, last_discovery_at)
             VALUES ({}, {now}, {now}) {}",
            d.placeholders(1, 6),
            ignore_conflict.unwrap_or_default(),
        );

        let result = sqlx::query(&sql)
            .bind(EntityId::new().to_string())
            .bind(entity_ref)
            .bind(serialized)
            .bind(hash)
            .bind("")
            .bind(location_key)
            .execute(self.conn())
            .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) => match classify(e) {
                StoreFailure::UniqueViolation => {
                    tracing::debug!(entity_ref, "insert lost race to a concurrent discovery");
                    Ok(false)
                }
                StoreFailure::Other(e) => Err(Error::Storage(e)),
            },
        }
    }

    /// The stored location key, if it is set and differs from `location_key`.
    async fn location_key_conflict(
        &mut self,
        entity_ref: &str,
        location_key: Option<&str>,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT location_key FROM refresh_state WHERE entity_ref = {}",
            self.dialect().placeholder(1)
        );
        let existing: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(entity_ref)
            .fetch_optional(self.conn())
            .await?;

        Ok(existing
            .flatten()
            .filter(|existing| Some(existing.as_str()) != location_key))
    }

    async fn replace_references(
        &mut self,
        source_ref: &str,
        targets: &[String],
        conflicting: &[String],
    ) -> Result<()> {
        let d = self.dialect();
        let batch_size = self.options().insert_batch_size;
        if conflicting.is_empty() {
            let sql = format!(
                "DELETE FROM refresh_state_references WHERE source_entity_ref = {}",
                d.placeholder(1)
            );
            sqlx::query(&sql)
                .bind(source_ref)
                .execute(self.conn())
                .await?;
        } else {
            // Edges to conflicting targets survive; the rest are removed in
            // bounded chunks.
            let preserved: HashSet<&str> = conflicting.iter().map(String::as_str).collect();
            let stale: Vec<String> = self
                .list_references(source_ref)
                .await?
                .into_iter()
                .filter(|target| !preserved.contains(target.as_str()))
                .collect();
            for chunk in stale.chunks(batch_size) {
                let d = self.dialect();
                let sql = format!(
                    "DELETE FROM refresh_state_references
                     WHERE source_entity_ref = {} AND target_entity_ref IN ({})",
                    d.placeholder(1),
                    d.placeholders(2, chunk.len()),
                );
                let mut query = sqlx::query(&sql).bind(source_ref);
                for target in chunk {
                    query = query.bind(target.as_str());
                }
                query.execute(self.conn()).await?;
            }
        }

        for chunk in targets.chunks(batch_size) {
            let sql = format!(
                "INSERT INTO refresh_state_references (source_entity_ref, target_entity_ref)
                 VALUES {}",
                self.dialect().values_rows(chunk.len(), 2)
            );
            let mut query = sqlx::query(&sql);
            for target in chunk {
                query = query.bind(source_ref).bind(target.as_str());
            }
            query.execute(self.conn()).await?;
        }
        Ok(())
    }
}
