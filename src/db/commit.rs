//! Writing processing results back into the refresh state.

use super::StateTx;
use crate::codec;
use crate::error::{Error, Result};
use crate::model::{
    EntityId, EntityRelationSpec, JsonObject, ProcessedEntityUpdate, RelationRow,
    UpdateProcessedEntityResult,
};
use crate::telemetry::{metrics, processing};
use opentelemetry::KeyValue;
use std::collections::HashSet;
use tracing::Instrument;

#[derive(sqlx::FromRow)]
struct StoredRelation {
    source_entity_ref: String,
    target_entity_ref: String,
    #[sqlx(rename = "type")]
    relation_type: String,
}

impl StoredRelation {
    fn into_row(self, originating_entity_id: EntityId) -> RelationRow {
        RelationRow {
            originating_entity_id,
            source_entity_ref: self.source_entity_ref,
            target_entity_ref: self.target_entity_ref,
            relation_type: self.relation_type,
        }
    }
}

/// Drop repeated (source, target, type) triples, keeping the first.
pub fn dedup_relations(relations: &[EntityRelationSpec]) -> Vec<&EntityRelationSpec> {
    let mut seen = HashSet::new();
    relations
        .iter()
        .filter(|r| {
            seen.insert((
                r.source.as_str(),
                r.target.as_str(),
                r.relation_type.as_str(),
            ))
        })
        .collect()
}

impl StateTx {
    /// Commit the result of processing one entity.
    ///
    /// The write is only accepted while the row's location key still matches
    /// the one the worker claimed it with. A row claimed without a key must
    /// still have none. Otherwise [`Error::Conflict`] is
    /// returned and the caller should abandon the transaction. Deferred
    /// entities are enqueued with the processed entity as their source, and
    /// the relation and refresh-key sets are replaced wholesale.
    pub async fn update_processed_entity(
        &mut self,
        update: &ProcessedEntityUpdate,
    ) -> Result<UpdateProcessedEntityResult> {
        let span = processing::start_commit_span(&update.id, &update.processed_entity.entity_ref());
        self.update_processed_entity_inner(update)
            .instrument(span)
            .await
    }

    async fn update_processed_entity_inner(
        &mut self,
        update: &ProcessedEntityUpdate,
    ) -> Result<UpdateProcessedEntityResult> {
        let started = std::time::Instant::now();
        let entity_ref = update.processed_entity.entity_ref();
        let processed = codec::serialize_entity(&update.processed_entity)?;

        let updated = self
            .update_processed_row(
                update.id,
                &processed,
                &update.result_hash,
                &update.errors,
                update.location_key.as_deref(),
            )
            .await?;
        if !updated {
            metrics::location_key_conflicts().add(1, &[KeyValue::new("operation", "commit")]);
            return Err(Error::Conflict {
                entity: update.id.to_string(),
                location_key: update.location_key.clone(),
            });
        }

        self.add_unprocessed_entities(&entity_ref, &update.deferred_entities)
            .await?;

        let previous_relations = self.take_relations(update.id).await?;
        self.insert_relations(update.id, &dedup_relations(&update.relations))
            .await?;
        self.replace_refresh_keys(update.id, &update.refresh_keys)
            .await?;

        metrics::results_committed().add(1, &[KeyValue::new("kind", "processed")]);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "update_processed_entity")],
        );
        Ok(UpdateProcessedEntityResult { previous_relations })
    }

    /// Record errors for an entity whose processing produced no new output.
    /// Relations, refresh keys and the location key are left alone.
    pub async fn update_processed_entity_errors(
        &mut self,
        id: EntityId,
        errors: &str,
        result_hash: &str,
    ) -> Result<()> {
        let d = self.dialect();
        let sql = format!(
            "UPDATE refresh_state SET errors = {}, result_hash = {} WHERE entity_id = {}",
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3),
        );
        sqlx::query(&sql)
            .bind(errors)
            .bind(result_hash)
            .bind(id.to_string())
            .execute(self.conn())
            .await?;
        metrics::results_committed().add(1, &[KeyValue::new("kind", "errors")]);
        Ok(())
    }

    /// Store the processing cache for an entity. Last writer wins.
    pub async fn update_entity_cache(
        &mut self,
        id: EntityId,
        state: Option<&JsonObject>,
    ) -> Result<()> {
        let cache = codec::serialize_cache(state)?;
        let d = self.dialect();
        let sql = format!(
            "UPDATE refresh_state SET cache = {} WHERE entity_id = {}",
            d.placeholder(1),
            d.placeholder(2),
        );
        sqlx::query(&sql)
            .bind(cache)
            .bind(id.to_string())
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn update_processed_row(
        &mut self,
        id: EntityId,
        processed: &str,
        result_hash: &str,
        errors: &str,
        location_key: Option<&str>,
    ) -> Result<bool> {
        let d = self.dialect();
        let sql = match location_key {
            Some(_) => format!(
                "UPDATE refresh_state
                 SET processed_entity = {}, result_hash = {}, errors = {}, location_key = {}
                 WHERE entity_id = {} AND (location_key = {} OR location_key IS NULL)",
                d.placeholder(1),
                d.placeholder(2),
                d.placeholder(3),
                d.placeholder(4),
                d.placeholder(5),
                d.placeholder(6),
            ),
            None => format!(
                "UPDATE refresh_state
                 SET processed_entity = {}, result_hash = {}, errors = {}
                 WHERE entity_id = {} AND location_key IS NULL",
                d.placeholder(1),
                d.placeholder(2),
                d.placeholder(3),
                d.placeholder(4),
            ),
        };

        let mut query = sqlx::query(&sql)
            .bind(processed)
            .bind(result_hash)
            .bind(errors);
        query = match location_key {
            Some(key) => query.bind(key).bind(id.to_string()).bind(key),
            None => query.bind(id.to_string()),
        };
        let rows_affected = query.execute(self.conn()).await?.rows_affected();
        Ok(rows_affected == 1)
    }

    /// Delete the entity's relations and return what was there.
    async fn take_relations(&mut self, id: EntityId) -> Result<Vec<RelationRow>> {
        let d = self.dialect();
        let stored: Vec<StoredRelation> = if d.supports_returning_on_delete() {
            let sql = format!(
                "DELETE FROM relations WHERE originating_entity_id = {}
                 RETURNING source_entity_ref, target_entity_ref, type",
                d.placeholder(1)
            );
            sqlx::query_as(&sql)
                .bind(id.to_string())
                .fetch_all(self.conn())
                .await?
        } else {
            let select = format!(
                "SELECT source_entity_ref, target_entity_ref, type
                 FROM relations WHERE originating_entity_id = {}",
                d.placeholder(1)
            );
            let delete = format!(
                "DELETE FROM relations WHERE originating_entity_id = {}",
                d.placeholder(1)
            );
            let stored = sqlx::query_as(&select)
                .bind(id.to_string())
                .fetch_all(self.conn())
                .await?;
            sqlx::query(&delete)
                .bind(id.to_string())
                .execute(self.conn())
                .await?;
            stored
        };

        Ok(stored.into_iter().map(|r| r.into_row(id)).collect())
    }

    async fn insert_relations(
        &mut self,
        id: EntityId,
        relations: &[&EntityRelationSpec],
    ) -> Result<()> {
        let originating = id.to_string();
        let batch_size = self.options().insert_batch_size;
        for chunk in relations.chunks(batch_size) {
            let sql = format!(
                "INSERT INTO relations
                    (originating_entity_id, source_entity_ref, target_entity_ref, type)
                 VALUES {}",
                self.dialect().values_rows(chunk.len(), 4)
            );
            let mut query = sqlx::query(&sql);
            for relation in chunk {
                query = query
                    .bind(originating.as_str())
                    .bind(relation.source.as_str())
                    .bind(relation.target.as_str())
                    .bind(relation.relation_type.as_str());
            }
            query.execute(self.conn()).await?;
        }
        Ok(())
    }

    async fn replace_refresh_keys(&mut self, id: EntityId, keys: &[String]) -> Result<()> {
        let entity_id = id.to_string();
        let sql = format!(
            "DELETE FROM refresh_keys WHERE entity_id = {}",
            self.dialect().placeholder(1)
        );
        sqlx::query(&sql)
            .bind(entity_id.as_str())
            .execute(self.conn())
            .await?;

        let batch_size = self.options().insert_batch_size;
        for chunk in keys.chunks(batch_size) {
            let sql = format!(
                "INSERT INTO refresh_keys (entity_id, refresh_key) VALUES {}",
                self.dialect().values_rows(chunk.len(), 2)
            );
            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(entity_id.as_str()).bind(key.as_str());
            }
            query.execute(self.conn()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let relations = vec![
            EntityRelationSpec::new("component:default/x", "ownedBy", "group:default/y"),
            EntityRelationSpec::new("component:default/x", "ownedBy", "group:default/y"),
            EntityRelationSpec::new("component:default/x", "dependsOn", "component:default/z"),
            EntityRelationSpec::new("component:default/x", "dependsOn", "group:default/y"),
        ];
        let unique = dedup_relations(&relations);
        assert_eq!(unique.len(), 3);
        assert!(std::ptr::eq(unique[0], &relations[0]));
        assert_eq!(unique[1].target, "component:default/z");
        assert_eq!(unique[2].relation_type, "dependsOn");
    }

    #[test]
    fn dedup_of_empty_is_empty() {
        assert!(dedup_relations(&[]).is_empty());
    }
}
