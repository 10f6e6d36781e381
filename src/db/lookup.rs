//! Read-only queries: parent lookup and row inspection.

use super::{StateTx, parse_timestamp};
use crate::codec;
use crate::error::Result;
use crate::model::{EntityId, RefreshStateRecord, RelationRow};

#[derive(sqlx::FromRow)]
struct StateRow {
    entity_id: String,
    entity_ref: String,
    unprocessed_entity: String,
    unprocessed_hash: Option<String>,
    processed_entity: Option<String>,
    result_hash: Option<String>,
    errors: Option<String>,
    cache: Option<String>,
    location_key: Option<String>,
    next_update_text: String,
    last_discovery_text: String,
}

impl StateRow {
    fn try_into_record(self) -> Result<RefreshStateRecord> {
        Ok(RefreshStateRecord {
            id: EntityId::parse(&self.entity_id)?,
            unprocessed_entity: codec::deserialize_entity(&self.unprocessed_entity)?,
            processed_entity: self
                .processed_entity
                .as_deref()
                .map(codec::deserialize_entity)
                .transpose()?,
            cache: codec::deserialize_cache(self.cache.as_deref())?,
            next_update_at: parse_timestamp(&self.next_update_text)?,
            last_discovery_at: parse_timestamp(&self.last_discovery_text)?,
            entity_ref: self.entity_ref,
            unprocessed_hash: self.unprocessed_hash,
            result_hash: self.result_hash,
            errors: self.errors.unwrap_or_default(),
            location_key: self.location_key,
        })
    }
}

impl StateTx {
    /// Distinct sources that currently declare a reference edge to
    /// `target_ref`, sorted.
    pub async fn list_parents(&mut self, target_ref: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT source_entity_ref FROM refresh_state_references
             WHERE target_entity_ref = {}
             ORDER BY source_entity_ref",
            self.dialect().placeholder(1)
        );
        let parents = sqlx::query_scalar(&sql)
            .bind(target_ref)
            .fetch_all(self.conn())
            .await?;
        Ok(parents)
    }

    /// Targets of the reference edges declared by `source_ref`, sorted.
    pub async fn list_references(&mut self, source_ref: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT target_entity_ref FROM refresh_state_references
             WHERE source_entity_ref = {}
             ORDER BY target_entity_ref",
            self.dialect().placeholder(1)
        );
        let targets = sqlx::query_scalar(&sql)
            .bind(source_ref)
            .fetch_all(self.conn())
            .await?;
        Ok(targets)
    }

    pub async fn get_state(&mut self, entity_ref: &str) -> Result<Option<RefreshStateRecord>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT entity_id, entity_ref, unprocessed_entity, unprocessed_hash,
                    processed_entity, result_hash, errors, cache, location_key,
                    {} AS next_update_text, {} AS last_discovery_text
             FROM refresh_state WHERE entity_ref = {}",
            d.timestamp_text("next_update_at"),
            d.timestamp_text("last_discovery_at"),
            d.placeholder(1),
        );
        let row: Option<StateRow> = sqlx::query_as(&sql)
            .bind(entity_ref)
            .fetch_optional(self.conn())
            .await?;
        row.map(StateRow::try_into_record).transpose()
    }

    /// Relations currently stored for an entity, sorted by source, type and
    /// target.
    pub async fn list_relations(&mut self, id: EntityId) -> Result<Vec<RelationRow>> {
        let sql = format!(
            "SELECT source_entity_ref, target_entity_ref, type FROM relations
             WHERE originating_entity_id = {}
             ORDER BY source_entity_ref, type, target_entity_ref",
            self.dialect().placeholder(1)
        );
        let rows: Vec<(String, String, String)> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_all(self.conn())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(source, target, relation_type)| RelationRow {
                originating_entity_id: id,
                source_entity_ref: source,
                target_entity_ref: target,
                relation_type,
            })
            .collect())
    }

    pub async fn list_refresh_keys(&mut self, id: EntityId) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT refresh_key FROM refresh_keys WHERE entity_id = {} ORDER BY refresh_key",
            self.dialect().placeholder(1)
        );
        let keys = sqlx::query_scalar(&sql)
            .bind(id.to_string())
            .fetch_all(self.conn())
            .await?;
        Ok(keys)
    }
}
