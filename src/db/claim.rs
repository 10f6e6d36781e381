//! Batch claiming of due entities.

use super::{StateTx, parse_timestamp};
use crate::codec;
use crate::error::Result;
use crate::model::{EntityId, RefreshStateItem};
use crate::telemetry::{metrics, processing};
use opentelemetry::KeyValue;
use tracing::Instrument;

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    entity_id: String,
    entity_ref: String,
    unprocessed_entity: String,
    result_hash: Option<String>,
    next_update_text: String,
    last_discovery_text: String,
    cache: Option<String>,
    errors: Option<String>,
    location_key: Option<String>,
}

impl ClaimedRow {
    fn try_into_item(self) -> Result<RefreshStateItem> {
        Ok(RefreshStateItem {
            id: EntityId::parse(&self.entity_id)?,
            unprocessed_entity: codec::deserialize_entity(&self.unprocessed_entity)?,
            entity_ref: self.entity_ref,
            result_hash: self.result_hash,
            next_update_at: parse_timestamp(&self.next_update_text)?,
            last_discovery_at: parse_timestamp(&self.last_discovery_text)?,
            state: codec::deserialize_cache(self.cache.as_deref())?,
            errors: self.errors.unwrap_or_default(),
            location_key: self.location_key,
        })
    }
}

impl StateTx {
    /// Claim up to `max_size` due entities, oldest due first.
    ///
    /// Claimed rows get `next_update_at = now + refresh interval` in the same
    /// transaction, so other workers skip them until the interval passes even
    /// if this worker never reports back. Where the engine can, rows locked by
    /// a concurrent claim are skipped instead of waited on.
    pub async fn claim_batch(&mut self, max_size: usize) -> Result<Vec<RefreshStateItem>> {
        if max_size == 0 {
            return Ok(Vec::new());
        }
        let span = processing::start_claim_span(max_size, self.dialect().name());
        self.claim_batch_inner(max_size).instrument(span).await
    }

    async fn claim_batch_inner(&mut self, max_size: usize) -> Result<Vec<RefreshStateItem>> {
        let started = std::time::Instant::now();
        let d = self.dialect();
        let lock = if d.supports_skip_locked() {
            "FOR UPDATE SKIP LOCKED"
        } else {
            ""
        };
        let sql = format!(
            "SELECT entity_id, entity_ref, unprocessed_entity, result_hash,
                    {} AS next_update_text, {} AS last_discovery_text,
                    cache, errors, location_key
             FROM refresh_state
             WHERE next_update_at <= {}
             ORDER BY next_update_at ASC
             LIMIT {}
             {lock}",
            d.timestamp_text("next_update_at"),
            d.timestamp_text("last_discovery_at"),
            d.now(),
            d.placeholder(1),
        );
        let limit = i64::try_from(max_size).unwrap_or(i64::MAX);
        let rows: Vec<ClaimedRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(self.conn())
            .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let interval = (self.options().refresh_interval)();
        let d = self.dialect();
        let sql = format!(
            "UPDATE refresh_state SET next_update_at = {} WHERE entity_id IN ({})",
            d.now_plus_interval(interval),
            d.placeholders(1, rows.len()),
        );
        let mut query = sqlx::query(&sql);
        for row in &rows {
            query = query.bind(row.entity_id.as_str());
        }
        query.execute(self.conn()).await?;

        let items = rows
            .into_iter()
            .map(ClaimedRow::try_into_item)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            claimed = items.len(),
            interval_secs = interval,
            "claimed due entities"
        );
        metrics::entities_claimed().add(items.len() as u64, &[]);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "claim_batch")],
        );
        Ok(items)
    }
}
