//! Span helpers for the claim and commit paths.

use crate::model::EntityId;
use tracing::Span;

/// Span around one batch claim.
pub fn start_claim_span(max_size: usize, dialect: &str) -> Span {
    tracing::info_span!(
        "refresh.claim",
        "refresh.max_size" = max_size,
        "db.system" = dialect,
    )
}

/// Span around committing one processed entity.
pub fn start_commit_span(id: &EntityId, entity_ref: &str) -> Span {
    tracing::info_span!(
        "refresh.commit",
        "entity.id" = %id,
        "entity.ref" = entity_ref,
    )
}
