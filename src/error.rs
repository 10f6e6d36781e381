//! Error types for refreshq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A location-key guarded write matched no row: another discovery source
    /// owns the entity now.
    #[error("conflicting write for {entity} with location key {}", .location_key.as_deref().unwrap_or("<none>"))]
    Conflict {
        entity: String,
        location_key: Option<String>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Returned from a unit of work to abandon the transaction quietly.
    #[error("transaction rolled back")]
    Rollback,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for ownership conflicts, which callers abandon instead of retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_entity_and_key() {
        let err = Error::Conflict {
            entity: "component:default/api".to_string(),
            location_key: Some("url:https://example.com/a.yaml".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("component:default/api"));
        assert!(msg.contains("url:https://example.com/a.yaml"));
        assert!(err.is_conflict());
    }

    #[test]
    fn conflict_message_without_key() {
        let err = Error::Conflict {
            entity: "abc".to_string(),
            location_key: None,
        };
        assert!(err.to_string().contains("<none>"));
    }

    #[test]
    fn storage_errors_are_not_conflicts() {
        let err = Error::from(sqlx::Error::RowNotFound);
        assert!(!err.is_conflict());
        assert!(err.to_string().starts_with("storage error"));
    }
}
