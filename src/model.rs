//! Core data model.
//!
//! An entity is identified by its entity reference (`kind:namespace/name`).
//! The store keeps one refresh-state row per reference, plus the relations and
//! refresh keys produced by processing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A JSON object, used for opaque payload fragments.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_NAMESPACE: &str = "default";

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Stable surrogate key of a refresh-state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> crate::error::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::error::Error::InvalidData(format!("entity id {s:?}: {e}")))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// An entity document as discovered or processed.
///
/// Only the identifying fields are typed; everything else rides along
/// untouched in `metadata.extra` and `spec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: EntityMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<JsonObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl Entity {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: kind.into(),
            metadata: EntityMetadata {
                name: name.into(),
                namespace: None,
                extra: JsonObject::new(),
            },
            spec: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    pub fn spec(mut self, spec: JsonObject) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Canonical reference string, e.g. `component:default/petstore`.
    pub fn entity_ref(&self) -> String {
        entity_ref(
            &self.kind,
            self.metadata.namespace.as_deref(),
            &self.metadata.name,
        )
    }
}

/// Render a canonical entity reference. Lower-cased; namespace defaults to
/// [`DEFAULT_NAMESPACE`].
pub fn entity_ref(kind: &str, namespace: Option<&str>, name: &str) -> String {
    let namespace = namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    format!("{kind}:{namespace}/{name}").to_lowercase()
}

/// An entity discovered while processing another one (or by a provider),
/// waiting to be enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEntity {
    pub entity: Entity,
    /// Discovery source that claims ownership of the entity.
    #[serde(default, rename = "locationKey")]
    pub location_key: Option<String>,
}

impl DeferredEntity {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            location_key: None,
        }
    }

    pub fn location_key(mut self, key: impl Into<String>) -> Self {
        self.location_key = Some(key.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// A typed edge emitted by processing an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRelationSpec {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation_type: String,
}

impl EntityRelationSpec {
    pub fn new(
        source: impl Into<String>,
        relation_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
        }
    }
}

/// A stored relation row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationRow {
    pub originating_entity_id: EntityId,
    pub source_entity_ref: String,
    pub target_entity_ref: String,
    pub relation_type: String,
}

// ---------------------------------------------------------------------------
// Refresh state
// ---------------------------------------------------------------------------

/// A claimed refresh-state row in its logical form, handed to a worker.
#[derive(Debug, Clone)]
pub struct RefreshStateItem {
    pub id: EntityId,
    pub entity_ref: String,
    pub unprocessed_entity: Entity,
    pub result_hash: Option<String>,
    pub next_update_at: DateTime<Utc>,
    pub last_discovery_at: DateTime<Utc>,
    /// Processing cache from the previous pass, if any.
    pub state: Option<JsonObject>,
    /// Serialized error list from the previous pass.
    pub errors: String,
    pub location_key: Option<String>,
}

/// A full refresh-state row, for inspection.
#[derive(Debug, Clone)]
pub struct RefreshStateRecord {
    pub id: EntityId,
    pub entity_ref: String,
    pub unprocessed_entity: Entity,
    pub unprocessed_hash: Option<String>,
    pub processed_entity: Option<Entity>,
    pub result_hash: Option<String>,
    pub errors: String,
    pub cache: Option<JsonObject>,
    pub location_key: Option<String>,
    pub next_update_at: DateTime<Utc>,
    pub last_discovery_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Operation inputs and outputs
// ---------------------------------------------------------------------------

/// Everything a worker hands back after processing one claimed entity.
#[derive(Debug, Clone)]
pub struct ProcessedEntityUpdate {
    pub id: EntityId,
    pub processed_entity: Entity,
    pub result_hash: String,
    pub errors: String,
    pub relations: Vec<EntityRelationSpec>,
    pub deferred_entities: Vec<DeferredEntity>,
    pub refresh_keys: Vec<String>,
    /// Location key the row carried when it was claimed.
    pub location_key: Option<String>,
}

impl ProcessedEntityUpdate {
    pub fn new(id: EntityId, processed_entity: Entity, result_hash: impl Into<String>) -> Self {
        Self {
            id,
            processed_entity,
            result_hash: result_hash.into(),
            errors: "[]".to_string(),
            relations: Vec::new(),
            deferred_entities: Vec::new(),
            refresh_keys: Vec::new(),
            location_key: None,
        }
    }

    pub fn errors(mut self, errors: impl Into<String>) -> Self {
        self.errors = errors.into();
        self
    }

    pub fn relations(mut self, relations: Vec<EntityRelationSpec>) -> Self {
        self.relations = relations;
        self
    }

    pub fn deferred_entities(mut self, deferred: Vec<DeferredEntity>) -> Self {
        self.deferred_entities = deferred;
        self
    }

    pub fn refresh_keys(mut self, keys: Vec<String>) -> Self {
        self.refresh_keys = keys;
        self
    }

    pub fn location_key(mut self, key: Option<String>) -> Self {
        self.location_key = key;
        self
    }
}

/// Result of committing a processed entity.
#[derive(Debug, Clone, Default)]
pub struct UpdateProcessedEntityResult {
    /// Relations that existed right before the commit replaced them.
    pub previous_relations: Vec<RelationRow>,
}

/// What happened to each entity of a discovery batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// References whose row was updated or inserted; their edges were written.
    pub upserted: Vec<String>,
    /// References owned by another location key; their edges were kept as is.
    pub conflicting: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_defaults_namespace_and_lowercases() {
        let entity = Entity::new("Component", "PetStore");
        assert_eq!(entity.entity_ref(), "component:default/petstore");

        let entity = Entity::new("API", "orders").namespace("Billing");
        assert_eq!(entity.entity_ref(), "api:billing/orders");
    }

    #[test]
    fn empty_namespace_is_default() {
        assert_eq!(entity_ref("user", Some(""), "jo"), "user:default/jo");
    }

    #[test]
    fn entity_keeps_unknown_metadata() {
        let raw = serde_json::json!({
            "apiVersion": "backstage.io/v1alpha1",
            "kind": "Component",
            "metadata": { "name": "a", "annotations": { "x": "y" } },
            "spec": { "owner": "team-a" }
        });
        let entity: Entity = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entity.metadata.extra["annotations"]["x"], "y");
        assert_eq!(serde_json::to_value(&entity).unwrap(), raw);
    }

    #[test]
    fn entity_id_parse_rejects_garbage() {
        let id = EntityId::new();
        assert_eq!(EntityId::parse(&id.to_string()).unwrap(), id);
        assert!(EntityId::parse("not-a-uuid").is_err());
    }
}
