//! Shared helpers for the SQLite-backed integration tests.

#![allow(dead_code)]

use refreshq::db::Db;
use refreshq::db::options::{ProcessingOptions, fixed_refresh_interval};
use refreshq::model::{
    DeferredEntity, DiscoveryOutcome, Entity, RefreshStateItem, RefreshStateRecord,
};
use serde_json::json;

/// Seconds a claimed entity stays out of the queue in tests.
pub const REFRESH_SECS: f64 = 300.0;

pub fn test_options() -> ProcessingOptions {
    ProcessingOptions::default().refresh_interval(fixed_refresh_interval(REFRESH_SECS))
}

/// Fresh in-memory database with the schema applied.
pub async fn test_db() -> Db {
    test_db_with(test_options()).await
}

pub async fn test_db_with(options: ProcessingOptions) -> Db {
    let db = Db::connect("sqlite::memory:", options).await.unwrap();
    db.migrate().await.unwrap();
    db
}

/// File-backed database, so a second connection can play another actor.
pub async fn file_db(dir: &tempfile::TempDir) -> (Db, String) {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("refresh.db").display());
    let db = Db::connect(&url, test_options()).await.unwrap();
    db.migrate().await.unwrap();
    (db, url)
}

pub fn component(name: &str) -> Entity {
    Entity::new("Component", name)
}

/// A component whose spec carries a revision marker, to tell versions apart.
pub fn component_rev(name: &str, rev: u32) -> Entity {
    let spec = json!({ "revision": rev });
    component(name).spec(spec.as_object().unwrap().clone())
}

pub fn deferred(entity: Entity, location_key: Option<&str>) -> DeferredEntity {
    DeferredEntity {
        entity,
        location_key: location_key.map(str::to_string),
    }
}

pub async fn discover(db: &Db, source: &str, batch: Vec<DeferredEntity>) -> DiscoveryOutcome {
    let source = source.to_string();
    db.transaction(move |tx| {
        Box::pin(async move { tx.add_unprocessed_entities(&source, &batch).await })
    })
    .await
    .unwrap()
    .expect("discovery committed")
}

pub async fn claim(db: &Db, max: usize) -> Vec<RefreshStateItem> {
    db.transaction(move |tx| Box::pin(async move { tx.claim_batch(max).await }))
        .await
        .unwrap()
        .expect("claim committed")
}

pub async fn state(db: &Db, entity_ref: &str) -> Option<RefreshStateRecord> {
    let entity_ref = entity_ref.to_string();
    db.transaction(move |tx| Box::pin(async move { tx.get_state(&entity_ref).await }))
        .await
        .unwrap()
        .flatten()
}

pub async fn references(db: &Db, source: &str) -> Vec<String> {
    let source = source.to_string();
    db.transaction(move |tx| Box::pin(async move { tx.list_references(&source).await }))
        .await
        .unwrap()
        .unwrap_or_default()
}

pub async fn parents(db: &Db, target: &str) -> Vec<String> {
    let target = target.to_string();
    db.transaction(move |tx| Box::pin(async move { tx.list_parents(&target).await }))
        .await
        .unwrap()
        .unwrap_or_default()
}
