//! refreshq CLI: operator interface to the refresh-state store.

use clap::{Parser, Subcommand};
use refreshq::config::Config;
use refreshq::db::Db;
use refreshq::model::{DeferredEntity, Entity};
use refreshq::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "refreshq", about = "Refresh queue and entity state store")]
struct Cli {
    /// TOML file whose [processing] keys override the REFRESHQ_* environment
    /// tunables; keys it leaves out keep their environment values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Upsert a discovery batch read from a JSON array of entities
    Discover {
        /// Entity reference of the discovering source
        #[arg(long)]
        source: String,
        /// File holding a JSON array of entity documents
        #[arg(long)]
        file: PathBuf,
        /// Location key claiming ownership of every entity in the batch
        #[arg(long)]
        location_key: Option<String>,
    },
    /// Claim a batch of due entities and print them
    Claim {
        /// Maximum number of entities to claim
        #[arg(long, default_value_t = 10)]
        max: usize,
    },
    /// Show the refresh state of an entity
    Show {
        /// Entity reference, e.g. component:default/petstore
        entity_ref: String,
    },
    /// List the sources that reference an entity
    Parents {
        /// Entity reference, e.g. component:default/petstore
        entity_ref: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(ref path) = cli.config {
        config = config.with_file(path)?;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "refreshq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect_with_config(&config).await?;

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations applied ({}).", db.dialect().name());
            Ok(())
        }
        Command::Discover {
            source,
            file,
            location_key,
        } => cmd_discover(&db, source, file, location_key).await,
        Command::Claim { max } => cmd_claim(&db, max).await,
        Command::Show { entity_ref } => cmd_show(&db, entity_ref).await,
        Command::Parents { entity_ref } => cmd_parents(&db, entity_ref).await,
    }
}

async fn cmd_discover(
    db: &Db,
    source: String,
    file: PathBuf,
    location_key: Option<String>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&file)?;
    let entities: Vec<Entity> = serde_json::from_str(&raw)?;
    let batch: Vec<DeferredEntity> = entities
        .into_iter()
        .map(|entity| DeferredEntity {
            entity,
            location_key: location_key.clone(),
        })
        .collect();

    let outcome = db
        .transaction(move |tx| {
            Box::pin(async move { tx.add_unprocessed_entities(&source, &batch).await })
        })
        .await?
        .unwrap_or_default();

    for entity_ref in &outcome.upserted {
        println!("upserted  {entity_ref}");
    }
    for entity_ref in &outcome.conflicting {
        println!("conflict  {entity_ref}");
    }
    println!(
        "\n{} upserted, {} conflicting",
        outcome.upserted.len(),
        outcome.conflicting.len()
    );
    Ok(())
}

async fn cmd_claim(db: &Db, max: usize) -> anyhow::Result<()> {
    let items = db
        .transaction(move |tx| Box::pin(async move { tx.claim_batch(max).await }))
        .await?
        .unwrap_or_default();

    if items.is_empty() {
        println!("Nothing due.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<40}  {:<20}  LOCATION_KEY",
        "ID", "ENTITY_REF", "WAS_DUE"
    );
    println!("{}", "-".repeat(120));
    for item in &items {
        println!(
            "{:<36}  {:<40}  {:<20}  {}",
            item.id,
            item.entity_ref,
            item.next_update_at.format("%Y-%m-%d %H:%M:%S"),
            item.location_key.as_deref().unwrap_or("-")
        );
    }
    println!("\n{} claimed", items.len());
    Ok(())
}

async fn cmd_show(db: &Db, entity_ref: String) -> anyhow::Result<()> {
    let lookup = entity_ref.clone();
    let record = db
        .transaction(move |tx| Box::pin(async move { tx.get_state(&lookup).await }))
        .await?
        .flatten();
    let Some(record) = record else {
        anyhow::bail!("no refresh state for '{entity_ref}'");
    };

    println!("ID:             {}", record.id);
    println!("Entity Ref:     {}", record.entity_ref);
    println!(
        "Location Key:   {}",
        record.location_key.as_deref().unwrap_or("-")
    );
    println!("Next Update:    {}", record.next_update_at);
    println!("Last Discovery: {}", record.last_discovery_at);
    println!(
        "Hash:           {}",
        record.unprocessed_hash.as_deref().unwrap_or("-")
    );
    println!(
        "Result Hash:    {}",
        record.result_hash.as_deref().unwrap_or("-")
    );
    if !record.errors.is_empty() {
        println!("Errors:         {}", record.errors);
    }
    println!(
        "Unprocessed:    {}",
        serde_json::to_string_pretty(&record.unprocessed_entity)?
    );
    if let Some(ref processed) = record.processed_entity {
        println!("Processed:      {}", serde_json::to_string_pretty(processed)?);
    }
    if let Some(ref cache) = record.cache {
        println!("Cache:          {}", serde_json::to_string_pretty(cache)?);
    }
    Ok(())
}

async fn cmd_parents(db: &Db, entity_ref: String) -> anyhow::Result<()> {
    let target = entity_ref.clone();
    let parents = db
        .transaction(move |tx| Box::pin(async move { tx.list_parents(&target).await }))
        .await?
        .unwrap_or_default();

    if parents.is_empty() {
        println!("No parents reference '{entity_ref}'.");
    }
    for parent in &parents {
        println!("{parent}");
    }
    Ok(())
}
