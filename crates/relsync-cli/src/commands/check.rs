use anyhow::Result;
use colored::Colorize;
use relsync_storage::{Linkage, Schema};

use crate::backend::verify_storage;
use crate::config::AppConfig;
use crate::output::print_success;

/// Prints a summary of a configuration that has already been validated, then
/// opens the storage backend once.
pub async fn check_config(cfg: &AppConfig, schema: &Schema) -> Result<()> {
    println!("{}: {:?}", "Backend".cyan(), cfg.storage.backend);
    println!("{}: {}", "Log level".cyan(), cfg.logging.level);
    println!("{}:", "Entities".cyan());
    for entity in schema.entities() {
        println!(
            "  {} (table {}, key {}, {} ids)",
            entity.name, entity.table, entity.primary_key, entity.id_kind
        );
    }
    println!("{}:", "Associations".cyan());
    for association in schema.associations() {
        let via = match &association.linkage {
            Linkage::JoinTable { table, .. } => format!("join table {table}"),
            Linkage::ForeignKey { column } => {
                format!("foreign key {}.{column}", association.related.table)
            }
        };
        println!(
            "  {}.{} -> {} via {via}",
            association.owner.name, association.name, association.related.name
        );
    }
    verify_storage(&cfg.storage, schema).await?;
    println!("{}: reachable", "Storage".cyan());
    print_success("Configuration is valid");
    Ok(())
}
