//! Database configuration module for the SIM inventory.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Creation is idempotent, which lets the
//! service call it on every start.

use crate::entities::{
    ImportBatch, ProfileVendor, Registry, SimResource, SimResourceColumn, VendorRegistryPermission,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/sim_inventory.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable, falling back to
/// a local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Directory of an `SQLite` file URL, if it names one below the working directory.
fn sqlite_file_dir(database_url: &str) -> Option<&Path> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next()?;
    Path::new(path).parent().filter(|dir| !dir.as_os_str().is_empty())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    if let Some(parent) = sqlite_file_dir(&database_url) {
        std::fs::create_dir_all(parent)?;
    }
    info!(url = %database_url, "Connecting to database");
    Database::connect(&database_url).await.map_err(Into::into)
}

/// Creates every table and the pool index if they do not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tables = [
        schema.create_table_from_entity(Registry),
        schema.create_table_from_entity(ProfileVendor),
        schema.create_table_from_entity(VendorRegistryPermission),
        schema.create_table_from_entity(ImportBatch),
        schema.create_table_from_entity(SimResource),
    ];
    for table in &mut tables {
        table.if_not_exists();
        db.execute(builder.build(&*table)).await?;
    }

    // Pool queries always filter on (registry_id, profile_type)
    let pool_index = Index::create()
        .name("idx_sim_resources_pool")
        .table(SimResource)
        .col(SimResourceColumn::RegistryId)
        .col(SimResourceColumn::ProfileType)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&pool_index)).await?;

    debug!("Database schema is in place");
    Ok(())
}
