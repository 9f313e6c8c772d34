//! Import batch entity - Audit record of one bulk load.
//!
//! A batch is opened as `Started` before any resource is written and closed
//! exactly once as `Completed` or `Failed`. Closed batches are never changed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of an import batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Import in progress
    #[sea_orm(string_value = "STARTED")]
    Started,
    /// Every record was stored
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Nothing was stored
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

/// Import batch database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "import_batches")]
pub struct Model {
    /// Unique identifier for the batch
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Identity of whoever started the import
    pub importer: String,
    /// Registry the imported resources belong to
    pub registry_id: i64,
    /// Vendor holding the imported profiles
    pub vendor_id: i64,
    /// Number of resources stored, zero until the batch is closed
    pub size: i64,
    /// Current status
    pub status: BatchStatus,
    /// When the batch was opened
    pub started_at: DateTimeUtc,
    /// When the batch was closed
    pub ended_at: Option<DateTimeUtc>,
}

/// Defines relationships between `ImportBatch` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One batch creates many SIM resources
    #[sea_orm(has_many = "super::sim_resource::Entity")]
    SimResources,
}

impl Related<super::sim_resource::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SimResources.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
