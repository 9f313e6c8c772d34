//! Profile vendor entity - One row per configured profile-issuing service.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Profile vendor database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profile_vendors")]
pub struct Model {
    /// Unique identifier for the vendor
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Configured name, matched against `[[profile_vendors]]` in config.toml
    #[sea_orm(unique)]
    pub name: String,
}

/// Defines relationships between `ProfileVendor` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One vendor supplies many SIM resources
    #[sea_orm(has_many = "super::sim_resource::Entity")]
    SimResources,
}

impl Related<super::sim_resource::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SimResources.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
