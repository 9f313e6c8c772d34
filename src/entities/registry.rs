//! Registry entity - One row per configured subscriber registry (HSS) endpoint.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Registry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "registries")]
pub struct Model {
    /// Unique identifier for the registry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Configured name, matched against `[[registries]]` in config.toml
    #[sea_orm(unique)]
    pub name: String,
}

/// Defines relationships between Registry and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One registry owns many SIM resources
    #[sea_orm(has_many = "super::sim_resource::Entity")]
    SimResources,
}

impl Related<super::sim_resource::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SimResources.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
