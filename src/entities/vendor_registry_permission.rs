//! Allow-list edge: a profile vendor may only supply profiles to registries
//! it has a row here for.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Permission database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vendor_registry_permissions")]
pub struct Model {
    /// Permitted vendor
    #[sea_orm(primary_key, auto_increment = false)]
    pub vendor_id: i64,
    /// Registry the vendor may supply
    #[sea_orm(primary_key, auto_increment = false)]
    pub registry_id: i64,
}

/// Defines relationships between a permission and its two ends
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The permitted vendor
    #[sea_orm(
        belongs_to = "super::profile_vendor::Entity",
        from = "Column::VendorId",
        to = "super::profile_vendor::Column::Id"
    )]
    ProfileVendor,
    /// The registry it may supply
    #[sea_orm(
        belongs_to = "super::registry::Entity",
        from = "Column::RegistryId",
        to = "super::registry::Column::Id"
    )]
    Registry,
}

impl ActiveModelBehavior for ActiveModel {}
