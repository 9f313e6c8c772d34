//! SIM resource entity - One row per physical or embedded SIM.
//!
//! A resource carries three independent state axes: what the subscriber
//! registry knows (`registry_state`), what the profile vendor has released
//! (`vendor_state`) and whether a consumer has claimed it (`provision_state`).
//! The store keeps `provision_state = Provisioned => vendor_state = Released`
//! and only marks a resource `Activated` once its profile is released.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Activation status as mirrored from the external subscriber registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryState {
    /// The registry does not treat the SIM as live
    #[sea_orm(string_value = "NOT_ACTIVATED")]
    NotActivated,
    /// The registry has been told the SIM is live
    #[sea_orm(string_value = "ACTIVATED")]
    Activated,
}

/// Whether the profile vendor has released a usable profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorState {
    /// Raw stock, no profile released yet
    #[sea_orm(string_value = "AVAILABLE")]
    Available,
    /// Profile released, `matching_id` is set
    #[sea_orm(string_value = "RELEASED")]
    Released,
}

/// Whether the resource has been handed to a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionState {
    /// Not claimed
    #[sea_orm(string_value = "AVAILABLE")]
    Available,
    /// Claimed by exactly one allocation
    #[sea_orm(string_value = "PROVISIONED")]
    Provisioned,
}

/// SIM resource database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sim_resources")]
pub struct Model {
    /// Store-internal identity
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Hardware identifier, globally unique
    #[sea_orm(unique)]
    pub iccid: String,
    /// Subscriber identity
    pub imsi: String,
    /// Subscriber number, set when assigned
    pub msisdn: Option<String>,
    /// Embedded-SIM chip identity, write-once
    pub eid: Option<String>,
    /// Provisioning profile template name
    pub profile_type: String,
    /// Owning registry
    pub registry_id: i64,
    /// Profile vendor holding this resource's profile
    pub vendor_id: i64,
    /// Import batch that created the row
    pub batch_id: i64,
    /// Registry axis
    pub registry_state: RegistryState,
    /// Vendor axis
    pub vendor_state: VendorState,
    /// Claim axis
    pub provision_state: ProvisionState,
    /// Vendor-issued token, set together with `vendor_state = Released`
    pub matching_id: Option<String>,
    /// Set when the SIM was deliberately suspended with its registry
    pub suspended_at: Option<DateTimeUtc>,
}

/// Defines relationships between `SimResource` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each resource belongs to one registry
    #[sea_orm(
        belongs_to = "super::registry::Entity",
        from = "Column::RegistryId",
        to = "super::registry::Column::Id"
    )]
    Registry,
    /// Each resource is supplied by one profile vendor
    #[sea_orm(
        belongs_to = "super::profile_vendor::Entity",
        from = "Column::VendorId",
        to = "super::profile_vendor::Column::Id"
    )]
    ProfileVendor,
    /// Each resource was loaded by one import batch
    #[sea_orm(
        belongs_to = "super::import_batch::Entity",
        from = "Column::BatchId",
        to = "super::import_batch::Column::Id"
    )]
    ImportBatch,
}

impl Related<super::registry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Registry.def()
    }
}

impl Related<super::profile_vendor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProfileVendor.def()
    }
}

impl Related<super::import_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ImportBatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Activation code a device uses to download the profile.
    ///
    /// Present exactly when the vendor has released the profile.
    #[must_use]
    pub fn activation_code(&self, activation_host: &str) -> Option<String> {
        match (self.vendor_state, &self.matching_id) {
            (VendorState::Released, Some(matching_id)) => {
                Some(format!("LPA:{activation_host}:{matching_id}"))
            }
            _ => None,
        }
    }

    /// True when the resource has been claimed but the registry never
    /// confirmed activation.
    #[must_use]
    pub fn is_pending_activation(&self) -> bool {
        self.provision_state == ProvisionState::Provisioned
            && self.registry_state == RegistryState::NotActivated
            && self.suspended_at.is_none()
    }
}
