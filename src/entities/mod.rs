//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

/// Import batch audit rows
pub mod import_batch;
/// Profile vendors (SM-DP+)
pub mod profile_vendor;
/// Subscriber registries
pub mod registry;
/// SIM resources and their state axes
pub mod sim_resource;
/// Which vendor may supply which registry
pub mod vendor_registry_permission;

// Re-export specific types to avoid conflicts
pub use import_batch::{
    BatchStatus, Column as ImportBatchColumn, Entity as ImportBatch, Model as ImportBatchModel,
};
pub use profile_vendor::{
    Column as ProfileVendorColumn, Entity as ProfileVendor, Model as ProfileVendorModel,
};
pub use registry::{Column as RegistryColumn, Entity as Registry, Model as RegistryModel};
pub use sim_resource::{
    Column as SimResourceColumn, Entity as SimResource, Model as SimResourceModel,
    ProvisionState, RegistryState, VendorState,
};
pub use vendor_registry_permission::{
    Column as PermissionColumn, Entity as VendorRegistryPermission, Model as PermissionModel,
};
