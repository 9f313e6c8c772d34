//! Profile vendor entries and the vendor-to-registry allow-list.

use crate::{
    entities::{ProfileVendor, VendorRegistryPermission, profile_vendor, vendor_registry_permission},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};

/// Stores a new profile vendor entry.
///
/// Fails with [`Error::AlreadyExists`] when the name is taken.
pub async fn add_profile_vendor<C>(db: &C, name: &str) -> Result<profile_vendor::Model>
where
    C: ConnectionTrait,
{
    if name.trim().is_empty() {
        return Err(Error::NotCreated {
            message: "Profile vendor name cannot be empty".to_string(),
        });
    }

    profile_vendor::ActiveModel {
        name: Set(name.trim().to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| Error::from_insert(e, format!("Profile vendor '{name}'")))
}

/// Looks a vendor up by name.
pub async fn get_profile_vendor_by_name<C>(db: &C, name: &str) -> Result<profile_vendor::Model>
where
    C: ConnectionTrait,
{
    ProfileVendor::find()
        .filter(profile_vendor::Column::Name.eq(name))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM profile vendor with name {name}")))
}

/// Looks a vendor up by id.
pub async fn get_profile_vendor_by_id<C>(db: &C, id: i64) -> Result<profile_vendor::Model>
where
    C: ConnectionTrait,
{
    ProfileVendor::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM profile vendor with id {id}")))
}

/// Returns the existing vendor with this name, creating it when absent.
pub async fn ensure_profile_vendor<C>(db: &C, name: &str) -> Result<profile_vendor::Model>
where
    C: ConnectionTrait,
{
    match add_profile_vendor(db, name).await {
        Ok(created) => Ok(created),
        Err(Error::AlreadyExists { .. }) => get_profile_vendor_by_name(db, name).await,
        Err(e) => Err(e),
    }
}

/// Lists every vendor, ordered by id.
pub async fn list_profile_vendors<C>(db: &C) -> Result<Vec<profile_vendor::Model>>
where
    C: ConnectionTrait,
{
    ProfileVendor::find()
        .order_by_asc(profile_vendor::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Allows a vendor to supply profiles for a registry.
///
/// Both ends must exist. A second call for the same pair fails with
/// [`Error::AlreadyExists`].
pub async fn permit_vendor_for_registry<C>(
    db: &C,
    vendor_id: i64,
    registry_id: i64,
) -> Result<vendor_registry_permission::Model>
where
    C: ConnectionTrait,
{
    get_profile_vendor_by_id(db, vendor_id).await?;
    crate::core::registry::get_registry_by_id(db, registry_id).await?;

    vendor_registry_permission::ActiveModel {
        vendor_id: Set(vendor_id),
        registry_id: Set(registry_id),
    }
    .insert(db)
    .await
    .map_err(|e| {
        Error::from_insert(
            e,
            format!("Permission for vendor {vendor_id} on registry {registry_id}"),
        )
    })
}

/// Succeeds only when the vendor is allowed to supply the registry.
pub async fn check_vendor_permission<C>(db: &C, vendor_id: i64, registry_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    VendorRegistryPermission::find_by_id((vendor_id, registry_id))
        .one(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| Error::Forbidden {
            message: format!(
                "Using SIM profile vendor id {vendor_id} with registry id {registry_id} is not allowed"
            ),
        })
}
