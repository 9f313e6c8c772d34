//! Registry entries - one per configured subscriber registry endpoint.

use crate::{
    entities::{Registry, SimResource, registry, sim_resource},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};

/// Stores a new registry entry.
///
/// Fails with [`Error::AlreadyExists`] when the name is taken.
pub async fn add_registry<C>(db: &C, name: &str) -> Result<registry::Model>
where
    C: ConnectionTrait,
{
    if name.trim().is_empty() {
        return Err(Error::NotCreated {
            message: "Registry name cannot be empty".to_string(),
        });
    }

    registry::ActiveModel {
        name: Set(name.trim().to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| Error::from_insert(e, format!("Registry '{name}'")))
}

/// Looks a registry up by name.
pub async fn get_registry_by_name<C>(db: &C, name: &str) -> Result<registry::Model>
where
    C: ConnectionTrait,
{
    Registry::find()
        .filter(registry::Column::Name.eq(name))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no registry with name {name}")))
}

/// Looks a registry up by id.
pub async fn get_registry_by_id<C>(db: &C, id: i64) -> Result<registry::Model>
where
    C: ConnectionTrait,
{
    Registry::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no registry with id {id}")))
}

/// Returns the existing registry with this name, creating it when absent.
pub async fn ensure_registry<C>(db: &C, name: &str) -> Result<registry::Model>
where
    C: ConnectionTrait,
{
    match add_registry(db, name).await {
        Ok(created) => Ok(created),
        Err(Error::AlreadyExists { .. }) => get_registry_by_name(db, name).await,
        Err(e) => Err(e),
    }
}

/// Lists every registry, ordered by id.
pub async fn list_registries<C>(db: &C) -> Result<Vec<registry::Model>>
where
    C: ConnectionTrait,
{
    Registry::find()
        .order_by_asc(registry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Distinct profile types present in a registry's pool, in name order.
pub async fn profile_names_for_registry<C>(db: &C, registry_id: i64) -> Result<Vec<String>>
where
    C: ConnectionTrait,
{
    SimResource::find()
        .select_only()
        .column(sim_resource::Column::ProfileType)
        .filter(sim_resource::Column::RegistryId.eq(registry_id))
        .distinct()
        .order_by_asc(sim_resource::Column::ProfileType)
        .into_tuple::<String>()
        .all(db)
        .await
        .map_err(Into::into)
}
