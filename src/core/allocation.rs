//! Allocation flow - claim a ready-to-use SIM and activate it with its registry.
//!
//! Claiming and activating are split into three steps so no store transaction
//! is held open across a network call:
//!
//! 1. atomic claim in the store ([`sim::find_next_ready_to_use`])
//! 2. unguarded registry call
//! 3. a second store update recording the registry outcome
//!
//! If step 2 fails, or the process dies before step 3, the resource stays
//! claimed with `registry_state = NotActivated`. That state is reported, never
//! undone automatically: unclaiming would race with other allocations. The
//! rows are listed by [`sim::find_pending_activation`] and can be retried with
//! [`activate_by_iccid`].

use crate::{
    adapters::{AdapterSet, RegistryAdapter},
    core::sim,
    entities::{ProvisionState, RegistryState, VendorState, sim_resource},
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// A SIM resource as returned to callers, with its derived activation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimDetails {
    /// Stored row
    #[serde(flatten)]
    pub resource: sim_resource::Model,
    /// `LPA:{host}:{matching_id}`, present once the profile is released
    pub activation_code: Option<String>,
}

impl SimDetails {
    /// Attaches the activation code using the resource's vendor adapter.
    #[must_use]
    pub fn describe(adapters: &AdapterSet, resource: sim_resource::Model) -> Self {
        let activation_code = adapters
            .vendor(resource.vendor_id)
            .and_then(|vendor| vendor.activation_code(&resource));
        Self {
            resource,
            activation_code,
        }
    }
}

fn registry_adapter(adapters: &AdapterSet, registry_id: i64) -> Result<Arc<dyn RegistryAdapter>> {
    adapters.registry(registry_id).ok_or_else(|| {
        Error::not_found(format!("No registry adapter configured for registry id {registry_id}"))
    })
}

/// Claims the next ready-to-use SIM of a pool and activates it.
///
/// Fails with [`Error::NotFound`] once the pool has nothing ready, leaving it
/// unchanged. If the registry call fails the claimed resource keeps its claim
/// and the adapter error is returned.
#[instrument(skip(db, adapters))]
pub async fn allocate_next(
    db: &DatabaseConnection,
    adapters: &AdapterSet,
    registry_id: i64,
    profile_type: &str,
    msisdn: &str,
) -> Result<SimDetails> {
    let registry = registry_adapter(adapters, registry_id)?;
    if msisdn.trim().is_empty() {
        return Err(Error::not_updated("Allocation requires an MSISDN"));
    }

    let claimed = sim::find_next_ready_to_use(db, registry_id, profile_type).await?;
    let claimed = sim::set_msisdn(db, claimed.id, msisdn).await?;

    if let Err(e) = registry.activate(&claimed.iccid, msisdn).await {
        error!(
            id = claimed.id,
            iccid = %claimed.iccid,
            error = %e,
            "Claimed SIM could not be activated, left pending activation"
        );
        return Err(e);
    }

    let activated = sim::set_registry_state(db, claimed.id, RegistryState::Activated).await?;
    info!(id = activated.id, iccid = %activated.iccid, "Allocated SIM");
    Ok(SimDetails::describe(adapters, activated))
}

/// Activates a specific SIM with its registry.
///
/// This is the operator retry path for resources left pending activation or
/// suspended earlier. Only claimed resources are accepted: activating one still
/// in the ready pool would let the next allocation hand out a live SIM. The
/// MSISDN defaults to the one stored on the resource.
#[instrument(skip(db, adapters))]
pub async fn activate_by_iccid(
    db: &DatabaseConnection,
    adapters: &AdapterSet,
    registry_id: i64,
    iccid: &str,
    msisdn: Option<&str>,
) -> Result<SimDetails> {
    let resource = sim::get_by_iccid(db, iccid).await?;
    if resource.registry_id != registry_id {
        return Err(Error::not_found(format!(
            "Found no SIM for ICCID {iccid} in registry id {registry_id}"
        )));
    }
    if resource.vendor_state != VendorState::Released {
        return Err(Error::not_updated(format!(
            "SIM with ICCID {iccid} has no released profile and cannot be activated"
        )));
    }
    if resource.provision_state != ProvisionState::Provisioned {
        return Err(Error::not_updated(format!(
            "SIM with ICCID {iccid} has not been allocated and cannot be activated"
        )));
    }

    let msisdn = match msisdn.filter(|m| !m.trim().is_empty()) {
        Some(m) => m.to_string(),
        None => resource.msisdn.clone().ok_or_else(|| {
            Error::not_updated(format!("SIM with ICCID {iccid} has no MSISDN to activate with"))
        })?,
    };

    let registry = registry_adapter(adapters, registry_id)?;
    if resource.msisdn.as_deref() != Some(msisdn.as_str()) {
        sim::set_msisdn(db, resource.id, &msisdn).await?;
    }
    registry.activate(&resource.iccid, &msisdn).await?;

    let activated = sim::set_registry_state(db, resource.id, RegistryState::Activated).await?;
    info!(id = activated.id, "Activated SIM with registry");
    Ok(SimDetails::describe(adapters, activated))
}

/// Suspends a SIM with its registry and records the suspension.
///
/// The claim is kept: a suspended resource is never handed out again. It is
/// not listed as pending activation, but can be reactivated explicitly with
/// [`activate_by_iccid`].
#[instrument(skip(db, adapters))]
pub async fn release_resource(
    db: &DatabaseConnection,
    adapters: &AdapterSet,
    iccid: &str,
) -> Result<SimDetails> {
    let resource = sim::get_by_iccid(db, iccid).await?;
    let registry = registry_adapter(adapters, resource.registry_id)?;

    if resource.registry_state == RegistryState::NotActivated {
        warn!(id = resource.id, "Suspending a SIM the registry never activated");
    }
    registry.suspend(&resource.iccid).await?;

    let suspended = sim::mark_suspended(db, resource.id).await?;
    info!(id = suspended.id, "Suspended SIM with registry");
    Ok(SimDetails::describe(adapters, suspended))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_allocate_next_activates() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        import_test_batch(&fixture, "P1", 3, 0).await?;
        release_test_resources(&fixture, "P1", 2).await?;

        let details =
            allocate_next(&fixture.db, &fixture.adapters, fixture.registry.id, "P1", "4790000001")
                .await?;

        let resource = &details.resource;
        assert_eq!(resource.provision_state, ProvisionState::Provisioned);
        assert_eq!(resource.registry_state, RegistryState::Activated);
        assert_eq!(resource.vendor_state, VendorState::Released);
        assert_eq!(resource.msisdn.as_deref(), Some("4790000001"));
        assert_eq!(
            details.activation_code,
            Some(format!(
                "LPA:{TEST_ACTIVATION_HOST}:{}",
                resource.matching_id.clone().unwrap()
            ))
        );
        assert_eq!(fixture.registry_adapter.activated(), vec![resource.iccid.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_allocate_next_exhausted() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        import_test_batch(&fixture, "P1", 2, 0).await?;

        let before = sim::get_pool_statistics(&fixture.db, fixture.registry.id, "P1").await?;
        let result =
            allocate_next(&fixture.db, &fixture.adapters, fixture.registry.id, "P1", "4790000001")
                .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));

        let after = sim::get_pool_statistics(&fixture.db, fixture.registry.id, "P1").await?;
        assert_eq!(before, after);
        assert!(fixture.registry_adapter.activated().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_activation_failure_keeps_claim() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        import_test_batch(&fixture, "P1", 2, 0).await?;
        release_test_resources(&fixture, "P1", 2).await?;
        fixture.registry_adapter.set_failing(true);

        let result =
            allocate_next(&fixture.db, &fixture.adapters, fixture.registry.id, "P1", "4790000001")
                .await;
        assert!(matches!(result, Err(Error::Adapter { .. })));

        let pending = sim::find_pending_activation(&fixture.db, fixture.registry.id).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].provision_state, ProvisionState::Provisioned);

        let stats = sim::get_pool_statistics(&fixture.db, fixture.registry.id, "P1").await?;
        assert_eq!(stats.provisioned, 1);
        assert_eq!(stats.released_available, 1);

        // operator retry with the stored MSISDN
        fixture.registry_adapter.set_failing(false);
        let retried = activate_by_iccid(
            &fixture.db,
            &fixture.adapters,
            fixture.registry.id,
            &pending[0].iccid,
            None,
        )
        .await?;
        assert_eq!(retried.resource.registry_state, RegistryState::Activated);
        assert!(
            sim::find_pending_activation(&fixture.db, fixture.registry.id)
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        import_test_batch(&fixture, "P1", 10, 0).await?;
        release_test_resources(&fixture, "P1", 8).await?;

        let mut handles = Vec::new();
        for n in 0..8 {
            let db = fixture.db.clone();
            let adapters = fixture.adapters.clone();
            let registry_id = fixture.registry.id;
            handles.push(tokio::spawn(async move {
                allocate_next(&db, &adapters, registry_id, "P1", &format!("47900000{n:02}")).await
            }));
        }

        let mut iccids = HashSet::new();
        for handle in handles {
            let details = handle.await.unwrap()?;
            assert!(iccids.insert(details.resource.iccid));
        }
        assert_eq!(iccids.len(), 8);

        let stats = sim::get_pool_statistics(&fixture.db, fixture.registry.id, "P1").await?;
        assert_eq!(stats.provisioned, 8);
        assert_eq!(stats.released_available, 0);

        let result =
            allocate_next(&fixture.db, &fixture.adapters, fixture.registry.id, "P1", "4790000099")
                .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_activate_by_iccid_rules() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        import_test_batch(&fixture, "P1", 2, 0).await?;

        // raw stock cannot be activated
        let result = activate_by_iccid(
            &fixture.db,
            &fixture.adapters,
            fixture.registry.id,
            &test_iccid(0),
            Some("4790000001"),
        )
        .await;
        assert!(matches!(result, Err(Error::NotUpdated { .. })));

        // wrong registry
        let result = activate_by_iccid(
            &fixture.db,
            &fixture.adapters,
            fixture.registry.id + 1,
            &test_iccid(0),
            Some("4790000001"),
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));

        // released but still in the ready pool
        release_test_resources(&fixture, "P1", 1).await?;
        let result = activate_by_iccid(
            &fixture.db,
            &fixture.adapters,
            fixture.registry.id,
            &test_iccid(0),
            Some("4790000001"),
        )
        .await;
        assert!(matches!(result, Err(Error::NotUpdated { .. })));
        assert!(fixture.registry_adapter.activated().is_empty());

        let untouched = sim::get_by_iccid(&fixture.db, &test_iccid(0)).await?;
        assert_eq!(untouched.registry_state, RegistryState::NotActivated);
        assert_eq!(untouched.provision_state, ProvisionState::Available);

        // the next allocation gets it exactly once
        let allocated =
            allocate_next(&fixture.db, &fixture.adapters, fixture.registry.id, "P1", "4790000002")
                .await?;
        assert_eq!(allocated.resource.iccid, test_iccid(0));
        assert_eq!(fixture.registry_adapter.activated(), vec![test_iccid(0)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_resource_suspends() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        import_test_batch(&fixture, "P1", 1, 0).await?;
        release_test_resources(&fixture, "P1", 1).await?;
        let allocated =
            allocate_next(&fixture.db, &fixture.adapters, fixture.registry.id, "P1", "4790000001")
                .await?;

        let released =
            release_resource(&fixture.db, &fixture.adapters, &allocated.resource.iccid).await?;
        assert_eq!(released.resource.registry_state, RegistryState::NotActivated);
        assert_eq!(released.resource.provision_state, ProvisionState::Provisioned);
        assert_eq!(
            fixture.registry_adapter.suspended(),
            vec![allocated.resource.iccid.clone()]
        );
        assert!(released.resource.suspended_at.is_some());
        assert!(!released.resource.is_pending_activation());

        // a deliberate suspension is not an inconsistency to retry
        assert!(
            sim::find_pending_activation(&fixture.db, fixture.registry.id)
                .await?
                .is_empty()
        );

        // explicit reactivation clears the suspension
        let reactivated = activate_by_iccid(
            &fixture.db,
            &fixture.adapters,
            fixture.registry.id,
            &allocated.resource.iccid,
            None,
        )
        .await?;
        assert_eq!(reactivated.resource.registry_state, RegistryState::Activated);
        assert!(reactivated.resource.suspended_at.is_none());

        assert!(matches!(
            release_resource(&fixture.db, &fixture.adapters, "0000").await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }
}
