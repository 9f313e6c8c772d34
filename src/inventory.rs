//! `SimInventory` - the boundary operations of the inventory in one handle.
//!
//! The facade owns the database connection, the adapter set and the
//! reconciliation tuning. It is cheap to clone and is what the service entry
//! point and the scheduler hold on to.

use crate::{
    adapters::{AdapterSet, Es2PlusAdapter, HttpRegistryAdapter},
    config::settings::{ReconciliationConfig, Settings},
    core::{
        allocation::{self, SimDetails},
        batch::{self, SimRecord},
        reconcile::{self, ReconcileReport},
        registry,
        sim::{self, PoolStatistics},
        vendor,
    },
    entities::{ImportBatchModel, RegistryModel},
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handle on the store and the external services.
#[derive(Debug, Clone)]
pub struct SimInventory {
    db: DatabaseConnection,
    adapters: AdapterSet,
    reconciliation: ReconciliationConfig,
}

impl SimInventory {
    /// Wraps an initialized database and a bound adapter set.
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        adapters: AdapterSet,
        reconciliation: ReconciliationConfig,
    ) -> Self {
        Self {
            db,
            adapters,
            reconciliation,
        }
    }

    /// Registers every configured registry, vendor and permission in the store
    /// and binds an HTTP adapter to each. Safe to run on every start.
    pub async fn from_settings(db: DatabaseConnection, settings: &Settings) -> Result<Self> {
        let mut adapters = AdapterSet::new();

        for config in &settings.registries {
            let stored = registry::ensure_registry(&db, &config.name).await?;
            adapters.insert_registry(stored.id, Arc::new(HttpRegistryAdapter::new(config)?));
            debug!(registry = %stored.name, id = stored.id, "Registry adapter bound");
        }

        for config in &settings.profile_vendors {
            let stored = vendor::ensure_profile_vendor(&db, &config.name).await?;
            adapters.insert_vendor(stored.id, Arc::new(Es2PlusAdapter::new(config)?));
            debug!(vendor = %stored.name, id = stored.id, "Profile vendor adapter bound");
        }

        for permission in &settings.permissions {
            let registry_row = registry::get_registry_by_name(&db, &permission.registry).await?;
            let vendor_row = vendor::get_profile_vendor_by_name(&db, &permission.vendor).await?;
            match vendor::permit_vendor_for_registry(&db, vendor_row.id, registry_row.id).await {
                Ok(_) | Err(Error::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            registries = settings.registries.len(),
            vendors = settings.profile_vendors.len(),
            permissions = settings.permissions.len(),
            "Inventory configured"
        );
        Ok(Self::new(db, adapters, settings.reconciliation))
    }

    /// Connection shared by every operation
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Adapters keyed by registry and vendor id
    #[must_use]
    pub const fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Tuning used by [`Self::reconcile`]
    #[must_use]
    pub const fn reconciliation(&self) -> &ReconciliationConfig {
        &self.reconciliation
    }

    /// Loads a SIM data feed as one all-or-nothing batch.
    pub async fn import_batch(
        &self,
        records: Vec<SimRecord>,
        registry_id: i64,
        vendor_id: i64,
        importer: &str,
    ) -> Result<ImportBatchModel> {
        batch::import_batch(&self.db, records, registry_id, vendor_id, importer).await
    }

    /// Claims the next ready-to-use SIM of a pool and activates it.
    pub async fn allocate_next(
        &self,
        registry_id: i64,
        profile_type: &str,
        msisdn: &str,
    ) -> Result<SimDetails> {
        allocation::allocate_next(&self.db, &self.adapters, registry_id, profile_type, msisdn).await
    }

    /// Suspends a SIM with its registry.
    pub async fn release_resource(&self, iccid: &str) -> Result<SimDetails> {
        allocation::release_resource(&self.db, &self.adapters, iccid).await
    }

    /// Retries activation of a claimed SIM.
    pub async fn activate_by_iccid(
        &self,
        registry_id: i64,
        iccid: &str,
        msisdn: Option<&str>,
    ) -> Result<SimDetails> {
        allocation::activate_by_iccid(&self.db, &self.adapters, registry_id, iccid, msisdn).await
    }

    /// Looks a SIM up by ICCID, with its activation code.
    pub async fn get_by_iccid(&self, iccid: &str) -> Result<SimDetails> {
        let resource = sim::get_by_iccid(&self.db, iccid).await?;
        Ok(SimDetails::describe(&self.adapters, resource))
    }

    /// Counts for one (registry, profile type) pool.
    pub async fn pool_stats(&self, registry_id: i64, profile_type: &str) -> Result<PoolStatistics> {
        sim::get_pool_statistics(&self.db, registry_id, profile_type).await
    }

    /// Claimed SIMs the registry never confirmed.
    pub async fn pending_activations(&self, registry_id: i64) -> Result<Vec<SimDetails>> {
        Ok(sim::find_pending_activation(&self.db, registry_id)
            .await?
            .into_iter()
            .map(|resource| SimDetails::describe(&self.adapters, resource))
            .collect())
    }

    /// Every registry, ordered by id.
    pub async fn list_registries(&self) -> Result<Vec<RegistryModel>> {
        registry::list_registries(&self.db).await
    }

    /// Profile types stocked for a registry.
    pub async fn profile_names(&self, registry_id: i64) -> Result<Vec<String>> {
        registry::profile_names_for_registry(&self.db, registry_id).await
    }

    /// Looks an import batch up by id.
    pub async fn get_batch(&self, batch_id: i64) -> Result<ImportBatchModel> {
        batch::get_batch(&self.db, batch_id).await
    }

    /// Health of every bound registry adapter, as (name, healthy) in registry id order.
    pub async fn registry_health(&self) -> Vec<(String, bool)> {
        let mut health = Vec::new();
        for registry_id in self.adapters.registry_ids() {
            if let Some(adapter) = self.adapters.registry(registry_id) {
                let healthy = adapter.health_check().await;
                health.push((adapter.name().to_string(), healthy));
            }
        }
        health
    }

    /// Runs one reconciliation pass over every pool.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        reconcile::reconcile(&self.db, &self.adapters, &self.reconciliation).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::settings::{PermissionConfig, ProfileVendorConfig, RegistryConfig};
    use crate::entities::{ProvisionState, RegistryState, VendorState};
    use crate::test_utils::*;

    fn inventory(fixture: &PoolFixture, max_to_allocate: u64) -> SimInventory {
        SimInventory::new(
            fixture.db.clone(),
            fixture.adapters.clone(),
            ReconciliationConfig {
                interval_secs: 60,
                low_water_mark: 50,
                max_to_allocate,
            },
        )
    }

    #[tokio::test]
    async fn test_import_reconcile_allocate_scenario() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        let inventory = inventory(&fixture, 10);

        let batch = inventory
            .import_batch(
                test_records("P1", 100, 0),
                fixture.registry.id,
                fixture.vendor.id,
                "importer",
            )
            .await?;
        assert_eq!(batch.size, 100);

        inventory.reconcile().await?;
        let stats = inventory.pool_stats(fixture.registry.id, "P1").await?;
        assert_eq!(stats.released_available, 10);
        assert_eq!(stats.unallocated, 90);

        let details = inventory
            .allocate_next(fixture.registry.id, "P1", "4790000001")
            .await?;
        assert_eq!(details.resource.provision_state, ProvisionState::Provisioned);
        assert_eq!(details.resource.registry_state, RegistryState::Activated);
        let code = details.activation_code.clone().unwrap();
        assert!(code.starts_with(&format!("LPA:{TEST_ACTIVATION_HOST}:")));
        assert!(code.len() > format!("LPA:{TEST_ACTIVATION_HOST}:").len());

        let stats = inventory.pool_stats(fixture.registry.id, "P1").await?;
        assert_eq!(stats.released_available, 9);
        assert_eq!(stats.provisioned, 1);

        let fetched = inventory.get_by_iccid(&details.resource.iccid).await?;
        assert_eq!(fetched, details);
        Ok(())
    }

    #[tokio::test]
    async fn test_two_reconcile_runs_release_min_of_budget_and_stock() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        let inventory = inventory(&fixture, 4);
        import_test_batch(&fixture, "P1", 6, 0).await?;

        inventory.reconcile().await?;
        inventory.reconcile().await?;

        let stats = inventory.pool_stats(fixture.registry.id, "P1").await?;
        assert_eq!(stats.released_available, 6);
        assert_eq!(fixture.vendor_adapter.released_iccids().len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_activation_is_listed_pending() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        let inventory = inventory(&fixture, 2);
        import_test_batch(&fixture, "P1", 2, 0).await?;
        inventory.reconcile().await?;

        fixture.registry_adapter.set_failing(true);
        let result = inventory
            .allocate_next(fixture.registry.id, "P1", "4790000001")
            .await;
        assert!(matches!(result, Err(Error::Adapter { .. })));

        let pending = inventory.pending_activations(fixture.registry.id).await?;
        assert_eq!(pending.len(), 1);
        let iccid = pending[0].resource.iccid.clone();

        fixture.registry_adapter.set_failing(false);
        let retried = inventory
            .activate_by_iccid(fixture.registry.id, &iccid, None)
            .await?;
        assert_eq!(retried.resource.registry_state, RegistryState::Activated);
        assert_eq!(retried.resource.msisdn.as_deref(), Some("4790000001"));
        assert!(inventory.pending_activations(fixture.registry.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_release_resource_suspends() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        let inventory = inventory(&fixture, 1);
        import_test_batch(&fixture, "P1", 1, 0).await?;
        inventory.reconcile().await?;

        let allocated = inventory
            .allocate_next(fixture.registry.id, "P1", "4790000001")
            .await?;
        let released = inventory.release_resource(&allocated.resource.iccid).await?;
        assert_eq!(released.resource.registry_state, RegistryState::NotActivated);
        assert_eq!(released.resource.provision_state, ProvisionState::Provisioned);
        assert_eq!(released.resource.vendor_state, VendorState::Released);
        assert_eq!(
            fixture.registry_adapter.suspended(),
            vec![allocated.resource.iccid.clone()]
        );
        assert!(inventory.pending_activations(fixture.registry.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_lookups() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        let inventory = inventory(&fixture, 1);
        let batch = import_test_batch(&fixture, "P2", 1, 0).await?;
        import_test_batch(&fixture, "P1", 1, 10).await?;

        let registries = inventory.list_registries().await?;
        assert_eq!(registries.len(), 1);
        assert_eq!(registries[0].name, "Foo");
        assert_eq!(
            inventory.profile_names(fixture.registry.id).await?,
            vec!["P1".to_string(), "P2".to_string()]
        );
        assert_eq!(inventory.get_batch(batch.id).await?, batch);

        // not yet released, so no activation code
        let details = inventory.get_by_iccid(&test_iccid(0)).await?;
        assert!(details.activation_code.is_none());
        assert!(matches!(
            inventory.get_by_iccid("nope").await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_registry_health() -> Result<()> {
        let fixture = setup_pool_fixture().await?;
        let inventory = inventory(&fixture, 1);
        assert_eq!(inventory.registry_health().await, vec![("Foo".to_string(), true)]);

        fixture.registry_adapter.set_failing(true);
        assert_eq!(inventory.registry_health().await, vec![("Foo".to_string(), false)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_from_settings_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = Settings {
            registries: vec![RegistryConfig {
                name: "Foo".to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                api_key: "key".to_string(),
                user_id: "inventory".to_string(),
                timeout_secs: 1,
            }],
            profile_vendors: vec![ProfileVendorConfig {
                name: "Bar".to_string(),
                es2plus_endpoint: "http://127.0.0.1:9".to_string(),
                activation_host: "smdp.example.com".to_string(),
                requester_id: "inventory".to_string(),
                timeout_secs: 1,
            }],
            permissions: vec![PermissionConfig {
                vendor: "Bar".to_string(),
                registry: "Foo".to_string(),
            }],
            reconciliation: ReconciliationConfig::default(),
        };

        let first = SimInventory::from_settings(db.clone(), &settings).await?;
        let second = SimInventory::from_settings(db.clone(), &settings).await?;
        assert_eq!(first.adapters().registry_ids(), second.adapters().registry_ids());

        let registry = registry::get_registry_by_name(&db, "Foo").await?;
        let vendor = vendor::get_profile_vendor_by_name(&db, "Bar").await?;
        vendor::check_vendor_permission(&db, vendor.id, registry.id).await?;
        assert_eq!(second.list_registries().await?.len(), 1);
        assert_eq!(*second.reconciliation(), ReconciliationConfig::default());
        Ok(())
    }
}
