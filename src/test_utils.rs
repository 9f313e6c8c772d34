//! Shared test utilities for the SIM inventory.
//!
//! This module provides common helper functions for setting up test databases,
//! seeding pools with generated SIM data, and in-memory adapters that stand in
//! for the external registry and profile vendor.
#![allow(clippy::unwrap_used)]

use crate::{
    adapters::{AdapterSet, ProfileRelease, ProfileVendorAdapter, RegistryAdapter},
    core::{batch, registry, sim, vendor},
    entities::{self, ProvisionState, RegistryState, VendorState, sim_resource},
    errors::{Error, Result},
};
use async_trait::async_trait;
use sea_orm::{ConnectOptions, DatabaseConnection, Set};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Download host used by the fake vendor in activation codes
pub const TEST_ACTIVATION_HOST: &str = "smdp.test";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database in `dir` with a pool of several
/// connections, so concurrent callers really run on separate connections.
pub async fn setup_file_test_db(dir: &Path) -> Result<DatabaseConnection> {
    let url = format!("sqlite://{}?mode=rwc", dir.join("inventory.sqlite").display());
    let mut options = ConnectOptions::new(url);
    options.max_connections(8).min_connections(2).sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// ICCID of the `serial`-th generated test SIM
#[must_use]
pub fn test_iccid(serial: u32) -> String {
    format!("89470000000000{serial:05}")
}

/// IMSI of the `serial`-th generated test SIM
#[must_use]
pub fn test_imsi(serial: u32) -> String {
    format!("2420171000{serial:05}")
}

/// MSISDN of the `serial`-th generated test SIM
#[must_use]
pub fn test_msisdn(serial: u32) -> String {
    format!("4791{serial:05}")
}

/// EID the fake vendor reports for an ICCID
#[must_use]
pub fn test_eid(iccid: &str) -> String {
    let tail = &iccid[iccid.len().saturating_sub(12)..];
    format!("01010101010101010101{tail}")
}

/// Generates `count` feed records starting at serial `first`.
#[must_use]
pub fn test_records(profile_type: &str, count: u32, first: u32) -> Vec<batch::SimRecord> {
    (first..first + count)
        .map(|serial| batch::SimRecord {
            iccid: test_iccid(serial),
            imsi: test_imsi(serial),
            msisdn: Some(test_msisdn(serial)),
            profile_type: profile_type.to_string(),
        })
        .collect()
}

/// Registry adapter that records calls and can be switched to fail.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    failing: AtomicBool,
    activated: Mutex<Vec<String>>,
    suspended: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// ICCIDs successfully activated, in call order
    pub fn activated(&self) -> Vec<String> {
        self.activated.lock().unwrap().clone()
    }

    /// ICCIDs successfully suspended, in call order
    pub fn suspended(&self) -> Vec<String> {
        self.suspended.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryAdapter for FakeRegistry {
    fn name(&self) -> &str {
        "Foo"
    }

    async fn activate(&self, iccid: &str, _msisdn: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::adapter("Foo", "registry unavailable"));
        }
        self.activated.lock().unwrap().push(iccid.to_string());
        Ok(())
    }

    async fn suspend(&self, iccid: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::adapter("Foo", "registry unavailable"));
        }
        self.suspended.lock().unwrap().push(iccid.to_string());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

/// Profile vendor adapter that hands out deterministic matching ids.
#[derive(Debug)]
pub struct FakeVendor {
    name: String,
    calls: AtomicUsize,
    fail_after: AtomicUsize,
    released: Mutex<Vec<String>>,
}

impl FakeVendor {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            fail_after: AtomicUsize::new(usize::MAX),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Lets the next `successes` calls through and fails every later one.
    pub fn fail_after(&self, successes: usize) {
        let done = self.calls.load(Ordering::SeqCst);
        self.fail_after.store(done + successes, Ordering::SeqCst);
    }

    /// Number of release calls, failed ones included
    pub fn release_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// ICCIDs successfully released, in call order
    pub fn released_iccids(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileVendorAdapter for FakeVendor {
    fn name(&self) -> &str {
        &self.name
    }

    fn activation_host(&self) -> &str {
        TEST_ACTIVATION_HOST
    }

    async fn release(&self, resource: &sim_resource::Model) -> Result<ProfileRelease> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_after.load(Ordering::SeqCst) {
            return Err(Error::adapter(&self.name, "vendor throttled the request"));
        }
        self.released.lock().unwrap().push(resource.iccid.clone());
        Ok(ProfileRelease {
            matching_id: format!("MATCH-{}", resource.iccid),
            eid: Some(test_eid(&resource.iccid)),
        })
    }
}

/// A registry "Foo" and a permitted vendor "Bar", both bound to fakes.
pub struct PoolFixture {
    pub db: DatabaseConnection,
    pub registry: entities::RegistryModel,
    pub vendor: entities::ProfileVendorModel,
    pub registry_adapter: Arc<FakeRegistry>,
    pub vendor_adapter: Arc<FakeVendor>,
    pub adapters: AdapterSet,
}

/// Sets up a database with one registry, one permitted vendor and fake adapters.
pub async fn setup_pool_fixture() -> Result<PoolFixture> {
    setup_pool_fixture_on(setup_test_db().await?).await
}

/// Same as [`setup_pool_fixture`] on a database the caller created.
pub async fn setup_pool_fixture_on(db: DatabaseConnection) -> Result<PoolFixture> {
    let registry = registry::add_registry(&db, "Foo").await?;
    let vendor = vendor::add_profile_vendor(&db, "Bar").await?;
    vendor::permit_vendor_for_registry(&db, vendor.id, registry.id).await?;

    let registry_adapter = Arc::new(FakeRegistry::default());
    let vendor_adapter = Arc::new(FakeVendor::new("Bar"));
    let mut adapters = AdapterSet::new();
    adapters.insert_registry(registry.id, Arc::clone(&registry_adapter) as Arc<dyn RegistryAdapter>);
    adapters.insert_vendor(vendor.id, Arc::clone(&vendor_adapter) as Arc<dyn ProfileVendorAdapter>);

    Ok(PoolFixture {
        db,
        registry,
        vendor,
        registry_adapter,
        vendor_adapter,
        adapters,
    })
}

/// Adds another vendor permitted for the fixture's registry, bound to its own fake.
pub async fn add_vendor_with_adapter(
    fixture: &mut PoolFixture,
    name: &str,
) -> Result<entities::ProfileVendorModel> {
    let added = vendor::add_profile_vendor(&fixture.db, name).await?;
    vendor::permit_vendor_for_registry(&fixture.db, added.id, fixture.registry.id).await?;
    fixture
        .adapters
        .insert_vendor(added.id, Arc::new(FakeVendor::new(name)));
    Ok(added)
}

/// Imports `count` generated SIMs of `profile_type` for the fixture's vendor.
pub async fn import_test_batch(
    fixture: &PoolFixture,
    profile_type: &str,
    count: u32,
    first: u32,
) -> Result<entities::ImportBatchModel> {
    import_test_batch_with_vendor(fixture, fixture.vendor.id, profile_type, count, first).await
}

/// Imports `count` generated SIMs of `profile_type` for the given vendor.
pub async fn import_test_batch_with_vendor(
    fixture: &PoolFixture,
    vendor_id: i64,
    profile_type: &str,
    count: u32,
    first: u32,
) -> Result<entities::ImportBatchModel> {
    batch::import_batch(
        &fixture.db,
        test_records(profile_type, count, first),
        fixture.registry.id,
        vendor_id,
        "test-importer",
    )
    .await
}

/// Opens an import batch without loading anything into it.
pub async fn open_test_batch(fixture: &PoolFixture) -> Result<entities::ImportBatchModel> {
    batch::open_batch(
        &fixture.db,
        "test-importer",
        fixture.registry.id,
        fixture.vendor.id,
    )
    .await
}

/// Builds insertable rows for `count` generated SIMs, bypassing the importer.
#[must_use]
pub fn test_active_models(
    fixture: &PoolFixture,
    batch_id: i64,
    profile_type: &str,
    count: u32,
    first: u32,
) -> Vec<sim_resource::ActiveModel> {
    (first..first + count)
        .map(|serial| sim_resource::ActiveModel {
            iccid: Set(test_iccid(serial)),
            imsi: Set(test_imsi(serial)),
            msisdn: Set(None),
            eid: Set(None),
            profile_type: Set(profile_type.to_string()),
            registry_id: Set(fixture.registry.id),
            vendor_id: Set(fixture.vendor.id),
            batch_id: Set(batch_id),
            registry_state: Set(RegistryState::NotActivated),
            vendor_state: Set(VendorState::Available),
            provision_state: Set(ProvisionState::Available),
            matching_id: Set(None),
            suspended_at: Set(None),
            ..Default::default()
        })
        .collect()
}

/// Marks the first `count` raw SIMs of a pool as released, without a vendor call.
pub async fn release_test_resources(
    fixture: &PoolFixture,
    profile_type: &str,
    count: usize,
) -> Result<()> {
    for _ in 0..count {
        let next = sim::find_next_unprovisioned(&fixture.db, fixture.registry.id, profile_type).await?;
        sim::set_vendor_state_and_matching_id(&fixture.db, next.id, &format!("MATCH-{}", next.iccid))
            .await?;
    }
    Ok(())
}
