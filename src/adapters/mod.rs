//! Adapters for the two external services the inventory depends on.
//!
//! Each configured registry and profile vendor gets one adapter instance. The
//! adapters never retry: a failed or timed-out call surfaces as
//! [`crate::errors::Error::Adapter`] and the caller decides what happens next.

/// Profile vendor (SM-DP+) adapter
pub mod profile_vendor;
/// Subscriber registry (HSS) adapter
pub mod registry;

pub use profile_vendor::{Es2PlusAdapter, ProfileRelease, ProfileVendorAdapter};
pub use registry::{HttpRegistryAdapter, RegistryAdapter};

use std::collections::HashMap;
use std::sync::Arc;

/// Adapter instances keyed by the id of their row in the store.
#[derive(Clone, Default)]
pub struct AdapterSet {
    registries: HashMap<i64, Arc<dyn RegistryAdapter>>,
    vendors: HashMap<i64, Arc<dyn ProfileVendorAdapter>>,
}

impl AdapterSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a registry adapter to the registry row `registry_id`.
    pub fn insert_registry(&mut self, registry_id: i64, adapter: Arc<dyn RegistryAdapter>) {
        self.registries.insert(registry_id, adapter);
    }

    /// Binds a vendor adapter to the profile vendor row `vendor_id`.
    pub fn insert_vendor(&mut self, vendor_id: i64, adapter: Arc<dyn ProfileVendorAdapter>) {
        self.vendors.insert(vendor_id, adapter);
    }

    /// Adapter bound to a registry row
    #[must_use]
    pub fn registry(&self, registry_id: i64) -> Option<Arc<dyn RegistryAdapter>> {
        self.registries.get(&registry_id).map(Arc::clone)
    }

    /// Adapter bound to a profile vendor row
    #[must_use]
    pub fn vendor(&self, vendor_id: i64) -> Option<Arc<dyn ProfileVendorAdapter>> {
        self.vendors.get(&vendor_id).map(Arc::clone)
    }

    /// Registry ids with a bound adapter, ascending.
    #[must_use]
    pub fn registry_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.registries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("registries", &self.registry_ids())
            .field("vendors", &self.vendors.keys().collect::<Vec<_>>())
            .finish()
    }
}
