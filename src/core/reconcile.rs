//! Reconciliation loop - keeps a buffer of ready-to-use SIMs in every pool.
//!
//! A pool is the set of resources sharing a (registry, profile type) key. For
//! each pool whose ready-to-use count is under the low-water mark, the loop
//! releases up to `max_to_allocate` raw resources through their profile vendor.
//! Pools are handled independently: a vendor outage stops that pool's run and
//! is reported, the remaining pools still get topped up.
//!
//! Re-running after a partial failure is safe. Candidates are always picked
//! among resources still `Available` at the vendor, and the release write is
//! guarded on that state, so a resource is never marked released twice.

use crate::{
    adapters::AdapterSet,
    config::settings::ReconciliationConfig,
    core::{registry, sim},
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use tracing::{debug, error, info, instrument, warn};

/// How one pool's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOutcome {
    /// Enough resources were ready, nothing was released
    AboveLowWater,
    /// The per-run release budget was used up
    Replenished,
    /// No raw stock was left to release
    Exhausted,
    /// A vendor or store call failed; the message is the error text
    Failed(String),
}

/// Result of one pool's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    /// Registry of the pool
    pub registry_id: i64,
    /// Profile type of the pool
    pub profile_type: String,
    /// Ready-to-use count before the run
    pub ready_before: u64,
    /// Resources released by this run
    pub released: u64,
    /// How the run ended
    pub outcome: PoolOutcome,
}

/// Result of one full pass over all pools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// One entry per pool, in registry then profile type order
    pub pools: Vec<PoolReport>,
}

impl ReconcileReport {
    /// Resources released across all pools
    #[must_use]
    pub fn total_released(&self) -> u64 {
        self.pools.iter().map(|p| p.released).sum()
    }

    /// Pools whose run ended in a failure
    #[must_use]
    pub fn failures(&self) -> Vec<&PoolReport> {
        self.pools
            .iter()
            .filter(|p| matches!(p.outcome, PoolOutcome::Failed(_)))
            .collect()
    }
}

/// Runs one pass over every pool of every registry.
///
/// Only failures to enumerate the pools abort the pass; everything that goes
/// wrong inside a pool is recorded in its [`PoolReport`].
#[instrument(skip_all)]
pub async fn reconcile(
    db: &DatabaseConnection,
    adapters: &AdapterSet,
    config: &ReconciliationConfig,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for entry in registry::list_registries(db).await? {
        for profile_type in registry::profile_names_for_registry(db, entry.id).await? {
            let pool = reconcile_pool(db, adapters, config, entry.id, &profile_type).await;
            if let PoolOutcome::Failed(reason) = &pool.outcome {
                error!(
                    registry = %entry.name,
                    profile_type = %profile_type,
                    released = pool.released,
                    reason = %reason,
                    "Pool reconciliation failed"
                );
            }
            report.pools.push(pool);
        }
    }

    info!(
        pools = report.pools.len(),
        released = report.total_released(),
        failed = report.failures().len(),
        "Reconciliation pass finished"
    );
    Ok(report)
}

/// Tops up a single pool.
pub async fn reconcile_pool(
    db: &DatabaseConnection,
    adapters: &AdapterSet,
    config: &ReconciliationConfig,
    registry_id: i64,
    profile_type: &str,
) -> PoolReport {
    let mut report = PoolReport {
        registry_id,
        profile_type: profile_type.to_string(),
        ready_before: 0,
        released: 0,
        outcome: PoolOutcome::Replenished,
    };

    let stats = match sim::get_pool_statistics(db, registry_id, profile_type).await {
        Ok(stats) => stats,
        Err(e) => {
            report.outcome = PoolOutcome::Failed(e.to_string());
            return report;
        }
    };
    report.ready_before = stats.released_available;

    if stats.released_available >= config.low_water_mark {
        debug!(
            registry_id,
            profile_type,
            ready = stats.released_available,
            "Pool above low-water mark"
        );
        report.outcome = PoolOutcome::AboveLowWater;
        return report;
    }

    for _ in 0..config.max_to_allocate {
        match release_next(db, adapters, registry_id, profile_type).await {
            Ok(ReleaseStep::Released) => report.released += 1,
            Ok(ReleaseStep::AlreadyReleased) => {}
            Ok(ReleaseStep::Exhausted) => {
                info!(registry_id, profile_type, "No raw SIM stock left to release");
                report.outcome = PoolOutcome::Exhausted;
                return report;
            }
            Err(e) => {
                report.outcome = PoolOutcome::Failed(e.to_string());
                return report;
            }
        }
    }

    report
}

enum ReleaseStep {
    Released,
    /// Another run released the same resource first
    AlreadyReleased,
    /// No raw stock left in the pool
    Exhausted,
}

/// Releases the next raw resource of the pool.
async fn release_next(
    db: &DatabaseConnection,
    adapters: &AdapterSet,
    registry_id: i64,
    profile_type: &str,
) -> Result<ReleaseStep> {
    let candidate = match sim::find_next_unprovisioned(db, registry_id, profile_type).await {
        Ok(candidate) => candidate,
        Err(Error::NotFound { .. }) => return Ok(ReleaseStep::Exhausted),
        Err(e) => return Err(e),
    };
    let vendor = adapters.vendor(candidate.vendor_id).ok_or_else(|| Error::System {
        message: format!(
            "No profile vendor adapter configured for vendor id {}",
            candidate.vendor_id
        ),
    })?;

    let release = vendor.release(&candidate).await?;

    match sim::set_vendor_state_and_matching_id(db, candidate.id, &release.matching_id).await {
        Ok(_) => {}
        Err(Error::NotUpdated { .. }) => {
            warn!(
                id = candidate.id,
                vendor = vendor.name(),
                "SIM was released by an overlapping run, keeping the first matching id"
            );
            return Ok(ReleaseStep::AlreadyReleased);
        }
        Err(e) => return Err(e),
    }

    if let Some(eid) = release.eid.as_deref() {
        if let Err(e) = sim::set_eid(db, candidate.id, eid).await {
            warn!(id = candidate.id, error = %e, "Vendor reported an EID that could not be stored");
        }
    }

    debug!(id = candidate.id, iccid = %candidate.iccid, "Released SIM profile");
    Ok(ReleaseStep::Released)
}
