//! SIM resource store - lookups, guarded state updates and the atomic claim.
//!
//! Every mutation here is a single guarded `UPDATE` (or a short transaction)
//! whose `WHERE` clause encodes the state-axis ordering, so a row can never reach
//! `Provisioned` while its profile is still `Available` at the vendor. A guarded
//! update that matches an existing row but changes nothing reports
//! [`Error::NotUpdated`]; one that targets a missing row reports
//! [`Error::NotFound`].

use crate::{
    entities::{ProvisionState, RegistryState, SimResource, VendorState, sim_resource},
    errors::{Error, Result},
};
use sea_orm::sea_query::{Condition, Expr};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, RuntimeErr, TransactionTrait, prelude::*, sqlx};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Rows per `INSERT` statement when bulk loading
const INSERT_CHUNK_SIZE: usize = 200;

/// Attempts before giving up on a claim that keeps losing races
const MAX_CLAIM_ATTEMPTS: usize = 32;

/// Pause after a busy store, multiplied by the attempt number
const CLAIM_BACKOFF: Duration = Duration::from_millis(5);

/// Key numbers for one (registry, profile type) pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStatistics {
    /// Every resource in the pool
    pub total: u64,
    /// Raw stock: `vendor_state = Available`
    pub unallocated: u64,
    /// Ready to use: `vendor_state = Released` and not claimed
    pub released_available: u64,
    /// Claimed
    pub provisioned: u64,
}

/// Looks a SIM up by store id.
pub async fn get_by_id<C>(db: &C, id: i64) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    SimResource::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM for id {id}")))
}

/// Looks a SIM up by ICCID.
pub async fn get_by_iccid<C>(db: &C, iccid: &str) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    SimResource::find()
        .filter(sim_resource::Column::Iccid.eq(iccid))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM for ICCID {iccid}")))
}

/// Lowest-id SIM carrying this IMSI.
pub async fn get_by_imsi<C>(db: &C, imsi: &str) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    SimResource::find()
        .filter(sim_resource::Column::Imsi.eq(imsi))
        .order_by_asc(sim_resource::Column::Id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM for IMSI {imsi}")))
}

/// Lowest-id SIM assigned this MSISDN.
pub async fn get_by_msisdn<C>(db: &C, msisdn: &str) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    SimResource::find()
        .filter(sim_resource::Column::Msisdn.eq(msisdn))
        .order_by_asc(sim_resource::Column::Id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM for MSISDN {msisdn}")))
}

fn pool_filter(registry_id: i64, profile_type: &str) -> Condition {
    Condition::all()
        .add(sim_resource::Column::RegistryId.eq(registry_id))
        .add(sim_resource::Column::ProfileType.eq(profile_type))
}

/// Picks the lowest-id resource of the pool whose profile is not yet released.
///
/// The row is not touched; the reconciliation loop uses it as a release
/// candidate.
pub async fn find_next_unprovisioned<C>(
    db: &C,
    registry_id: i64,
    profile_type: &str,
) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    SimResource::find()
        .filter(pool_filter(registry_id, profile_type))
        .filter(sim_resource::Column::VendorState.eq(VendorState::Available))
        .order_by_asc(sim_resource::Column::Id)
        .one(db)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "No unprovisioned SIM available for registry id {registry_id} and profile {profile_type}"
            ))
        })
}

/// Claims the lowest-id ready-to-use resource of the pool.
///
/// Selection and claim run in one transaction: the candidate is read with an
/// exclusive row lock where the backend supports one, and the claim itself is
/// an `UPDATE` guarded on `provision_state = Available`. If another process
/// claimed the row first the update affects nothing, the transaction is rolled
/// back and the next candidate is tried. A write lock held by another
/// connection is treated the same way, after a short pause. Concurrent callers
/// therefore never receive the same resource.
pub async fn find_next_ready_to_use(
    db: &DatabaseConnection,
    registry_id: i64,
    profile_type: &str,
) -> Result<sim_resource::Model> {
    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        match try_claim(db, registry_id, profile_type).await {
            Ok(ClaimAttempt::Claimed(resource)) => {
                debug!(id = resource.id, iccid = %resource.iccid, "Claimed SIM resource");
                return Ok(resource);
            }
            Ok(ClaimAttempt::Empty) => {
                return Err(Error::not_found(format!(
                    "No ready to use SIM available for registry id {registry_id} and profile {profile_type}"
                )));
            }
            Ok(ClaimAttempt::Lost(id)) => {
                warn!(id, attempt, "Lost claim race on SIM resource, retrying");
            }
            Err(Error::Database(e)) if is_lock_contention(&e) => {
                debug!(attempt, error = %e, "Store busy while claiming, retrying");
                tokio::time::sleep(CLAIM_BACKOFF * u32::try_from(attempt).unwrap_or(u32::MAX)).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::System {
        message: format!(
            "Gave up claiming a SIM for registry id {registry_id} and profile {profile_type} after {MAX_CLAIM_ATTEMPTS} attempts"
        ),
    })
}

enum ClaimAttempt {
    Claimed(sim_resource::Model),
    /// Nothing ready in the pool
    Empty,
    /// Another caller claimed the candidate with this id first
    Lost(i64),
}

async fn try_claim(
    db: &DatabaseConnection,
    registry_id: i64,
    profile_type: &str,
) -> Result<ClaimAttempt> {
    let txn = db.begin().await?;

    let candidate = SimResource::find()
        .filter(pool_filter(registry_id, profile_type))
        .filter(sim_resource::Column::VendorState.eq(VendorState::Released))
        .filter(sim_resource::Column::ProvisionState.eq(ProvisionState::Available))
        .order_by_asc(sim_resource::Column::Id)
        .lock_exclusive()
        .one(&txn)
        .await?;

    let Some(candidate) = candidate else {
        txn.rollback().await?;
        return Ok(ClaimAttempt::Empty);
    };

    let claimed = SimResource::update_many()
        .col_expr(
            sim_resource::Column::ProvisionState,
            Expr::value(ProvisionState::Provisioned),
        )
        .filter(sim_resource::Column::Id.eq(candidate.id))
        .filter(sim_resource::Column::VendorState.eq(VendorState::Released))
        .filter(sim_resource::Column::ProvisionState.eq(ProvisionState::Available))
        .exec(&txn)
        .await?;

    if claimed.rows_affected != 1 {
        txn.rollback().await?;
        return Ok(ClaimAttempt::Lost(candidate.id));
    }

    let resource = get_by_id(&txn, candidate.id).await?;
    txn.commit().await?;
    Ok(ClaimAttempt::Claimed(resource))
}

/// `SQLITE_BUSY` or `SQLITE_LOCKED`: another connection holds the write lock.
fn is_lock_contention(err: &DbErr) -> bool {
    let (DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
    | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e)))) = err
    else {
        return false;
    };
    e.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

/// Turns the affected-row count of a guarded update into the updated row,
/// [`Error::NotFound`] or [`Error::NotUpdated`].
async fn finish_update<C>(
    db: &C,
    id: i64,
    rows_affected: u64,
    what: &str,
) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let resource = SimResource::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found(format!("Found no SIM for id {id}, update of {what} failed")))?;

    if rows_affected == 0 {
        return Err(Error::not_updated(format!(
            "Update of {what} for SIM id {id} was rejected by its current state"
        )));
    }
    Ok(resource)
}

/// Records the embedded-SIM identity. The EID is write-once: setting the value
/// already stored succeeds, setting a different one fails with
/// [`Error::NotUpdated`].
pub async fn set_eid<C>(db: &C, id: i64, eid: &str) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let result = SimResource::update_many()
        .col_expr(sim_resource::Column::Eid, Expr::value(eid))
        .filter(sim_resource::Column::Id.eq(id))
        .filter(
            Condition::any()
                .add(sim_resource::Column::Eid.is_null())
                .add(sim_resource::Column::Eid.eq(eid)),
        )
        .exec(db)
        .await?;
    finish_update(db, id, result.rows_affected, "EID").await
}

/// Assigns the subscriber number.
pub async fn set_msisdn<C>(db: &C, id: i64, msisdn: &str) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let result = SimResource::update_many()
        .col_expr(sim_resource::Column::Msisdn, Expr::value(msisdn))
        .filter(sim_resource::Column::Id.eq(id))
        .exec(db)
        .await?;
    finish_update(db, id, result.rows_affected, "MSISDN").await
}

/// Mirrors the registry's view of the resource.
///
/// `Activated` is only accepted once the vendor has released the profile, and
/// clears any earlier suspension. Going back to `NotActivated` is always
/// accepted; on a claimed resource it leaves the row in the pending-activation
/// state an operator can retry. Deliberate suspensions go through
/// [`mark_suspended`] instead.
pub async fn set_registry_state<C>(
    db: &C,
    id: i64,
    state: RegistryState,
) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let mut update = SimResource::update_many()
        .col_expr(sim_resource::Column::RegistryState, Expr::value(state))
        .filter(sim_resource::Column::Id.eq(id));
    if state == RegistryState::Activated {
        update = update
            .col_expr(
                sim_resource::Column::SuspendedAt,
                Expr::value(Option::<DateTimeUtc>::None),
            )
            .filter(sim_resource::Column::VendorState.eq(VendorState::Released));
    }
    let result = update.exec(db).await?;
    finish_update(db, id, result.rows_affected, "registry state").await
}

/// Records a deliberate suspension: `NotActivated` plus the suspension time,
/// in one write. Suspended rows are not reported as pending activation.
pub async fn mark_suspended<C>(db: &C, id: i64) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let result = SimResource::update_many()
        .col_expr(
            sim_resource::Column::RegistryState,
            Expr::value(RegistryState::NotActivated),
        )
        .col_expr(sim_resource::Column::SuspendedAt, Expr::value(Utc::now()))
        .filter(sim_resource::Column::Id.eq(id))
        .exec(db)
        .await?;
    finish_update(db, id, result.rows_affected, "suspension").await
}

/// Sets the vendor axis without touching the matching id.
///
/// Moving back to `Available` clears the matching id and is only accepted
/// while the resource is neither claimed nor activated.
pub async fn set_vendor_state<C>(
    db: &C,
    id: i64,
    state: VendorState,
) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let mut update = SimResource::update_many()
        .col_expr(sim_resource::Column::VendorState, Expr::value(state))
        .filter(sim_resource::Column::Id.eq(id));
    if state == VendorState::Available {
        update = update
            .col_expr(
                sim_resource::Column::MatchingId,
                Expr::value(Option::<String>::None),
            )
            .filter(sim_resource::Column::ProvisionState.eq(ProvisionState::Available))
            .filter(sim_resource::Column::RegistryState.eq(RegistryState::NotActivated));
    } else {
        // a released profile must always carry its matching id
        update = update.filter(sim_resource::Column::MatchingId.is_not_null());
    }
    let result = update.exec(db).await?;
    finish_update(db, id, result.rows_affected, "vendor state").await
}

/// Records a vendor release: `vendor_state = Released` together with the
/// matching id.
///
/// Guarded on the row still being `Available` at the vendor, so of two
/// overlapping reconciliation runs only the first writer wins and the second
/// gets [`Error::NotUpdated`].
pub async fn set_vendor_state_and_matching_id<C>(
    db: &C,
    id: i64,
    matching_id: &str,
) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let result = SimResource::update_many()
        .col_expr(
            sim_resource::Column::VendorState,
            Expr::value(VendorState::Released),
        )
        .col_expr(sim_resource::Column::MatchingId, Expr::value(matching_id))
        .filter(sim_resource::Column::Id.eq(id))
        .filter(sim_resource::Column::VendorState.eq(VendorState::Available))
        .exec(db)
        .await?;
    finish_update(
        db,
        id,
        result.rows_affected,
        "vendor state and matching id",
    )
    .await
}

/// Sets the claim axis directly.
///
/// `Provisioned` requires a released profile; `Available` requires the
/// registry to have no live activation. Regular allocations go through
/// [`find_next_ready_to_use`] instead.
pub async fn set_provision_state<C>(
    db: &C,
    id: i64,
    state: ProvisionState,
) -> Result<sim_resource::Model>
where
    C: ConnectionTrait,
{
    let mut update = SimResource::update_many()
        .col_expr(sim_resource::Column::ProvisionState, Expr::value(state))
        .filter(sim_resource::Column::Id.eq(id));
    update = match state {
        ProvisionState::Provisioned => {
            update.filter(sim_resource::Column::VendorState.eq(VendorState::Released))
        }
        ProvisionState::Available => {
            update.filter(sim_resource::Column::RegistryState.eq(RegistryState::NotActivated))
        }
    };
    let result = update.exec(db).await?;
    finish_update(db, id, result.rows_affected, "provision state").await
}

/// Inserts all resources in one transaction.
///
/// Either every row is stored or none is. A duplicate ICCID, against stored
/// rows or inside `resources` itself, fails with [`Error::AlreadyExists`].
pub async fn insert_all(
    db: &DatabaseConnection,
    resources: Vec<sim_resource::ActiveModel>,
) -> Result<u64> {
    if resources.is_empty() {
        return Ok(0);
    }

    let total = resources.len();
    let txn = db.begin().await?;
    let mut rows = resources.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<_> = rows.by_ref().take(INSERT_CHUNK_SIZE).collect();
        SimResource::insert_many(chunk)
            .exec_without_returning(&txn)
            .await
            .map_err(|e| Error::from_insert(e, "SIM resource ICCID"))?;
    }
    txn.commit().await?;

    Ok(total as u64)
}

/// Counts the pool's resources along each axis.
pub async fn get_pool_statistics<C>(
    db: &C,
    registry_id: i64,
    profile_type: &str,
) -> Result<PoolStatistics>
where
    C: ConnectionTrait,
{
    let rows: Vec<(VendorState, ProvisionState, i64)> = SimResource::find()
        .select_only()
        .column(sim_resource::Column::VendorState)
        .column(sim_resource::Column::ProvisionState)
        .column_as(Expr::col(sim_resource::Column::Id).count(), "count")
        .filter(pool_filter(registry_id, profile_type))
        .group_by(sim_resource::Column::VendorState)
        .group_by(sim_resource::Column::ProvisionState)
        .into_tuple()
        .all(db)
        .await?;

    let mut stats = PoolStatistics::default();
    for (vendor_state, provision_state, count) in rows {
        let count = u64::try_from(count).unwrap_or_default();
        stats.total += count;
        match (vendor_state, provision_state) {
            (VendorState::Available, _) => stats.unallocated += count,
            (VendorState::Released, ProvisionState::Available) => {
                stats.released_available += count;
            }
            (VendorState::Released, ProvisionState::Provisioned) => stats.provisioned += count,
        }
    }
    Ok(stats)
}

/// Resources of a registry that were claimed but never confirmed active.
///
/// Rows land here when the registry call after a claim failed or the process
/// died between claim and activation. They stay claimed until an operator
/// retries activation. Deliberately suspended rows are left out.
pub async fn find_pending_activation<C>(db: &C, registry_id: i64) -> Result<Vec<sim_resource::Model>>
where
    C: ConnectionTrait,
{
    SimResource::find()
        .filter(sim_resource::Column::RegistryId.eq(registry_id))
        .filter(sim_resource::Column::ProvisionState.eq(ProvisionState::Provisioned))
        .filter(sim_resource::Column::RegistryState.eq(RegistryState::NotActivated))
        .filter(sim_resource::Column::SuspendedAt.is_null())
        .order_by_asc(sim_resource::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
