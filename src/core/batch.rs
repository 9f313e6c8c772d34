//! Batch importer - seeds the store from a pre-parsed SIM data feed.
//!
//! Every import is recorded as an `ImportBatch` row that is opened before any
//! resource is written and closed once with the outcome. Resources of a batch
//! are stored all-or-nothing, so importing the same file twice fails with
//! [`Error::AlreadyExists`] instead of silently duplicating stock.

use crate::{
    core::{registry, sim, vendor},
    entities::{
        BatchStatus, ImportBatch, ProvisionState, RegistryState, VendorState, import_batch,
        sim_resource,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::Deserialize;
use tracing::{error, info, instrument};

/// One line of a SIM data feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimRecord {
    /// Hardware identifier
    pub iccid: String,
    /// Subscriber identity
    pub imsi: String,
    /// Pre-assigned subscriber number, if the feed carries one
    #[serde(default)]
    pub msisdn: Option<String>,
    /// Provisioning profile template
    pub profile_type: String,
}

impl SimRecord {
    fn validate(&self, line: usize) -> Result<()> {
        let missing = if self.iccid.trim().is_empty() {
            Some("ICCID")
        } else if self.imsi.trim().is_empty() {
            Some("IMSI")
        } else if self.profile_type.trim().is_empty() {
            Some("profile type")
        } else {
            None
        };

        match missing {
            Some(field) => Err(Error::NotCreated {
                message: format!("Record {line} of import has an empty {field}"),
            }),
            None => Ok(()),
        }
    }

    fn into_active_model(
        self,
        registry_id: i64,
        vendor_id: i64,
        batch_id: i64,
    ) -> sim_resource::ActiveModel {
        sim_resource::ActiveModel {
            iccid: Set(self.iccid.trim().to_string()),
            imsi: Set(self.imsi.trim().to_string()),
            msisdn: Set(self.msisdn.filter(|m| !m.trim().is_empty())),
            eid: Set(None),
            profile_type: Set(self.profile_type.trim().to_string()),
            registry_id: Set(registry_id),
            vendor_id: Set(vendor_id),
            batch_id: Set(batch_id),
            registry_state: Set(RegistryState::NotActivated),
            vendor_state: Set(VendorState::Available),
            provision_state: Set(ProvisionState::Available),
            matching_id: Set(None),
            suspended_at: Set(None),
            ..Default::default()
        }
    }
}

/// Opens a new batch in `Started` state.
pub async fn open_batch<C>(
    db: &C,
    importer: &str,
    registry_id: i64,
    vendor_id: i64,
) -> Result<import_batch::Model>
where
    C: ConnectionTrait,
{
    import_batch::ActiveModel {
        importer: Set(importer.to_string()),
        registry_id: Set(registry_id),
        vendor_id: Set(vendor_id),
        size: Set(0),
        status: Set(BatchStatus::Started),
        started_at: Set(Utc::now()),
        ended_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Closes a `Started` batch. Closed batches are immutable, so closing one twice
/// fails with [`Error::NotUpdated`].
pub async fn close_batch<C>(
    db: &C,
    batch_id: i64,
    size: u64,
    status: BatchStatus,
) -> Result<import_batch::Model>
where
    C: ConnectionTrait,
{
    if status == BatchStatus::Started {
        return Err(Error::not_updated(format!(
            "Import batch {batch_id} cannot be closed as STARTED"
        )));
    }

    let size = i64::try_from(size).map_err(|_| Error::System {
        message: format!("Import batch {batch_id} size {size} is out of range"),
    })?;
    let result = ImportBatch::update_many()
        .col_expr(import_batch::Column::Size, Expr::value(size))
        .col_expr(import_batch::Column::Status, Expr::value(status))
        .col_expr(import_batch::Column::EndedAt, Expr::value(Utc::now()))
        .filter(import_batch::Column::Id.eq(batch_id))
        .filter(import_batch::Column::Status.eq(BatchStatus::Started))
        .exec(db)
        .await?;

    let batch = get_batch(db, batch_id).await?;
    if result.rows_affected == 0 {
        return Err(Error::not_updated(format!(
            "Import batch {batch_id} is already closed"
        )));
    }
    Ok(batch)
}

/// Looks an import batch up by id.
pub async fn get_batch<C>(db: &C, batch_id: i64) -> Result<import_batch::Model>
where
    C: ConnectionTrait,
{
    ImportBatch::find_by_id(batch_id)
        .one(db)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Found no information about import batch with id {batch_id}"
            ))
        })
}

/// Batches imported for a registry, newest first.
pub async fn list_batches<C>(db: &C, registry_id: i64) -> Result<Vec<import_batch::Model>>
where
    C: ConnectionTrait,
{
    ImportBatch::find()
        .filter(import_batch::Column::RegistryId.eq(registry_id))
        .order_by_desc(import_batch::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Imports `records` as one batch for the given registry and vendor.
///
/// The vendor must be permitted for the registry. Any invalid record or
/// duplicate ICCID fails the whole batch: no resource is stored, the batch is
/// closed as `Failed` and the error is returned. On success the closed
/// `Completed` batch is returned.
#[instrument(skip(db, records), fields(records = records.len()))]
pub async fn import_batch(
    db: &DatabaseConnection,
    records: Vec<SimRecord>,
    registry_id: i64,
    vendor_id: i64,
    importer: &str,
) -> Result<import_batch::Model> {
    registry::get_registry_by_id(db, registry_id).await?;
    vendor::get_profile_vendor_by_id(db, vendor_id).await?;
    vendor::check_vendor_permission(db, vendor_id, registry_id).await?;

    let batch = open_batch(db, importer, registry_id, vendor_id).await?;
    info!(batch_id = batch.id, "Import batch started");

    match store_records(db, records, registry_id, vendor_id, batch.id).await {
        Ok(size) => {
            let closed = close_batch(db, batch.id, size, BatchStatus::Completed).await?;
            info!(batch_id = closed.id, size, "Import batch completed");
            Ok(closed)
        }
        Err(e) => Err(fail_batch(db, batch.id, e).await),
    }
}

/// Closes a batch as `Failed` and hands back the error that failed it. A
/// failure to close is logged, never returned in place of `cause`.
async fn fail_batch<C>(db: &C, batch_id: i64, cause: Error) -> Error
where
    C: ConnectionTrait,
{
    error!(batch_id, error = %cause, "Import batch failed");
    if let Err(close_error) = close_batch(db, batch_id, 0, BatchStatus::Failed).await {
        error!(
            batch_id,
            error = %close_error,
            "Failed import batch could not be closed"
        );
    }
    cause
}

async fn store_records(
    db: &DatabaseConnection,
    records: Vec<SimRecord>,
    registry_id: i64,
    vendor_id: i64,
    batch_id: i64,
) -> Result<u64> {
    for (line, record) in records.iter().enumerate() {
        record.validate(line + 1)?;
    }

    let rows = records
        .into_iter()
        .map(|record| record.into_active_model(registry_id, vendor_id, batch_id))
        .collect();
    sim::insert_all(db, rows).await
}
