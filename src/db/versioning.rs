/// Optimistic concurrency for version-stamped records
///
/// Writers read a record, change it in memory, then issue a conditional
/// `UPDATE ... SET ..., version = version + 1 WHERE id = ? AND version = ?
/// RETURNING version`. A missing row in the result means another writer got
/// there first (or the id/version pair never existed); both are reported as
/// an edit conflict. Conflicts are never retried here.
use crate::{
    error::{ApiError, ApiResult},
    metrics,
};

/// A record carrying a version counter
pub trait Versioned {
    /// Label used in logs and metrics
    const ENTITY: &'static str;

    fn id(&self) -> i64;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);
}

/// Apply the `RETURNING version` result of a conditional write to `record`
pub fn apply_conditional_write<T: Versioned>(
    record: &mut T,
    returned_version: Option<i64>,
) -> ApiResult<()> {
    match returned_version {
        Some(version) => {
            record.set_version(version);
            Ok(())
        }
        None => {
            metrics::record_edit_conflict(T::ENTITY);
            tracing::info!(
                entity = T::ENTITY,
                id = record.id(),
                expected_version = record.version(),
                "edit conflict"
            );
            Err(ApiError::EditConflict)
        }
    }
}
