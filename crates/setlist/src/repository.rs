//! Entity reconciliation: merging remote records into local rows
//!
//! `Repository<T>` upserts a batch of API records against the local rows a
//! behavior currently shows. Matching rows are updated in place so that
//! user-authored local state and relationships survive; unknown identifiers
//! become new rows; with deletes enabled, local rows missing from the batch are
//! removed. Relationship resolution is left to the caller via
//! `upsert_multiple_with`.

use std::collections::HashMap;
use std::marker::PhantomData;

use indexmap::IndexMap;
use setlist_api::{ApiRecord, Entity};
use tracing::{debug, warn};

use crate::store::{Result, WriteTxn};

/// Conversion between an API record and its local entity
pub trait Reconcile: Entity {
    type Api: ApiRecord;

    fn create_from_api(api: &Self::Api) -> Self;

    /// Copy the remote scalar fields onto an existing row. Local-only state
    /// must be left untouched.
    fn update_from_api(&mut self, api: &Self::Api);
}

/// Result of one reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome<T> {
    pub created: Vec<T>,
    pub updated: Vec<T>,
    pub deleted: Vec<String>,
    /// Records dropped for having no identifier
    pub rejected: usize,
}

impl<T> Default for UpsertOutcome<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            rejected: 0,
        }
    }
}

impl<T> UpsertOutcome<T> {
    /// Created and updated rows, in batch order
    pub fn into_models(self) -> Vec<T> {
        let mut models = self.created;
        models.extend(self.updated);
        models
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub struct Repository<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T: Reconcile> Default for Repository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reconcile> Repository<T> {
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }

    /// Reconcile `api_records` against `local_records`.
    ///
    /// With `perform_deletes`, rows of `local_records` whose identifier is not in
    /// the batch are deleted; rows outside `local_records` are never deleted.
    pub fn upsert_multiple(
        &self,
        txn: &mut WriteTxn<'_>,
        api_records: &[T::Api],
        local_records: &[T],
        perform_deletes: bool,
    ) -> Result<UpsertOutcome<T>> {
        self.upsert_multiple_with(txn, api_records, local_records, perform_deletes, |_, _| {})
    }

    /// Like `upsert_multiple`, running `attach` on every created or updated row
    /// before it is written (used to set resolved relationship ids).
    #[tracing::instrument(
        skip_all,
        fields(table = T::TABLE, incoming = api_records.len(), local = local_records.len())
    )]
    pub fn upsert_multiple_with(
        &self,
        txn: &mut WriteTxn<'_>,
        api_records: &[T::Api],
        local_records: &[T],
        perform_deletes: bool,
        mut attach: impl FnMut(&mut T, &T::Api),
    ) -> Result<UpsertOutcome<T>> {
        let mut outcome = UpsertOutcome::default();

        let mut incoming: IndexMap<&str, &T::Api> = IndexMap::with_capacity(api_records.len());
        for record in api_records {
            if !record.has_identifier() {
                outcome.rejected += 1;
                continue;
            }
            // Last write wins, position of the first occurrence is kept
            incoming.insert(record.identifier(), record);
        }
        if outcome.rejected > 0 {
            warn!(
                "Dropped {} {} record(s) without identifier",
                outcome.rejected,
                T::TABLE
            );
        }

        let local_by_id: HashMap<&str, &T> =
            local_records.iter().map(|row| (row.id(), row)).collect();

        for (&id, &api) in &incoming {
            let existing = if local_by_id.contains_key(id) {
                txn.get::<T>(id).or_else(|| local_by_id.get(id).map(|row| (*row).clone()))
            } else {
                // Not part of the caller's view but already stored (e.g. fetched
                // through another screen): update it rather than duplicate it.
                txn.get::<T>(id)
            };

            match existing {
                Some(mut row) => {
                    row.update_from_api(api);
                    attach(&mut row, api);
                    txn.put(row.clone())?;
                    outcome.updated.push(row);
                }
                None => {
                    let mut row = T::create_from_api(api);
                    attach(&mut row, api);
                    txn.put(row.clone())?;
                    outcome.created.push(row);
                }
            }
        }

        if perform_deletes {
            for row in local_records {
                if !incoming.contains_key(row.id()) && txn.delete::<T>(row.id()).is_some() {
                    outcome.deleted.push(row.id().to_string());
                }
            }
        }

        debug!(
            "Reconciled {}: {} created, {} updated, {} deleted",
            T::TABLE,
            outcome.created.len(),
            outcome.updated.len(),
            outcome.deleted.len()
        );
        Ok(outcome)
    }

    /// Reconcile a single record, updating `local` when given
    pub fn upsert(&self, txn: &mut WriteTxn<'_>, api: &T::Api, local: Option<&T>) -> Result<Option<T>> {
        let local: Vec<T> = local.into_iter().cloned().collect();
        let outcome = self.upsert_multiple(txn, std::slice::from_ref(api), &local, false)?;
        Ok(outcome.into_models().into_iter().next())
    }
}
