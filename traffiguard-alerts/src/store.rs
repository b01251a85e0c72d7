//! Append-only accident store with serialized id assignment.
//!
//! Actual persistence is delegated to an [`AccidentLog`]. This type owns the
//! record shape and the id sequence: ids start at 1, are assigned under a
//! mutex together with the append, and are only consumed when the append
//! succeeds. The result is a gap-free, strictly increasing sequence even
//! under concurrent reports.

use std::sync::{Arc, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{ReportError, StoreError, ValidationError};
use crate::geo::{within_radius, Coordinate};
use crate::storage::AccidentLog;

/// A persisted accident. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentReport {
    pub id: u64,
    pub location: Coordinate,
    pub description: String,
}

pub struct AccidentStore {
    log: Arc<dyn AccidentLog>,
    /// Next id to hand out. Held across the append.
    next_id: Mutex<u64>,
}

impl AccidentStore {
    /// Wrap `log`, continuing the id sequence after its last record.
    pub fn open(log: Arc<dyn AccidentLog>) -> Result<Self, StoreError> {
        let next_id = log.last_id()?.map_or(1, |last| last + 1);
        log::debug!("Accident store ready, next id {next_id}");
        Ok(Self {
            log,
            next_id: Mutex::new(next_id),
        })
    }

    /// Persist a new accident and return it with its assigned id.
    ///
    /// Fails with [`ReportError::Validation`] for an empty description and
    /// with [`ReportError::StoreUnavailable`] when the log rejects the write.
    pub fn create(
        &self,
        location: Coordinate,
        description: impl Into<String>,
    ) -> Result<AccidentReport, ReportError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription.into());
        }

        let mut next_id = self.next_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let report = AccidentReport {
            id: *next_id,
            location,
            description,
        };
        self.log.append(&report)?;
        *next_id += 1;

        Ok(report)
    }

    /// Every stored accident within `max_km` of `center`, ascending by id.
    pub fn list_near(
        &self,
        center: Coordinate,
        max_km: f64,
    ) -> Result<Vec<AccidentReport>, ReportError> {
        let mut reports: Vec<AccidentReport> = self
            .log
            .load_all()?
            .into_iter()
            .filter(|r| within_radius(center, r.location, max_km))
            .collect();
        reports.sort_by_key(|r| r.id);
        Ok(reports)
    }

    /// Number of stored accidents.
    pub fn len(&self) -> Result<usize, ReportError> {
        Ok(self.log.load_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ReportError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::collections::HashSet;

    fn memory_store() -> (Arc<MemoryStore>, AccidentStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = AccidentStore::open(backend.clone()).unwrap();
        (backend, store)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let (_, store) = memory_store();
        let a = store.create(Coordinate::new(0.0, 0.0), "collision").unwrap();
        let b = store.create(Coordinate::new(1.0, 1.0), "flooding").unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(b.description, "flooding");
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_empty_description_rejected() {
        let (backend, store) = memory_store();
        for description in ["", "   ", "\n\t"] {
            let err = store.create(Coordinate::new(0.0, 0.0), description).unwrap_err();
            assert!(matches!(
                err,
                ReportError::Validation(ValidationError::EmptyDescription)
            ));
        }
        assert!(backend.load_all().unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_unavailable_store_propagates_and_keeps_sequence() {
        let (backend, store) = memory_store();
        store.create(Coordinate::new(0.0, 0.0), "first").unwrap();

        backend.set_available(false);
        let err = store.create(Coordinate::new(0.0, 0.0), "lost").unwrap_err();
        assert!(matches!(err, ReportError::StoreUnavailable(_)));

        backend.set_available(true);
        let next = store.create(Coordinate::new(0.0, 0.0), "second").unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_open_continues_after_last_id() {
        let backend = Arc::new(MemoryStore::new());
        {
            let store = AccidentStore::open(backend.clone()).unwrap();
            store.create(Coordinate::new(0.0, 0.0), "a").unwrap();
            store.create(Coordinate::new(0.0, 0.0), "b").unwrap();
        }
        let store = AccidentStore::open(backend).unwrap();
        assert_eq!(store.create(Coordinate::new(0.0, 0.0), "c").unwrap().id, 3);
    }

    #[test]
    fn test_list_near_filters_and_orders() {
        let (_, store) = memory_store();
        store.create(Coordinate::new(0.0, 0.0), "at origin").unwrap();
        store.create(Coordinate::new(10.0, 10.0), "far away").unwrap();
        store.create(Coordinate::new(0.005, 0.005), "close by").unwrap();

        let near = store.list_near(Coordinate::new(0.0, 0.0), 2.0).unwrap();
        let ids: Vec<u64> = near.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert!(store.list_near(Coordinate::new(-45.0, 100.0), 2.0).unwrap().is_empty());
        assert_eq!(store.list_near(Coordinate::new(5.0, 5.0), 20_000.0).unwrap().len(), 3);
    }

    #[test]
    fn test_concurrent_creates_unique_contiguous_ids() {
        let (backend, store) = memory_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| {
                            store
                                .create(Coordinate::new(0.0, 0.0), format!("t{t} #{i}"))
                                .unwrap()
                                .id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for h in handles {
            let thread_ids = h.join().unwrap();
            // Per-thread view is strictly increasing
            assert!(thread_ids.windows(2).all(|w| w[0] < w[1]));
            ids.extend(thread_ids);
        }

        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 400);
        assert_eq!(unique, (1..=400).collect::<HashSet<u64>>());
        assert_eq!(backend.last_id().unwrap(), Some(400));
    }
}
