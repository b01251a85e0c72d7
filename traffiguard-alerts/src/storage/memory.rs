//! In-process store for tests and storage-less servers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{
    check_new_request, check_status, check_username, AccidentLog, NewPriorityRequest,
    PriorityRequest, RecordStore, User,
};
use crate::error::{RecordError, StoreError};
use crate::store::AccidentReport;

#[derive(Default)]
struct MemoryState {
    accidents: BTreeMap<u64, AccidentReport>,
    users: BTreeMap<String, User>,
    requests: BTreeMap<u64, PriorityRequest>,
    next_user_id: u64,
    next_request_id: u64,
}

/// Volatile [`AccidentLog`] + [`RecordStore`].
///
/// [`MemoryStore::set_available`] makes every call fail with
/// [`StoreError::Unavailable`], which lets tests exercise outage paths.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        // A panic while holding the lock leaves the maps intact
        Ok(self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl AccidentLog for MemoryStore {
    fn append(&self, report: &AccidentReport) -> Result<(), StoreError> {
        self.lock()?.accidents.insert(report.id, report.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AccidentReport>, StoreError> {
        Ok(self.lock()?.accidents.values().cloned().collect())
    }

    fn last_id(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.lock()?.accidents.keys().next_back().copied())
    }
}

impl RecordStore for MemoryStore {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<User, RecordError> {
        check_username(username)?;
        let mut state = self.lock()?;
        if state.users.contains_key(username) {
            return Err(RecordError::UsernameTaken(username.to_string()));
        }
        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        state.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, RecordError> {
        Ok(self.lock()?.users.get(username).cloned())
    }

    fn create_priority_request(
        &self,
        request: NewPriorityRequest,
    ) -> Result<PriorityRequest, RecordError> {
        check_new_request(&request)?;
        let mut state = self.lock()?;
        state.next_request_id += 1;
        let created = request.into_request(state.next_request_id);
        state.requests.insert(created.id, created.clone());
        Ok(created)
    }

    fn list_priority_requests(&self) -> Result<Vec<PriorityRequest>, RecordError> {
        Ok(self.lock()?.requests.values().cloned().collect())
    }

    fn update_request_status(&self, id: u64, status: &str) -> Result<PriorityRequest, RecordError> {
        check_status(status)?;
        let mut state = self.lock()?;
        let request = state
            .requests
            .get_mut(&id)
            .ok_or(RecordError::RequestNotFound(id))?;
        request.status = status.to_string();
        Ok(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::storage::DEFAULT_REQUEST_STATUS;

    fn report(id: u64) -> AccidentReport {
        AccidentReport {
            id,
            location: Coordinate::new(id as f64, 0.0),
            description: format!("accident {id}"),
        }
    }

    #[test]
    fn test_accident_log_ordering() {
        let store = MemoryStore::new();
        assert_eq!(store.last_id().unwrap(), None);

        store.append(&report(2)).unwrap();
        store.append(&report(1)).unwrap();
        store.append(&report(3)).unwrap();

        let ids: Vec<u64> = store.load_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.last_id().unwrap(), Some(3));
    }

    #[test]
    fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.append(&report(1)), Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.find_user_by_name("x"),
            Err(RecordError::Store(StoreError::Unavailable(_)))
        ));

        store.set_available(true);
        store.append(&report(1)).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_users() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "$2b$12$hash").unwrap();
        assert_eq!(alice.id, 1);

        assert!(matches!(
            store.create_user("alice", "other"),
            Err(RecordError::UsernameTaken(name)) if name == "alice"
        ));
        assert!(matches!(store.create_user("  ", "x"), Err(RecordError::Invalid(_))));

        assert_eq!(store.find_user_by_name("alice").unwrap(), Some(alice));
        assert_eq!(store.find_user_by_name("bob").unwrap(), None);
        assert_eq!(store.create_user("bob", "h").unwrap().id, 2);
    }

    #[test]
    fn test_priority_requests() {
        let store = MemoryStore::new();
        let first = store
            .create_priority_request(NewPriorityRequest::new("ambulance", "MG Road → City Hospital", 7.5))
            .unwrap();
        let second = store
            .create_priority_request(NewPriorityRequest::new("fire_truck", "Ring Road", 3.0))
            .unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(first.status, DEFAULT_REQUEST_STATUS);

        let updated = store.update_request_status(first.id, "Approved").unwrap();
        assert_eq!(updated.status, "Approved");

        let all = store.list_priority_requests().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, "Approved");
        assert_eq!(all[1].status, DEFAULT_REQUEST_STATUS);

        assert!(matches!(
            store.update_request_status(99, "Approved"),
            Err(RecordError::RequestNotFound(99))
        ));
        assert!(matches!(
            store.update_request_status(first.id, ""),
            Err(RecordError::Invalid(_))
        ));
        assert!(matches!(
            store.create_priority_request(NewPriorityRequest::new("ambulance", "x", -1.0)),
            Err(RecordError::Invalid(_))
        ));
    }
}
