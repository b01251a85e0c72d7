//! Persistence collaborators.
//!
//! The alert core only needs an append-only accident log. The surrounding
//! application also keeps users and priority-vehicle requests; those are
//! plain CRUD and live behind [`RecordStore`].
//!
//! ```text
//! ┌───────────────┐  append / load   ┌──────────────────────────────┐
//! │ AccidentStore │ ───────────────► │ AccidentLog                  │
//! └───────────────┘                  │   RocksStore  (CF accidents) │
//!                                    │   MemoryStore (BTreeMap)     │
//! ┌───────────────┐  CRUD            ├──────────────────────────────┤
//! │ caller        │ ───────────────► │ RecordStore                  │
//! └───────────────┘                  │   CF users / requests / meta │
//!                                    └──────────────────────────────┘
//! ```

pub mod memory;
pub mod rocks;

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, StoreError};
use crate::store::AccidentReport;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

/// Status given to freshly submitted priority requests.
pub const DEFAULT_REQUEST_STATUS: &str = "Pending";

/// Durable, append-only log of accident records.
///
/// Implementations must return records from [`AccidentLog::load_all`] in
/// ascending id order.
pub trait AccidentLog: Send + Sync {
    fn append(&self, report: &AccidentReport) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<Vec<AccidentReport>, StoreError>;

    /// Highest id persisted so far, `None` for an empty log.
    fn last_id(&self) -> Result<Option<u64>, StoreError>;
}

/// Registered account. `password_hash` is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
}

/// Request for a priority vehicle to pass along a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityRequest {
    pub id: u64,
    pub vehicle_type: String,
    pub route: String,
    /// Estimated arrival, minutes
    pub eta: f64,
    pub status: String,
}

/// Fields supplied when submitting a priority request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPriorityRequest {
    pub vehicle_type: String,
    pub route: String,
    pub eta: f64,
}

impl NewPriorityRequest {
    pub fn new(vehicle_type: impl Into<String>, route: impl Into<String>, eta: f64) -> Self {
        Self {
            vehicle_type: vehicle_type.into(),
            route: route.into(),
            eta,
        }
    }

    fn into_request(self, id: u64) -> PriorityRequest {
        PriorityRequest {
            id,
            vehicle_type: self.vehicle_type,
            route: self.route,
            eta: self.eta,
            status: DEFAULT_REQUEST_STATUS.to_string(),
        }
    }
}

/// Users and priority requests. Every operation is synchronous.
pub trait RecordStore: Send + Sync {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<User, RecordError>;

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, RecordError>;

    fn create_priority_request(
        &self,
        request: NewPriorityRequest,
    ) -> Result<PriorityRequest, RecordError>;

    /// All requests, ascending by id.
    fn list_priority_requests(&self) -> Result<Vec<PriorityRequest>, RecordError>;

    fn update_request_status(&self, id: u64, status: &str) -> Result<PriorityRequest, RecordError>;
}

fn check_username(username: &str) -> Result<(), RecordError> {
    if username.trim().is_empty() {
        return Err(RecordError::Invalid("username must not be empty".into()));
    }
    Ok(())
}

fn check_new_request(request: &NewPriorityRequest) -> Result<(), RecordError> {
    if request.vehicle_type.trim().is_empty() {
        return Err(RecordError::Invalid("vehicle_type must not be empty".into()));
    }
    if !request.eta.is_finite() || request.eta < 0.0 {
        return Err(RecordError::Invalid(format!("eta {} must be a non-negative number", request.eta)));
    }
    Ok(())
}

fn check_status(status: &str) -> Result<(), RecordError> {
    if status.trim().is_empty() {
        return Err(RecordError::Invalid("status must not be empty".into()));
    }
    Ok(())
}
