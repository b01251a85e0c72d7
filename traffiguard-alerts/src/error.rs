//! Error taxonomy for the alert core.
//!
//! - [`ValidationError`]: bad input, scoped to the one operation.
//! - [`StoreError`]: the persistence collaborator failed.
//! - [`ReportError`]: what a reporter can see.
//! - [`DeliveryFailure`]: one recipient could not be reached. Never
//!   propagated as a report failure.
//! - [`RecordError`]: user / priority-request CRUD failures.
//! - [`ServerError`]: bind, accept and storage-open failures.

use thiserror::Error;

use crate::registry::ConnectionHandle;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("radius {0} km must be a non-negative number")]
    InvalidRadius(f64),
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Failure returned to whoever submitted an accident report.
#[derive(Error, Debug, Clone)]
pub enum ReportError {
    #[error("invalid report: {0}")]
    Validation(#[from] ValidationError),
    #[error("accident store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailureKind {
    #[error("channel closed")]
    Closed,
    #[error("timed out waiting for queue space")]
    TimedOut,
}

/// An alert that could not be handed to one connection.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("delivery of accident {accident_id} to {handle} failed: {kind}")]
pub struct DeliveryFailure {
    pub handle: ConnectionHandle,
    pub accident_id: u64,
    pub kind: DeliveryFailureKind,
}

#[derive(Error, Debug, Clone)]
pub enum RecordError {
    #[error("username already registered: {0}")]
    UsernameTaken(String),
    #[error("priority request not found: {0}")]
    RequestNotFound(u64),
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures that stop the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to open storage: {0}")]
    Storage(#[from] StoreError),
}
