//! # traffiguard-alerts — Real-time accident alerts for nearby vehicles
//!
//! Vehicles hold a WebSocket open at a fixed location. When an accident is
//! reported it is persisted, and every connection within the alert radius
//! is pushed a notification.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ AlertClient │ ◄─────────────────► │ AlertServer │
//! │ (vehicle)   │     JSON frames     │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴────────┐
//!                                    │AlertDispatcher │
//!                                    └───┬────────┬───┘
//!                                        │        │
//!                          ┌─────────────┴┐      ┌┴──────────────────┐
//!                          │AccidentStore │      │ConnectionRegistry │
//!                          │ (ids, log)   │      │ (fan-out targets) │
//!                          └──────┬───────┘      └───────────────────┘
//!                                 │
//!                        RocksStore | MemoryStore
//! ```
//!
//! ## Modules
//!
//! - [`geo`] — Haversine distance and radius test
//! - [`registry`] — Live connections tagged with their location
//! - [`store`] — Accident records and id assignment
//! - [`dispatcher`] — Report → persist → match → deliver
//! - [`protocol`] — JSON wire messages
//! - [`server`] — WebSocket alert server
//! - [`client`] — WebSocket alert client
//! - [`storage`] — Persistence collaborators (RocksDB, in-memory)

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod geo;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;

// Re-exports for convenience
pub use client::{AlertClient, AlertEvent, ConnectionState};
pub use dispatcher::{AlertDispatcher, DeliverySummary, DispatchConfig, DispatchStats};
pub use error::{
    DeliveryFailure, DeliveryFailureKind, RecordError, ReportError, ServerError, StoreError,
    ValidationError,
};
pub use geo::{distance_km, within_radius, Coordinate, DEFAULT_RADIUS_KM};
pub use protocol::{AlertMessage, ClientMessage, NearbyAccident, ProtocolError, ServerMessage};
pub use registry::{ConnectionEntry, ConnectionHandle, ConnectionRegistry, RegistryStats};
pub use server::{AlertServer, ServerConfig, ServerStats};
pub use storage::{
    AccidentLog, MemoryStore, NewPriorityRequest, PriorityRequest, RecordStore, RocksStore,
    StoreConfig, User,
};
pub use store::{AccidentReport, AccidentStore};
