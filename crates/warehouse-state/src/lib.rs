//! Warehouse-State: SurrealDB Backend for the Flag Warehouse
//!
//! This crate provides the persistence layer shared by the exploit scheduler
//! (write path, through the ingestion endpoint) and the submission dispatcher
//! (select/update path).
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: insert-or-ignore idempotence, terminal outcomes, and one atomic
//! commit per dispatcher cycle.
//!
//! ## Key Components
//!
//! - `FlagStore`: backend-agnostic async trait
//! - `SurrealFlagStore`: SurrealDB implementation (`mem://`, `surrealkv://`, `ws://`)
//! - `MemoryFlagStore`: in-memory fake for tests
//! - `StoreConfig`: connection settings read from the environment

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::MemoryFlagStore;
pub use handle::StoreConfig;
pub use schema::{FlagOutcome, FlagRecord, FlagStatus, NewFlag};
pub use storage_traits::{
    retry_on_contention, CycleReport, CycleUpdate, FlagCounts, FlagResolution, FlagStore,
    StorageResult, INSERT_ATTEMPTS, INSERT_BACKOFF,
};
pub use surreal_store::SurrealFlagStore;
