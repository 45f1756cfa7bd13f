//! `fuelsale-pipeline` — Fuel and propane sales rollup and export engine.
//!
//! Pure engine crate: talks to storage only through the traits in [`store`],
//! so the same pipeline runs against SQLite or the in-process [`MemoryStore`].
//! No CLI dependencies.

pub mod aggregate;
pub mod calendar;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod propane;
pub mod remap;
pub mod request;
pub mod store;

pub use config::{PipelineConfig, PropaneConfig, PropaneWriteMode};
pub use engine::{Exporter, RunContext};
pub use error::{ExportError, StoreError};
pub use memory::MemoryStore;
pub use model::{DateRange, ExportType, ImportLog, RunOutcome};
pub use request::{ExportRequest, RequestInput};
pub use store::{ExportStore, ReferenceData, SalesSource, StagingStore};
