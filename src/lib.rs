// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod feed;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod scheduler;
pub mod store;
pub mod translate;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::bootstrap::Runtime;
pub use crate::config::AppConfig;
pub use crate::ingest::{IngestEngine, IngestReport, Ingestor};
pub use crate::scheduler::Scheduler;
