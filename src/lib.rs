//! plume - Paced social posting scheduler
//!
//! A daemon that plans and publishes short posts inside a configurable
//! evening window, with deterministic per-day scheduling, a daily quota and
//! crash-safe resume.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`window`] - Posting window policy, including midnight crossing
//! - [`plan`] - Deterministic daily plan generation
//! - [`quota`] - Daily posting quota tracking
//! - [`scheduler`] - The slot execution loop and outcomes
//! - [`generator`] - Post content generation
//! - [`publisher`] - Platform publishing client
//! - [`storage`] - Durable scheduling state (SQLite)
//! - [`clock`] - Injectable time source
//! - [`utils`] - Retry, hashing and text helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use plume::clock::SystemClock;
//! use plume::config::Config;
//! use plume::generator::LlmGenerator;
//! use plume::publisher::ThreadsClient;
//! use plume::scheduler::ExecutionLoop;
//! use plume::storage::SqliteStateStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let store = Arc::new(SqliteStateStore::new(&config.database.sqlite_path)?);
//!     let generator = Arc::new(LlmGenerator::new(config.generator.clone())?);
//!     let publisher = Arc::new(ThreadsClient::new(config.api.clone())?);
//!     let clock = Arc::new(SystemClock::new(config.posting.tz()?));
//!
//!     let mut exec = ExecutionLoop::new(&config, store, generator, publisher, clock)?;
//!     // exec.run().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod plan;
pub mod publisher;
pub mod quota;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod window;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::generator::{ContentGenerator, GenerationContext, GenerationError};
    pub use crate::plan::{DailyPlan, PlanGenerator, PlanSlot};
    pub use crate::publisher::{PublishError, Publisher};
    pub use crate::quota::{QuotaRecord, QuotaTracker};
    pub use crate::scheduler::{ExecutionLoop, RunMode, RunSummary, SlotOutcome};
    pub use crate::storage::{SqliteStateStore, StateStore};
    pub use crate::window::PostingWindow;
}
