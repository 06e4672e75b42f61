//! Execution scheduling
//!
//! Drives the day from plan to published posts: a polling wait loop that
//! fires slots when they come due, enforces the posting window and the
//! daily quota at fire time, retries transient publish failures and
//! records one terminal outcome per slot.

pub mod executor;
pub mod outcome;

pub use executor::{ExecutionLoop, RunMode, RunSummary, TerminationReason};
pub use outcome::{ExecutionAttempt, SlotOutcome};
