//! Terminal outcomes of scheduling cycles
//!
//! Every slot ends in exactly one [`SlotOutcome`]. Outcomes are persisted per
//! `(date, slot index)` so a restarted process resumes at the first slot
//! without one, and they are emitted as structured log events so an operator
//! can reconstruct the day's execution after the fact.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal result of one plan slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotOutcome {
    /// Published on the first attempt
    Success { post_id: String },

    /// Published after one or more retriable failures
    RetriedThenSuccess { post_id: String, attempts: u32 },

    /// Publish or generation failed fatally; the slot is lost
    FailedFatal { reason: String },

    /// Daily quota was already exhausted when the slot came due
    SkippedQuotaExceeded,

    /// The slot came due outside the posting window (e.g. after downtime)
    SkippedOutsideWindow,
}

impl SlotOutcome {
    /// Whether a post was actually published
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Success { .. } | Self::RetriedThenSuccess { .. }
        )
    }

    /// Platform post id, when one exists
    pub fn post_id(&self) -> Option<&str> {
        match self {
            Self::Success { post_id } | Self::RetriedThenSuccess { post_id, .. } => {
                Some(post_id.as_str())
            }
            _ => None,
        }
    }

    /// Short identifier for logs and storage
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RetriedThenSuccess { .. } => "retried_then_success",
            Self::FailedFatal { .. } => "failed_fatal",
            Self::SkippedQuotaExceeded => "skipped_quota_exceeded",
            Self::SkippedOutsideWindow => "skipped_outside_window",
        }
    }
}

/// Record of one completed scheduling cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// Correlation id for log events of this cycle
    pub attempt_id: Uuid,

    /// Index of the slot within the day's plan
    pub slot_index: usize,

    /// When the slot was planned to fire
    pub planned_at: DateTime<FixedOffset>,

    /// When the cycle actually ran
    pub actual_at: DateTime<FixedOffset>,

    pub outcome: SlotOutcome,
}
