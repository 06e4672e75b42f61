//! Slot execution loop
//!
//! The loop wakes on a fixed poll interval, compares the clock against the
//! next pending slot and walks each due slot through generation, publishing
//! and recording. All side effects go through injected traits ([`Clock`],
//! [`ContentGenerator`], [`Publisher`], [`StateStore`]), so the whole state
//! machine runs deterministically under test.
//!
//! Window and quota checks happen when a slot fires, not when it is planned:
//! a process that was down past a slot's time skips it instead of posting
//! into the wrong hours.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Timelike};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::generator::{ContentGenerator, GenerationContext, GenerationError};
use crate::plan::{DailyPlan, PlanGenerator, PlanSlot};
use crate::publisher::{PublishError, Publisher};
use crate::quota::QuotaTracker;
use crate::scheduler::outcome::{ExecutionAttempt, SlotOutcome};
use crate::storage::StateStore;
use crate::utils::content_hash;
use crate::utils::retry::{with_retry, Retried, RetryConfig};
use crate::window::PostingWindow;

/// How the loop ends a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Keep running across day rollovers until budget or shutdown
    Daemon,

    /// Return once the current day's plan is consumed or the date rolls
    /// over, for cron-style hosting
    SingleDay,
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    BudgetExhausted,
    ShutdownSignal,
    DayComplete,
    DayRollover,
}

/// What a run did, in order
#[derive(Debug)]
pub struct RunSummary {
    pub attempts: Vec<ExecutionAttempt>,
    pub reason: TerminationReason,
}

impl RunSummary {
    pub fn posts_published(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome.is_success())
            .count()
    }
}

/// In-memory view of the day being executed
struct DayState {
    plan: DailyPlan,
    quota: QuotaTracker,
    done: std::collections::BTreeMap<usize, SlotOutcome>,
}

impl DayState {
    fn next_pending(&self) -> Option<&PlanSlot> {
        self.plan
            .slots
            .iter()
            .find(|slot| !self.done.contains_key(&slot.index))
    }
}

/// The posting execution loop
pub struct ExecutionLoop {
    window: PostingWindow,
    plan_gen: PlanGenerator,
    store: Arc<dyn StateStore>,
    generator: Arc<dyn ContentGenerator>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    check_interval: Duration,
    budget: Option<Duration>,
    max_posts_per_day: u32,
    mode: RunMode,
    shutdown: watch::Receiver<bool>,
    // keeps the default (never fired) shutdown channel alive
    _shutdown_tx: Option<watch::Sender<bool>>,
}

impl ExecutionLoop {
    pub fn new(
        config: &Config,
        store: Arc<dyn StateStore>,
        generator: Arc<dyn ContentGenerator>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let window = config.posting.window()?;
        let plan_gen = PlanGenerator::from_config(&config.posting)?;
        let retry = RetryConfig::with_delays(
            config.runtime.max_publish_attempts,
            config.runtime.retry_base_delay_ms,
            config.runtime.retry_max_delay_ms,
        );
        let (tx, rx) = watch::channel(false);

        Ok(Self {
            window,
            plan_gen,
            store,
            generator,
            publisher,
            clock,
            retry,
            check_interval: config.runtime.check_interval(),
            budget: config.runtime.execution_budget(),
            max_posts_per_day: config.posting.max_posts_per_day,
            mode: RunMode::Daemon,
            shutdown: rx,
            _shutdown_tx: Some(tx),
        })
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the shutdown channel; the loop exits once `true` is observed
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = rx;
        self._shutdown_tx = None;
        self
    }

    /// Run until budget, shutdown or (in single-day mode) day completion
    pub async fn run(&mut self) -> Result<RunSummary> {
        let deadline = self.budget.map(|b| Instant::now() + b);
        let mut attempts: Vec<ExecutionAttempt> = Vec::new();

        let mut day = self.open_day(self.plan_date_for(&self.clock.now()))?;
        info!(
            date = %day.plan.date,
            slots = day.plan.len(),
            already_done = day.done.len(),
            posts_made = day.quota.posts_made(),
            "Execution loop started"
        );

        let reason = loop {
            if *self.shutdown.borrow() {
                info!("Shutdown signal observed, exiting");
                break TerminationReason::ShutdownSignal;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!("Execution budget exhausted, exiting");
                break TerminationReason::BudgetExhausted;
            }

            let now = self.clock.now();
            let today = self.plan_date_for(&now);

            if today != day.plan.date {
                match self.mode {
                    RunMode::SingleDay => break TerminationReason::DayRollover,
                    RunMode::Daemon => {
                        info!(from = %day.plan.date, to = %today, "Day rolled over");
                        day = self.open_day(today)?;
                        continue;
                    }
                }
            }

            let Some(slot) = day.next_pending().cloned() else {
                match self.mode {
                    RunMode::SingleDay => break TerminationReason::DayComplete,
                    RunMode::Daemon => {
                        self.wait_tick(deadline).await;
                        continue;
                    }
                }
            };

            if now < slot.target_at {
                self.wait_tick(deadline).await;
                continue;
            }

            let attempt = self.run_slot(&mut day, &slot, now, deadline).await?;
            day.done.insert(attempt.slot_index, attempt.outcome.clone());
            attempts.push(attempt);
        };

        let summary = RunSummary { attempts, reason };
        info!(
            posts_published = summary.posts_published(),
            cycles = summary.attempts.len(),
            reason = ?summary.reason,
            "Execution loop finished"
        );
        Ok(summary)
    }

    /// Date whose plan governs `now`
    ///
    /// With a midnight-crossing window, early-morning hours inside the
    /// post-midnight extension still belong to the previous day's plan;
    /// the day only rolls over once the window's extended end has passed.
    fn plan_date_for(&self, now: &DateTime<Tz>) -> NaiveDate {
        let hour = now.hour() as u8;
        let date = now.date_naive();
        if self.window.end_hour() > 24 && hour < self.window.end_hour() - 24 {
            date.pred_opt().unwrap_or(date)
        } else {
            date
        }
    }

    /// Load or generate everything needed to execute a date
    fn open_day(&self, date: NaiveDate) -> Result<DayState> {
        let plan = match self.store.load_plan(date)? {
            Some(plan) => {
                debug!(date = %date, slots = plan.len(), "Loaded persisted plan");
                plan
            }
            None => {
                let plan = self.plan_gen.generate(date);
                self.store.save_plan(&plan)?;
                info!(
                    date = %date,
                    slots = plan.len(),
                    prime_fraction = plan.prime_fraction(),
                    "Generated daily plan"
                );
                plan
            }
        };

        let quota =
            QuotaTracker::load_or_create(Arc::clone(&self.store), date, self.max_posts_per_day)?;
        let done = self.store.slot_outcomes(date)?;

        Ok(DayState { plan, quota, done })
    }

    /// Take one due slot to a terminal outcome and persist it
    async fn run_slot(
        &self,
        day: &mut DayState,
        slot: &PlanSlot,
        now: DateTime<Tz>,
        deadline: Option<Instant>,
    ) -> Result<ExecutionAttempt> {
        let attempt_id = Uuid::new_v4();
        let actual_at = now.fixed_offset();

        let (outcome, published) = if !self.window.is_posting_time(&now) {
            (SlotOutcome::SkippedOutsideWindow, None)
        } else if !day.quota.can_post_now(day.plan.target_count) {
            (SlotOutcome::SkippedQuotaExceeded, None)
        } else {
            self.publish_slot(slot, actual_at, deadline).await?
        };

        let attempt = ExecutionAttempt {
            attempt_id,
            slot_index: slot.index,
            planned_at: slot.target_at,
            actual_at,
            outcome,
        };

        match published {
            Some((content, hash)) => {
                let quota = self
                    .store
                    .record_post(day.plan.date, &attempt, &content, &hash)?;
                day.quota.apply(quota);
            }
            None => self.store.record_outcome(day.plan.date, &attempt)?,
        }

        match &attempt.outcome {
            SlotOutcome::Success { post_id } => info!(
                attempt_id = %attempt.attempt_id,
                slot = slot.index,
                planned_at = %slot.target_at,
                post_id = %post_id,
                "Slot published"
            ),
            SlotOutcome::RetriedThenSuccess { post_id, attempts } => info!(
                attempt_id = %attempt.attempt_id,
                slot = slot.index,
                planned_at = %slot.target_at,
                post_id = %post_id,
                attempts,
                "Slot published after retries"
            ),
            SlotOutcome::FailedFatal { reason } => warn!(
                attempt_id = %attempt.attempt_id,
                slot = slot.index,
                planned_at = %slot.target_at,
                reason = %reason,
                "Slot failed"
            ),
            skipped => info!(
                attempt_id = %attempt.attempt_id,
                slot = slot.index,
                planned_at = %slot.target_at,
                outcome = skipped.kind(),
                "Slot skipped"
            ),
        }

        Ok(attempt)
    }

    /// Generate content and publish it, classifying every failure
    ///
    /// Returns the terminal outcome plus, on success, the content and hash
    /// to be persisted with the post row.
    async fn publish_slot(
        &self,
        slot: &PlanSlot,
        actual_at: DateTime<chrono::FixedOffset>,
        deadline: Option<Instant>,
    ) -> Result<(SlotOutcome, Option<(String, String)>)> {
        let mut retry = self.retry.clone();
        retry.deadline = deadline;

        let ctx = GenerationContext {
            now: actual_at,
            prime: slot.prime,
        };

        let generated = with_retry(
            &retry,
            |e: &GenerationError| e.retry_class(),
            || self.generator.generate(&ctx),
        )
        .await;

        let mut text = match generated {
            Ok(retried) => retried.value,
            Err(err) => {
                return Ok((
                    SlotOutcome::FailedFatal {
                        reason: format!("generation: {err}"),
                    },
                    None,
                ))
            }
        };

        // one regeneration attempt when content was already posted
        let mut hash = content_hash(&text);
        if self.store.is_content_duplicate(&hash)? {
            warn!(slot = slot.index, "Duplicate content generated, regenerating");
            if let Ok(fresh) = self.generator.generate(&ctx).await {
                text = fresh;
                hash = content_hash(&text);
            }
            if self.store.is_content_duplicate(&hash)? {
                return Ok((
                    SlotOutcome::FailedFatal {
                        reason: "duplicate content".to_string(),
                    },
                    None,
                ));
            }
        }

        let published = with_retry(
            &retry,
            |e: &PublishError| e.retry_class(),
            || self.publisher.publish(&text),
        )
        .await;

        match published {
            Ok(Retried { value, attempts: 1 }) => {
                Ok((SlotOutcome::Success { post_id: value }, Some((text, hash))))
            }
            Ok(Retried { value, attempts }) => Ok((
                SlotOutcome::RetriedThenSuccess {
                    post_id: value,
                    attempts,
                },
                Some((text, hash)),
            )),
            Err(err) => Ok((
                SlotOutcome::FailedFatal {
                    reason: format!("publish: {err}"),
                },
                None,
            )),
        }
    }

    /// Sleep one poll tick, reacting early to shutdown and budget
    async fn wait_tick(&mut self, deadline: Option<Instant>) {
        let mut delay = self.check_interval;
        if let Some(d) = deadline {
            delay = delay.min(d.saturating_duration_since(Instant::now()));
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = self.shutdown.changed() => {
                if changed.is_err() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
