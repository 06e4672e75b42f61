//! Common test utilities

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone};
use chrono_tz::Tz;
use tokio::sync::watch;

use plume::clock::ManualClock;
use plume::config::Config;
use plume::generator::{ContentGenerator, GenerationContext, GenerationError};
use plume::publisher::{PostId, PublishError, Publisher};

/// Config tuned for fast deterministic runs: fixed seed, zero-length poll
/// tick and millisecond retry backoff
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.posting.plan_seed = Some(42);
    config.runtime.check_interval_secs = 0;
    config.runtime.retry_base_delay_ms = 1;
    config.runtime.retry_max_delay_ms = 2;
    config
}

/// Taipei timestamp helper
pub fn taipei(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
    chrono_tz::Asia::Taipei
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .unwrap()
}

/// Clock that starts at `start` and advances one minute per reading
pub fn stepping_clock(start: DateTime<Tz>) -> ManualClock {
    ManualClock::new(start).with_auto_step(Duration::minutes(1))
}

/// Generator producing numbered, non-repeating posts
#[derive(Default)]
pub struct SeqGenerator {
    counter: AtomicUsize,
}

impl SeqGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `n`, to avoid colliding with earlier runs
    #[allow(dead_code)]
    pub fn starting_at(n: usize) -> Self {
        Self {
            counter: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl ContentGenerator for SeqGenerator {
    async fn generate(&self, _ctx: &GenerationContext) -> Result<String, GenerationError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Scheduled thought number {n}"))
    }
}

/// Generator that always returns the same text, for dedup tests
#[allow(dead_code)]
pub struct ConstGenerator(pub &'static str);

#[async_trait]
impl ContentGenerator for ConstGenerator {
    async fn generate(&self, _ctx: &GenerationContext) -> Result<String, GenerationError> {
        Ok(self.0.to_string())
    }
}

/// Publisher driven by a script of responses
///
/// Consumes scripted results in order and auto-succeeds once the script is
/// empty. Records every published text. Optionally flips a shutdown channel
/// after a given number of successful publishes.
pub struct ScriptedPublisher {
    // distinguishes auto-generated post ids across publisher instances
    nonce: usize,
    script: Mutex<VecDeque<Result<PostId, PublishError>>>,
    calls: Mutex<Vec<String>>,
    successes: AtomicUsize,
    shutdown_after: Mutex<Option<(usize, watch::Sender<bool>)>>,
}

impl ScriptedPublisher {
    pub fn new() -> Arc<Self> {
        static NEXT_NONCE: AtomicUsize = AtomicUsize::new(0);
        Arc::new(Self {
            nonce: NEXT_NONCE.fetch_add(1, Ordering::SeqCst),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            successes: AtomicUsize::new(0),
            shutdown_after: Mutex::new(None),
        })
    }

    pub fn with_script(script: Vec<Result<PostId, PublishError>>) -> Arc<Self> {
        let publisher = Self::new();
        *publisher.script.lock().unwrap() = script.into();
        publisher
    }

    /// Send `true` on `tx` once `count` publishes have succeeded
    #[allow(dead_code)]
    pub fn shutdown_after(&self, count: usize, tx: watch::Sender<bool>) {
        *self.shutdown_after.lock().unwrap() = Some((count, tx));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn published_texts(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(&self, text: &str) -> Result<PostId, PublishError> {
        self.calls.lock().unwrap().push(text.to_string());

        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(format!(
                    "auto-{}-{}",
                    self.nonce,
                    self.successes.load(Ordering::SeqCst)
                ))
            });

        if result.is_ok() {
            let done = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
            let mut trigger = self.shutdown_after.lock().unwrap();
            if let Some((count, tx)) = trigger.as_ref() {
                if done >= *count {
                    let _ = tx.send(true);
                    *trigger = None;
                }
            }
        }

        result
    }
}
