//! Daily plan generation
//!
//! A [`DailyPlan`] is the ordered list of target posting timestamps for one
//! calendar date. Generation is deterministic for a `(date, seed)` pair: the
//! RNG is a ChaCha8 stream seeded from the base seed mixed with the date, so
//! the same plan can be re-derived after a restart and reproduced in tests.
//!
//! Placement works in minute offsets from the window start. The window is cut
//! into three segments (leading non-prime, prime, trailing non-prime) with
//! margins so that every consecutive gap honors its spacing floor, including
//! gaps that straddle a segment boundary. When the configured floors cannot
//! fit the drawn target count, the count is reduced instead of violating the
//! spacing invariant.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::PostingConfig;
use crate::window::PostingWindow;

/// One planned posting timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSlot {
    /// Position within the day's plan (0-based, ascending by time)
    pub index: usize,

    /// Target timestamp, carrying the local offset it was planned in
    pub target_at: DateTime<chrono::FixedOffset>,

    /// Whether the slot lies inside the prime sub-window
    pub prime: bool,
}

/// Complete posting plan for a single calendar date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPlan {
    /// Date this plan is for (in the configured timezone)
    pub date: NaiveDate,

    /// Number of posts targeted for the day
    pub target_count: u32,

    /// Ordered slots, strictly increasing by target time
    pub slots: Vec<PlanSlot>,

    /// When this plan was generated
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

impl DailyPlan {
    pub fn new(date: NaiveDate, slots: Vec<PlanSlot>) -> Self {
        Self {
            date,
            target_count: slots.len() as u32,
            slots,
            generated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&PlanSlot> {
        self.slots.get(index)
    }

    /// Fraction of slots that fall inside the prime sub-window
    pub fn prime_fraction(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        let prime = self.slots.iter().filter(|s| s.prime).count();
        prime as f64 / self.slots.len() as f64
    }

    /// Check structural invariants: indexes are contiguous and timestamps
    /// strictly increase
    pub fn is_valid(&self) -> bool {
        self.slots.iter().enumerate().all(|(i, s)| s.index == i)
            && self
                .slots
                .windows(2)
                .all(|pair| pair[0].target_at < pair[1].target_at)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Format as display string for the status CLI
    pub fn display(&self) -> String {
        let mut output = format!("Plan for {} ({} slots)\n", self.date, self.slots.len());
        for slot in &self.slots {
            output.push_str(&format!(
                "  #{} {} {}\n",
                slot.index,
                slot.target_at.format("%H:%M"),
                if slot.prime { "(prime)" } else { "" }
            ));
        }
        output
    }
}

/// Spacing and count parameters, all in minutes
#[derive(Debug, Clone, Copy)]
pub struct PlanParams {
    pub min_daily_posts: u32,
    pub max_daily_posts: u32,
    pub prime_bias: f64,
    pub prime_min_gap: u32,
    pub prime_max_gap: u32,
    pub other_min_gap: u32,
    pub other_max_gap: u32,
}

impl PlanParams {
    pub fn from_config(posting: &PostingConfig) -> Self {
        Self {
            min_daily_posts: posting.min_daily_posts,
            max_daily_posts: posting.max_daily_posts,
            prime_bias: posting.prime_bias,
            prime_min_gap: posting.prime_min_gap_minutes().max(1),
            prime_max_gap: posting.prime_max_gap_minutes().max(1),
            other_min_gap: posting.other_min_gap_minutes().max(1),
            other_max_gap: posting.other_max_gap_minutes().max(1),
        }
    }
}

/// Deterministic daily plan generator
pub struct PlanGenerator {
    window: PostingWindow,
    tz: Tz,
    params: PlanParams,
    base_seed: u64,
}

/// A contiguous run of minute offsets `[start, start + len)`
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: u32,
    len: u32,
}

impl Segment {
    fn capacity(&self, min_gap: u32) -> usize {
        if self.len == 0 {
            0
        } else {
            (1 + (self.len - 1) / min_gap) as usize
        }
    }
}

/// Which end of a segment the slots should cluster toward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Start,
    End,
}

impl PlanGenerator {
    pub fn new(window: PostingWindow, tz: Tz, params: PlanParams, base_seed: u64) -> Self {
        Self {
            window,
            tz,
            params,
            base_seed,
        }
    }

    /// Build a generator from posting configuration
    ///
    /// Uses the configured `plan_seed` when present; otherwise draws a
    /// process-random base seed (plans are persisted, so a restart reloads
    /// rather than re-rolls).
    pub fn from_config(posting: &PostingConfig) -> anyhow::Result<Self> {
        let window = posting.window()?;
        let tz = posting.tz()?;
        let seed = posting.plan_seed.unwrap_or_else(rand::random);
        Ok(Self::new(window, tz, PlanParams::from_config(posting), seed))
    }

    pub fn window(&self) -> &PostingWindow {
        &self.window
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Per-day RNG seed: base seed mixed with the date
    fn seed_for(&self, date: NaiveDate) -> u64 {
        let days = date.num_days_from_ce() as u64;
        self.base_seed ^ days.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Generate the plan for `date`
    pub fn generate(&self, date: NaiveDate) -> DailyPlan {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed_for(date));

        let p = &self.params;
        let span = self.window.span_minutes();
        let (prime_lo, prime_hi) = self.window.prime_offset_range();

        // Segment boundaries reserve the non-prime floor on each side of the
        // prime range so cross-segment gaps keep their floor.
        let prime_seg = Segment {
            start: prime_lo,
            len: prime_hi - prime_lo,
        };
        let leading_seg = Segment {
            start: 0,
            len: prime_lo.saturating_sub(p.other_min_gap),
        };
        let trailing_start = (prime_hi + p.other_min_gap).min(span);
        let trailing_seg = Segment {
            start: trailing_start,
            len: span - trailing_start,
        };

        let cap_prime = prime_seg.capacity(p.prime_min_gap);
        let cap_lead = leading_seg.capacity(p.other_min_gap);
        let cap_trail = trailing_seg.capacity(p.other_min_gap);

        let drawn = if p.min_daily_posts >= p.max_daily_posts {
            p.min_daily_posts
        } else {
            rng.gen_range(p.min_daily_posts..=p.max_daily_posts)
        } as usize;

        // Reduce the target until the spacing floors can fit it.
        let mut allocation = None;
        let mut target = drawn;
        while target > 0 {
            if let Some(split) = Self::split_counts(target, p.prime_bias, cap_prime, cap_lead, cap_trail)
            {
                allocation = Some(split);
                break;
            }
            target -= 1;
        }

        let Some((n_lead, n_prime, n_trail)) = allocation else {
            return DailyPlan::new(date, Vec::new());
        };

        let mut offsets: Vec<(u32, bool)> = Vec::with_capacity(target);
        offsets.extend(
            Self::place(&mut rng, leading_seg, n_lead, p.other_min_gap, p.other_max_gap, Anchor::End)
                .into_iter()
                .map(|o| (o, false)),
        );
        offsets.extend(
            Self::place(&mut rng, prime_seg, n_prime, p.prime_min_gap, p.prime_max_gap, Anchor::Start)
                .into_iter()
                .map(|o| (o, true)),
        );
        offsets.extend(
            Self::place(&mut rng, trailing_seg, n_trail, p.other_min_gap, p.other_max_gap, Anchor::Start)
                .into_iter()
                .map(|o| (o, false)),
        );

        let slots = offsets
            .into_iter()
            .enumerate()
            .map(|(index, (offset, prime))| PlanSlot {
                index,
                target_at: self.offset_to_time(date, offset).fixed_offset(),
                prime,
            })
            .collect();

        DailyPlan::new(date, slots)
    }

    /// Decide how many slots land in each segment, or `None` if `target`
    /// does not fit
    ///
    /// Prime gets its biased share first; the remainder spills into the
    /// non-prime segments closest to the prime boundaries (trailing first),
    /// and any final overflow flows back into spare prime capacity.
    fn split_counts(
        target: usize,
        bias: f64,
        cap_prime: usize,
        cap_lead: usize,
        cap_trail: usize,
    ) -> Option<(usize, usize, usize)> {
        let desired_prime = ((target as f64) * bias).ceil() as usize;
        let mut n_prime = desired_prime.min(cap_prime).min(target);
        let mut rem = target - n_prime;

        let n_trail = rem.min(cap_trail);
        rem -= n_trail;
        let n_lead = rem.min(cap_lead);
        rem -= n_lead;

        let spill = rem.min(cap_prime - n_prime);
        n_prime += spill;
        rem -= spill;

        if rem == 0 {
            Some((n_lead, n_prime, n_trail))
        } else {
            None
        }
    }

    /// Place `n` offsets inside a segment with a guaranteed minimum gap
    ///
    /// Uses sorted jitter over a minimally packed layout: the floor is a hard
    /// invariant, while the maximum interval only bounds the jitter budget so
    /// typical spacing stays near the configured range. `Anchor::End` mirrors
    /// the layout so slots cluster toward the segment end (used for the
    /// leading segment, closest to the prime boundary).
    fn place(
        rng: &mut ChaCha8Rng,
        seg: Segment,
        n: usize,
        min_gap: u32,
        max_gap: u32,
        anchor: Anchor,
    ) -> Vec<u32> {
        if n == 0 || seg.len == 0 {
            return Vec::new();
        }

        let packed = (n as u32 - 1) * min_gap;
        let budget = (seg.len - 1).saturating_sub(packed);
        let jitter_cap = budget.min(max_gap.saturating_sub(min_gap).max(1) * n as u32);

        let mut jitters: Vec<u32> = (0..n)
            .map(|_| {
                if jitter_cap == 0 {
                    0
                } else {
                    rng.gen_range(0..=jitter_cap)
                }
            })
            .collect();
        jitters.sort_unstable();

        let mut offsets: Vec<u32> = jitters
            .iter()
            .enumerate()
            .map(|(i, j)| i as u32 * min_gap + j)
            .collect();

        if anchor == Anchor::End {
            let last = seg.len - 1;
            offsets = offsets.iter().rev().map(|o| last - o).collect();
        }

        offsets.into_iter().map(|o| seg.start + o).collect()
    }

    /// Map a minute offset from the window start to a concrete timestamp
    fn offset_to_time(&self, date: NaiveDate, offset_minutes: u32) -> DateTime<Tz> {
        let start = NaiveTime::from_hms_opt(u32::from(self.window.start_hour()), 0, 0)
            .unwrap_or(NaiveTime::MIN);
        let naive = date.and_time(start) + Duration::minutes(i64::from(offset_minutes));

        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // Nonexistent local time (DST gap): push forward one hour
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .unwrap_or_else(|| self.tz.from_utc_datetime(&naive)),
        }
    }
}
