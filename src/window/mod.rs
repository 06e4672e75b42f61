//! Posting window policy
//!
//! A posting window is a daily hour range that may cross midnight. Midnight
//! crossing is expressed with an extended end hour: a window of 20:00 to
//! 02:00 the next day is written as `start = 20, end = 26`. All membership
//! checks fold wall-clock hours onto the same extended wheel and use
//! half-open intervals: the start hour is inside, the end hour is outside.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing an invalid window
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Start hour {0} out of range (expected 0-23)")]
    StartOutOfRange(u8),

    #[error("End hour {0} out of range (expected 1-47)")]
    EndOutOfRange(u8),

    #[error("Window end {end} must be after start {start}")]
    EmptyWindow { start: u8, end: u8 },

    #[error("Window span {0}h exceeds 24 hours")]
    SpanTooLong(u8),

    #[error("Prime range {prime_start}-{prime_end} not inside window {start}-{end}")]
    PrimeOutsideWindow {
        start: u8,
        end: u8,
        prime_start: u8,
        prime_end: u8,
    },
}

/// Immutable daily posting window with a nested prime sub-window
///
/// All four hours live on the extended 0-47 wheel anchored at the window's
/// start day, so `prime_start`/`prime_end` may exceed 24 for the
/// post-midnight portion of a crossing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingWindow {
    start: u8,
    end: u8,
    prime_start: u8,
    prime_end: u8,
}

impl PostingWindow {
    /// Build a validated window
    ///
    /// `start` is a plain wall-clock hour (0-23); `end`, `prime_start` and
    /// `prime_end` use the extended range so that a post-midnight end is
    /// written as `24 + hour`. The prime range must nest inside the window.
    pub fn new(start: u8, end: u8, prime_start: u8, prime_end: u8) -> Result<Self, WindowError> {
        if start > 23 {
            return Err(WindowError::StartOutOfRange(start));
        }
        if end == 0 || end > 47 {
            return Err(WindowError::EndOutOfRange(end));
        }
        if end <= start {
            return Err(WindowError::EmptyWindow { start, end });
        }
        if end - start > 24 {
            return Err(WindowError::SpanTooLong(end - start));
        }
        if prime_start < start || prime_end > end || prime_end <= prime_start {
            return Err(WindowError::PrimeOutsideWindow {
                start,
                end,
                prime_start,
                prime_end,
            });
        }

        Ok(Self {
            start,
            end,
            prime_start,
            prime_end,
        })
    }

    /// Window start hour (0-23)
    pub fn start_hour(&self) -> u8 {
        self.start
    }

    /// Window end hour on the extended wheel
    pub fn end_hour(&self) -> u8 {
        self.end
    }

    /// Prime sub-window start on the extended wheel
    pub fn prime_start_hour(&self) -> u8 {
        self.prime_start
    }

    /// Prime sub-window end on the extended wheel
    pub fn prime_end_hour(&self) -> u8 {
        self.prime_end
    }

    /// Total window span in minutes
    pub fn span_minutes(&self) -> u32 {
        u32::from(self.end - self.start) * 60
    }

    /// Prime sub-window span in minutes
    pub fn prime_span_minutes(&self) -> u32 {
        u32::from(self.prime_end - self.prime_start) * 60
    }

    /// Prime sub-window as minute offsets from the window start
    pub fn prime_offset_range(&self) -> (u32, u32) {
        (
            u32::from(self.prime_start - self.start) * 60,
            u32::from(self.prime_end - self.start) * 60,
        )
    }

    /// Fold a wall-clock hour (0-23) onto the extended wheel
    ///
    /// Hours before the window start are assumed to belong to the
    /// post-midnight portion and get 24 added, so they can be compared
    /// directly against the extended `end`.
    fn fold(&self, hour: u8) -> u8 {
        if hour < self.start {
            hour + 24
        } else {
            hour
        }
    }

    /// Check whether a wall-clock hour falls inside the window
    pub fn contains_hour(&self, hour: u8) -> bool {
        let folded = self.fold(hour);
        self.start <= folded && folded < self.end
    }

    /// Check whether a wall-clock hour falls inside the prime sub-window
    pub fn contains_prime_hour(&self, hour: u8) -> bool {
        let folded = self.fold(hour);
        self.prime_start <= folded && folded < self.prime_end
    }

    /// Check whether a minute offset from window start is prime
    pub fn offset_is_prime(&self, offset_minutes: u32) -> bool {
        let (lo, hi) = self.prime_offset_range();
        lo <= offset_minutes && offset_minutes < hi
    }

    /// Is `now` a valid posting moment
    pub fn is_posting_time<T: Timelike>(&self, now: &T) -> bool {
        self.contains_hour(now.hour() as u8)
    }

    /// Is `now` inside the high-engagement prime range
    pub fn is_prime_time<T: Timelike>(&self, now: &T) -> bool {
        self.contains_prime_hour(now.hour() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 30, 0).unwrap()
    }

    #[test]
    fn test_midnight_crossing_membership() {
        // 20:00 - 02:00 next day
        let w = PostingWindow::new(20, 26, 21, 25).unwrap();

        assert!(w.is_posting_time(&at(20)));
        assert!(w.is_posting_time(&at(23)));
        assert!(w.is_posting_time(&at(0)));
        assert!(w.is_posting_time(&at(1)));
        assert!(!w.is_posting_time(&at(2))); // end hour is outside
        assert!(!w.is_posting_time(&at(3)));
        assert!(!w.is_posting_time(&at(12)));
        assert!(!w.is_posting_time(&at(19)));
    }

    #[test]
    fn test_non_crossing_membership() {
        let w = PostingWindow::new(9, 17, 11, 14).unwrap();

        assert!(w.is_posting_time(&at(9)));
        assert!(w.is_posting_time(&at(16)));
        assert!(!w.is_posting_time(&at(17)));
        assert!(!w.is_posting_time(&at(8)));
        // early-morning hours fold past the end and stay outside
        assert!(!w.is_posting_time(&at(3)));
    }

    #[test]
    fn test_prime_membership() {
        let w = PostingWindow::new(20, 26, 21, 25).unwrap();

        assert!(!w.is_prime_time(&at(20)));
        assert!(w.is_prime_time(&at(21)));
        assert!(w.is_prime_time(&at(23)));
        assert!(w.is_prime_time(&at(0)));
        assert!(!w.is_prime_time(&at(1))); // prime end 25 -> 01:00 outside
        assert!(!w.is_prime_time(&at(2)));
    }

    #[test]
    fn test_boundary_hours_explicit() {
        // Boundary hours 0, 23, 24, 25 on the extended wheel
        let w = PostingWindow::new(23, 25, 23, 24).unwrap();

        assert!(w.contains_hour(23)); // start inside
        assert!(w.contains_hour(0)); // folds to 24, inside
        assert!(!w.contains_hour(1)); // folds to 25 = end, outside
        assert!(w.contains_prime_hour(23));
        assert!(!w.contains_prime_hour(0)); // prime end 24, outside
    }

    #[test]
    fn test_invalid_windows_rejected() {
        assert!(matches!(
            PostingWindow::new(24, 26, 24, 25),
            Err(WindowError::StartOutOfRange(24))
        ));
        assert!(matches!(
            PostingWindow::new(20, 20, 20, 20),
            Err(WindowError::EmptyWindow { .. })
        ));
        assert!(matches!(
            PostingWindow::new(0, 25, 1, 2),
            Err(WindowError::SpanTooLong(25))
        ));
        // prime leaking past the window end
        assert!(matches!(
            PostingWindow::new(20, 26, 21, 27),
            Err(WindowError::PrimeOutsideWindow { .. })
        ));
        // prime starting before the window
        assert!(matches!(
            PostingWindow::new(20, 26, 19, 25),
            Err(WindowError::PrimeOutsideWindow { .. })
        ));
    }

    #[test]
    fn test_spans_and_offsets() {
        let w = PostingWindow::new(20, 26, 21, 25).unwrap();

        assert_eq!(w.span_minutes(), 360);
        assert_eq!(w.prime_span_minutes(), 240);
        assert_eq!(w.prime_offset_range(), (60, 300));
        assert!(w.offset_is_prime(60));
        assert!(w.offset_is_prime(299));
        assert!(!w.offset_is_prime(300));
        assert!(!w.offset_is_prime(0));
    }

    #[test]
    fn test_partition_is_consistent() {
        // Every hour of the day is either in or out, never both
        let w = PostingWindow::new(20, 26, 21, 25).unwrap();
        let inside: Vec<u8> = (0u8..24).filter(|h| w.contains_hour(*h)).collect();
        assert_eq!(inside, vec![0, 1, 20, 21, 22, 23]);
    }
}
