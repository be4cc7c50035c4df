//! Byte accounting for session progress.
//!
//! A session tracks two counters across all of its active transfers, in
//! both directions: the total bytes of every transfer started since the
//! counters were last reset, and the bytes still outstanding. Progress is
//! `1 - remaining / total`. When nothing remains, both counters return to
//! zero so the next batch of transfers starts from a clean baseline.

/// Aggregate byte counters of a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteAccounting {
    total: u64,
    remaining: u64,
}

impl ByteAccounting {
    /// Create empty counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: 0,
            remaining: 0,
        }
    }

    /// Bytes of every transfer counted since the last reset.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Bytes not yet transferred.
    #[must_use]
    pub const fn remaining_bytes(&self) -> u64 {
        self.remaining
    }

    /// Whether the counters are at their baseline.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.total == 0 && self.remaining == 0
    }

    /// Count a new transfer of `bytes` bytes.
    pub fn start(&mut self, bytes: u64) {
        self.total = self.total.saturating_add(bytes);
        self.remaining = self.remaining.saturating_add(bytes);
    }

    /// Record that `bytes` bytes were transferred.
    pub fn advance(&mut self, bytes: u64) {
        self.remaining = self.remaining.saturating_sub(bytes);
        self.reset_if_done();
    }

    /// Forget `bytes` bytes of a transfer that will never complete.
    ///
    /// They leave both counters, so the remaining transfers still reach
    /// full progress.
    pub fn retire(&mut self, bytes: u64) {
        let bytes = bytes.min(self.remaining);
        self.total -= bytes.min(self.total);
        self.remaining -= bytes;
        self.reset_if_done();
    }

    /// Drop all counted bytes.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Progress in `[0, 1]`. A session with nothing counted is complete.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (1.0 - self.remaining as f64 / self.total as f64).clamp(0.0, 1.0)
    }

    fn reset_if_done(&mut self) {
        if self.remaining == 0 {
            self.total = 0;
        }
    }
}

/// Converts fractional delivery reports for one chunk into byte deltas.
///
/// Reports are clamped to `[0, 1]` and never move backwards, so the sum of
/// all deltas for a chunk is exactly the chunk length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTracker {
    chunk_len: u64,
    reported: u64,
}

impl DeliveryTracker {
    /// Track delivery of a chunk of `chunk_len` bytes.
    #[must_use]
    pub const fn new(chunk_len: u64) -> Self {
        Self {
            chunk_len,
            reported: 0,
        }
    }

    /// Bytes accounted for so far.
    #[must_use]
    pub const fn reported(&self) -> u64 {
        self.reported
    }

    /// Apply a delivery fraction, returning the newly delivered bytes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn report(&mut self, fraction: f64) -> u64 {
        if fraction.is_nan() {
            return 0;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let bytes = ((fraction * self.chunk_len as f64).ceil() as u64).min(self.chunk_len);
        if bytes <= self.reported {
            return 0;
        }
        let delta = bytes - self.reported;
        self.reported = bytes;
        delta
    }

    /// Mark the chunk fully delivered, returning the bytes not yet reported.
    pub fn finish(&mut self) -> u64 {
        let delta = self.chunk_len - self.reported;
        self.reported = self.chunk_len;
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_and_reset() {
        let mut acc = ByteAccounting::new();
        assert!(acc.is_idle());
        assert!((acc.progress() - 1.0).abs() < f64::EPSILON);

        acc.start(100);
        assert!(acc.progress().abs() < f64::EPSILON);

        acc.advance(25);
        assert!((acc.progress() - 0.25).abs() < 1e-9);
        assert_eq!(acc.remaining_bytes(), 75);

        acc.advance(75);
        assert!(acc.is_idle(), "counters reset once nothing remains");
        assert!((acc.progress() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_spans_concurrent_transfers() {
        let mut acc = ByteAccounting::new();
        acc.start(100);
        acc.start(300);
        acc.advance(100);
        assert!((acc.progress() - 0.25).abs() < 1e-9);
        assert_eq!(acc.total_bytes(), 400);
    }

    #[test]
    fn test_advance_saturates() {
        let mut acc = ByteAccounting::new();
        acc.start(10);
        acc.advance(50);
        assert!(acc.is_idle());
    }

    #[test]
    fn test_retire_unblocks_remaining_transfers() {
        let mut acc = ByteAccounting::new();
        acc.start(100);
        acc.start(100);
        acc.advance(40);

        // second transfer fails with 100 bytes unsent
        acc.retire(100);
        assert_eq!(acc.total_bytes(), 100);
        assert_eq!(acc.remaining_bytes(), 60);

        acc.advance(60);
        assert!(acc.is_idle());
    }

    #[test]
    fn test_tracker_monotonic_and_clamped() {
        let mut tracker = DeliveryTracker::new(1000);
        assert_eq!(tracker.report(0.25), 250);
        assert_eq!(tracker.report(0.1), 0, "fractions never move backwards");
        assert_eq!(tracker.report(-3.0), 0);
        assert_eq!(tracker.report(f64::NAN), 0);
        assert_eq!(tracker.report(0.5), 250);
        assert_eq!(tracker.report(7.0), 500);
        assert_eq!(tracker.finish(), 0);
        assert_eq!(tracker.reported(), 1000);
    }

    #[test]
    fn test_tracker_rounds_up_and_tops_up() {
        let mut tracker = DeliveryTracker::new(3);
        assert_eq!(tracker.report(0.5), 2);
        assert_eq!(tracker.finish(), 1);

        let mut silent = DeliveryTracker::new(42);
        assert_eq!(silent.finish(), 42);
    }
}
