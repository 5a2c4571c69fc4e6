//! Sliding-window rate limits.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Block edits allowed inside `ANTI_GRIEF_WINDOW`.
pub const ANTI_GRIEF_BLOCKS: usize = 47;
pub const ANTI_GRIEF_WINDOW: Duration = Duration::from_secs(6);

/// Chat messages allowed inside `CHAT_SPAM_WINDOW`.
pub const CHAT_SPAM_MESSAGES: usize = 3;
pub const CHAT_SPAM_WINDOW: Duration = Duration::from_secs(4);

/// Block updates written to one client per `THROTTLE_INTERVAL`.
pub const THROTTLE_THRESHOLD: usize = 2500;
pub const THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Remembers the times of the last `limit` events. An event is spam when the
/// oldest remembered one happened less than `window` ago.
#[derive(Debug, Clone)]
pub struct SpamLog {
    limit: usize,
    window: Duration,
    times: VecDeque<Instant>,
}

impl SpamLog {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            times: VecDeque::with_capacity(limit),
        }
    }

    pub fn blocks() -> Self {
        Self::new(ANTI_GRIEF_BLOCKS, ANTI_GRIEF_WINDOW)
    }

    pub fn chat() -> Self {
        Self::new(CHAT_SPAM_MESSAGES, CHAT_SPAM_WINDOW)
    }

    /// Records an event at `now`. Returns `true` if it exceeds the limit, in
    /// which case it is not recorded.
    pub fn is_spam(&mut self, now: Instant) -> bool {
        if self.times.len() >= self.limit {
            if let Some(oldest) = self.times.pop_front() {
                if now.saturating_duration_since(oldest) < self.window {
                    return true;
                }
            }
        }
        self.times.push_back(now);
        false
    }
}

/// Caps how many block updates are written per interval.
#[derive(Debug, Clone)]
pub struct SendThrottle {
    threshold: usize,
    interval: Duration,
    sent: usize,
    window_end: Instant,
}

impl SendThrottle {
    pub fn new(threshold: usize, interval: Duration, now: Instant) -> Self {
        Self {
            threshold,
            interval,
            sent: 0,
            window_end: now + interval,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.sent < self.threshold
    }

    pub fn record(&mut self) {
        self.sent += 1;
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Opens a new window once the current one has elapsed.
    pub fn refresh(&mut self, now: Instant) {
        if now > self.window_end {
            self.sent = 0;
            self.window_end = now + self.interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_limit_boundary() {
        let start = Instant::now();
        let mut log = SpamLog::blocks();
        for i in 0..ANTI_GRIEF_BLOCKS {
            let now = start + Duration::from_millis(i as u64 * 10);
            assert!(!log.is_spam(now), "edit {} flagged", i);
        }
        assert!(log.is_spam(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_spacing_beyond_window_resets() {
        let start = Instant::now();
        let mut log = SpamLog::blocks();
        for _ in 0..ANTI_GRIEF_BLOCKS {
            assert!(!log.is_spam(start));
        }
        let later = start + ANTI_GRIEF_WINDOW + Duration::from_millis(1);
        for _ in 0..ANTI_GRIEF_BLOCKS {
            assert!(!log.is_spam(later));
        }
        assert!(log.is_spam(later));
    }

    #[test]
    fn test_chat_limit() {
        let start = Instant::now();
        let mut log = SpamLog::chat();
        assert!(!log.is_spam(start));
        assert!(!log.is_spam(start + Duration::from_secs(1)));
        assert!(!log.is_spam(start + Duration::from_secs(2)));
        assert!(log.is_spam(start + Duration::from_secs(3)));
    }

    #[test]
    fn test_throttle_window() {
        let start = Instant::now();
        let mut throttle = SendThrottle::new(3, THROTTLE_INTERVAL, start);
        while throttle.has_capacity() {
            throttle.record();
        }
        assert_eq!(throttle.sent(), 3);

        throttle.refresh(start + Duration::from_millis(500));
        assert!(!throttle.has_capacity());

        throttle.refresh(start + Duration::from_millis(1001));
        assert!(throttle.has_capacity());
        assert_eq!(throttle.sent(), 0);
    }
}
