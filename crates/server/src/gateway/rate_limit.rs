use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_sends: usize,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_sends: 6,
            window: Duration::from_secs(5),
        }
    }
}

/// Sliding-window send log for one user.
///
/// Timestamps older than the window are pruned on every attempt. A rejected
/// attempt is not recorded, so hammering the limit does not extend it.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    sends: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Records a send at `now`, or returns how long until the oldest send in
    /// the window expires.
    pub fn try_acquire(&mut self, policy: RateLimitPolicy, now: Instant) -> Result<(), Duration> {
        while let Some(oldest) = self.sends.front() {
            if now.saturating_duration_since(*oldest) >= policy.window {
                self.sends.pop_front();
            } else {
                break;
            }
        }

        if self.sends.len() >= policy.max_sends {
            let retry_after = self
                .sends
                .front()
                .map(|oldest| policy.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(policy.window);
            return Err(retry_after);
        }

        self.sends.push_back(now);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seventh_send_is_rejected_until_oldest_ages_out() {
        let policy = RateLimitPolicy::default();
        let start = Instant::now();
        let mut window = SlidingWindow::default();

        for i in 0..6 {
            window
                .try_acquire(policy, start + Duration::from_millis(i * 100))
                .expect("within limit");
        }

        let retry = window
            .try_acquire(policy, start + Duration::from_millis(700))
            .expect_err("seventh send");
        assert_eq!(retry, Duration::from_millis(4_300));
        assert_eq!(window.len(), 6);

        window
            .try_acquire(policy, start + Duration::from_millis(5_000))
            .expect("oldest expired");
        assert_eq!(window.len(), 6);
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_window() {
        let policy = RateLimitPolicy {
            max_sends: 1,
            window: Duration::from_secs(1),
        };
        let start = Instant::now();
        let mut window = SlidingWindow::default();

        window.try_acquire(policy, start).expect("first");
        for ms in [100, 500, 900] {
            assert!(window
                .try_acquire(policy, start + Duration::from_millis(ms))
                .is_err());
        }
        window
            .try_acquire(policy, start + Duration::from_secs(1))
            .expect("window elapsed");
    }
}
