//! Fixed-window request quotas per source.
//!
//! Each source owns its own counter behind its own lock so concurrent
//! completions for different sources never contend.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::RateLimitRule;

#[derive(Debug)]
struct Window {
    limit: u32,
    length: Duration,
    count: u32,
    started: Instant,
}

impl Window {
    /// Move the window start forward by whole windows so boundaries stay aligned.
    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.length {
            let windows = elapsed.as_nanos() / self.length.as_nanos();
            let advance = self.length.as_nanos() * windows;
            self.started += Duration::from_nanos(advance.min(u64::MAX as u128) as u64);
            self.count = 0;
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: HashMap<String, Mutex<Window>>,
}

impl RateLimiter {
    pub fn new(rules: &HashMap<String, RateLimitRule>) -> Self {
        Self::new_at(rules, Instant::now())
    }

    pub(crate) fn new_at(rules: &HashMap<String, RateLimitRule>, start: Instant) -> Self {
        let windows = rules
            .iter()
            .map(|(source, rule)| {
                (
                    source.to_lowercase(),
                    Mutex::new(Window {
                        limit: rule.limit,
                        length: Duration::from_secs(rule.window_secs.max(1)),
                        count: 0,
                        started: start,
                    }),
                )
            })
            .collect();
        Self { windows }
    }

    /// Take one slot for `source` if the current window has room.
    ///
    /// Sources without a configured rule are unlimited. A rejection leaves
    /// the counter untouched.
    pub fn allow(&self, source: &str) -> bool {
        self.allow_at(source, Instant::now())
    }

    pub fn allow_at(&self, source: &str, now: Instant) -> bool {
        let Some(window) = self.windows.get(&source.to_lowercase()) else {
            return true;
        };
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.roll(now);
        if window.count < window.limit {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Slots left in the current window, or `None` when the source is unlimited.
    pub fn remaining(&self, source: &str) -> Option<u32> {
        self.remaining_at(source, Instant::now())
    }

    pub fn remaining_at(&self, source: &str, now: Instant) -> Option<u32> {
        let window = self.windows.get(&source.to_lowercase())?;
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.roll(now);
        Some(window.limit.saturating_sub(window.count))
    }

    pub fn rule(&self, source: &str) -> Option<RateLimitRule> {
        let window = self.windows.get(&source.to_lowercase())?;
        let window = window.lock().unwrap_or_else(PoisonError::into_inner);
        Some(RateLimitRule {
            limit: window.limit,
            window_secs: window.length.as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(start: Instant) -> RateLimiter {
        let rules = HashMap::from([
            (
                "instagram".to_string(),
                RateLimitRule {
                    limit: 5,
                    window_secs: 60,
                },
            ),
            (
                "tiktok".to_string(),
                RateLimitRule {
                    limit: 0,
                    window_secs: 60,
                },
            ),
        ]);
        RateLimiter::new_at(&rules, start)
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let start = Instant::now();
        let rl = limiter(start);

        for _ in 0..5 {
            assert!(rl.allow_at("instagram", start));
        }
        assert!(!rl.allow_at("instagram", start + Duration::from_secs(59)));
        assert_eq!(rl.remaining_at("instagram", start), Some(0));
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let start = Instant::now();
        let rl = limiter(start);
        for _ in 0..5 {
            rl.allow_at("instagram", start);
        }
        for _ in 0..10 {
            assert!(!rl.allow_at("instagram", start));
        }
        // The next window opens with the full quota.
        assert_eq!(
            rl.remaining_at("instagram", start + Duration::from_secs(60)),
            Some(5)
        );
    }

    #[test]
    fn test_window_boundary_resets_counter() {
        let start = Instant::now();
        let rl = limiter(start);
        for _ in 0..5 {
            assert!(rl.allow_at("instagram", start + Duration::from_secs(10)));
        }
        assert!(!rl.allow_at("instagram", start + Duration::from_secs(30)));
        assert!(rl.allow_at("instagram", start + Duration::from_secs(61)));
        assert_eq!(
            rl.remaining_at("instagram", start + Duration::from_secs(62)),
            Some(4)
        );
    }

    #[test]
    fn test_window_skips_idle_periods_aligned() {
        let start = Instant::now();
        let rl = limiter(start);
        assert!(rl.allow_at("instagram", start + Duration::from_secs(250)));
        // 250s falls in the window starting at 240s, which closes at 300s.
        for _ in 0..4 {
            assert!(rl.allow_at("instagram", start + Duration::from_secs(299)));
        }
        assert!(!rl.allow_at("instagram", start + Duration::from_secs(299)));
        assert!(rl.allow_at("instagram", start + Duration::from_secs(300)));
    }

    #[test]
    fn test_unknown_source_is_unlimited() {
        let rl = limiter(Instant::now());
        for _ in 0..1000 {
            assert!(rl.allow("mastodon"));
        }
        assert_eq!(rl.remaining("mastodon"), None);
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        let rl = limiter(Instant::now());
        assert!(!rl.allow("tiktok"));
        assert_eq!(rl.remaining("tiktok"), Some(0));
    }

    #[test]
    fn test_source_names_are_case_insensitive() {
        let rl = limiter(Instant::now());
        assert!(rl.allow("Instagram"));
        assert_eq!(rl.remaining("INSTAGRAM"), Some(4));
        assert_eq!(rl.rule("instagram").map(|r| r.window_secs), Some(60));
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let start = Instant::now();
        let rl = Arc::new(limiter(start));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| rl.allow_at("instagram", start))
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 5);
    }
}
