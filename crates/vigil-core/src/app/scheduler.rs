use std::time::{Duration, Instant};

use rand::Rng;

pub fn random_jitter(jitter_seconds: u64) -> Duration {
    if jitter_seconds == 0 {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0..=jitter_seconds);
    Duration::from_secs(secs)
}

/// Deadline of the next scheduled policy run.
pub fn next_run_in(every: Duration, jitter_seconds: u64, now: Instant) -> Instant {
    now + every + random_jitter(jitter_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_bounds_are_respected() {
        for _ in 0..64 {
            let jitter = random_jitter(5).as_secs();
            assert!(jitter <= 5);
        }
        assert_eq!(random_jitter(0), Duration::ZERO);
    }

    #[test]
    fn next_run_is_in_future() {
        let now = Instant::now();
        let next = next_run_in(Duration::from_secs(30 * 60), 10, now);
        assert!(next >= now + Duration::from_secs(30 * 60));
        assert!(next <= now + Duration::from_secs(30 * 60 + 10));
    }
}
