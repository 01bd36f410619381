use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Enforces a minimum gap between the start of any two requests that share it.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    jitter: Duration,
    last_issued: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, jitter: Duration) -> Self {
        Self {
            min_delay,
            jitter,
            last_issued: Mutex::new(None),
        }
    }

    /// Wait until a request may be issued and claim the slot.
    ///
    /// The lock is held while sleeping, so concurrent callers queue up behind
    /// each other rather than all firing once the gap has passed.
    pub async fn acquire(&self) {
        let mut last = self.last_issued.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_delay + self.jitter_sample();
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn jitter_sample(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
