//! Launch pacing: a semaphore refilled at a fixed rate.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MIN_PERIOD: Duration = Duration::from_millis(1);

// tokens added per tick, rounded, never zero
fn refill_batch(per_sec: u64, period: Duration) -> usize {
    let per_tick = (u128::from(per_sec) * period.as_micros() + 500_000) / 1_000_000;
    usize::try_from(per_tick).unwrap_or(usize::MAX).max(1)
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    sem: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.refill.abort();
    }
}

impl RateLimiter {
    /// Must be created inside a tokio runtime. Unused tokens accumulate up to
    /// one second's worth. Rates above 1000/s are refilled in batches since
    /// the timer does not tick faster than once per millisecond.
    pub fn new(tokens_per_sec: u32) -> Self {
        let per_sec = u64::from(tokens_per_sec.max(1));
        let period = Duration::from_micros(1_000_000 / per_sec).max(MIN_PERIOD);
        let per_tick = refill_batch(per_sec, period);
        let burst = usize::try_from(per_sec).unwrap_or(usize::MAX).max(per_tick);
        let sem = Arc::new(Semaphore::new(0));
        let sem_bg = sem.clone();
        let refill = tokio::spawn(async move {
            let mut t = tokio::time::interval(period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                let room = burst.saturating_sub(sem_bg.available_permits());
                if room > 0 {
                    sem_bg.add_permits(per_tick.min(room));
                }
            }
        });
        RateLimiter { inner: Arc::new(Inner { sem, refill }) }
    }

    pub async fn acquire(&self) {
        if let Ok(permit) = self.inner.sem.acquire().await {
            permit.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn paces_acquisitions() {
        let rl = RateLimiter::new(50);
        let start = Instant::now();
        for _ in 0..5 {
            rl.acquire().await;
        }
        // first token is immediate, then one every 20ms
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn batch_sizes() {
        assert_eq!(refill_batch(50, Duration::from_millis(20)), 1);
        assert_eq!(refill_batch(1500, MIN_PERIOD), 2);
        assert_eq!(refill_batch(2_000_000, MIN_PERIOD), 2000);
        assert_eq!(refill_batch(u64::from(u32::MAX), MIN_PERIOD), 4_294_967);
    }

    #[tokio::test]
    async fn very_high_rates_still_hand_out_tokens() {
        for rate in [2_000_000, u32::MAX] {
            let rl = RateLimiter::new(rate);
            let got = tokio::time::timeout(Duration::from_secs(2), async {
                for _ in 0..100 {
                    rl.acquire().await;
                }
            })
            .await;
            assert!(got.is_ok(), "rate {rate} stalled");
        }
    }
}
