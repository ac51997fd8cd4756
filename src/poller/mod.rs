//! Background pollers for the bgtasks process.
//!
//! Each poller owns one task driven by an interval timer with uniform
//! jitter, so a fleet of instances doesn't stampede the upstream service
//! on the same tick. The first tick fires immediately; failures are
//! logged and retried on the next tick.

pub mod channel_cache;
pub mod episodes;

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::queue::BoxError;

/// One periodic background job.
pub struct Poller<F> {
    name: &'static str,
    interval: Duration,
    jitter: Duration,
    tick_timeout: Duration,
    tick: F,
}

impl<F, Fut> Poller<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), BoxError>>,
{
    /// Creates a poller that runs `tick` every `interval` plus a uniform
    /// jitter of up to `jitter`.
    pub fn new(
        name: &'static str,
        interval: Duration,
        jitter: Duration,
        tick_timeout: Duration,
        tick: F,
    ) -> Self {
        Poller {
            name,
            interval,
            jitter,
            tick_timeout,
            tick,
        }
    }

    /// Runs until `shutdown` fires. The first tick happens immediately.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(poller = self.name, "starting poller");

        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let tick = (self.tick)();
            match tokio::time::timeout(self.tick_timeout, tick).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(poller = self.name, error = %e, "poll failed; trying again next tick");
                }
                Err(_elapsed) => {
                    error!(poller = self.name, "poll timed out; trying again next tick");
                }
            }

            delay = self.interval + jittered(self.jitter);
        }

        info!(poller = self.name, "poller stopped");
    }
}

/// A uniform draw in `[0, max]`.
fn jittered(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }

    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jitter_stays_in_range() {
        let max = Duration::from_millis(500);
        for _ in 0..100 {
            assert!(jittered(max) <= max);
        }

        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn first_tick_fires_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let tick_count = Arc::clone(&count);
        let tick_shutdown = shutdown.clone();
        let poller = Poller::new(
            "test",
            Duration::from_secs(3600),
            Duration::ZERO,
            Duration::from_secs(1),
            move || {
                let count = Arc::clone(&tick_count);
                let shutdown = tick_shutdown.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    // stop the poller after the first tick
                    shutdown.cancel();
                    Ok(())
                }
            },
        );

        tokio::time::timeout(Duration::from_secs(5), poller.run(shutdown))
            .await
            .expect("poller should stop after first tick");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_tick_does_not_stop_the_poller() {
        let count = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let tick_count = Arc::clone(&count);
        let tick_shutdown = shutdown.clone();
        let poller = Poller::new(
            "test",
            Duration::from_millis(1),
            Duration::ZERO,
            Duration::from_secs(1),
            move || {
                let count = Arc::clone(&tick_count);
                let shutdown = tick_shutdown.clone();
                async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    if n >= 2 {
                        shutdown.cancel();
                        return Ok(());
                    }
                    Err::<(), _>("boom".into())
                }
            },
        );

        tokio::time::timeout(Duration::from_secs(5), poller.run(shutdown))
            .await
            .expect("poller should keep ticking through failures");

        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
