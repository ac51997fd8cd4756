//! Redis liveness heartbeat.
//!
//! Every second the heart writes a millisecond timestamp to
//! `heartbeat:<app>:<uid>`, reads it back, and asserts equality. A monitor
//! task samples the time of the last successful beat: past the warn
//! threshold it logs once, and past the fail threshold it runs the
//! shutdown hook (bounded to ten seconds) and exits the process. A bot
//! that cannot reach its store is better dead and restarted than alive
//! and silently dropping work.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fred::prelude::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long the shutdown hook gets before the process is exited anyway.
const SHUTDOWN_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Beat and monitor cadence.
const BEAT_INTERVAL: Duration = Duration::from_secs(1);

/// A cleanup hook run before the process exits on store failure.
pub type ShutdownFn = Box<dyn FnOnce() + Send>;

/// Errors from heartbeat construction.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// No instance id was provided for the key.
    #[error("a uid must be provided")]
    MissingUid,

    /// The initial beat failed, so the store is unreachable at startup.
    #[error("initial beat error: {0}")]
    InitialBeat(#[source] BeatError),
}

/// Errors from a single beat.
#[derive(Debug, Error)]
pub enum BeatError {
    #[error("failed to beat: {0}")]
    Write(#[source] RedisError),

    #[error("failed to read beat: {0}")]
    Read(#[source] RedisError),

    #[error("beat not found after write")]
    Missing,

    #[error("beat read back {got}, want {want}")]
    Mismatch { got: i64, want: i64 },
}

/// Heartbeat configuration.
pub struct HeartbeatConfig {
    /// Application name, part of the store key.
    pub app_name: String,

    /// Instance id, part of the store key.
    pub uid: String,

    /// Age of the last successful beat that triggers a warning.
    pub warn: Duration,

    /// Age of the last successful beat that triggers process exit.
    pub fail: Duration,

    /// Optional cleanup to run before exiting.
    pub shutdown_fn: Option<ShutdownFn>,
}

/// The thing that beats.
pub struct Heart {
    done: CancellationToken,
}

impl Heart {
    /// Starts beating.
    ///
    /// Performs one synchronous beat so a dead store fails construction
    /// immediately, then spawns the pulse and monitor tasks. Both respect
    /// `shutdown`.
    pub async fn new(
        client: RedisClient,
        config: HeartbeatConfig,
        shutdown: CancellationToken,
    ) -> Result<Heart, HeartbeatError> {
        if config.uid.is_empty() {
            return Err(HeartbeatError::MissingUid);
        }

        let key = format!("heartbeat:{}:{}", config.app_name, config.uid);
        let ttl = config.fail + Duration::from_secs(60);

        let state = Arc::new(HeartState {
            client,
            key,
            ttl,
            last: Mutex::new(Instant::now()),
        });

        state.beat().await.map_err(HeartbeatError::InitialBeat)?;

        let done = CancellationToken::new();

        tokio::spawn(pulse(Arc::clone(&state), shutdown.clone()));
        tokio::spawn(monitor(
            state,
            config.warn,
            config.fail,
            config.shutdown_fn,
            shutdown,
            done.clone(),
        ));

        Ok(Heart { done })
    }

    /// A token that fires when the heart gives up on the store. Other
    /// subsystems can observe it to coordinate shutdown.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }
}

struct HeartState {
    client: RedisClient,
    key: String,
    ttl: Duration,
    last: Mutex<Instant>,
}

impl HeartState {
    /// One beat: write the current ms timestamp, read it back, compare.
    async fn beat(&self) -> Result<(), BeatError> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        let _: () = self
            .client
            .set(
                &self.key,
                now_ms,
                Some(fred::types::Expiration::EX(self.ttl.as_secs() as i64)),
                None,
                false,
            )
            .await
            .map_err(BeatError::Write)?;

        let read: Option<i64> = self.client.get(&self.key).await.map_err(BeatError::Read)?;

        let got = read.ok_or(BeatError::Missing)?;
        if got != now_ms {
            return Err(BeatError::Mismatch { got, want: now_ms });
        }

        *self.last.lock().expect("heartbeat mutex poisoned") = Instant::now();

        Ok(())
    }

    fn since_last(&self) -> Duration {
        self.last.lock().expect("heartbeat mutex poisoned").elapsed()
    }
}

async fn pulse(state: Arc<HeartState>, shutdown: CancellationToken) {
    info!("starting 1 second pulses");

    let mut tick = tokio::time::interval(BEAT_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await; // the immediate first tick; construction already beat

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tick.tick() => {}
        }

        if let Err(e) = state.beat().await {
            error!(error = %e, "heartbeat failed");
        }
    }
}

async fn monitor(
    state: Arc<HeartState>,
    warn_after: Duration,
    fail_after: Duration,
    shutdown_fn: Option<ShutdownFn>,
    shutdown: CancellationToken,
    done: CancellationToken,
) {
    let mut tick = tokio::time::interval(BEAT_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut warned = false;
    let mut shutdown_fn = shutdown_fn;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tick.tick() => {}
        }

        let age = state.since_last();

        if age < warn_after {
            warned = false;
        } else if !warned {
            warn!(
                since_last_heartbeat = ?age,
                "redis heartbeat is going stale"
            );
            warned = true;
        } else if age >= fail_after {
            error!(
                since_last_heartbeat = ?age,
                "redis connection might be gone; trying to cleanly shut down"
            );

            bailout(shutdown_fn.take(), done).await;
            return;
        }
    }
}

/// Runs the shutdown hook under its timeout guard, then exits the
/// process.
async fn bailout(shutdown_fn: Option<ShutdownFn>, done: CancellationToken) {
    done.cancel();

    let mut msg = "cleanly exiting";

    if let Some(hook) = shutdown_fn {
        let guarded = tokio::time::timeout(
            SHUTDOWN_HOOK_TIMEOUT,
            tokio::task::spawn_blocking(hook),
        );

        if guarded.await.is_err() {
            msg = "clean shutdown timed out, exiting now!";
        }
    }

    error!("{msg}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The beating half needs a live store and is covered by deployment
    // smoke tests; what's unit-testable is the edge logic the monitor
    // derives its decisions from.

    /// The monitor's decision for a given beat age.
    #[derive(Debug, PartialEq, Eq)]
    enum Decision {
        Healthy,
        Warn,
        Quiet,
        Bail,
    }

    fn decide(age: Duration, warn_after: Duration, fail_after: Duration, warned: bool) -> Decision {
        if age < warn_after {
            Decision::Healthy
        } else if age < fail_after {
            if warned { Decision::Quiet } else { Decision::Warn }
        } else if warned {
            Decision::Bail
        } else {
            // fail threshold crossed without ever warning: the next
            // sample warns first
            Decision::Warn
        }
    }

    const WARN: Duration = Duration::from_secs(4);
    const FAIL: Duration = Duration::from_secs(8);

    #[test]
    fn fresh_beats_are_healthy() {
        assert_eq!(decide(Duration::from_secs(1), WARN, FAIL, false), Decision::Healthy);
    }

    #[test]
    fn warning_fires_once_on_the_rising_edge() {
        assert_eq!(decide(Duration::from_secs(5), WARN, FAIL, false), Decision::Warn);
        assert_eq!(decide(Duration::from_secs(6), WARN, FAIL, true), Decision::Quiet);
    }

    #[test]
    fn recovery_clears_the_warning() {
        assert_eq!(decide(Duration::from_secs(1), WARN, FAIL, true), Decision::Healthy);
    }

    #[test]
    fn bail_requires_a_prior_warning() {
        assert_eq!(decide(Duration::from_secs(9), WARN, FAIL, true), Decision::Bail);
        assert_eq!(decide(Duration::from_secs(9), WARN, FAIL, false), Decision::Warn);
    }

    #[tokio::test]
    async fn missing_uid_is_rejected() {
        let config = RedisConfig::default();
        let client = RedisClient::new(config, None, None, None);

        let result = Heart::new(
            client,
            HeartbeatConfig {
                app_name: "bot".to_string(),
                uid: String::new(),
                warn: WARN,
                fail: FAIL,
                shutdown_fn: None,
            },
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(HeartbeatError::MissingUid)));
    }
}
