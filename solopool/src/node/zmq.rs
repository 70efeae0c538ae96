//! ZMQ `hashblock` subscription.
//!
//! The node publishes a message on every new chain tip. The payload (the
//! new block hash) is irrelevant here; any message forces an immediate
//! template refresh. Socket failures reconnect with capped, jittered
//! backoff so a node restart cannot stall job production for long.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zeromq::{Socket, SocketRecv, SubSocket};

use crate::error::Result;
use crate::tracing::prelude::*;

const TOPIC: &str = "hashblock";

/// Reconnect delay schedule: doubling from `base`, capped at `cap`.
///
/// Each nominal delay is stretched by up to a quarter using a cheap
/// xorshift stream, so many pool processes restarting against the same
/// node do not retry in lockstep. The stream is seeded from the process
/// id and the subsecond clock, which is plenty of decorrelation for a
/// retry loop.
pub(crate) struct RetrySchedule {
    attempt: u32,
    base: Duration,
    cap: Duration,
    rng: u64,
}

impl RetrySchedule {
    pub(crate) fn new(base: Duration, cap: Duration) -> Self {
        let clock = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0);
        Self {
            attempt: 0,
            base,
            cap,
            // Odd seed, so the xorshift state can never collapse to zero.
            rng: (clock ^ ((std::process::id() as u64) << 32)) | 1,
        }
    }

    /// The delay before the next attempt: `base * 2^attempt`, capped,
    /// then stretched into [1.0, 1.25) of its nominal value.
    pub(crate) fn next(&mut self) -> Duration {
        let doubled = self.base.saturating_mul(1 << self.attempt.min(16));
        let nominal = doubled.min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        let stretch = 1.0 + (self.rng % 1024) as f64 / 4096.0;

        nominal.mul_f64(stretch)
    }

    /// Start over from `base` after a healthy connection.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Subscribe to `hashblock` and forward a unit notification per message.
///
/// Runs until shutdown; transient socket errors reconnect with backoff
/// capped at 30 seconds.
pub async fn hashblock_task(
    endpoint: String,
    notify_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
) {
    let mut retry = RetrySchedule::new(Duration::from_secs(1), Duration::from_secs(30));

    while !shutdown.is_cancelled() {
        match listen(&endpoint, &notify_tx, &mut retry, &shutdown).await {
            Ok(()) => break, // shutdown or consumer gone
            Err(e) => {
                let delay = retry.next();
                warn!(
                    endpoint = %endpoint,
                    error = %e,
                    retry_in = ?delay,
                    "ZMQ subscription failed"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }

    trace!("hashblock task stopped");
}

async fn listen(
    endpoint: &str,
    notify_tx: &mpsc::Sender<()>,
    retry: &mut RetrySchedule,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut socket = SubSocket::new();
    socket.connect(endpoint).await?;
    socket.subscribe(TOPIC).await?;
    debug!(endpoint = %endpoint, "Subscribed to hashblock notifications");
    retry.reset();

    loop {
        tokio::select! {
            message = socket.recv() => {
                let message = message?;
                let topic = message.get(0).map(|frame| frame.as_ref());
                if topic != Some(TOPIC.as_bytes()) {
                    continue;
                }
                debug!("New tip signalled via ZMQ");
                if notify_tx.send(()).await.is_err() {
                    return Ok(());
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_within_the_stretch_band() {
        let mut retry = RetrySchedule::new(Duration::from_secs(1), Duration::from_secs(60));

        let d1 = retry.next();
        let d2 = retry.next();
        let d3 = retry.next();

        // Nominal sequence is 1s, 2s, 4s, each stretched into
        // [nominal, 1.25 * nominal).
        assert!(d1 >= Duration::from_secs(1), "d1={d1:?}");
        assert!(d1 < Duration::from_millis(1250), "d1={d1:?}");

        assert!(d2 >= Duration::from_secs(2), "d2={d2:?}");
        assert!(d2 < Duration::from_millis(2500), "d2={d2:?}");

        assert!(d3 >= Duration::from_secs(4), "d3={d3:?}");
        assert!(d3 < Duration::from_millis(5000), "d3={d3:?}");
    }

    #[test]
    fn schedule_caps_at_the_limit() {
        let mut retry = RetrySchedule::new(Duration::from_secs(10), Duration::from_secs(25));

        let _d1 = retry.next(); // 10s nominal
        let d2 = retry.next(); // 20s nominal
        let d3 = retry.next(); // 40s nominal, capped to 25s

        assert!(d2 >= Duration::from_secs(20) && d2 < Duration::from_secs(25), "d2={d2:?}");
        assert!(d3 >= Duration::from_secs(25), "d3={d3:?}");
        assert!(d3 < Duration::from_millis(31_250), "d3={d3:?}");

        let d4 = retry.next();
        assert!(d4 >= Duration::from_secs(25), "d4={d4:?}");
        assert!(d4 < Duration::from_millis(31_250), "d4={d4:?}");
    }

    #[test]
    fn reset_returns_to_base() {
        let mut retry = RetrySchedule::new(Duration::from_secs(1), Duration::from_secs(60));

        let _ = retry.next();
        let _ = retry.next();

        retry.reset();

        let d = retry.next();
        assert!(d >= Duration::from_secs(1), "d={d:?}");
        assert!(d < Duration::from_millis(1250), "d={d:?}");
    }

    #[test]
    fn attempt_counter_saturates_instead_of_overflowing() {
        let mut retry = RetrySchedule::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..100 {
            let d = retry.next();
            assert!(d < Duration::from_millis(37_500), "d={d:?}");
        }
    }
}
