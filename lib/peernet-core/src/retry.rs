//! Bounded retry helpers for optimistic-concurrency writes
//!
//! Writes against the API server carry the resourceVersion they were based
//! on; a stale version is rejected with a conflict. These helpers re-run the
//! whole read-modify-write sequence a bounded number of times.

use crate::{CoreError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry schedule: `steps` attempts, waiting `duration * factor^n` plus jitter between them
#[derive(Clone, Debug)]
pub struct Backoff {
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Backoff {
    /// Five attempts ten milliseconds apart, for conflicts on a single object
    pub const DEFAULT: Backoff = Backoff {
        steps: 5,
        duration: Duration::from_millis(10),
        factor: 1.0,
        jitter: 0.1,
    };

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.duration.mul_f64(self.factor.powi(attempt as i32));
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            base + base.mul_f64(extra)
        } else {
            base
        }
    }

    async fn wait(&self, attempt: u32) {
        let delay = self.delay(attempt);
        debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying");
        tokio::time::sleep(delay).await;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Run `op` until it succeeds, fails with an error `retriable` rejects, or the budget runs out
pub async fn retry_on<T, E, F, Fut, P>(
    backoff: &Backoff,
    retriable: P,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retriable(&e) && attempt + 1 < backoff.steps => {
                backoff.wait(attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`retry_on`] specialised to version conflicts
pub async fn retry_on_conflict<T, F, Fut>(backoff: &Backoff, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_on(backoff, CoreError::is_conflict, op).await
}

/// Read an object, let `modify` change it, and write it back, starting over on conflict.
///
/// `modify` returns whether it changed anything; when it did not, no write
/// is issued. Returns whether a write went through.
pub async fn read_modify_write<T, R, RFut, M, W, WFut>(
    backoff: &Backoff,
    mut read: R,
    mut modify: M,
    mut write: W,
) -> Result<bool>
where
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<T>>,
    M: FnMut(&mut T) -> bool,
    W: FnMut(T) -> WFut,
    WFut: Future<Output = Result<()>>,
{
    let mut attempt = 0;
    loop {
        let mut current = read().await?;
        if !modify(&mut current) {
            return Ok(false);
        }
        match write(current).await {
            Ok(()) => return Ok(true),
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                backoff.wait(attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
