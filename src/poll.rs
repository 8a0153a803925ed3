//! Poll-until-predicate waiting primitives.
//!
//! The DUT and the instrument expose only request/response and scan-table
//! interfaces, so every wait in the harness is level-triggered polling:
//! probe, check, sleep, repeat. Two deadline policies exist:
//!
//! - [`poll`] (lenient) returns the **last observed value** when the deadline
//!   elapses. Callers asserting progress (e.g. a counter increased) use this
//!   and check the value themselves.
//! - [`poll_until`] (strict) raises [`HarnessError::Timeout`] naming the
//!   awaited condition. Used at restoration boundaries where silent partial
//!   success would mask a broken device.
//!
//! Transport errors ([`HarnessError::is_retryable`]) count as "condition not
//! yet true" and are retried until the deadline; protocol errors abort
//! immediately. [`blind_wait`] is the third primitive: a fixed sleep for
//! state transitions that cannot be observed mid-flight.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

/// Repeatedly call `probe` at `interval` spacing until `predicate` holds or
/// `timeout` elapses.
///
/// Returns early with the first value satisfying the predicate. On deadline,
/// returns the last successfully observed value: even if the predicate never
/// held. Callers that require strict success must check the predicate on the
/// returned value or use [`poll_until`].
///
/// Retryable probe errors (transport-level) are logged and retried; if no
/// probe ever succeeded before the deadline, the last such error is returned.
/// Non-retryable errors (protocol regressions) abort the poll immediately.
pub async fn poll<T, P, Fut, C>(
    mut probe: P,
    mut predicate: C,
    timeout: Duration,
    interval: Duration,
) -> HarnessResult<T>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    C: FnMut(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut last_value: Option<T> = None;
    let mut last_error: Option<HarnessError> = None;

    loop {
        match probe().await {
            Ok(value) => {
                if predicate(&value) {
                    return Ok(value);
                }
                last_value = Some(value);
                last_error = None;
            }
            Err(e) if e.is_retryable() => {
                debug!(error = %e, "probe failed, treating as not-yet-true");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            break;
        }
        sleep(interval).await;
    }

    match (last_value, last_error) {
        (Some(value), _) => Ok(value),
        (None, Some(e)) => Err(e),
        (None, None) => Err(HarnessError::Unreachable(
            "no observation before deadline".to_string(),
        )),
    }
}

/// Strict variant of [`poll`]: raises [`HarnessError::Timeout`] if the
/// predicate does not hold within the budget.
///
/// `what` names the awaited condition in the error message. A probe that
/// never succeeded surfaces its last transport error inside the timeout.
pub async fn poll_until<T, P, Fut, C>(
    what: &str,
    probe: P,
    mut predicate: C,
    timeout: Duration,
    interval: Duration,
) -> HarnessResult<T>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    C: FnMut(&T) -> bool,
{
    match poll(probe, &mut predicate, timeout, interval).await {
        Ok(value) if predicate(&value) => Ok(value),
        Ok(_) => Err(HarnessError::timeout(what, timeout)),
        Err(e) if e.is_retryable() => Err(HarnessError::timeout(
            format!("{what} (last error: {e})"),
            timeout,
        )),
        Err(e) => Err(e),
    }
}

/// Sleep for a fixed, precomputed duration.
///
/// For transitions that are externally driven and cannot be probed mid-flight
/// (e.g. the DUT's three-strikes portal activation), a worst-case fixed wait
/// is the only option. Kept distinct from [`poll`] so the call site documents
/// that nothing observable happens in between.
pub async fn blind_wait(reason: &str, duration: Duration) {
    info!(reason, ?duration, "blind wait for externally driven transition");
    sleep(duration).await;
}
