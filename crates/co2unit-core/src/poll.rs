//! Bounded polling that keeps the watchdog fed.

use crate::board::Platform;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollError {
    Timeout { elapsed_ms: u64 },
    Cancelled,
}

/// Polls `condition` every `interval_ms` until it holds or `timeout_ms` elapses.
///
/// Returns the time waited.
pub async fn wait_for<P, C>(
    platform: &mut P,
    mut condition: C,
    timeout_ms: u64,
    interval_ms: u32,
) -> Result<u64, PollError>
where
    P: Platform + ?Sized,
    C: FnMut() -> bool,
{
    let start = platform.uptime_ms();
    loop {
        platform.feed_watchdog();
        if platform.cancel_requested() {
            return Err(PollError::Cancelled);
        }

        let elapsed_ms = platform.uptime_ms().saturating_sub(start);
        if condition() {
            return Ok(elapsed_ms);
        }
        if elapsed_ms >= timeout_ms {
            return Err(PollError::Timeout { elapsed_ms });
        }
        platform.delay_ms(interval_ms).await;
    }
}
