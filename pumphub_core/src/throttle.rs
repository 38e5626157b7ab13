//! Heartbeat throttle policy.
//!
//! Pure decision table mapping "time since the last successful control-loop
//! completion" to the minimum interval between heartbeat-driven glucose
//! polls. The fresher the loop, the stricter the suppression.

use chrono::Duration;

/// Required minimum re-poll interval for a heartbeat-driven fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPollInterval {
    /// The loop completed recently enough that no heartbeat poll should
    /// occur at all.
    Suppress,
    /// Poll at most once per this interval.
    Every(Duration),
}

/// Decide the minimum re-poll interval.
///
/// - never succeeded, or succeeded more than 10 minutes ago: 5-minute floor
/// - succeeded between 5 and 10 minutes ago: 1-minute floor
/// - succeeded within the last 5 minutes: suppress entirely
pub fn required_interval(since_last_loop: Option<Duration>) -> LoopPollInterval {
    match since_last_loop {
        None => LoopPollInterval::Every(Duration::minutes(5)),
        Some(elapsed) if elapsed > Duration::minutes(10) => {
            LoopPollInterval::Every(Duration::minutes(5))
        }
        Some(elapsed) if elapsed > Duration::minutes(5) => {
            LoopPollInterval::Every(Duration::minutes(1))
        }
        Some(_) => LoopPollInterval::Suppress,
    }
}
