//! Completion and novelty detection.
//!
//! Every wait here is a bounded polling loop. The deadline is computed once
//! when the wait starts and nothing is retried after it passes.
use crate::error::{DesignError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Time source for polling loops.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Interval and deadline of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Poll {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// How a busy-indicator wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The indicator was seen and then went away.
    Finished { waited: Duration },
    /// The indicator never showed up within the grace window.
    NeverStarted,
}

/// Wait for a visible "in progress" indicator to clear.
///
/// Succeeds on the first absent poll after the indicator was seen. If it is
/// never seen within `grace` (capped at the deadline), the operation is taken
/// as already complete.
pub fn wait_until_idle<F>(
    clock: &dyn Clock,
    poll: Poll,
    grace: Duration,
    what: &str,
    mut busy: F,
) -> Result<Completion>
where
    F: FnMut() -> Result<bool>,
{
    let start = clock.now();
    let grace = grace.min(poll.timeout);
    let mut seen = false;
    loop {
        let is_busy = busy()?;
        let elapsed = clock.now().saturating_duration_since(start);
        if is_busy {
            seen = true;
        } else if seen {
            tracing::debug!(what, waited_ms = elapsed.as_millis(), "indicator cleared");
            return Ok(Completion::Finished { waited: elapsed });
        } else if elapsed >= grace {
            tracing::debug!(what, "indicator never appeared");
            return Ok(Completion::NeverStarted);
        }
        if elapsed >= poll.timeout {
            return Err(timeout(what, poll.timeout));
        }
        clock.sleep(poll.interval);
    }
}

/// Wait until exactly `expected` items not in `before` are listed.
///
/// Identity is the item's stable identifier, never its position. More new
/// items than expected is `Inconsistent`; fewer at the deadline is `Timeout`.
pub fn wait_for_new_items<F>(
    clock: &dyn Clock,
    poll: Poll,
    before: &HashSet<String>,
    expected: usize,
    mut list: F,
) -> Result<Vec<String>>
where
    F: FnMut() -> Result<Vec<String>>,
{
    let start = clock.now();
    loop {
        let fresh = new_items(before, list()?);
        if fresh.len() == expected {
            tracing::info!(count = fresh.len(), "new items detected");
            return Ok(fresh);
        }
        if fresh.len() > expected {
            return Err(DesignError::Inconsistent {
                expected,
                observed: fresh.len(),
            });
        }
        if clock.now().saturating_duration_since(start) >= poll.timeout {
            return Err(timeout(
                &format!("{expected} new items ({} seen)", fresh.len()),
                poll.timeout,
            ));
        }
        clock.sleep(poll.interval);
    }
}

/// Wait for the page URL to match `pattern`; returns the matching URL.
pub fn wait_for_url<F>(
    clock: &dyn Clock,
    poll: Poll,
    pattern: &Regex,
    mut current: F,
) -> Result<String>
where
    F: FnMut() -> Result<String>,
{
    let start = clock.now();
    loop {
        let url = current()?;
        if pattern.is_match(&url) {
            return Ok(url);
        }
        if clock.now().saturating_duration_since(start) >= poll.timeout {
            let what = format!("a URL matching {}", pattern.as_str());
            return Err(timeout(&what, poll.timeout));
        }
        clock.sleep(poll.interval);
    }
}

/// Items in `current` that are absent from `before`, first occurrence order.
pub fn new_items(before: &HashSet<String>, current: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    current
        .into_iter()
        .filter(|id| !before.contains(id) && seen.insert(id.clone()))
        .collect()
}

fn timeout(what: &str, after: Duration) -> DesignError {
    DesignError::Timeout {
        what: what.to_string(),
        waited_s: after.as_secs(),
    }
}
