//! Monitored targets and their debounce state machine.
//!
//! A [`Target`] turns raw probe outcomes into debounced up/down
//! transitions. Refusals accumulate polling seconds until the scheduler's
//! grace time is exceeded; only then do the down callbacks fire. A single
//! successful probe resets the counter and, if the target had been
//! reported down, fires the up callbacks.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::UnreachablePolicy;
use crate::prober::ProbeOutcome;

/// Zero-argument notification invoked on an up/down transition.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Identity of a monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId {
    host: String,
    port: u16,
}

impl TargetId {
    /// Identity for `host:port`. The host is not resolved.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Hostname or IP literal as registered.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Planned maintenance interval during which a target is not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl OutageWindow {
    /// Window from `start` to `end`, both exclusive.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `now` lies strictly between `start` and `end`.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start < now && now < self.end
    }
}

/// What a single check cycle concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The target accepted the connection.
    Up,
    /// The target is unreachable past the grace time.
    Down,
    /// The target is unreachable but still within the grace time.
    Pending,
    /// The cycle fell inside the outage window; nothing was probed.
    Skipped,
    /// The probe failed in a way the unreachable policy ignores.
    Unknown,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Up => write!(f, "up"),
            CheckOutcome::Down => write!(f, "down"),
            CheckOutcome::Pending => write!(f, "pending"),
            CheckOutcome::Skipped => write!(f, "skipped"),
            CheckOutcome::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of a check cycle plus how long to wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckReport {
    pub outcome: CheckOutcome,
    pub sleep: Duration,
}

/// One monitored endpoint with its callbacks and debounce state.
pub struct Target {
    id: TargetId,
    /// Effective polling interval, never below one second.
    interval_secs: u64,
    down_callbacks: Vec<Callback>,
    up_callbacks: Vec<Callback>,
    outage: Option<OutageWindow>,
    /// Polling seconds accumulated across consecutive failed probes.
    consecutive_down_secs: u64,
    /// Debounced state; a target is assumed up until proven down.
    is_down: bool,
}

impl Target {
    /// Create a target with one callback pair. `interval_secs` below one
    /// is raised to one.
    pub fn new(
        id: TargetId,
        on_down: Callback,
        on_up: Callback,
        interval_secs: u64,
        outage: Option<OutageWindow>,
    ) -> Self {
        Self {
            id,
            interval_secs: interval_secs.max(1),
            down_callbacks: vec![on_down],
            up_callbacks: vec![on_up],
            outage,
            consecutive_down_secs: 0,
            is_down: false,
        }
    }

    /// Fold a duplicate registration of the same endpoint into this one.
    ///
    /// The interval narrows to the smaller of the two and the duplicate's
    /// callbacks are appended after the existing ones. Everything else on
    /// the duplicate, including its outage window, is discarded.
    pub fn merge(&mut self, other: Target) {
        debug_assert_eq!(self.id, other.id);
        self.interval_secs = self.interval_secs.min(other.interval_secs).max(1);
        self.down_callbacks.extend(other.down_callbacks);
        self.up_callbacks.extend(other.up_callbacks);
    }

    /// Endpoint identity.
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// Effective polling interval in seconds.
    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Effective polling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Planned outage window, if any.
    pub fn outage(&self) -> Option<&OutageWindow> {
        self.outage.as_ref()
    }

    /// Polling seconds accumulated since the last successful probe.
    pub fn consecutive_down_secs(&self) -> u64 {
        self.consecutive_down_secs
    }

    /// Whether the target has been reported down and not yet recovered.
    pub fn is_down(&self) -> bool {
        self.is_down
    }

    /// Number of registered down callbacks.
    pub fn down_callback_count(&self) -> usize {
        self.down_callbacks.len()
    }

    /// Number of registered up callbacks.
    pub fn up_callback_count(&self) -> usize {
        self.up_callbacks.len()
    }

    /// Whether checks are suspended at `now`.
    pub fn in_outage(&self, now: DateTime<Utc>) -> bool {
        self.outage.is_some_and(|w| w.contains(now))
    }

    /// Report for a cycle that fell inside the outage window.
    pub fn skip(&self) -> CheckReport {
        CheckReport {
            outcome: CheckOutcome::Skipped,
            sleep: self.interval(),
        }
    }

    /// Apply a probe outcome, firing callbacks on transitions.
    pub fn record(
        &mut self,
        outcome: &ProbeOutcome,
        grace_time_secs: u64,
        policy: UnreachablePolicy,
    ) -> CheckReport {
        match outcome {
            ProbeOutcome::Reachable => self.record_reachable(),
            ProbeOutcome::Refused => self.record_refused(grace_time_secs),
            ProbeOutcome::Unreachable { reason } => match policy {
                UnreachablePolicy::Down => {
                    debug!(addr = %self.id, %reason, "unreachable counted as refusal");
                    self.record_refused(grace_time_secs)
                }
                UnreachablePolicy::Ignore => {
                    debug!(addr = %self.id, %reason, "unreachable ignored");
                    CheckReport {
                        outcome: CheckOutcome::Unknown,
                        sleep: self.interval(),
                    }
                }
            },
        }
    }

    fn record_reachable(&mut self) -> CheckReport {
        if self.is_down {
            info!(addr = %self.id, "target recovered");
            fire(&self.id, "up", &self.up_callbacks);
            self.is_down = false;
        }
        self.consecutive_down_secs = 0;

        CheckReport {
            outcome: CheckOutcome::Up,
            sleep: self.interval(),
        }
    }

    fn record_refused(&mut self, grace_time_secs: u64) -> CheckReport {
        self.consecutive_down_secs = self.consecutive_down_secs.saturating_add(self.interval_secs);

        // Retry sooner than the interval while suspected down, but never spin.
        let sleep = Duration::from_secs(self.interval_secs.min(grace_time_secs.max(1)));

        if self.consecutive_down_secs > grace_time_secs {
            if !self.is_down {
                warn!(
                    addr = %self.id,
                    down_secs = self.consecutive_down_secs,
                    grace_secs = grace_time_secs,
                    "target marked down"
                );
                fire(&self.id, "down", &self.down_callbacks);
                self.is_down = true;
            }
            CheckReport {
                outcome: CheckOutcome::Down,
                sleep,
            }
        } else {
            CheckReport {
                outcome: CheckOutcome::Pending,
                sleep,
            }
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("interval_secs", &self.interval_secs)
            .field("down_callbacks", &self.down_callbacks.len())
            .field("up_callbacks", &self.up_callbacks.len())
            .field("outage", &self.outage)
            .field("consecutive_down_secs", &self.consecutive_down_secs)
            .field("is_down", &self.is_down)
            .finish()
    }
}

/// Invoke every callback in order. A panicking callback is logged and
/// does not prevent the rest from running.
fn fire(id: &TargetId, kind: &str, callbacks: &[Callback]) {
    for (index, callback) in callbacks.iter().enumerate() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            error!(
                addr = %id,
                kind,
                index,
                panic = panic_message(payload.as_ref()),
                "transition callback panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
