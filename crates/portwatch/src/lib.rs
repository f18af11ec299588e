//! portwatch — TCP reachability monitoring with debounced transitions.
//!
//! Periodically opens (and immediately closes) a TCP connection to each
//! registered `host:port`, and invokes caller-supplied callbacks when a
//! target goes down or comes back up.
//!
//! # Architecture
//!
//! ```text
//! Registry (dedup + merge on register)
//!   └── Monitor::run
//!       ├── Per-target background task (owns its Target)
//!       │   ├── outage window check → Skipped
//!       │   ├── Prober::probe() → ProbeOutcome
//!       │   └── Target::record() → fire down/up callbacks
//!       └── MonitorHandle for late registration
//! ```
//!
//! # Grace time
//!
//! A refused probe adds the target's polling interval to its down
//! counter. Down callbacks fire only once the counter exceeds the grace
//! time, and only once per outage. While a target is suspected down it is
//! re-checked every `min(interval, grace)` seconds.

pub mod config;
pub mod error;
pub mod monitor;
pub mod prober;
pub mod registry;
pub mod target;

pub use config::{MonitorConfig, PortwatchConfig, TargetConfig, UnreachablePolicy};
pub use error::{PortwatchError, PortwatchResult};
pub use monitor::{CheckPolicy, Monitor, MonitorHandle, check_cycle};
pub use prober::{ProbeOutcome, Prober, TcpProber, tcp_probe};
pub use registry::{Registration, Registry};
pub use target::{Callback, CheckOutcome, CheckReport, OutageWindow, Target, TargetId};
