//! Monitor — background tasks that run reachability checks for targets.
//!
//! [`Monitor::run`] spawns one task per registered target. Each task owns
//! its [`Target`] outright and loops forever: probe, update the debounce
//! state, fire callbacks on transitions, sleep. Tasks never share state,
//! so there is no locking between them.
//!
//! Registrations arriving through a [`MonitorHandle`] after start either
//! spawn a new task or, for a known endpoint, are forwarded to the task
//! that owns it and merged at the top of its next cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, UnreachablePolicy};
use crate::error::PortwatchResult;
use crate::prober::{Prober, TcpProber};
use crate::registry::{Registration, Registry};
use crate::target::{CheckReport, Target, TargetId};

/// Settings every check task consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPolicy {
    pub grace_time_secs: u64,
    pub verbose: bool,
    pub unreachable: UnreachablePolicy,
}

impl CheckPolicy {
    /// Quiet policy that counts unreachable targets as down.
    pub fn new(grace_time_secs: u64) -> Self {
        Self {
            grace_time_secs,
            verbose: false,
            unreachable: UnreachablePolicy::Down,
        }
    }
}

impl From<&MonitorConfig> for CheckPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            grace_time_secs: config.grace_time_secs,
            verbose: config.verbose,
            unreachable: config.unreachable,
        }
    }
}

/// Per-target task state held by the run loop.
struct TaskSlot {
    /// Duplicate registrations for the task to merge.
    merge_tx: mpsc::UnboundedSender<Target>,
    handle: JoinHandle<()>,
}

/// Drives the check loops for all registered targets.
pub struct Monitor {
    policy: CheckPolicy,
    prober: Arc<dyn Prober>,
    registrations_tx: mpsc::UnboundedSender<Target>,
    registrations_rx: mpsc::UnboundedReceiver<Target>,
}

impl Monitor {
    /// Create a monitor probing through `prober`.
    pub fn new(policy: CheckPolicy, prober: Arc<dyn Prober>) -> Self {
        let (registrations_tx, registrations_rx) = mpsc::unbounded_channel();
        Self {
            policy,
            prober,
            registrations_tx,
            registrations_rx,
        }
    }

    /// Build a monitor with a [`TcpProber`] from configuration.
    pub fn from_config(config: &MonitorConfig) -> PortwatchResult<Self> {
        let prober = TcpProber::new(config.probe_timeout()?);
        Ok(Self::new(CheckPolicy::from(config), Arc::new(prober)))
    }

    /// Settings shared by every check task.
    pub fn policy(&self) -> CheckPolicy {
        self.policy
    }

    /// A handle for registering targets while the monitor is running.
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            tx: self.registrations_tx.clone(),
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Every target in `registry` gets its own task immediately; late
    /// registrations are admitted as they arrive. Returns once all tasks
    /// have stopped.
    pub async fn run(self, registry: Registry, mut shutdown: watch::Receiver<bool>) {
        let Monitor {
            policy,
            prober,
            registrations_tx,
            mut registrations_rx,
        } = self;
        // Only outstanding handles keep the channel open.
        drop(registrations_tx);

        let mut tasks: HashMap<TargetId, TaskSlot> = HashMap::new();
        for target in registry.into_targets() {
            admit(&mut tasks, target, &prober, policy, &shutdown);
        }

        info!(
            targets = tasks.len(),
            grace_secs = policy.grace_time_secs,
            "monitor started"
        );

        let mut accepting = true;
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                registration = registrations_rx.recv(), if accepting => match registration {
                    Some(target) => admit(&mut tasks, target, &prober, policy, &shutdown),
                    None => {
                        debug!("all monitor handles dropped, target set is now fixed");
                        accepting = false;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!(targets = tasks.len(), "monitor shutting down");

        for (id, slot) in tasks {
            drop(slot.merge_tx);
            if let Err(e) = slot.handle.await {
                error!(addr = %id, error = %e, "check task failed");
            }
        }

        info!("monitor stopped");
    }
}

/// Registers targets with a running [`Monitor`].
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<Target>,
}

impl MonitorHandle {
    /// Queue a registration. Returns `false` once the monitor has stopped.
    pub fn register(&self, registration: Registration) -> bool {
        self.tx.send(registration.into_target()).is_ok()
    }
}

/// Spawn a task for a new target, or hand a duplicate to its owner.
fn admit(
    tasks: &mut HashMap<TargetId, TaskSlot>,
    target: Target,
    prober: &Arc<dyn Prober>,
    policy: CheckPolicy,
    shutdown: &watch::Receiver<bool>,
) {
    if let Some(slot) = tasks.get(target.id()) {
        let id = target.id().clone();
        if slot.merge_tx.send(target).is_err() {
            warn!(addr = %id, "check task gone, duplicate registration dropped");
        } else {
            debug!(addr = %id, "duplicate registration forwarded to running task");
        }
        return;
    }

    let id = target.id().clone();
    let (merge_tx, merge_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_check_loop(
        target,
        prober.clone(),
        policy,
        merge_rx,
        shutdown.clone(),
    ));

    debug!(addr = %id, "check task spawned");
    tasks.insert(id, TaskSlot { merge_tx, handle });
}

/// The check loop for a single target.
async fn run_check_loop(
    mut target: Target,
    prober: Arc<dyn Prober>,
    policy: CheckPolicy,
    mut merges: mpsc::UnboundedReceiver<Target>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(addr = %target.id(), interval_secs = target.interval_secs(), "check loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }

        while let Ok(duplicate) = merges.try_recv() {
            target.merge(duplicate);
            debug!(
                addr = %target.id(),
                interval_secs = target.interval_secs(),
                callbacks = target.down_callback_count(),
                "late registration merged"
            );
        }

        let report = tokio::select! {
            report = check_cycle(&mut target, prober.as_ref(), &policy, Utc::now()) => report,
            _ = shutdown.changed() => break,
        };

        tokio::select! {
            _ = tokio::time::sleep(report.sleep) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!(addr = %target.id(), "check loop stopped");
}

/// Run one check cycle for `target` as of `now`.
///
/// Inside the outage window nothing is probed and the cycle reports
/// [`CheckOutcome::Skipped`](crate::target::CheckOutcome::Skipped).
pub async fn check_cycle(
    target: &mut Target,
    prober: &dyn Prober,
    policy: &CheckPolicy,
    now: DateTime<Utc>,
) -> CheckReport {
    if target.in_outage(now) {
        debug!(addr = %target.id(), "planned outage, check skipped");
        return target.skip();
    }

    if policy.verbose {
        info!(addr = %target.id(), "checking");
    } else {
        debug!(addr = %target.id(), "checking");
    }

    let outcome = prober.probe(target.id()).await;
    let report = target.record(&outcome, policy.grace_time_secs, policy.unreachable);

    if policy.verbose {
        info!(addr = %target.id(), outcome = %report.outcome, "check finished");
    } else {
        debug!(addr = %target.id(), outcome = %report.outcome, "check finished");
    }

    report
}
