//! # Importance Engine
//!
//! Owns the process graph behind one lock and runs passes over it.
//!
//! ```text
//!   trigger ──▶ lock graph ──▶ members ──▶ ┌──────────────────────────┐
//!                                          │ seed ─▶ propagate        │
//!                                          │   ─▶ service B ─▶ final  │◀─┐
//!                                          │   ─▶ slots ─▶ idle gate  │──┘ demoted
//!                                          └────────────┬─────────────┘
//!                                                       ▼
//!                               commit ──▶ unlock ──▶ listeners
//! ```
//!
//! A targeted pass covers the seed processes plus everything reachable over
//! their outbound edges. A full pass covers every registered process and is
//! the only kind that re-ranks the service B list.
//!
//! Mutators never run a pass themselves. They record which processes they
//! touched; [`ImportanceEngine::update_pending_targets`] turns that record
//! into one pass.

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::binding::{Binding, BindingId};
use crate::cached;
use crate::commit::{self, ImportanceChange, ImportanceListener, ListenerRegistry, SubscriptionId};
use crate::config::{ImportanceConfig, Millis};
use crate::error::{ErrorKind, ImportanceResult};
use crate::graph::{GraphStats, ProcessGraph, Wakefulness};
use crate::idle;
use crate::intrinsic;
use crate::process::{Pid, ProcessRecord, ProcessSignals, ProcessSnapshot, ServiceName, ServiceRecord, Uid, UserId};
use crate::propagate;
use crate::tier::ProcState;
use crate::uid::{BoxedStartPolicy, NormalStartPolicy, UidRecord};

// =============================================================================
// CLOCK
// =============================================================================

/// Source of uptime
pub trait Clock: Send + Sync {
    /// Milliseconds since boot
    fn now_ms(&self) -> Millis;
}

/// Clock moved by hand
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock reading `now`
    pub fn new(now: Millis) -> Self {
        Self { now: AtomicU64::new(now) }
    }

    /// Jump to `now`
    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// Move forward
    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::Relaxed)
    }
}

impl<C: Clock + ?Sized> Clock for alloc::sync::Arc<C> {
    fn now_ms(&self) -> Millis {
        (**self).now_ms()
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    passes: AtomicU64,
    full_passes: AtomicU64,
    gate_reruns: AtomicU64,
    evaluations: AtomicU64,
    relaxations: AtomicU64,
    notifications: AtomicU64,
}

impl EngineStats {
    fn record(&self, report: &PassReport) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        if report.full {
            self.full_passes.fetch_add(1, Ordering::Relaxed);
        }
        self.gate_reruns.fetch_add(u64::from(report.rounds.saturating_sub(1)), Ordering::Relaxed);
        self.evaluations.fetch_add(report.evaluations, Ordering::Relaxed);
        self.relaxations.fetch_add(report.relaxations, Ordering::Relaxed);
        self.notifications.fetch_add(report.changed as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            full_passes: self.full_passes.load(Ordering::Relaxed),
            gate_reruns: self.gate_reruns.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            relaxations: self.relaxations.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Passes run
    pub passes: u64,
    /// Of which full
    pub full_passes: u64,
    /// Extra rounds caused by the idle gate
    pub gate_reruns: u64,
    /// Intrinsic evaluations
    pub evaluations: u64,
    /// Edge relaxations
    pub relaxations: u64,
    /// Change notifications produced
    pub notifications: u64,
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Pass generation of the last round
    pub seq: u64,
    /// Covered every process
    pub full: bool,
    /// Processes in the pass
    pub members: usize,
    /// Rounds run (more than one when the idle gate demoted someone)
    pub rounds: u32,
    /// Intrinsic evaluations across rounds
    pub evaluations: u64,
    /// Edge relaxations across rounds
    pub relaxations: u64,
    /// Processes whose started services were suppressed
    pub suppressed: usize,
    /// Slot walk of the last round
    pub slots: cached::SlotStats,
    /// Processes whose committed tuple changed
    pub changed: usize,
}

// =============================================================================
// ENGINE
// =============================================================================

enum Scope {
    Full,
    Targeted(Vec<Pid>),
}

/// The process importance engine
pub struct ImportanceEngine {
    graph: Mutex<ProcessGraph>,
    config: RwLock<ImportanceConfig>,
    clock: Box<dyn Clock>,
    policy: RwLock<BoxedStartPolicy>,
    listeners: ListenerRegistry,
    pending: Mutex<BTreeSet<Pid>>,
    full_pending: AtomicBool,
    stats: EngineStats,
}

impl ImportanceEngine {
    /// Engine with a clock frozen at zero
    pub fn new(config: ImportanceConfig) -> ImportanceResult<Self> {
        Self::with_clock(config, Box::new(ManualClock::new(0)))
    }

    /// Engine reading time from `clock`
    pub fn with_clock(config: ImportanceConfig, clock: Box<dyn Clock>) -> ImportanceResult<Self> {
        config.validate()?;
        log::info!(
            "importance engine up: {} cached / {} empty, service B 1/{}",
            config.max_cached_processes,
            config.max_empty_processes,
            config.service_b_divisor
        );
        Ok(Self {
            graph: Mutex::new(ProcessGraph::new()),
            config: RwLock::new(config),
            clock,
            policy: RwLock::new(Box::new(NormalStartPolicy)),
            listeners: ListenerRegistry::new(),
            pending: Mutex::new(BTreeSet::new()),
            full_pending: AtomicBool::new(false),
            stats: EngineStats::default(),
        })
    }

    /// Copy of the active configuration
    pub fn config(&self) -> ImportanceConfig {
        self.config.read().clone()
    }

    // -------------------------------------------------------------------------
    // Pending work
    // -------------------------------------------------------------------------

    /// Queue a process for the next targeted pass
    pub fn enqueue_target(&self, pid: Pid) {
        self.pending.lock().insert(pid);
    }

    /// Ask for a full pass on the next update
    pub fn request_full(&self) {
        self.full_pending.store(true, Ordering::Relaxed);
    }

    /// Pids waiting for a pass
    pub fn pending_targets(&self) -> Vec<Pid> {
        self.pending.lock().iter().copied().collect()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a process
    pub fn register_process(&self, record: ProcessRecord) -> ImportanceResult<()> {
        let pid = record.pid;
        let config = self.config.read().clone();
        {
            let mut graph = self.graph.lock();
            graph.add_process(record)?;
            cached::refresh_keep_warm(&mut graph, &config);
        }
        log::debug!("importance: registered pid {}", pid);
        self.enqueue_target(pid);
        Ok(())
    }

    /// Forget a process and its edges; its former targets are requeued
    pub fn remove_process(&self, pid: Pid) -> ImportanceResult<ProcessRecord> {
        let (record, targets) = {
            let mut graph = self.graph.lock();
            let targets: Vec<Pid> = graph.outbound(pid).map(|b| b.target).filter(|&t| t != pid).collect();
            (graph.remove_process(pid)?, targets)
        };
        let mut pending = self.pending.lock();
        pending.remove(&pid);
        pending.extend(targets);
        log::debug!("importance: removed pid {}", pid);
        Ok(record)
    }

    /// Add a binding and queue its target
    pub fn bind(&self, binding: Binding) -> ImportanceResult<BindingId> {
        let target = binding.target;
        let id = self.graph.lock().add_binding(binding)?;
        self.enqueue_target(target);
        Ok(id)
    }

    /// Drop a binding and queue its former target
    pub fn unbind(&self, id: BindingId) -> ImportanceResult<Binding> {
        let binding = self.graph.lock().remove_binding(id)?;
        self.enqueue_target(binding.target);
        Ok(binding)
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Edit the signals of one process
    pub fn update_signals<F>(&self, pid: Pid, f: F) -> ImportanceResult<()>
    where
        F: FnOnce(&mut ProcessSignals),
    {
        {
            let mut graph = self.graph.lock();
            let process = graph
                .get_mut(pid)
                .ok_or_else(|| importance_error!(ErrorKind::ProcessNotFound, "Process not found").with_pid(pid))?;
            f(&mut process.signals);
        }
        self.enqueue_target(pid);
        Ok(())
    }

    /// Edit the started services of one process
    pub fn update_services<F>(&self, pid: Pid, f: F) -> ImportanceResult<()>
    where
        F: FnOnce(&mut Vec<ServiceRecord>),
    {
        let config = self.config.read().clone();
        {
            let mut graph = self.graph.lock();
            let process = graph
                .get_mut(pid)
                .ok_or_else(|| importance_error!(ErrorKind::ProcessNotFound, "Process not found").with_pid(pid))?;
            f(&mut process.services);
            cached::refresh_keep_warm(&mut graph, &config);
        }
        self.enqueue_target(pid);
        Ok(())
    }

    /// Move a process to the most recently used position
    pub fn touch_lru(&self, pid: Pid) -> ImportanceResult<()> {
        self.graph.lock().touch(pid)?;
        self.request_full();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Device state
    // -------------------------------------------------------------------------

    /// Screen on or off
    pub fn set_wakefulness(&self, wakefulness: Wakefulness) {
        {
            let mut graph = self.graph.lock();
            if graph.device.wakefulness == wakefulness {
                return;
            }
            graph.device.wakefulness = wakefulness;
            graph.device.top_proc_state = match wakefulness {
                Wakefulness::Awake => ProcState::Top,
                Wakefulness::Asleep => ProcState::TopSleeping,
            };
        }
        log::info!("importance: device now {:?}", wakefulness);
        self.request_full();
    }

    /// Change the top app
    pub fn set_top_app(&self, pid: Option<Pid>) -> ImportanceResult<()> {
        let previous = {
            let mut graph = self.graph.lock();
            if let Some(pid) = pid {
                importance_ensure!(
                    graph.contains(pid),
                    ErrorKind::ProcessNotFound,
                    "Process not found",
                    "pid {} not registered",
                    pid
                );
            }
            core::mem::replace(&mut graph.device.top_app, pid)
        };
        let mut pending = self.pending.lock();
        pending.extend(previous);
        pending.extend(pid);
        Ok(())
    }

    /// Change the backup target of a user
    pub fn set_backup_target(&self, user: UserId, pid: Option<Pid>) -> ImportanceResult<()> {
        let previous = {
            let mut graph = self.graph.lock();
            match pid {
                Some(pid) => {
                    importance_ensure!(
                        graph.contains(pid),
                        ErrorKind::ProcessNotFound,
                        "Process not found",
                        "pid {} not registered",
                        pid
                    );
                    graph.device.backup_targets.insert(user, pid)
                }
                None => graph.device.backup_targets.remove(&user),
            }
        };
        let mut pending = self.pending.lock();
        pending.extend(previous);
        pending.extend(pid);
        Ok(())
    }

    /// Switch the foreground user; keep-warm pins follow
    pub fn set_current_user(&self, user: UserId) {
        let config = self.config.read().clone();
        let changed = {
            let mut graph = self.graph.lock();
            graph.device.current_user = user;
            cached::refresh_keep_warm(&mut graph, &config)
        };
        log::info!("importance: current user {}", user);
        self.pending.lock().extend(changed);
    }

    /// Replace the keep-warm allow-list
    pub fn set_keep_warm_services(&self, services: Vec<ServiceName>) {
        let config = {
            let mut config = self.config.write();
            config.keep_warm_services = services;
            config.clone()
        };
        let changed = cached::refresh_keep_warm(&mut self.graph.lock(), &config);
        self.pending.lock().extend(changed);
    }

    /// Mark a uid idle or active
    pub fn set_uid_idle(&self, uid: Uid, idle: bool) {
        let changed = {
            let mut graph = self.graph.lock();
            let was = graph.uids.is_idle(uid);
            graph.uids.set_idle(uid, idle);
            was != idle
        };
        if changed {
            log::debug!("importance: uid {} {}", uid, if idle { "idle" } else { "active" });
            self.request_full();
        }
    }

    /// Install the app-start-mode lookup
    pub fn set_app_start_policy(&self, policy: BoxedStartPolicy) {
        *self.policy.write() = policy;
        self.request_full();
    }

    // -------------------------------------------------------------------------
    // Passes
    // -------------------------------------------------------------------------

    /// Targeted pass seeded with one process
    pub fn update_process(&self, pid: Pid) -> ImportanceResult<PassReport> {
        let (report, changes) = {
            let mut graph = self.graph.lock();
            importance_ensure!(
                graph.contains(pid),
                ErrorKind::ProcessNotFound,
                "Process not found",
                "pid {} not registered",
                pid
            );
            self.pending.lock().remove(&pid);
            self.run_pass(&mut graph, Scope::Targeted(alloc::vec![pid]))
        };
        self.deliver(&changes);
        Ok(report)
    }

    /// Full pass over every process
    pub fn update_all(&self) -> PassReport {
        let (report, changes) = {
            let mut graph = self.graph.lock();
            self.clear_pending();
            self.run_pass(&mut graph, Scope::Full)
        };
        self.deliver(&changes);
        report
    }

    /// [`update_process`](Self::update_process) without waiting for the lock
    pub fn try_update_process(&self, pid: Pid) -> ImportanceResult<PassReport> {
        let (report, changes) = {
            let mut graph = self
                .graph
                .try_lock()
                .ok_or_else(|| importance_error!(ErrorKind::WouldBlock, "Graph lock held").with_pid(pid))?;
            importance_ensure!(
                graph.contains(pid),
                ErrorKind::ProcessNotFound,
                "Process not found",
                "pid {} not registered",
                pid
            );
            self.pending.lock().remove(&pid);
            self.run_pass(&mut graph, Scope::Targeted(alloc::vec![pid]))
        };
        self.deliver(&changes);
        Ok(report)
    }

    /// [`update_all`](Self::update_all) without waiting for the lock
    pub fn try_update_all(&self) -> ImportanceResult<PassReport> {
        let (report, changes) = {
            let mut graph = self
                .graph
                .try_lock()
                .ok_or_else(|| importance_error!(ErrorKind::WouldBlock, "Graph lock held"))?;
            self.clear_pending();
            self.run_pass(&mut graph, Scope::Full)
        };
        self.deliver(&changes);
        Ok(report)
    }

    /// Run whatever the mutators queued.
    ///
    /// A requested full pass absorbs the queued targets. Returns `None` when
    /// nothing was pending.
    pub fn update_pending_targets(&self) -> Option<PassReport> {
        let (report, changes) = {
            let mut graph = self.graph.lock();
            let scope = if self.full_pending.load(Ordering::Relaxed) {
                self.clear_pending();
                Scope::Full
            } else {
                let seeds: Vec<Pid> = core::mem::take(&mut *self.pending.lock())
                    .into_iter()
                    .filter(|&pid| graph.contains(pid))
                    .collect();
                if seeds.is_empty() {
                    return None;
                }
                Scope::Targeted(seeds)
            };
            self.run_pass(&mut graph, scope)
        };
        self.deliver(&changes);
        Some(report)
    }

    /// Drop queued work a full pass is about to cover.
    ///
    /// Runs under the graph lock, before the pass, so requests made while
    /// changes are delivered survive for the next update.
    fn clear_pending(&self) {
        self.full_pending.store(false, Ordering::Relaxed);
        self.pending.lock().clear();
    }

    fn run_pass(&self, graph: &mut ProcessGraph, scope: Scope) -> (PassReport, Vec<ImportanceChange>) {
        let config = self.config.read().clone();
        let policy = self.policy.read();
        let now = self.clock.now_ms();

        let full = matches!(scope, Scope::Full);
        let members = match scope {
            Scope::Full => graph.pids(),
            Scope::Targeted(seeds) => graph.dependents_of(&seeds),
        };

        let mut report = PassReport { full, members: members.len(), ..Default::default() };
        if members.is_empty() {
            return (report, Vec::new());
        }

        idle::clear(graph, &members);
        let previous = graph.service_process_count;
        let mut service_count = previous;
        // members plus cached outsiders whose slot shifted
        let mut touched = members.clone();

        loop {
            report.rounds += 1;
            report.evaluations += intrinsic::seed(graph, &members, &config, now);
            report.seq = graph.adj_seq();
            report.relaxations += propagate::propagate(graph, &members, &config, now).relaxations;

            if full {
                service_count = cached::rank_service_b(graph, &members, config.service_b_divisor, previous);
            }
            cached::apply_service_b(graph, &members);
            propagate::finalize(graph, &members);
            let walk = cached::assign_slots(graph, &members, &config);
            report.slots = walk.stats;
            touched.extend(walk.displaced);

            let demoted = idle::gate(graph, &members, &**policy);
            if demoted.is_empty() {
                break;
            }
            report.suppressed += demoted.len();
        }

        if full {
            graph.service_process_count = service_count;
        }

        let changes = commit::commit(graph, &touched);
        report.changed = changes.len();
        self.stats.record(&report);

        log::debug!(
            "importance: {} pass #{} over {} processes, {} rounds, {} changed",
            if full { "full" } else { "targeted" },
            report.seq,
            report.members,
            report.rounds,
            report.changed
        );
        (report, changes)
    }

    fn deliver(&self, changes: &[ImportanceChange]) {
        self.listeners.dispatch(changes);
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    /// Register a change listener
    pub fn subscribe(&self, listener: ImportanceListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    /// Remove a change listener
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Pause or resume a change listener
    pub fn set_listener_active(&self, id: SubscriptionId, active: bool) -> bool {
        self.listeners.set_active(id, active)
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    /// Committed state of one process
    pub fn snapshot(&self, pid: Pid) -> Option<ProcessSnapshot> {
        self.graph.lock().get(pid).map(ProcessRecord::snapshot)
    }

    /// Committed state of every process
    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        self.graph.lock().processes().map(ProcessRecord::snapshot).collect()
    }

    /// Aggregated state of a uid
    pub fn uid_state(&self, uid: Uid) -> Option<UidRecord> {
        self.graph.lock().uids.get(uid).cloned()
    }

    /// Graph shape
    pub fn graph_stats(&self) -> GraphStats {
        self.graph.lock().stats()
    }

    /// Engine counters
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Debug for ImportanceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportanceEngine")
            .field("listeners", &self.listeners)
            .field("pending", &self.pending.lock().len())
            .field("full_pending", &self.full_pending.load(Ordering::Relaxed))
            .field("stats", &self.stats)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
