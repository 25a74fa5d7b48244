//! # Commit Engine
//!
//! Publishes the result of a pass. Each member's final tuple is compared
//! field by field against what was committed before; only processes with at
//! least one differing field are written back and reported.
//!
//! Reports go to [`ImportanceListener`]s registered in a
//! [`ListenerRegistry`]. Listeners run in priority order, after the engine
//! has released the graph lock.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::RwLock;

use crate::graph::ProcessGraph;
use crate::process::{Pid, Uid};
use crate::tier::Importance;

// =============================================================================
// CHANGES
// =============================================================================

bitflags! {
    /// Fields that differ from the committed tuple
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeFlags: u8 {
        const ADJ         = 1 << 0;
        const PROC_STATE  = 1 << 1;
        const SCHED_GROUP = 1 << 2;
        const CAPABILITY  = 1 << 3;
    }
}

impl ChangeFlags {
    /// Compare two tuples
    pub fn between(old: &Importance, new: &Importance) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::ADJ, old.adj != new.adj);
        flags.set(Self::PROC_STATE, old.proc_state != new.proc_state);
        flags.set(Self::SCHED_GROUP, old.sched_group != new.sched_group);
        flags.set(Self::CAPABILITY, old.capability != new.capability);
        flags
    }
}

/// "Process importance changed" notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportanceChange {
    /// Process
    pub pid: Pid,
    /// Owning uid
    pub uid: Uid,
    /// Newly committed tuple
    pub importance: Importance,
    /// Tuple it replaced
    pub previous: Importance,
    /// Sits in the cached band
    pub cached: bool,
    /// Rule or edge that produced the tuple
    pub adj_type: &'static str,
    /// Fields that changed
    pub changes: ChangeFlags,
}

impl fmt::Display for ImportanceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} [{}] {} ({:?})", self.pid, self.adj_type, self.importance, self.changes)
    }
}

/// Write every changed member back to its committed state.
///
/// The cached flag and label are refreshed for every member but do not by
/// themselves produce a notification. The uid aggregates are rebuilt
/// afterwards.
pub fn commit(graph: &mut ProcessGraph, members: &BTreeSet<Pid>) -> Vec<ImportanceChange> {
    let mut changes = Vec::new();

    for &pid in members {
        let process = match graph.get_mut(pid) {
            Some(process) => process,
            None => continue,
        };

        let new = process.working.cur;
        let previous = process.committed.importance;
        process.committed.cached = process.working.cached;
        process.committed.adj_type = process.working.adj_type;
        process.committed.adj_source = process.working.adj_source;

        let flags = ChangeFlags::between(&previous, &new);
        if flags.is_empty() {
            continue;
        }

        process.committed.importance = new;
        changes.push(ImportanceChange {
            pid,
            uid: process.uid,
            importance: new,
            previous,
            cached: process.working.cached,
            adj_type: process.working.adj_type,
            changes: flags,
        });
    }

    let rows: Vec<_> = graph
        .processes()
        .map(|p| (p.pid, p.uid, p.committed.importance.proc_state, p.committed.importance.capability))
        .collect();
    graph.uids.aggregate(rows.into_iter());

    changes
}

// =============================================================================
// LISTENERS
// =============================================================================

/// Listener callback
pub type ImportanceHandler = Box<dyn Fn(&ImportanceChange) + Send + Sync>;

/// Subscription ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Listener priority (lower = called earlier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerPriority(pub u8);

impl ListenerPriority {
    /// Called first (e.g. the scheduler binding)
    pub const HIGHEST: Self = Self(0);
    pub const HIGH: Self = Self(64);
    pub const NORMAL: Self = Self(128);
    pub const LOW: Self = Self(192);
    /// Called last (e.g. telemetry)
    pub const LOWEST: Self = Self(255);
}

impl Default for ListenerPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// A registered consumer of importance changes
pub struct ImportanceListener {
    id: SubscriptionId,
    name: String,
    handler: ImportanceHandler,
    priority: ListenerPriority,
    active: AtomicBool,
}

impl ImportanceListener {
    /// Create a listener with normal priority
    pub fn new(name: impl Into<String>, handler: ImportanceHandler) -> Self {
        Self {
            id: SubscriptionId::new(),
            name: name.into(),
            handler,
            priority: ListenerPriority::NORMAL,
            active: AtomicBool::new(true),
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: ListenerPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Get subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Listener name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop delivering without unsubscribing
    pub fn pause(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Resume delivery
    pub fn resume(&self) {
        self.active.store(true, Ordering::Relaxed);
    }
}

impl fmt::Debug for ImportanceListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportanceListener")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Listeners ordered by priority
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<ImportanceListener>>,
    delivered: AtomicU64,
}

impl ListenerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: ImportanceListener) -> SubscriptionId {
        let id = listener.id;
        let priority = listener.priority;

        let mut listeners = self.listeners.write();
        let pos = listeners
            .iter()
            .position(|l| l.priority > priority)
            .unwrap_or(listeners.len());
        listeners.insert(pos, listener);

        log::debug!("importance: new listener {:?}", id);
        id
    }

    /// Remove a listener
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        if let Some(pos) = listeners.iter().position(|l| l.id == id) {
            listeners.remove(pos);
            log::debug!("importance: removed listener {:?}", id);
            true
        } else {
            false
        }
    }

    /// Pause or resume a listener
    pub fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        let listeners = self.listeners.read();
        match listeners.iter().find(|l| l.id == id) {
            Some(listener) if active => {
                listener.resume();
                true
            }
            Some(listener) => {
                listener.pause();
                true
            }
            None => false,
        }
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver every change to every active listener.
    ///
    /// Listeners must not subscribe or unsubscribe from inside the callback.
    pub fn dispatch(&self, changes: &[ImportanceChange]) -> u64 {
        if changes.is_empty() {
            return 0;
        }

        let listeners = self.listeners.read();
        let mut delivered = 0;
        for listener in listeners.iter() {
            if !listener.active.load(Ordering::Relaxed) {
                continue;
            }
            for change in changes {
                (listener.handler)(change);
                delivered += 1;
            }
        }

        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        delivered
    }

    /// Total deliveries so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .field("delivered", &self.delivered())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
