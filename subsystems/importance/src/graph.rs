//! # Process Graph
//!
//! The arena a pass runs over: process records keyed by pid, binding edges
//! keyed by [`BindingId`], per-process inbound/outbound edge lists, the
//! global LRU ordering and the device-wide signals.
//!
//! ```text
//!   processes: BTreeMap<Pid, ProcessRecord>
//!   bindings:  BTreeMap<BindingId, Binding>
//!
//!   outbound[client] ──▶ [BindingId, ...] ──▶ targets
//!   inbound[target]  ──▶ [BindingId, ...] ──▶ clients
//!
//!   lru: [least recent ... most recent]
//! ```
//!
//! Edges refer to processes by pid only, so cycles in the binding graph are
//! plain data and the propagator walks them with an explicit worklist.

use core::fmt;

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::vec::Vec;

use crate::binding::{BindFlags, Binding, BindingId, BindingKind};
use crate::error::{ErrorKind, ImportanceResult};
use crate::process::{Pid, ProcessRecord, UserId};
use crate::tier::ProcState;
use crate::uid::UidTable;

// =============================================================================
// DEVICE STATE
// =============================================================================

/// Device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakefulness {
    /// Screen on, user interacting
    Awake,
    /// Screen off
    Asleep,
}

/// Device-wide inputs shared by every process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    /// Power state
    pub wakefulness: Wakefulness,
    /// Current foreground application
    pub top_app: Option<Pid>,
    /// Process state handed to the top app (TOP, or TOP_SLEEPING on keyguard)
    pub top_proc_state: ProcState,
    /// Process being backed up, per user
    pub backup_targets: BTreeMap<UserId, Pid>,
    /// Active user
    pub current_user: UserId,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            wakefulness: Wakefulness::Awake,
            top_app: None,
            top_proc_state: ProcState::Top,
            backup_targets: BTreeMap::new(),
            current_user: 0,
        }
    }
}

impl DeviceState {
    /// Check whether the device is awake
    pub fn is_awake(&self) -> bool {
        self.wakefulness == Wakefulness::Awake
    }

    /// Check whether a process is the top app
    pub fn is_top_app(&self, pid: Pid) -> bool {
        self.top_app == Some(pid)
    }

    /// Check whether a process is the backup target of its user
    pub fn is_backup_target(&self, pid: Pid, user: UserId) -> bool {
        self.backup_targets.get(&user) == Some(&pid)
    }
}

// =============================================================================
// PROCESS GRAPH
// =============================================================================

/// Graph statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Registered processes
    pub processes: usize,
    /// Registered bindings
    pub bindings: usize,
    /// Service bindings
    pub service_bindings: usize,
    /// Provider connections
    pub provider_bindings: usize,
    /// Client-activity edges
    pub client_activity_bindings: usize,
}

/// Processes, bindings and device state guarded by the engine lock
pub struct ProcessGraph {
    /// All processes by pid
    processes: BTreeMap<Pid, ProcessRecord>,

    /// All bindings by id
    bindings: BTreeMap<BindingId, Binding>,

    /// Edges where the key is the client
    outbound: BTreeMap<Pid, Vec<BindingId>>,

    /// Edges where the key is the target
    inbound: BTreeMap<Pid, Vec<BindingId>>,

    /// Least recently used first
    lru: Vec<Pid>,

    /// Device-wide signals
    pub device: DeviceState,

    /// Per-uid state
    pub uids: UidTable,

    /// Pass generation counter
    adj_seq: u64,

    /// Service processes counted by the last full pass
    pub(crate) service_process_count: u32,
}

impl ProcessGraph {
    /// Create empty graph
    pub fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            bindings: BTreeMap::new(),
            outbound: BTreeMap::new(),
            inbound: BTreeMap::new(),
            lru: Vec::new(),
            device: DeviceState::default(),
            uids: UidTable::new(),
            adj_seq: 0,
            service_process_count: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Processes
    // -------------------------------------------------------------------------

    /// Register a process; it becomes the most recently used
    pub fn add_process(&mut self, record: ProcessRecord) -> ImportanceResult<()> {
        let pid = record.pid;
        if self.processes.contains_key(&pid) {
            return Err(importance_error!(ErrorKind::ProcessExists, "Process already registered").with_pid(pid));
        }

        self.uids.entry(record.uid);
        self.processes.insert(pid, record);
        self.lru.push(pid);
        Ok(())
    }

    /// Remove a process and every edge touching it
    pub fn remove_process(&mut self, pid: Pid) -> ImportanceResult<ProcessRecord> {
        let record = self
            .processes
            .remove(&pid)
            .ok_or_else(|| importance_error!(ErrorKind::ProcessNotFound, "Process not found").with_pid(pid))?;

        let mut edges: Vec<BindingId> = self.outbound.remove(&pid).unwrap_or_default();
        edges.extend(self.inbound.remove(&pid).unwrap_or_default());
        // a self-binding sits on both lists
        edges.sort_unstable();
        edges.dedup();
        for id in edges {
            if self.remove_binding(id).is_err() {
                invariant_violation!("pid {} lists edge {:?} missing from the binding table", pid, id);
            }
        }

        self.lru.retain(|&p| p != pid);
        if self.device.top_app == Some(pid) {
            self.device.top_app = None;
        }
        self.device.backup_targets.retain(|_, p| *p != pid);
        Ok(record)
    }

    /// Get process
    pub fn get(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    /// Get process mutably
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessRecord> {
        self.processes.get_mut(&pid)
    }

    /// Check registration
    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Iterate processes in pid order
    pub fn processes(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.processes.values()
    }

    /// Iterate processes mutably
    pub fn processes_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.processes.values_mut()
    }

    /// All pids
    pub fn pids(&self) -> BTreeSet<Pid> {
        self.processes.keys().copied().collect()
    }

    /// Number of processes
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    // -------------------------------------------------------------------------
    // LRU
    // -------------------------------------------------------------------------

    /// Move a process to the most recently used position
    pub fn touch(&mut self, pid: Pid) -> ImportanceResult<()> {
        importance_ensure!(
            self.contains(pid),
            ErrorKind::ProcessNotFound,
            "Process not found",
            "pid {} not registered",
            pid
        );
        self.lru.retain(|&p| p != pid);
        self.lru.push(pid);
        Ok(())
    }

    /// Pids from most to least recently used
    pub fn lru_most_recent_first(&self) -> impl Iterator<Item = Pid> + '_ {
        self.lru.iter().rev().copied()
    }

    // -------------------------------------------------------------------------
    // Bindings
    // -------------------------------------------------------------------------

    /// Add an edge; both endpoints must be registered
    pub fn add_binding(&mut self, binding: Binding) -> ImportanceResult<BindingId> {
        if !self.contains(binding.client) {
            return Err(importance_error!(
                ErrorKind::InvalidBinding,
                "Binding client not registered",
                "binding {:?}",
                binding.id
            )
            .with_pid(binding.client));
        }
        if !self.contains(binding.target) {
            return Err(importance_error!(
                ErrorKind::InvalidBinding,
                "Binding target not registered",
                "binding {:?}",
                binding.id
            )
            .with_pid(binding.target));
        }
        importance_ensure!(
            !self.bindings.contains_key(&binding.id),
            ErrorKind::InvalidBinding,
            "Binding already registered",
            "binding {:?} already registered",
            binding.id
        );

        let id = binding.id;
        self.outbound.entry(binding.client).or_default().push(id);
        self.inbound.entry(binding.target).or_default().push(id);
        self.bindings.insert(id, binding);
        Ok(id)
    }

    /// Remove an edge
    pub fn remove_binding(&mut self, id: BindingId) -> ImportanceResult<Binding> {
        let binding = self
            .bindings
            .remove(&id)
            .ok_or_else(|| importance_error!(ErrorKind::BindingNotFound, "Binding not found", "{:?}", id))?;

        if let Some(list) = self.outbound.get_mut(&binding.client) {
            list.retain(|&b| b != id);
        }
        if let Some(list) = self.inbound.get_mut(&binding.target) {
            list.retain(|&b| b != id);
        }
        Ok(binding)
    }

    /// Get binding
    pub fn binding(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    /// Edges held by a client
    pub fn outbound(&self, pid: Pid) -> impl Iterator<Item = &Binding> {
        self.edges(self.outbound.get(&pid))
    }

    /// Edges pointing at a target
    pub fn inbound(&self, pid: Pid) -> impl Iterator<Item = &Binding> {
        self.edges(self.inbound.get(&pid))
    }

    fn edges<'a>(&'a self, ids: Option<&'a Vec<BindingId>>) -> impl Iterator<Item = &'a Binding> {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.bindings.get(id))
    }

    /// Outbound edge ids of a client
    pub(crate) fn outbound_ids(&self, pid: Pid) -> Vec<BindingId> {
        self.outbound.get(&pid).cloned().unwrap_or_default()
    }

    /// Bound by some other process
    pub fn has_inbound_from_others(&self, pid: Pid) -> bool {
        self.inbound(pid).any(|b| !b.is_self_binding())
    }

    /// Holds a binding that asks to rank below its target
    pub fn has_above_client(&self, pid: Pid) -> bool {
        self.outbound(pid)
            .any(|b| !b.is_self_binding() && b.flags.contains(BindFlags::ABOVE_CLIENT))
    }

    /// Processes outside `members` holding edges into it
    pub fn anchors_of(&self, members: &BTreeSet<Pid>) -> BTreeSet<Pid> {
        members
            .iter()
            .flat_map(|&pid| self.inbound(pid))
            .map(|b| b.client)
            .filter(|client| !members.contains(client))
            .collect()
    }

    /// Seeds plus every process reachable over client → target edges
    pub fn dependents_of(&self, seeds: &[Pid]) -> BTreeSet<Pid> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Pid> = seeds.iter().copied().filter(|&p| self.contains(p)).collect();

        while let Some(pid) = queue.pop_front() {
            if !seen.insert(pid) {
                continue;
            }
            for binding in self.outbound(pid) {
                if !seen.contains(&binding.target) {
                    queue.push_back(binding.target);
                }
            }
        }
        seen
    }

    // -------------------------------------------------------------------------
    // Pass bookkeeping
    // -------------------------------------------------------------------------

    /// Start a new pass generation
    pub(crate) fn next_seq(&mut self) -> u64 {
        self.adj_seq += 1;
        self.adj_seq
    }

    /// Current pass generation
    pub fn adj_seq(&self) -> u64 {
        self.adj_seq
    }

    /// Compute statistics
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            processes: self.processes.len(),
            bindings: self.bindings.len(),
            ..Default::default()
        };
        for binding in self.bindings.values() {
            match binding.kind {
                BindingKind::Service { .. } => stats.service_bindings += 1,
                BindingKind::Provider => stats.provider_bindings += 1,
                BindingKind::ClientActivity => stats.client_activity_bindings += 1,
            }
        }
        stats
    }
}

impl Default for ProcessGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGraph")
            .field("processes", &self.processes.len())
            .field("bindings", &self.bindings.len())
            .field("adj_seq", &self.adj_seq)
            .field("device", &self.device)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
