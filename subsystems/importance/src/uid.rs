//! # UID State
//!
//! Per-uid bookkeeping shared by every process running under the uid.
//! Idle status is supplied from outside; the aggregate process state and
//! capability are refreshed by the commit engine after every pass.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::process::{Pid, Uid};
use crate::tier::{Capability, ProcState};

/// Background execution policy for an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AppStartMode {
    /// No restriction
    Normal       = 0,
    /// Background execution delayed while idle
    Delayed      = 1,
    /// Delayed, and started services are not restarted
    DelayedRigid = 2,
    /// Background start disabled
    Disabled     = 3,
}

impl AppStartMode {
    /// Check whether started services should stop counting while idle
    pub const fn restricts_background(&self) -> bool {
        !matches!(self, AppStartMode::Normal)
    }
}

/// App-start-mode lookup supplied by the policy owner
pub trait AppStartPolicy: Send + Sync {
    /// Start mode for a uid
    fn app_start_mode(&self, uid: Uid) -> AppStartMode;
}

/// Policy that reports [`AppStartMode::Normal`] for everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalStartPolicy;

impl AppStartPolicy for NormalStartPolicy {
    fn app_start_mode(&self, _uid: Uid) -> AppStartMode {
        AppStartMode::Normal
    }
}

/// Policy backed by a fixed per-uid table
#[derive(Debug, Clone, Default)]
pub struct FixedStartPolicy {
    modes: BTreeMap<Uid, AppStartMode>,
    fallback: Option<AppStartMode>,
}

impl FixedStartPolicy {
    /// Empty table, everything normal
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode used for uids without an entry
    pub fn with_fallback(mut self, mode: AppStartMode) -> Self {
        self.fallback = Some(mode);
        self
    }

    /// Set the mode of one uid
    pub fn with_mode(mut self, uid: Uid, mode: AppStartMode) -> Self {
        self.modes.insert(uid, mode);
        self
    }
}

impl AppStartPolicy for FixedStartPolicy {
    fn app_start_mode(&self, uid: Uid) -> AppStartMode {
        self.modes
            .get(&uid)
            .copied()
            .or(self.fallback)
            .unwrap_or(AppStartMode::Normal)
    }
}

/// Boxed policy stored by the engine
pub type BoxedStartPolicy = Box<dyn AppStartPolicy>;

// =============================================================================
// UID RECORD
// =============================================================================

/// State of one uid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidRecord {
    /// The uid
    pub uid: Uid,
    /// No recent foreground activity
    pub idle: bool,
    /// Best process state across the uid's processes
    pub proc_state: ProcState,
    /// Union of the uid's process capabilities
    pub capability: Capability,
    /// Number of registered processes
    pub processes: u32,
}

impl UidRecord {
    /// Active uid with nothing aggregated yet
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            idle: false,
            proc_state: ProcState::Nonexistent,
            capability: Capability::empty(),
            processes: 0,
        }
    }
}

/// All known uids
#[derive(Debug, Clone, Default)]
pub struct UidTable {
    records: BTreeMap<Uid, UidRecord>,
}

impl UidTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for a uid, created on first use
    pub fn entry(&mut self, uid: Uid) -> &mut UidRecord {
        self.records.entry(uid).or_insert_with(|| UidRecord::new(uid))
    }

    /// Look up a uid
    pub fn get(&self, uid: Uid) -> Option<&UidRecord> {
        self.records.get(&uid)
    }

    /// Mark a uid idle or active
    pub fn set_idle(&mut self, uid: Uid, idle: bool) {
        self.entry(uid).idle = idle;
    }

    /// Check idle status (unknown uids are active)
    pub fn is_idle(&self, uid: Uid) -> bool {
        self.records.get(&uid).map(|r| r.idle).unwrap_or(false)
    }

    /// Rebuild the aggregates from committed process state
    pub fn aggregate(&mut self, processes: impl Iterator<Item = (Pid, Uid, ProcState, Capability)>) {
        for record in self.records.values_mut() {
            record.proc_state = ProcState::Nonexistent;
            record.capability = Capability::empty();
            record.processes = 0;
        }
        for (_pid, uid, state, caps) in processes {
            let record = self.entry(uid);
            record.proc_state = record.proc_state.best(state);
            record.capability |= caps;
            record.processes += 1;
        }
    }

    /// Iterate uid records
    pub fn iter(&self) -> impl Iterator<Item = &UidRecord> {
        self.records.values()
    }
}
