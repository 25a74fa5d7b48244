//! # Process Records
//!
//! One [`ProcessRecord`] exists per registered OS process. It carries the
//! signals collaborators feed in (window state, services, broadcasts), the
//! clamp, and three copies of the importance tuple:
//!
//! | Copy | Written by | Read by |
//! |------|------------|---------|
//! | raw | intrinsic evaluator, propagator | propagator (as client contribution) |
//! | cur | finalization, slot assigner | commit engine |
//! | set | commit engine | external readers, next pass |
//!
//! Records never point at each other. Bindings live in the graph and refer
//! to processes by pid.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::config::Millis;
use crate::tier::{Adj, Capability, Importance, ProcState, SchedGroup, UNKNOWN_ADJ};

// =============================================================================
// IDENTITY
// =============================================================================

/// Process id
pub type Pid = u32;

/// Linux-style uid (`user * PER_USER_RANGE + app id`)
pub type Uid = u32;

/// User id
pub type UserId = u32;

/// Uids reserved per user
pub const PER_USER_RANGE: Uid = 100_000;

/// User owning a uid
pub const fn user_id(uid: Uid) -> UserId {
    uid / PER_USER_RANGE
}

/// Identity of a service component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceName {
    /// Owning package
    pub package: String,
    /// Component class
    pub class: String,
}

impl ServiceName {
    /// Create a service name
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

// =============================================================================
// SIGNALS
// =============================================================================

bitflags! {
    /// Declared foreground-service types
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ForegroundServiceTypes: u32 {
        const DATA_SYNC        = 1 << 0;
        const MEDIA_PLAYBACK   = 1 << 1;
        const PHONE_CALL       = 1 << 2;
        const LOCATION         = 1 << 3;
        const CONNECTED_DEVICE = 1 << 4;
        const MEDIA_PROJECTION = 1 << 5;
        const CAMERA           = 1 << 6;
        const MICROPHONE       = 1 << 7;
    }
}

impl ForegroundServiceTypes {
    /// Capabilities the declared types grant while the service runs
    pub fn capabilities(&self) -> Capability {
        let mut caps = Capability::empty();
        if self.contains(Self::LOCATION) {
            caps |= Capability::FOREGROUND_LOCATION;
        }
        if self.contains(Self::CAMERA) {
            caps |= Capability::FOREGROUND_CAMERA;
        }
        if self.contains(Self::MICROPHONE) {
            caps |= Capability::FOREGROUND_MICROPHONE;
        }
        caps
    }
}

/// Most visible state among a process's activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActivityVisibility {
    /// At least one activity is visible
    Visible,
    /// An activity is pausing
    Paused,
    /// An activity is stopping
    Stopping,
    /// Activities exist but none is on screen
    Stopped,
}

/// Broadcast queue a receiver is dispatched from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastQueue {
    /// Foreground queue
    Foreground,
    /// Background queue
    Background,
}

/// Signals supplied by the window/activity subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSignals {
    /// Activity state, `None` when the process hosts no activity
    pub activities: Option<ActivityVisibility>,
    /// Launcher process
    pub is_home: bool,
    /// Previously used foreground process
    pub is_previous: bool,
    /// Heavy-weight process
    pub is_heavy_weight: bool,
    /// Owns entries in recent tasks
    pub has_recent_tasks: bool,
}

impl WindowSignals {
    /// Check whether any activity is hosted
    pub fn has_activities(&self) -> bool {
        self.activities.is_some()
    }
}

/// Per-process inputs read by the intrinsic evaluator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSignals {
    /// An execution thread is attached
    pub attached: bool,
    /// Window signals, `None` until a window controller is attached
    pub window: Option<WindowSignals>,
    /// Shows UI above everything (e.g. system UI)
    pub has_top_ui: bool,
    /// Shows an overlay window
    pub has_overlay_ui: bool,
    /// Runs a remote transition animation
    pub running_remote_animation: bool,
    /// Under active instrumentation
    pub active_instrumentation: bool,
    /// Queue of the broadcast being received, if any
    pub receiving_broadcast: Option<BroadcastQueue>,
    /// Service callbacks in flight
    pub executing_services: u32,
    /// Service callbacks run at foreground priority
    pub exec_services_fg: bool,
    /// Foreground service declaration
    pub foreground_service: Option<ForegroundServiceTypes>,
    /// Transient "force important" request (e.g. toast)
    pub forcing_to_important: bool,
    /// Bound by a client that has activities
    pub has_client_activities: bool,
    /// Treated like an activity host
    pub treat_like_activity: bool,
    /// Has shown UI since it last went to the background
    pub has_shown_ui: bool,
    /// Hosts a provider with external process handles
    pub has_external_provider_handles: bool,
    /// Last time the process was top
    pub last_top_time: Millis,
    /// Last time one of its providers was used
    pub last_provider_time: Millis,
}

impl Default for ProcessSignals {
    fn default() -> Self {
        Self {
            attached: true,
            window: None,
            has_top_ui: false,
            has_overlay_ui: false,
            running_remote_animation: false,
            active_instrumentation: false,
            receiving_broadcast: None,
            executing_services: 0,
            exec_services_fg: false,
            foreground_service: None,
            forcing_to_important: false,
            has_client_activities: false,
            treat_like_activity: false,
            has_shown_ui: false,
            has_external_provider_handles: false,
            last_top_time: 0,
            last_provider_time: 0,
        }
    }
}

impl ProcessSignals {
    /// Window signals, or the empty default when none are attached
    pub fn window(&self) -> WindowSignals {
        self.window.unwrap_or_default()
    }
}

/// A service the process was asked to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service identity
    pub name: ServiceName,
    /// Started (as opposed to only bound)
    pub started: bool,
    /// Last time the service did work
    pub last_activity: Millis,
    /// Listed on the keep-warm allow-list for the current user
    pub keep_warming: bool,
}

impl ServiceRecord {
    /// A started service
    pub fn started(name: ServiceName, last_activity: Millis) -> Self {
        Self { name, started: true, last_activity, keep_warming: false }
    }
}

// =============================================================================
// PROCESS RECORD
// =============================================================================

/// Values produced by the running pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingState {
    /// Pre-finalization tuple, what clients hand to their targets
    pub raw: Importance,
    /// Final tuple for this pass
    pub cur: Importance,
    /// Raw adj lies in the cached band
    pub cached: bool,
    /// Rule or edge that produced the tuple
    pub adj_type: &'static str,
    /// Client that last improved the tuple
    pub adj_source: Option<Pid>,
    /// A schedule-like-top binding applies
    pub schedule_like_top: bool,
    /// Adj was handed out by the slot assigner
    pub slotted: bool,
    /// Started services gated off by the idle uid gate
    pub services_suppressed: bool,
}

impl Default for WorkingState {
    fn default() -> Self {
        Self {
            raw: Importance::unknown(),
            cur: Importance::unknown(),
            cached: true,
            adj_type: "",
            adj_source: None,
            schedule_like_top: false,
            slotted: false,
            services_suppressed: false,
        }
    }
}

/// Values from the last committed pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedState {
    /// Committed tuple
    pub importance: Importance,
    /// Committed cached flag
    pub cached: bool,
    /// Committed adjustment label
    pub adj_type: &'static str,
    /// Client behind the committed tuple
    pub adj_source: Option<Pid>,
}

impl Default for CommittedState {
    fn default() -> Self {
        Self {
            importance: Importance::new(UNKNOWN_ADJ, ProcState::Nonexistent, SchedGroup::Background),
            cached: true,
            adj_type: "",
            adj_source: None,
        }
    }
}

/// A tracked process
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// Process id
    pub pid: Pid,
    /// Owning uid
    pub uid: Uid,
    /// Process name
    pub name: String,
    /// Worst adj the process may regress to
    pub max_adj: Adj,
    /// Inputs from collaborators
    pub signals: ProcessSignals,
    /// Started services hosted here
    pub services: Vec<ServiceRecord>,
    /// Ranked on the service B list
    pub service_b: bool,
    /// Working values of the current pass
    pub working: WorkingState,
    /// Committed values
    pub committed: CommittedState,
    /// Pass generation that last evaluated this record
    pub visit_seq: u64,
    /// Currently on the propagation worklist
    pub(crate) queued: bool,
}

impl ProcessRecord {
    /// Create a record with default signals and an unrestricted clamp
    pub fn new(pid: Pid, uid: Uid, name: impl Into<String>) -> Self {
        Self {
            pid,
            uid,
            name: name.into(),
            max_adj: UNKNOWN_ADJ,
            signals: ProcessSignals::default(),
            services: Vec::new(),
            service_b: false,
            working: WorkingState::default(),
            committed: CommittedState::default(),
            visit_seq: 0,
            queued: false,
        }
    }

    /// Start a builder
    pub fn builder(pid: Pid, uid: Uid, name: impl Into<String>) -> ProcessBuilder {
        ProcessBuilder { record: Self::new(pid, uid, name) }
    }

    /// User owning the process
    pub fn user(&self) -> UserId {
        user_id(self.uid)
    }

    /// Hosts at least one started service
    pub fn has_started_services(&self) -> bool {
        self.services.iter().any(|s| s.started)
    }

    /// Started services that still count toward importance
    pub fn live_started_services(&self) -> impl Iterator<Item = &ServiceRecord> {
        let suppressed = self.working.services_suppressed;
        self.services.iter().filter(move |s| s.started && !suppressed)
    }

    /// Hosts a started service on the keep-warm list
    pub fn is_keep_warm(&self) -> bool {
        self.live_started_services().any(|s| s.keep_warming)
    }

    /// Committed view for readers outside the graph lock
    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            pid: self.pid,
            uid: self.uid,
            adj: self.committed.importance.adj,
            proc_state: self.committed.importance.proc_state,
            sched_group: self.committed.importance.sched_group,
            capability: self.committed.importance.capability,
            cached: self.committed.cached,
            adj_type: self.committed.adj_type,
            adj_source: self.committed.adj_source,
            service_b: self.service_b,
        }
    }
}

/// Builder for [`ProcessRecord`]
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    record: ProcessRecord,
}

impl ProcessBuilder {
    /// Set the clamp
    pub fn max_adj(mut self, adj: Adj) -> Self {
        self.record.max_adj = adj;
        self
    }

    /// Replace all signals
    pub fn signals(mut self, signals: ProcessSignals) -> Self {
        self.record.signals = signals;
        self
    }

    /// Attach window signals
    pub fn window(mut self, window: WindowSignals) -> Self {
        self.record.signals.window = Some(window);
        self
    }

    /// Host activities in the given state
    pub fn activities(mut self, visibility: ActivityVisibility) -> Self {
        let mut window = self.record.signals.window();
        window.activities = Some(visibility);
        self.record.signals.window = Some(window);
        self
    }

    /// Declare a foreground service
    pub fn foreground_service(mut self, types: ForegroundServiceTypes) -> Self {
        self.record.signals.foreground_service = Some(types);
        self
    }

    /// Mark as showing top UI
    pub fn top_ui(mut self) -> Self {
        self.record.signals.has_top_ui = true;
        self
    }

    /// Mark as having shown UI
    pub fn shown_ui(mut self) -> Self {
        self.record.signals.has_shown_ui = true;
        self
    }

    /// Add a started service
    pub fn started_service(mut self, service: ServiceRecord) -> Self {
        self.record.services.push(service);
        self
    }

    /// Pre-rank on the service B list
    pub fn service_b(mut self) -> Self {
        self.record.service_b = true;
        self
    }

    /// Edit signals in place
    pub fn with_signals(mut self, f: impl FnOnce(&mut ProcessSignals)) -> Self {
        f(&mut self.record.signals);
        self
    }

    /// Finish
    pub fn build(self) -> ProcessRecord {
        self.record
    }
}

/// Committed importance of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub uid: Uid,
    pub adj: Adj,
    pub proc_state: ProcState,
    pub sched_group: SchedGroup,
    pub capability: Capability,
    pub cached: bool,
    pub adj_type: &'static str,
    pub adj_source: Option<Pid>,
    pub service_b: bool,
}

// =============================================================================
// TESTS
// =============================================================================
