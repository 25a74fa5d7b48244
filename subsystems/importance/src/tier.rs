//! # Importance Tiers
//!
//! The value types every stage of a pass works with: the adj ladder, the
//! process-state precedence, scheduling groups and capability bits.
//!
//! ## Adj Ladder
//!
//! ```text
//!   -800  PERSISTENT_PROC_ADJ         system-critical, never killed
//!   -700  PERSISTENT_SERVICE_ADJ      bound by persistent with above-client
//!      0  FOREGROUND_APP_ADJ          top app, instrumentation, broadcasts
//!     50  PERCEPTIBLE_RECENT_FG       fg service that was just top
//!    100  VISIBLE_APP_ADJ             visible activity, remote animation
//!    200  PERCEPTIBLE_APP_ADJ         fg service, overlay, toast
//!    225  PERCEPTIBLE_MEDIUM_APP_ADJ  almost-perceptible binding
//!    250  PERCEPTIBLE_LOW_APP_ADJ     not-perceptible binding
//!    300  BACKUP_APP_ADJ              backup target
//!    400  HEAVY_WEIGHT_APP_ADJ        heavy-weight process
//!    500  SERVICE_ADJ                 started service (A list)
//!    600  HOME_APP_ADJ                launcher
//!    700  PREVIOUS_APP_ADJ            previous app, recent provider
//!    800  SERVICE_B_ADJ               started service (B list)
//!    900  CACHED_APP_MIN_ADJ ─┐
//!     ..                      ├─ cached slots, evicted first
//!    999  CACHED_APP_MAX_ADJ ─┘
//!   1001  UNKNOWN_ADJ                 not yet assigned
//! ```
//!
//! Lower adj is more important. Process states follow the same direction:
//! the lower the discriminant, the more important the role.

use core::cmp::Ordering;
use core::fmt;

use bitflags::bitflags;
use static_assertions::{const_assert, const_assert_eq};

// =============================================================================
// ADJ CONSTANTS
// =============================================================================

/// Importance value of a process
pub type Adj = i32;

/// Adj not yet computed
pub const UNKNOWN_ADJ: Adj = 1001;
/// Least important cached slot
pub const CACHED_APP_MAX_ADJ: Adj = 999;
/// Most important cached slot
pub const CACHED_APP_MIN_ADJ: Adj = 900;
/// Started services that have been idle for a while
pub const SERVICE_B_ADJ: Adj = 800;
/// The previously used foreground app
pub const PREVIOUS_APP_ADJ: Adj = 700;
/// The launcher
pub const HOME_APP_ADJ: Adj = 600;
/// Started services with recent activity
pub const SERVICE_ADJ: Adj = 500;
/// Heavy-weight application
pub const HEAVY_WEIGHT_APP_ADJ: Adj = 400;
/// Process being backed up
pub const BACKUP_APP_ADJ: Adj = 300;
/// Perceptible only through a not-perceptible binding
pub const PERCEPTIBLE_LOW_APP_ADJ: Adj = 250;
/// Almost perceptible binding
pub const PERCEPTIBLE_MEDIUM_APP_ADJ: Adj = 225;
/// Perceptible to the user (fg service, overlay, toast)
pub const PERCEPTIBLE_APP_ADJ: Adj = 200;
/// Hosts a visible activity
pub const VISIBLE_APP_ADJ: Adj = 100;
/// Foreground service that was top a moment ago
pub const PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ: Adj = 50;
/// Foreground application
pub const FOREGROUND_APP_ADJ: Adj = 0;
/// Service bound by a persistent process with above-client
pub const PERSISTENT_SERVICE_ADJ: Adj = -700;
/// Persistent system process
pub const PERSISTENT_PROC_ADJ: Adj = -800;
/// Core system process
pub const SYSTEM_ADJ: Adj = -900;
/// Native process outside the engine's control
pub const NATIVE_ADJ: Adj = -1000;

/// Number of distinct cached importance levels
pub const CACHED_APP_IMPORTANCE_LEVELS: Adj = 5;

/// First slot handed to an empty cached process
pub const FIRST_CACHED_EMPTY_ADJ: Adj = CACHED_APP_MIN_ADJ + CACHED_APP_IMPORTANCE_LEVELS;

const_assert!(NATIVE_ADJ < SYSTEM_ADJ);
const_assert!(PERSISTENT_PROC_ADJ < PERSISTENT_SERVICE_ADJ);
const_assert!(PERSISTENT_SERVICE_ADJ < FOREGROUND_APP_ADJ);
const_assert!(PERCEPTIBLE_APP_ADJ < PERCEPTIBLE_MEDIUM_APP_ADJ);
const_assert!(PERCEPTIBLE_MEDIUM_APP_ADJ < PERCEPTIBLE_LOW_APP_ADJ);
const_assert!(SERVICE_ADJ < SERVICE_B_ADJ);
const_assert!(SERVICE_B_ADJ < CACHED_APP_MIN_ADJ);
const_assert!(CACHED_APP_MAX_ADJ < UNKNOWN_ADJ);
const_assert!(FIRST_CACHED_EMPTY_ADJ + 2 * CACHED_APP_IMPORTANCE_LEVELS <= CACHED_APP_MAX_ADJ);
const_assert_eq!(FIRST_CACHED_EMPTY_ADJ, 905);

/// Check whether an adj lies in the cached band (or is still unassigned)
pub const fn is_cached_adj(adj: Adj) -> bool {
    adj >= CACHED_APP_MIN_ADJ
}

// =============================================================================
// PROCESS STATE
// =============================================================================

/// Process role, ordered from most to least important
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProcState {
    /// Persistent system process
    Persistent             = 0,
    /// Persistent process currently showing UI
    PersistentUi           = 1,
    /// Foreground application
    Top                    = 2,
    /// Bound by the foreground application
    BoundTop               = 3,
    /// Runs a foreground service
    ForegroundService      = 4,
    /// Bound by a foreground service or persistent process
    BoundForegroundService = 5,
    /// User-perceptible foreground work
    ImportantForeground    = 6,
    /// User-perceptible background work
    ImportantBackground    = 7,
    /// Briefly important (toast, not-foreground binding)
    TransientBackground    = 8,
    /// Being backed up
    Backup                 = 9,
    /// Runs a service
    Service                = 10,
    /// Receiving a broadcast
    Receiver               = 11,
    /// Top application while the device sleeps
    TopSleeping            = 12,
    /// Heavy-weight application
    HeavyWeight            = 13,
    /// Launcher
    Home                   = 14,
    /// Previous application
    LastActivity           = 15,
    /// Cached process with activities
    CachedActivity         = 16,
    /// Cached process bound by a client with activities
    CachedActivityClient   = 17,
    /// Cached process with recent tasks
    CachedRecent           = 18,
    /// Cached process with nothing going on
    CachedEmpty            = 19,
    /// Process does not exist
    Nonexistent            = 20,
}

impl ProcState {
    /// Process-state name
    pub const fn name(&self) -> &'static str {
        match self {
            ProcState::Persistent => "PER",
            ProcState::PersistentUi => "PERU",
            ProcState::Top => "TOP",
            ProcState::BoundTop => "BTOP",
            ProcState::ForegroundService => "FGS",
            ProcState::BoundForegroundService => "BFGS",
            ProcState::ImportantForeground => "IMPF",
            ProcState::ImportantBackground => "IMPB",
            ProcState::TransientBackground => "TRNB",
            ProcState::Backup => "BKUP",
            ProcState::Service => "SVC",
            ProcState::Receiver => "RCVR",
            ProcState::TopSleeping => "TPSL",
            ProcState::HeavyWeight => "HVY",
            ProcState::Home => "HOME",
            ProcState::LastActivity => "LAST",
            ProcState::CachedActivity => "CAC",
            ProcState::CachedActivityClient => "CACC",
            ProcState::CachedRecent => "CRE",
            ProcState::CachedEmpty => "CEM",
            ProcState::Nonexistent => "NONE",
        }
    }

    /// Persistent states rank above top
    pub const fn is_persistent(&self) -> bool {
        (*self as u8) < (ProcState::Top as u8)
    }

    /// Any of the cached states
    pub const fn is_cached(&self) -> bool {
        (*self as u8) >= (ProcState::CachedActivity as u8)
    }

    /// Cached states that place a process in the activity slot band
    pub const fn is_cached_activity_band(&self) -> bool {
        matches!(
            self,
            ProcState::CachedActivity | ProcState::CachedActivityClient | ProcState::CachedRecent
        )
    }

    /// Pick the more important of two states
    pub fn best(self, other: ProcState) -> ProcState {
        self.min(other)
    }
}

impl Default for ProcState {
    fn default() -> Self {
        ProcState::Nonexistent
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// SCHEDULING GROUP
// =============================================================================

/// CPU scheduling class, ordered from least to most favoured
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SchedGroup {
    /// Background cgroup
    Background   = 0,
    /// Restricted while the screen is off
    Restricted   = 1,
    /// Normal foreground share
    Default      = 2,
    /// Top application
    TopApp       = 3,
    /// Bound to the top application with an important binding
    TopAppBound  = 4,
}

impl SchedGroup {
    /// Group name
    pub const fn name(&self) -> &'static str {
        match self {
            SchedGroup::Background => "bg",
            SchedGroup::Restricted => "restricted",
            SchedGroup::Default => "default",
            SchedGroup::TopApp => "top-app",
            SchedGroup::TopAppBound => "top-app-bound",
        }
    }
}

impl Default for SchedGroup {
    fn default() -> Self {
        SchedGroup::Background
    }
}

impl fmt::Display for SchedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// CAPABILITIES
// =============================================================================

bitflags! {
    /// Capabilities granted to a process while in its current state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capability: u32 {
        /// Foreground location access
        const FOREGROUND_LOCATION   = 1 << 0;
        /// Foreground camera access
        const FOREGROUND_CAMERA     = 1 << 1;
        /// Foreground microphone access
        const FOREGROUND_MICROPHONE = 1 << 2;
        /// Network access regardless of background restrictions
        const NETWORK               = 1 << 3;

        /// Capabilities granted implicitly to while-in-use permissions
        const ALL_IMPLICIT = Self::FOREGROUND_CAMERA.bits() | Self::FOREGROUND_MICROPHONE.bits();
        /// Every capability
        const ALL = Self::FOREGROUND_LOCATION.bits()
            | Self::FOREGROUND_CAMERA.bits()
            | Self::FOREGROUND_MICROPHONE.bits()
            | Self::NETWORK.bits();
    }
}

impl Capability {
    /// Capabilities implied by a process state alone
    pub fn default_for(state: ProcState) -> Capability {
        match state {
            ProcState::Persistent | ProcState::PersistentUi | ProcState::Top => Capability::ALL,
            ProcState::BoundTop
            | ProcState::ForegroundService
            | ProcState::BoundForegroundService => Capability::NETWORK,
            _ => Capability::empty(),
        }
    }
}

// =============================================================================
// IMPORTANCE TUPLE
// =============================================================================

/// The value a pass computes for every process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Importance {
    /// Importance value
    pub adj: Adj,
    /// Process role
    pub proc_state: ProcState,
    /// Scheduling group
    pub sched_group: SchedGroup,
    /// Capability grants
    pub capability: Capability,
}

impl Importance {
    /// Create a tuple with no capabilities
    pub const fn new(adj: Adj, proc_state: ProcState, sched_group: SchedGroup) -> Self {
        Self {
            adj,
            proc_state,
            sched_group,
            capability: Capability::empty(),
        }
    }

    /// Least important tuple, used before anything is computed
    pub const fn unknown() -> Self {
        Self::new(UNKNOWN_ADJ, ProcState::CachedEmpty, SchedGroup::Background)
    }

    /// Set capabilities
    pub const fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Compare by `(adj asc, procState precedence)`.
    ///
    /// `Ordering::Less` means `self` is more important.
    pub fn rank(&self, other: &Importance) -> Ordering {
        self.adj
            .cmp(&other.adj)
            .then(self.proc_state.cmp(&other.proc_state))
    }

    /// Check whether `self` ranks strictly above `other`
    pub fn outranks(&self, other: &Importance) -> bool {
        self.rank(other) == Ordering::Less
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "adj={} state={} group={} caps={:#x}",
            self.adj,
            self.proc_state,
            self.sched_group,
            self.capability.bits()
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_state_precedence() {
        assert!(ProcState::Persistent < ProcState::PersistentUi);
        assert!(ProcState::PersistentUi < ProcState::Top);
        assert!(ProcState::BoundTop < ProcState::ForegroundService);
        assert!(ProcState::Service < ProcState::Receiver);
        assert!(ProcState::CachedRecent < ProcState::CachedEmpty);
        assert_eq!(ProcState::Top.best(ProcState::Service), ProcState::Top);
    }

    #[test]
    fn test_proc_state_classes() {
        assert!(ProcState::PersistentUi.is_persistent());
        assert!(!ProcState::Top.is_persistent());
        assert!(ProcState::CachedActivity.is_cached());
        assert!(!ProcState::LastActivity.is_cached());
        assert!(ProcState::CachedRecent.is_cached_activity_band());
        assert!(!ProcState::CachedEmpty.is_cached_activity_band());
    }

    #[test]
    fn test_sched_group_order() {
        assert!(SchedGroup::TopAppBound > SchedGroup::TopApp);
        assert!(SchedGroup::TopApp > SchedGroup::Default);
        assert!(SchedGroup::Default > SchedGroup::Restricted);
        assert!(SchedGroup::Restricted > SchedGroup::Background);
    }

    #[test]
    fn test_default_capabilities() {
        assert_eq!(Capability::default_for(ProcState::Top), Capability::ALL);
        assert_eq!(Capability::default_for(ProcState::BoundTop), Capability::NETWORK);
        assert_eq!(
            Capability::default_for(ProcState::BoundForegroundService),
            Capability::NETWORK
        );
        assert!(Capability::default_for(ProcState::Service).is_empty());
        assert_eq!(Capability::ALL.bits(), 0xf);
    }

    #[test]
    fn test_importance_rank() {
        let top = Importance::new(FOREGROUND_APP_ADJ, ProcState::Top, SchedGroup::TopApp);
        let bound = Importance::new(FOREGROUND_APP_ADJ, ProcState::BoundTop, SchedGroup::Default);
        let fgs = Importance::new(PERCEPTIBLE_APP_ADJ, ProcState::ForegroundService, SchedGroup::Default);

        assert!(top.outranks(&bound));
        assert!(bound.outranks(&fgs));
        assert!(!fgs.outranks(&fgs));
        assert!(Importance::unknown().rank(&fgs) == Ordering::Greater);
    }

    #[test]
    fn test_cached_band() {
        assert!(is_cached_adj(CACHED_APP_MIN_ADJ));
        assert!(is_cached_adj(UNKNOWN_ADJ));
        assert!(!is_cached_adj(SERVICE_B_ADJ));
    }
}
