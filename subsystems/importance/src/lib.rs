//! # Helix Process Importance Engine
//!
//! Ranks every live process by how much the user would miss it. The result
//! is a tuple per process: an adj score (lower is more important), a process
//! state tier, a scheduling group and a capability set. Reclaim, the
//! scheduler and telemetry read these tuples; none of them live here.
//!
//! ## Pass Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         IMPORTANCE PASS                                  │
//! │                                                                          │
//! │   ┌───────────┐   ┌─────────────┐   ┌───────────┐   ┌───────────────┐    │
//! │   │ Intrinsic │──▶│  Binding    │──▶│ Service B │──▶│   Finalize    │    │
//! │   │ Evaluator │   │ Propagator  │   │  ranking  │   │ clamp + caps  │    │
//! │   └───────────┘   └─────────────┘   └───────────┘   └───────┬───────┘    │
//! │         ▲                                                   │            │
//! │         │ demoted                                           ▼            │
//! │   ┌─────┴─────┐                                     ┌───────────────┐    │
//! │   │ UID-idle  │◀────────────────────────────────────│  Cached-slot  │    │
//! │   │   gate    │                                     │   assigner    │    │
//! │   └─────┬─────┘                                     └───────────────┘    │
//! │         │ stable                                                         │
//! │         ▼                                                                │
//! │   ┌───────────┐     ┌───────────┐                                        │
//! │   │  Commit   │────▶│ Listeners │  (after the graph lock is released)    │
//! │   └───────────┘     └───────────┘                                        │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use helix_importance::{Binding, BindFlags, ImportanceConfig, ImportanceEngine, ProcessRecord};
//!
//! let engine = ImportanceEngine::new(ImportanceConfig::default())?;
//! engine.register_process(ProcessRecord::new(100, 10_001, "com.example.app"))?;
//! engine.register_process(ProcessRecord::new(101, 10_002, "com.example.sync"))?;
//! engine.bind(Binding::service(100, 101, BindFlags::empty()))?;
//! engine.set_top_app(Some(100))?;
//! engine.update_pending_targets();
//! ```

#![no_std]

extern crate alloc;

// =============================================================================
// INTERNAL MACROS
// =============================================================================

/// Report a broken internal invariant and let the caller skip the item
macro_rules! invariant_violation {
    ($($arg:tt)*) => {
        $crate::error::report_invariant(format_args!($($arg)*))
    };
}

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Error types and macros
#[macro_use]
pub mod error;

/// Adj ladder, process states, scheduling groups, capabilities
pub mod tier;

/// Engine tunables
pub mod config;

/// Process records and their signals
pub mod process;

/// Service, provider and client-activity edges
pub mod binding;

/// Per-uid state and app-start policy
pub mod uid;

/// Process graph and device state
pub mod graph;

/// Intrinsic decision table
pub mod intrinsic;

/// Edge relaxation and finalization
pub mod propagate;

/// Service B ranking and cached slots
pub mod cached;

/// UID-idle gate
pub mod idle;

/// Commit and change listeners
pub mod commit;

/// Engine front-end
pub mod engine;

#[cfg(test)]
mod scenarios;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use binding::{BindFlags, Binding, BindingId, BindingKind};
pub use commit::{ChangeFlags, ImportanceChange, ImportanceHandler, ImportanceListener, ListenerPriority, SubscriptionId};
pub use config::{ImportanceConfig, Millis};
pub use engine::{Clock, EngineStatsSnapshot, ImportanceEngine, ManualClock, PassReport};
pub use error::{ErrorKind, ImportanceError, ImportanceResult};
pub use graph::{DeviceState, GraphStats, ProcessGraph, Wakefulness};
pub use process::{
    ActivityVisibility, BroadcastQueue, ForegroundServiceTypes, Pid, ProcessBuilder, ProcessRecord, ProcessSignals,
    ProcessSnapshot, ServiceName, ServiceRecord, Uid, UserId, WindowSignals,
};
pub use tier::{Adj, Capability, Importance, ProcState, SchedGroup};
pub use uid::{AppStartMode, AppStartPolicy, BoxedStartPolicy, FixedStartPolicy, NormalStartPolicy, UidRecord};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
