//! # Intrinsic Evaluator
//!
//! Computes the best tuple a process earns from its own signals, before any
//! binding is looked at. The decision table is data: an ordered slice of
//! [`IntrinsicRule`]s where the first matching predicate wins.
//!
//! ```text
//!   signals ──▶ [detached] ─▶ [persistent] ─▶ [top-activity] ─▶ ... ─▶ [cch-empty]
//!                    │              │                │                     │
//!                    └──────────────┴─── first match ┴─────────────────────┘
//!                                          │
//!                                          ▼
//!                                 Outcome { importance, adj_type }
//! ```
//!
//! Rules that leave a process "unassigned" report [`UNKNOWN_ADJ`]. The clamp
//! caps it during finalization, and anything still unknown after that is
//! placed by the cached-slot assigner.

use alloc::collections::BTreeSet;

use crate::config::{ImportanceConfig, Millis};
use crate::graph::{DeviceState, ProcessGraph};
use crate::process::{ActivityVisibility, BroadcastQueue, ForegroundServiceTypes, Pid, ProcessRecord, WindowSignals};
use crate::tier::{
    is_cached_adj, Adj, Capability, Importance, ProcState, SchedGroup, BACKUP_APP_ADJ, CACHED_APP_MAX_ADJ, FOREGROUND_APP_ADJ,
    HEAVY_WEIGHT_APP_ADJ, HOME_APP_ADJ, PERCEPTIBLE_APP_ADJ, PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ, PREVIOUS_APP_ADJ,
    SERVICE_ADJ, UNKNOWN_ADJ, VISIBLE_APP_ADJ,
};

// =============================================================================
// RULE TYPES
// =============================================================================

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Process being evaluated
    pub process: &'a ProcessRecord,
    /// Device-wide signals
    pub device: &'a DeviceState,
    /// Engine tunables
    pub config: &'a ImportanceConfig,
    /// Current uptime
    pub now: Millis,
}

impl<'a> RuleContext<'a> {
    fn window(&self) -> WindowSignals {
        self.process.signals.window()
    }

    fn activities(&self) -> Option<ActivityVisibility> {
        self.window().activities
    }

    fn is_top(&self) -> bool {
        self.device.is_top_app(self.process.pid)
    }

    fn unassigned(&self) -> Adj {
        UNKNOWN_ADJ
    }

    fn has_live_started(&self) -> bool {
        self.process.live_started_services().next().is_some()
    }

    /// Shown UI outside the launcher
    fn ui_not_home(&self) -> bool {
        self.process.signals.has_shown_ui && !self.window().is_home
    }
}

/// Result of a matching rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Raw tuple
    pub importance: Importance,
    /// Diagnostic label
    pub adj_type: &'static str,
}

impl Outcome {
    const fn new(adj: Adj, proc_state: ProcState, sched_group: SchedGroup, adj_type: &'static str) -> Self {
        Self {
            importance: Importance::new(adj, proc_state, sched_group),
            adj_type,
        }
    }
}

/// One row of the decision table
pub struct IntrinsicRule {
    /// Rule name, also the default label
    pub name: &'static str,
    /// Predicate
    pub matches: fn(&RuleContext<'_>) -> bool,
    /// Tuple produced when the predicate holds
    pub outcome: fn(&RuleContext<'_>) -> Outcome,
}

impl core::fmt::Debug for IntrinsicRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntrinsicRule").field("name", &self.name).finish()
    }
}

// =============================================================================
// RULE TABLE
// =============================================================================

/// Decision table, highest priority first
pub static RULES: &[IntrinsicRule] = &[
    IntrinsicRule {
        name: "detached",
        matches: |ctx| !ctx.process.signals.attached,
        outcome: |_| Outcome::new(CACHED_APP_MAX_ADJ, ProcState::CachedEmpty, SchedGroup::Background, "detached"),
    },
    IntrinsicRule {
        name: "fixed",
        matches: |ctx| ctx.process.max_adj <= FOREGROUND_APP_ADJ,
        outcome: persistent,
    },
    IntrinsicRule {
        name: "top-activity",
        matches: |ctx| ctx.is_top() && ctx.device.top_proc_state == ProcState::Top,
        outcome: |_| Outcome::new(FOREGROUND_APP_ADJ, ProcState::Top, SchedGroup::TopApp, "top-activity"),
    },
    IntrinsicRule {
        name: "running-remote-anim",
        matches: |ctx| ctx.process.signals.running_remote_animation,
        outcome: |ctx| Outcome::new(VISIBLE_APP_ADJ, ctx.device.top_proc_state, SchedGroup::TopApp, "running-remote-anim"),
    },
    IntrinsicRule {
        name: "instrumentation",
        matches: |ctx| ctx.process.signals.active_instrumentation,
        outcome: |_| {
            Outcome::new(FOREGROUND_APP_ADJ, ProcState::ForegroundService, SchedGroup::Default, "instrumentation")
        },
    },
    IntrinsicRule {
        name: "ext-provider",
        matches: |ctx| ctx.process.signals.has_external_provider_handles,
        outcome: |_| {
            Outcome::new(FOREGROUND_APP_ADJ, ProcState::ImportantForeground, SchedGroup::Default, "ext-provider")
        },
    },
    IntrinsicRule {
        name: "broadcast",
        matches: |ctx| ctx.process.signals.receiving_broadcast.is_some(),
        outcome: |ctx| {
            let group = match ctx.process.signals.receiving_broadcast {
                Some(BroadcastQueue::Foreground) => SchedGroup::Default,
                _ => SchedGroup::Background,
            };
            Outcome::new(FOREGROUND_APP_ADJ, ProcState::Receiver, group, "broadcast")
        },
    },
    IntrinsicRule {
        name: "exec-service",
        matches: |ctx| ctx.process.signals.executing_services > 0,
        outcome: |ctx| {
            let group = if ctx.process.signals.exec_services_fg {
                SchedGroup::Default
            } else {
                SchedGroup::Background
            };
            Outcome::new(FOREGROUND_APP_ADJ, ProcState::Service, group, "exec-service")
        },
    },
    IntrinsicRule {
        name: "top-sleeping",
        matches: |ctx| ctx.is_top() && ctx.device.top_proc_state == ProcState::TopSleeping,
        outcome: |_| Outcome::new(FOREGROUND_APP_ADJ, ProcState::TopSleeping, SchedGroup::Background, "top-sleeping"),
    },
    IntrinsicRule {
        name: "vis-activity",
        matches: |ctx| ctx.activities() == Some(ActivityVisibility::Visible),
        outcome: |ctx| Outcome::new(VISIBLE_APP_ADJ, ctx.device.top_proc_state, SchedGroup::TopApp, "vis-activity"),
    },
    IntrinsicRule {
        name: "pause-activity",
        matches: |ctx| ctx.activities() == Some(ActivityVisibility::Paused),
        outcome: |ctx| {
            Outcome::new(PERCEPTIBLE_APP_ADJ, ctx.device.top_proc_state, SchedGroup::Default, "pause-activity")
        },
    },
    IntrinsicRule {
        name: "stop-activity",
        matches: |ctx| ctx.activities() == Some(ActivityVisibility::Stopping),
        outcome: |_| Outcome::new(PERCEPTIBLE_APP_ADJ, ProcState::LastActivity, SchedGroup::Background, "stop-activity"),
    },
    IntrinsicRule {
        name: "fg-service-act",
        matches: |ctx| ctx.process.signals.foreground_service.is_some() && recently_top(ctx),
        outcome: |_| {
            Outcome::new(
                PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ,
                ProcState::ForegroundService,
                SchedGroup::Default,
                "fg-service-act",
            )
        },
    },
    IntrinsicRule {
        name: "fg-service",
        matches: |ctx| ctx.process.signals.foreground_service.is_some(),
        outcome: |ctx| {
            let label = match ctx.process.signals.foreground_service {
                Some(types) if types.contains(ForegroundServiceTypes::LOCATION) => "fg-service-location",
                _ => "fg-service",
            };
            Outcome::new(PERCEPTIBLE_APP_ADJ, ProcState::ForegroundService, SchedGroup::Default, label)
        },
    },
    IntrinsicRule {
        name: "has-overlay-ui",
        matches: |ctx| ctx.process.signals.has_overlay_ui,
        outcome: |_| {
            Outcome::new(PERCEPTIBLE_APP_ADJ, ProcState::ImportantForeground, SchedGroup::Default, "has-overlay-ui")
        },
    },
    IntrinsicRule {
        name: "force-imp",
        matches: |ctx| ctx.process.signals.forcing_to_important,
        outcome: |_| Outcome::new(PERCEPTIBLE_APP_ADJ, ProcState::TransientBackground, SchedGroup::Default, "force-imp"),
    },
    IntrinsicRule {
        name: "backup",
        matches: |ctx| ctx.device.is_backup_target(ctx.process.pid, ctx.process.user()),
        outcome: |_| Outcome::new(BACKUP_APP_ADJ, ProcState::TransientBackground, SchedGroup::Background, "backup"),
    },
    IntrinsicRule {
        name: "heavy",
        matches: |ctx| ctx.window().is_heavy_weight,
        outcome: |_| Outcome::new(HEAVY_WEIGHT_APP_ADJ, ProcState::HeavyWeight, SchedGroup::Background, "heavy"),
    },
    IntrinsicRule {
        name: "started-services",
        matches: live_started_service,
        outcome: |_| Outcome::new(SERVICE_ADJ, ProcState::Service, SchedGroup::Background, "started-services"),
    },
    IntrinsicRule {
        name: "home",
        matches: |ctx| ctx.window().is_home,
        outcome: |_| Outcome::new(HOME_APP_ADJ, ProcState::Home, SchedGroup::Background, "home"),
    },
    IntrinsicRule {
        name: "previous",
        matches: |ctx| ctx.window().is_previous && ctx.window().has_activities(),
        outcome: |_| Outcome::new(PREVIOUS_APP_ADJ, ProcState::LastActivity, SchedGroup::Background, "previous"),
    },
    IntrinsicRule {
        name: "recent-provider",
        matches: |ctx| {
            let last = ctx.process.signals.last_provider_time;
            last > 0 && last.saturating_add(ctx.config.content_provider_retain_ms) > ctx.now
        },
        outcome: |_| {
            Outcome::new(PREVIOUS_APP_ADJ, ProcState::LastActivity, SchedGroup::Background, "recent-provider")
        },
    },
    IntrinsicRule {
        name: "cch-started-services",
        matches: |ctx| ctx.has_live_started(),
        outcome: |ctx| {
            let label = if ctx.ui_not_home() {
                "cch-started-ui-services"
            } else {
                "cch-started-services"
            };
            Outcome::new(ctx.unassigned(), ProcState::Service, SchedGroup::Background, label)
        },
    },
    IntrinsicRule {
        name: "cch-client-act",
        matches: |ctx| ctx.process.signals.has_client_activities,
        outcome: |ctx| {
            Outcome::new(ctx.unassigned(), ProcState::CachedActivityClient, SchedGroup::Background, "cch-client-act")
        },
    },
    IntrinsicRule {
        name: "cch-as-act",
        matches: |ctx| ctx.process.signals.treat_like_activity,
        outcome: |ctx| Outcome::new(ctx.unassigned(), ProcState::CachedActivity, SchedGroup::Background, "cch-as-act"),
    },
    IntrinsicRule {
        name: "cch-act",
        matches: |ctx| ctx.window().has_activities(),
        outcome: |ctx| Outcome::new(ctx.unassigned(), ProcState::CachedActivity, SchedGroup::Background, "cch-act"),
    },
    IntrinsicRule {
        name: "cch-rec",
        matches: |ctx| ctx.window().has_recent_tasks,
        outcome: |ctx| Outcome::new(ctx.unassigned(), ProcState::CachedRecent, SchedGroup::Background, "cch-rec"),
    },
    IntrinsicRule {
        name: "cch-empty",
        matches: |_| true,
        outcome: |ctx| Outcome::new(ctx.unassigned(), ProcState::CachedEmpty, SchedGroup::Background, "cch-empty"),
    },
];

fn persistent(ctx: &RuleContext<'_>) -> Outcome {
    let signals = &ctx.process.signals;
    let mut outcome = Outcome::new(ctx.process.max_adj, ProcState::Persistent, SchedGroup::Default, "fixed");

    if ctx.is_top() {
        outcome.importance.sched_group = SchedGroup::TopApp;
        outcome.adj_type = "pers-top-activity";
    } else if signals.has_top_ui {
        outcome.importance.sched_group = SchedGroup::TopApp;
        outcome.adj_type = "pers-top-ui";
    }

    let shows_ui = ctx.is_top() || signals.has_top_ui || ctx.activities() == Some(ActivityVisibility::Visible);
    if shows_ui {
        if ctx.device.is_awake() || signals.running_remote_animation {
            outcome.importance.proc_state = ProcState::PersistentUi;
            outcome.importance.sched_group = SchedGroup::TopApp;
        } else {
            outcome.importance.proc_state = ProcState::BoundForegroundService;
            outcome.importance.sched_group = SchedGroup::Restricted;
        }
    }

    outcome.importance.capability = Capability::ALL;
    outcome
}

/// Was top a moment ago, or still is as far as the last commit knows
fn recently_top(ctx: &RuleContext<'_>) -> bool {
    let last_top = ctx.process.signals.last_top_time;
    (last_top > 0 && last_top.saturating_add(ctx.config.top_to_fgs_grace_ms) > ctx.now)
        || ctx.process.committed.importance.proc_state <= ProcState::Top
}

/// A started service did work recently and the process is not a UI app
fn live_started_service(ctx: &RuleContext<'_>) -> bool {
    if ctx.ui_not_home() {
        return false;
    }
    let limit = ctx.config.max_service_inactivity_ms;
    ctx.process
        .live_started_services()
        .any(|s| ctx.now < s.last_activity.saturating_add(limit))
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Evaluate the table for one process
pub fn evaluate(ctx: &RuleContext<'_>) -> Outcome {
    let mut outcome = RULES
        .iter()
        .find(|rule| (rule.matches)(ctx))
        .map(|rule| (rule.outcome)(ctx))
        .unwrap_or_else(|| Outcome::new(UNKNOWN_ADJ, ProcState::CachedEmpty, SchedGroup::Background, "cch-empty"));

    if ctx.process.signals.attached {
        if let Some(types) = ctx.process.signals.foreground_service {
            outcome.importance.capability |= types.capabilities();
        }
    }

    log::trace!(
        "intrinsic pid={} {} -> {}",
        ctx.process.pid,
        outcome.adj_type,
        outcome.importance
    );
    outcome
}

/// Reset the working state of every member to its intrinsic tuple.
///
/// Suppression marks set by the idle gate survive; everything else the
/// previous pass wrote is discarded. Each call opens a new adj sequence and
/// stamps it on the members it seeds. Returns the number of evaluations.
pub(crate) fn seed(graph: &mut ProcessGraph, members: &BTreeSet<Pid>, config: &ImportanceConfig, now: Millis) -> u64 {
    let seq = graph.next_seq();
    let mut evaluated = 0;
    for &pid in members {
        let outcome = match graph.get(pid) {
            Some(process) => evaluate(&RuleContext { process, device: &graph.device, config, now }),
            None => continue,
        };
        if let Some(process) = graph.get_mut(pid) {
            let working = &mut process.working;
            working.raw = outcome.importance;
            working.cur = outcome.importance;
            working.cached = is_cached_adj(outcome.importance.adj);
            working.adj_type = outcome.adj_type;
            working.adj_source = None;
            working.schedule_like_top = false;
            working.slotted = false;
            process.visit_seq = seq;
            evaluated += 1;
        }
    }
    evaluated
}

/// Name of the first rule matching a process
pub fn matching_rule(ctx: &RuleContext<'_>) -> Option<&'static str> {
    RULES.iter().find(|rule| (rule.matches)(ctx)).map(|rule| rule.name)
}

// =============================================================================
// TESTS
// =============================================================================
