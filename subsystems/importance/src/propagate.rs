//! # Binding Propagator
//!
//! Worklist relaxation over client → target edges until no target can be
//! improved any further, followed by per-process finalization.
//!
//! ```text
//!   worklist: [members..., anchors...]
//!        │
//!        ▼
//!   pop P ──▶ for each P → T (T in members)
//!                 candidate = contribute(P.raw, edge, T.raw)
//!                 merge(T.raw, candidate)
//!                 improved? ──yes──▶ push T (unless already queued)
//! ```
//!
//! Merging only ever moves a field towards "more important": adj down,
//! procState down, group up, capability bits on. Every field has a finite
//! range, so the worklist drains even when the binding graph has cycles.
//!
//! Anchors are processes outside the pass that hold edges into it. They
//! contribute the raw tuple they settled on in an earlier pass.

use alloc::collections::{BTreeSet, VecDeque};

use crate::binding::{BindFlags, Binding, BindingKind};
use crate::config::{ImportanceConfig, Millis};
use crate::graph::ProcessGraph;
use crate::process::{Pid, ProcessRecord, WorkingState};
use crate::tier::{
    is_cached_adj, Adj, Capability, Importance, ProcState, SchedGroup, CACHED_APP_MAX_ADJ, CACHED_APP_MIN_ADJ,
    PERCEPTIBLE_APP_ADJ, PERCEPTIBLE_LOW_APP_ADJ, PERCEPTIBLE_MEDIUM_APP_ADJ, PERSISTENT_SERVICE_ADJ,
    VISIBLE_APP_ADJ,
};

// =============================================================================
// VIEWS
// =============================================================================

/// What a client offers its targets
#[derive(Debug, Clone, Copy)]
struct ClientView {
    pid: Pid,
    adj: Adj,
    proc_state: ProcState,
    sched_group: SchedGroup,
    capability: Capability,
    cached: bool,
}

impl ClientView {
    fn of(process: &ProcessRecord) -> Self {
        let raw = process.working.raw;
        let proc_state = if raw.proc_state >= ProcState::CachedActivity {
            ProcState::CachedEmpty
        } else {
            raw.proc_state
        };
        Self {
            pid: process.pid,
            adj: raw.adj,
            proc_state,
            sched_group: raw.sched_group,
            capability: raw.capability | Capability::default_for(raw.proc_state),
            cached: is_cached_adj(raw.adj),
        }
    }
}

/// The parts of a target the contribution rules look at
#[derive(Debug, Clone, Copy)]
struct TargetView {
    raw: Importance,
    ui_not_home: bool,
}

impl TargetView {
    fn of(process: &ProcessRecord) -> Self {
        let window = process.signals.window();
        Self {
            raw: process.working.raw,
            ui_not_home: process.signals.has_shown_ui && !window.is_home,
        }
    }
}

/// Proposed improvement for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Contribution {
    pub adj: Option<Adj>,
    pub proc_state: Option<ProcState>,
    pub sched_group: Option<SchedGroup>,
    pub capability: Capability,
    pub schedule_like_top: bool,
    pub adj_type: &'static str,
}

impl Contribution {
    fn labelled(adj_type: &'static str) -> Self {
        Self {
            adj: None,
            proc_state: None,
            sched_group: None,
            capability: Capability::empty(),
            schedule_like_top: false,
            adj_type,
        }
    }

    fn offer_state(&mut self, state: ProcState) {
        self.proc_state = Some(self.proc_state.map_or(state, |s| s.best(state)));
    }

    fn offer_group(&mut self, group: SchedGroup) {
        self.sched_group = Some(self.sched_group.map_or(group, |g| g.max(group)));
    }
}

/// Per-pass environment of the contribution rules
#[derive(Debug, Clone, Copy)]
struct EdgeEnv<'a> {
    config: &'a ImportanceConfig,
    awake: bool,
    now: Millis,
}

// =============================================================================
// CONTRIBUTION RULES
// =============================================================================

fn contribute(edge: &Binding, client: &ClientView, target: &TargetView, env: &EdgeEnv<'_>) -> Contribution {
    match edge.kind {
        BindingKind::Service { last_activity, activity_visible } => {
            service_contribution(edge.flags, last_activity, activity_visible, client, target, env)
        }
        BindingKind::Provider => provider_contribution(client, target),
        BindingKind::ClientActivity => {
            let mut out = Contribution::labelled("cch-client-act");
            out.offer_state(ProcState::CachedActivityClient);
            out
        }
    }
}

fn service_contribution(
    flags: BindFlags,
    last_activity: Millis,
    activity_visible: Option<bool>,
    client: &ClientView,
    target: &TargetView,
    env: &EdgeEnv<'_>,
) -> Contribution {
    let mut out = Contribution::labelled("service");
    let t = target.raw;

    if !flags.contains(BindFlags::WAIVE_PRIORITY) {
        let mut client_adj = client.adj;
        let mut client_state = client.proc_state;

        if flags.contains(BindFlags::ALLOW_OOM_MANAGEMENT) {
            if target.ui_not_home {
                client_adj = t.adj;
                client_state = t.proc_state;
                out.adj_type = "cch-bound-ui-services";
            } else if env.now >= last_activity.saturating_add(env.config.max_service_inactivity_ms) {
                client_adj = t.adj;
                out.adj_type = "cch-bound-services";
            }
        }

        if !client.cached && t.adj > client_adj {
            if target.ui_not_home && client_adj > PERCEPTIBLE_APP_ADJ {
                out.adj_type = "cch-bound-ui-services";
            } else {
                let adj = bound_adj(flags, client_adj, t.adj, &mut out);
                out.adj = Some(adj);
            }
        }

        let offered = if !flags.intersects(BindFlags::NOT_FOREGROUND | BindFlags::IMPORTANT_BACKGROUND) {
            if client.sched_group > t.sched_group {
                out.offer_group(if flags.contains(BindFlags::IMPORTANT) {
                    client.sched_group
                } else {
                    SchedGroup::Default
                });
            }
            if client_state < ProcState::Top {
                let bound_fgs = flags.contains(BindFlags::FOREGROUND_SERVICE)
                    || (env.awake && flags.contains(BindFlags::FOREGROUND_SERVICE_WHILE_AWAKE));
                if bound_fgs {
                    ProcState::BoundForegroundService
                } else {
                    ProcState::ImportantForeground
                }
            } else if client_state == ProcState::Top {
                ProcState::BoundTop
            } else {
                client_state
            }
        } else if flags.contains(BindFlags::IMPORTANT_BACKGROUND) {
            client_state.max(ProcState::ImportantBackground)
        } else {
            client_state.max(ProcState::TransientBackground)
        };
        out.offer_state(offered);

        if flags.contains(BindFlags::SCHEDULE_LIKE_TOP_APP) && client.proc_state < ProcState::Top {
            out.offer_group(SchedGroup::TopAppBound);
            out.schedule_like_top = true;
        }

        if flags.contains(BindFlags::INCLUDE_CAPABILITIES) {
            out.capability |= client.capability;
        }
    } else if !client.cached {
        out.offer_state(client.proc_state.max(ProcState::Service));
    }

    if flags.contains(BindFlags::TREAT_LIKE_ACTIVITY) && out.proc_state.map_or(true, |s| s > ProcState::CachedActivity)
    {
        out.offer_state(ProcState::CachedActivity);
        out.adj_type = "cch-as-act";
    }

    if flags.contains(BindFlags::ADJUST_WITH_ACTIVITY) && activity_visible == Some(true) && t.adj > 0 {
        out.adj = Some(0);
        if !flags.contains(BindFlags::NOT_FOREGROUND) {
            out.offer_group(if flags.contains(BindFlags::IMPORTANT) {
                SchedGroup::TopAppBound
            } else {
                SchedGroup::Default
            });
        }
    }

    out
}

/// Adj a service binding hands its target
fn bound_adj(flags: BindFlags, client_adj: Adj, target_adj: Adj, out: &mut Contribution) -> Adj {
    if flags.intersects(BindFlags::ABOVE_CLIENT | BindFlags::IMPORTANT) {
        if client_adj >= PERSISTENT_SERVICE_ADJ {
            client_adj
        } else {
            out.offer_state(ProcState::Persistent);
            out.offer_group(SchedGroup::Default);
            PERSISTENT_SERVICE_ADJ
        }
    } else if flags.contains(BindFlags::NOT_PERCEPTIBLE)
        && client_adj <= PERCEPTIBLE_APP_ADJ
        && target_adj >= PERCEPTIBLE_LOW_APP_ADJ
    {
        PERCEPTIBLE_LOW_APP_ADJ
    } else if flags.contains(BindFlags::ALMOST_PERCEPTIBLE)
        && client_adj < PERCEPTIBLE_APP_ADJ
        && target_adj >= PERCEPTIBLE_MEDIUM_APP_ADJ
    {
        PERCEPTIBLE_MEDIUM_APP_ADJ
    } else if flags.contains(BindFlags::NOT_VISIBLE)
        && client_adj < PERCEPTIBLE_APP_ADJ
        && target_adj >= PERCEPTIBLE_APP_ADJ
    {
        PERCEPTIBLE_APP_ADJ
    } else if client_adj >= PERCEPTIBLE_APP_ADJ {
        client_adj
    } else {
        client_adj.max(VISIBLE_APP_ADJ)
    }
}

fn provider_contribution(client: &ClientView, target: &TargetView) -> Contribution {
    let mut out = Contribution::labelled("provider");
    let t = target.raw;

    if !client.cached && t.adj > client.adj {
        if target.ui_not_home && client.adj > PERCEPTIBLE_APP_ADJ {
            out.adj_type = "cch-ui-provider";
        } else {
            out.adj = Some(client.adj.max(0));
        }
    }

    let state = match client.proc_state {
        ProcState::Top => ProcState::BoundTop,
        s if s <= ProcState::ForegroundService => ProcState::BoundForegroundService,
        s => s,
    };
    out.offer_state(state);

    if client.sched_group > t.sched_group {
        out.offer_group(SchedGroup::Default);
    }
    out
}

// =============================================================================
// MERGE
// =============================================================================

/// Fold a contribution into a working state, field by field.
///
/// Returns `true` if any field improved.
pub(crate) fn merge(working: &mut WorkingState, contribution: &Contribution, client: Pid) -> bool {
    let raw = &mut working.raw;
    let mut improved = false;
    let mut ranked = false;

    if let Some(adj) = contribution.adj {
        if adj < raw.adj {
            raw.adj = adj;
            ranked = true;
        }
    }
    if let Some(state) = contribution.proc_state {
        if state < raw.proc_state {
            raw.proc_state = state;
            ranked = true;
        }
    }
    if let Some(group) = contribution.sched_group {
        if group > raw.sched_group {
            raw.sched_group = group;
            improved = true;
        }
    }
    if !raw.capability.contains(contribution.capability) {
        raw.capability |= contribution.capability;
        improved = true;
    }
    if contribution.schedule_like_top && !working.schedule_like_top {
        working.schedule_like_top = true;
        improved = true;
    }

    if ranked {
        working.adj_type = contribution.adj_type;
        working.adj_source = Some(client);
    }
    improved || ranked
}

// =============================================================================
// WORKLIST
// =============================================================================

/// Counters for one propagation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Edges evaluated
    pub relaxations: u64,
    /// Edges that improved their target
    pub improvements: u64,
    /// Edges skipped because an endpoint was missing
    pub skipped: u64,
}

/// Relax every edge into `members` until the fixed point.
///
/// A target takes part only when the last seed stamped it with the current
/// adj sequence; edges into anything else leave it untouched.
pub fn propagate(
    graph: &mut ProcessGraph,
    members: &BTreeSet<Pid>,
    config: &ImportanceConfig,
    now: Millis,
) -> PropagationStats {
    let env = EdgeEnv { config, awake: graph.device.is_awake(), now };
    let seq = graph.adj_seq();
    let mut stats = PropagationStats::default();
    let mut queue: VecDeque<Pid> = VecDeque::new();

    let anchors = graph.anchors_of(members);
    for &pid in members.iter().chain(anchors.iter()) {
        if let Some(process) = graph.get_mut(pid) {
            process.queued = true;
            queue.push_back(pid);
        }
    }

    while let Some(pid) = queue.pop_front() {
        let client = match graph.get_mut(pid) {
            Some(process) => {
                process.queued = false;
                ClientView::of(process)
            }
            None => continue,
        };

        for id in graph.outbound_ids(pid) {
            let edge = match graph.binding(id) {
                Some(edge) => edge.clone(),
                None => continue,
            };
            if edge.is_self_binding() {
                continue;
            }

            let target = match graph.get(edge.target) {
                Some(target) => target,
                None => {
                    invariant_violation!("edge {:?} points at unregistered pid {}", edge.id, edge.target);
                    stats.skipped += 1;
                    continue;
                }
            };
            if target.visit_seq != seq || !target.signals.attached {
                continue;
            }

            stats.relaxations += 1;
            let contribution = contribute(&edge, &client, &TargetView::of(target), &env);

            if let Some(target) = graph.get_mut(edge.target) {
                if merge(&mut target.working, &contribution, client.pid) {
                    stats.improvements += 1;
                    #[cfg(feature = "trace-relaxation")]
                    log::trace!(
                        "{} {} -> {}: {} ({})",
                        edge.kind.name(),
                        client.pid,
                        edge.target,
                        target.working.raw,
                        target.working.adj_type
                    );
                    if !target.queued {
                        target.queued = true;
                        queue.push_back(edge.target);
                    }
                }
            }
        }
    }

    stats
}

// =============================================================================
// FINALIZATION
// =============================================================================

/// Adj of a process that asked its service to rank above it
pub(crate) fn above_client_adj(adj: Adj) -> Adj {
    if adj < 0 {
        adj
    } else if adj < VISIBLE_APP_ADJ {
        VISIBLE_APP_ADJ
    } else if adj < PERCEPTIBLE_APP_ADJ {
        PERCEPTIBLE_APP_ADJ
    } else if adj < PERCEPTIBLE_LOW_APP_ADJ {
        PERCEPTIBLE_LOW_APP_ADJ
    } else if adj < CACHED_APP_MIN_ADJ {
        CACHED_APP_MIN_ADJ
    } else if adj < CACHED_APP_MAX_ADJ {
        adj + 1
    } else {
        adj
    }
}

/// Derive the final tuple of every member from its raw tuple
pub fn finalize(graph: &mut ProcessGraph, members: &BTreeSet<Pid>) {
    let awake = graph.device.is_awake();

    for &pid in members {
        let above_client = graph.has_above_client(pid);
        let process = match graph.get_mut(pid) {
            Some(process) => process,
            None => continue,
        };

        let mut cur = process.working.raw;
        if above_client {
            cur.adj = above_client_adj(cur.adj);
        }
        if cur.adj > process.max_adj {
            cur.adj = process.max_adj;
            if process.max_adj <= PERCEPTIBLE_LOW_APP_ADJ {
                cur.sched_group = SchedGroup::Default;
            }
        }
        if !awake && cur.proc_state >= ProcState::BoundForegroundService && !process.working.schedule_like_top {
            cur.sched_group = cur.sched_group.min(SchedGroup::Restricted);
        }
        cur.capability |= Capability::default_for(cur.proc_state);

        process.working.cur = cur;
        process.working.cached = is_cached_adj(process.working.raw.adj);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Wakefulness;
    use crate::intrinsic;
    use crate::process::{ActivityVisibility, ForegroundServiceTypes, ProcessRecord};
    use crate::tier::{FOREGROUND_APP_ADJ, PERSISTENT_PROC_ADJ, UNKNOWN_ADJ};

    const CLIENT: Pid = 1;
    const SERVICE: Pid = 2;

    fn graph() -> ProcessGraph {
        let mut graph = ProcessGraph::new();
        graph.add_process(ProcessRecord::new(SERVICE, 10_002, "service")).unwrap();
        graph
    }

    fn run(graph: &mut ProcessGraph) -> PropagationStats {
        let config = ImportanceConfig::default();
        let members = graph.pids();
        intrinsic::seed(graph, &members, &config, 1_000);
        let stats = propagate(graph, &members, &config, 1_000);
        finalize(graph, &members);
        stats
    }

    fn cur(graph: &ProcessGraph, pid: Pid) -> Importance {
        graph.get(pid).unwrap().working.cur
    }

    /// Top-app client bound to SERVICE with the given flags
    fn bound_from_top(flags: BindFlags) -> ProcessGraph {
        let mut graph = graph();
        graph.add_process(ProcessRecord::new(CLIENT, 10_001, "client")).unwrap();
        graph.device.top_app = Some(CLIENT);
        graph.add_binding(Binding::service(CLIENT, SERVICE, flags)).unwrap();
        run(&mut graph);
        graph
    }

    fn bound_from_persistent(flags: BindFlags) -> ProcessGraph {
        let mut graph = graph();
        graph
            .add_process(ProcessRecord::builder(CLIENT, 1_000, "system").max_adj(PERSISTENT_PROC_ADJ).build())
            .unwrap();
        graph.add_binding(Binding::service(CLIENT, SERVICE, flags)).unwrap();
        run(&mut graph);
        graph
    }

    #[test]
    fn test_plain_binding_from_top() {
        let graph = bound_from_top(BindFlags::empty());
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, VISIBLE_APP_ADJ);
        assert_eq!(service.proc_state, ProcState::BoundTop);
        assert_eq!(service.sched_group, SchedGroup::Default);
        assert_eq!(service.capability, Capability::NETWORK);
        assert_eq!(graph.get(SERVICE).unwrap().working.adj_source, Some(CLIENT));
        assert_eq!(graph.get(SERVICE).unwrap().working.adj_type, "service");
    }

    #[test]
    fn test_unseeded_target_is_left_alone() {
        let config = ImportanceConfig::default();
        let mut graph = graph();
        graph.add_process(ProcessRecord::new(CLIENT, 10_001, "client")).unwrap();
        graph.device.top_app = Some(CLIENT);
        graph.add_binding(Binding::service(CLIENT, SERVICE, BindFlags::empty())).unwrap();

        let members: BTreeSet<Pid> = [CLIENT].into_iter().collect();
        intrinsic::seed(&mut graph, &members, &config, 1_000);
        let stats = propagate(&mut graph, &members, &config, 1_000);
        assert_eq!(stats.relaxations, 0);
        assert_eq!(graph.get(SERVICE).unwrap().visit_seq, 0);
        assert_eq!(graph.get(SERVICE).unwrap().working.adj_source, None);

        assert_eq!(run(&mut graph).relaxations, 1);
        assert_eq!(graph.get(SERVICE).unwrap().visit_seq, graph.adj_seq());
        assert_eq!(graph.get(SERVICE).unwrap().working.adj_source, Some(CLIENT));
    }

    #[test]
    fn test_perceptibility_flags() {
        assert_eq!(cur(&bound_from_top(BindFlags::NOT_PERCEPTIBLE), SERVICE).adj, PERCEPTIBLE_LOW_APP_ADJ);
        assert_eq!(cur(&bound_from_top(BindFlags::NOT_VISIBLE), SERVICE).adj, PERCEPTIBLE_APP_ADJ);
        assert_eq!(
            cur(&bound_from_top(BindFlags::ALMOST_PERCEPTIBLE), SERVICE).adj,
            PERCEPTIBLE_MEDIUM_APP_ADJ
        );
    }

    #[test]
    fn test_important_from_top_inherits_group() {
        let graph = bound_from_top(BindFlags::IMPORTANT);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, FOREGROUND_APP_ADJ);
        assert_eq!(service.sched_group, SchedGroup::TopApp);
    }

    #[test]
    fn test_important_from_persistent_hits_floor() {
        let graph = bound_from_persistent(BindFlags::IMPORTANT);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, PERSISTENT_SERVICE_ADJ);
        assert_eq!(service.proc_state, ProcState::Persistent);
        assert_eq!(service.capability, Capability::ALL);
    }

    #[test]
    fn test_persistent_client_states() {
        let plain = bound_from_persistent(BindFlags::empty());
        assert_eq!(cur(&plain, SERVICE).proc_state, ProcState::ImportantForeground);
        assert_eq!(cur(&plain, SERVICE).adj, VISIBLE_APP_ADJ);

        let fgs = bound_from_persistent(BindFlags::FOREGROUND_SERVICE);
        assert_eq!(cur(&fgs, SERVICE).proc_state, ProcState::BoundForegroundService);

        let awake = bound_from_persistent(BindFlags::FOREGROUND_SERVICE_WHILE_AWAKE);
        assert_eq!(cur(&awake, SERVICE).proc_state, ProcState::BoundForegroundService);

        let mut asleep = graph();
        asleep
            .add_process(ProcessRecord::builder(CLIENT, 1_000, "system").max_adj(PERSISTENT_PROC_ADJ).build())
            .unwrap();
        asleep.device.wakefulness = Wakefulness::Asleep;
        asleep
            .add_binding(Binding::service(CLIENT, SERVICE, BindFlags::FOREGROUND_SERVICE_WHILE_AWAKE))
            .unwrap();
        run(&mut asleep);
        assert_eq!(cur(&asleep, SERVICE).proc_state, ProcState::ImportantForeground);
    }

    #[test]
    fn test_background_flags() {
        let not_fg = bound_from_top(BindFlags::NOT_FOREGROUND);
        assert_eq!(cur(&not_fg, SERVICE).proc_state, ProcState::TransientBackground);
        assert_eq!(cur(&not_fg, SERVICE).sched_group, SchedGroup::Background);

        let imp_bg = bound_from_top(BindFlags::NOT_FOREGROUND | BindFlags::IMPORTANT_BACKGROUND);
        assert_eq!(cur(&imp_bg, SERVICE).proc_state, ProcState::ImportantBackground);
    }

    #[test]
    fn test_schedule_like_top_survives_sleep() {
        let mut graph = graph();
        graph
            .add_process(ProcessRecord::builder(CLIENT, 1_000, "system").max_adj(PERSISTENT_PROC_ADJ).build())
            .unwrap();
        graph.device.wakefulness = Wakefulness::Asleep;
        graph
            .add_binding(Binding::service(CLIENT, SERVICE, BindFlags::SCHEDULE_LIKE_TOP_APP))
            .unwrap();
        run(&mut graph);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.sched_group, SchedGroup::TopAppBound);
        assert!(graph.get(SERVICE).unwrap().working.schedule_like_top);

        // Same shape without the flag is restricted while asleep.
        let mut plain = bound_from_persistent(BindFlags::FOREGROUND_SERVICE);
        plain.device.wakefulness = Wakefulness::Asleep;
        run(&mut plain);
        assert_eq!(cur(&plain, SERVICE).sched_group, SchedGroup::Restricted);
    }

    #[test]
    fn test_include_capabilities() {
        let without = bound_from_top(BindFlags::empty());
        assert_eq!(cur(&without, SERVICE).capability, Capability::NETWORK);

        let with = bound_from_top(BindFlags::INCLUDE_CAPABILITIES);
        assert_eq!(cur(&with, SERVICE).capability, Capability::ALL);
    }

    #[test]
    fn test_waive_priority() {
        let graph = bound_from_top(BindFlags::WAIVE_PRIORITY);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, UNKNOWN_ADJ);
        assert_eq!(service.proc_state, ProcState::Service);
        assert_eq!(service.sched_group, SchedGroup::Background);
    }

    #[test]
    fn test_adjust_with_activity() {
        let mut graph = graph();
        graph.add_process(ProcessRecord::new(CLIENT, 10_001, "client")).unwrap();
        graph
            .add_binding(
                Binding::service(
                    CLIENT,
                    SERVICE,
                    BindFlags::ADJUST_WITH_ACTIVITY | BindFlags::WAIVE_PRIORITY | BindFlags::IMPORTANT,
                )
                .with_activity(true),
            )
            .unwrap();
        run(&mut graph);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, FOREGROUND_APP_ADJ);
        assert_eq!(service.sched_group, SchedGroup::TopAppBound);

        let mut hidden = graph;
        let id = hidden.outbound_ids(CLIENT)[0];
        hidden.remove_binding(id).unwrap();
        hidden
            .add_binding(Binding::service(CLIENT, SERVICE, BindFlags::ADJUST_WITH_ACTIVITY).with_activity(false))
            .unwrap();
        run(&mut hidden);
        assert_eq!(cur(&hidden, SERVICE).adj, UNKNOWN_ADJ);
    }

    #[test]
    fn test_allow_oom_management_with_ui() {
        let mut graph = ProcessGraph::new();
        graph
            .add_process(ProcessRecord::builder(SERVICE, 10_002, "service").shown_ui().build())
            .unwrap();
        graph.add_process(ProcessRecord::new(CLIENT, 10_001, "client")).unwrap();
        graph.device.top_app = Some(CLIENT);
        graph
            .add_binding(Binding::service(CLIENT, SERVICE, BindFlags::ALLOW_OOM_MANAGEMENT))
            .unwrap();
        run(&mut graph);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, UNKNOWN_ADJ);
        assert_eq!(service.proc_state, ProcState::CachedEmpty);
    }

    #[test]
    fn test_treat_like_activity_and_client_activity() {
        let mut graph = graph();
        graph.add_process(ProcessRecord::new(CLIENT, 10_001, "client")).unwrap();
        graph.add_process(ProcessRecord::new(3, 10_003, "other")).unwrap();
        graph
            .add_binding(Binding::service(CLIENT, SERVICE, BindFlags::TREAT_LIKE_ACTIVITY))
            .unwrap();
        graph.add_binding(Binding::client_activity(CLIENT, 3)).unwrap();
        run(&mut graph);

        assert_eq!(cur(&graph, SERVICE).proc_state, ProcState::CachedActivity);
        assert_eq!(graph.get(SERVICE).unwrap().working.adj_type, "cch-as-act");
        assert_eq!(cur(&graph, 3).proc_state, ProcState::CachedActivityClient);
    }

    #[test]
    fn test_provider_chain() {
        let mut graph = graph();
        graph.add_process(ProcessRecord::new(CLIENT, 10_001, "client")).unwrap();
        graph.add_process(ProcessRecord::new(3, 10_003, "db")).unwrap();
        graph.device.top_app = Some(CLIENT);
        graph.add_binding(Binding::provider(CLIENT, SERVICE)).unwrap();
        graph.add_binding(Binding::provider(SERVICE, 3)).unwrap();
        run(&mut graph);

        let first = cur(&graph, SERVICE);
        assert_eq!(first.adj, FOREGROUND_APP_ADJ);
        assert_eq!(first.proc_state, ProcState::BoundTop);
        assert_eq!(first.sched_group, SchedGroup::Default);

        let second = cur(&graph, 3);
        assert_eq!(second.adj, FOREGROUND_APP_ADJ);
        assert_eq!(second.proc_state, ProcState::BoundForegroundService);
        assert_eq!(graph.get(3).unwrap().working.adj_type, "provider");
    }

    #[test]
    fn test_cycle_converges() {
        let mut graph = ProcessGraph::new();
        for pid in 1..=3 {
            graph.add_process(ProcessRecord::new(pid, 10_000 + pid, "node")).unwrap();
        }
        graph.get_mut(3).unwrap().signals.foreground_service = Some(ForegroundServiceTypes::DATA_SYNC);
        graph.add_binding(Binding::service(1, 2, BindFlags::empty())).unwrap();
        graph.add_binding(Binding::service(2, 3, BindFlags::empty())).unwrap();
        graph.add_binding(Binding::service(3, 1, BindFlags::empty())).unwrap();

        let stats = run(&mut graph);
        for pid in 1..=3 {
            assert_eq!(cur(&graph, pid).adj, PERCEPTIBLE_APP_ADJ);
            assert_eq!(cur(&graph, pid).proc_state, ProcState::ForegroundService);
        }
        assert!(stats.relaxations < 16);
    }

    #[test]
    fn test_capability_cycle() {
        let mut graph = ProcessGraph::new();
        graph.add_process(ProcessRecord::new(1, 10_001, "a")).unwrap();
        graph.add_process(ProcessRecord::new(2, 10_002, "b")).unwrap();
        graph.get_mut(1).unwrap().signals.foreground_service = Some(ForegroundServiceTypes::LOCATION);
        graph.get_mut(2).unwrap().signals.foreground_service = Some(ForegroundServiceTypes::CAMERA);
        graph.add_binding(Binding::service(1, 2, BindFlags::INCLUDE_CAPABILITIES)).unwrap();
        graph.add_binding(Binding::service(2, 1, BindFlags::INCLUDE_CAPABILITIES)).unwrap();
        run(&mut graph);

        let expected = Capability::FOREGROUND_LOCATION | Capability::FOREGROUND_CAMERA | Capability::NETWORK;
        assert_eq!(cur(&graph, 1).capability, expected);
        assert_eq!(cur(&graph, 2).capability, expected);
    }

    #[test]
    fn test_finalize_clamp_and_above_client() {
        let mut graph = graph();
        graph
            .add_process(ProcessRecord::builder(CLIENT, 10_001, "client").activities(ActivityVisibility::Visible).build())
            .unwrap();
        graph.add_binding(Binding::service(CLIENT, SERVICE, BindFlags::ABOVE_CLIENT)).unwrap();
        graph.get_mut(SERVICE).unwrap().max_adj = PERCEPTIBLE_LOW_APP_ADJ;
        run(&mut graph);

        // The client asked to rank below its service.
        assert_eq!(cur(&graph, CLIENT).adj, PERCEPTIBLE_APP_ADJ);
        assert_eq!(graph.get(CLIENT).unwrap().working.raw.adj, VISIBLE_APP_ADJ);
        assert_eq!(cur(&graph, SERVICE).adj, VISIBLE_APP_ADJ);

        graph.remove_process(CLIENT).unwrap();
        run(&mut graph);
        let service = cur(&graph, SERVICE);
        assert_eq!(service.adj, PERCEPTIBLE_LOW_APP_ADJ);
        assert_eq!(service.proc_state, ProcState::CachedEmpty);
        assert_eq!(service.sched_group, SchedGroup::Default);
    }

    #[test]
    fn test_above_client_adj_bands() {
        assert_eq!(above_client_adj(-800), -800);
        assert_eq!(above_client_adj(0), 100);
        assert_eq!(above_client_adj(100), 200);
        assert_eq!(above_client_adj(200), 250);
        assert_eq!(above_client_adj(250), 900);
        assert_eq!(above_client_adj(905), 906);
        assert_eq!(above_client_adj(999), 999);
        assert_eq!(above_client_adj(UNKNOWN_ADJ), UNKNOWN_ADJ);
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut working = WorkingState::default();
        working.raw = Importance::new(200, ProcState::ForegroundService, SchedGroup::Default);

        let mut worse = Contribution::labelled("service");
        worse.adj = Some(500);
        worse.proc_state = Some(ProcState::Service);
        worse.sched_group = Some(SchedGroup::Background);
        assert!(!merge(&mut working, &worse, 9));
        assert_eq!(working.raw.adj, 200);

        let mut state_only = Contribution::labelled("provider");
        state_only.proc_state = Some(ProcState::BoundTop);
        assert!(merge(&mut working, &state_only, 9));
        assert_eq!(working.raw.adj, 200);
        assert_eq!(working.raw.proc_state, ProcState::BoundTop);
        assert_eq!(working.adj_type, "provider");
        assert!(!merge(&mut working, &state_only, 9));
    }
}
