//! # Cached-Slot Assigner
//!
//! Places every process that finished a pass without an adj into the
//! cached band, ordered by recency. Two interleaved bands share the range:
//!
//! ```text
//!   900 ─ 905 ─ 910 ─ 915 ─ 920 ─ ... ─ 990 ─ 995 ─ 999
//!    A     E     A     E     A           A     E
//!
//!   A = activity band (cached activity, activity client, recent tasks)
//!   E = empty band (everything else)
//! ```
//!
//! Each band walks the LRU list from most to least recent, handing out the
//! current slot and moving one step (`2 * CACHED_APP_IMPORTANCE_LEVELS`)
//! worse every `factor` processes. Keep-warm processes take the first slot
//! of their band and the walk starts one step further.
//!
//! A targeted pass still walks the whole list. Processes outside the pass
//! that already hold a slot count towards the bands, so members land
//! between them instead of on top of them.
//!
//! Service-B ranking lives here too: among processes sitting at
//! `SERVICE_ADJ` after propagation, the least recent ones past a third of
//! the previous count are moved to `SERVICE_B_ADJ`.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::config::ImportanceConfig;
use crate::graph::ProcessGraph;
use crate::process::Pid;
use crate::propagate::above_client_adj;
use crate::tier::{
    Adj, CACHED_APP_IMPORTANCE_LEVELS, CACHED_APP_MAX_ADJ, CACHED_APP_MIN_ADJ, FIRST_CACHED_EMPTY_ADJ, SERVICE_ADJ,
    SERVICE_B_ADJ, UNKNOWN_ADJ,
};

/// Distance between consecutive slots of one band
const SLOT_STEP: Adj = CACHED_APP_IMPORTANCE_LEVELS * 2;

static_assertions::const_assert!(CACHED_APP_MIN_ADJ + SLOT_STEP <= CACHED_APP_MAX_ADJ);

// =============================================================================
// SERVICE B
// =============================================================================

/// Rank service processes into the A and B lists.
///
/// `previous` is the service process count of the last full pass. Returns
/// the new count.
pub fn rank_service_b(graph: &mut ProcessGraph, members: &BTreeSet<Pid>, divisor: u32, previous: u32) -> u32 {
    let threshold = previous / divisor.max(1);
    let order: Vec<Pid> = graph
        .lru_most_recent_first()
        .filter(|pid| members.contains(pid))
        .collect();

    let mut total = 0u32;
    let mut a_list = 0u32;
    for pid in order {
        let process = match graph.get_mut(pid) {
            Some(process) => process,
            None => continue,
        };
        if process.working.raw.adj != SERVICE_ADJ {
            continue;
        }
        process.service_b = a_list > threshold;
        total += 1;
        if !process.service_b {
            a_list += 1;
        }
    }

    log::debug!("service ranking: {} processes, {} on the A list", total, a_list);
    total
}

/// Move B-list service processes to `SERVICE_B_ADJ`
pub fn apply_service_b(graph: &mut ProcessGraph, members: &BTreeSet<Pid>) {
    for &pid in members {
        if let Some(process) = graph.get_mut(pid) {
            if process.service_b && process.working.raw.adj == SERVICE_ADJ {
                process.working.raw.adj = SERVICE_B_ADJ;
            }
        }
    }
}

// =============================================================================
// KEEP WARM
// =============================================================================

/// Recompute keep-warm marks for the current user.
///
/// Returns the pids whose pin changed.
pub fn refresh_keep_warm(graph: &mut ProcessGraph, config: &ImportanceConfig) -> Vec<Pid> {
    let current_user = graph.device.current_user;
    let mut changed = Vec::new();

    for process in graph.processes_mut() {
        let same_user = process.user() == current_user;
        let before = process.is_keep_warm();
        for service in process.services.iter_mut() {
            service.keep_warming = same_user && config.keep_warm_services.contains(&service.name);
        }
        if process.is_keep_warm() != before {
            changed.push(process.pid);
        }
    }

    if !changed.is_empty() {
        log::debug!("keep-warm pins changed for {} processes (user {})", changed.len(), current_user);
    }
    changed
}

// =============================================================================
// SLOTS
// =============================================================================

/// Walk state of one band
#[derive(Debug, Clone, Copy)]
struct SlotCursor {
    cur: Adj,
    next: Adj,
    step: u32,
    factor: u32,
}

impl SlotCursor {
    fn new(first: Adj, factor: u32) -> Self {
        Self {
            cur: first,
            next: (first + SLOT_STEP).min(CACHED_APP_MAX_ADJ),
            step: 0,
            factor: factor.max(1),
        }
    }

    fn first(&self) -> Adj {
        self.cur
    }

    fn advance(&mut self) {
        self.cur = self.next;
        self.next = (self.next + SLOT_STEP).min(CACHED_APP_MAX_ADJ);
    }

    fn take(&mut self) -> Adj {
        let slot = self.cur;
        if self.cur != self.next {
            self.step += 1;
            if self.step >= self.factor {
                self.step = 0;
                self.advance();
            }
        }
        slot
    }
}

/// Processes per slot for a band holding `count` processes
fn slot_factor(count: u32, slots: u32) -> u32 {
    let slots = slots.max(1);
    ((count + slots - 1) / slots).max(1)
}

/// Result of one slot walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Processes placed in the activity band
    pub activity: u32,
    /// Processes placed in the empty band
    pub empty: u32,
    /// Processes pinned by keep-warm
    pub keep_warm: u32,
}

/// Slot walk outcome
#[derive(Debug, Clone, Default)]
pub struct SlotWalk {
    /// Placement counts
    pub stats: SlotStats,
    /// Processes outside the pass whose slot moved
    pub displaced: Vec<Pid>,
}

struct Candidate {
    pid: Pid,
    member: bool,
    activity_band: bool,
    keep_warm: bool,
}

/// Hand out cached slots to every member left without an adj.
///
/// The walk covers the whole LRU list: processes outside `members` that
/// already hold a slot keep their rank in it, so a targeted pass never
/// stacks a member onto a slot it did not earn. Outsiders whose slot shifts
/// are returned in `displaced` and must be committed with the members.
pub fn assign_slots(graph: &mut ProcessGraph, members: &BTreeSet<Pid>, config: &ImportanceConfig) -> SlotWalk {
    let candidates: Vec<Candidate> = graph
        .lru_most_recent_first()
        .filter_map(|pid| graph.get(pid))
        .filter_map(|p| {
            let member = members.contains(&p.pid);
            let eligible = if member { p.working.cur.adj >= UNKNOWN_ADJ } else { p.working.slotted };
            eligible.then(|| Candidate {
                pid: p.pid,
                member,
                activity_band: p.working.cur.proc_state.is_cached_activity_band(),
                keep_warm: p.is_keep_warm(),
            })
        })
        .collect();

    let mut walk = SlotWalk::default();
    if candidates.is_empty() {
        return walk;
    }

    let slots = config.cached_slots();
    let num_activity = candidates.iter().filter(|c| c.activity_band).count() as u32;
    let empty_limit = config.max_cached_processes.saturating_sub(config.max_empty_processes);
    let num_empty = (candidates.len() as u32 - num_activity).min(empty_limit);

    let mut activity = SlotCursor::new(CACHED_APP_MIN_ADJ, slot_factor(num_activity, slots));
    let mut empty = SlotCursor::new(FIRST_CACHED_EMPTY_ADJ, slot_factor(num_empty, slots));

    let (pinned, walked): (Vec<&Candidate>, Vec<&Candidate>) = candidates.iter().partition(|c| c.keep_warm);

    let mut placements: Vec<(&Candidate, Adj)> = Vec::with_capacity(candidates.len());
    for candidate in &pinned {
        let cursor = if candidate.activity_band { &activity } else { &empty };
        placements.push((*candidate, cursor.first()));
    }
    if pinned.iter().any(|c| c.activity_band) {
        activity.advance();
    }
    if pinned.iter().any(|c| !c.activity_band) {
        empty.advance();
    }

    for candidate in walked {
        let slot = if candidate.activity_band { activity.take() } else { empty.take() };
        placements.push((candidate, slot));
    }

    for (candidate, slot) in placements {
        let above_client = graph.has_above_client(candidate.pid);
        let process = match graph.get_mut(candidate.pid) {
            Some(process) => process,
            None => continue,
        };
        let adj = if above_client { above_client_adj(slot) } else { slot };

        if candidate.member {
            if candidate.keep_warm {
                walk.stats.keep_warm += 1;
            } else if candidate.activity_band {
                walk.stats.activity += 1;
            } else {
                walk.stats.empty += 1;
            }
        } else if process.working.raw.adj == slot && process.working.cur.adj == adj {
            continue;
        } else {
            walk.displaced.push(candidate.pid);
        }

        process.working.raw.adj = slot;
        process.working.cur.adj = adj;
        process.working.cached = true;
        process.working.slotted = true;
    }

    if !walk.displaced.is_empty() {
        log::debug!("slot walk shifted {} processes outside the pass", walk.displaced.len());
    }
    walk
}

// =============================================================================
// TESTS
// =============================================================================
