//! # UID-Idle Gate
//!
//! A started service normally keeps its process out of the cached band. For
//! an idle uid whose start mode restricts background work, that service is
//! suppressed so the process falls back into a cached slot. Processes that
//! are bound by someone else or host activities are left alone.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::graph::ProcessGraph;
use crate::process::Pid;
use crate::uid::AppStartPolicy;

/// Suppress the started services of every member that qualifies.
///
/// Returns the pids newly suppressed; an empty result means the gate is
/// stable.
pub fn gate(graph: &mut ProcessGraph, members: &BTreeSet<Pid>, policy: &dyn AppStartPolicy) -> Vec<Pid> {
    let demoted: Vec<Pid> = members
        .iter()
        .copied()
        .filter(|&pid| {
            let process = match graph.get(pid) {
                Some(process) => process,
                None => return false,
            };
            process.has_started_services()
                && !process.working.services_suppressed
                && graph.uids.is_idle(process.uid)
                && policy.app_start_mode(process.uid).restricts_background()
                && !graph.has_inbound_from_others(pid)
                && !process.signals.window().has_activities()
        })
        .collect();

    for &pid in &demoted {
        if let Some(process) = graph.get_mut(pid) {
            process.working.services_suppressed = true;
            log::debug!("idle uid {}: started services of pid {} no longer count", process.uid, pid);
        }
    }
    demoted
}

/// Lift every suppression, ahead of a new pass
pub fn clear(graph: &mut ProcessGraph, members: &BTreeSet<Pid>) {
    for &pid in members {
        if let Some(process) = graph.get_mut(pid) {
            process.working.services_suppressed = false;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
