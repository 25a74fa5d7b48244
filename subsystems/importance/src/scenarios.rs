//! End-to-end passes driven through [`ImportanceEngine`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::binding::{BindFlags, Binding};
use crate::commit::{ImportanceChange, ImportanceListener};
use crate::config::ImportanceConfig;
use crate::engine::ImportanceEngine;
use crate::graph::Wakefulness;
use crate::process::{ForegroundServiceTypes, Pid, ProcessRecord, ProcessSnapshot, ServiceName, ServiceRecord};
use crate::tier::{
    is_cached_adj, ProcState, SchedGroup, CACHED_APP_MAX_ADJ, FIRST_CACHED_EMPTY_ADJ, PERCEPTIBLE_APP_ADJ,
    PERCEPTIBLE_LOW_APP_ADJ, PERSISTENT_PROC_ADJ, SERVICE_ADJ, SERVICE_B_ADJ,
};
use crate::uid::{AppStartMode, FixedStartPolicy};

fn engine() -> ImportanceEngine {
    ImportanceEngine::new(ImportanceConfig::default()).unwrap()
}

fn snap(engine: &ImportanceEngine, pid: Pid) -> ProcessSnapshot {
    engine.snapshot(pid).unwrap()
}

fn service_host(pid: Pid, uid: u32, name: &str) -> ProcessRecord {
    ProcessRecord::builder(pid, uid, name)
        .started_service(ServiceRecord::started(ServiceName::new(name, "Worker"), 0))
        .build()
}

#[test]
fn persistent_top_ui_follows_wakefulness() {
    let engine = engine();
    engine
        .register_process(ProcessRecord::builder(1, 1_000, "systemui").max_adj(PERSISTENT_PROC_ADJ).top_ui().build())
        .unwrap();

    engine.update_all();
    let awake = snap(&engine, 1);
    assert_eq!(awake.adj, PERSISTENT_PROC_ADJ);
    assert_eq!(awake.proc_state, ProcState::PersistentUi);
    assert_eq!(awake.sched_group, SchedGroup::TopApp);

    engine.set_wakefulness(Wakefulness::Asleep);
    assert!(engine.update_pending_targets().unwrap().full);
    let asleep = snap(&engine, 1);
    assert_eq!(asleep.adj, PERSISTENT_PROC_ADJ);
    assert_eq!(asleep.proc_state, ProcState::BoundForegroundService);
    assert_eq!(asleep.sched_group, SchedGroup::Restricted);
}

#[test]
fn foreground_service_cycle_settles_and_demotes() {
    let engine = engine();
    engine.register_process(ProcessRecord::new(1, 10_001, "a")).unwrap();
    engine.register_process(ProcessRecord::new(2, 10_002, "b")).unwrap();
    engine
        .register_process(ProcessRecord::builder(3, 10_003, "c").foreground_service(ForegroundServiceTypes::empty()).build())
        .unwrap();
    engine.bind(Binding::service(1, 2, BindFlags::empty())).unwrap();
    engine.bind(Binding::service(2, 3, BindFlags::empty())).unwrap();
    engine.bind(Binding::service(3, 1, BindFlags::empty())).unwrap();

    engine.update_all();
    for pid in [1, 2, 3] {
        assert_eq!(snap(&engine, pid).adj, PERCEPTIBLE_APP_ADJ, "pid {}", pid);
    }
    assert_eq!(snap(&engine, 3).proc_state, ProcState::ForegroundService);

    engine.update_signals(3, |s| s.foreground_service = None).unwrap();
    let report = engine.update_process(3).unwrap();
    assert_eq!(report.members, 3);
    assert_eq!(report.changed, 3);
    for pid in [1, 2, 3] {
        let s = snap(&engine, pid);
        assert!(s.cached, "pid {}", pid);
        assert!(is_cached_adj(s.adj), "pid {}", pid);
        assert_eq!(s.proc_state, ProcState::CachedEmpty);
    }
}

#[test]
fn idle_delayed_uids_fall_into_distinct_slots() {
    let engine = engine();
    engine.register_process(service_host(1, 10_001, "older")).unwrap();
    engine.register_process(service_host(2, 10_002, "newer")).unwrap();

    engine.update_all();
    assert_eq!(snap(&engine, 1).adj_type, "started-services");

    engine.set_uid_idle(10_001, true);
    engine.set_uid_idle(10_002, true);
    engine.set_app_start_policy(Box::new(FixedStartPolicy::new().with_fallback(AppStartMode::Delayed)));

    let report = engine.update_pending_targets().unwrap();
    assert_eq!(report.rounds, 2);
    assert_eq!(report.suppressed, 2);

    let older = snap(&engine, 1);
    let newer = snap(&engine, 2);
    assert!(older.cached && newer.cached);
    assert_eq!(newer.adj, FIRST_CACHED_EMPTY_ADJ);
    assert_eq!(older.adj, FIRST_CACHED_EMPTY_ADJ + 10);

    // suppression is re-derived every pass
    engine.set_uid_idle(10_001, false);
    engine.update_pending_targets();
    assert_eq!(snap(&engine, 1).adj, SERVICE_ADJ);
    assert!(snap(&engine, 2).cached);
}

#[test]
fn waived_binding_lifts_only_to_service() {
    let engine = engine();
    engine.register_process(ProcessRecord::new(1, 10_001, "top")).unwrap();
    engine.register_process(ProcessRecord::new(2, 10_002, "helper")).unwrap();
    engine.set_top_app(Some(1)).unwrap();
    engine.bind(Binding::service(1, 2, BindFlags::WAIVE_PRIORITY)).unwrap();

    engine.update_all();
    let helper = snap(&engine, 2);
    assert_eq!(helper.proc_state, ProcState::Service);
    assert_eq!(helper.adj, FIRST_CACHED_EMPTY_ADJ);
    assert_eq!(helper.sched_group, SchedGroup::Background);
    assert_eq!(helper.adj_source, Some(1));
    assert_eq!(snap(&engine, 1).adj_source, None);
}

#[test]
fn targeted_passes_keep_cached_slots_distinct() {
    let engine = engine();
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = delivered.clone();
    engine.subscribe(ImportanceListener::new(
        "counter",
        Box::new(move |_: &ImportanceChange| {
            counter.fetch_add(1, Ordering::Relaxed);
        }),
    ));
    for pid in 1..=3 {
        engine.register_process(ProcessRecord::new(pid, 10_000 + pid, "empty")).unwrap();
    }

    engine.update_all();
    let slots = |engine: &ImportanceEngine| [1, 2, 3].map(|pid| snap(engine, pid).adj);
    assert_eq!(slots(&engine), [925, 915, FIRST_CACHED_EMPTY_ADJ]);
    assert_eq!(delivered.load(Ordering::Relaxed), 3);

    // nothing moved: no slot changes hands and nobody is told
    assert_eq!(engine.update_process(1).unwrap().changed, 0);
    assert_eq!(slots(&engine), [925, 915, FIRST_CACHED_EMPTY_ADJ]);
    assert_eq!(delivered.load(Ordering::Relaxed), 3);

    // the newest leaves the band; the others move up and are reported
    engine.set_top_app(Some(3)).unwrap();
    let report = engine.update_pending_targets().unwrap();
    assert!(!report.full);
    assert_eq!(report.members, 1);
    assert_eq!(report.changed, 3);
    assert_eq!(snap(&engine, 2).adj, FIRST_CACHED_EMPTY_ADJ);
    assert_eq!(snap(&engine, 1).adj, 915);

    engine.set_top_app(None).unwrap();
    engine.update_pending_targets().unwrap();
    assert_eq!(slots(&engine), [925, 915, FIRST_CACHED_EMPTY_ADJ]);
    assert_eq!(engine.update_all().changed, 0);
}

#[test]
fn unchanged_pass_is_silent() {
    let engine = engine();
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = delivered.clone();
    engine.subscribe(ImportanceListener::new(
        "counter",
        Box::new(move |_: &ImportanceChange| {
            counter.fetch_add(1, Ordering::Relaxed);
        }),
    ));

    engine.register_process(ProcessRecord::new(1, 10_001, "a")).unwrap();
    engine.register_process(service_host(2, 10_002, "b")).unwrap();
    engine.bind(Binding::service(2, 1, BindFlags::IMPORTANT)).unwrap();

    assert_eq!(engine.update_all().changed, 2);
    assert_eq!(delivered.load(Ordering::Relaxed), 2);

    assert_eq!(engine.update_all().changed, 0);
    assert_eq!(engine.update_process(1).unwrap().changed, 0);
    assert_eq!(delivered.load(Ordering::Relaxed), 2);
}

#[test]
fn service_b_uses_previous_full_pass_count() {
    let engine = engine();
    for pid in 1..=3 {
        engine.register_process(service_host(pid, 10_000 + pid, "svc")).unwrap();
    }

    // no history: only the most recent stays on the A list
    engine.update_all();
    assert_eq!(snap(&engine, 3).adj, SERVICE_ADJ);
    assert_eq!(snap(&engine, 2).adj, SERVICE_B_ADJ);
    assert_eq!(snap(&engine, 1).adj, SERVICE_B_ADJ);

    engine.update_all();
    assert_eq!(snap(&engine, 3).adj, SERVICE_ADJ);
    assert_eq!(snap(&engine, 2).adj, SERVICE_ADJ);
    let oldest = snap(&engine, 1);
    assert_eq!(oldest.adj, SERVICE_B_ADJ);
    assert!(oldest.service_b);
    assert_eq!(oldest.proc_state, ProcState::Service);

    // a targeted pass keeps the ranking
    engine.update_process(1).unwrap();
    assert_eq!(snap(&engine, 1).adj, SERVICE_B_ADJ);
}

#[test]
fn keep_warm_pin_follows_current_user() {
    let config = ImportanceConfig {
        max_service_inactivity_ms: 0,
        ..Default::default()
    }
    .with_keep_warm(vec![ServiceName::new("warm", "Worker")]);
    let engine = ImportanceEngine::new(config).unwrap();

    engine.register_process(service_host(1, 10_001, "warm")).unwrap();
    engine.register_process(ProcessRecord::new(2, 10_002, "recent")).unwrap();

    engine.update_all();
    assert_eq!(snap(&engine, 1).adj, FIRST_CACHED_EMPTY_ADJ);
    assert!(snap(&engine, 2).adj > FIRST_CACHED_EMPTY_ADJ);

    engine.set_current_user(10);
    assert_eq!(engine.pending_targets(), vec![1]);
    engine.update_all();
    assert_eq!(snap(&engine, 2).adj, FIRST_CACHED_EMPTY_ADJ);
    assert!(snap(&engine, 1).adj > FIRST_CACHED_EMPTY_ADJ);

    engine.set_current_user(0);
    engine.update_all();
    assert_eq!(snap(&engine, 1).adj, FIRST_CACHED_EMPTY_ADJ);
}

#[test]
fn max_adj_clamps_and_sets_default_group() {
    let engine = engine();
    engine
        .register_process(ProcessRecord::builder(1, 10_001, "clamped").max_adj(PERCEPTIBLE_LOW_APP_ADJ).build())
        .unwrap();

    engine.update_all();
    let s = snap(&engine, 1);
    assert_eq!(s.proc_state, ProcState::CachedEmpty);
    assert_eq!(s.adj, PERCEPTIBLE_LOW_APP_ADJ);
    assert_eq!(s.sched_group, SchedGroup::Default);
}

#[test]
fn perceptible_cycle_hangs_off_forced_branch() {
    let engine = engine();
    engine
        .register_process(ProcessRecord::builder(1, 10_001, "toast").with_signals(|s| s.forcing_to_important = true).build())
        .unwrap();
    engine.register_process(ProcessRecord::new(2, 10_002, "b")).unwrap();
    engine.register_process(ProcessRecord::new(3, 10_003, "c")).unwrap();
    engine.bind(Binding::service(1, 2, BindFlags::empty())).unwrap();
    engine.bind(Binding::service(2, 3, BindFlags::empty())).unwrap();
    engine.bind(Binding::service(3, 2, BindFlags::empty())).unwrap();

    engine.update_all();
    assert_eq!(snap(&engine, 1).adj_type, "force-imp");
    for pid in [1, 2, 3] {
        assert_eq!(snap(&engine, pid).adj, PERCEPTIBLE_APP_ADJ, "pid {}", pid);
    }

    engine.update_signals(1, |s| s.forcing_to_important = false).unwrap();
    let report = engine.update_pending_targets().unwrap();
    assert_eq!(report.members, 3);
    for pid in [1, 2, 3] {
        assert!(snap(&engine, pid).cached, "pid {}", pid);
    }
}

#[test]
fn detached_process_ignores_bindings() {
    let engine = engine();
    engine.register_process(ProcessRecord::new(1, 10_001, "top")).unwrap();
    engine
        .register_process(ProcessRecord::builder(2, 10_002, "dying").with_signals(|s| s.attached = false).build())
        .unwrap();
    engine.set_top_app(Some(1)).unwrap();
    engine.bind(Binding::service(1, 2, BindFlags::IMPORTANT)).unwrap();

    engine.update_all();
    let s = snap(&engine, 2);
    assert_eq!(s.adj, CACHED_APP_MAX_ADJ);
    assert_eq!(s.proc_state, ProcState::CachedEmpty);
    assert_eq!(s.sched_group, SchedGroup::Background);
    assert_eq!(s.adj_type, "detached");
}

#[test]
fn bounds_hold_after_every_pass() {
    let engine = engine();
    engine
        .register_process(ProcessRecord::builder(1, 1_000, "system").max_adj(PERSISTENT_PROC_ADJ).build())
        .unwrap();
    engine
        .register_process(ProcessRecord::builder(2, 10_002, "capped").max_adj(PERCEPTIBLE_LOW_APP_ADJ).build())
        .unwrap();
    engine.register_process(service_host(3, 10_003, "svc")).unwrap();
    engine.register_process(ProcessRecord::new(4, 10_004, "empty")).unwrap();
    engine.bind(Binding::service(1, 3, BindFlags::ABOVE_CLIENT)).unwrap();
    engine.bind(Binding::service(3, 2, BindFlags::empty())).unwrap();
    engine.bind(Binding::service(4, 4, BindFlags::empty())).unwrap();

    engine.update_all();
    engine.set_wakefulness(Wakefulness::Asleep);
    engine.update_pending_targets();

    for s in engine.snapshots() {
        assert!(s.adj >= PERSISTENT_PROC_ADJ, "pid {}", s.pid);
        assert!(s.adj <= CACHED_APP_MAX_ADJ, "pid {}", s.pid);
    }
    assert!(snap(&engine, 2).adj <= PERCEPTIBLE_LOW_APP_ADJ);
}
