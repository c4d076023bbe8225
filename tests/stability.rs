// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Stability forgiveness, snapshot history and storage fault tolerance.
// Author: Lukas Bower

use slotguard::durable::{DurableCounters, DurableStore};
use slotguard::record::SlotHealth;
use slotguard::sim::SimBench;
use slotguard::{BootOutcome, Checkpoint, DoneReason, Event, GuardConfig, ResetCause, SlotId};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unhealthy_slot1(bench: &SimBench) {
    let mut slots = [SlotHealth::default(), SlotHealth::default()];
    slots[1].strike = 8;
    slots[1].consecutive_early = 2;
    let counters = DurableCounters {
        boot_count: 7,
        last_switch_boot: 3,
        slots,
    };
    bench.kv.put_raw("crashguard", "state", &counters.to_bytes());
    bench.device.set_running(Some(SlotId::Ota1));
}

#[test]
fn sustained_uptime_forgives_strikes() {
    init_logging();
    let bench = SimBench::new();
    unhealthy_slot1(&bench);

    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));
    bench.device.advance(11 * 60_000);
    guard.handle_event(Event::Periodic);

    let slot = guard.state().slot(SlotId::Ota1);
    assert_eq!(slot.strike, 3);
    assert_eq!(slot.consecutive_early, 0);
    assert_eq!(slot.last_good_uptime_ms, 11 * 60_000);
    assert_eq!(guard.ledger().checkpoint, Checkpoint::Stable);

    let stored = DurableStore::new(Box::new(bench.kv.clone()), "crashguard", "state")
        .read()
        .expect("durable record");
    assert_eq!(stored.slots[1].strike, 3);
    assert_eq!(stored.boot_count, 8);
}

#[test]
fn forgiveness_applies_once_per_boot() {
    init_logging();
    let bench = SimBench::new();
    unhealthy_slot1(&bench);

    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));
    for _ in 0..5 {
        bench.device.advance(10 * 60_000);
        guard.handle_event(Event::Periodic);
    }
    assert_eq!(guard.state().slot(SlotId::Ota1).strike, 3);
}

#[test]
fn forgiveness_never_goes_negative() {
    init_logging();
    let bench = SimBench::new();
    let mut guard = bench.boot();
    bench.device.advance(10 * 60_000);
    guard.handle_event(Event::Periodic);
    assert_eq!(guard.state().slot(SlotId::Ota0).strike, 0);
    assert_eq!(guard.ledger().checkpoint, Checkpoint::Stable);
}

#[test]
fn short_runs_are_not_stable() {
    init_logging();
    let bench = SimBench::new();
    unhealthy_slot1(&bench);
    let mut guard = bench.boot();
    bench.device.advance(9 * 60_000);
    guard.handle_event(Event::Periodic);
    assert_eq!(guard.state().slot(SlotId::Ota1).strike, 8);
    assert_eq!(guard.ledger().checkpoint, Checkpoint::Boot);
    assert_eq!(guard.ledger().last_uptime_ms, 9 * 60_000);
}

#[test]
fn factory_image_is_never_marked_stable() {
    init_logging();
    let bench = SimBench::new();
    bench.device.set_running(None);
    let mut guard = bench.boot();
    bench.device.advance(20 * 60_000);
    guard.handle_event(Event::Periodic);
    assert_ne!(guard.ledger().checkpoint, Checkpoint::Stable);
}

#[test]
fn history_is_bounded_and_newest_first() {
    init_logging();
    let bench = SimBench::new();
    let config = GuardConfig {
        history_len: 4,
        ..GuardConfig::default()
    };
    for _ in 0..6 {
        let mut guard = bench.boot_with(config.clone());
        guard.handle_event(Event::Init(0));
        guard.handle_event(Event::Done(DoneReason::Restart));
        bench.reset(ResetCause::Software);
    }

    let mut guard = bench.boot_with(config);
    guard.handle_event(Event::Init(0));
    let boots: Vec<u32> = guard.state().history.iter().map(|run| run.boot).collect();
    assert_eq!(boots, vec![6, 5, 4, 3]);
    assert_eq!(guard.state().last.as_ref().map(|run| run.boot), Some(6));
}

#[test]
fn snapshot_counters_are_not_authoritative() {
    init_logging();
    let bench = SimBench::new();
    bench.snapshot.set_document(
        r#"{"version":1,"boot":99,"lastSwitch":98,
            "ota":[{"strike":50,"crashes":40},{}],
            "history":[{"boot":98,"rr":4,"slot":0}]}"#,
    );

    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));
    assert_eq!(guard.state().boot_count, 1);
    assert_eq!(guard.state().last_switch_boot, 0);
    assert_eq!(guard.state().slot(SlotId::Ota0).strike, 0);
    assert_eq!(guard.state().history.len(), 1);
    assert_eq!(guard.state().history[0].boot, 98);
}

#[test]
fn unknown_checkpoint_in_snapshot_keeps_history() {
    init_logging();
    let bench = SimBench::new();
    bench
        .snapshot
        .set_document(r#"{"history":[{"boot":5,"cp":35},{"boot":4,"cp":20}]}"#);

    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));
    let history = &guard.state().history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].checkpoint, Checkpoint::OtaReady);
    assert_eq!(history[1].checkpoint, Checkpoint::Inited);
}

#[test]
fn malformed_snapshot_is_replaced() {
    init_logging();
    let bench = SimBench::new();
    bench.snapshot.set_document("{ not json");
    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));
    let saved: serde_json::Value =
        serde_json::from_str(&bench.snapshot.document().expect("document")).expect("json");
    assert_eq!(saved["boot"], 1);
}

#[test]
fn durable_write_failure_does_not_stop_the_boot() {
    init_logging();
    let bench = SimBench::new();
    bench.kv.set_fail_writes(true);

    let mut guard = bench.boot();
    assert_eq!(guard.outcome(), BootOutcome::Continue);
    assert_eq!(guard.state().boot_count, 1);
    assert!(bench.kv.blob("crashguard", "state").is_none());
    assert_eq!(bench.region.ledger().map(|ledger| ledger.boot), Some(1));

    guard.handle_event(Event::Init(0));
    bench.device.advance(11 * 60_000);
    guard.handle_event(Event::Periodic);
    assert_eq!(guard.ledger().checkpoint, Checkpoint::Stable);
}

#[test]
fn corrupt_durable_record_starts_from_zero() {
    init_logging();
    let bench = SimBench::new();
    bench.kv.put_raw("crashguard", "state", &[0xAB; 17]);
    let guard = bench.boot();
    assert_eq!(guard.state().boot_count, 1);
}
