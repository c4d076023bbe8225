// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Diagnostic documents, crash-dump attribution and the manual switch request.
// Author: Lukas Bower

use slotguard::reconcile::FailureClass;
use slotguard::sim::SimBench;
use slotguard::types::{ImageState, OtaRole};
use slotguard::{
    DoneReason, Event, GuardError, PlatformError, ResetCause, SharedCrashGuard, SlotId,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn info_reports_roles_and_build_metadata() {
    init_logging();
    let bench = SimBench::new();
    let mut guard = bench.boot();
    let info = guard.info();
    assert_eq!(info.boot, 1);
    assert_eq!(info.ota[0].role, OtaRole::Preferred);
    assert_eq!(info.ota[1].role, OtaRole::Fallback);
    assert!(info.core_dump.is_none());
    assert!(info.last.is_none());

    let doc = guard.handle_request("info").expect("info document");
    assert_eq!(doc["boot"], 1);
    assert_eq!(doc["lastSwitch"], 0);
    assert_eq!(doc["ota"][0]["label"], "ota_0");
    assert_eq!(doc["ota"][0]["role"], 0);
    assert_eq!(doc["ota"][0]["otaState"], 2);
    assert_eq!(doc["ota"][1]["app"]["proj"], "slotguard");
    assert_eq!(doc["ota"][1]["app"]["ver"], "1.1.0");
    assert_eq!(
        doc["ota"][1]["app"]["sha256"].as_str().map(str::len),
        Some(64)
    );
    assert!(doc.get("coredump").is_none());
}

#[test]
fn failed_image_and_its_fallback() {
    init_logging();
    let bench = SimBench::new();
    bench.device.set_image_state(SlotId::Ota0, Some(ImageState::Invalid));
    bench.device.set_running(Some(SlotId::Ota1));
    let guard = bench.boot();
    let info = guard.info();
    assert_eq!(info.ota[0].role, OtaRole::Failed);
    assert_eq!(info.ota[1].role, OtaRole::Fallback);
}

#[test]
fn newly_flashed_slot_is_preferred() {
    init_logging();
    let bench = SimBench::new();
    bench.device.flash(SlotId::Ota1, "2.0.0");
    let guard = bench.boot();
    let info = guard.info();
    assert_eq!(info.ota[0].role, OtaRole::Fallback);
    assert_eq!(info.ota[1].role, OtaRole::Preferred);
    assert_eq!(info.ota[1].ota_state, Some(ImageState::New));
}

#[test]
fn core_dump_is_attributed_to_crashing_slot() {
    init_logging();
    let bench = SimBench::new();
    drop(bench.run_for(3_000));
    bench.device.set_core_dump(Some("c0ffee"));
    bench.reset(ResetCause::Panic);

    let mut guard = bench.boot();
    assert_eq!(guard.plan().failure, FailureClass::Firmware);
    assert_eq!(guard.state().slot(SlotId::Ota0).last_crash_sig, "cd:c0ffee");
    assert_eq!(guard.ledger().signature(), "cd:c0ffee");
    guard.handle_event(Event::Init(0));

    let info = guard.info();
    let core_dump = info.core_dump.expect("core dump");
    assert_eq!(core_dump.uid, "c0ffee");
    assert_eq!(core_dump.slot, Some(SlotId::Ota0));
    assert_eq!(info.last.as_ref().map(|run| run.boot), Some(1));

    let doc = guard.handle_request("info").expect("info");
    assert_eq!(doc["coredump"]["slot"], 0);
    assert_eq!(doc["history"][0]["coredump"]["uid"], "c0ffee");
}

#[test]
fn unmatched_core_dump_has_unknown_slot() {
    init_logging();
    let bench = SimBench::new();
    bench.device.set_core_dump(Some("stale"));
    let mut guard = bench.boot();
    let doc = guard.handle_request("info").expect("info");
    assert_eq!(doc["coredump"]["uid"], "stale");
    assert_eq!(doc["coredump"]["slot"], -1);
}

#[test]
fn state_document_exposes_ledger() {
    init_logging();
    let bench = SimBench::new();
    bench.device.set_epoch(1_700_000_000);
    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));
    guard.handle_event(Event::Inited);
    bench.device.advance(42_000);
    guard.handle_event(Event::Periodic);

    let state = guard.live_state();
    assert_eq!(state.uptime, 42_000);
    assert_eq!(state.slot, Some(SlotId::Ota0));
    assert!(state.rtc.valid);
    assert!(state.rtc.in_progress);

    let doc = guard.handle_request("state").expect("state");
    assert_eq!(doc["slot"], 0);
    assert_eq!(doc["rtc"]["boot"], 1);
    assert_eq!(doc["rtc"]["cp"], 20);
    assert_eq!(doc["rtc"]["inProgress"], true);
    assert_eq!(doc["rtc"]["planned"], false);
    assert_eq!(doc["rtc"]["uptime"], 42_000);
    assert_eq!(doc["rtc"]["ts"], 1_700_000_000_i64);
    assert_eq!(doc["rtc"]["sig"], "rr:1:cp:20");
    assert_eq!(doc["ota"][0]["strike"], 0);
}

#[test]
fn unknown_request_is_rejected() {
    init_logging();
    let bench = SimBench::new();
    let mut guard = bench.boot();
    let err = guard.handle_request("reboot").expect_err("unknown");
    assert!(matches!(err, GuardError::UnknownRequest(name) if name == "reboot"));
}

#[test]
fn manual_switch_restarts_into_sibling() {
    init_logging();
    let bench = SimBench::new();
    let mut guard = bench.boot();
    guard.handle_event(Event::Init(0));

    let doc = guard.handle_request("switchOta").expect("switch");
    assert_eq!(doc["slot"], 1);
    assert_eq!(bench.device.selected_slot(), Some(SlotId::Ota1));
    assert_eq!(bench.device.restarts(), 1);
    let ledger = bench.region.ledger().expect("ledger");
    assert!(ledger.planned_reset);
    assert!(!ledger.in_progress);
    drop(guard);

    bench.reset(ResetCause::Software);
    let guard = bench.boot();
    assert_eq!(bench.device.running(), Some(SlotId::Ota1));
    assert_eq!(guard.plan().failure, FailureClass::NotCounted);
    assert_eq!(guard.state().last_switch_boot, 0);
    assert_eq!(guard.state().slot(SlotId::Ota0).crashes, 0);
}

#[test]
fn rejected_boot_selection_changes_nothing() {
    init_logging();
    let bench = SimBench::new();
    bench.device.fail_boot_selection(true);
    let mut guard = bench.boot();

    let err = guard.switch_slot().expect_err("selection rejected");
    assert!(matches!(
        err,
        GuardError::Platform(PlatformError::SetBootFailed { slot: SlotId::Ota1, .. })
    ));
    assert_eq!(bench.device.selected_slot(), Some(SlotId::Ota0));
    assert_eq!(bench.device.restarts(), 0);
    assert!(guard.ledger().in_progress);
    assert!(!guard.ledger().planned_reset);
}

#[test]
fn factory_image_cannot_switch() {
    init_logging();
    let bench = SimBench::new();
    bench.device.set_running(None);
    let mut guard = bench.boot();
    let err = guard.switch_slot().expect_err("no ota slot");
    assert!(matches!(err, GuardError::Platform(PlatformError::NotAnOtaSlot)));
}

#[test]
fn empty_sibling_cannot_be_selected() {
    init_logging();
    let bench = SimBench::new();
    bench.device.erase(SlotId::Ota1);
    let mut guard = bench.boot();
    let err = guard.switch_slot().expect_err("no sibling");
    assert!(matches!(
        err,
        GuardError::Platform(PlatformError::NoSibling(SlotId::Ota0))
    ));
}

#[test]
fn shared_handle_serves_requests() {
    init_logging();
    let bench = SimBench::new();
    let shared = SharedCrashGuard::new(bench.boot());
    shared.handle_event(Event::Init(0)).expect("event");
    let doc = shared.handle_request("state").expect("state");
    assert_eq!(doc["rtc"]["cp"], 10);
    assert_eq!(shared.switch_slot().expect("switch"), SlotId::Ota1);
    shared
        .handle_event(Event::Done(DoneReason::Shutdown))
        .expect("done");
    assert_eq!(shared.info().expect("info").boot, 1);
}
