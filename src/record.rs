// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Finalized run, per-slot health and aggregate guardian state records.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::ledger::truncate_signature;
use crate::types::{slot_code, Checkpoint, ResetCause, SlotId};

/// Schema version shared by the durable record and the JSON snapshot.
pub const STATE_VERSION: u32 = 1;

/// Signature written into the ledger when the guardian switches slots itself.
pub const SWITCH_SIGNATURE: &str = "switch";

/// Build the crash signature used to cluster identical failures.
///
/// A crash-dump identifier wins over reset cause and checkpoint. The result
/// is cut to the stored signature width so it compares equal to the copies
/// kept in retained memory and the durable record.
#[must_use]
pub fn crash_signature(cause: ResetCause, checkpoint: Checkpoint, core_dump: Option<&str>) -> String {
    let mut sig = match core_dump.filter(|uid| !uid.is_empty()) {
        Some(uid) => format!("cd:{uid}"),
        None => format!("rr:{}:cp:{}", cause.code(), checkpoint.code()),
    };
    let len = truncate_signature(&sig).len();
    sig.truncate(len);
    sig
}

/// Lenient JSON decoding for checkpoints written by other builds.
mod checkpoint_code {
    use serde::{Deserialize, Deserializer};

    use crate::types::Checkpoint;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Checkpoint, D::Error> {
        let raw = serde_json::Value::deserialize(de)?;
        Ok(raw.as_u64().map_or(Checkpoint::Boot, Checkpoint::at_most))
    }
}

/// Crash dump attached to a finalized run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreDumpRef {
    /// Stable identifier reported by the crash-dump service.
    pub uid: String,
}

/// One boot's run, finalized on the following boot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Run {
    /// Boot number the run belonged to.
    pub boot: u32,
    /// Reset cause observed by the boot that finalized the run.
    #[serde(rename = "rr")]
    pub reset_cause: ResetCause,
    /// Last recorded uptime.
    #[serde(rename = "uptime")]
    pub uptime_ms: u32,
    /// Earliest known wall-clock timestamp, 0 when unknown.
    pub ts: i64,
    /// Furthest checkpoint reached.
    #[serde(rename = "cp", deserialize_with = "checkpoint_code::deserialize")]
    pub checkpoint: Checkpoint,
    /// The run never reached a graceful shutdown.
    #[serde(rename = "unexpected")]
    pub unexpected_reset: bool,
    /// The firmware pre-flagged the reset. Overrides crash attribution.
    #[serde(rename = "planned")]
    pub planned_reset: bool,
    /// Slot the run executed from.
    #[serde(with = "slot_code")]
    pub slot: Option<SlotId>,
    /// Crash signature.
    #[serde(rename = "sig")]
    pub crash_sig: String,
    /// Crash dump found on the finalizing boot, if any.
    #[serde(rename = "coredump", skip_serializing_if = "Option::is_none")]
    pub core_dump: Option<CoreDumpRef>,
}

impl Run {
    /// Whether this run counts against its slot.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.planned_reset && self.unexpected_reset
    }

    /// Crash-dump identifier, if one was attached.
    #[must_use]
    pub fn core_dump_uid(&self) -> Option<&str> {
        self.core_dump.as_ref().map(|cd| cd.uid.as_str())
    }
}

/// Health counters for one OTA image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotHealth {
    /// Heuristic penalty; raised by firmware crashes, lowered by stable runs.
    pub strike: i32,
    /// Firmware-like failures.
    pub crashes: u32,
    /// Power-like failures.
    pub brownouts: u32,
    /// Crashes in a row that happened before the early-crash window closed.
    #[serde(rename = "early")]
    pub consecutive_early: u32,
    /// Uptime of the last run declared stable.
    #[serde(rename = "good")]
    pub last_good_uptime_ms: u32,
    /// Signature of the most recent firmware-like failure.
    #[serde(rename = "sig")]
    pub last_crash_sig: String,
}

/// Aggregate guardian state mirrored in memory, the durable store and the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardState {
    /// Schema version.
    pub version: u32,
    /// Boot counter. Authoritative only from the durable store.
    #[serde(rename = "boot")]
    pub boot_count: u32,
    /// Boot number of the last automatic switch. Authoritative only from the durable store.
    #[serde(rename = "lastSwitch")]
    pub last_switch_boot: u32,
    /// Most recent finalized run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Run>,
    /// Finalized runs, newest first.
    pub history: Vec<Run>,
    /// Per-slot health, indexed by [`SlotId::index`].
    #[serde(rename = "ota")]
    pub slots: [SlotHealth; 2],
}

impl Default for GuardState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            boot_count: 0,
            last_switch_boot: 0,
            last: None,
            history: Vec::new(),
            slots: Default::default(),
        }
    }
}

impl GuardState {
    /// Health record of `slot`.
    #[must_use]
    pub fn slot(&self, slot: SlotId) -> &SlotHealth {
        &self.slots[slot.index()]
    }

    /// Mutable health record of `slot`.
    pub fn slot_mut(&mut self, slot: SlotId) -> &mut SlotHealth {
        &mut self.slots[slot.index()]
    }

    /// Prepend a finalized run to history, keep at most `capacity`, and make it `last`.
    pub fn record_run(&mut self, run: Run, capacity: usize) {
        self.history.insert(0, run.clone());
        self.history.truncate(capacity);
        self.last = Some(run);
    }

    /// Take display-only data from a loaded snapshot.
    ///
    /// Counters stay untouched: they belong to the durable store.
    pub fn merge_snapshot(&mut self, snapshot: GuardState, capacity: usize) {
        if snapshot.last.is_some() {
            self.last = snapshot.last;
        }
        if !snapshot.history.is_empty() {
            self.history = snapshot.history;
            self.history.truncate(capacity);
        }
    }

    /// Find the slot a crash dump belongs to by matching its identifier.
    #[must_use]
    pub fn core_dump_slot(&self, uid: &str) -> Option<SlotId> {
        if let Some(last) = &self.last {
            if last.boot != 0 && last.core_dump_uid() == Some(uid) {
                if let Some(slot) = last.slot {
                    return Some(slot);
                }
            }
        }
        self.history
            .iter()
            .find(|run| run.core_dump_uid() == Some(uid))
            .and_then(|run| run.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run(boot: u32) -> Run {
        Run {
            boot,
            reset_cause: ResetCause::TaskWatchdog,
            uptime_ms: 4_200,
            ts: 1_700_000_123,
            checkpoint: Checkpoint::Inited,
            unexpected_reset: true,
            planned_reset: false,
            slot: Some(SlotId::Ota1),
            crash_sig: "rr:6:cp:20".to_owned(),
            core_dump: Some(CoreDumpRef {
                uid: "5a17".to_owned(),
            }),
        }
    }

    #[test]
    fn signature_prefers_core_dump() {
        assert_eq!(
            crash_signature(ResetCause::Panic, Checkpoint::Init0, Some("abc")),
            "cd:abc"
        );
        assert_eq!(
            crash_signature(ResetCause::Panic, Checkpoint::Init0, Some("")),
            "rr:4:cp:10"
        );
        assert_eq!(
            crash_signature(ResetCause::Brownout, Checkpoint::Done, None),
            "rr:9:cp:250"
        );
    }

    #[test]
    fn long_core_dump_signature_fits_the_stored_width() {
        let uid = "a".repeat(64);
        let sig = crash_signature(ResetCause::Panic, Checkpoint::Inited, Some(&uid));
        assert_eq!(sig.len(), 63);
        assert!(sig.starts_with("cd:aaa"));
        assert_eq!(truncate_signature(&sig), sig);
    }

    #[test]
    fn unknown_checkpoint_codes_decode_leniently() {
        let run: Run = serde_json::from_str(r#"{"boot":5,"cp":35}"#).expect("decode");
        assert_eq!(run.checkpoint, Checkpoint::OtaReady);
        let run: Run = serde_json::from_str(r#"{"boot":5,"cp":"late"}"#).expect("decode");
        assert_eq!(run.checkpoint, Checkpoint::Boot);
        let run: Run = serde_json::from_str(r#"{"boot":5,"cp":999}"#).expect("decode");
        assert_eq!(run.checkpoint, Checkpoint::Done);
    }

    #[test]
    fn run_json_uses_short_field_names() {
        let json = serde_json::to_value(sample_run(7)).expect("encode");
        assert_eq!(json["boot"], 7);
        assert_eq!(json["rr"], 6);
        assert_eq!(json["cp"], 20);
        assert_eq!(json["slot"], 1);
        assert_eq!(json["coredump"]["uid"], "5a17");
        let back: Run = serde_json::from_value(json).expect("decode");
        assert_eq!(back, sample_run(7));
    }

    #[test]
    fn unknown_slot_is_minus_one() {
        let run = Run::default();
        let json = serde_json::to_value(&run).expect("encode");
        assert_eq!(json["slot"], -1);
        assert!(json.get("coredump").is_none());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let run: Run = serde_json::from_str(r#"{"boot":3,"uptime":900}"#).expect("decode");
        assert_eq!(run.boot, 3);
        assert_eq!(run.uptime_ms, 900);
        assert_eq!(run.slot, None);
        assert_eq!(run.checkpoint, Checkpoint::Boot);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = GuardState::default();
        state.boot_count = 9;
        state.last_switch_boot = 4;
        state.slot_mut(SlotId::Ota0).strike = 6;
        state.slot_mut(SlotId::Ota1).last_crash_sig = "cd:x".to_owned();
        state.record_run(sample_run(8), 16);
        let text = serde_json::to_string(&state).expect("encode");
        let back: GuardState = serde_json::from_str(&text).expect("decode");
        assert_eq!(back, state);
    }

    #[test]
    fn history_is_bounded_newest_first() {
        let mut state = GuardState::default();
        for boot in 1..=20 {
            state.record_run(sample_run(boot), 16);
        }
        assert_eq!(state.history.len(), 16);
        assert_eq!(state.history[0].boot, 20);
        assert_eq!(state.history[15].boot, 5);
        assert_eq!(state.last.as_ref().map(|r| r.boot), Some(20));
    }

    #[test]
    fn merge_keeps_counters() {
        let mut state = GuardState::default();
        state.boot_count = 12;
        state.last_switch_boot = 10;
        state.slot_mut(SlotId::Ota0).crashes = 2;

        let mut snapshot = GuardState::default();
        snapshot.boot_count = 99;
        snapshot.last_switch_boot = 98;
        snapshot.slot_mut(SlotId::Ota0).crashes = 50;
        snapshot.record_run(sample_run(11), 16);

        state.merge_snapshot(snapshot, 16);
        assert_eq!(state.boot_count, 12);
        assert_eq!(state.last_switch_boot, 10);
        assert_eq!(state.slot(SlotId::Ota0).crashes, 2);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.last.as_ref().map(|r| r.boot), Some(11));
    }

    #[test]
    fn merge_keeps_last_when_snapshot_lacks_it() {
        let mut state = GuardState::default();
        state.record_run(sample_run(6), 16);

        let snapshot: GuardState = serde_json::from_str(r#"{"version":1}"#).expect("decode");
        state.merge_snapshot(snapshot, 16);
        assert_eq!(state.last.as_ref().map(|r| r.boot), Some(6));
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn core_dump_attribution_searches_history() {
        let mut state = GuardState::default();
        let mut older = sample_run(3);
        older.core_dump = Some(CoreDumpRef { uid: "old".into() });
        older.slot = Some(SlotId::Ota0);
        state.record_run(older, 16);
        state.record_run(sample_run(4), 16);
        assert_eq!(state.core_dump_slot("5a17"), Some(SlotId::Ota1));
        assert_eq!(state.core_dump_slot("old"), Some(SlotId::Ota0));
        assert_eq!(state.core_dump_slot("none"), None);
    }
}
