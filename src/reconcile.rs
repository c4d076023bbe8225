// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Classify the previous run and plan per-slot accounting and slot switches.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Boot reconciliation.
//!
//! Everything here is a pure function of the recovered ledger, the durable
//! counters and what the platform reports about this boot. Side effects
//! (storage writes, boot selection, restart) are applied by
//! [`crate::CrashGuard`] from the returned [`BootPlan`].

use crate::config::GuardConfig;
use crate::ledger::BootLedger;
use crate::record::{crash_signature, CoreDumpRef, GuardState, Run, SlotHealth};
use crate::types::{ResetCause, SlotId};

/// Strike added for a firmware failure, by how long the run survived.
const STRIKE_TIERS: [(u32, i32); 3] = [(10 * 1000, 5), (60 * 1000, 3), (10 * 60 * 1000, 2)];
/// Strike added when a run outlived every tier.
const STRIKE_LATE: i32 = 1;
/// Extra strike when a failure repeats the slot's previous signature.
const STRIKE_REPEAT_BONUS: i32 = 2;

/// What this boot learned about the current device.
#[derive(Debug, Clone, Copy)]
pub struct BootContext<'a> {
    /// Slot the current image runs from.
    pub running: Option<SlotId>,
    /// Cause of the reset that started this boot.
    pub cause: ResetCause,
    /// Crash-dump identifier, when a dump is present.
    pub core_dump_uid: Option<&'a str>,
}

/// How the previous run ended, from the slot's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Clean shutdown, planned reset, or an unclassified cause.
    NotCounted,
    /// Brownout or power-on reset during a run.
    Power,
    /// Panic or watchdog reset during a run.
    Firmware,
}

/// Outcome of the automatic switch check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDecision {
    /// Thresholds not met.
    Stay,
    /// Thresholds met, but the previous switch was too recent.
    Suppressed {
        /// Boots elapsed since the last switch.
        since_last: u32,
    },
    /// Move away from the running slot.
    Switch {
        /// Slot being abandoned.
        from: SlotId,
    },
}

/// Result of reconciling one boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPlan {
    /// Boot number assigned to the current run.
    pub boot: u32,
    /// Previous run, finalized.
    pub previous: Option<Run>,
    /// Classification of the previous run.
    pub failure: FailureClass,
    /// Slot charged with the previous run.
    pub attributed: Option<SlotId>,
    /// Automatic switch decision.
    pub switch: SwitchDecision,
}

/// Turn a recovered ledger into the previous run's record.
///
/// Returns `None` when the ledger does not describe a run (boot number 0).
#[must_use]
pub fn finalize_previous_run(ledger: &BootLedger, ctx: &BootContext<'_>) -> Option<Run> {
    if ledger.boot == 0 {
        return None;
    }
    let mut run = Run {
        boot: ledger.boot,
        reset_cause: ctx.cause,
        uptime_ms: ledger.last_uptime_ms,
        ts: ledger.first_epoch_sec,
        checkpoint: ledger.checkpoint,
        unexpected_reset: ledger.in_progress,
        planned_reset: ledger.planned_reset,
        slot: ledger.slot.or(ctx.running),
        crash_sig: ledger.signature().to_owned(),
        core_dump: None,
    };
    if let Some(uid) = ctx.core_dump_uid {
        run.crash_sig = crash_signature(ctx.cause, ledger.checkpoint, Some(uid));
        run.core_dump = Some(CoreDumpRef {
            uid: uid.to_owned(),
        });
    }
    Some(run)
}

/// Classify a finalized run. Planned resets and clean shutdowns never count.
#[must_use]
pub fn classify(run: &Run) -> FailureClass {
    if !run.is_failure() {
        FailureClass::NotCounted
    } else if run.reset_cause.is_power_like() {
        FailureClass::Power
    } else if run.reset_cause.is_firmware_like() {
        FailureClass::Firmware
    } else {
        FailureClass::NotCounted
    }
}

/// Strike penalty for a firmware failure after `uptime_ms`.
#[must_use]
pub fn strike_for(uptime_ms: u32, repeated_signature: bool) -> i32 {
    let base = STRIKE_TIERS
        .iter()
        .find(|(limit, _)| uptime_ms < *limit)
        .map_or(STRIKE_LATE, |(_, add)| *add);
    if repeated_signature {
        base + STRIKE_REPEAT_BONUS
    } else {
        base
    }
}

/// Charge a failure to a slot's counters.
pub fn apply_failure(slot: &mut SlotHealth, run: &Run, class: FailureClass, cfg: &GuardConfig) {
    match class {
        FailureClass::NotCounted => {}
        FailureClass::Power => {
            slot.brownouts = slot.brownouts.saturating_add(1);
        }
        FailureClass::Firmware => {
            slot.crashes = slot.crashes.saturating_add(1);
            let repeated = !run.crash_sig.is_empty() && run.crash_sig == slot.last_crash_sig;
            slot.strike = slot
                .strike
                .saturating_add(strike_for(run.uptime_ms, repeated));
            if run.uptime_ms < cfg.early_crash_ms {
                slot.consecutive_early = slot.consecutive_early.saturating_add(1);
            } else {
                slot.consecutive_early = 0;
            }
            slot.last_crash_sig.clone_from(&run.crash_sig);
        }
    }
}

/// Whether a slot's counters call for abandoning it.
#[must_use]
pub fn slot_needs_switch(slot: &SlotHealth, cfg: &GuardConfig) -> bool {
    slot.consecutive_early >= cfg.switch_consecutive_early || slot.strike >= cfg.switch_strike
}

/// Reconcile the previous run into `state` and decide whether to switch.
///
/// `ledger` must already have passed validation; pass `None` after a power
/// loss. The boot counter in `state` is advanced by exactly one.
pub fn reconcile(
    state: &mut GuardState,
    ledger: Option<&BootLedger>,
    ctx: &BootContext<'_>,
    cfg: &GuardConfig,
) -> BootPlan {
    let previous = ledger.and_then(|ledger| finalize_previous_run(ledger, ctx));

    state.boot_count = state.boot_count.wrapping_add(1);
    let boot = state.boot_count;

    let failure = previous.as_ref().map_or(FailureClass::NotCounted, classify);
    let attributed = previous.as_ref().and_then(|run| run.slot);

    if let (Some(run), Some(slot)) = (previous.as_ref(), attributed) {
        apply_failure(state.slot_mut(slot), run, failure, cfg);
    }

    let mut switch = SwitchDecision::Stay;
    if let (FailureClass::Firmware, Some(slot)) = (failure, attributed) {
        if Some(slot) == ctx.running && slot_needs_switch(state.slot(slot), cfg) {
            let since_last = boot.wrapping_sub(state.last_switch_boot);
            switch = if since_last < cfg.min_boots_between_switches {
                SwitchDecision::Suppressed { since_last }
            } else {
                SwitchDecision::Switch { from: slot }
            };
        }
    }

    BootPlan {
        boot,
        previous,
        failure,
        attributed,
        switch,
    }
}
