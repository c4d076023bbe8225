// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Crash guard component: boot reconciliation and its persistence effects.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use log::{debug, error, info, warn};

use crate::config::GuardConfig;
use crate::durable::{DurableCounters, DurableStore, KvStore};
use crate::error::GuardError;
use crate::ledger::{BootLedger, RetainedRegion};
use crate::platform::Platform;
use crate::reconcile::{reconcile, BootContext, BootPlan, FailureClass, SwitchDecision};
use crate::record::{crash_signature, GuardState, Run, SWITCH_SIGNATURE};
use crate::snapshot::SnapshotStore;
use crate::types::{Checkpoint, SlotId};

/// Storage backends for the three persistence tiers.
pub struct Stores {
    /// Warm-reset-surviving memory holding the boot ledger.
    pub region: Box<dyn RetainedRegion>,
    /// Power-loss-surviving key-value storage for the durable record.
    pub kv: Box<dyn KvStore>,
    /// Filesystem snapshot for diagnostics.
    pub snapshot: Box<dyn SnapshotStore>,
}

/// What the boot decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// Continue booting the running slot.
    Continue,
    /// Boot selection moved to the sibling and a restart was requested.
    /// The host must not run anything else this boot.
    Switched {
        /// Slot that kept failing.
        from: SlotId,
        /// Slot selected for the next boot.
        to: SlotId,
    },
}

/// Boot-health guardian for a dual-slot device.
///
/// Handlers take `&mut self` and assume a single serialized dispatcher. Hosts
/// that dispatch from several threads wrap the guard in
/// [`crate::SharedCrashGuard`].
pub struct CrashGuard {
    pub(crate) config: GuardConfig,
    pub(crate) platform: Platform,
    pub(crate) region: Box<dyn RetainedRegion>,
    pub(crate) durable: DurableStore,
    pub(crate) snapshot: Box<dyn SnapshotStore>,
    pub(crate) ledger: BootLedger,
    pub(crate) state: GuardState,
    pub(crate) boot_ms: u64,
    pub(crate) fs_ready: bool,
    pub(crate) pending_prev: Option<Run>,
    pub(crate) stable_this_boot: bool,
    pub(crate) last_snapshot_ms: u64,
    plan: BootPlan,
    outcome: BootOutcome,
}

impl CrashGuard {
    /// Reconcile the previous run and start tracking this one.
    ///
    /// Must run once per boot before any other handler. When the returned
    /// guard reports [`BootOutcome::Switched`], a restart has already been
    /// requested from the partition service.
    pub fn boot(config: GuardConfig, platform: Platform, stores: Stores) -> Self {
        let boot_ms = platform.clock.uptime_ms();

        let recovered = BootLedger::recover(&stores.region.load());
        if recovered.is_none() {
            info!("crash guard: no valid boot ledger, cold boot");
        }

        let durable = DurableStore::new(stores.kv, config.kv_namespace.clone(), config.kv_key.clone());
        let mut state = GuardState::default();
        match durable.read() {
            Some(counters) => counters.apply_to(&mut state),
            None => info!("crash guard: durable record absent, starting from zero"),
        }

        let running = platform.partitions.running_slot();
        let cause = platform.reset.reset_cause();
        let core_dump_uid = platform.core_dump_uid();
        let ctx = BootContext {
            running,
            cause,
            core_dump_uid: core_dump_uid.as_deref(),
        };
        let plan = reconcile(&mut state, recovered.as_ref(), &ctx, &config);
        log_plan(&plan, cause);

        let mut guard = Self {
            config,
            platform,
            region: stores.region,
            durable,
            snapshot: stores.snapshot,
            ledger: BootLedger::default(),
            state,
            boot_ms,
            fs_ready: false,
            pending_prev: plan.previous.clone(),
            stable_this_boot: false,
            last_snapshot_ms: boot_ms,
            plan,
            outcome: BootOutcome::Continue,
        };

        if let SwitchDecision::Switch { from } = guard.plan.switch {
            if let Some(to) = guard.auto_switch(from) {
                guard.outcome = BootOutcome::Switched { from, to };
                return guard;
            }
        }

        guard.start_run(running, core_dump_uid.as_deref());
        guard.persist_durable();
        guard
    }

    /// Resume the run already started by [`CrashGuard::boot`] in this power
    /// cycle, without reconciling again.
    ///
    /// Counters come from the durable record and history from the snapshot.
    /// Fails with [`GuardError::NotBooted`] when retained memory holds no run
    /// matching the durable boot counter.
    pub fn attach(config: GuardConfig, platform: Platform, stores: Stores) -> Result<Self, GuardError> {
        let durable = DurableStore::new(stores.kv, config.kv_namespace.clone(), config.kv_key.clone());
        let mut state = GuardState::default();
        if let Some(counters) = durable.read() {
            counters.apply_to(&mut state);
        }
        let ledger = BootLedger::recover(&stores.region.load())
            .filter(|ledger| ledger.boot != 0 && ledger.boot == state.boot_count)
            .ok_or(GuardError::NotBooted)?;
        if let Some(snapshot) = stores.snapshot.load() {
            state.merge_snapshot(snapshot, config.history_len);
        }

        let now = platform.clock.uptime_ms();
        let elapsed = u64::from(ledger.last_uptime_ms).min(now);
        debug!("crash guard: attached to boot {} at cp {}", ledger.boot, ledger.checkpoint.code());
        Ok(Self {
            plan: BootPlan {
                boot: ledger.boot,
                previous: None,
                failure: FailureClass::NotCounted,
                attributed: None,
                switch: SwitchDecision::Stay,
            },
            stable_this_boot: ledger.checkpoint >= Checkpoint::Stable,
            config,
            region: stores.region,
            durable,
            snapshot: stores.snapshot,
            ledger,
            state,
            boot_ms: now - elapsed,
            fs_ready: true,
            pending_prev: None,
            last_snapshot_ms: now,
            platform,
            outcome: BootOutcome::Continue,
        })
    }

    /// Decision taken by [`CrashGuard::boot`].
    pub fn outcome(&self) -> BootOutcome {
        self.outcome
    }

    /// Reconciliation result for this boot.
    pub fn plan(&self) -> &BootPlan {
        &self.plan
    }

    /// In-memory guardian state.
    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Current contents of the boot ledger.
    pub fn ledger(&self) -> &BootLedger {
        &self.ledger
    }

    /// Active configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Milliseconds since the guard was constructed.
    pub fn uptime_ms(&self) -> u64 {
        self.platform.clock.uptime_ms().saturating_sub(self.boot_ms)
    }

    /// Whether the filesystem-ready notification has arrived.
    pub fn fs_ready(&self) -> bool {
        self.fs_ready
    }

    // Durable record and planned ledger are written before the boot-selection call.
    fn auto_switch(&mut self, from: SlotId) -> Option<SlotId> {
        let to = match self.platform.partitions.sibling_slot(from) {
            Ok(to) => to,
            Err(err) => {
                warn!("crash guard: switch away from {from} requested but no sibling: {err}");
                return None;
            }
        };

        let previous_switch = self.state.last_switch_boot;
        self.state.last_switch_boot = self.state.boot_count;
        self.persist_durable();

        self.ledger.reset();
        self.ledger.boot = self.state.boot_count;
        self.ledger.slot = Some(to);
        self.ledger.in_progress = false;
        self.ledger.planned_reset = true;
        self.ledger.set_signature(SWITCH_SIGNATURE);
        self.flush_ledger();

        match self.platform.partitions.set_boot_slot(to) {
            Ok(()) => {
                warn!(
                    "crash guard: switching from {from} to {to} at boot {}",
                    self.state.boot_count
                );
                self.platform.partitions.restart();
                Some(to)
            }
            Err(err) => {
                warn!("crash guard: requested switch but failed: {err}");
                self.state.last_switch_boot = previous_switch;
                self.persist_durable();
                None
            }
        }
    }

    fn start_run(&mut self, running: Option<SlotId>, core_dump_uid: Option<&str>) {
        self.ledger.reset();
        self.ledger.boot = self.state.boot_count;
        self.ledger.slot = running;
        self.ledger.checkpoint = Checkpoint::Boot;
        self.ledger.in_progress = true;
        self.ledger.planned_reset = false;
        self.ledger.last_uptime_ms = 0;
        let cause = self.platform.reset.reset_cause();
        self.ledger
            .set_signature(&crash_signature(cause, Checkpoint::Boot, core_dump_uid));
        self.flush_ledger();
    }

    pub(crate) fn flush_ledger(&mut self) {
        if let Err(err) = self.region.store(&self.ledger.to_bytes()) {
            warn!("crash guard: boot ledger write failed: {err}");
        }
    }

    pub(crate) fn persist_durable(&mut self) {
        let counters = DurableCounters::from_state(&self.state);
        if let Err(err) = self.durable.write(&counters) {
            error!("crash guard: durable record write failed: {err}");
        }
    }

    pub(crate) fn save_snapshot(&mut self) {
        if let Err(err) = self.snapshot.save(&self.state) {
            warn!("crash guard: snapshot write failed: {err}");
        }
    }
}

fn log_plan(plan: &BootPlan, cause: crate::types::ResetCause) {
    let Some(prev) = plan.previous.as_ref() else {
        info!("crash guard: boot {} (reset {cause}), no previous run", plan.boot);
        return;
    };
    match plan.failure {
        FailureClass::NotCounted => debug!(
            "crash guard: boot {} (reset {cause}), previous run {} ended cleanly",
            plan.boot, prev.boot
        ),
        FailureClass::Power => info!(
            "crash guard: boot {} (reset {cause}), previous run {} lost power at {} ms",
            plan.boot, prev.boot, prev.uptime_ms
        ),
        FailureClass::Firmware => warn!(
            "crash guard: boot {} (reset {cause}), previous run {} crashed at {} ms cp={} sig={}",
            plan.boot,
            prev.boot,
            prev.uptime_ms,
            prev.checkpoint.code(),
            prev.crash_sig
        ),
    }
    if let SwitchDecision::Suppressed { since_last } = plan.switch {
        warn!("crash guard: switch suppressed, only {since_last} boot(s) since last switch");
    }
}
