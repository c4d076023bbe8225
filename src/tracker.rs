// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track run progress, stability and graceful shutdown between boots.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use log::{debug, info};

use crate::events::{DoneReason, Event};
use crate::guard::CrashGuard;
use crate::platform::epoch_looks_valid;
use crate::record::crash_signature;
use crate::types::Checkpoint;

impl CrashGuard {
    /// Dispatch a lifecycle notification.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Init(0) => self.on_fs_ready(),
            Event::Init(_) => {}
            Event::Inited => self.mark_checkpoint(Checkpoint::Inited),
            Event::Periodic => self.on_periodic(),
            Event::Done(reason) => self.on_done(reason),
        }
    }

    /// Record that the run reached `checkpoint`.
    ///
    /// Checkpoints only move forward within a run. Also captures the first
    /// plausible wall-clock time and refreshes the ledger signature.
    pub fn mark_checkpoint(&mut self, checkpoint: Checkpoint) {
        if checkpoint < self.ledger.checkpoint {
            debug!(
                "crash guard: ignoring checkpoint {} behind {}",
                checkpoint.code(),
                self.ledger.checkpoint.code()
            );
            return;
        }
        self.ledger.checkpoint = checkpoint;

        if self.ledger.first_epoch_sec == 0 {
            let now = self.platform.clock.epoch_secs();
            if epoch_looks_valid(now) {
                self.ledger.first_epoch_sec = now;
            }
        }

        let cause = self.platform.reset.reset_cause();
        let uid = self.platform.core_dump_uid();
        self.ledger
            .set_signature(&crash_signature(cause, checkpoint, uid.as_deref()));
        self.flush_ledger();
    }

    fn on_fs_ready(&mut self) {
        self.fs_ready = true;
        self.mark_checkpoint(Checkpoint::Init0);

        let capacity = self.config.history_len;
        if let Some(snapshot) = self.snapshot.load() {
            self.state.merge_snapshot(snapshot, capacity);
        }
        if let Some(previous) = self.pending_prev.take() {
            self.state.record_run(previous, capacity);
        }
        self.save_snapshot();
        self.last_snapshot_ms = self.platform.clock.uptime_ms();
    }

    fn on_periodic(&mut self) {
        let now = self.platform.clock.uptime_ms();
        let uptime = now.saturating_sub(self.boot_ms);
        self.ledger.last_uptime_ms = u32::try_from(uptime).unwrap_or(u32::MAX);
        self.flush_ledger();

        if !self.stable_this_boot && uptime >= u64::from(self.config.stable_ms) {
            if let Some(slot) = self.platform.partitions.running_slot() {
                let forgiveness = self.config.stable_forgiveness;
                let health = self.state.slot_mut(slot);
                health.strike = health.strike.saturating_sub(forgiveness).max(0);
                health.consecutive_early = 0;
                health.last_good_uptime_ms = self.ledger.last_uptime_ms;
                let strike = health.strike;
                self.stable_this_boot = true;
                self.mark_checkpoint(Checkpoint::Stable);
                self.persist_durable();
                info!("crash guard: {slot} stable after {uptime} ms, strike now {strike}");
            }
        }

        let since_save = now.saturating_sub(self.last_snapshot_ms);
        if self.fs_ready && since_save >= u64::from(self.config.snapshot_period_ms) {
            self.save_snapshot();
            self.last_snapshot_ms = now;
        }
    }

    fn on_done(&mut self, reason: DoneReason) {
        info!("crash guard: graceful shutdown ({})", reason.as_str());
        self.ledger.in_progress = false;
        self.ledger.planned_reset = true;
        self.ledger.checkpoint = Checkpoint::Done;
        self.flush_ledger();
        if self.fs_ready {
            self.save_snapshot();
        }
    }
}
