// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Boot-health guardian for dual-slot firmware with automatic slot fallback.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Slot guard.
//!
//! Tracks how each boot of a dual-image device ends, charges firmware
//! failures to the slot that was running, and moves boot selection to the
//! sibling image when one slot keeps crashing.
//!
//! State lives in three tiers:
//! - the boot ledger in warm-reset-surviving memory ([`ledger`]),
//! - the durable counter record in key-value storage ([`durable`]),
//! - a JSON diagnostic snapshot on the filesystem ([`snapshot`]).
//!
//! Only the first two are authoritative.

/// Slot, checkpoint and reset-cause vocabulary.
pub mod types;

/// Error types.
pub mod error;

/// Tunables loaded from TOML.
pub mod config;

/// Warm-reset boot ledger and retained memory backends.
pub mod ledger;

/// Run records and per-slot health counters.
pub mod record;

/// Power-loss-surviving counter record.
pub mod durable;

/// Diagnostic JSON snapshot.
pub mod snapshot;

/// Platform collaborator seams.
pub mod platform;

/// Lifecycle notifications.
pub mod events;

/// Previous-run classification and switch planning.
pub mod reconcile;

/// Diagnostic documents and manual switching.
pub mod api;

/// Multi-threaded handle.
pub mod shared;

/// Host simulation of the device.
pub mod sim;

mod guard;
mod tracker;

pub use api::{compute_role, GuardInfo, LiveState};
pub use config::GuardConfig;
pub use error::{GuardError, PlatformError, StorageError};
pub use events::{DoneReason, Event};
pub use guard::{BootOutcome, CrashGuard, Stores};
pub use platform::Platform;
pub use shared::SharedCrashGuard;
pub use types::{Checkpoint, ResetCause, SlotId};
