// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error types for the guardian and its storage and platform seams.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use thiserror::Error;

use crate::types::SlotId;

/// Failure reported by a key-value, retained-memory or filesystem primitive.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failed.
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Backend refused the operation (full, read-only, not mounted).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the partition/OTA collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// Running partition is not one of the two OTA slots.
    #[error("running partition is not an OTA slot")]
    NotAnOtaSlot,
    /// No bootable sibling image exists.
    #[error("no bootable sibling for {0}")]
    NoSibling(SlotId),
    /// Boot-selection call failed.
    #[error("failed to select {slot} for next boot: {reason}")]
    SetBootFailed {
        /// Slot that was requested.
        slot: SlotId,
        /// Backend-specific reason.
        reason: String,
    },
}

/// Errors surfaced by the guardian API.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Storage primitive failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Partition collaborator failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
    /// Snapshot document could not be encoded or decoded.
    #[error("snapshot document: {0}")]
    Json(#[from] serde_json::Error),
    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),
    /// Request name is not handled by the guardian.
    #[error("unknown request {0:?}")]
    UnknownRequest(String),
    /// Retained memory holds no run for the current boot.
    #[error("no run in progress; boot the device first")]
    NotBooted,
    /// Shared guardian mutex was poisoned by a panicking handler.
    #[error("crash guard lock poisoned")]
    LockPoisoned,
}
