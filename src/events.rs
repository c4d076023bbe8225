// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Lifecycle notifications delivered to the guardian by the host dispatcher.
// Author: Lukas Bower
#![forbid(unsafe_code)]

/// Why the application is shutting down. Recorded only in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// Plain restart request.
    Restart,
    /// Power-off or halt.
    Shutdown,
    /// Entering deep sleep.
    Sleep,
    /// Restarting into freshly flashed firmware.
    Update,
}

impl DoneReason {
    /// Log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Shutdown => "shutdown",
            Self::Sleep => "sleep",
            Self::Update => "update",
        }
    }
}

/// Lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Initialisation phase `n` finished. Phase 0 means the filesystem is mounted.
    Init(u8),
    /// Application fully initialised.
    Inited,
    /// Periodic housekeeping tick.
    Periodic,
    /// Graceful shutdown is imminent.
    Done(DoneReason),
}
