// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Thread-safe handle serialising access to a crash guard.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::api::{GuardInfo, LiveState};
use crate::error::GuardError;
use crate::events::Event;
use crate::guard::CrashGuard;
use crate::types::SlotId;

type SharedResult<T> = Result<T, GuardError>;

/// Cloneable handle for hosts that deliver events and requests from more
/// than one thread.
#[derive(Clone)]
pub struct SharedCrashGuard {
    inner: Arc<Mutex<CrashGuard>>,
}

impl SharedCrashGuard {
    /// Wrap a booted guard.
    #[must_use]
    pub fn new(guard: CrashGuard) -> Self {
        Self {
            inner: Arc::new(Mutex::new(guard)),
        }
    }

    fn lock(&self) -> SharedResult<MutexGuard<'_, CrashGuard>> {
        self.inner.lock().map_err(|_| GuardError::LockPoisoned)
    }

    /// Run `f` with exclusive access to the guard.
    pub fn with<R>(&self, f: impl FnOnce(&mut CrashGuard) -> R) -> SharedResult<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// See [`CrashGuard::handle_event`].
    pub fn handle_event(&self, event: Event) -> SharedResult<()> {
        self.lock()?.handle_event(event);
        Ok(())
    }

    /// See [`CrashGuard::info`].
    pub fn info(&self) -> SharedResult<GuardInfo> {
        Ok(self.lock()?.info())
    }

    /// See [`CrashGuard::live_state`].
    pub fn live_state(&self) -> SharedResult<LiveState> {
        Ok(self.lock()?.live_state())
    }

    /// See [`CrashGuard::switch_slot`].
    pub fn switch_slot(&self) -> SharedResult<SlotId> {
        self.lock()?.switch_slot()
    }

    /// See [`CrashGuard::handle_request`].
    pub fn handle_request(&self, name: &str) -> SharedResult<Value> {
        self.lock()?.handle_request(name)
    }
}
