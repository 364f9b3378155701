// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test utilities for code built on RamFS Core

use std::sync::{Mutex, PoisonError};

use crate::types::{EventKind, EventSink};

/// Event sink that keeps every event it receives, in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventKind>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventKind> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain and return the events recorded so far
    pub fn take(&self) -> Vec<EventKind> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, evt: &EventKind) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(evt.clone());
    }
}
