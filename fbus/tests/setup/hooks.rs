/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![allow(unused)]

use std::sync::Arc;

use parking_lot::Mutex;

use fbus::prelude::*;

use super::consumers::Journal;

/// Writes `<name>.<Stage>` to the journal at every stage it sees.
pub struct RecordingHook {
    pub name: &'static str,
    pub journal: Journal,
    pub refuse: bool,
}

impl RecordingHook {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            refuse: false,
        }
    }

    /// A hook whose `on_before_processing` fails.
    pub fn refusing(name: &'static str, journal: &Journal) -> Self {
        Self {
            refuse: true,
            ..Self::new(name, journal)
        }
    }
}

#[async_trait]
impl BusHook for RecordingHook {
    async fn on_start(&self, _initiator: &Initiator) -> Result<(), BusError> {
        self.journal.record(format!("{}.Start", self.name));
        Ok(())
    }

    async fn on_stop(&self, _initiator: &Initiator) -> Result<(), BusError> {
        self.journal.record(format!("{}.Stop", self.name));
        Ok(())
    }

    async fn on_before_processing(&self, _ctx: &Conversation) -> Result<HookGuard, BusError> {
        self.journal.record(format!("{}.Before", self.name));
        if self.refuse {
            return Err(BusError::Hook(format!("{} refused the message", self.name)));
        }
        let journal = self.journal.clone();
        let name = self.name;
        Ok(HookGuard::new(move || {
            journal.record(format!("{name}.Release"));
        }))
    }

    async fn on_error(&self, _ctx: &Conversation, _envelope: &Envelope, _error: &BusError) {
        self.journal.record(format!("{}.OnError", self.name));
    }
}

/// Keeps every error reported to `on_error`, with the delivery count it was seen at.
#[derive(Clone, Default)]
pub struct ErrorLog {
    pub errors: Arc<Mutex<Vec<(BusError, u32)>>>,
}

impl ErrorLog {
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn first(&self) -> Option<BusError> {
        self.errors.lock().first().map(|(err, _)| err.clone())
    }

    pub fn delivery_counts(&self) -> Vec<u32> {
        self.errors.lock().iter().map(|(_, count)| *count).collect()
    }
}

#[async_trait]
impl BusHook for ErrorLog {
    async fn on_error(&self, ctx: &Conversation, _envelope: &Envelope, error: &BusError) {
        self.errors.lock().push((error.clone(), ctx.delivery_count()));
    }
}

/// Refuses to let the bus start.
pub struct FailingStartHook;

#[async_trait]
impl BusHook for FailingStartHook {
    async fn on_start(&self, _initiator: &Initiator) -> Result<(), BusError> {
        Err(BusError::Hook("start refused".to_string()))
    }
}
