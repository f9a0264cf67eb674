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

use async_trait::async_trait;

use crate::common::{BusError, HookGuard};
use crate::message::{Conversation, Envelope, Initiator};

/// Observes the bus lifecycle and the processing of every message.
///
/// All methods have no-op defaults. Hooks run in registration order, except
/// `on_stop` which runs in reverse. The guards returned by
/// `on_before_processing` are released in reverse order once the handler has
/// finished, whether it succeeded or failed.
#[async_trait]
pub trait BusHook: Send + Sync + 'static {
    /// Called once while the bus starts. An error aborts the start.
    async fn on_start(&self, _initiator: &Initiator) -> Result<(), BusError> {
        Ok(())
    }

    /// Called once during a graceful stop. Errors are logged only.
    async fn on_stop(&self, _initiator: &Initiator) -> Result<(), BusError> {
        Ok(())
    }

    /// Called before a handler runs. An error skips the handler and fails the message.
    async fn on_before_processing(
        &self,
        _conversation: &Conversation,
    ) -> Result<HookGuard, BusError> {
        Ok(HookGuard::noop())
    }

    /// Called exactly once for every failed message.
    async fn on_error(
        &self,
        _conversation: &Conversation,
        _envelope: &Envelope,
        _error: &BusError,
    ) {
    }
}
