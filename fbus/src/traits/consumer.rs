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

use std::marker::PhantomData;

use async_trait::async_trait;

use super::{BusMessage, ConsumerDescriptor};
use crate::common::{HandlerBinding, HandlerError};
use crate::message::Conversation;

/// Handles one message type.
///
/// A consumer type implements this once per message type it accepts and
/// lists those types in [`Consumer::bindings`] (or `#[bus_consumer(...)]`).
///
/// ```rust,ignore
/// #[async_trait]
/// impl BusConsumer<Ping> for PingConsumer {
///     async fn handle(&self, ctx: &Conversation, msg: Ping) -> Result<(), HandlerError> {
///         ctx.reply(&Pong { to: msg.from }).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BusConsumer<M: BusMessage>: Send + Sync + 'static {
    /// Processes `message`. An error is reported to the hook chain and the
    /// message is settled according to the recovery policy.
    async fn handle(&self, conversation: &Conversation, message: M) -> Result<(), HandlerError>;
}

/// A consumer type and the message types it handles.
pub trait Consumer: Send + Sync + Sized + 'static {
    /// Declares one binding per handled message type.
    fn bindings(bindings: &mut ConsumerBindings<Self>);
}

/// Collects the bindings a [`Consumer`] declares.
pub struct ConsumerBindings<C> {
    descriptor: ConsumerDescriptor,
    entries: Vec<HandlerBinding>,
    _consumer: PhantomData<fn() -> C>,
}

impl<C: Consumer> ConsumerBindings<C> {
    pub(crate) fn collect(descriptor: ConsumerDescriptor) -> Vec<HandlerBinding> {
        let mut bindings = Self {
            descriptor,
            entries: Vec::new(),
            _consumer: PhantomData,
        };
        C::bindings(&mut bindings);
        bindings.entries
    }

    /// Binds `M` to `C`'s [`BusConsumer<M>`] implementation.
    pub fn handle<M: BusMessage>(&mut self) -> &mut Self
    where
        C: BusConsumer<M>,
    {
        self.entries
            .push(HandlerBinding::for_consumer::<C, M>(self.descriptor.clone()));
        self
    }
}
