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

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::common::BusError;
use crate::message::MessageType;

/// A type-erased consumer instance as produced by a container.
pub type ConsumerInstance = Arc<dyn Any + Send + Sync>;

/// Creates a fresh consumer instance.
pub type ConsumerFactory = Arc<dyn Fn() -> ConsumerInstance + Send + Sync>;

/// Describes a consumer type to a container.
///
/// Carries the type identity and, for consumers registered through the
/// builder, a factory the default container uses to instantiate it.
#[derive(Clone)]
pub struct ConsumerDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    factory: Option<ConsumerFactory>,
}

impl ConsumerDescriptor {
    /// Describes `C` without a factory. Containers that build instances
    /// themselves only need the type identity.
    #[must_use]
    pub fn of<C: Send + Sync + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            factory: None,
        }
    }

    /// Describes `C` with a factory.
    #[must_use]
    pub fn with_factory<C, F>(factory: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            factory: Some(Arc::new(move || Arc::new(factory()) as ConsumerInstance)),
            ..Self::of::<C>()
        }
    }

    /// Identity of the consumer type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the consumer type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The factory, if one was supplied.
    #[must_use]
    pub fn factory(&self) -> Option<&ConsumerFactory> {
        self.factory.as_ref()
    }
}

impl fmt::Debug for ConsumerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerDescriptor")
            .field("type_name", &self.type_name)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

/// What a container knows about the message a scope is opened for.
#[derive(Clone, Debug)]
pub struct ScopeContext {
    /// Name of the bus processing the message.
    pub bus_name: String,
    /// Type of the message.
    pub message_type: MessageType,
    /// Id of the message.
    pub message_id: String,
}

/// Instantiates consumers.
///
/// `register` is called at build time for every consumer type; `new_scope`
/// once per message and binding.
pub trait BusContainer: Send + Sync + 'static {
    /// Makes a consumer type known. An error fails `build()`.
    fn register(&self, consumer: &ConsumerDescriptor) -> Result<(), BusError>;

    /// Opens the unit of work for one message.
    fn new_scope(&self, context: &ScopeContext) -> Result<Box<dyn BusScope>, BusError>;
}

/// A per-message unit of work.
///
/// Instances resolved within one scope are shared for its lifetime. The
/// runtime always calls [`dispose`](BusScope::dispose) when processing ends.
pub trait BusScope: Send {
    /// Returns the instance of the described consumer type.
    fn resolve(&mut self, consumer: &ConsumerDescriptor) -> Result<ConsumerInstance, BusError>;

    /// Releases everything the scope created.
    fn dispose(self: Box<Self>) {}
}
