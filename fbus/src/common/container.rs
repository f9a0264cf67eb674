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

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::BusError;
use crate::traits::{
    BusContainer, BusScope, ConsumerDescriptor, ConsumerFactory, ConsumerInstance, ScopeContext,
};

/// The built-in container.
///
/// Keeps the factory of every registered consumer type. Each scope creates
/// instances lazily and hands out the same instance for the rest of the
/// message.
#[derive(Default, Clone)]
pub struct DefaultContainer {
    factories: Arc<DashMap<TypeId, ConsumerFactory>>,
}

impl DefaultContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered consumer types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// `true` when no consumer type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for DefaultContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultContainer")
            .field("registered", &self.factories.len())
            .finish()
    }
}

impl BusContainer for DefaultContainer {
    fn register(&self, consumer: &ConsumerDescriptor) -> Result<(), BusError> {
        let factory = consumer.factory().ok_or_else(|| {
            BusError::Configuration(format!(
                "{} has no factory; register it with with_consumer or with_consumer_factory",
                consumer.type_name()
            ))
        })?;
        self.factories.insert(consumer.type_id(), Arc::clone(factory));
        trace!(consumer = consumer.type_name(), "Registered consumer factory");
        Ok(())
    }

    fn new_scope(&self, _context: &ScopeContext) -> Result<Box<dyn BusScope>, BusError> {
        Ok(Box::new(DefaultScope {
            factories: Arc::clone(&self.factories),
            instances: HashMap::new(),
        }))
    }
}

struct DefaultScope {
    factories: Arc<DashMap<TypeId, ConsumerFactory>>,
    instances: HashMap<TypeId, ConsumerInstance>,
}

impl BusScope for DefaultScope {
    fn resolve(&mut self, consumer: &ConsumerDescriptor) -> Result<ConsumerInstance, BusError> {
        if let Some(instance) = self.instances.get(&consumer.type_id()) {
            return Ok(Arc::clone(instance));
        }
        let factory = self
            .factories
            .get(&consumer.type_id())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                BusError::Resolution(format!("{} is not registered", consumer.type_name()))
            })?;
        let instance = factory();
        self.instances
            .insert(consumer.type_id(), Arc::clone(&instance));
        Ok(instance)
    }

    fn dispose(self: Box<Self>) {
        trace!(instances = self.instances.len(), "Disposing scope");
    }
}
