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

//! Runtime internals.
//!
//! *   [`BusBuilder`] / [`BusConfiguration`]: fluent configuration and its validated snapshot.
//! *   [`BusRuntime`]: lifecycle state machine and message consumption.
//! *   [`HandlerRegistry`]: message-type-keyed handler bindings.
//! *   [`DefaultContainer`]: the built-in consumer container.
//! *   [`HookChain`] / [`HookGuard`]: ordered hook execution.
//! *   [`BusConfig`]: XDG-loaded configuration defaults.
//! *   [`BusError`]: the error taxonomy.

// --- Public Re-exports ---
pub use backoff::{Backoff, ReconnectPolicy};
pub use builder::{BusBuilder, BusConfiguration, TransportDescriptor};
pub use config::{BusConfig, LimitsConfig, TimeoutConfig, TransportConfig, CONFIG};
pub use container::DefaultContainer;
pub use dispatch::DispatchStats;
pub use error::{BusError, HandlerError, TransportFault};
pub use hook_chain::{HookChain, HookGuard};
pub use registry::{HandlerBinding, HandlerRegistry};
pub use runtime::{BusRuntime, RuntimeState};

// --- Submodules ---

/// Defines [`ReconnectPolicy`] and [`Backoff`].
mod backoff;
/// Defines [`BusBuilder`] and [`BusConfiguration`].
mod builder;
/// Defines the configuration system.
pub mod config;
/// Defines [`DefaultContainer`].
mod container;
/// Per-message processing.
mod dispatch;
/// Defines [`BusError`], [`HandlerError`] and [`TransportFault`].
mod error;
/// Defines [`HookChain`] and [`HookGuard`].
mod hook_chain;
/// Defines [`HandlerRegistry`] and [`HandlerBinding`].
mod registry;
/// Defines [`BusRuntime`].
mod runtime;
