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

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

use super::{
    BusError, BusRuntime, DefaultContainer, HandlerBinding, HandlerError, HandlerRegistry,
    HookChain, ReconnectPolicy, CONFIG,
};
use crate::codec::{JsonCodec, JsonOptions};
use crate::message::{Address, Conversation, Initiator};
use crate::traits::{
    BusCodec, BusContainer, BusHook, BusMessage, BusTransport, Consumer, ConsumerBindings,
    ConsumerDescriptor,
};
use crate::transport::BrokerTransport;

#[derive(Clone)]
enum CodecChoice {
    Json(JsonOptions),
    Custom(Arc<dyn BusCodec>),
}

#[derive(Clone)]
enum TransportChoice {
    Default,
    Broker(Url),
    Custom(Arc<dyn BusTransport>, Url),
}

/// A transport plugin together with the endpoint it serves.
#[derive(Clone)]
pub struct TransportDescriptor {
    /// The transport.
    pub transport: Arc<dyn BusTransport>,
    /// The broker endpoint.
    pub endpoint: Url,
}

impl fmt::Debug for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportDescriptor")
            .field("scheme", &self.transport.scheme())
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// Fluent configuration of a bus.
///
/// Every method consumes the builder and returns a new value, so partially
/// configured builders can be cloned and reused. Nothing is validated until
/// [`build`](Self::build), which reports every problem at once.
///
/// ```rust,ignore
/// let runtime = BusBuilder::configure()
///     .with_name("svc")
///     .with_consumer::<PingConsumer>()
///     .with_hook(Metrics::default())
///     .with_recovery()
///     .use_default_transport()
///     .build()?;
/// ```
#[derive(Clone, Default)]
pub struct BusBuilder {
    name: Option<String>,
    shard: Option<String>,
    bindings: Vec<HandlerBinding>,
    consumers: Vec<ConsumerDescriptor>,
    container: Option<Arc<dyn BusContainer>>,
    hooks: HookChain,
    recovery: bool,
    codec: Option<CodecChoice>,
    transport: Option<TransportChoice>,
    concurrency: Option<usize>,
    shutdown_timeout: Option<Duration>,
    reconnect: Option<ReconnectPolicy>,
    faults: Vec<String>,
}

impl BusBuilder {
    /// Starts an empty configuration.
    #[must_use]
    pub fn configure() -> Self {
        Self::default()
    }

    /// Sets the bus name. Must be called exactly once.
    ///
    /// The name is the address other buses send commands to.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &self.name {
            Some(existing) => self.faults.push(format!(
                "with_name called twice ('{existing}' then '{name}')"
            )),
            None => self.name = Some(name),
        }
        self
    }

    /// Sets the shard. Buses with the same name and shard share one queue;
    /// different shards of a name are independent consumer groups.
    #[must_use]
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    /// Registers every message type `T` declares, instantiating `T` with
    /// `Default::default()` in the default container.
    #[must_use]
    pub fn with_consumer<T: Consumer + Default>(self) -> Self {
        self.with_consumer_factory::<T, _>(T::default)
    }

    /// Registers every message type `T` declares, instantiating `T` with `factory`.
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates one instance per message scope.
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_consumer_factory<T, F>(mut self, factory: F) -> Self
    where
        T: Consumer,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let descriptor = ConsumerDescriptor::with_factory(factory);
        if self
            .consumers
            .iter()
            .any(|known| known.type_id() == descriptor.type_id())
        {
            self.faults
                .push(format!("{} is registered twice", descriptor.type_name()));
            return self;
        }
        let bindings = ConsumerBindings::<T>::collect(descriptor.clone());
        if bindings.is_empty() {
            self.faults
                .push(format!("{} declares no message types", descriptor.type_name()));
        }
        self.bindings.extend(bindings);
        self.consumers.push(descriptor);
        self
    }

    /// Binds `M` to an inline async function.
    ///
    /// ```rust,ignore
    /// builder.with_handler(|ctx: Conversation, msg: Ping| async move {
    ///     ctx.reply(&Pong { to: msg.from }).await?;
    ///     Ok(())
    /// })
    /// ```
    #[must_use]
    pub fn with_handler<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: BusMessage,
        F: Fn(Conversation, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.bindings.push(HandlerBinding::function::<M, F, Fut>(handler));
        self
    }

    /// Replaces the default container.
    #[must_use]
    pub fn with_container(mut self, container: impl BusContainer) -> Self {
        self.container = Some(Arc::new(container));
        self
    }

    /// Appends a hook. Hooks run in the order they are added.
    #[must_use]
    pub fn with_hook(mut self, hook: impl BusHook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Appends an already shared hook.
    #[must_use]
    pub fn with_shared_hook(mut self, hook: Arc<dyn BusHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Acknowledges failed messages instead of returning them to the broker,
    /// so a failing message never blocks the ones behind it.
    #[must_use]
    pub fn with_recovery(mut self) -> Self {
        self.recovery = true;
        self
    }

    /// Sets how many messages are processed at once.
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Sets how long `stop()` waits for in-flight messages.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Overrides the reconnection policy handed to the transport.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Uses the JSON codec with default options.
    #[must_use]
    pub fn use_default_codec(mut self) -> Self {
        self.codec = Some(CodecChoice::Json(JsonOptions::default()));
        self
    }

    /// Uses the JSON codec with options adjusted by `configure`.
    ///
    /// ```rust,ignore
    /// builder.use_codec(|opts| opts.field_naming = FieldNaming::CamelCase)
    /// ```
    #[must_use]
    pub fn use_codec(mut self, configure: impl FnOnce(&mut JsonOptions)) -> Self {
        let mut options = JsonOptions::default();
        configure(&mut options);
        self.codec = Some(CodecChoice::Json(options));
        self
    }

    /// Uses a custom codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl BusCodec) -> Self {
        self.codec = Some(CodecChoice::Custom(Arc::new(codec)));
        self
    }

    /// Uses the in-process broker at the configured default endpoint.
    #[must_use]
    pub fn use_default_transport(mut self) -> Self {
        self.transport = Some(TransportChoice::Default);
        self
    }

    /// Uses the in-process broker at `endpoint`.
    #[must_use]
    pub fn use_transport(mut self, endpoint: Url) -> Self {
        self.transport = Some(TransportChoice::Broker(endpoint));
        self
    }

    /// Uses a custom transport at `endpoint`.
    #[must_use]
    pub fn with_transport(mut self, transport: impl BusTransport, endpoint: Url) -> Self {
        self.transport = Some(TransportChoice::Custom(Arc::new(transport), endpoint));
        self
    }

    /// Validates the configuration and creates a runtime in state `Created`.
    ///
    /// # Errors
    ///
    /// [`BusError::Configuration`] listing every problem found: missing,
    /// empty or repeated name, missing transport, conflicting bindings,
    /// invalid codec options, an endpoint the transport rejects, or a
    /// consumer the container refuses.
    #[instrument(skip(self), fields(bus = self.name.as_deref().unwrap_or("<unnamed>")))]
    pub fn build(self) -> Result<BusRuntime, BusError> {
        let configuration = self.into_configuration()?;
        debug!(
            bindings = configuration.registry.len(),
            hooks = configuration.hooks.len(),
            endpoint = %configuration.transport.endpoint,
            "Bus configured"
        );
        Ok(BusRuntime::new(configuration))
    }

    /// Builds the bus and starts it.
    ///
    /// Returns the runtime together with its initiator; keep the runtime to
    /// stop the bus and to observe faults.
    ///
    /// # Errors
    ///
    /// Everything [`build`](Self::build) and [`BusRuntime::start`] report.
    pub async fn start(self) -> Result<(BusRuntime, Initiator), BusError> {
        let runtime = self.build()?;
        let initiator = runtime.start().await?;
        Ok((runtime, initiator))
    }

    fn into_configuration(self) -> Result<BusConfiguration, BusError> {
        let mut faults = self.faults;

        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            Some(_) => {
                faults.push("bus name must not be empty".to_string());
                String::new()
            }
            None => {
                faults.push("bus name missing; call with_name".to_string());
                String::new()
            }
        };

        let mut registry = HandlerRegistry::new();
        for binding in self.bindings {
            if let Err(err) = registry.register(binding) {
                faults.push(err.to_string());
            }
        }

        let codec: Option<Arc<dyn BusCodec>> = match self.codec {
            None => Some(Arc::new(JsonCodec::default())),
            Some(CodecChoice::Json(options)) => match JsonCodec::new(options) {
                Ok(codec) => Some(Arc::new(codec)),
                Err(err) => {
                    faults.push(format!("codec: {err}"));
                    None
                }
            },
            Some(CodecChoice::Custom(codec)) => Some(codec),
        };

        let transport = match self.transport {
            None => {
                faults.push(
                    "no transport configured; call use_default_transport, use_transport \
                     or with_transport"
                        .to_string(),
                );
                None
            }
            Some(choice) => {
                let resolved = match choice {
                    TransportChoice::Default => CONFIG.default_endpoint().map(|endpoint| {
                        (Arc::new(BrokerTransport::default()) as Arc<dyn BusTransport>, endpoint)
                    }),
                    TransportChoice::Broker(endpoint) => Ok((
                        Arc::new(BrokerTransport::default()) as Arc<dyn BusTransport>,
                        endpoint,
                    )),
                    TransportChoice::Custom(transport, endpoint) => Ok((transport, endpoint)),
                };
                match resolved.and_then(|(transport, endpoint)| {
                    transport.validate(&endpoint)?;
                    Ok(TransportDescriptor {
                        transport,
                        endpoint,
                    })
                }) {
                    Ok(descriptor) => Some(descriptor),
                    Err(err) => {
                        faults.push(format!("transport: {err}"));
                        None
                    }
                }
            }
        };

        let container = self
            .container
            .unwrap_or_else(|| Arc::new(DefaultContainer::new()));
        for consumer in &self.consumers {
            if let Err(err) = container.register(consumer) {
                faults.push(format!("container: {err}"));
            }
        }

        let concurrency = self
            .concurrency
            .unwrap_or(CONFIG.limits.max_concurrent_messages);
        if concurrency == 0 {
            faults.push("concurrency limit must be at least 1".to_string());
        }

        match (codec, transport) {
            (Some(codec), Some(transport)) if faults.is_empty() => Ok(BusConfiguration {
                name,
                shard: self.shard,
                registry: Arc::new(registry),
                container,
                hooks: self.hooks,
                codec,
                transport,
                recovery: self.recovery,
                concurrency,
                shutdown_timeout: self
                    .shutdown_timeout
                    .unwrap_or_else(|| CONFIG.shutdown_drain_timeout()),
                connect_timeout: CONFIG.connect_timeout(),
                reconnect: self
                    .reconnect
                    .unwrap_or_else(|| CONFIG.transport.reconnect.clone()),
            }),
            _ => Err(BusError::Configuration(faults.join("; "))),
        }
    }
}

impl fmt::Debug for BusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusBuilder")
            .field("name", &self.name)
            .field("shard", &self.shard)
            .field("bindings", &self.bindings.len())
            .field("hooks", &self.hooks.len())
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

/// The validated, immutable configuration a runtime runs with.
#[derive(Clone)]
pub struct BusConfiguration {
    pub(crate) name: String,
    pub(crate) shard: Option<String>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) container: Arc<dyn BusContainer>,
    pub(crate) hooks: HookChain,
    pub(crate) codec: Arc<dyn BusCodec>,
    pub(crate) transport: TransportDescriptor,
    pub(crate) recovery: bool,
    pub(crate) concurrency: usize,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) reconnect: ReconnectPolicy,
}

impl BusConfiguration {
    /// The bus name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shard, if any.
    #[must_use]
    pub fn shard(&self) -> Option<&str> {
        self.shard.as_deref()
    }

    /// Name and shard as an address.
    #[must_use]
    pub fn address(&self) -> Address {
        Address {
            client: self.name.clone(),
            shard: self.shard.clone(),
        }
    }

    /// The handler bindings.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The hook chain.
    #[must_use]
    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// The codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn BusCodec> {
        &self.codec
    }

    /// The transport and its endpoint.
    #[must_use]
    pub fn transport(&self) -> &TransportDescriptor {
        &self.transport
    }

    /// Whether failed messages are dropped instead of requeued.
    #[must_use]
    pub fn recovery(&self) -> bool {
        self.recovery
    }

    /// Messages processed at once.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Graceful drain bound of `stop()`.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// The reconnection policy.
    #[must_use]
    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }
}

impl fmt::Debug for BusConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConfiguration")
            .field("name", &self.name)
            .field("shard", &self.shard)
            .field("registry", &self.registry)
            .field("hooks", &self.hooks)
            .field("content_type", &self.codec.content_type())
            .field("transport", &self.transport)
            .field("recovery", &self.recovery)
            .field("concurrency", &self.concurrency)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}
