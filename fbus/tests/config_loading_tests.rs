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
use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use fbus::prelude::*;
use fbus_test::prelude::*;

use crate::setup::*;

mod setup;

/// A configuration file drives a builder end to end.
#[bus_test]
async fn test_file_configuration_drives_the_builder() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = TempDir::new()?;
    let config_dir = temp_dir.path().join("fbus");
    fs::create_dir_all(&config_dir)?;

    let config_content = r#"
        [limits]
        max_concurrent_messages = 3

        [timeouts]
        shutdown_drain_ms = 250

        [transport]
        default_endpoint = "memory://configured/"

        [transport.reconnect]
        max_attempts = 9
        initial_backoff_ms = 5
    "#;
    let path = config_dir.join("config.toml");
    fs::write(&path, config_content)?;

    let config = BusConfig::load_from(&path);
    assert_eq!(config.limits.max_concurrent_messages, 3);
    assert_eq!(config.shutdown_drain_timeout(), Duration::from_millis(250));
    assert_eq!(config.transport.reconnect.max_attempts, 9);
    assert_eq!(config.transport.reconnect.max_backoff_ms, 5_000, "unset keys keep defaults");
    assert_eq!(config.transport.max_redeliveries, 5);

    let runtime = BusBuilder::configure()
        .with_name("configured")
        .with_concurrency(config.limits.max_concurrent_messages)
        .with_shutdown_timeout(config.shutdown_drain_timeout())
        .with_reconnect_policy(config.transport.reconnect.clone())
        .use_transport(config.default_endpoint()?)
        .build()?;

    let configuration = runtime.configuration();
    assert_eq!(configuration.concurrency(), 3);
    assert_eq!(configuration.shutdown_timeout(), Duration::from_millis(250));
    assert_eq!(configuration.reconnect().max_attempts, 9);
    assert_eq!(configuration.transport().endpoint.as_str(), "memory://configured/");

    runtime.start().await?;
    runtime.stop().await?;

    temp_dir.close()?;
    Ok(())
}

/// A broken file falls back to the defaults instead of failing.
#[bus_test]
async fn test_malformed_file_falls_back_to_defaults() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "[limits\nmax_concurrent_messages = ")?;

    assert_eq!(BusConfig::load_from(&path), BusConfig::default());
    assert!(matches!(
        BusConfig::from_toml_str("[limits\n"),
        Err(BusError::Configuration(_))
    ));
    Ok(())
}

#[bus_test]
async fn test_zero_concurrency_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let built = BusBuilder::configure()
        .with_name("zero")
        .with_concurrency(0)
        .use_transport(endpoint("zero"))
        .build();
    assert!(matches!(built, Err(BusError::Configuration(_))));
    Ok(())
}
