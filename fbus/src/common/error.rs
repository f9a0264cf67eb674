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

//! Error types for building, starting and running a bus.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the bus.
///
/// Per-message errors (`Resolution`, `Deserialization`, `Handler` and a failing
/// `on_before_processing` hook) are reported to the hook chain and never stop
/// the runtime. `Configuration` and `Transport` errors are fatal.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The bus is misconfigured or an operation is not valid in the current state.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No consumer could be resolved for a message.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// An inbound body could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// An outbound message could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A handler returned an error.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// A hook failed.
    #[error("hook error: {0}")]
    Hook(String),

    /// The transport failed at the connection level.
    #[error("transport fault: {0}")]
    Transport(#[from] TransportFault),
}

impl BusError {
    /// `true` for errors that fail a single message only.
    #[must_use]
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_) | Self::Deserialization(_) | Self::Handler(_) | Self::Hook(_)
        )
    }

    /// `true` for errors that stop a build, a start or a running bus.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Transport(_))
    }
}

/// Connection-level transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    /// The broker stayed unreachable for every connection attempt.
    #[error("could not connect to {endpoint} after {attempts} attempt(s)")]
    ConnectFailed {
        /// The endpoint.
        endpoint: String,
        /// Attempts made.
        attempts: u32,
    },

    /// An established connection was lost and could not be restored.
    #[error("connection to {endpoint} lost; gave up after {attempts} reconnect attempt(s)")]
    ConnectionLost {
        /// The endpoint.
        endpoint: String,
        /// Reconnect attempts made.
        attempts: u32,
    },

    /// A command had no destination.
    #[error("unroutable message: {0}")]
    Unroutable(String),

    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Error returned by message handlers.
///
/// Wraps a message and optionally the error that caused it. Converts from
/// `anyhow::Error`, `serde_json::Error`, [`BusError`] and strings, so `?` works
/// inside handlers.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HandlerError {
    /// Creates an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an error, keeping it as the source.
    #[must_use]
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        let message = format!("{error:#}");
        let source: Box<dyn std::error::Error + Send + Sync + 'static> = error.into();
        Self {
            message,
            source: Some(Arc::from(source)),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::from_error(error)
    }
}

impl From<BusError> for HandlerError {
    fn from(error: BusError) -> Self {
        Self::from_error(error)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn classification() {
        assert!(BusError::Resolution("x".into()).is_per_message());
        assert!(BusError::Handler(HandlerError::new("boom")).is_per_message());
        assert!(!BusError::Configuration("x".into()).is_per_message());
        assert!(BusError::Transport(TransportFault::Closed).is_fatal());
        assert!(!BusError::Deserialization("x".into()).is_fatal());
    }

    #[test]
    fn handler_error_keeps_its_source() {
        let err = HandlerError::from(anyhow::anyhow!("inner failure"));
        assert_eq!(err.message(), "inner failure");
        assert!(err.source().is_some());

        let wrapped = BusError::from(HandlerError::from("plain"));
        assert_eq!(wrapped.to_string(), "handler error: plain");
        assert!(HandlerError::from("plain").source().is_none());
    }
}
