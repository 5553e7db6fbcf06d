// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Error types for the routing and correlation core.

use std::fmt;

use fastmqtt_transport::error::ClientError;
use fastmqtt_transport::ConnectionSettingsAdapterError;
use thiserror::Error;

/// Error arising from any public operation on the framework (router registration,
/// subscription lifecycle, message dispatch, or a response context request).
#[derive(Debug, Error, Clone)]
#[error("{kind}")]
pub struct FastMqttError {
    kind: FastMqttErrorKind,
}

impl FastMqttError {
    /// Create a new [`FastMqttError`]
    #[must_use]
    pub fn new(kind: FastMqttErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`FastMqttErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &FastMqttErrorKind {
        &self.kind
    }
}

impl From<FastMqttErrorKind> for FastMqttError {
    fn from(kind: FastMqttErrorKind) -> Self {
        FastMqttError::new(kind)
    }
}

impl From<ClientError> for FastMqttError {
    fn from(e: ClientError) -> Self {
        FastMqttError::new(FastMqttErrorKind::TransportFault(e))
    }
}

impl From<ConnectionSettingsAdapterError> for FastMqttError {
    fn from(e: ConnectionSettingsAdapterError) -> Self {
        FastMqttError::new(FastMqttErrorKind::ConfigError(e.to_string()))
    }
}

/// An enumeration of categories of [`FastMqttError`]
#[derive(Clone, Debug)]
pub enum FastMqttErrorKind {
    /// A binding option conflict, a post-start router mutation, or use of a sealed router.
    ConfigError(String),
    /// The subscription identifier pool is exhausted.
    ResourceExhausted,
    /// The operation was attempted while the transport is down and retries are exhausted.
    Disconnected,
    /// A handler returned a value for a message with no response topic, or a request's
    /// caller-supplied properties collided with the framework's own bookkeeping fields.
    ProtocolMisuse(String),
    /// A request did not receive a matching reply within its deadline.
    Timeout,
    /// A freshly generated correlation token collided with one already outstanding.
    ConflictError,
    /// An error surfaced verbatim from the transport layer.
    TransportFault(ClientError),
}

impl fmt::Display for FastMqttErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FastMqttErrorKind::ConfigError(msg) => write!(f, "configuration error: {msg}"),
            FastMqttErrorKind::ResourceExhausted => {
                write!(f, "subscription identifier pool exhausted")
            }
            FastMqttErrorKind::Disconnected => {
                write!(f, "operation attempted while disconnected")
            }
            FastMqttErrorKind::ProtocolMisuse(msg) => write!(f, "protocol misuse: {msg}"),
            FastMqttErrorKind::Timeout => write!(f, "request timed out"),
            FastMqttErrorKind::ConflictError => write!(f, "correlation token already in use"),
            FastMqttErrorKind::TransportFault(e) => write!(f, "transport fault: {e}"),
        }
    }
}
