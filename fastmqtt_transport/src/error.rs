// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Common error types for the transport connector.

use std::fmt;

use thiserror::Error;

/// Error type for MQTT connection
pub type ConnectionError = rumqttc::v5::ConnectionError;
/// Error type for completion tokens
pub type CompletionError = rumqttc::NoticeError;
/// Error subtype for MQTT connection error caused by state
pub type StateError = rumqttc::v5::StateError;

/// Error performing any client operation (publish, subscribe, unsubscribe, ack, disconnect).
#[derive(Debug, Error, Clone)]
#[error("{kind}")]
pub struct ClientError {
    kind: ClientErrorKind,
}

impl ClientError {
    /// Create a new [`ClientError`]
    #[must_use]
    pub fn new(kind: ClientErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`ClientErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &ClientErrorKind {
        &self.kind
    }
}

impl From<rumqttc::v5::ClientError> for ClientError {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        ClientError::new(ClientErrorKind::Detached(e.to_string()))
    }
}

/// An enumeration of categories of [`ClientError`]
#[derive(Clone, Debug)]
pub enum ClientErrorKind {
    /// Client is detached from connection/event loop. Cannot send requests.
    Detached(String),
    /// Invalid topic name or filter provided
    InvalidTopic,
    /// The publish has already been sufficiently acknowledged
    AlreadyAcked,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErrorKind::Detached(reason) => {
                write!(f, "client is detached from connection/event loop: {reason}")
            }
            ClientErrorKind::InvalidTopic => write!(f, "invalid topic name or filter"),
            ClientErrorKind::AlreadyAcked => write!(f, "publish already acknowledged"),
        }
    }
}

/// Error ending a [`crate::session::Session`].
#[derive(Debug, Error, Clone)]
#[error("{kind}")]
pub struct SessionExitError {
    kind: SessionExitErrorKind,
}

impl SessionExitError {
    /// Create a new [`SessionExitError`]
    #[must_use]
    pub fn new(kind: SessionExitErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`SessionExitErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &SessionExitErrorKind {
        &self.kind
    }
}

impl From<ClientError> for SessionExitError {
    fn from(e: ClientError) -> Self {
        SessionExitError::new(SessionExitErrorKind::ClientError(e))
    }
}

impl From<tokio::time::error::Elapsed> for SessionExitError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SessionExitError::new(SessionExitErrorKind::Timeout)
    }
}

/// An enumeration of categories of [`SessionExitError`]
#[derive(Clone, Debug)]
pub enum SessionExitErrorKind {
    /// The broker was not reachable to negotiate a graceful disconnect.
    BrokerUnavailable {
        /// Whether a disconnect was attempted before this error was returned.
        attempted: bool,
    },
    /// The underlying disconnect call failed.
    ClientError(ClientError),
    /// The graceful exit attempt did not complete within the specified timeout.
    Timeout,
}

impl fmt::Display for SessionExitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionExitErrorKind::BrokerUnavailable { attempted } => {
                write!(f, "broker unavailable (disconnect attempted: {attempted})")
            }
            SessionExitErrorKind::ClientError(e) => write!(f, "client error: {e}"),
            SessionExitErrorKind::Timeout => write!(f, "timed out waiting for graceful exit"),
        }
    }
}

/// Error running a [`crate::session::Session`] to completion.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SessionError {
    kind: SessionErrorKind,
}

impl SessionError {
    /// Create a new [`SessionError`]
    #[must_use]
    pub fn new(kind: SessionErrorKind) -> Self {
        Self { kind }
    }

    /// Return the corresponding [`SessionErrorKind`] for this error
    #[must_use]
    pub fn kind(&self) -> &SessionErrorKind {
        &self.kind
    }
}

impl From<SessionErrorKind> for SessionError {
    fn from(kind: SessionErrorKind) -> Self {
        SessionError::new(kind)
    }
}

/// An enumeration of categories of [`SessionError`]
#[derive(Debug)]
pub enum SessionErrorKind {
    /// The connection was refused by the broker and cannot be retried.
    ConnectionError(ConnectionError),
    /// The reconnect policy declined to continue retrying.
    ReconnectHalted,
    /// A forced exit interrupted an in-progress reconnect wait.
    ForceExit,
    /// The broker did not preserve session state across a reconnect.
    SessionLost,
    /// The session was already run once; reuse is not supported.
    InvalidState(String),
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionErrorKind::ConnectionError(e) => write!(f, "connection error: {e}"),
            SessionErrorKind::ReconnectHalted => write!(f, "reconnect attempts halted"),
            SessionErrorKind::ForceExit => write!(f, "session force-exited"),
            SessionErrorKind::SessionLost => write!(f, "session state lost on broker"),
            SessionErrorKind::InvalidState(msg) => write!(f, "invalid session state: {msg}"),
        }
    }
}
