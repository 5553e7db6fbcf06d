// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! High-level MQTT v5 client framework.
//!
//! Sits on top of [`fastmqtt_transport`] and adds four things a wire-level
//! client does not give you: a [`router`] for registering topic-filter
//! handlers ahead of connecting, a [`subscription_manager`] that demultiplexes
//! inbound messages by Subscription Identifier rather than by re-matching the
//! topic filter, a [`message_handler`] dispatch loop, and a [`response`]
//! context implementing the request/reply idiom over Correlation Data and a
//! Response Topic. [`facade::FastMqtt`] and [`facade::FastMqttBuilder`] tie
//! all four together behind one client handle.

/// Pluggable payload encode/decode contract.
pub mod codec;
/// Error types for the routing and correlation core.
pub mod error;
/// The thin façade tying everything together behind one client handle.
pub mod facade;
/// Subscription-Identifier-keyed dispatch of inbound messages to handlers.
pub mod message_handler;
/// The request/reply facility built on Correlation Data and Response Topic.
pub mod response;
/// Static, pre-connect topic-filter-to-handler registration.
pub mod router;
/// Subscription Identifier allocation and the `id -> binding` table.
pub mod subscription_manager;
/// The shared data model: bindings, subscribe options, and inbound messages.
pub mod types;

#[cfg(test)]
mod tests_support;

pub use error::{FastMqttError, FastMqttErrorKind};
pub use facade::{DefaultPubSub, FastMqtt, FastMqttBuilder, FastMqttGuard};
pub use response::ResponseContext;
pub use router::Router;
pub use types::{Binding, Handler, IdentifiedBinding, Message, Payload, RetainHandling, SubscribeOptions};
