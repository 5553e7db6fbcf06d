// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! The data model shared by the router, subscription manager, and message
//! handler: subscribe options, bindings, and the enriched inbound message.
//!
//! Everything here is generic over the application payload type `T`, which is
//! threaded through the façade's configured encoder/decoder pair. Handlers and
//! the state bag all agree on one `T` per `FastMqtt` instance; downstream crates
//! that need several payload shapes at once can still reach `Payload::raw()`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use fastmqtt_transport::control_packet::{PublishProperties, QoS, RetainForwardRule};
use fastmqtt_transport::interface::MqttPubSub;
use fastmqtt_transport::RawMessage;

use crate::codec::PayloadDecoder;
use crate::facade::FastMqtt;

/// A handler invoked once per matched inbound message.
///
/// Returning `Some(value)` publishes `value` (through the façade's encoder) to the
/// message's response topic; returning `None` emits no reply.
pub type Handler<T, PS> =
    Arc<dyn Fn(Message<T, PS>) -> Pin<Box<dyn Future<Output = Option<T>> + Send>> + Send + Sync>;

/// How the broker should treat already-retained messages matching a new subscription.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    SendOnSubscribe,
    /// Send retained messages only if the subscription did not already exist.
    SendIfNewSub,
    /// Never send retained messages for this subscription.
    DoNotSend,
}

impl From<RetainHandling> for RetainForwardRule {
    fn from(value: RetainHandling) -> Self {
        match value {
            RetainHandling::SendOnSubscribe => RetainForwardRule::OnEverySubscribe,
            RetainHandling::SendIfNewSub => RetainForwardRule::OnNewSubscribe,
            RetainHandling::DoNotSend => RetainForwardRule::Never,
        }
    }
}

/// Per-binding MQTT v5 subscribe options.
#[derive(Clone, Copy, Debug)]
pub struct SubscribeOptions {
    /// Requested Quality of Service.
    pub qos: QoS,
    /// Whether the broker should suppress delivery of messages this client itself published.
    pub no_local: bool,
    /// Whether the broker should preserve the RETAIN flag on forwarded messages.
    pub retain_as_published: bool,
    /// Whether and when the broker sends retained messages for this subscription.
    pub retain_handling: RetainHandling,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::default(),
        }
    }
}

/// A topic filter together with its ordered handler list and merged options.
///
/// Invariant: every handler in a `Binding` agrees on `no_local`, `retain_as_published`,
/// and `retain_handling`; `qos` is the maximum requested by any of them.
pub struct Binding<T, PS> {
    pub(crate) filter: String,
    pub(crate) handlers: Vec<Handler<T, PS>>,
    pub(crate) options: SubscribeOptions,
}

impl<T, PS> Clone for Binding<T, PS> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            handlers: self.handlers.clone(),
            options: self.options,
        }
    }
}

impl<T, PS> Binding<T, PS> {
    pub(crate) fn new(filter: String, handler: Handler<T, PS>, options: SubscribeOptions) -> Self {
        Self {
            filter,
            handlers: vec![handler],
            options,
        }
    }

    /// The topic filter this binding subscribes to.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// The number of handlers currently registered against this binding.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The merged subscribe options for this binding.
    #[must_use]
    pub fn options(&self) -> SubscribeOptions {
        self.options
    }
}

/// A [`Binding`] that has been handed a live Subscription Identifier by a successful
/// transport subscribe.
pub struct IdentifiedBinding<T, PS> {
    pub(crate) binding: Binding<T, PS>,
    /// The Subscription Identifier assigned to this binding, in `[1, 2^28 - 1]`.
    pub subscription_id: u32,
}

impl<T, PS> Clone for IdentifiedBinding<T, PS> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            subscription_id: self.subscription_id,
        }
    }
}

impl<T, PS> IdentifiedBinding<T, PS> {
    /// The topic filter this binding subscribes to.
    #[must_use]
    pub fn filter(&self) -> &str {
        self.binding.filter()
    }

    /// The merged subscribe options for this binding.
    #[must_use]
    pub fn options(&self) -> SubscribeOptions {
        self.binding.options()
    }
}

/// Lazily-decoded view over a message payload. Decoding is repeatable: calling
/// `decode`/`decode_as` more than once runs the decoder again rather than caching
/// a result, since decoders are expected to be cheap and pure.
pub struct Payload<T> {
    data: Bytes,
    default_decoder: Arc<dyn PayloadDecoder<T>>,
}

impl<T> Clone for Payload<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            default_decoder: self.default_decoder.clone(),
        }
    }
}

impl<T> Payload<T> {
    pub(crate) fn new(data: Bytes, default_decoder: Arc<dyn PayloadDecoder<T>>) -> Self {
        Self {
            data,
            default_decoder,
        }
    }

    /// The raw, still-encoded bytes.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.data
    }

    /// Decode using the façade's configured default decoder.
    #[must_use]
    pub fn decode(&self) -> T {
        self.default_decoder.decode(&self.data)
    }

    /// Decode using an explicitly supplied decoder, overriding the façade default.
    pub fn decode_as<U>(&self, decoder: &dyn PayloadDecoder<U>) -> U {
        decoder.decode(&self.data)
    }
}

/// A [`RawMessage`] enriched with a decoder-backed payload view and a back-reference
/// to the owning façade, used by handlers to reach the shared state bag or to publish.
pub struct Message<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    /// The topic the message was published to.
    pub topic: String,
    /// The message payload.
    pub payload: Payload<T>,
    /// Quality of Service the message was delivered at.
    pub qos: QoS,
    /// Whether the broker delivered this as a retained message.
    pub retain: bool,
    /// Packet identifier (0 for QoS 0 publishes).
    pub mid: u16,
    /// PUBLISH properties, including (when present) the Subscription Identifier(s).
    pub properties: PublishProperties,
    /// The façade that received this message, for handlers that need the state bag
    /// or want to issue their own publishes.
    pub client: Arc<FastMqtt<T, PS>>,
}

impl<T, PS> Clone for Message<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            qos: self.qos,
            retain: self.retain,
            mid: self.mid,
            properties: self.properties.clone(),
            client: self.client.clone(),
        }
    }
}

impl<T, PS> Message<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    pub(crate) fn from_raw(
        raw: RawMessage,
        decoder: Arc<dyn PayloadDecoder<T>>,
        client: Arc<FastMqtt<T, PS>>,
    ) -> Self {
        Self {
            topic: raw.topic,
            payload: Payload::new(raw.payload, decoder),
            qos: raw.qos,
            retain: raw.retain,
            mid: raw.mid,
            properties: raw.properties.unwrap_or_default(),
            client,
        }
    }
}
