// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! A scoped request/reply facility bound to one chosen response topic: the
//! client-only half of the MQTT v5 request/response idiom.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use fastmqtt_transport::control_packet::{PublishProperties, QoS};
use fastmqtt_transport::interface::MqttPubSub;
use log::{error, warn};
use tokio::sync::{oneshot, Mutex};

use crate::error::{FastMqttError, FastMqttErrorKind};
use crate::facade::FastMqtt;
use crate::subscription_manager::SubscriptionManager;
use crate::types::{Binding, Handler, Message, RetainHandling, SubscribeOptions};

/// Default per-request timeout when neither `request` nor the context specify one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Monotonic correlation-token generator: a 16-bit counter cycled from 1 to
/// 65535, encoded big-endian with the minimum number of bytes.
struct CorrelationGenerator {
    counter: StdMutex<u16>,
}

impl CorrelationGenerator {
    fn new() -> Self {
        Self {
            counter: StdMutex::new(0),
        }
    }

    fn next_token(&self) -> Bytes {
        let mut counter = self.counter.lock().unwrap();
        *counter = if *counter >= u16::MAX { 1 } else { *counter + 1 };
        encode_minimal_be(*counter)
    }
}

fn encode_minimal_be(value: u16) -> Bytes {
    if value <= u16::from(u8::MAX) {
        Bytes::copy_from_slice(&[value as u8])
    } else {
        Bytes::copy_from_slice(&value.to_be_bytes())
    }
}

/// A request/reply facility scoped to one response topic. Install with
/// [`ResponseContext::open`]; always [`ResponseContext::close`] when done
/// (directly, or via dropping a guard the caller builds around it — `close` is
/// idempotent so both compose safely).
pub struct ResponseContext<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    facade: Arc<FastMqtt<T, PS>>,
    subscription_manager: Arc<SubscriptionManager<T, PS>>,
    response_topic: String,
    qos: QoS,
    default_timeout: Duration,
    pending: Arc<Mutex<HashMap<Bytes, oneshot::Sender<Message<T, PS>>>>>,
    correlation_generator: CorrelationGenerator,
    subscription_id: Mutex<Option<u32>>,
}

impl<T, PS> ResponseContext<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    pub(crate) fn new(
        facade: Arc<FastMqtt<T, PS>>,
        subscription_manager: Arc<SubscriptionManager<T, PS>>,
        response_topic: impl Into<String>,
        qos: QoS,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            facade,
            subscription_manager,
            response_topic: response_topic.into(),
            qos,
            default_timeout: default_timeout.unwrap_or(DEFAULT_TIMEOUT),
            pending: Arc::new(Mutex::new(HashMap::new())),
            correlation_generator: CorrelationGenerator::new(),
            subscription_id: Mutex::new(None),
        }
    }

    /// Subscribe to the response topic with `retain_handling = DoNotSend` (retained
    /// replies are meaningless for a request/reply exchange) and install the
    /// internal reply-matching handler.
    ///
    /// # Errors
    /// Propagates any error from the underlying transport subscribe.
    pub async fn open(&self) -> Result<(), FastMqttError> {
        let pending = self.pending.clone();
        let handler: Handler<T, PS> = Arc::new(move |message: Message<T, PS>| {
            let pending = pending.clone();
            Box::pin(async move {
                let Some(correlation_data) = message.properties.correlation_data.clone() else {
                    error!(
                        "correlation_data is missing in response callback ({})",
                        message.topic
                    );
                    return None;
                };

                let sender = pending.lock().await.remove(&correlation_data);
                match sender {
                    Some(sender) => {
                        if sender.send(message).is_err() {
                            warn!("reply arrived after its request was abandoned");
                        }
                    }
                    None => warn!("correlation_data {correlation_data:?} matches no pending request"),
                }
                None
            })
        });

        let binding = Binding::new(
            self.response_topic.clone(),
            handler,
            SubscribeOptions {
                qos: self.qos,
                retain_handling: RetainHandling::DoNotSend,
                ..SubscribeOptions::default()
            },
        );

        let identified = self.subscription_manager.subscribe(binding).await?;
        *self.subscription_id.lock().await = Some(identified.subscription_id);
        Ok(())
    }

    /// Unsubscribe and cancel every outstanding request. Idempotent: calling this
    /// more than once (or after the subscribe never succeeded) is a no-op past the
    /// first call.
    ///
    /// # Errors
    /// Propagates any error from the underlying transport unsubscribe.
    pub async fn close(&self) -> Result<(), FastMqttError> {
        let id = self.subscription_id.lock().await.take();
        if let Some(id) = id {
            self.subscription_manager.unsubscribe(id, None).await?;
        }
        self.pending.lock().await.clear();
        Ok(())
    }

    /// Issue a request to `topic` and await a matching reply.
    ///
    /// # Errors
    /// - [`FastMqttErrorKind::ConflictError`] if the generated correlation token
    ///   collides with one already outstanding.
    /// - [`FastMqttErrorKind::ProtocolMisuse`] if `properties` already sets
    ///   `response_topic` or `correlation_data`.
    /// - [`FastMqttErrorKind::Timeout`] if no reply arrives within the deadline.
    /// - [`FastMqttErrorKind::Disconnected`] if the context is closed while the
    ///   request is outstanding.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: T,
        qos: QoS,
        retain: bool,
        properties: Option<PublishProperties>,
        timeout: Option<Duration>,
    ) -> Result<Message<T, PS>, FastMqttError> {
        let correlation_data = self.correlation_generator.next_token();

        let mut properties = properties.unwrap_or_default();
        if properties.correlation_data.is_some() {
            return Err(FastMqttErrorKind::ProtocolMisuse(
                "properties.correlation_data is not allowed in request".to_string(),
            )
            .into());
        }
        if properties.response_topic.is_some() {
            return Err(FastMqttErrorKind::ProtocolMisuse(
                "properties.response_topic is not allowed in request".to_string(),
            )
            .into());
        }
        properties.correlation_data = Some(correlation_data.clone());
        properties.response_topic = Some(self.response_topic.clone());

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&correlation_data) {
                return Err(FastMqttErrorKind::ConflictError.into());
            }
            pending.insert(correlation_data.clone(), tx);
        }

        let outcome = tokio::time::timeout(timeout.unwrap_or(self.default_timeout), async {
            self.facade
                .publish(topic, payload, qos, retain, Some(properties))
                .await?;
            rx.await
                .map_err(|_| FastMqttError::from(FastMqttErrorKind::Disconnected))
        })
        .await;

        self.pending.lock().await.remove(&correlation_data);

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => Err(FastMqttErrorKind::Timeout.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_generator_cycles_from_one() {
        let generator = CorrelationGenerator::new();
        assert_eq!(generator.next_token(), Bytes::from_static(&[1]));
        assert_eq!(generator.next_token(), Bytes::from_static(&[2]));
    }

    #[test]
    fn correlation_generator_widens_past_one_byte() {
        let generator = CorrelationGenerator::new();
        for _ in 0..255 {
            generator.next_token();
        }
        // 256th call wraps to a two-byte encoding of 256.
        assert_eq!(generator.next_token(), Bytes::copy_from_slice(&256u16.to_be_bytes()));
    }
}
