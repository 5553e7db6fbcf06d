// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Receives raw messages, locates bindings via Subscription ID, invokes
//! handlers concurrently, and emits responses.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use fastmqtt_transport::control_packet::{PublishProperties, QoS};
use fastmqtt_transport::RawMessage;
use log::{debug, error, warn};
use tokio::sync::mpsc;

use crate::codec::{PayloadDecoder, PayloadEncoder};
use crate::error::{FastMqttError, FastMqttErrorKind};
use crate::facade::FastMqtt;
use crate::subscription_manager::SubscriptionManager;
use crate::types::{Handler, Message};

use fastmqtt_transport::interface::MqttPubSub;

/// Dispatches inbound raw messages to handlers resolved by Subscription ID.
pub struct MessageHandler<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    subscription_manager: Arc<SubscriptionManager<T, PS>>,
    decoder: Arc<dyn PayloadDecoder<T>>,
    encoder: Arc<dyn PayloadEncoder<T>>,
}

impl<T, PS> MessageHandler<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    /// Create a new message handler over `subscription_manager`, using `decoder`
    /// for every dispatched message's [`crate::types::Payload`] and `encoder` for
    /// any reply a handler asks to emit.
    pub fn new(
        subscription_manager: Arc<SubscriptionManager<T, PS>>,
        decoder: Arc<dyn PayloadDecoder<T>>,
        encoder: Arc<dyn PayloadEncoder<T>>,
    ) -> Self {
        Self {
            subscription_manager,
            decoder,
            encoder,
        }
    }

    /// Run the dispatch loop until the raw-message channel closes or the façade
    /// is dropped. Never returns an error: faults are contained and logged so the
    /// loop keeps delivering subsequent messages.
    pub async fn run(&self, mut raw_rx: mpsc::Receiver<RawMessage>, facade: Weak<FastMqtt<T, PS>>) {
        while let Some(raw) = raw_rx.recv().await {
            let Some(facade) = facade.upgrade() else {
                debug!("façade dropped; stopping message dispatch loop");
                break;
            };
            self.dispatch(raw, facade).await;
        }
    }

    async fn dispatch(&self, raw: RawMessage, facade: Arc<FastMqtt<T, PS>>) {
        let Some(properties) = raw.properties.clone() else {
            warn!("message on {} has no properties at all; dropping", raw.topic);
            return;
        };

        if properties.subscription_identifiers.is_empty() {
            warn!("message on {} has no subscription identifier; dropping", raw.topic);
            return;
        }

        let message = Message::from_raw(raw, self.decoder.clone(), facade.clone());

        for id in &properties.subscription_identifiers {
            let Ok(id) = u32::try_from(*id) else {
                error!("subscription identifier {id} does not fit a Subscription ID; skipping");
                continue;
            };
            let Some((handlers, filter)) = self.subscription_manager.handlers_for(id).await else {
                error!(
                    "message on {} has unknown subscription identifier {id}",
                    message.topic
                );
                continue;
            };
            debug!("dispatching message on {filter} (subscription {id}) to {} handler(s)", handlers.len());

            let handlers = handlers;
            let message = message.clone();
            let facade = facade.clone();
            let encoder = self.encoder.clone();
            tokio::spawn(async move {
                Self::process_message(handlers, message, facade, encoder).await;
            });
        }
    }

    async fn process_message(
        handlers: Vec<Handler<T, PS>>,
        message: Message<T, PS>,
        facade: Arc<FastMqtt<T, PS>>,
        encoder: Arc<dyn PayloadEncoder<T>>,
    ) {
        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let message = message.clone();
            tasks.push(tokio::spawn(async move { handler(message).await }));
        }

        for task in tasks {
            match task.await {
                Ok(Some(reply)) => {
                    if let Err(e) = Self::emit_reply(&message, reply, &facade, &encoder).await {
                        error!("error publishing reply to {}: {e}", message.topic);
                    }
                }
                Ok(None) => {}
                Err(join_error) => {
                    error!("handler for {} panicked: {join_error}", message.topic);
                }
            }
        }
    }

    async fn emit_reply(
        message: &Message<T, PS>,
        value: T,
        facade: &Arc<FastMqtt<T, PS>>,
        encoder: &Arc<dyn PayloadEncoder<T>>,
    ) -> Result<(), FastMqttError> {
        let Some(response_topic) = message.properties.response_topic.clone() else {
            return Err(FastMqttErrorKind::ProtocolMisuse(
                "callback returned result but message has no response_topic".to_string(),
            )
            .into());
        };

        let mut properties = PublishProperties::default();
        if let Some(correlation_data) = message.properties.correlation_data.clone() {
            properties.correlation_data = Some(correlation_data);
        }

        let payload: Bytes = encoder.encode(value);
        facade
            .publish_raw(response_topic, QoS::AtMostOnce, false, payload, Some(properties))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{oneshot, Mutex as AsyncMutex};

    use super::*;
    use crate::codec::BytesCodec;
    use crate::facade::test_support::{build, TestPubSub};
    use crate::types::{Binding, SubscribeOptions};

    fn raw_message(topic: &str, payload: &'static [u8], subscription_id: usize) -> RawMessage {
        RawMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload),
            qos: QoS::AtMostOnce,
            retain: false,
            mid: 0,
            properties: Some(PublishProperties {
                subscription_identifiers: vec![subscription_id],
                ..PublishProperties::default()
            }),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_the_bound_handler() {
        let (facade, subscription_manager, _raw_rx) =
            build::<Bytes>(Arc::new(BytesCodec), Arc::new(BytesCodec));

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(AsyncMutex::new(Some(tx)));
        let handler: Handler<Bytes, TestPubSub> = Arc::new(move |message| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(message.topic.clone());
                }
                None
            })
        });
        let identified = subscription_manager
            .subscribe(Binding::new("a/b".to_string(), handler, SubscribeOptions::default()))
            .await
            .unwrap();

        let message_handler =
            MessageHandler::new(subscription_manager.clone(), Arc::new(BytesCodec), Arc::new(BytesCodec));
        let (msg_tx, msg_rx) = mpsc::channel(1);
        msg_tx
            .send(raw_message("a/b", b"hi", identified.subscription_id as usize))
            .await
            .unwrap();
        drop(msg_tx);

        message_handler.run(msg_rx, Arc::downgrade(&facade)).await;

        let topic = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(topic, "a/b");
    }

    #[tokio::test]
    async fn dispatch_drops_messages_with_unknown_subscription_id() {
        let (facade, subscription_manager, _raw_rx) =
            build::<Bytes>(Arc::new(BytesCodec), Arc::new(BytesCodec));

        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        let handler: Handler<Bytes, TestPubSub> = Arc::new(move |_message| {
            let invoked = invoked_clone.clone();
            Box::pin(async move {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                None
            })
        });
        subscription_manager
            .subscribe(Binding::new("a/b".to_string(), handler, SubscribeOptions::default()))
            .await
            .unwrap();

        let message_handler =
            MessageHandler::new(subscription_manager.clone(), Arc::new(BytesCodec), Arc::new(BytesCodec));
        let (msg_tx, msg_rx) = mpsc::channel(1);
        // Subscription id 99 was never allocated.
        msg_tx.send(raw_message("a/b", b"hi", 99)).await.unwrap();
        drop(msg_tx);

        message_handler.run(msg_rx, Arc::downgrade(&facade)).await;

        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }
}
