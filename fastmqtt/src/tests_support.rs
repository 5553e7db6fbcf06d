// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! A no-op MQTT client double shared by this crate's unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use fastmqtt_transport::control_packet::{
    Publish, PublishProperties, QoS, SubscribeProperties, UnsubscribeProperties,
};
use fastmqtt_transport::error::{ClientError, ConnectionError};
use fastmqtt_transport::interface::{
    CompletionToken, Event, MqttAck, MqttDisconnect, MqttEventLoop, MqttPubSub,
};

#[derive(Clone, Default)]
pub(crate) struct NoopPubSub;

fn completed() -> CompletionToken {
    CompletionToken(Box::new(async { Ok(()) }))
}

#[async_trait]
impl MqttPubSub for NoopPubSub {
    async fn publish(
        &self,
        _topic: impl Into<String> + Send,
        _qos: QoS,
        _retain: bool,
        _payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, ClientError> {
        Ok(completed())
    }

    async fn publish_with_properties(
        &self,
        _topic: impl Into<String> + Send,
        _qos: QoS,
        _retain: bool,
        _payload: impl Into<Bytes> + Send,
        _properties: PublishProperties,
    ) -> Result<CompletionToken, ClientError> {
        Ok(completed())
    }

    async fn subscribe(
        &self,
        _topic: impl Into<String> + Send,
        _qos: QoS,
    ) -> Result<CompletionToken, ClientError> {
        Ok(completed())
    }

    async fn subscribe_with_properties(
        &self,
        _topic: impl Into<String> + Send,
        _qos: QoS,
        _properties: SubscribeProperties,
    ) -> Result<CompletionToken, ClientError> {
        Ok(completed())
    }

    async fn unsubscribe(
        &self,
        _topic: impl Into<String> + Send,
    ) -> Result<CompletionToken, ClientError> {
        Ok(completed())
    }

    async fn unsubscribe_with_properties(
        &self,
        _topic: impl Into<String> + Send,
        _properties: UnsubscribeProperties,
    ) -> Result<CompletionToken, ClientError> {
        Ok(completed())
    }
}

#[async_trait]
impl MqttAck for NoopPubSub {
    async fn ack(&self, _publish: &Publish) -> Result<(), ClientError> {
        Ok(())
    }
}

#[async_trait]
impl MqttDisconnect for NoopPubSub {
    async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// An event loop double that never yields: the unit tests in this crate never
/// drive a `Session::run`, so nothing ever polls it.
#[derive(Default)]
pub(crate) struct NoopEventLoop;

#[async_trait]
impl MqttEventLoop for NoopEventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        futures::future::pending().await
    }

    fn set_clean_start(&mut self, _clean_start: bool) {}
}
