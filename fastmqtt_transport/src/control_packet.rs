// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Thin re-exports of the underlying MQTT v5 wire types. Kept in one place so
//! the rest of the crate (and `fastmqtt` above it) never takes a direct
//! dependency on `rumqttc`.

/// Quality of Service
pub type QoS = rumqttc::v5::mqttbytes::QoS;

/// PUBLISH packet
pub type Publish = rumqttc::v5::mqttbytes::v5::Publish;

/// Last Will and Testament
pub type LastWill = rumqttc::v5::mqttbytes::v5::LastWill;
/// Properties for a CONNECT packet
pub type ConnectProperties = rumqttc::v5::mqttbytes::v5::ConnectProperties;
/// Properties for a PUBLISH packet
pub type PublishProperties = rumqttc::v5::mqttbytes::v5::PublishProperties;
/// Properties for a SUBSCRIBE packet
pub type SubscribeProperties = rumqttc::v5::mqttbytes::v5::SubscribeProperties;
/// Properties for a UNSUBSCRIBE packet
pub type UnsubscribeProperties = rumqttc::v5::mqttbytes::v5::UnsubscribeProperties;
/// Filter + per-subscription options for a SUBSCRIBE packet
pub type SubscribeFilter = rumqttc::v5::mqttbytes::v5::SubscribeFilter;
/// `RetainHandling` as understood by the wire codec
pub type RetainForwardRule = rumqttc::v5::mqttbytes::v5::RetainForwardRule;

#[cfg(test)]
pub type PubAck = rumqttc::v5::mqttbytes::v5::PubAck;
