// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! The transport-level inbound message type: the one structure the connector
//! ever hands upward. Properties stay in their wire-native shape; higher
//! layers convert what they need.

use bytes::Bytes;

use crate::control_packet::{Publish, PublishProperties, QoS};

/// A transport-level inbound PUBLISH, stripped of everything session-internal.
///
/// The connector never interprets `properties` beyond copying them across;
/// subscription demultiplexing and reply correlation are a higher layer's job.
#[derive(Clone, Debug)]
pub struct RawMessage {
    /// The topic the message was published to.
    pub topic: String,
    /// The raw, still-encoded payload.
    pub payload: Bytes,
    /// Quality of Service the message was delivered at.
    pub qos: QoS,
    /// Whether the broker delivered this as a retained message.
    pub retain: bool,
    /// Packet identifier (0 for QoS 0 publishes).
    pub mid: u16,
    /// PUBLISH properties, including (when present) the Subscription Identifier(s).
    pub properties: Option<PublishProperties>,
}

impl From<Publish> for RawMessage {
    fn from(publish: Publish) -> Self {
        RawMessage {
            topic: String::from_utf8_lossy(&publish.topic).into_owned(),
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            mid: publish.pkid,
            properties: publish.properties,
        }
    }
}
