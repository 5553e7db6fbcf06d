// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! MQTT version 5.0 transport connector: owns the session, reconnects with
//! backoff, and exposes publish/subscribe/unsubscribe plus a raw inbound
//! message stream to the higher-level `fastmqtt` crate.

pub use crate::connection_settings::{
    CleanStart, MqttConnectionSettings, MqttConnectionSettingsBuilder,
    MqttConnectionSettingsBuilderError,
};
pub use crate::raw_message::RawMessage;
pub use crate::rumqttc_adapter::{
    client as connect_rumqttc, ClientAlias, ConnectionSettingsAdapterError, EventLoopAlias,
};

mod connection_settings;
pub mod control_packet;
pub mod error;
pub mod interface;
pub mod raw_message;
pub mod session;
pub mod topic;

mod rumqttc_adapter;

#[macro_use]
extern crate derive_builder;
