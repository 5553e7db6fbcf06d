// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Adapter layer for the `rumqttc` crate: the one place this crate knows
//! about the concrete wire client it wraps.

use std::{
    fmt,
    fs::File,
    io::BufReader,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    self,
    tokio_rustls::rustls::{ClientConfig, RootCertStore},
    Transport,
};
use thiserror::Error;

use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::{Publish, PublishProperties, QoS, SubscribeProperties, UnsubscribeProperties};
use crate::error::{ClientError, ConnectionError};
use crate::interface::{CompletionToken, Event, MqttAck, MqttDisconnect, MqttEventLoop, MqttPubSub};

pub type ClientAlias = rumqttc::v5::AsyncClient;
pub type EventLoopAlias = rumqttc::v5::EventLoop;

#[async_trait]
impl MqttPubSub for rumqttc::v5::AsyncClient {
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
    ) -> Result<CompletionToken, ClientError> {
        let nf = self.publish(topic, qos, retain, payload).await?;
        Ok(CompletionToken(Box::new(nf.wait_async())))
    }

    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes> + Send,
        properties: PublishProperties,
    ) -> Result<CompletionToken, ClientError> {
        let nf = self
            .publish_with_properties(topic, qos, retain, payload, properties)
            .await?;
        Ok(CompletionToken(Box::new(nf.wait_async())))
    }

    async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
    ) -> Result<CompletionToken, ClientError> {
        let nf = self.subscribe(topic, qos).await?;
        Ok(CompletionToken(Box::new(nf.wait_async())))
    }

    async fn subscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        properties: SubscribeProperties,
    ) -> Result<CompletionToken, ClientError> {
        let nf = self
            .subscribe_with_properties(topic, qos, properties)
            .await?;
        Ok(CompletionToken(Box::new(nf.wait_async())))
    }

    async fn unsubscribe(
        &self,
        topic: impl Into<String> + Send,
    ) -> Result<CompletionToken, ClientError> {
        let nf = self.unsubscribe(topic).await?;
        Ok(CompletionToken(Box::new(nf.wait_async())))
    }

    async fn unsubscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        properties: UnsubscribeProperties,
    ) -> Result<CompletionToken, ClientError> {
        let nf = self.unsubscribe_with_properties(topic, properties).await?;
        Ok(CompletionToken(Box::new(nf.wait_async())))
    }
}

#[async_trait]
impl MqttAck for rumqttc::v5::AsyncClient {
    async fn ack(&self, publish: &Publish) -> Result<(), ClientError> {
        Ok(self.ack(publish).await?)
    }
}

#[async_trait]
impl MqttDisconnect for rumqttc::v5::AsyncClient {
    async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(self.disconnect().await?)
    }
}

#[async_trait]
impl MqttEventLoop for rumqttc::v5::EventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        self.poll().await
    }

    fn set_clean_start(&mut self, clean_start: bool) {
        self.options.set_clean_start(clean_start);
    }
}

/// Build a connected (client, event loop) pair from [`MqttConnectionSettings`].
///
/// # Errors
/// Returns [`ConnectionSettingsAdapterError`] if the settings cannot be translated
/// into valid options for the underlying wire client (e.g. an unreadable TLS file).
pub fn client(
    connection_settings: MqttConnectionSettings,
    channel_capacity: usize,
    manual_ack: bool,
) -> Result<(rumqttc::v5::AsyncClient, rumqttc::v5::EventLoop), ConnectionSettingsAdapterError> {
    let mut mqtt_options: rumqttc::v5::MqttOptions = connection_settings.try_into()?;
    mqtt_options.set_manual_acks(manual_ack);
    Ok(rumqttc::v5::AsyncClient::new(mqtt_options, channel_capacity))
}

/// Error translating [`MqttConnectionSettings`] into wire-client options.
#[derive(Error, Debug)]
#[error("{msg}: {field}")]
pub struct ConnectionSettingsAdapterError {
    msg: String,
    field: ConnectionSettingsField,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Which connection-settings field a [`ConnectionSettingsAdapterError`] originated from.
#[derive(Debug)]
pub enum ConnectionSettingsField {
    SessionExpiry,
    PasswordFile,
    UseTls,
}

impl fmt::Display for ConnectionSettingsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionSettingsField::SessionExpiry => write!(f, "session expiry"),
            ConnectionSettingsField::PasswordFile => write!(f, "password file"),
            ConnectionSettingsField::UseTls => write!(f, "use_tls"),
        }
    }
}

impl TryFrom<MqttConnectionSettings> for rumqttc::v5::MqttOptions {
    type Error = ConnectionSettingsAdapterError;

    fn try_from(value: MqttConnectionSettings) -> Result<Self, Self::Error> {
        let mut mqtt_options =
            rumqttc::v5::MqttOptions::new(value.client_id.clone(), value.hostname, value.tcp_port);
        mqtt_options.set_keep_alive(value.keep_alive);
        mqtt_options.set_inflight(value.receive_max);

        match u32::try_from(value.session_expiry.as_secs()) {
            Ok(se) if se >= 5 => {
                mqtt_options.set_session_expiry_interval(Some(se));
            }
            _ => {
                return Err(ConnectionSettingsAdapterError {
                    msg: "session expiry must be expressible as a u32 of at least 5 seconds".into(),
                    field: ConnectionSettingsField::SessionExpiry,
                    source: None,
                });
            }
        }

        mqtt_options.set_connection_timeout(value.connection_timeout.as_secs());
        // The initial CONNECT always uses the attempt-0 flag; subsequent reconnects are
        // adjusted in-place by the Session loop via `MqttEventLoop::set_clean_start`.
        mqtt_options.set_clean_start(value.clean_start.flag_for_attempt(0));

        if let Some(username) = value.username {
            let password = match value.password_file {
                Some(password_file) => std::fs::read_to_string(&password_file).map_err(|e| {
                    ConnectionSettingsAdapterError {
                        msg: "cannot read password file".into(),
                        field: ConnectionSettingsField::PasswordFile,
                        source: Some(Box::new(e)),
                    }
                })?,
                None => value.password.unwrap_or_default(),
            };
            mqtt_options.set_credentials(username, password);
        }

        if value.use_tls {
            let config =
                tls_config(value.ca_file, value.cert_file, value.key_file).map_err(|e| {
                    ConnectionSettingsAdapterError {
                        msg: "tls config error".into(),
                        field: ConnectionSettingsField::UseTls,
                        source: Some(e.into()),
                    }
                })?;
            mqtt_options.set_transport(Transport::tls_with_config(
                rumqttc::TlsConfiguration::Rustls(Arc::new(config)),
            ));
        }

        Ok(mqtt_options)
    }
}

fn tls_config(
    ca_file: Option<String>,
    cert_file: Option<String>,
    key_file: Option<String>,
) -> Result<ClientConfig, anyhow::Error> {
    let config_builder = match ca_file {
        Some(ca_file) => {
            let mut root_cert_store = RootCertStore::empty();
            let fh = File::open(ca_file)?;
            let certs =
                rustls_pemfile::certs(&mut BufReader::new(fh)).collect::<Result<Vec<_>, _>>()?;
            root_cert_store.add_parsable_certificates(certs);
            rumqttc::tokio_rustls::rustls::ClientConfig::builder()
                .with_root_certificates(root_cert_store)
        }
        None => {
            let mut root_cert_store = RootCertStore::empty();
            for cert in rustls_native_certs::load_native_certs()? {
                root_cert_store.add(cert)?;
            }
            rumqttc::tokio_rustls::rustls::ClientConfig::builder()
                .with_root_certificates(root_cert_store)
        }
    };

    let config = match (cert_file, key_file) {
        (Some(cert_file), Some(key_file)) => {
            let fh = File::open(cert_file)?;
            let certs = rustls_pemfile::certs(&mut BufReader::new(fh)).collect::<Result<Vec<_>, _>>()?;
            anyhow::ensure!(!certs.is_empty(), "no valid client cert in cert file chain");

            let fh = File::open(key_file)?;
            let mut key_reader = BufReader::new(fh);
            let key = rustls_pemfile::private_key(&mut key_reader)?
                .ok_or_else(|| anyhow::anyhow!("no valid client key in key file"))?;

            config_builder.with_client_auth_cert(certs, key)?
        }
        _ => config_builder.with_no_client_auth(),
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use crate::MqttConnectionSettingsBuilder;

    #[test]
    fn mqtt_options_conversion_succeeds_without_tls() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id")
            .hostname("test_host")
            .use_tls(false)
            .build()
            .unwrap();
        let mqtt_options_result: Result<rumqttc::v5::MqttOptions, _> = connection_settings.try_into();
        assert!(mqtt_options_result.is_ok());
    }

    #[test]
    fn mqtt_options_conversion_rejects_short_session_expiry() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id")
            .hostname("test_host")
            .use_tls(false)
            .session_expiry(std::time::Duration::from_secs(1))
            .build()
            .unwrap();
        let mqtt_options_result: Result<rumqttc::v5::MqttOptions, _> = connection_settings.try_into();
        assert!(mqtt_options_result.is_err());
    }
}
