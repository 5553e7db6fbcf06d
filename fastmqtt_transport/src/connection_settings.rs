// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Connection settings for an MQTT session.

use std::env::{self, VarError};
use std::time::Duration;

/// Clean-start policy applied across reconnects.
///
/// `FIRST_ONLY` sets clean-start on the very first CONNECT and clears it on
/// every subsequent reconnect attempt, preserving the broker-side session
/// across transient network faults.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CleanStart {
    /// Never request a clean start; always resume the prior session.
    No,
    /// Always request a clean start, including on reconnect.
    Always,
    /// Request a clean start only for the first CONNECT of the session.
    #[default]
    FirstOnly,
}

impl CleanStart {
    /// The clean-start flag to set for a CONNECT at the given attempt index
    /// (0 = initial connection, 1.. = subsequent reconnects).
    #[must_use]
    pub fn flag_for_attempt(self, attempt: u32) -> bool {
        match self {
            CleanStart::No => false,
            CleanStart::Always => true,
            CleanStart::FirstOnly => attempt == 0,
        }
    }
}

/// All the settings required to establish an MQTT connection.
#[derive(Builder, Clone)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier. Auto-generated if left empty and `clean_start != No`.
    pub(crate) client_id: String,
    /// FQDN or IP of the host to connect to
    pub(crate) hostname: String,
    /// TCP port to connect to the host on
    #[builder(default = "8883")]
    pub(crate) tcp_port: u16,
    /// Max time between communications
    #[builder(default = "Duration::from_secs(60)")]
    pub(crate) keep_alive: Duration,
    /// Max number of in-flight Quality of Service 1 and 2 messages
    #[builder(default = "u16::MAX")] // See: MQTT 5.0 spec, 3.1.2.11.3
    pub(crate) receive_max: u16,
    /// Session Expiry Interval
    #[builder(default = "Duration::from_secs(3600)")]
    pub(crate) session_expiry: Duration,
    /// Connection timeout
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) connection_timeout: Duration,
    /// Clean start policy across the lifetime of the session
    #[builder(default)]
    pub(crate) clean_start: CleanStart,
    /// Username for MQTT
    #[builder(default = "None")]
    pub(crate) username: Option<String>,
    /// Password for MQTT
    #[builder(default = "None")]
    pub(crate) password: Option<String>,
    /// Path to a file containing the MQTT password
    #[builder(default = "None")]
    pub(crate) password_file: Option<String>,
    /// TLS negotiation enabled
    #[builder(default = "true")]
    pub(crate) use_tls: bool,
    /// Path to a PEM file used to validate server identity, in addition to the
    /// platform's native trust store. If unset, only the native trust store is used.
    #[builder(default = "None")]
    pub(crate) ca_file: Option<String>,
    /// Path to a PEM file used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) cert_file: Option<String>,
    /// Path to a file containing the key used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) key_file: Option<String>,
}

impl MqttConnectionSettingsBuilder {
    /// Initialize the [`MqttConnectionSettingsBuilder`] from environment variables.
    ///
    /// # Errors
    /// Returns a `String` describing the error if any of the environment variables are invalid.
    pub fn from_environment() -> Result<Self, String> {
        let client_id = string_from_environment("FASTMQTT_CLIENT_ID")?;
        let hostname = string_from_environment("FASTMQTT_HOSTNAME")?;
        let tcp_port = string_from_environment("FASTMQTT_TCP_PORT")?
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| format!("FASTMQTT_TCP_PORT: {e}"))?;
        let keep_alive = string_from_environment("FASTMQTT_KEEP_ALIVE")?
            .map(|v| v.parse::<u32>().map(u64::from).map(Duration::from_secs))
            .transpose()
            .map_err(|e| format!("FASTMQTT_KEEP_ALIVE: {e}"))?;
        let session_expiry = string_from_environment("FASTMQTT_SESSION_EXPIRY")?
            .map(|v| v.parse::<u32>().map(u64::from).map(Duration::from_secs))
            .transpose()
            .map_err(|e| format!("FASTMQTT_SESSION_EXPIRY: {e}"))?;
        let username = string_from_environment("FASTMQTT_USERNAME")?;
        let password_file = string_from_environment("FASTMQTT_PASSWORD_FILE")?;
        let use_tls = string_from_environment("FASTMQTT_USE_TLS")?
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| format!("FASTMQTT_USE_TLS: {e}"))?;
        let ca_file = string_from_environment("FASTMQTT_TLS_CA_FILE")?;
        let cert_file = string_from_environment("FASTMQTT_TLS_CERT_FILE")?;
        let key_file = string_from_environment("FASTMQTT_TLS_KEY_FILE")?;

        // Log warnings if required values are missing. Do not error here:
        // it is valid to have empty values if the user overrides them later,
        // but it likely suggests a misconfiguration.
        if client_id.is_none() {
            log::warn!("FASTMQTT_CLIENT_ID is not set in environment");
        }
        if hostname.is_none() {
            log::warn!("FASTMQTT_HOSTNAME is not set in environment");
        }

        Ok(Self {
            client_id,
            hostname,
            tcp_port,
            keep_alive,
            receive_max: Some(u16::MAX),
            session_expiry,
            connection_timeout: Some(Duration::from_secs(30)),
            clean_start: None,
            username,
            password: None,
            password_file,
            use_tls,
            ca_file,
            cert_file,
            key_file,
        })
    }

    /// Validate the MQTT Connection Settings.
    ///
    /// # Errors
    /// Returns a `String` describing the error if
    /// - `hostname` is empty
    /// - `client_id` is empty and `clean_start` is `No`
    /// - `password` and `password_file` are both set
    /// - `key_file` is set and `cert_file` is not (or vice versa)
    fn validate(&self) -> Result<(), String> {
        if let Some(hostname) = &self.hostname {
            if hostname.is_empty() {
                return Err("Host name cannot be empty".to_string());
            }
        }
        if let Some(client_id) = &self.client_id {
            let clean_start = self.clean_start.unwrap_or_default();
            if client_id.is_empty() && clean_start == CleanStart::No {
                return Err("client_id is mandatory when clean_start is set to No".to_string());
            }
        }
        if let (Some(Some(_)), Some(Some(_))) = (&self.password, &self.password_file) {
            return Err("password and password_file should not be used at the same time.".to_string());
        }
        match (&self.key_file, &self.cert_file) {
            (Some(Some(key_file)), Some(Some(cert_file))) => {
                if key_file.is_empty() || cert_file.is_empty() {
                    return Err("key_file and cert_file need to be provided together.".to_string());
                }
            }
            (Some(Some(_)), _) | (_, Some(Some(_))) => {
                return Err("key_file and cert_file need to be provided together.".to_string());
            }
            _ => {}
        }
        Ok(())
    }
}

/// Helper function to get an environment variable as a string.
fn string_from_environment(key: &str) -> Result<Option<String>, String> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => {
            Err("Could not parse non-unicode environment variable".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_start_first_only_only_sets_flag_on_first_attempt() {
        let policy = CleanStart::FirstOnly;
        assert!(policy.flag_for_attempt(0));
        assert!(!policy.flag_for_attempt(1));
        assert!(!policy.flag_for_attempt(100));
    }

    #[test]
    fn clean_start_always_sets_flag_on_every_attempt() {
        let policy = CleanStart::Always;
        assert!(policy.flag_for_attempt(0));
        assert!(policy.flag_for_attempt(5));
    }

    #[test]
    fn clean_start_no_never_sets_flag() {
        let policy = CleanStart::No;
        assert!(!policy.flag_for_attempt(0));
        assert!(!policy.flag_for_attempt(5));
    }

    #[test]
    fn builder_requires_client_id_unless_clean_start() {
        let err = MqttConnectionSettingsBuilder::default()
            .client_id("")
            .hostname("broker.example.com")
            .clean_start(CleanStart::No)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn builder_allows_empty_client_id_with_clean_start_always() {
        let settings = MqttConnectionSettingsBuilder::default()
            .client_id("")
            .hostname("broker.example.com")
            .clean_start(CleanStart::Always)
            .build()
            .unwrap();
        assert_eq!(settings.client_id, "");
    }

    #[test]
    fn builder_rejects_password_and_password_file_together() {
        let err = MqttConnectionSettingsBuilder::default()
            .client_id("c")
            .hostname("broker.example.com")
            .password("hunter2")
            .password_file("/etc/secret")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("password"));
    }
}
