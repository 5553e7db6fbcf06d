// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! The thin façade tying the router, subscription manager, message handler,
//! and response context together behind one client handle.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fastmqtt_transport::control_packet::{PublishProperties, QoS};
use fastmqtt_transport::error::{ClientError, ClientErrorKind, SessionExitError};
use fastmqtt_transport::interface::{MqttDisconnect, MqttPubSub};
use fastmqtt_transport::session::reconnect_policy::ExponentialBackoffWithJitter;
use fastmqtt_transport::session::{Session, SessionConnectionMonitor, SessionExitHandle, SessionManagedClient};
use fastmqtt_transport::{
    connect_rumqttc, CleanStart, ClientAlias, MqttConnectionSettingsBuilder,
};
use log::{error, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::codec::{PayloadDecoder, PayloadEncoder};
use crate::error::{FastMqttError, FastMqttErrorKind};
use crate::message_handler::MessageHandler;
use crate::response::ResponseContext;
use crate::router::Router;
use crate::subscription_manager::SubscriptionManager;
use crate::types::{Binding, Handler, IdentifiedBinding, SubscribeOptions};

const DEFAULT_RAW_MESSAGE_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The transport client [`FastMqttBuilder::connect`] wires up by default: one
/// session-managed handle over the `rumqttc` v5 client.
pub type DefaultPubSub = SessionManagedClient<ClientAlias>;

/// A pluggable-codec, subscription-demultiplexing MQTT v5 client.
///
/// Generic over the application payload type `T` (see [`crate::codec`]) and the
/// concrete transport pub/sub handle `PS`, so tests can substitute a double for
/// the real `rumqttc`-backed transport `FastMqttBuilder::connect` constructs.
pub struct FastMqtt<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    client_id: String,
    pub_sub: PS,
    subscription_manager: Arc<SubscriptionManager<T, PS>>,
    encoder: Arc<dyn PayloadEncoder<T>>,
    decoder: Arc<dyn PayloadDecoder<T>>,
    state: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    exit_controller: Arc<dyn ExitController>,
    connection_monitor: SessionConnectionMonitor,
    response_default_timeout: Duration,
    default_subscribe_options: SubscribeOptions,
}

impl<T, PS> FastMqtt<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    /// The client identifier in use for the underlying session.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether the underlying session is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_monitor.is_connected()
    }

    /// Wait until the session is connected. Returns immediately if already connected.
    pub async fn wait_connected(&self) {
        self.connection_monitor.connected().await;
    }

    /// Wait until the session is disconnected. Returns immediately if already disconnected.
    pub async fn wait_disconnected(&self) {
        self.connection_monitor.disconnected().await;
    }

    /// Wait for the next reconnect pulse: a transient signal fired once per
    /// successful reconnect (not the initial connect).
    pub async fn wait_reconnected(&self) {
        self.connection_monitor.reconnected().await;
    }

    /// Encode `payload` and publish it to `topic`.
    ///
    /// # Errors
    /// Propagates any error from the underlying transport publish.
    pub async fn publish(
        &self,
        topic: impl Into<String> + Send,
        payload: T,
        qos: QoS,
        retain: bool,
        properties: Option<PublishProperties>,
    ) -> Result<(), FastMqttError> {
        let payload = self.encoder.encode(payload);
        self.publish_raw(topic, qos, retain, payload, properties).await
    }

    /// Publish already-encoded bytes, bypassing the configured encoder. Used internally
    /// by the message handler to emit replies and by [`ResponseContext`] to issue requests
    /// that attach request/reply properties.
    pub(crate) async fn publish_raw(
        &self,
        topic: impl Into<String> + Send,
        qos: QoS,
        retain: bool,
        payload: Bytes,
        properties: Option<PublishProperties>,
    ) -> Result<(), FastMqttError> {
        let completion = match properties {
            Some(properties) => {
                self.pub_sub
                    .publish_with_properties(topic, qos, retain, payload, properties)
                    .await?
            }
            None => self.pub_sub.publish(topic, qos, retain, payload).await?,
        };
        completion
            .await
            .map_err(|e| FastMqttError::from(transport_detached(e)))?;
        Ok(())
    }

    /// Register a single ad hoc subscription outside the static router, allocating a
    /// Subscription Identifier and issuing the transport SUBSCRIBE immediately.
    ///
    /// # Errors
    /// As [`SubscriptionManager::subscribe`].
    pub async fn subscribe(
        &self,
        handler: Handler<T, PS>,
        filter: impl Into<String>,
        options: SubscribeOptions,
    ) -> Result<IdentifiedBinding<T, PS>, FastMqttError> {
        let binding = Binding::new(filter.into(), handler, options);
        self.subscription_manager.subscribe(binding).await
    }

    /// As [`Self::subscribe`], using the options configured on
    /// [`FastMqttBuilder::default_subscribe_options`].
    ///
    /// # Errors
    /// As [`Self::subscribe`].
    pub async fn subscribe_default(
        &self,
        handler: Handler<T, PS>,
        filter: impl Into<String>,
    ) -> Result<IdentifiedBinding<T, PS>, FastMqttError> {
        self.subscribe(handler, filter, self.default_subscribe_options).await
    }

    /// Remove a subscription (or one handler of it) previously returned by [`Self::subscribe`].
    ///
    /// # Errors
    /// As [`SubscriptionManager::unsubscribe`].
    pub async fn unsubscribe(
        &self,
        id: u32,
        handler: Option<&Handler<T, PS>>,
    ) -> Result<(), FastMqttError> {
        self.subscription_manager.unsubscribe(id, handler).await
    }

    /// Build a request/reply facility bound to `response_topic`. Call
    /// [`ResponseContext::open`] before issuing requests through it.
    pub fn response_context(
        self: &Arc<Self>,
        response_topic: impl Into<String>,
        qos: QoS,
        default_timeout: Option<Duration>,
    ) -> ResponseContext<T, PS> {
        ResponseContext::new(
            self.clone(),
            self.subscription_manager.clone(),
            response_topic,
            qos,
            default_timeout.or(Some(self.response_default_timeout)),
        )
    }

    /// Store a value in the per-client state bag, keyed by `key`.
    pub async fn set_state<V: Send + Sync + 'static>(&self, key: impl Into<String>, value: V) {
        self.state.lock().await.insert(key.into(), Box::new(value));
    }

    /// Retrieve a clone of a value previously stored in the state bag, if present and if it
    /// was stored as `V`.
    pub async fn get_state<V: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<V> {
        self.state
            .lock()
            .await
            .get(key)
            .and_then(|v| v.downcast_ref::<V>())
            .cloned()
    }

    /// Remove a value from the state bag. Returns whether a value was present.
    pub async fn remove_state(&self, key: &str) -> bool {
        self.state.lock().await.remove(key).is_some()
    }

    /// Gracefully end the session, waiting for the broker to acknowledge the disconnect.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::Disconnected`] if the broker cannot be reached to
    /// negotiate the disconnect, or the underlying disconnect call fails.
    pub async fn disconnect(&self) -> Result<(), FastMqttError> {
        self.exit_controller.try_exit().await.map_err(exit_error)
    }

    /// As [`Self::disconnect`], but fails if the broker does not acknowledge within `timeout`.
    ///
    /// # Errors
    /// As [`Self::disconnect`], plus a timeout.
    pub async fn disconnect_timeout(&self, timeout: Duration) -> Result<(), FastMqttError> {
        self.exit_controller
            .try_exit_timeout(timeout)
            .await
            .map_err(exit_error)
    }
}

fn exit_error(e: SessionExitError) -> FastMqttError {
    FastMqttErrorKind::TransportFault(ClientError::new(ClientErrorKind::Detached(e.to_string()))).into()
}

fn transport_detached(e: fastmqtt_transport::error::CompletionError) -> ClientError {
    ClientError::new(ClientErrorKind::Detached(e.to_string()))
}

/// Object-safe view over a [`SessionExitHandle`], erasing its disconnector type so
/// [`FastMqtt`] does not need a third generic parameter for it.
#[async_trait]
trait ExitController: Send + Sync {
    async fn try_exit(&self) -> Result<(), SessionExitError>;
    async fn try_exit_timeout(&self, timeout: Duration) -> Result<(), SessionExitError>;
    async fn exit_force(&self) -> bool;
}

#[async_trait]
impl<D> ExitController for SessionExitHandle<D>
where
    D: MqttDisconnect + Clone + Send + Sync + 'static,
{
    async fn try_exit(&self) -> Result<(), SessionExitError> {
        SessionExitHandle::try_exit(self).await
    }

    async fn try_exit_timeout(&self, timeout: Duration) -> Result<(), SessionExitError> {
        SessionExitHandle::try_exit_timeout(self, timeout).await
    }

    async fn exit_force(&self) -> bool {
        SessionExitHandle::exit_force(self).await
    }
}

/// A scoped acquisition guard: holds an already-connected [`FastMqtt`] and makes a
/// best-effort attempt to end its session when dropped.
///
/// Rust has no asynchronous `Drop`, so the drop-time exit cannot wait on the broker's
/// acknowledgement; it spawns a background forced-exit with a grace period instead.
/// Prefer [`FastMqttGuard::close`] for a graceful, awaited disconnect.
pub struct FastMqttGuard<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    facade: Option<Arc<FastMqtt<T, PS>>>,
}

impl<T, PS> FastMqttGuard<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    pub(crate) fn new(facade: Arc<FastMqtt<T, PS>>) -> Self {
        Self { facade: Some(facade) }
    }

    /// The guarded client handle.
    #[must_use]
    pub fn client(&self) -> &Arc<FastMqtt<T, PS>> {
        self.facade.as_ref().expect("FastMqttGuard used after close")
    }

    /// Gracefully end the session and consume the guard, skipping the drop-time fallback.
    ///
    /// # Errors
    /// As [`FastMqtt::disconnect`].
    pub async fn close(mut self) -> Result<(), FastMqttError> {
        if let Some(facade) = self.facade.take() {
            facade.disconnect().await?;
        }
        Ok(())
    }
}

impl<T, PS> Drop for FastMqttGuard<T, PS>
where
    T: Send + Sync + 'static,
    PS: MqttPubSub + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(facade) = self.facade.take() {
            tokio::spawn(async move {
                if !facade.exit_controller.exit_force().await {
                    warn!(
                        "FastMqttGuard dropped without an explicit close(); force-exited session for {}",
                        facade.client_id
                    );
                }
            });
        }
    }
}

/// Builds and connects a [`FastMqtt`] client over the default `rumqttc`-backed transport.
///
/// # Example
/// ```
/// use fastmqtt::codec::BytesCodec;
/// use fastmqtt::FastMqttBuilder;
///
/// # tokio_test::block_on(async {
/// let builder = FastMqttBuilder::<bytes::Bytes>::new()
///     .hostname("localhost")
///     .port(1883)
///     .payload_encoder(BytesCodec)
///     .payload_decoder(BytesCodec);
/// // let client = builder.connect().await?;
/// # let _ = builder;
/// # })
/// ```
pub struct FastMqttBuilder<T>
where
    T: Send + Sync + 'static,
{
    hostname: Option<String>,
    tcp_port: u16,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    keep_alive: Duration,
    session_expiry: Duration,
    receive_max: Option<u16>,
    clean_start: CleanStart,
    use_tls: bool,
    ca_file: Option<String>,
    cert_file: Option<String>,
    key_file: Option<String>,
    connect_timeout: Duration,
    default_subscribe_options: SubscribeOptions,
    response_default_timeout: Duration,
    encoder: Option<Arc<dyn PayloadEncoder<T>>>,
    decoder: Option<Arc<dyn PayloadDecoder<T>>>,
    routers: Vec<Router<T, DefaultPubSub>>,
}

impl<T> Default for FastMqttBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            hostname: None,
            tcp_port: 8883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            session_expiry: Duration::from_secs(3600),
            receive_max: None,
            clean_start: CleanStart::default(),
            use_tls: true,
            ca_file: None,
            cert_file: None,
            key_file: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            default_subscribe_options: SubscribeOptions::default(),
            response_default_timeout: crate::response::DEFAULT_TIMEOUT,
            encoder: None,
            decoder: None,
            routers: Vec::new(),
        }
    }
}

impl<T> FastMqttBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Start a new builder. `payload_encoder`/`payload_decoder` must be supplied before
    /// [`Self::connect`]; everything else has a default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker hostname or IP address. Required.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Broker TCP port. Defaults to 8883.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// MQTT client identifier. Auto-generated (`uuid` v4) if left unset.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Username for MQTT authentication.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Password for MQTT authentication.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Keep-alive interval. Defaults to 60 seconds.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Session Expiry Interval. Defaults to 1 hour; must be at least 5 seconds.
    #[must_use]
    pub fn session_expiry(mut self, session_expiry: Duration) -> Self {
        self.session_expiry = session_expiry;
        self
    }

    /// Receive Maximum: the number of in-flight QoS 1/2 publishes this client admits
    /// from the broker at once. Defaults to `u16::MAX`.
    #[must_use]
    pub fn receive_max(mut self, receive_max: u16) -> Self {
        self.receive_max = Some(receive_max);
        self
    }

    /// Clean-start policy applied across reconnects. Defaults to [`CleanStart::FirstOnly`].
    #[must_use]
    pub fn clean_start(mut self, clean_start: CleanStart) -> Self {
        self.clean_start = clean_start;
        self
    }

    /// MQTT v5 Will message and properties, published by the broker if this client
    /// disconnects ungracefully. Not supported by the underlying transport; see
    /// [`Self::proxy`].
    #[must_use]
    pub fn will(self, _will: fastmqtt_transport::control_packet::LastWill) -> Self {
        warn!("Will messages are not supported by this transport and were ignored");
        self
    }

    /// Skip TLS server certificate verification. Not supported by the underlying
    /// transport; see [`Self::proxy`].
    #[must_use]
    pub fn tls_insecure(self, _insecure: bool) -> Self {
        warn!("tls_insecure is not supported by this transport and was ignored");
        self
    }

    /// Extra HTTP headers sent during the WebSocket upgrade. Not supported by the
    /// underlying transport; see [`Self::proxy`].
    #[must_use]
    pub fn websocket_headers(self, _headers: Vec<(String, String)>) -> Self {
        warn!("websocket headers are not supported by this transport and were ignored");
        self
    }

    /// Cap on queued inbound messages awaiting dispatch. Not enforced: the
    /// underlying raw-message channel already applies backpressure by blocking the
    /// session loop, so a second limit would only duplicate it; see [`Self::proxy`].
    #[must_use]
    pub fn max_queued_incoming_messages(self, _limit: usize) -> Self {
        warn!("max_queued_incoming_messages is not enforced by this transport and was ignored");
        self
    }

    /// Cap on queued outbound publishes awaiting transmission. Not supported by the
    /// underlying transport; see [`Self::proxy`].
    #[must_use]
    pub fn max_queued_outgoing_messages(self, _limit: usize) -> Self {
        warn!("max_queued_outgoing_messages is not supported by this transport and was ignored");
        self
    }

    /// Cap on concurrently unacknowledged QoS 1/2 publishes. Use [`Self::receive_max`]
    /// for the broker-facing equivalent; this client-facing cap is not supported by
    /// the underlying transport.
    #[must_use]
    pub fn max_inflight_messages(self, _limit: usize) -> Self {
        warn!("max_inflight_messages is not supported by this transport and was ignored");
        self
    }

    /// Cap on concurrently in-flight `publish`/`subscribe`/`unsubscribe` calls issued
    /// by application code. Not supported by the underlying transport; see
    /// [`Self::proxy`].
    #[must_use]
    pub fn max_concurrent_outgoing_calls(self, _limit: usize) -> Self {
        warn!("max_concurrent_outgoing_calls is not supported by this transport and was ignored");
        self
    }

    /// Whether to negotiate TLS. Defaults to `true`.
    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Path to a PEM file trusted in addition to the platform's native trust store.
    #[must_use]
    pub fn ca_file(mut self, ca_file: impl Into<String>) -> Self {
        self.ca_file = Some(ca_file.into());
        self
    }

    /// Path to a PEM client certificate, for X.509 client authentication.
    #[must_use]
    pub fn cert_file(mut self, cert_file: impl Into<String>) -> Self {
        self.cert_file = Some(cert_file.into());
        self
    }

    /// Path to the private key matching [`Self::cert_file`].
    #[must_use]
    pub fn key_file(mut self, key_file: impl Into<String>) -> Self {
        self.key_file = Some(key_file.into());
        self
    }

    /// How long [`Self::connect`] waits for the initial CONNACK before failing.
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Default options applied to subscriptions that don't specify their own.
    #[must_use]
    pub fn default_subscribe_options(mut self, options: SubscribeOptions) -> Self {
        self.default_subscribe_options = options;
        self
    }

    /// Default timeout applied to [`ResponseContext::request`] calls that don't specify
    /// their own.
    #[must_use]
    pub fn response_default_timeout(mut self, timeout: Duration) -> Self {
        self.response_default_timeout = timeout;
        self
    }

    /// The encoder used to turn handler return values and `publish` payloads into bytes.
    #[must_use]
    pub fn payload_encoder(mut self, encoder: impl PayloadEncoder<T> + 'static) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    /// The decoder used to turn inbound bytes into `T` for [`crate::types::Payload::decode`].
    #[must_use]
    pub fn payload_decoder(mut self, decoder: impl PayloadDecoder<T> + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Merge a router's bindings into those subscribed on [`Self::connect`].
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ConfigError`] if merging `router` conflicts with a
    /// binding already collected by this builder.
    pub fn router(mut self, mut router: Router<T, DefaultPubSub>) -> Result<Self, FastMqttError> {
        match self.routers.first_mut() {
            Some(existing) => existing.include(&mut router)?,
            None => self.routers.push(router),
        }
        Ok(self)
    }

    /// A proxy for outbound connections. Not supported by the underlying transport;
    /// accepted and ignored so callers porting configuration from other clients don't
    /// have to delete the line, but logged so the gap is visible.
    #[must_use]
    pub fn proxy(self, _proxy: impl Into<String>) -> Self {
        warn!("proxy configuration is not supported by this transport and was ignored");
        self
    }

    /// Raw TCP socket options. Not supported by the underlying transport; see [`Self::proxy`].
    #[must_use]
    pub fn socket_options(self) -> Self {
        warn!("socket options are not supported by this transport and were ignored");
        self
    }

    /// Connect over WebSockets instead of raw TCP. Not supported by the underlying
    /// transport; see [`Self::proxy`].
    #[must_use]
    pub fn websocket_path(self, _path: impl Into<String>) -> Self {
        warn!("websocket transport is not supported by this transport and was ignored");
        self
    }

    /// Build the connection settings and connect, spawning the session's event loop and
    /// message dispatch loop as background tasks.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ConfigError`] if required fields (`hostname`,
    /// `payload_encoder`, `payload_decoder`) are missing or invalid, or
    /// [`FastMqttErrorKind::Timeout`] if the broker does not CONNACK within
    /// [`Self::connect_timeout`].
    pub async fn connect(self) -> Result<Arc<FastMqtt<T, DefaultPubSub>>, FastMqttError> {
        let hostname = self.hostname.clone().ok_or_else(|| {
            FastMqttError::from(FastMqttErrorKind::ConfigError("hostname is required".to_string()))
        })?;
        let encoder = self.encoder.clone().ok_or_else(|| {
            FastMqttError::from(FastMqttErrorKind::ConfigError(
                "payload_encoder is required".to_string(),
            ))
        })?;
        let decoder = self.decoder.clone().ok_or_else(|| {
            FastMqttError::from(FastMqttErrorKind::ConfigError(
                "payload_decoder is required".to_string(),
            ))
        })?;

        let client_id = self
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut settings_builder = MqttConnectionSettingsBuilder::default()
            .client_id(client_id.clone())
            .hostname(hostname)
            .tcp_port(self.tcp_port)
            .keep_alive(self.keep_alive)
            .session_expiry(self.session_expiry)
            .clean_start(self.clean_start)
            .use_tls(self.use_tls);
        if let Some(username) = self.username.clone() {
            settings_builder = settings_builder.username(username);
        }
        if let Some(password) = self.password.clone() {
            settings_builder = settings_builder.password(password);
        }
        if let Some(ca_file) = self.ca_file.clone() {
            settings_builder = settings_builder.ca_file(ca_file);
        }
        if let Some(cert_file) = self.cert_file.clone() {
            settings_builder = settings_builder.cert_file(cert_file);
        }
        if let Some(key_file) = self.key_file.clone() {
            settings_builder = settings_builder.key_file(key_file);
        }
        if let Some(receive_max) = self.receive_max {
            settings_builder = settings_builder.receive_max(receive_max);
        }
        let settings = settings_builder
            .build()
            .map_err(|e| FastMqttError::from(FastMqttErrorKind::ConfigError(e.to_string())))?;

        let (client, event_loop) =
            connect_rumqttc(settings, DEFAULT_RAW_MESSAGE_CHANNEL_CAPACITY, false)?;

        let reconnect_policy = Box::new(ExponentialBackoffWithJitter::default());
        let mut session = Session::new(client, event_loop, reconnect_policy, client_id.clone());

        let exit_controller: Arc<dyn ExitController> = Arc::new(session.create_exit_handle());
        let connection_monitor = session.create_connection_monitor();
        let pub_sub = session.create_managed_client();
        let raw_rx = session
            .take_raw_message_receiver()
            .expect("raw message receiver taken exactly once, at connect time");

        let subscription_manager = Arc::new(SubscriptionManager::new(pub_sub.clone()));
        let message_handler = Arc::new(MessageHandler::new(
            subscription_manager.clone(),
            decoder.clone(),
            encoder.clone(),
        ));

        let facade = Arc::new(FastMqtt {
            client_id,
            pub_sub,
            subscription_manager: subscription_manager.clone(),
            encoder,
            decoder,
            state: Mutex::new(HashMap::new()),
            exit_controller,
            connection_monitor: connection_monitor.clone(),
            response_default_timeout: self.response_default_timeout,
            default_subscribe_options: self.default_subscribe_options,
        });

        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                error!("session ended with error: {e}");
            }
        });

        let dispatch_facade = Arc::downgrade(&facade);
        tokio::spawn(async move {
            message_handler.run(raw_rx, dispatch_facade).await;
        });

        tokio::time::timeout(self.connect_timeout, connection_monitor.connected())
            .await
            .map_err(|_| FastMqttError::from(FastMqttErrorKind::Timeout))?;
        info!("connected to broker as {}", facade.client_id);

        let bindings: Vec<Binding<T, DefaultPubSub>> = self
            .routers
            .into_iter()
            .flat_map(Router::into_bindings)
            .collect();
        if !bindings.is_empty() {
            let results = subscription_manager.subscribe_many(bindings).await?;
            for result in results {
                result?;
            }
        }

        Ok(facade)
    }

    /// As [`Self::connect`], wrapping the result in a [`FastMqttGuard`] that ends the
    /// session when dropped.
    ///
    /// # Errors
    /// As [`Self::connect`].
    pub async fn connect_scoped(self) -> Result<FastMqttGuard<T, DefaultPubSub>, FastMqttError> {
        Ok(FastMqttGuard::new(self.connect().await?))
    }
}

/// Builds a [`FastMqtt`] over a [`crate::tests_support::NoopPubSub`]-backed session without
/// any network I/O, for this crate's own unit tests and [`crate::message_handler`]'s.
#[cfg(test)]
pub(crate) mod test_support {
    use tokio::sync::mpsc;

    use fastmqtt_transport::RawMessage;

    use crate::tests_support::{NoopEventLoop, NoopPubSub};

    use super::*;

    /// The transport handle this test harness wires [`FastMqtt`] up with.
    pub(crate) type TestPubSub = SessionManagedClient<NoopPubSub>;

    /// Build a disconnected façade plus the pieces needed to drive a
    /// [`crate::message_handler::MessageHandler`] against it directly.
    pub(crate) fn build<T>(
        encoder: Arc<dyn PayloadEncoder<T>>,
        decoder: Arc<dyn PayloadDecoder<T>>,
    ) -> (
        Arc<FastMqtt<T, TestPubSub>>,
        Arc<SubscriptionManager<T, TestPubSub>>,
        mpsc::Receiver<RawMessage>,
    )
    where
        T: Send + Sync + 'static,
    {
        let mut session = Session::new(
            NoopPubSub,
            NoopEventLoop,
            Box::new(ExponentialBackoffWithJitter::default()),
            "test-client".to_string(),
        );

        let exit_controller: Arc<dyn ExitController> = Arc::new(session.create_exit_handle());
        let connection_monitor = session.create_connection_monitor();
        let pub_sub = session.create_managed_client();
        let raw_rx = session
            .take_raw_message_receiver()
            .expect("raw message receiver taken exactly once");

        let subscription_manager = Arc::new(SubscriptionManager::new(pub_sub.clone()));
        let facade = Arc::new(FastMqtt {
            client_id: "test-client".to_string(),
            pub_sub,
            subscription_manager: subscription_manager.clone(),
            encoder,
            decoder,
            state: Mutex::new(HashMap::new()),
            exit_controller,
            connection_monitor,
            response_default_timeout: Duration::from_secs(5),
            default_subscribe_options: SubscribeOptions::default(),
        });

        (facade, subscription_manager, raw_rx)
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::BytesCodec;

    use super::test_support::build;
    use super::*;

    fn facade() -> Arc<FastMqtt<Bytes, test_support::TestPubSub>> {
        let _ = env_logger::try_init();
        build(Arc::new(BytesCodec), Arc::new(BytesCodec)).0
    }

    #[tokio::test]
    async fn fresh_session_is_not_connected() {
        let facade = facade();
        assert!(!facade.is_connected());
    }

    #[tokio::test]
    async fn state_bag_round_trips_and_removes() {
        let facade = facade();
        facade.set_state("count", 7_u32).await;
        assert_eq!(facade.get_state::<u32>("count").await, Some(7));
        assert_eq!(facade.get_state::<String>("count").await, None);
        assert!(facade.remove_state("count").await);
        assert_eq!(facade.get_state::<u32>("count").await, None);
        assert!(!facade.remove_state("count").await);
    }

    #[tokio::test]
    async fn subscribe_default_uses_builder_defaults() {
        let facade = facade();
        let handler: Handler<Bytes, test_support::TestPubSub> = Arc::new(|_msg| Box::pin(async { None }));
        let identified = facade.subscribe_default(handler, "a/b").await.unwrap();
        assert_eq!(identified.subscription_id, 1);
        assert_eq!(identified.options().qos, facade.default_subscribe_options.qos);
    }

    #[tokio::test]
    async fn publish_encodes_through_configured_encoder() {
        let facade = facade();
        facade
            .publish("a/b", Bytes::from_static(b"hi"), QoS::AtMostOnce, false, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn response_context_open_close_is_idempotent() {
        let facade = facade();
        let ctx = facade.response_context("replies/me", QoS::AtMostOnce, None);
        ctx.open().await.unwrap();
        ctx.close().await.unwrap();
        ctx.close().await.unwrap();
    }
}
