// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Owns a single MQTT session: connects, reconnects with backoff, and fans
//! inbound publishes out to whoever is consuming the raw-message stream.

pub mod reconnect_policy;
mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::{ClientError, ConnectionError, SessionError, SessionErrorKind, SessionExitError, SessionExitErrorKind};
use crate::interface::{Event, Incoming, MqttAck, MqttClient, MqttDisconnect, MqttEventLoop, MqttPubSub};
use crate::raw_message::RawMessage;
use crate::session::reconnect_policy::ReconnectPolicy;
use state::SessionState;

const DEFAULT_RAW_MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Client that manages connections over a single MQTT session.
///
/// Use this centrally in an application to control the session and to create
/// instances of [`SessionManagedClient`] and [`SessionExitHandle`].
pub struct Session<C, EL>
where
    C: MqttClient + Clone + Send + Sync + 'static,
    EL: MqttEventLoop,
{
    client: C,
    event_loop: EL,
    client_id: String,
    reconnect_policy: Box<dyn ReconnectPolicy>,
    state: Arc<SessionState>,
    notify_force_exit: Arc<Notify>,
    raw_message_tx: mpsc::Sender<RawMessage>,
    raw_message_rx: Option<mpsc::Receiver<RawMessage>>,
    previously_run: bool,
}

impl<C, EL> Session<C, EL>
where
    C: MqttClient + Clone + Send + Sync + 'static,
    EL: MqttEventLoop,
{
    /// Create a new [`Session`] from an already-constructed client/event-loop pair.
    #[must_use]
    pub fn new(
        client: C,
        event_loop: EL,
        reconnect_policy: Box<dyn ReconnectPolicy>,
        client_id: String,
    ) -> Self {
        let (raw_message_tx, raw_message_rx) =
            mpsc::channel(DEFAULT_RAW_MESSAGE_CHANNEL_CAPACITY);
        Self {
            client,
            event_loop,
            client_id,
            reconnect_policy,
            state: Arc::new(SessionState::default()),
            notify_force_exit: Arc::new(Notify::new()),
            raw_message_tx,
            raw_message_rx: Some(raw_message_rx),
            previously_run: false,
        }
    }

    /// Return a new instance of [`SessionExitHandle`] that can be used to end this [`Session`]
    pub fn create_exit_handle(&self) -> SessionExitHandle<C> {
        SessionExitHandle {
            disconnector: self.client.clone(),
            state: self.state.clone(),
            force_exit: self.notify_force_exit.clone(),
        }
    }

    /// Return a new instance of [`SessionConnectionMonitor`] that can be used to monitor the connection state
    #[must_use]
    pub fn create_connection_monitor(&self) -> SessionConnectionMonitor {
        SessionConnectionMonitor {
            state: self.state.clone(),
        }
    }

    /// Return a new instance of [`SessionManagedClient`] that can be used to send and receive messages
    #[must_use]
    pub fn create_managed_client(&self) -> SessionManagedClient<C> {
        SessionManagedClient {
            client_id: self.client_id.clone(),
            pub_sub: self.client.clone(),
        }
    }

    /// Take ownership of the raw-message stream. May only be called once per
    /// Session; subsequent calls return `None`.
    pub fn take_raw_message_receiver(&mut self) -> Option<mpsc::Receiver<RawMessage>> {
        self.raw_message_rx.take()
    }

    /// Begin running the [`Session`].
    ///
    /// Blocks until either a session exit or a fatal connection error is encountered.
    ///
    /// # Errors
    /// Returns a [`SessionError`] if the session encounters a fatal error and ends.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.state.transition_running();
        if self.previously_run {
            log::error!("Session re-use is not currently supported. Ending session.");
            return Err(SessionError::from(SessionErrorKind::InvalidState(
                "Session re-use is not currently supported".to_string(),
            )));
        }
        self.previously_run = true;

        let mut prev_connected = false;
        let mut prev_reconnect_attempts = 0;
        let mut result = Ok(());

        loop {
            let next = tokio::select! {
                biased;
                () = self.notify_force_exit.notified() => { break },
                next = self.event_loop.poll() => { next },
            };

            match next {
                Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                    self.state.transition_connected(prev_connected);
                    prev_reconnect_attempts = 0;
                    log::debug!("Incoming CONNACK: {connack:?}");

                    if prev_connected && !connack.session_present {
                        log::error!(
                            "Session state not present on broker after reconnect. Ending session."
                        );
                        result = Err(SessionErrorKind::SessionLost);
                        if self.state.desire_exit() {
                            log::debug!(
                                "Session-initiated exit triggered when a user-initiated exit was already in-progress."
                            );
                        }
                        self.trigger_session_exit().await;
                    } else {
                        prev_connected = true;
                        self.event_loop.set_clean_start(false);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    log::debug!("Incoming PUB: {publish:?}");
                    match self.raw_message_tx.try_send(RawMessage::from(publish)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(msg)) => {
                            log::error!(
                                "Raw message channel at capacity; dropping inbound message on topic {}",
                                msg.topic
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(msg)) => {
                            log::warn!(
                                "No raw message receiver attached; dropping inbound message on topic {}",
                                msg.topic
                            );
                        }
                    }
                }
                Ok(_e) => {
                    // Additional incoming/outgoing events are not observed here.
                }
                Err(ConnectionError::MqttState(_)) if self.state.desire_exit() => {
                    self.state.transition_disconnected();
                    break;
                }
                Err(ConnectionError::ConnectionRefused(rc)) => {
                    log::error!("Connection Refused: rc: {rc:?}");
                    result = Err(SessionErrorKind::ConnectionError(next.unwrap_err()));
                    break;
                }
                Err(e) => {
                    self.state.transition_disconnected();
                    log::error!("Error: {e:?}");

                    if let Some(delay) = self
                        .reconnect_policy
                        .next_reconnect_delay(prev_reconnect_attempts, &e)
                    {
                        log::info!("Attempting reconnect in {delay:?}");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.notify_force_exit.notified() => {
                                log::info!("Reconnect attempts halted by force exit");
                                result = Err(SessionErrorKind::ForceExit);
                                break;
                            }
                        }
                    } else {
                        log::info!("Reconnect attempts halted by reconnect policy");
                        result = Err(SessionErrorKind::ReconnectHalted);
                        break;
                    }
                    prev_reconnect_attempts += 1;
                }
            }
        }
        self.state.transition_exited();
        result.map_err(SessionError::from)
    }

    async fn trigger_session_exit(&self) {
        let exit_handle = self.create_exit_handle();
        match exit_handle.trigger_exit_internal().await {
            Ok(()) => log::debug!("Internal session exit successful"),
            Err(e) => log::debug!("Internal session exit failed: {e:?}"),
        }
    }
}

/// An MQTT client that has its connection state externally managed by a [`Session`].
/// Used to send messages; inbound messages are consumed from the Session's raw-message stream.
#[derive(Clone)]
pub struct SessionManagedClient<PS>
where
    PS: MqttPubSub + Clone + Send + Sync,
{
    client_id: String,
    pub_sub: PS,
}

impl<PS> SessionManagedClient<PS>
where
    PS: MqttPubSub + Clone + Send + Sync,
{
    /// The client ID of the `Session` that manages this client.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait::async_trait]
impl<PS> MqttPubSub for SessionManagedClient<PS>
where
    PS: MqttPubSub + Clone + Send + Sync,
{
    async fn publish(
        &self,
        topic: impl Into<String> + Send,
        qos: crate::control_packet::QoS,
        retain: bool,
        payload: impl Into<bytes::Bytes> + Send,
    ) -> Result<crate::interface::CompletionToken, ClientError> {
        self.pub_sub.publish(topic, qos, retain, payload).await
    }

    async fn publish_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: crate::control_packet::QoS,
        retain: bool,
        payload: impl Into<bytes::Bytes> + Send,
        properties: crate::control_packet::PublishProperties,
    ) -> Result<crate::interface::CompletionToken, ClientError> {
        self.pub_sub
            .publish_with_properties(topic, qos, retain, payload, properties)
            .await
    }

    async fn subscribe(
        &self,
        topic: impl Into<String> + Send,
        qos: crate::control_packet::QoS,
    ) -> Result<crate::interface::CompletionToken, ClientError> {
        self.pub_sub.subscribe(topic, qos).await
    }

    async fn subscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        qos: crate::control_packet::QoS,
        properties: crate::control_packet::SubscribeProperties,
    ) -> Result<crate::interface::CompletionToken, ClientError> {
        self.pub_sub
            .subscribe_with_properties(topic, qos, properties)
            .await
    }

    async fn unsubscribe(
        &self,
        topic: impl Into<String> + Send,
    ) -> Result<crate::interface::CompletionToken, ClientError> {
        self.pub_sub.unsubscribe(topic).await
    }

    async fn unsubscribe_with_properties(
        &self,
        topic: impl Into<String> + Send,
        properties: crate::control_packet::UnsubscribeProperties,
    ) -> Result<crate::interface::CompletionToken, ClientError> {
        self.pub_sub
            .unsubscribe_with_properties(topic, properties)
            .await
    }
}

/// Handle used to end an MQTT session.
#[derive(Clone)]
pub struct SessionExitHandle<D>
where
    D: MqttDisconnect + Clone + Send + Sync,
{
    disconnector: D,
    state: Arc<SessionState>,
    force_exit: Arc<Notify>,
}

impl<D> SessionExitHandle<D>
where
    D: MqttDisconnect + Clone + Send + Sync,
{
    /// Attempt to gracefully end the session running in the [`Session`] that created this handle.
    ///
    /// # Errors
    /// Returns [`SessionExitError`] if the session is not connected, or the disconnect call fails.
    pub async fn try_exit(&self) -> Result<(), SessionExitError> {
        log::debug!("Attempting to exit session gracefully");
        if !self.state.is_connected() {
            return Err(SessionExitError::new(SessionExitErrorKind::BrokerUnavailable {
                attempted: false,
            }));
        }
        self.trigger_exit_user().await?;
        tokio::select! {
            biased;
            () = self.state.condition_exited() => Ok(()),
            () = self.state.condition_disconnected() => Err(SessionExitError::new(
                SessionExitErrorKind::BrokerUnavailable { attempted: true },
            )),
        }
    }

    /// As [`Self::try_exit`], but fails with a timeout error if the exit does not
    /// complete within `timeout`.
    ///
    /// # Errors
    /// As [`Self::try_exit`], plus a timeout error.
    pub async fn try_exit_timeout(&self, timeout: std::time::Duration) -> Result<(), SessionExitError> {
        tokio::time::timeout(timeout, self.try_exit()).await?
    }

    /// Forcefully end the session, granting a 1 second grace period for a graceful exit first.
    ///
    /// Returns true if the exit was graceful, false if it was forced.
    pub async fn exit_force(&self) -> bool {
        log::debug!("Attempting to exit session gracefully before force exiting");
        let _ = self.trigger_exit_user().await;
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                log::debug!("Grace period for graceful session exit expired. Force exiting session");
                self.force_exit.notify_one();
                false
            },
            () = self.state.condition_exited() => {
                log::debug!("Session exited gracefully without need for force exit");
                true
            }
        }
    }

    async fn trigger_exit_user(&self) -> Result<(), SessionExitError> {
        self.state.transition_user_desire_exit();
        Ok(self.disconnector.disconnect().await?)
    }

    async fn trigger_exit_internal(&self) -> Result<(), SessionExitError> {
        self.state.transition_session_desire_exit();
        Ok(self.disconnector.disconnect().await?)
    }
}

/// Monitor for connection state changes in a [`Session`]. Backs the
/// `on_connect`/`on_disconnect` observer contract and the transient
/// reconnect pulse.
#[derive(Clone)]
pub struct SessionConnectionMonitor {
    state: Arc<SessionState>,
}

impl SessionConnectionMonitor {
    /// Returns true if the [`Session`] is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Wait until the [`Session`] is connected. Returns immediately if already connected.
    pub async fn connected(&self) {
        self.state.condition_connected().await;
    }

    /// Wait until the [`Session`] is disconnected. Returns immediately if already disconnected.
    pub async fn disconnected(&self) {
        self.state.condition_disconnected().await;
    }

    /// Wait for the next reconnect pulse: a transient signal fired once per
    /// successful reconnect (not the initial connect).
    pub async fn reconnected(&self) {
        self.state.condition_reconnect().await;
    }
}
