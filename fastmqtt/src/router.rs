// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Aggregates topic filter bindings from modular sources and merges
//! overlapping subscriptions under consistent option semantics.

use std::marker::PhantomData;

use fastmqtt_transport::interface::MqttPubSub;
use log::warn;

use crate::error::{FastMqttError, FastMqttErrorKind};
use crate::types::{Binding, Handler, SubscribeOptions};

/// A list of topic [`Binding`]s with merge-on-collision semantics.
///
/// MQTT filters may overlap textually, but two identical filters cannot be issued
/// twice to the same session without ambiguity over which Subscription ID delivers
/// which message, so the router resolves this statically before subscribe time.
pub struct Router<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    bindings: Vec<Binding<T, PS>>,
    sealed: bool,
    _pub_sub: PhantomData<PS>,
}

impl<T, PS> Default for Router<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            sealed: false,
            _pub_sub: PhantomData,
        }
    }
}

impl<T, PS> Router<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    /// Create an empty, unsealed router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bindings currently held by this router.
    #[must_use]
    pub fn bindings(&self) -> &[Binding<T, PS>] {
        &self.bindings
    }

    /// Consume the router, yielding its bindings.
    pub(crate) fn into_bindings(self) -> Vec<Binding<T, PS>> {
        self.bindings
    }

    /// Register `handler` against `filter` with the given options.
    ///
    /// If a binding for `filter` already exists, `handler` is appended to it, its
    /// `qos` becomes `max(existing.qos, options.qos)`, and the remaining three flags
    /// must match the existing binding exactly.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ConfigError`] if the router is sealed, or if
    /// `options` disagrees with an existing binding's `no_local`, `retain_as_published`,
    /// or `retain_handling`.
    pub fn register(
        &mut self,
        handler: Handler<T, PS>,
        filter: impl Into<String>,
        options: SubscribeOptions,
    ) -> Result<(), FastMqttError> {
        if self.sealed {
            return Err(FastMqttErrorKind::ConfigError(
                "router is sealed after inclusion into another router".to_string(),
            )
            .into());
        }

        let filter = filter.into();
        if let Some(existing) = self.bindings.iter_mut().find(|b| b.filter == filter) {
            check_flags_match(&filter, existing.options, options)?;
            existing.options.qos = existing.options.qos.max(options.qos);
            existing.handlers.push(handler);
            return Ok(());
        }

        self.bindings.push(Binding::new(filter, handler, options));
        Ok(())
    }

    /// Convenience wrapper around [`Self::register`] that returns `handler` unchanged,
    /// mirroring a decorator-style registration call.
    ///
    /// # Errors
    /// As [`Self::register`].
    pub fn on_message(
        &mut self,
        handler: Handler<T, PS>,
        filter: impl Into<String>,
        options: SubscribeOptions,
    ) -> Result<Handler<T, PS>, FastMqttError> {
        self.register(handler.clone(), filter, options)?;
        Ok(handler)
    }

    /// Merge every binding of `other` into `self`, then seal `other` against further
    /// registration.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ConfigError`] if `self` is sealed, or a merged
    /// binding's flags disagree with the bindings already registered in `other`.
    pub fn include(&mut self, other: &mut Router<T, PS>) -> Result<(), FastMqttError> {
        if self.sealed {
            return Err(FastMqttErrorKind::ConfigError(
                "router is sealed after inclusion into another router".to_string(),
            )
            .into());
        }

        for incoming in &other.bindings {
            if let Some(existing) = self.bindings.iter_mut().find(|b| b.filter == incoming.filter)
            {
                check_flags_match(&incoming.filter, existing.options, incoming.options)?;
                existing.options.qos = existing.options.qos.max(incoming.options.qos);
                existing.handlers.extend(incoming.handlers.iter().cloned());
            } else {
                self.bindings.push(incoming.clone());
            }
        }

        other.sealed = true;
        Ok(())
    }

    /// Whether this router has been sealed by inclusion into another router.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

fn check_flags_match(
    filter: &str,
    existing: SubscribeOptions,
    incoming: SubscribeOptions,
) -> Result<(), FastMqttError> {
    if existing.no_local != incoming.no_local {
        warn!("binding {filter} has conflicting no_local options");
        return Err(FastMqttErrorKind::ConfigError(format!("different no_local on {filter}")).into());
    }
    if existing.retain_as_published != incoming.retain_as_published {
        warn!("binding {filter} has conflicting retain_as_published options");
        return Err(FastMqttErrorKind::ConfigError(format!(
            "different retain_as_published on {filter}"
        ))
        .into());
    }
    if existing.retain_handling != incoming.retain_handling {
        warn!("binding {filter} has conflicting retain_handling options");
        return Err(
            FastMqttErrorKind::ConfigError(format!("different retain_handling on {filter}")).into(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use fastmqtt_transport::control_packet::QoS;
    use test_case::test_case;

    use super::*;
    use crate::tests_support::NoopPubSub;

    fn noop_handler() -> Handler<Bytes, NoopPubSub> {
        Arc::new(|_msg| Box::pin(async { None }))
    }

    fn options(qos: QoS) -> SubscribeOptions {
        SubscribeOptions {
            qos,
            ..SubscribeOptions::default()
        }
    }

    #[test]
    fn register_creates_new_binding() {
        let mut router: Router<Bytes, NoopPubSub> = Router::new();
        router
            .register(noop_handler(), "a/b", options(QoS::AtLeastOnce))
            .unwrap();
        assert_eq!(router.bindings().len(), 1);
        assert_eq!(router.bindings()[0].filter(), "a/b");
        assert_eq!(router.bindings()[0].handler_count(), 1);
    }

    #[test_case(QoS::AtMostOnce, QoS::ExactlyOnce, QoS::ExactlyOnce; "exactly once wins")]
    #[test_case(QoS::AtLeastOnce, QoS::AtMostOnce, QoS::AtLeastOnce; "at least once wins")]
    fn register_merges_qos_as_max(first: QoS, second: QoS, expected: QoS) {
        let mut router: Router<Bytes, NoopPubSub> = Router::new();
        router
            .register(noop_handler(), "t/1", options(first))
            .unwrap();
        router
            .register(noop_handler(), "t/1", options(second))
            .unwrap();
        assert_eq!(router.bindings().len(), 1);
        assert_eq!(router.bindings()[0].options().qos, expected);
        assert_eq!(router.bindings()[0].handler_count(), 2);
    }

    #[test]
    fn register_rejects_conflicting_retain_handling() {
        let mut router: Router<Bytes, NoopPubSub> = Router::new();
        router
            .register(noop_handler(), "t/1", options(QoS::AtMostOnce))
            .unwrap();
        let mut conflicting = options(QoS::ExactlyOnce);
        conflicting.retain_handling = crate::types::RetainHandling::DoNotSend;
        let err = router.register(noop_handler(), "t/1", conflicting).unwrap_err();
        assert!(matches!(err.kind(), FastMqttErrorKind::ConfigError(_)));
    }

    #[test]
    fn include_merges_and_seals_source_router() {
        let mut main: Router<Bytes, NoopPubSub> = Router::new();
        let mut plugin: Router<Bytes, NoopPubSub> = Router::new();
        plugin
            .register(noop_handler(), "a/b", options(QoS::AtMostOnce))
            .unwrap();

        main.include(&mut plugin).unwrap();
        assert_eq!(main.bindings().len(), 1);
        assert!(plugin.is_sealed());

        let err = plugin
            .register(noop_handler(), "c/d", options(QoS::AtMostOnce))
            .unwrap_err();
        assert!(matches!(err.kind(), FastMqttErrorKind::ConfigError(_)));
    }
}
