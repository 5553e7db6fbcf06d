// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Allocates Subscription Identifiers, tracks their lifecycle against a
//! session, and resolves inbound messages back to bindings by that ID.

use std::collections::{BTreeSet, HashMap};

use fastmqtt_transport::control_packet::SubscribeProperties;
use fastmqtt_transport::interface::MqttPubSub;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::error::{FastMqttError, FastMqttErrorKind};
use crate::types::{Binding, Handler, IdentifiedBinding};

/// The highest Subscription Identifier MQTT v5's Variable Byte Integer
/// encoding can carry for this property: `2^28 - 1`.
const MAX_SUBSCRIPTION_ID: u32 = (1 << 28) - 1;

struct IdAllocator {
    free: BTreeSet<u32>,
    next: u32,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            free: BTreeSet::new(),
            next: 1,
        }
    }

    /// Free-set-first: prefer a previously released ID, otherwise mint the next
    /// unused ascending one.
    fn allocate(&mut self) -> Option<u32> {
        if let Some(&id) = self.free.iter().next() {
            self.free.remove(&id);
            return Some(id);
        }
        if self.next <= MAX_SUBSCRIPTION_ID {
            let id = self.next;
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }

    fn release(&mut self, id: u32) {
        self.free.insert(id);
    }

    fn remaining_capacity(&self) -> u64 {
        let ascending_left = u64::from(MAX_SUBSCRIPTION_ID) - u64::from(self.next) + 1;
        self.free.len() as u64 + ascending_left
    }
}

struct State<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    allocator: IdAllocator,
    bindings: HashMap<u32, IdentifiedBinding<T, PS>>,
}

/// Owns the Subscription Identifier allocator and the `id -> binding` table for
/// one transport client.
pub struct SubscriptionManager<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    client: PS,
    state: Mutex<State<T, PS>>,
}

impl<T, PS> SubscriptionManager<T, PS>
where
    PS: MqttPubSub + Send + Sync + 'static,
{
    /// Create a new, empty subscription manager over `client`.
    pub fn new(client: PS) -> Self {
        Self {
            client,
            state: Mutex::new(State {
                allocator: IdAllocator::new(),
                bindings: HashMap::new(),
            }),
        }
    }

    /// Look up the binding currently associated with `id`.
    pub async fn lookup(&self, id: u32) -> Option<IdentifiedBinding<T, PS>> {
        self.state.lock().await.bindings.get(&id).cloned()
    }

    /// Look up the handler list currently associated with `id`, without requiring
    /// the binding itself to be cloned.
    pub(crate) async fn handlers_for(&self, id: u32) -> Option<(Vec<Handler<T, PS>>, String)> {
        self.state
            .lock()
            .await
            .bindings
            .get(&id)
            .map(|b| (b.binding.handlers.clone(), b.filter().to_string()))
    }

    /// Allocate an ID, subscribe on the transport with that ID attached, and
    /// record `id -> binding`.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ResourceExhausted`] if the identifier pool is
    /// drained, or [`FastMqttErrorKind::TransportFault`] if the transport subscribe fails.
    pub async fn subscribe(
        &self,
        binding: Binding<T, PS>,
    ) -> Result<IdentifiedBinding<T, PS>, FastMqttError> {
        let id = {
            let mut state = self.state.lock().await;
            state
                .allocator
                .allocate()
                .ok_or(FastMqttErrorKind::ResourceExhausted)?
        };

        if let Err(e) = self.send_subscribe(&binding, id).await {
            self.state.lock().await.allocator.release(id);
            return Err(e);
        }

        let identified = IdentifiedBinding {
            binding,
            subscription_id: id,
        };
        self.state
            .lock()
            .await
            .bindings
            .insert(id, identified.clone());
        Ok(identified)
    }

    /// Preflight-check capacity, then issue transport subscribes for every binding
    /// concurrently. On partial failure, already-assigned IDs remain valid.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ResourceExhausted`] before any network call if
    /// the pool cannot satisfy every binding in `bindings`.
    pub async fn subscribe_many(
        &self,
        bindings: Vec<Binding<T, PS>>,
    ) -> Result<Vec<Result<IdentifiedBinding<T, PS>, FastMqttError>>, FastMqttError> {
        {
            let state = self.state.lock().await;
            if state.allocator.remaining_capacity() < bindings.len() as u64 {
                return Err(FastMqttErrorKind::ResourceExhausted.into());
            }
        }

        let results = join_all(bindings.into_iter().map(|binding| self.subscribe(binding))).await;
        Ok(results)
    }

    /// Remove `handler` (if given) from the binding identified by `id`. If the
    /// binding's handler list becomes empty, or no handler was specified, issue a
    /// transport UNSUBSCRIBE and release the ID.
    ///
    /// # Errors
    /// Returns [`FastMqttErrorKind::ConfigError`] if `id` is not currently allocated,
    /// or [`FastMqttErrorKind::TransportFault`] if the transport unsubscribe fails.
    pub async fn unsubscribe(
        &self,
        id: u32,
        handler: Option<&Handler<T, PS>>,
    ) -> Result<(), FastMqttError> {
        let filter = {
            let mut state = self.state.lock().await;
            let identified = state.bindings.get_mut(&id).ok_or_else(|| {
                FastMqttError::from(FastMqttErrorKind::ConfigError(format!(
                    "unknown subscription identifier {id}"
                )))
            })?;

            if let Some(handler) = handler {
                identified
                    .binding
                    .handlers
                    .retain(|h| !std::sync::Arc::ptr_eq(h, handler));
            }

            if handler.is_none() || identified.binding.handlers.is_empty() {
                Some(identified.filter().to_string())
            } else {
                None
            }
        };

        let Some(filter) = filter else {
            return Ok(());
        };

        let completion = self
            .client
            .unsubscribe(filter)
            .await
            .map_err(FastMqttError::from)?;
        completion
            .await
            .map_err(|e| FastMqttError::from(FastMqttErrorKind::TransportFault(transport_detached(e))))?;

        let mut state = self.state.lock().await;
        state.bindings.remove(&id);
        state.allocator.release(id);
        Ok(())
    }

    async fn send_subscribe(&self, binding: &Binding<T, PS>, id: u32) -> Result<(), FastMqttError> {
        let properties = SubscribeProperties {
            id: Some(id as usize),
            user_properties: Vec::new(),
        };
        let completion = self
            .client
            .subscribe_with_properties(binding.filter().to_string(), binding.options().qos, properties)
            .await
            .map_err(FastMqttError::from)?;
        completion
            .await
            .map_err(|e| FastMqttError::from(FastMqttErrorKind::TransportFault(transport_detached(e))))
    }
}

fn transport_detached(
    e: fastmqtt_transport::error::CompletionError,
) -> fastmqtt_transport::error::ClientError {
    fastmqtt_transport::error::ClientError::new(
        fastmqtt_transport::error::ClientErrorKind::Detached(e.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_prefers_freed_ids_before_new_ones() {
        let mut allocator = IdAllocator::new();
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        let c = allocator.allocate().unwrap();
        assert_eq!((a, b, c), (1, 2, 3));

        allocator.release(b);
        let reused = allocator.allocate().unwrap();
        assert_eq!(reused, b);

        let next = allocator.allocate().unwrap();
        assert_eq!(next, 4);
    }

    #[test]
    fn allocator_reports_remaining_capacity() {
        let mut allocator = IdAllocator::new();
        let initial = allocator.remaining_capacity();
        assert_eq!(initial, u64::from(MAX_SUBSCRIPTION_ID));
        allocator.allocate();
        assert_eq!(allocator.remaining_capacity(), initial - 1);
    }
}
