// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Subscriptions (spec §3 "Subscription record", §4.6). A `Subscription`
//! is owned by the scope that created it and holds a clone of the
//! `TransportHandle`, validated at every call (spec §9 "from cyclic
//! object graphs to owned hierarchies"). The underlying
//! `SubscriptionRecord` is shared (via `Arc`) with the endpoint pool
//! or wildcard list and with any in-flight `TaggedEvent`, so a
//! `destroy` racing an enqueue cannot free memory out from under the
//! dispatcher -- it can only flip the `valid` flag the dispatcher and
//! the queue consumer both respect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::control::ControlCommand;
use crate::error::BridgeError;
use crate::queue::{EventQueue, TaggedEvent};
use crate::transport::TransportHandle;
use crate::wildcard;
use crate::wire::Frame;

/// What the dispatcher hands to a subscription or inbox queue: a
/// reference to the matched topic key, the endpoint identifier for
/// exact-match records (absent for wildcard matches, which have no
/// single originating registration), and the decoded frame.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub topic_key: String,
    pub endpoint_id: Option<Uuid>,
    pub frame: Frame,
}

pub struct SubscriptionRecord {
    pub id: Uuid,
    pub topic_key: String,
    pub wildcard: bool,
    valid: AtomicBool,
    muted: AtomicBool,
    queue: Arc<dyn EventQueue>,
    on_msg: Box<dyn Fn(TransportMessage) + Send + Sync>,
    on_destroy: Box<dyn Fn() + Send + Sync>,
}

impl SubscriptionRecord {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Release);
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn invoke_on_msg(&self, msg: TransportMessage) {
        (self.on_msg)(msg);
    }

    pub fn invoke_on_destroy(&self) {
        (self.on_destroy)();
    }

    /// Enqueues an exact-match delivery, unless muted. Muted
    /// subscriptions are dropped here, before enqueue (spec §4.6).
    pub fn enqueue_exact_match(self: &Arc<Self>, msg: TransportMessage) {
        if self.is_muted() {
            return;
        }
        self.queue.enqueue(TaggedEvent::SubscriptionMsg(self.clone(), msg));
    }

    pub fn enqueue_wildcard_match(self: &Arc<Self>, msg: TransportMessage) {
        if self.is_muted() {
            return;
        }
        self.queue.enqueue(TaggedEvent::WildcardMsg(self.clone(), msg));
    }

    pub fn enqueue_destroy(self: &Arc<Self>) {
        self.queue.enqueue(TaggedEvent::SubscriptionDestroy(self.clone()));
    }

    #[cfg(test)]
    pub fn for_test(on_msg: impl Fn(TransportMessage) + Send + Sync + 'static) -> Arc<SubscriptionRecord> {
        Arc::new(SubscriptionRecord {
            id: Uuid::new_v4(),
            topic_key: "test".to_owned(),
            wildcard: false,
            valid: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            queue: Arc::new(crate::queue::ImmediateQueue),
            on_msg: Box::new(on_msg),
            on_destroy: Box::new(|| {}),
        })
    }
}

/// The lifecycle handle returned to callers by `Subscription::create`
/// / `create_wildcard`.
pub struct Subscription {
    transport: TransportHandle,
    record: Arc<SubscriptionRecord>,
    destroyed: bool,
}

impl Subscription {
    pub fn create(
        transport: TransportHandle,
        topic_key: impl Into<String>,
        queue: Arc<dyn EventQueue>,
        on_msg: impl Fn(TransportMessage) + Send + Sync + 'static,
        on_destroy: impl Fn() + Send + Sync + 'static,
    ) -> Result<Subscription, BridgeError> {
        if !transport.is_alive() {
            return Err(BridgeError::Lifecycle);
        }

        let topic_key = topic_key.into();
        if topic_key.is_empty() {
            return Err(BridgeError::InvalidArg("topic key must not be empty"));
        }

        let record = Arc::new(SubscriptionRecord {
            id: Uuid::new_v4(),
            topic_key: topic_key.clone(),
            wildcard: false,
            valid: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            queue,
            on_msg: Box::new(on_msg),
            on_destroy: Box::new(on_destroy),
        });

        transport.pool.lock().expect("pool mutex poisoned").register_with_identifier(&topic_key, record.id, record.clone());

        if transport.note_subscribe(&topic_key) {
            transport.control.send(&ControlCommand::Subscribe(topic_key))?;
        }

        Ok(Subscription { transport, record, destroyed: false })
    }

    pub fn create_wildcard(
        transport: TransportHandle,
        subject_pattern: &str,
        regex_pattern: &str,
        queue: Arc<dyn EventQueue>,
        on_msg: impl Fn(TransportMessage) + Send + Sync + 'static,
        on_destroy: impl Fn() + Send + Sync + 'static,
    ) -> Result<Subscription, BridgeError> {
        if !transport.is_alive() {
            return Err(BridgeError::Lifecycle);
        }

        let prefix = wildcard::literal_prefix(subject_pattern).to_owned();
        let id = Uuid::new_v4();
        let record = Arc::new(SubscriptionRecord {
            id,
            topic_key: prefix.clone(),
            wildcard: true,
            valid: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            queue,
            on_msg: Box::new(on_msg),
            on_destroy: Box::new(on_destroy),
        });

        transport
            .wildcards
            .lock()
            .expect("wildcard list mutex poisoned")
            .insert(id, regex_pattern, record.clone())?;

        if transport.note_subscribe(&prefix) {
            transport.control.send(&ControlCommand::Subscribe(prefix))?;
        }

        Ok(Subscription { transport, record, destroyed: false })
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn mute(&self) {
        self.record.mute();
    }

    /// Removes the record from its registry, drops the socket-level
    /// subscribe if this was the last registration for its prefix, and
    /// enqueues `on_destroy`. Returns before the destroy callback has
    /// necessarily fired; the caller observes completion through its
    /// own `on_destroy` closure (spec §5 "completion tokens").
    pub fn destroy(mut self) -> Result<(), BridgeError> {
        self.destroy_inner()
    }

    fn destroy_inner(&mut self) -> Result<(), BridgeError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.record.mark_invalid();

        if self.record.wildcard {
            self.transport.wildcards.lock().expect("wildcard list mutex poisoned").remove(self.record.id);
        } else {
            self.transport.pool.lock().expect("pool mutex poisoned").unregister(&self.record.topic_key, self.record.id);
        }

        if self.transport.note_unsubscribe(&self.record.topic_key) {
            self.transport.control.send(&ControlCommand::Unsubscribe(self.record.topic_key.clone()))?;
        }

        self.record.enqueue_destroy();
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.destroy_inner();
    }
}
