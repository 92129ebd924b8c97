// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Inboxes (spec §3 "Inbox record", §4.4, §4.7): allocation of a
//! transport-unique reply topic, request/response correlation, and a
//! blocking `wait_reply` built on a semaphore signaled from the
//! `on_reply` callback (spec §5 "Suspension points").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::error::BridgeError;
use crate::publisher::Publisher;
use crate::queue::{EventQueue, TaggedEvent};
use crate::subscription::TransportMessage;
use crate::transport::TransportHandle;
use crate::wire::MsgType;

/// Maps `reply_topic -> inbox record` and allocates fresh reply topics
/// under the transport's `_INBOX.<uuid>.` prefix.
pub struct InboxRegistry {
    prefix: String,
    inboxes: HashMap<String, Arc<InboxRecord>>,
}

impl InboxRegistry {
    pub fn new(prefix: String) -> InboxRegistry {
        InboxRegistry { prefix, inboxes: HashMap::new() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn allocate_reply_topic(&self) -> String {
        format!("{}{}", self.prefix, Uuid::new_v4())
    }

    pub fn register(&mut self, record: Arc<InboxRecord>) {
        self.inboxes.insert(record.reply_topic.clone(), record);
    }

    pub fn unregister(&mut self, reply_topic: &str) -> Option<Arc<InboxRecord>> {
        self.inboxes.remove(reply_topic)
    }

    pub fn lookup(&self, reply_topic: &str) -> Option<Arc<InboxRecord>> {
        self.inboxes.get(reply_topic).cloned()
    }
}

pub struct InboxRecord {
    pub reply_topic: String,
    valid: AtomicBool,
    queue: Arc<dyn EventQueue>,
    on_reply: Box<dyn Fn(TransportMessage) + Send + Sync>,
    on_error: Box<dyn Fn(BridgeError) + Send + Sync>,
    on_destroy: Box<dyn Fn() + Send + Sync>,
}

impl InboxRecord {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn invoke_on_reply(&self, msg: TransportMessage) {
        (self.on_reply)(msg);
    }

    pub fn invoke_on_error(&self, err: BridgeError) {
        (self.on_error)(err);
    }

    pub fn invoke_on_destroy(&self) {
        (self.on_destroy)();
    }

    pub fn enqueue_reply(self: &Arc<Self>, msg: TransportMessage) {
        self.queue.enqueue(TaggedEvent::InboxReply(self.clone(), msg));
    }

    pub fn enqueue_destroy(self: &Arc<Self>) {
        self.queue.enqueue(TaggedEvent::InboxDestroy(self.clone()));
    }
}

#[derive(Default)]
struct WaitState {
    reply: Option<TransportMessage>,
}

/// The lifecycle handle returned by `Inbox::create`.
pub struct Inbox {
    transport: TransportHandle,
    record: Arc<InboxRecord>,
    wait: Arc<(Mutex<WaitState>, Condvar)>,
    destroyed: bool,
}

impl Inbox {
    pub fn create(
        transport: TransportHandle,
        queue: Arc<dyn EventQueue>,
        on_reply: impl Fn(TransportMessage) + Send + Sync + 'static,
        on_error: impl Fn(BridgeError) + Send + Sync + 'static,
        on_destroy: impl Fn() + Send + Sync + 'static,
    ) -> Result<Inbox, BridgeError> {
        if !transport.is_alive() {
            return Err(BridgeError::Lifecycle);
        }

        let reply_topic = transport.inboxes.lock().expect("inbox registry mutex poisoned").allocate_reply_topic();
        let wait = Arc::new((Mutex::new(WaitState::default()), Condvar::new()));
        let wait_for_reply = wait.clone();

        let record = Arc::new(InboxRecord {
            reply_topic: reply_topic.clone(),
            valid: AtomicBool::new(true),
            queue,
            on_reply: Box::new(move |msg: TransportMessage| {
                {
                    let mut guard = wait_for_reply.0.lock().expect("inbox wait mutex poisoned");
                    guard.reply = Some(msg.clone());
                }
                wait_for_reply.1.notify_all();
                on_reply(msg);
            }),
            on_error: Box::new(on_error),
            on_destroy: Box::new(on_destroy),
        });

        transport.inboxes.lock().expect("inbox registry mutex poisoned").register(record.clone());

        Ok(Inbox { transport, record, wait, destroyed: false })
    }

    pub fn reply_topic(&self) -> &str {
        &self.record.reply_topic
    }

    /// Serializes an INBOX_REQUEST frame addressed to `request_topic`
    /// carrying this inbox's reply-topic as `reply_handle`, and writes
    /// it through `publisher` (spec §4.7).
    pub fn send_request(&self, publisher: &Publisher, request_topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if !self.record.is_valid() {
            return Err(BridgeError::Lifecycle);
        }
        publisher.send_from_inbox(self, request_topic, payload)
    }

    /// Blocks the calling thread until a reply arrives or `seconds`
    /// elapses. On timeout the inbox is left registered: a late reply
    /// still reaches `on_reply` (spec §5 "Cancellation and timeout").
    pub fn wait_reply(&self, seconds: f64) -> Result<TransportMessage, BridgeError> {
        let (lock, cvar) = &*self.wait;
        let mut guard = lock.lock().expect("inbox wait mutex poisoned");
        let timeout = Duration::from_secs_f64(seconds.max(0.0));
        let deadline = std::time::Instant::now() + timeout;

        while guard.reply.is_none() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout);
            }
            let (next_guard, result) = cvar.wait_timeout(guard, deadline - now).expect("inbox wait mutex poisoned");
            guard = next_guard;
            if result.timed_out() && guard.reply.is_none() {
                return Err(BridgeError::Timeout);
            }
        }

        Ok(guard.reply.clone().expect("reply state checked non-empty above"))
    }

    pub fn destroy(mut self) -> Result<(), BridgeError> {
        self.destroy_inner()
    }

    fn destroy_inner(&mut self) -> Result<(), BridgeError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.record.mark_invalid();
        self.transport.inboxes.lock().expect("inbox registry mutex poisoned").unregister(&self.record.reply_topic);
        self.record.enqueue_destroy();
        Ok(())
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        let _ = self.destroy_inner();
    }
}

/// Looks up the type byte stored in a response frame so callers can
/// sanity-check `MsgType::InboxResponse` without importing `wire`
/// directly.
pub fn is_response(msg_type: MsgType) -> bool {
    matches!(msg_type, MsgType::InboxResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProperties;
    use crate::queue::ImmediateQueue;
    use crate::transport::Transport;
    use crate::wire::Frame;

    fn test_props(name: &str) -> StaticProperties {
        StaticProperties::new()
            .with("middleware_name", name)
            .with(crate::config::keys::incoming_address(0), format!("inproc://{}-sub", name))
            .with(crate::config::keys::outgoing_address(0), format!("inproc://{}-sub", name))
            .with("publish_address", format!("inproc://{}-pub", name))
    }

    #[test]
    fn allocate_reply_topic_is_unique_and_prefixed() {
        let registry = InboxRegistry::new("_INBOX.abc.".to_owned());
        let a = registry.allocate_reply_topic();
        let b = registry.allocate_reply_topic();
        assert_ne!(a, b);
        assert!(a.starts_with("_INBOX.abc."));
    }

    #[test]
    fn wait_reply_times_out_without_a_response() {
        let transport = Transport::new(&test_props("inbox-timeout")).unwrap();
        let inbox = Inbox::create(transport.handle(), Arc::new(ImmediateQueue), |_| {}, |_| {}, || {}).unwrap();

        let err = inbox.wait_reply(0.05).unwrap_err();
        assert!(matches!(err, BridgeError::Timeout));
    }

    #[test]
    fn wait_reply_returns_ok_once_on_reply_fires() {
        let transport = Transport::new(&test_props("inbox-reply")).unwrap();
        let inbox = Inbox::create(transport.handle(), Arc::new(ImmediateQueue), |_| {}, |_| {}, || {}).unwrap();

        let record = transport.handle().inboxes.lock().unwrap().lookup(inbox.reply_topic()).unwrap();
        let msg = TransportMessage {
            topic_key: inbox.reply_topic().to_owned(),
            endpoint_id: None,
            frame: Frame::new(inbox.reply_topic(), MsgType::InboxResponse, b"pong".to_vec()).with_reply_handle(inbox.reply_topic()),
        };
        record.enqueue_reply(msg);

        let reply = inbox.wait_reply(1.0).unwrap();
        assert_eq!(b"pong".to_vec(), reply.frame.payload);
    }

    #[test]
    fn destroy_removes_from_registry() {
        let transport = Transport::new(&test_props("inbox-destroy")).unwrap();
        let inbox = Inbox::create(transport.handle(), Arc::new(ImmediateQueue), |_| {}, |_| {}, || {}).unwrap();
        let topic = inbox.reply_topic().to_owned();
        inbox.destroy().unwrap();

        assert!(transport.handle().inboxes.lock().unwrap().lookup(&topic).is_none());
    }
}
