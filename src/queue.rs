// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The host-API event queue (spec §9 "from raw callback closures to
//! tagged events"). Per-queue dispatcher threading is an external
//! collaborator (spec §1): this module only defines the interface the
//! bridge pushes onto, plus the tagged event record a queue's consumer
//! thread pulls off before invoking a user callback.
//!
//! Each event carries a strong reference to the record it targets
//! rather than a raw `void*` closure; `invoke` re-checks the record's
//! validity flag immediately before calling the user closure, so a
//! `destroy` that raced the enqueue cannot result in a callback firing
//! on a logically-dead subscription or inbox.

use std::sync::Arc;

use crate::error::BridgeError;
use crate::inbox::InboxRecord;
use crate::subscription::{SubscriptionRecord, TransportMessage};
use crate::timer::TimerRecord;

/// A sink for tagged events, implemented by the host API. The
/// dispatcher and the public API surface push onto it; something
/// external pulls and invokes user callbacks.
pub trait EventQueue: Send + Sync {
    fn enqueue(&self, event: TaggedEvent);

    /// Invoked once per crossing of the configured high-water depth
    /// (spec §5 backpressure).
    fn on_high_water(&self, _depth: usize) {}
}

pub enum TaggedEvent {
    SubscriptionMsg(Arc<SubscriptionRecord>, TransportMessage),
    WildcardMsg(Arc<SubscriptionRecord>, TransportMessage),
    InboxReply(Arc<InboxRecord>, TransportMessage),
    InboxError(Arc<InboxRecord>, BridgeError),
    SubscriptionDestroy(Arc<SubscriptionRecord>),
    InboxDestroy(Arc<InboxRecord>),
    Timer(Arc<TimerRecord>),
}

impl TaggedEvent {
    /// Validates the target against its live flag, then invokes the
    /// matching user callback. Called by the host-API queue's
    /// consumer thread, never by the dispatcher itself.
    pub fn invoke(self) {
        match self {
            TaggedEvent::SubscriptionMsg(record, msg) | TaggedEvent::WildcardMsg(record, msg) => {
                if record.is_valid() {
                    record.invoke_on_msg(msg);
                }
            }
            TaggedEvent::InboxReply(record, msg) => {
                if record.is_valid() {
                    record.invoke_on_reply(msg);
                }
            }
            TaggedEvent::InboxError(record, err) => {
                if record.is_valid() {
                    record.invoke_on_error(err);
                }
            }
            TaggedEvent::SubscriptionDestroy(record) => record.invoke_on_destroy(),
            TaggedEvent::InboxDestroy(record) => record.invoke_on_destroy(),
            TaggedEvent::Timer(record) => record.fire(),
        }
    }
}

/// A trivial in-process queue used by tests: `enqueue` runs the event
/// synchronously rather than handing it to a consumer thread.
#[derive(Default)]
pub struct ImmediateQueue;

impl EventQueue for ImmediateQueue {
    fn enqueue(&self, event: TaggedEvent) {
        event.invoke();
    }
}
