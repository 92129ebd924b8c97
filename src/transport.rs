// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The transport (spec §4.2 "Transport bridge"): owns the 0MQ sockets,
//! the dispatcher thread, and the shared registries (endpoint pool,
//! wildcard list, inbox registry) that both application threads and
//! the dispatcher thread reach into. `TransportHandle` is the
//! non-owning `Arc` every `Subscription`, `Inbox` and `Publisher`
//! actually holds (spec §9 "from cyclic object graphs to owned
//! hierarchies") -- none of them reference `Transport` itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{self, keys, Properties};
use crate::control::{ControlCommand, ControlReader, ControlSender};
use crate::dispatcher::{self, DispatcherHandles};
use crate::endpoint_pool::EndpointPool;
use crate::error::BridgeError;
use crate::inbox::InboxRegistry;
use crate::naming::{self, NamingRecord};
use crate::subscription::SubscriptionRecord;
use crate::timer::{ThreadTimerService, TimerHandle, TimerService};
use crate::wildcard::WildcardList;
use crate::wire::FrameCodec;

/// Running counters mirroring the original bridge's `mNormalMessages`
/// / `mNamingMessages` / `mPolls` statistics (spec §3 supplemented
/// observability), exposed so a host can log or export them.
#[derive(Default)]
pub struct DispatchStats {
    pub normal_messages: AtomicU64,
    pub naming_messages: AtomicU64,
    pub polls: AtomicU64,
    pub dropped_malformed: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            normal_messages: self.normal_messages.load(Ordering::Relaxed),
            naming_messages: self.naming_messages.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub normal_messages: u64,
    pub naming_messages: u64,
    pub polls: u64,
    pub dropped_malformed: u64,
}

pub(crate) struct PublisherSocket {
    pub socket: zmq::Socket,
    pub codec: FrameCodec,
}

/// The shared state reachable from every live `Subscription`, `Inbox`
/// and `Publisher` plus the dispatcher thread. Never constructed
/// directly outside `Transport::new`.
pub struct TransportInner {
    name: String,
    /// Kept alive alongside the sockets it created; never read again
    /// after construction.
    #[allow(dead_code)]
    ctx: zmq::Context,
    pub(crate) pool: Mutex<EndpointPool<Arc<SubscriptionRecord>>>,
    pub(crate) wildcards: Mutex<WildcardList<Arc<SubscriptionRecord>>>,
    pub(crate) inboxes: Mutex<InboxRegistry>,
    pub(crate) control: ControlSender,
    pub(crate) publisher: Mutex<PublisherSocket>,
    pub stats: DispatchStats,
    dispatch_status: Mutex<Option<String>>,
    alive: AtomicBool,
    prefix_refs: Mutex<HashMap<String, u32>>,
    naming_publisher: Option<Mutex<zmq::Socket>>,
    naming_pub_endpoint: String,
    naming_sub_endpoint: String,
    naming_timer: Mutex<Option<(Arc<dyn TimerService>, TimerHandle)>>,
}

impl TransportInner {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Records one more registration under `prefix`. Returns `true`
    /// exactly when this was the first live registration, i.e. when the
    /// caller should issue the socket-level subscribe (spec §4.5).
    pub fn note_subscribe(&self, prefix: &str) -> bool {
        let mut refs = self.prefix_refs.lock().expect("prefix ref-count mutex poisoned");
        let count = refs.entry(prefix.to_owned()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Records one fewer registration under `prefix`. Returns `true`
    /// exactly when this was the last live registration, i.e. when the
    /// caller should issue the socket-level unsubscribe.
    pub fn note_unsubscribe(&self, prefix: &str) -> bool {
        let mut refs = self.prefix_refs.lock().expect("prefix ref-count mutex poisoned");
        if let Some(count) = refs.get_mut(prefix) {
            *count -= 1;
            if *count == 0 {
                refs.remove(prefix);
                return true;
            }
        }
        false
    }

    /// Records a fatal dispatcher-side failure so subsequent calls can
    /// surface it instead of silently hanging (spec §5).
    pub(crate) fn set_dispatch_status(&self, message: String) {
        *self.dispatch_status.lock().expect("dispatch status mutex poisoned") = Some(message);
    }

    pub fn dispatch_status(&self) -> Option<String> {
        self.dispatch_status.lock().expect("dispatch status mutex poisoned").clone()
    }
}

pub type TransportHandle = Arc<TransportInner>;

/// The owning handle returned by `Transport::new`. Dropping it without
/// calling `destroy` still shuts the dispatcher thread down (`Drop`),
/// but does not run `destroy`'s explicit error propagation.
pub struct Transport {
    inner: TransportHandle,
    dispatcher_thread: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl Transport {
    pub fn new(props: &dyn Properties) -> Result<Transport, BridgeError> {
        let name = props.get_or(keys::MIDDLEWARE_NAME, "bridge");
        let ctx = zmq::Context::new();

        let incoming = props.address_list(keys::incoming_address, config::MAX_INCOMING_ADDRESSES);
        let outgoing = props.address_list(keys::outgoing_address, config::MAX_OUTGOING_ADDRESSES);
        let publish_address = props
            .get(keys::PUBLISH_ADDRESS)
            .ok_or(BridgeError::InvalidArg("publish_address is required"))?
            .to_owned();

        let subscriber = ctx.socket(zmq::SUB)?;
        for addr in &incoming {
            subscriber.bind(addr)?;
        }
        for addr in &outgoing {
            subscriber.connect(addr)?;
        }

        let publisher_socket = ctx.socket(zmq::PUB)?;
        publisher_socket.bind(&publish_address)?;

        let control_addr = format!("inproc://bridge-control-{}", Uuid::new_v4());
        let control_reader = ControlReader::bind(&ctx, &control_addr)?;
        let control_sender = ControlSender::connect(&ctx, &control_addr)?;

        let naming_incoming = props.address_list(keys::naming_incoming_address, config::MAX_NAMING_ADDRESSES);
        let naming_outgoing = props.address_list(keys::naming_outgoing_address, config::MAX_NAMING_ADDRESSES);

        let naming_publisher_socket =
            if naming_incoming.is_empty() { None } else { Some(naming::bind_naming_publisher(&ctx, &naming_incoming)?) };
        let naming_subscriber_socket =
            if naming_outgoing.is_empty() { None } else { Some(naming::connect_naming_subscriber(&ctx, &naming_outgoing)?) };

        let naming_pub_endpoint = publish_address.clone();
        let naming_sub_endpoint = incoming.first().cloned().unwrap_or_else(|| publish_address.clone());

        let inbox_prefix = format!("_INBOX.{}.", Uuid::new_v4());

        let inner = Arc::new(TransportInner {
            name,
            ctx: ctx.clone(),
            pool: Mutex::new(EndpointPool::new()),
            wildcards: Mutex::new(WildcardList::new()),
            inboxes: Mutex::new(InboxRegistry::new(inbox_prefix)),
            control: control_sender,
            publisher: Mutex::new(PublisherSocket { socket: publisher_socket, codec: FrameCodec::new() }),
            stats: DispatchStats::default(),
            dispatch_status: Mutex::new(None),
            alive: AtomicBool::new(true),
            prefix_refs: Mutex::new(HashMap::new()),
            naming_publisher: naming_publisher_socket.map(Mutex::new),
            naming_pub_endpoint,
            naming_sub_endpoint,
            naming_timer: Mutex::new(None),
        });

        let dispatcher_thread = {
            let handles = DispatcherHandles {
                subscriber,
                control: control_reader,
                naming_subscriber: naming_subscriber_socket,
                inner: inner.clone(),
            };
            std::thread::Builder::new()
                .name(format!("{}-dispatch", inner.name))
                .spawn(move || dispatcher::run(handles))
                .map_err(|_| BridgeError::Platform(zmq::Error::EAGAIN))?
        };

        // The subscriber filter for our own inbox prefix is applied by
        // the dispatcher thread, the only thread allowed to touch that
        // socket (spec §5).
        let prefix = inner.inboxes.lock().expect("inbox registry mutex poisoned").prefix().to_owned();
        if inner.note_subscribe(&prefix) {
            inner.control.send(&ControlCommand::Subscribe(prefix))?;
        }

        if inner.naming_publisher.is_some() {
            spawn_naming_announcer(&inner, props);
        }

        Ok(Transport { inner, dispatcher_thread: Some(dispatcher_thread), destroyed: false })
    }

    pub fn handle(&self) -> TransportHandle {
        self.inner.clone()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn dispatch_status(&self) -> Option<String> {
        self.inner.dispatch_status()
    }

    /// Sends a best-effort GOODBYE, signals the dispatcher thread to
    /// stop, and joins it. Idempotent.
    pub fn destroy(mut self) -> Result<(), BridgeError> {
        self.destroy_inner()
    }

    fn destroy_inner(&mut self) -> Result<(), BridgeError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.inner.alive.store(false, Ordering::Release);

        if let Some(naming_publisher) = &self.inner.naming_publisher {
            let record = NamingRecord::goodbye(self.inner.naming_pub_endpoint.clone(), self.inner.naming_sub_endpoint.clone());
            let socket = naming_publisher.lock().expect("naming publisher mutex poisoned");
            let _ = naming::send(&socket, &record);
        }

        if let Some((service, handle)) = self.inner.naming_timer.lock().expect("naming timer mutex poisoned").take() {
            service.cancel(handle);
        }

        self.inner.control.send(&ControlCommand::Shutdown)?;
        if let Some(thread) = self.dispatcher_thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.destroy_inner();
    }
}

/// Starts the periodic HELLO loop (spec §4.9). Runs directly on
/// `TimerService`, not through `TimerAdapter`/`EventQueue`: this
/// firing has no host-visible callback, so it bypasses the
/// tagged-event path reserved for timers the host API must see. The
/// closure holds only a `Weak` reference, so there is no cycle with
/// `TransportInner`; the handle is still stashed so `destroy` can
/// cancel the repeating timer instead of leaving its thread parked.
fn spawn_naming_announcer(inner: &TransportHandle, props: &dyn Properties) {
    let interval_secs = props.get_usize(keys::NAMING_REPUBLISH_INTERVAL_SECS).unwrap_or(30);
    let service: Arc<dyn TimerService> = Arc::new(ThreadTimerService);
    let weak = Arc::downgrade(inner);

    let handle = service.schedule(Duration::from_secs(interval_secs as u64), true, move || {
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        if !inner.is_alive() {
            return;
        }
        if let Some(naming_publisher) = &inner.naming_publisher {
            let record = NamingRecord::hello(inner.naming_pub_endpoint.clone(), inner.naming_sub_endpoint.clone());
            let socket = naming_publisher.lock().expect("naming publisher mutex poisoned");
            let _ = naming::send(&socket, &record);
        }
    });

    *inner.naming_timer.lock().expect("naming timer mutex poisoned") = Some((service, handle));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProperties;

    fn test_props(name: &str) -> StaticProperties {
        StaticProperties::new()
            .with(keys::MIDDLEWARE_NAME, name)
            .with(keys::incoming_address(0), format!("inproc://{}-sub", name))
            .with(keys::outgoing_address(0), format!("inproc://{}-sub", name))
            .with(keys::PUBLISH_ADDRESS, format!("inproc://{}-pub", name))
    }

    #[test]
    fn new_transport_is_alive_and_destroy_flips_it() {
        let transport = Transport::new(&test_props("transport-alive")).unwrap();
        let handle = transport.handle();
        assert!(handle.is_alive());

        transport.destroy().unwrap();
        assert!(!handle.is_alive());
    }

    #[test]
    fn note_subscribe_reports_only_first_registration() {
        let transport = Transport::new(&test_props("transport-prefix-refs")).unwrap();
        let handle = transport.handle();

        assert!(handle.note_subscribe("MD."));
        assert!(!handle.note_subscribe("MD."));
        assert!(!handle.note_unsubscribe("MD."));
        assert!(handle.note_unsubscribe("MD."));
    }

    #[test]
    fn publish_address_is_required() {
        let props = StaticProperties::new().with(keys::MIDDLEWARE_NAME, "no-publish");
        let err = Transport::new(&props).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArg(_)));
    }
}
