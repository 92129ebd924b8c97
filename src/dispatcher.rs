// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The dispatcher thread (spec §4.2/§5): the only thread allowed to
//! touch the subscriber and naming-subscriber sockets. It polls them
//! alongside the control-reader `PAIR` socket, applies subscribe
//! filters on command, decodes inbound frames, and routes them to the
//! endpoint pool, the wildcard list, or the inbox registry.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use crate::control::{ControlCommand, ControlReader};
use crate::naming::NamingRecord;
use crate::subscription::TransportMessage;
use crate::transport::TransportHandle;
use crate::wire::{Frame, FrameCodec, MsgType};

pub struct DispatcherHandles {
    pub subscriber: zmq::Socket,
    pub control: ControlReader,
    pub naming_subscriber: Option<zmq::Socket>,
    pub inner: TransportHandle,
}

const POLL_TIMEOUT_MS: i64 = 250;

pub fn run(handles: DispatcherHandles) {
    let DispatcherHandles { subscriber, control, naming_subscriber, inner } = handles;
    let mut codec = FrameCodec::new();
    let mut known_peers: HashSet<String> = HashSet::new();

    loop {
        let mut items = vec![control.as_poll_item(zmq::POLLIN), subscriber.as_poll_item(zmq::POLLIN)];
        if let Some(naming_socket) = &naming_subscriber {
            items.push(naming_socket.as_poll_item(zmq::POLLIN));
        }

        let ready = match zmq::poll(&mut items, POLL_TIMEOUT_MS) {
            Ok(n) => n,
            Err(err) => {
                inner.set_dispatch_status(format!("poll failed: {err}"));
                break;
            }
        };
        inner.stats.polls.fetch_add(1, Ordering::Relaxed);
        if ready == 0 {
            continue;
        }

        if items[0].is_readable() {
            match control.recv_command() {
                Ok(ControlCommand::Subscribe(prefix)) => {
                    if let Err(err) = subscriber.set_subscribe(prefix.as_bytes()) {
                        inner.set_dispatch_status(format!("set_subscribe failed: {err}"));
                        break;
                    }
                }
                Ok(ControlCommand::Unsubscribe(prefix)) => {
                    let _ = subscriber.set_unsubscribe(prefix.as_bytes());
                }
                Ok(ControlCommand::Shutdown) => break,
                Err(err) => {
                    log::warn!("dropping malformed control record: {err}");
                    inner.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if items[1].is_readable() {
            dispatch_subscriber_message(&subscriber, &mut codec, &inner);
        }

        if naming_subscriber.is_some() && items.len() > 2 && items[2].is_readable() {
            dispatch_naming_message(naming_subscriber.as_ref().unwrap(), &subscriber, &inner, &mut known_peers);
        }
    }
}

fn dispatch_subscriber_message(subscriber: &zmq::Socket, codec: &mut FrameCodec, inner: &TransportHandle) {
    let bytes = match subscriber.recv_bytes(0) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("subscriber recv failed: {err}");
            inner.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let frame = match codec.deserialize(&bytes) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("dropping malformed frame: {err}");
            inner.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    inner.stats.normal_messages.fetch_add(1, Ordering::Relaxed);

    match frame.msg_type {
        MsgType::InboxResponse => route_inbox_response(inner, frame),
        MsgType::PubSub | MsgType::InboxRequest | MsgType::SubRequest => route_to_subscribers(inner, frame),
    }
}

fn route_inbox_response(inner: &TransportHandle, frame: Frame) {
    let registry = inner.inboxes.lock().expect("inbox registry mutex poisoned");
    if let Some(record) = registry.lookup(&frame.subject) {
        drop(registry);
        let msg = TransportMessage { topic_key: frame.subject.clone(), endpoint_id: None, frame };
        record.enqueue_reply(msg);
    }
}

fn route_to_subscribers(inner: &TransportHandle, frame: Frame) {
    let subject = frame.subject.clone();

    inner.pool.lock().expect("pool mutex poisoned").for_each(&subject, |record| {
        let msg = TransportMessage { topic_key: subject.clone(), endpoint_id: Some(record.id), frame: frame.clone() };
        record.enqueue_exact_match(msg);
    });

    inner.wildcards.lock().expect("wildcard list mutex poisoned").for_each_matching(&subject, |record| {
        let msg = TransportMessage { topic_key: subject.clone(), endpoint_id: None, frame: frame.clone() };
        record.enqueue_wildcard_match(msg);
    });
}

fn dispatch_naming_message(
    naming_subscriber: &zmq::Socket,
    subscriber: &zmq::Socket,
    inner: &TransportHandle,
    known_peers: &mut HashSet<String>,
) {
    let bytes = match naming_subscriber.recv_bytes(0) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("naming subscriber recv failed: {err}");
            return;
        }
    };

    let record = match NamingRecord::decode(&bytes) {
        Ok(record) => record,
        Err(err) => {
            log::warn!("dropping malformed naming record: {err}");
            return;
        }
    };

    inner.stats.naming_messages.fetch_add(1, Ordering::Relaxed);

    match record.naming_type {
        crate::naming::NamingType::Hello => {
            if known_peers.insert(record.pub_endpoint.clone()) {
                if let Err(err) = subscriber.connect(&record.pub_endpoint) {
                    log::warn!("failed to connect subscriber to discovered peer {}: {}", record.pub_endpoint, err);
                    known_peers.remove(&record.pub_endpoint);
                    return;
                }
                let publisher = inner.publisher.lock().expect("publisher mutex poisoned");
                if let Err(err) = publisher.socket.connect(&record.sub_endpoint) {
                    log::warn!("failed to connect publisher to discovered peer {}: {}", record.sub_endpoint, err);
                }
            }
        }
        crate::naming::NamingType::Goodbye => {
            if known_peers.remove(&record.pub_endpoint) {
                let _ = subscriber.disconnect(&record.pub_endpoint);
                let publisher = inner.publisher.lock().expect("publisher mutex poisoned");
                let _ = publisher.socket.disconnect(&record.sub_endpoint);
            }
        }
    }
}
