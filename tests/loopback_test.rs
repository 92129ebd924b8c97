// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! End-to-end exercises of the public API over real `zmq` sockets: a
//! transport publishing to its own subscriber over an `inproc://`
//! loopback. Publishes are retried for a short window to absorb 0MQ's
//! well-known "slow joiner" propagation delay between a `SUB` filter
//! being applied and a `PUB` socket's peer table catching up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zmq_bridge_core::config::{keys, StaticProperties};
use zmq_bridge_core::queue::ImmediateQueue;
use zmq_bridge_core::publisher::Publisher;
use zmq_bridge_core::subscription::Subscription;
use zmq_bridge_core::inbox::Inbox;
use zmq_bridge_core::transport::Transport;

fn loopback_props(name: &str) -> StaticProperties {
    StaticProperties::new()
        .with(keys::MIDDLEWARE_NAME, name)
        .with(keys::PUBLISH_ADDRESS, format!("inproc://{}-pub", name))
        .with(keys::outgoing_address(0), format!("inproc://{}-pub", name))
}

#[test]
fn published_message_is_delivered_to_a_matching_subscription() {
    let _ = env_logger::try_init();
    let transport = Transport::new(&loopback_props("pubsub-loopback")).unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    let subscription = Subscription::create(
        transport.handle(),
        "MD.AAPL",
        Arc::new(ImmediateQueue),
        move |msg| {
            assert_eq!(vec![1, 2, 3], msg.frame.payload);
            received_clone.fetch_add(1, Ordering::SeqCst);
        },
        || {},
    )
    .unwrap();

    let publisher = Publisher::new(transport.handle());
    let mut delivered = false;
    for _ in 0..200 {
        publisher.publish("MD.AAPL", vec![1, 2, 3]).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        if received.load(Ordering::SeqCst) > 0 {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "expected at least one published message to reach the subscription");

    subscription.destroy().unwrap();
    transport.destroy().unwrap();
}

#[test]
fn muted_subscription_stops_receiving_without_being_destroyed() {
    let _ = env_logger::try_init();
    let transport = Transport::new(&loopback_props("mute-loopback")).unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    let subscription = Subscription::create(
        transport.handle(),
        "MD.AAPL",
        Arc::new(ImmediateQueue),
        move |_| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        },
        || {},
    )
    .unwrap();

    let publisher = Publisher::new(transport.handle());
    for _ in 0..200 {
        publisher.publish("MD.AAPL", vec![1]).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        if received.load(Ordering::SeqCst) > 0 {
            break;
        }
    }
    assert!(received.load(Ordering::SeqCst) > 0, "precondition: subscription must be receiving before mute");

    subscription.mute();
    let before_mute = received.load(Ordering::SeqCst);
    for _ in 0..20 {
        publisher.publish("MD.AAPL", vec![1]).unwrap();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(before_mute, received.load(Ordering::SeqCst), "muted subscription must not receive further messages");

    subscription.destroy().unwrap();
    transport.destroy().unwrap();
}

#[test]
fn inbox_request_is_answered_by_a_loopback_responder() {
    let _ = env_logger::try_init();
    let transport = Transport::new(&loopback_props("inbox-loopback")).unwrap();

    let responder_publisher = Publisher::new(transport.handle());
    let responder = Subscription::create(
        transport.handle(),
        "svc.ping",
        Arc::new(ImmediateQueue),
        move |msg| {
            responder_publisher.send_reply(&msg.frame, b"pong".to_vec()).unwrap();
        },
        || {},
    )
    .unwrap();

    let requester_publisher = Publisher::new(transport.handle());
    let inbox = Inbox::create(transport.handle(), Arc::new(ImmediateQueue), |_| {}, |_| {}, || {}).unwrap();

    let mut reply = None;
    for _ in 0..50 {
        inbox.send_request(&requester_publisher, "svc.ping", b"ping".to_vec()).unwrap();
        if let Ok(r) = inbox.wait_reply(0.1) {
            reply = Some(r);
            break;
        }
    }
    let reply = reply.expect("expected a reply from the loopback responder");
    assert_eq!(b"pong".to_vec(), reply.frame.payload);

    inbox.destroy().unwrap();
    responder.destroy().unwrap();
    transport.destroy().unwrap();
}
