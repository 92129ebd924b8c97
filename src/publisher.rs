// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The publisher (spec §4.8): a thin emitter that serializes via the
//! wire codec and writes to the transport's publisher socket. Writes
//! are serialized by the transport's publisher mutex (spec §5).

use crate::error::BridgeError;
use crate::inbox::Inbox;
use crate::transport::TransportHandle;
use crate::wire::{Frame, MsgType};

pub struct Publisher {
    transport: TransportHandle,
}

impl Publisher {
    pub fn new(transport: TransportHandle) -> Publisher {
        Publisher { transport }
    }

    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.send_frame(Frame::new(subject, MsgType::PubSub, payload))
    }

    /// Builds an INBOX_REQUEST frame naming `inbox`'s reply-topic as
    /// `reply_handle`.
    pub fn send_from_inbox(&self, inbox: &Inbox, request_topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        let frame = Frame::new(request_topic, MsgType::InboxRequest, payload).with_reply_handle(inbox.reply_topic());
        self.send_frame(frame)
    }

    /// Extracts `reply_handle` from `request` and publishes an
    /// INBOX_RESPONSE frame with that string as the send-subject.
    pub fn send_reply(&self, request: &Frame, payload: Vec<u8>) -> Result<(), BridgeError> {
        let reply_handle = request
            .reply_handle
            .as_ref()
            .ok_or(BridgeError::Protocol("request frame missing reply_handle"))?
            .clone();
        let frame = Frame::new(reply_handle.clone(), MsgType::InboxResponse, payload).with_reply_handle(reply_handle);
        self.send_frame(frame)
    }

    fn send_frame(&self, frame: Frame) -> Result<(), BridgeError> {
        if !self.transport.is_alive() {
            return Err(BridgeError::Lifecycle);
        }
        let mut guard = self.transport.publisher.lock().expect("publisher mutex poisoned");
        let bytes = guard.codec.serialize(&frame)?.to_vec();
        guard.socket.send(&bytes, 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProperties;
    use crate::inbox::Inbox;
    use crate::queue::ImmediateQueue;
    use crate::transport::Transport;
    use std::sync::Arc;

    fn test_props(name: &str) -> StaticProperties {
        StaticProperties::new()
            .with("middleware_name", name)
            .with(crate::config::keys::incoming_address(0), format!("inproc://{}-sub", name))
            .with(crate::config::keys::outgoing_address(0), format!("inproc://{}-sub", name))
            .with("publish_address", format!("inproc://{}-pub", name))
    }

    #[test]
    fn publish_rejects_once_transport_is_destroyed() {
        let transport = Transport::new(&test_props("pub-destroyed")).unwrap();
        let publisher = Publisher::new(transport.handle());
        transport.destroy().unwrap();

        let err = publisher.publish("MD.AAPL", vec![1]).unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle));
    }

    #[test]
    fn send_reply_requires_reply_handle_on_request() {
        let transport = Transport::new(&test_props("pub-reply")).unwrap();
        let publisher = Publisher::new(transport.handle());
        let request = Frame::new("svc.ping", MsgType::PubSub, vec![1]);

        let err = publisher.send_reply(&request, b"pong".to_vec()).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn send_from_inbox_carries_reply_topic_as_reply_handle() {
        let transport = Transport::new(&test_props("pub-inbox")).unwrap();
        let publisher = Publisher::new(transport.handle());
        let inbox = Inbox::create(transport.handle(), Arc::new(ImmediateQueue), |_| {}, |_| {}, || {}).unwrap();

        publisher.send_from_inbox(&inbox, "svc.ping", b"ping".to_vec()).unwrap();
    }
}
