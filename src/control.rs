// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The control channel (spec §4.3): a `zmq::PAIR` pair bound on an
//! `inproc://` address, carrying fixed-size subscribe/unsubscribe/
//! shutdown records from any application thread onto the dispatcher.

use std::sync::Mutex;

use crate::error::BridgeError;
use crate::topic::MAX_SUBJECT_LENGTH;

/// `command: 1 byte; arg1: 256 bytes NUL-padded` (spec §6).
pub const CONTROL_RECORD_SIZE: usize = 1 + MAX_SUBJECT_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

impl ControlCommand {
    pub fn encode(&self) -> Result<[u8; CONTROL_RECORD_SIZE], BridgeError> {
        let mut record = [0u8; CONTROL_RECORD_SIZE];
        let (tag, arg) = match self {
            ControlCommand::Subscribe(topic) => (b'S', topic.as_str()),
            ControlCommand::Unsubscribe(topic) => (b'U', topic.as_str()),
            ControlCommand::Shutdown => (b'X', ""),
        };
        if arg.len() >= MAX_SUBJECT_LENGTH {
            return Err(BridgeError::InvalidArg("control command argument too long"));
        }
        record[0] = tag;
        record[1..1 + arg.len()].copy_from_slice(arg.as_bytes());
        Ok(record)
    }

    pub fn decode(bytes: &[u8]) -> Result<ControlCommand, BridgeError> {
        if bytes.len() != CONTROL_RECORD_SIZE {
            return Err(BridgeError::Protocol("malformed control record"));
        }
        let arg_end = bytes[1..].iter().position(|&b| b == 0).unwrap_or(bytes.len() - 1);
        let arg = std::str::from_utf8(&bytes[1..1 + arg_end])
            .map_err(|_| BridgeError::Protocol("control argument is not valid utf-8"))?
            .to_owned();

        match bytes[0] {
            b'S' => Ok(ControlCommand::Subscribe(arg)),
            b'U' => Ok(ControlCommand::Unsubscribe(arg)),
            b'X' => Ok(ControlCommand::Shutdown),
            _ => Err(BridgeError::Protocol("unknown control command tag")),
        }
    }
}

/// The reader half, polled by the dispatcher thread only.
pub struct ControlReader {
    socket: zmq::Socket,
}

impl ControlReader {
    pub fn bind(ctx: &zmq::Context, addr: &str) -> Result<ControlReader, BridgeError> {
        let socket = ctx.socket(zmq::PAIR)?;
        socket.bind(addr)?;
        Ok(ControlReader { socket })
    }

    pub fn as_poll_item(&self, events: zmq::PollEvents) -> zmq::PollItem<'_> {
        self.socket.as_poll_item(events)
    }

    pub fn recv_command(&self) -> Result<ControlCommand, BridgeError> {
        let bytes = self.socket.recv_bytes(0)?;
        ControlCommand::decode(&bytes)
    }
}

/// The writer half. Reachable from any thread; writes are serialized
/// by an internal mutex since the underlying socket is not
/// thread-safe (spec §5).
pub struct ControlSender {
    socket: Mutex<zmq::Socket>,
}

impl ControlSender {
    pub fn connect(ctx: &zmq::Context, addr: &str) -> Result<ControlSender, BridgeError> {
        let socket = ctx.socket(zmq::PAIR)?;
        socket.connect(addr)?;
        Ok(ControlSender { socket: Mutex::new(socket) })
    }

    pub fn send(&self, cmd: &ControlCommand) -> Result<(), BridgeError> {
        let record = cmd.encode()?;
        let socket = self.socket.lock().expect("control sender mutex poisoned");
        socket.send(&record[..], 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_round_trips() {
        let cmd = ControlCommand::Subscribe("MD.AAPL".to_owned());
        let record = cmd.encode().unwrap();
        assert_eq!(cmd, ControlCommand::decode(&record).unwrap());
    }

    #[test]
    fn shutdown_round_trips_with_empty_argument() {
        let cmd = ControlCommand::Shutdown;
        let record = cmd.encode().unwrap();
        assert_eq!(cmd, ControlCommand::decode(&record).unwrap());
    }

    #[test]
    fn encode_rejects_oversized_argument() {
        let cmd = ControlCommand::Subscribe("a".repeat(300));
        assert!(matches!(cmd.encode(), Err(BridgeError::InvalidArg(_))));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(ControlCommand::decode(&[b'X']), Err(BridgeError::Protocol(_))));
    }

    #[test]
    fn control_channel_delivers_subscribe_over_inproc() {
        let ctx = zmq::Context::new();
        let reader = ControlReader::bind(&ctx, "inproc://control-channel-test").unwrap();
        let sender = ControlSender::connect(&ctx, "inproc://control-channel-test").unwrap();

        sender.send(&ControlCommand::Subscribe("MD.AAPL".to_owned())).unwrap();
        let received = reader.recv_command().unwrap();

        assert_eq!(ControlCommand::Subscribe("MD.AAPL".to_owned()), received);
    }
}
