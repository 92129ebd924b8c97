// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The wire codec (spec §4.1). Pure serialization; no I/O. A frame is
//! laid out as: subject (NUL-terminated) + type byte + optional
//! reply-handle (NUL-terminated) + payload. The payload's first byte
//! doubles as the host API's payload-kind tag; this mirrors
//! `zmqBridgeMamaMsgImpl_deserialize` reading a single byte where a
//! fuller header might have been expected, kept here as a documented
//! convention rather than "fixed".

use crate::error::BridgeError;
use crate::topic::MAX_SUBJECT_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    PubSub = 0,
    InboxRequest = 1,
    InboxResponse = 2,
    SubRequest = 3,
}

impl MsgType {
    pub fn from_u8(b: u8) -> Result<MsgType, BridgeError> {
        match b {
            0 => Ok(MsgType::PubSub),
            1 => Ok(MsgType::InboxRequest),
            2 => Ok(MsgType::InboxResponse),
            3 => Ok(MsgType::SubRequest),
            _ => Err(BridgeError::Protocol("msg_type out of range")),
        }
    }

    /// INBOX_REQUEST and INBOX_RESPONSE carry a reply-handle field;
    /// PUB_SUB and SUB_REQUEST do not.
    pub fn carries_reply_handle(self) -> bool {
        matches!(self, MsgType::InboxRequest | MsgType::InboxResponse)
    }
}

/// A decoded (or to-be-encoded) wire frame, spec §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub subject: String,
    pub msg_type: MsgType,
    pub reply_handle: Option<String>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(subject: impl Into<String>, msg_type: MsgType, payload: Vec<u8>) -> Frame {
        Frame { subject: subject.into(), msg_type, reply_handle: None, payload }
    }

    pub fn with_reply_handle(mut self, reply_handle: impl Into<String>) -> Frame {
        self.reply_handle = Some(reply_handle.into());
        self
    }

    /// The payload-kind tag carried by the host API: the payload's
    /// first byte. The remaining payload bytes stay contiguous with it.
    pub fn payload_type_tag(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Serializes and deserializes frames, owning a reusable growable
/// buffer so repeated sends do not allocate per message. Growth is
/// amortized doubling, same discipline `pipe.rs`'s read/write buffers
/// use in the teacher crate.
pub struct FrameCodec {
    buffer: Vec<u8>,
}

impl Default for FrameCodec {
    fn default() -> FrameCodec {
        FrameCodec::new()
    }
}

impl FrameCodec {
    pub fn new() -> FrameCodec {
        FrameCodec { buffer: Vec::with_capacity(256) }
    }

    fn reserve_for(&mut self, needed: usize) {
        if self.buffer.capacity() < needed {
            let mut new_cap = self.buffer.capacity().max(256);
            while new_cap < needed {
                new_cap *= 2;
            }
            self.buffer.reserve(new_cap - self.buffer.len());
        }
        self.buffer.clear();
    }

    /// Lays out `frame` into the codec's internal buffer and returns a
    /// borrow of exactly the serialized bytes.
    pub fn serialize(&mut self, frame: &Frame) -> Result<&[u8], BridgeError> {
        if frame.subject.len() >= MAX_SUBJECT_LENGTH {
            return Err(BridgeError::Protocol("subject exceeds MAX_SUBJECT_LENGTH"));
        }
        if frame.msg_type.carries_reply_handle() {
            match &frame.reply_handle {
                Some(h) if !h.is_empty() => {}
                _ => return Err(BridgeError::Protocol("inbox frame missing reply_handle")),
            }
        }
        if frame.payload.is_empty() {
            return Err(BridgeError::Protocol("payload must carry at least one byte"));
        }

        let reply_len = frame.reply_handle.as_ref().map(|h| h.len() + 1).unwrap_or(0);
        let needed = frame.subject.len() + 1 + 1 + reply_len + frame.payload.len();
        self.reserve_for(needed);

        self.buffer.extend_from_slice(frame.subject.as_bytes());
        self.buffer.push(0);
        self.buffer.push(frame.msg_type as u8);
        if let Some(handle) = &frame.reply_handle {
            if frame.msg_type.carries_reply_handle() {
                self.buffer.extend_from_slice(handle.as_bytes());
                self.buffer.push(0);
            }
        }
        self.buffer.extend_from_slice(&frame.payload);

        Ok(&self.buffer[..needed])
    }

    /// Parses `bytes` field-by-field in wire order. Does not retain a
    /// borrow of `bytes`; the resulting `Frame` owns its strings.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<Frame, BridgeError> {
        let subject_nul = find_nul(bytes).ok_or(BridgeError::Protocol("missing subject terminator"))?;
        if subject_nul >= MAX_SUBJECT_LENGTH {
            return Err(BridgeError::Protocol("subject exceeds MAX_SUBJECT_LENGTH"));
        }
        let subject = std::str::from_utf8(&bytes[..subject_nul])
            .map_err(|_| BridgeError::Protocol("subject is not valid utf-8"))?
            .to_owned();

        let type_pos = subject_nul + 1;
        let type_byte = *bytes.get(type_pos).ok_or(BridgeError::Protocol("missing type byte"))?;
        let msg_type = MsgType::from_u8(type_byte)?;

        let mut cursor = type_pos + 1;
        let mut reply_handle = None;
        if msg_type.carries_reply_handle() {
            let rel_nul = find_nul(&bytes[cursor..]).ok_or(BridgeError::Protocol("missing reply_handle terminator"))?;
            if rel_nul == 0 {
                return Err(BridgeError::Protocol("inbox frame missing reply_handle"));
            }
            let handle = std::str::from_utf8(&bytes[cursor..cursor + rel_nul])
                .map_err(|_| BridgeError::Protocol("reply_handle is not valid utf-8"))?
                .to_owned();
            reply_handle = Some(handle);
            cursor += rel_nul + 1;
        }

        let payload = bytes[cursor..].to_vec();
        if payload.is_empty() {
            return Err(BridgeError::Protocol("payload must carry at least one byte"));
        }

        Ok(Frame { subject, msg_type, reply_handle, payload })
    }
}

fn find_nul(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == 0)
}
