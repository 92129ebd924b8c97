// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The naming protocol (spec §4.9, optional): an out-of-band discovery
//! exchange. A naming-publisher broadcasts this transport's own
//! publish/subscribe endpoints; a naming-subscriber learns peers'
//! endpoints and the dispatcher connects the primary sockets to them.

use crate::error::BridgeError;

pub const NAMING_TOPIC: &str = "_NAMING";

const FIELD_LEN: usize = 256;
/// `topic[256]; type: 1 byte; pub_endpoint[256]; sub_endpoint[256]` (spec §6).
pub const NAMING_RECORD_SIZE: usize = FIELD_LEN + 1 + FIELD_LEN + FIELD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingType {
    Hello = 0,
    Goodbye = 1,
}

impl NamingType {
    fn from_u8(b: u8) -> Result<NamingType, BridgeError> {
        match b {
            0 => Ok(NamingType::Hello),
            1 => Ok(NamingType::Goodbye),
            _ => Err(BridgeError::Protocol("naming record type out of range")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingRecord {
    pub naming_type: NamingType,
    pub pub_endpoint: String,
    pub sub_endpoint: String,
}

impl NamingRecord {
    pub fn hello(pub_endpoint: impl Into<String>, sub_endpoint: impl Into<String>) -> NamingRecord {
        NamingRecord { naming_type: NamingType::Hello, pub_endpoint: pub_endpoint.into(), sub_endpoint: sub_endpoint.into() }
    }

    pub fn goodbye(pub_endpoint: impl Into<String>, sub_endpoint: impl Into<String>) -> NamingRecord {
        NamingRecord { naming_type: NamingType::Goodbye, pub_endpoint: pub_endpoint.into(), sub_endpoint: sub_endpoint.into() }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        let mut out = vec![0u8; NAMING_RECORD_SIZE];
        write_fixed_field(&mut out[0..FIELD_LEN], NAMING_TOPIC)?;
        out[FIELD_LEN] = self.naming_type as u8;
        write_fixed_field(&mut out[FIELD_LEN + 1..FIELD_LEN + 1 + FIELD_LEN], &self.pub_endpoint)?;
        write_fixed_field(&mut out[FIELD_LEN + 1 + FIELD_LEN..], &self.sub_endpoint)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<NamingRecord, BridgeError> {
        if bytes.len() != NAMING_RECORD_SIZE {
            return Err(BridgeError::Protocol("malformed naming record"));
        }
        let naming_type = NamingType::from_u8(bytes[FIELD_LEN])?;
        let pub_endpoint = read_fixed_field(&bytes[FIELD_LEN + 1..FIELD_LEN + 1 + FIELD_LEN])?;
        let sub_endpoint = read_fixed_field(&bytes[FIELD_LEN + 1 + FIELD_LEN..])?;
        Ok(NamingRecord { naming_type, pub_endpoint, sub_endpoint })
    }
}

fn write_fixed_field(dst: &mut [u8], value: &str) -> Result<(), BridgeError> {
    if value.len() >= dst.len() {
        return Err(BridgeError::InvalidArg("naming field exceeds fixed width"));
    }
    dst[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

fn read_fixed_field(src: &[u8]) -> Result<String, BridgeError> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    std::str::from_utf8(&src[..end]).map(str::to_owned).map_err(|_| BridgeError::Protocol("naming field is not valid utf-8"))
}

/// Binds a `PUB` socket to every naming-incoming URI, used to
/// broadcast this transport's own endpoints.
pub fn bind_naming_publisher(ctx: &zmq::Context, addrs: &[String]) -> Result<zmq::Socket, BridgeError> {
    let socket = ctx.socket(zmq::PUB)?;
    for addr in addrs {
        socket.bind(addr)?;
    }
    Ok(socket)
}

/// Connects a `SUB` socket to every naming-outgoing URI and subscribes
/// to the naming topic.
pub fn connect_naming_subscriber(ctx: &zmq::Context, addrs: &[String]) -> Result<zmq::Socket, BridgeError> {
    let socket = ctx.socket(zmq::SUB)?;
    for addr in addrs {
        socket.connect(addr)?;
    }
    socket.set_subscribe(NAMING_TOPIC.as_bytes())?;
    Ok(socket)
}

pub fn send(socket: &zmq::Socket, record: &NamingRecord) -> Result<(), BridgeError> {
    socket.send(&record.encode()?, 0)?;
    Ok(())
}
