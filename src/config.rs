// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The host's property bag (spec §6), kept deliberately thin: parsing a
//! configuration file or environment is the host API's job, not this
//! crate's.

use std::collections::HashMap;

/// Recognized configuration keys for a transport.
pub mod keys {
    pub const MIDDLEWARE_NAME: &str = "middleware_name";
    pub const PUBLISH_ADDRESS: &str = "publish_address";
    pub const MEMORY_POOL_SIZE: &str = "memory_pool_size";
    pub const MEMORY_NODE_SIZE: &str = "memory_node_size";
    pub const MSG_POOL_SIZE: &str = "msg_pool_size";
    pub const MSG_NODE_SIZE: &str = "msg_node_size";
    pub const QUEUE_HIGH_WATER_MARK: &str = "queue_high_water_mark";
    pub const NAMING_REPUBLISH_INTERVAL_SECS: &str = "naming_republish_interval_secs";

    pub fn incoming_address(index: usize) -> String {
        format!("incoming_address[{}]", index)
    }

    pub fn outgoing_address(index: usize) -> String {
        format!("outgoing_address[{}]", index)
    }

    pub fn naming_incoming_address(index: usize) -> String {
        format!("naming_incoming_address[{}]", index)
    }

    pub fn naming_outgoing_address(index: usize) -> String {
        format!("naming_outgoing_address[{}]", index)
    }
}

pub const MAX_INCOMING_ADDRESSES: usize = 8;
pub const MAX_OUTGOING_ADDRESSES: usize = 8;
pub const MAX_NAMING_ADDRESSES: usize = 8;

/// A read-only view onto the host's configuration for one transport.
pub trait Properties {
    fn get(&self, key: &str) -> Option<&str>;

    fn get_or(&self, key: &str, default: &'static str) -> String {
        self.get(key).unwrap_or(default).to_owned()
    }

    fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Collects `incoming_address[0..7]` style indexed keys until the
    /// first missing index. Takes a plain function pointer (not a
    /// capturing closure) so the trait stays object-safe for `dyn
    /// Properties`.
    fn address_list(&self, prefix_fn: fn(usize) -> String, max: usize) -> Vec<String> {
        let mut out = Vec::new();
        for i in 0..max {
            match self.get(&prefix_fn(i)) {
                Some(v) => out.push(v.to_owned()),
                None => break,
            }
        }
        out
    }
}

/// A simple map-backed implementation, used by tests and by any host
/// that already has its configuration as key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct StaticProperties {
    values: HashMap<String, String>,
}

impl StaticProperties {
    pub fn new() -> StaticProperties {
        StaticProperties { values: HashMap::new() }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> StaticProperties {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl Properties for StaticProperties {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}
