// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::fmt;

/// Taxonomy of failures a bridge operation can hit (spec §7): argument,
/// platform, capacity, protocol and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    #[error("platform error: {0}")]
    Platform(#[from] zmq::Error),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("operation on a destroyed object")]
    Lifecycle,

    #[error("reply wait timed out")]
    Timeout,

    #[error("no entry found for {0}")]
    NotFound(&'static str),
}

/// Fixed status enumeration returned across the public API boundary.
/// Public operations never propagate a Rust panic or an untyped error;
/// everything collapses to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Ok,
    Timeout,
    InvalidArg,
    PlatformError,
    NotFound,
    QueueFull,
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            BridgeStatus::Ok => "OK",
            BridgeStatus::Timeout => "TIMEOUT",
            BridgeStatus::InvalidArg => "INVALID_ARG",
            BridgeStatus::PlatformError => "PLATFORM_ERROR",
            BridgeStatus::NotFound => "NOT_FOUND",
            BridgeStatus::QueueFull => "QUEUE_FULL",
        };
        f.write_str(name)
    }
}

impl From<&BridgeError> for BridgeStatus {
    fn from(err: &BridgeError) -> BridgeStatus {
        match *err {
            BridgeError::InvalidArg(_) => BridgeStatus::InvalidArg,
            BridgeError::Platform(_) => BridgeStatus::PlatformError,
            BridgeError::CapacityExceeded(_) => BridgeStatus::QueueFull,
            BridgeError::Protocol(_) => BridgeStatus::PlatformError,
            BridgeError::Lifecycle => BridgeStatus::InvalidArg,
            BridgeError::Timeout => BridgeStatus::Timeout,
            BridgeError::NotFound(_) => BridgeStatus::NotFound,
        }
    }
}

impl From<BridgeError> for BridgeStatus {
    fn from(err: BridgeError) -> BridgeStatus {
        BridgeStatus::from(&err)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
