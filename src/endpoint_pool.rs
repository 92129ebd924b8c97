// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The endpoint pool (spec §4.2): a multimap from topic key to
//! subscription records, supporting fan-out (duplicate keys) and
//! identifier-addressed removal. Mutated only by the dispatcher
//! thread; see the concurrency discipline in spec §5.

use std::collections::HashMap;
use uuid::Uuid;

/// A multimap `topic_key -> [(id, record)]`, iterated in insertion
/// order per key so `for_each` delivers fan-out in registration order.
pub struct EndpointPool<T> {
    entries: HashMap<String, Vec<(Uuid, T)>>,
}

impl<T> Default for EndpointPool<T> {
    fn default() -> EndpointPool<T> {
        EndpointPool::new()
    }
}

impl<T> EndpointPool<T> {
    pub fn new() -> EndpointPool<T> {
        EndpointPool { entries: HashMap::new() }
    }

    pub fn register_with_identifier(&mut self, key: &str, id: Uuid, record: T) {
        self.entries.entry(key.to_owned()).or_default().push((id, record));
    }

    /// Removes the record for `id` at `key`. Removing the last record
    /// for a key does not remove the key itself; the caller (the
    /// dispatcher) decides separately whether to unsubscribe at the
    /// socket layer.
    pub fn unregister(&mut self, key: &str, id: Uuid) -> Option<T> {
        let records = self.entries.get_mut(key)?;
        let pos = records.iter().position(|(rid, _)| *rid == id)?;
        Some(records.remove(pos).1)
    }

    /// Invokes `f` for every record registered under `key`, in
    /// insertion order.
    pub fn for_each(&self, key: &str, mut f: impl FnMut(&T)) {
        if let Some(records) = self.entries.get(key) {
            for (_, record) in records {
                f(record);
            }
        }
    }

    /// True when `key` has no remaining record. Used by the dispatcher
    /// to decide whether to issue a socket-level unsubscribe.
    pub fn is_empty_at(&self, key: &str) -> bool {
        self.entries.get(key).map(|v| v.is_empty()).unwrap_or(true)
    }

    pub fn len_at(&self, key: &str) -> usize {
        self.entries.get(key).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_delivers_every_record_in_insertion_order() {
        let mut pool: EndpointPool<&'static str> = EndpointPool::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        pool.register_with_identifier("MD.AAPL", a, "first");
        pool.register_with_identifier("MD.AAPL", b, "second");

        let mut seen = Vec::new();
        pool.for_each("MD.AAPL", |r| seen.push(*r));

        assert_eq!(vec!["first", "second"], seen);
    }

    #[test]
    fn duplicate_keys_are_distinguished_by_identifier() {
        let mut pool: EndpointPool<&'static str> = EndpointPool::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        pool.register_with_identifier("MD.AAPL", a, "first");
        pool.register_with_identifier("MD.AAPL", b, "second");

        assert_eq!(Some("first"), pool.unregister("MD.AAPL", a));
        assert_eq!(1, pool.len_at("MD.AAPL"));

        let mut seen = Vec::new();
        pool.for_each("MD.AAPL", |r| seen.push(*r));
        assert_eq!(vec!["second"], seen);
    }

    #[test]
    fn removing_last_record_keeps_the_key_present_but_empty() {
        let mut pool: EndpointPool<&'static str> = EndpointPool::new();
        let a = Uuid::new_v4();
        pool.register_with_identifier("MD.AAPL", a, "only");
        pool.unregister("MD.AAPL", a);

        assert!(pool.is_empty_at("MD.AAPL"));
        assert_eq!(0, pool.len_at("MD.AAPL"));
    }

    #[test]
    fn unknown_key_is_empty() {
        let pool: EndpointPool<&'static str> = EndpointPool::new();
        assert!(pool.is_empty_at("MD.UNKNOWN"));
    }
}
