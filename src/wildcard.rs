// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The wildcard list (spec §4.2/§4.6/§9): an ordered sequence of
//! wildcard subscription records, scanned linearly and matched with a
//! compiled regular expression against every inbound subject. This is
//! the documented O(|subjects| x |wildcards|) worst case; a prefix
//! trie over literal prefixes would cut it but is not required.

use regex::Regex;
use uuid::Uuid;

use crate::error::BridgeError;

/// The literal prefix a wildcard subscribes to at the socket layer,
/// e.g. `"MD."` for the pattern `"MD.*.US"`.
pub fn literal_prefix(subject_pattern: &str) -> &str {
    match subject_pattern.find('*') {
        Some(pos) => &subject_pattern[..pos],
        None => subject_pattern,
    }
}

struct Entry<T> {
    id: Uuid,
    regex: Regex,
    record: T,
}

/// An ordered list of wildcard subscriptions. Order matters only in
/// that `for_each_matching` visits entries in registration order; it
/// carries no fan-out priority semantics beyond that.
pub struct WildcardList<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for WildcardList<T> {
    fn default() -> WildcardList<T> {
        WildcardList::new()
    }
}

impl<T> WildcardList<T> {
    pub fn new() -> WildcardList<T> {
        WildcardList { entries: Vec::new() }
    }

    pub fn insert(&mut self, id: Uuid, regex_pattern: &str, record: T) -> Result<(), BridgeError> {
        let regex = Regex::new(regex_pattern).map_err(|_| BridgeError::InvalidArg("invalid wildcard regex"))?;
        self.entries.push(Entry { id, regex, record });
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos).record)
    }

    pub fn for_each_matching(&self, subject: &str, mut f: impl FnMut(&T)) {
        for entry in &self.entries {
            if entry.regex.is_match(subject) {
                f(&entry.record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_prefix_stops_at_first_star() {
        assert_eq!("MD.", literal_prefix("MD.*.US"));
        assert_eq!("MD.AAPL", literal_prefix("MD.AAPL"));
    }

    #[test]
    fn matching_subject_is_delivered() {
        let mut list: WildcardList<&'static str> = WildcardList::new();
        list.insert(Uuid::new_v4(), r"^MD\..+\.US$", "sub").unwrap();

        let mut seen = Vec::new();
        list.for_each_matching("MD.IBM.US", |r| seen.push(*r));
        assert_eq!(vec!["sub"], seen);
    }

    #[test]
    fn non_matching_subject_is_not_delivered() {
        let mut list: WildcardList<&'static str> = WildcardList::new();
        list.insert(Uuid::new_v4(), r"^MD\..+\.US$", "sub").unwrap();

        let mut seen = Vec::new();
        list.for_each_matching("MD.IBM.EU", |r| seen.push(*r));
        assert!(seen.is_empty());
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut list: WildcardList<&'static str> = WildcardList::new();
        let id = Uuid::new_v4();
        list.insert(id, r"^MD\..+\.US$", "sub").unwrap();
        assert_eq!(Some("sub"), list.remove(id));
        assert!(list.is_empty());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut list: WildcardList<&'static str> = WildcardList::new();
        let err = list.insert(Uuid::new_v4(), r"(unterminated", "sub").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArg(_)));
    }
}
