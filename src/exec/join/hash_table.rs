// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Join hash table: open addressing with linear probing over a fixed
//! prime bucket count, multi-valued keys grouped per bucket slot.
//!
//! Responsibilities:
//! - Builds key-prefix groups from build-side tuples; duplicates append.
//! - Serves group lookup for probing plus the shared key hash/compare
//!   primitives used by the merge path.
//! - Accounts inserted bytes against a child `MemTracker` with the
//!   configured table cap; everything is released wholesale on drop.

use std::cmp::Ordering;
use std::sync::Arc;

use crc32c::crc32c;

use crate::array::value::Value;
use crate::common::{JoinError, Result};
use crate::runtime::mem_tracker::MemTracker;

// Matches the sizing notes behind the bucket tiers: a group costs at
// least this much beyond its values.
const GROUP_OVERHEAD_BYTES: i64 = 32;

struct Group {
    keys: Vec<Value>,
    entries: Vec<Vec<Value>>,
}

pub struct JoinHashTable {
    num_keys: usize,
    slots: Vec<Option<Box<Group>>>,
    num_entries: u64,
    tracker: Arc<MemTracker>,
    accounted_bytes: i64,
    scratch: Vec<u8>,
}

/// Stable 32-bit hash over the canonical byte encoding of the first
/// `num_keys` values, via the reusable scratch buffer.
pub fn hash_keys(tuple: &[Value], num_keys: usize, scratch: &mut Vec<u8>) -> u32 {
    scratch.clear();
    for value in &tuple[..num_keys] {
        value.encode(scratch);
    }
    crc32c(scratch)
}

pub fn keys_equal(a: &[Value], b: &[Value], num_keys: usize) -> bool {
    a[..num_keys]
        .iter()
        .zip(&b[..num_keys])
        .all(|(x, y)| x.total_cmp(y) == Ordering::Equal)
}

/// Lexicographic strictly-less over the key prefix under the per-type
/// total order.
pub fn keys_less(a: &[Value], b: &[Value], num_keys: usize) -> bool {
    for (x, y) in a[..num_keys].iter().zip(&b[..num_keys]) {
        match x.total_cmp(y) {
            Ordering::Less => return true,
            Ordering::Greater => return false,
            Ordering::Equal => {}
        }
    }
    false
}

impl JoinHashTable {
    /// `max_table_size_mb` caps the accounted bytes; breaching it after the
    /// planner committed to a hash strategy is fatal for the operator.
    pub fn new(
        num_keys: usize,
        num_buckets: u64,
        max_table_size_mb: u64,
        parent: &Arc<MemTracker>,
    ) -> Self {
        let limit = (max_table_size_mb as i64).saturating_mul(1024 * 1024);
        let tracker = MemTracker::new_child("JoinHashTable", limit, parent);
        let mut slots = Vec::new();
        slots.resize_with(num_buckets as usize, || None);
        Self {
            num_keys,
            slots,
            num_entries: 0,
            tracker,
            accounted_bytes: 0,
            scratch: Vec::with_capacity(64),
        }
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    fn probe_slot(&self, keys: &[Value], hash: u32) -> usize {
        let buckets = self.slots.len();
        let mut idx = hash as usize % buckets;
        loop {
            match &self.slots[idx] {
                None => return idx,
                Some(group) if keys_equal(&group.keys, keys, self.num_keys) => return idx,
                Some(_) => idx = (idx + 1) % buckets,
            }
        }
    }

    /// Insert a build tuple: key prefix in the low slots, payload after.
    pub fn insert(&mut self, tuple: &[Value]) -> Result<()> {
        let tuple_bytes: i64 = tuple.iter().map(|v| v.encoded_len() as i64).sum();
        let hash = hash_keys(tuple, self.num_keys, &mut self.scratch);
        let idx = self.probe_slot(&tuple[..self.num_keys], hash);
        let charge = if self.slots[idx].is_none() {
            tuple_bytes + GROUP_OVERHEAD_BYTES
        } else {
            tuple_bytes
        };
        if !self.tracker.try_consume(charge) {
            return Err(JoinError::resource(format!(
                "join hash table exceeded {} bytes",
                self.tracker.limit()
            )));
        }
        self.accounted_bytes += charge;
        let payload = tuple[self.num_keys..].to_vec();
        match &mut self.slots[idx] {
            Some(group) => group.entries.push(payload),
            slot @ None => {
                *slot = Some(Box::new(Group {
                    keys: tuple[..self.num_keys].to_vec(),
                    entries: vec![payload],
                }));
            }
        }
        self.num_entries += 1;
        Ok(())
    }

    /// Position at the group whose key prefix equals `keys`; the returned
    /// iterator yields the payload of each entry in the group.
    pub fn find(&mut self, keys: &[Value]) -> GroupIter<'_> {
        let hash = hash_keys(keys, self.num_keys, &mut self.scratch);
        let idx = self.probe_slot(keys, hash);
        GroupIter {
            entries: self.slots[idx].as_ref().map(|g| g.entries.iter()),
        }
    }
}

impl Drop for JoinHashTable {
    fn drop(&mut self) {
        self.tracker.release(self.accounted_bytes);
    }
}

pub struct GroupIter<'a> {
    entries: Option<std::slice::Iter<'a, Vec<Value>>>,
}

impl<'a> Iterator for GroupIter<'a> {
    type Item = &'a [Value];

    fn next(&mut self) -> Option<&'a [Value]> {
        self.entries.as_mut()?.next().map(|e| e.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(num_keys: usize) -> JoinHashTable {
        let root = MemTracker::new_root("operator");
        JoinHashTable::new(num_keys, 1_048_573, 128, &root)
    }

    fn tuple(key: i64, payload: &str) -> Vec<Value> {
        vec![Value::Int64(key), Value::String(payload.to_string())]
    }

    #[test]
    fn groups_collect_duplicate_keys() {
        let mut t = table(1);
        t.insert(&tuple(7, "a")).expect("insert");
        t.insert(&tuple(7, "b")).expect("insert");
        t.insert(&tuple(8, "c")).expect("insert");
        let payloads: Vec<String> = t
            .find(&[Value::Int64(7)])
            .map(|p| match &p[0] {
                Value::String(s) => s.clone(),
                other => panic!("unexpected payload {:?}", other),
            })
            .collect();
        assert_eq!(payloads, vec!["a", "b"]);
        assert_eq!(t.find(&[Value::Int64(9)]).count(), 0);
        assert_eq!(t.num_entries(), 3);
    }

    #[test]
    fn null_keys_group_together() {
        // Readers drop null-keyed tuples before insert; the table itself
        // treats null == null so a group stays internally consistent.
        let mut t = table(1);
        t.insert(&[Value::Null, Value::Int64(1)]).expect("insert");
        t.insert(&[Value::Null, Value::Int64(2)]).expect("insert");
        assert_eq!(t.find(&[Value::Null]).count(), 2);
    }

    #[test]
    fn payload_may_be_empty() {
        let mut t = table(1);
        t.insert(&[Value::Int64(3)]).expect("insert");
        t.insert(&[Value::Int64(3)]).expect("insert");
        let hits: Vec<&[Value]> = t.find(&[Value::Int64(3)]).collect();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].is_empty());
    }

    #[test]
    fn cap_breach_is_a_resource_error() {
        let root = MemTracker::new_root("operator");
        // 1 MB cap, strings of ~64KB: must fail well before 100 inserts.
        let mut t = JoinHashTable::new(1, 1_048_573, 1, &root);
        let big = "x".repeat(64 * 1024);
        let mut failed = false;
        for i in 0..100 {
            let row = vec![Value::Int64(i), Value::String(big.clone())];
            match t.insert(&row) {
                Ok(()) => {}
                Err(JoinError::Resource(_)) => {
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert!(failed);
    }

    #[test]
    fn tracker_releases_on_drop() {
        let root = MemTracker::new_root("operator");
        {
            let mut t = JoinHashTable::new(1, 1_048_573, 128, &root);
            t.insert(&tuple(1, "payload")).expect("insert");
            assert!(root.current() > 0);
        }
        assert_eq!(root.current(), 0);
    }

    #[test]
    fn hash_is_stable_across_scratch_reuse() {
        let mut scratch = Vec::new();
        let a = hash_keys(&[Value::Int64(42), Value::String("x".into())], 1, &mut scratch);
        let _ = hash_keys(&[Value::String("noise".into())], 1, &mut scratch);
        let b = hash_keys(&[Value::Int64(42)], 1, &mut scratch);
        assert_eq!(a, b);
    }

    #[test]
    fn keys_less_is_lexicographic() {
        let a = [Value::Int64(1), Value::String("b".into())];
        let b = [Value::Int64(1), Value::String("c".into())];
        assert!(keys_less(&a, &b, 2));
        assert!(!keys_less(&b, &a, 2));
        assert!(!keys_less(&a, &a, 2));
        assert!(keys_equal(&a, &a, 2));
    }
}
