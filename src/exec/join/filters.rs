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
//! Push-down filters generated on the build side and applied on the probe
//! side.
//!
//! Responsibilities:
//! - `ChunkFilter`: set of probe-side chunk coordinates reachable from the
//!   build keys; probing skips chunks outside the set.
//! - `BloomFilter`: salted block filter over hashed keys; probing skips
//!   tuples it rules out. No false negatives.
//! - Both fold element-wise into the union across instances via
//!   `global_exchange`.

use bytes::Bytes;
use hashbrown::HashSet;

use crate::array::chunk::Coordinates;
use crate::array::value::{Value, read_u64_le};
use crate::common::{JoinError, Result};
use crate::exec::join::settings::{Settings, Side};
use crate::runtime::collectives::all_gather;
use crate::runtime::exchange::QueryContext;

/// Probe-side dimensions that are join keys pin the chunks a build tuple
/// can possibly match. One axis per such dimension.
#[derive(Clone, Debug)]
struct FilterAxis {
    dim_idx: usize,
    key_idx: usize,
    start: i64,
    chunk_interval: i64,
}

pub struct ChunkFilter {
    axes: Vec<FilterAxis>,
    coords: HashSet<Vec<i64>>,
}

impl ChunkFilter {
    /// Build-side filter keyed against the opposite (probe) side's chunk
    /// geometry. `build_side` names the side whose tuples will be added.
    pub fn new(settings: &Settings, build_side: Side) -> Self {
        let probe_side = build_side.opposite();
        let probe_desc = settings.desc(probe_side);
        let probe_keys = settings.keys(probe_side);
        let mut axes = Vec::new();
        for (key_idx, &field) in probe_keys.iter().enumerate() {
            if field < probe_desc.num_attrs() {
                continue;
            }
            let dim_idx = field - probe_desc.num_attrs();
            let dim = &probe_desc.dimensions[dim_idx];
            axes.push(FilterAxis {
                dim_idx,
                key_idx,
                start: dim.start,
                chunk_interval: dim.chunk_interval,
            });
        }
        Self {
            axes,
            coords: HashSet::new(),
        }
    }

    /// True when no probe dimension participates in the join; the filter
    /// then passes every chunk and exchanges nothing.
    pub fn is_inert(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn num_coords(&self) -> usize {
        self.coords.len()
    }

    /// Record the probe chunk that could contain matches for a build tuple.
    pub fn add_tuple(&mut self, tuple: &[Value]) -> Result<()> {
        if self.is_inert() {
            return Ok(());
        }
        let mut projected = Vec::with_capacity(self.axes.len());
        for axis in &self.axes {
            let coord = tuple[axis.key_idx].get_int64()?;
            let offset = coord - axis.start;
            let snapped =
                axis.start + offset.div_euclid(axis.chunk_interval) * axis.chunk_interval;
            projected.push(snapped);
        }
        self.coords.insert(projected);
        Ok(())
    }

    /// Check a probe chunk origin against the recorded set.
    pub fn matches_chunk(&self, origin: &Coordinates) -> bool {
        if self.is_inert() {
            return true;
        }
        let projected: Vec<i64> = self.axes.iter().map(|a| origin[a.dim_idx]).collect();
        self.coords.contains(&projected)
    }

    fn serialize(&self) -> Bytes {
        let mut buf = Vec::with_capacity(8 + self.coords.len() * self.axes.len() * 8);
        buf.extend_from_slice(&(self.coords.len() as u64).to_le_bytes());
        for coord in &self.coords {
            for c in coord {
                buf.extend_from_slice(&c.to_le_bytes());
            }
        }
        Bytes::from(buf)
    }

    fn merge_serialized(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        let count = read_u64_le(data, &mut offset)?;
        for _ in 0..count {
            let mut coord = Vec::with_capacity(self.axes.len());
            for _ in 0..self.axes.len() {
                coord.push(read_u64_le(data, &mut offset)? as i64);
            }
            self.coords.insert(coord);
        }
        Ok(())
    }

    /// Fold every instance's coordinate set into the union.
    pub fn global_exchange(&mut self, ctx: &QueryContext) -> Result<()> {
        if self.is_inert() {
            return Ok(());
        }
        let me = ctx.instance_id();
        let parts = all_gather(ctx, self.serialize())?;
        for (src, part) in parts.iter().enumerate() {
            if src != me {
                self.merge_serialized(part)?;
            }
        }
        Ok(())
    }
}

const BLOOM_SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

fn make_mask(key: u32) -> [u32; 8] {
    let mut masks = [0u32; 8];
    for i in 0..8 {
        let shifted = key.wrapping_mul(BLOOM_SALT[i]) >> 27;
        masks[i] = 1u32 << shifted;
    }
    masks
}

fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// 64-bit key hash feeding the block filter, distinct from the 32-bit
/// bucket hash of the table.
pub fn bloom_hash_keys(tuple: &[Value], num_keys: usize, scratch: &mut Vec<u8>) -> u64 {
    scratch.clear();
    for value in &tuple[..num_keys] {
        value.encode(scratch);
    }
    hash_bytes_with_seed(0x811C9DC5, scratch)
}

/// Salted block Bloom filter: each bucket is eight 32-bit lanes and an
/// insertion sets one bit per lane.
pub struct BloomFilter {
    log_num_buckets: i32,
    directory_mask: u32,
    directory: Vec<u32>,
    scratch: Vec<u8>,
}

impl BloomFilter {
    /// Size the directory for the requested number of bits (one bucket per
    /// 256 bits, rounded up to a power of two).
    pub fn new(num_bits: u64) -> Self {
        let buckets = (num_bits.max(256) / 256).next_power_of_two();
        let log_num_buckets = buckets.trailing_zeros() as i32;
        let directory_mask = (buckets - 1) as u32;
        Self {
            log_num_buckets,
            directory_mask,
            directory: vec![0u32; (buckets as usize) * 8],
            scratch: Vec::with_capacity(64),
        }
    }

    pub fn num_bits(&self) -> u64 {
        (self.directory.len() as u64) * 32
    }


    fn insert_hash(&mut self, hash: u64) {
        let bucket_idx = (hash as u32) & self.directory_mask;
        let key = (hash >> self.log_num_buckets as u32) as u32;
        let masks = make_mask(key);
        let base = bucket_idx as usize * 8;
        for i in 0..8 {
            self.directory[base + i] |= masks[i];
        }
    }

    fn test_hash(&self, hash: u64) -> bool {
        let bucket_idx = (hash as u32) & self.directory_mask;
        let key = (hash >> self.log_num_buckets as u32) as u32;
        let masks = make_mask(key);
        let base = bucket_idx as usize * 8;
        for i in 0..8 {
            if (self.directory[base + i] & masks[i]) == 0 {
                return false;
            }
        }
        true
    }

    pub fn add_tuple(&mut self, tuple: &[Value], num_keys: usize) {
        let mut scratch = std::mem::take(&mut self.scratch);
        let hash = bloom_hash_keys(tuple, num_keys, &mut scratch);
        self.scratch = scratch;
        self.insert_hash(hash);
    }

    /// Probe-side membership test; `scratch` is the caller's reusable
    /// encode buffer.
    pub fn may_contain(&self, tuple: &[Value], num_keys: usize, scratch: &mut Vec<u8>) -> bool {
        self.test_hash(bloom_hash_keys(tuple, num_keys, scratch))
    }

    fn serialize(&self) -> Bytes {
        let mut buf = Vec::with_capacity(8 + self.directory.len() * 4);
        buf.extend_from_slice(&self.log_num_buckets.to_le_bytes());
        buf.extend_from_slice(&self.directory_mask.to_le_bytes());
        for value in &self.directory {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Bytes::from(buf)
    }

    fn merge_serialized(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        let log_num_buckets = crate::array::value::read_u32_le(data, &mut offset)? as i32;
        let directory_mask = crate::array::value::read_u32_le(data, &mut offset)?;
        if log_num_buckets != self.log_num_buckets || directory_mask != self.directory_mask {
            return Err(JoinError::transport("bloom filter merge size mismatch"));
        }
        if data.len() - offset != self.directory.len() * 4 {
            return Err(JoinError::transport("bloom filter payload truncated"));
        }
        for slot in self.directory.iter_mut() {
            *slot |= crate::array::value::read_u32_le(data, &mut offset)?;
        }
        Ok(())
    }

    /// Bitwise-OR fold of every instance's directory.
    pub fn global_exchange(&mut self, ctx: &QueryContext) -> Result<()> {
        let me = ctx.instance_id();
        let parts = all_gather(ctx, self.serialize())?;
        for (src, part) in parts.iter().enumerate() {
            if src != me {
                self.merge_serialized(part)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloom_has_no_false_negatives() {
        let mut filter = BloomFilter::new(1 << 16);
        for i in 0..1000i64 {
            filter.add_tuple(&[Value::Int64(i)], 1);
        }
        let mut scratch = Vec::new();
        for i in 0..1000i64 {
            assert!(filter.may_contain(&[Value::Int64(i)], 1, &mut scratch));
        }
    }

    #[test]
    fn bloom_rules_out_most_absent_keys() {
        let mut filter = BloomFilter::new(1 << 20);
        for i in 0..100i64 {
            filter.add_tuple(&[Value::Int64(i)], 1);
        }
        let mut scratch = Vec::new();
        let false_positives = (10_000..20_000i64)
            .filter(|i| filter.may_contain(&[Value::Int64(*i)], 1, &mut scratch))
            .count();
        assert!(
            false_positives < 100,
            "false positive count {}",
            false_positives
        );
    }

    #[test]
    fn bloom_merge_is_union() {
        let mut a = BloomFilter::new(1 << 12);
        let mut b = BloomFilter::new(1 << 12);
        a.add_tuple(&[Value::Int64(1)], 1);
        b.add_tuple(&[Value::Int64(2)], 1);
        let payload = b.serialize();
        a.merge_serialized(&payload).expect("merge");
        let mut scratch = Vec::new();
        assert!(a.may_contain(&[Value::Int64(1)], 1, &mut scratch));
        assert!(a.may_contain(&[Value::Int64(2)], 1, &mut scratch));
    }

    #[test]
    fn bloom_merge_rejects_mismatched_geometry() {
        let mut a = BloomFilter::new(1 << 12);
        let b = BloomFilter::new(1 << 16);
        let err = a.merge_serialized(&b.serialize()).expect_err("mismatch");
        assert!(matches!(err, JoinError::Transport(_)));
    }

    mod chunk_filter {
        use super::*;
        use crate::array::schema::{ArrayDesc, AttributeDesc, DimensionDesc};
        use crate::array::value::ValueType;
        use crate::common::config::EngineConfig;

        fn settings_with_dim_key() -> Settings {
            // Right key is its dimension; a left-build filter can pin
            // right chunks.
            let left = ArrayDesc::new(
                "l",
                vec![AttributeDesc::new("k", ValueType::Int64, false)],
                vec![DimensionDesc::new("i", 0, 1000, 10)],
            );
            let right = ArrayDesc::new(
                "r",
                vec![AttributeDesc::new("v", ValueType::String, true)],
                vec![DimensionDesc::new("j", 0, 1000, 10)],
            );
            Settings::new(
                left,
                right,
                &["left_keys=0".to_string(), "right_keys=1".to_string()],
                &EngineConfig::default(),
                2,
            )
            .expect("settings")
        }

        #[test]
        fn records_probe_chunk_origins() {
            let settings = settings_with_dim_key();
            let mut filter = ChunkFilter::new(&settings, Side::Left);
            assert!(!filter.is_inert());
            // Build tuple key 25 lands in right chunk [20..30).
            filter
                .add_tuple(&[Value::Int64(25), Value::Int64(7)])
                .expect("add");
            assert!(filter.matches_chunk(&vec![20]));
            assert!(!filter.matches_chunk(&vec![30]));
        }

        #[test]
        fn attribute_only_keys_make_an_inert_filter() {
            let settings = settings_with_dim_key();
            // Build side right: probe side left joins on an attribute.
            let filter = ChunkFilter::new(&settings, Side::Right);
            assert!(filter.is_inert());
            assert!(filter.matches_chunk(&vec![990]));
        }

        #[test]
        fn serialized_union_round_trips() {
            let settings = settings_with_dim_key();
            let mut a = ChunkFilter::new(&settings, Side::Left);
            let mut b = ChunkFilter::new(&settings, Side::Left);
            a.add_tuple(&[Value::Int64(5), Value::Int64(0)]).expect("add");
            b.add_tuple(&[Value::Int64(995), Value::Int64(0)]).expect("add");
            a.merge_serialized(&b.serialize()).expect("merge");
            assert_eq!(a.num_coords(), 2);
            assert!(a.matches_chunk(&vec![0]));
            assert!(a.matches_chunk(&vec![990]));
        }
    }
}
