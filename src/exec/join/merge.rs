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
//! Partitioned sort-merge join.
//!
//! Each side is pre-tupled with a bucket hash, locally sorted by
//! `(hash, keys)`, split by `hash mod N` and redistributed by row. The
//! first side also produces the chunk and Bloom filters that prune the
//! second side's read. After the shuffle, a side that fits in memory is
//! re-hashed instead of merged; otherwise both sides are re-sorted
//! locally and merged with a rewinding cursor.

use crate::array::array::MemArray;
use crate::array::sort::{SortSpec, sort_array};
use crate::array::value::Value;
use crate::common::logging::debug;
use crate::common::Result;
use crate::exec::join::filters::{BloomFilter, ChunkFilter};
use crate::exec::join::hash_table::{JoinHashTable, hash_keys, keys_equal, keys_less};
use crate::exec::join::planner::compute_exact_array_size;
use crate::exec::join::reader::{InputReader, SortedReader, TupleStream, TupledReader};
use crate::exec::join::replication::{array_to_table_join, read_into_table};
use crate::exec::join::settings::{Settings, Side};
use crate::exec::join::writer::{OutputWriter, SplitWriter, TupledWriter};
use crate::runtime::exchange::QueryContext;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::redistribute::{Partitioning, redistribute_to_random_access};

/// Pre-tuple one side: raw input to `(tuple, hash bucket)` rows, with the
/// push-down filters applied on read and, for the first side, generated
/// along the way.
#[allow(clippy::too_many_arguments)]
fn read_into_pre_sort(
    input: &MemArray,
    settings: &Settings,
    side: Side,
    ctx: &QueryContext,
    mut chunk_filter_to_generate: Option<&mut ChunkFilter>,
    chunk_filter_to_apply: Option<&ChunkFilter>,
    mut bloom_filter_to_generate: Option<&mut BloomFilter>,
    bloom_filter_to_apply: Option<&BloomFilter>,
) -> Result<MemArray> {
    let mut reader = InputReader::new(
        input,
        settings,
        side,
        chunk_filter_to_apply,
        bloom_filter_to_apply,
    )?;
    let mut writer = TupledWriter::new(settings, side, ctx);
    let hash_mod = settings.num_hash_buckets();
    let num_keys = settings.num_keys();
    let mut scratch = Vec::with_capacity(64);
    while !reader.end() {
        let tuple = reader.tuple();
        if let Some(filter) = chunk_filter_to_generate.as_deref_mut() {
            filter.add_tuple(tuple)?;
        }
        if let Some(filter) = bloom_filter_to_generate.as_deref_mut() {
            filter.add_tuple(tuple, num_keys);
        }
        let hash = (hash_keys(tuple, num_keys, &mut scratch) as u64 % hash_mod) as u32;
        writer.write_tuple_with_hash(tuple, hash);
        reader.next()?;
    }
    writer.finalize()
}

/// Local sort by `(hash, key0, key1, …)` ascending.
fn sort_tupled(
    input: &MemArray,
    settings: &Settings,
    side: Side,
    ctx: &QueryContext,
) -> Result<MemArray> {
    let mut columns = Vec::with_capacity(settings.num_keys() + 1);
    columns.push(settings.tuple_size(side));
    columns.extend(0..settings.num_keys());
    sort_array(
        input,
        &SortSpec::new(columns),
        settings.chunk_size(),
        ctx.instance_id() as u64,
    )
}

/// Re-emit a sorted array routed by `hash mod N`, ready for the by-row
/// shuffle.
fn sorted_to_pre_sg(
    input: &MemArray,
    settings: &Settings,
    side: Side,
    ctx: &QueryContext,
) -> Result<MemArray> {
    let mut reader = TupledReader::new(input);
    let mut writer = SplitWriter::new(settings, side, ctx);
    while !reader.end() {
        writer.write_tuple(reader.tuple())?;
        reader.next()?;
    }
    writer.finalize()
}

/// Merge two `(hash, keys)`-ordered pre-tupled arrays, emitting the cross
/// product of every equal-key run. The right cursor rewinds to the start
/// of its matching block whenever consecutive left rows share keys.
pub fn local_sorted_merge_join(
    left_sorted: &MemArray,
    right_sorted: &MemArray,
    settings: &Settings,
    ctx: &QueryContext,
) -> Result<MemArray> {
    let mut output = OutputWriter::new(settings, ctx);
    let num_keys = settings.num_keys();
    let left_tuple_size = settings.tuple_size(Side::Left);
    let right_tuple_size = settings.tuple_size(Side::Right);
    let mut left = SortedReader::new(left_sorted);
    let mut right = SortedReader::new(right_sorted);
    let mut previous_left_keys: Vec<Value> = Vec::new();

    'outer: while !left.end() && !right.end() {
        let left_hash = left.tuple()[left_tuple_size].get_uint32()?;
        let mut right_hash = right.tuple()[right_tuple_size].get_uint32()?;
        while right_hash < left_hash {
            right.next()?;
            if right.end() {
                break 'outer;
            }
            right_hash = right.tuple()[right_tuple_size].get_uint32()?;
        }
        if right_hash > left_hash {
            left.next()?;
            continue;
        }
        // Same hash bucket, different keys sort within it; skip the
        // right entries below the left keys.
        while right_hash == left_hash && keys_less(right.tuple(), left.tuple(), num_keys) {
            right.next()?;
            if right.end() {
                break 'outer;
            }
            right_hash = right.tuple()[right_tuple_size].get_uint32()?;
        }
        if right_hash > left_hash {
            left.next()?;
            continue;
        }

        let previous_right_idx = right.idx();
        let mut matched = false;
        while !right.end()
            && right.tuple()[right_tuple_size].get_uint32()? == left_hash
            && keys_equal(left.tuple(), right.tuple(), num_keys)
        {
            if !matched {
                previous_left_keys = left.tuple()[..num_keys].to_vec();
                matched = true;
            }
            output.write_joined(left.tuple(), right.tuple());
            right.next()?;
        }
        left.next()?;
        if !left.end() && matched && keys_equal(&previous_left_keys, left.tuple(), num_keys) {
            // Duplicate left keys re-scan the full matching right block.
            right.set_idx(previous_right_idx);
        }
    }
    output.finalize()
}

pub fn global_merge_join(
    left: &MemArray,
    right: &MemArray,
    settings: &Settings,
    ctx: &QueryContext,
    first_side: Side,
) -> Result<MemArray> {
    let second_side = first_side.opposite();
    let (first_input, second_input) = match first_side {
        Side::Left => (left, right),
        Side::Right => (right, left),
    };

    let mut chunk_filter = ChunkFilter::new(settings, first_side);
    let mut bloom_filter = BloomFilter::new(settings.bloom_filter_bits());
    let first = read_into_pre_sort(
        first_input,
        settings,
        first_side,
        ctx,
        Some(&mut chunk_filter),
        None,
        Some(&mut bloom_filter),
        None,
    )?;
    let first = sort_tupled(&first, settings, first_side, ctx)?;
    let first = sorted_to_pre_sg(&first, settings, first_side, ctx)?;
    let first = redistribute_to_random_access(&first, Partitioning::ByRow, ctx, true)?;
    chunk_filter.global_exchange(ctx)?;
    bloom_filter.global_exchange(ctx)?;

    let second = read_into_pre_sort(
        second_input,
        settings,
        second_side,
        ctx,
        None,
        Some(&chunk_filter),
        None,
        Some(&bloom_filter),
    )?;
    let second = sort_tupled(&second, settings, second_side, ctx)?;
    let second = sorted_to_pre_sg(&second, settings, second_side, ctx)?;
    let second = redistribute_to_random_access(&second, Partitioning::ByRow, ctx, true)?;

    let first_size = compute_exact_array_size(&first);
    let second_size = compute_exact_array_size(&second);
    debug!(
        "equi_join merge after shuffle first size {} second size {}",
        first_size, second_size
    );

    if first_size < settings.hash_join_threshold() {
        debug!("equi_join merge rehashing first");
        let operator_tracker = MemTracker::new_root("equi_join");
        let mut table = JoinHashTable::new(
            settings.num_keys(),
            settings.num_hash_buckets(),
            settings.max_table_size_mb(),
            &operator_tracker,
        );
        let mut build_reader = TupledReader::new(&first);
        read_into_table(
            &mut build_reader,
            &mut table,
            settings.tuple_size(first_side),
            None,
        )?;
        let mut probe_reader = TupledReader::new(&second);
        let mut writer = OutputWriter::new(settings, ctx);
        array_to_table_join(
            &mut probe_reader,
            &mut table,
            &mut writer,
            first_side,
            settings.num_keys(),
        )?;
        writer.finalize()
    } else if second_size < settings.hash_join_threshold() {
        debug!("equi_join merge rehashing second");
        let operator_tracker = MemTracker::new_root("equi_join");
        let mut table = JoinHashTable::new(
            settings.num_keys(),
            settings.num_hash_buckets(),
            settings.max_table_size_mb(),
            &operator_tracker,
        );
        let mut build_reader = TupledReader::new(&second);
        read_into_table(
            &mut build_reader,
            &mut table,
            settings.tuple_size(second_side),
            None,
        )?;
        let mut probe_reader = TupledReader::new(&first);
        let mut writer = OutputWriter::new(settings, ctx);
        array_to_table_join(
            &mut probe_reader,
            &mut table,
            &mut writer,
            second_side,
            settings.num_keys(),
        )?;
        writer.finalize()
    } else {
        debug!("equi_join merge sorted");
        let first = sort_tupled(&first, settings, first_side, ctx)?;
        let second = sort_tupled(&second, settings, second_side, ctx)?;
        match first_side {
            Side::Left => local_sorted_merge_join(&first, &second, settings, ctx),
            Side::Right => local_sorted_merge_join(&second, &first, settings, ctx),
        }
    }
}
