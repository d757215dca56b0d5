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
//! Replication hash join: replicate the small side everywhere, build a
//! table from it, probe with the local large side. No output shuffle is
//! needed because every instance holds the full build array.

use crate::array::array::MemArray;
use crate::common::Result;
use crate::exec::join::filters::ChunkFilter;
use crate::exec::join::hash_table::JoinHashTable;
use crate::exec::join::reader::{InputReader, TupleStream};
use crate::exec::join::settings::{Settings, Side};
use crate::exec::join::writer::OutputWriter;
use crate::runtime::exchange::QueryContext;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::redistribute::{Partitioning, redistribute_to_random_access};

/// Drain a reader into the table, optionally recording each tuple in a
/// chunk filter. Only the first `tuple_size` positions are stored, so
/// pre-tupled inputs shed their hash slot here.
pub fn read_into_table<R: TupleStream>(
    reader: &mut R,
    table: &mut JoinHashTable,
    tuple_size: usize,
    mut chunk_filter: Option<&mut ChunkFilter>,
) -> Result<()> {
    while !reader.end() {
        let tuple = &reader.tuple()[..tuple_size];
        if let Some(filter) = chunk_filter.as_deref_mut() {
            filter.add_tuple(tuple)?;
        }
        table.insert(tuple)?;
        reader.next()?;
    }
    Ok(())
}

/// Probe the table with every tuple of `reader`, emitting one output row
/// per (build entry, probe tuple) key match.
pub fn array_to_table_join<R: TupleStream>(
    reader: &mut R,
    table: &mut JoinHashTable,
    writer: &mut OutputWriter<'_>,
    build_side: Side,
    num_keys: usize,
) -> Result<()> {
    while !reader.end() {
        let tuple = reader.tuple();
        for payload in table.find(&tuple[..num_keys]) {
            writer.write_parts(&tuple[..num_keys], payload, tuple, build_side);
        }
        reader.next()?;
    }
    Ok(())
}

pub fn replication_hash_join(
    left: &MemArray,
    right: &MemArray,
    settings: &Settings,
    ctx: &QueryContext,
    build_side: Side,
) -> Result<MemArray> {
    let build_input = match build_side {
        Side::Left => left,
        Side::Right => right,
    };
    let replicated =
        redistribute_to_random_access(build_input, Partitioning::Replication, ctx, false)?;

    let operator_tracker = MemTracker::new_root("equi_join");
    let mut table = JoinHashTable::new(
        settings.num_keys(),
        settings.num_hash_buckets(),
        settings.max_table_size_mb(),
        &operator_tracker,
    );
    let mut chunk_filter = ChunkFilter::new(settings, build_side);
    let mut build_reader = InputReader::new(&replicated, settings, build_side, None, None)?;
    read_into_table(
        &mut build_reader,
        &mut table,
        settings.tuple_size(build_side),
        Some(&mut chunk_filter),
    )?;

    let probe_input = match build_side {
        Side::Left => right,
        Side::Right => left,
    };
    let mut probe_reader = InputReader::new(
        probe_input,
        settings,
        build_side.opposite(),
        Some(&chunk_filter),
        None,
    )?;
    let mut writer = OutputWriter::new(settings, ctx);
    array_to_table_join(
        &mut probe_reader,
        &mut table,
        &mut writer,
        build_side,
        settings.num_keys(),
    )?;
    writer.finalize()
}
