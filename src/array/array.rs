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
//! In-memory chunked array with the access-mode contract the join
//! operator depends on.
//!
//! Responsibilities:
//! - Holds chunks in coordinate order and serves chunk iteration plus
//!   random access by origin.
//! - Tracks the supported access mode and materialization state consumed
//!   by the planner.

use std::collections::BTreeMap;

use crate::array::chunk::{Coordinates, TupleChunk};
use crate::array::schema::ArrayDesc;

/// What the producer of an array guarantees about re-reading it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMode {
    Random,
    MultiPass,
    SinglePass,
}

#[derive(Clone, Debug)]
pub struct MemArray {
    desc: ArrayDesc,
    chunks: BTreeMap<Coordinates, TupleChunk>,
    access: AccessMode,
    materialized: bool,
}

impl MemArray {
    pub fn new(desc: ArrayDesc) -> Self {
        Self {
            desc,
            chunks: BTreeMap::new(),
            access: AccessMode::Random,
            materialized: true,
        }
    }

    /// Same data, weaker contract. Used by tests and hosts that stream.
    pub fn with_access(mut self, access: AccessMode, materialized: bool) -> Self {
        self.access = access;
        self.materialized = materialized;
        self
    }

    pub fn desc(&self) -> &ArrayDesc {
        &self.desc
    }

    pub fn supported_access(&self) -> AccessMode {
        self.access
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    /// Upgrade a single-pass array so it can be walked repeatedly. The
    /// in-memory host already holds all chunks, so this only strengthens
    /// the contract.
    pub fn ensure_random_access(&mut self) {
        self.access = AccessMode::Random;
        self.materialized = true;
    }

    pub fn insert_chunk(&mut self, chunk: TupleChunk) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.insert(chunk.origin.clone(), chunk);
    }

    pub fn chunk_at(&self, origin: &Coordinates) -> Option<&TupleChunk> {
        self.chunks.get(origin)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &TupleChunk> {
        self.chunks.values()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.chunks.values().map(TupleChunk::count).sum()
    }

    /// Exact local size in bytes, the quantity exchanged by the size
    /// agreement collectives.
    pub fn exact_byte_size(&self) -> u64 {
        self.chunks.values().map(TupleChunk::byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::chunk::Row;
    use crate::array::schema::{AttributeDesc, DimensionDesc};
    use crate::array::value::{Value, ValueType};

    fn test_desc() -> ArrayDesc {
        ArrayDesc::new(
            "t",
            vec![AttributeDesc::new("v", ValueType::Int64, false)],
            vec![DimensionDesc::new("i", 0, 100, 10)],
        )
    }

    #[test]
    fn chunks_iterate_in_coordinate_order() {
        let mut array = MemArray::new(test_desc());
        for origin in [20i64, 0, 10] {
            let mut chunk = TupleChunk::new(vec![origin]);
            chunk
                .rows
                .push(Row::new(vec![origin], vec![Value::Int64(origin)]));
            array.insert_chunk(chunk);
        }
        let origins: Vec<i64> = array.chunks().map(|c| c.origin[0]).collect();
        assert_eq!(origins, vec![0, 10, 20]);
        assert_eq!(array.num_rows(), 3);
    }

    #[test]
    fn empty_chunks_are_not_stored() {
        let mut array = MemArray::new(test_desc());
        array.insert_chunk(TupleChunk::new(vec![0]));
        assert_eq!(array.num_chunks(), 0);
    }

    #[test]
    fn ensure_random_access_upgrades_contract() {
        let mut array = MemArray::new(test_desc()).with_access(AccessMode::SinglePass, false);
        assert!(!array.is_materialized());
        array.ensure_random_access();
        assert!(array.is_materialized());
        assert_eq!(array.supported_access(), AccessMode::Random);
    }
}
