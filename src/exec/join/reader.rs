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
//! Streaming tuple readers. Each read mode is its own type so the hot
//! paths stay monomorphic; all share the `TupleStream` surface.
//!
//! - `InputReader` walks a raw input array, materializing tuples through
//!   the side's key mapping and applying the push-down filters.
//! - `TupledReader` walks a pre-tupled array (trailing hash included).
//! - `SortedReader` adds global-row re-seek for the merge rewind.

use crate::array::array::MemArray;
use crate::array::chunk::{Row, TupleChunk};
use crate::array::value::Value;
use crate::common::Result;
use crate::exec::join::filters::{BloomFilter, ChunkFilter};
use crate::exec::join::settings::{Settings, Side};

pub trait TupleStream {
    fn end(&self) -> bool;
    /// Current tuple; valid only while `end()` is false.
    fn tuple(&self) -> &[Value];
    fn next(&mut self) -> Result<()>;
}

pub struct InputReader<'a> {
    chunks: Vec<&'a TupleChunk>,
    map: &'a [usize],
    num_attrs: usize,
    num_keys: usize,
    tuple_size: usize,
    bloom: Option<&'a BloomFilter>,
    chunk_i: usize,
    row_i: usize,
    current: Vec<Value>,
    done: bool,
    emitted: u64,
    scratch: Vec<u8>,
}

impl<'a> InputReader<'a> {
    pub fn new(
        array: &'a MemArray,
        settings: &'a Settings,
        side: Side,
        chunk_filter: Option<&ChunkFilter>,
        bloom: Option<&'a BloomFilter>,
    ) -> Result<Self> {
        let chunks: Vec<&TupleChunk> = array
            .chunks()
            .filter(|c| chunk_filter.map_or(true, |f| f.matches_chunk(&c.origin)))
            .collect();
        let mut reader = Self {
            chunks,
            map: settings.map_to_tuple(side),
            num_attrs: settings.desc(side).num_attrs(),
            num_keys: settings.num_keys(),
            tuple_size: settings.tuple_size(side),
            bloom,
            chunk_i: 0,
            row_i: 0,
            current: Vec::new(),
            done: false,
            emitted: 0,
            scratch: Vec::with_capacity(64),
        };
        reader.advance()?;
        Ok(reader)
    }

    /// Tuples that survived the null-key drop and both filters.
    pub fn num_emitted(&self) -> u64 {
        self.emitted
    }

    fn materialize(&mut self, row: &Row) {
        self.current.clear();
        self.current.resize(self.tuple_size, Value::Null);
        for (field, &slot) in self.map.iter().enumerate() {
            let value = if field < self.num_attrs {
                row.values[field].clone()
            } else {
                Value::Int64(row.coords[field - self.num_attrs])
            };
            self.current[slot] = value;
        }
    }

    fn advance(&mut self) -> Result<()> {
        loop {
            let Some(&chunk) = self.chunks.get(self.chunk_i) else {
                self.done = true;
                return Ok(());
            };
            let Some(row) = chunk.rows.get(self.row_i) else {
                self.chunk_i += 1;
                self.row_i = 0;
                continue;
            };
            self.row_i += 1;
            self.materialize(row);
            // Null join keys match nothing on either side.
            if self.current[..self.num_keys].iter().any(Value::is_null) {
                continue;
            }
            if let Some(bloom) = self.bloom {
                if !bloom.may_contain(&self.current, self.num_keys, &mut self.scratch) {
                    continue;
                }
            }
            self.emitted += 1;
            return Ok(());
        }
    }
}

impl<'a> TupleStream for InputReader<'a> {
    fn end(&self) -> bool {
        self.done
    }

    fn tuple(&self) -> &[Value] {
        &self.current
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }
}

pub struct TupledReader<'a> {
    chunks: Vec<&'a TupleChunk>,
    chunk_i: usize,
    row_i: usize,
}

impl<'a> TupledReader<'a> {
    pub fn new(array: &'a MemArray) -> Self {
        Self {
            chunks: array.chunks().collect(),
            chunk_i: 0,
            row_i: 0,
        }
    }
}

impl<'a> TupleStream for TupledReader<'a> {
    fn end(&self) -> bool {
        self.chunk_i >= self.chunks.len()
    }

    fn tuple(&self) -> &[Value] {
        &self.chunks[self.chunk_i].rows[self.row_i].values
    }

    fn next(&mut self) -> Result<()> {
        self.row_i += 1;
        if self.row_i >= self.chunks[self.chunk_i].rows.len() {
            self.chunk_i += 1;
            self.row_i = 0;
        }
        Ok(())
    }
}

/// Tupled reader with a re-seekable global row index; the merge loop
/// rewinds the right cursor across chunk boundaries with it.
pub struct SortedReader<'a> {
    rows: Vec<&'a Row>,
    idx: usize,
}

impl<'a> SortedReader<'a> {
    pub fn new(array: &'a MemArray) -> Self {
        Self {
            rows: array.chunks().flat_map(|c| c.rows.iter()).collect(),
            idx: 0,
        }
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn set_idx(&mut self, idx: usize) {
        self.idx = idx;
    }
}

impl<'a> TupleStream for SortedReader<'a> {
    fn end(&self) -> bool {
        self.idx >= self.rows.len()
    }

    fn tuple(&self) -> &[Value] {
        &self.rows[self.idx].values
    }

    fn next(&mut self) -> Result<()> {
        self.idx += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::schema::{ArrayDesc, AttributeDesc, DimensionDesc};
    use crate::array::value::ValueType;
    use crate::common::config::EngineConfig;

    fn left_desc() -> ArrayDesc {
        ArrayDesc::new(
            "l",
            vec![
                AttributeDesc::new("k", ValueType::Int64, true),
                AttributeDesc::new("v", ValueType::String, false),
            ],
            vec![DimensionDesc::new("i", 0, 100, 10)],
        )
    }

    fn right_desc() -> ArrayDesc {
        ArrayDesc::new(
            "r",
            vec![AttributeDesc::new("k", ValueType::Int64, false)],
            vec![DimensionDesc::new("j", 0, 100, 10)],
        )
    }

    fn settings() -> Settings {
        Settings::new(
            left_desc(),
            right_desc(),
            &["left_keys=0".to_string(), "right_keys=0".to_string()],
            &EngineConfig::default(),
            1,
        )
        .expect("settings")
    }

    fn left_array(rows: &[(i64, Option<i64>, &str)]) -> MemArray {
        let mut array = MemArray::new(left_desc());
        let mut chunk = TupleChunk::new(vec![0]);
        for (coord, key, v) in rows {
            let key = key.map(Value::Int64).unwrap_or(Value::Null);
            chunk.rows.push(Row::new(
                vec![*coord],
                vec![key, Value::String(v.to_string())],
            ));
        }
        array.insert_chunk(chunk);
        array
    }

    #[test]
    fn input_reader_maps_keys_to_low_slots_and_appends_dims() {
        let settings = settings();
        let array = left_array(&[(3, Some(42), "x")]);
        let mut reader =
            InputReader::new(&array, &settings, Side::Left, None, None).expect("reader");
        assert!(!reader.end());
        assert_eq!(
            reader.tuple(),
            &[
                Value::Int64(42),
                Value::String("x".to_string()),
                Value::Int64(3)
            ]
        );
        reader.next().expect("next");
        assert!(reader.end());
    }

    #[test]
    fn input_reader_drops_null_keys() {
        let settings = settings();
        let array = left_array(&[(0, None, "dead"), (1, Some(1), "live"), (2, None, "dead")]);
        let mut reader =
            InputReader::new(&array, &settings, Side::Left, None, None).expect("reader");
        let mut seen = Vec::new();
        while !reader.end() {
            seen.push(reader.tuple()[0].clone());
            reader.next().expect("next");
        }
        assert_eq!(seen, vec![Value::Int64(1)]);
        assert_eq!(reader.num_emitted(), 1);
    }

    #[test]
    fn input_reader_applies_bloom_filter() {
        let settings = settings();
        let rows: Vec<(i64, Option<i64>, &str)> =
            (0..50).map(|i| (i, Some(i), "p")).collect();
        let array = left_array(&rows);
        let mut bloom = BloomFilter::new(1 << 16);
        bloom.add_tuple(&[Value::Int64(7)], 1);
        bloom.add_tuple(&[Value::Int64(31)], 1);
        let mut reader =
            InputReader::new(&array, &settings, Side::Left, None, Some(&bloom)).expect("reader");
        let mut seen = Vec::new();
        while !reader.end() {
            seen.push(reader.tuple()[0].get_int64().expect("int"));
            reader.next().expect("next");
        }
        assert!(seen.contains(&7) && seen.contains(&31));
        assert!(seen.len() < 50, "bloom pruned nothing");
    }

    #[test]
    fn sorted_reader_reseeks_across_chunks() {
        let mut array = MemArray::new(ArrayDesc::one_dim_output(
            "pre",
            vec![AttributeDesc::new("a0", ValueType::Int64, false)],
            1,
            2,
        ));
        for (origin, keys) in [(0i64, [0i64, 1]), (2, [2, 3])] {
            let mut chunk = TupleChunk::new(vec![0, origin]);
            for (i, k) in keys.iter().enumerate() {
                chunk
                    .rows
                    .push(Row::new(vec![0, origin + i as i64], vec![Value::Int64(*k)]));
            }
            array.insert_chunk(chunk);
        }
        let mut reader = SortedReader::new(&array);
        while !reader.end() {
            reader.next().expect("next");
        }
        reader.set_idx(1);
        assert_eq!(reader.tuple(), &[Value::Int64(1)]);
        reader.next().expect("next");
        // Seek target beyond the first chunk still resolves.
        assert_eq!(reader.tuple(), &[Value::Int64(2)]);
    }
}
