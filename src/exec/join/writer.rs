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
//! Streaming tuple writers, one type per write mode.
//!
//! - `OutputWriter` appends joined rows in the output field layout.
//! - `TupledWriter` appends tuples with the trailing hash column.
//! - `SplitWriter` routes tuples into per-instance chunk streams by
//!   `hash mod N`, ready for by-row redistribution.
//!
//! All emit one-dimensional `(instance_id, value_no)` arrays chunked at
//! the configured chunk size.

use crate::array::array::MemArray;
use crate::array::chunk::{Row, TupleChunk};
use crate::array::value::Value;
use crate::common::Result;
use crate::exec::join::settings::{Settings, Side};
use crate::runtime::exchange::QueryContext;

/// Accumulates rows for one `(instance_id, value_no)` stream, rotating
/// chunks at the chunk size.
struct ChunkBuilder {
    dest: i64,
    chunk_size: usize,
    value_no: i64,
    current: TupleChunk,
}

impl ChunkBuilder {
    fn new(dest: i64, chunk_size: u64) -> Self {
        Self {
            dest,
            chunk_size: chunk_size.max(1) as usize,
            value_no: 0,
            current: TupleChunk::new(vec![dest, 0]),
        }
    }

    fn push(&mut self, values: Vec<Value>, out: &mut MemArray) {
        if self.current.rows.len() >= self.chunk_size {
            let origin = vec![self.dest, self.value_no];
            let done = std::mem::replace(&mut self.current, TupleChunk::new(origin));
            out.insert_chunk(done);
        }
        self.current
            .rows
            .push(Row::new(vec![self.dest, self.value_no], values));
        self.value_no += 1;
    }

    fn finish(self, out: &mut MemArray) {
        out.insert_chunk(self.current);
    }
}

pub struct OutputWriter<'a> {
    settings: &'a Settings,
    array: MemArray,
    builder: ChunkBuilder,
    num_rows: u64,
}

impl<'a> OutputWriter<'a> {
    pub fn new(settings: &'a Settings, ctx: &QueryContext) -> Self {
        let array = MemArray::new(settings.output_schema());
        let builder = ChunkBuilder::new(ctx.instance_id() as i64, settings.chunk_size());
        Self {
            settings,
            array,
            builder,
            num_rows: 0,
        }
    }

    /// Emit one joined row: the full left tuple, then the right non-key
    /// positions. Inputs may carry a trailing hash slot; only the tuple
    /// prefix is consumed.
    pub fn write_joined(&mut self, left: &[Value], right: &[Value]) {
        let tl = self.settings.tuple_size(Side::Left);
        let tr = self.settings.tuple_size(Side::Right);
        let k = self.settings.num_keys();
        let mut values = Vec::with_capacity(tl + tr - k);
        values.extend_from_slice(&left[..tl]);
        values.extend_from_slice(&right[k..tr]);
        self.builder.push(values, &mut self.array);
        self.num_rows += 1;
    }

    /// Emit from a hash-table hit without reassembling the build tuple:
    /// `keys ++ payload` is the build side, `probe` the other.
    pub fn write_parts(
        &mut self,
        keys: &[Value],
        build_payload: &[Value],
        probe: &[Value],
        build_side: Side,
    ) {
        let tl = self.settings.tuple_size(Side::Left);
        let tr = self.settings.tuple_size(Side::Right);
        let k = self.settings.num_keys();
        let mut values = Vec::with_capacity(tl + tr - k);
        match build_side {
            Side::Left => {
                values.extend_from_slice(&keys[..k]);
                values.extend_from_slice(build_payload);
                values.extend_from_slice(&probe[k..tr]);
            }
            Side::Right => {
                values.extend_from_slice(&probe[..tl]);
                values.extend_from_slice(build_payload);
            }
        }
        self.builder.push(values, &mut self.array);
        self.num_rows += 1;
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn finalize(mut self) -> Result<MemArray> {
        self.builder.finish(&mut self.array);
        Ok(self.array)
    }
}

pub struct TupledWriter {
    array: MemArray,
    builder: ChunkBuilder,
}

impl TupledWriter {
    pub fn new(settings: &Settings, side: Side, ctx: &QueryContext) -> Self {
        let array = MemArray::new(settings.pre_tupled_schema(side));
        let builder = ChunkBuilder::new(ctx.instance_id() as i64, settings.chunk_size());
        Self { array, builder }
    }

    /// Append `tuple ++ hash`.
    pub fn write_tuple_with_hash(&mut self, tuple: &[Value], hash: u32) {
        let mut values = Vec::with_capacity(tuple.len() + 1);
        values.extend_from_slice(tuple);
        values.push(Value::UInt32(hash));
        self.builder.push(values, &mut self.array);
    }

    pub fn finalize(mut self) -> Result<MemArray> {
        self.builder.finish(&mut self.array);
        Ok(self.array)
    }
}

pub struct SplitWriter {
    array: MemArray,
    builders: Vec<ChunkBuilder>,
    tuple_size: usize,
}

impl SplitWriter {
    pub fn new(settings: &Settings, side: Side, ctx: &QueryContext) -> Self {
        let array = MemArray::new(settings.pre_tupled_schema(side));
        let chunk_size = settings.chunk_size();
        let builders = (0..ctx.instances_count())
            .map(|dest| ChunkBuilder::new(dest as i64, chunk_size))
            .collect();
        Self {
            array,
            builders,
            tuple_size: settings.tuple_size(side),
        }
    }

    /// Route a pre-tupled row (trailing hash included) to `hash mod N`.
    pub fn write_tuple(&mut self, tuple_with_hash: &[Value]) -> Result<()> {
        let hash = tuple_with_hash[self.tuple_size].get_uint32()?;
        let dest = hash as usize % self.builders.len();
        self.builders[dest].push(tuple_with_hash.to_vec(), &mut self.array);
        Ok(())
    }

    pub fn finalize(mut self) -> Result<MemArray> {
        for builder in self.builders.drain(..) {
            builder.finish(&mut self.array);
        }
        Ok(self.array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::schema::{ArrayDesc, AttributeDesc};
    use crate::array::value::ValueType;
    use crate::common::config::EngineConfig;
    use crate::runtime::exchange::LocalCluster;

    fn settings(chunk_size: u64, n: u64) -> Settings {
        let left = ArrayDesc::new(
            "l",
            vec![
                AttributeDesc::new("k", ValueType::Int64, false),
                AttributeDesc::new("v", ValueType::String, false),
            ],
            vec![],
        );
        let right = ArrayDesc::new(
            "r",
            vec![
                AttributeDesc::new("k", ValueType::Int64, false),
                AttributeDesc::new("w", ValueType::Int64, false),
            ],
            vec![],
        );
        Settings::new(
            left,
            right,
            &[
                "left_keys=0".to_string(),
                "right_keys=0".to_string(),
                format!("chunk_size={}", chunk_size),
            ],
            &EngineConfig::default(),
            n,
        )
        .expect("settings")
    }

    fn ctx(n: usize, me: usize) -> QueryContext {
        QueryContext::new(LocalCluster::new(n), me)
    }

    #[test]
    fn output_writer_applies_field_layout() {
        let settings = settings(10, 1);
        let ctx = ctx(1, 0);
        let mut writer = OutputWriter::new(&settings, &ctx);
        writer.write_joined(
            &[Value::Int64(1), Value::String("a".into())],
            &[Value::Int64(1), Value::Int64(10)],
        );
        let out = writer.finalize().expect("finalize");
        let row = out.chunks().next().expect("chunk").rows.first().expect("row");
        assert_eq!(
            row.values,
            vec![Value::Int64(1), Value::String("a".into()), Value::Int64(10)]
        );
    }

    #[test]
    fn write_parts_matches_write_joined_for_both_sides() {
        let settings = settings(10, 1);
        let ctx = ctx(1, 0);
        let left = [Value::Int64(3), Value::String("p".into())];
        let right = [Value::Int64(3), Value::Int64(30)];

        let mut a = OutputWriter::new(&settings, &ctx);
        a.write_joined(&left, &right);
        let expected = a.finalize().expect("finalize");

        for build_side in [Side::Left, Side::Right] {
            let mut b = OutputWriter::new(&settings, &ctx);
            match build_side {
                Side::Left => b.write_parts(&left[..1], &left[1..], &right, build_side),
                Side::Right => b.write_parts(&right[..1], &right[1..], &left, build_side),
            }
            let got = b.finalize().expect("finalize");
            let expected_row = &expected.chunks().next().expect("c").rows[0];
            let got_row = &got.chunks().next().expect("c").rows[0];
            assert_eq!(got_row.values, expected_row.values, "{:?}", build_side);
        }
    }

    #[test]
    fn writers_rotate_chunks_at_chunk_size() {
        let settings = settings(3, 1);
        let ctx = ctx(1, 0);
        let mut writer = TupledWriter::new(&settings, Side::Left, &ctx);
        for i in 0..7i64 {
            writer.write_tuple_with_hash(&[Value::Int64(i), Value::String("x".into())], 5);
        }
        let out = writer.finalize().expect("finalize");
        assert_eq!(out.num_chunks(), 3);
        let origins: Vec<Vec<i64>> = out.chunks().map(|c| c.origin.clone()).collect();
        assert_eq!(origins, vec![vec![0, 0], vec![0, 3], vec![0, 6]]);
        assert_eq!(out.num_rows(), 7);
    }

    #[test]
    fn split_writer_routes_by_hash() {
        let settings = settings(10, 3);
        let ctx = ctx(3, 1);
        let mut writer = SplitWriter::new(&settings, Side::Right, &ctx);
        for hash in 0u32..9 {
            writer
                .write_tuple(&[
                    Value::Int64(hash as i64),
                    Value::Int64(0),
                    Value::UInt32(hash),
                ])
                .expect("write");
        }
        let out = writer.finalize().expect("finalize");
        for chunk in out.chunks() {
            let dest = chunk.origin[0];
            for row in &chunk.rows {
                let hash = row.values.last().expect("hash").get_uint32().expect("u32");
                assert_eq!(hash as i64 % 3, dest);
                assert_eq!(row.coords[0], dest);
            }
        }
        assert_eq!(out.num_rows(), 9);
    }
}
