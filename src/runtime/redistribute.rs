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
//! Array redistribution across the cluster.
//!
//! Responsibilities:
//! - `Replication` broadcasts every local row so each instance ends with
//!   the full array, chunked by the original coordinate geometry.
//! - `ByRow` routes each row to the instance named by its `instance_id`
//!   coordinate (dimension 0) and renumbers `value_no` at the receiver.
//!   With `preserve_ordering` the receiver assembles in strict sender
//!   order, keeping each sender's sorted run contiguous; without it the
//!   local partition lands first and peers follow.
//!
//! Both directions are barrier-like: every instance sends to and receives
//! from every peer exactly once.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::array::array::MemArray;
use crate::array::chunk::{Coordinates, Row, TupleChunk};
use crate::array::value::{Value, read_u8, read_u64_le};
use crate::common::logging::debug;
use crate::common::{JoinError, Result};
use crate::runtime::exchange::QueryContext;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Partitioning {
    Replication,
    ByRow,
}

fn encode_rows<'a>(rows: impl Iterator<Item = &'a Row>) -> Bytes {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0u64.to_le_bytes());
    let mut count: u64 = 0;
    for row in rows {
        buf.push(row.coords.len() as u8);
        for c in &row.coords {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&(row.values.len() as u32).to_le_bytes());
        for v in &row.values {
            v.encode(&mut buf);
        }
        count += 1;
    }
    buf[0..8].copy_from_slice(&count.to_le_bytes());
    Bytes::from(buf)
}

fn decode_rows(data: &[u8]) -> Result<Vec<Row>> {
    let mut offset = 0;
    let count = read_u64_le(data, &mut offset)?;
    let mut rows = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let ncoords = read_u8(data, &mut offset)? as usize;
        let mut coords = Vec::with_capacity(ncoords);
        for _ in 0..ncoords {
            coords.push(read_u64_le(data, &mut offset)? as i64);
        }
        let nvalues = crate::array::value::read_u32_le(data, &mut offset)? as usize;
        let mut values = Vec::with_capacity(nvalues);
        for _ in 0..nvalues {
            values.push(Value::decode(data, &mut offset)?);
        }
        rows.push(Row::new(coords, values));
    }
    if offset != data.len() {
        return Err(JoinError::transport("trailing bytes in row payload"));
    }
    Ok(rows)
}

/// Shuffle `input` under `partitioning` and return a materialized,
/// random-access local result.
pub fn redistribute_to_random_access(
    input: &MemArray,
    partitioning: Partitioning,
    ctx: &QueryContext,
    preserve_ordering: bool,
) -> Result<MemArray> {
    debug!(
        "redistribute {:?} rows={} preserve_ordering={}",
        partitioning,
        input.num_rows(),
        preserve_ordering
    );
    match partitioning {
        // Replication reassembles by chunk origin, so arrival order
        // cannot matter there.
        Partitioning::Replication => replicate(input, ctx),
        Partitioning::ByRow => shuffle_by_row(input, ctx, preserve_ordering),
    }
}

fn replicate(input: &MemArray, ctx: &QueryContext) -> Result<MemArray> {
    let n = ctx.instances_count();
    let me = ctx.instance_id();
    let payload = encode_rows(input.chunks().flat_map(|c| c.rows.iter()));
    for dst in 0..n {
        if dst != me {
            ctx.buf_send(dst, payload.clone())?;
        }
    }

    let desc = input.desc().clone();
    let mut buckets: BTreeMap<Coordinates, TupleChunk> = BTreeMap::new();
    let mut place = |row: Row| -> Result<()> {
        if row.coords.len() != desc.num_dims() {
            return Err(JoinError::internal("row coordinate arity mismatch"));
        }
        let origin: Coordinates = row
            .coords
            .iter()
            .zip(desc.dimensions.iter())
            .map(|(c, d)| d.chunk_origin(*c))
            .collect();
        buckets
            .entry(origin.clone())
            .or_insert_with(|| TupleChunk::new(origin))
            .rows
            .push(row);
        Ok(())
    };

    for src in 0..n {
        if src == me {
            for chunk in input.chunks() {
                for row in &chunk.rows {
                    place(row.clone())?;
                }
            }
        } else {
            let data = ctx.buf_receive(src)?;
            for row in decode_rows(&data)? {
                place(row)?;
            }
        }
    }

    let mut out = MemArray::new(desc);
    for (_, chunk) in buckets {
        out.insert_chunk(chunk);
    }
    Ok(out)
}

fn shuffle_by_row(
    input: &MemArray,
    ctx: &QueryContext,
    preserve_ordering: bool,
) -> Result<MemArray> {
    let n = ctx.instances_count();
    let me = ctx.instance_id();
    let desc = input.desc().clone();
    if desc.num_dims() != 2 {
        return Err(JoinError::internal(
            "by-row redistribution expects an (instance_id, value_no) array",
        ));
    }
    let chunk_interval = desc.dimensions[1].chunk_interval.max(1);

    let mut outgoing: Vec<Vec<&Row>> = vec![Vec::new(); n];
    for chunk in input.chunks() {
        for row in &chunk.rows {
            let dest = row.coords[0];
            if dest < 0 || dest as usize >= n {
                return Err(JoinError::internal(format!(
                    "row routed to instance {} outside cluster of {}",
                    dest, n
                )));
            }
            outgoing[dest as usize].push(row);
        }
    }

    for dst in 0..n {
        if dst != me {
            ctx.buf_send(dst, encode_rows(outgoing[dst].iter().copied()))?;
        }
    }

    let mut out = MemArray::new(desc);
    let mut current = TupleChunk::new(vec![me as i64, 0]);
    let mut value_no: i64 = 0;
    let mut append = |row: Row, current: &mut TupleChunk, out: &mut MemArray| {
        let mut row = row;
        if value_no % chunk_interval == 0 && !current.is_empty() {
            let done = std::mem::replace(current, TupleChunk::new(vec![me as i64, value_no]));
            out.insert_chunk(done);
        }
        row.coords = vec![me as i64, value_no];
        value_no += 1;
        current.rows.push(row);
    };

    if preserve_ordering {
        // Strict sender order: each sender's sorted run stays contiguous,
        // which the merge path counts on before its local re-sort.
        for src in 0..n {
            if src == me {
                for row in &outgoing[me] {
                    append((*row).clone(), &mut current, &mut out);
                }
            } else {
                let data = ctx.buf_receive(src)?;
                for row in decode_rows(&data)? {
                    append(row, &mut current, &mut out);
                }
            }
        }
    } else {
        // The local partition needs no receive, so it lands before the
        // first blocking wait on a peer.
        for row in &outgoing[me] {
            append((*row).clone(), &mut current, &mut out);
        }
        for src in 0..n {
            if src != me {
                let data = ctx.buf_receive(src)?;
                for row in decode_rows(&data)? {
                    append(row, &mut current, &mut out);
                }
            }
        }
    }
    out.insert_chunk(current);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::schema::{ArrayDesc, AttributeDesc, DimensionDesc};
    use crate::array::value::ValueType;
    use crate::runtime::exchange::LocalCluster;
    use std::sync::Arc;
    use std::thread;

    fn run_on_cluster<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(QueryContext) -> T + Send + Sync + 'static,
    {
        let cluster = LocalCluster::new(n);
        let f = Arc::new(f);
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let ctx = QueryContext::new(Arc::clone(&cluster), i);
                let f = Arc::clone(&f);
                thread::spawn(move || f(ctx))
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).collect()
    }

    fn raw_desc() -> ArrayDesc {
        ArrayDesc::new(
            "raw",
            vec![AttributeDesc::new("v", ValueType::Int64, false)],
            vec![DimensionDesc::new("i", 0, 1000, 10)],
        )
    }

    fn tupled_desc(n: u64) -> ArrayDesc {
        ArrayDesc::one_dim_output(
            "pre",
            vec![AttributeDesc::new("a0", ValueType::Int64, false)],
            n,
            4,
        )
    }

    #[test]
    fn replication_gathers_every_row_everywhere() {
        let results = run_on_cluster(3, |ctx| {
            let me = ctx.instance_id() as i64;
            let mut array = MemArray::new(raw_desc());
            let mut chunk = TupleChunk::new(vec![me * 10]);
            chunk
                .rows
                .push(Row::new(vec![me * 10], vec![Value::Int64(me)]));
            array.insert_chunk(chunk);
            redistribute_to_random_access(&array, Partitioning::Replication, &ctx, false)
                .expect("replicate")
        });
        for array in results {
            assert_eq!(array.num_rows(), 3);
            let coords: Vec<i64> = array
                .chunks()
                .flat_map(|c| c.rows.iter())
                .map(|r| r.coords[0])
                .collect();
            assert_eq!(coords, vec![0, 10, 20]);
        }
    }

    #[test]
    fn by_row_places_rows_on_target_instances() {
        let results = run_on_cluster(2, |ctx| {
            // Every instance emits one row for each destination.
            let mut array = MemArray::new(tupled_desc(2));
            for dest in 0..2i64 {
                let mut chunk = TupleChunk::new(vec![dest, 0]);
                chunk.rows.push(Row::new(
                    vec![dest, 0],
                    vec![Value::Int64(ctx.instance_id() as i64 * 10 + dest)],
                ));
                array.insert_chunk(chunk);
            }
            let out = redistribute_to_random_access(&array, Partitioning::ByRow, &ctx, true)
                .expect("shuffle");
            (ctx.instance_id(), out)
        });
        for (me, array) in results {
            assert_eq!(array.num_rows(), 2, "one row from each sender");
            let mut senders = Vec::new();
            for (seq, row) in array.chunks().flat_map(|c| c.rows.iter()).enumerate() {
                assert_eq!(row.coords, vec![me as i64, seq as i64]);
                match &row.values[0] {
                    Value::Int64(v) => {
                        assert_eq!((*v % 10) as usize, me);
                        senders.push(*v / 10);
                    }
                    other => panic!("unexpected value {:?}", other),
                }
            }
            // preserve_ordering keeps strict sender order.
            assert_eq!(senders, vec![0, 1]);
        }
    }

    #[test]
    fn by_row_unordered_appends_local_rows_first() {
        let results = run_on_cluster(2, |ctx| {
            let mut array = MemArray::new(tupled_desc(2));
            for dest in 0..2i64 {
                let mut chunk = TupleChunk::new(vec![dest, 0]);
                chunk.rows.push(Row::new(
                    vec![dest, 0],
                    vec![Value::Int64(ctx.instance_id() as i64 * 10 + dest)],
                ));
                array.insert_chunk(chunk);
            }
            let out = redistribute_to_random_access(&array, Partitioning::ByRow, &ctx, false)
                .expect("shuffle");
            (ctx.instance_id(), out)
        });
        for (me, array) in results {
            let senders: Vec<i64> = array
                .chunks()
                .flat_map(|c| c.rows.iter())
                .map(|r| match &r.values[0] {
                    Value::Int64(v) => *v / 10,
                    other => panic!("unexpected value {:?}", other),
                })
                .collect();
            let mut expected = vec![me as i64];
            expected.extend((0..2i64).filter(|s| *s != me as i64));
            assert_eq!(senders, expected, "local partition must land first");
        }
    }

    #[test]
    fn row_codec_round_trips() {
        let rows = vec![
            Row::new(vec![1, 2], vec![Value::Int64(5), Value::String("x".into())]),
            Row::new(vec![3, 4], vec![Value::Null, Value::UInt32(9)]),
        ];
        let payload = encode_rows(rows.iter());
        let decoded = decode_rows(&payload).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].coords, vec![1, 2]);
        assert_eq!(decoded[1].values[1], Value::UInt32(9));
    }
}
