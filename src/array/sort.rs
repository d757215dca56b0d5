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
//! Host-supplied array sort. The join core only depends on the ordering
//! contract; this in-memory realization can be swapped for a genuinely
//! external sorter without touching the operator.

use std::cmp::Ordering;

use crate::array::array::MemArray;
use crate::array::chunk::{Row, TupleChunk};
use crate::common::Result;

/// Ascending sort columns, most significant first.
#[derive(Clone, Debug)]
pub struct SortSpec {
    pub columns: Vec<usize>,
}

impl SortSpec {
    pub fn new(columns: Vec<usize>) -> Self {
        Self { columns }
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for &col in &self.columns {
            let ord = a.values[col].total_cmp(&b.values[col]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Sort a local array into a fresh materialized array with the same schema,
/// re-chunked along `value_no` at `chunk_size` rows.
pub fn sort_array(
    input: &MemArray,
    spec: &SortSpec,
    chunk_size: u64,
    instance_id: u64,
) -> Result<MemArray> {
    let mut rows: Vec<Row> = input.chunks().flat_map(|c| c.rows.iter().cloned()).collect();
    rows.sort_by(|a, b| spec.compare(a, b));

    let mut out = MemArray::new(input.desc().clone());
    let chunk_size = chunk_size.max(1) as usize;
    let mut value_no: i64 = 0;
    for batch in rows.chunks_mut(chunk_size) {
        let mut chunk = TupleChunk::new(vec![instance_id as i64, value_no]);
        for row in batch.iter_mut() {
            let mut row = std::mem::replace(row, Row::new(Vec::new(), Vec::new()));
            row.coords = vec![instance_id as i64, value_no];
            value_no += 1;
            chunk.rows.push(row);
        }
        out.insert_chunk(chunk);
    }
    Ok(out)
}
