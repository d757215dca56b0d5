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
//! Chunks: the bounded I/O unit of an array.

use crate::array::value::Value;

pub type Coordinates = Vec<i64>;

/// One cell row: its position and one value per attribute.
#[derive(Clone, Debug)]
pub struct Row {
    pub coords: Coordinates,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(coords: Coordinates, values: Vec<Value>) -> Self {
        Self { coords, values }
    }

    pub fn byte_size(&self) -> u64 {
        let coords = (self.coords.len() * 8) as u64;
        coords + self.values.iter().map(Value::encoded_len).sum::<u64>()
    }
}

#[derive(Clone, Debug)]
pub struct TupleChunk {
    pub origin: Coordinates,
    pub rows: Vec<Row>,
}

impl TupleChunk {
    pub fn new(origin: Coordinates) -> Self {
        Self {
            origin,
            rows: Vec::new(),
        }
    }

    pub fn count(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn byte_size(&self) -> u64 {
        self.rows.iter().map(Row::byte_size).sum()
    }
}
