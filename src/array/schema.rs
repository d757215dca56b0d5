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
//! Array descriptors: attributes, dimensions and chunk geometry.

use crate::array::value::ValueType;

#[derive(Clone, Debug)]
pub struct AttributeDesc {
    pub name: String,
    pub dtype: ValueType,
    pub nullable: bool,
}

impl AttributeDesc {
    pub fn new(name: impl Into<String>, dtype: ValueType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable,
        }
    }
}

/// One array dimension. `chunk_interval` is the coordinate span covered by
/// a single chunk along this dimension.
#[derive(Clone, Debug)]
pub struct DimensionDesc {
    pub name: String,
    pub start: i64,
    pub end: i64,
    pub chunk_interval: i64,
}

impl DimensionDesc {
    pub fn new(name: impl Into<String>, start: i64, end: i64, chunk_interval: i64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            chunk_interval: chunk_interval.max(1),
        }
    }

    /// Snap a coordinate to the origin of the chunk that contains it.
    pub fn chunk_origin(&self, coord: i64) -> i64 {
        let offset = coord - self.start;
        let snapped = offset.div_euclid(self.chunk_interval) * self.chunk_interval;
        self.start + snapped
    }
}

#[derive(Clone, Debug)]
pub struct ArrayDesc {
    pub name: String,
    pub attributes: Vec<AttributeDesc>,
    pub dimensions: Vec<DimensionDesc>,
}

impl ArrayDesc {
    pub fn new(
        name: impl Into<String>,
        attributes: Vec<AttributeDesc>,
        dimensions: Vec<DimensionDesc>,
    ) -> Self {
        Self {
            name: name.into(),
            attributes,
            dimensions,
        }
    }

    pub fn num_attrs(&self) -> usize {
        self.attributes.len()
    }

    pub fn num_dims(&self) -> usize {
        self.dimensions.len()
    }

    /// Attributes followed by dimensions; the field index space used by
    /// `left_keys` / `right_keys`.
    pub fn num_fields(&self) -> usize {
        self.attributes.len() + self.dimensions.len()
    }

    /// Type of an input field: attribute type, or `Int64` for a dimension.
    pub fn field_type(&self, field: usize) -> Option<ValueType> {
        if field < self.attributes.len() {
            return Some(self.attributes[field].dtype);
        }
        let dim = field - self.attributes.len();
        if dim < self.dimensions.len() {
            return Some(ValueType::Int64);
        }
        None
    }

    pub fn field_nullable(&self, field: usize) -> bool {
        if field < self.attributes.len() {
            return self.attributes[field].nullable;
        }
        false
    }

    /// The `(instance_id, value_no)` layout shared by pre-tupled and output
    /// arrays.
    pub fn one_dim_output(
        name: impl Into<String>,
        attributes: Vec<AttributeDesc>,
        num_instances: u64,
        chunk_size: u64,
    ) -> Self {
        let dimensions = vec![
            DimensionDesc::new("instance_id", 0, num_instances.saturating_sub(1) as i64, 1),
            DimensionDesc::new("value_no", 0, i64::MAX, chunk_size as i64),
        ];
        Self::new(name, attributes, dimensions)
    }
}
