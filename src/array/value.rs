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
//! Polymorphic cell values and their canonical byte encoding.
//!
//! Responsibilities:
//! - Defines the `Value` cell type with a per-type total order (nulls first
//!   and equal to nulls, NaN last among doubles).
//! - Provides the little-endian tag+payload codec shared by key hashing and
//!   the cluster wire format.
//!
//! Key exported interfaces:
//! - Types: `Value`, `ValueType`.
//! - Functions: `read_u8`, `read_u32_le`, `read_u64_le`, `read_i64_le`.

use std::cmp::Ordering;
use std::fmt;

use crate::common::{JoinError, Result};

/// Type of a cell value. Dimension coordinates read as `Int64`; the
/// trailing hash slot of a pre-tupled array is `UInt32`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ValueType {
    Bool,
    Int64,
    UInt32,
    Double,
    String,
}

impl ValueType {
    /// Nominal per-cell byte footprint used for pre-scan size estimates.
    /// Variable-size strings get a flat allowance.
    pub fn cell_size_hint(&self) -> u64 {
        match self {
            ValueType::Bool => 2,
            ValueType::Int64 => 9,
            ValueType::UInt32 => 5,
            ValueType::Double => 9,
            ValueType::String => 32,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int64 => "int64",
            ValueType::UInt32 => "uint32",
            ValueType::Double => "double",
            ValueType::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell: null or one of the supported primitives.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    UInt32(u32),
    Double(f64),
    String(String),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_UINT32: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_STRING: u8 = 5;

fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int64(_) => Some(ValueType::Int64),
            Value::UInt32(_) => Some(ValueType::UInt32),
            Value::Double(_) => Some(ValueType::Double),
            Value::String(_) => Some(ValueType::String),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => TAG_NULL,
            Value::Bool(_) => TAG_BOOL,
            Value::Int64(_) => TAG_INT64,
            Value::UInt32(_) => TAG_UINT32,
            Value::Double(_) => TAG_DOUBLE,
            Value::String(_) => TAG_STRING,
        }
    }

    /// Total order over cells. Nulls compare less than any non-null and
    /// equal to nulls; doubles use IEEE total order, which places NaN after
    /// every finite value and infinity. Mixed types (never produced by a
    /// validated key layout) order by type tag.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::UInt32(a), Value::UInt32(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    pub fn get_uint32(&self) -> Result<u32> {
        match self {
            Value::UInt32(v) => Ok(*v),
            other => Err(JoinError::internal(format!(
                "expected uint32 cell, found {:?}",
                other
            ))),
        }
    }

    pub fn get_int64(&self) -> Result<i64> {
        match self {
            Value::Int64(v) => Ok(*v),
            other => Err(JoinError::internal(format!(
                "expected int64 cell, found {:?}",
                other
            ))),
        }
    }

    /// Append the canonical tag+payload encoding. NaN payload bits are
    /// normalized so equal-by-total-order doubles encode identically.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(TAG_NULL),
            Value::Bool(v) => {
                buf.push(TAG_BOOL);
                buf.push(*v as u8);
            }
            Value::Int64(v) => {
                buf.push(TAG_INT64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::UInt32(v) => {
                buf.push(TAG_UINT32);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Double(v) => {
                buf.push(TAG_DOUBLE);
                buf.extend_from_slice(&canonical_f64_bits(*v).to_le_bytes());
            }
            Value::String(v) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
        }
    }

    pub fn encoded_len(&self) -> u64 {
        match self {
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Int64(_) | Value::Double(_) => 9,
            Value::UInt32(_) => 5,
            Value::String(v) => 5 + v.len() as u64,
        }
    }

    pub fn decode(data: &[u8], offset: &mut usize) -> Result<Value> {
        let tag = read_u8(data, offset)?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(read_u8(data, offset)? != 0)),
            TAG_INT64 => Ok(Value::Int64(read_i64_le(data, offset)?)),
            TAG_UINT32 => Ok(Value::UInt32(read_u32_le(data, offset)?)),
            TAG_DOUBLE => Ok(Value::Double(f64::from_bits(read_u64_le(data, offset)?))),
            TAG_STRING => {
                let len = read_u32_le(data, offset)? as usize;
                if data.len() < *offset + len {
                    return Err(JoinError::transport("value payload truncated"));
                }
                let s = std::str::from_utf8(&data[*offset..*offset + len])
                    .map_err(|_| JoinError::transport("value payload not utf-8"))?
                    .to_string();
                *offset += len;
                Ok(Value::String(s))
            }
            other => Err(JoinError::transport(format!(
                "unknown value tag {}",
                other
            ))),
        }
    }
}

pub fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    let b = *data
        .get(*offset)
        .ok_or_else(|| JoinError::transport("payload truncated"))?;
    *offset += 1;
    Ok(b)
}

pub fn read_u32_le(data: &[u8], offset: &mut usize) -> Result<u32> {
    if data.len() < *offset + 4 {
        return Err(JoinError::transport("payload truncated"));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[*offset..*offset + 4]);
    *offset += 4;
    Ok(u32::from_le_bytes(raw))
}

pub fn read_u64_le(data: &[u8], offset: &mut usize) -> Result<u64> {
    if data.len() < *offset + 8 {
        return Err(JoinError::transport("payload truncated"));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[*offset..*offset + 8]);
    *offset += 8;
    Ok(u64::from_le_bytes(raw))
}

pub fn read_i64_le(data: &[u8], offset: &mut usize) -> Result<i64> {
    Ok(read_u64_le(data, offset)? as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_orders_before_everything_and_equals_null() {
        assert_eq!(Value::Null.total_cmp(&Value::Null), Ordering::Equal);
        assert_eq!(Value::Null.total_cmp(&Value::Int64(i64::MIN)), Ordering::Less);
        assert_eq!(
            Value::String(String::new()).total_cmp(&Value::Null),
            Ordering::Greater
        );
    }

    #[test]
    fn nan_orders_last_among_doubles() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.total_cmp(&Value::Double(f64::INFINITY)), Ordering::Greater);
        assert_eq!(nan.total_cmp(&Value::Double(f64::NAN)), Ordering::Equal);
    }

    #[test]
    fn codec_round_trips() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int64(-42),
            Value::UInt32(7),
            Value::Double(2.5),
            Value::String("chunky".to_string()),
        ];
        let mut buf = Vec::new();
        for v in &values {
            v.encode(&mut buf);
        }
        let mut offset = 0;
        for v in &values {
            let decoded = Value::decode(&buf, &mut offset).expect("decode");
            assert_eq!(&decoded, v);
        }
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn nan_encodings_are_canonical() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        Value::Double(f64::NAN).encode(&mut a);
        Value::Double(f64::from_bits(0x7ff8_dead_beef_0001)).encode(&mut b);
        // Every NaN encodes the quiet NaN payload.
        assert_eq!(a, b);
    }
}
