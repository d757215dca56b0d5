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
//! Operator settings: parameter parsing, key-to-tuple mapping and schema
//! derivation.
//!
//! Responsibilities:
//! - Parses and validates the `key=value` parameter list (repeated keys,
//!   unknown tokens, bad numbers, key arity/type mismatches).
//! - Computes the per-side tuple layout: join keys occupy the low slots in
//!   join order, remaining fields follow in input order.
//! - Derives the pre-tupled and output array schemas.

use crate::array::schema::{ArrayDesc, AttributeDesc};
use crate::array::value::ValueType;
use crate::common::logging::debug;
use crate::common::{JoinError, Result};
use crate::common::config::EngineConfig;

/// Which side plays the build/first role for an algorithm variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Algorithm {
    HashReplicateLeft,
    HashReplicateRight,
    MergeLeftFirst,
    MergeRightFirst,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::HashReplicateLeft => "hash_replicate_left",
            Algorithm::HashReplicateRight => "hash_replicate_right",
            Algorithm::MergeLeftFirst => "merge_left_first",
            Algorithm::MergeRightFirst => "merge_right_first",
        }
    }
}

/// Table sizing: a group occupies at least 32 bytes, an empty bucket is a
/// pointer, so for each common memory limit we pick a prime bucket count
/// with a load factor of 4 or less and never rehash.
const NUM_SIZES: usize = 12;
const MEM_LIMITS_MB: [u64; NUM_SIZES] = [
    128,
    256,
    512,
    1024,
    2048,
    4096,
    8192,
    16384,
    32768,
    65536,
    131072,
    u64::MAX,
];
const TABLE_SIZES: [u64; NUM_SIZES] = [
    1_048_573,
    2_097_143,
    4_194_301,
    8_388_617,
    16_777_213,
    33_554_467,
    67_108_859,
    134_217_757,
    268_435_459,
    536_870_909,
    1_073_741_827,
    2_147_483_647,
];

pub fn choose_num_buckets(max_table_size_mb: u64) -> u64 {
    for i in 0..NUM_SIZES {
        if max_table_size_mb <= MEM_LIMITS_MB[i] {
            return TABLE_SIZES[i];
        }
    }
    TABLE_SIZES[NUM_SIZES - 1]
}

fn check_key_comparator(dtype: ValueType) -> Result<()> {
    match dtype {
        ValueType::Bool | ValueType::Int64 | ValueType::Double | ValueType::String => Ok(()),
        other => Err(JoinError::Comparator(other.name().to_string())),
    }
}

#[derive(Debug)]
pub struct Settings {
    left_desc: ArrayDesc,
    right_desc: ArrayDesc,
    num_left_attrs: usize,
    num_left_dims: usize,
    num_right_attrs: usize,
    num_right_dims: usize,
    left_map_to_tuple: Vec<usize>,
    right_map_to_tuple: Vec<usize>,
    left_tuple_size: usize,
    right_tuple_size: usize,
    num_keys: usize,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    key_types: Vec<ValueType>,
    key_nullable: Vec<bool>,
    max_table_size_mb: u64,
    num_hash_buckets: u64,
    chunk_size: u64,
    hash_join_threshold: u64,
    bloom_filter_bits: u64,
    num_instances: u64,
    algorithm: Option<Algorithm>,
}

struct ParsedParams {
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    max_table_size_mb: Option<u64>,
    chunk_size: Option<u64>,
    hash_join_threshold: Option<u64>,
    bloom_filter_bits: Option<u64>,
    algorithm: Option<Algorithm>,
}

fn parse_keys(content: &str) -> Result<Vec<usize>> {
    let mut keys = Vec::new();
    for tok in content.split(',') {
        let tok = tok.trim();
        let key: i64 = tok
            .parse()
            .map_err(|_| JoinError::config(format!("could not parse keys: '{}'", tok)))?;
        if key < 0 {
            return Err(JoinError::config(format!("negative key index {}", key)));
        }
        keys.push(key as usize);
    }
    Ok(keys)
}

fn parse_positive(content: &str, what: &str) -> Result<u64> {
    let value: i64 = content
        .trim()
        .parse()
        .map_err(|_| JoinError::config(format!("could not parse {}: '{}'", what, content)))?;
    if value <= 0 {
        return Err(JoinError::config(format!("{} must be positive", what)));
    }
    Ok(value as u64)
}

fn parse_algorithm(content: &str) -> Result<Algorithm> {
    match content.trim() {
        "hash_replicate_left" => Ok(Algorithm::HashReplicateLeft),
        "hash_replicate_right" => Ok(Algorithm::HashReplicateRight),
        "merge_left_first" => Ok(Algorithm::MergeLeftFirst),
        "merge_right_first" => Ok(Algorithm::MergeRightFirst),
        other => Err(JoinError::config(format!(
            "could not parse algorithm: '{}'",
            other
        ))),
    }
}

fn parse_params(parameters: &[String]) -> Result<ParsedParams> {
    let mut parsed = ParsedParams {
        left_keys: Vec::new(),
        right_keys: Vec::new(),
        max_table_size_mb: None,
        chunk_size: None,
        hash_join_threshold: None,
        bloom_filter_bits: None,
        algorithm: None,
    };
    let mut left_keys_set = false;
    let mut right_keys_set = false;
    let mut max_table_size_set = false;
    let mut chunk_size_set = false;
    let mut threshold_set = false;
    let mut bloom_set = false;
    let mut algorithm_set = false;

    let check_once = |already: &mut bool, header: &str| -> Result<()> {
        if *already {
            return Err(JoinError::config(format!(
                "illegal attempt to set {} multiple times",
                header
            )));
        }
        *already = true;
        Ok(())
    };

    for parameter in parameters {
        let parameter = parameter.trim();
        if let Some(content) = parameter.strip_prefix("left_keys=") {
            check_once(&mut left_keys_set, "left_keys")?;
            parsed.left_keys = parse_keys(content)?;
        } else if let Some(content) = parameter.strip_prefix("right_keys=") {
            check_once(&mut right_keys_set, "right_keys")?;
            parsed.right_keys = parse_keys(content)?;
        } else if let Some(content) = parameter.strip_prefix("max_table_size=") {
            check_once(&mut max_table_size_set, "max_table_size")?;
            parsed.max_table_size_mb = Some(parse_positive(content, "max table size")?);
        } else if let Some(content) = parameter.strip_prefix("chunk_size=") {
            check_once(&mut chunk_size_set, "chunk_size")?;
            parsed.chunk_size = Some(parse_positive(content, "chunk size")?);
        } else if let Some(content) = parameter.strip_prefix("hash_join_threshold=") {
            check_once(&mut threshold_set, "hash_join_threshold")?;
            parsed.hash_join_threshold = Some(parse_positive(content, "hash join threshold")?);
        } else if let Some(content) = parameter.strip_prefix("bloom_filter_size=") {
            check_once(&mut bloom_set, "bloom_filter_size")?;
            parsed.bloom_filter_bits = Some(parse_positive(content, "bloom filter size")?);
        } else if let Some(content) = parameter.strip_prefix("algorithm=") {
            check_once(&mut algorithm_set, "algorithm")?;
            parsed.algorithm = Some(parse_algorithm(content)?);
        } else {
            return Err(JoinError::config(format!(
                "unrecognized token '{}'",
                parameter
            )));
        }
    }
    Ok(parsed)
}

impl Settings {
    pub fn new(
        left_desc: ArrayDesc,
        right_desc: ArrayDesc,
        parameters: &[String],
        config: &EngineConfig,
        num_instances: u64,
    ) -> Result<Self> {
        let parsed = parse_params(parameters)?;
        let max_table_size_mb = parsed.max_table_size_mb.unwrap_or(config.max_table_size_mb);
        let mut settings = Settings {
            num_left_attrs: left_desc.num_attrs(),
            num_left_dims: left_desc.num_dims(),
            num_right_attrs: right_desc.num_attrs(),
            num_right_dims: right_desc.num_dims(),
            left_desc,
            right_desc,
            left_map_to_tuple: Vec::new(),
            right_map_to_tuple: Vec::new(),
            left_tuple_size: 0,
            right_tuple_size: 0,
            num_keys: 0,
            left_keys: parsed.left_keys,
            right_keys: parsed.right_keys,
            key_types: Vec::new(),
            key_nullable: Vec::new(),
            max_table_size_mb,
            num_hash_buckets: choose_num_buckets(max_table_size_mb),
            chunk_size: parsed.chunk_size.unwrap_or(config.chunk_size),
            hash_join_threshold: parsed
                .hash_join_threshold
                .unwrap_or_else(|| config.hash_join_threshold_bytes()),
            bloom_filter_bits: parsed.bloom_filter_bits.unwrap_or(config.bloom_filter_bits),
            num_instances,
            algorithm: parsed.algorithm,
        };
        settings.verify_inputs()?;
        settings.map_attributes()?;
        settings.log();
        Ok(settings)
    }

    fn verify_inputs(&self) -> Result<()> {
        if self.left_keys.is_empty() {
            return Err(JoinError::config("no left keys provided"));
        }
        if self.right_keys.is_empty() {
            return Err(JoinError::config("no right keys provided"));
        }
        if self.left_keys.len() != self.right_keys.len() {
            return Err(JoinError::config("mismatched numbers of keys provided"));
        }
        for i in 0..self.left_keys.len() {
            let left_key = self.left_keys[i];
            let right_key = self.right_keys[i];
            let left_type = self
                .left_desc
                .field_type(left_key)
                .ok_or_else(|| JoinError::config("left key out of bounds"))?;
            let right_type = self
                .right_desc
                .field_type(right_key)
                .ok_or_else(|| JoinError::config("right key out of bounds"))?;
            if left_type != right_type {
                return Err(JoinError::config(format!(
                    "key types do not match: {} vs {}",
                    left_type, right_type
                )));
            }
            check_key_comparator(left_type)?;
        }
        Ok(())
    }

    fn map_attributes(&mut self) -> Result<()> {
        self.num_keys = self.left_keys.len();
        let num_left_fields = self.num_left_attrs + self.num_left_dims;
        let num_right_fields = self.num_right_attrs + self.num_right_dims;
        let mut left_map = vec![usize::MAX; num_left_fields];
        let mut right_map = vec![usize::MAX; num_right_fields];
        for i in 0..self.num_keys {
            let left_key = self.left_keys[i];
            let right_key = self.right_keys[i];
            if left_map[left_key] != usize::MAX {
                return Err(JoinError::config("duplicate left key index"));
            }
            if right_map[right_key] != usize::MAX {
                return Err(JoinError::config("duplicate right key index"));
            }
            left_map[left_key] = i;
            right_map[right_key] = i;
            self.key_types.push(
                self.left_desc
                    .field_type(left_key)
                    .expect("validated key index"),
            );
            let left_nullable = self.left_desc.field_nullable(left_key);
            let right_nullable = self.right_desc.field_nullable(right_key);
            self.key_nullable.push(left_nullable || right_nullable);
        }
        let mut j = self.num_keys;
        for slot in left_map.iter_mut() {
            if *slot == usize::MAX {
                *slot = j;
                j += 1;
            }
        }
        self.left_tuple_size = j;
        let mut j = self.num_keys;
        for slot in right_map.iter_mut() {
            if *slot == usize::MAX {
                *slot = j;
                j += 1;
            }
        }
        self.right_tuple_size = j;
        self.left_map_to_tuple = left_map;
        self.right_map_to_tuple = right_map;
        Ok(())
    }

    fn log(&self) {
        let pairs: Vec<String> = self
            .left_keys
            .iter()
            .zip(self.right_keys.iter())
            .map(|(l, r)| format!("{}->{}", l, r))
            .collect();
        debug!(
            "equi_join keys {} buckets {} chunk {} threshold {}",
            pairs.join(" "),
            self.num_hash_buckets,
            self.chunk_size,
            self.hash_join_threshold
        );
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn num_instances(&self) -> u64 {
        self.num_instances
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn hash_join_threshold(&self) -> u64 {
        self.hash_join_threshold
    }

    pub fn max_table_size_mb(&self) -> u64 {
        self.max_table_size_mb
    }

    pub fn num_hash_buckets(&self) -> u64 {
        self.num_hash_buckets
    }

    pub fn bloom_filter_bits(&self) -> u64 {
        self.bloom_filter_bits
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn key_types(&self) -> &[ValueType] {
        &self.key_types
    }

    pub fn desc(&self, side: Side) -> &ArrayDesc {
        match side {
            Side::Left => &self.left_desc,
            Side::Right => &self.right_desc,
        }
    }

    pub fn tuple_size(&self, side: Side) -> usize {
        match side {
            Side::Left => self.left_tuple_size,
            Side::Right => self.right_tuple_size,
        }
    }

    pub fn map_to_tuple(&self, side: Side) -> &[usize] {
        match side {
            Side::Left => &self.left_map_to_tuple,
            Side::Right => &self.right_map_to_tuple,
        }
    }

    pub fn keys(&self, side: Side) -> &[usize] {
        match side {
            Side::Left => &self.left_keys,
            Side::Right => &self.right_keys,
        }
    }

    pub fn num_output_attrs(&self) -> usize {
        self.left_tuple_size + self.right_tuple_size - self.num_keys
    }

    /// Type of each tuple position for the given side.
    pub fn tuple_types(&self, side: Side) -> Vec<ValueType> {
        let desc = self.desc(side);
        let map = self.map_to_tuple(side);
        let mut types = vec![ValueType::Int64; self.tuple_size(side)];
        for (field, &slot) in map.iter().enumerate() {
            types[slot] = desc.field_type(field).expect("mapped field");
        }
        types
    }

    fn tuple_nullable(&self, side: Side) -> Vec<bool> {
        let desc = self.desc(side);
        let map = self.map_to_tuple(side);
        let mut nullable = vec![false; self.tuple_size(side)];
        for (field, &slot) in map.iter().enumerate() {
            nullable[slot] = desc.field_nullable(field);
        }
        nullable
    }

    fn field_name(&self, side: Side, field: usize) -> String {
        let desc = self.desc(side);
        if field < desc.num_attrs() {
            desc.attributes[field].name.clone()
        } else {
            desc.dimensions[field - desc.num_attrs()].name.clone()
        }
    }

    /// Estimated bytes per cell of the pre-tupled rendition of a side,
    /// used by the pre-scan to turn chunk counts into size estimates.
    pub fn cell_size_estimate(&self, side: Side) -> u64 {
        let tuple: u64 = self
            .tuple_types(side)
            .iter()
            .map(|t| t.cell_size_hint())
            .sum();
        tuple + ValueType::UInt32.cell_size_hint() + 16
    }

    /// Schema of the pre-tupled rendition: one attribute per tuple
    /// position plus the trailing 32-bit hash slot.
    pub fn pre_tupled_schema(&self, side: Side) -> ArrayDesc {
        let types = self.tuple_types(side);
        let nullable = self.tuple_nullable(side);
        let mut attributes: Vec<AttributeDesc> = types
            .iter()
            .zip(nullable.iter())
            .enumerate()
            .map(|(i, (t, n))| AttributeDesc::new(format!("a{}", i), *t, *n))
            .collect();
        attributes.push(AttributeDesc::new("hash", ValueType::UInt32, false));
        ArrayDesc::one_dim_output("pre_tupled", attributes, self.num_instances, self.chunk_size)
    }

    /// Output schema: full left tuple, then right non-key positions, then
    /// the empty tag. Key attributes are nullable iff either source column
    /// was nullable.
    pub fn output_schema(&self) -> ArrayDesc {
        let mut attributes = vec![None; self.num_output_attrs()];
        for field in 0..self.num_left_attrs + self.num_left_dims {
            let slot = self.left_map_to_tuple[field];
            let dtype = self.left_desc.field_type(field).expect("left field");
            let nullable = if slot < self.num_keys {
                self.key_nullable[slot]
            } else {
                self.left_desc.field_nullable(field)
            };
            attributes[slot] = Some(AttributeDesc::new(
                self.field_name(Side::Left, field),
                dtype,
                nullable,
            ));
        }
        for field in 0..self.num_right_attrs + self.num_right_dims {
            let slot = self.right_map_to_tuple[field];
            if slot < self.num_keys {
                continue;
            }
            let dtype = self.right_desc.field_type(field).expect("right field");
            attributes[slot + self.left_tuple_size - self.num_keys] = Some(AttributeDesc::new(
                self.field_name(Side::Right, field),
                dtype,
                self.right_desc.field_nullable(field),
            ));
        }
        let mut attributes: Vec<AttributeDesc> = attributes
            .into_iter()
            .map(|a| a.expect("output slot populated"))
            .collect();
        // The host's empty tag: schema-level marker, every cell present.
        attributes.push(AttributeDesc::new("empty_tag", ValueType::Bool, false));
        ArrayDesc::one_dim_output("equi_join", attributes, self.num_instances, self.chunk_size)
    }
}
