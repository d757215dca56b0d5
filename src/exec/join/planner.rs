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
//! Algorithm selection from partial and global knowledge of input size.
//!
//! Responsibilities:
//! - Exact global sizing for materialized inputs; bounded-cost pre-scan
//!   estimates otherwise.
//! - The four-way selection rules: user override, exact-size hash picks,
//!   exact-size merge ordering, pre-scan hash picks, and the
//!   finished-instance-count merge tie-break.

use bytes::Bytes;

use crate::array::array::{AccessMode, MemArray};
use crate::common::logging::debug;
use crate::common::Result;
use crate::exec::join::settings::{Algorithm, Settings, Side};
use crate::runtime::collectives::{agree_on_boolean, all_gather, global_sum_u64};
use crate::runtime::exchange::QueryContext;

pub fn compute_exact_array_size(array: &MemArray) -> u64 {
    array.exact_byte_size()
}

pub fn global_compute_exact_array_size(array: &MemArray, ctx: &QueryContext) -> Result<u64> {
    global_sum_u64(ctx, compute_exact_array_size(array))
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PreScanResult {
    pub finished_left: bool,
    pub finished_right: bool,
    pub left_size_estimate: u64,
    pub right_size_estimate: u64,
}

impl PreScanResult {
    fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(18);
        buf.push(self.finished_left as u8);
        buf.push(self.finished_right as u8);
        buf.extend_from_slice(&self.left_size_estimate.to_le_bytes());
        buf.extend_from_slice(&self.right_size_estimate.to_le_bytes());
        Bytes::from(buf)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let finished_left = crate::array::value::read_u8(data, &mut offset)? != 0;
        let finished_right = crate::array::value::read_u8(data, &mut offset)? != 0;
        let left_size_estimate = crate::array::value::read_u64_le(data, &mut offset)?;
        let right_size_estimate = crate::array::value::read_u64_le(data, &mut offset)?;
        Ok(Self {
            finished_left,
            finished_right,
            left_size_estimate,
            right_size_estimate,
        })
    }
}

/// Walk both inputs in lockstep, charging `chunk.count * cell_size` per
/// chunk and stopping each side once its running total reaches the hash
/// join threshold. A side that ends before the threshold is "finished".
pub fn local_pre_scan(
    left: &mut MemArray,
    right: &mut MemArray,
    settings: &Settings,
) -> Result<PreScanResult> {
    debug!("equi_join starting local prescan");
    if left.supported_access() == AccessMode::SinglePass {
        debug!("equi_join ensuring left random access");
        left.ensure_random_access();
    }
    if right.supported_access() == AccessMode::SinglePass {
        debug!("equi_join ensuring right random access");
        right.ensure_random_access();
    }
    let left_cell_size = settings.cell_size_estimate(Side::Left);
    let right_cell_size = settings.cell_size_estimate(Side::Right);
    let threshold = settings.hash_join_threshold();

    let mut left_iter = left.chunks();
    let mut right_iter = right.chunks();
    let mut left_chunk = left_iter.next();
    let mut right_chunk = right_iter.next();
    let mut left_size: u64 = 0;
    let mut right_size: u64 = 0;

    while left_size < threshold && right_size < threshold {
        let (Some(lc), Some(rc)) = (left_chunk, right_chunk) else {
            break;
        };
        left_size += lc.count() * left_cell_size;
        right_size += rc.count() * right_cell_size;
        left_chunk = left_iter.next();
        right_chunk = right_iter.next();
    }
    if left_chunk.is_none() {
        while let Some(rc) = right_chunk {
            if right_size >= threshold {
                break;
            }
            right_size += rc.count() * right_cell_size;
            right_chunk = right_iter.next();
        }
    }
    if right_chunk.is_none() {
        while let Some(lc) = left_chunk {
            if left_size >= threshold {
                break;
            }
            left_size += lc.count() * left_cell_size;
            left_chunk = left_iter.next();
        }
    }

    let result = PreScanResult {
        finished_left: left_chunk.is_none(),
        finished_right: right_chunk.is_none(),
        left_size_estimate: left_size,
        right_size_estimate: right_size,
    };
    debug!(
        "equi_join prescan complete leftFinished {} rightFinished {} leftSize {} rightSize {}",
        result.finished_left,
        result.finished_right,
        result.left_size_estimate,
        result.right_size_estimate
    );
    Ok(result)
}

#[derive(Copy, Clone, Debug, Default)]
pub struct GlobalPreScan {
    pub left_finished: u64,
    pub right_finished: u64,
    pub left_size_estimate: u64,
    pub right_size_estimate: u64,
}

pub fn global_pre_scan(
    left: &mut MemArray,
    right: &mut MemArray,
    settings: &Settings,
    ctx: &QueryContext,
) -> Result<GlobalPreScan> {
    let local = local_pre_scan(left, right, settings)?;
    let parts = all_gather(ctx, local.encode())?;
    let mut global = GlobalPreScan::default();
    for part in parts {
        let other = PreScanResult::decode(&part)?;
        if other.finished_left {
            global.left_finished += 1;
        }
        if other.finished_right {
            global.right_finished += 1;
        }
        global.left_size_estimate = global
            .left_size_estimate
            .saturating_add(other.left_size_estimate);
        global.right_size_estimate = global
            .right_size_estimate
            .saturating_add(other.right_size_estimate);
    }
    Ok(global)
}

/// First match wins. Materialized sides give exact cost; the pre-scan
/// bounds the cost of sizing streamed sides; the count of instances that
/// finished within threshold is the proxy for "globally small".
pub fn pick_algorithm(
    left: &mut MemArray,
    right: &mut MemArray,
    settings: &Settings,
    ctx: &QueryContext,
) -> Result<Algorithm> {
    if let Some(algorithm) = settings.algorithm() {
        return Ok(algorithm);
    }
    let num_instances = ctx.instances_count() as u64;
    let threshold = settings.hash_join_threshold();

    let left_materialized = agree_on_boolean(ctx, left.is_materialized())?;
    let exact_left_size = if left_materialized {
        global_compute_exact_array_size(left, ctx)?
    } else {
        u64::MAX
    };
    debug!(
        "equi_join left materialized {} exact left size {}",
        left_materialized, exact_left_size
    );
    if left_materialized && exact_left_size < threshold {
        return Ok(Algorithm::HashReplicateLeft);
    }

    let right_materialized = agree_on_boolean(ctx, right.is_materialized())?;
    let exact_right_size = if right_materialized {
        global_compute_exact_array_size(right, ctx)?
    } else {
        u64::MAX
    };
    debug!(
        "equi_join right materialized {} exact right size {}",
        right_materialized, exact_right_size
    );
    if right_materialized && exact_right_size < threshold {
        return Ok(Algorithm::HashReplicateRight);
    }

    if left_materialized && right_materialized {
        return Ok(if exact_left_size <= exact_right_size {
            Algorithm::MergeLeftFirst
        } else {
            Algorithm::MergeRightFirst
        });
    }

    let scan = global_pre_scan(left, right, settings, ctx)?;
    debug!(
        "equi_join global prescan leftFinished {} rightFinished {} leftSizeEst {} rightSizeEst {}",
        scan.left_finished, scan.right_finished, scan.left_size_estimate, scan.right_size_estimate
    );
    if scan.left_finished == num_instances && scan.left_size_estimate < threshold {
        return Ok(Algorithm::HashReplicateLeft);
    }
    if scan.right_finished == num_instances && scan.right_size_estimate < threshold {
        return Ok(Algorithm::HashReplicateRight);
    }
    // More instances finishing a side within threshold means that side is
    // smaller; ties keep left first.
    Ok(if scan.left_finished < scan.right_finished {
        Algorithm::MergeRightFirst
    } else {
        Algorithm::MergeLeftFirst
    })
}

/// Planner safety: a hash pick implies the chosen side was sized under
/// the threshold. Exposed for tests.
pub fn hash_pick_was_safe(
    algorithm: Algorithm,
    exact_or_estimated_left: u64,
    exact_or_estimated_right: u64,
    threshold: u64,
) -> bool {
    match algorithm {
        Algorithm::HashReplicateLeft => exact_or_estimated_left < threshold,
        Algorithm::HashReplicateRight => exact_or_estimated_right < threshold,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::chunk::{Row, TupleChunk};
    use crate::array::schema::{ArrayDesc, AttributeDesc, DimensionDesc};
    use crate::array::value::{Value, ValueType};
    use crate::common::config::EngineConfig;
    use crate::runtime::exchange::LocalCluster;

    fn desc() -> ArrayDesc {
        ArrayDesc::new(
            "in",
            vec![AttributeDesc::new("k", ValueType::Int64, false)],
            vec![DimensionDesc::new("i", 0, i64::MAX / 2, 100)],
        )
    }

    fn array_with_rows(n: usize) -> MemArray {
        let mut array = MemArray::new(desc());
        let mut chunk_start = 0i64;
        let mut chunk = TupleChunk::new(vec![0]);
        for i in 0..n {
            if chunk.rows.len() == 100 {
                let next = chunk_start + 100;
                array.insert_chunk(std::mem::replace(&mut chunk, TupleChunk::new(vec![next])));
                chunk_start = next;
            }
            chunk
                .rows
                .push(Row::new(vec![i as i64], vec![Value::Int64(i as i64)]));
        }
        array.insert_chunk(chunk);
        array
    }

    fn settings(threshold_bytes: u64) -> Settings {
        Settings::new(
            desc(),
            desc(),
            &[
                "left_keys=0".to_string(),
                "right_keys=0".to_string(),
                format!("hash_join_threshold={}", threshold_bytes),
            ],
            &EngineConfig::default(),
            1,
        )
        .expect("settings")
    }

    fn solo_ctx() -> QueryContext {
        QueryContext::new(LocalCluster::new(1), 0)
    }

    #[test]
    fn prescan_short_circuits_the_large_side() {
        // Left is far over threshold, right well under it.
        let mut left = array_with_rows(100_000).with_access(AccessMode::MultiPass, false);
        let mut right = array_with_rows(10).with_access(AccessMode::MultiPass, false);
        let settings = settings(10_000);
        let scan = local_pre_scan(&mut left, &mut right, &settings).expect("prescan");
        assert!(!scan.finished_left);
        assert!(scan.finished_right);
        assert!(scan.right_size_estimate < 10_000);
        // The left walk stopped at the threshold, not at the array end.
        assert!(scan.left_size_estimate >= 10_000);
        assert!(scan.left_size_estimate < 100_000 * 25);
    }

    #[test]
    fn prescan_materializes_single_pass_inputs() {
        let mut left = array_with_rows(5).with_access(AccessMode::SinglePass, false);
        let mut right = array_with_rows(5).with_access(AccessMode::SinglePass, false);
        let settings = settings(1 << 20);
        local_pre_scan(&mut left, &mut right, &settings).expect("prescan");
        assert!(left.is_materialized());
        assert!(right.is_materialized());
    }

    #[test]
    fn planner_prefers_small_materialized_left() {
        let mut left = array_with_rows(3);
        let mut right = array_with_rows(1000);
        let settings = settings(1 << 20);
        let ctx = solo_ctx();
        let algorithm = pick_algorithm(&mut left, &mut right, &settings, &ctx).expect("pick");
        assert_eq!(algorithm, Algorithm::HashReplicateLeft);
        assert!(hash_pick_was_safe(
            algorithm,
            left.exact_byte_size(),
            right.exact_byte_size(),
            settings.hash_join_threshold()
        ));
    }

    #[test]
    fn planner_falls_back_to_merge_when_both_large() {
        let mut left = array_with_rows(2000);
        let mut right = array_with_rows(1000);
        let settings = settings(1000);
        let ctx = solo_ctx();
        let algorithm = pick_algorithm(&mut left, &mut right, &settings, &ctx).expect("pick");
        // Both materialized and over threshold: smaller side goes first.
        assert_eq!(algorithm, Algorithm::MergeRightFirst);
    }

    #[test]
    fn planner_honors_user_override() {
        let mut left = array_with_rows(3);
        let mut right = array_with_rows(3);
        let settings = Settings::new(
            desc(),
            desc(),
            &[
                "left_keys=0".to_string(),
                "right_keys=0".to_string(),
                "algorithm=merge_right_first".to_string(),
            ],
            &EngineConfig::default(),
            1,
        )
        .expect("settings");
        let ctx = solo_ctx();
        let algorithm = pick_algorithm(&mut left, &mut right, &settings, &ctx).expect("pick");
        assert_eq!(algorithm, Algorithm::MergeRightFirst);
    }

    #[test]
    fn streamed_small_right_is_picked_via_prescan() {
        let mut left = array_with_rows(100_000).with_access(AccessMode::MultiPass, false);
        let mut right = array_with_rows(10).with_access(AccessMode::MultiPass, false);
        let settings = settings(10_000);
        let ctx = solo_ctx();
        let algorithm = pick_algorithm(&mut left, &mut right, &settings, &ctx).expect("pick");
        assert_eq!(algorithm, Algorithm::HashReplicateRight);
    }

    #[test]
    fn prescan_payload_round_trips() {
        let result = PreScanResult {
            finished_left: true,
            finished_right: false,
            left_size_estimate: 123,
            right_size_estimate: u64::MAX / 3,
        };
        let decoded = PreScanResult::decode(&result.encode()).expect("decode");
        assert_eq!(decoded.finished_left, result.finished_left);
        assert_eq!(decoded.finished_right, result.finished_right);
        assert_eq!(decoded.left_size_estimate, result.left_size_estimate);
        assert_eq!(decoded.right_size_estimate, result.right_size_estimate);
    }
}
