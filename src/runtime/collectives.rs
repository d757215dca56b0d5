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
//! All-gather and the reducers layered on it.
//!
//! Every collective follows the fixed pattern of the operator: send the
//! local contribution to each peer, then receive one contribution from each
//! peer. All reducers are commutative, so no ordering is assumed beyond
//! full participation.

use bytes::Bytes;

use crate::common::{JoinError, Result};
use crate::runtime::exchange::QueryContext;

/// Exchange one buffer per instance. The result is indexed by instance id
/// and includes the caller's own payload.
pub fn all_gather(ctx: &QueryContext, payload: Bytes) -> Result<Vec<Bytes>> {
    let n = ctx.instances_count();
    let me = ctx.instance_id();
    for dst in 0..n {
        if dst != me {
            ctx.buf_send(dst, payload.clone())?;
        }
    }
    let mut gathered = Vec::with_capacity(n);
    for src in 0..n {
        if src == me {
            gathered.push(payload.clone());
        } else {
            gathered.push(ctx.buf_receive(src)?);
        }
    }
    Ok(gathered)
}

/// Sum of one `u64` per instance.
pub fn global_sum_u64(ctx: &QueryContext, value: u64) -> Result<u64> {
    let parts = all_gather(ctx, Bytes::copy_from_slice(&value.to_le_bytes()))?;
    let mut total: u64 = 0;
    for part in parts {
        let raw: [u8; 8] = part
            .as_ref()
            .try_into()
            .map_err(|_| JoinError::transport("malformed size payload"))?;
        total = total.saturating_add(u64::from_le_bytes(raw));
    }
    Ok(total)
}

/// True iff every instance passed true.
pub fn agree_on_boolean(ctx: &QueryContext, value: bool) -> Result<bool> {
    let parts = all_gather(ctx, Bytes::copy_from_slice(&[value as u8]))?;
    let mut agreed = true;
    for part in parts {
        let byte = *part
            .first()
            .ok_or_else(|| JoinError::transport("malformed boolean payload"))?;
        agreed = agreed && byte != 0;
    }
    Ok(agreed)
}
