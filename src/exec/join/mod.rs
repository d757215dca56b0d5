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
//! The distributed equi-join operator.
//!
//! Every instance of the cluster calls [`EquiJoin::execute`] with its
//! local shards of the two inputs. The planner sizes the inputs, picks one
//! of the four strategies, and the operator returns this instance's shard
//! of the joined output. All collective steps inside are barriers; the
//! call is all-or-nothing.

pub mod filters;
pub mod hash_table;
pub mod merge;
pub mod planner;
pub mod reader;
pub mod replication;
pub mod settings;
pub mod writer;

use crate::array::array::MemArray;
use crate::common::config::EngineConfig;
use crate::common::logging::{debug, instance_span};
use crate::common::Result;
use crate::runtime::exchange::QueryContext;

pub use settings::{Algorithm, Settings, Side};

pub struct EquiJoin;

impl EquiJoin {
    /// Run the join with the global engine config supplying defaults.
    pub fn execute(
        left: MemArray,
        right: MemArray,
        parameters: &[String],
        ctx: &QueryContext,
    ) -> Result<MemArray> {
        Self::execute_with_config(left, right, parameters, crate::common::config::config(), ctx)
    }

    pub fn execute_with_config(
        mut left: MemArray,
        mut right: MemArray,
        parameters: &[String],
        config: &EngineConfig,
        ctx: &QueryContext,
    ) -> Result<MemArray> {
        let span = instance_span(ctx.instance_id());
        let _enter = span.enter();
        let settings = Settings::new(
            left.desc().clone(),
            right.desc().clone(),
            parameters,
            config,
            ctx.instances_count() as u64,
        )?;
        let algorithm = planner::pick_algorithm(&mut left, &mut right, &settings, ctx)?;
        debug!("equi_join running {}", algorithm.name());
        match algorithm {
            Algorithm::HashReplicateLeft => {
                replication::replication_hash_join(&left, &right, &settings, ctx, Side::Left)
            }
            Algorithm::HashReplicateRight => {
                replication::replication_hash_join(&left, &right, &settings, ctx, Side::Right)
            }
            Algorithm::MergeLeftFirst => {
                merge::global_merge_join(&left, &right, &settings, ctx, Side::Left)
            }
            Algorithm::MergeRightFirst => {
                merge::global_merge_join(&left, &right, &settings, ctx, Side::Right)
            }
        }
    }
}
