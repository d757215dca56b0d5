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
//! Engine logging: a stock stderr subscriber plus per-instance
//! attribution.
//!
//! All N instances of a query share one process, so bare thread output is
//! unattributable; the operator enters [`instance_span`] for the duration
//! of a join and every phase logs inside it.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Install the stderr subscriber once. `level` is a tracing `EnvFilter`
/// expression, e.g. "info" or "arrayjoin=debug".
pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(level);
        // ANSI codes would show up as garbage when stderr is redirected.
        let use_ansi = atty::is(atty::Stream::Stderr);
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .with_target(false)
            .try_init();
    });
}

pub fn init() {
    init_with_level("info");
}

/// Span naming the executing instance; interleaved output from the
/// per-instance worker threads stays attributable through it.
pub fn instance_span(instance_id: usize) -> tracing::Span {
    tracing::debug_span!("instance", id = instance_id)
}

pub use tracing::{debug, error, info, trace, warn};
