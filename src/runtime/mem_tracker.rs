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
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks logical memory usage for a component and its ancestors.
///
/// This is a lightweight accounting utility that only records bytes
/// explicitly reported by the caller. It does NOT reflect real process RSS
/// or allocator statistics.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    limit: i64,
    parent: Option<Arc<MemTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
}

impl MemTracker {
    /// Create a root tracker with no parent and no limit.
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit: -1,
            parent: None,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    /// Create a child tracker. `limit < 0` means unlimited.
    pub fn new_child(label: impl Into<String>, limit: i64, parent: &Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            parent: Some(Arc::clone(parent)),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Increase consumption for this tracker and all ancestors.
    pub fn consume(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
            current.update_peak(new_value);
            tracker = current.parent.as_deref();
        }
    }

    /// Like `consume`, but fails without charging when the limit would be
    /// exceeded at this tracker.
    pub fn try_consume(&self, bytes: i64) -> bool {
        if bytes <= 0 {
            return true;
        }
        if self.limit >= 0 && self.current() + bytes > self.limit {
            return false;
        }
        self.consume(bytes);
        true
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.current.fetch_sub(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    fn update_peak(&self, value: i64) {
        let mut peak = self.peak.load(Ordering::Relaxed);
        while value > peak {
            match self.peak.compare_exchange_weak(
                peak,
                value,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }
}
