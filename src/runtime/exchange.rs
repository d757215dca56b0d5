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
//! Point-to-point cluster messaging.
//!
//! Responsibilities:
//! - Implements blocking `buf_send` / `buf_receive` between the N
//!   instances of a query, FIFO per ordered instance pair.
//! - Carries the per-instance `QueryContext` handed to the operator.
//!
//! Current limitations:
//! - The cluster is in-process: instances are threads sharing one
//!   `LocalCluster`. A networked host can supply the same surface.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;

use crate::common::{JoinError, Result};

struct MailboxState {
    queues: HashMap<(usize, usize), VecDeque<Bytes>>,
}

/// Shared mailbox fabric for one cluster of N instances.
pub struct LocalCluster {
    num_instances: usize,
    mu: Mutex<MailboxState>,
    cv: Condvar,
}

impl LocalCluster {
    pub fn new(num_instances: usize) -> Arc<Self> {
        Arc::new(Self {
            num_instances: num_instances.max(1),
            mu: Mutex::new(MailboxState {
                queues: HashMap::new(),
            }),
            cv: Condvar::new(),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    fn check_instance(&self, id: usize) -> Result<()> {
        if id >= self.num_instances {
            return Err(JoinError::transport(format!(
                "instance {} out of range (cluster size {})",
                id, self.num_instances
            )));
        }
        Ok(())
    }

    fn send(&self, src: usize, dst: usize, payload: Bytes) -> Result<()> {
        self.check_instance(src)?;
        self.check_instance(dst)?;
        if src == dst {
            return Err(JoinError::transport("self-send is not allowed"));
        }
        let mut guard = self.mu.lock().expect("exchange lock");
        guard.queues.entry((src, dst)).or_default().push_back(payload);
        self.cv.notify_all();
        Ok(())
    }

    fn receive(&self, src: usize, dst: usize) -> Result<Bytes> {
        self.check_instance(src)?;
        self.check_instance(dst)?;
        if src == dst {
            return Err(JoinError::transport("self-receive is not allowed"));
        }
        let mut guard = self.mu.lock().expect("exchange lock");
        loop {
            if let Some(queue) = guard.queues.get_mut(&(src, dst)) {
                if let Some(payload) = queue.pop_front() {
                    return Ok(payload);
                }
            }
            guard = self.cv.wait(guard).expect("exchange wait");
        }
    }
}

/// Per-instance view of the running query: identity plus messaging.
#[derive(Clone)]
pub struct QueryContext {
    instance_id: usize,
    cluster: Arc<LocalCluster>,
}

impl QueryContext {
    pub fn new(cluster: Arc<LocalCluster>, instance_id: usize) -> Self {
        Self {
            instance_id,
            cluster,
        }
    }

    pub fn instance_id(&self) -> usize {
        self.instance_id
    }

    pub fn instances_count(&self) -> usize {
        self.cluster.num_instances()
    }

    pub fn buf_send(&self, dst: usize, payload: Bytes) -> Result<()> {
        self.cluster.send(self.instance_id, dst, payload)
    }

    /// Blocks until a buffer from `src` is available. Collective callers
    /// must follow the fixed send-then-receive pattern so every instance
    /// eventually drains its peers.
    pub fn buf_receive(&self, src: usize) -> Result<Bytes> {
        self.cluster.receive(src, self.instance_id)
    }
}
