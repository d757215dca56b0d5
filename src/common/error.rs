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

/// Error surfaced by the join operator. All variants are fatal for the
/// running operator; the host owns retry policy for transient faults.
#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("resource limit exceeded: {0}")]
    Resource(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no ordering comparator for key type: {0}")]
    Comparator(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, JoinError>;

impl JoinError {
    pub fn config(msg: impl Into<String>) -> Self {
        JoinError::Config(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        JoinError::Resource(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        JoinError::Transport(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        JoinError::Internal(msg.into())
    }
}
