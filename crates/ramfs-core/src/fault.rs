// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection policy + runtime controller for allocations

use crate::FsError;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Allocation sites that can be forced to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    /// A new node slot on create
    AllocNode,
    /// A name buffer on create or rename
    AllocName,
    /// A data block on first write into it
    AllocBlock,
}

/// Individual rule describing which allocation should fail and how often.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    /// Optional number of leading invocations to skip before injecting faults.
    #[serde(default)]
    pub start_after: u64,
    /// Optional maximum number of injected failures for this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl Default for FaultRule {
    fn default() -> Self {
        Self {
            op: FaultOp::AllocBlock,
            start_after: 0,
            max_faults: None,
        }
    }
}

/// Serializable policy, accepted as JSON or as part of the TOML config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

#[derive(Clone, Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

/// Runtime controller that tracks policy + hit counts.
#[derive(Debug, Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: FaultPolicy) -> Self {
        let injector = Self::new();
        injector.set_policy(policy);
        injector
    }

    pub fn snapshot(&self) -> FaultPolicy {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).policy.clone()
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.counters = vec![RuleCounters::default(); policy.rules.len()];
        guard.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    /// Count one allocation at `op`; returns the error to fail it with, if any
    pub fn check(&self, op: FaultOp) -> Result<(), FsError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.policy.enabled {
            return Ok(());
        }
        let FaultState { policy, counters } = &mut *guard;
        for (rule, counter) in policy.rules.iter().zip(counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counter.invocations = counter.invocations.saturating_add(1);
            if counter.invocations <= rule.start_after {
                continue;
            }
            if rule.max_faults.is_some_and(|max| counter.hits >= max) {
                continue;
            }
            counter.hits = counter.hits.saturating_add(1);
            return Err(FsError::ResourceExhausted);
        }
        Ok(())
    }
}
