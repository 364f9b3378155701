// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for a ram filesystem instance

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dir::max_name_len;
use crate::error::{FsError, FsResult};
use crate::fault::FaultPolicy;
use crate::tree::ROOT_NAME;
use crate::types::DMDIR;

pub const DEFAULT_OWNER: &str = "system";

/// Filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RamFsConfig {
    /// Identity reported as uid, gid and muid of every entry
    pub owner: String,
    /// Permission word of the root directory
    pub root_perm: u32,
    /// Log an indented dump of the tree after every destruction
    pub dump_tree: bool,
    /// Deliver change events to subscribers
    pub track_events: bool,
    /// Allocation fault injection
    pub faults: FaultPolicy,
}

impl Default for RamFsConfig {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            root_perm: DMDIR | 0o777,
            dump_tree: false,
            track_events: true,
            faults: FaultPolicy::default(),
        }
    }
}

impl RamFsConfig {
    pub fn from_toml_str(text: &str) -> FsResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> FsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FsError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.owner.is_empty() {
            return Err(FsError::InvalidConfig("owner must be a non-empty name".into()));
        }
        if max_name_len(&self.owner) < ROOT_NAME.len() {
            return Err(FsError::InvalidConfig(
                "owner is too long to fit a stat record".into(),
            ));
        }
        if self.root_perm & DMDIR == 0 {
            return Err(FsError::InvalidConfig("root-perm must carry the directory bit".into()));
        }
        Ok(())
    }
}
