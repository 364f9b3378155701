// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use ramfs_core::RamFsConfig;
use ramfs_logging::CliLoggingArgs;
use serde::Deserialize;
use std::path::Path;

/// Shell config file: filesystem settings at the top level plus an optional
/// `[logging]` table.
#[derive(Debug, Default, Deserialize)]
pub struct ShellConfig {
    #[serde(default)]
    pub logging: CliLoggingArgs,
    #[serde(flatten)]
    pub fs: RamFsConfig,
}

impl ShellConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.fs.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramfs_logging::CliLogLevel;
    use std::io::Write;

    #[test]
    fn parses_fs_and_logging_sections() {
        let config = ShellConfig::parse(
            r#"
owner = "glenda"
dump-tree = true

[logging]
log-level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.fs.owner, "glenda");
        assert!(config.fs.dump_tree);
        assert_eq!(config.logging.log_level, Some(CliLogLevel::Debug));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = ShellConfig::parse("").unwrap();
        assert_eq!(config.fs, RamFsConfig::default());
        assert!(config.logging.is_empty());
    }

    #[test]
    fn invalid_fs_settings_are_rejected() {
        assert!(ShellConfig::parse("owner = \"\"\n").is_err());
    }

    #[test]
    fn load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root-perm = 1").unwrap();
        let err = ShellConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
    }
}
