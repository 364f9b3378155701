// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shell command grammar. Each input line is split on whitespace and parsed
//! with clap, so `help` and per-command `--help` come for free.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct Line {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List a directory (newest entry first) or describe a file
    Ls { path: Option<String> },
    /// Create a directory
    Mkdir {
        path: String,
        /// Octal permission bits
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Create an empty file if nothing has that name yet
    Touch {
        path: String,
        /// Octal permission bits
        #[arg(long, default_value = "644", value_parser = parse_mode)]
        mode: u32,
    },
    /// Write text at the start of a file, creating it when missing
    Write {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Append text at the end of a file, creating it when missing
    Append {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Print file contents
    Cat { path: String },
    /// Print a directory entry
    Stat { path: String },
    /// Rename an entry within its directory
    Mv { path: String, name: String },
    /// Change permission bits
    Chmod {
        #[arg(value_parser = parse_mode)]
        mode: u32,
        path: String,
    },
    /// Remove a file or empty directory
    Rm { path: String },
    /// Print the whole tree
    Tree,
    /// Print node, handle and memory counters
    Stats,
    /// Install a fault-injection policy from a JSON file
    FaultPolicySet { file: PathBuf },
    /// Clear the fault-injection policy
    FaultPolicyClear,
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

pub fn parse_mode(text: &str) -> Result<u32, String> {
    u32::from_str_radix(text, 8).map_err(|e| format!("invalid octal mode {text:?}: {e}"))
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(input: &str) -> Option<Result<Command, clap::Error>> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    Some(Line::try_parse_from(trimmed.split_whitespace()).map(|line| line.command))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Command {
        parse_line(input).unwrap().unwrap()
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# setup").is_none());
    }

    #[test]
    fn parses_modes_as_octal() {
        assert_eq!(
            parse("mkdir /a"),
            Command::Mkdir {
                path: "/a".into(),
                mode: 0o755
            }
        );
        assert_eq!(
            parse("chmod 600 /a/b"),
            Command::Chmod {
                mode: 0o600,
                path: "/a/b".into()
            }
        );
        assert!(parse_line("chmod 9 /x").unwrap().is_err());
    }

    #[test]
    fn write_collects_remaining_words() {
        assert_eq!(
            parse("write /f hello  -n world"),
            Command::Write {
                path: "/f".into(),
                text: vec!["hello".into(), "-n".into(), "world".into()]
            }
        );
    }

    #[test]
    fn kebab_case_and_aliases() {
        assert_eq!(parse("fault-policy-clear"), Command::FaultPolicyClear);
        assert_eq!(parse("exit"), Command::Quit);
        assert_eq!(parse("ls"), Command::Ls { path: None });
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_line("frobnicate").unwrap().is_err());
    }
}
