// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the ram filesystem

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("invalid ram file")]
    InvalidHandle,
    #[error("permission denied")]
    PermissionDenied,
    #[error("bad character in file name")]
    BadCharacter,
    #[error("stat buffer too short")]
    ShortStat,
    #[error("out of memory")]
    ResourceExhausted,
    #[error("file does not exist")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file already open")]
    AlreadyOpen,
    #[error("file not open")]
    NotOpen,
    #[error("bad open mode")]
    BadMode,
    #[error("read or write too small")]
    ShortBuffer,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type FsResult<T> = Result<T, FsError>;
