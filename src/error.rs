// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the recorder.
//!
//! Mirrors the error kinds in the design: configuration errors and
//! initialization errors are fatal to the host process; writer errors are
//! either fatal (at open) or recoverable (a single record rejected while
//! recording continues).

use thiserror::Error;

/// Invalid or inconsistent configuration. Reported at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors raised by a [`crate::writer::Writer`] implementation.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid container state: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("CRC mismatch in segment {segment_id}")]
    CrcMismatch { segment_id: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relational store error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("record rejected: {0}")]
    RecordRejected(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
}

/// Cannot open the output file or initialize a DDS entity.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to open output: {0}")]
    Writer(#[from] WriterError),

    #[error("failed to initialize DDS entity: {0}")]
    Dds(String),
}
