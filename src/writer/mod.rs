// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer polymorphism: an append-only sink with per-file and aggregate
//! size limits, expressed as a trait with two implementations so the
//! Handler never needs to know which concrete container it has
//! (`spec §4.6`, design notes §9).

pub mod chunked;
pub mod relational;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

use crate::error::WriterError;
use crate::sample::{Sample, Schema};

/// Below this, a configured `safety_margin` is raised with a warning
/// (design notes §9.2).
pub const MIN_SAFETY_MARGIN: u64 = 4 * 1024;

/// Resource limits shared by both container implementations.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub max_file_size: Option<u64>,
    pub max_size: Option<u64>,
    pub file_rotation: bool,
    pub log_rotation: bool,
    pub safety_margin: u64,
}

impl ResourceLimits {
    /// Clamp `safety_margin` to the enforced minimum, warning if raised.
    pub fn normalized(mut self) -> Self {
        if self.safety_margin < MIN_SAFETY_MARGIN {
            tracing::warn!(
                configured = self.safety_margin,
                minimum = MIN_SAFETY_MARGIN,
                "raising safety_margin to the enforced minimum"
            );
            self.safety_margin = MIN_SAFETY_MARGIN;
        }
        self
    }

    /// Validate the relational container's coupled `max_file_size`/`max_size`
    /// rule (design notes §9.3): when only one is set, force them equal; when
    /// both are set and differ, this is a configuration error.
    pub fn reconcile_for_single_file_container(mut self) -> Result<Self, String> {
        match (self.max_file_size, self.max_size) {
            (Some(a), Some(b)) if a != b => Err(format!(
                "relational container requires max_file_size ({a}) == max_size ({b}) when both are set"
            )),
            (Some(a), None) => {
                self.max_size = Some(a);
                Ok(self)
            }
            (None, Some(b)) => {
                self.max_file_size = Some(b);
                Ok(self)
            }
            _ => Ok(self),
        }
    }
}

/// Where and how rotated files are named (`spec §4.6`: file naming).
#[derive(Debug, Clone)]
pub struct FileNaming {
    pub path: PathBuf,
    pub base_name: String,
    pub extension: &'static str,
    pub timestamp_format: Option<String>,
    pub local_timestamp: bool,
}

impl FileNaming {
    /// `<base>[_<timestamp>][_<N>]<ext>`, matching `spec §4.6`.
    pub fn render(&self, index: u32) -> PathBuf {
        let mut name = self.base_name.clone();
        if let Some(fmt) = &self.timestamp_format {
            let stamp = if self.local_timestamp {
                format_timestamp_local(fmt)
            } else {
                format_timestamp_utc(fmt)
            };
            name.push('_');
            name.push_str(&stamp);
        }
        if index > 0 {
            name.push_str(&format!("_{index}"));
        }
        name.push('.');
        name.push_str(self.extension);
        self.path.join(name)
    }

    /// The temporary name a file is opened under before an atomic rename
    /// on close (`spec §4.6`: `open`).
    pub fn temp_path(&self, index: u32) -> PathBuf {
        let mut final_path = self.render(index).into_os_string();
        final_path.push(".tmp~");
        PathBuf::from(final_path)
    }
}

fn format_timestamp_local(fmt: &str) -> String {
    let now: DateTime<Local> = Local::now();
    now.format(fmt).to_string()
}

fn format_timestamp_utc(fmt: &str) -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format(fmt).to_string()
}

/// Tracks closed files produced by this run so the aggregate `max_size`
/// bound can be enforced by deleting the oldest file when
/// `file_rotation = true` (`spec §4.6`).
#[derive(Debug, Default)]
pub struct RotationSet {
    closed_files: Vec<(PathBuf, u64)>,
}

impl RotationSet {
    pub fn record_closed(&mut self, path: PathBuf, size: u64) {
        self.closed_files.push((path, size));
    }

    pub fn aggregate_size(&self) -> u64 {
        self.closed_files.iter().map(|(_, size)| size).sum()
    }

    /// Delete the oldest closed files until the aggregate fits within
    /// `max_size`. Returns the count of files deleted.
    pub fn enforce_max_size(&mut self, max_size: u64) -> std::io::Result<usize> {
        let mut deleted = 0;
        while self.aggregate_size() > max_size && !self.closed_files.is_empty() {
            let (path, _) = self.closed_files.remove(0);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            deleted += 1;
        }
        Ok(deleted)
    }

    pub fn file_count(&self) -> usize {
        self.closed_files.len()
    }
}

/// A append-only container sink. The Handler interacts only through this
/// trait; concrete rotation/size-limit bookkeeping is each implementation's
/// responsibility.
pub trait Writer: Send {
    /// Register a schema exactly once per `type_name`; callers only call
    /// this after confirming the schema is new (idempotence is enforced by
    /// the Handler, not here).
    fn add_schema(&mut self, schema: &Schema) -> Result<(), WriterError>;

    /// Append one record, rotating or failing per the configured resource
    /// limits.
    fn write_record(&mut self, sample: &Sample) -> Result<(), WriterError>;

    /// Force a platform flush (`flush_period` records or at transitions).
    fn flush(&mut self) -> Result<(), WriterError>;

    /// Current size in bytes of the file currently being written.
    fn current_file_size(&self) -> u64;

    /// Total bytes written across every file this run has produced.
    fn aggregate_size(&self) -> u64;

    /// Serialize the dynamic-type trailer and atomically rename the
    /// temporary file to its final name. Consumes the writer because no
    /// further operation is valid afterward.
    fn close(self: Box<Self>) -> Result<(), WriterError>;
}

pub(crate) fn atomic_rename(tmp: &Path, final_path: &Path) -> std::io::Result<()> {
    std::fs::rename(tmp, final_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_naming_without_timestamp_or_index() {
        let naming = FileNaming {
            path: PathBuf::from("/tmp"),
            base_name: "capture".into(),
            extension: "rec",
            timestamp_format: None,
            local_timestamp: false,
        };
        assert_eq!(naming.render(0), PathBuf::from("/tmp/capture.rec"));
    }

    #[test]
    fn file_naming_with_index() {
        let naming = FileNaming {
            path: PathBuf::from("/tmp"),
            base_name: "capture".into(),
            extension: "rec",
            timestamp_format: None,
            local_timestamp: false,
        };
        assert_eq!(naming.render(3), PathBuf::from("/tmp/capture_3.rec"));
    }

    #[test]
    fn safety_margin_is_raised_to_minimum() {
        let limits = ResourceLimits {
            max_file_size: None,
            max_size: None,
            file_rotation: false,
            log_rotation: false,
            safety_margin: 16,
        }
        .normalized();
        assert_eq!(limits.safety_margin, MIN_SAFETY_MARGIN);
    }

    #[test]
    fn single_file_container_forces_equal_limits() {
        let limits = ResourceLimits {
            max_file_size: Some(1000),
            max_size: None,
            file_rotation: false,
            log_rotation: false,
            safety_margin: MIN_SAFETY_MARGIN,
        }
        .reconcile_for_single_file_container()
        .expect("single bound reconciles");
        assert_eq!(limits.max_size, Some(1000));
    }

    #[test]
    fn single_file_container_rejects_conflicting_limits() {
        let result = ResourceLimits {
            max_file_size: Some(1000),
            max_size: Some(2000),
            file_rotation: false,
            log_rotation: false,
            safety_margin: MIN_SAFETY_MARGIN,
        }
        .reconcile_for_single_file_container();
        assert!(result.is_err());
    }

    #[test]
    fn rotation_set_deletes_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.rec");
        let b = dir.path().join("b.rec");
        std::fs::write(&a, vec![0u8; 10]).unwrap();
        std::fs::write(&b, vec![0u8; 10]).unwrap();

        let mut set = RotationSet::default();
        set.record_closed(a.clone(), 10);
        set.record_closed(b.clone(), 10);

        let deleted = set.enforce_max_size(10).expect("enforce");
        assert_eq!(deleted, 1);
        assert!(!a.exists());
        assert!(b.exists());
    }
}
