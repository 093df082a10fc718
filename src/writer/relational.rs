// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relational store container backed by SQLite.
//!
//! ```sql
//! CREATE TABLE Topics (id INTEGER PRIMARY KEY, name TEXT, type TEXT);
//! CREATE TABLE Messages (
//!     id INTEGER PRIMARY KEY,
//!     topic_id INTEGER NOT NULL,
//!     log_time INTEGER NOT NULL,
//!     publish_time INTEGER NOT NULL,
//!     sequence INTEGER NOT NULL,
//!     data_cdr_size INTEGER NOT NULL,
//!     data_cdr BLOB,
//!     data_json TEXT
//! );
//! ```
//!
//! Only one file is ever produced for this container, so `max_file_size`
//! and `max_size` are coupled (`spec §4.6`, design notes §9.3) and
//! "rotation" means pruning the oldest rows in place (`log_rotation`)
//! rather than opening a new file.
//!
//! Decoding a CDR payload to its structured fields requires the dynamic
//! type's parsed descriptor, which this design treats as belonging to the
//! (out-of-scope) dynamic-type registry's consumer, not the Writer. So
//! `data_json` does not hold a field-by-field decode; instead, when
//! `DataFormat::Json`/`Both` asks for it, it holds a JSON envelope
//! (`type_name` plus the hex-encoded CDR bytes) that a downstream decoder
//! with the matching dynamic type can still turn into the real message.
//! `DataFormat::Cdr` leaves `data_json` `NULL`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use rusqlite::{params, Connection};

use crate::error::WriterError;
use crate::sample::{Sample, Schema};
use crate::writer::{FileNaming, ResourceLimits, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Cdr,
    Json,
    Both,
}

pub struct RelationalWriter {
    conn: Connection,
    tmp_path: PathBuf,
    final_path: PathBuf,
    limits: ResourceLimits,
    data_format: DataFormat,
    topics: HashMap<(String, String), i64>,
    message_count: u64,
}

impl RelationalWriter {
    pub fn create(
        naming: FileNaming,
        limits: ResourceLimits,
        data_format: DataFormat,
    ) -> Result<Self, WriterError> {
        let final_path = naming.render(0);
        let tmp_path = naming.temp_path(0);
        let conn = Connection::open(&tmp_path)?;
        conn.execute_batch(
            "CREATE TABLE Topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                type TEXT NOT NULL
             );
             CREATE TABLE Messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_id INTEGER NOT NULL REFERENCES Topics(id),
                log_time INTEGER NOT NULL,
                publish_time INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                data_cdr_size INTEGER NOT NULL,
                data_cdr BLOB,
                data_json TEXT
             );
             CREATE INDEX idx_messages_topic ON Messages(topic_id);
             CREATE INDEX idx_messages_log_time ON Messages(log_time);",
        )?;

        Ok(Self {
            conn,
            tmp_path,
            final_path,
            limits,
            data_format,
            topics: HashMap::new(),
            message_count: 0,
        })
    }

    fn topic_id(&mut self, sample: &Sample) -> Result<i64, WriterError> {
        let key = (sample.topic_name.clone(), sample.type_name.clone());
        if let Some(id) = self.topics.get(&key) {
            return Ok(*id);
        }
        self.conn.execute(
            "INSERT INTO Topics (name, type) VALUES (?1, ?2)",
            params![sample.topic_name, sample.type_name],
        )?;
        let id = self.conn.last_insert_rowid();
        self.topics.insert(key, id);
        Ok(id)
    }

    /// Prune the oldest rows until the file fits within `max_size`, used
    /// when `log_rotation` is enabled instead of opening a new file.
    fn prune_to_fit(&mut self, max_size: u64) -> Result<(), WriterError> {
        loop {
            let current = self.current_file_size();
            if current <= max_size {
                return Ok(());
            }
            let deleted = self.conn.execute(
                "DELETE FROM Messages WHERE id IN (
                    SELECT id FROM Messages ORDER BY log_time ASC LIMIT 100
                )",
                [],
            )?;
            if deleted == 0 {
                // Nothing left to prune; vacuum to reclaim freed pages.
                self.conn.execute_batch("VACUUM;")?;
                return Ok(());
            }
        }
    }
}

/// `{"type_name": ..., "cdr_hex": ...}`, the JSON envelope stored in
/// `data_json` for `DataFormat::Json`/`Both`.
fn json_envelope(sample: &Sample) -> Result<String, WriterError> {
    let value = serde_json::json!({
        "type_name": sample.type_name,
        "cdr_hex": hex_encode(sample.payload.as_bytes()),
    });
    Ok(serde_json::to_string(&value)?)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl Writer for RelationalWriter {
    fn add_schema(&mut self, _schema: &Schema) -> Result<(), WriterError> {
        // Schemas are implicit in Topics.type for this container; no
        // separate registration step is needed.
        Ok(())
    }

    fn write_record(&mut self, sample: &Sample) -> Result<(), WriterError> {
        if !sample.is_persistable() {
            return Err(WriterError::RecordRejected(
                "sample has no payload owner".into(),
            ));
        }

        if let Some(max) = self.limits.max_size {
            let incoming = sample.payload.len() as u64;
            if self.current_file_size() + incoming > max {
                if self.limits.log_rotation {
                    self.prune_to_fit(max.saturating_sub(incoming))?;
                } else {
                    return Err(WriterError::ResourceLimit(format!(
                        "record of {incoming} bytes would exceed max_size with log_rotation disabled"
                    )));
                }
            }
        }

        let topic_id = self.topic_id(sample)?;

        let (cdr, json) = match self.data_format {
            DataFormat::Cdr => (Some(sample.payload.as_bytes().to_vec()), None),
            DataFormat::Json => (None, Some(json_envelope(sample)?)),
            DataFormat::Both => (
                Some(sample.payload.as_bytes().to_vec()),
                Some(json_envelope(sample)?),
            ),
        };

        self.conn.execute(
            "INSERT INTO Messages
                (topic_id, log_time, publish_time, sequence, data_cdr_size, data_cdr, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                topic_id,
                sample.log_timestamp,
                sample.source_timestamp,
                sample.sequence as i64,
                sample.payload.len() as i64,
                cdr,
                json,
            ],
        )?;
        self.message_count += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        // SQLite auto-commits each statement outside an explicit
        // transaction; nothing further to flush here.
        Ok(())
    }

    fn current_file_size(&self) -> u64 {
        std::fs::metadata(&self.tmp_path)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn aggregate_size(&self) -> u64 {
        self.current_file_size()
    }

    fn close(self: Box<Self>) -> Result<(), WriterError> {
        drop(self.conn);
        crate::writer::atomic_rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{PayloadPool, TopicQos};

    fn naming(dir: &std::path::Path) -> FileNaming {
        FileNaming {
            path: dir.to_path_buf(),
            base_name: "capture".into(),
            extension: "db",
            timestamp_format: None,
            local_timestamp: false,
        }
    }

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_file_size: None,
            max_size: None,
            file_rotation: false,
            log_rotation: false,
            safety_margin: crate::writer::MIN_SAFETY_MARGIN,
        }
    }

    fn sample(seq: u64) -> Sample {
        let pool = PayloadPool::new();
        Sample {
            topic_name: "Temperature".into(),
            type_name: "sensor_msgs/Temperature".into(),
            payload: pool.acquire(vec![1, 2, 3, 4]),
            source_timestamp: seq as i64,
            log_timestamp: seq as i64,
            sequence: seq,
            topic_qos: TopicQos::default(),
        }
    }

    #[test]
    fn writes_and_closes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            RelationalWriter::create(naming(dir.path()), limits(), DataFormat::Cdr).expect("create");
        for i in 0..20 {
            writer.write_record(&sample(i)).unwrap();
        }
        let boxed: Box<dyn Writer> = Box::new(writer);
        boxed.close().expect("close");
        assert!(dir.path().join("capture.db").exists());
    }

    #[test]
    fn same_topic_reuses_topic_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            RelationalWriter::create(naming(dir.path()), limits(), DataFormat::Cdr).expect("create");
        let first = writer.topic_id(&sample(0)).unwrap();
        let second = writer.topic_id(&sample(1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn json_format_populates_data_json_not_data_cdr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            RelationalWriter::create(naming(dir.path()), limits(), DataFormat::Json).expect("create");
        writer.write_record(&sample(0)).unwrap();
        let (cdr, json): (Option<Vec<u8>>, Option<String>) = writer
            .conn
            .query_row("SELECT data_cdr, data_json FROM Messages", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert!(cdr.is_none());
        let json = json.expect("data_json populated for Json format");
        assert!(json.contains("sensor_msgs/Temperature"));
        assert!(json.contains("01020304"));
    }

    #[test]
    fn both_format_populates_both_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            RelationalWriter::create(naming(dir.path()), limits(), DataFormat::Both).expect("create");
        writer.write_record(&sample(0)).unwrap();
        let (cdr, json): (Option<Vec<u8>>, Option<String>) = writer
            .conn
            .query_row("SELECT data_cdr, data_json FROM Messages", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(cdr, Some(vec![1, 2, 3, 4]));
        assert!(json.is_some());
    }

    #[test]
    fn rejects_empty_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            RelationalWriter::create(naming(dir.path()), limits(), DataFormat::Cdr).expect("create");
        let pool = PayloadPool::new();
        let empty = Sample {
            payload: pool.acquire(Vec::new()),
            ..sample(0)
        };
        let err = writer.write_record(&empty).unwrap_err();
        assert!(matches!(err, WriterError::RecordRejected(_)));
    }
}
