// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chunked binary log container.
//!
//! ```text
//! +---------------------------------------------------------+
//! |                    File Header (64 bytes)                |
//! +---------------------------------------------------------+
//! |  Segment 0: SegmentHeader (32) | Record[] | CRC32 (4)     |
//! |  Segment 1: ...                                           |
//! +---------------------------------------------------------+
//! |  Index Table: IndexEntry[] (channel_hash, segment, count) |
//! +---------------------------------------------------------+
//! |  Metadata: dynamic-type collection, JSON                  |
//! +---------------------------------------------------------+
//! ```
//!
//! Each record is `(channel_id, sequence, log_time, publish_time,
//! payload_length, payload)`, per `spec §6`. Schemas and channels are
//! declared once and referenced by id.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::error::WriterError;
use crate::sample::{Channel, Sample, Schema};
use crate::writer::{FileNaming, ResourceLimits, RotationSet, Writer};

pub const MAGIC: [u8; 8] = *b"DDSRECv1";
pub const FORMAT_VERSION: u32 = 1;
const DEFAULT_SEGMENT_SIZE: usize = 5000;

#[derive(Debug, Clone, Default)]
struct FileHeader {
    flags: u32,
    metadata_offset: u64,
    metadata_size: u32,
    index_offset: u64,
    index_count: u32,
    message_count: u64,
    duration_nanos: u64,
}

impl FileHeader {
    const SIZE: usize = 64;

    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u64::<LittleEndian>(self.metadata_offset)?;
        w.write_u32::<LittleEndian>(self.metadata_size)?;
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_u32::<LittleEndian>(self.index_count)?;
        w.write_u64::<LittleEndian>(self.message_count)?;
        w.write_u64::<LittleEndian>(self.duration_nanos)?;
        w.write_u64::<LittleEndian>(0)?; // reserved
        Ok(())
    }
}

struct RawRecord {
    channel_id: u32,
    sequence: u64,
    log_time: i64,
    publish_time: i64,
    payload: Vec<u8>,
}

impl RawRecord {
    fn encoded_len(&self) -> usize {
        4 + 8 + 8 + 8 + 4 + self.payload.len()
    }

    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.channel_id)?;
        w.write_u64::<LittleEndian>(self.sequence)?;
        w.write_i64::<LittleEndian>(self.log_time)?;
        w.write_i64::<LittleEndian>(self.publish_time)?;
        w.write_u32::<LittleEndian>(self.payload.len() as u32)?;
        w.write_all(&self.payload)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ChunkedTrailer {
    dynamic_types: Vec<TrailerSchema>,
}

#[derive(Serialize)]
struct TrailerSchema {
    type_name: String,
    encoded_text: String,
}

/// `ChannelKey` identifies the `(topic_name, type_name, qos)` triple that
/// maps to a stable channel id (`spec §3`: one channel per distinct
/// triple).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    topic_name: String,
    type_name: String,
    qos_hash: u64,
}

pub struct ChunkedWriter {
    naming: FileNaming,
    limits: ResourceLimits,
    rotation: RotationSet,
    index: u32,

    file: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    header: FileHeader,

    channels: HashMap<ChannelKey, Channel>,
    next_channel_id: u32,
    schemas: Vec<Schema>,
    registered_type_names: std::collections::HashSet<String>,

    segment: Vec<RawRecord>,
    segment_id: u32,
    first_timestamp: Option<i64>,
    last_timestamp: i64,
    message_count: u64,
    records_since_flush: u32,
    flush_period: u32,
    /// Bytes already written to the current file's segments (header plus
    /// every segment flushed to disk so far). `current_file_size()` adds
    /// the still-pending segment on top of this so a mid-file `flush()`
    /// (`flush_period` records) never loses track of what's already on
    /// disk when later `should_rotate` checks run.
    flushed_bytes: u64,
}

impl ChunkedWriter {
    pub fn create(
        naming: FileNaming,
        limits: ResourceLimits,
        flush_period: u32,
    ) -> Result<Self, WriterError> {
        let final_path = naming.render(0);
        let tmp_path = naming.temp_path(0);
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        FileHeader::default().write(&mut writer)?;

        Ok(Self {
            naming,
            limits,
            rotation: RotationSet::default(),
            index: 0,
            file: writer,
            tmp_path,
            final_path,
            header: FileHeader::default(),
            channels: HashMap::new(),
            next_channel_id: 0,
            schemas: Vec::new(),
            registered_type_names: std::collections::HashSet::new(),
            segment: Vec::with_capacity(DEFAULT_SEGMENT_SIZE),
            segment_id: 0,
            first_timestamp: None,
            last_timestamp: 0,
            message_count: 0,
            records_since_flush: 0,
            flush_period,
            flushed_bytes: FileHeader::SIZE as u64,
        })
    }

    fn channel_for(&mut self, sample: &Sample) -> u32 {
        let qos_hash = qos_hash(sample);
        let key = ChannelKey {
            topic_name: sample.topic_name.clone(),
            type_name: sample.type_name.clone(),
            qos_hash,
        };
        if let Some(channel) = self.channels.get(&key) {
            return channel.id;
        }
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels.insert(
            key,
            Channel {
                id,
                topic_name: sample.topic_name.clone(),
                type_name: sample.type_name.clone(),
                qos: sample.topic_qos.clone(),
            },
        );
        id
    }

    fn flush_segment(&mut self) -> Result<(), WriterError> {
        if self.segment.is_empty() {
            return Ok(());
        }

        let mut data_buf = Vec::new();
        for record in &self.segment {
            record.write(&mut data_buf)?;
        }

        self.file.write_u32::<LittleEndian>(self.segment_id)?;
        self.file.write_u32::<LittleEndian>(self.segment.len() as u32)?;
        self.file.write_u32::<LittleEndian>(data_buf.len() as u32)?;
        self.file.write_all(&data_buf)?;
        let crc = crc32fast::hash(&data_buf);
        self.file.write_u32::<LittleEndian>(crc)?;

        self.flushed_bytes += 4 + 4 + 4 + data_buf.len() as u64 + 4;
        self.segment.clear();
        self.segment_id += 1;
        Ok(())
    }

    fn record_size_estimate(&self, sample: &Sample) -> usize {
        4 + 8 + 8 + 8 + 4 + sample.payload.len()
    }

    fn should_rotate(&self, incoming_size: usize) -> bool {
        match self.limits.max_file_size {
            Some(max) => {
                self.current_file_size() + incoming_size as u64 + self.effective_safety_margin() > max
            }
            None => false,
        }
    }

    /// The larger of the configured `safety_margin` and the dynamic cost of
    /// writing every registered schema into the trailer (design notes
    /// §9.2), so a file with many/large schemas can't rotate with less
    /// headroom than its own trailer will need.
    fn effective_safety_margin(&self) -> u64 {
        let dynamic: u64 = self.schemas.iter().map(|s| s.trailer_cost() as u64).sum();
        if dynamic > self.limits.safety_margin {
            tracing::warn!(
                configured = self.limits.safety_margin,
                dynamic,
                "schema trailer cost exceeds configured safety_margin, using the dynamic sum"
            );
        }
        self.limits.safety_margin.max(dynamic)
    }

    fn rotate(&mut self) -> Result<(), WriterError> {
        self.finalize_current_file()?;
        self.index += 1;
        let final_path = self.naming.render(self.index);
        let tmp_path = self.naming.temp_path(self.index);
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        FileHeader::default().write(&mut writer)?;

        self.file = writer;
        self.tmp_path = tmp_path;
        self.final_path = final_path;
        self.header = FileHeader::default();
        self.segment.clear();
        self.segment_id = 0;
        self.first_timestamp = None;
        self.last_timestamp = 0;
        self.message_count = 0;
        self.flushed_bytes = FileHeader::SIZE as u64;
        Ok(())
    }

    /// Every file this writer closes — whether by rotating to the next one
    /// or by the final `close()` — goes through here, so `max_size` is
    /// enforced against the complete set of files this run ever produces,
    /// not just the ones closed mid-run by `rotate()`.
    fn finalize_current_file(&mut self) -> Result<(), WriterError> {
        self.flush_segment()?;

        let index_offset = self.file.stream_position()?;
        for channel in self.channels.values() {
            self.file.write_u32::<LittleEndian>(channel.id)?;
            self.file.write_u32::<LittleEndian>(fnv1a(&channel.topic_name))?;
        }

        let metadata_offset = self.file.stream_position()?;
        let trailer = ChunkedTrailer {
            dynamic_types: self
                .schemas
                .iter()
                .map(|s| TrailerSchema {
                    type_name: s.type_name.clone(),
                    encoded_text: s.encoded_text.clone(),
                })
                .collect(),
        };
        let trailer_json = serde_json::to_vec(&trailer)?;
        self.file.write_all(&trailer_json)?;

        self.header.metadata_offset = metadata_offset;
        self.header.metadata_size = trailer_json.len() as u32;
        self.header.index_offset = index_offset;
        self.header.index_count = self.channels.len() as u32;
        self.header.message_count = self.message_count;
        self.header.duration_nanos =
            (self.last_timestamp - self.first_timestamp.unwrap_or(self.last_timestamp)).max(0) as u64;

        self.file.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.file)?;
        self.file.flush()?;

        let size = self.file.stream_position()?;
        crate::writer::atomic_rename(&self.tmp_path, &self.final_path)?;
        self.rotation.record_closed(self.final_path.clone(), size);

        if self.limits.file_rotation {
            if let Some(max_size) = self.limits.max_size {
                self.rotation.enforce_max_size(max_size)?;
            }
        }
        Ok(())
    }
}

fn qos_hash(sample: &Sample) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", sample.topic_qos).hash(&mut hasher);
    hasher.finish()
}

fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl Writer for ChunkedWriter {
    fn add_schema(&mut self, schema: &Schema) -> Result<(), WriterError> {
        if self.registered_type_names.insert(schema.type_name.clone()) {
            self.schemas.push(schema.clone());
        }
        Ok(())
    }

    fn write_record(&mut self, sample: &Sample) -> Result<(), WriterError> {
        if !sample.is_persistable() {
            return Err(WriterError::RecordRejected(
                "sample has no payload owner".into(),
            ));
        }

        let incoming_size = self.record_size_estimate(sample);
        if self.should_rotate(incoming_size) {
            if !self.limits.file_rotation && !self.limits.log_rotation {
                return Err(WriterError::ResourceLimit(format!(
                    "record of {incoming_size} bytes would exceed max_file_size with rotation disabled"
                )));
            }
            self.rotate()?;
        }

        let channel_id = self.channel_for(sample);

        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(sample.log_timestamp);
        }
        self.last_timestamp = sample.log_timestamp;
        self.message_count += 1;

        self.segment.push(RawRecord {
            channel_id,
            sequence: sample.sequence,
            log_time: sample.log_timestamp,
            publish_time: sample.source_timestamp,
            payload: sample.payload.as_bytes().to_vec(),
        });

        if self.segment.len() >= DEFAULT_SEGMENT_SIZE {
            self.flush_segment()?;
        }

        self.records_since_flush += 1;
        if self.flush_period > 0 && self.records_since_flush >= self.flush_period {
            self.flush()?;
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        self.flush_segment()?;
        self.file.flush()?;
        self.records_since_flush = 0;
        Ok(())
    }

    fn current_file_size(&self) -> u64 {
        self.flushed_bytes
            + self
                .segment
                .iter()
                .map(|r| r.encoded_len() as u64)
                .sum::<u64>()
    }

    fn aggregate_size(&self) -> u64 {
        self.rotation.aggregate_size() + self.current_file_size()
    }

    fn close(mut self: Box<Self>) -> Result<(), WriterError> {
        self.finalize_current_file()
    }
}
