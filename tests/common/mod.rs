// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared scaffolding for the scenario tests: a from-scratch reader for
//! the chunked-log container (the only way to verify what a `Writer`
//! actually persisted, since reading a file back is the replayer's job
//! and out of scope for this crate) and a couple of small builders.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};

use ddsrecorder::handler::{Handler, HandlerConfig, SampleInput, WriterFactory};
use ddsrecorder::pending::PendingBound;
use ddsrecorder::sample::{Payload, PayloadPool, TopicQos};
use ddsrecorder::writer::chunked::ChunkedWriter;
use ddsrecorder::writer::{FileNaming, ResourceLimits, Writer};

/// One record as persisted in a chunked-log file, read back by byte
/// offset rather than through any crate API (`src/writer/chunked.rs`'s
/// doc comment is the format authority this mirrors).
#[derive(Debug, Clone)]
pub struct ReadRecord {
    pub channel_id: u32,
    pub sequence: u64,
    pub log_time: i64,
    pub publish_time: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReadFile {
    pub message_count: u64,
    pub index_count: u32,
    pub records: Vec<ReadRecord>,
}

/// Parse a finalized (renamed, non-`.tmp~`) chunked-log file.
pub fn read_chunked_file(path: &std::path::Path) -> ReadFile {
    let mut bytes = Vec::new();
    std::fs::File::open(path)
        .expect("open recorded file")
        .read_to_end(&mut bytes)
        .expect("read recorded file");
    let mut cursor = std::io::Cursor::new(&bytes);

    let mut magic = [0u8; 8];
    cursor.read_exact(&mut magic).unwrap();
    assert_eq!(&magic, b"DDSRECv1", "unexpected container magic");
    let _version = cursor.read_u32::<LittleEndian>().unwrap();
    let _flags = cursor.read_u32::<LittleEndian>().unwrap();
    let _metadata_offset = cursor.read_u64::<LittleEndian>().unwrap();
    let _metadata_size = cursor.read_u32::<LittleEndian>().unwrap();
    let index_offset = cursor.read_u64::<LittleEndian>().unwrap();
    let index_count = cursor.read_u32::<LittleEndian>().unwrap();
    let message_count = cursor.read_u64::<LittleEndian>().unwrap();
    let _duration_nanos = cursor.read_u64::<LittleEndian>().unwrap();
    let _reserved = cursor.read_u64::<LittleEndian>().unwrap();

    let mut records = Vec::new();
    while (cursor.position() as u64) < index_offset {
        let _segment_id = cursor.read_u32::<LittleEndian>().unwrap();
        let record_count = cursor.read_u32::<LittleEndian>().unwrap();
        let data_len = cursor.read_u32::<LittleEndian>().unwrap();
        let segment_start = cursor.position();
        for _ in 0..record_count {
            let channel_id = cursor.read_u32::<LittleEndian>().unwrap();
            let sequence = cursor.read_u64::<LittleEndian>().unwrap();
            let log_time = cursor.read_i64::<LittleEndian>().unwrap();
            let publish_time = cursor.read_i64::<LittleEndian>().unwrap();
            let payload_len = cursor.read_u32::<LittleEndian>().unwrap();
            let mut payload = vec![0u8; payload_len as usize];
            cursor.read_exact(&mut payload).unwrap();
            records.push(ReadRecord {
                channel_id,
                sequence,
                log_time,
                publish_time,
                payload,
            });
        }
        assert_eq!(cursor.position() - segment_start, data_len as u64);
        let _crc = cursor.read_u32::<LittleEndian>().unwrap();
    }

    ReadFile {
        message_count,
        index_count,
        records,
    }
}

/// A `Handler` configured with short, test-scale windows, writing a
/// chunked-log container into `dir`.
pub fn test_handler(dir: &std::path::Path, config: HandlerConfig) -> Arc<Handler> {
    Handler::new(config, chunked_factory(dir, unbounded_limits()))
}

pub fn unbounded_limits() -> ResourceLimits {
    ResourceLimits {
        max_file_size: None,
        max_size: None,
        file_rotation: false,
        log_rotation: false,
        safety_margin: ddsrecorder::writer::MIN_SAFETY_MARGIN,
    }
}

pub fn default_handler_config() -> HandlerConfig {
    HandlerConfig {
        buffer_size: 1000,
        event_window: Duration::from_secs(3),
        cleanup_period: Duration::from_millis(100),
        pending_bound: PendingBound::Unlimited,
        only_with_schema: false,
        log_publish_time: true,
    }
}

pub fn chunked_factory(dir: &std::path::Path, limits: ResourceLimits) -> Arc<WriterFactory> {
    let dir = dir.to_path_buf();
    Arc::new(move || {
        let naming = FileNaming {
            path: dir.clone(),
            base_name: "capture".into(),
            extension: "rec",
            timestamp_format: None,
            local_timestamp: false,
        };
        let writer = ChunkedWriter::create(naming, limits.clone(), 0)?;
        Ok(Box::new(writer) as Box<dyn Writer>)
    })
}

pub fn pool() -> PayloadPool {
    PayloadPool::new()
}

pub fn payload(bytes: Vec<u8>) -> Payload {
    pool().acquire(bytes)
}

pub fn sample_input(topic: &str, type_name: &str, bytes: Vec<u8>, source_timestamp: i64) -> SampleInput {
    SampleInput {
        topic_name: topic.into(),
        type_name: type_name.into(),
        payload: payload(bytes),
        source_timestamp,
        topic_qos: TopicQos::default(),
    }
}

pub fn resolved(type_name: &str) -> ddsrecorder::ingress::ResolvedType {
    ddsrecorder::ingress::ResolvedType {
        type_name: type_name.into(),
        encoded_text: format!("struct {type_name} {{}}"),
        type_identifier: vec![],
        type_object: vec![],
    }
}
