// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core data model: samples, schemas, channels and the payload pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Reliability QoS of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    Reliable,
    BestEffort,
}

/// Durability QoS of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Durability {
    TransientLocal,
    Volatile,
}

/// Ownership QoS of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ownership {
    Exclusive,
    Shared,
}

/// QoS bundle carried alongside a sample's topic identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicQos {
    pub reliability: Reliability,
    pub durability: Durability,
    pub ownership: Ownership,
    pub keyed: bool,
    /// Keep 1-in-`downsampling` samples; 1 means no downsampling.
    pub downsampling: u32,
}

impl Default for TopicQos {
    fn default() -> Self {
        Self {
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
            ownership: Ownership::Shared,
            keyed: false,
            downsampling: 1,
        }
    }
}

/// A reference-counted handle over pool-owned payload bytes.
///
/// The pool is the root owner of the underlying allocation; every sample
/// clones this handle as it moves between the ingest path, a buffer, and
/// the writer. The allocation is freed when the last clone drops, which is
/// exactly the "return slab to pool" behavior the design calls for — no
/// custom allocator bookkeeping is needed to get it.
#[derive(Debug, Clone)]
pub struct Payload(Arc<Vec<u8>>);

impl Payload {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Owns payload allocations on behalf of the ingest path.
#[derive(Debug, Default, Clone)]
pub struct PayloadPool;

impl PayloadPool {
    pub fn new() -> Self {
        Self
    }

    /// Take ownership of freshly-received bytes, returning a clonable handle.
    pub fn acquire(&self, bytes: Vec<u8>) -> Payload {
        Payload(Arc::new(bytes))
    }
}

/// A single published datum observed on the wire.
#[derive(Debug, Clone)]
pub struct Sample {
    pub topic_name: String,
    pub type_name: String,
    pub payload: Payload,
    /// Nanoseconds since epoch, assigned by the publisher.
    pub source_timestamp: i64,
    /// Nanoseconds since epoch; equals `source_timestamp` when
    /// `log_publish_time` is set, otherwise the ingest-time wall clock.
    pub log_timestamp: i64,
    /// Monotonically increasing, assigned by the Handler under its lock.
    pub sequence: u64,
    pub topic_qos: TopicQos,
}

impl Sample {
    /// Samples with an empty payload are never persisted.
    pub fn is_persistable(&self) -> bool {
        !self.payload.is_empty()
    }
}

/// Persisted form of a dynamic type, keyed by `type_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub type_name: String,
    pub encoded_text: String,
    pub type_identifier: Vec<u8>,
    pub type_object: Vec<u8>,
}

impl Schema {
    /// A placeholder schema emitted when a sample is written without its
    /// real type having resolved (see `only_with_schema = false`).
    pub fn blank(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            encoded_text: String::new(),
            type_identifier: Vec::new(),
            type_object: Vec::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.encoded_text.is_empty() && self.type_identifier.is_empty() && self.type_object.is_empty()
    }

    /// Conservative worst-case byte cost of persisting this schema in the
    /// dynamic-type trailer, used to size `safety_margin` (design notes §9.2).
    pub fn trailer_cost(&self) -> usize {
        self.encoded_text.len() + self.type_identifier.len() + self.type_object.len() + 64
    }
}

/// Persisted association of `(topic_name, type_name, qos)` inside a
/// chunked-log container; irrelevant to the relational container.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: u32,
    pub topic_name: String,
    pub type_name: String,
    pub qos: TopicQos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_pool_drops_allocation_with_last_handle() {
        let pool = PayloadPool::new();
        let payload = pool.acquire(vec![1, 2, 3]);
        let clone = payload.clone();
        drop(payload);
        assert_eq!(clone.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn blank_schema_has_no_trailer_content() {
        let schema = Schema::blank("my/Type");
        assert!(schema.is_blank());
        assert_eq!(schema.type_name, "my/Type");
    }

    #[test]
    fn empty_payload_is_not_persistable() {
        let pool = PayloadPool::new();
        let sample = Sample {
            topic_name: "t".into(),
            type_name: "T".into(),
            payload: pool.acquire(Vec::new()),
            source_timestamp: 0,
            log_timestamp: 0,
            sequence: 0,
            topic_qos: TopicQos::default(),
        };
        assert!(!sample.is_persistable());
    }
}
