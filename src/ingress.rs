// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trait boundary toward the DDS layer.
//!
//! "DDS transport configuration" is an explicit external collaborator
//! (`spec §1`); this module defines the three capabilities the core
//! pipeline needs from it, grounded in the same ingress/reader/writer
//! split the teacher pack's persistence service uses to stay independent
//! of a concrete DDS binding.

use crate::sample::Sample;
use crate::state::StatusMessage;

/// QoS the command/status topics must be created with, per `spec §4.7`.
#[derive(Debug, Clone, Copy)]
pub struct CommandTopicQos {
    pub reliable: bool,
    pub transient_local: bool,
    pub keep_last: u32,
}

impl CommandTopicQos {
    pub const READER: CommandTopicQos = CommandTopicQos {
        reliable: true,
        transient_local: false,
        keep_last: 1,
    };

    pub const WRITER: CommandTopicQos = CommandTopicQos {
        reliable: true,
        transient_local: true,
        keep_last: 1,
    };
}

/// Delivers resolved samples from the DDS wire to the Handler.
pub trait DdsIngress: Send {
    /// Non-blocking: returns the samples available since the last call.
    fn poll_samples(&mut self) -> Vec<Sample>;
}

/// Delivered once a type name's dynamic type resolves. `type_identifier`
/// and `type_object` are opaque to the recorder; `encoded_text` is the
/// human-readable rendering persisted alongside them.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    pub type_name: String,
    pub encoded_text: String,
    pub type_identifier: Vec<u8>,
    pub type_object: Vec<u8>,
}

/// A capability that accepts `(type_name, callback)` and invokes the
/// callback at most once per `type_name` when the type resolves
/// (design notes §9).
pub trait DynamicTypeRegistry: Send {
    /// Non-blocking: returns every type resolved since the last call.
    fn poll_resolved(&mut self) -> Vec<ResolvedType>;
}

/// Delivers control-plane commands and accepts status publications.
pub trait CommandIngress: Send {
    /// Non-blocking: returns `(command, args)` pairs received since the
    /// last call.
    fn poll_commands(&mut self) -> Vec<(String, Option<String>)>;

    /// Publish a status transition. Errors are logged by the caller, not
    /// propagated — the status topic is best-effort per `spec §7`.
    fn publish_status(&mut self, status: &StatusMessage) -> Result<(), String>;

    fn reader_qos(&self) -> CommandTopicQos {
        CommandTopicQos::READER
    }

    fn writer_qos(&self) -> CommandTopicQos {
        CommandTopicQos::WRITER
    }
}

/// In-memory test doubles for the three traits above, used by the
/// integration scenarios in `tests/`.
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct MockDdsIngress {
        queue: VecDeque<Sample>,
    }

    impl MockDdsIngress {
        pub fn push(&mut self, sample: Sample) {
            self.queue.push_back(sample);
        }
    }

    impl DdsIngress for MockDdsIngress {
        fn poll_samples(&mut self) -> Vec<Sample> {
            self.queue.drain(..).collect()
        }
    }

    #[derive(Default)]
    pub struct MockTypeRegistry {
        queue: VecDeque<ResolvedType>,
    }

    impl MockTypeRegistry {
        pub fn resolve(&mut self, resolved: ResolvedType) {
            self.queue.push_back(resolved);
        }
    }

    impl DynamicTypeRegistry for MockTypeRegistry {
        fn poll_resolved(&mut self) -> Vec<ResolvedType> {
            self.queue.drain(..).collect()
        }
    }

    #[derive(Default)]
    pub struct MockCommandIngress {
        commands: VecDeque<(String, Option<String>)>,
        pub published: Vec<StatusMessage>,
    }

    impl MockCommandIngress {
        pub fn send(&mut self, command: &str, args: Option<&str>) {
            self.commands
                .push_back((command.to_string(), args.map(str::to_string)));
        }
    }

    impl CommandIngress for MockCommandIngress {
        fn poll_commands(&mut self) -> Vec<(String, Option<String>)> {
            self.commands.drain(..).collect()
        }

        fn publish_status(&mut self, status: &StatusMessage) -> Result<(), String> {
            self.published.push(status.clone());
            Ok(())
        }
    }
}
