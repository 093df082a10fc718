// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State-driven DDS capture recorder.
//!
//! Six components carry the pipeline: a [`Controller`] that runs the
//! command loop, a [`Handler`] that owns the state machine and every
//! transition's side effects, a [`pending::PendingStore`] that holds
//! samples whose schema hasn't resolved yet, an [`event_worker`] that
//! manages the rolling buffer while `PAUSED`, a [`writer::Writer`] that
//! persists records to one of two containers, and the [`ingress`] trait
//! boundary toward the DDS layer (an external collaborator; this crate
//! supplies in-memory test doubles only).

pub mod config;
pub mod controller;
pub mod error;
pub mod event_worker;
pub mod filter;
pub mod handler;
pub mod ingress;
pub mod pending;
pub mod ros2;
pub mod sample;
pub mod state;
pub mod writer;

pub use config::Config;
pub use controller::Controller;
pub use error::{ConfigError, InitError, WriterError};
pub use filter::TopicFilter;
pub use handler::{Handler, HandlerConfig, SampleInput};
pub use sample::{Channel, Payload, PayloadPool, Schema, TopicQos};
pub use state::{Command, ReportedState, State, StatusMessage};
pub use writer::Writer;
