// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The recorder's core ingest engine.
//!
//! `Handler` owns `State` and every transition's side effects — exactly
//! the split the design notes call out: the Controller is a thin command
//! loop, the Handler is where `start`/`pause`/`suspend`/`stop` actually
//! flush buffers, open and close files, and drain the pending store
//! (`spec §4.3`).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::WriterError;
use crate::event_worker::{EventGate, EventWorker};
use crate::pending::{PendingBound, PendingStore};
use crate::sample::{Payload, Schema, TopicQos};
use crate::state::State;
use crate::writer::Writer;

/// A raw sample as it arrives from the DDS ingress, before sequence
/// assignment and log-timestamp stamping.
#[derive(Debug, Clone)]
pub struct SampleInput {
    pub topic_name: String,
    pub type_name: String,
    pub payload: Payload,
    pub source_timestamp: i64,
    pub topic_qos: TopicQos,
}

/// Handler-level configuration resolved from `Config` (`spec §6`).
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub buffer_size: usize,
    pub event_window: Duration,
    pub cleanup_period: Duration,
    pub pending_bound: PendingBound,
    pub only_with_schema: bool,
    pub log_publish_time: bool,
}

/// Builds a fresh [`Writer`] each time the Handler opens a file
/// (`STOPPED → RUNNING`/`PAUSED`). Boxed so the binary can plug in either
/// container without `Handler` depending on a concrete type.
pub type WriterFactory = dyn Fn() -> Result<Box<dyn Writer>, WriterError> + Send + Sync;

struct Inner {
    state: State,
    buffer: Vec<crate::sample::Sample>,
    paused_buffer: Vec<crate::sample::Sample>,
    pending: PendingStore,
    known_schemas: HashSet<String>,
    next_sequence: u64,
    topic_counts: HashMap<String, u32>,
    writer: Option<Box<dyn Writer>>,
}

/// The state-machine owner. Always held as `Arc<Handler>` (never a bare
/// value) so `EventWorker`'s `'static` callbacks can call back into it.
pub struct Handler {
    inner: Mutex<Inner>,
    gate: Arc<EventGate>,
    worker: Mutex<Option<EventWorker>>,
    writer_factory: Arc<WriterFactory>,
    config: HandlerConfig,
}

impl Handler {
    pub fn new(config: HandlerConfig, writer_factory: Arc<WriterFactory>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: State::Stopped,
                buffer: Vec::new(),
                paused_buffer: Vec::new(),
                pending: PendingStore::new(config.pending_bound),
                known_schemas: HashSet::new(),
                next_sequence: 0,
                topic_counts: HashMap::new(),
                writer: None,
            }),
            gate: Arc::new(EventGate::new()),
            worker: Mutex::new(None),
            writer_factory,
            config,
        })
    }

    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    // -- transitions (spec §4.3) -------------------------------------

    pub fn start(self: &Arc<Self>) -> Result<(), WriterError> {
        self.gate.wait_until_untriggered();
        let mut inner = self.inner.lock().unwrap();
        let mut worker_to_join = None;
        match inner.state {
            State::Stopped => {
                self.open_file(&mut inner)?;
                inner.next_sequence = 0;
                inner.pending.clear();
                inner.state = State::Running;
            }
            State::Paused => {
                // Buffer discard and the state flip happen in the same
                // critical section: any add_sample racing this transition
                // either acquires `inner` before this point (sees PAUSED,
                // lands in the buffer this clears) or after (sees RUNNING).
                // Joining the worker thread happens after the lock is
                // dropped, so it can't deadlock against the worker's own
                // callbacks re-entering `inner`.
                inner.paused_buffer.clear();
                inner.state = State::Running;
                worker_to_join = self.worker.lock().unwrap().take();
            }
            State::Suspended => {
                inner.state = State::Running;
            }
            State::Running => {
                tracing::debug!("start ignored: already running");
            }
        }
        drop(inner);
        if let Some(worker) = worker_to_join {
            worker.stop();
        }
        Ok(())
    }

    pub fn pause(self: &Arc<Self>) -> Result<(), WriterError> {
        self.gate.wait_until_untriggered();
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Stopped => {
                self.open_file(&mut inner)?;
                inner.next_sequence = 0;
                inner.pending.clear();
                inner.state = State::Paused;
                drop(inner);
                self.spawn_event_worker();
            }
            State::Running | State::Suspended => {
                self.flush_locked(&mut inner)?;
                inner.state = State::Paused;
                drop(inner);
                self.spawn_event_worker();
            }
            State::Paused => {
                tracing::debug!("pause ignored: already paused");
            }
        }
        Ok(())
    }

    pub fn suspend(self: &Arc<Self>) -> Result<(), WriterError> {
        self.gate.wait_until_untriggered();
        let mut inner = self.inner.lock().unwrap();
        let mut worker_to_join = None;
        match inner.state {
            State::Running => {
                self.flush_locked(&mut inner)?;
                inner.state = State::Suspended;
            }
            State::Paused => {
                inner.paused_buffer.clear();
                inner.state = State::Suspended;
                worker_to_join = self.worker.lock().unwrap().take();
            }
            State::Suspended => {
                tracing::debug!("suspend ignored: already suspended");
            }
            State::Stopped => {
                tracing::warn!("suspend rejected: handler is stopped");
            }
        }
        drop(inner);
        if let Some(worker) = worker_to_join {
            worker.stop();
        }
        Ok(())
    }

    pub fn stop(self: &Arc<Self>) -> Result<(), WriterError> {
        self.gate.wait_until_untriggered();
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Stopped {
            tracing::debug!("stop ignored: already stopped");
            return Ok(());
        }
        let worker_to_join = if inner.state == State::Paused {
            inner.paused_buffer.clear();
            self.worker.lock().unwrap().take()
        } else {
            None
        };
        let result = (|| {
            self.flush_locked(&mut inner)?;
            self.drain_pending_on_stop(&mut inner)?;
            self.close_file_locked(&mut inner)?;
            inner.state = State::Stopped;
            Ok(())
        })();
        drop(inner);
        if let Some(worker) = worker_to_join {
            worker.stop();
        }
        result
    }

    /// `event` command: permitted only from `PAUSED`. Triggers an
    /// immediate flush of the paused buffer and optionally moves to
    /// `next_state` afterward (`spec §4.1`).
    pub fn trigger_event(self: &Arc<Self>, next_state: Option<State>) -> Result<(), WriterError> {
        self.gate.wait_until_untriggered();
        {
            let inner = self.inner.lock().unwrap();
            if inner.state != State::Paused {
                tracing::warn!("event command ignored: handler is not PAUSED");
                return Ok(());
            }
        }
        self.gate.trigger();
        self.gate.wait_until_untriggered();
        match next_state {
            Some(State::Running) => self.start(),
            Some(State::Stopped) => self.stop(),
            _ => Ok(()),
        }
    }

    // -- ingest path (spec §4.2, §4.4) --------------------------------

    pub fn add_schema(&self, resolved: crate::ingress::ResolvedType) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Stopped {
            tracing::debug!(type_name = %resolved.type_name, "dropping schema: handler stopped");
            return;
        }
        if inner.known_schemas.contains(&resolved.type_name) {
            return;
        }
        let schema = Schema {
            type_name: resolved.type_name.clone(),
            encoded_text: resolved.encoded_text,
            type_identifier: resolved.type_identifier,
            type_object: resolved.type_object,
        };
        if let Some(writer) = inner.writer.as_mut() {
            if let Err(e) = writer.add_schema(&schema) {
                tracing::error!(error = %e, type_name = %schema.type_name, "failed to register schema");
                return;
            }
        }
        inner.known_schemas.insert(schema.type_name.clone());
        let promoted = inner.pending.promote(&schema.type_name);
        for sample in promoted {
            self.route_accepted_sample(&mut inner, sample);
        }
    }

    pub fn add_sample(&self, input: SampleInput) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::Stopped {
            tracing::debug!(topic = %input.topic_name, "dropping sample: handler stopped");
            return;
        }
        if input.payload.is_empty() {
            tracing::warn!(topic = %input.topic_name, "dropping sample: empty payload");
            return;
        }

        let downsampling = input.topic_qos.downsampling.max(1);
        let count = inner.topic_counts.entry(input.topic_name.clone()).or_insert(0);
        *count += 1;
        if (*count - 1) % downsampling != 0 {
            return;
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let log_timestamp = if self.config.log_publish_time {
            input.source_timestamp
        } else {
            now_nanos()
        };

        let sample = crate::sample::Sample {
            topic_name: input.topic_name,
            type_name: input.type_name,
            payload: input.payload,
            source_timestamp: input.source_timestamp,
            log_timestamp,
            sequence,
            topic_qos: input.topic_qos,
        };

        if inner.known_schemas.contains(&sample.type_name) {
            self.route_accepted_sample(&mut inner, sample);
        } else {
            let type_name = sample.type_name.clone();
            if let Some(evicted) = inner.pending.push(&type_name, sample) {
                self.handle_evicted(&mut inner, evicted.sample);
            }
        }
    }

    // -- internals ------------------------------------------------------

    fn route_accepted_sample(&self, inner: &mut Inner, sample: crate::sample::Sample) {
        match inner.state {
            State::Running => {
                inner.buffer.push(sample);
                if inner.buffer.len() >= self.config.buffer_size {
                    if let Err(e) = self.flush_locked(inner) {
                        tracing::error!(error = %e, "flush at buffer threshold failed");
                    }
                }
            }
            State::Paused => {
                inner.paused_buffer.push(sample);
            }
            State::Suspended | State::Stopped => {
                tracing::debug!(topic = %sample.topic_name, state = %inner.state, "dropping sample: no persistence guarantee in this state");
            }
        }
    }

    fn handle_evicted(&self, inner: &mut Inner, sample: crate::sample::Sample) {
        if self.config.only_with_schema {
            tracing::warn!(
                type_name = %sample.type_name,
                sequence = sample.sequence,
                "dropping sample: pending store at capacity and only_with_schema is set"
            );
            return;
        }
        if let Err(e) = self.write_with_blank_schema(inner, sample) {
            tracing::error!(error = %e, "dropping evicted pending record: writer rejected it");
        }
    }

    fn write_with_blank_schema(
        &self,
        inner: &mut Inner,
        sample: crate::sample::Sample,
    ) -> Result<(), WriterError> {
        self.register_blank_schema_if_needed(inner, &sample.type_name)?;
        if let Some(writer) = inner.writer.as_mut() {
            writer.write_record(&sample)?;
        }
        Ok(())
    }

    fn register_blank_schema_if_needed(
        &self,
        inner: &mut Inner,
        type_name: &str,
    ) -> Result<(), WriterError> {
        if inner.known_schemas.insert(type_name.to_string()) {
            if let Some(writer) = inner.writer.as_mut() {
                writer.add_schema(&Schema::blank(type_name))?;
            }
        }
        Ok(())
    }

    fn drain_pending_on_stop(&self, inner: &mut Inner) -> Result<(), WriterError> {
        if self.config.only_with_schema {
            inner.pending.clear();
            return Ok(());
        }
        let samples = inner.pending.drain_all();
        for sample in samples {
            self.register_blank_schema_if_needed(inner, &sample.type_name)?;
            if let Some(writer) = inner.writer.as_mut() {
                if let Err(e) = writer.write_record(&sample) {
                    tracing::error!(error = %e, "dropping pending record at stop: writer rejected it");
                }
            }
        }
        Ok(())
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<(), WriterError> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        let drained: Vec<_> = inner.buffer.drain(..).collect();
        if let Some(writer) = inner.writer.as_mut() {
            for sample in &drained {
                if let Err(e) = writer.write_record(sample) {
                    tracing::error!(error = %e, topic = %sample.topic_name, "dropping record: writer rejected it");
                }
            }
            writer.flush()?;
        }
        Ok(())
    }

    fn open_file(&self, inner: &mut Inner) -> Result<(), WriterError> {
        let writer = (self.writer_factory)()?;
        inner.writer = Some(writer);
        inner.known_schemas.clear();
        Ok(())
    }

    fn close_file_locked(&self, inner: &mut Inner) -> Result<(), WriterError> {
        if let Some(writer) = inner.writer.take() {
            writer.close()?;
        }
        Ok(())
    }

    fn spawn_event_worker(self: &Arc<Self>) {
        let cleanup_period = self.config.cleanup_period;
        let for_timeout = Arc::clone(self);
        let for_trigger = Arc::clone(self);
        let worker = EventWorker::spawn(
            Arc::clone(&self.gate),
            cleanup_period,
            move || for_timeout.purge_paused_window(),
            move || for_trigger.flush_paused_buffer(),
        );
        *self.worker.lock().unwrap() = Some(worker);
    }

    /// `on_timeout`: drop paused-buffer entries older than `event_window`.
    fn purge_paused_window(&self) {
        let mut inner = self.inner.lock().unwrap();
        let cutoff = now_nanos() - self.config.event_window.as_nanos() as i64;
        inner.paused_buffer.retain(|s| s.log_timestamp >= cutoff);
    }

    /// `on_trigger`: move the paused buffer into the main buffer and flush it.
    fn flush_paused_buffer(&self) {
        let mut inner = self.inner.lock().unwrap();
        let drained: Vec<_> = inner.paused_buffer.drain(..).collect();
        inner.buffer.extend(drained);
        if let Err(e) = self.flush_locked(&mut inner) {
            tracing::error!(error = %e, "flush after trigger_event failed");
        }
    }
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
