// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `ddsrecorder` — state-driven DDS capture recorder CLI.
//!
//! Wires a [`Config`]-driven [`Handler`]/[`Controller`] pair to a DDS
//! ingress. Real DDS transport is an external collaborator (`spec §1`):
//! this binary ships a `--mock` mode built on the crate's in-memory test
//! doubles to demonstrate the full pipeline end to end, and a stdin-driven
//! command ingress standing in for the DDS control plane until a concrete
//! `CommandIngress`/`DdsIngress` pair is plugged in for a target DDS stack.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use ddsrecorder::config::{Config, ContainerKind};
use ddsrecorder::error::{ConfigError, InitError};
use ddsrecorder::handler::{Handler, SampleInput, WriterFactory};
use ddsrecorder::ingress::testing::{MockDdsIngress, MockTypeRegistry};
use ddsrecorder::ingress::{CommandIngress, DdsIngress, DynamicTypeRegistry, ResolvedType};
use ddsrecorder::sample::{PayloadPool, Sample, TopicQos};
use ddsrecorder::writer::chunked::ChunkedWriter;
use ddsrecorder::writer::relational::{DataFormat, RelationalWriter};
use ddsrecorder::writer::Writer;
use ddsrecorder::Controller;

#[derive(Parser, Debug)]
#[command(name = "ddsrecorder")]
#[command(about = "State-driven DDS capture recorder", long_about = None)]
struct Args {
    /// Path to the YAML configuration file (`spec §6`).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `dds.domain`.
    #[arg(long)]
    domain: Option<u32>,

    /// Override `recorder.output.filename`.
    #[arg(short, long)]
    output: Option<String>,

    /// Log verbosity; overrides `RUST_LOG` when set.
    #[arg(long)]
    log_level: Option<String>,

    /// Run against the in-memory DDS test doubles instead of a real
    /// transport, publishing a handful of synthetic samples so the
    /// pipeline can be exercised without a DDS deployment.
    #[arg(long)]
    mock: bool,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_ARGS: i32 = 1;
const EXIT_CONFIG: i32 = 10;
const EXIT_INIT: i32 = 11;
const EXIT_RUNTIME: i32 = 20;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_ARGS);
        }
    };

    init_tracing(args.log_level.as_deref());

    match run(args) {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "ddsrecorder exited with an error");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Map a fatal error to the external exit-code contract (`spec §6`).
/// Argument errors never reach here: `clap` exits with `EXIT_ARGS` itself.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else if err.downcast_ref::<InitError>().is_some() {
        EXIT_INIT
    } else {
        EXIT_RUNTIME
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(domain) = args.domain {
        config.dds.domain = domain;
    }
    if let Some(output) = args.output {
        config.recorder.output.filename = output;
    }
    config.validate()?;

    let initial_state = config.initial_state()?;
    let limits = config.resource_limits()?;
    let naming = config.recorder.output.file_naming();
    let container = config.recorder.output.container_kind();
    let handler_config = config.handler_config();

    let writer_factory: Arc<WriterFactory> = match container {
        ContainerKind::Chunked => {
            let naming = naming.clone();
            let limits = limits.clone();
            Arc::new(move || {
                let writer = ChunkedWriter::create(naming.clone(), limits.clone(), 0)?;
                Ok(Box::new(writer) as Box<dyn Writer>)
            })
        }
        ContainerKind::Relational => {
            let naming = naming.clone();
            let limits = limits.clone();
            Arc::new(move || {
                let writer = RelationalWriter::create(naming.clone(), limits.clone(), DataFormat::Both)?;
                Ok(Box::new(writer) as Box<dyn Writer>)
            })
        }
    };

    let handler = Handler::new(handler_config, writer_factory);
    let shutdown = Arc::new(AtomicBool::new(false));
    let ctrlc_shutdown = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        tracing::info!("received termination signal, closing");
        ctrlc_shutdown.store(true, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    let mut mock_ingress = MockDdsIngress::default();
    let mut mock_registry = MockTypeRegistry::default();
    if args.mock {
        tracing::info!("--mock set: seeding the in-memory test doubles with synthetic samples");
        seed_mock_traffic(&mut mock_ingress, &mut mock_registry);
    }
    let dds_ingress: Box<dyn DdsIngress> = Box::new(mock_ingress);
    let type_registry: Box<dyn DynamicTypeRegistry> = Box::new(mock_registry);
    spawn_ingest_pump(
        Arc::clone(&handler),
        dds_ingress,
        type_registry,
        Arc::clone(&shutdown),
        config.recorder.record_types,
        config.recorder.ros2_types,
        config.topic_filter(),
    );

    if config.remote_controller.enable {
        let ingress = StdinCommandIngress::spawn();
        let controller = Controller::new(Arc::clone(&handler), ingress);
        controller.run(initial_state, &shutdown)?;
    } else {
        let ingress = NullCommandIngress;
        let controller = Controller::new(Arc::clone(&handler), ingress);
        controller.run(initial_state, &shutdown)?;
    }

    Ok(())
}

/// Continuously pumps the DDS ingress's non-blocking `poll_*` methods into
/// the Handler until `shutdown` is set. `topic_filter`, when set from
/// `dds.whitelist`/`blocklist`/`allowlist` (`spec §6`), is applied before
/// ros2 demangling and before the sample ever reaches `Handler::add_sample`
/// — filtered-out topics never occupy a sequence number or a pending-store
/// slot.
fn spawn_ingest_pump(
    handler: Arc<Handler>,
    mut dds_ingress: Box<dyn DdsIngress>,
    mut type_registry: Box<dyn DynamicTypeRegistry>,
    shutdown: Arc<AtomicBool>,
    record_types: bool,
    ros2_types: bool,
    topic_filter: Option<ddsrecorder::TopicFilter>,
) {
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            if record_types {
                for resolved in type_registry.poll_resolved() {
                    handler.add_schema(resolved);
                }
            }
            for mut sample in dds_ingress.poll_samples() {
                if let Some(filter) = &topic_filter {
                    if !filter.matches(&sample.topic_name) {
                        continue;
                    }
                }
                if ros2_types {
                    sample.topic_name = ddsrecorder::ros2::demangle_topic(&sample.topic_name);
                    sample.type_name = ddsrecorder::ros2::demangle_type(&sample.type_name);
                }
                handler.add_sample(SampleInput {
                    topic_name: sample.topic_name,
                    type_name: sample.type_name,
                    payload: sample.payload,
                    source_timestamp: sample.source_timestamp,
                    topic_qos: sample.topic_qos,
                });
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    });
}

/// Seeds the mock ingress/type-registry pair with a handful of synthetic
/// samples across two demo topics, so `--mock` actually exercises the
/// pipeline end to end (handler, buffering, writer) instead of running
/// against an empty queue that never produces output.
fn seed_mock_traffic(ingress: &mut MockDdsIngress, registry: &mut MockTypeRegistry) {
    let pool = PayloadPool::new();

    registry.resolve(ResolvedType {
        type_name: "demo_msgs/Temperature".into(),
        encoded_text: "struct Temperature { float64 celsius; }".into(),
        type_identifier: Vec::new(),
        type_object: Vec::new(),
    });
    registry.resolve(ResolvedType {
        type_name: "demo_msgs/Status".into(),
        encoded_text: "struct Status { string message; }".into(),
        type_identifier: Vec::new(),
        type_object: Vec::new(),
    });

    for i in 0..5i64 {
        ingress.push(Sample {
            topic_name: "demo/temperature".into(),
            type_name: "demo_msgs/Temperature".into(),
            payload: pool.acquire(format!("{{\"celsius\":{}}}", 20 + i).into_bytes()),
            source_timestamp: i * 1_000_000,
            log_timestamp: i * 1_000_000,
            sequence: i as u64,
            topic_qos: TopicQos::default(),
        });
    }
    ingress.push(Sample {
        topic_name: "demo/status".into(),
        type_name: "demo_msgs/Status".into(),
        payload: pool.acquire(b"{\"message\":\"ready\"}".to_vec()),
        source_timestamp: 5_000_000,
        log_timestamp: 5_000_000,
        sequence: 0,
        topic_qos: TopicQos::default(),
    });
}

/// Stand-in control plane driven by newline-delimited `command[:args]`
/// lines on stdin, used when `remote-controller.enable` is set but no
/// DDS-backed `CommandIngress` has been plugged in yet.
struct StdinCommandIngress {
    incoming: Arc<Mutex<std::collections::VecDeque<(String, Option<String>)>>>,
}

impl StdinCommandIngress {
    fn spawn() -> Self {
        let incoming = Arc::new(Mutex::new(std::collections::VecDeque::new()));
        let worker_queue = Arc::clone(&incoming);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match std::io::BufRead::read_line(&mut stdin.lock(), &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let (command, args) = match trimmed.split_once(':') {
                            Some((c, a)) => (c.to_string(), Some(a.to_string())),
                            None => (trimmed.to_string(), None),
                        };
                        worker_queue.lock().unwrap().push_back((command, args));
                    }
                }
            }
        });
        Self { incoming }
    }
}

impl CommandIngress for StdinCommandIngress {
    fn poll_commands(&mut self) -> Vec<(String, Option<String>)> {
        self.incoming.lock().unwrap().drain(..).collect()
    }

    fn publish_status(&mut self, status: &ddsrecorder::StatusMessage) -> Result<(), String> {
        tracing::info!(current = %status.current, previous = %status.previous, "status");
        Ok(())
    }
}

/// Used when `remote-controller.enable` is false: no commands ever
/// arrive, the recorder simply runs `initial-state` until a termination
/// signal closes it.
struct NullCommandIngress;

impl CommandIngress for NullCommandIngress {
    fn poll_commands(&mut self) -> Vec<(String, Option<String>)> {
        Vec::new()
    }

    fn publish_status(&mut self, _status: &ddsrecorder::StatusMessage) -> Result<(), String> {
        Ok(())
    }
}
