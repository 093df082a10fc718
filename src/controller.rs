// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The command loop: a thin layer that polls [`CommandIngress`], applies
//! legal transitions to a [`Handler`], and publishes status after each
//! one (`spec §4.1`, `§4.7`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{InitError, WriterError};
use crate::handler::Handler;
use crate::ingress::CommandIngress;
use crate::state::{parse_command, Command, ReportedState, State, StatusMessage};

/// How often the command ingress is polled when idle.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Controller<I: CommandIngress> {
    handler: Arc<Handler>,
    ingress: I,
    poll_interval: Duration,
}

impl<I: CommandIngress> Controller<I> {
    pub fn new(handler: Arc<Handler>, ingress: I) -> Self {
        Self {
            handler,
            ingress,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Resolve `initial_state` (`spec §4.1`, `§6`) then process commands
    /// until `close` is observed or `shutdown` is set, whichever comes
    /// first. The initial synthesis is the only transition whose error is
    /// propagated — a failure to open the very first file is fatal
    /// (`InitError`); every later transition failure is logged and the
    /// loop keeps running.
    pub fn run(mut self, initial_state: State, shutdown: &AtomicBool) -> Result<(), InitError> {
        self.synthesize_initial(initial_state)?;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                self.apply_close();
                return Ok(());
            }

            let commands = self.ingress.poll_commands();
            for (command, args) in commands {
                let parsed = parse_command(&command, args.as_deref());
                if self.apply(parsed) {
                    return Ok(());
                }
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    fn synthesize_initial(&mut self, initial_state: State) -> Result<(), InitError> {
        let result = match initial_state {
            State::Running => self.transition_and_publish(|h| h.start()),
            State::Paused => self.transition_and_publish(|h| h.pause()),
            State::Suspended => self.transition_and_publish(|h| h.suspend()),
            State::Stopped => Ok(()),
        };
        result.map_err(InitError::Writer)
    }

    fn apply(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start => {
                let result = self.transition_and_publish(|h| h.start());
                self.log_err(result);
                false
            }
            Command::Pause => {
                let result = self.transition_and_publish(|h| h.pause());
                self.log_err(result);
                false
            }
            Command::Suspend => {
                let result = self.transition_and_publish(|h| h.suspend());
                self.log_err(result);
                false
            }
            Command::Stop => {
                let result = self.transition_and_publish(|h| h.stop());
                self.log_err(result);
                false
            }
            Command::Event { next_state } => {
                let result = self.transition_and_publish(|h| h.trigger_event(next_state));
                self.log_err(result);
                false
            }
            Command::Close => {
                self.apply_close();
                true
            }
            Command::Unknown(command) => {
                tracing::warn!(%command, "ignoring unknown command");
                false
            }
        }
    }

    fn apply_close(&mut self) {
        let previous = self.handler.state();
        if let Err(e) = self.handler.stop() {
            tracing::error!(error = %e, "error while stopping during close");
        }
        let status = StatusMessage::new(ReportedState::Live(previous), ReportedState::Closed, None);
        if let Err(e) = self.ingress.publish_status(&status) {
            tracing::warn!(error = %e, "failed to publish close status");
        }
    }

    fn transition_and_publish<F>(&mut self, f: F) -> Result<(), WriterError>
    where
        F: FnOnce(&Arc<Handler>) -> Result<(), WriterError>,
    {
        let previous = self.handler.state();
        f(&self.handler)?;
        let current = self.handler.state();
        if previous != current {
            let status = StatusMessage::new(
                ReportedState::Live(previous),
                ReportedState::Live(current),
                None,
            );
            if let Err(e) = self.ingress.publish_status(&status) {
                tracing::warn!(error = %e, "failed to publish status");
            }
        }
        Ok(())
    }

    fn log_err(&self, result: Result<(), WriterError>) {
        if let Err(e) = result {
            tracing::error!(error = %e, "command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerConfig;
    use crate::ingress::testing::MockCommandIngress;
    use crate::pending::PendingBound;
    use crate::writer::{FileNaming, ResourceLimits, Writer};

    fn handler(dir: &std::path::Path) -> Arc<Handler> {
        let dir = dir.to_path_buf();
        let factory: Arc<crate::handler::WriterFactory> = Arc::new(move || {
            let naming = FileNaming {
                path: dir.clone(),
                base_name: "capture".into(),
                extension: "rec",
                timestamp_format: None,
                local_timestamp: false,
            };
            let limits = ResourceLimits {
                max_file_size: None,
                max_size: None,
                file_rotation: false,
                log_rotation: false,
                safety_margin: crate::writer::MIN_SAFETY_MARGIN,
            };
            let writer = crate::writer::chunked::ChunkedWriter::create(naming, limits, 0)?;
            Ok(Box::new(writer) as Box<dyn Writer>)
        });
        Handler::new(
            HandlerConfig {
                buffer_size: 4,
                event_window: Duration::from_millis(100),
                cleanup_period: Duration::from_millis(30),
                pending_bound: PendingBound::Unlimited,
                only_with_schema: false,
                log_publish_time: true,
            },
            factory,
        )
    }

    #[test]
    fn initial_running_publishes_stopped_to_running() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let mut ingress = MockCommandIngress::default();
        ingress.send("close", None);
        let controller = Controller::new(Arc::clone(&h), ingress);
        let shutdown = AtomicBool::new(false);
        controller.run(State::Running, &shutdown).unwrap();
    }

    #[test]
    fn unknown_command_does_not_publish_status() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let mut ingress = MockCommandIngress::default();
        ingress.send("frobnicate", None);
        ingress.send("close", None);
        let controller = Controller::new(Arc::clone(&h), ingress);
        let shutdown = AtomicBool::new(false);
        controller.run(State::Stopped, &shutdown).unwrap();
    }

    #[test]
    fn shutdown_flag_performs_close() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let ingress = MockCommandIngress::default();
        let controller = Controller::new(Arc::clone(&h), ingress).with_poll_interval(Duration::from_millis(5));
        let shutdown = AtomicBool::new(true);
        controller.run(State::Running, &shutdown).unwrap();
        assert_eq!(h.state(), State::Stopped);
    }
}
