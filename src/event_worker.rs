// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The single background thread active only while the Handler is
//! `PAUSED`, and the condition-variable gate that coordinates it with
//! command handling (`spec §4.5`, `§5`).
//!
//! The flag and its predicate are deliberately kept in one small,
//! scannable type rather than spread across the Handler: one mutex, one
//! condvar, three operations (arm, trigger, stop).

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlag {
    Untriggered,
    Triggered,
    Stopped,
}

/// Shared between the Handler's command-handling methods and the
/// EventWorker thread. Every command path (`start`, `pause`, `suspend`,
/// `stop`, `trigger_event`) calls [`EventGate::wait_until_untriggered`]
/// before touching Handler state, so no command interleaves with a
/// flush already in progress.
#[derive(Debug)]
pub struct EventGate {
    flag: Mutex<EventFlag>,
    cv: Condvar,
}

impl Default for EventGate {
    fn default() -> Self {
        Self {
            flag: Mutex::new(EventFlag::Untriggered),
            cv: Condvar::new(),
        }
    }
}

impl EventGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the worker is not mid-flush. A no-op if no worker is
    /// running (flag stays `Untriggered` forever in that case).
    pub fn wait_until_untriggered(&self) {
        let guard = self.flag.lock().unwrap();
        let _guard = self
            .cv
            .wait_while(guard, |f| *f == EventFlag::Triggered)
            .unwrap();
    }

    /// Request an immediate flush; wakes the worker if it is sleeping.
    pub fn trigger(&self) {
        let mut flag = self.flag.lock().unwrap();
        if *flag != EventFlag::Stopped {
            *flag = EventFlag::Triggered;
            self.cv.notify_all();
        }
    }

    /// Ask the worker to exit after finishing its current iteration.
    pub fn request_stop(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = EventFlag::Stopped;
        self.cv.notify_all();
    }

    /// Reset to `Untriggered` ahead of spawning a fresh worker for a new
    /// `PAUSED` period.
    pub fn rearm(&self) {
        *self.flag.lock().unwrap() = EventFlag::Untriggered;
    }
}

/// Handle to the background thread; dropping it does not stop the thread —
/// callers must call [`EventWorker::stop`] explicitly so the Handler can
/// control exactly when the paused buffer's last purge happens.
pub struct EventWorker {
    gate: Arc<EventGate>,
    join: Option<JoinHandle<()>>,
}

impl EventWorker {
    /// Spawn the worker. `on_timeout` runs once per `cleanup_period` tick
    /// with no trigger observed (purges the paused buffer's time window);
    /// `on_trigger` runs once per `trigger_event()` call (flushes the
    /// paused buffer). Both run with the gate already back at
    /// `Untriggered` so they may themselves call Handler methods that
    /// re-enter `wait_until_untriggered` without deadlocking.
    pub fn spawn<F, G>(gate: Arc<EventGate>, cleanup_period: Duration, on_timeout: F, on_trigger: G) -> Self
    where
        F: Fn() + Send + 'static,
        G: Fn() + Send + 'static,
    {
        gate.rearm();
        let worker_gate = Arc::clone(&gate);
        let join = std::thread::spawn(move || loop {
            let guard = worker_gate.flag.lock().unwrap();
            let (mut guard, timeout_result) = worker_gate
                .cv
                .wait_timeout_while(guard, cleanup_period, |f| *f == EventFlag::Untriggered)
                .unwrap();

            match *guard {
                EventFlag::Stopped => break,
                EventFlag::Triggered => {
                    *guard = EventFlag::Untriggered;
                    drop(guard);
                    on_trigger();
                    worker_gate.cv.notify_all();
                }
                EventFlag::Untriggered => {
                    // Timed out with no trigger observed.
                    debug_assert!(timeout_result.timed_out());
                    drop(guard);
                    on_timeout();
                }
            }
        });

        EventWorker {
            gate,
            join: Some(join),
        }
    }

    pub fn gate(&self) -> &Arc<EventGate> {
        &self.gate
    }

    /// Signal the worker to stop and block until it exits.
    pub fn stop(mut self) {
        self.gate.request_stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for EventWorker {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.gate.request_stop();
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn timeout_fires_when_untriggered() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let gate = Arc::new(EventGate::new());
        let worker = EventWorker::spawn(
            gate,
            Duration::from_millis(10),
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        );
        std::thread::sleep(Duration::from_millis(60));
        worker.stop();
        assert!(fired.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn trigger_invokes_on_trigger_not_on_timeout() {
        let timeouts = Arc::new(AtomicUsize::new(0));
        let triggers = Arc::new(AtomicUsize::new(0));
        let timeouts_clone = Arc::clone(&timeouts);
        let triggers_clone = Arc::clone(&triggers);
        let gate = Arc::new(EventGate::new());
        let worker = EventWorker::spawn(
            gate,
            Duration::from_secs(5),
            move || {
                timeouts_clone.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                triggers_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        worker.gate().trigger();
        std::thread::sleep(Duration::from_millis(50));
        worker.stop();
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
    }
}
