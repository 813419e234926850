// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};

use crate::logger::Logger;
use crate::procs::event::{EventRelay, LauncherEvent, ProcessExit};
use crate::procs::registry::{ProcessHandle, Registry, SignalRequest};
use crate::Error;

const CONTROL_CAPACITY: usize = 8;

/// Monitor a single module process
///
/// Rules:
///   - is the only owner of the OS child, and the only one who reaps it
///   - delivers signals on behalf of `Launcher::stop`
///   - removes the registry entry once the exit is observed, exactly once
///   - never restarts anything
pub(crate) struct Supervisor {
    module: String,
    pid: u32,
    child: Child,
    control: mpsc::Receiver<SignalRequest>,
    exit: watch::Sender<Option<ProcessExit>>,
    registry: Registry,
    events: EventRelay,
    logger: Arc<dyn Logger>,
}

impl Supervisor {
    /// Takes ownership of `child`, returning the supervisor and the handle to register
    pub fn new(
        module: &str,
        pid: u32,
        child: Child,
        registry: Registry,
        events: EventRelay,
        logger: Arc<dyn Logger>,
    ) -> (Self, ProcessHandle) {
        let (control_tx, control) = mpsc::channel(CONTROL_CAPACITY);
        let (exit, exit_rx) = watch::channel(None);

        let handle = ProcessHandle::new(module.to_string(), pid, control_tx, exit_rx);
        let supervisor = Self {
            module: module.to_string(),
            pid,
            child,
            control,
            exit,
            registry,
            events,
            logger,
        };

        (supervisor, handle)
    }

    pub async fn run(mut self) {
        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,
                Some(request) = self.control.recv() => {
                    let result = self.deliver(request.signal);
                    request.reply.send(result).ok();
                }
            }
        };

        let (code, signal) = match status {
            Ok(status) => exit_details(status),
            Err(err) => {
                // the process can no longer be observed, treat it as gone
                self.on_error(Error::from(err));
                (None, None)
            }
        };

        self.on_exit(code, signal).await;
    }

    fn deliver(&self, signal: Signal) -> Result<(), Error> {
        // no id means the child was already reaped
        let pid = match self.child.id() {
            Some(pid) => pid,
            None => return Ok(()),
        };

        self.logger.info(&format!(
            "Sending {} to '{}' ({})",
            signal.as_str(),
            self.module,
            pid
        ));

        kill(Pid::from_raw(pid as i32), signal).map_err(|e| {
            self.logger.error(&format!(
                "Failed to send {} to '{}': {}",
                signal.as_str(),
                self.module,
                e
            ));
            Error::from(e)
        })
    }

    fn on_error(&self, err: Error) {
        self.logger
            .error(&format!("Module '{}' failed: {}", self.module, err));

        self.events.emit(LauncherEvent::Errored {
            module: self.module.clone(),
            error: Arc::new(err),
        });
    }

    async fn on_exit(self, code: Option<i32>, signal: Option<Signal>) {
        let exit = ProcessExit {
            module: self.module,
            pid: self.pid,
            code,
            signal,
        };

        self.logger.info(&format!("Module {}", exit));
        self.registry.remove(&exit.module, exit.pid).await;
        self.events.emit(LauncherEvent::Exited(exit.clone()));

        // waiters may all be gone
        self.exit.send(Some(exit)).ok();
    }
}

fn exit_details(status: ExitStatus) -> (Option<i32>, Option<Signal>) {
    let signal = status
        .signal()
        .and_then(|signal| Signal::try_from(signal).ok());

    (status.code(), signal)
}
