// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot, watch, Mutex, MutexGuard};

use crate::procs::event::ProcessExit;
use crate::Error;

/// A request for the supervisor to deliver `signal` to its process
#[derive(Debug)]
pub(crate) struct SignalRequest {
    pub signal: Signal,
    pub reply: oneshot::Sender<Result<(), Error>>,
}

/// Reference to a running module process.
///
/// Cloning is cheap, the OS child itself stays with the process's supervisor task.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    module: String,
    pid: u32,
    started_at: SystemTime,
    control: mpsc::Sender<SignalRequest>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    pub(crate) fn new(
        module: String,
        pid: u32,
        control: mpsc::Sender<SignalRequest>,
        exit: watch::Receiver<Option<ProcessExit>>,
    ) -> Self {
        Self {
            module,
            pid,
            started_at: SystemTime::now(),
            control,
            exit,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed().unwrap_or_default()
    }

    /// The exit, if it has already been observed
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit.borrow().clone()
    }

    /// Delivers `signal` to the process.
    ///
    /// A process that is already exiting is not an error, the signal is simply dropped.
    pub async fn signal(&self, signal: Signal) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();

        if self
            .control
            .send(SignalRequest { signal, reply })
            .await
            .is_err()
        {
            return Ok(());
        }

        response.await.unwrap_or(Ok(()))
    }

    /// Resolves once the supervisor has observed the process exit
    pub async fn wait(&self) -> Result<ProcessExit, Error> {
        let mut exit = self.exit.clone();
        let exited = exit.wait_for(Option::is_some).await.map_err(|_| {
            Error::from(format!(
                "supervisor of '{}' ended without an exit status",
                self.module
            ))
        })?;

        (*exited)
            .clone()
            .ok_or_else(|| Error::from("exit status missing"))
    }
}

/// Running processes keyed by module name, at most one per name.
///
/// Only a process's supervisor removes its entry, once the exit has been observed.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    entries: Arc<Mutex<HashMap<String, ProcessHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current entries, changes to it do not touch the registry
    pub async fn snapshot(&self) -> HashMap<String, ProcessHandle> {
        self.entries.lock().await.clone()
    }

    pub async fn get(&self, module: &str) -> Option<ProcessHandle> {
        self.entries.lock().await.get(module).cloned()
    }

    pub async fn contains(&self, module: &str) -> bool {
        self.entries.lock().await.contains_key(module)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Held across the duplicate check and the insert in `Launcher::start`
    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<String, ProcessHandle>> {
        self.entries.lock().await
    }

    /// Removes the entry for `module` if it still belongs to `pid`
    pub(crate) async fn remove(&self, module: &str, pid: u32) -> bool {
        let mut entries = self.entries.lock().await;

        match entries.get(module) {
            Some(handle) if handle.pid() == pid => {
                entries.remove(module);
                true
            }
            _ => false,
        }
    }
}
