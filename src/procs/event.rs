// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::broadcast;

use crate::Error;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How a module's process ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    pub module: String,
    pub pid: u32,
    /// Exit code, `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub signal: Option<Signal>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "'{}' ({}) exited with code {}", self.module, self.pid, code),
            (None, Some(signal)) => write!(
                f,
                "'{}' ({}) was terminated by {}",
                self.module,
                self.pid,
                signal.as_str()
            ),
            (None, None) => write!(f, "'{}' ({}) exited", self.module, self.pid),
        }
    }
}

/// Lifecycle transitions of module processes.
///
/// For one process the order is always `Started`, at most one `Errored`, then one `Exited`.
#[derive(Clone, Debug)]
pub enum LauncherEvent {
    Started { module: String, pid: u32 },
    Exited(ProcessExit),
    Errored { module: String, error: Arc<Error> },
}

impl fmt::Display for LauncherEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherEvent::Started { module, pid } => write!(f, "'{}' ({}) started", module, pid),
            LauncherEvent::Exited(exit) => write!(f, "{}", exit),
            LauncherEvent::Errored { module, error } => write!(f, "'{}' failed: {}", module, error),
        }
    }
}

/// Fans lifecycle events out to every subscriber
#[derive(Clone, Debug)]
pub struct EventRelay {
    sender: broadcast::Sender<LauncherEvent>,
}

impl EventRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receives every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LauncherEvent) {
        // no subscribers is fine
        self.sender.send(event).ok();
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
