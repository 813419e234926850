// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Module processes: launching, supervising and the registry of what is running.

mod event;
mod launcher;
mod registry;
mod supervisor;

pub use event::{EventRelay, LauncherEvent, ProcessExit, DEFAULT_EVENT_CAPACITY};
pub use launcher::Launcher;
pub use registry::{ProcessHandle, Registry};

pub use nix::sys::signal::Signal;
