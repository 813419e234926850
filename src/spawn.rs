// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    /// Modules get no input and share the supervisor's output streams
    pub fn module() -> Self {
        StdIoConf {
            stdin: Stdio::null(),
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }
}

/// A start script split into the program and its arguments.
///
/// Splitting is on whitespace only, there is no quoting or escaping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Returns `None` for a blank command
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let program = tokens.next()?;

        Some(Self {
            program,
            args: tokens.collect(),
        })
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Spawns `command` with `working_dir` as the current directory
pub fn new_process(command: &CommandLine, working_dir: &Path, stdio: StdIoConf) -> io::Result<Child> {
    // the supervisor task owns the child and reaps it, dropping the handle must not kill it
    Command::new(&command.program)
        .args(&command.args)
        .current_dir(working_dir)
        .kill_on_drop(false)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr)
        .spawn()
}
