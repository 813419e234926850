// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Line based console for driving a launcher interactively.

use std::fmt::Write as _;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::procs::Launcher;
use crate::source::ModuleSource;
use crate::Error;

pub const PROMPT: &str = "modrc> ";

const HELP: &str = "\
commands:
  list                     installed modules
  running                  running modules
  info <module>            module metadata
  start <module>           start a module
  stop <module> [--force]  stop a module, SIGKILL with --force
  help                     this help
  exit                     leave the console
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    List,
    Running,
    Info(String),
    Start(String),
    Stop { module: String, force: bool },
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(|| "empty command".to_string())?;
        let args: Vec<&str> = words.collect();

        let module = |usage: &str| match args.as_slice() {
            [module] => Ok(module.to_string()),
            _ => Err(format!("usage: {}", usage)),
        };

        match command {
            "list" | "ls" => Ok(Command::List),
            "running" | "ps" => Ok(Command::Running),
            "info" => module("info <module>").map(Command::Info),
            "start" => module("start <module>").map(Command::Start),
            "stop" => match args.as_slice() {
                [module] => Ok(Command::Stop {
                    module: module.to_string(),
                    force: false,
                }),
                [module, "-f"] | [module, "--force"] | ["-f", module] | ["--force", module] => {
                    Ok(Command::Stop {
                        module: module.to_string(),
                        force: true,
                    })
                }
                _ => Err("usage: stop <module> [--force]".to_string()),
            },
            "help" | "?" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            other => Err(format!("unknown command '{}', try help", other)),
        }
    }
}

pub struct Console<'a, S> {
    launcher: &'a Launcher<S>,
}

impl<'a, S: ModuleSource> Console<'a, S> {
    pub fn new(launcher: &'a Launcher<S>) -> Self {
        Self { launcher }
    }

    /// Reads commands until `exit` or the end of `input`
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let line = match lines.next_line().await? {
                Some(line) => line,
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = match line.parse::<Command>() {
                Ok(Command::Exit) => break,
                Ok(command) => self.execute(command).await,
                Err(usage) => usage,
            };

            output.write_all(reply.as_bytes()).await?;
            if !reply.ends_with('\n') {
                output.write_all(b"\n").await?;
            }
        }

        output.write_all(b"\n").await?;
        output.flush().await?;
        Ok(())
    }

    /// Runs one command, errors are part of the reply
    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::List => match self.launcher.list().await {
                Ok(modules) if modules.is_empty() => "no modules installed".to_string(),
                Ok(modules) => modules.join("\n"),
                Err(e) => format!("error: {}", e),
            },
            Command::Running => {
                let mut running: Vec<_> = self.launcher.running().await.into_iter().collect();
                if running.is_empty() {
                    return "nothing running".to_string();
                }

                running.sort_by(|a, b| a.0.cmp(&b.0));
                let mut reply = String::new();
                for (module, handle) in running {
                    writeln!(
                        reply,
                        "{}\tpid {}\tup {}s",
                        module,
                        handle.pid(),
                        handle.uptime().as_secs()
                    )
                    .ok();
                }
                reply
            }
            Command::Info(module) => match self.launcher.info(&module) {
                Ok(metadata) => serde_json::to_string_pretty(&metadata)
                    .unwrap_or_else(|e| format!("error: {}", e)),
                Err(e) => format!("error: {}", e),
            },
            Command::Start(module) => match self.launcher.start(&module).await {
                Ok(()) => format!("starting '{}'", module),
                Err(e) => format!("error: {}", e),
            },
            Command::Stop { module, force } => match self.launcher.stop(&module, force).await {
                Ok(exit) => exit.to_string(),
                Err(e) => format!("error: {}", e),
            },
            Command::Help => HELP.to_string(),
            Command::Exit => String::new(),
        }
    }
}
