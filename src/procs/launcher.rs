// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use nix::sys::signal::Signal;
use tokio::fs;
use tokio::sync::broadcast;

use crate::config::{Config, NpmConfig};
use crate::error::ErrorKind;
use crate::logger::Logger;
use crate::manifest::ModuleMetadata;
use crate::procs::event::{EventRelay, LauncherEvent, ProcessExit};
use crate::procs::registry::{ProcessHandle, Registry};
use crate::procs::supervisor::Supervisor;
use crate::source::{DirectorySource, ModuleSource};
use crate::spawn::{self, CommandLine, StdIoConf};
use crate::Error;

/// Launch programs
///
/// Rules:
/// - may start and stop module processes
/// - reads each module's manifest for the command to launch, on every start
/// - at most one process per module
/// - relays the lifecycle of every process it started to subscribers
pub struct Launcher<S = DirectorySource> {
    config: Config,
    logger: Arc<dyn Logger>,
    source: S,
    registry: Registry,
    events: EventRelay,
    modules_dir: Option<PathBuf>,
}

impl Launcher<DirectorySource> {
    pub fn new(config: Config, logger: Arc<dyn Logger>) -> Self {
        Self::with_source(config, logger, DirectorySource::new())
    }
}

impl<S: ModuleSource> Launcher<S> {
    pub fn with_source(config: Config, logger: Arc<dyn Logger>, source: S) -> Self {
        Self {
            config,
            logger,
            source,
            registry: Registry::new(),
            events: EventRelay::default(),
            modules_dir: None,
        }
    }

    /// The module installation directory, known after `init`
    pub fn modules_dir(&self) -> Option<&Path> {
        self.modules_dir.as_deref()
    }

    /// Receives all lifecycle events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.events.subscribe()
    }

    /// Validates the configuration, creates the module directory and prepares the module source.
    ///
    /// Every failure here is fatal to the caller.
    pub async fn init(&mut self) -> Result<(), Error> {
        self.config.validate()?;

        // only the npm section is handed on, nothing else in the config is an npm option
        let npm_config: NpmConfig = self.config.npm.derive();

        let modules_dir = npm_config.modules_dir();
        if fs::metadata(&modules_dir).await.is_err() {
            self.logger.info(&format!(
                "Module path '{}' not found, creating it.",
                modules_dir.display()
            ));

            fs::create_dir_all(&modules_dir)
                .await
                .map_err(|source| ErrorKind::Filesystem {
                    path: modules_dir.clone(),
                    source,
                })?;
        }

        self.logger.info("Initializing module source");
        self.source
            .init(&npm_config)
            .await
            .map_err(|e| {
                if matches!(e.kind(), ErrorKind::ModuleSource(_)) {
                    e
                } else {
                    ErrorKind::ModuleSource(e.to_string()).into()
                }
            })?;

        self.modules_dir = Some(modules_dir);
        Ok(())
    }

    /// Names of the installed modules, empty if there are none
    pub async fn list(&self) -> Result<Vec<String>, Error> {
        let modules_dir = self.require_init()?;
        self.logger.info(&format!(
            "Reading modules at {}",
            modules_dir.display()
        ));

        let modules = self.source.list().await?;
        if modules.is_empty() {
            self.logger.info("No modules found.");
        }

        Ok(modules)
    }

    /// Reads the module's manifest, fresh on every call
    pub fn info(&self, module: &str) -> Result<ModuleMetadata, Error> {
        self.require_init()?;
        self.source.metadata(module)
    }

    /// Spawns the module's start script.
    ///
    /// Returning `Ok` only means the start was attempted: a spawn failure is reported as an
    /// `Errored` event and the module is not registered.
    pub async fn start(&self, module: &str) -> Result<(), Error> {
        self.logger.info(&format!("Starting '{}'.", module));

        let result = self.try_start(module).await;
        if let Err(err) = &result {
            self.logger
                .error(&format!("Failed to start '{}': {}", module, err));
        }

        result
    }

    async fn try_start(&self, module: &str) -> Result<(), Error> {
        self.require_init()?;
        let working_dir = self.source.module_dir(module)?;
        let metadata = self.source.metadata(module)?;

        let script = metadata
            .start_script()
            .ok_or_else(|| invalid(module, "no start script in scripts.start"))?;
        let command =
            CommandLine::parse(script).ok_or_else(|| invalid(module, "start script is blank"))?;

        let mut entries = self.registry.lock().await;
        if entries.contains_key(module) {
            return Err(ErrorKind::AlreadyRunning(module.to_string()).into());
        }

        let child = match spawn::new_process(&command, &working_dir, StdIoConf::module()) {
            Ok(child) => child,
            Err(source) => {
                drop(entries);
                self.spawn_failed(module, source);
                return Ok(());
            }
        };

        let pid = match child.id() {
            Some(pid) => pid,
            None => return Err(format!("'{}' exited before it was registered", module).into()),
        };

        let (supervisor, handle) = Supervisor::new(
            module,
            pid,
            child,
            self.registry.clone(),
            self.events.clone(),
            Arc::clone(&self.logger),
        );
        entries.insert(module.to_string(), handle);
        drop(entries);

        self.logger
            .info(&format!("Started '{}' ({}): {}", module, pid, command));
        self.events.emit(LauncherEvent::Started {
            module: module.to_string(),
            pid,
        });

        // spawned after Started went out, so Exited can never overtake it
        tokio::spawn(supervisor.run());
        Ok(())
    }

    fn spawn_failed(&self, module: &str, source: std::io::Error) {
        let err = Error::from(ErrorKind::Spawn {
            module: module.to_string(),
            source,
        });

        self.logger.error(&err.to_string());
        self.events.emit(LauncherEvent::Errored {
            module: module.to_string(),
            error: Arc::new(err),
        });
    }

    /// Starts every module concurrently, one failure does not affect the others
    pub async fn start_all<I, N>(&self, modules: I) -> Vec<(String, Result<(), Error>)>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let starts = modules.into_iter().map(Into::into).map(|module: String| async move {
            let result = self.start(&module).await;
            (module, result)
        });

        join_all(starts).await
    }

    /// Signals the module's process, `SIGKILL` if `force` else `SIGTERM`, and waits for it to exit.
    ///
    /// There is no timeout: a process ignoring `SIGTERM` keeps this pending.
    pub async fn stop(&self, module: &str, force: bool) -> Result<ProcessExit, Error> {
        let handle = self
            .registry
            .get(module)
            .await
            .ok_or_else(|| ErrorKind::NotRunning(module.to_string()))?;

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        self.logger.info(&format!(
            "Stopping '{}' ({}){}",
            module,
            handle.pid(),
            if force { ", forced" } else { "" }
        ));

        handle.signal(signal).await?;
        handle.wait().await
    }

    /// Stops every running module concurrently
    pub async fn stop_all(&self, force: bool) -> Vec<(String, Result<ProcessExit, Error>)> {
        let mut modules: Vec<String> = self.registry.snapshot().await.into_keys().collect();
        modules.sort();

        let stops = modules.into_iter().map(|module| async move {
            let result = self.stop(&module, force).await;
            (module, result)
        });

        join_all(stops).await
    }

    /// A copy of the registry
    pub async fn running(&self) -> HashMap<String, ProcessHandle> {
        self.registry.snapshot().await
    }

    fn require_init(&self) -> Result<&Path, Error> {
        self.modules_dir
            .as_deref()
            .ok_or_else(|| ErrorKind::NotInitialized.into())
    }
}

fn invalid(module: &str, reason: &str) -> Error {
    ErrorKind::InvalidModule {
        module: module.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
