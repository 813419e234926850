// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::config::NpmConfig;
use crate::error::ErrorKind;
use crate::manifest::ModuleMetadata;
use crate::Error;

/// Where modules come from.
///
/// The launcher only ever lists names and reads metadata; installing modules is someone else's job.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Prepare the source, called once by `Launcher::init`
    async fn init(&mut self, config: &NpmConfig) -> Result<(), Error>;

    /// Names of all modules currently installed
    async fn list(&self) -> Result<Vec<String>, Error>;

    /// Directory a module lives in and is run from
    fn module_dir(&self, module: &str) -> Result<PathBuf, Error>;

    /// Reads the module's metadata, never cached
    fn metadata(&self, module: &str) -> Result<ModuleMetadata, Error> {
        let dir = self.module_dir(module)?;
        ModuleMetadata::from_dir(module, &dir)
    }
}

/// Scans `<prefix>/node_modules` for module directories.
///
/// Rules:
///  - hidden entries, like `.bin`, are not modules
///  - `@scope` directories contain modules named `@scope/<name>`
///  - symlinked module directories are followed
#[derive(Debug, Default)]
pub struct DirectorySource {
    root: Option<PathBuf>,
}

impl DirectorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn require_root(&self) -> Result<&Path, Error> {
        self.root
            .as_deref()
            .ok_or_else(|| ErrorKind::NotInitialized.into())
    }
}

#[async_trait]
impl ModuleSource for DirectorySource {
    async fn init(&mut self, config: &NpmConfig) -> Result<(), Error> {
        let root = config.modules_dir();
        let meta = fs::metadata(&root).await.map_err(|e| {
            ErrorKind::ModuleSource(format!("cannot read '{}': {}", root.display(), e))
        })?;

        if !meta.is_dir() {
            return Err(ErrorKind::ModuleSource(format!(
                "'{}' is not a directory",
                root.display()
            ))
            .into());
        }

        self.root = Some(root);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let root = self.require_root()?;
        let mut modules = Vec::new();

        for name in read_dir_names(root).await? {
            if name.starts_with('@') {
                for scoped in read_dir_names(&root.join(&name)).await? {
                    modules.push(format!("{}/{}", name, scoped));
                }
            } else {
                modules.push(name);
            }
        }

        modules.sort();
        Ok(modules)
    }

    fn module_dir(&self, module: &str) -> Result<PathBuf, Error> {
        let root = self.require_root()?;

        // only plain path segments, nothing may point outside of the root
        let relative = Path::new(module);
        let valid = !module.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(ErrorKind::ModuleNotFound(module.to_string()).into());
        }

        let dir = root.join(relative);
        if !dir.is_dir() {
            return Err(ErrorKind::ModuleNotFound(module.to_string()).into());
        }

        Ok(dir)
    }
}

/// Visible subdirectories of `dir`
async fn read_dir_names(dir: &Path) -> Result<Vec<String>, Error> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        // metadata follows symlinks, `npm link` installs modules that way
        match fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_dir() => names.push(name),
            _ => continue,
        }
    }

    Ok(names)
}
