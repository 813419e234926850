// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("could not create module directory '{}': {source}", path.display())]
    Filesystem { path: PathBuf, source: io::Error },
    #[error("module source failed: {0}")]
    ModuleSource(String),
    #[error("module '{0}' not found")]
    ModuleNotFound(String),
    #[error("module '{module}' is invalid: {reason}")]
    InvalidModule { module: String, reason: String },
    #[error("module '{0}' is not running")]
    NotRunning(String),
    #[error("module '{0}' is already running")]
    AlreadyRunning(String),
    #[error("launcher is not initialized, run init() first")]
    NotInitialized,
    #[error("failed to spawn module '{module}': {source}")]
    Spawn { module: String, source: io::Error },
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("nix error: {0}")]
    NixError(#[from] nix::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}
