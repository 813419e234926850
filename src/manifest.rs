// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Module metadata, read from each module's `package.json`.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::Error;

/// File name of a module manifest inside the module directory
pub const MANIFEST_FILE: &str = "package.json";

/// The parts of a manifest the launcher looks at; everything else is kept in `other`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ModuleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Left untyped, a malformed `scripts` section only matters once the module is started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ModuleMetadata {
    /// Reads the manifest of the module `module` located in `dir`
    pub fn from_dir(module: &str, dir: &Path) -> Result<Self, Error> {
        let path = dir.join(MANIFEST_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ErrorKind::ModuleNotFound(module.to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };

        Self::from_json(module, &contents)
    }

    pub fn from_json(module: &str, contents: &str) -> Result<Self, Error> {
        serde_json::from_str(contents).map_err(|e| {
            ErrorKind::InvalidModule {
                module: module.to_string(),
                reason: format!("unreadable {}: {}", MANIFEST_FILE, e),
            }
            .into()
        })
    }

    /// The `scripts.start` command, if it is declared as a string
    pub fn start_script(&self) -> Option<&str> {
        self.scripts.as_ref()?.as_object()?.get("start")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_script() {
        let meta = ModuleMetadata::from_json(
            "demo",
            r#"{"name": "demo", "version": "1.0.0", "scripts": {"start": "node index.js"}, "main": "index.js"}"#,
        )
        .unwrap();

        assert_eq!(meta.name.as_deref(), Some("demo"));
        assert_eq!(meta.start_script(), Some("node index.js"));
        assert_eq!(meta.other["main"], "index.js");
    }

    #[test]
    fn test_missing_or_malformed_start() {
        let cases = [
            r#"{"name": "demo"}"#,
            r#"{"scripts": "node index.js"}"#,
            r#"{"scripts": {"test": "true"}}"#,
            r#"{"scripts": {"start": ["node", "index.js"]}}"#,
        ];

        for case in cases.iter() {
            let meta = ModuleMetadata::from_json("demo", case).unwrap();
            assert_eq!(meta.start_script(), None, "{}", case);
        }
    }

    #[test]
    fn test_bad_json() {
        let err = ModuleMetadata::from_json("demo", "{ not json").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidModule { module, .. } if module == "demo"
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModuleMetadata::from_dir("demo", dir.path()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ModuleNotFound(name) if name == "demo"));
    }
}
