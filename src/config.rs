// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Typed configuration for the launcher and the binary around it.
//!
//! Configuration is layered from several TOML files and `modrc_*` environment
//! variables, later layers overriding earlier ones table by table. Any string
//! value may reference environment variables as `${NAME}`; they are
//! substituted once all layers are merged, before deserialization.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

/// Application name, used for file names and the environment prefix
pub const APP_NAME: &str = "modrc";

/// Name of the per-user and per-directory configuration file
pub const RC_FILE: &str = ".modrc";

/// Environment variables starting with this set configuration keys, `__` separates tables
pub const ENV_PREFIX: &str = "modrc_";

/// Directory below the installation root holding the modules
pub const MODULES_DIR: &str = "node_modules";

/// Fully resolved configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub npm: NpmConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Tag attached to every log record emitted by the launcher
    #[serde(default = "LoggingConfig::default_prefix")]
    pub prefix: String,
    /// Level used when `RUST_LOG` is not set
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_prefix() -> String {
        "init".to_string()
    }

    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            prefix: Self::default_prefix(),
            level: Self::default_level(),
        }
    }
}

/// Package manager section, the only part of the configuration handed to a module source
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NpmConfig {
    /// Installation root, modules live in `<prefix>/node_modules`
    #[serde(default)]
    pub prefix: PathBuf,
    #[serde(default)]
    pub depth: u32,
    /// Options not interpreted here, passed through to the module source
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl NpmConfig {
    /// Sub-configuration handed to the module source.
    ///
    /// The serde defaults already fill `depth`, and `extra` carries the remaining top-level
    /// keys with nested tables as opaque values, so this is a plain copy.
    pub fn derive(&self) -> NpmConfig {
        self.clone()
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.prefix.join(MODULES_DIR)
    }
}

impl Config {
    /// Finds and loads the configuration.
    ///
    /// Layers, lowest priority first: every file from [`search_paths`], the explicit file
    /// (which must exist), then `modrc_*` environment variables. Nothing found means defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, Error> {
        let cwd = std::env::current_dir()?;

        let mut layers = Vec::new();
        for path in search_paths(&cwd, dirs::home_dir().as_deref()) {
            layers.push(read_table(&path)?);
        }
        if let Some(path) = explicit {
            layers.push(read_table(path)?);
        }

        // names or values that are not unicode can't be config keys
        let vars = std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)));
        layers.push(env_overrides(vars));

        Self::from_layers(layers, |key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let table = read_table(path)?;
        Self::from_layers(vec![table], |key| std::env::var(key).ok())
    }

    /// Parses TOML, resolving `${NAME}` references through `lookup`
    pub fn parse_with<F>(contents: &str, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let table: toml::Table = toml::from_str(contents)?;
        Self::from_layers(vec![table], lookup)
    }

    /// Merges `layers` in order, later ones winning, then resolves `${NAME}` references
    pub fn from_layers<I, F>(layers: I, lookup: F) -> Result<Self, Error>
    where
        I: IntoIterator<Item = toml::Table>,
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Table::new();
        for layer in layers {
            merge(&mut merged, layer);
        }

        let value = interpolate(toml::Value::Table(merged), &lookup)?;
        value
            .try_into::<Config>()
            .map_err(|e: toml::de::Error| ErrorKind::Config(e.to_string()).into())
    }

    /// Checks the fields the launcher cannot run without
    pub fn validate(&self) -> Result<(), Error> {
        if self.npm.prefix.as_os_str().is_empty() {
            return Err(ErrorKind::Config("npm.prefix is required".to_string()).into());
        }

        Ok(())
    }
}

/// Existing configuration files, lowest priority first.
///
/// `/etc/modrc`, `~/.modrc`, `~/.config/modrc`, then the nearest `.modrc` in `cwd` or one
/// of its parents. A file reachable by more than one rule is read once.
pub fn search_paths(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = vec![Path::new("/etc").join(format!("{}rc", APP_NAME))];
    if let Some(home) = home {
        candidates.push(home.join(RC_FILE));
        candidates.push(home.join(".config").join(APP_NAME));
    }
    if let Some(nearest) = cwd
        .ancestors()
        .map(|dir| dir.join(RC_FILE))
        .find(|path| path.is_file())
    {
        candidates.push(nearest);
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for path in candidates {
        if path.is_file() && !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Collects `modrc_<table>__<key>=value` variables into a table.
///
/// The prefix matches case-insensitively, keys keep their case. Values that read as a
/// boolean or an integer are typed as such, everything else stays a string.
pub fn env_overrides<I>(vars: I) -> toml::Table
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut table = toml::Table::new();

    'vars: for (name, value) in vars {
        let keys = match name.get(..ENV_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(ENV_PREFIX) => &name[ENV_PREFIX.len()..],
            _ => continue,
        };
        let keys: Vec<&str> = keys.split("__").filter(|key| !key.is_empty()).collect();
        let (last, parents) = match keys.split_last() {
            Some(split) => split,
            None => continue,
        };

        let mut cursor = &mut table;
        for key in parents {
            let entry = cursor
                .entry(key.to_string())
                .or_insert(toml::Value::Table(toml::Table::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::Table::new());
            }
            cursor = match entry.as_table_mut() {
                Some(table) => table,
                None => continue 'vars,
            };
        }

        cursor.insert(last.to_string(), env_value(value));
    }

    table
}

fn env_value(value: String) -> toml::Value {
    if let Ok(flag) = value.parse::<bool>() {
        return toml::Value::Boolean(flag);
    }
    if let Ok(number) = value.parse::<i64>() {
        return toml::Value::Integer(number);
    }
    toml::Value::String(value)
}

fn read_table(path: &Path) -> Result<toml::Table, Error> {
    let contents = fs::read_to_string(path).map_err(|e| {
        ErrorKind::Config(format!("could not read '{}': {}", path.display(), e))
    })?;

    toml::from_str(&contents).map_err(|e: toml::de::Error| {
        ErrorKind::Config(format!("could not parse '{}': {}", path.display(), e)).into()
    })
}

/// Overlays `layer` onto `base`, descending into tables present in both
fn merge(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge(existing, incoming);
                    continue;
                }
                base.insert(key, toml::Value::Table(incoming));
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Walks every table and array, replacing environment references in strings
fn interpolate<F>(value: toml::Value, lookup: &F) -> Result<toml::Value, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let value = match value {
        toml::Value::String(s) => toml::Value::String(env_replace(&s, lookup)?),
        toml::Value::Array(items) => toml::Value::Array(
            items
                .into_iter()
                .map(|item| interpolate(item, lookup))
                .collect::<Result<_, _>>()?,
        ),
        toml::Value::Table(table) => {
            let mut replaced = toml::Table::new();
            for (key, item) in table {
                replaced.insert(key, interpolate(item, lookup)?);
            }
            toml::Value::Table(replaced)
        }
        other => other,
    };

    Ok(value)
}

/// Replaces `${NAME}` with the value of `NAME`.
///
/// A reference preceded by an odd number of backslashes is escaped and kept as written,
/// backslashes included. An even number of backslashes is consumed with the reference.
pub fn env_replace<F>(input: &str, lookup: &F) -> Result<String, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let (before, reference) = rest.split_at(start);
        let end = match reference.find('}') {
            Some(end) => end,
            None => break,
        };

        out.push_str(before);
        let escapes = before.chars().rev().take_while(|c| *c == '\\').count();
        let key = &reference[2..end];

        if escapes % 2 == 1 || key.is_empty() {
            out.push_str(&reference[..=end]);
        } else {
            let value = lookup(key).ok_or_else(|| {
                ErrorKind::Config(format!("Failed to replace env in config: {}", key))
            })?;
            out.truncate(out.len() - escapes);
            out.push_str(&value);
        }

        rest = &reference[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(key: &str) -> Option<String> {
        match key {
            "HOME" => Some("/home/mod".to_string()),
            "LEVEL" => Some("debug".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse_with("", lookup).expect("empty config");

        assert_eq!(config.logging.prefix, "init");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.npm.depth, 0);
        assert!(config.npm.extra.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_with_env() {
        let config = Config::parse_with(
            r#"
            [logging]
            level = "${LEVEL}"

            [npm]
            prefix = "${HOME}/modules"
            registry = "https://registry.example.org"

            [npm.proxy]
            url = "http://${HOME}"
            "#,
            lookup,
        )
        .expect("config should parse");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.npm.prefix, PathBuf::from("/home/mod/modules"));
        assert_eq!(
            config.npm.modules_dir(),
            PathBuf::from("/home/mod/modules/node_modules")
        );
        assert_eq!(
            config.npm.extra["registry"].as_str(),
            Some("https://registry.example.org")
        );
        assert_eq!(
            config.npm.extra["proxy"]["url"].as_str(),
            Some("http:///home/mod")
        );
        config.validate().expect("prefix is set");
    }

    #[test]
    fn test_env_in_arrays() {
        let config = Config::parse_with(
            r#"
            [npm]
            prefix = "/srv"
            paths = ["${HOME}/a", "b"]
            "#,
            lookup,
        )
        .expect("config should parse");

        let paths = config.npm.extra["paths"].as_array().expect("array");
        assert_eq!(paths[0].as_str(), Some("/home/mod/a"));
        assert_eq!(paths[1].as_str(), Some("b"));
    }

    #[test]
    fn test_missing_env() {
        let err = Config::parse_with("[npm]\nprefix = \"${NOPE}\"", lookup).unwrap_err();

        match err.kind() {
            ErrorKind::Config(msg) => assert_eq!(msg, "Failed to replace env in config: NOPE"),
            kind => panic!("unexpected error: {:?}", kind),
        }
    }

    #[test]
    fn test_env_replace_escapes() {
        assert_eq!(env_replace(r"\${HOME}", &lookup).unwrap(), r"\${HOME}");
        assert_eq!(env_replace(r"\\${HOME}", &lookup).unwrap(), "/home/mod");
        assert_eq!(env_replace(r"\\\${HOME}", &lookup).unwrap(), r"\\\${HOME}");
        assert_eq!(env_replace(r"a\\\\${HOME}b", &lookup).unwrap(), "a/home/modb");
        assert_eq!(env_replace("${HOME", &lookup).unwrap(), "${HOME");
        assert_eq!(env_replace("a${}b", &lookup).unwrap(), "a${}b");
        assert_eq!(
            env_replace("${HOME}:${LEVEL}", &lookup).unwrap(),
            "/home/mod:debug"
        );
    }

    #[test]
    fn test_derive_is_shallow() {
        let config = Config::parse_with(
            r#"
            [npm]
            prefix = "/srv"
            depth = 2

            [npm.nested]
            depth = 9
            "#,
            lookup,
        )
        .unwrap();

        let derived = config.npm.derive();
        assert_eq!(derived.depth, 2);
        assert_eq!(derived.extra["nested"]["depth"].as_integer(), Some(9));
        assert_eq!(derived, config.npm);
    }

    fn table(contents: &str) -> toml::Table {
        toml::from_str(contents).expect("valid toml")
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_later_layers_win() {
        let system = table(
            r#"
            [logging]
            prefix = "system"
            level = "warn"

            [npm]
            prefix = "/usr/lib/mods"
            registry = "https://system.example.org"
            "#,
        );
        let user = table(
            r#"
            [logging]
            level = "debug"

            [npm]
            prefix = "${HOME}/mods"
            "#,
        );
        let project = table("[npm]\ndepth = 1");

        let config = Config::from_layers(vec![system, user, project], lookup).unwrap();

        assert_eq!(config.logging.prefix, "system");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.npm.prefix, PathBuf::from("/home/mod/mods"));
        assert_eq!(config.npm.depth, 1);
        assert_eq!(
            config.npm.extra["registry"].as_str(),
            Some("https://system.example.org")
        );
    }

    #[test]
    fn test_env_overrides() {
        let overrides = env_overrides(vars(&[
            ("modrc_npm__prefix", "/srv"),
            ("MODRC_npm__depth", "3"),
            ("modrc_npm__proxy__strict", "true"),
            ("modrc_logging__level", "${LEVEL}"),
            ("modrc___", "ignored"),
            ("modrcnpm__prefix", "ignored"),
            ("PATH", "/bin"),
        ]));

        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["npm"]["prefix"].as_str(), Some("/srv"));
        assert_eq!(overrides["npm"]["depth"].as_integer(), Some(3));
        assert_eq!(overrides["npm"]["proxy"]["strict"].as_bool(), Some(true));

        let file = table(
            r#"
            [npm]
            prefix = "/opt/mods"
            registry = "https://registry.example.org"
            "#,
        );
        let config = Config::from_layers(vec![file, overrides], lookup).unwrap();

        assert_eq!(config.npm.prefix, PathBuf::from("/srv"));
        assert_eq!(config.npm.depth, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.npm.extra["registry"].as_str(),
            Some("https://registry.example.org")
        );
    }

    #[test]
    fn test_env_override_replaces_scalar_with_table() {
        let overrides = env_overrides(vars(&[
            ("modrc_npm", "flat"),
            ("modrc_npm__prefix", "/srv"),
        ]));

        assert_eq!(overrides["npm"]["prefix"].as_str(), Some("/srv"));
    }

    #[test]
    fn test_search_paths() {
        let root = tempfile::tempdir().unwrap();
        let home = root.path().join("home");
        let project = root.path().join("project");
        let cwd = project.join("a").join("b");
        fs::create_dir_all(home.join(".config")).unwrap();
        fs::create_dir_all(&cwd).unwrap();

        fs::write(home.join(RC_FILE), "").unwrap();
        fs::write(home.join(".config").join(APP_NAME), "").unwrap();
        fs::write(project.join(RC_FILE), "").unwrap();
        // only the nearest one counts
        fs::write(root.path().join(RC_FILE), "").unwrap();

        let found: Vec<PathBuf> = search_paths(&cwd, Some(&home))
            .into_iter()
            .filter(|path| path.starts_with(root.path()))
            .collect();

        assert_eq!(
            found,
            vec![
                home.join(RC_FILE),
                home.join(".config").join(APP_NAME),
                project.join(RC_FILE),
            ]
        );
    }

    #[test]
    fn test_search_paths_reads_home_once() {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join(RC_FILE), "").unwrap();

        let found: Vec<PathBuf> = search_paths(home.path(), Some(home.path()))
            .into_iter()
            .filter(|path| path.starts_with(home.path()))
            .collect();

        assert_eq!(found, vec![home.path().join(RC_FILE)]);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/modrc.toml")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
    }
}
