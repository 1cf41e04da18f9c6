// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration
//!
//! Settings are layered: built-in defaults, then an optional `orbit.toml`,
//! then `ORBIT_*` environment variables. Callers (the CLI) apply their own
//! overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{LoaderError, Result};

/// Default module root, relative to the base location
pub const DEFAULT_ROOT: &str = "./node_modules/";

/// Name of the project-level config file
pub const CONFIG_FILE: &str = "orbit.toml";

/// Environment variable overriding [`LoaderConfig::base`]
pub const ENV_BASE: &str = "ORBIT_BASE";

/// Environment variable overriding [`LoaderConfig::root`]
pub const ENV_ROOT: &str = "ORBIT_ROOT";

/// Configuration for a [`Loader`](crate::Loader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Location of the host document. The module root and context-less
    /// relative identifiers resolve against it.
    pub base: Url,

    /// Module root for bare identifiers. May be absolute or relative to `base`.
    pub root: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            root: DEFAULT_ROOT.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Create a configuration with an explicit base location and the default root.
    pub fn with_base(base: Url) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Set the module root.
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Load configuration from `orbit.toml` in the working directory (if
    /// present) and the environment.
    pub fn load() -> Result<Self> {
        let mut config = match project_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.merge_env(std::env::vars())?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| LoaderError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `ORBIT_BASE` / `ORBIT_ROOT` from the given variables.
    pub fn merge_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                ENV_BASE => {
                    self.base = Url::parse(&value)
                        .map_err(|e| LoaderError::Config(format!("{ENV_BASE}={value}: {e}")))?;
                }
                ENV_ROOT => self.root = value,
                _ => {}
            }
        }
        Ok(())
    }
}

/// `file://` URL of the current working directory, with a trailing slash.
fn default_base() -> Url {
    std::env::current_dir()
        .ok()
        .and_then(|dir| Url::from_directory_path(dir).ok())
        .unwrap_or_else(|| Url::parse("file:///").expect("static URL is valid"))
}

fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir().ok().map(|dir| dir.join(CONFIG_FILE))
}
