// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Identifier resolution
//!
//! Maps a module identifier to its canonical location:
//!
//! - `./x`, `../x` resolve against the requiring module's location
//!   (or the base location when there is no requiring module)
//! - `/x` and bare `x` resolve against the module root
//! - a missing extension becomes [`DEFAULT_EXTENSION`], unless the base
//!   name is empty (`dir/` stays a directory reference)

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::error::{LoaderError, Result};

/// Extension appended to identifiers that have a base name but no extension
pub const DEFAULT_EXTENSION: &str = ".js";

/// `[[.]dir/][name][.ext]`: the name may start with any character but
/// contains no further dots; the extension runs from the first dot after it.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((\.)?.*/|)(.[^.]*|)(\..*|)$").expect("identifier pattern"));

/// An identifier split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier<'a> {
    /// Directory prefix including the trailing slash, possibly empty
    pub dir: &'a str,
    /// Base name, possibly empty
    pub name: &'a str,
    /// Extension including the leading dot, possibly empty
    pub ext: &'a str,
    /// Whether the directory prefix starts with `.`
    pub relative: bool,
}

impl<'a> Identifier<'a> {
    /// Split an identifier.
    pub fn parse(identifier: &'a str) -> Result<Self> {
        let caps = IDENTIFIER.captures(identifier).ok_or_else(|| {
            LoaderError::malformed(identifier, "expected [[.]path/][name][.ext]")
        })?;
        let part = |i| caps.get(i).map_or("", |m| m.as_str());

        Ok(Self {
            dir: part(1),
            name: part(3),
            ext: part(4),
            relative: caps.get(2).is_some(),
        })
    }

    /// Relative URL reference with the default extension applied.
    pub fn reference(&self) -> String {
        if self.name.is_empty() {
            return self.dir.to_string();
        }
        let ext = if self.ext.is_empty() {
            DEFAULT_EXTENSION
        } else {
            self.ext
        };
        format!("{}{}{}", self.dir, self.name, ext)
    }
}

/// Resolve `identifier` to its canonical location.
///
/// `parent` is the location of the requiring module, `root` the module
/// root and `base` the host document location that `root` (and relative
/// identifiers without a parent) are interpreted against.
pub fn resolve(identifier: &str, parent: Option<&Url>, root: &str, base: &Url) -> Result<Url> {
    let parsed = Identifier::parse(identifier)?;

    let anchor = if parsed.relative {
        match parent {
            Some(location) => location.clone(),
            None => base.clone(),
        }
    } else {
        base.join(root)
            .map_err(|e| LoaderError::malformed(identifier, format!("module root '{root}': {e}")))?
    };

    anchor
        .join(&parsed.reference())
        .map_err(|e| LoaderError::malformed(identifier, e.to_string()))
}

/// Directory portion of a location, including the trailing slash.
pub fn dirname(location: &Url) -> String {
    let href = location.as_str();
    match href.rfind('/') {
        Some(idx) => href[..=idx].to_string(),
        None => href.to_string(),
    }
}
