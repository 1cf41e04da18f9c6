// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module body execution
//!
//! A [`Sandbox`] runs a module's source with the CommonJS bindings
//! (`exports`, `require`, `module`, `__filename`, `__dirname`). How it
//! isolates the code is up to the implementation.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{LoaderError, Result};
use crate::registry::{Exports, Module};
use crate::require::Require;

/// Bindings injected into a module body
#[derive(Clone)]
pub struct Bindings {
    /// The module's exports container
    pub exports: Exports,
    /// `require` bound to this module
    pub require: Require,
    /// The module record
    pub module: Arc<Module>,
    /// Canonical location
    pub filename: String,
    /// Directory of the canonical location
    pub dirname: String,
}

/// Executes module bodies
///
/// Errors from nested `require` calls should be returned unchanged so they
/// reach the original caller as-is.
pub trait Sandbox: Send + Sync {
    /// Run `source`, mutating `bindings.exports`
    fn run(&self, source: &str, bindings: Bindings) -> Result<()>;
}

/// Line-oriented interpreter for a small CommonJS subset
///
/// ```text
/// // comment
/// exports.name = <json>
/// exports.name = require("./other")
/// exports.name = __filename
/// module.exports = <json>
/// require("./side-effect")
/// throw <message>
/// ```
///
/// `require` in a value position stores a snapshot of the dependency's
/// exports as they are at that moment.
#[derive(Debug, Clone, Default)]
pub struct DirectiveSandbox;

impl DirectiveSandbox {
    /// Create a new sandbox
    pub fn new() -> Self {
        Self
    }
}

impl Sandbox for DirectiveSandbox {
    fn run(&self, source: &str, bindings: Bindings) -> Result<()> {
        for (index, line) in source.lines().enumerate() {
            let statement = line.trim().trim_end_matches(';').trim_end();
            if statement.is_empty() || statement.starts_with("//") {
                continue;
            }
            execute(statement, index + 1, &bindings)?;
        }
        Ok(())
    }
}

fn execute(statement: &str, line: usize, bindings: &Bindings) -> Result<()> {
    let fail = |message: String| LoaderError::execution(bindings.module.location(), message);

    if let Some(message) = statement.strip_prefix("throw ") {
        let message = message.trim();
        let message = serde_json::from_str::<String>(message).unwrap_or_else(|_| message.to_string());
        return Err(fail(message));
    }

    if let Some(id) = require_argument(statement) {
        bindings.require.require(&id)?;
        return Ok(());
    }

    let Some((target, expr)) = statement.split_once('=') else {
        return Err(fail(format!("line {line}: unsupported statement `{statement}`")));
    };
    let (target, expr) = (target.trim(), expr.trim());

    if target == "module.exports" {
        let value = evaluate(expr, line, bindings)?;
        bindings.exports.replace(value);
        return Ok(());
    }

    match target.strip_prefix("exports.") {
        Some(name) if is_identifier(name) => {
            let value = evaluate(expr, line, bindings)?;
            bindings.exports.set(name, value);
            Ok(())
        }
        _ => Err(fail(format!("line {line}: cannot assign to `{target}`"))),
    }
}

fn evaluate(expr: &str, line: usize, bindings: &Bindings) -> Result<Value> {
    if let Some(id) = require_argument(expr) {
        return Ok(bindings.require.require(&id)?.get());
    }
    match expr {
        "__filename" => Ok(Value::String(bindings.filename.clone())),
        "__dirname" => Ok(Value::String(bindings.dirname.clone())),
        _ => serde_json::from_str(expr).map_err(|e| {
            LoaderError::execution(
                bindings.module.location(),
                format!("line {line}: invalid value `{expr}`: {e}"),
            )
        }),
    }
}

/// `require("x")` / `require('x')` → `x`
fn require_argument(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix("require(")?.strip_suffix(')')?.trim();
    if let Ok(id) = serde_json::from_str::<String>(inner) {
        return Some(id);
    }
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(str::to_string)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
