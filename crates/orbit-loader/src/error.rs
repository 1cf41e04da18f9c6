// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use thiserror::Error;
use url::Url;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, fetching or instantiating a module
///
/// Errors are `Clone` because a single failed fetch is observed by every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Identifier could not be split into directory, base name and extension,
    /// or the reconstructed path is not a valid URL reference
    #[error("Malformed module identifier '{identifier}': {reason}")]
    MalformedIdentifier {
        /// The identifier as supplied by the caller
        identifier: String,
        /// Reason for failure
        reason: String,
    },

    /// Transport answered with a non-success status, or failed outright
    /// (`status` is `None` for transport-level faults and aborts)
    #[error("{location} {}", fetch_summary(.status, .status_text))]
    FetchFailed {
        /// Canonical location that was requested
        location: Url,
        /// HTTP-like status code, if a response arrived
        status: Option<u16>,
        /// Status text or transport fault description
        status_text: String,
    },

    /// The module body raised while executing
    #[error("Error executing module {location}: {message}")]
    Execution {
        /// Module location
        location: Url,
        /// Message raised by the sandbox
        message: String,
    },

    /// A JSON module did not contain valid JSON
    #[error("Invalid JSON module {location}: {message}")]
    InvalidJson {
        /// Module location
        location: Url,
        /// Parser message
        message: String,
    },

    /// A non-blocking load was requested outside of an async runtime
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// Create a malformed identifier error
    pub fn malformed(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution error for the module at `location`
    pub fn execution(location: &Url, message: impl Into<String>) -> Self {
        Self::Execution {
            location: location.clone(),
            message: message.into(),
        }
    }

    /// Create a fetch failure for a transport-level fault (no status)
    pub fn transport(location: &Url, fault: &anyhow::Error) -> Self {
        Self::FetchFailed {
            location: location.clone(),
            status: None,
            status_text: format!("{fault:#}"),
        }
    }

    /// Status code carried by a fetch failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::FetchFailed { status, .. } => *status,
            _ => None,
        }
    }
}

fn fetch_summary(status: &Option<u16>, status_text: &str) -> String {
    match status {
        Some(code) => format!("{code} {status_text}"),
        None => status_text.to_string(),
    }
}
