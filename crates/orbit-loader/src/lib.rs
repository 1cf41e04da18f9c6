// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # orbit-loader
//!
//! A CommonJS-style module loader for code fetched over a network.
//!
//! - Identifiers resolve to canonical URLs against a configurable module root
//!   or the requiring module's location
//! - Each location is fetched once per purpose and executed at most once;
//!   every `require` of it sees the same exports
//! - `require` blocks, `require_async` returns a shared [`Continuation`].
//!   A blocking demand takes over a non-blocking fetch still in flight
//! - Circular requires observe the partially built exports
//! - JSON modules (`application/json`) become their parsed value
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orbit_loader::{DefaultTransport, DirectiveSandbox, Loader, LoaderConfig};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let loader = Loader::new(
//!         LoaderConfig::load()?,
//!         Arc::new(DefaultTransport::new()?),
//!         Arc::new(DirectiveSandbox::new()),
//!     );
//!     let exports = loader.require().require("lodash")?;
//!     println!("{}", exports.get());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
mod fetch;
mod instantiate;
pub mod registry;
pub mod require;
pub mod resolver;
pub mod sandbox;
pub mod transport;

// Re-exports
pub use config::LoaderConfig;
pub use error::{LoaderError, Result};
pub use registry::{CacheView, Exports, Module, ModuleRegistry, ModuleStatus};
pub use require::{Continuation, Loader, Require};
pub use sandbox::{Bindings, DirectiveSandbox, Sandbox};
pub use transport::{DefaultTransport, FileTransport, HttpTransport, MemoryTransport, Response, Transport};

/// Version of the orbit loader
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
