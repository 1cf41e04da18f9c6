// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Transports retrieve module source for a location
//!
//! A transport must support both modes the loader uses:
//!
//! - blocking: [`Transport::fetch_blocking`] stalls the caller until the
//!   response is available
//! - non-blocking: [`Transport::fetch`] is awaited on a runtime task; the
//!   loader aborts that task when a blocking caller takes over the location

mod file;
mod http;
mod memory;

pub use file::FileTransport;
pub use http::HttpTransport;
pub use memory::{MemoryTransport, RequestCount};

use async_trait::async_trait;
use std::collections::BTreeMap;
use url::Url;

/// Media type that marks a response as a JSON module
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Media type used for script modules
pub const SCRIPT_MEDIA_TYPE: &str = "application/javascript";

/// A transport response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: u16,
    /// Status text
    pub status_text: String,
    /// Headers, keyed by lowercase name
    pub headers: BTreeMap<String, String>,
    /// Body text
    pub body: String,
}

impl Response {
    /// Create a response with the given status and an empty body
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// `200 OK` with a script body
    pub fn script(body: impl Into<String>) -> Self {
        Self::new(200, "OK")
            .with_header("Content-Type", SCRIPT_MEDIA_TYPE)
            .with_body(body)
    }

    /// `200 OK` with a JSON body
    pub fn json(body: impl Into<String>) -> Self {
        Self::new(200, "OK")
            .with_header("Content-Type", JSON_MEDIA_TYPE)
            .with_body(body)
    }

    /// `404 Not Found`
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// Add a header (the name is stored lowercase)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The `Content-Type` header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether the body is a JSON document. Media type parameters such as
    /// `charset` are ignored.
    pub fn is_json(&self) -> bool {
        self.content_type()
            .and_then(|value| value.split(';').next())
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(JSON_MEDIA_TYPE))
    }

    /// Only `200` counts as success
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Retrieves raw module text for a location
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch on the caller's stack
    fn fetch_blocking(&self, url: &Url) -> anyhow::Result<Response>;

    /// Fetch without blocking. Dropping the future aborts the request.
    async fn fetch(&self, url: &Url) -> anyhow::Result<Response>;
}

/// Routes `file:` URLs to a [`FileTransport`] and everything else to an
/// [`HttpTransport`]
pub struct DefaultTransport {
    file: FileTransport,
    http: HttpTransport,
}

impl DefaultTransport {
    /// Create a transport with default HTTP settings
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            file: FileTransport::new(),
            http: HttpTransport::new()?,
        })
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    fn fetch_blocking(&self, url: &Url) -> anyhow::Result<Response> {
        match url.scheme() {
            "file" => self.file.fetch_blocking(url),
            _ => self.http.fetch_blocking(url),
        }
    }

    async fn fetch(&self, url: &Url) -> anyhow::Result<Response> {
        match url.scheme() {
            "file" => self.file.fetch(url).await,
            _ => self.http.fetch(url).await,
        }
    }
}
