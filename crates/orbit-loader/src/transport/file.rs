// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Local file transport for `file:` locations

use anyhow::anyhow;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use super::{JSON_MEDIA_TYPE, Response, SCRIPT_MEDIA_TYPE, Transport};

/// Serves `file:` URLs from disk. Missing files answer `404 Not Found`.
#[derive(Debug, Clone, Default)]
pub struct FileTransport;

impl FileTransport {
    /// Create a new file transport
    pub fn new() -> Self {
        Self
    }
}

fn file_path(url: &Url) -> anyhow::Result<PathBuf> {
    if url.scheme() != "file" {
        return Err(anyhow!("unsupported scheme '{}'", url.scheme()));
    }
    url.to_file_path()
        .map_err(|_| anyhow!("not a local file path: {url}"))
}

fn respond(path: &Path, read: std::io::Result<String>) -> anyhow::Result<Response> {
    match read {
        Ok(body) => {
            let media_type = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => JSON_MEDIA_TYPE,
                _ => SCRIPT_MEDIA_TYPE,
            };
            Ok(Response::new(200, "OK")
                .with_header("content-type", media_type)
                .with_body(body))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No such file {}", path.display());
            Ok(Response::not_found())
        }
        Err(e) => Err(anyhow!("{}: {}", path.display(), e)),
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn fetch_blocking(&self, url: &Url) -> anyhow::Result<Response> {
        let path = file_path(url)?;
        respond(&path, std::fs::read_to_string(&path))
    }

    async fn fetch(&self, url: &Url) -> anyhow::Result<Response> {
        let path = file_path(url)?;
        let read = tokio::fs::read_to_string(&path).await;
        respond(&path, read)
    }
}
