// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! HTTP(S) transport backed by reqwest

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{Response, Transport};

const USER_AGENT: &str = concat!("orbit/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport for `http:` and `https:` locations
///
/// The blocking client is created on first blocking use. Blocking fetches
/// must not be issued from inside an async runtime context.
pub struct HttpTransport {
    client: reqwest::Client,
    blocking: Mutex<Option<reqwest::blocking::Client>>,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            blocking: Mutex::new(None),
        })
    }

    fn blocking_client(&self) -> anyhow::Result<reqwest::blocking::Client> {
        let mut slot = self.blocking.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self), fields(url = %url))]
    fn fetch_blocking(&self, url: &Url) -> anyhow::Result<Response> {
        debug!("GET (blocking)");
        let response = self.blocking_client()?.get(url.clone()).send()?;
        let status = response.status();
        let headers = collect_headers(response.headers());

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: response.text()?,
        })
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> anyhow::Result<Response> {
        debug!("GET");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let headers = collect_headers(response.headers());

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: response.text().await?,
        })
    }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
