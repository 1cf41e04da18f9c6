// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! In-memory transport for tests and embedders that ship module sources
//! with the host

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tokio::sync::watch;
use url::Url;

use super::{Response, Transport};

/// Requests issued for one URL
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestCount {
    /// Blocking requests
    pub blocking: usize,
    /// Non-blocking requests (including ones that were later aborted)
    pub non_blocking: usize,
}

impl RequestCount {
    /// Requests of both kinds
    pub fn total(&self) -> usize {
        self.blocking + self.non_blocking
    }
}

#[derive(Debug, Clone)]
enum Route {
    Respond(Response),
    Fault(String),
}

/// URL → response table. Unknown URLs answer `404 Not Found`.
///
/// [`hold`](MemoryTransport::hold) parks non-blocking requests until
/// [`release`](MemoryTransport::release), which keeps them in flight for as
/// long as a test needs.
pub struct MemoryTransport {
    routes: RwLock<HashMap<String, Route>>,
    counts: Mutex<HashMap<String, RequestCount>>,
    held: watch::Sender<bool>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            routes: RwLock::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
            held,
        }
    }

    /// Serve `response` for `url`
    pub fn insert(&self, url: &str, response: Response) {
        self.routes.write().insert(key(url), Route::Respond(response));
    }

    /// Serve a script module
    pub fn module(&self, url: &str, source: &str) {
        self.insert(url, Response::script(source));
    }

    /// Serve a JSON module
    pub fn json(&self, url: &str, body: &str) {
        self.insert(url, Response::json(body));
    }

    /// Fail requests for `url` at the transport level
    pub fn fault(&self, url: &str, message: &str) {
        self.routes
            .write()
            .insert(key(url), Route::Fault(message.to_string()));
    }

    /// Stop serving `url`
    pub fn remove(&self, url: &str) {
        self.routes.write().remove(&key(url));
    }

    /// Park non-blocking requests until [`release`](Self::release)
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Let parked requests complete
    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Requests issued so far for `url`
    pub fn requests(&self, url: &str) -> RequestCount {
        self.counts.lock().get(&key(url)).copied().unwrap_or_default()
    }

    fn record(&self, url: &Url, blocking: bool) {
        let mut counts = self.counts.lock();
        let count = counts.entry(url.to_string()).or_default();
        if blocking {
            count.blocking += 1;
        } else {
            count.non_blocking += 1;
        }
    }

    fn respond(&self, url: &Url) -> anyhow::Result<Response> {
        match self.routes.read().get(url.as_str()) {
            Some(Route::Respond(response)) => Ok(response.clone()),
            Some(Route::Fault(message)) => Err(anyhow!("{message}")),
            None => Ok(Response::not_found()),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn fetch_blocking(&self, url: &Url) -> anyhow::Result<Response> {
        self.record(url, true);
        self.respond(url)
    }

    async fn fetch(&self, url: &Url) -> anyhow::Result<Response> {
        self.record(url, false);
        let mut held = self.held.subscribe();
        held.wait_for(|held| !*held)
            .await
            .map_err(|_| anyhow!("transport dropped"))?;
        self.respond(url)
    }
}

/// Normalise a URL string the way [`Url`] serialises it
fn key(url: &str) -> String {
    Url::parse(url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| url.to_string())
}
