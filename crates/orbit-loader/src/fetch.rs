// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Fetch coordination
//!
//! At most one transport request is outstanding per [`FetchKey`]. Every
//! request owns a [`Completion`]: a watch channel whose first published
//! outcome is the one all waiters see.
//!
//! - A non-blocking demand joins the existing request, or spawns a runtime
//!   task that performs the fetch and publishes the outcome.
//! - A blocking demand reuses a finished request, or drives the transport on
//!   its own stack. If a non-blocking request is still in flight, its task
//!   is aborted and the fetch is redone blocking; the outcome is published
//!   through the same completion, so the earlier waiters finish with it.
//! - A failed request is never reused. The next demand starts over.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{LoaderError, Result};
use crate::transport::{Response, Transport};

/// Outcome of one transport request
pub(crate) type FetchOutcome = Result<Arc<Response>>;

/// What the fetched source is for. The two purposes never share requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Full load: register and instantiate the module
    Load,
    /// Resolution only: confirm the location is fetchable
    Resolve,
}

/// Dedup key for in-flight requests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    /// Canonical location
    pub location: Url,
    /// Pipeline the request belongs to
    pub purpose: Purpose,
}

impl FetchKey {
    /// Key for a full load
    pub fn load(location: Url) -> Self {
        Self {
            location,
            purpose: Purpose::Load,
        }
    }

    /// Key for a resolution-only query
    pub fn resolve(location: Url) -> Self {
        Self {
            location,
            purpose: Purpose::Resolve,
        }
    }
}

/// Completion signal shared by everyone waiting on one request
pub(crate) struct Completion {
    location: Url,
    outcome: watch::Sender<Option<FetchOutcome>>,
}

impl Completion {
    fn new(location: Url) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self { location, outcome })
    }

    /// Outcome, if the request has finished
    fn outcome(&self) -> Option<FetchOutcome> {
        self.outcome.borrow().clone()
    }

    /// Publish `outcome` unless another one won the race. Returns the
    /// outcome every waiter sees.
    fn publish(&self, outcome: FetchOutcome) -> FetchOutcome {
        let mut winner = outcome;
        self.outcome.send_if_modified(|slot| match slot {
            Some(existing) => {
                winner = existing.clone();
                false
            }
            None => {
                *slot = Some(winner.clone());
                true
            }
        });
        winner
    }

    /// Wait for the outcome
    pub(crate) async fn wait(&self) -> FetchOutcome {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(LoaderError::FetchFailed {
                location: self.location.clone(),
                status: None,
                status_text: "request dropped".to_string(),
            })
        })
    }
}

enum RequestMode {
    /// Driven on a caller's stack
    Blocking,
    /// Driven by a runtime task
    NonBlocking(AbortHandle),
}

struct FetchRecord {
    completion: Arc<Completion>,
    mode: RequestMode,
}

enum Step {
    Done(Arc<Response>),
    Drive(Arc<Completion>),
    Wait(Arc<Completion>),
}

/// Deduplicates transport requests per (location, purpose)
pub(crate) struct FetchCoordinator {
    transport: Arc<dyn Transport>,
    requests: Mutex<HashMap<FetchKey, FetchRecord>>,
}

impl FetchCoordinator {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `key` on the caller's stack.
    #[instrument(level = "debug", skip_all, fields(location = %key.location, purpose = ?key.purpose))]
    pub(crate) fn acquire_blocking(&self, key: &FetchKey) -> FetchOutcome {
        let step = {
            let mut requests = self.requests.lock();
            let existing = requests.get_mut(key).and_then(take_over);
            match existing {
                Some(step) => step,
                None => {
                    debug!("Issuing blocking request");
                    let completion = Completion::new(key.location.clone());
                    requests.insert(
                        key.clone(),
                        FetchRecord {
                            completion: completion.clone(),
                            mode: RequestMode::Blocking,
                        },
                    );
                    Step::Drive(completion)
                }
            }
        };

        match step {
            Step::Done(response) => Ok(response),
            Step::Drive(completion) => {
                let result = self.transport.fetch_blocking(&key.location);
                completion.publish(check_response(&key.location, result))
            }
            Step::Wait(completion) => futures::executor::block_on(completion.wait()),
        }
    }

    /// Register interest in `key` without blocking. The request is issued
    /// (or joined) before this returns; await [`Completion::wait`] for the
    /// outcome.
    #[instrument(level = "debug", skip_all, fields(location = %key.location, purpose = ?key.purpose))]
    pub(crate) fn acquire(&self, key: &FetchKey) -> Result<Arc<Completion>> {
        let mut requests = self.requests.lock();

        if let Some(record) = requests.get(key) {
            if !matches!(record.completion.outcome(), Some(Err(_))) {
                debug!("Joining existing request");
                return Ok(record.completion.clone());
            }
        }

        let runtime = Handle::try_current().map_err(|e| {
            LoaderError::Runtime(format!("non-blocking fetch of {} needs a runtime: {e}", key.location))
        })?;

        debug!("Issuing non-blocking request");
        let completion = Completion::new(key.location.clone());
        let task = {
            let transport = self.transport.clone();
            let completion = completion.clone();
            let location = key.location.clone();
            runtime.spawn(async move {
                let result = transport.fetch(&location).await;
                let _ = completion.publish(check_response(&location, result));
            })
        };

        requests.insert(
            key.clone(),
            FetchRecord {
                completion: completion.clone(),
                mode: RequestMode::NonBlocking(task.abort_handle()),
            },
        );
        Ok(completion)
    }

    /// Abort outstanding requests and forget all records. Waiters on an
    /// aborted request observe a fetch failure with no status.
    pub(crate) fn clear(&self) {
        for (key, record) in self.requests.lock().drain() {
            if let RequestMode::NonBlocking(handle) = record.mode {
                let _ = record.completion.publish(Err(LoaderError::FetchFailed {
                    location: key.location,
                    status: None,
                    status_text: "request aborted".to_string(),
                }));
                handle.abort();
            }
        }
    }
}

/// Decide what a blocking caller does with an existing record. `None`
/// means the record failed and must be replaced.
fn take_over(record: &mut FetchRecord) -> Option<Step> {
    match record.completion.outcome() {
        Some(Ok(response)) => {
            debug!("Reusing completed request");
            Some(Step::Done(response))
        }
        Some(Err(_)) => None,
        None => match mem::replace(&mut record.mode, RequestMode::Blocking) {
            RequestMode::NonBlocking(handle) => {
                debug!("Aborting non-blocking request, reissuing as blocking");
                handle.abort();
                Some(Step::Drive(record.completion.clone()))
            }
            RequestMode::Blocking => Some(Step::Wait(record.completion.clone())),
        },
    }
}

fn check_response(location: &Url, result: anyhow::Result<Response>) -> FetchOutcome {
    match result {
        Ok(response) if response.is_success() => Ok(Arc::new(response)),
        Ok(response) => {
            warn!("Fetch of {} failed: {} {}", location, response.status, response.status_text);
            Err(LoaderError::FetchFailed {
                location: location.clone(),
                status: Some(response.status),
                status_text: response.status_text,
            })
        }
        Err(fault) => {
            warn!("Fetch of {} failed: {:#}", location, fault);
            Err(LoaderError::transport(location, &fault))
        }
    }
}
