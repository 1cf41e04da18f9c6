// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Turns fetched source into module exports

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::error::{LoaderError, Result};
use crate::registry::{Exports, Module, ModuleStatus, Registration};
use crate::require::{LoaderShared, Require};
use crate::sandbox::Bindings;
use crate::transport::Response;

/// Instantiate the module at `location` from `response`, on behalf of
/// `parent`.
///
/// A live record for the location short-circuits: its exports are returned
/// without running anything. While that record is still evaluating (a
/// cycle), those exports are the partially built ones.
///
/// Otherwise the record is registered before the body runs, so requires
/// that cycle back to it find it.
pub(crate) fn instantiate(
    shared: &Arc<LoaderShared>,
    location: &Url,
    parent: Option<&Arc<Module>>,
    response: &Response,
) -> Result<Exports> {
    let module = Arc::new(Module::new(location.clone(), parent));
    let module = match shared.registry.register(module) {
        Registration::Existing(existing) => {
            debug!("Module {} already registered ({:?})", location, existing.status());
            return Ok(existing.exports());
        }
        Registration::Fresh(module) => module,
    };

    if let Some(parent) = parent {
        parent.add_child(module.clone());
    }

    let result = if response.is_json() {
        serde_json::from_str(&response.body)
            .map(|value| module.exports().replace(value))
            .map_err(|e| LoaderError::InvalidJson {
                location: location.clone(),
                message: e.to_string(),
            })
    } else {
        let bindings = Bindings {
            exports: module.exports(),
            require: Require::for_module(shared.clone(), module.clone()),
            module: module.clone(),
            filename: module.filename().to_string(),
            dirname: module.dirname().to_string(),
        };
        shared.sandbox.run(&response.body, bindings)
    };

    match result {
        Ok(()) => {
            module.set_status(ModuleStatus::Loaded);
            debug!("Loaded module {}", location);
            Ok(module.exports())
        }
        Err(e) => {
            module.set_status(ModuleStatus::Failed);
            warn!("Module {} failed: {}", location, e);
            Err(e)
        }
    }
}
