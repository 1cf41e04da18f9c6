// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! End-to-end loader behavior over an in-memory transport

use orbit_loader::{
    Bindings, DirectiveSandbox, FileTransport, Loader, LoaderConfig, LoaderError, MemoryTransport,
    ModuleStatus, Result, Sandbox,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

const BASE: &str = "https://host/app/";
const ROOT: &str = "https://host/mods/";

/// Counts executions per location, then delegates to [`DirectiveSandbox`]
#[derive(Default)]
struct CountingSandbox {
    runs: Mutex<HashMap<String, usize>>,
}

impl CountingSandbox {
    fn runs(&self, location: &str) -> usize {
        self.runs.lock().get(location).copied().unwrap_or(0)
    }
}

impl Sandbox for CountingSandbox {
    fn run(&self, source: &str, bindings: Bindings) -> Result<()> {
        *self.runs.lock().entry(bindings.filename.clone()).or_default() += 1;
        DirectiveSandbox::new().run(source, bindings)
    }
}

type Hook = Box<dyn FnOnce(&Bindings) + Send>;

/// Runs a hook and then fails on its first execution; later executions
/// behave like [`DirectiveSandbox`]
#[derive(Default)]
struct FailOnceSandbox {
    hook: Mutex<Option<Hook>>,
    runs: AtomicUsize,
}

impl FailOnceSandbox {
    fn on_first_run(&self, hook: impl FnOnce(&Bindings) + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Sandbox for FailOnceSandbox {
    fn run(&self, source: &str, bindings: Bindings) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().take();
        match hook {
            Some(hook) => {
                hook(&bindings);
                Err(LoaderError::execution(bindings.module.location(), "first run fails"))
            }
            None => DirectiveSandbox::new().run(source, bindings),
        }
    }
}

fn loader_with(sandbox: Arc<dyn Sandbox>) -> (Arc<MemoryTransport>, Loader) {
    let transport = Arc::new(MemoryTransport::new());
    let config = LoaderConfig::with_base(Url::parse(BASE).unwrap()).root(ROOT);
    let loader = Loader::new(config, transport.clone(), sandbox);
    (transport, loader)
}

struct Harness {
    transport: Arc<MemoryTransport>,
    sandbox: Arc<CountingSandbox>,
    loader: Loader,
}

fn harness() -> Harness {
    let transport = Arc::new(MemoryTransport::new());
    let sandbox = Arc::new(CountingSandbox::default());
    let config = LoaderConfig::with_base(Url::parse(BASE).unwrap()).root(ROOT);
    let loader = Loader::new(config, transport.clone(), sandbox.clone());
    Harness {
        transport,
        sandbox,
        loader,
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[test]
fn test_identifiers_share_one_record() {
    let h = harness();
    h.transport
        .module("https://host/mods/foo.js", "exports.name = \"foo\"");

    let require = h.loader.require();
    let bare = require.require("foo").unwrap();
    let explicit = require.require("foo.js").unwrap();
    let absolute = require.require("https://host/mods/foo.js").unwrap();

    assert!(bare.ptr_eq(&explicit));
    assert!(bare.ptr_eq(&absolute));
    assert_eq!(bare.get(), json!({ "name": "foo" }));
    assert_eq!(h.transport.requests("https://host/mods/foo.js").total(), 1);
    assert_eq!(h.sandbox.runs("https://host/mods/foo.js"), 1);
}

#[test]
fn test_relative_root_resolves_against_base() {
    let h = harness();
    h.loader.set_root("./node_modules/");
    h.transport
        .module("https://host/app/node_modules/pkg.js", "exports.ok = true");

    let exports = h.loader.require().require("pkg").unwrap();
    assert_eq!(exports.get(), json!({ "ok": true }));
}

#[test]
fn test_circular_require_sees_partial_exports() {
    let h = harness();
    h.transport.module(
        "https://host/mods/a.js",
        "exports.early = 1\nexports.b = require(\"./b\")\nexports.late = 2",
    );
    h.transport.module(
        "https://host/mods/b.js",
        "exports.a = require(\"./a\")\nexports.done = true",
    );

    let a = h.loader.require().require("a").unwrap();
    assert_eq!(
        a.get(),
        json!({
            "early": 1,
            "b": { "a": { "early": 1 }, "done": true },
            "late": 2
        })
    );
    assert_eq!(h.sandbox.runs("https://host/mods/a.js"), 1);
    assert_eq!(h.sandbox.runs("https://host/mods/b.js"), 1);
}

#[test]
fn test_child_resolves_relative_to_its_own_location() {
    let h = harness();
    h.transport.module(
        "https://host/mods/lib/index.js",
        "exports.util = require(\"./util\")\nexports.shared = require(\"../shared/x\")",
    );
    h.transport
        .module("https://host/mods/lib/util.js", "module.exports = \"util\"");
    h.transport
        .module("https://host/mods/shared/x.js", "module.exports = 42");

    let exports = h.loader.require().require("lib/index").unwrap();
    assert_eq!(exports.get(), json!({ "util": "util", "shared": 42 }));
}

#[test]
fn test_parent_and_children() {
    let h = harness();
    h.transport
        .module("https://host/mods/main.js", "require(\"./dep\")");
    h.transport.module("https://host/mods/dep.js", "exports.x = 1");

    h.loader.require().require("main").unwrap();

    let cache = h.loader.cache();
    let main = cache.get(&url("https://host/mods/main.js")).unwrap();
    let dep = cache.get(&url("https://host/mods/dep.js")).unwrap();

    assert!(main.parent().is_none());
    assert!(Arc::ptr_eq(&dep.parent().unwrap(), &main));
    assert_eq!(main.children().len(), 1);
    assert!(Arc::ptr_eq(&main.children()[0], &dep));
    assert_eq!(dep.id(), "/mods/dep.js");
    assert_eq!(dep.dirname(), "https://host/mods/");
    assert!(main.is_loaded() && dep.is_loaded());
}

#[test]
fn test_module_bindings() {
    let h = harness();
    h.transport.module(
        "https://host/mods/where.js",
        "exports.file = __filename\nexports.dir = __dirname",
    );

    let exports = h.loader.require().require("where").unwrap();
    assert_eq!(
        exports.get(),
        json!({
            "file": "https://host/mods/where.js",
            "dir": "https://host/mods/"
        })
    );
}

#[test]
fn test_fetch_failure_is_not_cached() {
    let h = harness();
    let require = h.loader.require();

    let err = require.require("late").unwrap_err();
    assert!(matches!(err, LoaderError::FetchFailed { status: Some(404), .. }));
    assert_eq!(err.to_string(), "https://host/mods/late.js 404 Not Found");
    assert!(h.loader.cache().is_empty());

    h.transport.module("https://host/mods/late.js", "exports.v = 1");
    let exports = require.require("late").unwrap();
    assert_eq!(exports.get(), json!({ "v": 1 }));
    assert_eq!(h.transport.requests("https://host/mods/late.js").blocking, 2);
}

#[test]
fn test_nested_fetch_failure_reaches_caller() {
    let h = harness();
    h.transport
        .module("https://host/mods/outer.js", "exports.inner = require(\"./missing\")");

    let err = h.loader.require().require("outer").unwrap_err();
    match err {
        LoaderError::FetchFailed { location, status, .. } => {
            assert_eq!(location.as_str(), "https://host/mods/missing.js");
            assert_eq!(status, Some(404));
        }
        other => panic!("unexpected error: {other}"),
    }

    let outer = h.loader.cache().get(&url("https://host/mods/outer.js")).unwrap();
    assert_eq!(outer.status(), ModuleStatus::Failed);
}

#[test]
fn test_clear_cache_refetches_failed_module() {
    let h = harness();
    h.transport
        .module("https://host/mods/flaky.js", "throw \"not yet\"");

    let require = h.loader.require();
    let err = require.require("flaky").unwrap_err();
    assert!(matches!(err, LoaderError::Execution { ref message, .. } if message == "not yet"));

    h.transport
        .module("https://host/mods/flaky.js", "exports.ready = true");
    h.loader.clear_cache();
    let exports = require.require("flaky").unwrap();
    assert_eq!(exports.get(), json!({ "ready": true }));
    assert_eq!(h.sandbox.runs("https://host/mods/flaky.js"), 2);
}

#[test]
fn test_failed_record_reuses_fetched_source() {
    let h = harness();
    h.transport
        .module("https://host/mods/dep-first.js", "exports.v = require(\"./gate\")");

    let require = h.loader.require();
    assert!(require.require("dep-first").is_err());

    h.transport.module("https://host/mods/gate.js", "module.exports = 7");
    let exports = require.require("dep-first").unwrap();
    assert_eq!(exports.get(), json!({ "v": 7 }));
    assert_eq!(h.sandbox.runs("https://host/mods/dep-first.js"), 2);
    assert_eq!(h.transport.requests("https://host/mods/dep-first.js").total(), 1);
}

#[test]
fn test_json_module() {
    let h = harness();
    h.transport
        .json("https://host/mods/data.json", r#"{"items": [1, 2, 3]}"#);

    let exports = h.loader.require().require("data.json").unwrap();
    assert_eq!(exports.get(), json!({ "items": [1, 2, 3] }));
    assert_eq!(h.sandbox.runs("https://host/mods/data.json"), 0);
}

#[test]
fn test_invalid_json_module() {
    let h = harness();
    h.transport.json("https://host/mods/bad.json", "{ nope");

    let err = h.loader.require().require("bad.json").unwrap_err();
    assert!(matches!(err, LoaderError::InvalidJson { .. }));
}

#[test]
fn test_resolve_does_not_register() {
    let h = harness();
    h.transport.module("https://host/mods/r.js", "exports.r = 1");

    let location = h.loader.require().resolve("r").unwrap();
    assert_eq!(location.as_str(), "https://host/mods/r.js");
    assert!(h.loader.cache().is_empty());
    assert_eq!(h.sandbox.runs("https://host/mods/r.js"), 0);

    let err = h.loader.require().resolve("absent").unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[test]
fn test_malformed_identifier() {
    let h = harness();
    let err = h.loader.require().require("\nfoo").unwrap_err();
    assert!(matches!(err, LoaderError::MalformedIdentifier { .. }));
    assert_eq!(h.transport.requests("https://host/mods/foo.js").total(), 0);
}

#[test]
fn test_set_root_affects_later_resolutions_only() {
    let h = harness();
    h.transport.module("https://host/mods/m.js", "exports.from = \"mods\"");
    h.transport.module("https://cdn/lib/m.js", "exports.from = \"cdn\"");

    let require = h.loader.require();
    let before = require.require("m").unwrap();

    h.loader.set_root("https://cdn/lib/");
    assert_eq!(h.loader.root(), "https://cdn/lib/");
    let after = require.require("m").unwrap();

    assert_eq!(before.get(), json!({ "from": "mods" }));
    assert_eq!(after.get(), json!({ "from": "cdn" }));
    assert!(h.loader.cache().contains(&url("https://host/mods/m.js")));
}

#[test]
fn test_clear_cache() {
    let h = harness();
    h.transport.module("https://host/mods/c.js", "exports.c = 1");

    let require = h.loader.require();
    let first = require.require("c").unwrap();
    h.loader.clear_cache();
    assert!(h.loader.cache().is_empty());

    let second = require.require("c").unwrap();
    assert!(!first.ptr_eq(&second));
    assert_eq!(h.sandbox.runs("https://host/mods/c.js"), 2);
}

#[tokio::test]
async fn test_async_requests_share_one_continuation() {
    let h = harness();
    h.transport.module("https://host/mods/s.js", "exports.s = 1");

    let require = h.loader.require();
    let first = require.require_async("s");
    let second = require.require_async("./s.js");
    let third = require.require_async("s.js");

    let (a, b) = futures::join!(first, third);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.ptr_eq(&b));
    assert_eq!(h.transport.requests("https://host/mods/s.js").non_blocking, 1);
    assert_eq!(h.sandbox.runs("https://host/mods/s.js"), 1);

    // `./s.js` from the root context resolves against the base location
    let err = second.await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_async_after_blocking_uses_registry() {
    let h = harness();
    h.transport.module("https://host/mods/k.js", "exports.k = 1");

    let require = h.loader.require();
    let blocking = require.require("k").unwrap();
    let awaited = require.require_async("k").await.unwrap();
    assert!(blocking.ptr_eq(&awaited));
    assert_eq!(h.transport.requests("https://host/mods/k.js").non_blocking, 0);
}

#[tokio::test]
async fn test_blocking_require_takes_over_async_load() {
    let h = harness();
    h.transport.module("https://host/mods/up.js", "exports.up = true");
    h.transport.hold();

    let require = h.loader.require();
    let pending = require.require_async("up");
    while h.transport.requests("https://host/mods/up.js").non_blocking == 0 {
        tokio::task::yield_now().await;
    }

    let blocking = require.require("up").unwrap();
    assert_eq!(h.transport.requests("https://host/mods/up.js").blocking, 1);

    h.transport.release();
    let awaited = pending.await.unwrap();
    assert!(blocking.ptr_eq(&awaited));
    assert_eq!(h.sandbox.runs("https://host/mods/up.js"), 1);
}

#[tokio::test]
async fn test_async_transport_fault_rejects() {
    let h = harness();
    h.transport.fault("https://host/mods/down.js", "connection reset");

    let require = h.loader.require();
    let err = require.require_async("down").await.unwrap_err();
    assert_eq!(err.status(), None);
    assert!(err.to_string().contains("connection reset"));

    // The failed continuation is not reused
    h.transport.module("https://host/mods/down.js", "exports.back = 1");
    let exports = require.require_async("down").await.unwrap();
    assert_eq!(exports.get(), json!({ "back": 1 }));
    assert_eq!(h.transport.requests("https://host/mods/down.js").non_blocking, 2);
}

#[tokio::test]
async fn test_resolve_async() {
    let h = harness();
    h.transport.module("https://host/mods/q.js", "exports.q = 1");

    let require = h.loader.require();
    let (a, b) = futures::join!(require.resolve_async("q"), require.resolve_async("q.js"));
    assert_eq!(a.unwrap(), url("https://host/mods/q.js"));
    assert_eq!(b.unwrap(), url("https://host/mods/q.js"));
    assert_eq!(h.transport.requests("https://host/mods/q.js").non_blocking, 1);
    assert!(h.loader.cache().is_empty());
}

#[tokio::test]
async fn test_async_execution_failure_is_retried() {
    let h = harness();
    h.transport.module("https://host/mods/boom.js", "throw \"boom\"");

    let require = h.loader.require();
    let first = require.require_async("boom").await.unwrap_err();
    assert!(matches!(first, LoaderError::Execution { ref message, .. } if message == "boom"));

    // The rejected continuation is gone: the body runs again from the fetched source
    let second = require.require_async("boom").await.unwrap_err();
    assert!(matches!(second, LoaderError::Execution { .. }));
    assert_eq!(h.sandbox.runs("https://host/mods/boom.js"), 2);
    assert_eq!(h.transport.requests("https://host/mods/boom.js").non_blocking, 1);
}

#[tokio::test]
async fn test_failed_takeover_rejects_async_waiters() {
    let h = harness();
    h.transport.hold();

    let require = h.loader.require();
    let pending = require.require_async("gone");
    while h.transport.requests("https://host/mods/gone.js").non_blocking == 0 {
        tokio::task::yield_now().await;
    }

    let err = require.require("gone").unwrap_err();
    assert_eq!(err.status(), Some(404));

    h.transport.release();
    let err = pending.await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(h.loader.cache().is_empty());
}

#[tokio::test]
async fn test_clear_cache_rejects_pending_async_load() {
    let h = harness();
    h.transport.module("https://host/mods/h.js", "exports.h = 1");
    h.transport.hold();

    let require = h.loader.require();
    let pending = require.require_async("h");
    while h.transport.requests("https://host/mods/h.js").non_blocking == 0 {
        tokio::task::yield_now().await;
    }

    h.loader.clear_cache();
    h.transport.release();

    let err = pending.await.unwrap_err();
    assert_eq!(err.status(), None);
    assert_eq!(h.sandbox.runs("https://host/mods/h.js"), 0);

    let exports = require.require_async("h").await.unwrap();
    assert_eq!(exports.get(), json!({ "h": 1 }));
}

#[tokio::test]
async fn test_async_require_inside_failed_body_is_not_kept() {
    let sandbox = Arc::new(FailOnceSandbox::default());
    let (transport, loader) = loader_with(sandbox.clone());
    transport.module("https://host/mods/a.js", "exports.ok = true");

    sandbox.on_first_run(|bindings| {
        let own = futures::executor::block_on(bindings.require.require_async("./a")).unwrap();
        assert!(own.ptr_eq(&bindings.exports));
    });

    let require = loader.require();
    assert!(require.require("a").is_err());

    let exports = require.require_async("a").await.unwrap();
    assert_eq!(exports.get(), json!({ "ok": true }));
    assert_eq!(sandbox.runs(), 2);
    assert!(exports.ptr_eq(&require.require("a").unwrap()));
}

#[tokio::test]
async fn test_async_load_settled_on_failed_record_is_rebuilt() {
    let sandbox = Arc::new(FailOnceSandbox::default());
    let (transport, loader) = loader_with(sandbox.clone());
    transport.module("https://host/mods/a.js", "exports.ok = true");
    transport.hold();

    let require = loader.require();
    let pending = require.require_async("a");
    while transport.requests("https://host/mods/a.js").non_blocking == 0 {
        tokio::task::yield_now().await;
    }

    // The blocking load takes over; while its body runs, the earlier
    // continuation settles on the still-evaluating record
    let joined = pending.clone();
    sandbox.on_first_run(move |_| {
        let partial = futures::executor::block_on(joined).unwrap();
        assert_eq!(partial.get(), json!({}));
    });
    assert!(require.require("a").is_err());
    transport.release();

    let exports = require.require_async("a").await.unwrap();
    assert_eq!(exports.get(), json!({ "ok": true }));
    assert_eq!(sandbox.runs(), 2);
    assert_eq!(
        loader.cache().get(&url("https://host/mods/a.js")).unwrap().status(),
        ModuleStatus::Loaded
    );
}

#[test]
fn test_require_async_without_runtime() {
    let h = harness();
    h.transport.module("https://host/mods/n.js", "exports.n = 1");

    let err = futures::executor::block_on(h.loader.require().require_async("n")).unwrap_err();
    assert!(matches!(err, LoaderError::Runtime(_)));
}

#[test]
fn test_file_transport_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("node_modules")).unwrap();
    std::fs::write(
        dir.path().join("node_modules/greet.js"),
        "exports.greeting = require(\"./words.json\")",
    )
    .unwrap();
    std::fs::write(dir.path().join("node_modules/words.json"), r#"["hello"]"#).unwrap();

    let base = Url::from_directory_path(dir.path()).unwrap();
    let loader = Loader::new(
        LoaderConfig::with_base(base),
        Arc::new(FileTransport::new()),
        Arc::new(DirectiveSandbox::new()),
    );

    let exports = loader.require().require("greet").unwrap();
    assert_eq!(exports.get(), json!({ "greeting": ["hello"] }));
}
