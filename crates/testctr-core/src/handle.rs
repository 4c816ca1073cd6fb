//! The user-facing object returned by `New`.

use crate::backend::{Backend, PortBinding};
use crate::config::Protocol;
use crate::dsn::{sanitize_db_name, DsnProvider};
use crate::error::{Error, Result};
use crate::test_context::TestContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot cleanup token shared between a [`Handle`] and the closure
/// registered with the owning [`TestContext`].
///
/// Mirrors `devc`'s `TestContainerGuard`: an `AtomicBool` makes repeated
/// invocation (explicit cleanup racing the registered callback) safe, so
/// cleanup idempotence holds regardless of which path runs first.
pub(crate) struct CleanupToken {
    backend: Arc<dyn Backend>,
    id: String,
    coordinator_slot: bool,
    cleaned: AtomicBool,
}

impl CleanupToken {
    pub(crate) fn new(backend: Arc<dyn Backend>, id: String, coordinator_slot: bool) -> Self {
        Self {
            backend,
            id,
            coordinator_slot,
            cleaned: AtomicBool::new(false),
        }
    }

    /// Release the coordinator slot (if one was acquired) without touching
    /// the container itself. Used when create fails before a handle exists.
    pub(crate) fn release_slot_only(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.coordinator_slot {
            crate::coordinator::global().release();
        }
    }

    pub(crate) async fn run(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        if crate::settings::current().keep {
            tracing::info!(container_id = %self.id, "testctr: keep set, skipping removal");
        } else {
            if let Err(e) = self.backend.stop_container(&self.id).await {
                tracing::debug!(container_id = %self.id, error = %e, "testctr: stop failed during cleanup");
            }
            if let Err(e) = self.backend.remove_container(&self.id).await {
                if !matches!(e, Error::NotFound(_)) {
                    tracing::warn!(container_id = %self.id, error = %e, "testctr: remove failed during cleanup");
                }
            }
        }
        if self.coordinator_slot {
            crate::coordinator::global().release();
        }
    }
}

/// Runs an async closure from a synchronous `FnOnce`, the way a registered
/// `TestContext::cleanup` callback must bridge back into async code.
/// Requires a multi-threaded Tokio runtime.
pub(crate) fn block_on_cleanup(token: Arc<CleanupToken>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            tokio::task::block_in_place(|| handle.block_on(token.run()));
        }
        Err(_) => {
            // No runtime on this thread (e.g. cleanup running after the
            // test's own runtime was torn down); fall back to releasing
            // the coordinator slot so the process doesn't wedge.
            token.release_slot_only();
        }
    }
}

/// User-facing object returned by `New`: exposes I/O and metadata for
/// exactly one container. Not intended to outlive the test that created it.
pub struct Handle {
    id: String,
    backend: Arc<dyn Backend>,
    ports: HashMap<(u16, Protocol), Vec<PortBinding>>,
    internal_ip: String,
    dsn_provider: Option<Arc<dyn DsnProvider>>,
    pub(crate) cleanup: Arc<CleanupToken>,
}

impl Handle {
    pub(crate) fn new(
        id: String,
        backend: Arc<dyn Backend>,
        ports: HashMap<(u16, Protocol), Vec<PortBinding>>,
        internal_ip: String,
        dsn_provider: Option<Arc<dyn DsnProvider>>,
        cleanup: Arc<CleanupToken>,
    ) -> Self {
        Self {
            id,
            backend,
            ports,
            internal_ip,
            dsn_provider,
            cleanup,
        }
    }

    /// Opaque backend id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host address reachable from outside the container; loopback in the
    /// default CLI-backend configuration.
    pub fn host(&self) -> &str {
        "127.0.0.1"
    }

    fn binding_for(&self, container_port: &str) -> Option<&PortBinding> {
        let spec: crate::config::PortSpec = container_port.parse().ok()?;
        self.ports.get(&(spec.port, spec.protocol))?.first()
    }

    /// Host port mapped to `container_port` (e.g. `"6379"` or `"6379/udp"`),
    /// `None` if unmapped.
    pub fn port(&self, container_port: &str) -> Option<String> {
        self.binding_for(container_port).map(|b| b.host_port.to_string())
    }

    /// `Host():Port(container_port)`, `None` if unmapped.
    pub fn endpoint(&self, container_port: &str) -> Option<String> {
        self.binding_for(container_port)
            .map(|b| format!("{}:{}", self.host(), b.host_port))
    }

    /// Run `argv` in the container. Returns an error only for transport
    /// failures; a non-zero exit code is a normal `Ok` result.
    pub async fn exec(&self, argv: &[impl AsRef<str>]) -> Result<(i64, String)> {
        let argv: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        self.backend.exec_in_container(&self.id, &argv).await
    }

    /// Convenience wrapper that fatals the test on transport failure or
    /// non-zero exit.
    pub async fn exec_simple(&self, test: &dyn TestContext, argv: &[&str]) -> String {
        match self.exec(argv).await {
            Ok((0, output)) => output,
            Ok((code, output)) => test.fatal(&format!(
                "testctr: exec {argv:?} exited {code}, output: {output}"
            )),
            Err(e) => test.fatal(&format!("testctr: exec {argv:?} failed: {e}")),
        }
    }

    /// Refresh and return the current inspect snapshot.
    pub async fn inspect(&self) -> Result<crate::backend::ContainerInfo> {
        self.backend.inspect_container(&self.id).await
    }

    /// Per-test database URL. Fatals if no [`DsnProvider`] is configured.
    ///
    /// Derives a stable database name from the test's name, creates it
    /// through the configured [`DsnProvider`], and registers a cleanup that
    /// drops it. Parallel tests under the same container each get their
    /// own database.
    pub async fn dsn(&self, test: &dyn TestContext) -> String {
        let Some(provider) = self.dsn_provider.clone() else {
            test.fatal("testctr: DSN requested but no DsnProvider is configured");
        };
        let db_name = sanitize_db_name(test.name());
        match provider.create_database(self, &db_name).await {
            Ok(dsn) => {
                let cleanup_handle = self.shallow_clone();
                let provider_for_cleanup = provider;
                let db_name_for_cleanup = db_name;
                test.cleanup(Box::new(move || {
                    let handle = cleanup_handle;
                    block_on_drop_database(provider_for_cleanup, handle, db_name_for_cleanup);
                }));
                dsn
            }
            Err(e) => test.fatal(&format!("testctr: failed to create database {db_name}: {e}")),
        }
    }

    /// Address reachable from inside the container's primary network,
    /// captured at creation time.
    pub fn internal_ip(&self) -> &str {
        &self.internal_ip
    }

    /// A throwaway copy sharing this handle's backend/ports/cleanup token,
    /// used to give `DsnProvider::drop_database` a `&Handle` from inside a
    /// cleanup closure that outlives the original borrow.
    fn shallow_clone(&self) -> Handle {
        Handle {
            id: self.id.clone(),
            backend: self.backend.clone(),
            ports: self.ports.clone(),
            internal_ip: self.internal_ip.clone(),
            dsn_provider: self.dsn_provider.clone(),
            cleanup: self.cleanup.clone(),
        }
    }
}

fn block_on_drop_database(provider: Arc<dyn DsnProvider>, handle: Handle, db_name: String) {
    let fut = async move {
        if let Err(e) = provider.drop_database(&handle, &db_name).await {
            tracing::warn!(db_name = %db_name, error = %e, "testctr: drop_database failed during cleanup");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => tokio::task::block_in_place(|| rt.block_on(fut)),
        Err(_) => {}
    }
}
