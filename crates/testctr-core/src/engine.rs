//! Lifecycle engine: `New` orchestrates a single container end to end.

use crate::backend::PortBinding;
use crate::config::{ConfigBuilder, Protocol};
use crate::error::Error;
use crate::handle::{block_on_cleanup, CleanupToken, Handle};
use crate::options::{self, Opt};
use crate::registry;
use crate::test_context::TestContext;
use crate::waiters;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const LOCAL_BACKEND: &str = "local";

/// Create, wait for, and register cleanup for a container.
///
/// Fatal on any failure up to and including readiness; afterwards, I/O
/// errors are returned to the caller from the handle's own accessors
/// instead.
pub async fn new(test: &dyn TestContext, image: &str, opts: Vec<Opt>) -> Handle {
    let mut builder = ConfigBuilder::new(image);
    options::fold(&mut builder, opts);
    let config = match builder.build() {
        Ok(c) => c,
        Err(e) => test.fatal(&format!("testctr: invalid config for image {image}: {e}")),
    };

    let backend = match registry::lookup(&config.backend) {
        Ok(b) => b,
        Err(e) => test.fatal(&format!("testctr: {e}")),
    };

    let uses_coordinator = config.backend == LOCAL_BACKEND;
    if uses_coordinator {
        crate::coordinator::global().acquire().await;
    }

    let id = match backend
        .create_container(test.name(), &config.image, &config)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            if uses_coordinator {
                crate::coordinator::global().release();
            }
            test.fatal(&format!(
                "testctr: create failed (image={}, backend={}): {e}",
                config.image, config.backend
            ));
        }
    };

    let cleanup = Arc::new(CleanupToken::new(backend.clone(), id.clone(), uses_coordinator));
    {
        let cleanup = cleanup.clone();
        test.cleanup(Box::new(move || block_on_cleanup(cleanup)));
    }

    if let Err(e) = waiters::wait_running(backend.as_ref(), &id, config.startup_timeout).await {
        test.fatal(&format!(
            "testctr: container never reached running state (image={}, backend={}, id={id}): {e}",
            config.image, config.backend
        ));
    }
    lifecycle_log(format_args!(
        "testctr: container running (image={}, backend={}, id={id})",
        config.image, config.backend
    ));

    // A snapshot handle carrying the real port map so waiters that resolve a
    // published host:port (e.g. the HTTP strategy) can see it; refreshed
    // again below once the wait strategy and any startup delay complete.
    let snapshot = match backend.inspect_container(&id).await {
        Ok(info) => info,
        Err(e) => test.fatal(&format!("testctr: pre-wait inspect failed (id={id}): {e}")),
    };
    let preliminary = build_handle(
        &id,
        backend.clone(),
        parse_ports(&snapshot.ports),
        String::new(),
        None,
        cleanup.clone(),
    );
    if let Err(e) = waiters::wait_strategy(backend.as_ref(), &id, &preliminary, &config.wait).await {
        let tail = backend
            .get_container_logs(&id)
            .await
            .unwrap_or_default();
        let tail: String = tail.lines().rev().take(64).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n");
        test.fatal(&format!(
            "testctr: readiness wait failed (image={}, backend={}, id={id}): {e}\nrecent logs:\n{tail}",
            config.image, config.backend
        ));
    }

    if !config.startup_delay.is_zero() {
        tokio::time::sleep(config.startup_delay).await;
    }

    let info = match backend.inspect_container(&id).await {
        Ok(info) => info,
        Err(e) => test.fatal(&format!("testctr: post-ready inspect failed (id={id}): {e}")),
    };
    let ports = parse_ports(&info.ports);
    let internal_ip = backend.internal_ip(&id).await.unwrap_or_default();

    if config.logs {
        spawn_log_streamer(backend.clone(), id.clone());
    }

    lifecycle_log(format_args!(
        "testctr: container ready (image={}, backend={}, id={id})",
        config.image, config.backend
    ));

    build_handle(&id, backend, ports, internal_ip, config.dsn_provider, cleanup)
}

/// Coarse lifecycle milestone logging, gated by `Settings.verbose` (§6):
/// `info` when verbose logging is on, `debug` otherwise, so a default test
/// run stays quiet while `testctr::configure` with `verbose: true` surfaces
/// the same milestones at `info` level.
fn lifecycle_log(message: std::fmt::Arguments<'_>) {
    if crate::settings::current().verbose {
        tracing::info!("{message}");
    } else {
        tracing::debug!("{message}");
    }
}

fn build_handle(
    id: &str,
    backend: Arc<dyn crate::backend::Backend>,
    ports: HashMap<(u16, Protocol), Vec<PortBinding>>,
    internal_ip: String,
    dsn_provider: Option<Arc<dyn crate::dsn::DsnProvider>>,
    cleanup: Arc<CleanupToken>,
) -> Handle {
    Handle::new(id.to_string(), backend, ports, internal_ip, dsn_provider, cleanup)
}

fn parse_ports(raw: &HashMap<String, Vec<PortBinding>>) -> HashMap<(u16, Protocol), Vec<PortBinding>> {
    let mut out = HashMap::new();
    for (key, bindings) in raw {
        if let Ok(spec) = key.parse::<crate::config::PortSpec>() {
            out.insert((spec.port, spec.protocol), bindings.clone());
        }
    }
    out
}

fn spawn_log_streamer(backend: Arc<dyn crate::backend::Backend>, id: String) {
    tokio::spawn(async move {
        // Best-effort: poll logs until the container is gone. The streamer
        // never blocks the test; cleanup tearing down the container makes
        // inspect/logs fail, which ends the loop.
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match backend.inspect_container(&id).await {
                Ok(info) if info.running => {
                    if let Ok(logs) = backend.get_container_logs(&id).await {
                        tracing::debug!(container_id = %id, "{logs}");
                    }
                }
                Ok(_) | Err(Error::NotFound(_)) => break,
                Err(_) => continue,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::Harness;
    use crate::test_support::MockBackend;

    fn register_mock(name: &str) -> Arc<MockBackend> {
        let mock = Arc::new(MockBackend::new());
        registry::register(name, mock.clone());
        mock
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn new_registers_cleanup_exactly_once_and_removes_on_drop() {
        let mock = register_mock("engine-test-basic");
        let harness = Harness::new("engine-test-basic");
        {
            let handle = new(
                &harness,
                "alpine:latest",
                vec![options::with_backend("engine-test-basic")],
            )
            .await;
            assert_eq!(handle.id(), "mock-container-id");
        }
        harness.run_cleanups();
        assert_eq!(mock.call_count("remove_container"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn readiness_timeout_never_returns_a_running_handle() {
        let mock = register_mock("engine-test-timeout");
        mock.set_never_running();
        // `fatal` panics; run `new` on its own task so the panic surfaces
        // as a JoinError instead of unwinding the test itself.
        let joined = tokio::spawn(async move {
            let harness = Harness::new("engine-test-timeout");
            new(
                &harness,
                "alpine:latest",
                vec![
                    options::with_backend("engine-test-timeout"),
                    options::with_startup_timeout(Duration::from_millis(50)),
                ],
            )
            .await;
        })
        .await;
        assert!(joined.is_err(), "New should have fataled on readiness timeout");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_backend_is_fatal() {
        let joined = tokio::spawn(async move {
            let harness = Harness::new("engine-test-unknown");
            new(&harness, "alpine:latest", vec![options::with_backend("does-not-exist")]).await;
        })
        .await;
        assert!(joined.is_err(), "New should have fataled on unknown backend");
    }
}
