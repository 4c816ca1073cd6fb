//! Container-backed test dependencies with automatic lifecycle and readiness
//! handling.
//!
//! `testctr::new(&harness, "redis:7-alpine", vec![testctr::with_port("6379")])`
//! creates a container, blocks until it is ready, and registers its teardown
//! with the supplied [`TestContext`]. The default `"local"` backend shells
//! out to a runtime binary (`docker` by default); a native Docker API
//! backend is available behind the `docker-api` feature.

use std::sync::Once;

pub use testctr_core::{
    configure, is_registered, lookup, register, sanitize_db_name, with_backend, with_command,
    with_dsn_provider, with_env, with_file, with_inline_file, with_label, with_logs, with_port,
    with_startup_delay, with_startup_timeout, with_wait_for_custom, with_wait_for_exec,
    with_wait_for_http, with_wait_for_log, BackendPayload, ConfigBuilder, ContainerConfig,
    ContainerInfo, CustomWaiter, DsnProvider, Error, FileEntry, FileSource, Handle, Harness, Opt,
    PortBinding, PortSpec, Protocol, Result, Settings, TestContext, WaitStrategy,
};
pub use testctr_provider::CliBackend;

#[cfg(feature = "docker-api")]
pub use testctr_provider::DockerApiBackend;

/// Options that reach past the stable core contract: opaque per-backend
/// payloads. Kept separate from the primitive options so the common path
/// never has to think about backend-specific shapes.
pub mod advanced {
    pub use testctr_core::{with_payload_custom, with_payload_json};
}

static REGISTER_DEFAULT: Once = Once::new();

fn ensure_default_backend_registered() {
    REGISTER_DEFAULT.call_once(testctr_provider::register_default);
}

/// Create, wait for, and register cleanup for a container.
///
/// Registers the default `"local"` backend on first use if nothing else
/// has; safe to call from any number of concurrent tests.
pub async fn new(test: &dyn TestContext, image: &str, opts: Vec<Opt>) -> Handle {
    ensure_default_backend_registered();
    testctr_core::new(test, image, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingBackend {
        creates: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl testctr_core::Backend for CountingBackend {
        async fn create_container(
            &self,
            _test_name: &str,
            _image: &str,
            _config: &ContainerConfig,
        ) -> Result<String> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("counting-{n}"))
        }

        async fn stop_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn remove_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
            Ok(ContainerInfo {
                running: true,
                status: "running".into(),
                id: id.to_string(),
                ..Default::default()
            })
        }

        async fn exec_in_container(&self, _id: &str, _argv: &[String]) -> Result<(i64, String)> {
            Ok((0, String::new()))
        }

        async fn get_container_logs(&self, _id: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn wait_for_log(&self, _id: &str, _needle: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn internal_ip(&self, _id: &str) -> Result<String> {
            Ok("172.17.0.3".to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn new_delegates_to_the_named_backend() {
        register("facade-test-backend", Arc::new(CountingBackend { creates: AtomicUsize::new(0) }));
        let harness = Harness::new("facade-test");
        let handle = new(&harness, "alpine:latest", vec![with_backend("facade-test-backend")]).await;
        assert_eq!(handle.id(), "counting-0");
    }
}
