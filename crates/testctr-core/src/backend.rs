//! The narrow, stable contract every container runtime backend satisfies.

use crate::config::ContainerConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A host-port binding for one exposed container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

/// Wire contract between a backend and the lifecycle engine: the parsed
/// state of a container at a point in time.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub running: bool,
    pub status: String,
    pub exit_code: Option<i64>,
    pub id: String,
    pub name: String,
    pub created: i64,
    /// Keyed by normalized `port/proto`, e.g. `"6379/tcp"`.
    pub ports: HashMap<String, Vec<PortBinding>>,
}

/// A concrete realization of the container lifecycle operations for one
/// runtime or library.
///
/// Backends MUST be safe to call concurrently for distinct container ids;
/// no global locking is assumed beyond what each backend does internally.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Translate `config` into the backend's native create+start call.
    /// MUST honor env, ports, command, files, labels, and the
    /// backend-specific payload. MUST NOT block on readiness.
    async fn create_container(
        &self,
        test_name: &str,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String>;

    /// No-op for backends that auto-start on create.
    async fn start_container(&self, id: &str) -> Result<()> {
        let _ = id;
        Ok(())
    }

    /// Best-effort graceful stop.
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Idempotent; removing an already-gone container is success.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Current [`ContainerInfo`] snapshot. MUST fail distinguishably
    /// ([`crate::error::Error::NotFound`]) when the container is gone.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo>;

    /// Run `argv` in the container, merging stdout+stderr in order.
    /// Returns an error only for transport failures, never for a non-zero
    /// exit code.
    async fn exec_in_container(&self, id: &str, argv: &[String]) -> Result<(i64, String)>;

    /// Current accumulated logs, newest last.
    async fn get_container_logs(&self, id: &str) -> Result<String>;

    /// Block until `needle` appears in the container's logs or `timeout`
    /// elapses.
    async fn wait_for_log(
        &self,
        id: &str,
        needle: &str,
        timeout: std::time::Duration,
    ) -> Result<()>;

    /// Address reachable from inside the container's primary network.
    async fn internal_ip(&self, id: &str) -> Result<String>;

    /// Commit the container's filesystem to a new image. Optional:
    /// backends that can't support it return [`crate::error::Error::Unsupported`].
    async fn commit(&self, id: &str, new_image_ref: &str) -> Result<()> {
        let _ = (id, new_image_ref);
        Err(crate::error::Error::Unsupported(
            "this backend does not support commit".to_string(),
        ))
    }
}
