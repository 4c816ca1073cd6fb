//! Readiness waiter strategies.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::handle::Handle;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A capability object for readiness strategies that don't fit the built-in
/// variants (custom polling against a client library, a gRPC health check, ...).
#[async_trait]
pub trait CustomWaiter: Send + Sync {
    async fn wait_ready(&self, handle: &Handle, deadline: Instant) -> Result<()>;
}

/// Pluggable strategy for deciding when a freshly started container is ready.
///
/// The default "running" check always runs first as a precondition; the
/// configured strategy (if not [`WaitStrategy::Default`]) runs after it.
/// Folding more than one non-default waiter option keeps only the last one,
/// the same "singletons overwrite" rule §4.1 applies to the rest of the
/// config.
#[derive(Clone)]
pub enum WaitStrategy {
    Default,
    LogSubstring { needle: String, timeout: Duration },
    Exec { argv: Vec<String>, timeout: Duration },
    /// Resolved against the handle's published host:port for `container_port`
    /// at wait time, since the host port is runtime-assigned and unknown
    /// until after creation.
    Http { container_port: String, path: String, timeout: Duration },
    Custom { waiter: Arc<dyn CustomWaiter>, timeout: Duration },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Default
    }
}

impl fmt::Debug for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStrategy::Default => write!(f, "Default"),
            WaitStrategy::LogSubstring { needle, timeout } => f
                .debug_struct("LogSubstring")
                .field("needle", needle)
                .field("timeout", timeout)
                .finish(),
            WaitStrategy::Exec { argv, timeout } => f
                .debug_struct("Exec")
                .field("argv", argv)
                .field("timeout", timeout)
                .finish(),
            WaitStrategy::Http { container_port, path, timeout } => f
                .debug_struct("Http")
                .field("container_port", container_port)
                .field("path", path)
                .field("timeout", timeout)
                .finish(),
            WaitStrategy::Custom { timeout, .. } => {
                f.debug_struct("Custom").field("timeout", timeout).finish()
            }
        }
    }
}

impl WaitStrategy {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            WaitStrategy::Default => None,
            WaitStrategy::LogSubstring { timeout, .. }
            | WaitStrategy::Exec { timeout, .. }
            | WaitStrategy::Http { timeout, .. }
            | WaitStrategy::Custom { timeout, .. } => Some(*timeout),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const EXEC_MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Poll `InspectContainer` until the container reports running, or the
/// startup timeout elapses.
pub(crate) async fn wait_running(backend: &dyn Backend, id: &str, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        if let Ok(info) = backend.inspect_container(id).await {
            if info.running {
                return Ok(());
            }
        }
        if start.elapsed() >= timeout {
            return Err(Error::WaitTimeout {
                elapsed: start.elapsed(),
                message: format!("container {id} did not reach running state"),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Run the configured readiness strategy after the default running check.
pub(crate) async fn wait_strategy(
    backend: &dyn Backend,
    id: &str,
    handle: &Handle,
    strategy: &WaitStrategy,
) -> Result<()> {
    match strategy {
        WaitStrategy::Default => Ok(()),
        WaitStrategy::LogSubstring { needle, timeout } => {
            backend.wait_for_log(id, needle, *timeout).await.map_err(|e| {
                if let Error::WaitTimeout { elapsed, .. } = e {
                    Error::WaitTimeout {
                        elapsed,
                        message: format!("log substring {needle:?} not seen"),
                    }
                } else {
                    e
                }
            })
        }
        WaitStrategy::Exec { argv, timeout } => {
            let start = Instant::now();
            loop {
                if let Ok((code, _)) = backend.exec_in_container(id, argv).await {
                    if code == 0 {
                        return Ok(());
                    }
                }
                if start.elapsed() >= *timeout {
                    return Err(Error::WaitTimeout {
                        elapsed: start.elapsed(),
                        message: format!("exec readiness probe {argv:?} never exited 0"),
                    });
                }
                tokio::time::sleep(EXEC_MIN_INTERVAL).await;
            }
        }
        WaitStrategy::Http { container_port, path, timeout } => {
            let Some(host_port) = handle.port(container_port) else {
                return Err(Error::WaitTimeout {
                    elapsed: Duration::ZERO,
                    message: format!(
                        "port {container_port} is not published; cannot resolve an HTTP readiness URL"
                    ),
                });
            };
            let url = format!("http://{}:{host_port}{path}", handle.host());
            let start = Instant::now();
            let client = reqwest::Client::new();
            loop {
                if let Ok(resp) = client.get(&url).send().await {
                    if resp.status().is_success() {
                        return Ok(());
                    }
                }
                if start.elapsed() >= *timeout {
                    return Err(Error::WaitTimeout {
                        elapsed: start.elapsed(),
                        message: format!("http readiness probe against {url} never returned 2xx"),
                    });
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        WaitStrategy::Custom { waiter, timeout } => {
            let deadline = Instant::now() + *timeout;
            waiter.wait_ready(handle, deadline).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::handle::{CleanupToken, Handle};
    use crate::test_support::MockBackend;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn handle_with_ports(
        backend: Arc<dyn Backend>,
        ports: HashMap<(u16, Protocol), Vec<crate::backend::PortBinding>>,
    ) -> Handle {
        let cleanup = Arc::new(CleanupToken::new(backend.clone(), "id".to_string(), false));
        Handle::new(
            "id".to_string(),
            backend,
            ports,
            String::new(),
            None,
            cleanup,
        )
    }

    #[tokio::test]
    async fn default_strategy_is_a_noop() {
        let mock: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let handle = handle_with_ports(mock.clone(), HashMap::new());
        wait_strategy(mock.as_ref(), "id", &handle, &WaitStrategy::Default)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn log_substring_succeeds_when_needle_present() {
        let mock = Arc::new(MockBackend::new());
        mock.set_logs("server started\nready to accept connections\n");
        let backend: Arc<dyn Backend> = mock;
        let handle = handle_with_ports(backend.clone(), HashMap::new());
        let strategy = WaitStrategy::LogSubstring {
            needle: "ready to accept".to_string(),
            timeout: Duration::from_millis(200),
        };
        wait_strategy(backend.as_ref(), "id", &handle, &strategy).await.unwrap();
    }

    #[tokio::test]
    async fn log_substring_times_out_when_needle_absent() {
        let mock = Arc::new(MockBackend::new());
        mock.set_logs("still booting\n");
        let backend: Arc<dyn Backend> = mock;
        let handle = handle_with_ports(backend.clone(), HashMap::new());
        let strategy = WaitStrategy::LogSubstring {
            needle: "ready".to_string(),
            timeout: Duration::from_millis(50),
        };
        let err = wait_strategy(backend.as_ref(), "id", &handle, &strategy).await.unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn exec_succeeds_once_exit_code_is_zero() {
        let mock = Arc::new(MockBackend::new());
        mock.push_exec_response(1, "not yet");
        mock.push_exec_response(0, "ready");
        let backend: Arc<dyn Backend> = mock;
        let handle = handle_with_ports(backend.clone(), HashMap::new());
        let strategy = WaitStrategy::Exec {
            argv: vec!["pg_isready".to_string()],
            timeout: Duration::from_millis(500),
        };
        wait_strategy(backend.as_ref(), "id", &handle, &strategy).await.unwrap();
    }

    #[tokio::test]
    async fn exec_times_out_when_exit_code_never_zero() {
        let mock = Arc::new(MockBackend::new());
        mock.set_exec_default(1, "still failing");
        let backend: Arc<dyn Backend> = mock;
        let handle = handle_with_ports(backend.clone(), HashMap::new());
        let strategy = WaitStrategy::Exec {
            argv: vec!["pg_isready".to_string()],
            timeout: Duration::from_millis(120),
        };
        let err = wait_strategy(backend.as_ref(), "id", &handle, &strategy).await.unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn http_waiter_errors_immediately_when_port_unpublished() {
        let mock: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let handle = handle_with_ports(mock.clone(), HashMap::new());
        let strategy = WaitStrategy::Http {
            container_port: "8080".to_string(),
            path: "/healthz".to_string(),
            timeout: Duration::from_millis(500),
        };
        let err = wait_strategy(mock.as_ref(), "id", &handle, &strategy).await.unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_waiter_succeeds_against_a_resolved_host_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await;
        });

        let mock: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let mut ports = HashMap::new();
        ports.insert(
            (8080u16, Protocol::Tcp),
            vec![crate::backend::PortBinding { host_ip: "127.0.0.1".to_string(), host_port }],
        );
        let handle = handle_with_ports(mock.clone(), ports);
        let strategy = WaitStrategy::Http {
            container_port: "8080".to_string(),
            path: "/healthz".to_string(),
            timeout: Duration::from_secs(2),
        };
        wait_strategy(mock.as_ref(), "id", &handle, &strategy).await.unwrap();
    }

    struct AlwaysReady;

    #[async_trait]
    impl CustomWaiter for AlwaysReady {
        async fn wait_ready(&self, _handle: &Handle, _deadline: Instant) -> Result<()> {
            Ok(())
        }
    }

    struct NeverReady;

    #[async_trait]
    impl CustomWaiter for NeverReady {
        async fn wait_ready(&self, _handle: &Handle, _deadline: Instant) -> Result<()> {
            Err(Error::WaitTimeout {
                elapsed: Duration::from_millis(1),
                message: "custom waiter never satisfied".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn custom_waiter_success_path() {
        let mock: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let handle = handle_with_ports(mock.clone(), HashMap::new());
        let strategy = WaitStrategy::Custom {
            waiter: Arc::new(AlwaysReady),
            timeout: Duration::from_millis(100),
        };
        wait_strategy(mock.as_ref(), "id", &handle, &strategy).await.unwrap();
    }

    #[tokio::test]
    async fn custom_waiter_timeout_path() {
        let mock: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let handle = handle_with_ports(mock.clone(), HashMap::new());
        let strategy = WaitStrategy::Custom {
            waiter: Arc::new(NeverReady),
            timeout: Duration::from_millis(100),
        };
        let err = wait_strategy(mock.as_ref(), "id", &handle, &strategy).await.unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));
    }
}
