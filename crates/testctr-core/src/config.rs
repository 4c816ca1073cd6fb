//! Container configuration model: the immutable snapshot produced by folding options.

use crate::dsn::DsnProvider;
use crate::error::{Error, Result};
use crate::waiters::WaitStrategy;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Transport protocol for an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A normalized `port/proto` pair, e.g. `6379/tcp`.
///
/// Bare port strings (`"6379"`) default to `tcp` silently, following the
/// same convention the container runtime CLIs themselves use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }

    /// The normalized wire form, e.g. `"6379/tcp"`.
    pub fn normalized(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized())
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (port_str, proto_str) = match s.split_once('/') {
            Some((p, proto)) => (p, proto),
            None => (s, "tcp"),
        };
        let port: u16 = port_str
            .parse()
            .map_err(|_| Error::ConfigInvalid(format!("invalid port string: {s}")))?;
        let protocol = match proto_str.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            other => {
                return Err(Error::ConfigInvalid(format!(
                    "invalid port protocol {other:?} in {s:?}"
                )))
            }
        };
        Ok(PortSpec::new(port, protocol))
    }
}

/// A single file to install into the container after creation.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub source: FileSource,
    pub container_path: String,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum FileSource {
    HostPath(std::path::PathBuf),
    Inline(Vec<u8>),
}

/// Backend-specific payload the core never interprets.
///
/// Implementations choose a tagged variant (the common case) or a boxed
/// capability object; the core only ever routes it to the named backend.
#[derive(Clone)]
pub enum BackendPayload {
    None,
    Json(serde_json::Value),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for BackendPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPayload::None => write!(f, "None"),
            BackendPayload::Json(v) => write!(f, "Json({v})"),
            BackendPayload::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Default for BackendPayload {
    fn default() -> Self {
        BackendPayload::None
    }
}

/// Immutable-after-build container configuration, produced by folding [`crate::options::Opt`]s.
#[derive(Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub env: HashMap<String, String>,
    pub ports: Vec<PortSpec>,
    pub command: Vec<String>,
    pub files: Vec<FileEntry>,
    pub wait: WaitStrategy,
    pub startup_timeout: Duration,
    pub startup_delay: Duration,
    pub logs: bool,
    pub dsn_provider: Option<Arc<dyn DsnProvider>>,
    pub backend: String,
    pub payload: BackendPayload,
    pub labels: HashMap<String, String>,
}

impl fmt::Debug for ContainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerConfig")
            .field("image", &self.image)
            .field("env", &self.env)
            .field("ports", &self.ports)
            .field("command", &self.command)
            .field("files", &self.files.len())
            .field("wait", &self.wait)
            .field("startup_timeout", &self.startup_timeout)
            .field("startup_delay", &self.startup_delay)
            .field("logs", &self.logs)
            .field("backend", &self.backend)
            .field("payload", &self.payload)
            .field("labels", &self.labels)
            .finish()
    }
}

pub const DEFAULT_BACKEND: &str = "local";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Mutable builder that [`crate::options::Opt`]s fold into.
///
/// Options that set singletons (command, backend, startup timeout)
/// overwrite; options that set collections (env, ports, files, labels)
/// append. Folding order is the order options were given to `New`.
pub struct ConfigBuilder {
    pub(crate) image: String,
    pub(crate) env: HashMap<String, String>,
    pub(crate) ports: Vec<PortSpec>,
    pub(crate) command: Vec<String>,
    pub(crate) files: Vec<FileEntry>,
    pub(crate) wait: WaitStrategy,
    pub(crate) startup_timeout: Duration,
    pub(crate) startup_delay: Duration,
    pub(crate) logs: bool,
    pub(crate) dsn_provider: Option<Arc<dyn DsnProvider>>,
    pub(crate) backend: String,
    pub(crate) payload: BackendPayload,
    pub(crate) labels: HashMap<String, String>,
}

impl ConfigBuilder {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: HashMap::new(),
            ports: Vec::new(),
            command: Vec::new(),
            files: Vec::new(),
            wait: WaitStrategy::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            startup_delay: Duration::ZERO,
            logs: false,
            dsn_provider: None,
            backend: DEFAULT_BACKEND.to_string(),
            payload: BackendPayload::None,
            labels: HashMap::new(),
        }
    }

    /// Validate and freeze the builder into a [`ContainerConfig`].
    pub fn build(mut self) -> Result<ContainerConfig> {
        if self.image.trim().is_empty() {
            return Err(Error::ConfigInvalid("image reference is empty".into()));
        }
        for key in self.env.keys() {
            if key.is_empty() {
                return Err(Error::ConfigInvalid("environment key must not be empty".into()));
            }
        }
        for f in &self.files {
            if !f.container_path.starts_with('/') {
                return Err(Error::ConfigInvalid(format!(
                    "file entry target must be an absolute path: {}",
                    f.container_path
                )));
            }
        }
        if let Some(timeout) = self.wait.timeout() {
            if timeout.is_zero() {
                return Err(Error::ConfigInvalid(
                    "readiness waiter timeout must be positive".into(),
                ));
            }
        }
        {
            let mut seen = std::collections::HashSet::new();
            self.ports.retain(|p| seen.insert((p.port, p.protocol)));
        }
        Ok(ContainerConfig {
            image: self.image,
            env: self.env,
            ports: self.ports,
            command: self.command,
            files: self.files,
            wait: self.wait,
            startup_timeout: self.startup_timeout,
            startup_delay: self.startup_delay,
            logs: self.logs,
            dsn_provider: self.dsn_provider,
            backend: self.backend,
            payload: self.payload,
            labels: self.labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_defaults_to_tcp() {
        let spec: PortSpec = "6379".parse().unwrap();
        assert_eq!(spec.protocol, Protocol::Tcp);
        assert_eq!(spec.normalized(), "6379/tcp");
    }

    #[test]
    fn explicit_protocol_is_preserved() {
        let spec: PortSpec = "53/udp".parse().unwrap();
        assert_eq!(spec.protocol, Protocol::Udp);
        assert_eq!(spec.normalized(), "53/udp");
    }

    #[test]
    fn normalize_is_idempotent() {
        let spec: PortSpec = "6379".parse().unwrap();
        let renormalized: PortSpec = spec.normalized().parse().unwrap();
        assert_eq!(spec, renormalized);
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = ConfigBuilder::new("  ").build().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn relative_file_target_is_rejected() {
        let mut b = ConfigBuilder::new("alpine:latest");
        b.files.push(FileEntry {
            source: FileSource::Inline(vec![]),
            container_path: "relative/path".to_string(),
            mode: None,
        });
        assert!(b.build().is_err());
    }

    #[test]
    fn duplicate_ports_collapse() {
        let mut b = ConfigBuilder::new("alpine:latest");
        b.ports.push(PortSpec::new(80, Protocol::Tcp));
        b.ports.push(PortSpec::new(80, Protocol::Tcp));
        let cfg = b.build().unwrap();
        assert_eq!(cfg.ports.len(), 1);
    }
}
