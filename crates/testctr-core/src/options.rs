//! Option combinators: small functions that mutate a [`ConfigBuilder`] under construction.
//!
//! Each option is pure aside from mutating the builder it's given. Folding
//! order is the order passed to `New`: singleton fields (command, backend,
//! startup timeout) overwrite, collection fields (env, ports, files,
//! labels) append.

use crate::config::{BackendPayload, ConfigBuilder, FileEntry, FileSource, PortSpec};
use crate::dsn::DsnProvider;
use crate::waiters::{CustomWaiter, WaitStrategy};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// A single option: a function that mutates a config builder.
pub type Opt = Box<dyn FnOnce(&mut ConfigBuilder) + Send>;

fn opt(f: impl FnOnce(&mut ConfigBuilder) + Send + 'static) -> Opt {
    Box::new(f)
}

/// Fold a sequence of options into `builder`, in order.
pub(crate) fn fold(builder: &mut ConfigBuilder, opts: Vec<Opt>) {
    for o in opts {
        o(builder);
    }
}

/// Set an environment variable. Last write for a given key wins.
pub fn with_env(key: impl Into<String> + Send + 'static, value: impl Into<String> + Send + 'static) -> Opt {
    opt(move |b| {
        b.env.insert(key.into(), value.into());
    })
}

/// Expose a container port, e.g. `"6379"` or `"6379/udp"`.
pub fn with_port(port: impl AsRef<str> + Send + 'static) -> Opt {
    opt(move |b| match port.as_ref().parse::<PortSpec>() {
        Ok(spec) => b.ports.push(spec),
        Err(_) => tracing::warn!(port = port.as_ref(), "testctr: ignoring malformed port option"),
    })
}

/// Override the image's default command.
pub fn with_command<I, S>(argv: I) -> Opt
where
    I: IntoIterator<Item = S> + Send + 'static,
    S: Into<String>,
{
    opt(move |b| {
        b.command = argv.into_iter().map(Into::into).collect();
    })
}

/// Install a file from the host filesystem into the container.
pub fn with_file(host_path: impl Into<std::path::PathBuf>, container_path: impl Into<String>) -> Opt {
    let host_path = host_path.into();
    let container_path = container_path.into();
    opt(move |b| {
        b.files.push(FileEntry {
            source: FileSource::HostPath(host_path),
            container_path,
            mode: None,
        });
    })
}

/// Install inline bytes into the container at `container_path`.
pub fn with_inline_file(bytes: impl Into<Vec<u8>>, container_path: impl Into<String>, mode: Option<u32>) -> Opt {
    let bytes = bytes.into();
    let container_path = container_path.into();
    opt(move |b| {
        b.files.push(FileEntry {
            source: FileSource::Inline(bytes),
            container_path,
            mode,
        });
    })
}

/// Select a backend by name, registered in advance via [`crate::registry::register`].
pub fn with_backend(name: impl Into<String>) -> Opt {
    let name = name.into();
    opt(move |b| b.backend = name)
}

/// Wait for a log substring to appear before considering the container ready.
pub fn with_wait_for_log(needle: impl Into<String>, timeout: Duration) -> Opt {
    let needle = needle.into();
    opt(move |b| {
        b.wait = WaitStrategy::LogSubstring { needle, timeout };
    })
}

/// Wait for `argv` to exit zero before considering the container ready.
pub fn with_wait_for_exec<I, S>(argv: I, timeout: Duration) -> Opt
where
    I: IntoIterator<Item = S> + Send + 'static,
    S: Into<String>,
{
    opt(move |b| {
        b.wait = WaitStrategy::Exec {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout,
        };
    })
}

/// Wait for an HTTP 2xx response from `path` on `container_port` before
/// considering the container ready. `container_port` is resolved against the
/// handle's published host:port at wait time, the same way
/// [`with_wait_for_log`] resolves a needle against the container rather than
/// a pre-resolved address — the host port is runtime-assigned and unknown
/// until after creation, so a literal URL can't be supplied up front.
pub fn with_wait_for_http(container_port: impl Into<String>, path: impl Into<String>, timeout: Duration) -> Opt {
    let container_port = container_port.into();
    let path = path.into();
    opt(move |b| {
        b.wait = WaitStrategy::Http { container_port, path, timeout };
    })
}

/// Wait using a caller-supplied readiness strategy.
pub fn with_wait_for_custom(waiter: Arc<dyn CustomWaiter>, timeout: Duration) -> Opt {
    opt(move |b| {
        b.wait = WaitStrategy::Custom { waiter, timeout };
    })
}

/// Stream the container's logs into the test's log sink once it starts.
pub fn with_logs() -> Opt {
    opt(|b| b.logs = true)
}

/// Override how long `New` waits for the container to report running
/// before failing the test.
pub fn with_startup_timeout(timeout: Duration) -> Opt {
    opt(move |b| b.startup_timeout = timeout)
}

/// Sleep this long after readiness succeeds, before `New` returns.
pub fn with_startup_delay(delay: Duration) -> Opt {
    opt(move |b| b.startup_delay = delay)
}

/// Attach a label to the container, in addition to the core's own
/// `testctr=true`/`testctr.test`/`testctr.image` labels.
pub fn with_label(key: impl Into<String>, value: impl Into<String>) -> Opt {
    let (key, value) = (key.into(), value.into());
    opt(move |b| {
        b.labels.insert(key, value);
    })
}

/// Configure a [`DsnProvider`] so `Handle::dsn` can provision per-test databases.
pub fn with_dsn_provider(provider: Arc<dyn DsnProvider>) -> Opt {
    opt(move |b| b.dsn_provider = Some(provider))
}

/// Attach an opaque JSON payload a named backend interprets. The core never
/// looks inside it; unknown backends simply ignore it.
pub fn with_payload_json(value: serde_json::Value) -> Opt {
    opt(move |b| b.payload = BackendPayload::Json(value))
}

/// Attach an opaque capability object a named backend downcasts and
/// interprets. Overwrites any payload set earlier in the fold.
pub fn with_payload_custom(value: Arc<dyn Any + Send + Sync>) -> Opt {
    opt(move |b| b.payload = BackendPayload::Custom(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    #[test]
    fn singleton_options_overwrite_in_fold_order() {
        let mut b = ConfigBuilder::new("alpine:latest");
        fold(
            &mut b,
            vec![with_backend("first"), with_backend("second")],
        );
        assert_eq!(b.backend, "second");
    }

    #[test]
    fn collection_options_append() {
        let mut b = ConfigBuilder::new("alpine:latest");
        fold(
            &mut b,
            vec![with_env("A", "1"), with_env("B", "2")],
        );
        assert_eq!(b.env.len(), 2);
    }

    #[test]
    fn permuted_collection_options_yield_equal_multisets() {
        let mut a = ConfigBuilder::new("alpine:latest");
        fold(
            &mut a,
            vec![with_port("80"), with_port("443/udp"), with_env("A", "1")],
        );
        let mut b = ConfigBuilder::new("alpine:latest");
        fold(
            &mut b,
            vec![with_env("A", "1"), with_port("443/udp"), with_port("80")],
        );
        let cfg_a = a.build().unwrap();
        let cfg_b = b.build().unwrap();
        let mut ports_a = cfg_a.ports.clone();
        let mut ports_b = cfg_b.ports.clone();
        ports_a.sort_by_key(|p| (p.port, p.protocol == Protocol::Udp));
        ports_b.sort_by_key(|p| (p.port, p.protocol == Protocol::Udp));
        assert_eq!(ports_a, ports_b);
        assert_eq!(cfg_a.env, cfg_b.env);
    }

    #[test]
    fn malformed_port_is_ignored_not_fatal() {
        let mut b = ConfigBuilder::new("alpine:latest");
        fold(&mut b, vec![with_port("not-a-port")]);
        assert!(b.ports.is_empty());
    }
}
