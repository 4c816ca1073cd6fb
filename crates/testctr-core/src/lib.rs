//! Core lifecycle engine and backend abstraction for container-backed integration tests.

mod backend;
mod config;
mod coordinator;
mod dsn;
mod engine;
mod error;
mod handle;
mod options;
mod registry;
mod test_context;
mod waiters;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub mod settings;

pub use backend::{Backend, ContainerInfo, PortBinding};
pub use config::{BackendPayload, ConfigBuilder, ContainerConfig, FileEntry, FileSource, PortSpec, Protocol};
pub use coordinator::Coordinator;
pub use dsn::{sanitize_db_name, DsnProvider};
pub use engine::new;
pub use error::{Error, Result};
pub use handle::Handle;
pub use options::{
    with_backend, with_command, with_dsn_provider, with_env, with_file, with_inline_file,
    with_label, with_logs, with_payload_custom, with_payload_json, with_port,
    with_startup_delay, with_startup_timeout, with_wait_for_custom, with_wait_for_exec,
    with_wait_for_http, with_wait_for_log, Opt,
};
pub use registry::{is_registered, lookup, register};
pub use settings::{configure, Settings};
pub use test_context::{Harness, TestContext};
pub use waiters::{CustomWaiter, WaitStrategy};
