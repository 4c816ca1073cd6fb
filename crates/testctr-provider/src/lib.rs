//! Built-in testctr backends.

mod cli;

#[cfg(feature = "docker-api")]
mod docker_api;

pub use cli::CliBackend;

#[cfg(feature = "docker-api")]
pub use docker_api::DockerApiBackend;

/// Register the default `"local"` CLI backend. `testctr::configure` and the
/// facade crate's lazy init call this once per process; it is also safe to
/// call directly in a test binary that never touches the facade crate.
///
/// Reads `Settings.runtime` (set once via `testctr::configure` before the
/// first container is created) so a caller overriding the runtime binary
/// name (e.g. `"podman"`) actually takes effect.
pub fn register_default() {
    let runtime = testctr_core::settings::current().runtime.clone();
    testctr_core::register("local", std::sync::Arc::new(CliBackend::new(runtime)));
}
