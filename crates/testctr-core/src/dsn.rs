//! DSN provider protocol: per-test database provisioning on top of a backend.

use crate::error::Result;
use crate::handle::Handle;
use async_trait::async_trait;

/// Lets a service-specific package (Postgres, MySQL, Redis, ...) layer
/// per-test database provisioning, connection-string formatting, and
/// cleanup on top of any backend.
#[async_trait]
pub trait DsnProvider: Send + Sync {
    /// Create an isolated database inside the container. `db_name` is
    /// derived from the test name.
    async fn create_database(&self, handle: &Handle, db_name: &str) -> Result<String>;

    /// Best-effort cleanup; failures are logged, never fatal.
    async fn drop_database(&self, handle: &Handle, db_name: &str) -> Result<()>;

    /// Pure formatting given an already-existing database.
    fn format_dsn(&self, handle: &Handle, db_name: &str) -> String;
}

/// Derive a stable, filesystem/DB-identifier-safe database name from a test name.
///
/// Lowercases, replaces path separators and anything outside
/// `[a-z0-9_]` with `_`, and collapses repeats the same way backend
/// container names are sanitized.
pub fn sanitize_db_name(test_name: &str) -> String {
    let mut out = String::with_capacity(test_name.len());
    let mut last_was_underscore = true; // skip leading separators
    for c in test_name.chars() {
        let mapped = if c.is_ascii_alphanumeric() {
            Some(c.to_ascii_lowercase())
        } else {
            None
        };
        match mapped {
            Some(c) => {
                out.push(c);
                last_was_underscore = false;
            }
            None => {
                if !last_was_underscore {
                    out.push('_');
                }
                last_was_underscore = true;
            }
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        "testctr_db".to_string()
    } else {
        out
    }
}
