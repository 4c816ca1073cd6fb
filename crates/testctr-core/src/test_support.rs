//! Mock backend for exercising the lifecycle engine without a real runtime.
//!
//! Grounded on the same call-log-plus-configurable-results shape as
//! `devc-core`'s `MockProvider`/`MockCall`, narrowed to the operations this
//! crate's [`crate::backend::Backend`] trait actually has.

use crate::backend::{Backend, ContainerInfo, PortBinding};
use crate::config::ContainerConfig;
use crate::dsn::DsnProvider;
use crate::error::{Error, Result};
use crate::handle::Handle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records which [`Backend`] methods were called and lets tests configure
/// per-call responses.
pub struct MockBackend {
    calls: Mutex<Vec<&'static str>>,
    create_counter: AtomicUsize,
    never_running: std::sync::atomic::AtomicBool,
    exec_responses: Mutex<Vec<(i64, String)>>,
    exec_default: Mutex<(i64, String)>,
    logs: Mutex<String>,
    ports: Mutex<HashMap<String, Vec<PortBinding>>>,
    fail_create: Mutex<Option<String>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            create_counter: AtomicUsize::new(0),
            never_running: std::sync::atomic::AtomicBool::new(false),
            exec_responses: Mutex::new(Vec::new()),
            exec_default: Mutex::new((0, String::new())),
            logs: Mutex::new(String::new()),
            ports: Mutex::new(HashMap::new()),
            fail_create: Mutex::new(None),
        }
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Make `inspect_container` always report a non-running state.
    pub fn set_never_running(&self) {
        self.never_running.store(true, Ordering::SeqCst);
    }

    /// Queue an (exit_code, output) pair for the next `exec_in_container` call.
    pub fn push_exec_response(&self, exit_code: i64, output: impl Into<String>) {
        self.exec_responses.lock().unwrap().push((exit_code, output.into()));
    }

    /// Set the (exit_code, output) returned once the queued responses are exhausted.
    pub fn set_exec_default(&self, exit_code: i64, output: impl Into<String>) {
        *self.exec_default.lock().unwrap() = (exit_code, output.into());
    }

    pub fn set_logs(&self, logs: impl Into<String>) {
        *self.logs.lock().unwrap() = logs.into();
    }

    pub fn set_port(&self, key: impl Into<String>, bindings: Vec<PortBinding>) {
        self.ports.lock().unwrap().insert(key.into(), bindings);
    }

    /// Make the next `create_container` call fail with `message`.
    pub fn fail_next_create(&self, message: impl Into<String>) {
        *self.fail_create.lock().unwrap() = Some(message.into());
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn create_container(&self, _test_name: &str, _image: &str, _config: &ContainerConfig) -> Result<String> {
        self.record("create_container");
        if let Some(message) = self.fail_create.lock().unwrap().take() {
            return Err(Error::CreateFailed {
                image: "mock".into(),
                backend: "mock".into(),
                source: message.into(),
            });
        }
        let n = self.create_counter.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Ok("mock-container-id".to_string())
        } else {
            Ok(format!("mock-container-id-{n}"))
        }
    }

    async fn stop_container(&self, _id: &str) -> Result<()> {
        self.record("stop_container");
        Ok(())
    }

    async fn remove_container(&self, _id: &str) -> Result<()> {
        self.record("remove_container");
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        self.record("inspect_container");
        if self.never_running.load(Ordering::SeqCst) {
            return Ok(ContainerInfo {
                running: false,
                status: "created".into(),
                id: id.to_string(),
                ..Default::default()
            });
        }
        Ok(ContainerInfo {
            running: true,
            status: "running".into(),
            id: id.to_string(),
            ports: self.ports.lock().unwrap().clone(),
            ..Default::default()
        })
    }

    async fn exec_in_container(&self, _id: &str, _argv: &[String]) -> Result<(i64, String)> {
        self.record("exec_in_container");
        let mut queue = self.exec_responses.lock().unwrap();
        if !queue.is_empty() {
            return Ok(queue.remove(0));
        }
        Ok(self.exec_default.lock().unwrap().clone())
    }

    async fn get_container_logs(&self, _id: &str) -> Result<String> {
        self.record("get_container_logs");
        Ok(self.logs.lock().unwrap().clone())
    }

    async fn wait_for_log(&self, _id: &str, needle: &str, timeout: Duration) -> Result<()> {
        self.record("wait_for_log");
        if self.logs.lock().unwrap().contains(needle) {
            Ok(())
        } else {
            Err(Error::WaitTimeout {
                elapsed: timeout,
                message: format!("{needle:?} not found"),
            })
        }
    }

    async fn internal_ip(&self, _id: &str) -> Result<String> {
        self.record("internal_ip");
        Ok("172.17.0.2".to_string())
    }

    async fn commit(&self, _id: &str, _new_image_ref: &str) -> Result<()> {
        self.record("commit");
        Err(Error::Unsupported("mock backend does not support commit".into()))
    }
}

/// A [`DsnProvider`] double that tracks created/dropped database names
/// in-memory instead of talking to a real database engine, the same role
/// [`MockBackend`] plays for [`Backend`].
pub struct MockDsnProvider {
    created: Mutex<Vec<String>>,
    dropped: Mutex<Vec<String>>,
    fail_create: Mutex<Option<String>>,
}

impl Default for MockDsnProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDsnProvider {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
            fail_create: Mutex::new(None),
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.dropped.lock().unwrap().clone()
    }

    /// Make the next `create_database` call fail with `message`.
    pub fn fail_next_create(&self, message: impl Into<String>) {
        *self.fail_create.lock().unwrap() = Some(message.into());
    }
}

#[async_trait]
impl DsnProvider for MockDsnProvider {
    async fn create_database(&self, _handle: &Handle, db_name: &str) -> Result<String> {
        if let Some(message) = self.fail_create.lock().unwrap().take() {
            return Err(Error::Unsupported(message));
        }
        self.created.lock().unwrap().push(db_name.to_string());
        Ok(self.format_dsn(_handle, db_name))
    }

    async fn drop_database(&self, _handle: &Handle, db_name: &str) -> Result<()> {
        self.dropped.lock().unwrap().push(db_name.to_string());
        Ok(())
    }

    fn format_dsn(&self, _handle: &Handle, db_name: &str) -> String {
        format!("mock://localhost/{db_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let mock = MockBackend::new();
        let config = ContainerConfig {
            image: "alpine".into(),
            env: HashMap::new(),
            ports: Vec::new(),
            command: Vec::new(),
            files: Vec::new(),
            wait: Default::default(),
            startup_timeout: Duration::from_secs(1),
            startup_delay: Duration::ZERO,
            logs: false,
            dsn_provider: None,
            backend: "mock".into(),
            payload: Default::default(),
            labels: HashMap::new(),
        };
        let id = mock.create_container("t", "alpine", &config).await.unwrap();
        mock.inspect_container(&id).await.unwrap();
        assert_eq!(mock.calls(), vec!["create_container", "inspect_container"]);
    }

    #[tokio::test]
    async fn exec_responses_are_queued_fifo() {
        let mock = MockBackend::new();
        mock.push_exec_response(0, "first");
        mock.push_exec_response(1, "second");
        let (code, out) = mock.exec_in_container("id", &[]).await.unwrap();
        assert_eq!((code, out.as_str()), (0, "first"));
        let (code, out) = mock.exec_in_container("id", &[]).await.unwrap();
        assert_eq!((code, out.as_str()), (1, "second"));
    }
}
