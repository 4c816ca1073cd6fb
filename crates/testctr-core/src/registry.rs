//! Process-global backend registry.

use crate::backend::Backend;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<dyn Backend>>>> = OnceLock::new();

fn table() -> &'static Mutex<HashMap<String, Arc<dyn Backend>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register `backend` under `name`. Last registration for a given name wins.
pub fn register(name: impl Into<String>, backend: Arc<dyn Backend>) {
    table().lock().unwrap().insert(name.into(), backend);
}

/// Look up a registered backend. Unregistered names yield
/// [`Error::BackendUnknown`], which the lifecycle engine surfaces as a
/// fatal test failure.
pub fn lookup(name: &str) -> Result<Arc<dyn Backend>> {
    table()
        .lock()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::BackendUnknown(name.to_string()))
}

/// True if a backend is registered under `name`.
pub fn is_registered(name: &str) -> bool {
    table().lock().unwrap().contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Backend for Noop {
        async fn create_container(&self, _: &str, _: &str, _: &ContainerConfig) -> Result<String> {
            Ok("noop".into())
        }
        async fn stop_container(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_container(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn inspect_container(&self, _: &str) -> Result<crate::backend::ContainerInfo> {
            Ok(Default::default())
        }
        async fn exec_in_container(&self, _: &str, _: &[String]) -> Result<(i64, String)> {
            Ok((0, String::new()))
        }
        async fn get_container_logs(&self, _: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn wait_for_log(&self, _: &str, _: &str, _: std::time::Duration) -> Result<()> {
            Ok(())
        }
        async fn internal_ip(&self, _: &str) -> Result<String> {
            Ok("0.0.0.0".into())
        }
    }

    #[test]
    fn unregistered_name_is_an_error() {
        assert!(matches!(lookup("does-not-exist-xyz"), Err(Error::BackendUnknown(_))));
    }

    #[test]
    fn last_registration_wins() {
        register("test-registry-dup", Arc::new(Noop));
        register("test-registry-dup", Arc::new(Noop));
        assert!(lookup("test-registry-dup").is_ok());
    }
}
