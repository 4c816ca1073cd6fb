//! CLI-driver backend: realizes `Backend` by shelling out to a runtime binary.
//!
//! Structured the way `devc-provider`'s `cli_provider.rs` shells out to
//! `docker`/`podman`: build argv, run it, and for `inspect` parse the
//! runtime's JSON array output by hand rather than modeling its full schema.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use testctr_core::{Backend, ContainerConfig, ContainerInfo, Error, PortBinding, Result};
use tokio::process::Command;

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shells out to a container runtime binary (`docker`, `podman`, ...) found on `PATH`.
pub struct CliBackend {
    runtime: String,
}

impl CliBackend {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self { runtime: runtime.into() }
    }

    fn command(&self) -> Command {
        Command::new(&self.runtime)
    }

    async fn run(&self, args: &[&str]) -> std::result::Result<String, String> {
        let output = self
            .command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn env_args(env: &HashMap<String, String>) -> Vec<String> {
        env.iter().map(|(k, v)| format!("--env={k}={v}")).collect()
    }

    fn port_args(ports: &[testctr_core::PortSpec]) -> Vec<String> {
        ports
            .iter()
            .map(|p| format!("-p={}/{}", p.port, p.protocol))
            .collect()
    }

    /// Classify an `inspect`-family failure the way `DockerApiBackend` does
    /// for a 404: the runtime's own "no such container/object" message means
    /// the container is genuinely gone, anything else (daemon down, denied
    /// permission, bad socket) is a transport failure and must not be
    /// reported as `NotFound`.
    fn classify_inspect_error(id: &str, message: String) -> Error {
        if message.to_lowercase().contains("no such") {
            Error::NotFound(id.to_string())
        } else {
            Error::InspectFailed { id: id.to_string(), source: Box::from(message) }
        }
    }
}

/// Derive a runtime-legal container name from the test name and a random suffix.
///
/// Lowercases, replaces anything outside `[a-z0-9-]` with `-`, collapses
/// runs of hyphens, and trims leading/trailing hyphens, the same
/// normalization `devc-core`'s `sanitize_name` applies to devcontainer names.
fn derive_container_name(test_name: &str) -> String {
    let sanitized: String = test_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();

    let mut collapsed = String::new();
    let mut last_was_hyphen = true;
    for c in sanitized.chars() {
        if c == '-' {
            if !last_was_hyphen {
                collapsed.push(c);
            }
            last_was_hyphen = true;
        } else {
            collapsed.push(c);
            last_was_hyphen = false;
        }
    }
    if collapsed.ends_with('-') {
        collapsed.pop();
    }
    let base = if collapsed.is_empty() { "testctr".to_string() } else { collapsed };
    format!("testctr-{base}-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

#[async_trait]
impl Backend for CliBackend {
    async fn create_container(&self, test_name: &str, image: &str, config: &ContainerConfig) -> Result<String> {
        let name = derive_container_name(test_name);

        let mut args = vec!["run".to_string(), "-d".to_string(), format!("--name={name}")];
        args.extend(Self::env_args(&config.env));
        args.extend(Self::port_args(&config.ports));
        args.push("--label=testctr=true".to_string());
        args.push(format!("--label=testctr.test={test_name}"));
        args.push(format!("--label=testctr.image={image}"));
        for (k, v) in &config.labels {
            args.push(format!("--label={k}={v}"));
        }
        args.push(image.to_string());
        args.extend(config.command.clone());

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&args_refs).await.map_err(|e| Error::CreateFailed {
            image: image.to_string(),
            backend: "local".to_string(),
            source: e.into(),
        })?;
        let id = id.trim().to_string();

        for file in &config.files {
            if let Err(e) = self.install_file(&id, file).await {
                let _ = self.remove_container(&id).await;
                return Err(Error::CreateFailed {
                    image: image.to_string(),
                    backend: "local".to_string(),
                    source: e.into(),
                });
            }
        }

        Ok(id)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let _ = self.run(&["stop", id]).await;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        // rm -f on an already-gone container is success; devc's CLI provider
        // treats "no such container" as a no-op for the same reason.
        let _ = self.run(&["rm", "-f", id]).await;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        let output = self
            .run(&["inspect", "--format={{json .}}", id])
            .await
            .map_err(|msg| Self::classify_inspect_error(id, msg))?;

        // docker/podman's --format={{json .}} emits one JSON object per
        // line/container; `inspect <id>` with a single id yields one line.
        let info: serde_json::Value = serde_json::from_str(output.trim()).map_err(|e| Error::InspectFailed {
            id: id.to_string(),
            source: Box::new(e),
        })?;
        parse_inspect(id, &info)
    }

    async fn exec_in_container(&self, id: &str, argv: &[String]) -> Result<(i64, String)> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(argv.iter().cloned());
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .command()
            .args(&args_refs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::ExecTransportFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok((output.status.code().unwrap_or(-1) as i64, format!("{stdout}{stderr}")))
    }

    async fn get_container_logs(&self, id: &str) -> Result<String> {
        self.run(&["logs", id]).await.map_err(Error::LogsUnavailable)
    }

    async fn wait_for_log(&self, id: &str, needle: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if let Ok(logs) = self.get_container_logs(id).await {
                if logs.contains(needle) {
                    return Ok(());
                }
            }
            if start.elapsed() >= timeout {
                return Err(Error::WaitTimeout {
                    elapsed: start.elapsed(),
                    message: format!("log substring {needle:?} not seen for container {id}"),
                });
            }
            tokio::time::sleep(LOG_POLL_INTERVAL).await;
        }
    }

    async fn internal_ip(&self, id: &str) -> Result<String> {
        let output = self
            .run(&["inspect", "--format={{json .NetworkSettings.Networks}}", id])
            .await
            .map_err(|msg| Self::classify_inspect_error(id, msg))?;
        let networks: serde_json::Value = serde_json::from_str(output.trim()).unwrap_or(serde_json::Value::Null);
        let ip = networks
            .as_object()
            .and_then(|nets| nets.values().find_map(|n| n.get("IPAddress")?.as_str()))
            .unwrap_or_default();
        Ok(ip.to_string())
    }

    async fn commit(&self, id: &str, new_image_ref: &str) -> Result<()> {
        self.run(&["commit", id, new_image_ref])
            .await
            .map(|_| ())
            .map_err(|e| Error::Unsupported(format!("commit failed: {e}")))
    }
}

impl CliBackend {
    async fn install_file(&self, id: &str, file: &testctr_core::FileEntry) -> std::result::Result<(), String> {
        match &file.source {
            testctr_core::FileSource::HostPath(path) => {
                let target = format!("{id}:{}", file.container_path);
                self.run(&["cp", &path.to_string_lossy(), &target]).await?;
            }
            testctr_core::FileSource::Inline(bytes) => {
                let script = format!(
                    "cat > {path} {mode}",
                    path = shell_quote(&file.container_path),
                    mode = file
                        .mode
                        .map(|m| format!("&& chmod {m:o} {}", shell_quote(&file.container_path)))
                        .unwrap_or_default(),
                );
                let mut child = self
                    .command()
                    .args(["exec", "-i", id, "sh", "-c", &script])
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| e.to_string())?;
                use tokio::io::AsyncWriteExt;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(bytes).await.map_err(|e| e.to_string())?;
                }
                let status = child.wait().await.map_err(|e| e.to_string())?;
                if !status.success() {
                    return Err(format!("installing inline file into {id} failed"));
                }
            }
        }
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn parse_inspect(id: &str, info: &serde_json::Value) -> Result<ContainerInfo> {
    let state = info.get("State").and_then(serde_json::Value::as_object);

    let running = state
        .and_then(|s| s.get("Running"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let status = state
        .and_then(|s| s.get("Status"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let exit_code = state.and_then(|s| s.get("ExitCode")).and_then(serde_json::Value::as_i64);

    let name = info
        .get("Name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
        .trim_start_matches('/')
        .to_string();

    let created = info
        .get("Created")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0);

    let mut ports: HashMap<String, Vec<PortBinding>> = HashMap::new();
    if let Some(port_map) = info
        .get("NetworkSettings")
        .and_then(|n| n.get("Ports"))
        .and_then(serde_json::Value::as_object)
    {
        for (key, bindings) in port_map {
            let entries = match bindings.as_array() {
                Some(arr) => arr
                    .iter()
                    .filter_map(|b| {
                        let host_port: u16 = b.get("HostPort")?.as_str()?.parse().ok()?;
                        let host_ip = b
                            .get("HostIp")
                            .and_then(|v| v.as_str())
                            .unwrap_or("0.0.0.0")
                            .to_string();
                        Some(PortBinding { host_ip, host_port })
                    })
                    .collect(),
                None => Vec::new(),
            };
            ports.insert(key.clone(), entries);
        }
    }

    Ok(ContainerInfo {
        running,
        status,
        exit_code,
        id: id.to_string(),
        name,
        created,
        ports,
    })
}
