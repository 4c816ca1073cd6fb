//! Native Docker API backend built on `bollard`, for when shelling out to a
//! CLI binary is undesirable (no `docker` on `PATH`, tighter control over
//! the create/exec calls).
//!
//! Grounded on `devc-provider`'s `DockerProvider`: same bollard container
//! options, same `inspect_container` field walk, same RFC3339 timestamp
//! parsing for `Created`/`State.StartedAt`.

use async_trait::async_trait;
use bollard::container::{
    Config as BollardConfig, CreateContainerOptions, LogsOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use testctr_core::{Backend, ContainerConfig, ContainerInfo, Error, PortBinding, Result};

/// Talks to the Docker (or Podman, via its Docker-compatible API) daemon
/// directly over its HTTP/unix-socket API instead of spawning a CLI.
pub struct DockerApiBackend {
    client: Docker,
}

impl DockerApiBackend {
    /// Connect using the same defaults `bollard::Docker::connect_with_local_defaults`
    /// uses: `DOCKER_HOST` if set, otherwise the platform's default socket.
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| Error::CreateFailed {
                image: String::new(),
                backend: "docker-api".to_string(),
                source: Box::new(e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Backend for DockerApiBackend {
    async fn create_container(&self, test_name: &str, image: &str, config: &ContainerConfig) -> Result<String> {
        let name = format!("testctr-{}-{}", sanitize(test_name), &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = HashMap::new();
        for port in &config.ports {
            let key = port.normalized();
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![bollard::service::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: None,
                }]),
            );
        }

        let mut labels = config.labels.clone();
        labels.insert("testctr".to_string(), "true".to_string());
        labels.insert("testctr.test".to_string(), test_name.to_string());
        labels.insert("testctr.image".to_string(), image.to_string());

        let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let host_config = bollard::service::HostConfig {
            port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
            ..Default::default()
        };

        let container_config = BollardConfig {
            image: Some(image.to_string()),
            cmd: if config.command.is_empty() { None } else { Some(config.command.clone()) },
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(labels),
            exposed_ports: if exposed_ports.is_empty() { None } else { Some(exposed_ports) },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: name.as_str(), platform: None };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| Error::CreateFailed {
                image: image.to_string(),
                backend: "docker-api".to_string(),
                source: Box::new(e),
            })?;

        self.client
            .start_container(&response.id, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::CreateFailed {
                image: image.to_string(),
                backend: "docker-api".to_string(),
                source: Box::new(e),
            })?;

        Ok(response.id)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let _ = self
            .client
            .stop_container(id, Some(StopContainerOptions { t: 10 }))
            .await;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions { force: true, ..Default::default() };
        let _ = self.client.remove_container(id, Some(options)).await;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        let info = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| match &e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    Error::NotFound(id.to_string())
                }
                _ => Error::InspectFailed { id: id.to_string(), source: Box::new(e) },
            })?;

        let state = info.state.as_ref();
        let running = state.and_then(|s| s.running).unwrap_or(false);
        let status = state
            .and_then(|s| s.status)
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        let exit_code = state.and_then(|s| s.exit_code);

        let created = info
            .created
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);

        let mut ports: HashMap<String, Vec<PortBinding>> = HashMap::new();
        if let Some(network) = &info.network_settings {
            if let Some(port_map) = &network.ports {
                for (key, bindings) in port_map {
                    let entries = bindings
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|b| {
                            let host_port: u16 = b.host_port?.parse().ok()?;
                            Some(PortBinding { host_ip: b.host_ip.unwrap_or_default(), host_port })
                        })
                        .collect();
                    ports.insert(key.clone(), entries);
                }
            }
        }

        Ok(ContainerInfo {
            running,
            status,
            exit_code,
            id: id.to_string(),
            name: info.name.unwrap_or_default().trim_start_matches('/').to_string(),
            created,
            ports,
        })
    }

    async fn exec_in_container(&self, id: &str, argv: &[String]) -> Result<(i64, String)> {
        let options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .client
            .create_exec(id, options)
            .await
            .map_err(|e| Error::ExecTransportFailed(e.to_string()))?;

        let result = self
            .client
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .map_err(|e| Error::ExecTransportFailed(e.to_string()))?;

        let mut output = String::new();
        if let StartExecResults::Attached { mut output: stream, .. } = result {
            while let Some(chunk) = stream.next().await {
                if let Ok(chunk) = chunk {
                    output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                }
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::ExecTransportFailed(e.to_string()))?;
        Ok((inspect.exit_code.unwrap_or(0), output))
    }

    async fn get_container_logs(&self, id: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.client.logs(id, Some(options));
        let mut logs = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => logs.push_str(&String::from_utf8_lossy(&chunk.into_bytes())),
                Err(e) => return Err(Error::LogsUnavailable(e.to_string())),
            }
        }
        Ok(logs)
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
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn internal_ip(&self, id: &str) -> Result<String> {
        let info = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| match &e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    Error::NotFound(id.to_string())
                }
                _ => Error::InspectFailed { id: id.to_string(), source: Box::new(e) },
            })?;
        let ip = info
            .network_settings
            .and_then(|ns| ns.networks)
            .and_then(|nets| nets.values().find_map(|n| n.ip_address.clone()))
            .unwrap_or_default();
        Ok(ip)
    }

    async fn commit(&self, _id: &str, _new_image_ref: &str) -> Result<()> {
        // bollard exposes commit_container but devc never wired it up; follow
        // suit until a caller actually needs it from this backend.
        Err(Error::Unsupported("docker-api backend does not support commit yet".to_string()))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}
