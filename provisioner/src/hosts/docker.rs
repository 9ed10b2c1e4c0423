use super::{CommandOutput, Connection, ContainerClient, ContainerInfo, LogStream};
use crate::error::{self, Component, Result};
use async_trait::async_trait;
use log::{debug, trace};
use rke_model::constants::{
    CONTAINER_NAME_LABEL, DEFAULT_DOCKER_ROOT_DIR, DEFAULT_DOCKER_SOCKET, HEALTHCHECK_URL_LABEL,
};
use rke_model::Process;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use rke_model::config::PrivateRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Drives the docker CLI on the far side of a host connection.
pub struct DockerCliClient {
    conn: Arc<dyn Connection>,
    socket: String,
}

impl DockerCliClient {
    pub fn new(conn: Arc<dyn Connection>, socket: &str) -> Self {
        let socket = if socket.is_empty() {
            DEFAULT_DOCKER_SOCKET
        } else {
            socket
        };
        Self {
            conn,
            socket: socket.to_string(),
        }
    }

    fn engine_error(&self, operation: &str, message: String) -> error::Error {
        error::Error::ContainerEngine {
            component: Component::Docker,
            host: self.conn.address().to_string(),
            operation: operation.to_string(),
            message,
        }
    }

    async fn raw(&self, global: &[String], args: Vec<String>) -> Result<CommandOutput> {
        let mut full: Vec<String> = global.to_vec();
        full.push("-H".to_string());
        full.push(format!("unix://{}", self.socket));
        full.extend(args);
        trace!("[docker] {}: docker {}", self.conn.address(), full.join(" "));
        self.conn.run("docker", &full).await
    }

    /// Runs a docker subcommand and turns a non-zero exit into a container engine error.
    async fn docker(&self, operation: &str, args: Vec<String>) -> Result<CommandOutput> {
        let output = self.raw(&[], args).await?;
        if !output.success() {
            return Err(self.engine_error(operation, output.stderr_str()));
        }
        Ok(output)
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// The `docker create` arguments for a process. The first command element becomes the
/// entrypoint and everything after it follows the image.
pub(crate) fn create_args(spec: &Process) -> Vec<String> {
    let mut args = strings(["create", "--name"]);
    args.push(spec.name.clone());

    let mut labels = spec.labels.clone();
    labels.insert(CONTAINER_NAME_LABEL.to_string(), spec.name.clone());
    if !spec.health_check.is_empty() {
        labels.insert(
            HEALTHCHECK_URL_LABEL.to_string(),
            spec.health_check.url.clone(),
        );
    }
    for (key, value) in &labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for env in &spec.env {
        args.push("--env".to_string());
        args.push(env.clone());
    }
    for bind in &spec.binds {
        args.push("--volume".to_string());
        args.push(bind.clone());
    }
    for from in &spec.volumes_from {
        args.push("--volumes-from".to_string());
        args.push(from.clone());
    }
    for (flag, value) in [
        ("--network", &spec.network_mode),
        ("--restart", &spec.restart_policy),
        ("--pid", &spec.pid_mode),
    ] {
        if !value.is_empty() {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }
    if spec.privileged {
        args.push("--privileged".to_string());
    }
    for port in &spec.publish {
        args.push("--publish".to_string());
        args.push(port.clone());
    }
    if let Some(user) = &spec.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }
    let mut command = spec.command.iter();
    if let Some(entrypoint) = command.next() {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
    }
    args.push(spec.image.clone());
    args.extend(command.cloned());
    args.extend(spec.args.iter().cloned());
    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectOutput {
    id: String,
    name: String,
    config: InspectConfig,
    #[serde(default)]
    host_config: Option<InspectHostConfig>,
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    binds: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    exit_code: i64,
}

pub(crate) fn parse_inspect(json: &[u8]) -> std::result::Result<Option<ContainerInfo>, serde_json::Error> {
    let containers: Vec<InspectOutput> = serde_json::from_slice(json)?;
    Ok(containers.into_iter().next().map(|c| ContainerInfo {
        id: c.id,
        name: c.name.trim_start_matches('/').to_string(),
        image: c.config.image,
        entrypoint: c.config.entrypoint.unwrap_or_default(),
        cmd: c.config.cmd.unwrap_or_default(),
        env: c.config.env.unwrap_or_default(),
        binds: c
            .host_config
            .and_then(|h| h.binds)
            .unwrap_or_default(),
        labels: c.config.labels.unwrap_or_default(),
        running: c.state.running,
        exit_code: c.state.exit_code,
    }))
}

/// The `DockerRootDir` printed by `docker info`, when it is an absolute path.
pub(crate) fn parse_root_dir(stdout: &str) -> Option<String> {
    let dir = stdout.trim().trim_end_matches('/');
    if dir.starts_with('/') {
        Some(dir.to_string())
    } else {
        None
    }
}

#[derive(Serialize)]
struct DockerConfigJson {
    auths: BTreeMap<String, DockerConfigAuth>,
}

#[derive(Serialize)]
struct DockerConfigAuth {
    auth: String,
}

#[derive(Deserialize)]
struct RegistryAuth {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    serveraddress: String,
}

/// Turns a base64 JSON registry auth document into a docker `config.json`.
pub(crate) fn docker_config(registry_auth: &str) -> Result<String> {
    let raw = base64::decode(registry_auth.trim()).map_err(|e| {
        error::Error::config(format!("registry auth config is not base64: {}", e))
    })?;
    let auth: RegistryAuth = serde_json::from_slice(&raw).context(error::SerdeSnafu {
        component: Component::Docker,
        what: "registry auth config",
    })?;
    let mut auths = BTreeMap::new();
    auths.insert(
        auth.serveraddress,
        DockerConfigAuth {
            auth: base64::encode(format!("{}:{}", auth.username, auth.password)),
        },
    );
    serde_json::to_string(&DockerConfigJson { auths }).context(error::SerdeSnafu {
        component: Component::Docker,
        what: "docker config",
    })
}

/// A docker `config.json` holding every registry that has credentials, or `None` when none do.
pub(crate) fn registries_config(registries: &[PrivateRegistry]) -> Result<Option<String>> {
    let auths: BTreeMap<String, DockerConfigAuth> = registries
        .iter()
        .filter(|r| !r.user.is_empty())
        .map(|r| {
            (
                r.url.clone(),
                DockerConfigAuth {
                    auth: base64::encode(format!("{}:{}", r.user, r.password)),
                },
            )
        })
        .collect();
    if auths.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&DockerConfigJson { auths })
        .map(Some)
        .context(error::SerdeSnafu {
            component: Component::Docker,
            what: "docker config",
        })
}

#[async_trait]
impl ContainerClient for DockerCliClient {
    async fn pull(&self, image: &str, registry_auth: Option<&str>) -> Result<()> {
        debug!("[docker] Pulling image '{}' on host '{}'", image, self.conn.address());
        let registry_auth = match registry_auth {
            Some(auth) if !auth.is_empty() => auth,
            _ => {
                self.docker("pull", strings(["pull", image])).await?;
                return Ok(());
            }
        };

        let dir = format!("/tmp/rke-docker-{}", uuid::Uuid::new_v4());
        self.conn
            .write_file(
                &format!("{}/config.json", dir),
                docker_config(registry_auth)?.as_bytes(),
                0o600,
            )
            .await?;
        let pulled = self
            .raw(&strings(["--config", &dir]), strings(["pull", image]))
            .await;
        // Credentials never outlive the pull.
        self.conn.run("rm", &strings(["-rf", &dir])).await?;
        let output = pulled?;
        if !output.success() {
            return Err(self.engine_error("pull", output.stderr_str()));
        }
        Ok(())
    }

    async fn create(&self, spec: &Process) -> Result<String> {
        let output = self.docker("create", create_args(spec)).await?;
        Ok(output.stdout_str())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker("start", strings(["start", id])).await.map(|_| ())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.docker("stop", strings(["stop", id])).await.map(|_| ())
    }

    async fn restart(&self, id: &str) -> Result<()> {
        self.docker("restart", strings(["restart", id]))
            .await
            .map(|_| ())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let output = self.docker("wait", strings(["wait", id])).await?;
        let text = output.stdout_str();
        text.parse::<i64>()
            .map_err(|_| self.engine_error("wait", format!("unexpected exit status '{}'", text)))
    }

    async fn remove(&self, id: &str, force: bool, remove_volumes: bool) -> Result<()> {
        let mut args = strings(["rm"]);
        if force {
            args.push("--force".to_string());
        }
        if remove_volumes {
            args.push("--volumes".to_string());
        }
        args.push(id.to_string());
        self.docker("rm", args).await.map(|_| ())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let output = self
            .raw(&[], strings(["inspect", "--type", "container", name]))
            .await?;
        if !output.success() {
            let stderr = output.stderr_str();
            if stderr.contains("No such") {
                return Ok(None);
            }
            return Err(self.engine_error("inspect", stderr));
        }
        parse_inspect(&output.stdout).context(error::SerdeSnafu {
            component: Component::Docker,
            what: format!("inspect output of '{}'", name),
        })
    }

    async fn logs(&self, id: &str, stream: LogStream, since: Option<i64>) -> Result<Vec<u8>> {
        let mut args = strings(["logs"]);
        if let Some(since) = since {
            args.push("--since".to_string());
            args.push(since.to_string());
        }
        args.push(id.to_string());
        let output = self.docker("logs", args).await?;
        Ok(match stream {
            LogStream::Stdout => output.stdout,
            LogStream::Stderr => output.stderr,
            LogStream::Both => [output.stdout, output.stderr].concat(),
        })
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<CommandOutput> {
        let mut args = strings(["exec", id]);
        args.extend(cmd.iter().cloned());
        self.raw(&[], args).await
    }

    async fn root_dir(&self) -> Result<String> {
        let output = self
            .docker("info", strings(["info", "--format", "{{.DockerRootDir}}"]))
            .await?;
        Ok(parse_root_dir(&output.stdout_str()).unwrap_or_else(|| {
            debug!(
                "[docker] Host '{}' reported no docker root dir, using '{}'",
                self.conn.address(),
                DEFAULT_DOCKER_ROOT_DIR
            );
            DEFAULT_DOCKER_ROOT_DIR.to_string()
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::HealthCheck;

    #[test]
    fn create_splits_entrypoint() {
        let spec = Process {
            name: "kubelet".to_string(),
            image: "rancher/hyperkube:v1.24.7-rancher1".to_string(),
            command: vec![
                "/opt/rke-tools/entrypoint.sh".to_string(),
                "kubelet".to_string(),
            ],
            args: vec!["--v=2".to_string()],
            env: vec!["A=1".to_string()],
            binds: vec!["/etc/kubernetes:/etc/kubernetes:z".to_string()],
            volumes_from: vec!["service-sidekick".to_string()],
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            privileged: true,
            health_check: HealthCheck {
                url: "https://localhost:10250/healthz".to_string(),
            },
            ..Default::default()
        };
        let args = create_args(&spec);
        let image_at = args.iter().position(|a| a == &spec.image).unwrap();
        assert_eq!(&args[image_at + 1..], &["kubelet", "--v=2"]);
        let entry_at = args.iter().position(|a| a == "--entrypoint").unwrap();
        assert_eq!(args[entry_at + 1], "/opt/rke-tools/entrypoint.sh");
        assert!(args.contains(&"io.rancher.rke.container.name=kubelet".to_string()));
        assert!(args
            .contains(&"io.rancher.rke.healthcheck.url=https://localhost:10250/healthz".to_string()));
        assert!(args.contains(&"--privileged".to_string()));
        assert!(!args.contains(&"--pid".to_string()));
    }

    #[test]
    fn docker_root_dir_output() {
        assert_eq!(parse_root_dir("/data/docker\n"), Some("/data/docker".to_string()));
        assert_eq!(parse_root_dir("/var/lib/docker/"), Some("/var/lib/docker".to_string()));
        assert_eq!(parse_root_dir(""), None);
        assert_eq!(parse_root_dir("<no value>"), None);
    }

    #[test]
    fn inspect_output() {
        let json = br#"[{
            "Id": "abc123",
            "Name": "/etcd",
            "Config": {
                "Image": "rancher/mirrored-coreos-etcd:v3.5.4",
                "Entrypoint": null,
                "Cmd": ["/usr/local/bin/etcd", "--name=etcd-e1"],
                "Env": ["ETCDCTL_API=3"],
                "Labels": {"io.rancher.rke.container.name": "etcd"}
            },
            "HostConfig": {"Binds": ["/var/lib/etcd:/var/lib/rancher/etcd/:z"]},
            "State": {"Running": true, "ExitCode": 0}
        }]"#;
        let info = parse_inspect(json).unwrap().unwrap();
        assert_eq!(info.name, "etcd");
        assert!(info.entrypoint.is_empty());
        assert_eq!(info.cmd.len(), 2);
        assert!(info.running);
        assert!(parse_inspect(b"[]").unwrap().is_none());
    }

    #[test]
    fn registry_config() {
        let registry = rke_model::config::PrivateRegistry {
            url: "registry.example.com".to_string(),
            user: "ops".to_string(),
            password: "hunter2".to_string(),
            is_default: true,
        };
        let config = docker_config(&registry.auth_config().unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&config).unwrap();
        assert_eq!(
            value["auths"]["registry.example.com"]["auth"],
            base64::encode("ops:hunter2")
        );
    }
}
