use super::{CommandOutput, Connection, ContainerClient, DockerCliClient, HostDialer};
use crate::error::{self, Component, Result};
use async_trait::async_trait;
use log::{debug, trace};
use openssh::{KnownHosts, Session, SessionBuilder};
use rke_model::config::BastionHost;
use rke_model::Node;
use snafu::ResultExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Opens one multiplexed SSH session per node, optionally through a bastion.
#[derive(Debug, Clone)]
pub struct SshDialer {
    pub dial_timeout: Duration,
    pub bastion: Option<BastionHost>,
}

impl SshDialer {
    pub fn new(dial_timeout: Duration, bastion: Option<BastionHost>) -> Self {
        Self {
            dial_timeout,
            bastion: bastion.filter(|b| !b.address.is_empty()),
        }
    }
}

/// `~/` is resolved against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Materializes an inline key so ssh can read it. The file lives as long as the connection.
fn key_file(address: &str, key: &str) -> Result<NamedTempFile> {
    let context = || error::IoSnafu {
        component: Component::Dialer,
        what: format!("write the ssh key for '{}'", address),
    };
    let mut file = NamedTempFile::new().with_context(|_| context())?;
    file.write_all(key.as_bytes()).with_context(|_| context())?;
    file.flush().with_context(|_| context())?;
    Ok(file)
}

fn parse_port(address: &str, port: &str) -> Result<u16> {
    port.parse::<u16>().map_err(|_| {
        error::Error::config(format!(
            "ssh port '{}' of host '{}' is not a valid port",
            port, address
        ))
    })
}

fn jump_host(bastion: &BastionHost) -> String {
    let mut target = bastion.address.clone();
    if !bastion.user.is_empty() {
        target = format!("{}@{}", bastion.user, target);
    }
    if !bastion.port.is_empty() {
        target = format!("{}:{}", target, bastion.port);
    }
    target
}

#[async_trait]
impl HostDialer for SshDialer {
    async fn dial(&self, node: &Node) -> Result<Arc<dyn Connection>> {
        let mut builder = SessionBuilder::default();
        builder
            .known_hosts_check(KnownHosts::Accept)
            .user_known_hosts_file("/dev/null")
            .connect_timeout(self.dial_timeout);
        if !node.user.is_empty() {
            builder.user(node.user.clone());
        }
        if !node.port.is_empty() {
            builder.port(parse_port(&node.address, &node.port)?);
        }

        let mut inline_key = None;
        if !node.ssh_agent_auth {
            if !node.ssh_key.is_empty() {
                let file = key_file(&node.address, &node.ssh_key)?;
                builder.keyfile(file.path());
                inline_key = Some(file);
            } else if !node.ssh_key_path.is_empty() {
                builder.keyfile(expand_home(&node.ssh_key_path));
            }
        }
        if let Some(bastion) = &self.bastion {
            debug!(
                "[dialer] Reaching host '{}' through bastion '{}'",
                node.address, bastion.address
            );
            builder.jump_hosts([jump_host(bastion)]);
        }

        let session = builder
            .connect_mux(&node.address)
            .await
            .context(error::HostUnreachableSnafu {
                host: node.address.as_str(),
            })?;
        Ok(Arc::new(SshConnection {
            address: node.address.clone(),
            session,
            _key: inline_key,
        }))
    }

    fn container_client(&self, node: &Node, conn: Arc<dyn Connection>) -> Arc<dyn ContainerClient> {
        Arc::new(DockerCliClient::new(conn, &node.docker_socket))
    }
}

pub struct SshConnection {
    address: String,
    session: Session,
    _key: Option<NamedTempFile>,
}

#[async_trait]
impl Connection for SshConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        trace!("[dialer] {}: {} {}", self.address, program, args.join(" "));
        let output = self
            .session
            .command(program)
            .args(args)
            .output()
            .await
            .context(error::SshSnafu {
                host: self.address.as_str(),
                command: program,
            })?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let output = self.run("cat", &[path.to_string()]).await?;
        if !output.success() {
            return error::RemoteCommandSnafu {
                host: self.address.as_str(),
                command: format!("cat {}", path),
                status: output.status,
                stderr: output.stderr_str(),
            }
            .fail();
        }
        Ok(output.stdout)
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<()> {
        let script = format!(
            "mkdir -p \"$(dirname '{path}')\" && echo '{data}' | base64 -d > '{path}' && chmod {mode:o} '{path}'",
            path = path,
            data = base64::encode(contents),
            mode = mode,
        );
        let output = self.run("sh", &["-c".to_string(), script]).await?;
        if !output.success() {
            return error::RemoteCommandSnafu {
                host: self.address.as_str(),
                command: format!("write {}", path),
                status: output.status,
                stderr: output.stderr_str(),
            }
            .fail();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn home_expansion() {
        std::env::set_var("HOME", "/home/ops");
        assert_eq!(expand_home("~/.ssh/id_rsa"), PathBuf::from("/home/ops/.ssh/id_rsa"));
        assert_eq!(expand_home("/keys/id"), PathBuf::from("/keys/id"));
    }

    #[test]
    fn jump_host_form() {
        let bastion = BastionHost {
            address: "bastion.example.com".to_string(),
            port: "2222".to_string(),
            user: "ops".to_string(),
            ..Default::default()
        };
        assert_eq!(jump_host(&bastion), "ops@bastion.example.com:2222");
    }

    #[test]
    fn bad_port() {
        assert!(parse_port("10.0.0.1", "ssh").is_err());
        assert_eq!(parse_port("10.0.0.1", "22").unwrap(), 22);
    }
}
