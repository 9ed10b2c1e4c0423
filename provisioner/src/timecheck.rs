//! Refuses to touch a fleet whose clocks disagree with ours; certificates issued here would not
//! be valid yet on a host that lags behind.

use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::hosts::{run_once, Host};
use crate::plan::registry_auth;
use log::{debug, info};
use rke_model::config::ClusterConfig;
use rke_model::constants::TIME_CHECK_CONTAINER;
use rke_model::Process;
use snafu::ensure;
use std::time::Duration;

fn checker(config: &ClusterConfig) -> Process {
    let image = config.system_images.alpine.clone();
    Process {
        name: TIME_CHECK_CONTAINER.to_string(),
        command: vec!["date".to_string(), "+%s".to_string()],
        image_registry_auth_config: registry_auth(config, &image),
        image,
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

/// The remote reading must fall inside the window in which it was taken.
pub fn check_skew(host: &str, local_start: i64, local_end: i64, remote: i64) -> Result<()> {
    ensure!(
        local_start <= remote && remote <= local_end,
        error::ClockSkewSnafu {
            host,
            local_start,
            local_end,
            remote,
        }
    );
    Ok(())
}

async fn check_host(host: &Host, process: &Process, wait_timeout: Duration) -> Result<()> {
    // Pull first so the measured window covers the command, not the download.
    host.docker
        .pull(&process.image, process.image_registry_auth_config.as_deref())
        .await?;
    let local_start = chrono::Utc::now().timestamp();
    let output = run_once(host, process, wait_timeout, Component::Time).await?;
    let local_end = chrono::Utc::now().timestamp();
    let text = String::from_utf8_lossy(&output);
    let remote = text
        .trim()
        .parse::<i64>()
        .map_err(|_| error::Error::ContainerEngine {
            component: Component::Time,
            host: host.address().to_string(),
            operation: "read clock".to_string(),
            message: format!("unexpected output '{}'", text.trim()),
        })?;
    debug!(
        "[time] Host '{}' reads {} (local {}..{})",
        host.address(),
        remote,
        local_start,
        local_end
    );
    check_skew(host.address(), local_start, local_end, remote)
}

/// Reads every Linux host's clock at once. Windows hosts cannot run the checker and are skipped.
pub async fn check_time(hosts: &[Host], config: &ClusterConfig, wait_timeout: Duration) -> Result<()> {
    info!("[time] Checking clocks on {} host(s)", hosts.len());
    let process = checker(config);
    let checks = hosts
        .iter()
        .filter(|host| !host.node.is_windows())
        .map(|host| {
            let process = &process;
            async move { (host, check_host(host, process, wait_timeout).await) }
        });
    let failures: Vec<HostError> = futures::future::join_all(checks)
        .await
        .into_iter()
        .filter_map(|(host, result)| {
            result.err().map(|error| HostError {
                host: host.address().to_string(),
                error,
            })
        })
        .collect();
    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Time,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(())
}
