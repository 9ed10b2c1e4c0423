//! Container lifecycle helpers shared by every phase.

use super::{Host, LogStream};
use crate::error::{self, Component, Result};
use crate::rollout::diff::process_change;
use log::{debug, info, warn};
use rke_model::Process;
use std::time::Duration;

/// Containers with these restart policies are expected to keep running.
fn long_running(process: &Process) -> bool {
    matches!(process.restart_policy.as_str(), "always" | "unless-stopped")
}

/// Brings the named container in line with `process`. Returns whether anything was changed.
pub async fn ensure_process(host: &Host, process: &Process, component: Component) -> Result<bool> {
    let existing = host.docker.inspect(&process.name).await?;
    if let Some(info) = &existing {
        match process_change(info, process) {
            None if info.running || !long_running(process) => {
                debug!(
                    "{} Container '{}' is current on host '{}'",
                    component,
                    process.name,
                    host.address()
                );
                return Ok(false);
            }
            None => {
                info!(
                    "{} Starting stopped container '{}' on host '{}'",
                    component,
                    process.name,
                    host.address()
                );
                host.docker.start(&info.id).await?;
                return Ok(true);
            }
            Some(reason) => info!(
                "{} Recreating container '{}' on host '{}': {}",
                component,
                process.name,
                host.address(),
                reason
            ),
        }
    }

    host.docker
        .pull(&process.image, process.image_registry_auth_config.as_deref())
        .await?;
    if let Some(info) = existing {
        host.docker.remove(&info.id, true, false).await?;
    }
    let id = host.docker.create(process).await?;
    host.docker.start(&id).await?;
    info!(
        "{} Started container '{}' on host '{}'",
        component,
        process.name,
        host.address()
    );
    Ok(true)
}

/// Runs `process` to completion and returns its stdout. A non-zero exit is an error carrying the
/// container's logs. The container is removed either way.
pub async fn run_once(
    host: &Host,
    process: &Process,
    wait_timeout: Duration,
    component: Component,
) -> Result<Vec<u8>> {
    remove_container(host, &process.name, component).await?;
    host.docker
        .pull(&process.image, process.image_registry_auth_config.as_deref())
        .await?;
    let id = host.docker.create(process).await?;
    host.docker.start(&id).await?;

    let status = match tokio::time::timeout(wait_timeout, host.docker.wait(&id)).await {
        Ok(status) => status,
        Err(_) => Err(error::Error::ContainerEngine {
            component,
            host: host.address().to_string(),
            operation: format!("wait for '{}'", process.name),
            message: format!("no exit after {}s", wait_timeout.as_secs()),
        }),
    };
    let logs = host.docker.logs(&id, LogStream::Both, None).await;
    let stdout = host.docker.logs(&id, LogStream::Stdout, None).await;
    if let Err(e) = host.docker.remove(&id, true, false).await {
        warn!(
            "{} Failed to remove container '{}' on host '{}': {}",
            component,
            process.name,
            host.address(),
            e
        );
    }

    let status = status?;
    if status != 0 {
        let logs = logs
            .map(|l| String::from_utf8_lossy(&l).trim().to_string())
            .unwrap_or_default();
        return Err(error::Error::ContainerEngine {
            component,
            host: host.address().to_string(),
            operation: format!("run '{}'", process.name),
            message: format!("exited with {}: {}", status, logs),
        });
    }
    stdout
}

/// Removes the named container if it exists. Returns whether one was removed.
pub async fn remove_container(host: &Host, name: &str, component: Component) -> Result<bool> {
    match host.docker.inspect(name).await? {
        Some(info) => {
            debug!(
                "{} Removing container '{}' on host '{}'",
                component,
                name,
                host.address()
            );
            host.docker.remove(&info.id, true, false).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Stops the named container if it is running.
pub async fn stop_container(host: &Host, name: &str, component: Component) -> Result<()> {
    if let Some(info) = host.docker.inspect(name).await? {
        if info.running {
            info!(
                "{} Stopping container '{}' on host '{}'",
                component,
                name,
                host.address()
            );
            host.docker.stop(&info.id).await?;
        }
    }
    Ok(())
}
