use super::ClusterApi;
use crate::error::{self, Component, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use log::info;
use rke_model::config::NodeDrainInput;
use std::time::Duration;

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
const DEFAULT_DRAIN_TIMEOUT: u64 = 120;

/// Which pods a drain may evict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodFilter {
    /// Evict pods that no controller will recreate.
    pub force: bool,
    /// Leave daemon set pods in place instead of refusing to drain.
    pub ignore_daemonsets: bool,
    /// Evict pods using `emptyDir` volumes, losing that data.
    pub delete_local_data: bool,
}

impl From<&NodeDrainInput> for PodFilter {
    fn from(input: &NodeDrainInput) -> Self {
        Self {
            force: input.force,
            ignore_daemonsets: input.ignore_daemonsets.unwrap_or(true),
            delete_local_data: input.delete_local_data,
        }
    }
}

fn finished(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(|phase| phase == "Succeeded" || phase == "Failed")
        .unwrap_or(false)
}

fn owner_kind(pod: &Pod) -> Option<&str> {
    pod.metadata
        .owner_references
        .as_ref()
        .and_then(|owners| owners.iter().find(|o| o.controller.unwrap_or(false)))
        .map(|owner| owner.kind.as_str())
}

fn uses_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| volumes.iter().any(|v| v.empty_dir.is_some()))
        .unwrap_or(false)
}

/// Picks the pods to evict from a node. Mirror pods are never evicted and daemon set pods are
/// skipped when allowed. A pod the filter forbids evicting fails the whole drain with a message
/// naming it.
pub fn evictable_pods(pods: Vec<Pod>, filter: &PodFilter) -> std::result::Result<Vec<Pod>, String> {
    let mut evictable = Vec::new();
    let mut refused = Vec::new();
    for pod in pods {
        if pod.annotations().contains_key(MIRROR_POD_ANNOTATION) {
            continue;
        }
        let name = format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any());
        if finished(&pod) {
            evictable.push(pod);
            continue;
        }
        match owner_kind(&pod) {
            Some("DaemonSet") if filter.ignore_daemonsets => continue,
            Some("DaemonSet") => {
                refused.push(format!("{} is managed by a daemon set", name));
                continue;
            }
            None if !filter.force => {
                refused.push(format!("{} is not managed by a controller", name));
                continue;
            }
            _ => {}
        }
        if uses_local_storage(&pod) && !filter.delete_local_data {
            refused.push(format!("{} uses local storage", name));
            continue;
        }
        evictable.push(pod);
    }
    if refused.is_empty() {
        Ok(evictable)
    } else {
        Err(refused.join(", "))
    }
}

/// Cordons the node and evicts its pods, giving up after the configured timeout. The node stays
/// cordoned on failure.
pub async fn drain_node(
    api: &dyn ClusterApi,
    node: &str,
    input: &NodeDrainInput,
    component: Component,
) -> Result<()> {
    info!("{} Cordoning node '{}'", component, node);
    api.set_unschedulable(node, true).await?;
    let seconds = if input.timeout == 0 {
        DEFAULT_DRAIN_TIMEOUT
    } else {
        input.timeout
    };
    info!("{} Draining node '{}'", component, node);
    match tokio::time::timeout(Duration::from_secs(seconds), api.evict_pods(node, input)).await {
        Ok(result) => result,
        Err(_) => error::DrainTimeoutSnafu {
            component,
            node,
            seconds,
        }
        .fail(),
    }
}
