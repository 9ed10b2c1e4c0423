/*!

Kubernetes API plumbing used by the provisioner once the control plane answers: the cluster
state secret, node cordon and eviction, node metadata and the bulk rewrites that encryption key
rotation and snapshot restores need. Everything the rollout touches goes through the `ClusterApi`
trait so tests can record calls instead of talking to a cluster.

!*/

mod drain;
mod http_status_code;

pub use drain::{drain_node, evictable_pods, PodFilter};
pub use http_status_code::{HttpStatusCode, StatusCode};

use crate::error::{self, Component, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret, Taint as K8sTaint};
use kube::api::{
    Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams, PostParams, ResourceExt,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use log::{debug, info, warn};
use rke_model::config::NodeDrainInput;
use rke_model::constants::SYSTEM_NAMESPACE;
use rke_model::NodePlan;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use snafu::ResultExt;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

const MAX_RETRIES: i32 = 3;
const BACKOFF_MS: u64 = 500;
const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Builds a client from an admin kubeconfig file.
pub async fn client_from_path(path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).context(error::KubeconfigSnafu)?;
    client_from_kubeconfig(kubeconfig).await
}

/// Builds a client from kubeconfig text, e.g. the admin kubeconfig held in the certificate
/// bundle.
pub async fn client_from_yaml(text: &str) -> Result<Client> {
    let kubeconfig = Kubeconfig::from_yaml(text).context(error::KubeconfigSnafu)?;
    client_from_kubeconfig(kubeconfig).await
}

async fn client_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Client> {
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context(error::KubeconfigSnafu)?;
    Client::try_from(config).context(error::KubeClientSnafu)
}

/// Create or update an object in `api` with `data`'s name.
pub(crate) async fn create_or_update<T>(
    api: &Api<T>,
    data: T,
    what: &str,
    component: Component,
) -> Result<()>
where
    T: Clone + DeserializeOwned + Debug + kube::Resource + Serialize,
{
    let mut error = None;

    for _ in 0..MAX_RETRIES {
        match create_or_update_internal(api, data.clone(), what, component).await {
            Ok(()) => return Ok(()),
            Err(e) => error = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(BACKOFF_MS)).await;
    }
    match error {
        None => Ok(()),
        Some(error) => Err(error),
    }
}

async fn create_or_update_internal<T>(
    api: &Api<T>,
    data: T,
    what: &str,
    component: Component,
) -> Result<()>
where
    T: Clone + DeserializeOwned + Debug + kube::Resource + Serialize,
{
    // If the object already exists, update it with a merge patch. If not create a new one.
    match api.get(&data.name_any()).await {
        Ok(existing) => api
            .patch(
                &existing.name_any(),
                &PatchParams::default(),
                &Patch::Merge(data),
            )
            .await
            .map(|_| ()),
        Err(e) if e.is_not_found() => api
            .create(&PostParams::default(), &data)
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    }
    .with_context(|_| error::KubeSnafu {
        component,
        what: format!("save {}", what),
    })
}

/// Deletes an object, treating an absent object as deleted.
pub(crate) async fn delete_if_present<T>(
    api: &Api<T>,
    name: &str,
    what: &str,
    component: Component,
) -> Result<()>
where
    T: Clone + DeserializeOwned + Debug + kube::Resource,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e).with_context(|_| error::KubeSnafu {
            component,
            what: format!("delete {} '{}'", what, name),
        }),
    }
}

/// The cluster operations a rollout needs from the API server.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Marks the node unschedulable (`true`) or schedulable again (`false`).
    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<()>;

    /// Evicts every pod on the node that `input` allows and waits for them to go away.
    async fn evict_pods(&self, node: &str, input: &NodeDrainInput) -> Result<()>;

    async fn delete_node(&self, node: &str) -> Result<()>;

    /// Applies the plan's labels, annotations and taints to the node object.
    async fn sync_node_metadata(&self, node: &str, plan: &NodePlan) -> Result<()>;

    /// Rewrites every secret so the API server stores it with the current encryption key.
    /// Returns how many secrets were rewritten.
    async fn rewrite_secrets(&self) -> Result<usize>;

    /// Triggers a rolling restart of every deployment in the system namespace.
    async fn restart_system_deployments(&self) -> Result<()>;
}

fn api_context(component: Component, what: String) -> error::KubeSnafu<Component, String> {
    error::KubeSnafu { component, what }
}

/// `ClusterApi` backed by a live client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    /// Posts an eviction, retrying while a disruption budget refuses it.
    async fn evict(&self, pod: &Pod, input: &NodeDrainInput) -> Result<()> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: u32::try_from(input.grace_period).ok(),
                ..DeleteParams::default()
            }),
            ..EvictParams::default()
        };
        loop {
            match api.evict(&name, &params).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) if e.is_status_code(StatusCode::TOO_MANY_REQUESTS) => {
                    debug!(
                        "[worker] Eviction of pod '{}/{}' refused by a disruption budget, retrying",
                        namespace, name
                    );
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|_| {
                        api_context(Component::Worker, format!("evict pod '{}/{}'", namespace, name))
                    })
                }
            }
        }
    }

    /// Waits until none of `pods` exists any more under the same uid.
    async fn wait_for_deletion(&self, pods: &[Pod]) -> Result<()> {
        for pod in pods {
            let namespace = pod.namespace().unwrap_or_default();
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
            loop {
                match api.get(&pod.name_any()).await {
                    Ok(current) if current.uid() == pod.uid() => {
                        tokio::time::sleep(Duration::from_secs(1)).await
                    }
                    Ok(_) => break,
                    Err(e) if e.is_not_found() => break,
                    Err(e) => {
                        return Err(e).with_context(|_| {
                            api_context(Component::Worker, format!("get pod '{}'", pod.name_any()))
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<()> {
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|_| {
                let verb = if unschedulable { "cordon" } else { "uncordon" };
                api_context(Component::Worker, format!("{} node '{}'", verb, node))
            })?;
        Ok(())
    }

    async fn evict_pods(&self, node: &str, input: &NodeDrainInput) -> Result<()> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let on_node = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node)))
            .await
            .with_context(|_| {
                api_context(Component::Worker, format!("list pods on node '{}'", node))
            })?;
        let evictable = evictable_pods(on_node.items, &PodFilter::from(input)).map_err(
            |message| error::Error::DrainRefused {
                component: Component::Worker,
                node: node.to_string(),
                message,
            },
        )?;
        info!(
            "[worker] Evicting {} pod(s) from node '{}'",
            evictable.len(),
            node
        );
        for pod in &evictable {
            self.evict(pod, input).await?;
        }
        self.wait_for_deletion(&evictable).await
    }

    async fn delete_node(&self, node: &str) -> Result<()> {
        delete_if_present(&self.nodes(), node, "node", Component::Worker).await
    }

    async fn sync_node_metadata(&self, node: &str, plan: &NodePlan) -> Result<()> {
        let current = match self.nodes().get(node).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                warn!("[worker] Node '{}' is not registered yet, skipping labels", node);
                return Ok(());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|_| api_context(Component::Worker, format!("get node '{}'", node)))
            }
        };
        let mut taints: Vec<K8sTaint> = current
            .spec
            .as_ref()
            .and_then(|spec| spec.taints.clone())
            .unwrap_or_default();
        for taint in &plan.taints {
            let effect = taint.effect.to_string();
            if !taints
                .iter()
                .any(|t| t.key == taint.key && t.effect == effect)
            {
                taints.push(K8sTaint {
                    key: taint.key.clone(),
                    value: (!taint.value.is_empty()).then(|| taint.value.clone()),
                    effect,
                    time_added: None,
                });
            }
        }
        let patch = json!({
            "metadata": {
                "labels": plan.labels,
                "annotations": plan.annotations,
            },
            "spec": { "taints": taints },
        });
        self.nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|_| {
                api_context(Component::Worker, format!("update metadata of node '{}'", node))
            })?;
        Ok(())
    }

    async fn rewrite_secrets(&self) -> Result<usize> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = namespaces
            .list(&ListParams::default())
            .await
            .with_context(|_| api_context(Component::Controlplane, "list namespaces".to_string()))?;
        let mut rewritten = 0;
        for namespace in namespaces.items {
            let namespace = namespace.name_any();
            let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
            let list = secrets
                .list(&ListParams::default())
                .await
                .with_context(|_| {
                    api_context(
                        Component::Controlplane,
                        format!("list secrets in namespace '{}'", namespace),
                    )
                })?;
            for secret in list.items {
                let name = secret.name_any();
                match secrets.replace(&name, &PostParams::default(), &secret).await {
                    Ok(_) => rewritten += 1,
                    // Deleted or changed since listing: the writer already stored it fresh.
                    Err(e)
                        if e.is_not_found() || e.is_status_code(StatusCode::CONFLICT) =>
                    {
                        debug!(
                            "[controlplane] Secret '{}/{}' changed while rewriting, skipping",
                            namespace, name
                        )
                    }
                    Err(e) => {
                        return Err(e).with_context(|_| {
                            api_context(
                                Component::Controlplane,
                                format!("rewrite secret '{}/{}'", namespace, name),
                            )
                        })
                    }
                }
            }
        }
        Ok(rewritten)
    }

    async fn restart_system_deployments(&self) -> Result<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let list = deployments
            .list(&ListParams::default())
            .await
            .with_context(|_| {
                api_context(Component::Controlplane, "list system deployments".to_string())
            })?;
        let now = chrono::Utc::now().to_rfc3339();
        for deployment in list.items {
            let name = deployment.name_any();
            let patch = json!({
                "spec": { "template": { "metadata": { "annotations": {
                    RESTARTED_AT_ANNOTATION: now,
                } } } }
            });
            deployments
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .with_context(|_| {
                    api_context(Component::Controlplane, format!("restart deployment '{}'", name))
                })?;
            debug!("[controlplane] Restarted deployment '{}'", name);
        }
        Ok(())
    }
}
