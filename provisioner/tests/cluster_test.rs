pub(crate) mod mock;

use mock::{Fleet, HealthyChecker, MemoryStateStore, MockDialer, RecordingApi};
use rke_model::constants::{
    CA_CERT_NAME, ETCD_CONTAINER, KUBELET_CONTAINER, KUBEPROXY_CONTAINER,
    KUBE_APISERVER_CONTAINER, KUBE_CONTROLLER_CONTAINER, SCHEDULER_CONTAINER,
};
use rke_model::{ClusterConfig, FullState, Node, Role};
use rke_provisioner::{Cluster, Component, Error, Options};
use std::sync::Arc;
use tempfile::TempDir;

fn node(address: &str, roles: &[Role]) -> Node {
    Node {
        address: address.to_string(),
        role: roles.to_vec(),
        user: "rancher".to_string(),
        ..Default::default()
    }
}

fn config(nodes: Vec<Node>) -> ClusterConfig {
    ClusterConfig {
        nodes,
        ..Default::default()
    }
}

struct Harness {
    _dir: TempDir,
    fleet: Fleet,
    api: Arc<RecordingApi>,
    store: Arc<MemoryStateStore>,
    cluster: Cluster,
}

fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let fleet = Fleet::new();
    let api = Arc::new(RecordingApi::default());
    let store = Arc::new(MemoryStateStore::default());
    let options = Options {
        config_path: dir.path().join("cluster.yml"),
        ..Default::default()
    };
    let cluster = Cluster::new(Arc::new(MockDialer::new(&fleet)), options)
        .with_checker(Arc::new(HealthyChecker))
        .with_cluster_api(api.clone())
        .with_state_store(store.clone());
    Harness {
        _dir: dir,
        fleet,
        api,
        store,
        cluster,
    }
}

/// Adding a worker to a running cluster touches only the new worker.
#[tokio::test]
async fn adding_a_worker_updates_only_that_worker() {
    let h = harness();
    let mut nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane, Role::Worker]),
        node("10.0.0.2", &[Role::Worker]),
    ];
    let first = h.cluster.up(&config(nodes.clone())).await.unwrap();
    assert_eq!(first.updated(Role::Etcd), ["10.0.0.1"]);
    assert_eq!(first.updated(Role::Controlplane), ["10.0.0.1"]);
    assert_eq!(first.updated(Role::Worker), ["10.0.0.1", "10.0.0.2"]);

    nodes.push(node("10.0.0.3", &[Role::Worker]));
    let second = h.cluster.up(&config(nodes)).await.unwrap();
    assert!(second.updated(Role::Etcd).is_empty());
    assert!(second.updated(Role::Controlplane).is_empty());
    assert_eq!(second.updated(Role::Worker), ["10.0.0.3"]);
    assert!(h.fleet.container("10.0.0.3", KUBELET_CONTAINER).unwrap().running);

    let saved = h.store.state.lock().unwrap().clone().unwrap();
    let current = saved.current_state.rke_config.unwrap();
    assert_eq!(current.nodes.len(), 3);
    assert!(h.cluster.options().kubeconfig_path().exists());
    assert!(h.cluster.options().state_file_path().exists());
}

#[tokio::test]
async fn rerunning_an_unchanged_config_is_a_noop() {
    let h = harness();
    let nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
        node("10.0.0.2", &[Role::Worker]),
    ];
    h.cluster.up(&config(nodes.clone())).await.unwrap();
    h.fleet.clear_ops();

    let report = h.cluster.up(&config(nodes)).await.unwrap();
    assert!(report.is_noop(), "{:?}", report);
    for address in ["10.0.0.1", "10.0.0.2"] {
        let created = h.fleet.created(address);
        assert!(!created.contains(&ETCD_CONTAINER.to_string()));
        assert!(!created.contains(&KUBELET_CONTAINER.to_string()));
        assert!(!created.contains(&KUBE_APISERVER_CONTAINER.to_string()));
    }
}

#[tokio::test]
async fn failed_batch_stops_the_phase() {
    let h = harness();
    h.fleet.fail_create("10.0.0.2", KUBELET_CONTAINER);
    let nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
        node("10.0.0.2", &[Role::Worker]),
        node("10.0.0.3", &[Role::Worker]),
    ];
    let err = h.cluster.up(&config(nodes)).await.unwrap_err();
    match err {
        Error::PartialFailure {
            component,
            failures,
        } => {
            assert_eq!(component, Component::Worker);
            assert_eq!(failures.0.len(), 1);
            assert_eq!(failures.0[0].host, "10.0.0.2");
        }
        other => panic!("unexpected error: {}", other),
    }
    // The batch after the failed one never started.
    assert!(h.fleet.container("10.0.0.3", KUBELET_CONTAINER).is_none());
    assert!(h.store.state.lock().unwrap().is_none());
}

#[tokio::test]
async fn canceled_operation_starts_nothing() {
    let h = harness();
    h.cluster.cancel_token().cancel();
    let err = h
        .cluster
        .up(&config(vec![node(
            "10.0.0.1",
            &[Role::Etcd, Role::Controlplane, Role::Worker],
        )]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Canceled { .. }), "{}", err);
    assert!(h.fleet.container("10.0.0.1", ETCD_CONTAINER).is_none());
    assert!(h.fleet.container("10.0.0.1", KUBELET_CONTAINER).is_none());
}

#[tokio::test]
async fn removed_worker_is_cleaned_and_deleted() {
    let h = harness();
    let nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
        node("10.0.0.2", &[Role::Worker]),
    ];
    h.cluster.up(&config(nodes.clone())).await.unwrap();

    h.cluster.up(&config(nodes[..1].to_vec())).await.unwrap();
    assert!(h.fleet.container("10.0.0.2", KUBELET_CONTAINER).is_none());
    assert!(h.api.calls().contains(&"delete 10.0.0.2".to_string()));
}

#[tokio::test]
async fn remove_cleans_every_host() {
    let h = harness();
    let nodes = vec![node("10.0.0.1", &[Role::Etcd, Role::Controlplane, Role::Worker])];
    h.cluster.up(&config(nodes.clone())).await.unwrap();

    h.cluster.remove(&config(nodes)).await.unwrap();
    assert!(h.fleet.container("10.0.0.1", ETCD_CONTAINER).is_none());
    assert!(h.fleet.container("10.0.0.1", KUBE_APISERVER_CONTAINER).is_none());
    assert!(!h.cluster.options().state_file_path().exists());
    assert!(!h.cluster.options().kubeconfig_path().exists());
}

/// A node that drops the worker role keeps the kubelet and kube-proxy every host runs.
#[tokio::test]
async fn demoted_worker_keeps_its_kubelet() {
    let h = harness();
    let mut nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane, Role::Worker]),
        node("10.0.0.2", &[Role::Worker]),
    ];
    h.cluster.up(&config(nodes.clone())).await.unwrap();

    nodes[0] = node("10.0.0.1", &[Role::Etcd, Role::Controlplane]);
    h.cluster.up(&config(nodes)).await.unwrap();
    for name in [KUBELET_CONTAINER, KUBEPROXY_CONTAINER, KUBE_APISERVER_CONTAINER] {
        let container = h.fleet.container("10.0.0.1", name);
        assert!(
            container.map(|c| c.running).unwrap_or(false),
            "'{}' is gone after demotion",
            name
        );
    }
    assert!(!h.api.calls().contains(&"delete 10.0.0.1".to_string()));
}

#[tokio::test]
async fn new_etcd_host_joins_through_a_running_member() {
    let h = harness();
    let mut nodes = vec![node("10.0.0.1", &[Role::Etcd, Role::Controlplane, Role::Worker])];
    h.cluster.up(&config(nodes.clone())).await.unwrap();
    assert!(!h.fleet.ran("10.0.0.1", "member add"));

    nodes.push(node("10.0.0.2", &[Role::Etcd, Role::Worker]));
    let report = h.cluster.up(&config(nodes)).await.unwrap();
    assert!(h.fleet.ran(
        "10.0.0.1",
        "etcdctl member add etcd-10.0.0.2 --peer-urls=https://10.0.0.2:2380"
    ));
    assert!(report.updated(Role::Etcd).contains(&"10.0.0.2".to_string()));
    assert!(h.fleet.container("10.0.0.2", ETCD_CONTAINER).unwrap().running);
}

#[tokio::test]
async fn departed_etcd_host_leaves_the_member_list() {
    let h = harness();
    let nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane, Role::Worker]),
        node("10.0.0.2", &[Role::Etcd, Role::Worker]),
    ];
    h.cluster.up(&config(nodes.clone())).await.unwrap();

    h.cluster.up(&config(nodes[..1].to_vec())).await.unwrap();
    // Members are numbered in address order, so 10.0.0.2 is the second.
    assert!(h
        .fleet
        .ran("10.0.0.1", "etcdctl member remove 0000000000000002"));
    assert!(h.fleet.container("10.0.0.2", ETCD_CONTAINER).is_none());
    assert!(h.fleet.container("10.0.0.1", ETCD_CONTAINER).unwrap().running);
    assert!(h.api.calls().contains(&"delete 10.0.0.2".to_string()));
}

fn restart_rank(entry: &str) -> usize {
    let name = entry.rsplit(' ').next().unwrap_or_default();
    match name {
        ETCD_CONTAINER => 0,
        KUBE_APISERVER_CONTAINER | KUBE_CONTROLLER_CONTAINER | SCHEDULER_CONTAINER => 1,
        _ => 2,
    }
}

/// Rotating certificates restarts etcd first, then the control plane, then the workers.
#[tokio::test]
async fn rotated_certificates_restart_plane_by_plane() {
    let h = harness();
    let cluster_config = config(vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
        node("10.0.0.2", &[Role::Etcd]),
        node("10.0.0.3", &[Role::Worker]),
    ]);
    h.cluster.up(&cluster_config).await.unwrap();
    h.fleet.clear_ops();

    h.cluster
        .rotate_certificates(&cluster_config, Vec::new(), false)
        .await
        .unwrap();
    let restarts: Vec<String> = h
        .fleet
        .history()
        .into_iter()
        .filter(|entry| entry.contains(" restart "))
        .collect();
    let first_etcd = restarts
        .iter()
        .position(|entry| entry.ends_with(" restart etcd"))
        .expect("etcd was not restarted");
    let ordered = &restarts[first_etcd..];
    let ranks: Vec<usize> = ordered.iter().map(|entry| restart_rank(entry)).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{:?}", ordered);
    for address in ["10.0.0.1", "10.0.0.2"] {
        assert!(ordered.contains(&format!("{} restart etcd", address)));
    }
    for address in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        assert!(ordered.contains(&format!("{} restart kubelet", address)));
    }
}

fn state_on(h: &Harness, address: &str) -> Option<FullState> {
    h.fleet.with_host(address, |host| {
        host.files
            .iter()
            .find(|(path, _)| path.ends_with(".tmp/cluster.rkestate"))
            .and_then(|(_, bytes)| FullState::parse(&String::from_utf8_lossy(bytes)).ok())
    })
}

/// The copy of the state on the hosts stands in when the local file and the secret are lost.
#[tokio::test]
async fn state_is_recovered_from_the_hosts() {
    let h = harness();
    let nodes = vec![
        node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
        node("10.0.0.2", &[Role::Worker]),
    ];
    h.cluster.up(&config(nodes.clone())).await.unwrap();
    for address in ["10.0.0.1", "10.0.0.2"] {
        let copy = state_on(&h, address).unwrap();
        assert_eq!(copy.current_state.rke_config.unwrap().nodes.len(), 2);
    }
    let ca = |state: &FullState| {
        state.current_state.certificates_bundle[CA_CERT_NAME]
            .certificate
            .clone()
    };
    let before = ca(&h.store.state.lock().unwrap().clone().unwrap());

    std::fs::remove_file(h.cluster.options().state_file_path()).unwrap();
    *h.store.state.lock().unwrap() = None;
    h.cluster.up(&config(nodes[..1].to_vec())).await.unwrap();

    // The recovered state still knew about 10.0.0.2, so it was cleaned up.
    assert!(h.fleet.container("10.0.0.2", KUBELET_CONTAINER).is_none());
    assert!(h.api.calls().contains(&"delete 10.0.0.2".to_string()));
    let after = ca(&h.store.state.lock().unwrap().clone().unwrap());
    assert_eq!(before, after);
}

#[tokio::test]
async fn kubelet_mounts_the_hosts_docker_root() {
    let h = harness();
    h.fleet.with_host("10.0.0.2", |host| {
        host.docker_root = Some("/data/docker".to_string())
    });
    h.cluster
        .up(&config(vec![
            node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
            node("10.0.0.2", &[Role::Worker]),
        ]))
        .await
        .unwrap();
    let moved = h.fleet.container("10.0.0.2", KUBELET_CONTAINER).unwrap();
    assert!(moved
        .binds
        .contains(&"/data/docker:/data/docker:rw,rslave,z".to_string()));
    let default = h.fleet.container("10.0.0.1", KUBELET_CONTAINER).unwrap();
    assert!(default
        .binds
        .contains(&"/var/lib/docker:/var/lib/docker:rw,rslave,z".to_string()));
}
