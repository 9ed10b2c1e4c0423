pub(crate) mod mock;

use mock::{Fleet, HealthyChecker, MemorySnapshotStore, MemoryStateStore, MockDialer, RecordingApi};
use rke_model::constants::{ETCD_CONTAINER, ETCD_RESTORE_CONTAINER, KUBELET_CONTAINER};
use rke_model::{ClusterConfig, Node, Role};
use rke_provisioner::{Cluster, Options};
use std::sync::Arc;

fn cluster_config() -> ClusterConfig {
    ClusterConfig {
        nodes: vec![
            Node {
                address: "10.0.0.1".to_string(),
                role: vec![Role::Etcd, Role::Controlplane],
                user: "rancher".to_string(),
                ..Default::default()
            },
            Node {
                address: "10.0.0.2".to_string(),
                role: vec![Role::Worker],
                user: "rancher".to_string(),
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

/// Save a snapshot, then restore it: etcd comes back on the restored data and the rest of the
/// cluster is rolled out around it.
#[tokio::test]
async fn restore_brings_the_cluster_back() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let fleet = Fleet::new();
    let api = Arc::new(RecordingApi::default());
    let snapshots = Arc::new(MemorySnapshotStore::default());
    let cluster = Cluster::new(
        Arc::new(MockDialer::new(&fleet)),
        Options {
            config_path: dir.path().join("cluster.yml"),
            ..Default::default()
        },
    )
    .with_checker(Arc::new(HealthyChecker))
    .with_cluster_api(api.clone())
    .with_state_store(Arc::new(MemoryStateStore::default()))
    .with_snapshot_store(snapshots.clone());

    let config = cluster_config();
    cluster.up(&config).await.unwrap();

    let name = cluster
        .snapshot_save(&config, Some("nightly.zip"))
        .await
        .unwrap();
    assert_eq!(name, "nightly");
    assert!(snapshots.objects.lock().unwrap().contains_key("nightly"));
    // The raw database is removed once it is archived.
    assert!(fleet.with_host("10.0.0.1", |host| {
        host.files.keys().any(|path| path.ends_with("nightly.zip"))
            && !host.files.keys().any(|path| path.ends_with("nightly.db"))
    }));

    fleet.clear_ops();
    let report = cluster.snapshot_restore(&config, "nightly").await.unwrap();

    assert!(fleet.created("10.0.0.1").contains(&ETCD_RESTORE_CONTAINER.to_string()));
    let etcd = fleet.container("10.0.0.1", ETCD_CONTAINER).unwrap();
    assert!(etcd.running);
    assert!(!etcd.cmd.iter().any(|arg| arg == "--force-new-cluster"));
    assert_eq!(report.updated(Role::Etcd), ["10.0.0.1"]);
    assert!(fleet.container("10.0.0.2", KUBELET_CONTAINER).unwrap().running);
    assert!(api.calls().contains(&"restart-system".to_string()));
}

#[tokio::test]
async fn removed_snapshot_is_gone_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let fleet = Fleet::new();
    let snapshots = Arc::new(MemorySnapshotStore::default());
    let cluster = Cluster::new(
        Arc::new(MockDialer::new(&fleet)),
        Options {
            config_path: dir.path().join("cluster.yml"),
            ..Default::default()
        },
    )
    .with_checker(Arc::new(HealthyChecker))
    .with_cluster_api(Arc::new(RecordingApi::default()))
    .with_state_store(Arc::new(MemoryStateStore::default()))
    .with_snapshot_store(snapshots.clone());

    let config = cluster_config();
    cluster.up(&config).await.unwrap();
    cluster.snapshot_save(&config, Some("old")).await.unwrap();

    cluster.snapshot_remove(&config, "old").await.unwrap();
    assert!(snapshots.objects.lock().unwrap().is_empty());
    assert!(fleet.with_host("10.0.0.1", |host| {
        !host.files.keys().any(|path| path.ends_with("old.zip"))
    }));
}

fn node(address: &str, roles: &[Role]) -> Node {
    Node {
        address: address.to_string(),
        role: roles.to_vec(),
        user: "rancher".to_string(),
        ..Default::default()
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    fleet: Fleet,
    api: Arc<RecordingApi>,
    cluster: Cluster,
}

fn setup() -> Setup {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let fleet = Fleet::new();
    let api = Arc::new(RecordingApi::default());
    let cluster = Cluster::new(
        Arc::new(MockDialer::new(&fleet)),
        Options {
            config_path: dir.path().join("cluster.yml"),
            ..Default::default()
        },
    )
    .with_checker(Arc::new(HealthyChecker))
    .with_cluster_api(api.clone())
    .with_state_store(Arc::new(MemoryStateStore::default()))
    .with_snapshot_store(Arc::new(MemorySnapshotStore::default()));
    Setup {
        _dir: dir,
        fleet,
        api,
        cluster,
    }
}

/// Only the first etcd host restores the database; the others rejoin it as new members.
#[tokio::test]
async fn other_etcd_members_rejoin_the_restored_one() {
    let s = setup();
    let config = ClusterConfig {
        nodes: vec![
            node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
            node("10.0.0.2", &[Role::Etcd]),
            node("10.0.0.3", &[Role::Worker]),
        ],
        ..Default::default()
    };
    s.cluster.up(&config).await.unwrap();
    s.cluster.snapshot_save(&config, Some("nightly")).await.unwrap();
    s.fleet.clear_ops();

    let report = s.cluster.snapshot_restore(&config, "nightly").await.unwrap();
    assert!(s.fleet.created("10.0.0.1").contains(&ETCD_RESTORE_CONTAINER.to_string()));
    assert!(!s.fleet.created("10.0.0.2").contains(&ETCD_RESTORE_CONTAINER.to_string()));
    assert!(s.fleet.ran(
        "10.0.0.1",
        "etcdctl member add etcd-10.0.0.2 --peer-urls=https://10.0.0.2:2380"
    ));
    assert_eq!(report.updated(Role::Etcd), ["10.0.0.1", "10.0.0.2"]);
    for address in ["10.0.0.1", "10.0.0.2"] {
        let etcd = s.fleet.container(address, ETCD_CONTAINER).unwrap();
        assert!(etcd.running);
        assert!(!etcd.cmd.iter().any(|arg| arg == "--force-new-cluster"));
    }
}

/// A host that was in the snapshot's cluster but is no longer configured is cleaned, not only
/// deleted from the API.
#[tokio::test]
async fn restore_cleans_hosts_that_left_the_config() {
    let s = setup();
    let mut config = cluster_config();
    config.nodes.push(node("10.0.0.3", &[Role::Worker]));
    s.cluster.up(&config).await.unwrap();
    s.cluster.snapshot_save(&config, Some("before")).await.unwrap();

    config.nodes.pop();
    s.cluster.snapshot_restore(&config, "before").await.unwrap();
    assert!(s.fleet.container("10.0.0.3", KUBELET_CONTAINER).is_none());
    assert!(s.fleet.container("10.0.0.2", KUBELET_CONTAINER).unwrap().running);
    let calls = s.api.calls();
    assert!(calls.contains(&"delete 10.0.0.3".to_string()));
    assert!(calls.contains(&"restart-system".to_string()));
}
