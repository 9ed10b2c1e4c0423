/*!

Etcd snapshots. `etcdctl snapshot save` runs in a one-shot container on each etcd host; the raw
database is then wrapped, together with the cluster state, into `<name>.zip` in the host's snapshot
directory. Archives can be mirrored to an S3 compatible store.

A restore wipes the etcd data on every etcd host, restores the database on the first one, starts it
as a new single member cluster and leaves the remaining members to join through a regular rollout.

!*/

use crate::error::{self, Component, HostError, HostErrors, Result};
use crate::health::{self, HealthChecker};
use crate::hosts::{ensure_process, remove_container, run_once, stop_container, Host};
use crate::plan::host_path;
use crate::rollout::role_containers;
use async_trait::async_trait;
use aws_sdk_s3::types::ByteStream;
use aws_sdk_s3::Region;
use aws_smithy_client::erase::DynConnector;
use aws_smithy_client::http_connector::HttpConnector;
use aws_smithy_client::hyper_ext::Adapter;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use log::{debug, info, warn};
use rke_model::config::{ClusterConfig, S3BackupConfig};
use rke_model::constants::*;
use rke_model::{FullState, Node, NodePlan, Process, Role};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";
const DEFAULT_S3_REGION: &str = "us-east-1";

/// `rke_etcd_snapshot_<RFC3339>` for snapshots saved without a name.
pub fn default_name() -> String {
    format!(
        "rke_etcd_snapshot_{}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )
}

/// Strips a `.zip` the operator may have added to a snapshot name.
pub fn normalize_name(name: &str) -> String {
    match name.strip_suffix(&format!(".{}", SNAPSHOT_EXTENSION)) {
        Some(stripped) => {
            warn!(
                "[snapshot] The name '{}' ends with the file extension, using '{}'",
                name, stripped
            );
            stripped.to_string()
        }
        None => name.to_string(),
    }
}

fn archive_path(config: &ClusterConfig, node: &Node, name: &str) -> String {
    host_path(
        config,
        node,
        &format!("{}{}.{}", ETCD_SNAPSHOT_PATH, name, SNAPSHOT_EXTENSION),
    )
}

fn db_path(config: &ClusterConfig, node: &Node, name: &str) -> String {
    host_path(config, node, &format!("{}{}.db", ETCD_SNAPSHOT_PATH, name))
}

/// Wraps a raw etcd database and the state it belongs to.
pub fn archive(db: &[u8], state: &FullState) -> Result<Vec<u8>> {
    let state = state.render().context(error::ModelSnafu)?;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (member, contents) in [(SNAPSHOT_DB_FILE, db), (SNAPSHOT_STATE_FILE, state.as_bytes())] {
        writer.start_file(member, options).context(error::ZipSnafu)?;
        writer.write_all(contents).context(error::IoSnafu {
            component: Component::Snapshot,
            what: format!("write '{}' into the archive", member),
        })?;
    }
    Ok(writer.finish().context(error::ZipSnafu)?.into_inner())
}

/// The database and, when the archive carries one, the state of a snapshot archive.
pub fn unarchive(name: &str, bytes: &[u8]) -> Result<(Vec<u8>, Option<FullState>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context(error::ZipSnafu)?;
    let mut db = Vec::new();
    archive
        .by_name(SNAPSHOT_DB_FILE)
        .context(error::ZipSnafu)?
        .read_to_end(&mut db)
        .context(error::IoSnafu {
            component: Component::Snapshot,
            what: "read the snapshot database",
        })?;
    ensure!(
        !db.is_empty(),
        error::RestoreFailedSnafu {
            name,
            message: "the archive holds an empty database",
        }
    );
    let state = match archive.by_name(SNAPSHOT_STATE_FILE) {
        Ok(mut file) => {
            let mut text = String::new();
            file.read_to_string(&mut text).context(error::IoSnafu {
                component: Component::Snapshot,
                what: "read the snapshot state",
            })?;
            Some(FullState::parse(&text).context(error::StateCorruptSnafu)?)
        }
        Err(zip::result::ZipError::FileNotFound) => None,
        Err(source) => return Err(error::Error::Zip { source }),
    };
    Ok((db, state))
}

/// A remote copy of the snapshot archives.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn upload(&self, name: &str, archive: Vec<u8>) -> Result<()>;

    async fn download(&self, name: &str) -> Result<Vec<u8>>;

    async fn remove(&self, name: &str) -> Result<()>;
}

/// Archives kept in an S3 compatible bucket.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    folder: String,
}

impl S3Store {
    pub async fn new(config: &S3BackupConfig) -> Result<Self> {
        ensure!(
            !config.bucket_name.is_empty(),
            error::ConfigInvalidSnafu {
                message: "s3 backups need a bucket name",
            }
        );
        let region = if config.region.is_empty() {
            DEFAULT_S3_REGION
        } else {
            config.region.as_str()
        };
        let mut loader = aws_config::from_env().region(Region::new(region.to_string()));
        if !config.access_key.is_empty() {
            loader = loader.credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "rke_s3_backup",
            )));
        }
        let sdk_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if !config.endpoint.is_empty() && config.endpoint != DEFAULT_S3_ENDPOINT {
            let endpoint = if config.endpoint.contains("://") {
                config.endpoint.clone()
            } else {
                format!("https://{}", config.endpoint)
            };
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        if !config.custom_ca.is_empty() {
            s3_config = s3_config.http_connector(HttpConnector::Prebuilt(Some(
                custom_ca_connector(&config.custom_ca)?,
            )));
        }
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            bucket: config.bucket_name.clone(),
            folder: config.folder.trim_matches('/').to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        object_key(&self.folder, name)
    }
}

fn object_key(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        format!("{}.{}", name, SNAPSHOT_EXTENSION)
    } else {
        format!("{}/{}.{}", folder, name, SNAPSHOT_EXTENSION)
    }
}

/// An HTTPS connector that trusts the system roots and every certificate in `pem`.
fn custom_ca_connector(pem: &str) -> Result<DynConnector> {
    let mut roots = rustls::RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, skipped) = roots.add_parsable_certificates(
                &certs.into_iter().map(|cert| cert.0).collect::<Vec<_>>(),
            );
            debug!(
                "[snapshot] Loaded {} system CA certificate(s), skipped {}",
                added, skipped
            );
        }
        Err(e) => warn!("[snapshot] Unable to load the system CA certificates: {}", e),
    }
    let custom = rustls_pemfile::certs(&mut pem.as_bytes()).context(error::IoSnafu {
        component: Component::Snapshot,
        what: "read the s3 custom CA",
    })?;
    ensure!(
        !custom.is_empty(),
        error::ConfigInvalidSnafu {
            message: "the s3 custom CA holds no PEM certificate",
        }
    );
    for der in custom {
        roots.add(&rustls::Certificate(der)).map_err(|e| {
            error::Error::config(format!("the s3 custom CA is not a usable certificate: {}", e))
        })?;
    }
    let tls = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();
    Ok(DynConnector::new(Adapter::builder().build(https)))
}

#[async_trait]
impl SnapshotStore for S3Store {
    async fn upload(&self, name: &str, archive: Vec<u8>) -> Result<()> {
        let key = self.key(name);
        info!("[snapshot] Uploading '{}' to bucket '{}'", key, self.bucket);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(archive))
            .send()
            .await
            .map_err(|e| s3_error("upload", &key, e))?;
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let key = self.key(name);
        info!("[snapshot] Downloading '{}' from bucket '{}'", key, self.bucket);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| s3_error("download", &key, e))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| s3_error("download", &key, e))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let key = self.key(name);
        info!("[snapshot] Removing '{}' from bucket '{}'", key, self.bucket);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| s3_error("remove", &key, e))?;
        Ok(())
    }
}

fn s3_error<E: std::fmt::Display>(operation: &str, key: &str, e: E) -> error::Error {
    error::Error::S3 {
        operation: operation.to_string(),
        key: key.to_string(),
        message: e.to_string(),
    }
}

/// Runs `etcdctl snapshot save` next to the etcd container, sharing its environment and binds.
fn save_process(config: &ClusterConfig, node: &Node, etcd: &Process, name: &str) -> Process {
    let snapshot_dir = host_path(config, node, ETCD_SNAPSHOT_PATH);
    let mut binds = etcd.binds.clone();
    binds.push(format!("{}:{}:z", snapshot_dir, ETCD_SNAPSHOT_PATH));
    Process {
        name: ETCD_SNAPSHOT_ONCE_CONTAINER.to_string(),
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "mkdir -p {0} && etcdctl snapshot save {0}{1}.db",
                ETCD_SNAPSHOT_PATH, name
            ),
        ],
        env: etcd.env.clone(),
        image: etcd.image.clone(),
        image_registry_auth_config: etcd.image_registry_auth_config.clone(),
        binds,
        network_mode: "host".to_string(),
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

/// Restores the database into a fresh data directory for a single member cluster.
fn restore_process(config: &ClusterConfig, node: &Node, etcd: &Process, name: &str) -> Process {
    let snapshot_dir = host_path(config, node, ETCD_SNAPSHOT_PATH);
    let data_dir = host_path(config, node, ETCD_HOST_DATA_DIR);
    let member = format!("etcd-{}", node.hostname());
    let peer = format!("https://{}:{}", node.internal(), ETCD_PEER_PORT);
    let staging = format!("{}restore", ETCD_DATA_DIR);
    Process {
        name: ETCD_RESTORE_CONTAINER.to_string(),
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "rm -rf {staging} && etcdctl snapshot restore {dir}{name}.db --data-dir={staging} \
                 --name={member} --initial-cluster={member}={peer} \
                 --initial-cluster-token=etcd-cluster-1 --initial-advertise-peer-urls={peer} \
                 && mv {staging}/* {data} && rm -rf {staging}",
                staging = staging,
                dir = ETCD_SNAPSHOT_PATH,
                name = name,
                member = member,
                peer = peer,
                data = ETCD_DATA_DIR,
            ),
        ],
        env: vec!["ETCDCTL_API=3".to_string()],
        image: etcd.image.clone(),
        image_registry_auth_config: etcd.image_registry_auth_config.clone(),
        binds: vec![
            format!("{}:{}:z", snapshot_dir, ETCD_SNAPSHOT_PATH),
            format!("{}:{}:z", data_dir, ETCD_DATA_DIR),
        ],
        network_mode: "host".to_string(),
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

fn wipe_process(config: &ClusterConfig, node: &Node) -> Process {
    let data_dir = host_path(config, node, ETCD_HOST_DATA_DIR);
    let image = config.system_images.alpine.clone();
    Process {
        name: CLEANER_CONTAINER.to_string(),
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("rm -rf {}/*", data_dir),
        ],
        binds: vec![format!("{0}:{0}:z", data_dir)],
        image_registry_auth_config: crate::plan::registry_auth(config, &image),
        image,
        restart_policy: "no".to_string(),
        ..Default::default()
    }
}

/// The etcd container planned for `host`. Its environment names the host's own certificates.
fn etcd_process<'p>(plans: &'p BTreeMap<String, NodePlan>, host: &Host) -> Result<&'p Process> {
    plans
        .get(host.address())
        .and_then(|plan| plan.processes.get(ETCD_CONTAINER))
        .context(error::ConfigInvalidSnafu {
            message: format!("host '{}' has no etcd container planned", host.address()),
        })
}

fn snapshot_failed(name: &str, host: &Host, message: impl Into<String>) -> error::Error {
    error::Error::SnapshotFailed {
        name: name.to_string(),
        host: host.address().to_string(),
        message: message.into(),
    }
}

async fn save_on_host(
    host: &Host,
    config: &ClusterConfig,
    etcd: &Process,
    name: &str,
    state: &FullState,
    wait_timeout: Duration,
) -> Result<Vec<u8>> {
    let running = host
        .docker
        .inspect(ETCD_CONTAINER)
        .await?
        .map(|info| info.running)
        .unwrap_or(false);
    if !running {
        return Err(snapshot_failed(name, host, "etcd is not running"));
    }
    info!("[snapshot] Saving snapshot '{}' on host '{}'", name, host.address());
    run_once(
        host,
        &save_process(config, &host.node, etcd, name),
        wait_timeout,
        Component::Snapshot,
    )
    .await?;

    let db_path = db_path(config, &host.node, name);
    let db = host.conn.read_file(&db_path).await?;
    if db.is_empty() {
        return Err(snapshot_failed(name, host, "etcdctl wrote an empty snapshot"));
    }
    let bytes = archive(&db, state)?;
    host.conn
        .write_file(&archive_path(config, &host.node, name), &bytes, 0o600)
        .await?;
    host.conn
        .run("rm", &["-f".to_string(), db_path])
        .await?;
    debug!(
        "[snapshot] Wrote {} byte archive on host '{}'",
        bytes.len(),
        host.address()
    );
    Ok(bytes)
}

/// Saves `name` on every etcd host. A host that fails does not stop the others; the failures are
/// reported together once every host finished. The first archive written is uploaded when a
/// store is given.
pub async fn save(
    hosts: &[Host],
    config: &ClusterConfig,
    plans: &BTreeMap<String, NodePlan>,
    name: &str,
    state: &FullState,
    store: Option<&dyn SnapshotStore>,
    wait_timeout: Duration,
) -> Result<()> {
    let etcd_hosts: Vec<&Host> = hosts.iter().filter(|h| h.node.is_etcd()).collect();
    let saves = etcd_hosts.iter().map(|host| async move {
        let result = match etcd_process(plans, host) {
            Ok(etcd) => save_on_host(host, config, etcd, name, state, wait_timeout).await,
            Err(e) => Err(e),
        };
        (*host, result)
    });
    let mut uploaded = None;
    let mut failures = Vec::new();
    for (host, result) in futures::future::join_all(saves).await {
        match result {
            Ok(bytes) => {
                if uploaded.is_none() {
                    uploaded = Some(bytes);
                }
            }
            Err(error) => failures.push(HostError {
                host: host.address().to_string(),
                error,
            }),
        }
    }
    if let (Some(store), Some(bytes)) = (store, uploaded) {
        store.upload(name, bytes).await?;
    }
    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Snapshot,
            failures: HostErrors(failures),
        }
        .fail();
    }
    info!("[snapshot] Saved snapshot '{}' on {} host(s)", name, etcd_hosts.len());
    Ok(())
}

/// Finds the archive: the store when one is given, otherwise the first etcd host holding it.
pub async fn fetch(
    hosts: &[Host],
    config: &ClusterConfig,
    name: &str,
    store: Option<&dyn SnapshotStore>,
) -> Result<Vec<u8>> {
    if let Some(store) = store {
        return store.download(name).await;
    }
    for host in hosts.iter().filter(|h| h.node.is_etcd()) {
        match host.conn.read_file(&archive_path(config, &host.node, name)).await {
            Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
            Ok(_) => warn!("[snapshot] Archive '{}' on host '{}' is empty", name, host.address()),
            Err(e) => debug!(
                "[snapshot] Archive '{}' not readable on host '{}': {}",
                name,
                host.address(),
                e
            ),
        }
    }
    error::RestoreFailedSnafu {
        name,
        message: "no etcd host holds the snapshot",
    }
    .fail()
}

/// The state embedded in a snapshot, if the snapshot can be found and carries one.
pub async fn state_from_snapshot(
    hosts: &[Host],
    config: &ClusterConfig,
    name: &str,
    store: Option<&dyn SnapshotStore>,
) -> Result<Option<FullState>> {
    let bytes = fetch(hosts, config, name, store).await?;
    Ok(unarchive(name, &bytes)?.1)
}

/// Stops every kubernetes container, wipes etcd data and brings the first etcd host up alone,
/// with `--force-new-cluster`, on the restored database. Returns the address of that host.
#[allow(clippy::too_many_arguments)]
pub async fn restore(
    hosts: &[Host],
    config: &ClusterConfig,
    plans: &BTreeMap<String, NodePlan>,
    name: &str,
    archive_bytes: &[u8],
    checker: &dyn HealthChecker,
    health_timeout: Duration,
    wait_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let (db, _) = unarchive(name, archive_bytes)?;
    let etcd_hosts: Vec<&Host> = hosts.iter().filter(|h| h.node.is_etcd()).collect();
    let first = match etcd_hosts.first() {
        Some(first) => *first,
        None => {
            return error::RestoreFailedSnafu {
                name,
                message: "the cluster has no etcd hosts",
            }
            .fail()
        }
    };
    let etcd = etcd_process(plans, first)?;

    info!("[snapshot] Stopping kubernetes containers on {} host(s)", hosts.len());
    for host in hosts {
        for role in [Role::Worker, Role::Controlplane] {
            for container in role_containers(role) {
                stop_container(host, container, Component::Snapshot).await?;
            }
        }
    }
    for host in &etcd_hosts {
        ensure!(
            !cancel.is_cancelled(),
            error::CanceledSnafu {
                component: Component::Snapshot
            }
        );
        remove_container(host, ETCD_CONTAINER, Component::Snapshot).await?;
        run_once(
            host,
            &wipe_process(config, &host.node),
            wait_timeout,
            Component::Snapshot,
        )
        .await?;
    }

    info!("[snapshot] Restoring '{}' on host '{}'", name, first.address());
    first
        .conn
        .write_file(&db_path(config, &first.node, name), &db, 0o600)
        .await?;
    run_once(
        first,
        &restore_process(config, &first.node, etcd, name),
        wait_timeout,
        Component::Snapshot,
    )
    .await?;

    let mut single = etcd.clone();
    single.args.push("--force-new-cluster".to_string());
    ensure_process(first, &single, Component::Etcd).await?;
    health::wait_healthy(
        checker,
        first,
        &single,
        &health::credentials(config, first, &single),
        health_timeout,
        Component::Etcd,
        cancel,
    )
    .await?;
    first
        .conn
        .run("rm", &["-f".to_string(), db_path(config, &first.node, name)])
        .await?;
    Ok(first.address().to_string())
}

/// Deletes the archive from every etcd host and from the store.
pub async fn remove(
    hosts: &[Host],
    config: &ClusterConfig,
    name: &str,
    store: Option<&dyn SnapshotStore>,
) -> Result<()> {
    let removals = hosts.iter().filter(|h| h.node.is_etcd()).map(|host| async move {
        let path = archive_path(config, &host.node, name);
        info!("[snapshot] Removing '{}' on host '{}'", path, host.address());
        (host, host.conn.run("rm", &["-f".to_string(), path]).await)
    });
    let failures: Vec<HostError> = futures::future::join_all(removals)
        .await
        .into_iter()
        .filter_map(|(host, result)| {
            result.err().map(|error| HostError {
                host: host.address().to_string(),
                error,
            })
        })
        .collect();
    if let Some(store) = store {
        store.remove(name).await?;
    }
    if !failures.is_empty() {
        return error::PartialFailureSnafu {
            component: Component::Snapshot,
            failures: HostErrors(failures),
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use rke_model::State;

    fn state() -> FullState {
        FullState {
            desired_state: State {
                encryption_config: "kind: EncryptionConfiguration".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn custom_ca_builds_its_own_connector() {
        let ca = rcgen::generate_simple_self_signed(vec!["minio.local".to_string()]).unwrap();
        assert!(custom_ca_connector(&ca.cert.pem()).is_ok());
        assert!(custom_ca_connector("not a certificate").is_err());
    }

    #[test]
    fn archive_carries_database_and_state() {
        let bytes = archive(b"etcd-db", &state()).unwrap();
        let (db, restored) = unarchive("backup-2024", &bytes).unwrap();
        assert_eq!(db, b"etcd-db");
        assert_eq!(restored, Some(state()));
    }

    #[test]
    fn empty_database_is_refused() {
        let bytes = archive(b"", &state()).unwrap();
        assert!(matches!(
            unarchive("backup-2024", &bytes),
            Err(error::Error::RestoreFailed { .. })
        ));
        assert!(unarchive("backup-2024", b"not a zip").is_err());
    }

    #[test]
    fn archive_without_state() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(SNAPSHOT_DB_FILE, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"db").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let (_, state) = unarchive("old", &bytes).unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn names() {
        assert_eq!(normalize_name("backup-2024.zip"), "backup-2024");
        assert_eq!(normalize_name("backup-2024"), "backup-2024");
        assert!(default_name().starts_with("rke_etcd_snapshot_"));
        assert_eq!(object_key("", "b"), "b.zip");
        assert_eq!(object_key("daily", "b"), "daily/b.zip");
    }

    #[test]
    fn snapshot_paths_follow_the_prefix() {
        let mut config = ClusterConfig::default();
        config.prefix_path = "/opt/rke".to_string();
        let node = Node {
            address: "10.0.0.1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            archive_path(&config, &node, "b"),
            "/opt/rke/opt/rke/etcd-snapshots/b.zip"
        );
        let etcd = Process {
            env: vec!["ETCDCTL_API=3".to_string()],
            binds: vec!["/opt/rke/etc/kubernetes:/etc/kubernetes:z".to_string()],
            ..Default::default()
        };
        let save = save_process(&config, &node, &etcd, "b");
        assert_eq!(save.env, etcd.env);
        assert!(save
            .binds
            .contains(&"/opt/rke/opt/rke/etcd-snapshots/:/opt/rke/etcd-snapshots/:z".to_string()));
        assert!(save.command[2].ends_with("etcdctl snapshot save /opt/rke/etcd-snapshots/b.db"));
    }

    #[test]
    fn restore_builds_a_single_member() {
        let node = Node {
            address: "10.0.0.1".to_string(),
            hostname_override: "e1".to_string(),
            ..Default::default()
        };
        let process = restore_process(&ClusterConfig::default(), &node, &Process::default(), "b");
        let script = &process.command[2];
        assert!(script.contains("--initial-cluster=etcd-e1=https://10.0.0.1:2380"));
        assert!(script.contains("etcdctl snapshot restore /opt/rke/etcd-snapshots/b.db"));
    }
}
