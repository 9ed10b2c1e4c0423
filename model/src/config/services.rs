use super::is_zero;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The overridable surface every kubernetes component shares.
pub trait ServiceOverrides {
    fn image(&self) -> &str;
    fn extra_args(&self) -> &BTreeMap<String, String>;
    fn extra_binds(&self) -> &[String];
    fn extra_env(&self) -> &[String];
    fn win_extra_args(&self) -> &BTreeMap<String, String>;
    fn win_extra_binds(&self) -> &[String];
    fn win_extra_env(&self) -> &[String];
    fn extra_args_mut(&mut self) -> &mut BTreeMap<String, String>;
}

/// Declares a service section with the shared override fields followed by its own fields.
macro_rules! service {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                pub $field:ident: $ty:ty,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct $name {
            #[serde(default, skip_serializing_if = "String::is_empty")]
            pub image: String,
            #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
            pub extra_args: BTreeMap<String, String>,
            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            pub extra_binds: Vec<String>,
            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            pub extra_env: Vec<String>,
            #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
            pub win_extra_args: BTreeMap<String, String>,
            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            pub win_extra_binds: Vec<String>,
            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            pub win_extra_env: Vec<String>,
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl ServiceOverrides for $name {
            fn image(&self) -> &str {
                &self.image
            }
            fn extra_args(&self) -> &BTreeMap<String, String> {
                &self.extra_args
            }
            fn extra_binds(&self) -> &[String] {
                &self.extra_binds
            }
            fn extra_env(&self) -> &[String] {
                &self.extra_env
            }
            fn win_extra_args(&self) -> &BTreeMap<String, String> {
                &self.win_extra_args
            }
            fn win_extra_binds(&self) -> &[String] {
                &self.win_extra_binds
            }
            fn win_extra_env(&self) -> &[String] {
                &self.win_extra_env
            }
            fn extra_args_mut(&mut self) -> &mut BTreeMap<String, String> {
                &mut self.extra_args
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Services {
    #[serde(default)]
    pub etcd: EtcdService,
    #[serde(default, rename = "kube-api")]
    pub kube_api: KubeApiService,
    #[serde(default, rename = "kube-controller")]
    pub kube_controller: KubeControllerService,
    #[serde(default)]
    pub scheduler: SchedulerService,
    #[serde(default)]
    pub kubelet: KubeletService,
    #[serde(default)]
    pub kubeproxy: KubeproxyService,
}

service! {
    pub struct EtcdService {
        /// When set, etcd runs outside the cluster and no etcd processes are planned.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub external_urls: Vec<String>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub ca_cert: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub cert: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub key: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub path: String,
        #[serde(default, skip_serializing_if = "is_zero")]
        pub uid: u32,
        #[serde(default, skip_serializing_if = "is_zero")]
        pub gid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub snapshot: Option<bool>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub retention: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub creation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub backup_config: Option<BackupConfig>,
    }
}

impl EtcdService {
    pub fn is_external(&self) -> bool {
        !self.external_urls.is_empty()
    }

    pub fn s3(&self) -> Option<&S3BackupConfig> {
        self.backup_config
            .as_ref()
            .and_then(|backup| backup.s3backupconfig.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub interval_hours: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retention: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3backupconfig: Option<S3BackupConfig>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub safe_timestamp: bool,
    /// Seconds allowed for a single snapshot.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout: u64,
}

impl BackupConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3BackupConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_ca: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub folder: String,
}

impl std::fmt::Debug for S3BackupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BackupConfig")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

service! {
    pub struct KubeApiService {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub service_cluster_ip_range: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub service_node_port_range: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub pod_security_policy: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub always_pull_images: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub secrets_encryption_config: Option<SecretsEncryptionConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub audit_log: Option<AuditLog>,
        /// A full `AdmissionConfiguration` document, kept as raw yaml.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub admission_configuration: Option<serde_yaml::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub event_rate_limit: Option<EventRateLimit>,
    }
}

impl KubeApiService {
    pub fn encryption_enabled(&self) -> bool {
        self.secrets_encryption_config
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(false)
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit_log.as_ref().map(|a| a.enabled).unwrap_or(false)
    }

    pub fn event_rate_limit_enabled(&self) -> bool {
        self.event_rate_limit
            .as_ref()
            .map(|e| e.enabled)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsEncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// A user supplied `EncryptionConfiguration`, used verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_config: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditLog {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<AuditLogConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditLogConfig {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_age: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_backup: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_size: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRateLimit {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_yaml::Value>,
}

service! {
    pub struct KubeControllerService {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub cluster_cidr: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub service_cluster_ip_range: String,
    }
}

service! {
    pub struct SchedulerService {}
}

service! {
    pub struct KubeletService {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub cluster_domain: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub infra_container_image: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub cluster_dns_server: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub fail_swap_on: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub generate_serving_certificate: bool,
    }
}

service! {
    pub struct KubeproxyService {}
}
