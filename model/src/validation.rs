use crate::config::{ClusterConfig, Role};
use crate::error::{self, Result};
use ipnet::IpNet;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashSet;
use std::net::IpAddr;

/// Structural checks that hold regardless of defaulting.
pub fn validate(config: &ClusterConfig) -> Result<()> {
    for (i, node) in config.nodes.iter().enumerate() {
        ensure!(
            !node.address.trim().is_empty(),
            error::ValidationSnafu {
                message: format!("address for host ({}) is not provided", i + 1)
            }
        );
        ensure!(
            !node.role.is_empty(),
            error::ValidationSnafu {
                message: format!("role for host ({}) is not provided", node.address)
            }
        );
    }

    for role in [Role::Etcd, Role::Controlplane, Role::Worker] {
        let mut seen = HashSet::new();
        for node in config.nodes_with_role(role) {
            ensure!(
                seen.insert(node.address.as_str()),
                error::ValidationSnafu {
                    message: format!("host '{}' is listed more than once as {}", node.address, role)
                }
            );
        }
    }

    let defaults = config
        .private_registries
        .iter()
        .filter(|r| r.is_default)
        .count();
    ensure!(
        defaults <= 1,
        error::ValidationSnafu {
            message: "only one private registry can be flagged as default"
        }
    );

    let kube_api = &config.services.kube_api;
    if !kube_api.service_cluster_ip_range.is_empty() {
        parse_cidr(&kube_api.service_cluster_ip_range)?;
    }
    let controller = &config.services.kube_controller;
    if !controller.cluster_cidr.is_empty() {
        parse_cidr(&controller.cluster_cidr)?;
    }
    if !controller.service_cluster_ip_range.is_empty() {
        parse_cidr(&controller.service_cluster_ip_range)?;
    }

    if let Some(strategy) = &config.upgrade_strategy {
        for value in [
            &strategy.max_unavailable_worker,
            &strategy.max_unavailable_controlplane,
        ] {
            if !value.is_empty() {
                ensure!(
                    parse_max_unavailable(value).is_some(),
                    error::ValidationSnafu {
                        message: format!("invalid max unavailable value '{}'", value)
                    }
                );
            }
        }
    }
    Ok(())
}

/// Checks that only hold once defaults are filled in.
pub fn validate_defaulted(config: &ClusterConfig) -> Result<()> {
    ensure!(
        config.nodes_with_role(Role::Controlplane).next().is_some(),
        error::ValidationSnafu {
            message: "cluster must have at least one control plane host"
        }
    );
    ensure!(
        config.services.etcd.is_external() || config.nodes_with_role(Role::Etcd).next().is_some(),
        error::ValidationSnafu {
            message: "cluster must have at least one etcd host"
        }
    );

    let services = &config.services;
    let required = [
        ("etcd image", services.etcd.image.as_str()),
        ("kube api image", services.kube_api.image.as_str()),
        (
            "kube api service cluster ip range",
            services.kube_api.service_cluster_ip_range.as_str(),
        ),
        ("kube controller image", services.kube_controller.image.as_str()),
        (
            "kube controller service cluster ip range",
            services.kube_controller.service_cluster_ip_range.as_str(),
        ),
        (
            "kube controller cluster cidr",
            services.kube_controller.cluster_cidr.as_str(),
        ),
        ("scheduler image", services.scheduler.image.as_str()),
        ("kubelet image", services.kubelet.image.as_str()),
        (
            "kubelet cluster dns service",
            services.kubelet.cluster_dns_server.as_str(),
        ),
        ("kubelet cluster domain", services.kubelet.cluster_domain.as_str()),
        (
            "kubelet infra container image",
            services.kubelet.infra_container_image.as_str(),
        ),
        ("kubeproxy image", services.kubeproxy.image.as_str()),
    ];
    for (name, value) in required {
        ensure!(
            !value.is_empty(),
            error::ValidationSnafu {
                message: format!("{} can't be empty", name)
            }
        );
    }
    validate(config)
}

pub fn parse_cidr(cidr: &str) -> Result<IpNet> {
    Ok(cidr
        .trim()
        .parse::<IpNet>()
        .context(error::ParseCidrSnafu { cidr })?)
}

/// The first host address after the base of the service range, e.g. `10.43.0.1` for
/// `10.43.0.0/16`.
pub fn kubernetes_service_ip(cidr: &str) -> Result<IpAddr> {
    let net = parse_cidr(cidr)?;
    Ok(net
        .trunc()
        .hosts()
        .next()
        .context(error::EmptyCidrSnafu { cidr })?)
}

/// Parses `max_unavailable` as an absolute count or a percentage of at most 100. Returns
/// `(value, is_percent)`.
pub fn parse_max_unavailable(value: &str) -> Option<(u32, bool)> {
    let value = value.trim();
    match value.strip_suffix('%') {
        Some(percent) => percent
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|p| *p <= 100)
            .map(|p| (p, true)),
        None => value.parse::<u32>().ok().map(|n| (n, false)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Node, NodeUpgradeStrategy, PrivateRegistry};

    fn node(address: &str, roles: &[Role]) -> Node {
        Node {
            address: address.to_string(),
            role: roles.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn service_ip_is_first_host() {
        assert_eq!(
            kubernetes_service_ip("10.43.0.0/16").unwrap().to_string(),
            "10.43.0.1"
        );
        assert_eq!(
            kubernetes_service_ip("172.16.0.0/12").unwrap().to_string(),
            "172.16.0.1"
        );
        // A range given with host bits set still resolves against its base.
        assert_eq!(
            kubernetes_service_ip("10.43.5.7/16").unwrap().to_string(),
            "10.43.0.1"
        );
        assert!(kubernetes_service_ip("not-a-cidr").is_err());
    }

    #[test]
    fn duplicate_address_in_pool_is_rejected() {
        let config = ClusterConfig {
            nodes: vec![node("10.0.0.1", &[Role::Worker]), node("10.0.0.1", &[Role::Worker])],
            ..Default::default()
        };
        assert!(validate(&config).unwrap_err().is_validation());
    }

    #[test]
    fn same_address_across_pools_is_allowed() {
        let config = ClusterConfig {
            nodes: vec![node("10.0.0.1", &[Role::Etcd]), node("10.0.0.1", &[Role::Worker])],
            ..Default::default()
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn node_without_role_is_rejected() {
        let config = ClusterConfig {
            nodes: vec![node("10.0.0.1", &[])],
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn two_default_registries_are_rejected() {
        let registry = PrivateRegistry {
            url: "r.example.com".to_string(),
            is_default: true,
            ..Default::default()
        };
        let config = ClusterConfig {
            private_registries: vec![registry.clone(), registry],
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn missing_controlplane_is_rejected() {
        let config = ClusterConfig {
            nodes: vec![node("10.0.0.1", &[Role::Etcd, Role::Worker])],
            ..Default::default()
        };
        assert!(validate_defaulted(&config).is_err());
    }

    #[test]
    fn max_unavailable_forms() {
        assert_eq!(parse_max_unavailable("10%"), Some((10, true)));
        assert_eq!(parse_max_unavailable("3"), Some((3, false)));
        assert_eq!(parse_max_unavailable("ten"), None);
        assert_eq!(parse_max_unavailable("100%"), Some((100, true)));
        assert_eq!(parse_max_unavailable("150%"), None);
    }

    #[test]
    fn max_unavailable_over_the_whole_pool_is_rejected() {
        let mut config = ClusterConfig {
            nodes: vec![
                node("10.0.0.1", &[Role::Etcd, Role::Controlplane]),
                node("10.0.0.2", &[Role::Worker]),
            ],
            upgrade_strategy: Some(NodeUpgradeStrategy {
                max_unavailable_worker: "150%".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate(&config).unwrap_err().is_validation());
        if let Some(strategy) = config.upgrade_strategy.as_mut() {
            strategy.max_unavailable_worker = "100%".to_string();
        }
        assert!(validate(&config).is_ok());
    }
}
