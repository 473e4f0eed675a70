//! Traefik ingress controller

use std::collections::BTreeMap;

use anyhow::Result;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;

use super::{ClusterPorts, DomainIngress};
use crate::client::TestKubeClient;
use crate::helm::{self, HelmParams, HelmValues};

/// Label selector of the Traefik pods
pub const TRAEFIK_POD_LABELS: &str = "app=traefik";

/// Parameters of a Traefik release
#[derive(Clone, Debug)]
pub struct TraefikParams {
    pub helm_params: HelmParams,
    /// Namespaces watched for ingresses
    pub namespaces: Vec<String>,
    /// Node ports for HTTP and HTTPS
    pub node_ports: Option<(u16, u16)>,
}

impl TraefikParams {
    /// Chart values overridden for this release
    pub fn values(&self) -> HelmValues {
        let mut values = HelmValues::new();
        values.insert(
            String::from("kubernetes.namespaces"),
            json!(self.namespaces),
        );
        if let Some((http, https)) = self.node_ports {
            values.insert(String::from("serviceType"), json!("NodePort"));
            values.insert(
                String::from("service.nodePorts"),
                json!({ "http": http, "https": https }),
            );
        }
        values
    }
}

/// Installs Traefik.
pub fn install(params: &TraefikParams) -> Result<()> {
    helm::install(&params.helm_params, &params.values())
}

/// Upgrades Traefik, e.g. to watch additional namespaces.
pub fn upgrade(params: &TraefikParams) -> Result<()> {
    helm::upgrade(&params.helm_params, &params.values())
}

/// Uninstalls Traefik.
pub fn uninstall(params: &HelmParams) -> Result<()> {
    helm::uninstall(params)
}

/// Installs the ingress-per-domain sample chart for a domain.
///
/// `params` names the release, the chart directory, and the domain
/// namespace.
pub fn create_ingress(params: &HelmParams, domain_uid: &str, hostname: &str) -> Result<()> {
    helm::install(params, &ingress_values(domain_uid, hostname))
}

/// Uninstalls an ingress created with [`create_ingress`].
pub fn uninstall_ingress(params: &HelmParams) -> Result<()> {
    helm::uninstall(params)
}

/// Name of the ingress which the sample chart creates for a domain
pub fn sample_ingress_name(domain_uid: &str) -> String {
    format!("{}-traefik", domain_uid)
}

fn ingress_values(domain_uid: &str, hostname: &str) -> HelmValues {
    let mut values = HelmValues::new();
    values.insert(String::from("wlsDomain.domainUID"), json!(domain_uid));
    values.insert(String::from("traefik.hostname"), json!(hostname));
    values
}

/// Creates an ingress with a rule per cluster of the domain.
///
/// The host of each rule is `<domain uid>.<namespace>.<cluster>.test`.
pub fn create_domain_ingress(
    client: &TestKubeClient,
    domain_uid: &str,
    namespace: &str,
    cluster_ports: &ClusterPorts,
) -> Result<Ingress> {
    let name = format!("{}-ingress", domain_uid);
    let ingress = domain_ingress(&name, domain_uid, namespace, cluster_ports)?;
    client.create(namespace, &ingress)
}

/// Host of the rule routing to the given cluster
pub fn cluster_host(domain_uid: &str, namespace: &str, cluster_name: &str) -> String {
    format!("{}.{}.{}.test", domain_uid, namespace, cluster_name)
}

fn domain_ingress(
    name: &str,
    domain_uid: &str,
    namespace: &str,
    cluster_ports: &ClusterPorts,
) -> Result<Ingress> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        String::from("kubernetes.io/ingress.class"),
        String::from("traefik"),
    );
    DomainIngress {
        name,
        namespace,
        domain_uid,
        cluster_ports,
        annotations,
    }
    .build(|cluster_name| cluster_host(domain_uid, namespace, cluster_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::ingress_hosts;

    #[test]
    fn node_ports_switch_the_service_type() {
        let params = TraefikParams {
            helm_params: HelmParams::new("traefik-operator", "ns-traefik"),
            namespaces: vec![String::from("ns-traefik"), String::from("ns-domain")],
            node_ports: Some((30380, 31443)),
        };

        let values = params.values();

        assert_eq!(values["serviceType"], json!("NodePort"));
        assert_eq!(
            values["service.nodePorts"],
            json!({ "http": 30380, "https": 31443 })
        );
        assert_eq!(
            values["kubernetes.namespaces"],
            json!(["ns-traefik", "ns-domain"])
        );
    }

    #[test]
    fn sample_chart_values_name_the_domain_and_host() {
        let values = ingress_values("domain1", "domain1.org");

        assert_eq!(values["wlsDomain.domainUID"], json!("domain1"));
        assert_eq!(values["traefik.hostname"], json!("domain1.org"));
    }

    #[test]
    fn domain_ingress_hosts_contain_the_namespace() {
        let mut cluster_ports = ClusterPorts::new();
        cluster_ports.insert(String::from("cluster-1"), 8001);

        let ingress =
            domain_ingress("domain1-ingress", "domain1", "ns-domain", &cluster_ports).unwrap();

        assert_eq!(ingress_hosts(&ingress), vec!["domain1.ns-domain.cluster-1.test"]);
        assert_eq!(
            ingress.metadata.annotations.unwrap()["kubernetes.io/ingress.class"],
            "traefik"
        );
    }
}
