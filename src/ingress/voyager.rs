//! Voyager ingress controller

use std::collections::BTreeMap;

use anyhow::Result;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;

use super::{ingress_hosts, ClusterPorts, DomainIngress};
use crate::client::TestKubeClient;
use crate::helm::{self, HelmParams, HelmValues};

/// Label selector of the Voyager operator pods
pub const VOYAGER_POD_LABELS: &str = "app=voyager";

/// Parameters of a Voyager release
#[derive(Clone, Debug)]
pub struct VoyagerParams {
    pub helm_params: HelmParams,
    pub cloud_provider: String,
    pub enable_validating_webhook: bool,
}

impl VoyagerParams {
    /// Parameters for a bare metal cluster without admission webhook
    pub fn baremetal(helm_params: HelmParams) -> VoyagerParams {
        VoyagerParams {
            helm_params,
            cloud_provider: String::from("baremetal"),
            enable_validating_webhook: false,
        }
    }

    /// Chart values overridden for this release
    pub fn values(&self) -> HelmValues {
        let mut values = HelmValues::new();
        values.insert(String::from("cloudProvider"), json!(self.cloud_provider));
        values.insert(
            String::from("apiserver.enableValidatingWebhook"),
            json!(self.enable_validating_webhook),
        );
        values
    }
}

/// Installs Voyager.
pub fn install(params: &VoyagerParams) -> Result<()> {
    helm::install(&params.helm_params, &params.values())
}

/// Upgrades Voyager.
pub fn upgrade(params: &VoyagerParams) -> Result<()> {
    helm::upgrade(&params.helm_params, &params.values())
}

/// Uninstalls Voyager.
pub fn uninstall(params: &HelmParams) -> Result<()> {
    helm::uninstall(params)
}

/// Name of the service which Voyager creates for an ingress
pub fn service_name(ingress_name: &str) -> String {
    format!("voyager-{}", ingress_name)
}

/// Creates an ingress for the domain with a rule per cluster and returns
/// the hosts of the rules, `<domain uid>.<cluster>.org`.
pub fn create_ingress(
    client: &TestKubeClient,
    ingress_name: &str,
    domain_namespace: &str,
    domain_uid: &str,
    cluster_ports: &ClusterPorts,
) -> Result<Vec<String>> {
    let ingress = domain_ingress(ingress_name, domain_namespace, domain_uid, cluster_ports)?;
    let created = client.create(domain_namespace, &ingress)?;
    Ok(ingress_hosts(&created))
}

fn domain_ingress(
    name: &str,
    namespace: &str,
    domain_uid: &str,
    cluster_ports: &ClusterPorts,
) -> Result<Ingress> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        String::from("ingress.appscode.com/type"),
        String::from("NodePort"),
    );
    annotations.insert(
        String::from("ingress.appscode.com/affinity"),
        String::from("cookie"),
    );
    annotations.insert(
        String::from("kubernetes.io/ingress.class"),
        String::from("voyager"),
    );
    DomainIngress {
        name,
        namespace,
        domain_uid,
        cluster_ports,
        annotations,
    }
    .build(|cluster_name| format!("{}.{}.org", domain_uid, cluster_name))
}
