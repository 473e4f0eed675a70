//! Ingress controllers and the ingresses routing to domain clusters

pub mod traefik;
pub mod voyager;

use std::collections::BTreeMap;

use anyhow::Result;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{json, Map, Value};

use crate::client::{from_value, TestKubeClient};

/// Managed server port of each cluster, keyed by cluster name
pub type ClusterPorts = BTreeMap<String, u16>;

/// Name of the service which the operator creates for a cluster
pub fn cluster_service_name(domain_uid: &str, cluster_name: &str) -> String {
    format!(
        "{}-cluster-{}",
        domain_uid,
        cluster_name.to_lowercase().replace('_', "-")
    )
}

/// An ingress with one host rule per cluster of a domain
pub struct DomainIngress<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub domain_uid: &'a str,
    pub cluster_ports: &'a ClusterPorts,
    pub annotations: BTreeMap<String, String>,
}

impl<'a> DomainIngress<'a> {
    /// Builds the ingress; `host` maps a cluster name to the rule's host.
    pub fn build<F>(&self, host: F) -> Result<Ingress>
    where
        F: Fn(&str) -> String,
    {
        let rules: Vec<Value> = self
            .cluster_ports
            .iter()
            .map(|(cluster_name, port)| {
                json!({
                    "host": host(cluster_name),
                    "http": {
                        "paths": [{
                            "path": "/",
                            "pathType": "Prefix",
                            "backend": {
                                "service": {
                                    "name": cluster_service_name(self.domain_uid, cluster_name),
                                    "port": { "number": port }
                                }
                            }
                        }]
                    }
                })
            })
            .collect();

        let annotations: Map<String, Value> = self
            .annotations
            .iter()
            .map(|(key, value)| (key.to_owned(), json!(value)))
            .collect();

        from_value(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "annotations": annotations
            },
            "spec": { "rules": rules }
        }))
    }
}

/// Returns the hosts of all rules of the ingress.
pub fn ingress_hosts(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|rule| rule.host.clone())
        .collect()
}

/// Lists the names of all ingresses in the namespace.
pub fn list_ingresses(client: &TestKubeClient, namespace: &str) -> Result<Vec<String>> {
    client.list_names::<Ingress>(namespace)
}
