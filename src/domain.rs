//! The domain custom resource managed by the operator

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label which the operator sets on every pod and service of a domain
pub const DOMAIN_UID_LABEL: &str = "weblogic.domainUID";

/// Specification of a domain
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Domain",
    group = "weblogic.oracle",
    version = "v8",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(rename = "domainUID")]
    pub domain_uid: String,
    pub domain_home_source_type: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    pub web_logic_credentials_secret: SecretReference,
    pub include_server_out_in_pod_log: bool,
    pub server_start_policy: String,
    pub server_pod: ServerPod,
    pub admin_server: AdminServer,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    pub configuration: Configuration,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct SecretReference {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ServerPod {
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminServer {
    pub server_start_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_service: Option<AdminService>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct AdminService {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_name: String,
    pub node_port: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub cluster_name: String,
    pub replicas: i32,
    pub server_start_state: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub model: Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspector_job_active_deadline_seconds: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub domain_type: String,
    pub runtime_encryption_secret: String,
}

/// Settings of a model-in-image domain with one dynamic cluster
#[derive(Clone, Debug)]
pub struct DomainTemplate {
    pub domain_uid: String,
    pub namespace: String,
    pub image: String,
    pub pull_secret: String,
    pub credentials_secret: String,
    pub encryption_secret: String,
    pub cluster_name: String,
    pub replicas: i32,
    /// Exposes the admin server's default channel on a node port.
    pub expose_admin_node_port: bool,
    pub introspector_deadline_seconds: Option<i64>,
}

impl DomainTemplate {
    /// Name of the admin server pod and service
    pub fn admin_server_name(&self) -> String {
        format!("{}-admin-server", self.domain_uid)
    }

    /// Names of the managed server pods and services, `<uid>-managed-server<n>`
    pub fn managed_server_names(&self) -> Vec<String> {
        (1..=self.replicas)
            .map(|i| format!("{}-{}{}", self.domain_uid, MANAGED_SERVER_NAME_BASE, i))
            .collect()
    }

    /// Server names of the cluster members as they appear in responses
    pub fn cluster_member_names(&self) -> Vec<String> {
        (1..=self.replicas)
            .map(|i| format!("{}{}", MANAGED_SERVER_NAME_BASE, i))
            .collect()
    }

    /// Builds the domain resource.
    pub fn build(&self) -> Domain {
        let mut domain = Domain::new(
            &self.domain_uid,
            DomainSpec {
                domain_uid: self.domain_uid.to_owned(),
                domain_home_source_type: String::from("FromModel"),
                image: self.image.to_owned(),
                image_pull_secrets: vec![LocalObjectReference {
                    name: self.pull_secret.to_owned(),
                }],
                web_logic_credentials_secret: SecretReference {
                    name: self.credentials_secret.to_owned(),
                    namespace: Some(self.namespace.to_owned()),
                },
                include_server_out_in_pod_log: true,
                server_start_policy: String::from("IF_NEEDED"),
                server_pod: ServerPod {
                    env: vec![
                        EnvVar {
                            name: String::from("JAVA_OPTIONS"),
                            value: String::from("-Dweblogic.StdoutDebugEnabled=false"),
                        },
                        EnvVar {
                            name: String::from("USER_MEM_ARGS"),
                            value: String::from("-Djava.security.egd=file:/dev/./urandom "),
                        },
                    ],
                },
                admin_server: AdminServer {
                    server_start_state: String::from("RUNNING"),
                    admin_service: if self.expose_admin_node_port {
                        Some(AdminService {
                            channels: vec![Channel {
                                channel_name: String::from("default"),
                                node_port: 0,
                            }],
                        })
                    } else {
                        None
                    },
                },
                clusters: vec![Cluster {
                    cluster_name: self.cluster_name.to_owned(),
                    replicas: self.replicas,
                    server_start_state: String::from("RUNNING"),
                }],
                configuration: Configuration {
                    model: Model {
                        domain_type: String::from("WLS"),
                        runtime_encryption_secret: self.encryption_secret.to_owned(),
                    },
                    introspector_job_active_deadline_seconds: self
                        .introspector_deadline_seconds,
                },
            },
        );
        domain.metadata.namespace = Some(self.namespace.to_owned());
        domain
    }
}

/// Prefix of the managed server names in the domain model
pub const MANAGED_SERVER_NAME_BASE: &str = "managed-server";
