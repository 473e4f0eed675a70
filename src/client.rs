//! Clients for interacting with the Kubernetes API
//!
//! [`KubeClient`] is asynchronous. Scenarios run on a single blocking
//! thread and use [`TestKubeClient`] instead.

use std::fmt::Debug;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Pod, PodCondition, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::poll::ConditionError;

/// Status codes of API responses which cannot change by retrying
pub const FATAL_STATUS_CODES: [u16; 6] = [400, 401, 403, 405, 409, 422];

/// Trait combo which must be satisfied by resources handled by the clients
pub trait KubeResource:
    Clone + Debug + DeserializeOwned + Serialize + Resource<DynamicType = ()>
{
}
impl<T> KubeResource for T where
    T: Clone + Debug + DeserializeOwned + Serialize + Resource<DynamicType = ()>
{
}

/// A client for interacting with the Kubernetes API
///
/// [`TestKubeClient`] is a synchronous version of [`KubeClient`]. It owns
/// a Tokio runtime and blocks on every call so that it can be used in
/// conditions of a [`Poller`](crate::poll::Poller).
pub struct TestKubeClient {
    runtime: Runtime,
    kube_client: KubeClient,
}

impl TestKubeClient {
    /// Creates a [`TestKubeClient`] from the default kubeconfig.
    pub fn new() -> Result<TestKubeClient> {
        let runtime = Runtime::new().context("Tokio runtime could not be created")?;
        let kube_client = runtime
            .block_on(KubeClient::new())
            .context("Kubernetes client could not be created")?;
        Ok(TestKubeClient {
            runtime,
            kube_client,
        })
    }

    /// Creates the namespace with the given name.
    pub fn create_namespace(&self, name: &str) -> Result<Namespace> {
        self.runtime
            .block_on(self.kube_client.create_namespace(name))
    }

    /// Deletes the namespace with the given name.
    pub fn delete_namespace(&self, name: &str) -> Result<()> {
        self.runtime
            .block_on(self.kube_client.delete_namespace(name))
    }

    /// Creates the given resource in the namespace.
    pub fn create<K: KubeResource>(&self, namespace: &str, resource: &K) -> Result<K> {
        self.runtime
            .block_on(self.kube_client.create(namespace, resource))
    }

    /// Deletes the named resource; a missing resource is not an error.
    pub fn delete<K: KubeResource>(&self, namespace: &str, name: &str) -> Result<()> {
        self.runtime
            .block_on(self.kube_client.delete::<K>(namespace, name))
    }

    /// Searches for a named resource.
    pub fn find<K: KubeResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.runtime
            .block_on(self.kube_client.find(namespace, name))
    }

    /// Returns true if the named resource exists.
    pub fn exists<K: KubeResource>(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.find::<K>(namespace, name)?.is_some())
    }

    /// Gets a list of resources restricted by the label selector.
    ///
    /// The label selector supports `=`, `==`, `!=`, and can be comma
    /// separated: `key1=value1,key2=value2`.
    pub fn list_labeled<K: KubeResource>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>> {
        self.runtime
            .block_on(self.kube_client.list_labeled(namespace, label_selector))
    }

    /// Returns the names of all resources of the given kind in the namespace.
    pub fn list_names<K: KubeResource>(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .list_labeled::<K>(namespace, "")?
            .iter()
            .map(|resource| resource.name())
            .collect())
    }

    /// Returns the node port of the named port of a service.
    pub fn service_node_port(
        &self,
        namespace: &str,
        service_name: &str,
        port_name: &str,
    ) -> Result<i32> {
        let service = self
            .find::<Service>(namespace, service_name)?
            .ok_or_else(|| {
                anyhow!(
                    "Service [{}] not found in namespace [{}]",
                    service_name,
                    namespace
                )
            })?;
        get_node_port(&service, port_name).ok_or_else(|| {
            anyhow!(
                "Service [{}] has no node port named [{}]",
                service_name,
                port_name
            )
        })
    }
}

/// A client for interacting with the Kubernetes API
///
/// [`KubeClient`] wraps a [`Client`][kube::Client]. Errors of the API
/// server are kept in the returned [`anyhow::Error`] so that they can be
/// classified with [`classify`].
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Creates a [`KubeClient`].
    pub async fn new() -> Result<KubeClient> {
        let client = Client::try_default().await?;
        Ok(KubeClient { client })
    }

    /// Creates the namespace with the given name.
    pub async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name }
        }))?;
        let namespace = namespaces
            .create(&PostParams::default(), &namespace)
            .await
            .with_context(|| format!("Namespace [{}] could not be created", name))?;
        info!(namespace = name, "Created namespace");
        Ok(namespace)
    }

    /// Deletes the namespace with the given name.
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = name, "Deleted namespace");
                Ok(())
            }
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("Namespace [{}] could not be deleted", name))
            }
        }
    }

    /// Creates the given resource in the namespace.
    pub async fn create<K: KubeResource>(&self, namespace: &str, resource: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let created = api
            .create(&PostParams::default(), resource)
            .await
            .with_context(|| {
                format!(
                    "{} [{}] could not be created in namespace [{}]",
                    K::kind(&()),
                    resource.name(),
                    namespace
                )
            })?;
        info!(
            namespace,
            kind = %K::kind(&()),
            name = %created.name(),
            "Created resource"
        );
        Ok(created)
    }

    /// Deletes the named resource; a missing resource is not an error.
    pub async fn delete<K: KubeResource>(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace, kind = %K::kind(&()), name, "Deleted resource");
                Ok(())
            }
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(error).with_context(|| {
                format!(
                    "{} [{}] could not be deleted in namespace [{}]",
                    K::kind(&()),
                    name,
                    namespace
                )
            }),
        }
    }

    /// Searches for a named resource.
    ///
    /// A missing resource is `Ok(None)`, any other failure is an error.
    pub async fn find<K: KubeResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(resource) => Ok(Some(resource)),
            Err(error) if is_not_found(&error) => {
                debug!(namespace, kind = %K::kind(&()), name, "Resource not found");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Gets a list of resources restricted by the label selector.
    pub async fn list_labeled<K: KubeResource>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let mut lp = ListParams::default();
        if !label_selector.is_empty() {
            lp = lp.labels(label_selector);
        }
        Ok(api.list(&lp).await?.items)
    }
}

/// Classifies a failed API call for the poll loop.
///
/// Responses with one of the [`FATAL_STATUS_CODES`] are fatal, anything
/// else (connection errors, server errors, throttling) is transient.
pub fn classify(error: anyhow::Error) -> ConditionError {
    let fatal = matches!(
        error.downcast_ref::<kube::Error>(),
        Some(kube::Error::Api(response)) if FATAL_STATUS_CODES.contains(&response.code)
    );
    if fatal {
        ConditionError::Fatal(error)
    } else {
        ConditionError::Transient(error)
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

/// Deserializes the given JSON value into the desired type.
pub fn from_value<T>(value: Value) -> Result<T>
where
    T: DeserializeOwned,
{
    T::deserialize(value).context("Deserialization failed")
}

/// Deserializes the given YAML text into the desired type.
pub fn from_yaml<T>(yaml: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_yaml::from_str(yaml).context("String is not a well-formed YAML")
}

/// Returns the conditions of the given pod.
pub fn get_pod_conditions(pod: &Pod) -> Vec<PodCondition> {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.clone())
        .unwrap_or_else(Vec::new)
}

/// Returns true if the pod condition `Ready` is `True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    get_pod_conditions(pod)
        .iter()
        .any(|condition| condition.type_ == "Ready" && condition.status == "True")
}

/// Returns the node port of the named service port.
pub fn get_node_port(service: &Service, port_name: &str) -> Option<i32> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .find(|port| port.name.as_deref() == Some(port_name))
        .and_then(|port| port.node_port)
}
