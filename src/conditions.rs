//! Conditions on cluster state for the [`Poller`](crate::poll::Poller)
//!
//! Every condition queries the cluster anew on each evaluation. Failed API
//! calls are classified with [`classify`].

use k8s_openapi::api::core::v1::{Pod, Service};

use crate::client::{classify, is_pod_ready, TestKubeClient};
use crate::domain::{Domain, DOMAIN_UID_LABEL};
use crate::helm;
use crate::ingress::{traefik::TRAEFIK_POD_LABELS, voyager::VOYAGER_POD_LABELS};
use crate::operator::OPERATOR_POD_LABELS;
use crate::poll::{ConditionError, ConditionResultExt};

fn domain_pods(
    client: &TestKubeClient,
    domain_uid: &str,
    namespace: &str,
) -> Result<Vec<Pod>, ConditionError> {
    client
        .list_labeled::<Pod>(namespace, &format!("{}={}", DOMAIN_UID_LABEL, domain_uid))
        .map_err(classify)
}

/// The pod of the domain exists.
pub fn pod_exists<'a>(
    client: &'a TestKubeClient,
    pod_name: &'a str,
    domain_uid: &'a str,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    move || {
        Ok(domain_pods(client, domain_uid, namespace)?
            .iter()
            .any(|pod| pod.metadata.name.as_deref() == Some(pod_name)))
    }
}

/// The pod of the domain exists and is ready.
pub fn pod_ready<'a>(
    client: &'a TestKubeClient,
    pod_name: &'a str,
    domain_uid: &'a str,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    move || {
        Ok(domain_pods(client, domain_uid, namespace)?
            .iter()
            .any(|pod| pod.metadata.name.as_deref() == Some(pod_name) && is_pod_ready(pod)))
    }
}

/// The named service exists.
pub fn service_exists<'a>(
    client: &'a TestKubeClient,
    service_name: &'a str,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    move || {
        client
            .exists::<Service>(namespace, service_name)
            .map_err(classify)
    }
}

/// The domain custom resource exists.
pub fn domain_exists<'a>(
    client: &'a TestKubeClient,
    domain_uid: &'a str,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    move || client.exists::<Domain>(namespace, domain_uid).map_err(classify)
}

/// At least one pod matches the label selector and all matching pods are ready.
pub fn pods_ready<'a>(
    client: &'a TestKubeClient,
    label_selector: &'a str,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    move || {
        let pods = client
            .list_labeled::<Pod>(namespace, label_selector)
            .map_err(classify)?;
        Ok(!pods.is_empty() && pods.iter().all(is_pod_ready))
    }
}

/// The operator pod is running and ready.
pub fn operator_is_running<'a>(
    client: &'a TestKubeClient,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    pods_ready(client, OPERATOR_POD_LABELS, namespace)
}

/// The Traefik pod is ready.
pub fn traefik_is_ready<'a>(
    client: &'a TestKubeClient,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    pods_ready(client, TRAEFIK_POD_LABELS, namespace)
}

/// The Voyager pod is ready.
pub fn voyager_is_ready<'a>(
    client: &'a TestKubeClient,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    pods_ready(client, VOYAGER_POD_LABELS, namespace)
}

/// The Helm release is deployed.
///
/// A failing `helm` invocation is transient.
pub fn release_deployed<'a>(
    release_name: &'a str,
    namespace: &'a str,
) -> impl FnMut() -> Result<bool, ConditionError> + 'a {
    move || helm::is_release_deployed(release_name, namespace).transient()
}
