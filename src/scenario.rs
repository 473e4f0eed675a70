//! Resources provisioned by a scenario and their teardown
//!
//! Every resource a scenario creates is recorded in a [`ScenarioContext`].
//! The teardown removes them in reverse order of creation and attempts
//! every removal even if an earlier one fails.

use anyhow::Result;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::TestKubeClient;
use crate::domain::Domain;
use crate::helm::{self, HelmParams};
use crate::image;
use crate::result::TestResult;

/// A resource which must be removed after the scenario
#[derive(Clone, Debug, PartialEq)]
pub enum Provisioned {
    Namespace(String),
    ServiceAccount { namespace: String, name: String },
    Secret { namespace: String, name: String },
    HelmRelease(HelmParams),
    Domain { namespace: String, domain_uid: String },
    Ingress { namespace: String, name: String },
    Image(String),
}

/// Removes provisioned resources
pub trait Teardown {
    fn remove(&mut self, resource: &Provisioned) -> Result<()>;
}

/// Removes resources from the cluster and the local Docker host
pub struct ClusterTeardown<'a> {
    pub client: &'a TestKubeClient,
}

impl<'a> Teardown for ClusterTeardown<'a> {
    fn remove(&mut self, resource: &Provisioned) -> Result<()> {
        match resource {
            Provisioned::Namespace(name) => self.client.delete_namespace(name),
            Provisioned::ServiceAccount { namespace, name } => {
                self.client.delete::<ServiceAccount>(namespace, name)
            }
            Provisioned::Secret { namespace, name } => {
                self.client.delete::<Secret>(namespace, name)
            }
            Provisioned::HelmRelease(params) => helm::uninstall(params),
            Provisioned::Domain {
                namespace,
                domain_uid,
            } => self.client.delete::<Domain>(namespace, domain_uid),
            Provisioned::Ingress { namespace, name } => {
                self.client.delete::<Ingress>(namespace, name)
            }
            Provisioned::Image(image) => image::delete(image),
        }
    }
}

/// Namespaces and resources of one scenario
#[derive(Debug, Default)]
pub struct ScenarioContext {
    pub namespaces: Vec<String>,
    provisioned: Vec<Provisioned>,
}

impl ScenarioContext {
    /// Creates `count` namespaces with unique names and records them.
    ///
    /// Namespaces created before a failure stay recorded so that the
    /// teardown removes them.
    pub fn create_namespaces(&mut self, client: &TestKubeClient, count: usize) -> Result<()> {
        self.create_namespaces_with(count, |name| client.create_namespace(name).map(|_| ()))
    }

    /// Creates `count` namespaces with `create` and records each one as
    /// soon as it exists.
    pub fn create_namespaces_with<F>(&mut self, count: usize, mut create: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        for _ in 0..count {
            let name = unique_namespace_name();
            create(&name)?;
            self.record(Provisioned::Namespace(name.to_owned()));
            self.namespaces.push(name);
        }
        Ok(())
    }

    /// Records a resource which must be removed on teardown.
    pub fn record(&mut self, resource: Provisioned) {
        self.provisioned.push(resource);
    }

    pub fn provisioned(&self) -> &[Provisioned] {
        &self.provisioned
    }

    /// Removes all recorded resources, newest first.
    ///
    /// Failures are logged and collected; the remaining resources are
    /// removed nevertheless.
    pub fn teardown<T: Teardown>(&mut self, teardown: &mut T) -> TestResult {
        let mut result = TestResult::default();
        while let Some(resource) = self.provisioned.pop() {
            let removal = teardown.remove(&resource);
            match &removal {
                Ok(()) => info!(?resource, "Removed"),
                Err(error) => warn!(?resource, "Removal failed: {:#}", error),
            }
            result.combine(&removal);
        }
        result
    }
}

/// Returns a namespace name which is unique per call.
pub fn unique_namespace_name() -> String {
    let uuid = Uuid::new_v4().to_simple().to_string();
    format!("ns-{}", &uuid[..8])
}
