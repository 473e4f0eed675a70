//! Installation of the domain operator

use anyhow::Result;
use serde_json::json;

use crate::helm::{self, HelmParams, HelmValues};

/// Name of the operator's Helm release
pub const OPERATOR_RELEASE_NAME: &str = "weblogic-operator";

/// Label selector of the operator pod
pub const OPERATOR_POD_LABELS: &str = "app=weblogic-operator";

/// Parameters of an operator release
#[derive(Clone, Debug)]
pub struct OperatorParams {
    pub helm_params: HelmParams,
    pub image: String,
    pub image_pull_secrets: Vec<String>,
    pub domain_namespaces: Vec<String>,
    pub service_account: String,
}

impl OperatorParams {
    /// Chart values overridden for this release
    pub fn values(&self) -> HelmValues {
        let mut values = HelmValues::new();
        values.insert(String::from("image"), json!(self.image));
        values.insert(
            String::from("serviceAccount"),
            json!(self.service_account),
        );
        values.insert(
            String::from("domainNamespaces"),
            json!(self.domain_namespaces),
        );
        if !self.image_pull_secrets.is_empty() {
            let secrets: Vec<_> = self
                .image_pull_secrets
                .iter()
                .map(|name| json!({ "name": name }))
                .collect();
            values.insert(String::from("imagePullSecrets"), json!(secrets));
        }
        values
    }
}

/// Installs the operator.
pub fn install(params: &OperatorParams) -> Result<()> {
    helm::install(&params.helm_params, &params.values())
}

/// Upgrades the operator, e.g. to manage additional domain namespaces.
pub fn upgrade(params: &OperatorParams) -> Result<()> {
    helm::upgrade(&params.helm_params, &params.values())
}

/// Uninstalls the operator.
pub fn uninstall(params: &HelmParams) -> Result<()> {
    helm::uninstall(params)
}
