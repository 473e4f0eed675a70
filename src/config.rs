//! Settings of the test suite
//!
//! Every setting has a default which can be overridden by an environment
//! variable with the prefix `OPERATOR_IT_`, e.g. `OPERATOR_IT_NODE_PORT_HOST`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

use crate::poll::{PolicyError, RetryPolicy};

/// Prefix of the environment variables which override the defaults
pub const ENV_PREFIX: &str = "OPERATOR_IT";

/// Registry user name which marks that no registry is available
pub const REPO_DUMMY_VALUE: &str = "dummy";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("test settings could not be loaded: {0}")]
    Load(#[from] config::ConfigError),
    #[error("poll settings are invalid: {0}")]
    Policy(#[from] PolicyError),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TestConfig {
    /// Host on which node ports of the cluster are reachable
    pub node_port_host: String,

    pub repo_registry: String,
    pub repo_username: String,
    pub repo_password: String,
    pub repo_email: String,
    /// Repository prefix of pushed images, e.g. `phx.ocir.io/tenancy/`
    pub repo_name: String,
    pub repo_secret_name: String,

    pub operator_image: String,
    pub operator_chart_dir: PathBuf,

    pub traefik_repo_url: String,
    pub traefik_values_file: PathBuf,
    pub ingress_sample_chart_dir: PathBuf,

    pub voyager_repo_url: String,

    pub mii_image_name: String,
    pub mii_base_image: String,
    /// Release archive of WebLogic Deploy Tooling
    pub mii_wdt_installer: PathBuf,
    pub mii_model_file: PathBuf,
    pub mii_app_archive: PathBuf,
    pub mii_model_home: String,
    /// Prebuilt model-in-image image used by the load balancing scenarios
    pub domain_image: String,
    /// Application which reports the name of the answering server
    pub cluster_view_archive: PathBuf,

    pub admin_username: String,
    pub admin_password: String,

    pub poll_initial_delay_seconds: u64,
    pub poll_interval_seconds: u64,
    pub poll_timeout_seconds: u64,
}

impl TestConfig {
    /// Loads the defaults overridden by the `OPERATOR_IT_*` environment.
    pub fn load() -> Result<TestConfig, ConfigError> {
        TestConfig::from_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Loads the defaults overridden by the given environment source.
    pub fn from_source(environment: Environment) -> Result<TestConfig, ConfigError> {
        let config = Config::builder()
            .set_default("node_port_host", "localhost")?
            .set_default("repo_registry", "phx.ocir.io")?
            .set_default("repo_username", REPO_DUMMY_VALUE)?
            .set_default("repo_password", REPO_DUMMY_VALUE)?
            .set_default("repo_email", REPO_DUMMY_VALUE)?
            .set_default("repo_name", "phx.ocir.io/weblogick8s/")?
            .set_default("repo_secret_name", "ocirsecret")?
            .set_default(
                "operator_image",
                "oracle/weblogic-kubernetes-operator:3.0.0",
            )?
            .set_default("operator_chart_dir", "kubernetes/charts/weblogic-operator")?
            .set_default(
                "traefik_repo_url",
                "https://kubernetes-charts.storage.googleapis.com/",
            )?
            .set_default(
                "traefik_values_file",
                "kubernetes/samples/charts/traefik/values.yaml",
            )?
            .set_default(
                "ingress_sample_chart_dir",
                "kubernetes/samples/charts/ingress-per-domain",
            )?
            .set_default("voyager_repo_url", "https://charts.appscode.com/stable/")?
            .set_default("mii_image_name", "mii-image")?
            .set_default(
                "mii_base_image",
                "container-registry.oracle.com/middleware/weblogic:12.2.1.4",
            )?
            .set_default("mii_wdt_installer", "download/weblogic-deploy.tar.gz")?
            .set_default("mii_model_file", "resources/wdt-models/model1-wls.yaml")?
            .set_default("mii_app_archive", "resources/apps/sample-app.zip")?
            .set_default("mii_model_home", "/u01/wdt/models")?
            .set_default("domain_image", "mii-basic-image:1.0")?
            .set_default("cluster_view_archive", "resources/apps/clusterview.war")?
            .set_default("admin_username", "weblogic")?
            .set_default("admin_password", "welcome1")?
            .set_default("poll_initial_delay_seconds", 2_i64)?
            .set_default("poll_interval_seconds", 10_i64)?
            .set_default("poll_timeout_seconds", 300_i64)?
            .add_source(environment)
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Retry policy used for every wait of the suite
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::new(
            Duration::from_secs(self.poll_initial_delay_seconds),
            Duration::from_secs(self.poll_interval_seconds),
            Duration::from_secs(self.poll_timeout_seconds),
        )?)
    }

    /// Returns true if built images are pushed to the registry.
    ///
    /// Without registry credentials images stay on the local Docker host,
    /// which is only sufficient for single node clusters.
    pub fn pushes_images(&self) -> bool {
        self.repo_username != REPO_DUMMY_VALUE
    }

    /// Name of a model image, prefixed with the repository if images are pushed
    pub fn mii_image_repository(&self) -> String {
        if self.pushes_images() {
            format!("{}{}", self.repo_name, self.mii_image_name)
        } else {
            self.mii_image_name.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<TestConfig, ConfigError> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        TestConfig::from_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(source)),
        )
    }

    #[test]
    fn defaults_give_the_standard_retry_policy() {
        let config = load(&[]).unwrap();

        assert_eq!(config.retry_policy().unwrap(), RetryPolicy::standard());
        assert!(!config.pushes_images());
        assert_eq!(config.mii_image_repository(), "mii-image");
        assert_eq!(
            config.mii_wdt_installer,
            std::path::PathBuf::from("download/weblogic-deploy.tar.gz")
        );
    }

    #[test]
    fn environment_overrides_the_defaults() {
        let config = load(&[
            ("OPERATOR_IT_NODE_PORT_HOST", "10.0.0.5"),
            ("OPERATOR_IT_REPO_USERNAME", "ci"),
            ("OPERATOR_IT_POLL_TIMEOUT_SECONDS", "60"),
        ])
        .unwrap();

        assert_eq!(config.node_port_host, "10.0.0.5");
        assert_eq!(config.retry_policy().unwrap().timeout(), Duration::from_secs(60));
        assert!(config.pushes_images());
        assert_eq!(
            config.mii_image_repository(),
            "phx.ocir.io/weblogick8s/mii-image"
        );
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = load(&[("OPERATOR_IT_POLL_INTERVAL_SECONDS", "0")]).unwrap();

        assert!(matches!(
            config.retry_policy(),
            Err(ConfigError::Policy(PolicyError::ZeroInterval))
        ));
    }
}
