//! Deployment of applications through the REST management interface of
//! the admin server

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use http::StatusCode;
use reqwest::blocking::{multipart::Form, Client};
use serde_json::{json, Value};
use tracing::info;

/// Path of the deployment collection of the edit tree
pub const APP_DEPLOYMENTS_PATH: &str = "/management/weblogic/latest/edit/appDeployments";

/// Application archive uploaded to the admin server
#[derive(Clone, Debug)]
pub struct RestDeployment {
    /// Host on which the admin node port is reachable
    pub host: String,
    pub node_port: u16,
    pub username: String,
    pub password: String,
    pub application_name: String,
    /// Name of the cluster which runs the application
    pub target_cluster: String,
    pub archive: PathBuf,
}

impl RestDeployment {
    pub fn url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.host, self.node_port, APP_DEPLOYMENTS_PATH
        )
    }

    /// Deployment model sent in the `model` part
    pub fn model(&self) -> Value {
        json!({
            "name": self.application_name,
            "targets": [
                { "identity": ["clusters", self.target_cluster] }
            ]
        })
    }

    /// Uploads the archive and returns the status code of the response.
    ///
    /// The admin server accepts the deployment with `202 Accepted`.
    pub fn deploy(&self) -> Result<StatusCode> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .no_proxy()
            .build()
            .context("HTTP client could not be created")?;
        let form = Form::new()
            .text("model", self.model().to_string())
            .file("sourcePath", &self.archive)
            .with_context(|| format!("[{}] could not be read", self.archive.display()))?;

        let response = client
            .post(self.url())
            .basic_auth(&self.username, Some(&self.password))
            .header("X-Requested-By", "operator-integration-tests")
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .with_context(|| {
                format!(
                    "Deployment of [{}] to [{}] failed",
                    self.application_name,
                    self.url()
                )
            })?;

        let status = response.status();
        info!(
            application = %self.application_name,
            cluster = %self.target_cluster,
            status = status.as_u16(),
            "Deployed application"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_targets_the_cluster() {
        let deployment = RestDeployment {
            host: String::from("localhost"),
            node_port: 30701,
            username: String::from("weblogic"),
            password: String::from("welcome1"),
            application_name: String::from("clusterview"),
            target_cluster: String::from("cluster-1"),
            archive: PathBuf::from("clusterview.war"),
        };

        assert_eq!(
            deployment.url(),
            "http://localhost:30701/management/weblogic/latest/edit/appDeployments"
        );
        assert_eq!(
            deployment.model(),
            json!({
                "name": "clusterview",
                "targets": [{ "identity": ["clusters", "cluster-1"] }]
            })
        );
    }
}
