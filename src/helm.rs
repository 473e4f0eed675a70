//! Helm releases
//!
//! Releases are managed by running the `helm` binary. Chart values are
//! passed as `--set` arguments.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

/// Chart values to override, keyed by their path in the values file
pub type HelmValues = BTreeMap<String, Value>;

/// Parameters of a Helm release
///
/// The chart is either taken from `chart_dir` or, if `repo_url` is set,
/// from the chart repository `repo_name`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HelmParams {
    pub release_name: String,
    pub namespace: String,
    pub repo_url: Option<String>,
    pub repo_name: Option<String>,
    pub chart_name: Option<String>,
    pub chart_dir: Option<PathBuf>,
    pub chart_values_file: Option<PathBuf>,
    pub chart_version: Option<String>,
}

impl HelmParams {
    pub fn new(release_name: &str, namespace: &str) -> HelmParams {
        HelmParams {
            release_name: release_name.to_owned(),
            namespace: namespace.to_owned(),
            ..HelmParams::default()
        }
    }

    /// Returns the chart reference passed to `helm install`.
    pub fn chart_reference(&self) -> Result<String> {
        if let Some(chart_dir) = &self.chart_dir {
            return Ok(chart_dir.to_string_lossy().into_owned());
        }
        match (&self.repo_name, &self.chart_name) {
            (Some(repo_name), Some(chart_name)) => Ok(format!("{}/{}", repo_name, chart_name)),
            _ => Err(anyhow!(
                "Release [{}] has neither a chart directory nor a repository chart",
                self.release_name
            )),
        }
    }
}

/// A release as listed by `helm list --output json`
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    pub revision: String,
    pub status: String,
    pub chart: String,
}

/// Installs a release.
pub fn install(params: &HelmParams, values: &HelmValues) -> Result<()> {
    if let (Some(repo_name), Some(repo_url)) = (&params.repo_name, &params.repo_url) {
        add_repo(repo_name, repo_url)?;
    }
    run(&install_args("install", params, values)?)?;
    info!(
        release = %params.release_name,
        namespace = %params.namespace,
        "Installed Helm release"
    );
    Ok(())
}

/// Upgrades a release with the given values, keeping the others.
pub fn upgrade(params: &HelmParams, values: &HelmValues) -> Result<()> {
    run(&upgrade_args(params, values)?)?;
    info!(
        release = %params.release_name,
        namespace = %params.namespace,
        "Upgraded Helm release"
    );
    Ok(())
}

/// Uninstalls a release.
pub fn uninstall(params: &HelmParams) -> Result<()> {
    run(&[
        String::from("uninstall"),
        params.release_name.to_owned(),
        String::from("--namespace"),
        params.namespace.to_owned(),
    ])?;
    info!(
        release = %params.release_name,
        namespace = %params.namespace,
        "Uninstalled Helm release"
    );
    Ok(())
}

/// Lists all releases in the namespace.
pub fn list_releases(namespace: &str) -> Result<Vec<HelmRelease>> {
    let output = run(&[
        String::from("list"),
        String::from("--all"),
        String::from("--namespace"),
        namespace.to_owned(),
        String::from("--output"),
        String::from("json"),
    ])?;
    parse_releases(&output)
}

/// Returns true if the release exists and its status is `deployed`.
pub fn is_release_deployed(release_name: &str, namespace: &str) -> Result<bool> {
    Ok(list_releases(namespace)?
        .iter()
        .any(|release| release.name == release_name && release.status == "deployed"))
}

fn add_repo(repo_name: &str, repo_url: &str) -> Result<()> {
    run(&[
        String::from("repo"),
        String::from("add"),
        repo_name.to_owned(),
        repo_url.to_owned(),
        String::from("--force-update"),
    ])?;
    run(&[String::from("repo"), String::from("update")])?;
    Ok(())
}

fn run(args: &[String]) -> Result<String> {
    debug!("helm {}", args.join(" "));
    let output = Command::new("helm")
        .args(args)
        .output()
        .context("failed to run helm")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("helm {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_releases(output: &str) -> Result<Vec<HelmRelease>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(output).context("Output of helm list is not a list of releases")
}

/// Builds the arguments of `helm install` or `helm upgrade`.
pub fn install_args(
    command: &str,
    params: &HelmParams,
    values: &HelmValues,
) -> Result<Vec<String>> {
    let mut args = vec![
        command.to_owned(),
        params.release_name.to_owned(),
        params.chart_reference()?,
        String::from("--namespace"),
        params.namespace.to_owned(),
    ];
    if let Some(version) = &params.chart_version {
        args.push(String::from("--version"));
        args.push(version.to_owned());
    }
    if let Some(values_file) = &params.chart_values_file {
        args.push(String::from("--values"));
        args.push(values_file.to_string_lossy().into_owned());
    }
    for (key, value) in values {
        for assignment in set_assignments(key, value) {
            args.push(String::from("--set"));
            args.push(assignment);
        }
    }
    Ok(args)
}

/// Builds the arguments of `helm upgrade` which keeps the values of the
/// installed release that are not given.
pub fn upgrade_args(params: &HelmParams, values: &HelmValues) -> Result<Vec<String>> {
    let mut args = install_args("upgrade", params, values)?;
    args.push(String::from("--reuse-values"));
    Ok(args)
}

/// Flattens a chart value into `--set` assignments.
///
/// Objects become dotted paths, lists of scalars become `{a,b}`, and lists
/// of objects become indexed paths like `imagePullSecrets[0].name`.
pub fn set_assignments(key: &str, value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map
            .iter()
            .flat_map(|(child, value)| set_assignments(&format!("{}.{}", key, child), value))
            .collect(),
        Value::Array(items) if items.iter().any(|item| item.is_object()) => items
            .iter()
            .enumerate()
            .flat_map(|(index, item)| set_assignments(&format!("{}[{}]", key, index), item))
            .collect(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(scalar).collect();
            vec![format!("{}={{{}}}", key, items.join(","))]
        }
        scalar_value => vec![format!("{}={}", key, scalar(scalar_value))],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(string) => string.to_owned(),
        Value::Null => String::from("null"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_values_are_flattened_into_set_assignments() {
        assert_eq!(
            set_assignments("service", &json!({ "nodePorts": { "http": 30380, "https": 31443 } })),
            vec!["service.nodePorts.http=30380", "service.nodePorts.https=31443"]
        );
        assert_eq!(
            set_assignments("kubernetes.namespaces", &json!(["ns-1", "ns-2"])),
            vec!["kubernetes.namespaces={ns-1,ns-2}"]
        );
        assert_eq!(
            set_assignments("imagePullSecrets", &json!([{ "name": "docker-store" }])),
            vec!["imagePullSecrets[0].name=docker-store"]
        );
        assert_eq!(
            set_assignments("elkIntegrationEnabled", &json!(false)),
            vec!["elkIntegrationEnabled=false"]
        );
    }

    #[test]
    fn install_args_use_the_repository_chart() {
        let params = HelmParams {
            repo_url: Some(String::from("https://charts.example.com")),
            repo_name: Some(String::from("stable")),
            chart_name: Some(String::from("traefik")),
            chart_values_file: Some(PathBuf::from("values.yaml")),
            ..HelmParams::new("traefik-operator", "ns-traefik")
        };
        let mut values = HelmValues::new();
        values.insert(String::from("kubernetes.namespaces"), json!(["ns-traefik"]));

        assert_eq!(
            install_args("install", &params, &values).unwrap(),
            vec![
                "install",
                "traefik-operator",
                "stable/traefik",
                "--namespace",
                "ns-traefik",
                "--values",
                "values.yaml",
                "--set",
                "kubernetes.namespaces={ns-traefik}",
            ]
        );
    }

    #[test]
    fn upgrade_reuses_the_installed_values() {
        let params = HelmParams {
            chart_dir: Some(PathBuf::from("kubernetes/charts/weblogic-operator")),
            ..HelmParams::new("weblogic-operator", "ns-operator")
        };
        let mut values = HelmValues::new();
        values.insert(
            String::from("domainNamespaces"),
            json!(["ns-domain1", "ns-domain2"]),
        );

        assert_eq!(
            upgrade_args(&params, &values).unwrap(),
            vec![
                "upgrade",
                "weblogic-operator",
                "kubernetes/charts/weblogic-operator",
                "--namespace",
                "ns-operator",
                "--set",
                "domainNamespaces={ns-domain1,ns-domain2}",
                "--reuse-values",
            ]
        );
    }

    #[test]
    fn chart_directory_takes_precedence_over_the_repository() {
        let params = HelmParams {
            chart_dir: Some(PathBuf::from("kubernetes/charts/weblogic-operator")),
            repo_name: Some(String::from("stable")),
            chart_name: Some(String::from("traefik")),
            ..HelmParams::new("weblogic-operator", "ns-op")
        };

        assert_eq!(
            params.chart_reference().unwrap(),
            "kubernetes/charts/weblogic-operator"
        );
    }

    #[test]
    fn release_without_chart_is_rejected() {
        assert!(HelmParams::new("orphan", "ns").chart_reference().is_err());
    }

    #[test]
    fn releases_are_parsed_from_helm_list_output() {
        let output = r#"[{"name":"traefik-operator","namespace":"ns-traefik","revision":"1",
            "updated":"2020-06-01 10:00:00","status":"deployed","chart":"traefik-1.87.1",
            "app_version":"1.7.24"}]"#;

        let releases = parse_releases(output).unwrap();

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].status, "deployed");
        assert!(parse_releases("\n").unwrap().is_empty());
    }
}
