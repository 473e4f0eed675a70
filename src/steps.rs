//! Provisioning steps shared by the scenarios
//!
//! Each step creates resources, records them in the [`ScenarioContext`],
//! and waits with the suite's [`Poller`] until the cluster reflects them.

use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;
use tracing::info;

use crate::client::{from_value, TestKubeClient};
use crate::conditions;
use crate::config::TestConfig;
use crate::deploy::RestDeployment;
use crate::domain::DomainTemplate;
use crate::helm::HelmParams;
use crate::image::{self, ModelImage};
use crate::ingress::{self, traefik, voyager, ClusterPorts};
use crate::operator::{self, OperatorParams, OPERATOR_RELEASE_NAME};
use crate::poll::Poller;
use crate::scenario::{Provisioned, ScenarioContext};
use crate::traffic::{BackendExtractor, DistributionVerifier, IngressRequest};

/// Name of the secret with the admin credentials of a domain
pub const ADMIN_SECRET_NAME: &str = "weblogic-credentials";

/// Name of the secret which encrypts the runtime model of a domain
pub const ENCRYPTION_SECRET_NAME: &str = "encryptionsecret";

/// Response rule of the clusterview application
///
/// The answering server reports itself as `ServerName:<name>` and prints
/// `Success:True` only if it sees every other member of its cluster.
pub fn cluster_view_extractor() -> BackendExtractor {
    BackendExtractor::anchored("ServerName:").requiring("Success:True")
}

pub struct Steps {
    pub client: TestKubeClient,
    pub config: TestConfig,
    pub poller: Poller,
}

impl Steps {
    /// Connects to the cluster and loads the settings.
    pub fn new() -> Result<Steps> {
        let config = TestConfig::load()?;
        let poller = Poller::new(config.retry_policy()?);
        let client = TestKubeClient::new()?;
        Ok(Steps {
            client,
            config,
            poller,
        })
    }

    /// Creates an opaque secret with a user name and a password.
    pub fn create_secret_with_username_password(
        &self,
        context: &mut ScenarioContext,
        name: &str,
        namespace: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let secret: Secret = from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": name, "namespace": namespace },
            "stringData": { "username": username, "password": password }
        }))?;
        self.create_secret(context, namespace, &secret)
    }

    /// Creates the secret to pull images from the configured registry.
    pub fn create_docker_registry_secret(
        &self,
        context: &mut ScenarioContext,
        namespace: &str,
    ) -> Result<()> {
        let config = &self.config;
        let docker_config = image::docker_config_json(
            &config.repo_username,
            &config.repo_password,
            &config.repo_email,
            &config.repo_registry,
        );
        let secret: Secret = from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "kubernetes.io/dockerconfigjson",
            "metadata": { "name": config.repo_secret_name, "namespace": namespace },
            "stringData": { ".dockerconfigjson": docker_config.to_string() }
        }))?;
        self.create_secret(context, namespace, &secret)
    }

    /// Creates the pull secret, the admin credentials, and the encryption
    /// secret which every domain in the namespace refers to.
    pub fn create_domain_secrets(
        &self,
        context: &mut ScenarioContext,
        namespace: &str,
    ) -> Result<()> {
        self.create_docker_registry_secret(context, namespace)?;
        self.create_secret_with_username_password(
            context,
            ADMIN_SECRET_NAME,
            namespace,
            &self.config.admin_username,
            &self.config.admin_password,
        )?;
        self.create_secret_with_username_password(
            context,
            ENCRYPTION_SECRET_NAME,
            namespace,
            "weblogicenc",
            "weblogicenc",
        )
    }

    /// Template of a domain with one cluster, `cluster-1`, which uses the
    /// secrets of [`Steps::create_domain_secrets`].
    pub fn domain_template(
        &self,
        domain_uid: &str,
        namespace: &str,
        image: &str,
        replicas: i32,
    ) -> DomainTemplate {
        DomainTemplate {
            domain_uid: domain_uid.to_owned(),
            namespace: namespace.to_owned(),
            image: image.to_owned(),
            pull_secret: self.config.repo_secret_name.to_owned(),
            credentials_secret: String::from(ADMIN_SECRET_NAME),
            encryption_secret: String::from(ENCRYPTION_SECRET_NAME),
            cluster_name: String::from("cluster-1"),
            replicas,
            expose_admin_node_port: false,
            introspector_deadline_seconds: None,
        }
    }

    fn create_secret(
        &self,
        context: &mut ScenarioContext,
        namespace: &str,
        secret: &Secret,
    ) -> Result<()> {
        let created = self.client.create(namespace, secret)?;
        context.record(Provisioned::Secret {
            namespace: namespace.to_owned(),
            name: created.metadata.name.unwrap_or_default(),
        });
        Ok(())
    }

    /// Installs the operator which manages `domain_namespaces` and waits
    /// until it is running.
    pub fn install_and_verify_operator(
        &self,
        context: &mut ScenarioContext,
        namespace: &str,
        domain_namespaces: &[String],
    ) -> Result<OperatorParams> {
        let service_account_name = format!("{}-sa", namespace);
        let service_account: ServiceAccount = from_value(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": { "name": service_account_name, "namespace": namespace }
        }))?;
        self.client.create(namespace, &service_account)?;
        context.record(Provisioned::ServiceAccount {
            namespace: namespace.to_owned(),
            name: service_account_name.to_owned(),
        });

        self.create_docker_registry_secret(context, namespace)?;

        let params = OperatorParams {
            helm_params: HelmParams {
                chart_dir: Some(self.config.operator_chart_dir.to_owned()),
                ..HelmParams::new(OPERATOR_RELEASE_NAME, namespace)
            },
            image: self.config.operator_image.to_owned(),
            image_pull_secrets: vec![self.config.repo_secret_name.to_owned()],
            domain_namespaces: domain_namespaces.to_vec(),
            service_account: service_account_name,
        };
        operator::install(&params)?;
        context.record(Provisioned::HelmRelease(params.helm_params.to_owned()));

        self.poller.until(
            &format!(
                "operator release {} to be deployed in namespace {}",
                OPERATOR_RELEASE_NAME, namespace
            ),
            conditions::release_deployed(OPERATOR_RELEASE_NAME, namespace),
        )?;
        self.poller.until(
            &format!("operator to be running in namespace {}", namespace),
            conditions::operator_is_running(&self.client, namespace),
        )?;
        Ok(params)
    }

    /// Installs Traefik watching `namespaces` and waits until it is ready.
    pub fn install_and_verify_traefik(
        &self,
        context: &mut ScenarioContext,
        namespace: &str,
        namespaces: &[String],
        node_ports: Option<(u16, u16)>,
    ) -> Result<traefik::TraefikParams> {
        let params = traefik::TraefikParams {
            helm_params: HelmParams {
                repo_url: Some(self.config.traefik_repo_url.to_owned()),
                repo_name: Some(String::from("stable")),
                chart_name: Some(String::from("traefik")),
                chart_values_file: Some(self.config.traefik_values_file.to_owned()),
                ..HelmParams::new("traefik-operator", namespace)
            },
            namespaces: namespaces.to_vec(),
            node_ports,
        };
        traefik::install(&params)?;
        context.record(Provisioned::HelmRelease(params.helm_params.to_owned()));

        self.poller.until(
            &format!("Traefik to be ready in namespace {}", namespace),
            conditions::traefik_is_ready(&self.client, namespace),
        )?;
        Ok(params)
    }

    /// Installs Voyager and waits until it is ready.
    pub fn install_and_verify_voyager(
        &self,
        context: &mut ScenarioContext,
        namespace: &str,
    ) -> Result<voyager::VoyagerParams> {
        let params = voyager::VoyagerParams::baremetal(HelmParams {
            repo_url: Some(self.config.voyager_repo_url.to_owned()),
            repo_name: Some(String::from("appscode")),
            chart_name: Some(String::from("voyager")),
            ..HelmParams::new("voyager-operator", namespace)
        });
        voyager::install(&params)?;
        context.record(Provisioned::HelmRelease(params.helm_params.to_owned()));

        self.poller.until(
            &format!("Voyager to be ready in namespace {}", namespace),
            conditions::voyager_is_ready(&self.client, namespace),
        )?;
        Ok(params)
    }

    /// Builds the model-in-image image, and pushes it if a registry is
    /// configured.
    pub fn create_image_and_verify(&self, context: &mut ScenarioContext) -> Result<String> {
        let config = &self.config;
        let model_image = ModelImage {
            name: config.mii_image_repository(),
            tag: image::unique_tag(),
            base_image: config.mii_base_image.to_owned(),
            wdt_installer: config.mii_wdt_installer.to_owned(),
            model_files: vec![config.mii_model_file.to_owned()],
            archive_files: vec![config.mii_app_archive.to_owned()],
            model_home: config.mii_model_home.to_owned(),
        };
        let image_name = model_image.build()?;
        context.record(Provisioned::Image(image_name.to_owned()));
        model_image.verify()?;

        if config.pushes_images() {
            image::login(
                &config.repo_registry,
                &config.repo_username,
                &config.repo_password,
            )?;
            image::push(&image_name)?;
        }
        Ok(image_name)
    }

    /// Creates the domain resource and waits until it exists.
    pub fn create_domain_and_verify(
        &self,
        context: &mut ScenarioContext,
        template: &DomainTemplate,
    ) -> Result<()> {
        let domain = template.build();
        self.client.create(&template.namespace, &domain)?;
        context.record(Provisioned::Domain {
            namespace: template.namespace.to_owned(),
            domain_uid: template.domain_uid.to_owned(),
        });

        self.poller.until(
            &format!(
                "domain {} to be created in namespace {}",
                template.domain_uid, template.namespace
            ),
            conditions::domain_exists(&self.client, &template.domain_uid, &template.namespace),
        )?;
        Ok(())
    }

    /// Waits until the pods of all servers are ready and their services exist.
    pub fn check_domain_servers(&self, template: &DomainTemplate) -> Result<()> {
        let servers: Vec<String> = std::iter::once(template.admin_server_name())
            .chain(template.managed_server_names())
            .collect();
        for server in &servers {
            self.check_pod_created(server, &template.domain_uid, &template.namespace)?;
            self.check_pod_ready(server, &template.domain_uid, &template.namespace)?;
        }
        for server in &servers {
            self.check_service_created(server, &template.namespace)?;
        }
        Ok(())
    }

    pub fn check_pod_created(
        &self,
        pod_name: &str,
        domain_uid: &str,
        namespace: &str,
    ) -> Result<()> {
        self.poller.until(
            &format!("pod {} to be created in namespace {}", pod_name, namespace),
            conditions::pod_exists(&self.client, pod_name, domain_uid, namespace),
        )?;
        Ok(())
    }

    pub fn check_pod_ready(&self, pod_name: &str, domain_uid: &str, namespace: &str) -> Result<()> {
        self.poller.until(
            &format!("pod {} to be ready in namespace {}", pod_name, namespace),
            conditions::pod_ready(&self.client, pod_name, domain_uid, namespace),
        )?;
        Ok(())
    }

    pub fn check_service_created(&self, service_name: &str, namespace: &str) -> Result<()> {
        self.poller.until(
            &format!(
                "service {} to be created in namespace {}",
                service_name, namespace
            ),
            conditions::service_exists(&self.client, service_name, namespace),
        )?;
        Ok(())
    }

    /// Creates an ingress for the domain's clusters and checks that it is
    /// listed in the namespace.
    pub fn create_traefik_ingress_for_domain_and_verify(
        &self,
        context: &mut ScenarioContext,
        domain_uid: &str,
        namespace: &str,
        cluster_ports: &ClusterPorts,
    ) -> Result<Ingress> {
        let created =
            traefik::create_domain_ingress(&self.client, domain_uid, namespace, cluster_ports)?;
        let name = created.metadata.name.to_owned().unwrap_or_default();
        context.record(Provisioned::Ingress {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        });

        let ingresses = ingress::list_ingresses(&self.client, namespace)?;
        if !ingresses.contains(&name) {
            bail!(
                "Ingress [{}] is not listed in namespace [{}]",
                name,
                namespace
            );
        }
        info!(namespace, ingress = %name, "Ingress is created");
        Ok(created)
    }

    /// Installs the ingress-per-domain chart for the domain and checks that
    /// its ingress is listed.
    pub fn create_traefik_sample_ingress_and_verify(
        &self,
        context: &mut ScenarioContext,
        domain_uid: &str,
        namespace: &str,
        hostname: &str,
    ) -> Result<HelmParams> {
        let params = HelmParams {
            chart_dir: Some(self.config.ingress_sample_chart_dir.to_owned()),
            ..HelmParams::new(&format!("{}-ingress", domain_uid), namespace)
        };
        traefik::create_ingress(&params, domain_uid, hostname)?;
        context.record(Provisioned::HelmRelease(params.to_owned()));

        let name = traefik::sample_ingress_name(domain_uid);
        if !ingress::list_ingresses(&self.client, namespace)?.contains(&name) {
            bail!(
                "Ingress [{}] is not listed in namespace [{}]",
                name,
                namespace
            );
        }
        Ok(params)
    }

    /// Creates a Voyager ingress for the domain's clusters and returns the
    /// hosts of its rules.
    pub fn create_voyager_ingress_and_verify(
        &self,
        context: &mut ScenarioContext,
        ingress_name: &str,
        domain_uid: &str,
        namespace: &str,
        cluster_ports: &ClusterPorts,
    ) -> Result<Vec<String>> {
        let hosts = voyager::create_ingress(
            &self.client,
            ingress_name,
            namespace,
            domain_uid,
            cluster_ports,
        )?;
        context.record(Provisioned::Ingress {
            namespace: namespace.to_owned(),
            name: ingress_name.to_owned(),
        });

        if !ingress::list_ingresses(&self.client, namespace)?.contains(&ingress_name.to_owned()) {
            bail!(
                "Ingress [{}] is not listed in namespace [{}]",
                ingress_name,
                namespace
            );
        }
        Ok(hosts)
    }

    /// Waits for the service which Voyager creates for the ingress and
    /// returns its node port.
    pub fn voyager_node_port(&self, ingress_name: &str, namespace: &str) -> Result<u16> {
        let service_name = voyager::service_name(ingress_name);
        self.check_service_created(&service_name, namespace)?;
        let service = self
            .client
            .find::<Service>(namespace, &service_name)?
            .ok_or_else(|| anyhow!("Service [{}] disappeared", service_name))?;
        let port = service
            .spec
            .and_then(|spec| spec.ports)
            .and_then(|ports| ports.into_iter().find_map(|port| port.node_port))
            .ok_or_else(|| anyhow!("Service [{}] has no node port", service_name))?;
        u16::try_from(port).map_err(|_| anyhow!("Node port {} is out of range", port))
    }

    /// Returns the node port of the admin server's default channel.
    pub fn admin_node_port(&self, template: &DomainTemplate) -> Result<u16> {
        let service = format!("{}-external", template.admin_server_name());
        let port = self
            .client
            .service_node_port(&template.namespace, &service, "default")?;
        u16::try_from(port).map_err(|_| anyhow!("Node port {} is out of range", port))
    }

    /// Deploys the application archive to the domain's cluster.
    pub fn deploy_application(
        &self,
        template: &DomainTemplate,
        application_name: &str,
        archive: &Path,
    ) -> Result<http::StatusCode> {
        let deployment = RestDeployment {
            host: self.config.node_port_host.to_owned(),
            node_port: self.admin_node_port(template)?,
            username: self.config.admin_username.to_owned(),
            password: self.config.admin_password.to_owned(),
            application_name: application_name.to_owned(),
            target_cluster: template.cluster_name.to_owned(),
            archive: archive.to_owned(),
        };
        deployment
            .deploy()
            .with_context(|| format!("Application [{}] was not deployed", application_name))
    }

    /// Sends requests for `path` through the ingress node port with the given
    /// host header until every server of the cluster answered.
    pub fn verify_cluster_members_answer(
        &self,
        template: &DomainTemplate,
        host: &str,
        node_port: u16,
        path: &str,
        extractor: BackendExtractor,
        max_iterations: u32,
    ) -> Result<u32> {
        let url = IngressRequest::node_port_uri(&self.config.node_port_host, node_port, path)?;
        let mut request = IngressRequest::new(url)?.host(host);
        let expected: BTreeSet<String> = template.cluster_member_names().into_iter().collect();

        let iterations = DistributionVerifier::new(max_iterations)
            .with_extractor(extractor)
            .verify(&mut request, &expected)
            .into_result(&format!("load balancing of {} through {}", template.domain_uid, host))?;
        Ok(iterations)
    }
}
