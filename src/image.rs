//! Container images for model-in-image domains
//!
//! Images are built, pushed, and removed with the `docker` binary. The
//! build context is assembled in memory and streamed to `docker build`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Value};
use tracing::{debug, info};

/// File in a build context
#[derive(Clone, Debug)]
struct ContextEntry {
    path: String,
    contents: Vec<u8>,
    mode: u32,
}

/// Docker build context with a Dockerfile
#[derive(Clone, Debug)]
pub struct BuildContext {
    entries: Vec<ContextEntry>,
}

impl BuildContext {
    /// Creates a build context containing only the given Dockerfile.
    pub fn new(dockerfile: &str) -> BuildContext {
        let mut context = BuildContext {
            entries: Vec::new(),
        };
        context.add_file("Dockerfile", dockerfile.as_bytes().to_vec());
        context
    }

    /// Adds a file with the given contents.
    pub fn add_file(&mut self, path: &str, contents: Vec<u8>) {
        self.entries.push(ContextEntry {
            path: path.to_owned(),
            contents,
            mode: 0o644,
        });
    }

    /// Adds a local file under the given path.
    pub fn add_local_file(&mut self, path: &str, source: &Path) -> Result<()> {
        let contents = fs::read(source)
            .with_context(|| format!("File [{}] could not be read", source.display()))?;
        self.add_file(path, contents);
        Ok(())
    }

    /// Returns the paths of all files in the context.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.path.as_str()).collect()
    }

    /// Returns the build context as .tar.gz
    pub fn archive(&self) -> Result<Vec<u8>> {
        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = tar::Builder::new(enc);

        for entry in &self.entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(entry.contents.len() as u64);
            header.set_mode(entry.mode);
            header.set_cksum();

            tar.append_data(&mut header, &entry.path, entry.contents.as_slice())
                .with_context(|| format!("[{}] could not be archived", entry.path))?;
        }

        Ok(tar.into_inner()?.finish()?)
    }
}

/// Directory in the image into which WebLogic Deploy Tooling is unpacked
pub const WDT_HOME: &str = "/u01/wdt";

/// Image layering WebLogic Deploy Tooling, model files, and application
/// archives onto a base image
#[derive(Clone, Debug)]
pub struct ModelImage {
    pub name: String,
    pub tag: String,
    pub base_image: String,
    /// `weblogic-deploy.tar.gz` as released; it unpacks to `weblogic-deploy/`.
    pub wdt_installer: PathBuf,
    pub model_files: Vec<PathBuf>,
    pub archive_files: Vec<PathBuf>,
    /// Directory in the image which holds the models
    pub model_home: String,
}

impl ModelImage {
    /// Returns `<name>:<tag>`.
    pub fn image(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Dockerfile which unpacks the installer under [`WDT_HOME`] and copies
    /// the models to the model home.
    pub fn dockerfile(&self) -> Result<String> {
        Ok(format!(
            "FROM {base}\n\
             ADD wdt/{installer} {wdt_home}/\n\
             COPY --chown=oracle:root models/ {model_home}/\n",
            base = self.base_image,
            installer = file_name(&self.wdt_installer)?,
            wdt_home = WDT_HOME,
            model_home = self.model_home
        ))
    }

    /// Assembles the build context from the installer, model, and archive
    /// files.
    pub fn build_context(&self) -> Result<BuildContext> {
        let mut context = BuildContext::new(&self.dockerfile()?);
        context.add_local_file(
            &format!("wdt/{}", file_name(&self.wdt_installer)?),
            &self.wdt_installer,
        )?;
        for file in self.model_files.iter().chain(&self.archive_files) {
            context.add_local_file(&format!("models/{}", file_name(file)?), file)?;
        }
        Ok(context)
    }

    /// Builds the image.
    pub fn build(&self) -> Result<String> {
        let image = self.image();
        build(&image, &self.build_context()?)?;
        Ok(image)
    }

    /// Fails if the image does not exist locally.
    pub fn verify(&self) -> Result<()> {
        if !image_exists(&self.name, &self.tag)? {
            bail!("Image [{}] does not exist after the build", self.image());
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("[{}] is not a file", path.display()))
}

/// Returns a tag which is unique per build, `<yyyy-mm-dd>-<millis>`.
pub fn unique_tag() -> String {
    let now = Utc::now();
    format!("{}-{}", now.format("%Y-%m-%d"), now.timestamp_millis())
}

/// Builds an image from the given context.
pub fn build(image: &str, context: &BuildContext) -> Result<()> {
    let archive = context.archive()?;
    debug!(image, files = ?context.paths(), "Building image");

    let mut child = Command::new("docker")
        .args(&["build", "--tag", image, "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to run docker")?;
    child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin of docker build is not available"))?
        .write_all(&archive)
        .context("Build context could not be sent to docker")?;
    let output = child.wait_with_output()?;

    if !output.status.success() {
        bail!(
            "docker build of [{}] failed: {}",
            image,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    info!(image, "Built image");
    Ok(())
}

/// Logs in to the registry; the password is passed on standard input.
pub fn login(registry: &str, username: &str, password: &str) -> Result<()> {
    let mut child = Command::new("docker")
        .args(&["login", registry, "--username", username, "--password-stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to run docker")?;
    child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin of docker login is not available"))?
        .write_all(password.as_bytes())?;
    let output = child.wait_with_output()?;

    if !output.status.success() {
        bail!(
            "docker login to [{}] failed: {}",
            registry,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    info!(registry, username, "Logged in to registry");
    Ok(())
}

/// Pushes the image to its registry.
pub fn push(image: &str) -> Result<()> {
    docker(&["push", image])?;
    info!(image, "Pushed image");
    Ok(())
}

/// Returns true if an image with the given name and tag exists locally.
pub fn image_exists(name: &str, tag: &str) -> Result<bool> {
    let output = docker(&["images", name, "--format", "{{.Tag}}"])?;
    Ok(output.lines().any(|line| line.trim() == tag))
}

/// Removes the image.
pub fn delete(image: &str) -> Result<()> {
    docker(&["rmi", "--force", image])?;
    info!(image, "Removed image");
    Ok(())
}

fn docker(args: &[&str]) -> Result<String> {
    debug!("docker {}", args.join(" "));
    let output = Command::new("docker")
        .args(args)
        .output()
        .context("failed to run docker")?;

    if !output.status.success() {
        bail!(
            "docker {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Content of a `kubernetes.io/dockerconfigjson` secret for the registry
pub fn docker_config_json(username: &str, password: &str, email: &str, registry: &str) -> Value {
    json!({
        "auths": {
            registry: {
                "username": username,
                "password": password,
                "email": email
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn archive_contains_the_dockerfile_and_added_files() {
        let mut context = BuildContext::new("FROM scratch\n");
        context.add_file("models/model1-wls.yaml", b"domainInfo: {}\n".to_vec());

        let archive = context.archive().unwrap();

        let mut tar = tar::Archive::new(GzDecoder::new(archive.as_slice()));
        let mut files = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            files.push((path, contents));
        }
        assert_eq!(
            files,
            vec![
                (String::from("Dockerfile"), String::from("FROM scratch\n")),
                (
                    String::from("models/model1-wls.yaml"),
                    String::from("domainInfo: {}\n")
                ),
            ]
        );
    }

    #[test]
    fn unique_tag_starts_with_the_date() {
        let tag = unique_tag();
        let (date, millis) = tag.split_at(10);

        assert_eq!(date, Utc::now().format("%Y-%m-%d").to_string());
        assert!(millis[1..].parse::<i64>().is_ok());
    }

    fn model_image(wdt_installer: PathBuf, model_file: PathBuf) -> ModelImage {
        ModelImage {
            name: String::from("mii-image"),
            tag: String::from("1"),
            base_image: String::from("weblogic:12.2.1.4"),
            wdt_installer,
            model_files: vec![model_file],
            archive_files: Vec::new(),
            model_home: String::from("/u01/wdt/models"),
        }
    }

    #[test]
    fn missing_model_file_fails_the_context() {
        let image = model_image(
            PathBuf::from("/nonexistent/weblogic-deploy.tar.gz"),
            PathBuf::from("/nonexistent/model1-wls.yaml"),
        );

        assert_eq!(image.image(), "mii-image:1");
        assert!(image.build_context().is_err());
    }

    #[test]
    fn dockerfile_installs_deploy_tooling_before_the_models() {
        let image = model_image(
            PathBuf::from("download/weblogic-deploy.tar.gz"),
            PathBuf::from("model1-wls.yaml"),
        );

        assert_eq!(
            image.dockerfile().unwrap(),
            "FROM weblogic:12.2.1.4\n\
             ADD wdt/weblogic-deploy.tar.gz /u01/wdt/\n\
             COPY --chown=oracle:root models/ /u01/wdt/models/\n"
        );
    }

    #[test]
    fn context_contains_installer_and_models() {
        let dir = std::env::temp_dir().join(format!("mii-{}", unique_tag()));
        fs::create_dir_all(&dir).unwrap();
        let installer = dir.join("weblogic-deploy.tar.gz");
        let model = dir.join("model1-wls.yaml");
        fs::write(&installer, b"installer").unwrap();
        fs::write(&model, b"domainInfo: {}\n").unwrap();

        let context = model_image(installer, model).build_context().unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(
            context.paths(),
            vec![
                "Dockerfile",
                "wdt/weblogic-deploy.tar.gz",
                "models/model1-wls.yaml"
            ]
        );
    }

    #[test]
    fn docker_config_names_the_registry() {
        let config = docker_config_json("user", "secret", "user@example.com", "phx.ocir.io");

        assert_eq!(config["auths"]["phx.ocir.io"]["username"], json!("user"));
    }
}
