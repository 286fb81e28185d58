//! Engine that drives the `docker` command-line client.

use super::{ContainerEngine, EngineError, EngineResult, Image};
use crate::key::ImageRef;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Prefix of the throwaway containers stage commands run in.
pub const BUILD_CONTAINER_PREFIX: &str = "dapp.build.";

/// Client stderr fragments meaning "no image under this reference".
const MISSING_IMAGE_MARKERS: [&str; 2] = ["no such image", "image not known"];

/// Runtime settings of the parent image that a stage commit must keep.
///
/// The build container runs with an empty entrypoint and the stage script
/// as its command; without restoring these, every stage image would re-run
/// that script on start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InheritedConfig {
    /// Parent `CMD`
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
    /// Parent `ENTRYPOINT`
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
}

impl InheritedConfig {
    /// Parse the output of `image inspect --format={{json .Config}}`.
    ///
    /// # Errors
    ///
    /// `EngineError::CommandFailed` if the text is not an image config.
    pub fn parse(json: &str) -> EngineResult<Self> {
        let config: Option<Self> = serde_json::from_str(json)
            .map_err(|e| EngineError::CommandFailed(format!("unreadable image config: {e}")))?;
        Ok(config.unwrap_or_default())
    }

    /// `--change` options restoring `CMD` and `ENTRYPOINT`. An unset value
    /// is committed as `[]` so the build container's own settings never
    /// leak into the image.
    #[must_use]
    pub fn commit_changes(&self) -> Vec<String> {
        let exec_form = |value: &Option<Vec<String>>| {
            serde_json::Value::from(value.clone().unwrap_or_default()).to_string()
        };
        vec![
            format!("--change=CMD {}", exec_form(&self.cmd)),
            format!("--change=ENTRYPOINT {}", exec_form(&self.entrypoint)),
        ]
    }
}

/// Docker CLI engine.
///
/// A stage build inspects the parent image, runs the joined commands on top
/// of it with `docker run`, and commits the stopped container with the
/// parent's `CMD`/`ENTRYPOINT` restored. The container is removed whether or
/// not the build succeeded. Parent images missing locally are pulled first.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    binary: String,
    shell: String,
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerEngine {
    /// Use `docker` from `PATH` and `/bin/sh` inside containers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            shell: "/bin/sh".to_string(),
        }
    }

    /// Use a different client binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Use a different shell inside build containers.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Arguments of the `docker run` invocation for a stage.
    #[must_use]
    pub fn run_args(
        &self,
        container: &str,
        from: &ImageRef,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut args = vec!["run".to_string(), format!("--name={container}")];
        args.extend(env.iter().map(|(k, v)| format!("--env={k}={v}")));
        args.push("--entrypoint=".to_string());
        args.push(from.as_str().to_string());
        args.push(self.shell.clone());
        args.push("-ec".to_string());
        args.push(join_commands(commands));
        args
    }

    /// Arguments of the `docker commit` invocation for a stage.
    #[must_use]
    pub fn commit_args(&self, container: &str, inherited: &InheritedConfig) -> Vec<String> {
        let mut args = vec!["commit".to_string()];
        args.extend(inherited.commit_changes());
        args.push(container.to_string());
        args
    }

    async fn docker(&self, args: &[String]) -> EngineResult<Output> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Map a finished client call to its trimmed stdout or an engine error.
    fn check(&self, args: &[String], output: &Output) -> EngineResult<String> {
        let command = args.first().map_or("", String::as_str);
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()),
            Some(code) => Err(EngineError::CommandFailed(format!(
                "{} {} exited with {}: {}",
                self.binary,
                command,
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            // killed by a signal
            None => Err(EngineError::Cancelled(format!(
                "{} {} terminated by signal",
                self.binary, command
            ))),
        }
    }

    async fn checked(&self, args: &[String]) -> EngineResult<String> {
        let output = self.docker(args).await?;
        self.check(args, &output)
    }

    /// `image inspect` with a format; `None` when the image does not exist.
    async fn inspect(&self, reference: &ImageRef, format: &str) -> EngineResult<Option<String>> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            format!("--format={format}"),
            reference.as_str().to_string(),
        ];
        let output = self.docker(&args).await?;

        let failed = output.status.code().is_some_and(|code| code != 0);
        if failed && is_missing_image(&output.stderr) {
            return Ok(None);
        }
        self.check(&args, &output).map(Some)
    }

    async fn inherited_config(&self, from: &ImageRef) -> EngineResult<InheritedConfig> {
        const FORMAT: &str = "{{json .Config}}";

        let json = match self.inspect(from, FORMAT).await? {
            Some(json) => json,
            None => {
                info!("Pulling {}", from);
                let _ = self
                    .checked(&["pull".to_string(), from.as_str().to_string()])
                    .await?;
                self.inspect(from, FORMAT)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(from.to_string()))?
            }
        };
        InheritedConfig::parse(&json)
    }

    async fn remove_container(&self, container: &str) {
        let args = vec!["rm".to_string(), "--force".to_string(), container.to_string()];
        if let Err(e) = self.checked(&args).await {
            warn!("Failed to remove build container {}: {}", container, e);
        }
    }
}

fn is_missing_image(stderr: &[u8]) -> bool {
    let stderr = String::from_utf8_lossy(stderr).to_lowercase();
    MISSING_IMAGE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

/// Join stage commands into one `sh -ec` script; `true` when empty.
#[must_use]
pub fn join_commands(commands: &[String]) -> String {
    if commands.is_empty() {
        "true".to_string()
    } else {
        commands.join(" && ")
    }
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_exists(&self, reference: &ImageRef) -> EngineResult<bool> {
        Ok(self.inspect(reference, "{{.Id}}").await?.is_some())
    }

    async fn build(
        &self,
        from: &ImageRef,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> EngineResult<Image> {
        let inherited = self.inherited_config(from).await?;
        let container = format!("{BUILD_CONTAINER_PREFIX}{}", uuid::Uuid::new_v4().simple());

        let run = self.checked(&self.run_args(&container, from, commands, env)).await;
        let result = match run {
            Ok(_) => self.checked(&self.commit_args(&container, &inherited)).await,
            Err(e) => Err(e),
        };

        self.remove_container(&container).await;

        let id = result?;
        if id.is_empty() {
            return Err(EngineError::CommandFailed(format!(
                "{} commit returned no image id",
                self.binary
            )));
        }
        Ok(Image::new(id))
    }

    async fn tag(&self, image: &Image, reference: &ImageRef) -> EngineResult<()> {
        let args = [
            "tag".to_string(),
            image.id().to_string(),
            reference.as_str().to_string(),
        ];
        let _ = self.checked(&args).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.binary
    }
}
