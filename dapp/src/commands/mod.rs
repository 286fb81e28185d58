//! Dapp command-line interface

use clap::{Parser, Subcommand};
use convenient_git::GitSource;
use convenient_stages::{
    BuildConfig, BuildContext, DockerEngine, Pipeline, ShellStrategy, StageGraph,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub mod build;
pub mod plan;
pub mod stages;

/// Boxed error returned by every subcommand.
pub type CommandResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dapp - incremental container image builds
#[derive(Parser, Debug)]
#[command(name = "dapp")]
#[command(about = "Build container images through a chain of cached stages")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging for dapp and its libraries
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Build the image, reusing every stage that is still cached
    Build {
        /// Build configuration
        #[arg(short, long, default_value = "dapp.yml")]
        config: PathBuf,

        /// Source revision for the sources stages (overrides the config)
        #[arg(long)]
        revision: Option<String>,

        /// Docker client binary
        #[arg(long, default_value = "docker")]
        docker: String,

        /// Print the build outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which stages are clean and which would be rebuilt
    Plan {
        /// Build configuration
        #[arg(short, long, default_value = "dapp.yml")]
        config: PathBuf,

        /// Source revision for the sources stages (overrides the config)
        #[arg(long)]
        revision: Option<String>,

        /// Docker client binary
        #[arg(long, default_value = "docker")]
        docker: String,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the stage chain
    Stages,
}

/// Load the config and resolve the source revision.
///
/// Revision precedence: `revision` argument, then `source.revision` from the
/// config, then the commit `source.ref` (default `HEAD`) points at in
/// `source.path`.
pub fn load_context(
    config_path: &Path,
    revision: Option<String>,
) -> Result<BuildContext, Box<dyn std::error::Error + Send + Sync>> {
    let config = BuildConfig::load(config_path)?;

    let revision = match revision {
        Some(rev) => Some(rev),
        None if config.source.revision.is_some() => None,
        None => match config.source_path() {
            Some(path) => {
                let source = GitSource::open(&path)?;
                let rev = source.resolve(config.source.reference.as_deref())?;
                info!("Source revision {} from {}", rev, path.display());
                Some(rev)
            }
            None => None,
        },
    };

    let mut context = config.into_context(None);
    if revision.is_some() {
        context.source_revision = revision;
    }
    Ok(context)
}

/// Pipeline over the standard stage chain, backed by docker.
pub fn docker_pipeline(docker: &str) -> Pipeline {
    let engine = Arc::new(DockerEngine::new().with_binary(docker));
    let graph = StageGraph::new();
    let strategy = Arc::new(ShellStrategy::new(engine.clone(), graph.clone()));
    Pipeline::new(graph, strategy, engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("dapp.yml");
        fs::write(&path, yaml).unwrap();
        path
    }

    fn init_repo(dir: &Path) -> String {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("app.rb"), "puts 1\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("app.rb")).unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Builder", "builder@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_parse_build_defaults() {
        let cli = Cli::try_parse_from(["dapp", "build"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Build {
                config: PathBuf::from("dapp.yml"),
                revision: None,
                docker: "docker".to_string(),
                json: false,
            }
        );
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_plan_with_options() {
        let cli =
            Cli::try_parse_from(["dapp", "plan", "-c", "ci/dapp.yml", "--revision", "abc", "-v"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Commands::Plan {
                config: PathBuf::from("ci/dapp.yml"),
                revision: Some("abc".to_string()),
                docker: "docker".to_string(),
                json: false,
            }
        );
    }

    #[test]
    fn test_parse_plan_json() {
        let cli = Cli::try_parse_from(["dapp", "plan", "--json", "--docker", "podman"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan { json: true, ref docker, .. } if docker == "podman"
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["dapp", "deploy"]).is_err());
    }

    #[test]
    fn test_revision_flag_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "from: alpine\nsource:\n  revision: pinned\n");

        let ctx = load_context(&path, Some("cli".to_string())).unwrap();
        assert_eq!(ctx.source_revision.as_deref(), Some("cli"));

        let ctx = load_context(&path, None).unwrap();
        assert_eq!(ctx.source_revision.as_deref(), Some("pinned"));
    }

    #[test]
    fn test_revision_resolved_from_checkout() {
        let dir = TempDir::new().unwrap();
        let checkout = dir.path().join("app");
        fs::create_dir(&checkout).unwrap();
        let head = init_repo(&checkout);
        let path = write_config(dir.path(), "from: alpine\nsource:\n  path: app\n");

        let ctx = load_context(&path, None).unwrap();
        assert_eq!(ctx.source_revision, Some(head));
        assert_eq!(ctx.root, dir.path());
    }

    #[test]
    fn test_no_source_means_no_revision() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "from: alpine\n");
        assert_eq!(load_context(&path, None).unwrap().source_revision, None);
    }

    #[test]
    fn test_missing_checkout_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "from: alpine\nsource:\n  path: missing\n");
        assert!(load_context(&path, None).is_err());
    }
}
