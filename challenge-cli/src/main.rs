use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

use challenge_core::cache::{DEFAULT_CACHE_FILE, DEFAULT_TTL_SECONDS};
use challenge_core::github::DEFAULT_API_BASE;
use challenge_core::manager::NewChallenge;
use challenge_core::naming::slugify;
use challenge_core::signature::compute_signature;
use challenge_core::{
    AutoMergeEngine, BaseBranchPolicy, ChallengeManager, EnginePolicy, GitHubClient,
    HostingClient, InvalidationCache, ManagerConfig, MergeMethod, RepoNamePolicy,
};

/// Challenge hub: manage challenge repositories from the command line
#[derive(Parser, Debug)]
#[command(name = "challenge", version)]
#[command(about = "Manage challenge repositories and their auto-merge flow", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the slug and repository name a title would get
    Slug(SlugArgs),
    /// Print the X-Hub-Signature-256 header for a payload file
    Sign(SignArgs),
    /// Run the auto-merge gate for one pull request
    Evaluate(EvaluateArgs),
    /// Create a challenge repository with its version branches
    Create(CreateArgs),
}

#[derive(Parser, Debug)]
struct SlugArgs {
    /// Challenge title
    title: String,

    /// Repository naming policy, `prefix:<word>` or `suffix:<word>`
    #[arg(long, default_value = "prefix:challenge")]
    naming: RepoNamePolicy,
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Webhook secret
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET")]
    secret: String,

    /// File holding the exact request body
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct GitHubArgs {
    /// GitHub token (if not provided, will use GITHUB_TOKEN environment variable)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// Organisation owning the challenge repositories
    #[arg(long, env = "GITHUB_ORG")]
    org: String,

    #[arg(long, env = "GITHUB_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, env = "CHALLENGE_REPO_NAMING", default_value = "prefix:challenge")]
    naming: RepoNamePolicy,

    #[arg(long, env = "CACHE_FILE", default_value = DEFAULT_CACHE_FILE)]
    cache_file: PathBuf,
}

impl GitHubArgs {
    fn client(&self, merge_method: MergeMethod) -> Result<Arc<dyn HostingClient>> {
        let client = GitHubClient::new(&self.token, &self.org, &self.api_base, merge_method)
            .context("Failed to build GitHub client")?;
        Ok(Arc::new(client))
    }

    fn cache(&self) -> Arc<InvalidationCache> {
        Arc::new(InvalidationCache::open(
            self.cache_file.clone(),
            DEFAULT_TTL_SECONDS,
        ))
    }
}

#[derive(Parser, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    github: GitHubArgs,

    /// Challenge repository name
    #[arg(long)]
    repo: String,

    /// Pull request number
    #[arg(long)]
    pull: u64,

    /// Repository owner (defaults to --org)
    #[arg(long)]
    owner: Option<String>,

    /// Which base branches may be merged: version, default or default-or-version
    #[arg(long, env = "AUTO_MERGE_BASE", default_value = "version")]
    base: String,

    #[arg(long, env = "DEFAULT_BRANCH", default_value = "main")]
    default_branch: String,

    #[arg(long, env = "MERGE_METHOD", default_value = "squash")]
    merge_method: String,

    /// Do not approve workflow runs waiting for approval
    #[arg(long)]
    no_approve: bool,
}

#[derive(Parser, Debug)]
struct CreateArgs {
    #[command(flatten)]
    github: GitHubArgs,

    #[arg(long)]
    title: String,

    #[arg(long)]
    description: String,

    /// Number of version branches to create
    #[arg(long)]
    versions: Option<u32>,
}

fn slug(args: SlugArgs) {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    println!("slug: {}", slugify(&args.title));
    println!("repo: {}", args.naming.repo_name(&args.title, millis));
}

fn sign(args: SignArgs) -> Result<()> {
    let body = fs::read(&args.file)
        .with_context(|| format!("Failed to read payload file {}", args.file.display()))?;
    println!("{}", compute_signature(&args.secret, &body));
    Ok(())
}

async fn evaluate(args: EvaluateArgs) -> Result<()> {
    let merge_method = args
        .merge_method
        .parse::<MergeMethod>()
        .map_err(|e| anyhow!(e))?;
    let base_branches = BaseBranchPolicy::from_setting(&args.base, &args.default_branch)?;

    let engine = AutoMergeEngine::new(
        args.github.client(merge_method)?,
        args.github.cache(),
        EnginePolicy {
            repo_names: args.github.naming.clone(),
            base_branches,
            approve_action_required: !args.no_approve,
            default_owner: args.github.org.clone(),
            webhook_secret: None,
        },
    );

    let owner = args.owner.as_deref().unwrap_or(&args.github.org);
    let outcome = engine
        .evaluate_pull(owner, &args.repo, args.pull)
        .await
        .with_context(|| format!("Failed to evaluate {}/{}#{}", owner, args.repo, args.pull))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn create(args: CreateArgs) -> Result<()> {
    let manager = ChallengeManager::new(
        args.github.client(MergeMethod::default())?,
        args.github.cache(),
        ManagerConfig {
            org: args.github.org.clone(),
            repo_names: args.github.naming.clone(),
            default_version_count: 1,
        },
    );

    let created = manager
        .create_challenge(&NewChallenge {
            title: args.title,
            description: args.description,
            version_count: args.versions,
        })
        .await
        .context("Failed to create challenge")?;

    println!("{}", serde_json::to_string_pretty(&created)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Slug(args) => {
            slug(args);
            Ok(())
        }
        Commands::Sign(args) => sign(args),
        Commands::Evaluate(args) => evaluate(args).await,
        Commands::Create(args) => create(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_slug_defaults_to_prefix_naming() {
        let cli = Cli::try_parse_from(["challenge", "slug", "Graph Coloring"]).unwrap();
        match cli.command {
            Commands::Slug(args) => {
                assert_eq!(args.title, "Graph Coloring");
                assert_eq!(args.naming, RepoNamePolicy::Prefix("challenge".to_string()));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_naming_policy_is_rejected() {
        assert!(Cli::try_parse_from(["challenge", "slug", "x", "--naming", "middle:x"]).is_err());
    }

    #[test]
    fn test_sign_reads_payload_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("payload.json");
        fs::write(&path, b"{}").unwrap();
        sign(SignArgs {
            secret: "s".to_string(),
            file: path,
        })
        .unwrap();

        let missing = sign(SignArgs {
            secret: "s".to_string(),
            file: dir.path().join("missing.json"),
        });
        assert!(missing.is_err());
    }
}
