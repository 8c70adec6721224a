use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;

use challenge_core::cache::{DEFAULT_CACHE_FILE, DEFAULT_TTL_SECONDS};
use challenge_core::github::DEFAULT_API_BASE;
use challenge_core::{BaseBranchPolicy, MergeMethod, RepoNamePolicy};

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    /// Organisation that owns every challenge repository.
    pub github_org: String,
    pub github_api_base: String,
    /// Secret for `X-Hub-Signature-256`. When unset, deliveries are not verified.
    pub webhook_secret: Option<String>,
    /// Bearer token for moderator routes. When unset, those routes always answer 401.
    pub moderator_api_key: Option<String>,
    pub repo_names: RepoNamePolicy,
    pub base_branches: BaseBranchPolicy,
    pub merge_method: MergeMethod,
    pub approve_action_required: bool,
    pub default_version_count: u32,
    pub cache_ttl_seconds: f64,
    pub cache_file: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let github_token = var("GITHUB_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .context("GITHUB_TOKEN environment variable is required")?;

        let github_org = var("GITHUB_ORG")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .context("GITHUB_ORG environment variable is required")?;

        let github_api_base =
            var("GITHUB_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let webhook_secret = parse_optional_secret(var("GITHUB_WEBHOOK_SECRET"));
        let moderator_api_key = parse_optional_secret(var("MODERATOR_API_KEY"));

        let repo_names = match var("CHALLENGE_REPO_NAMING") {
            Some(value) => value
                .parse::<RepoNamePolicy>()
                .context("CHALLENGE_REPO_NAMING is invalid")?,
            None => RepoNamePolicy::default(),
        };

        let default_branch = var("DEFAULT_BRANCH").unwrap_or_else(|| "main".to_string());
        let base_branches = BaseBranchPolicy::from_setting(
            &var("AUTO_MERGE_BASE").unwrap_or_else(|| "version".to_string()),
            &default_branch,
        )
        .context("AUTO_MERGE_BASE is invalid")?;

        let merge_method = var("MERGE_METHOD")
            .unwrap_or_else(|| "squash".to_string())
            .parse::<MergeMethod>()
            .map_err(|e| anyhow!(e))
            .context("MERGE_METHOD is invalid")?;

        let approve_action_required = parse_flag(var("APPROVE_ACTION_REQUIRED"), true)
            .context("APPROVE_ACTION_REQUIRED must be true or false")?;

        let default_version_count = var("DEFAULT_VERSION_COUNT")
            .unwrap_or_else(|| "1".to_string())
            .trim()
            .parse::<u32>()
            .context("DEFAULT_VERSION_COUNT must be a valid number")?;

        let cache_ttl_seconds = match var("CACHE_TTL_SECONDS") {
            Some(value) => value
                .trim()
                .parse::<f64>()
                .context("CACHE_TTL_SECONDS must be a valid number")?,
            None => DEFAULT_TTL_SECONDS,
        };
        if !cache_ttl_seconds.is_finite() || cache_ttl_seconds < 0.0 {
            return Err(anyhow!(
                "CACHE_TTL_SECONDS must be a finite, non-negative number of seconds, got {}",
                cache_ttl_seconds
            ));
        }

        let cache_file = var("CACHE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE));

        let port = var("PORT")
            .unwrap_or_else(|| "8000".to_string())
            .trim()
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        Ok(Config {
            github_token,
            github_org,
            github_api_base,
            webhook_secret,
            moderator_api_key,
            repo_names,
            base_branches,
            merge_method,
            approve_action_required,
            default_version_count,
            cache_ttl_seconds,
            cache_file,
            port,
        })
    }
}

/// Treat a missing, empty or whitespace-only secret as unset.
///
/// An empty secret must never match an empty header.
pub fn parse_optional_secret(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_flag(value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("unrecognised flag value '{}'", other)),
    }
}
