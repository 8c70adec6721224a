use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};

use challenge_core::{
    AutoMergeEngine, ChallengeManager, EnginePolicy, GitHubClient, HostingClient,
    InvalidationCache, ManagerConfig,
};
use challenge_server::{app, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!(
        "Starting challenge hub {}",
        challenge_core::service_version()
    );

    let config = Config::from_env()
        .context("Failed to load configuration from environment variables")?;

    if config.webhook_secret.is_none() {
        warn!("GITHUB_WEBHOOK_SECRET is not set, webhook signatures will not be verified");
    }
    if config.moderator_api_key.is_none() {
        warn!("MODERATOR_API_KEY is not set, moderator routes are disabled");
    }

    let client: Arc<dyn HostingClient> = Arc::new(
        GitHubClient::new(
            config.github_token.clone(),
            config.github_org.clone(),
            config.github_api_base.clone(),
            config.merge_method,
        )
        .context("Failed to build GitHub client")?,
    );

    info!("Using cache file: {}", config.cache_file.display());
    let cache = Arc::new(InvalidationCache::open(
        config.cache_file.clone(),
        config.cache_ttl_seconds,
    ));

    let engine = AutoMergeEngine::new(
        client.clone(),
        cache.clone(),
        EnginePolicy {
            repo_names: config.repo_names.clone(),
            base_branches: config.base_branches.clone(),
            approve_action_required: config.approve_action_required,
            default_owner: config.github_org.clone(),
            webhook_secret: config.webhook_secret.clone(),
        },
    );

    let manager = ChallengeManager::new(
        client,
        cache,
        ManagerConfig {
            org: config.github_org.clone(),
            repo_names: config.repo_names.clone(),
            default_version_count: config.default_version_count,
        },
    );

    info!(
        "Managing repositories named {} in {}, auto-merging into {}",
        config.repo_names, config.github_org, config.base_branches
    );

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        manager: Arc::new(manager),
        moderator_api_key: config.moderator_api_key.clone(),
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
