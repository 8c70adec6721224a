//! Challenge repository lifecycle: creation, listing, detail and submissions.

pub mod model;
pub mod seed;

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::best_effort::StepOutcome;
use crate::cache::{self, InvalidationCache};
use crate::error::ChallengeError;
use crate::hosting::{FileWrite, HostingClient, RepoInfo};
use crate::naming::{parse_version_branch, version_branch_name, RepoNamePolicy};
use crate::version::VersionTag;

pub use model::{
    ChallengeCreated, ChallengeDetail, ChallengeRequest, ChallengeSummary, NewChallenge,
    RequesterChallengeCreated, SubmissionItem, SyncResult,
};

/// Upper bound on version branches created with a challenge.
pub const MAX_VERSION_COUNT: u32 = 20;
const RECENT_SUBMISSIONS: u32 = 20;
const ALL_SUBMISSIONS: u32 = 100;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Organisation owning every challenge repository.
    pub org: String,
    pub repo_names: RepoNamePolicy,
    /// Version branches created when a request does not say.
    pub default_version_count: u32,
}

impl ManagerConfig {
    pub fn new(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            repo_names: RepoNamePolicy::default(),
            default_version_count: 1,
        }
    }
}

/// Repository freshly scaffolded by [`ChallengeManager::scaffold`].
struct Scaffolded {
    owner: String,
    repo: RepoInfo,
    version_branches: Vec<String>,
}

impl Scaffolded {
    fn into_created(self) -> ChallengeCreated {
        let mut branches = vec![self.repo.default_branch.clone()];
        branches.extend(self.version_branches);
        ChallengeCreated {
            challenge_id: self.repo.name,
            repo_url: self.repo.html_url,
            default_branch: self.repo.default_branch,
            branches,
        }
    }
}

pub struct ChallengeManager {
    client: Arc<dyn HostingClient>,
    cache: Arc<InvalidationCache>,
    config: ManagerConfig,
}

fn require(value: &str, message: &str) -> Result<(), ChallengeError> {
    if value.trim().is_empty() {
        return Err(ChallengeError::client_input(message));
    }
    Ok(())
}

fn sort_version_branches(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut versioned: Vec<(u64, String)> = names
        .into_iter()
        .filter_map(|name| parse_version_branch(&name).map(|n| (n, name)))
        .collect();
    versioned.sort();
    versioned.into_iter().map(|(_, name)| name).collect()
}

impl ChallengeManager {
    pub fn new(
        client: Arc<dyn HostingClient>,
        cache: Arc<InvalidationCache>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            client,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn version_count(&self, requested: Option<u32>) -> Result<u32, ChallengeError> {
        let count = requested.unwrap_or(self.config.default_version_count);
        if !(1..=MAX_VERSION_COUNT).contains(&count) {
            return Err(ChallengeError::client_input(format!(
                "version_count must be between 1 and {}",
                MAX_VERSION_COUNT
            )));
        }
        Ok(count)
    }

    fn ensure_managed(&self, challenge_id: &str) -> Result<(), ChallengeError> {
        if self.config.repo_names.is_challenge_repo(challenge_id) {
            Ok(())
        } else {
            Err(ChallengeError::not_found("challenge not found"))
        }
    }

    /// Create and seed the repository. Fails fast and leaves any partial
    /// repository in place.
    async fn scaffold(
        &self,
        title: &str,
        description: &str,
        version_count: u32,
    ) -> Result<Scaffolded, ChallengeError> {
        let title = title.trim();
        let repo_name = self
            .config
            .repo_names
            .repo_name(title, Utc::now().timestamp_millis().max(0) as u64);

        info!("Creating challenge repository {}", repo_name);

        let repo = match self
            .client
            .create_repo(&repo_name, &format!("Challenge: {}", title))
            .await
        {
            Ok(repo) => repo,
            Err(e) if e.is_already_exists() || e.status() == Some(422) => {
                return Err(ChallengeError::ClientInput {
                    message: format!("failed to create repo {}", repo_name),
                    details: Some(serde_json::json!({ "reason": e.to_string() })),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let owner = repo.owner_login.clone();
        let default_branch = repo.default_branch.clone();
        let base_sha = self
            .client
            .get_branch_sha(&owner, &repo.name, &default_branch)
            .await?;

        let workflow = seed::ci_workflow(&default_branch);
        let file = |branch: &str, path: &str, content: String, message: &str| FileWrite {
            owner: owner.clone(),
            repo: repo.name.clone(),
            branch: branch.to_string(),
            path: path.to_string(),
            content,
            message: message.to_string(),
        };

        self.client
            .put_file(&file(
                &default_branch,
                seed::CHALLENGE_FILE,
                seed::challenge_markdown(title, description.trim()),
                "docs: add challenge",
            ))
            .await?;
        self.client
            .put_file(&file(
                &default_branch,
                seed::WORKFLOW_FILE,
                workflow.clone(),
                "chore(ci): add challenge workflow",
            ))
            .await?;

        let mut version_branches = Vec::with_capacity(version_count as usize);
        for n in 1..=u64::from(version_count) {
            let branch = version_branch_name(n);
            self.client
                .create_branch(&owner, &repo.name, &branch, &base_sha)
                .await?;
            self.client
                .put_file(&file(
                    &branch,
                    seed::WORKFLOW_FILE,
                    workflow.clone(),
                    "chore(ci): add challenge workflow",
                ))
                .await?;
            version_branches.push(branch);
        }

        self.client
            .protect_branch(&owner, &repo.name, &default_branch)
            .await?;
        for branch in &version_branches {
            self.client
                .protect_branch(&owner, &repo.name, branch)
                .await?;
        }

        info!(
            "Created challenge {} with {} version branches",
            repo.name,
            version_branches.len()
        );

        Ok(Scaffolded {
            owner,
            repo,
            version_branches,
        })
    }

    pub async fn create_challenge(
        &self,
        request: &NewChallenge,
    ) -> Result<ChallengeCreated, ChallengeError> {
        require(&request.title, "title is required")?;
        require(&request.description, "description is required")?;
        let version_count = self.version_count(request.version_count)?;

        let scaffolded = self
            .scaffold(&request.title, &request.description, version_count)
            .await?;

        self.cache.clear(cache::CHALLENGES_LIST_KEY);
        Ok(scaffolded.into_created())
    }

    /// Create a challenge on behalf of the owner of `requester_token`, commit
    /// their problem file and try to grant them push access.
    pub async fn create_challenge_for_requester(
        &self,
        request: &ChallengeRequest,
        requester_token: &str,
    ) -> Result<RequesterChallengeCreated, ChallengeError> {
        require(requester_token, "requester token is required")?;
        require(&request.title, "title is required")?;
        require(&request.description, "description is required")?;
        require(&request.problem_filename, "problem file name is required")?;
        require(&request.problem_content, "problem file content is required")?;
        let version_count = self.version_count(request.version_count)?;

        let requester = self
            .client
            .get_authenticated_user(requester_token)
            .await?
            .trim()
            .to_string();
        if requester.is_empty() {
            return Err(ChallengeError::client_input(
                "unable to resolve requester from token",
            ));
        }

        let scaffolded = self
            .scaffold(&request.title, &request.description, version_count)
            .await?;

        let problem_file = seed::problem_file_name(&request.problem_filename);
        self.client
            .put_file(&FileWrite {
                owner: scaffolded.owner.clone(),
                repo: scaffolded.repo.name.clone(),
                branch: scaffolded.repo.default_branch.clone(),
                path: problem_file.clone(),
                content: request.problem_content.clone(),
                message: format!("docs: add problem file {}", problem_file),
            })
            .await?;

        // Some organisations only allow fork-based contribution.
        let collaborator_granted = StepOutcome::capture(
            "grant requester push access",
            self.client
                .add_collaborator(
                    &scaffolded.owner,
                    &scaffolded.repo.name,
                    &requester,
                    "push",
                )
                .await,
        )
        .is_done();

        self.cache.clear(cache::CHALLENGES_LIST_KEY);

        Ok(RequesterChallengeCreated {
            challenge: scaffolded.into_created(),
            requester,
            problem_file,
            collaborator_granted,
        })
    }

    pub async fn list_challenges(&self) -> Result<Vec<ChallengeSummary>, ChallengeError> {
        if let Some(cached) = self
            .cache
            .get_as::<Vec<ChallengeSummary>>(cache::CHALLENGES_LIST_KEY)
        {
            return Ok(cached);
        }

        let items: Vec<ChallengeSummary> = self
            .client
            .list_org_repos()
            .await?
            .into_iter()
            .filter(|repo| self.config.repo_names.is_challenge_repo(&repo.name))
            .map(|repo| ChallengeSummary {
                title: repo
                    .description
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| repo.name.clone()),
                challenge_id: repo.name,
                repo_url: repo.html_url,
                default_branch: repo.default_branch,
            })
            .collect();

        self.cache.set_as(cache::CHALLENGES_LIST_KEY, &items);
        Ok(items)
    }

    pub async fn get_challenge_detail(
        &self,
        challenge_id: &str,
    ) -> Result<ChallengeDetail, ChallengeError> {
        self.ensure_managed(challenge_id)?;

        let cache_key = cache::challenge_detail_key(challenge_id);
        if let Some(cached) = self.cache.get_as::<ChallengeDetail>(&cache_key) {
            return Ok(cached);
        }

        let org = self.config.org.as_str();
        let repo = self.client.get_repo(org, challenge_id).await?;
        let readme = StepOutcome::capture(
            "read README",
            self.client.get_readme(org, challenge_id).await,
        )
        .ok();
        let version_branches =
            sort_version_branches(self.client.list_branches(org, challenge_id).await?);

        let mut tags: Vec<VersionTag> = self
            .client
            .list_tags(org, challenge_id)
            .await?
            .iter()
            .filter_map(|t| VersionTag::parse(&t.name))
            .collect();
        tags.sort();
        tags.dedup();

        let recent_submissions = self
            .client
            .list_pulls(org, challenge_id, RECENT_SUBMISSIONS)
            .await?
            .into_iter()
            .map(SubmissionItem::from)
            .collect();

        let detail = ChallengeDetail {
            challenge_id: challenge_id.to_string(),
            title: repo
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| challenge_id.to_string()),
            description: readme,
            repo_url: repo.html_url,
            default_branch: repo.default_branch,
            version_branches,
            version_tags: tags.iter().map(VersionTag::name).collect(),
            recent_submissions,
        };

        self.cache.set_as(&cache_key, &detail);
        Ok(detail)
    }

    pub async fn list_submissions(
        &self,
        challenge_id: &str,
    ) -> Result<Vec<SubmissionItem>, ChallengeError> {
        self.ensure_managed(challenge_id)?;

        let cache_key = cache::submissions_key(challenge_id);
        if let Some(cached) = self.cache.get_as::<Vec<SubmissionItem>>(&cache_key) {
            return Ok(cached);
        }

        let items = self.fetch_submissions(challenge_id).await?;
        self.cache.set_as(&cache_key, &items);
        Ok(items)
    }

    async fn fetch_submissions(
        &self,
        challenge_id: &str,
    ) -> Result<Vec<SubmissionItem>, ChallengeError> {
        Ok(self
            .client
            .list_pulls(&self.config.org, challenge_id, ALL_SUBMISSIONS)
            .await?
            .into_iter()
            .map(SubmissionItem::from)
            .collect())
    }

    /// Drop cached views of `challenge_id` and report its current submission count.
    pub async fn sync_challenge(&self, challenge_id: &str) -> Result<SyncResult, ChallengeError> {
        self.ensure_managed(challenge_id)?;

        let submissions = self.fetch_submissions(challenge_id).await?;
        self.cache.clear(&cache::challenge_detail_key(challenge_id));
        self.cache.clear(&cache::submissions_key(challenge_id));

        Ok(SyncResult {
            challenge_id: challenge_id.to_string(),
            synced: true,
            submission_count: submissions.len(),
        })
    }

    /// Whether the owner of `requester_token` authored `pull_number` or owns
    /// the repository its head branch lives in.
    pub async fn requester_can_operate_pull(
        &self,
        challenge_id: &str,
        pull_number: u64,
        requester_token: &str,
    ) -> Result<bool, ChallengeError> {
        self.ensure_managed(challenge_id)?;
        if pull_number == 0 {
            return Err(ChallengeError::client_input("pull number must be positive"));
        }

        let requester = self.client.get_authenticated_user(requester_token).await?;
        if requester.trim().is_empty() {
            return Ok(false);
        }

        let pull = self
            .client
            .get_pull(&self.config.org, challenge_id, pull_number)
            .await?;

        Ok([pull.author_login, pull.head_owner_login]
            .iter()
            .flatten()
            .any(|login| login == &requester))
    }
}
