//! GitHub REST implementation of [`HostingClient`].

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::ClientError;
use crate::hosting::{
    CheckRun, CheckRunSet, FileWrite, HostingClient, IssueComment, MergeResult, PullRequestView,
    PullState, PullSummary, RepoInfo, TagRef,
};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("challenge-hub/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How pull requests are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "squash" => Ok(Self::Squash),
            "rebase" => Ok(Self::Rebase),
            other => Err(format!(
                "unknown merge method '{}': expected merge, squash or rebase",
                other
            )),
        }
    }
}

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    token: String,
    org: String,
    api_base: String,
    merge_method: MergeMethod,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    html_url: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    description: Option<String>,
    owner: UserResponse,
}

impl From<RepoResponse> for RepoInfo {
    fn from(repo: RepoResponse) -> Self {
        Self {
            name: repo.name,
            owner_login: repo.owner.login,
            html_url: repo.html_url,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
            description: repo.description,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
    auto_init: bool,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    state: String,
    title: String,
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    user: Option<UserResponse>,
    head: PullRequestRefResponse,
    base: PullRequestRefResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestRefResponse {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
    #[serde(default)]
    repo: Option<HeadRepoResponse>,
}

#[derive(Debug, Deserialize)]
struct HeadRepoResponse {
    owner: UserResponse,
}

fn pull_state(state: &str) -> PullState {
    if state == "open" {
        PullState::Open
    } else {
        PullState::Closed
    }
}

impl PullRequestResponse {
    fn is_merged(&self) -> bool {
        self.merged.unwrap_or(false) || self.merged_at.is_some()
    }
}

impl From<PullRequestResponse> for PullRequestView {
    fn from(pr: PullRequestResponse) -> Self {
        let merged = pr.is_merged();
        Self {
            number: pr.number,
            state: pull_state(&pr.state),
            base_ref: pr.base.ref_name,
            head_sha: pr.head.sha,
            author_login: pr.user.map(|u| u.login),
            head_owner_login: pr.head.repo.map(|r| r.owner.login),
            body: pr.body,
            merged,
        }
    }
}

impl From<PullRequestResponse> for PullSummary {
    fn from(pr: PullRequestResponse) -> Self {
        let merged = pr.is_merged();
        Self {
            number: pr.number,
            title: pr.title,
            html_url: pr.html_url,
            base_ref: pr.base.ref_name,
            head_ref: pr.head.ref_name,
            state: pull_state(&pr.state),
            merged,
        }
    }
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    commit_title: &'a str,
    merge_method: &'a str,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    name: String,
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    total_count: usize,
    check_runs: Vec<CheckRunResponse>,
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRunResponse>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunResponse {
    id: u64,
}

/// Map a non-success response to the matching [`ClientError`].
fn error_for_status(status: StatusCode, body: &str, resource: &str) -> ClientError {
    if status == StatusCode::NOT_FOUND {
        return ClientError::not_found(resource);
    }
    if status == StatusCode::UNPROCESSABLE_ENTITY && body.to_lowercase().contains("already exists")
    {
        return ClientError::already_exists(resource);
    }
    let details = serde_json::from_str::<Value>(body).ok();
    let message = details
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    ClientError::Api {
        status: status.as_u16(),
        message,
        details,
    }
}

fn decode_base64_text(encoded: &str) -> Result<String, ClientError> {
    let decoded = general_purpose::STANDARD
        .decode(encoded.replace('\n', ""))
        .map_err(|e| ClientError::Decode {
            message: format!("invalid base64 content: {}", e),
        })?;
    String::from_utf8(decoded).map_err(|e| ClientError::Decode {
        message: format!("content is not valid UTF-8: {}", e),
    })
}

impl GitHubClient {
    pub fn new(
        token: impl Into<String>,
        org: impl Into<String>,
        api_base: impl Into<String>,
        merge_method: MergeMethod,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token: token.into(),
            org: org.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            merge_method,
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    /// Contents API path for `path`, one percent-encoded segment per directory.
    fn contents_path(owner: &str, repo: &str, path: &str) -> String {
        let segments = path
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("/repos/{}/{}/contents/{}", owner, repo, segments)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn request_with_token(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_with_token(method, path, &self.token)
    }

    /// Send and fail on any non-success status.
    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("request for {} failed: {}", resource, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("GitHub API error on {}: {} - {}", resource, status, error_text);
            return Err(error_for_status(status, &error_text, resource));
        }

        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response, resource: &str) -> Result<T, ClientError> {
        response.json().await.map_err(|e| ClientError::Decode {
            message: format!("failed to parse {} response: {}", resource, e),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &str) -> Result<T, ClientError> {
        let response = self.send(self.request(Method::GET, path), resource).await?;
        Self::json(response, resource).await
    }

    /// Fetch every page of a list endpoint. `path` must already carry a query string.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
    ) -> Result<Vec<T>, ClientError> {
        self.get_paginated_up_to(path, resource, usize::MAX).await
    }

    async fn get_paginated_up_to<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
        limit: usize,
    ) -> Result<Vec<T>, ClientError> {
        let mut all = Vec::new();
        let per_page = PER_PAGE.min(limit.max(1));
        let mut page = 1;

        loop {
            let page_path = format!("{}&per_page={}&page={}", path, per_page, page);
            let items: Vec<T> = self.get_json(&page_path, resource).await?;
            let count = items.len();
            all.extend(items);

            // A short page is the last page.
            if count < per_page || all.len() >= limit {
                break;
            }
            page += 1;
        }

        all.truncate(limit);
        Ok(all)
    }

    /// Sha of `path` on `branch`, if the file exists.
    async fn existing_file_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, ClientError> {
        let resource = format!("{}/{}:{}", owner, repo, path);
        match self
            .get_json::<ContentResponse>(
                &format!(
                    "{}?ref={}",
                    Self::contents_path(owner, repo, path),
                    urlencoding::encode(branch)
                ),
                &resource,
            )
            .await
        {
            Ok(content) => Ok(content.sha),
            Err(ClientError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        ref_name: String,
        sha: &str,
    ) -> Result<(), ClientError> {
        let resource = format!("{}/{} {}", owner, repo, ref_name);
        let request = self
            .request(Method::POST, &format!("/repos/{}/{}/git/refs", owner, repo))
            .json(&CreateRefRequest { ref_name, sha });
        self.send(request, &resource).await?;
        Ok(())
    }
}

#[async_trait]
impl HostingClient for GitHubClient {
    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoInfo, ClientError> {
        info!("Creating repository {}/{}", self.org, name);
        let request = self
            .request(Method::POST, &format!("/orgs/{}/repos", self.org))
            .json(&CreateRepoRequest {
                name,
                description,
                private: false,
                auto_init: true,
            });
        let response = self
            .send(request, &format!("repository {}/{}", self.org, name))
            .await?;
        let repo: RepoResponse = Self::json(response, "create repository").await?;
        Ok(repo.into())
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo, ClientError> {
        let repo: RepoResponse = self
            .get_json(
                &format!("/repos/{}/{}", owner, repo),
                &format!("repository {}/{}", owner, repo),
            )
            .await?;
        Ok(repo.into())
    }

    async fn list_org_repos(&self) -> Result<Vec<RepoInfo>, ClientError> {
        let repos: Vec<RepoResponse> = self
            .get_paginated(
                &format!("/orgs/{}/repos?type=all", self.org),
                &format!("repositories of {}", self.org),
            )
            .await?;
        info!("Found {} repositories in {}", repos.len(), self.org);
        Ok(repos.into_iter().map(RepoInfo::from).collect())
    }

    async fn get_readme(&self, owner: &str, repo: &str) -> Result<String, ClientError> {
        let readme: ContentResponse = self
            .get_json(
                &format!("/repos/{}/{}/readme", owner, repo),
                &format!("README of {}/{}", owner, repo),
            )
            .await?;
        decode_base64_text(readme.content.as_deref().unwrap_or_default())
    }

    async fn get_branch_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, ClientError> {
        let branch: BranchResponse = self
            .get_json(
                &format!("/repos/{}/{}/branches/{}", owner, repo, branch),
                &format!("branch {} of {}/{}", branch, owner, repo),
            )
            .await?;
        Ok(branch.commit.sha)
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, ClientError> {
        let branches: Vec<BranchResponse> = self
            .get_paginated(
                &format!("/repos/{}/{}/branches?", owner, repo),
                &format!("branches of {}/{}", owner, repo),
            )
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), ClientError> {
        info!("Creating branch {} in {}/{} at {}", branch, owner, repo, sha);
        self.create_ref(owner, repo, format!("refs/heads/{}", branch), sha)
            .await
    }

    async fn put_file(&self, file: &FileWrite) -> Result<(), ClientError> {
        let sha = self
            .existing_file_sha(&file.owner, &file.repo, &file.branch, &file.path)
            .await?;

        let request = self
            .request(
                Method::PUT,
                &Self::contents_path(&file.owner, &file.repo, &file.path),
            )
            .json(&PutContentRequest {
                message: &file.message,
                content: general_purpose::STANDARD.encode(file.content.as_bytes()),
                branch: &file.branch,
                sha,
            });
        self.send(
            request,
            &format!("{}/{}:{} on {}", file.owner, file.repo, file.path, file.branch),
        )
        .await?;
        info!(
            "Wrote {} on {} in {}/{}",
            file.path, file.branch, file.owner, file.repo
        );
        Ok(())
    }

    async fn protect_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), ClientError> {
        let request = self
            .request(
                Method::PUT,
                &format!("/repos/{}/{}/branches/{}/protection", owner, repo, branch),
            )
            .json(&json!({
                "required_status_checks": null,
                "enforce_admins": false,
                "required_pull_request_reviews": null,
                "restrictions": null,
                "allow_force_pushes": false,
                "allow_deletions": false,
            }));

        match self
            .send(request, &format!("protection of {} in {}/{}", branch, owner, repo))
            .await
        {
            Ok(_) => Ok(()),
            // Free plans reject protection on some repositories.
            Err(e) if e.status().is_some_and(|s| (400..500).contains(&s)) => {
                warn!(
                    "Skipping protection of {} in {}/{}: {}",
                    branch, owner, repo, e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestView, ClientError> {
        let pull: PullRequestResponse = self
            .get_json(
                &format!("/repos/{}/{}/pulls/{}", owner, repo, number),
                &format!("PR #{} in {}/{}", number, owner, repo),
            )
            .await?;
        Ok(pull.into())
    }

    async fn list_pulls(
        &self,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<Vec<PullSummary>, ClientError> {
        let pulls: Vec<PullRequestResponse> = self
            .get_paginated_up_to(
                &format!(
                    "/repos/{}/{}/pulls?state=all&sort=created&direction=desc",
                    owner, repo
                ),
                &format!("pull requests of {}/{}", owner, repo),
                limit as usize,
            )
            .await?;
        Ok(pulls.into_iter().map(PullSummary::from).collect())
    }

    async fn merge_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        commit_title: &str,
    ) -> Result<MergeResult, ClientError> {
        info!(
            "Merging PR #{} in {}/{} ({})",
            number, owner, repo, self.merge_method
        );
        let resource = format!("merge of PR #{} in {}/{}", number, owner, repo);
        let request = self
            .request(
                Method::PUT,
                &format!("/repos/{}/{}/pulls/{}/merge", owner, repo, number),
            )
            .json(&MergeRequest {
                commit_title,
                merge_method: self.merge_method.as_str(),
            });
        let response = self.send(request, &resource).await?;
        let status = response.status().as_u16();
        let merge: MergeResponse = Self::json(response, &resource).await?;

        if !merge.merged {
            return Err(ClientError::api(
                status,
                merge
                    .message
                    .unwrap_or_else(|| "pull request was not merged".to_string()),
            ));
        }

        Ok(MergeResult { sha: merge.sha })
    }

    async fn list_tags(&self, owner: &str, repo: &str) -> Result<Vec<TagRef>, ClientError> {
        let tags: Vec<TagResponse> = self
            .get_paginated(
                &format!("/repos/{}/{}/tags?", owner, repo),
                &format!("tags of {}/{}", owner, repo),
            )
            .await?;
        Ok(tags
            .into_iter()
            .map(|t| TagRef {
                name: t.name,
                commit_sha: t.commit.sha,
            })
            .collect())
    }

    async fn create_tag(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        sha: &str,
    ) -> Result<(), ClientError> {
        self.create_ref(owner, repo, format!("refs/tags/{}", name), sha)
            .await
    }

    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<IssueComment>, ClientError> {
        let comments: Vec<CommentResponse> = self
            .get_paginated(
                &format!("/repos/{}/{}/issues/{}/comments?", owner, repo, number),
                &format!("comments on #{} in {}/{}", number, owner, repo),
            )
            .await?;
        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ClientError> {
        let request = self
            .request(
                Method::POST,
                &format!("/repos/{}/{}/issues/{}/comments", owner, repo, number),
            )
            .json(&json!({ "body": body }));
        self.send(
            request,
            &format!("comment on #{} in {}/{}", number, owner, repo),
        )
        .await?;
        info!("Posted comment on #{} in {}/{}", number, owner, repo);
        Ok(())
    }

    async fn get_check_runs(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CheckRunSet, ClientError> {
        let resource = format!("check runs of {} in {}/{}", sha, owner, repo);
        let mut runs = Vec::new();
        let mut page = 1;

        loop {
            let response: CheckRunsResponse = self
                .get_json(
                    &format!(
                        "/repos/{}/{}/commits/{}/check-runs?per_page={}&page={}",
                        owner, repo, sha, PER_PAGE, page
                    ),
                    &resource,
                )
                .await?;
            let count = response.check_runs.len();
            runs.extend(
                response
                    .check_runs
                    .into_iter()
                    .map(|r| CheckRun::new(&r.status, r.conclusion.as_deref())),
            );

            if count < PER_PAGE || runs.len() >= response.total_count {
                break;
            }
            page += 1;
        }

        Ok(CheckRunSet(runs))
    }

    async fn approve_action_required_runs_for_sha(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<(), ClientError> {
        let pending: WorkflowRunsResponse = self
            .get_json(
                &format!(
                    "/repos/{}/{}/actions/runs?head_sha={}&status=action_required&per_page={}",
                    owner, repo, sha, PER_PAGE
                ),
                &format!("workflow runs of {} in {}/{}", sha, owner, repo),
            )
            .await?;

        for run in pending.workflow_runs {
            let request = self.request(
                Method::POST,
                &format!("/repos/{}/{}/actions/runs/{}/approve", owner, repo, run.id),
            );
            match self
                .send(request, &format!("approval of workflow run {}", run.id))
                .await
            {
                Ok(_) => info!("Approved workflow run {} in {}/{}", run.id, owner, repo),
                Err(e) => warn!("Could not approve workflow run {}: {}", run.id, e),
            }
        }

        Ok(())
    }

    async fn get_authenticated_user(&self, token: &str) -> Result<String, ClientError> {
        let response = self
            .send(
                self.request_with_token(Method::GET, "/user", token),
                "authenticated user",
            )
            .await?;
        let user: UserResponse = Self::json(response, "authenticated user").await?;
        Ok(user.login)
    }

    async fn add_collaborator(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
        permission: &str,
    ) -> Result<(), ClientError> {
        let request = self
            .request(
                Method::PUT,
                &format!("/repos/{}/{}/collaborators/{}", owner, repo, username),
            )
            .json(&json!({ "permission": permission }));
        self.send(
            request,
            &format!("collaborator {} on {}/{}", username, owner, repo),
        )
        .await?;
        info!(
            "Granted {} access on {}/{} to {}",
            permission, owner, repo, username
        );
        Ok(())
    }
}
