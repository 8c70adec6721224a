//! Hosting-platform client interface and the records it exchanges.
//!
//! The engine and the challenge manager only talk to the platform through
//! [`HostingClient`]. The real implementation lives in [`crate::github`]; tests
//! use [`crate::fake::FakeHostingClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ClientError;

/// Open/closed state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullState {
    Open,
    Closed,
}

impl PullState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PullState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a pull request at decision time.
///
/// Never cached by the engine: it is re-fetched at every decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestView {
    pub number: u64,
    pub state: PullState,
    pub base_ref: String,
    pub head_sha: String,
    pub author_login: Option<String>,
    /// Owner of the repository the head branch lives in (the fork owner for fork PRs).
    pub head_owner_login: Option<String>,
    pub body: Option<String>,
    pub merged: bool,
}

/// Status of a check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    Other(String),
}

impl From<&str> for CheckStatus {
    fn from(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
    Other(String),
}

impl From<&str> for CheckConclusion {
    fn from(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failure" => Self::Failure,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRun {
    pub status: CheckStatus,
    /// Only meaningful when `status` is `Completed`.
    pub conclusion: Option<CheckConclusion>,
}

impl CheckRun {
    pub fn new(status: impl AsRef<str>, conclusion: Option<&str>) -> Self {
        Self {
            status: CheckStatus::from(status.as_ref()),
            conclusion: conclusion.map(CheckConclusion::from),
        }
    }

    pub fn completed_success() -> Self {
        Self::new("completed", Some("success"))
    }

    fn is_success(&self) -> bool {
        self.status == CheckStatus::Completed && self.conclusion == Some(CheckConclusion::Success)
    }
}

/// What a set of check runs says about merge eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckVerdict {
    /// No check runs reported for the commit yet.
    NoRuns,
    /// At least one run has not completed.
    Pending,
    /// Every run completed but at least one did not succeed.
    Failed,
    /// Every run completed successfully.
    Passed,
}

/// All check runs reported for a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckRunSet(pub Vec<CheckRun>);

impl CheckRunSet {
    /// Strict AND over all runs: the set must be non-empty and every run
    /// completed with `success`.
    pub fn verdict(&self) -> CheckVerdict {
        if self.0.is_empty() {
            return CheckVerdict::NoRuns;
        }
        if self.0.iter().any(|run| run.status != CheckStatus::Completed) {
            return CheckVerdict::Pending;
        }
        if self.0.iter().all(CheckRun::is_success) {
            CheckVerdict::Passed
        } else {
            CheckVerdict::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Sha of the merge commit, when the platform reports one.
    pub sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    pub name: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub owner_login: String,
    pub html_url: String,
    pub default_branch: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub base_ref: String,
    pub head_ref: String,
    pub state: PullState,
    pub merged: bool,
}

/// A single file commit onto a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
}

/// Narrow capability surface of the hosting platform.
///
/// Every call is one remote request that may fail; implementations own any
/// timeout or retry policy.
#[async_trait]
pub trait HostingClient: Send + Sync {
    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoInfo, ClientError>;

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo, ClientError>;

    async fn list_org_repos(&self) -> Result<Vec<RepoInfo>, ClientError>;

    async fn get_readme(&self, owner: &str, repo: &str) -> Result<String, ClientError>;

    /// Head commit sha of a branch.
    async fn get_branch_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, ClientError>;

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, ClientError>;

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), ClientError>;

    async fn put_file(&self, file: &FileWrite) -> Result<(), ClientError>;

    async fn protect_branch(&self, owner: &str, repo: &str, branch: &str)
        -> Result<(), ClientError>;

    async fn get_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestView, ClientError>;

    /// Most recent pull requests in any state, newest first, at most `limit`.
    async fn list_pulls(
        &self,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<Vec<PullSummary>, ClientError>;

    async fn merge_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        commit_title: &str,
    ) -> Result<MergeResult, ClientError>;

    async fn list_tags(&self, owner: &str, repo: &str) -> Result<Vec<TagRef>, ClientError>;

    /// Create a lightweight tag. Must fail with [`ClientError::AlreadyExists`]
    /// when the name is taken.
    async fn create_tag(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        sha: &str,
    ) -> Result<(), ClientError>;

    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<IssueComment>, ClientError>;

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ClientError>;

    async fn get_check_runs(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CheckRunSet, ClientError>;

    /// Approve workflow runs for `sha` that are waiting on manual approval.
    async fn approve_action_required_runs_for_sha(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<(), ClientError>;

    /// Login of the user owning `token`.
    async fn get_authenticated_user(&self, token: &str) -> Result<String, ClientError>;

    async fn add_collaborator(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
        permission: &str,
    ) -> Result<(), ClientError>;
}
