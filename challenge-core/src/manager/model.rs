//! Request and read models of the challenge API.

use serde::{Deserialize, Serialize};

use crate::hosting::PullSummary;

/// Moderator request to create a challenge.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewChallenge {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version_count: Option<u32>,
}

/// Requester request to create a challenge around their own problem file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version_count: Option<u32>,
    #[serde(default)]
    pub problem_filename: String,
    #[serde(default)]
    pub problem_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeCreated {
    pub challenge_id: String,
    pub repo_url: String,
    pub default_branch: String,
    /// Default branch first, then the version branches in order.
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterChallengeCreated {
    #[serde(flatten)]
    pub challenge: ChallengeCreated,
    pub requester: String,
    pub problem_file: String,
    /// False when the organisation refused the collaborator grant; the
    /// requester can still contribute through a fork.
    pub collaborator_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSummary {
    pub challenge_id: String,
    pub title: String,
    pub repo_url: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionItem {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub base_ref: String,
    pub head_ref: String,
    /// `merged`, or the pull request state.
    pub status: String,
    pub merged: bool,
}

impl From<PullSummary> for SubmissionItem {
    fn from(pr: PullSummary) -> Self {
        let status = if pr.merged {
            "merged".to_string()
        } else {
            pr.state.to_string()
        };
        Self {
            number: pr.number,
            title: pr.title,
            url: pr.html_url,
            base_ref: pr.base_ref,
            head_ref: pr.head_ref,
            status,
            merged: pr.merged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeDetail {
    pub challenge_id: String,
    pub title: String,
    /// README contents, when readable.
    pub description: Option<String>,
    pub repo_url: String,
    pub default_branch: String,
    pub version_branches: Vec<String>,
    pub version_tags: Vec<String>,
    pub recent_submissions: Vec<SubmissionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub challenge_id: String,
    pub synced: bool,
    pub submission_count: usize,
}
