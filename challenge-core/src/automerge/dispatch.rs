//! Webhook event dispatch.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::AutoMergeEngine;
use crate::error::ChallengeError;

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub check_run: Option<CheckEvent>,
    #[serde(default)]
    pub check_suite: Option<CheckEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub owner: Option<Owner>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub merged: Option<bool>,
}

/// `check_run` or `check_suite` object; only the linked pull requests matter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckEvent {
    #[serde(default)]
    pub pull_requests: Vec<PullRequestLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestLink {
    #[serde(default)]
    pub number: Option<u64>,
}

impl WebhookPayload {
    /// Distinct pull request numbers referenced by a check event, in order of
    /// first appearance.
    pub fn check_pull_numbers(&self) -> Vec<u64> {
        let mut numbers = Vec::new();
        for event in [&self.check_run, &self.check_suite].into_iter().flatten() {
            for number in event.pull_requests.iter().filter_map(|pr| pr.number) {
                if !numbers.contains(&number) {
                    numbers.push(number);
                }
            }
        }
        numbers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub action: String,
    pub processed: bool,
    pub merged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    pub processed: bool,
    pub merged: bool,
}

impl AutoMergeEngine {
    /// Handle one webhook delivery of type `event`.
    ///
    /// Deliveries for unmanaged repositories are acknowledged without any
    /// remote call or cache change.
    pub async fn process(
        &self,
        event: &str,
        payload: &WebhookPayload,
    ) -> Result<WebhookOutcome, ChallengeError> {
        let action = payload.action.clone().unwrap_or_default();
        let repo_name = payload
            .repository
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or_default();

        if !self.policy.repo_names.is_challenge_repo(repo_name) {
            info!(
                "Ignoring {} event for unmanaged repository '{}'",
                event, repo_name
            );
            return Ok(WebhookOutcome {
                action,
                processed: false,
                merged: false,
            });
        }

        let owner = payload
            .repository
            .as_ref()
            .and_then(|r| r.owner.as_ref())
            .map(|o| o.login.as_str())
            .unwrap_or(self.policy.default_owner.as_str());

        info!(
            "Processing {} event (action '{}') for {}/{}",
            event, action, owner, repo_name
        );

        let merged = match (event, action.as_str()) {
            ("pull_request", "opened" | "synchronize" | "reopened") => {
                match payload.pull_request.as_ref().and_then(|pr| pr.number) {
                    Some(number) => self
                        .try_auto_merge(owner, repo_name, number)
                        .await?
                        .merged(),
                    None => false,
                }
            }
            ("check_run" | "check_suite", "completed") => {
                // A failing pull request must not stop its siblings or hide their merges.
                let mut any_merged = false;
                let mut first_error = None;
                for number in payload.check_pull_numbers() {
                    match self.try_auto_merge(owner, repo_name, number).await {
                        Ok(outcome) => any_merged |= outcome.merged(),
                        Err(e) => {
                            error!(
                                "Failed to evaluate {}/{}#{}: {}",
                                owner, repo_name, number, e
                            );
                            first_error.get_or_insert(e);
                        }
                    }
                }
                if let (false, Some(e)) = (any_merged, first_error) {
                    self.invalidate(repo_name);
                    return Err(e);
                }
                any_merged
            }
            ("pull_request", "closed") => payload
                .pull_request
                .as_ref()
                .and_then(|pr| pr.merged)
                .unwrap_or(false),
            _ => false,
        };

        self.invalidate(repo_name);

        Ok(WebhookOutcome {
            action,
            processed: true,
            merged,
        })
    }

    /// Run the merge gate for one pull request on demand.
    pub async fn evaluate_pull(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<EvaluationOutcome, ChallengeError> {
        if !self.policy.repo_names.is_challenge_repo(repo) {
            return Ok(EvaluationOutcome {
                processed: false,
                merged: false,
            });
        }

        let outcome = self.try_auto_merge(owner, repo, pull_number).await?;
        self.invalidate(repo);

        Ok(EvaluationOutcome {
            processed: true,
            merged: outcome.merged(),
        })
    }
}
