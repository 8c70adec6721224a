//! Webhook-driven auto-merge and versioning.
//!
//! The engine holds no per-PR state. Each decision re-fetches the pull request
//! and its checks, so duplicated or reordered deliveries converge: a second run
//! for an already merged PR sees it closed, and tag allocation and announcement
//! posting are each idempotent per commit.

pub mod dispatch;
pub mod tagging;

use std::sync::Arc;

use tracing::{error, info};

use crate::announcement::Announcement;
use crate::best_effort::StepOutcome;
use crate::cache::InvalidationCache;
use crate::error::{ChallengeError, ClientError};
use crate::hosting::{CheckVerdict, HostingClient, PullRequestView, PullState};
use crate::naming::{BaseBranchPolicy, RepoNamePolicy};
use crate::signature;
use crate::version::{CommitSha, VersionTag};

pub use dispatch::{EvaluationOutcome, WebhookOutcome, WebhookPayload};
pub use tagging::{allocate_version_tag, TagAllocation, MAX_TAG_ATTEMPTS};

/// Policy knobs of the engine, fixed at startup.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub repo_names: RepoNamePolicy,
    pub base_branches: BaseBranchPolicy,
    /// Approve workflow runs stuck in "action required" before reading checks.
    pub approve_action_required: bool,
    /// Owner used when a payload names none.
    pub default_owner: String,
    /// `None` disables signature checks.
    pub webhook_secret: Option<String>,
}

impl EnginePolicy {
    pub fn new(default_owner: impl Into<String>) -> Self {
        Self {
            repo_names: RepoNamePolicy::default(),
            base_branches: BaseBranchPolicy::default(),
            approve_action_required: true,
            default_owner: default_owner.into(),
            webhook_secret: None,
        }
    }
}

/// What happened to the announcement of a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementStatus {
    Posted,
    /// A comment with the same marker was already on the pull request.
    AlreadyPresent,
}

/// Result of one auto-merge attempt.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The pull request is closed (possibly merged by an earlier delivery).
    NotOpen,
    IneligibleBase { base_ref: String },
    ChecksNotPassed(CheckVerdict),
    /// The platform refused the merge; reported as not merged.
    MergeFailed { error: ClientError },
    Merged {
        sha: CommitSha,
        tag: Option<TagAllocation>,
        /// `None` when no tag could be allocated.
        announcement: Option<StepOutcome<AnnouncementStatus>>,
    },
}

impl MergeOutcome {
    pub fn merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

pub struct AutoMergeEngine {
    client: Arc<dyn HostingClient>,
    cache: Arc<InvalidationCache>,
    policy: EnginePolicy,
}

impl AutoMergeEngine {
    pub fn new(
        client: Arc<dyn HostingClient>,
        cache: Arc<InvalidationCache>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            client,
            cache,
            policy,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Check a webhook signature header against the configured secret.
    pub fn verify_signature(&self, body: &[u8], header: &str) -> bool {
        signature::verify_signature(self.policy.webhook_secret.as_deref(), body, header)
    }

    /// Merge `pull_number` if it is open, targets an eligible base and all its
    /// checks passed; then tag the merge commit and announce the new version.
    ///
    /// Failing to read the pull request or its checks is an error. Everything
    /// after a successful merge is best-effort.
    pub async fn try_auto_merge(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<MergeOutcome, ChallengeError> {
        let pull = self.client.get_pull(owner, repo, pull_number).await?;

        if pull.state != PullState::Open {
            info!(
                "PR #{} in {}/{} is {}, nothing to merge",
                pull_number, owner, repo, pull.state
            );
            return Ok(MergeOutcome::NotOpen);
        }

        if !self.policy.base_branches.allows(&pull.base_ref) {
            info!(
                "PR #{} in {}/{} targets {}, not eligible under policy {}",
                pull_number, owner, repo, pull.base_ref, self.policy.base_branches
            );
            return Ok(MergeOutcome::IneligibleBase {
                base_ref: pull.base_ref,
            });
        }

        if self.policy.approve_action_required {
            let _ = StepOutcome::capture(
                "approve action-required runs",
                self.client
                    .approve_action_required_runs_for_sha(owner, repo, &pull.head_sha)
                    .await,
            );
        }

        let verdict = self
            .client
            .get_check_runs(owner, repo, &pull.head_sha)
            .await?
            .verdict();
        if verdict != CheckVerdict::Passed {
            info!(
                "PR #{} in {}/{} not merged, checks on {} are {:?}",
                pull_number, owner, repo, pull.head_sha, verdict
            );
            return Ok(MergeOutcome::ChecksNotPassed(verdict));
        }

        let commit_title = format!("auto-merge: PR #{}", pull_number);
        let merge = match self
            .client
            .merge_pull(owner, repo, pull_number, &commit_title)
            .await
        {
            Ok(merge) => merge,
            Err(e) => {
                error!(
                    "Failed to merge PR #{} in {}/{}: {}",
                    pull_number, owner, repo, e
                );
                return Ok(MergeOutcome::MergeFailed { error: e });
            }
        };

        let sha = CommitSha::from(merge.sha.unwrap_or_else(|| pull.head_sha.clone()));
        info!(
            "Merged PR #{} in {}/{} as {}",
            pull_number,
            owner,
            repo,
            sha.short()
        );

        let tag = allocate_version_tag(self.client.as_ref(), owner, repo, &sha).await;
        let announcement = match &tag {
            Some(allocation) => Some(self.announce(owner, repo, &pull, &allocation.tag, &sha).await),
            None => None,
        };

        Ok(MergeOutcome::Merged {
            sha,
            tag,
            announcement,
        })
    }

    /// Post the announcement unless a comment with its marker already exists.
    async fn announce(
        &self,
        owner: &str,
        repo: &str,
        pull: &PullRequestView,
        tag: &VersionTag,
        sha: &CommitSha,
    ) -> StepOutcome<AnnouncementStatus> {
        let announcement = Announcement::for_pull(pull, tag, sha);

        // An unreadable comment list counts as empty.
        let existing = StepOutcome::capture(
            "list comments",
            self.client
                .list_issue_comments(owner, repo, pull.number)
                .await,
        )
        .ok()
        .unwrap_or_default();

        if announcement.already_posted(existing.iter().map(|c| c.body.as_str())) {
            info!(
                "Announcement for {} on PR #{} already present",
                tag, pull.number
            );
            return StepOutcome::Done(AnnouncementStatus::AlreadyPresent);
        }

        let posted = StepOutcome::capture(
            "post announcement",
            self.client
                .create_issue_comment(owner, repo, pull.number, &announcement.body)
                .await,
        );
        match posted {
            StepOutcome::Done(()) => {
                info!("Announced {} on PR #{} in {}/{}", tag, pull.number, owner, repo);
                StepOutcome::Done(AnnouncementStatus::Posted)
            }
            StepOutcome::SoftFailure { step, error } => StepOutcome::SoftFailure { step, error },
        }
    }

    /// Drop the cached read models that a webhook for `repo` may have staled.
    fn invalidate(&self, repo: &str) {
        self.cache.clear(crate::cache::CHALLENGES_LIST_KEY);
        self.cache.clear(&crate::cache::challenge_detail_key(repo));
        self.cache.clear(&crate::cache::submissions_key(repo));
    }
}
