//! In-memory implementation of `HostingClient`.
//!
//! Holds repositories, pull requests, checks, tags and comments in a plain
//! `Mutex`, records every call by method name, and exposes failure switches so
//! soft and hard failure paths can be driven deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::ClientError;
use crate::hosting::{
    CheckRunSet, FileWrite, HostingClient, IssueComment, MergeResult, PullRequestView, PullState,
    PullSummary, RepoInfo, TagRef,
};

pub const FAKE_ORG: &str = "org";

/// Sha the fake reports for the merge commit of pull request `number`.
pub fn merge_sha_for(number: u64) -> String {
    format!("merge-sha-{}", number)
}

fn key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

#[derive(Debug, Clone)]
pub struct FakePull {
    pub view: PullRequestView,
    pub title: String,
    pub head_ref: String,
}

/// Everything the fake knows. Public so tests can arrange and inspect it.
#[derive(Debug, Default)]
pub struct FakeState {
    pub repos: BTreeMap<String, RepoInfo>,
    /// `owner/repo` -> branch -> head sha.
    pub branches: HashMap<String, BTreeMap<String, String>>,
    pub readmes: HashMap<String, String>,
    pub files: Vec<FileWrite>,
    /// `(owner/repo, branch)` in protection order.
    pub protected: Vec<(String, String)>,
    pub pulls: HashMap<String, BTreeMap<u64, FakePull>>,
    /// Check runs by commit sha.
    pub check_runs: HashMap<String, CheckRunSet>,
    pub tags: HashMap<String, Vec<TagRef>>,
    /// Tags a concurrent writer creates just before our next `create_tag`.
    pub tag_races: HashMap<String, VecDeque<TagRef>>,
    pub comments: HashMap<(String, u64), Vec<String>>,
    /// Requester token -> login.
    pub users: HashMap<String, String>,
    /// `(owner/repo, username, permission)`.
    pub collaborators: Vec<(String, String, String)>,
    /// `(owner/repo, number, commit title)` of each successful merge.
    pub merges: Vec<(String, u64, String)>,
    pub calls: Vec<String>,

    /// Every `create_repo` reports the name as taken.
    pub fail_create_repo: bool,
    pub fail_merge: bool,
    pub fail_approve: bool,
    pub fail_list_comments: bool,
    pub fail_post_comment: bool,
    pub fail_list_tags: bool,
    pub fail_create_tag: bool,
    pub fail_add_collaborator: bool,
    pub fail_put_file: bool,
}

#[derive(Debug, Default)]
pub struct FakeHostingClient {
    state: Mutex<FakeState>,
}

impl FakeHostingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: &str) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call.to_string());
        state
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| c.as_str() == call).count()
    }

    /// Register an existing repository owned by [`FAKE_ORG`] with a `main` branch.
    pub fn add_repo(&self, name: &str) {
        let mut state = self.state();
        insert_repo(&mut state, name, None);
    }

    pub fn add_pull(&self, owner: &str, repo: &str, view: PullRequestView) {
        let title = format!("Submission #{}", view.number);
        let head_ref = format!("submission-{}", view.number);
        self.state().pulls.entry(key(owner, repo)).or_default().insert(
            view.number,
            FakePull {
                view,
                title,
                head_ref,
            },
        );
    }

    pub fn pull(&self, owner: &str, repo: &str, number: u64) -> Option<PullRequestView> {
        self.state()
            .pulls
            .get(&key(owner, repo))
            .and_then(|pulls| pulls.get(&number))
            .map(|p| p.view.clone())
    }

    pub fn set_check_runs(&self, sha: &str, runs: CheckRunSet) {
        self.state().check_runs.insert(sha.to_string(), runs);
    }

    pub fn add_tag(&self, owner: &str, repo: &str, name: &str, sha: &str) {
        self.state().tags.entry(key(owner, repo)).or_default().push(TagRef {
            name: name.to_string(),
            commit_sha: sha.to_string(),
        });
    }

    pub fn queue_tag_race(&self, owner: &str, repo: &str, name: &str, sha: &str) {
        self.state()
            .tag_races
            .entry(key(owner, repo))
            .or_default()
            .push_back(TagRef {
                name: name.to_string(),
                commit_sha: sha.to_string(),
            });
    }

    /// `(name, sha)` of every tag, in creation order.
    pub fn tags(&self, owner: &str, repo: &str) -> Vec<(String, String)> {
        self.state()
            .tags
            .get(&key(owner, repo))
            .map(|tags| {
                tags.iter()
                    .map(|t| (t.name.clone(), t.commit_sha.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_comment(&self, owner: &str, repo: &str, number: u64, body: &str) {
        self.state()
            .comments
            .entry((key(owner, repo), number))
            .or_default()
            .push(body.to_string());
    }

    pub fn comments(&self, owner: &str, repo: &str, number: u64) -> Vec<String> {
        self.state()
            .comments
            .get(&(key(owner, repo), number))
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_user(&self, token: &str, login: &str) {
        self.state()
            .users
            .insert(token.to_string(), login.to_string());
    }
}

fn insert_repo(state: &mut FakeState, name: &str, description: Option<&str>) -> RepoInfo {
    let info = RepoInfo {
        name: name.to_string(),
        owner_login: FAKE_ORG.to_string(),
        html_url: format!("https://github.com/{}/{}", FAKE_ORG, name),
        default_branch: "main".to_string(),
        description: description.map(str::to_string),
    };
    state.repos.insert(name.to_string(), info.clone());
    state
        .branches
        .entry(key(FAKE_ORG, name))
        .or_default()
        .insert("main".to_string(), format!("init-sha-{}", name));
    state
        .readmes
        .insert(key(FAKE_ORG, name), format!("# {}\n", name));
    info
}

#[async_trait]
impl HostingClient for FakeHostingClient {
    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoInfo, ClientError> {
        let mut state = self.record("create_repo");
        if state.fail_create_repo || state.repos.contains_key(name) {
            return Err(ClientError::already_exists(format!("repository {}", name)));
        }
        Ok(insert_repo(&mut state, name, Some(description)))
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo, ClientError> {
        let state = self.record("get_repo");
        state
            .repos
            .get(repo)
            .filter(|r| r.owner_login == owner)
            .cloned()
            .ok_or_else(|| ClientError::not_found(key(owner, repo)))
    }

    async fn list_org_repos(&self) -> Result<Vec<RepoInfo>, ClientError> {
        let state = self.record("list_org_repos");
        Ok(state.repos.values().cloned().collect())
    }

    async fn get_readme(&self, owner: &str, repo: &str) -> Result<String, ClientError> {
        let state = self.record("get_readme");
        state
            .readmes
            .get(&key(owner, repo))
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("README of {}", key(owner, repo))))
    }

    async fn get_branch_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, ClientError> {
        let state = self.record("get_branch_sha");
        state
            .branches
            .get(&key(owner, repo))
            .and_then(|branches| branches.get(branch))
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("branch {}", branch)))
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, ClientError> {
        let state = self.record("list_branches");
        Ok(state
            .branches
            .get(&key(owner, repo))
            .map(|branches| branches.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.record("create_branch");
        let branches = state.branches.entry(key(owner, repo)).or_default();
        if branches.contains_key(branch) {
            return Err(ClientError::already_exists(format!("branch {}", branch)));
        }
        branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn put_file(&self, file: &FileWrite) -> Result<(), ClientError> {
        let mut state = self.record("put_file");
        if state.fail_put_file {
            return Err(ClientError::api(409, "conflict writing file"));
        }
        state.files.push(file.clone());
        Ok(())
    }

    async fn protect_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.record("protect_branch");
        state.protected.push((key(owner, repo), branch.to_string()));
        Ok(())
    }

    async fn get_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestView, ClientError> {
        let state = self.record("get_pull");
        state
            .pulls
            .get(&key(owner, repo))
            .and_then(|pulls| pulls.get(&number))
            .map(|p| p.view.clone())
            .ok_or_else(|| ClientError::not_found(format!("PR #{}", number)))
    }

    async fn list_pulls(
        &self,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<Vec<PullSummary>, ClientError> {
        let state = self.record("list_pulls");
        Ok(state
            .pulls
            .get(&key(owner, repo))
            .map(|pulls| {
                pulls
                    .values()
                    .rev()
                    .take(limit as usize)
                    .map(|p| PullSummary {
                        number: p.view.number,
                        title: p.title.clone(),
                        html_url: format!(
                            "https://github.com/{}/pull/{}",
                            key(owner, repo),
                            p.view.number
                        ),
                        base_ref: p.view.base_ref.clone(),
                        head_ref: p.head_ref.clone(),
                        state: p.view.state,
                        merged: p.view.merged,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn merge_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        commit_title: &str,
    ) -> Result<MergeResult, ClientError> {
        let mut state = self.record("merge_pull");
        if state.fail_merge {
            return Err(ClientError::api(405, "Pull Request is not mergeable"));
        }
        let pull = state
            .pulls
            .get_mut(&key(owner, repo))
            .and_then(|pulls| pulls.get_mut(&number))
            .ok_or_else(|| ClientError::not_found(format!("PR #{}", number)))?;
        if pull.view.state != PullState::Open {
            return Err(ClientError::api(405, "Pull Request is not open"));
        }
        pull.view.state = PullState::Closed;
        pull.view.merged = true;
        state
            .merges
            .push((key(owner, repo), number, commit_title.to_string()));
        Ok(MergeResult {
            sha: Some(merge_sha_for(number)),
        })
    }

    async fn list_tags(&self, owner: &str, repo: &str) -> Result<Vec<TagRef>, ClientError> {
        let state = self.record("list_tags");
        if state.fail_list_tags {
            return Err(ClientError::api(500, "tag listing unavailable"));
        }
        Ok(state.tags.get(&key(owner, repo)).cloned().unwrap_or_default())
    }

    async fn create_tag(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        sha: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.record("create_tag");
        if state.fail_create_tag {
            return Err(ClientError::api(403, "Resource not accessible"));
        }
        let repo_key = key(owner, repo);
        if let Some(raced) = state
            .tag_races
            .get_mut(&repo_key)
            .and_then(VecDeque::pop_front)
        {
            state.tags.entry(repo_key.clone()).or_default().push(raced);
        }
        let tags = state.tags.entry(repo_key).or_default();
        if tags.iter().any(|t| t.name == name) {
            return Err(ClientError::already_exists(format!("tag {}", name)));
        }
        tags.push(TagRef {
            name: name.to_string(),
            commit_sha: sha.to_string(),
        });
        Ok(())
    }

    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<IssueComment>, ClientError> {
        let state = self.record("list_issue_comments");
        if state.fail_list_comments {
            return Err(ClientError::api(502, "comments unavailable"));
        }
        Ok(state
            .comments
            .get(&(key(owner, repo), number))
            .map(|bodies| {
                bodies
                    .iter()
                    .map(|body| IssueComment { body: body.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.record("create_issue_comment");
        if state.fail_post_comment {
            return Err(ClientError::api(403, "commenting disabled"));
        }
        state
            .comments
            .entry((key(owner, repo), number))
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn get_check_runs(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<CheckRunSet, ClientError> {
        let state = self.record("get_check_runs");
        Ok(state.check_runs.get(sha).cloned().unwrap_or_default())
    }

    async fn approve_action_required_runs_for_sha(
        &self,
        _owner: &str,
        _repo: &str,
        _sha: &str,
    ) -> Result<(), ClientError> {
        let state = self.record("approve_action_required_runs_for_sha");
        if state.fail_approve {
            return Err(ClientError::api(403, "approval not permitted"));
        }
        Ok(())
    }

    async fn get_authenticated_user(&self, token: &str) -> Result<String, ClientError> {
        let state = self.record("get_authenticated_user");
        state
            .users
            .get(token)
            .cloned()
            .ok_or_else(|| ClientError::api(401, "Bad credentials"))
    }

    async fn add_collaborator(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
        permission: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.record("add_collaborator");
        if state.fail_add_collaborator {
            return Err(ClientError::api(403, "organisation forbids outside collaborators"));
        }
        state.collaborators.push((
            key(owner, repo),
            username.to_string(),
            permission.to_string(),
        ));
        Ok(())
    }
}
