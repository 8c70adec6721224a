use std::sync::Arc;

use challenge_core::automerge::{AnnouncementStatus, WebhookPayload};
use challenge_core::best_effort::StepOutcome;
use challenge_core::cache::{self, InvalidationCache};
use challenge_core::fake::{merge_sha_for, FakeHostingClient, FAKE_ORG};
use challenge_core::hosting::{CheckRun, CheckRunSet, CheckVerdict, PullRequestView, PullState};
use challenge_core::{AutoMergeEngine, BaseBranchPolicy, EnginePolicy, MergeOutcome, RepoNamePolicy};
use serde_json::json;
use tempfile::TempDir;

const REPO: &str = "challenge-graph-coloring-0a1b2c";
const HEAD_SHA: &str = "head-sha-1";

struct Harness {
    client: Arc<FakeHostingClient>,
    cache: Arc<InvalidationCache>,
    engine: AutoMergeEngine,
    _dir: TempDir,
}

fn harness_with(policy: EnginePolicy) -> Harness {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeHostingClient::new());
    let cache = Arc::new(InvalidationCache::open(dir.path().join("cache.json"), 30.0));
    let engine = AutoMergeEngine::new(client.clone(), cache.clone(), policy);
    Harness {
        client,
        cache,
        engine,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(EnginePolicy::new(FAKE_ORG))
}

fn open_pull(number: u64, base_ref: &str) -> PullRequestView {
    PullRequestView {
        number,
        state: PullState::Open,
        base_ref: base_ref.to_string(),
        head_sha: HEAD_SHA.to_string(),
        author_login: Some("alice".to_string()),
        head_owner_login: Some("alice".to_string()),
        body: Some("Summary (EN): add feature X".to_string()),
        merged: false,
    }
}

fn passing_checks() -> CheckRunSet {
    CheckRunSet(vec![CheckRun::completed_success()])
}

fn seed_cache(cache: &InvalidationCache) {
    cache.set(cache::CHALLENGES_LIST_KEY, json!(["stale"]));
    cache.set(&cache::challenge_detail_key(REPO), json!({"stale": true}));
    cache.set(&cache::submissions_key(REPO), json!([{"number": 1, "state": "open"}]));
}

fn assert_cache_cleared(cache: &InvalidationCache) {
    assert!(cache.get(cache::CHALLENGES_LIST_KEY).is_none());
    assert!(cache.get(&cache::challenge_detail_key(REPO)).is_none());
    assert!(cache.get(&cache::submissions_key(REPO)).is_none());
}

#[tokio::test]
async fn test_success_path_merges_tags_and_announces() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(1, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 1).await.unwrap();

    match &outcome {
        MergeOutcome::Merged {
            sha,
            tag,
            announcement,
        } => {
            assert_eq!(sha.as_str(), merge_sha_for(1));
            let tag = tag.expect("a tag is allocated");
            assert_eq!(tag.tag.name(), "v1");
            assert!(tag.newly_created);
            assert!(matches!(
                announcement,
                Some(StepOutcome::Done(AnnouncementStatus::Posted))
            ));
        }
        other => panic!("expected a merge, got {:?}", other),
    }

    let state = h.client.state();
    assert_eq!(state.merges.len(), 1);
    assert_eq!(state.merges[0].2, "auto-merge: PR #1");
    drop(state);

    assert_eq!(
        h.client.tags(FAKE_ORG, REPO),
        vec![("v1".to_string(), merge_sha_for(1))]
    );

    let comments = h.client.comments(FAKE_ORG, REPO, 1);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].starts_with("<!-- versiontag v1 sha=merge-sha-1 -->"));
    assert!(comments[0].contains("has uploaded version **v1**"));
    assert!(comments[0].contains("add feature X"));
    assert!(comments[0].contains("@alice"));
}

#[tokio::test]
async fn test_second_call_is_idempotent() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(1, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    assert!(h.engine.try_auto_merge(FAKE_ORG, REPO, 1).await.unwrap().merged());
    let second = h.engine.try_auto_merge(FAKE_ORG, REPO, 1).await.unwrap();

    assert!(matches!(second, MergeOutcome::NotOpen));
    assert_eq!(h.client.call_count("merge_pull"), 1);
    assert_eq!(h.client.call_count("create_tag"), 1);
    assert_eq!(h.client.tags(FAKE_ORG, REPO).len(), 1);
    assert_eq!(h.client.comments(FAKE_ORG, REPO, 1).len(), 1);
}

#[tokio::test]
async fn test_existing_tag_on_merge_sha_is_not_recreated() {
    let h = harness();
    // A previous delivery merged and tagged, but the PR still reads as open.
    h.client.add_pull(FAKE_ORG, REPO, open_pull(1, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());
    h.client.add_tag(FAKE_ORG, REPO, "v1", &merge_sha_for(1));
    h.client.add_comment(
        FAKE_ORG,
        REPO,
        1,
        "<!-- versiontag v1 sha=merge-sha-1 -->\nearlier announcement",
    );

    let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 1).await.unwrap();

    match outcome {
        MergeOutcome::Merged {
            tag, announcement, ..
        } => {
            let tag = tag.unwrap();
            assert_eq!(tag.tag.name(), "v1");
            assert!(!tag.newly_created);
            assert!(matches!(
                announcement,
                Some(StepOutcome::Done(AnnouncementStatus::AlreadyPresent))
            ));
        }
        other => panic!("expected a merge, got {:?}", other),
    }
    assert_eq!(h.client.call_count("create_tag"), 0);
    assert_eq!(h.client.call_count("create_issue_comment"), 0);
    assert_eq!(h.client.comments(FAKE_ORG, REPO, 1).len(), 1);
}

#[tokio::test]
async fn test_wrong_base_is_never_merged() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(2, "main"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 2).await.unwrap();
    assert!(matches!(
        outcome,
        MergeOutcome::IneligibleBase { ref base_ref } if base_ref == "main"
    ));

    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "opened",
        "repository": {"name": REPO, "owner": {"login": FAKE_ORG}},
        "pull_request": {"number": 2}
    }))
    .unwrap();
    let result = h.engine.process("pull_request", &payload).await.unwrap();
    assert!(result.processed);
    assert!(!result.merged);
    assert_eq!(h.client.call_count("merge_pull"), 0);
}

#[tokio::test]
async fn test_default_branch_policy_allows_main() {
    let mut policy = EnginePolicy::new(FAKE_ORG);
    policy.base_branches = BaseBranchPolicy::DefaultBranch("main".to_string());
    let h = harness_with(policy);
    h.client.add_pull(FAKE_ORG, REPO, open_pull(2, "main"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    assert!(h.engine.try_auto_merge(FAKE_ORG, REPO, 2).await.unwrap().merged());
}

#[tokio::test]
async fn test_empty_check_set_blocks_merge() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(3, "version/v1"));

    let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 3).await.unwrap();
    assert!(matches!(
        outcome,
        MergeOutcome::ChecksNotPassed(CheckVerdict::NoRuns)
    ));
    assert_eq!(h.client.call_count("merge_pull"), 0);
}

#[tokio::test]
async fn test_any_unsuccessful_run_blocks_merge() {
    let cases = [
        (
            vec![CheckRun::completed_success(), CheckRun::new("in_progress", None)],
            CheckVerdict::Pending,
        ),
        (vec![CheckRun::new("queued", None)], CheckVerdict::Pending),
        (
            vec![
                CheckRun::completed_success(),
                CheckRun::new("completed", Some("failure")),
            ],
            CheckVerdict::Failed,
        ),
        (
            vec![CheckRun::new("completed", Some("cancelled"))],
            CheckVerdict::Failed,
        ),
    ];

    for (runs, expected) in cases {
        let h = harness();
        h.client.add_pull(FAKE_ORG, REPO, open_pull(4, "version/v2"));
        h.client.set_check_runs(HEAD_SHA, CheckRunSet(runs));

        let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 4).await.unwrap();
        assert!(
            matches!(&outcome, MergeOutcome::ChecksNotPassed(v) if *v == expected),
            "unexpected outcome {:?}",
            outcome
        );
        assert_eq!(h.client.call_count("merge_pull"), 0);
    }
}

#[tokio::test]
async fn test_action_required_runs_are_approved_best_effort() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(5, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());
    h.client.state().fail_approve = true;

    assert!(h.engine.try_auto_merge(FAKE_ORG, REPO, 5).await.unwrap().merged());
    assert_eq!(
        h.client.call_count("approve_action_required_runs_for_sha"),
        1
    );
}

#[tokio::test]
async fn test_approval_can_be_disabled() {
    let mut policy = EnginePolicy::new(FAKE_ORG);
    policy.approve_action_required = false;
    let h = harness_with(policy);
    h.client.add_pull(FAKE_ORG, REPO, open_pull(5, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    h.engine.try_auto_merge(FAKE_ORG, REPO, 5).await.unwrap();
    assert_eq!(
        h.client.call_count("approve_action_required_runs_for_sha"),
        0
    );
}

#[tokio::test]
async fn test_merge_failure_reports_not_merged() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(6, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());
    h.client.state().fail_merge = true;

    let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 6).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::MergeFailed { .. }));
    assert!(!outcome.merged());
    assert_eq!(h.client.call_count("create_tag"), 0);
}

#[tokio::test]
async fn test_missing_pull_is_a_hard_error() {
    let h = harness();
    let err = h.engine.try_auto_merge(FAKE_ORG, REPO, 99).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_comment_failures_do_not_undo_the_merge() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(7, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());
    {
        let mut state = h.client.state();
        state.fail_list_comments = true;
        state.fail_post_comment = true;
    }

    let outcome = h.engine.try_auto_merge(FAKE_ORG, REPO, 7).await.unwrap();
    match outcome {
        MergeOutcome::Merged {
            tag, announcement, ..
        } => {
            assert!(tag.is_some());
            assert!(matches!(
                announcement,
                Some(StepOutcome::SoftFailure {
                    step: "post announcement",
                    ..
                })
            ));
        }
        other => panic!("expected a merge, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unlisted_comments_count_as_none() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(8, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());
    h.client.state().fail_list_comments = true;

    h.engine.try_auto_merge(FAKE_ORG, REPO, 8).await.unwrap();
    assert_eq!(h.client.comments(FAKE_ORG, REPO, 8).len(), 1);
}

#[tokio::test]
async fn test_missing_summary_posts_reminder() {
    let h = harness();
    let mut pull = open_pull(9, "version/v1");
    pull.body = None;
    pull.author_login = None;
    h.client.add_pull(FAKE_ORG, REPO, pull);
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    h.engine.try_auto_merge(FAKE_ORG, REPO, 9).await.unwrap();
    let comments = h.client.comments(FAKE_ORG, REPO, 9);
    assert!(comments[0].contains("unknown has uploaded version **v1**"));
    assert!(comments[0].contains("No English summary"));
}

#[tokio::test]
async fn test_sequential_merges_get_increasing_tags() {
    let h = harness();
    for number in 1..=3 {
        let mut pull = open_pull(number, "version/v1");
        pull.head_sha = format!("head-{}", number);
        h.client.add_pull(FAKE_ORG, REPO, pull);
        h.client
            .set_check_runs(&format!("head-{}", number), passing_checks());
    }

    for number in 1..=3 {
        assert!(h
            .engine
            .try_auto_merge(FAKE_ORG, REPO, number)
            .await
            .unwrap()
            .merged());
    }

    assert_eq!(
        h.client.tags(FAKE_ORG, REPO),
        vec![
            ("v1".to_string(), merge_sha_for(1)),
            ("v2".to_string(), merge_sha_for(2)),
            ("v3".to_string(), merge_sha_for(3)),
        ]
    );
}

#[tokio::test]
async fn test_unmanaged_repository_is_ignored() {
    let h = harness();
    seed_cache(&h.cache);
    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "opened",
        "repository": {"name": "website", "owner": {"login": FAKE_ORG}},
        "pull_request": {"number": 1}
    }))
    .unwrap();

    let result = h.engine.process("pull_request", &payload).await.unwrap();
    assert_eq!(result.action, "opened");
    assert!(!result.processed);
    assert!(!result.merged);
    assert!(h.client.state().calls.is_empty());
    assert!(h.cache.get(cache::CHALLENGES_LIST_KEY).is_some());
}

#[tokio::test]
async fn test_check_suite_event_evaluates_each_distinct_pull() {
    let h = harness();
    seed_cache(&h.cache);
    h.client.add_pull(FAKE_ORG, REPO, open_pull(1, "main"));
    let mut second = open_pull(2, "version/v1");
    second.head_sha = "head-2".to_string();
    h.client.add_pull(FAKE_ORG, REPO, second);
    h.client.set_check_runs("head-2", passing_checks());

    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "completed",
        "repository": {"name": REPO, "owner": {"login": FAKE_ORG}},
        "check_run": {"pull_requests": [{"number": 1}, {"number": 2}]},
        "check_suite": {"pull_requests": [{"number": 2}]}
    }))
    .unwrap();

    let result = h.engine.process("check_run", &payload).await.unwrap();
    assert!(result.processed);
    assert!(result.merged);
    assert_eq!(h.client.call_count("get_pull"), 2);
    assert_eq!(h.client.call_count("merge_pull"), 1);
    assert_cache_cleared(&h.cache);
}

#[tokio::test]
async fn test_unreadable_pull_does_not_stop_its_siblings() {
    let h = harness();
    seed_cache(&h.cache);
    for (number, sha) in [(3, "head-3"), (7, "head-7")] {
        let mut pull = open_pull(number, "version/v1");
        pull.head_sha = sha.to_string();
        h.client.add_pull(FAKE_ORG, REPO, pull);
        h.client.set_check_runs(sha, passing_checks());
    }

    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "completed",
        "repository": {"name": REPO, "owner": {"login": FAKE_ORG}},
        "check_suite": {"pull_requests": [{"number": 3}, {"number": 99}, {"number": 7}]}
    }))
    .unwrap();

    let result = h.engine.process("check_suite", &payload).await.unwrap();
    assert!(result.processed);
    assert!(result.merged);
    assert_eq!(h.client.call_count("get_pull"), 3);
    assert_eq!(h.client.call_count("merge_pull"), 2);
    assert_eq!(
        h.client.pull(FAKE_ORG, REPO, 7).map(|p| p.state),
        Some(PullState::Closed)
    );
    assert_eq!(h.client.tags(FAKE_ORG, REPO).len(), 2);
    assert_cache_cleared(&h.cache);
}

#[tokio::test]
async fn test_check_event_error_without_merge_still_invalidates() {
    let h = harness();
    seed_cache(&h.cache);
    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "completed",
        "repository": {"name": REPO, "owner": {"login": FAKE_ORG}},
        "check_run": {"pull_requests": [{"number": 99}]}
    }))
    .unwrap();

    let err = h.engine.process("check_run", &payload).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_cache_cleared(&h.cache);
}

#[tokio::test]
async fn test_closed_event_reports_payload_merged_flag() {
    let h = harness();
    seed_cache(&h.cache);
    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "closed",
        "repository": {"name": REPO},
        "pull_request": {"number": 1, "merged": true}
    }))
    .unwrap();

    let result = h.engine.process("pull_request", &payload).await.unwrap();
    assert!(result.processed);
    assert!(result.merged);
    assert!(h.client.state().calls.is_empty());
    assert!(h.cache.get(cache::CHALLENGES_LIST_KEY).is_none());
}

#[tokio::test]
async fn test_other_events_are_acknowledged() {
    let h = harness();
    seed_cache(&h.cache);
    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "created",
        "repository": {"name": REPO, "owner": {"login": FAKE_ORG}}
    }))
    .unwrap();

    let result = h.engine.process("issue_comment", &payload).await.unwrap();
    assert!(result.processed);
    assert!(!result.merged);
    assert!(h.cache.get(&cache::challenge_detail_key(REPO)).is_none());
}

#[tokio::test]
async fn test_owner_falls_back_to_configured_org() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(1, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());

    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "synchronize",
        "repository": {"name": REPO},
        "pull_request": {"number": 1}
    }))
    .unwrap();

    let result = h.engine.process("pull_request", &payload).await.unwrap();
    assert!(result.merged);
}

#[tokio::test]
async fn test_evaluate_pull() {
    let h = harness();
    h.client.add_pull(FAKE_ORG, REPO, open_pull(1, "version/v1"));
    h.client.set_check_runs(HEAD_SHA, passing_checks());
    seed_cache(&h.cache);

    let result = h.engine.evaluate_pull(FAKE_ORG, REPO, 1).await.unwrap();
    assert!(result.processed);
    assert!(result.merged);
    assert_cache_cleared(&h.cache);

    let result = h
        .engine
        .evaluate_pull(FAKE_ORG, "not-a-challenge", 1)
        .await
        .unwrap();
    assert!(!result.processed);
}

#[tokio::test]
async fn test_suffix_naming_policy() {
    let mut policy = EnginePolicy::new(FAKE_ORG);
    policy.repo_names = RepoNamePolicy::Suffix("skill".to_string());
    let h = harness_with(policy);

    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "closed",
        "repository": {"name": REPO},
        "pull_request": {"number": 1, "merged": false}
    }))
    .unwrap();
    assert!(!h.engine.process("pull_request", &payload).await.unwrap().processed);

    let payload: WebhookPayload = serde_json::from_value(json!({
        "action": "closed",
        "repository": {"name": "abacus-skill"},
        "pull_request": {"number": 1, "merged": false}
    }))
    .unwrap();
    assert!(h.engine.process("pull_request", &payload).await.unwrap().processed);
}

#[test]
fn test_signature_bypass_and_rejection() {
    let h = harness();
    assert!(h.engine.verify_signature(b"{}", ""));

    let mut policy = EnginePolicy::new(FAKE_ORG);
    policy.webhook_secret = Some("s3cret".to_string());
    let h = harness_with(policy);
    assert!(!h.engine.verify_signature(b"{}", "sha256=0000"));
    assert!(h.engine.verify_signature(
        b"{}",
        &challenge_core::signature::compute_signature("s3cret", b"{}")
    ));
}
