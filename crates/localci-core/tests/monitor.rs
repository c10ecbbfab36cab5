//! Reconciliation tests for the repository monitor against in-memory fakes.

use localci_core::fakes::{CountingProvisioner, FakeProvider};
use localci_core::{
    ChangeRequestInfo, CiError, ConfigError, DispatchMode, DispatchPolicy, RepoConfig,
    RepositoryMonitor, Revision, RevisionTester,
};
use std::path::Path;
use std::sync::Arc;

fn request(number: u64, head: &str, author: &str) -> ChangeRequestInfo {
    ChangeRequestInfo {
        number,
        head_commit: head.to_string(),
        base_branch: "master".to_string(),
        author: author.to_string(),
        comments: Vec::new(),
    }
}

fn repo_config(logs: &Path, run: &[&str]) -> RepoConfig {
    let mut config = RepoConfig::new(
        "https://github.com/fake/project",
        run.iter().map(|c| c.to_string()).collect(),
    );
    config.log_dir = logs.to_path_buf();
    config
}

/// A run command that blocks until the returned gate file is removed.
fn gated_command() -> (tempfile::TempDir, std::path::PathBuf, String) {
    let dir = tempfile::tempdir().unwrap();
    let gate = dir.path().join("gate");
    std::fs::write(&gate, "").unwrap();
    let command = format!("while [ -e '{}' ]; do sleep 0.05; done", gate.display());
    (dir, gate, command)
}

fn monitor_with(
    config: RepoConfig,
    provider: &Arc<FakeProvider>,
    provisioner: &CountingProvisioner,
    policy: DispatchPolicy,
) -> RepositoryMonitor {
    let repo = Arc::new(config.validate().unwrap());
    let tester = RevisionTester::new(repo, provider.clone(), Arc::new(provisioner.clone()));
    RepositoryMonitor::new(tester, policy)
}

/// Test: a branch that passed is recorded at its fingerprint and not retested
#[tokio::test]
async fn test_unchanged_revision_is_not_retested() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &["echo pass"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    assert_eq!(monitor.poll_once().await, vec!["master"]);
    let tested = monitor.tested().get("master").expect("master recorded");
    assert_eq!(tested.fingerprint(), "c1");
    assert!(!monitor.tested().is_being_tested("master"));

    assert!(monitor.poll_once().await.is_empty());
    assert_eq!(provisioner.provisioned(), 1);
    assert_eq!(provider.downloads(), vec!["c1"]);

    let run_log = std::fs::read_to_string(logs.path().join("master/run.log")).unwrap();
    assert!(run_log.contains("pass"));
}

/// Test: a new fingerprint for a known identity is tested again
#[tokio::test]
async fn test_changed_revision_is_retested() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(4, "p1", "alice"));
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &["true"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    assert_eq!(monitor.poll_once().await, vec!["master", "pr-4"]);

    provider.open_request(request(4, "p2", "alice"));
    assert_eq!(monitor.poll_once().await, vec!["pr-4"]);
    assert_eq!(monitor.tested().get("pr-4").unwrap().fingerprint(), "p2");
    assert_eq!(provider.downloads(), vec!["c1", "p1", "p2"]);
}

/// Test: a failing revision is recorded and not retested while unchanged
#[tokio::test]
async fn test_failing_revision_is_recorded() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &["false"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    monitor.poll_once().await;
    assert!(monitor.tested().get("master").is_some());
    assert!(monitor.poll_once().await.is_empty());
    assert_eq!(provisioner.provisioned(), 1);
}

/// Test: a revision whose download fails is recorded, its environment released
#[tokio::test]
async fn test_download_failure_is_recorded_and_released() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.fail_downloads(true);
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &["true"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    assert_eq!(monitor.poll_once().await, vec!["master"]);
    assert_eq!(provisioner.provisioned(), 1);
    assert_eq!(provisioner.released(), 1);
    assert!(!logs.path().join("master/run.log").exists());

    assert!(monitor.poll_once().await.is_empty());
    assert_eq!(provisioner.provisioned(), 1);
}

/// Test: a revision still running is not dispatched a second time
#[tokio::test]
async fn test_in_flight_revision_is_skipped() {
    let logs = tempfile::tempdir().unwrap();
    let (_gate_dir, gate, command) = gated_command();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &[command.as_str()]),
        &provider,
        &provisioner,
        DispatchPolicy::concurrent(),
    );

    assert_eq!(monitor.poll_once().await, vec!["master"]);
    assert!(monitor.tested().is_being_tested("master"));

    provider.set_branch("master", "c2");
    assert!(monitor.poll_once().await.is_empty());

    std::fs::remove_file(&gate).unwrap();
    monitor.wait_for_dispatches().await;
    assert!(!monitor.tested().is_being_tested("master"));
    assert_eq!(monitor.poll_once().await, vec!["master"]);
    monitor.wait_for_dispatches().await;
    assert_eq!(provisioner.provisioned(), 2);
    assert_eq!(provisioner.released(), 2);
}

/// Test: a closed change request ages out of the tested-table
#[tokio::test]
async fn test_closed_request_is_evicted() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(8, "p1", "alice"));
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &["true"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    monitor.poll_once().await;
    assert_eq!(monitor.tested().len(), 2);

    provider.close_request(8);
    monitor.poll_once().await;
    assert!(monitor.tested().get("pr-8").is_none());
    assert!(monitor.tested().get("master").is_some());
}

/// Test: a request that cannot be fetched does not keep closed requests alive
#[tokio::test]
async fn test_closed_request_evicted_next_to_broken_one() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(1, "p1", "alice"));
    provider.open_request(request(2, "p2", "alice"));
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &["true"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    assert_eq!(monitor.poll_once().await, vec!["master", "pr-1", "pr-2"]);

    provider.break_request(1);
    provider.close_request(2);
    assert!(monitor.poll_once().await.is_empty());

    assert!(monitor.tested().get("pr-2").is_none());
    assert!(monitor.tested().get("pr-1").is_some());
    assert_eq!(monitor.tested().len(), 2);
}

/// Test: a closed change request that is still being tested stays tracked
#[tokio::test]
async fn test_closed_request_mid_test_is_kept() {
    let logs = tempfile::tempdir().unwrap();
    let (_gate_dir, gate, command) = gated_command();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(8, "p1", "alice"));
    let provisioner = CountingProvisioner::new();
    let mut monitor = monitor_with(
        repo_config(logs.path(), &[command.as_str()]),
        &provider,
        &provisioner,
        DispatchPolicy::concurrent(),
    );

    monitor.poll_once().await;
    provider.close_request(8);
    monitor.poll_once().await;
    assert!(monitor.tested().get("pr-8").is_some());

    std::fs::remove_file(&gate).unwrap();
    monitor.wait_for_dispatches().await;
    monitor.poll_once().await;
    assert!(monitor.tested().get("pr-8").is_none());
}

/// Test: a request from an author outside the whitelist is never dispatched
#[tokio::test]
async fn test_non_whitelisted_author_is_not_dispatched() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(2, "p1", "mallory"));
    let provisioner = CountingProvisioner::new();
    let mut config = repo_config(logs.path(), &["true"]);
    config.whitelist = "alice, bob".to_string();
    let mut monitor = monitor_with(config, &provider, &provisioner, DispatchPolicy::serialized());

    assert_eq!(monitor.poll_once().await, vec!["master"]);
    assert!(monitor.tested().get("pr-2").is_none());
    assert_eq!(provider.downloads(), vec!["c1"]);
}

/// Test: failing and passing requests get the matching comment
#[tokio::test]
async fn test_results_are_posted_to_requests() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(1, "good", "alice"));
    provider.open_request(request(2, "bad", "alice"));
    let provisioner = CountingProvisioner::new();
    let mut config = repo_config(logs.path(), &["grep -q good REVISION"]);
    config.post_on_success = "tests passed".to_string();
    config.post_on_failure = "tests failed".to_string();
    let mut monitor = monitor_with(config, &provider, &provisioner, DispatchPolicy::serialized());

    monitor.poll_once().await;

    assert_eq!(
        provider.posted_comments(),
        vec![
            (1, "tests passed".to_string()),
            (2, "tests failed".to_string())
        ]
    );
}

/// Test: a pinned monitor only looks at its request and always serializes
#[tokio::test]
async fn test_pinned_request_monitoring() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.set_branch("master", "c1");
    provider.open_request(request(3, "p1", "alice"));
    provider.open_request(request(5, "p2", "alice"));
    let provisioner = CountingProvisioner::new();
    let mut config = repo_config(logs.path(), &["true"]);
    config.pr = 5;
    let mut monitor = monitor_with(config, &provider, &provisioner, DispatchPolicy::concurrent());

    assert_eq!(monitor.policy().mode(), DispatchMode::Serialized);
    assert_eq!(monitor.poll_once().await, vec!["master", "pr-5"]);
}

/// Test: single-shot mode tests the pinned request regardless of the gate
#[tokio::test]
async fn test_pinned_single_shot_bypasses_gate() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.open_request(request(6, "p1", "mallory"));
    let provisioner = CountingProvisioner::new();
    let mut config = repo_config(logs.path(), &["test -f REVISION"]);
    config.pr = 6;
    config.whitelist = "alice".to_string();
    let monitor = monitor_with(config, &provider, &provisioner, DispatchPolicy::serialized());

    let report = monitor.test_pinned().await.unwrap();
    assert!(report.success);
    assert_eq!(provisioner.released(), 1);
}

/// Test: single-shot mode needs a pinned request
#[tokio::test]
async fn test_single_shot_requires_pinned_request() {
    let logs = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider::new());
    let provisioner = CountingProvisioner::new();
    let monitor = monitor_with(
        repo_config(logs.path(), &["true"]),
        &provider,
        &provisioner,
        DispatchPolicy::serialized(),
    );

    let err = monitor.test_pinned().await.unwrap_err();
    assert!(matches!(
        err,
        CiError::Config(ConfigError::MissingPullRequest)
    ));
}
