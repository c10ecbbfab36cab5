//! Repository monitor: the poll loop of one repository.
//!
//! Each cycle discovers the revisions worth testing (mainline plus open
//! change requests, or a single pinned request), reconciles them against the
//! tested-table and dispatches what is new or changed. The tested-table is
//! owned by the monitor and only the monitor's own task mutates it.

use crate::config::ValidatedRepo;
use crate::dispatch::DispatchPolicy;
use crate::error::{ConfigError, Ineligible, Result};
use crate::obs;
use crate::orchestrator::RevisionTester;
use crate::provider::SourceProvider;
use crate::revision::{
    change_request_identity, Branch, ChangeRequest, ChangeRequestConfig, Revision,
};
use localci_stages::PipelineReport;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

/// Last revision processed for one identity.
#[derive(Debug, Clone)]
struct TestedEntry {
    revision: Arc<dyn Revision>,
    in_flight: Arc<AtomicBool>,
}

/// In-memory map from revision identity to the last revision processed.
#[derive(Debug, Default)]
pub struct TestedRevisions {
    entries: HashMap<String, TestedEntry>,
}

impl TestedRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<dyn Revision>> {
        self.entries.get(identity).map(|e| &e.revision)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a test for `identity` is still running.
    pub fn is_being_tested(&self, identity: &str) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|e| e.in_flight.load(Ordering::SeqCst))
    }

    /// Record `revision`, replacing any previous entry with the same identity.
    pub fn record(&mut self, revision: Arc<dyn Revision>, in_flight: Arc<AtomicBool>) {
        self.entries.insert(
            revision.identity(),
            TestedEntry {
                revision,
                in_flight,
            },
        );
    }

    /// Drop entries missing from `discovered` unless they are mid-test.
    /// Returns the evicted identities.
    pub fn evict_missing(&mut self, discovered: &HashSet<String>) -> Vec<String> {
        let mut evicted = Vec::new();
        self.entries.retain(|identity, entry| {
            let keep =
                discovered.contains(identity) || entry.in_flight.load(Ordering::SeqCst);
            if !keep {
                evicted.push(identity.clone());
            }
            keep
        });
        evicted
    }
}

/// Clears the in-flight marker when the test task ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Candidates found by one discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// In discovery order: mainline first, then change requests.
    pub candidates: Vec<Arc<dyn Revision>>,

    /// Identities known to still exist: every candidate plus the revisions
    /// whose fetch failed this cycle.
    pub present: HashSet<String>,

    /// False when the open change requests could not be listed, in which
    /// case `present` may be missing requests that are still open.
    pub listing_complete: bool,
}

impl Discovery {
    fn push(&mut self, candidate: Arc<dyn Revision>) {
        self.present.insert(candidate.identity());
        self.candidates.push(candidate);
    }
}

/// What reconciliation decided for one candidate.
#[derive(Debug)]
pub enum Decision {
    AlreadyRunning,
    Unchanged,
    Ineligible(Ineligible),
    Dispatch,
}

/// Watches one repository and dispatches tests for new revisions.
#[derive(Debug)]
pub struct RepositoryMonitor {
    repo: Arc<ValidatedRepo>,
    provider: Arc<dyn SourceProvider>,
    tester: Arc<RevisionTester>,
    policy: DispatchPolicy,
    cr_config: Arc<ChangeRequestConfig>,
    tested: TestedRevisions,
    running: Vec<JoinHandle<()>>,
}

impl RepositoryMonitor {
    /// A monitor pinned to one change request always dispatches serialized.
    pub fn new(tester: RevisionTester, policy: DispatchPolicy) -> Self {
        let repo = tester.repo().clone();
        let provider = tester.provider().clone();
        let policy = if repo.pinned_pr.is_some() {
            policy.pinned()
        } else {
            policy
        };
        Self {
            cr_config: Arc::new(repo.change_request_config()),
            repo,
            provider,
            tester: Arc::new(tester),
            policy,
            tested: TestedRevisions::new(),
            running: Vec::new(),
        }
    }

    pub fn tested(&self) -> &TestedRevisions {
        &self.tested
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    async fn fetch_change_request(&self, number: u64) -> Result<Arc<dyn Revision>> {
        let cr = ChangeRequest::fetch(self.provider.clone(), number, self.cr_config.clone()).await?;
        Ok(Arc::new(cr))
    }

    /// Collect this cycle's candidates. Failures are logged and skipped.
    pub async fn discover(&self) -> Discovery {
        let mut discovery = Discovery {
            listing_complete: true,
            ..Default::default()
        };

        match Branch::fetch(self.provider.clone(), &self.repo.master_branch).await {
            Ok(branch) => discovery.push(Arc::new(branch)),
            Err(e) => {
                obs::emit_discovery_failed(&format!("branch {}", self.repo.master_branch), &e);
                discovery.present.insert(self.repo.master_branch.clone());
            }
        }

        let numbers = match self.repo.pinned_pr {
            Some(number) => vec![number],
            None => match self.provider.list_open_change_requests().await {
                Ok(numbers) => numbers,
                Err(e) => {
                    obs::emit_discovery_failed("open change requests", &e);
                    discovery.listing_complete = false;
                    Vec::new()
                }
            },
        };

        for number in numbers {
            match self.fetch_change_request(number).await {
                Ok(cr) => discovery.push(cr),
                Err(e) => {
                    obs::emit_discovery_failed(&format!("change request {number}"), &e);
                    discovery.present.insert(change_request_identity(number));
                }
            }
        }

        discovery
    }

    /// Decide whether `candidate` should be dispatched.
    pub fn decide(&self, candidate: &dyn Revision) -> Decision {
        let identity = candidate.identity();
        if self.tested.is_being_tested(&identity) {
            return Decision::AlreadyRunning;
        }
        if self
            .tested
            .get(&identity)
            .is_some_and(|tested| tested.equal(candidate))
        {
            return Decision::Unchanged;
        }
        match candidate.is_eligible() {
            Ok(()) => Decision::Dispatch,
            Err(reason) => Decision::Ineligible(reason),
        }
    }

    /// Reconcile `discovery` against the tested-table and dispatch.
    /// Returns the identities dispatched, in dispatch order.
    ///
    /// Entries are evicted only when the open change requests were listed.
    pub async fn reconcile(&mut self, discovery: Discovery) -> Vec<String> {
        if discovery.listing_complete {
            for identity in self.tested.evict_missing(&discovery.present) {
                debug!(revision = %identity, "Evicted from tested revisions");
            }
        }

        let mut dispatched = Vec::new();
        for candidate in discovery.candidates {
            let identity = candidate.identity();
            match self.decide(candidate.as_ref()) {
                Decision::AlreadyRunning => {
                    obs::emit_revision_skipped(&identity, "being tested")
                }
                Decision::Unchanged => obs::emit_revision_skipped(&identity, "already tested"),
                Decision::Ineligible(e) => obs::emit_revision_ineligible(&identity, &e.reason),
                Decision::Dispatch => {
                    self.dispatch(candidate).await;
                    dispatched.push(identity);
                }
            }
        }
        dispatched
    }

    /// Record `revision` as being tested and hand it to the dispatch policy.
    ///
    /// The entry is recorded before the test starts and stays recorded when
    /// the test fails, so an unchanged revision is not retested next cycle.
    async fn dispatch(&mut self, revision: Arc<dyn Revision>) {
        obs::emit_revision_dispatched(&revision.identity(), revision.fingerprint());

        let in_flight = Arc::new(AtomicBool::new(true));
        self.tested.record(revision.clone(), in_flight.clone());

        let guard = InFlightGuard(in_flight);
        let tester = self.tester.clone();
        let test = async move {
            let _guard = guard;
            // Errors are already logged by the tester.
            let _ = tester.dispatch(revision).await;
        }
        .in_current_span();

        if let Some(handle) = self.policy.dispatch(test).await {
            self.running.push(handle);
        }
    }

    /// One discover and reconcile cycle.
    pub async fn poll_once(&mut self) -> Vec<String> {
        self.running.retain(|handle| !handle.is_finished());
        let discovery = self.discover().await;
        self.reconcile(discovery).await
    }

    /// Wait for every concurrently dispatched test to finish.
    pub async fn wait_for_dispatches(&mut self) {
        for handle in self.running.drain(..) {
            let _ = handle.await;
        }
    }

    /// Poll forever, sleeping the refresh interval between cycles.
    pub async fn run(mut self) {
        let span = obs::repo_span(&self.repo.url);
        async move {
            debug!(refresh = ?self.repo.refresh, mode = ?self.policy.mode(), "Monitoring repository");
            loop {
                let dispatched = self.poll_once().await;
                debug!(dispatched = dispatched.len(), "Poll cycle finished");
                tokio::time::sleep(self.repo.refresh).await;
            }
        }
        .instrument(span)
        .await
    }

    /// Test the pinned change request once, without the eligibility gate.
    pub async fn test_pinned(&self) -> Result<PipelineReport> {
        let number = self.repo.pinned_pr.ok_or(ConfigError::MissingPullRequest)?;
        let cr = self.fetch_change_request(number).await?;
        self.tester
            .dispatch(cr)
            .instrument(obs::repo_span(&self.repo.url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::fakes::{CountingProvisioner, FakeProvider};
    use crate::provider::ChangeRequestInfo;

    fn request(number: u64, head: &str) -> ChangeRequestInfo {
        ChangeRequestInfo {
            number,
            head_commit: head.to_string(),
            base_branch: "master".to_string(),
            author: "alice".to_string(),
            comments: Vec::new(),
        }
    }

    fn monitor(provider: Arc<FakeProvider>, log_dir: &std::path::Path) -> RepositoryMonitor {
        let mut config = RepoConfig::new(
            "https://github.com/org/project",
            vec!["true".to_string()],
        );
        config.log_dir = log_dir.to_path_buf();
        let repo = Arc::new(config.validate().unwrap());
        let tester = RevisionTester::new(repo, provider, Arc::new(CountingProvisioner::new()));
        RepositoryMonitor::new(tester, DispatchPolicy::serialized())
    }

    #[test]
    fn test_in_flight_guard_clears_marker() {
        let flag = Arc::new(AtomicBool::new(true));
        drop(InFlightGuard(flag.clone()));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_discover_orders_mainline_first() {
        let logs = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new());
        provider.set_branch("master", "m1");
        provider.open_request(request(7, "a"));
        provider.open_request(request(3, "b"));
        let monitor = monitor(provider, logs.path());

        let discovery = monitor.discover().await;
        let ids: Vec<_> = discovery.candidates.iter().map(|c| c.identity()).collect();
        assert!(discovery.listing_complete);
        assert_eq!(ids, vec!["master", "pr-7", "pr-3"]);
    }

    #[tokio::test]
    async fn test_discover_skips_broken_request() {
        let logs = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new());
        provider.set_branch("master", "m1");
        provider.open_request(request(1, "a"));
        provider.open_request(request(2, "b"));
        provider.break_request(1);
        let monitor = monitor(provider, logs.path());

        let discovery = monitor.discover().await;
        let ids: Vec<_> = discovery.candidates.iter().map(|c| c.identity()).collect();
        assert!(discovery.listing_complete);
        assert_eq!(ids, vec!["master", "pr-2"]);
        assert!(discovery.present.contains("pr-1"));
    }

    #[tokio::test]
    async fn test_discover_survives_branch_failure() {
        let logs = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new());
        provider.open_request(request(4, "a"));
        provider.fail_branch_fetch(true);
        let monitor = monitor(provider, logs.path());

        let discovery = monitor.discover().await;
        let ids: Vec<_> = discovery.candidates.iter().map(|c| c.identity()).collect();
        assert_eq!(ids, vec!["pr-4"]);
        assert!(discovery.present.contains("master"));
        assert!(discovery.listing_complete);
    }

    #[tokio::test]
    async fn test_incomplete_discovery_keeps_entries() {
        let logs = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new());
        provider.set_branch("master", "m1");
        provider.open_request(request(5, "a"));
        let mut monitor = monitor(provider.clone(), logs.path());

        monitor.poll_once().await;
        assert!(monitor.tested().get("pr-5").is_some());

        provider.fail_listing(true);
        monitor.poll_once().await;
        assert!(monitor.tested().get("pr-5").is_some());
    }

    /// Test: a failed fetch keeps its own entry without blocking other evictions
    #[tokio::test]
    async fn test_broken_request_does_not_block_eviction() {
        let logs = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new());
        provider.set_branch("master", "m1");
        provider.open_request(request(1, "a"));
        provider.open_request(request(2, "b"));
        let mut monitor = monitor(provider.clone(), logs.path());

        monitor.poll_once().await;
        assert_eq!(monitor.tested().len(), 3);

        provider.break_request(1);
        provider.close_request(2);
        provider.fail_branch_fetch(true);
        monitor.poll_once().await;

        assert!(monitor.tested().get("pr-1").is_some());
        assert!(monitor.tested().get("master").is_some());
        assert!(monitor.tested().get("pr-2").is_none());
    }
}
