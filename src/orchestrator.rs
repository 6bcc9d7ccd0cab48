use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::RepoSettings;
use crate::filter::filter_unseen;
use crate::github::PullSource;
use crate::mailer::{Email, Mailer};
use crate::models::{grouped_payload, Status};
use crate::state::SeenSet;
use crate::template;

/// Totals for one run across all configured repositories
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub notifications_sent: usize,
    pub failures: usize,
}

/// One message to dispatch: its template payload and the pull-request
/// numbers to record once it has been handed to the mailer.
struct Unit {
    payload: Value,
    numbers: Vec<u64>,
}

/// Drives one polling run: fetch, filter, notify, record.
pub struct Orchestrator<S: PullSource, M: Mailer> {
    source: S,
    mailer: M,
}

impl<S: PullSource, M: Mailer> Orchestrator<S, M> {
    pub fn new(source: S, mailer: M) -> Self {
        Self { source, mailer }
    }

    /// Process every configured repository in order, "open" before
    /// "closed". Failures are isolated per repository/status/unit: they are
    /// logged and counted, never aborting the rest of the run.
    pub async fn run(&self, repositories: &[(String, RepoSettings)]) -> RunSummary {
        let mut summary = RunSummary::default();

        for (repository, settings) in repositories {
            // Without a trustworthy seen-set we cannot dedupe; skip the
            // whole repository rather than re-notify everything.
            let mut seen = match SeenSet::load(&settings.state_dir, repository) {
                Ok(seen) => seen,
                Err(e) => {
                    error!(repository, error = %e, "Cannot load seen-set state, skipping repository");
                    summary.failures += 1;
                    continue;
                }
            };

            self.process_status(repository, settings, Status::Open, &mut seen, &mut summary)
                .await;

            if settings.alert_on_close {
                self.process_status(repository, settings, Status::Closed, &mut seen, &mut summary)
                    .await;
            }
        }

        info!(
            sent = summary.notifications_sent,
            failures = summary.failures,
            "Run complete"
        );

        summary
    }

    async fn process_status(
        &self,
        repository: &str,
        settings: &RepoSettings,
        status: Status,
        seen: &mut SeenSet,
        summary: &mut RunSummary,
    ) {
        let pulls = match self.source.pulls(repository, status).await {
            Ok(pulls) => pulls,
            Err(e) => {
                error!(repository, status = %status, error = %e, "Fetch failed");
                summary.failures += 1;
                return;
            }
        };

        if pulls.is_empty() {
            debug!(repository, status = %status, "No pull requests");
            return;
        }

        let unseen = filter_unseen(seen, status, &pulls);
        if unseen.is_empty() {
            debug!(repository, status = %status, "Nothing new to notify");
            return;
        }

        info!(
            repository,
            status = %status,
            count = unseen.len(),
            "New pull requests to notify"
        );

        let units: Vec<Unit> = if settings.group_pull_request_updates {
            vec![Unit {
                payload: grouped_payload(repository, &unseen),
                numbers: unseen.iter().map(|p| p.number).collect(),
            }]
        } else {
            unseen
                .iter()
                .map(|pull| Unit {
                    payload: pull.payload(repository),
                    numbers: vec![pull.number],
                })
                .collect()
        };

        for unit in units {
            match self.dispatch(settings, status, seen, &unit).await {
                Ok(()) => summary.notifications_sent += 1,
                Err(e) => {
                    error!(
                        repository,
                        status = %status,
                        numbers = ?unit.numbers,
                        error = %e,
                        "Notification failed"
                    );
                    summary.failures += 1;
                }
            }
        }
    }

    /// Render, send, then record. Numbers are marked seen only after the
    /// mailer accepted the message, so a failed unit is retried (and may be
    /// re-notified) on the next run.
    async fn dispatch(
        &self,
        settings: &RepoSettings,
        status: Status,
        seen: &mut SeenSet,
        unit: &Unit,
    ) -> Result<()> {
        let rendered = template::render_notification(
            settings,
            status,
            settings.group_pull_request_updates,
            &unit.payload,
        )
        .context("render failed")?;

        let email = Email {
            to: settings.to_email_address.clone(),
            from: settings.from_email_address.clone(),
            reply_to: settings.reply_to_email_address.clone(),
            subject: rendered.subject,
            body: rendered.body,
            html: settings.html_email,
        };

        self.mailer.send(&email).await.context("dispatch failed")?;

        seen.mark(status, &unit.numbers)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PullRequest;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    fn pull(number: u64) -> PullRequest {
        serde_json::from_value(json!({
            "number": number,
            "title": format!("PR {number}"),
        }))
        .unwrap()
    }

    /// Canned pull requests per status, recording every query made.
    struct FakeSource {
        open: Vec<PullRequest>,
        closed: Vec<PullRequest>,
        queried: Mutex<Vec<(String, Status)>>,
    }

    impl FakeSource {
        fn new(open: Vec<PullRequest>, closed: Vec<PullRequest>) -> Self {
            Self {
                open,
                closed,
                queried: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PullSource for FakeSource {
        async fn pulls(&self, repository: &str, status: Status) -> Result<Vec<PullRequest>> {
            self.queried
                .lock()
                .unwrap()
                .push((repository.to_string(), status));
            Ok(match status {
                Status::Open => self.open.clone(),
                Status::Closed => self.closed.clone(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _email: &Email) -> Result<()> {
            anyhow::bail!("mail relay down")
        }
    }

    /// Repository settings backed by a temp dir holding templates and state.
    fn fixture(repository: &str) -> (TempDir, Vec<(String, RepoSettings)>) {
        let dir = tempdir().unwrap();
        let template_dir = dir.path().join("templates");
        fs::create_dir_all(&template_dir).unwrap();

        for name in [
            "individual_open",
            "individual_closed",
            "group_open",
            "group_closed",
        ] {
            fs::write(
                template_dir.join(format!("{name}.mustache")),
                "{{repository_name}}: {{title}}\n",
            )
            .unwrap();
        }

        let settings = RepoSettings {
            template_dir,
            state_dir: dir.path().join("state"),
            to_email_address: "maintainers@example.com".to_string(),
            from_email_address: "bot@example.com".to_string(),
            reply_to_email_address: "noreply@example.com".to_string(),
            html_email: false,
            group_pull_request_updates: false,
            alert_on_close: false,
            open_subject: "Opened #{{number}}".to_string(),
            closed_subject: Some("Closed #{{number}}".to_string()),
        };

        (dir, vec![(repository.to_string(), settings)])
    }

    const REPO: &str = "octocat/hello-world";

    #[tokio::test]
    async fn test_notifies_each_new_pull_individually() {
        let (_dir, repos) = fixture(REPO);
        let orchestrator = Orchestrator::new(
            FakeSource::new(vec![pull(6), pull(8)], vec![]),
            RecordingMailer::default(),
        );

        let summary = orchestrator.run(&repos).await;
        assert_eq!(summary.notifications_sent, 2);
        assert_eq!(summary.failures, 0);

        let sent = orchestrator.mailer.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Opened #6");
        assert_eq!(sent[0].body, "octocat/hello-world: PR 6\n");
        assert_eq!(sent[1].subject, "Opened #8");

        let seen = SeenSet::load(&repos[0].1.state_dir, REPO).unwrap();
        assert!(seen.is_open(6));
        assert!(seen.is_open(8));
    }

    #[tokio::test]
    async fn test_grouped_mode_sends_one_unit_and_records_all() {
        let (_dir, mut repos) = fixture(REPO);
        repos[0].1.group_pull_request_updates = true;

        let orchestrator = Orchestrator::new(
            FakeSource::new(vec![pull(6), pull(8)], vec![]),
            RecordingMailer::default(),
        );

        let summary = orchestrator.run(&repos).await;
        assert_eq!(summary.notifications_sent, 1);

        let seen = SeenSet::load(&repos[0].1.state_dir, REPO).unwrap();
        assert!(seen.is_open(6));
        assert!(seen.is_open(8));
    }

    #[tokio::test]
    async fn test_second_run_sends_nothing() {
        let (_dir, repos) = fixture(REPO);
        let orchestrator = Orchestrator::new(
            FakeSource::new(vec![pull(6)], vec![]),
            RecordingMailer::default(),
        );

        let first = orchestrator.run(&repos).await;
        assert_eq!(first.notifications_sent, 1);

        let second = orchestrator.run(&repos).await;
        assert_eq!(second.notifications_sent, 0);
        assert_eq!(orchestrator.mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_status_skipped_without_alert_on_close() {
        let (_dir, repos) = fixture(REPO);
        let orchestrator = Orchestrator::new(
            FakeSource::new(vec![], vec![pull(6)]),
            RecordingMailer::default(),
        );

        let summary = orchestrator.run(&repos).await;
        assert_eq!(summary.notifications_sent, 0);

        let queried = orchestrator.source.queried.lock().unwrap();
        assert_eq!(queried.as_slice(), &[(REPO.to_string(), Status::Open)]);
    }

    #[tokio::test]
    async fn test_close_alerts_processed_after_open() {
        let (_dir, mut repos) = fixture(REPO);
        repos[0].1.alert_on_close = true;

        let orchestrator = Orchestrator::new(
            FakeSource::new(vec![pull(6)], vec![pull(4)]),
            RecordingMailer::default(),
        );

        let summary = orchestrator.run(&repos).await;
        assert_eq!(summary.notifications_sent, 2);

        let queried = orchestrator.source.queried.lock().unwrap();
        assert_eq!(
            queried.as_slice(),
            &[
                (REPO.to_string(), Status::Open),
                (REPO.to_string(), Status::Closed),
            ]
        );

        let seen = SeenSet::load(&repos[0].1.state_dir, REPO).unwrap();
        assert!(seen.is_open(6));
        assert!(seen.is_closed(4));
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_pull_unrecorded() {
        let (_dir, repos) = fixture(REPO);

        let failing = Orchestrator::new(FakeSource::new(vec![pull(6)], vec![]), FailingMailer);
        let summary = failing.run(&repos).await;
        assert_eq!(summary.notifications_sent, 0);
        assert_eq!(summary.failures, 1);

        let seen = SeenSet::load(&repos[0].1.state_dir, REPO).unwrap();
        assert!(!seen.is_open(6));

        // Next run with a working mailer retries the same pull request.
        let working = Orchestrator::new(
            FakeSource::new(vec![pull(6)], vec![]),
            RecordingMailer::default(),
        );
        let summary = working.run(&repos).await;
        assert_eq!(summary.notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_render_failure_is_isolated_per_unit() {
        let (dir, repos) = fixture(REPO);
        // Break only the open template; state stays untouched.
        fs::remove_file(
            dir.path().join("templates").join("individual_open.mustache"),
        )
        .unwrap();

        let orchestrator = Orchestrator::new(
            FakeSource::new(vec![pull(6)], vec![]),
            RecordingMailer::default(),
        );

        let summary = orchestrator.run(&repos).await;
        assert_eq!(summary.notifications_sent, 0);
        assert_eq!(summary.failures, 1);

        let seen = SeenSet::load(&repos[0].1.state_dir, REPO).unwrap();
        assert!(!seen.is_open(6));
    }

    #[tokio::test]
    async fn test_one_repository_failure_does_not_stop_the_run() {
        struct FlakySource;

        #[async_trait]
        impl PullSource for FlakySource {
            async fn pulls(&self, repository: &str, _status: Status) -> Result<Vec<PullRequest>> {
                if repository == "octocat/broken" {
                    anyhow::bail!("upstream unavailable")
                }
                Ok(vec![pull(6)])
            }
        }

        let (_dir, mut repos) = fixture("octocat/broken");
        repos.push(("octocat/working".to_string(), repos[0].1.clone()));

        let orchestrator = Orchestrator::new(FlakySource, RecordingMailer::default());
        let summary = orchestrator.run(&repos).await;

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.notifications_sent, 1);

        let seen = SeenSet::load(&repos[0].1.state_dir, "octocat/working").unwrap();
        assert!(seen.is_open(6));
    }
}
