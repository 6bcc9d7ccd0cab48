use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::models::{PullRequest, Status};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("pull-request-bot/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 100;

/// Source of pull requests for a (repository, status) query.
///
/// Records are free-form JSON aside from `number`; the bot forwards all
/// other fields to templates untouched.
#[async_trait]
pub trait PullSource: Send + Sync {
    async fn pulls(&self, repository: &str, status: Status) -> Result<Vec<PullRequest>>;
}

/// GitHub REST API client
pub struct GitHubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Create a client. A token is optional but needed for private
    /// repositories and higher rate limits.
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    /// Point the client at a different API root. Used in tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!(url, "GitHub API request");

        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT);

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.context("Failed to reach GitHub API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API returned {status}: {body}");
        }

        response
            .json()
            .await
            .context("Failed to parse GitHub API response")
    }

    /// Fetch every page of a list endpoint, stopping at the first page
    /// shorter than the page size.
    async fn get_paged<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<Vec<T>> {
        let separator = if url.contains('?') { '&' } else { '?' };

        let mut all = Vec::new();
        for page in 1u32.. {
            let page_url = format!("{url}{separator}per_page={PAGE_SIZE}&page={page}");
            let items: Vec<T> = self.get_json(&page_url).await?;
            let count = items.len();
            all.extend(items);
            if count < PAGE_SIZE {
                break;
            }
        }

        Ok(all)
    }

    async fn repo_pulls(&self, owner: &str, name: &str, status: Status) -> Result<Vec<PullRequest>> {
        let url = format!("{}/repos/{owner}/{name}/pulls?state={status}", self.base_url);
        self.get_paged(&url).await
    }

    async fn owner_repos(&self, owner: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Repo {
            name: String,
        }

        let url = format!("{}/users/{owner}/repos", self.base_url);
        let repos: Vec<Repo> = self.get_paged(&url).await?;
        Ok(repos.into_iter().map(|r| r.name).collect())
    }
}

#[async_trait]
impl PullSource for GitHubClient {
    async fn pulls(&self, repository: &str, status: Status) -> Result<Vec<PullRequest>> {
        let pulls = match repository.split_once('/') {
            Some((owner, name)) => self.repo_pulls(owner, name, status).await?,
            None => {
                // Owner-only entry: fan out over every repository of that owner.
                let mut all = Vec::new();
                for name in self.owner_repos(repository).await? {
                    all.extend(self.repo_pulls(repository, &name, status).await?);
                }
                all
            }
        };

        info!(repository, status = %status, count = pulls.len(), "Fetched pull requests");

        Ok(pulls)
    }
}
