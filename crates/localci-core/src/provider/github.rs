//! GitHub implementation of [`SourceProvider`].
//!
//! Metadata comes from the REST API; code is fetched with the `git` CLI.

use super::{BranchHead, ChangeRequestInfo, Comment, SourceProvider};
use crate::error::{CiError, ConfigError, Result};
use crate::git;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Public GitHub API endpoint.
pub const GITHUB_API: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

#[derive(Deserialize)]
struct ApiBranch {
    name: String,
    commit: ApiCommit,
}

#[derive(Deserialize)]
struct ApiCommit {
    sha: String,
}

#[derive(Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Deserialize)]
struct ApiHead {
    sha: String,
}

#[derive(Deserialize)]
struct ApiBase {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Deserialize)]
struct ApiPull {
    number: u64,
    #[serde(default)]
    state: String,
    user: ApiUser,
    head: ApiHead,
    base: ApiBase,
}

#[derive(Deserialize)]
struct ApiPullSummary {
    number: u64,
}

#[derive(Deserialize)]
struct ApiComment {
    user: ApiUser,
    #[serde(default)]
    body: String,
}

/// GitHub repository accessed through the REST API.
#[derive(Clone)]
pub struct GithubProvider {
    owner: String,
    repo: String,
    token: Option<String>,
    api_base: String,
    clone_url: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for GithubProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubProvider")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GithubProvider {
    /// Create a provider for a `https://github.com/<owner>/<repo>` URL.
    pub fn new(url: &str, token: Option<String>) -> Result<Self> {
        let (owner, repo) = parse_github_url(url)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("localci/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let clone_url = format!("https://github.com/{owner}/{repo}.git");

        Ok(Self {
            owner,
            repo,
            token,
            api_base: GITHUB_API.to_string(),
            clone_url,
            http,
        })
    }

    /// Talk to a different API endpoint (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Clone from a different location.
    pub fn with_clone_url(mut self, clone_url: impl Into<String>) -> Self {
        self.clone_url = clone_url.into();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.header("Authorization", format!("token {token}")),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.repo_url(path);
        debug!(url = %url, "GET");
        let response = self
            .authorize(self.http.get(&url).query(query))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CiError::Provider(format!(
                "GET {path} returned {status}: {}",
                body.trim()
            )));
        }

        Ok(response.json::<T>().await?)
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for page in 1.. {
            let mut page_query = query.to_vec();
            page_query.push(("per_page", PER_PAGE.to_string()));
            page_query.push(("page", page.to_string()));

            let batch: Vec<T> = self.get_json(path, &page_query).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

/// Split a GitHub URL into owner and repository name.
pub fn parse_github_url(url: &str) -> Result<(String, String)> {
    let trimmed = url.trim();
    let path = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .or_else(|| trimmed.strip_prefix("github.com/"))
        .ok_or_else(|| ConfigError::UnsupportedUrl(url.to_string()))?;

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(ConfigError::UnsupportedUrl(url.to_string()).into()),
    }
}

#[async_trait]
impl SourceProvider for GithubProvider {
    fn project_slug(&self) -> String {
        format!("github.com/{}/{}", self.owner, self.repo)
    }

    async fn fetch_branch(&self, name: &str) -> Result<BranchHead> {
        let branch: ApiBranch = self.get_json(&format!("branches/{name}"), &[]).await?;
        Ok(BranchHead {
            name: branch.name,
            commit: branch.commit.sha,
        })
    }

    async fn fetch_change_request(&self, number: u64) -> Result<ChangeRequestInfo> {
        let pull: ApiPull = self.get_json(&format!("pulls/{number}"), &[]).await?;
        if !pull.state.is_empty() && pull.state != "open" {
            return Err(CiError::Provider(format!(
                "pull request {number} is {}",
                pull.state
            )));
        }

        let comments: Vec<ApiComment> = self
            .get_paginated(&format!("issues/{number}/comments"), &[])
            .await?;

        Ok(ChangeRequestInfo {
            number: pull.number,
            head_commit: pull.head.sha,
            base_branch: pull.base.name,
            author: pull.user.login,
            comments: comments
                .into_iter()
                .map(|c| Comment {
                    author: c.user.login,
                    body: c.body,
                })
                .collect(),
        })
    }

    async fn list_open_change_requests(&self) -> Result<Vec<u64>> {
        let pulls: Vec<ApiPullSummary> = self
            .get_paginated("pulls", &[("state", "open".to_string())])
            .await?;
        Ok(pulls.into_iter().map(|p| p.number).collect())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        let path = format!("issues/{number}/comments");
        let response = self
            .authorize(self.http.post(self.repo_url(&path)))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CiError::Provider(format!(
                "POST {path} returned {status}"
            )));
        }
        Ok(())
    }

    async fn download_branch(&self, head: &BranchHead, dest: &Path) -> Result<()> {
        git::clone_into(&self.clone_url, dest, self.token.as_deref()).await?;
        git::checkout(dest, &head.commit).await?;

        let checked_out = git::capture_head_sha(dest).await?;
        if !checked_out.starts_with(&head.commit) {
            return Err(CiError::Git(format!(
                "{} resolved to {checked_out}, expected commit {}",
                head.name, head.commit
            )));
        }
        Ok(())
    }

    async fn download_change_request(
        &self,
        info: &ChangeRequestInfo,
        dest: &Path,
    ) -> Result<()> {
        git::clone_into(&self.clone_url, dest, self.token.as_deref()).await?;
        git::checkout(dest, &info.base_branch).await?;
        git::fetch(dest, &format!("pull/{}/head", info.number), self.token.as_deref()).await?;
        git::merge(dest, "FETCH_HEAD").await
    }
}
