use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::{status_error, QueryContext, SourceAdapter, SourceError};
use crate::models::Candidate;

/// Profiles fetched in detail per query; each costs up to two extra calls.
const MAX_DETAILED_PROFILES: usize = 3;

#[derive(Debug, Deserialize)]
struct UserSearchResponse {
    #[serde(default)]
    items: Vec<UserSearchItem>,
}

#[derive(Debug, Deserialize)]
struct UserSearchItem {
    login: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    login: String,
    html_url: String,
    name: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    company: Option<String>,
    blog: Option<String>,
    #[serde(default)]
    public_repos: u64,
    #[serde(default)]
    followers: u64,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    fork: bool,
    language: Option<String>,
    pushed_at: Option<String>,
}

/// GitHub REST API user lookup.
#[derive(Debug, Clone)]
pub struct GithubAdapter {
    base_url: String,
    token: Option<String>,
}

impl GithubAdapter {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn get(&self, client: &Client, ctx: &QueryContext, path: &str) -> RequestBuilder {
        let mut request = client
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .timeout(ctx.remaining());
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn search(
        &self,
        client: &Client,
        ctx: &QueryContext,
        name: &str,
    ) -> Result<Vec<UserSearchItem>, SourceError> {
        let q = format!("\"{name}\" in:name");
        let per_page = ctx.max_results.clamp(1, 30).to_string();
        let response = self
            .get(client, ctx, "/search/users")
            .query(&[("q", q.as_str()), ("per_page", per_page.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: UserSearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(body.items)
    }

    async fn profile(
        &self,
        client: &Client,
        ctx: &QueryContext,
        login: &str,
    ) -> Result<UserProfile, SourceError> {
        let response = self
            .get(client, ctx, &format!("/users/{login}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    async fn repositories(
        &self,
        client: &Client,
        ctx: &QueryContext,
        login: &str,
    ) -> Result<Vec<Repository>, SourceError> {
        let response = self
            .get(client, ctx, &format!("/users/{login}/repos"))
            .query(&[("sort", "pushed"), ("per_page", "30")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }
}

fn profile_candidate(profile: UserProfile, repos: &[Repository]) -> Candidate {
    let display_name = profile
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| profile.login.clone());

    let mut candidate = Candidate::new("github", profile.login.clone(), display_name)
        .with_url(profile.html_url)
        .with_field("login", profile.login)
        .with_field("public_repos", profile.public_repos)
        .with_field("followers", profile.followers);

    for (key, value) in [
        ("bio", profile.bio),
        ("location", profile.location),
        ("company", profile.company),
        ("blog", profile.blog),
    ] {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            candidate = candidate.with_field(key, value);
        }
    }

    let own: Vec<&Repository> = repos.iter().filter(|r| !r.fork).collect();
    if !own.is_empty() {
        let stars: u64 = own.iter().map(|r| r.stargazers_count).sum();
        candidate = candidate.with_field("stars", stars);
        if let Some(top) = own.iter().max_by_key(|r| r.stargazers_count) {
            candidate = candidate.with_field("top_repo", top.name.clone());
        }
        let mut languages: Vec<String> = own.iter().filter_map(|r| r.language.clone()).collect();
        languages.sort();
        languages.dedup();
        if !languages.is_empty() {
            candidate = candidate.with_field("languages", languages);
        }
    }

    let last_push = repos.iter().filter_map(|r| r.pushed_at.clone()).max();
    if let Some(last_active) = last_push.or(profile.updated_at) {
        candidate = candidate.with_field("last_active", last_active);
    }
    candidate.extracted_at = Utc::now();
    candidate
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    fn name(&self) -> &str {
        "github"
    }

    fn source_class(&self) -> &str {
        "datacenter"
    }

    async fn query(&self, ctx: &QueryContext) -> Result<Vec<Candidate>, SourceError> {
        let Some(name) = ctx.primary_name() else {
            return Ok(Vec::new());
        };
        let client = ctx.http_client()?;
        let items = self.search(&client, ctx, name).await?;

        let mut candidates = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().take(ctx.max_results.max(1)).enumerate() {
            let basic = Candidate::new("github", item.login.clone(), item.login.clone())
                .with_url(item.html_url.clone())
                .with_field("login", item.login.clone());

            if i >= MAX_DETAILED_PROFILES || ctx.remaining().is_zero() {
                candidates.push(basic);
                continue;
            }

            match self.profile(&client, ctx, &item.login).await {
                Ok(profile) => {
                    let repos = match self.repositories(&client, ctx, &item.login).await {
                        Ok(repos) => repos,
                        Err(e) => {
                            tracing::debug!(login = %item.login, error = %e, "Repository listing failed");
                            Vec::new()
                        }
                    };
                    candidates.push(profile_candidate(profile, &repos));
                }
                // Keep what the search already returned instead of losing the wave.
                Err(e) => {
                    tracing::debug!(login = %item.login, error = %e, "Profile lookup failed");
                    candidates.push(basic);
                }
            }
        }
        Ok(candidates)
    }
}
