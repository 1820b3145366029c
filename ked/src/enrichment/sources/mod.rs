//! Uniform call contract for external profile sources.
//!
//! The dispatcher only ever sees [`SourceAdapter`]; request shaping and
//! response parsing stay inside each adapter.

mod github;
mod search;

pub use github::GithubAdapter;
pub use search::{SearchAdapter, SearchTarget};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use super::circuit::{EgressHandle, FailureReason};
use crate::config::SourcesConfig;
use crate::models::Candidate;

const USER_AGENT: &str = concat!("ked/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("deadline exceeded")]
    Timeout,

    #[error("rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("challenge page returned")]
    Captcha,

    #[error("blocked with status {0}")]
    Blocked(u16),

    #[error("request failed: {0}")]
    Http(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Timeout => FailureReason::Timeout,
            Self::RateLimited { .. } => FailureReason::RateLimited,
            Self::Captcha => FailureReason::Captcha,
            Self::Blocked(_) => FailureReason::Blocked,
            Self::Http(_) | Self::Parse(_) | Self::Unavailable(_) => FailureReason::Error,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Inputs handed to one adapter invocation.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub job_id: String,
    pub name_hints: Vec<String>,
    /// Location, profession and similar terms that narrow a search.
    pub context_terms: Vec<String>,
    pub deadline: Instant,
    pub egress: EgressHandle,
    pub max_results: usize,
}

impl QueryContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.name_hints
            .iter()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
    }

    /// HTTP client bound to this call's deadline and egress.
    pub fn http_client(&self) -> Result<Client, SourceError> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(SourceError::Timeout);
        }
        let mut builder = Client::builder().timeout(remaining).user_agent(USER_AGENT);
        if let Some(ref proxy_url) = self.egress.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| SourceError::Unavailable(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {e}")))
    }
}

/// Map a non-success response to a source error.
pub(crate) async fn status_error(response: reqwest::Response) -> SourceError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after },
        StatusCode::FORBIDDEN if looks_like_challenge(&body) => SourceError::Captcha,
        StatusCode::FORBIDDEN if body.to_lowercase().contains("rate limit") => {
            SourceError::RateLimited { retry_after }
        }
        s if s.is_client_error() => SourceError::Blocked(s.as_u16()),
        s => SourceError::Http(format!("status {s}: {}", truncate(&body, 200))),
    }
}

fn looks_like_challenge(body: &str) -> bool {
    let body = body.to_lowercase();
    ["captcha", "challenge", "are you a robot", "unusual traffic"]
        .iter()
        .any(|marker| body.contains(marker))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key, lowercase.
    fn name(&self) -> &str;

    /// Egress class this source prefers, e.g. `residential` or `datacenter`.
    fn source_class(&self) -> &str;

    async fn query(&self, ctx: &QueryContext) -> Result<Vec<Candidate>, SourceError>;
}

/// Static set of adapters, keyed by source name.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every adapter whose credentials are configured.
    pub fn from_config(config: &SourcesConfig) -> Self {
        let mut registry = Self::new();

        match config.serper_api_key {
            Some(ref api_key) => {
                for target in SearchTarget::ALL {
                    registry.register(Arc::new(SearchAdapter::new(
                        target,
                        &config.serper_base_url,
                        api_key,
                    )));
                }
            }
            None => tracing::warn!(
                "SERPER_API_KEY not set; linkedin, instagram, twitter, tiktok and web sources disabled"
            ),
        }

        registry.register(Arc::new(GithubAdapter::new(
            &config.github_api_url,
            config.github_token.clone(),
        )));

        tracing::info!(sources = ?registry.names(), "Source registry ready");
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_lowercase(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(deadline: Instant) -> QueryContext {
        QueryContext {
            job_id: "job".to_string(),
            name_hints: vec!["  ".to_string(), "Jane Doe".to_string()],
            context_terms: vec![],
            deadline,
            egress: EgressHandle::direct(),
            max_results: 5,
        }
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(SourceError::Timeout.failure_reason(), FailureReason::Timeout);
        assert_eq!(
            SourceError::RateLimited { retry_after: None }.failure_reason(),
            FailureReason::RateLimited
        );
        assert_eq!(SourceError::Captcha.failure_reason(), FailureReason::Captcha);
        assert_eq!(SourceError::Blocked(403).failure_reason(), FailureReason::Blocked);
        assert_eq!(
            SourceError::Parse("x".into()).failure_reason(),
            FailureReason::Error
        );
    }

    #[test]
    fn test_primary_name_skips_blank_hints() {
        let ctx = context(Instant::now() + Duration::from_secs(5));
        assert_eq!(ctx.primary_name(), Some("Jane Doe"));
    }

    #[test]
    fn test_expired_deadline_refuses_client() {
        let ctx = context(Instant::now());
        assert_eq!(ctx.http_client().unwrap_err(), SourceError::Timeout);
    }

    #[test]
    fn test_bad_proxy_is_unavailable() {
        let mut ctx = context(Instant::now() + Duration::from_secs(5));
        ctx.egress.proxy_url = Some("http://[::1".to_string());
        assert!(matches!(
            ctx.http_client(),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_registry_without_serper_key_has_github_only() {
        let registry = SourceRegistry::from_config(&SourcesConfig::default());
        assert_eq!(registry.names(), vec!["github".to_string()]);
        assert!(registry.contains("GitHub"));
        assert!(!registry.contains("linkedin"));
    }

    #[test]
    fn test_registry_with_serper_key_registers_search_targets() {
        let config = SourcesConfig {
            serper_api_key: Some("key".to_string()),
            ..Default::default()
        };
        let registry = SourceRegistry::from_config(&config);
        assert_eq!(
            registry.names(),
            vec!["github", "instagram", "linkedin", "tiktok", "twitter", "web"]
        );
        assert_eq!(registry.get("linkedin").unwrap().source_class(), "residential");
        assert_eq!(registry.get("web").unwrap().source_class(), "datacenter");
    }

    #[test]
    fn test_challenge_detection() {
        assert!(looks_like_challenge("<title>Please complete the CAPTCHA</title>"));
        assert!(!looks_like_challenge("{\"message\":\"Forbidden\"}"));
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
