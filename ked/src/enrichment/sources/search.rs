use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{status_error, QueryContext, SourceAdapter, SourceError};
use crate::models::Candidate;

/// Site a web search is narrowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTarget {
    Linkedin,
    Instagram,
    Twitter,
    Tiktok,
    Web,
}

impl SearchTarget {
    pub const ALL: [SearchTarget; 5] = [
        SearchTarget::Linkedin,
        SearchTarget::Instagram,
        SearchTarget::Twitter,
        SearchTarget::Tiktok,
        SearchTarget::Web,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Linkedin => "linkedin",
            Self::Instagram => "instagram",
            Self::Twitter => "twitter",
            Self::Tiktok => "tiktok",
            Self::Web => "web",
        }
    }

    fn class(&self) -> &'static str {
        match self {
            Self::Web => "datacenter",
            _ => "residential",
        }
    }

    fn site(&self) -> Option<&'static str> {
        match self {
            Self::Linkedin => Some("linkedin.com/in/"),
            Self::Instagram => Some("instagram.com"),
            Self::Twitter => Some("twitter.com"),
            Self::Tiktok => Some("tiktok.com"),
            Self::Web => None,
        }
    }

    fn accepts(&self, link: &str) -> bool {
        let Ok(url) = url::Url::parse(link) else {
            return false;
        };
        let host = url.host_str().unwrap_or_default().trim_start_matches("www.");
        match self {
            Self::Linkedin => host.ends_with("linkedin.com") && url.path().starts_with("/in/"),
            Self::Instagram => host.ends_with("instagram.com"),
            Self::Twitter => host.ends_with("twitter.com") || host == "x.com",
            Self::Tiktok => host.ends_with("tiktok.com"),
            Self::Web => !host.ends_with("facebook.com"),
        }
    }

    fn query(&self, name: &str, context_terms: &[String]) -> String {
        let context = context_terms.join(" ");
        let base = match self.site() {
            Some(site) => format!("site:{site} \"{name}\""),
            None => format!("\"{name}\" -site:facebook.com"),
        };
        match (self, context.trim()) {
            (_, "") => base,
            (Self::Linkedin | Self::Web, context) => format!("{base} {context}"),
            _ => base,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    title: String,
    link: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    date: Option<String>,
}

/// Web search adapter narrowed to one site.
#[derive(Debug, Clone)]
pub struct SearchAdapter {
    target: SearchTarget,
    base_url: String,
    api_key: String,
}

impl SearchAdapter {
    pub fn new(target: SearchTarget, base_url: &str, api_key: &str) -> Self {
        Self {
            target,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn to_candidate(&self, result: OrganicResult) -> Candidate {
        let (name, rest) = split_title(&result.title);
        let mut candidate = Candidate::new(self.target.name(), result.link.clone(), name)
            .with_url(result.link)
            .with_field("title", result.title.clone());

        if let Some(position) = result.position {
            candidate = candidate.with_field("position", position);
        }
        if let Some(date) = result.date {
            candidate = candidate.with_field("published", date);
        }
        if let Some(snippet) = result.snippet.filter(|s| !s.trim().is_empty()) {
            candidate = candidate.with_field("snippet", snippet.clone());
            if self.target != SearchTarget::Linkedin && self.target != SearchTarget::Web {
                candidate = candidate.with_field("bio", snippet);
            }
        }
        if let Some(rest) = rest {
            match self.target {
                SearchTarget::Linkedin => candidate = candidate.with_field("headline", rest),
                SearchTarget::Instagram | SearchTarget::Twitter | SearchTarget::Tiktok => {
                    if let Some(handle) = extract_handle(&result.title) {
                        candidate = candidate.with_field("handle", handle);
                    }
                }
                SearchTarget::Web => {}
            }
        }
        candidate
    }
}

/// Split a result title such as `Jane Doe - Staff Engineer - Acme | LinkedIn`
/// into the person's name and the remainder.
fn split_title(title: &str) -> (String, Option<String>) {
    let cut = [" - ", " | ", " (@", " • ", " – "]
        .iter()
        .filter_map(|sep| title.find(sep).map(|idx| (idx, *sep)))
        .min_by_key(|(idx, _)| *idx);

    match cut {
        Some((idx, sep)) => {
            let name = title[..idx].trim().to_string();
            let rest = title[idx + sep.len()..]
                .trim_end_matches(" | LinkedIn")
                .trim()
                .to_string();
            let name = if name.is_empty() { title.trim().to_string() } else { name };
            (name, Some(rest).filter(|r| !r.is_empty()))
        }
        None => (title.trim().to_string(), None),
    }
}

fn extract_handle(title: &str) -> Option<String> {
    let start = title.find("(@")? + 2;
    let end = title[start..].find(')')? + start;
    Some(title[start..end].to_string()).filter(|h| !h.is_empty())
}

#[async_trait]
impl SourceAdapter for SearchAdapter {
    fn name(&self) -> &str {
        self.target.name()
    }

    fn source_class(&self) -> &str {
        self.target.class()
    }

    async fn query(&self, ctx: &QueryContext) -> Result<Vec<Candidate>, SourceError> {
        let Some(name) = ctx.primary_name() else {
            return Ok(Vec::new());
        };
        let q = self.target.query(name, &ctx.context_terms);
        let client = ctx.http_client()?;

        tracing::debug!(job_id = %ctx.job_id, source = self.target.name(), query = %q, "Searching");

        let response = client
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&SearchRequest {
                q: &q,
                num: ctx.max_results.max(1),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        Ok(body
            .organic
            .into_iter()
            .filter(|r| self.target.accepts(&r.link))
            .take(ctx.max_results.max(1))
            .map(|r| self.to_candidate(r))
            .collect())
    }
}
