//! LLM name extraction for submissions that arrive without name hints.

use serde::Deserialize;

use crate::enrichment::ConversationContext;
use crate::error::KedError;
use crate::llm::{prompts, LlmProvider};

/// Names kept from one transcript.
const MAX_EXTRACTED_NAMES: usize = 5;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractedPerson {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct PersonsWrapper {
    #[serde(default)]
    persons: Vec<ExtractedPerson>,
}

#[derive(Clone)]
pub struct NameExtractor {
    llm: LlmProvider,
}

impl NameExtractor {
    pub fn new(llm: LlmProvider) -> Self {
        Self { llm }
    }

    pub fn is_enabled(&self) -> bool {
        self.llm.is_available() && self.llm.config().is_some_and(|c| c.name_extraction)
    }

    /// People the transcript mentions, most confident first. Never fails:
    /// any LLM problem yields an empty list.
    pub async fn extract(&self, transcript: &str) -> Vec<ExtractedPerson> {
        if !self.llm.is_available() {
            return Vec::new();
        }

        let prompt = prompts::name_extraction_prompt(transcript);
        let reply = self
            .llm
            .complete_structured::<PersonsWrapper>(
                &prompt,
                Some(prompts::NAME_EXTRACTION_SYSTEM_PROMPT),
            )
            .await;
        let mut persons = match reply {
            Ok(wrapper) => wrapper.persons,
            Err(KedError::LlmUnavailable(reason)) => {
                tracing::warn!(%reason, "LLM unavailable during name extraction");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Name extraction failed, searching without names");
                return Vec::new();
            }
        };

        persons.retain(|p| !p.name.trim().is_empty());
        persons.sort_by(|a, b| {
            let score = |p: &ExtractedPerson| p.confidence.filter(|c| c.is_finite()).unwrap_or(0.5);
            score(b).total_cmp(&score(a))
        });
        persons.truncate(MAX_EXTRACTED_NAMES);
        persons
    }
}

/// Fold extracted people into the context without duplicating terms.
pub fn merge_extracted(ctx: &mut ConversationContext, persons: &[ExtractedPerson]) {
    fn push_unique(list: &mut Vec<String>, value: Option<&str>) {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return;
        };
        if !list.iter().any(|existing| existing.eq_ignore_ascii_case(value)) {
            list.push(value.to_string());
        }
    }

    for person in persons {
        push_unique(&mut ctx.name_hints, Some(person.name.as_str()));
        push_unique(&mut ctx.locations, person.location.as_deref());
        push_unique(&mut ctx.professions, person.profession.as_deref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn person(name: &str, location: Option<&str>, confidence: Option<f32>) -> ExtractedPerson {
        ExtractedPerson {
            name: name.to_string(),
            location: location.map(str::to_string),
            profession: None,
            confidence,
        }
    }

    fn llm(server: &MockServer) -> LlmProvider {
        LlmProvider::new(Some(&LlmConfig {
            model: "ollama/llama3".to_string(),
            api_key: None,
            base_url: Some(server.uri()),
            timeout_secs: 5,
            max_retries: 0,
            identity_rescoring: false,
            name_extraction: true,
        }))
    }

    async fn reply(server: &MockServer, content: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1_700_000_000,
                "model": "llama3",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_merge_skips_duplicates_and_blanks() {
        let mut ctx = ConversationContext {
            name_hints: vec!["Jane Doe".to_string()],
            ..Default::default()
        };
        merge_extracted(
            &mut ctx,
            &[
                person("jane doe", Some("Berlin"), None),
                person("Omar Haddad", Some(" "), None),
                person("Omar Haddad", Some("berlin"), None),
            ],
        );
        assert_eq!(ctx.name_hints, vec!["Jane Doe", "Omar Haddad"]);
        assert_eq!(ctx.locations, vec!["Berlin"]);
        assert!(ctx.professions.is_empty());
    }

    #[tokio::test]
    async fn test_extract_orders_by_confidence() {
        let server = MockServer::start().await;
        reply(
            &server,
            r#"{"persons": [
                {"name": "Omar Haddad", "location": null, "profession": null, "confidence": 0.4},
                {"name": "  ", "confidence": 0.99},
                {"name": "Jane Doe", "location": "Berlin", "profession": "engineer", "confidence": 0.9}
            ]}"#,
        )
        .await;

        let persons = NameExtractor::new(llm(&server)).extract("Jane from Berlin...").await;
        let names: Vec<&str> = persons.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Jane Doe", "Omar Haddad"]);
        assert_eq!(persons[0].profession.as_deref(), Some("engineer"));
    }

    #[tokio::test]
    async fn test_extract_degrades_to_empty() {
        let server = MockServer::start().await;
        reply(&server, "I could not find anyone.").await;
        assert!(NameExtractor::new(llm(&server)).extract("hello").await.is_empty());

        let unavailable = NameExtractor::new(LlmProvider::unavailable("disabled"));
        assert!(!unavailable.is_enabled());
        assert!(unavailable.extract("hello").await.is_empty());
    }
}
