//! Prompt templates for LLM-assisted features.
//!
//! Templates use plain `format!()` interpolation, so a missing variable is a
//! compile error rather than a runtime surprise.

use crate::enrichment::resolution::ConversationContext;
use crate::models::Candidate;

/// Longest transcript excerpt sent along with a candidate.
const TRANSCRIPT_EXCERPT_CHARS: usize = 1_500;
const EXTRACTION_EXCERPT_CHARS: usize = 2_000;

pub const IDENTITY_JUDGE_SYSTEM_PROMPT: &str = "You decide whether an online profile belongs to the person described in a conversation. Reply with JSON only.";

fn list_or_none(items: &[String]) -> String {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

pub const NAME_EXTRACTION_SYSTEM_PROMPT: &str = "You pick out the people mentioned in a conversation transcript. Reply with JSON only.";

/// Ask for the people mentioned in `transcript`, with whatever location and
/// profession the conversation attaches to each.
pub fn name_extraction_prompt(transcript: &str) -> String {
    let excerpt: String = transcript.chars().take(EXTRACTION_EXCERPT_CHARS).collect();
    format!(
        r#"List every person named in this conversation transcript, other than the speaker.
For each, note the location and the job or title if the conversation mentions them.
Leave a field null when it is not mentioned. Do not guess.

Transcript:
{excerpt}

Respond with valid JSON only:
{{"persons": [{{"name": "<full name>", "location": <string or null>, "profession": <string or null>, "confidence": <number between 0.0 and 1.0>}}]}}"#
    )
}

/// Ask for a `{"confidence": 0..1, "reasoning": "..."}` judgement of whether
/// `candidate` is the person the conversation is about.
///
/// # Example
/// ```
/// use ked::enrichment::ConversationContext;
/// use ked::llm::prompts::identity_rescoring_prompt;
/// use ked::models::Candidate;
///
/// let ctx = ConversationContext {
///     name_hints: vec!["Jane Doe".to_string()],
///     ..Default::default()
/// };
/// let candidate = Candidate::new("github", "janedoe", "Jane Doe");
/// let prompt = identity_rescoring_prompt(&ctx, &candidate);
/// assert!(prompt.contains("Jane Doe"));
/// ```
pub fn identity_rescoring_prompt(ctx: &ConversationContext, candidate: &Candidate) -> String {
    let excerpt: String = ctx.text.chars().take(TRANSCRIPT_EXCERPT_CHARS).collect();
    let mut fields: Vec<String> = candidate
        .fields
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("- {key}: {s}"),
            other => format!("- {key}: {other}"),
        })
        .collect();
    fields.sort();
    let fields = if fields.is_empty() {
        "(none)".to_string()
    } else {
        fields.join("\n")
    };

    format!(
        r#"A person was mentioned in a conversation. Decide how likely the profile below belongs to them.

Conversation:
- Names mentioned: {names}
- Locations: {locations}
- Professions: {professions}
- Timeline: {timeline}

Transcript excerpt:
{excerpt}

Profile ({source}):
- Display name: {display_name}
- URL: {url}
{fields}

Weigh name similarity, location, profession and timeline. Do not reward a name match alone.

Respond with valid JSON only:
{{"confidence": <number between 0.0 and 1.0>, "reasoning": "<one sentence>"}}"#,
        names = list_or_none(&ctx.name_hints),
        locations = list_or_none(&ctx.locations),
        professions = list_or_none(&ctx.professions),
        timeline = list_or_none(&ctx.timeline),
        source = candidate.source,
        display_name = candidate.display_name,
        url = candidate.url.as_deref().unwrap_or("(none)"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_context_and_fields() {
        let ctx = ConversationContext {
            name_hints: vec!["Jane Doe".to_string(), " ".to_string()],
            locations: vec!["Berlin".to_string()],
            professions: vec![],
            timeline: vec![],
            text: "I met Jane at RustConf".to_string(),
        };
        let candidate = Candidate::new("linkedin", "https://linkedin.com/in/jd", "Jane Doe")
            .with_url("https://linkedin.com/in/jd")
            .with_field("headline", "Staff Engineer")
            .with_field("followers", 12);

        let prompt = identity_rescoring_prompt(&ctx, &candidate);
        assert!(prompt.contains("- Names mentioned: Jane Doe\n"));
        assert!(prompt.contains("- Locations: Berlin"));
        assert!(prompt.contains("- Professions: (none)"));
        assert!(prompt.contains("I met Jane at RustConf"));
        assert!(prompt.contains("- followers: 12"));
        assert!(prompt.contains("- headline: Staff Engineer"));
        assert!(prompt.contains("\"confidence\""));
    }

    #[test]
    fn test_extraction_prompt_embeds_transcript() {
        let prompt = name_extraction_prompt("Priya from Lisbon runs a bakery");
        assert!(prompt.contains("Priya from Lisbon runs a bakery"));
        assert!(prompt.contains("\"persons\""));

        let long = name_extraction_prompt(&"y".repeat(4_000));
        assert!(!long.contains(&"y".repeat(EXTRACTION_EXCERPT_CHARS + 1)));
    }

    #[test]
    fn test_long_transcript_is_truncated() {
        let ctx = ConversationContext {
            text: "x".repeat(5_000),
            ..Default::default()
        };
        let prompt = identity_rescoring_prompt(&ctx, &Candidate::new("web", "u", "Someone"));
        assert!(!prompt.contains(&"x".repeat(TRANSCRIPT_EXCERPT_CHARS + 1)));
    }
}
