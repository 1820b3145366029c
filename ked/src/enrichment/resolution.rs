//! Rule-based identity disambiguation.
//!
//! Scoring per candidate is additive and clamped to `[0, 1]`:
//!
//! - name match against the hints: exact, then phonetic, then partial
//! - context alignment: location, profession and timeline terms, capped
//! - corroboration: other sources naming the same person, capped
//!
//! [`IdentityResolver::resolve`] is pure. An optional LLM pass can be layered
//! on top with [`IdentityResolver::rescore_with_llm`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;
use validator::Validate;

use crate::config::ResolutionConfig;
use crate::error::{KedError, Result};
use crate::llm::{prompts, LlmProvider};
use crate::models::{Candidate, ConfidenceBand, ResolvedIdentity, ScoredCandidate};

/// Candidates sent to the LLM for a second opinion.
const LLM_RESCORE_LIMIT: usize = 5;

/// What the conversation told us about the person.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub name_hints: Vec<String>,
    pub locations: Vec<String>,
    pub professions: Vec<String>,
    pub timeline: Vec<String>,
    /// Transcript text, used for free-text matching.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameMatch {
    Exact,
    Phonetic,
    Partial,
    None,
}

pub(crate) fn normalize_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn soundex_digit(c: char) -> u8 {
    match c {
        'B' | 'F' | 'P' | 'V' => 1,
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => 2,
        'D' | 'T' => 3,
        'L' => 4,
        'M' | 'N' => 5,
        'R' => 6,
        _ => 0,
    }
}

/// American Soundex code, e.g. `Robert` and `Rupert` both give `R163`.
fn soundex(word: &str) -> Option<String> {
    let mut letters = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase());
    let first = letters.next()?;
    let mut code = String::with_capacity(4);
    code.push(first);
    let mut last = soundex_digit(first);

    for c in letters {
        let digit = soundex_digit(c);
        if digit != 0 && digit != last {
            code.push(char::from(b'0' + digit));
            if code.len() == 4 {
                break;
            }
        }
        // H and W do not separate letters with the same code.
        if c != 'H' && c != 'W' {
            last = digit;
        }
    }
    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}

fn match_name(hint: &str, candidate: &str) -> NameMatch {
    let hint = normalize_name(hint);
    let candidate = normalize_name(candidate);
    if hint.is_empty() || candidate.is_empty() {
        return NameMatch::None;
    }
    if hint == candidate {
        return NameMatch::Exact;
    }

    let hint_tokens: Vec<&str> = hint.split(' ').collect();
    let cand_tokens: Vec<&str> = candidate.split(' ').collect();

    let cand_codes: Vec<Option<String>> = cand_tokens.iter().map(|t| soundex(t)).collect();
    let phonetic = cand_tokens.len() <= hint_tokens.len() + 1
        && hint_tokens.iter().all(|t| {
            let code = soundex(t);
            code.is_some() && cand_codes.contains(&code)
        });
    if phonetic {
        return NameMatch::Phonetic;
    }

    let shares_token = hint_tokens
        .iter()
        .any(|t| t.len() >= 2 && cand_tokens.contains(t));
    if shares_token || strsim::jaro_winkler(&hint, &candidate) >= 0.85 {
        return NameMatch::Partial;
    }
    NameMatch::None
}

fn contains_term(haystack: &str, term: &str) -> bool {
    let term = normalize_name(term);
    !term.is_empty() && format!(" {haystack} ").contains(&format!(" {term} "))
}

pub struct IdentityResolver {
    config: ResolutionConfig,
}

impl IdentityResolver {
    pub fn new(config: ResolutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Score, rank and classify `candidates` against `ctx`.
    pub fn resolve(
        &self,
        candidates: &[Candidate],
        ctx: &ConversationContext,
    ) -> Result<ResolvedIdentity> {
        let ranked = self.rank(candidates, ctx)?;
        Ok(self.classify(ranked))
    }

    /// Scored candidates, best first.
    pub fn rank(
        &self,
        candidates: &[Candidate],
        ctx: &ConversationContext,
    ) -> Result<Vec<ScoredCandidate>> {
        for candidate in candidates {
            candidate.validate().map_err(|e| {
                KedError::Validation(format!(
                    "malformed candidate from '{}': {e}",
                    candidate.source
                ))
            })?;
        }

        // Distinct sources per normalized name, for corroboration.
        let mut sources_by_name: HashMap<String, BTreeSet<String>> = HashMap::new();
        for candidate in candidates {
            sources_by_name
                .entry(normalize_name(&candidate.display_name))
                .or_default()
                .insert(candidate.source.to_lowercase());
        }

        let text = normalize_name(&ctx.text);
        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|candidate| {
                let corroborating: Vec<String> = sources_by_name
                    .get(&normalize_name(&candidate.display_name))
                    .map(|sources| {
                        sources
                            .iter()
                            .filter(|s| **s != candidate.source.to_lowercase())
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                self.score(candidate, ctx, &text, corroborating)
            })
            .collect();

        scored.sort_by(|a, b| self.compare(a, b));
        Ok(scored)
    }

    fn score(
        &self,
        candidate: &Candidate,
        ctx: &ConversationContext,
        text: &str,
        corroborating: Vec<String>,
    ) -> ScoredCandidate {
        let w = &self.config.weights;
        let mut reasons = Vec::new();

        let name_match = ctx
            .name_hints
            .iter()
            .map(|hint| match_name(hint, &candidate.display_name))
            .min_by_key(|m| match m {
                NameMatch::Exact => 0,
                NameMatch::Phonetic => 1,
                NameMatch::Partial => 2,
                NameMatch::None => 3,
            })
            .unwrap_or(NameMatch::None);
        let name_score = match name_match {
            NameMatch::Exact => {
                reasons.push("exact name match".to_string());
                w.exact_name
            }
            NameMatch::Phonetic => {
                reasons.push("phonetic name match".to_string());
                w.phonetic_name
            }
            NameMatch::Partial => {
                reasons.push("partial name match".to_string());
                w.partial_name
            }
            NameMatch::None => 0.0,
        };

        let blob = normalize_name(&candidate.text_blob());
        let mut context_score = 0.0;

        let location = ctx
            .locations
            .iter()
            .find(|term| contains_term(&blob, term))
            .cloned()
            .or_else(|| {
                // Without explicit terms, look for the profile's own location in the transcript.
                let own = candidate.field_str("location")?;
                let city = own.split(',').next()?.trim();
                contains_term(text, city).then(|| city.to_string())
            });
        if let Some(location) = location {
            reasons.push(format!("location '{location}'"));
            context_score += w.location;
        }

        if let Some(profession) = ctx.professions.iter().find(|t| contains_term(&blob, t)) {
            reasons.push(format!("profession '{profession}'"));
            context_score += w.profession;
        }

        if let Some(period) = ctx.timeline.iter().find(|t| contains_term(&blob, t)) {
            reasons.push(format!("timeline '{period}'"));
            context_score += w.timeline;
        }
        let context_score = context_score.min(w.context_cap);

        let corroboration =
            (corroborating.len() as f32 * w.corroboration).min(w.corroboration_cap);
        if !corroborating.is_empty() {
            reasons.push(format!("corroborated by {}", corroborating.join(", ")));
        }

        let confidence = (name_score + context_score + corroboration).clamp(0.0, 1.0);
        let reasoning = if reasons.is_empty() {
            "no matching signals".to_string()
        } else {
            reasons.join("; ")
        };

        ScoredCandidate {
            candidate: candidate.clone(),
            confidence,
            band: ConfidenceBand::from_confidence(confidence),
            corroborating_sources: corroborating,
            reasoning,
        }
    }

    fn priority(&self, source: &str) -> usize {
        self.config
            .source_priority
            .iter()
            .position(|s| s.eq_ignore_ascii_case(source))
            .unwrap_or(usize::MAX)
    }

    /// Confidence descending, then source priority, then source name, then id.
    fn compare(&self, a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| {
                self.priority(&a.candidate.source)
                    .cmp(&self.priority(&b.candidate.source))
            })
            .then_with(|| a.candidate.source.cmp(&b.candidate.source))
            .then_with(|| a.candidate.external_id.cmp(&b.candidate.external_id))
    }

    /// Apply the actionable floor to a ranked list.
    pub fn classify(&self, ranked: Vec<ScoredCandidate>) -> ResolvedIdentity {
        let Some(best) = ranked.first() else {
            return ResolvedIdentity::unresolved("no candidates returned by any source");
        };
        let confidence = best.confidence;
        let band = ConfidenceBand::from_confidence(confidence);

        if confidence >= self.config.min_actionable_confidence && band != ConfidenceBand::Low {
            let high_confidence = confidence >= self.config.high_confidence;
            let mut ranked = ranked;
            // Below the high-confidence bar every candidate stays up for review.
            let chosen = if high_confidence {
                ranked.remove(0)
            } else {
                ranked[0].clone()
            };
            let reasoning = format!(
                "{} match on {} ({}): {}",
                band, chosen.candidate.source, chosen.candidate.display_name, chosen.reasoning
            );
            ResolvedIdentity {
                high_confidence,
                chosen: Some(chosen),
                confidence,
                band,
                alternatives: ranked,
                reasoning,
            }
        } else {
            ResolvedIdentity {
                chosen: None,
                confidence,
                band,
                high_confidence: false,
                reasoning: format!(
                    "best candidate scored {confidence:.2}, below the actionable threshold; {} alternatives need manual review",
                    ranked.len()
                ),
                alternatives: ranked,
            }
        }
    }

    /// Blend an LLM judgement into the top of a rule-based ranking.
    ///
    /// Each rescored candidate ends at the mean of the two scores. Any LLM
    /// failure leaves that candidate's rule score in place.
    pub async fn rescore_with_llm(
        &self,
        llm: &LlmProvider,
        mut ranked: Vec<ScoredCandidate>,
        ctx: &ConversationContext,
    ) -> Vec<ScoredCandidate> {
        if !llm.is_available() {
            return ranked;
        }

        for scored in ranked.iter_mut().take(LLM_RESCORE_LIMIT) {
            let prompt = prompts::identity_rescoring_prompt(ctx, &scored.candidate);
            let judged = llm
                .complete_structured::<LlmJudgement>(
                    &prompt,
                    Some(prompts::IDENTITY_JUDGE_SYSTEM_PROMPT),
                )
                .await;
            match judged {
                Ok(judgement) if judgement.confidence.is_finite() => {
                    let llm_score = judgement.confidence.clamp(0.0, 1.0);
                    scored.confidence = ((scored.confidence + llm_score) / 2.0).clamp(0.0, 1.0);
                    scored.band = ConfidenceBand::from_confidence(scored.confidence);
                    if !judgement.reasoning.trim().is_empty() {
                        scored.reasoning =
                            format!("{}; llm: {}", scored.reasoning, judgement.reasoning.trim());
                    }
                }
                Ok(_) => {
                    tracing::warn!(source = %scored.candidate.source, "LLM returned a non-finite confidence, keeping rule score");
                }
                Err(e) => {
                    tracing::warn!(source = %scored.candidate.source, error = %e, "LLM rescoring failed, keeping rule score");
                }
            }
        }

        ranked.sort_by(|a, b| self.compare(a, b));
        ranked
    }
}

#[derive(Debug, Deserialize)]
struct LlmJudgement {
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionConfig;
    use pretty_assertions::assert_eq;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(ResolutionConfig::default())
    }

    fn ctx(names: &[&str]) -> ConversationContext {
        ConversationContext {
            name_hints: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_soundex_codes() {
        assert_eq!(soundex("Robert").as_deref(), Some("R163"));
        assert_eq!(soundex("Rupert").as_deref(), Some("R163"));
        assert_eq!(soundex("Ashcraft").as_deref(), Some("A261"));
        assert_eq!(soundex("Tymczak").as_deref(), Some("T522"));
        assert_eq!(soundex("Lee").as_deref(), Some("L000"));
        assert_eq!(soundex("123"), None);
    }

    #[test]
    fn test_name_match_strengths() {
        assert_eq!(match_name("Jane Doe", "jane  DOE"), NameMatch::Exact);
        assert_eq!(match_name("Jon Smith", "John Smyth"), NameMatch::Phonetic);
        assert_eq!(match_name("Jane Doe", "Jane Williams"), NameMatch::Partial);
        assert_eq!(match_name("Jane Doe", "janedoe"), NameMatch::Partial);
        assert_eq!(match_name("Jane Doe", "Marcus Lindqvist"), NameMatch::None);
        assert_eq!(match_name("", "Jane Doe"), NameMatch::None);
    }

    #[test]
    fn test_empty_candidates_is_unresolved() {
        let resolved = resolver().resolve(&[], &ctx(&["Jane Doe"])).unwrap();
        assert!(resolved.chosen.is_none());
        assert!(resolved.alternatives.is_empty());
        assert_eq!(resolved.band, ConfidenceBand::Low);
        assert!(!resolved.high_confidence);
    }

    #[test]
    fn test_three_sources_with_location_is_high() {
        let candidates = vec![
            Candidate::new("linkedin", "li/jane", "Jane Doe")
                .with_field("location", "Berlin, Germany"),
            Candidate::new("github", "janedoe", "Jane Doe").with_field("location", "Berlin"),
            Candidate::new("twitter", "tw/jane", "Jane Doe").with_field("bio", "Coffee in Berlin"),
        ];
        let context = ConversationContext {
            name_hints: vec!["Jane Doe".to_string()],
            locations: vec!["Berlin".to_string()],
            ..Default::default()
        };
        let resolved = resolver().resolve(&candidates, &context).unwrap();

        assert!(resolved.confidence >= 0.8, "confidence {}", resolved.confidence);
        assert_eq!(resolved.band, ConfidenceBand::High);
        assert!(resolved.high_confidence);
        let chosen = resolved.chosen.unwrap();
        // Equal scores fall back to configured priority.
        assert_eq!(chosen.candidate.source, "linkedin");
        assert_eq!(chosen.corroborating_sources, vec!["github", "twitter"]);
        assert_eq!(resolved.alternatives.len(), 2);
    }

    #[test]
    fn test_low_confidence_surfaces_all_as_alternatives() {
        let candidates = vec![
            Candidate::new("web", "https://a.test", "Jane Williams"),
            Candidate::new("github", "jw", "Jane W"),
        ];
        let resolved = resolver().resolve(&candidates, &ctx(&["Jane Doe"])).unwrap();
        assert!(resolved.chosen.is_none());
        assert_eq!(resolved.alternatives.len(), 2);
        assert_eq!(resolved.band, ConfidenceBand::Low);
    }

    #[test]
    fn test_medium_band_is_actionable_but_not_high_confidence() {
        let candidates = vec![Candidate::new("github", "janedoe", "Jane Doe")
            .with_field("bio", "Data engineer")];
        let context = ConversationContext {
            name_hints: vec!["Jane Doe".to_string()],
            professions: vec!["data engineer".to_string()],
            ..Default::default()
        };
        let resolved = resolver().resolve(&candidates, &context).unwrap();
        assert!((resolved.confidence - 0.65).abs() < 1e-6);
        assert_eq!(resolved.band, ConfidenceBand::Medium);
        assert!(!resolved.high_confidence);
        let chosen = resolved.chosen.as_ref().unwrap();
        assert_eq!(resolved.alternatives.len(), 1);
        assert_eq!(resolved.alternatives[0].candidate.external_id, chosen.candidate.external_id);
    }

    #[test]
    fn test_confidence_non_decreasing_with_corroboration() {
        let r = resolver();
        let context = ctx(&["Jane Doe"]);
        let all = [
            Candidate::new("linkedin", "a", "Jane Doe"),
            Candidate::new("github", "b", "Jane Doe"),
            Candidate::new("twitter", "c", "Jane Doe"),
            Candidate::new("instagram", "d", "Jane Doe"),
        ];
        let mut previous = 0.0;
        for n in 1..=all.len() {
            let ranked = r.rank(&all[..n], &context).unwrap();
            let linkedin = ranked
                .iter()
                .find(|s| s.candidate.source == "linkedin")
                .unwrap()
                .confidence;
            assert!(linkedin >= previous);
            previous = linkedin;
        }
    }

    #[test]
    fn test_context_contribution_is_capped() {
        let candidate = Candidate::new("linkedin", "a", "Jane Doe")
            .with_field("headline", "Nurse at Charite")
            .with_field("location", "Berlin")
            .with_field("summary", "Since 2015");
        let context = ConversationContext {
            name_hints: vec!["Jane Doe".to_string()],
            locations: vec!["Berlin".to_string()],
            professions: vec!["nurse".to_string()],
            timeline: vec!["2015".to_string()],
            ..Default::default()
        };
        let ranked = resolver().rank(&[candidate], &context).unwrap();
        assert!((ranked[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_location_from_transcript_text() {
        let candidate =
            Candidate::new("github", "jd", "Jane Doe").with_field("location", "Lisbon, Portugal");
        let context = ConversationContext {
            name_hints: vec!["Jane Doe".to_string()],
            text: "She just moved to Lisbon last spring.".to_string(),
            ..Default::default()
        };
        let ranked = resolver().rank(&[candidate], &context).unwrap();
        assert!((ranked[0].confidence - 0.65).abs() < 1e-6);
        assert!(ranked[0].reasoning.contains("lisbon") || ranked[0].reasoning.contains("Lisbon"));
    }

    #[test]
    fn test_ties_break_by_priority_then_name_then_id() {
        let candidates = vec![
            Candidate::new("mastodon", "z", "Someone Else"),
            Candidate::new("bluesky", "y", "Someone Else 2"),
            Candidate::new("web", "b", "Another Person"),
            Candidate::new("web", "a", "Different Human"),
        ];
        let ranked = resolver().rank(&candidates, &ctx(&["Jane Doe"])).unwrap();
        let order: Vec<(&str, &str)> = ranked
            .iter()
            .map(|s| (s.candidate.source.as_str(), s.candidate.external_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("web", "a"), ("web", "b"), ("bluesky", "y"), ("mastodon", "z")]
        );
    }

    #[test]
    fn test_malformed_candidate_fails_fast() {
        let bad = Candidate::new("github", "", "Jane Doe");
        let err = resolver().resolve(&[bad], &ctx(&["Jane Doe"])).unwrap_err();
        assert!(matches!(err, KedError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rescoring_without_llm_keeps_ranking() {
        let r = resolver();
        let context = ctx(&["Jane Doe"]);
        let ranked = r
            .rank(&[Candidate::new("github", "jd", "Jane Doe")], &context)
            .unwrap();
        let rescored = r
            .rescore_with_llm(&LlmProvider::unavailable("test"), ranked.clone(), &context)
            .await;
        assert_eq!(rescored, ranked);
    }
}
