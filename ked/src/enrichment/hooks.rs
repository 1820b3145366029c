//! Conversation openers drawn from the resolved person's profiles.

use super::traits::person_profiles;
use crate::models::{Candidate, ResolvedIdentity};

pub const MAX_HOOKS: usize = 5;

fn hook_for(candidate: &Candidate) -> Option<String> {
    let source = candidate.source.to_lowercase();
    match source.as_str() {
        "twitter" => candidate
            .field_str("recent_topic")
            .map(|topic| format!("your recent post on X about {topic}")),
        "github" => candidate
            .field_str("top_repo")
            .map(|repo| format!("your GitHub project \"{repo}\"")),
        "instagram" => candidate
            .field_str("aesthetic")
            .map(|aesthetic| format!("your {aesthetic} vibe on IG")),
        "tiktok" => candidate
            .field_str("niche")
            .map(|niche| format!("your {niche} content on TikTok")),
        _ => None,
    }
}

/// Up to [`MAX_HOOKS`] distinct hooks, in profile order. Empty when the
/// identity was not resolved.
pub fn social_hooks(resolved: &ResolvedIdentity, candidates: &[Candidate]) -> Vec<String> {
    let mut hooks: Vec<String> = Vec::new();
    for profile in person_profiles(resolved, candidates) {
        if let Some(hook) = hook_for(profile) {
            if !hooks.contains(&hook) {
                hooks.push(hook);
            }
        }
        if hooks.len() == MAX_HOOKS {
            break;
        }
    }
    hooks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceBand, ScoredCandidate};

    fn resolved(chosen: Candidate) -> ResolvedIdentity {
        ResolvedIdentity {
            chosen: Some(ScoredCandidate {
                candidate: chosen,
                confidence: 0.85,
                band: ConfidenceBand::High,
                corroborating_sources: vec![],
                reasoning: String::new(),
            }),
            confidence: 0.85,
            band: ConfidenceBand::High,
            high_confidence: true,
            alternatives: vec![],
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_hooks_from_same_person() {
        let gh = Candidate::new("github", "jd", "Jane Doe").with_field("top_repo", "raft-lite");
        let tw = Candidate::new("twitter", "jd", "Jane Doe").with_field("recent_topic", "WASM");
        let other = Candidate::new("tiktok", "x", "Other Person").with_field("niche", "cooking");
        let ig = Candidate::new("instagram", "jd", "jane doe").with_field("aesthetic", "film");

        let hooks = social_hooks(&resolved(gh.clone()), &[gh, tw, other, ig]);
        assert_eq!(
            hooks,
            vec![
                "your GitHub project \"raft-lite\"",
                "your recent post on X about WASM",
                "your film vibe on IG",
            ]
        );
    }

    #[test]
    fn test_no_hooks_without_resolution() {
        let gh = Candidate::new("github", "jd", "Jane Doe").with_field("top_repo", "raft-lite");
        assert!(social_hooks(&ResolvedIdentity::unresolved("ambiguous"), &[gh]).is_empty());
    }

    #[test]
    fn test_blank_fields_are_ignored() {
        let tw = Candidate::new("twitter", "jd", "Jane Doe").with_field("recent_topic", "  ");
        assert!(social_hooks(&resolved(tw.clone()), &[tw]).is_empty());
    }
}
