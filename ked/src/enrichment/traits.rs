//! Projection of a resolved person's social footprint into the four-axis
//! trait space, and the outreach strategy derived from it.
//!
//! Each axis reads a disjoint set of signals:
//!
//! | axis         | sources            | signals                                         |
//! |--------------|--------------------|-------------------------------------------------|
//! | professional | linkedin, github   | headline, experience, skills, repos, stars      |
//! | creative     | instagram, tiktok  | bio, posts, videos, followers                   |
//! | casual       | twitter            | followers, tweets, casual vocabulary            |
//! | realtime     | any                | `last_active` of the freshest profile           |
//!
//! An axis with no source present stays at 0.5.

use chrono::{DateTime, Utc};

use super::resolution::normalize_name;
use crate::models::{Candidate, CommunicationStrategy, ResolvedIdentity, TraitScores};

const CASUAL_KEYWORDS: [&str; 7] = ["lol", "haha", "meme", "funny", "just", "honestly", "tbh"];

/// Profiles that belong to the chosen person: the chosen one plus
/// same-named profiles from other sources, one per source.
pub(crate) fn person_profiles<'a>(
    resolved: &'a ResolvedIdentity,
    candidates: &'a [Candidate],
) -> Vec<&'a Candidate> {
    let Some(chosen) = resolved.chosen.as_ref() else {
        return Vec::new();
    };
    let name = normalize_name(&chosen.candidate.display_name);
    let mut profiles = vec![&chosen.candidate];
    for candidate in candidates {
        let new_source = !profiles
            .iter()
            .any(|p| p.source.eq_ignore_ascii_case(&candidate.source));
        if new_source && normalize_name(&candidate.display_name) == name {
            profiles.push(candidate);
        }
    }
    profiles
}

fn profile_from<'a>(profiles: &[&'a Candidate], source: &str) -> Option<&'a Candidate> {
    profiles
        .iter()
        .find(|c| c.source.eq_ignore_ascii_case(source))
        .copied()
}

fn scaled(value: f64, full_at: f64, max: f32) -> f32 {
    if value <= 0.0 {
        0.0
    } else {
        (max as f64 * value / full_at).min(max as f64) as f32
    }
}

fn professional(profiles: &[&Candidate]) -> Option<f32> {
    let linkedin = profile_from(profiles, "linkedin");
    let github = profile_from(profiles, "github");
    if linkedin.is_none() && github.is_none() {
        return None;
    }
    let mut score = 0.0;
    if let Some(li) = linkedin {
        if li.has_field("headline") {
            score += 0.2;
        }
        if li.has_field("experience") {
            score += 0.3;
        }
        if li.has_field("skills") {
            score += 0.2;
        }
    }
    if let Some(gh) = github {
        if gh.field_f64("public_repos").unwrap_or(0.0) > 0.0 {
            score += 0.1;
        }
        score += scaled(gh.field_f64("stars").unwrap_or(0.0), 100.0, 0.3);
    }
    Some(score)
}

fn creative(profiles: &[&Candidate]) -> Option<f32> {
    let instagram = profile_from(profiles, "instagram");
    let tiktok = profile_from(profiles, "tiktok");
    if instagram.is_none() && tiktok.is_none() {
        return None;
    }
    let mut score = 0.0;
    if let Some(ig) = instagram {
        if ig.has_field("bio") {
            score += 0.15;
        }
        score += scaled(ig.field_f64("posts").unwrap_or(0.0), 100.0, 0.25);
        if ig.field_f64("followers").unwrap_or(0.0) > 100.0 {
            score += 0.2;
        }
    }
    if let Some(tt) = tiktok {
        if tt.has_field("bio") {
            score += 0.15;
        }
        score += scaled(tt.field_f64("videos").unwrap_or(0.0), 100.0, 0.25);
    }
    Some(score)
}

fn casual(profiles: &[&Candidate]) -> Option<f32> {
    let twitter = profile_from(profiles, "twitter")?;
    let mut score = 0.0;
    if twitter.field_f64("followers").unwrap_or(0.0) > 100.0 {
        score += 0.3;
    }
    score += scaled(twitter.field_f64("tweets").unwrap_or(0.0), 1000.0, 0.4);

    let text = normalize_name(&format!(
        "{} {}",
        twitter.field_str("bio").unwrap_or_default(),
        twitter.field_str("recent_text").unwrap_or_default()
    ));
    let words: Vec<&str> = text.split(' ').collect();
    let hits = CASUAL_KEYWORDS
        .iter()
        .filter(|kw| words.contains(kw))
        .count();
    score += (hits as f32 * 0.1).min(0.3);
    Some(score)
}

fn realtime(profiles: &[&Candidate], now: DateTime<Utc>) -> Option<f32> {
    let latest = profiles
        .iter()
        .filter_map(|c| c.field_str("last_active"))
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .max()?;
    let days = (now - latest).num_seconds().max(0) as f32 / 86_400.0;
    let score = if days <= 1.0 {
        1.0
    } else if days <= 7.0 {
        0.8 - (days - 1.0) * 0.057
    } else if days <= 30.0 {
        (0.3 - (days - 7.0) * 0.01).max(0.1)
    } else {
        0.0
    };
    Some(score)
}

pub fn map_traits(resolved: &ResolvedIdentity, candidates: &[Candidate]) -> TraitScores {
    map_traits_at(resolved, candidates, Utc::now())
}

pub fn map_traits_at(
    resolved: &ResolvedIdentity,
    candidates: &[Candidate],
    now: DateTime<Utc>,
) -> TraitScores {
    let profiles = person_profiles(resolved, candidates);
    let axis = |score: Option<f32>| score.map_or(TraitScores::NEUTRAL, |s| s.clamp(0.0, 1.0));
    TraitScores {
        professional: axis(professional(&profiles)),
        creative: axis(creative(&profiles)),
        casual: axis(casual(&profiles)),
        realtime: axis(realtime(&profiles, now)),
    }
}

/// The two strongest axes, ties resolved in declaration order.
fn top_two(traits: &TraitScores) -> [(&'static str, f32); 2] {
    let mut axes = traits.axes();
    axes.sort_by(|a, b| b.1.total_cmp(&a.1));
    [axes[0], axes[1]]
}

/// `<primary>_<secondary>`, e.g. `professional_realtime`.
pub fn profile_type(traits: &TraitScores) -> String {
    let [primary, secondary] = top_two(traits);
    format!("{}_{}", primary.0, secondary.0)
}

fn channels(axis: &str) -> &'static [&'static str] {
    match axis {
        "professional" => &["LinkedIn", "Email", "GitHub"],
        "creative" => &["Instagram", "TikTok", "Portfolio"],
        "casual" => &["Twitter", "Discord", "Slack"],
        _ => &["Twitter", "LinkedIn Feed", "Email"],
    }
}

pub fn communication_strategy(traits: &TraitScores) -> CommunicationStrategy {
    let mut primary_channels: Vec<String> = Vec::new();
    for (axis, _) in top_two(traits) {
        for channel in channels(axis) {
            if !primary_channels.iter().any(|c| c == channel) {
                primary_channels.push(channel.to_string());
            }
        }
    }

    let (tone, content_focus) = if traits.professional > 0.7 {
        ("formal, industry-focused", "Career opportunities, industry trends")
    } else if traits.creative > 0.7 {
        ("personable, creative, visual", "Creative projects, aesthetic appeal")
    } else if traits.casual > 0.7 {
        ("conversational, friendly", "Community, shared interests, fun facts")
    } else {
        ("balanced, professional but warm", "Versatile - highlight relevant aspects")
    };

    CommunicationStrategy {
        primary_channels,
        tone: tone.to_string(),
        content_focus: content_focus.to_string(),
    }
}
