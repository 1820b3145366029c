use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `KED_RATE_LIMITS`.
/// Format: comma-separated `source=limit/window_secs` entries, e.g. `instagram=5/60,github=60/3600`
pub fn parse_rate_limits(raw: &str) -> HashMap<String, RateLimitRule> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let parsed = entry.split_once('=').and_then(|(source, rule)| {
                let (limit, window) = rule.split_once('/')?;
                let limit = limit.trim().parse::<u32>().ok()?;
                let window_secs = window.trim().parse::<u64>().ok().filter(|w| *w > 0)?;
                let source = source.trim().to_lowercase();
                if source.is_empty() {
                    return None;
                }
                Some((source, RateLimitRule { limit, window_secs }))
            });
            if parsed.is_none() {
                tracing::warn!("Invalid rate limit entry '{}' in KED_RATE_LIMITS, skipping", entry);
            }
            parsed
        })
        .collect()
}

/// Parse `KED_EGRESS_POOL`.
/// Format: comma-separated `class=proxy_url` entries; `direct` means no proxy.
pub fn parse_egress_pool(raw: &str) -> Vec<EgressConfig> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let Some((class, target)) = entry.split_once('=') else {
                tracing::warn!("Invalid egress entry '{}' in KED_EGRESS_POOL, skipping", entry);
                return None;
            };
            let class = class.trim().to_lowercase();
            let target = target.trim();
            if class.is_empty() || target.is_empty() {
                tracing::warn!("Invalid egress entry '{}' in KED_EGRESS_POOL, skipping", entry);
                return None;
            }
            let proxy_url = if target.eq_ignore_ascii_case("direct") {
                None
            } else {
                Some(target.to_string())
            };
            Some(EgressConfig { class, proxy_url })
        })
        .collect()
}

/// Parse `KED_FUSION_WEIGHTS` as `transcript,professional,personality`.
pub fn parse_fusion_weights(raw: &str) -> Option<FusionWeights> {
    let parts: Vec<f32> = raw
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [t, p, s] if [*t, *p, *s].iter().all(|w| w.is_finite() && *w >= 0.0) => {
            Some(FusionWeights {
                transcript: *t,
                professional: *p,
                personality: *s,
            })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embeddings: EmbeddingsConfig,
    pub transcription: TranscriptionConfig,
    pub llm: Option<LlmConfig>,
    pub sources: SourcesConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_keys: Vec<String>,
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub local_path: Option<String>,
    /// Applied to every connection; concurrent jobs write to the same file.
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub synchronous: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "file:ked.db".to_string(),
            auth_token: None,
            local_path: None,
            busy_timeout_ms: 5_000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: "openai/text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key: None,
            base_url: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_file_size: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "openai/whisper-1".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 300,
            max_file_size: 26_214_400,
        }
    }
}

/// LLM configuration for chat/completion models
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Blend an LLM judgement into the rule-based identity confidence.
    pub identity_rescoring: bool,
    /// Pull names out of the transcript when a job arrives without hints.
    pub name_extraction: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub serper_api_key: Option<String>,
    pub serper_base_url: String,
    pub github_token: Option<String>,
    pub github_api_url: String,
    /// Sources queried when a submission does not name any.
    pub default_sources: Vec<String>,
    pub max_results_per_source: usize,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            serper_api_key: None,
            serper_base_url: "https://google.serper.dev".to_string(),
            github_token: None,
            github_api_url: "https://api.github.com".to_string(),
            default_sources: DEFAULT_SOURCE_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_results_per_source: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window_secs: u64,
}

/// Built-in per-source quotas, overridable through `KED_RATE_LIMITS`.
pub fn default_rate_limits() -> HashMap<String, RateLimitRule> {
    [
        ("web", 100, 86_400),
        ("instagram", 5, 60),
        ("tiktok", 3, 60),
        ("twitter", 15, 900),
        ("github", 60, 3_600),
        ("linkedin", 10, 3_600),
    ]
    .into_iter()
    .map(|(source, limit, window_secs)| {
        (source.to_string(), RateLimitRule { limit, window_secs })
    })
    .collect()
}

pub const DEFAULT_SOURCE_PRIORITY: &[&str] =
    &["linkedin", "github", "twitter", "instagram", "tiktok", "web"];

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that suspend a source.
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    /// Half-life applied to egress success/failure counts.
    pub reliability_half_life_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 3_600,
            reliability_half_life_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EgressConfig {
    pub class: String,
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub source_timeout_secs: u64,
    pub margin_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            source_timeout_secs: 20,
            margin_ms: 2_000,
        }
    }
}

/// Additive weights for the rule-based identity scorer.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionWeights {
    pub exact_name: f32,
    pub phonetic_name: f32,
    pub partial_name: f32,
    pub location: f32,
    pub profession: f32,
    pub timeline: f32,
    /// Upper bound on the combined context contribution.
    pub context_cap: f32,
    /// Boost per additional independent source naming the same person.
    pub corroboration: f32,
    pub corroboration_cap: f32,
}

impl Default for ResolutionWeights {
    fn default() -> Self {
        Self {
            exact_name: 0.5,
            phonetic_name: 0.35,
            partial_name: 0.2,
            location: 0.15,
            profession: 0.15,
            timeline: 0.1,
            context_cap: 0.3,
            corroboration: 0.1,
            corroboration_cap: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionConfig {
    pub source_priority: Vec<String>,
    pub weights: ResolutionWeights,
    pub min_actionable_confidence: f32,
    pub high_confidence: f32,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            source_priority: DEFAULT_SOURCE_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
            weights: ResolutionWeights::default(),
            min_actionable_confidence: 0.6,
            high_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub transcript: f32,
    pub professional: f32,
    pub personality: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            transcript: 0.4,
            professional: 0.4,
            personality: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    pub rate_limits: HashMap<String, RateLimitRule>,
    pub circuit: CircuitConfig,
    pub egress_pool: Vec<EgressConfig>,
    pub dispatch: DispatchConfig,
    pub resolution: ResolutionConfig,
    pub fusion: FusionWeights,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            rate_limits: default_rate_limits(),
            circuit: CircuitConfig::default(),
            egress_pool: Vec::new(),
            dispatch: DispatchConfig::default(),
            resolution: ResolutionConfig::default(),
            fusion: FusionWeights::default(),
        }
    }
}

impl EnrichmentConfig {
    fn from_env() -> Self {
        let mut rate_limits = default_rate_limits();
        if let Ok(raw) = env::var("KED_RATE_LIMITS") {
            rate_limits.extend(parse_rate_limits(&raw));
        }

        let defaults = ResolutionWeights::default();
        let weights = ResolutionWeights {
            exact_name: parse_env_or("KED_WEIGHT_EXACT_NAME", defaults.exact_name),
            phonetic_name: parse_env_or("KED_WEIGHT_PHONETIC_NAME", defaults.phonetic_name),
            partial_name: parse_env_or("KED_WEIGHT_PARTIAL_NAME", defaults.partial_name),
            location: parse_env_or("KED_WEIGHT_LOCATION", defaults.location),
            profession: parse_env_or("KED_WEIGHT_PROFESSION", defaults.profession),
            timeline: parse_env_or("KED_WEIGHT_TIMELINE", defaults.timeline),
            context_cap: parse_env_or("KED_WEIGHT_CONTEXT_CAP", defaults.context_cap),
            corroboration: parse_env_or("KED_WEIGHT_CORROBORATION", defaults.corroboration),
            corroboration_cap: parse_env_or(
                "KED_WEIGHT_CORROBORATION_CAP",
                defaults.corroboration_cap,
            ),
        };

        let fusion = match env::var("KED_FUSION_WEIGHTS") {
            Ok(raw) => parse_fusion_weights(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    "Invalid KED_FUSION_WEIGHTS '{}', expected three non-negative numbers. Using default.",
                    raw
                );
                FusionWeights::default()
            }),
            Err(_) => FusionWeights::default(),
        };

        Self {
            rate_limits,
            circuit: CircuitConfig {
                failure_threshold: parse_env_or("KED_CIRCUIT_FAILURE_THRESHOLD", 3),
                cooldown_secs: parse_env_or("KED_CIRCUIT_COOLDOWN_SECS", 3_600),
                reliability_half_life_secs: parse_env_or("KED_EGRESS_HALF_LIFE_SECS", 3_600),
            },
            egress_pool: env::var("KED_EGRESS_POOL")
                .map(|raw| parse_egress_pool(&raw))
                .unwrap_or_default(),
            dispatch: DispatchConfig {
                source_timeout_secs: parse_env_or("KED_SOURCE_TIMEOUT_SECS", 20),
                margin_ms: parse_env_or("KED_DISPATCH_MARGIN_MS", 2_000),
            },
            resolution: ResolutionConfig {
                source_priority: env::var("KED_SOURCE_PRIORITY")
                    .map(|raw| parse_list(&raw))
                    .ok()
                    .filter(|list| !list.is_empty())
                    .unwrap_or_else(|| ResolutionConfig::default().source_priority),
                weights,
                min_actionable_confidence: parse_env_or("KED_MIN_ACTIONABLE_CONFIDENCE", 0.6),
                high_confidence: parse_env_or("KED_HIGH_CONFIDENCE", 0.7),
            },
            fusion,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("KED_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("KED_PORT", 3000),
                api_keys: env::var("KED_API_KEYS")
                    .map(|keys| {
                        keys.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                log_format: env::var("KED_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "file:ked.db".to_string()),
                auth_token: env::var("DATABASE_AUTH_TOKEN").ok(),
                local_path: env::var("DATABASE_LOCAL_PATH").ok(),
                busy_timeout_ms: parse_env_or("DATABASE_BUSY_TIMEOUT_MS", 5_000),
                journal_mode: env::var("DATABASE_JOURNAL_MODE")
                    .unwrap_or_else(|_| "WAL".to_string()),
                synchronous: env::var("DATABASE_SYNCHRONOUS")
                    .unwrap_or_else(|_| "NORMAL".to_string()),
            },
            embeddings: EmbeddingsConfig {
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "openai/text-embedding-3-small".to_string()),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", 1536),
                api_key: env::var("EMBEDDING_API_KEY").ok(),
                base_url: env::var("EMBEDDING_BASE_URL").ok(),
                timeout_secs: parse_env_or("EMBEDDING_TIMEOUT", 30),
                max_retries: parse_env_or("EMBEDDING_MAX_RETRIES", 3),
            },
            transcription: TranscriptionConfig {
                model: env::var("TRANSCRIPTION_MODEL")
                    .unwrap_or_else(|_| "openai/whisper-1".to_string()),
                api_key: env::var("TRANSCRIPTION_API_KEY").ok(),
                base_url: env::var("TRANSCRIPTION_BASE_URL").ok(),
                timeout_secs: parse_env_or("TRANSCRIPTION_TIMEOUT", 300),
                max_file_size: parse_env_or("TRANSCRIPTION_MAX_FILE_SIZE", 26_214_400),
            },
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
                identity_rescoring: parse_env_or("LLM_IDENTITY_RESCORING", false),
                name_extraction: parse_env_or("LLM_NAME_EXTRACTION", true),
            }),
            sources: SourcesConfig {
                serper_api_key: env::var("SERPER_API_KEY").ok().filter(|k| !k.is_empty()),
                serper_base_url: env::var("SERPER_BASE_URL")
                    .unwrap_or_else(|_| "https://google.serper.dev".to_string()),
                github_token: parse_env_opt("GITHUB_TOKEN"),
                github_api_url: env::var("GITHUB_API_URL")
                    .unwrap_or_else(|_| "https://api.github.com".to_string()),
                default_sources: env::var("KED_DEFAULT_SOURCES")
                    .map(|raw| parse_list(&raw))
                    .ok()
                    .filter(|list| !list.is_empty())
                    .unwrap_or_else(|| SourcesConfig::default().default_sources),
                max_results_per_source: parse_env_or("KED_MAX_RESULTS_PER_SOURCE", 5),
            },
            enrichment: EnrichmentConfig::from_env(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known providers that use OpenAI-compatible APIs
const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio", "local"];

/// Known LLM providers that use OpenAI-compatible APIs
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse a model name into (provider, model) tuple.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}
