use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::i18n::AnswerLanguage;

/// LLM provider kind
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Gemini => write!(f, "gemini"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "gemini" => Ok(LLMProvider::Gemini),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Answer language for user-facing text
    pub answer_language: AnswerLanguage,

    /// Verbose progress logging
    pub verbose: bool,

    /// LLM model configuration
    pub llm: LLMConfig,

    /// Retrieval thresholds and limits
    pub retrieval: RetrievalConfig,

    /// Pipeline orchestration configuration
    pub pipeline: PipelineConfig,

    /// Cache configuration
    pub cache: CacheConfig,
}

/// LLM model configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LLMConfig {
    /// Primary LLM provider kind
    pub provider: LLMProvider,

    /// LLM API key
    pub api_key: String,

    /// LLM API base url
    pub api_base_url: String,

    /// Cost-efficient model, preferred for routine generation
    pub model_efficient: String,

    /// High-quality model, used when the efficient model fails
    pub model_powerful: String,

    /// Secondary provider used transparently when the primary is down
    pub fallback_provider: Option<LLMProvider>,

    /// API key for the secondary provider
    pub fallback_api_key: String,

    /// API base url for the secondary provider
    pub fallback_api_base_url: String,

    /// Max tokens per completion
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f64,

    /// Retry attempts per call
    pub retry_attempts: u32,

    /// Delay between retries (milliseconds)
    pub retry_delay_ms: u64,

    /// Per-call timeout (seconds); kept short so the pipeline stays responsive
    pub timeout_seconds: u64,
}

/// Retrieval thresholds and limits.
///
/// These values are empirically tuned for the current catalog. They are
/// configuration, not constants; re-tune them before pointing the pipeline
/// at a different product domain.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of candidates requested from each retrieval tier
    pub top_k: usize,

    /// Hard similarity floor; results below it are dropped
    pub similarity_floor: f32,

    /// Minimum token ratio for fuzzy validity checks
    pub fuzzy_ratio: f32,

    /// Above this top-result similarity the synthesis step answers from the
    /// retrieved fields directly, skipping the LLM description pass
    pub skip_description_threshold: f32,
}

/// Pipeline orchestration configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Below this answer confidence the critic is consulted
    pub confidence_threshold: f32,

    /// Master switch for the critic stage
    pub enable_critic: bool,

    /// Allow the tool and reasoning agents to run concurrently
    pub parallel_agents: bool,

    /// Batch mode: maximum queries in flight at once
    pub max_concurrency: usize,
}

/// Cache configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Master switch for all component caches
    pub enabled: bool,

    /// Entity-resolution LRU capacity
    pub entity_capacity: usize,

    /// Knowledge-search FIFO capacity
    pub knowledge_capacity: usize,

    /// Tool-call result TTL (seconds)
    pub tool_ttl_seconds: u64,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            answer_language: AnswerLanguage::default(),
            verbose: false,
            llm: LLMConfig::default(),
            retrieval: RetrievalConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: std::env::var("VIFOOD_LLM_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://api.openai.com/v1"),
            model_efficient: String::from("gpt-4o-mini"),
            model_powerful: String::from("gpt-4o"),
            fallback_provider: None,
            fallback_api_key: std::env::var("VIFOOD_LLM_FALLBACK_API_KEY").unwrap_or_default(),
            fallback_api_base_url: String::new(),
            max_tokens: 4096,
            temperature: 0.1,
            retry_attempts: 3,
            retry_delay_ms: 1500,
            timeout_seconds: 8,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_floor: 0.5,
            fuzzy_ratio: 0.7,
            skip_description_threshold: 0.85,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            enable_critic: true,
            parallel_agents: true,
            max_concurrency: 4,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_capacity: 512,
            knowledge_capacity: 256,
            tool_ttl_seconds: 300,
        }
    }
}
