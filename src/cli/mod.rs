use crate::config::{Config, LLMProvider};
use crate::i18n::AnswerLanguage;
use clap::Parser;
use std::path::PathBuf;

/// vifood-rag - multi-agent RAG chatbot engine for a food-delivery shop
#[derive(Parser, Debug)]
#[command(name = "vifood-rag")]
#[command(
    about = "Multi-agent retrieval-augmented chatbot for a Vietnamese food delivery shop. \
             Routes a query through intent classification, entity resolution, progressive \
             fallback retrieval, structured tool calls, synthesis and a hallucination critic."
)]
#[command(version)]
pub struct Args {
    /// Question to answer; omit for interactive chat mode
    pub query: Option<String>,

    /// Image file to search by (alone or alongside a text query)
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Restrict product search to one category
    #[arg(long)]
    pub category: Option<String>,

    /// Number of products to retrieve
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Catalog data file
    #[arg(long, default_value = "./catalog.json")]
    pub catalog: PathBuf,

    /// File with one query per line, processed as a batch
    #[arg(short, long)]
    pub batch: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Disable the hallucination critic
    #[arg(long)]
    pub no_critic: bool,

    /// Disable all caches
    #[arg(long)]
    pub no_cache: bool,

    /// Verbose progress logging
    #[arg(short, long)]
    pub verbose: bool,

    /// LLM provider (openai, deepseek, gemini, ollama)
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// LLM API base URL
    #[arg(long)]
    pub llm_api_base_url: Option<String>,

    /// LLM API key
    #[arg(long)]
    pub llm_api_key: Option<String>,

    /// Model for routine generation
    #[arg(long)]
    pub model_efficient: Option<String>,

    /// Model used when the efficient one fails
    #[arg(long)]
    pub model_powerful: Option<String>,

    /// Answer language (vi, en)
    #[arg(long)]
    pub answer_language: Option<String>,
}

impl Args {
    /// Build the effective config: explicit config file, else `vifood.toml`
    /// in the working directory, else defaults; CLI flags override all.
    pub fn to_config(&self) -> Config {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path).unwrap_or_else(|e| {
                eprintln!("⚠️ Cannot read config file {:?} ({}), using defaults", path, e);
                Config::default()
            }),
            None => {
                let default_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("vifood.toml");
                if default_path.exists() {
                    Config::from_file(&default_path).unwrap_or_else(|e| {
                        eprintln!(
                            "⚠️ Cannot read default config {:?} ({}), using defaults",
                            default_path, e
                        );
                        Config::default()
                    })
                } else {
                    Config::default()
                }
            }
        };

        if let Some(provider_str) = &self.llm_provider {
            match provider_str.parse::<LLMProvider>() {
                Ok(provider) => config.llm.provider = provider,
                Err(_) => {
                    eprintln!("⚠️ Unknown provider: {}, keeping default", provider_str)
                }
            }
        }
        if let Some(url) = &self.llm_api_base_url {
            config.llm.api_base_url = url.clone();
        }
        if let Some(key) = &self.llm_api_key {
            config.llm.api_key = key.clone();
        }
        if let Some(model) = &self.model_efficient {
            config.llm.model_efficient = model.clone();
        }
        if let Some(model) = &self.model_powerful {
            config.llm.model_powerful = model.clone();
        }

        if let Some(language_str) = &self.answer_language {
            match language_str.parse::<AnswerLanguage>() {
                Ok(language) => config.answer_language = language,
                Err(_) => eprintln!(
                    "⚠️ Unknown answer language: {}, keeping Vietnamese",
                    language_str
                ),
            }
        }

        if let Some(top_k) = self.top_k {
            config.retrieval.top_k = top_k;
        }
        if self.no_critic {
            config.pipeline.enable_critic = false;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        config.verbose = self.verbose;

        config
    }
}
