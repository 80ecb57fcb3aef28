//! LLM client - unified text-generation entry for the pipeline

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::config::LLMConfig;
use crate::gateway::{LlmError, LlmGateway};

mod providers;

use providers::ProviderClient;

/// LLM client with retry, model fallback (efficient -> powerful) and a
/// transparent secondary-provider fallback.
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    primary: ProviderClient,
    fallback: Option<ProviderClient>,
}

impl LLMClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let primary = ProviderClient::new(&config.provider, &config.api_key, &config.api_base_url)?;
        let fallback = match &config.fallback_provider {
            Some(provider) => Some(ProviderClient::new(
                provider,
                &config.fallback_api_key,
                &config.fallback_api_base_url,
            )?),
            None => None,
        };
        Ok(Self {
            config,
            primary,
            fallback,
        })
    }

    /// Check that the model endpoint answers at all
    pub async fn check_connection(&self) -> Result<()> {
        println!("🔄 Checking model connection...");
        match self
            .generate_text("You are a helpful assistant.", "Hello")
            .await
        {
            Ok(_) => {
                println!("✅ Model connection ok");
                Ok(())
            }
            Err(e) => {
                eprintln!("❌ Model connection failed: {}", e);
                Err(e)
            }
        }
    }

    /// Shared retry loop for provider calls
    async fn retry_with_backoff<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let max_retries = self.config.retry_attempts;
        let retry_delay_ms = self.config.retry_delay_ms;
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    retries += 1;
                    eprintln!(
                        "❌ Model call failed, retrying (attempt {} / {}): {}",
                        retries, max_retries, err
                    );
                    if retries >= max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                }
            }
        }
    }

    /// One generation attempt against a specific client and model, bounded
    /// by the configured per-call timeout.
    async fn prompt_model(
        &self,
        client: &ProviderClient,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let agent = client.create_agent(model, system_prompt, &self.config);
        let deadline = Duration::from_secs(self.config.timeout_seconds);
        match tokio::time::timeout(deadline, agent.prompt(user_prompt)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "generation timed out after {}s",
                self.config.timeout_seconds
            )),
        }
    }

    /// Generate text, walking the fallback ladder: primary/efficient,
    /// primary/powerful, then the secondary provider when configured.
    pub async fn generate_text(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let efficient = self
            .retry_with_backoff(|| async {
                self.prompt_model(
                    &self.primary,
                    &self.config.model_efficient,
                    system_prompt,
                    user_prompt,
                )
                .await
            })
            .await;
        let powerful_err = match efficient {
            Ok(text) => return Ok(text),
            Err(e) => {
                eprintln!(
                    "❌ Efficient model exhausted retries, switching to {}: {}",
                    self.config.model_powerful, e
                );
                match self
                    .retry_with_backoff(|| async {
                        self.prompt_model(
                            &self.primary,
                            &self.config.model_powerful,
                            system_prompt,
                            user_prompt,
                        )
                        .await
                    })
                    .await
                {
                    Ok(text) => return Ok(text),
                    Err(e) => e,
                }
            }
        };

        match &self.fallback {
            Some(fallback) => {
                eprintln!(
                    "❌ Primary provider exhausted, trying secondary provider: {}",
                    powerful_err
                );
                self.retry_with_backoff(|| async {
                    self.prompt_model(
                        fallback,
                        &self.config.model_efficient,
                        system_prompt,
                        user_prompt,
                    )
                    .await
                })
                .await
            }
            None => Err(powerful_err),
        }
    }
}

#[async_trait]
impl LlmGateway for LLMClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.generate_text(system_prompt, user_prompt)
            .await
            .map_err(|e| LlmError::Generation(e.to_string()))
    }
}
