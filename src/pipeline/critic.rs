//! Critic: scores a synthesized answer against the retrieved evidence and
//! regenerates it when a hallucination is flagged.
//!
//! The critic is advisory. Any failure inside it (model down, malformed
//! verdict) degrades to a neutral pass so the pipeline still answers.

use std::sync::Arc;

use serde::Deserialize;

use crate::gateway::LlmGateway;
use crate::i18n::AnswerLanguage;
use crate::state::PipelineState;

/// Model verdict as requested from the critic prompt
#[derive(Debug, Deserialize)]
struct RawVerdict {
    has_hallucination: bool,
    accuracy: f32,
    completeness: f32,
    relevance: f32,
}

/// Critic output applied to the state by the orchestrator
#[derive(Debug, Clone)]
pub struct CriticVerdict {
    pub score: f32,
    pub has_hallucination: bool,
    /// Replacement answer when regeneration ran (or a disclaimered original
    /// when regeneration itself failed)
    pub verified_answer: Option<String>,
}

/// Neutral verdict used when the critic cannot run at all
const NEUTRAL_SCORE: f32 = 0.7;

pub struct Critic {
    llm: Arc<dyn LlmGateway>,
    language: AnswerLanguage,
    verbose: bool,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmGateway>, language: AnswerLanguage, verbose: bool) -> Self {
        Self {
            llm,
            language,
            verbose,
        }
    }

    /// Review the current answer. Always returns a verdict.
    pub async fn review(&self, state: &PipelineState) -> CriticVerdict {
        let system = "You are a strict fact-checker for a food-delivery assistant. \
                      Compare the answer against the evidence only. Reply with a \
                      single JSON object: {\"has_hallucination\": bool, \
                      \"accuracy\": 0.0-1.0, \"completeness\": 0.0-1.0, \
                      \"relevance\": 0.0-1.0}. No other text.";
        let user = format!(
            "Customer query: {}\n\nEvidence:\n{}\n{}\n\nAnswer under review:\n{}",
            state.original_query, state.knowledge_context, state.tool_context, state.final_answer
        );

        let raw = match self.llm.generate(system, &user).await {
            Ok(text) => text,
            Err(e) => {
                eprintln!("⚠️ Critic unavailable, passing answer through: {}", e);
                return CriticVerdict {
                    score: NEUTRAL_SCORE,
                    has_hallucination: false,
                    verified_answer: None,
                };
            }
        };

        let verdict = match parse_verdict(&raw) {
            Some(v) => v,
            None => {
                eprintln!("⚠️ Critic verdict unparseable, passing answer through");
                return CriticVerdict {
                    score: NEUTRAL_SCORE,
                    has_hallucination: false,
                    verified_answer: None,
                };
            }
        };

        let score = (verdict.accuracy + verdict.completeness + verdict.relevance) / 3.0;
        if self.verbose {
            println!(
                "   🧐 Critic score {:.2}, hallucination: {}",
                score, verdict.has_hallucination
            );
        }

        if !verdict.has_hallucination {
            return CriticVerdict {
                score,
                has_hallucination: false,
                verified_answer: None,
            };
        }

        let verified = self.regenerate(state).await;
        CriticVerdict {
            score,
            has_hallucination: true,
            verified_answer: Some(verified),
        }
    }

    /// Regenerate the answer under a stricter evidence-only prompt. If the
    /// regeneration itself fails, the original answer is kept with an
    /// explicit disclaimer appended.
    async fn regenerate(&self, state: &PipelineState) -> String {
        let system = format!(
            "Rewrite the answer so that every claim is backed by the \
             evidence. Remove any product, price or figure not present in \
             the evidence. Output only the corrected customer-facing answer. {}",
            self.language.prompt_instruction()
        );
        let user = format!(
            "Customer query: {}\n\nEvidence:\n{}\n{}\n\nAnswer to correct:\n{}",
            state.original_query, state.knowledge_context, state.tool_context, state.final_answer
        );
        match self.llm.generate(&system, &user).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                eprintln!("⚠️ Regeneration failed, appending disclaimer: {}", e);
                let disclaimer = match self.language {
                    AnswerLanguage::Vietnamese => {
                        "\n\n(Lưu ý: một số thông tin trên chưa được kiểm chứng, \
                         bạn vui lòng xác nhận lại với shop.)"
                    }
                    AnswerLanguage::English => {
                        "\n\n(Note: some of the above could not be verified, \
                         please double-check with the shop.)"
                    }
                };
                format!("{}{}", state.final_answer, disclaimer)
            }
        }
    }
}

/// Lenient JSON extraction: tolerate code fences and prose around the object
fn parse_verdict(text: &str) -> Option<RawVerdict> {
    let stripped = text.replace("```json", "").replace("```", "");
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}
