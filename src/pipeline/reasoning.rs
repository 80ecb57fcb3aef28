//! Synthesis engine: the reasoning branch and final answer generation.
//!
//! Synthesis prompts always open with a ground-truth facts header derived
//! from the typed state, so the model cannot contradict what retrieval and
//! the tools actually found.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::gateway::LlmGateway;
use crate::i18n::AnswerLanguage;
use crate::state::PipelineState;

const REASONING_MARKER: &str = "[REASONING]";
const ANSWER_MARKER: &str = "[ANSWER]";

pub struct SynthesisEngine {
    llm: Arc<dyn LlmGateway>,
    retrieval: RetrievalConfig,
    language: AnswerLanguage,
    verbose: bool,
}

/// Synthesis output: the answer text plus the deterministic confidence
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    pub reasoning: String,
    pub confidence: f32,
}

impl SynthesisEngine {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        retrieval: RetrievalConfig,
        language: AnswerLanguage,
        verbose: bool,
    ) -> Self {
        Self {
            llm,
            retrieval,
            language,
            verbose,
        }
    }

    /// The parallel reasoning branch: free-form analysis of the query given
    /// the knowledge context. Failure degrades to an empty context, never an
    /// error.
    pub async fn reason(&self, state: &PipelineState) -> String {
        let system = format!(
            "You are the analysis step of a food-delivery assistant. \
             Analyze the user's request and the retrieved data, note what is \
             answerable and what is missing. Be brief. {}",
            self.language.prompt_instruction()
        );
        let user = format!(
            "Query: {}\nIntent: {}\n\nRetrieved products:\n{}",
            state.original_query,
            state.intent.kind,
            if state.knowledge_context.is_empty() {
                "(none)"
            } else {
                &state.knowledge_context
            }
        );
        match self.llm.generate(&system, &user).await {
            Ok(text) => text,
            Err(e) => {
                eprintln!("⚠️ Reasoning branch failed, continuing without it: {}", e);
                String::new()
            }
        }
    }

    /// Final answer synthesis over the merged state.
    pub async fn synthesize(&self, state: &PipelineState) -> Synthesis {
        let confidence = self.confidence(state);

        // High-similarity single-product searches get a direct templated
        // answer without a model round-trip.
        if state.tool_context.is_empty()
            && state.max_similarity() >= self.retrieval.skip_description_threshold
            && !state.knowledge_results.is_empty()
        {
            if self.verbose {
                println!("   ⚡ High-similarity match, skipping model synthesis");
            }
            return Synthesis {
                answer: self.template_answer(state),
                reasoning: String::new(),
                confidence,
            };
        }

        let system = format!(
            "You are a customer-facing assistant for a Vietnamese food \
             delivery shop. Answer strictly from the facts provided; if a \
             fact is absent, say you do not know instead of guessing. \
             Respond with a {} section and then a {} section containing only \
             the customer-facing answer. {}",
            REASONING_MARKER,
            ANSWER_MARKER,
            self.language.prompt_instruction()
        );
        let user = self.synthesis_prompt(state);

        match self.llm.generate(&system, &user).await {
            Ok(text) => {
                let (reasoning, answer) = split_sections(&text);
                Synthesis {
                    answer,
                    reasoning,
                    confidence,
                }
            }
            Err(e) => {
                eprintln!("⚠️ Synthesis model failed, using templated answer: {}", e);
                Synthesis {
                    answer: self.template_answer(state),
                    reasoning: String::new(),
                    confidence: 0.5,
                }
            }
        }
    }

    /// Deterministic confidence: retrieval strength dominates, corroborating
    /// tool data and reasoning context add fixed increments.
    pub fn confidence(&self, state: &PipelineState) -> f32 {
        let mut confidence = 0.5 * state.max_similarity();
        if !state.tool_context.is_empty() {
            confidence += 0.3;
        }
        if !state.reasoning_context.is_empty() {
            confidence += 0.2;
        }
        confidence.min(1.0)
    }

    /// Ground-truth facts header + accumulated contexts
    fn synthesis_prompt(&self, state: &PipelineState) -> String {
        let mut facts = Vec::new();
        facts.push(format!(
            "- Retrieval found {} matching product(s).",
            state.knowledge_results.len()
        ));
        if let Some(id) = state.tool_visible_product_id() {
            facts.push(format!(
                "- Product {} exists in the catalog (confirmed by tool data).",
                id
            ));
        }
        let has_sales = state
            .tool_results
            .iter()
            .any(|o| o.result.get("months").is_some());
        facts.push(if has_sales {
            "- Sales data IS available below; use it.".to_string()
        } else {
            "- No sales data is available; do not invent figures.".to_string()
        });

        let mut prompt = format!(
            "Customer query: {}\n\nGround-truth facts:\n{}\n",
            state.original_query,
            facts.join("\n")
        );
        if !state.knowledge_context.is_empty() {
            prompt.push_str(&format!("\nProduct data:\n{}", state.knowledge_context));
        }
        if !state.tool_context.is_empty() {
            prompt.push_str(&format!("\nTool data:\n{}", state.tool_context));
        }
        if !state.reasoning_context.is_empty() {
            prompt.push_str(&format!("\nAnalysis:\n{}", state.reasoning_context));
        }
        prompt
    }

    /// Model-free answer assembled from the contexts. Used for the
    /// high-similarity fast path and as the degraded-mode fallback.
    fn template_answer(&self, state: &PipelineState) -> String {
        let mut answer = String::new();
        if !state.knowledge_results.is_empty() {
            match self.language {
                AnswerLanguage::Vietnamese => {
                    answer.push_str("Shop tìm thấy các sản phẩm sau:\n")
                }
                AnswerLanguage::English => answer.push_str("We found these products:\n"),
            }
            for m in &state.knowledge_results {
                answer.push_str(&format!("- {}", m.product_name));
                if let Some(price) = m.price {
                    answer.push_str(&format!(" ({:.0}đ)", price));
                }
                answer.push('\n');
            }
        }
        if !state.tool_context.is_empty() {
            answer.push_str(&state.tool_context);
        }
        if answer.is_empty() {
            answer = match self.language {
                AnswerLanguage::Vietnamese => {
                    "Xin lỗi, shop chưa tìm thấy thông tin phù hợp với yêu cầu của bạn."
                        .to_string()
                }
                AnswerLanguage::English => {
                    "Sorry, we could not find anything matching your request.".to_string()
                }
            };
        }
        answer
    }
}

/// Split a model response into its reasoning and answer sections. Closing
/// markers are optional; a response without markers is treated as
/// answer-only.
fn split_sections(text: &str) -> (String, String) {
    match text.find(ANSWER_MARKER) {
        Some(pos) => {
            let reasoning = text[..pos]
                .replace(REASONING_MARKER, "")
                .replace("[/REASONING]", "")
                .trim()
                .to_string();
            let answer = text[pos + ANSWER_MARKER.len()..]
                .replace("[/ANSWER]", "")
                .trim()
                .to_string();
            (reasoning, answer)
        }
        None => (String::new(), text.trim().to_string()),
    }
}
