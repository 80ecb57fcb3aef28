//! Orchestrator: drives a query through routing, entity resolution,
//! retrieval, tools, synthesis and the critic.
//!
//! Stage order: Routed -> EntityResolved -> KnowledgeRetrieved ->
//! [Tool ∥ Reasoning] -> Synthesized -> [Critiqued] -> Done, with a
//! terminal EarlyReturn when the hard guard fires. Consistency repairs
//! run at fixed checkpoints; each repair is logged when it changes state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::gateway::{Embedder, LlmGateway, StructuredStore, VectorIndex};
use crate::i18n::AnswerLanguage;
use crate::lexicon::Lexicon;
use crate::state::{
    IntentKind, KnowledgeSnapshot, MatchSource, PipelineState, ProductMatch, QueryRequest,
    QueryResponse, QueryType, ToolCall,
};

use super::critic::Critic;
use super::entity::EntityResolver;
use super::knowledge::KnowledgeRetriever;
use super::reasoning::SynthesisEngine;
use super::router::IntentRouter;
use super::tools::ToolExecutor;

pub struct Orchestrator {
    router: IntentRouter,
    entity: EntityResolver,
    knowledge: KnowledgeRetriever,
    tools: ToolExecutor,
    synthesis: SynthesisEngine,
    critic: Critic,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmGateway>,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndex>,
        structured: Arc<dyn StructuredStore>,
    ) -> Self {
        let lexicon = Arc::new(Lexicon::new());
        let caches_on = config.cache.enabled;
        let entity_cache = caches_on.then_some(config.cache.entity_capacity);
        let knowledge_cache = caches_on.then_some(config.cache.knowledge_capacity);
        let tool_ttl = caches_on.then(|| Duration::from_secs(config.cache.tool_ttl_seconds));

        Self {
            router: IntentRouter::new(lexicon.clone()),
            entity: EntityResolver::new(
                lexicon.clone(),
                structured.clone(),
                config.retrieval.fuzzy_ratio,
                entity_cache,
            ),
            knowledge: KnowledgeRetriever::new(
                lexicon.clone(),
                structured.clone(),
                vector,
                embedder,
                config.retrieval.clone(),
                knowledge_cache,
                config.verbose,
            ),
            tools: ToolExecutor::new(lexicon, structured, tool_ttl, config.verbose),
            synthesis: SynthesisEngine::new(
                llm.clone(),
                config.retrieval.clone(),
                config.answer_language,
                config.verbose,
            ),
            critic: Critic::new(llm, config.answer_language, config.verbose),
            config,
        }
    }

    /// Process one request. Never returns an error: any stage failure that
    /// escapes its local degradation path becomes an apology answer with
    /// the `error` field set and the accumulated state retained.
    pub async fn process(&self, request: QueryRequest) -> QueryResponse {
        let mut state = PipelineState::new(&request.query, request.query_type());
        if self.config.verbose {
            println!("🤖 Processing request {} ({})", state.request_id, state.query_type);
        }

        if let Err(e) = self.run_stages(&request, &mut state).await {
            eprintln!("❌ Pipeline failed for request {}: {}", state.request_id, e);
            state.error = Some(e.to_string());
            if state.final_answer.is_empty() {
                state.final_answer = self.apology();
            }
        }
        QueryResponse::from_state(state)
    }

    /// Process a batch with bounded concurrency. Output order matches input
    /// order; one failing item never affects its siblings.
    pub async fn process_batch(&self, requests: Vec<QueryRequest>) -> Vec<QueryResponse> {
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.max_concurrency.max(1)));
        let futures = requests.into_iter().map(|request| {
            let semaphore = semaphore.clone();
            async move {
                // Closed only if the semaphore is dropped, which it is not
                let _permit = semaphore.acquire().await;
                self.process(request).await
            }
        });
        join_all(futures).await
    }

    async fn run_stages(&self, request: &QueryRequest, state: &mut PipelineState) -> Result<()> {
        // Routed
        let routed = self.router.route(&state.query, state.query_type);
        state.intent = routed.classification;
        state.sub_queries = routed.sub_queries;
        state.needs_knowledge_agent = routed.decision.use_knowledge;
        state.needs_tool_agent = routed.decision.use_tool;
        state.needs_reasoning = routed.decision.use_reasoning;
        if self.config.verbose {
            println!("   🧭 Intent: {} ({:.2})", state.intent.kind, state.intent.confidence);
        }

        // Multi-intent: the product sub-query drives retrieval, the original
        // query stays untouched for prompts and the lexical filter.
        if let Some(sub) = state.sub_queries.get(IntentKind::ProductSearch.as_str()) {
            state.query = sub.clone();
        }

        // EntityResolved
        if !state.query.trim().is_empty()
            && let Some(resolved) = self.entity.resolve(&state.query).await
        {
            if self.config.verbose {
                println!("   🔎 Entity: '{}' -> '{}'", resolved.raw, resolved.normalized);
            }
            state.resolved_entity = Some(resolved.raw);
            state.entity_normalized = Some(resolved.normalized);
            state.entity_validated = resolved.validated;
        }

        // KnowledgeRetrieved
        if state.needs_knowledge_agent {
            self.knowledge_stage(request, state).await?;
        }

        // The entity-not-found evaluation runs here when no tool stage is
        // coming; otherwise it is deferred so repair #1 can see tool output.
        let plan = if state.needs_tool_agent {
            self.tools.plan(state)
        } else {
            Vec::new()
        };
        if plan.is_empty() {
            self.evaluate_entity_not_found(state);
            if state.early_return {
                return Ok(());
            }
        }

        // Tool ∥ Reasoning
        let run_tools = !plan.is_empty();
        let run_reasoning = state.needs_reasoning;
        let parallel =
            run_tools && run_reasoning && self.config.pipeline.parallel_agents && !state.intent.is_multi();

        let pre_tool = state.snapshot_knowledge();
        if parallel {
            if self.config.verbose {
                println!("   ⚡ Running tool and reasoning branches in parallel");
            }
            let tool_branch = state.clone();
            let reasoning_branch = state.clone();
            let (tool_branch, reasoning_branch) = tokio::join!(
                self.tool_branch(tool_branch, &plan),
                self.reasoning_branch(reasoning_branch),
            );
            state.merge_parallel(tool_branch, reasoning_branch);
        } else {
            if run_tools {
                let branch = self.tool_branch(state.clone(), &plan).await;
                state.tool_results = branch.tool_results;
                state.tool_context = branch.tool_context;
            }
            if run_reasoning {
                let reasoning = self.synthesis.reason(state).await;
                state.reasoning_context = reasoning;
            }
        }

        // Repair #2: an agent stage must not wipe knowledge results
        restore_wiped_knowledge(state, &pre_tool, "agent stage");

        // Deferred entity-not-found evaluation, after the tool-confirmed
        // placeholder seeding has had a chance to run
        if run_tools {
            seed_tool_confirmed_product(state);
            self.evaluate_entity_not_found(state);
            if state.early_return {
                return Ok(());
            }
        }

        // Synthesized
        let pre_synthesis = state.snapshot_knowledge();
        let synthesis = self.synthesis.synthesize(state).await;
        state.final_answer = synthesis.answer;
        state.answer_confidence = synthesis.confidence;
        if state.reasoning_context.is_empty() && !synthesis.reasoning.is_empty() {
            state.reasoning_context = synthesis.reasoning;
        }

        // Repair #3: same invariant around synthesis
        restore_wiped_knowledge(state, &pre_synthesis, "synthesis");

        // Critiqued
        let critic_enabled = request
            .enable_critic
            .unwrap_or(self.config.pipeline.enable_critic);
        if critic_needed(
            critic_enabled,
            state.answer_confidence,
            self.config.pipeline.confidence_threshold,
            state.entity_not_found,
            state.knowledge_results.is_empty(),
        ) {
            if self.config.verbose {
                println!("   🧐 Running critic review");
            }
            let verdict = self.critic.review(state).await;
            state.critic_score = Some(verdict.score);
            state.has_hallucination = verdict.has_hallucination;
            state.final_answer_verified = verdict.verified_answer;
        }

        Ok(())
    }

    async fn knowledge_stage(
        &self,
        request: &QueryRequest,
        state: &mut PipelineState,
    ) -> Result<()> {
        let top_k = request.top_k.unwrap_or(self.config.retrieval.top_k);
        let category = request.category_filter.as_deref();

        let mut results = Vec::new();
        if matches!(state.query_type, QueryType::Text | QueryType::Hybrid)
            && !state.query.trim().is_empty()
        {
            results = self
                .knowledge
                .search(&state.query, &state.original_query, category, top_k)
                .await?;
        }
        if matches!(state.query_type, QueryType::Image | QueryType::Hybrid)
            && let Some(image) = &request.image
        {
            let image_results = self.knowledge.search_by_image(image, category, top_k).await?;
            results.extend(image_results);
            results = crate::state::dedupe_by_max_similarity(results);
            results.truncate(top_k);
        }

        if self.config.verbose {
            println!("   📚 Knowledge retrieval: {} result(s)", results.len());
        }
        state.knowledge_context = self.knowledge.format_context(&results);
        state.knowledge_results = results;
        Ok(())
    }

    async fn tool_branch(&self, mut branch: PipelineState, plan: &[ToolCall]) -> PipelineState {
        let outcomes = self.tools.execute(plan).await;
        branch.tool_context = self.tools.format_context(&outcomes);
        branch.tool_results = outcomes;
        branch
    }

    async fn reasoning_branch(&self, mut branch: PipelineState) -> PipelineState {
        let reasoning = self.synthesis.reason(&branch).await;
        branch.reasoning_context = reasoning;
        branch
    }

    /// Hard guard: a resolved entity with zero surviving knowledge results
    /// means the product genuinely is not in the catalog. Answer that
    /// directly instead of letting the model improvise.
    fn evaluate_entity_not_found(&self, state: &mut PipelineState) {
        if !state.needs_knowledge_agent
            || !state.knowledge_results.is_empty()
            || state.resolved_entity.is_none()
        {
            return;
        }
        state.entity_not_found = true;
        state.early_return = true;
        let entity = state
            .entity_normalized
            .clone()
            .or_else(|| state.resolved_entity.clone())
            .unwrap_or_default();
        let message = match self.config.answer_language {
            AnswerLanguage::Vietnamese => format!(
                "Xin lỗi, shop hiện không có sản phẩm \"{}\". Bạn thử tìm sản phẩm khác nhé!",
                entity
            ),
            AnswerLanguage::English => format!(
                "Sorry, we do not carry \"{}\" at the moment. Please try another product!",
                entity
            ),
        };
        if self.config.verbose {
            println!("   🛑 Entity '{}' not found, returning early", entity);
        }
        state.final_answer = message.clone();
        state.early_return_message = Some(message);
        state.answer_confidence = 0.9;
    }

    fn apology(&self) -> String {
        match self.config.answer_language {
            AnswerLanguage::Vietnamese => {
                "Xin lỗi, shop đang gặp sự cố kỹ thuật. Bạn vui lòng thử lại sau ít phút nhé!"
                    .to_string()
            }
            AnswerLanguage::English => {
                "Sorry, we hit a technical problem. Please try again in a few minutes!".to_string()
            }
        }
    }
}

/// Repair: a stage must never silently erase knowledge results. A non-empty
/// snapshot with zero surviving results is restored; anything else, a
/// partial trim included, is left alone.
fn restore_wiped_knowledge(state: &mut PipelineState, snapshot: &KnowledgeSnapshot, stage: &str) {
    if snapshot.is_empty() || !state.knowledge_results.is_empty() {
        return;
    }
    eprintln!(
        "⚠️ Repair: knowledge results wiped during {}, restoring {} entries",
        stage,
        snapshot.len()
    );
    state.restore_knowledge(snapshot);
}

/// Repair: a product id confirmed by tool output while knowledge_results is
/// empty seeds a placeholder match so the guard and synthesis see a
/// consistent state.
fn seed_tool_confirmed_product(state: &mut PipelineState) {
    if !state.knowledge_results.is_empty() {
        return;
    }
    let Some(product_id) = state.tool_visible_product_id() else {
        return;
    };
    eprintln!(
        "⚠️ Repair: tool output references product {} absent from knowledge results, seeding placeholder",
        product_id
    );
    let product_name = state
        .tool_results
        .iter()
        .find_map(|o| o.result.get("product_name").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("sản phẩm {}", product_id));
    state.knowledge_results.push(ProductMatch {
        product_id,
        product_name,
        category_id: String::new(),
        category_name: String::new(),
        price: None,
        similarity: 0.5,
        source: MatchSource::SqlExactMatch,
    });
}

/// The critic runs only when enabled and the answer looks risky
fn critic_needed(
    enabled: bool,
    confidence: f32,
    threshold: f32,
    entity_not_found: bool,
    zero_knowledge: bool,
) -> bool {
    enabled && (confidence < threshold || entity_not_found || zero_knowledge)
}
