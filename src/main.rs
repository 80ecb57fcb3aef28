use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use vifood_rag::backend::{HashEmbedder, InMemoryVectorIndex, JsonCatalogStore};
use vifood_rag::cli::Args;
use vifood_rag::gateway::{StructuredFallback, StructuredStore};
use vifood_rag::llm::LLMClient;
use vifood_rag::pipeline::Orchestrator;
use vifood_rag::state::{QueryRequest, QueryResponse};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.to_config();

    println!("🍜 vifood-rag - food delivery assistant");

    let llm = LLMClient::new(config.llm.clone())?;
    if let Err(e) = llm.check_connection().await {
        eprintln!("⚠️ Model unreachable, answers degrade to templates: {}", e);
    }

    let catalog = JsonCatalogStore::load(&args.catalog)?;
    let embedder = Arc::new(HashEmbedder::default());
    let vector = Arc::new(
        InMemoryVectorIndex::from_products(catalog.products(), embedder.as_ref()).await?,
    );
    let strategies: Vec<Arc<dyn StructuredStore>> = vec![Arc::new(catalog)];
    let structured = Arc::new(StructuredFallback::new(strategies));

    let orchestrator = Orchestrator::new(config, Arc::new(llm), embedder, vector, structured);

    if let Some(batch_path) = &args.batch {
        let raw = std::fs::read_to_string(batch_path)
            .with_context(|| format!("failed to read batch file: {:?}", batch_path))?;
        let requests: Vec<QueryRequest> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| request_from_args(&args, l))
            .collect::<Result<_>>()?;
        println!("🔄 Processing batch of {} queries", requests.len());
        for response in orchestrator.process_batch(requests).await {
            print_response(&response);
        }
        return Ok(());
    }

    if let Some(query) = &args.query {
        let response = orchestrator.process(request_from_args(&args, query)?).await;
        print_response(&response);
        return Ok(());
    }

    if args.image.is_some() {
        let response = orchestrator.process(request_from_args(&args, "")?).await;
        print_response(&response);
        return Ok(());
    }

    // Interactive chat mode
    println!("💬 Chat mode - empty line to quit");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let response = orchestrator.process(QueryRequest::text(line)).await;
        print_response(&response);
    }
    Ok(())
}

fn request_from_args(args: &Args, query: &str) -> Result<QueryRequest> {
    let image = match &args.image {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("failed to read image: {:?}", path))?,
        ),
        None => None,
    };
    Ok(QueryRequest {
        query: query.to_string(),
        image,
        category_filter: args.category.clone(),
        top_k: args.top_k,
        enable_critic: None,
    })
}

fn print_response(response: &QueryResponse) {
    println!("\n{}", response.final_answer);
    println!(
        "   (intent: {}, confidence: {:.2}{})",
        response.intent.kind,
        response.answer_confidence,
        match response.critic_score {
            Some(score) => format!(", critic: {:.2}", score),
            None => String::new(),
        }
    );
    if let Some(error) = &response.error {
        eprintln!("❌ {}", error);
    }
}
