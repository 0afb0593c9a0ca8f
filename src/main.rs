//! Command-line entry point (`osdr`).
//!
//! ```sh
//! osdr init
//! osdr ask "Which studies measured bone density loss?"
//! osdr interactive -s lab
//! ```
//!
//! `ask` and `interactive` load the configuration, index the corpus once and
//! then answer through [`RagPipeline`]. Logging goes to stderr and honours
//! `RUST_LOG`.

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{
    fs,
    io::{self, BufRead, Write},
    path::Path,
    sync::Arc,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use osdr_rag::{
    RagPipeline, Result,
    commands::{Cli, Commands},
    config::{RagConfig, load_config},
    config_dir,
    corpus::load_corpus_source,
    embedding::MiniLmEmbedder,
    generator::OpenAiModel,
    index::HnswVectorIndex,
    prompt::{PromptTemplate, load_template},
};

type Pipeline = RagPipeline<MiniLmEmbedder, HnswVectorIndex, OpenAiModel>;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<()> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };

    match cli.command {
        Commands::Init => init(&config_path),
        Commands::Ask { question, session } => {
            let pipeline = build_pipeline(&config_path).await?;
            let answer = pipeline.answer(&session, &question).await;
            debug!(status = ?answer.status, passages = answer.passages.len(), "answered");
            println!("{}", answer.text);
            Ok(())
        }
        Commands::Interactive { session } => {
            let pipeline = build_pipeline(&config_path).await?;
            interactive(&pipeline, &session).await
        }
    }
}

/// Load config, model and corpus, and index the corpus.
async fn build_pipeline(config_path: &Path) -> Result<Pipeline> {
    let config = load_config(config_path)?;
    debug!(collection = %config.collection_name, model = %config.model, "config loaded");

    let template = match &config.prompt_template {
        Some(path) => load_template(path)?,
        None => PromptTemplate::default(),
    };

    let model_id = config.embedding_model.clone();
    let embedder = tokio::task::spawn_blocking(move || MiniLmEmbedder::load(&model_id))
        .await
        .map_err(|e| osdr_rag::RagError::provider("embedding", e))??;

    let model = OpenAiModel::from_config(&config, &template.system_prompt);
    let pipeline = RagPipeline::new(
        Arc::new(embedder),
        Arc::new(HnswVectorIndex::new()),
        Arc::new(model),
        template,
        &config,
    )?;

    let records = load_corpus_source(&config.corpus_path).await?;
    let report = pipeline.reindex(&records).await?;
    info!(
        collection = %report.collection,
        indexed = report.indexed,
        skipped = report.skipped_records,
        "corpus indexed"
    );
    Ok(pipeline)
}

async fn interactive(pipeline: &Pipeline, session: &str) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        print!("You: ");
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let answer = pipeline.answer(session, question).await;
        println!("Assistant: {}\n", answer.text);
    }
    Ok(())
}

/// Write a default config file.
fn init(config_path: &Path) -> Result<()> {
    if let Some(dir) = config_path.parent() {
        info!("Creating config directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    let config = RagConfig::new(
        "CHANGEME",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "gemini-1.5-pro",
    );
    info!("Creating config file: {}", config_path.display());
    fs::write(config_path, serde_yaml::to_string(&config)?)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
