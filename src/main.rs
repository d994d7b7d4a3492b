use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use citeval::checkpoint::CheckpointStore;
use citeval::client::{HttpEvaluationClient, Provider};
use citeval::config::EvalConfig;
use citeval::error::EvalError;
use citeval::scheduler::EvalScheduler;
use citeval::{loader, report};

/// Batch consistency evaluation of annotated sentences against their cited
/// sources.
#[derive(Parser, Debug)]
#[command(name = "citeval", version, about)]
struct Cli {
    /// Evaluation provider: dashscope, openai, deepseek, or demo.
    #[arg(long, default_value = "dashscope")]
    provider: Provider,

    /// Model override; defaults to the provider's standard model.
    #[arg(long)]
    model: Option<String>,

    /// First rank to evaluate (inclusive).
    #[arg(long, default_value_t = 1)]
    rank_start: u32,

    /// Last rank to evaluate (inclusive).
    #[arg(long, default_value_t = 50)]
    rank_end: u32,

    /// Maximum simultaneous in-flight evaluation calls.
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Annotated-sentence JSON file.
    #[arg(long, default_value = "results/citation_results.json")]
    items: PathBuf,

    /// Citation reference-table JSON file.
    #[arg(long, default_value = "data/references.json")]
    references: PathBuf,

    /// Directory for checkpoints and result files.
    #[arg(long, default_value = "data/output")]
    output_dir: PathBuf,

    /// Start from scratch, ignoring any matching checkpoint.
    #[arg(long)]
    no_resume: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!(error = %e, "run failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), EvalError> {
    if cli.rank_start > cli.rank_end {
        return Err(EvalError::Config(format!(
            "rank range is empty: {} > {}",
            cli.rank_start, cli.rank_end
        )));
    }

    let config = EvalConfig {
        provider: cli.provider,
        model: cli.model,
        rank_start: cli.rank_start,
        rank_end: cli.rank_end,
        concurrency: cli.concurrency,
        resume: !cli.no_resume,
        checkpoint_dir: cli.output_dir.join("checkpoints"),
        output_dir: cli.output_dir.join("results"),
        ..EvalConfig::default()
    };

    let items = loader::load_items(&cli.items, config.rank_start, config.rank_end)?;
    if items.is_empty() {
        return Err(EvalError::Input(
            "no annotated sentences in the requested rank range".to_string(),
        ));
    }
    let references = loader::ReferenceTable::load(&cli.references)?;
    let groups = loader::group_by_rank(items, &references);

    let client = HttpEvaluationClient::from_config(&config)?;
    tracing::info!(provider = %config.provider, model = client.model(), "evaluation client ready");

    let store = CheckpointStore::new(
        &config.checkpoint_dir,
        config.provider.as_str(),
        config.rank_start,
        config.rank_end,
    )?;

    let outcome = EvalScheduler::new(&client, &config).run(&groups, &store).await?;
    let summary = report::write_outputs(&config.output_dir, &outcome.results)?;

    tracing::info!(
        total = summary.total,
        consistent = summary.consistent,
        inconsistent = summary.inconsistent,
        failed = summary.failed,
        fallback_classified = summary.fallback_classified,
        "evaluation complete"
    );
    tracing::info!(
        api_calls = outcome.stats.api_calls,
        input_tokens = outcome.stats.input_tokens,
        output_tokens = outcome.stats.output_tokens,
        total_tokens = outcome.stats.total_tokens(),
        "token usage"
    );
    Ok(())
}
