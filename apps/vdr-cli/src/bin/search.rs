use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vdr-search", about = "Index a corpus and answer a batch of queries as JSON")]
struct Args {
    /// Corpus directory (defaults to `corpus.dir` from config)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Results per query (defaults to `search.top_k`)
    #[arg(short, long)]
    k: Option<usize>,

    /// Query strings; one result list is printed per query, in order
    #[arg(required = true)]
    queries: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vdr_cli::init_tracing();
    let args = Args::parse();
    let settings = vdr_cli::load_settings()?;
    let dir = vdr_cli::corpus_dir(args.corpus, &settings)?;
    let k = args.k.unwrap_or(settings.search.top_k);

    let engine = vdr_cli::build_engine(settings)?;
    engine.rebuild(&dir).await?;
    tracing::info!(queries = args.queries.len(), k, "running batch search");
    let results = engine.search(&args.queries, k).await?;

    let response = vdr_cli::to_response(&dir.to_string_lossy(), results);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
