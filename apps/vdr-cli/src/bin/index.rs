use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vdr-index", about = "Build the page-image index once and report statistics")]
struct Args {
    /// Corpus directory (defaults to `corpus.dir` from config)
    #[arg(long)]
    corpus: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vdr_cli::init_tracing();
    let args = Args::parse();
    let settings = vdr_cli::load_settings()?;
    let dir = vdr_cli::corpus_dir(args.corpus, &settings)?;

    let engine = vdr_cli::build_engine(settings)?;
    let stats = engine.rebuild(&dir).await?;

    println!("Corpus: {}", dir.display());
    println!("Indexed {} images ({} vectors, dim {})", stats.entries, stats.total_vectors, stats.dim);
    println!("Cache hits: {}  encoded: {}", stats.cache_hits, stats.encoded);
    println!("Elapsed: {:.2?}", stats.elapsed);
    Ok(())
}
