use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "shogi-cli")]
#[command(about = "Convert shogi analysis reports into the paginated problem archive")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Process problem.txt, problem_2.txt, ... into the archive (default)
    Sync,
    /// Show the pages currently listed in the archive index
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = shogi_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} reports={} batches={} archived={} index={}",
                summary.run_id,
                summary.processed_reports,
                summary.flushed_batches,
                summary.archived_total,
                summary.index_path
            );
        }
        Commands::Status => {
            let status = shogi_sync::archive_status_from_env().await?;
            println!("index: {} (last updated {})", status.index_path, status.last_updated);
            for page in &status.pages {
                println!("  {}: {}", page.filename, page.count);
            }
            println!("total: {}", status.total);
        }
    }

    Ok(())
}
