//! librarianctl - drive a Think session from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use librarian_shared::{Constraints, SearchAction, SearchResult, SearchState};
use librarianctl::{opening_request, ThinkClient};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "librarianctl", version)]
#[command(about = "Requester CLI for librariand")]
struct Cli {
    /// Daemon address (default: $LIBRARIAN_ADDR or 127.0.0.1:50051)
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one Think session and print the outcome as JSON
    Think {
        /// The user's question
        query: String,

        #[arg(long)]
        subject: String,

        /// JSON file with the search results returned for every search
        /// directive: an array of records or {"search_results": [...]}
        #[arg(long)]
        results: Option<PathBuf>,

        /// 0 uses the daemon default
        #[arg(long, default_value_t = 0)]
        max_loops: i32,

        /// 0 uses the daemon default
        #[arg(long, default_value_t = 0)]
        max_results: i32,

        #[arg(long)]
        request_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let addr = ThinkClient::discover_addr(cli.addr.as_deref());

    match cli.command {
        Command::Think {
            query,
            subject,
            results,
            max_loops,
            max_results,
            request_id,
        } => {
            let hits = match results {
                Some(path) => load_results(&path)?,
                None => Vec::new(),
            };
            let request = opening_request(
                request_id,
                &query,
                &subject,
                Constraints {
                    max_loops,
                    max_results,
                },
            );

            let client = ThinkClient::connect(&addr).await?;
            let outcome = client
                .think(request, |search: SearchAction| {
                    eprintln!("search: {:?}", search.queries_text);
                    let hits = hits.clone();
                    async move { Ok::<_, std::io::Error>(hits) }
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome.error_type.is_some() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn load_results(path: &Path) -> Result<Vec<SearchResult>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if let Ok(records) = serde_json::from_str::<Vec<SearchResult>>(&content) {
        return Ok(records);
    }
    let state = SearchState::from_payload(&content)
        .with_context(|| format!("{} is not a list of search results", path.display()))?;
    Ok(state.search_results)
}
