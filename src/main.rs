//! Condense CLI - agent-backed summarisation of URLs, files, and text
//!
//! The application logic is contained in lib.rs, and this file is
//! responsible for parsing arguments and handling top-level errors.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use condense::agent::{classify_failure, AgentClient};
use condense::record::Importance;
use condense::session::{AnalysisInput, RequestOptions, SessionError, SummarizerSession};
use condense::{Config, History, SearchIndex, SummaryRecord};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "condense")]
#[command(version, about = "Summarize web pages and text with a remote agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a URL, a file, or inline text
    Analyze {
        /// URL or text to analyze
        input: String,
        /// Read the input as a local file path
        #[arg(long)]
        file: bool,
        /// Wait for the complete response instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Search stored summaries
    Search {
        /// Search query
        query: String,
    },
    /// Manage the analysis history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List stored summaries, most recent first
    List,
    /// Delete one entry by id
    Delete { id: String },
    /// Delete every entry
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Analyze {
            input,
            file,
            no_stream,
        } => {
            let input = if file {
                AnalysisInput::File(PathBuf::from(input))
            } else {
                AnalysisInput::detect(&input)
            };

            let client = AgentClient::new(&config.agent)?;
            let history = History::open(config.storage.path.join("history"))?;
            let options = RequestOptions {
                temperature: config.agent.temperature,
                max_tokens: config.agent.max_tokens,
            };
            let mut session = SummarizerSession::new(client, history, options);

            let result = if no_stream || !config.agent.streaming {
                session.analyze(&input).await
            } else {
                let mut on_chunk = |chunk: &str| {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                };
                let result = session.analyze_streaming(&input, &mut on_chunk).await;
                println!();
                result
            };

            match result {
                Ok(record) => {
                    // Index for full-text search; a broken index never
                    // blocks showing the result.
                    let search_path = config.storage.path.join("search_index");
                    if let Ok(search_index) = SearchIndex::open(&search_path) {
                        if let Err(e) = search_index.index_record(&record) {
                            eprintln!("Warning: failed to index summary: {}", e);
                        }
                    }
                    print_record(&record);
                }
                Err(SessionError::Agent(error)) => {
                    eprintln!("{}", classify_failure(&error).message().red());
                    std::process::exit(1);
                }
                Err(error) => return Err(error.into()),
            }
        }
        Commands::Search { query } => {
            let history = History::open(config.storage.path.join("history"))?;

            // Try tantivy first, fall back to a substring scan.
            let search_path = config.storage.path.join("search_index");
            let urls = if let Ok(search_index) = SearchIndex::open(&search_path) {
                match search_index.search(&query, 20) {
                    Ok(urls) if !urls.is_empty() => urls,
                    _ => simple_search(&history, &query)?,
                }
            } else {
                simple_search(&history, &query)?
            };

            if urls.is_empty() {
                println!("No results found for: {}", query);
            } else {
                println!("Search results for '{}':\n", query);
                for url in &urls {
                    if let Ok(Some(entry)) = history.get_by_url(url) {
                        println!(
                            "📄 {} ({})",
                            entry.record.title.bold(),
                            entry.saved_at.format("%Y-%m-%d %H:%M")
                        );
                        println!("   {}", entry.url);
                        println!("   {}\n", entry.record.summary);
                    }
                }
            }
        }
        Commands::History { action } => {
            let history = History::open(config.storage.path.join("history"))?;
            match action {
                HistoryAction::List => {
                    let entries = history.list()?;
                    if entries.is_empty() {
                        println!("No stored summaries found.");
                    } else {
                        println!("Stored summaries ({}):\n", entries.len());
                        for entry in entries {
                            println!(
                                "📄 {} ({})",
                                entry.record.title.bold(),
                                entry.saved_at.format("%Y-%m-%d %H:%M")
                            );
                            println!("   id: {}", entry.id.dimmed());
                            println!("   {}\n", entry.url);
                        }
                    }
                }
                HistoryAction::Delete { id } => {
                    if history.delete(&id)? {
                        println!("Deleted {}", id);
                    } else {
                        println!("No entry with id {}", id);
                    }
                }
                HistoryAction::Clear => {
                    history.clear()?;
                    println!("History cleared.");
                }
            }
        }
    }

    Ok(())
}

fn print_record(record: &SummaryRecord) {
    println!("\n=== {} ===\n", record.title.bold());
    println!("{}\n", record.summary);

    if !record.key_points.is_empty() {
        println!("📌 Key Points:");
        for point in &record.key_points {
            println!("  • {}", point);
        }
    }

    if !record.keywords.is_empty() {
        println!("\n🏷️  Keywords:");
        println!("  {}", record.keywords.join(", "));
    }

    if !record.highlights.is_empty() {
        println!("\n✨ Highlights:");
        for highlight in &record.highlights {
            println!("  • [{}] {}", importance_label(highlight.importance), highlight.text);
        }
    }

    println!(
        "\n{}",
        format!("{} · {}", record.reading_time, record.source_url).dimmed()
    );
}

fn importance_label(importance: Importance) -> colored::ColoredString {
    match importance {
        Importance::High => "high".red(),
        Importance::Medium => "medium".yellow(),
        Importance::Low => "low".normal(),
    }
}

/// Simple substring search fallback when the tantivy index is unavailable
fn simple_search(history: &History, query: &str) -> anyhow::Result<Vec<String>> {
    let query_lower = query.to_lowercase();
    let entries = history.list()?;

    let results: Vec<String> = entries
        .into_iter()
        .filter(|entry| {
            let record = &entry.record;
            record.title.to_lowercase().contains(&query_lower)
                || record.summary.to_lowercase().contains(&query_lower)
                || record
                    .key_points
                    .iter()
                    .any(|p| p.to_lowercase().contains(&query_lower))
                || record
                    .keywords
                    .iter()
                    .any(|k| k.to_lowercase().contains(&query_lower))
        })
        .map(|entry| entry.url)
        .collect();

    Ok(results)
}
