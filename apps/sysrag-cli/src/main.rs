use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sysrag_core::config::BackendKind;
use sysrag_core::types::Query;

mod app;
mod logging;

use app::App;

#[derive(Parser, Debug)]
#[command(name = "sysrag", about = "Index a document corpus and assemble retrieval context for questions")]
struct Cli {
    /// Directory holding config.toml and config.<env>.toml
    #[arg(long, env = "SYSRAG_CONFIG_DIR", default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Index backend, overriding index.backend (tantivy, lancedb, memory)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Index name, overriding index.name
    #[arg(long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a JSONL corpus, chunk it and build the index
    Build {
        /// A .jsonl file or a directory scanned recursively for them
        #[arg(long)]
        data: PathBuf,

        /// Replace an existing index of the same name
        #[arg(long)]
        rebuild: bool,
    },
    /// Retrieve and print the context for one question
    Ask {
        question: String,

        /// Number of candidates to retrieve
        #[arg(long)]
        k: Option<usize>,

        /// Skip post-retrieval compression for this query
        #[arg(long)]
        no_compression: bool,

        /// Similarity threshold for this query
        #[arg(long, conflicts_with = "no_compression")]
        threshold: Option<f32>,

        /// Print context, sources and diagnostics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask questions interactively until `quit` or `exit`
    Chat {
        #[arg(long)]
        k: Option<usize>,
    },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let app = App::load(&cli.config_dir, cli.backend, cli.index)?;

    match cli.command {
        Command::Build { data, rebuild } => app.build(&data, rebuild)?,
        Command::Ask { question, k, no_compression, threshold, json } => {
            let retriever = app.retriever()?;
            let mut query = Query::new(question, k.unwrap_or_else(|| app.default_k()));
            query.compression = app.compression_override(no_compression, threshold);
            app.ask(&retriever, &query, json)?;
        }
        Command::Chat { k } => chat(&app, k.unwrap_or_else(|| app.default_k()))?,
    }
    Ok(())
}

fn chat(app: &App, k: usize) -> Result<()> {
    let retriever = app.retriever()?;
    println!("Ask a question (quit or exit to leave).");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }
        // A failed question should not end the session.
        if let Err(err) = app.ask(&retriever, &Query::new(question, k), false) {
            eprintln!("error: {err:#}");
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_flags() {
        let cli = Cli::parse_from(["sysrag", "--backend", "memory", "ask", "Как настроить DNS?", "--k", "5", "--threshold", "0.8"]);
        assert_eq!(cli.backend, Some(BackendKind::Memory));
        match cli.command {
            Command::Ask { question, k, threshold, no_compression, json } => {
                assert_eq!(question, "Как настроить DNS?");
                assert_eq!(k, Some(5));
                assert_eq!(threshold, Some(0.8));
                assert!(!no_compression && !json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn threshold_conflicts_with_no_compression() {
        let parsed = Cli::try_parse_from(["sysrag", "ask", "q", "--no-compression", "--threshold", "0.5"]);
        assert!(parsed.is_err());
    }
}
