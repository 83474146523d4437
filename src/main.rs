//! # Multi-Agent RAG Research Assistant
//!
//! Answers a question by splitting it into research taxonomies, researching
//! each taxonomy concurrently against a document index, and synthesizing the
//! vetted evidence into a single answer.
//!
//! ## Quick Start
//! ```bash
//! CORPUS_PATH=corpus.json cargo run -- "Can trading losses be group relieved?"
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

/// Collaborator and orchestrator wiring
mod agent;

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use rig_multirag::{
    ChatMemory, EventKind, Orchestrator, Role, WorkflowState, WorkflowSummary, WORKFLOW,
};

use crate::config::Config;

/// Session used when none is given on the command line
const DEFAULT_SESSION: &str = "cli";

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "multi-agent-rag",
    version = "0.1.0",
    about = "Multi-agent research assistant: taxonomy planning, concurrent retrieval, synthesis",
    long_about = r#"
Multi-Agent RAG - research a question across several taxonomies at once.

The assistant will:
  1. Split the question into research taxonomies
  2. Research every taxonomy concurrently (query, search, review)
  3. Consolidate the vetted evidence and synthesize one answer

Without a QUERY it starts an interactive session that keeps the
conversation history between questions.

EXAMPLES:
  # Research against a local JSON corpus
  multi-agent-rag --corpus corpus.json "Can trading losses be group relieved?"

  # Only show how the question would be split
  multi-agent-rag --taxonomies-only "Compare VAT and income tax deadlines"

  # Use a local Ollama model
  multi-agent-rag --provider ollama --model llama3.2 "..."
"#
)]
struct Args {
    /// The question to research
    #[arg(help = "The question to research", value_name = "QUERY")]
    query: Option<String>,

    /// Earlier conversation, as `role: content` lines
    #[arg(long = "history", help = "Conversation history passed to the planner")]
    history: Option<String>,

    /// Session identifier for the interactive mode
    #[arg(long = "session", default_value = DEFAULT_SESSION)]
    session: String,

    /// Completion provider (overrides LLM_PROVIDER)
    #[arg(short = 'p', long = "provider", help = "openai or ollama")]
    provider: Option<String>,

    /// Model to use (overrides LLM_MODEL)
    #[arg(short = 'm', long = "model", help = "Model to use")]
    model: Option<String>,

    /// JSON corpus for the in-memory search backend (overrides CORPUS_PATH)
    #[arg(short = 'c', long = "corpus", value_name = "FILE")]
    corpus: Option<PathBuf>,

    /// Research cycles per taxonomy (overrides MAX_ATTEMPTS)
    #[arg(long = "max-attempts")]
    max_attempts: Option<usize>,

    /// Stop after planning and print the taxonomies
    #[arg(long = "taxonomies-only", default_value = "false")]
    taxonomies_only: bool,

    /// Print the run summary as JSON
    #[arg(long = "json", default_value = "false")]
    json: bool,

    /// Verbose output (debug logging)
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Enable verbose/debug logging",
        default_value = "false"
    )]
    verbose: bool,
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("Multi-agent RAG starting up...");

    let config = load_config(&args)?;

    info!(
        provider = ?config.provider,
        model = %config.model_name(),
        search = ?config.search,
        max_attempts = config.workflow.max_attempts,
        "Configuration loaded"
    );

    let orchestrator = agent::build_orchestrator(&config)?;

    match args.query.as_deref() {
        Some(query) if args.taxonomies_only => {
            let history = args.history.as_deref().unwrap_or_default();
            let plan = orchestrator.identify_taxonomies(query, history).await?;
            println!("Reasoning: {}", plan.reasoning);
            for taxonomy in &plan.taxonomies {
                println!("- {}", taxonomy);
            }
            Ok(())
        }
        Some(query) => {
            let history = args.history.clone().unwrap_or_default();
            let state = research(&orchestrator, query, &history).await?;
            print_summary(&state, args.json)?;
            Ok(())
        }
        None => interactive(&orchestrator, &args).await,
    }
}

/// Merge command-line overrides into the environment configuration.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(provider) = &args.provider {
        config.provider = provider.parse()?;
    }

    if let Some(model) = &args.model {
        info!(model = %model, "Using model from command line");
        config.model = Some(model.clone());
    }

    if let Some(corpus) = &args.corpus {
        config.corpus_path = Some(corpus.clone());
    }

    if let Some(max_attempts) = args.max_attempts {
        config.workflow.max_attempts = max_attempts;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// RESEARCH RUNS
// =============================================================================
/// Run one question, printing progress as it arrives.
///
/// On failure the gathered evidence is still printed before the error is
/// returned.
async fn research(orchestrator: &Arc<Orchestrator>, query: &str, history: &str) -> Result<WorkflowState> {
    let mut run = orchestrator.spawn_streaming(query, history);

    let mut answer_open = false;
    while let Some(event) = run.events.recv().await {
        if event.kind == EventKind::AnswerFragment {
            if !answer_open {
                eprint!("[{}] ", event.source);
                answer_open = true;
            }
            eprint!("{}", event.message);
            continue;
        }
        if answer_open {
            eprintln!();
            answer_open = false;
        }
        // The terminal event is reflected in the run outcome
        if event.source != WORKFLOW {
            eprintln!("[{}] {}", event.source, event.message);
        }
    }
    if answer_open {
        eprintln!();
    }

    match run.handle.await? {
        Ok(state) => {
            info!("Research completed successfully");
            Ok(state)
        }
        Err(e) => {
            error!(error = %e, "Research failed");
            eprintln!("\nResearch failed: {}", e);

            if let Some(partial) = e.partial_state() {
                if !partial.research_outputs.is_empty() {
                    eprintln!("\nEvidence gathered before the failure:");
                    print_summary(partial, false)?;
                }
            }

            Err(e.into())
        }
    }
}

/// Read questions from stdin until EOF, carrying the session history.
async fn interactive(orchestrator: &Arc<Orchestrator>, args: &Args) -> Result<()> {
    let memory = ChatMemory::new();
    if let Some(history) = &args.history {
        memory
            .add_message(&args.session, "history", Role::System, history.as_str())
            .await;
    }

    eprintln!("Interactive session '{}'. Ctrl-D to exit.", args.session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }

        let history = memory.history_text(&args.session).await;
        memory
            .add_message(&args.session, "user", Role::User, query)
            .await;

        // A failed question does not end the session
        match research(orchestrator, query, &history).await {
            Ok(state) => {
                print_summary(&state, args.json)?;
                if let Some(answer) = &state.final_answer {
                    memory
                        .add_message(&args.session, WORKFLOW, Role::Agent, answer.as_str())
                        .await;
                }
            }
            Err(e) => error!(error = %e, "Question failed"),
        }
    }

    Ok(())
}

fn print_summary(state: &WorkflowState, json: bool) -> Result<()> {
    let summary = WorkflowSummary::from_state(state);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\n{}", "=".repeat(60));
        println!("RESEARCH RESULTS");
        println!("{}\n", "=".repeat(60));
        println!("{}", summary.render_text());
        println!("{}", "=".repeat(60));
    }

    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Initialize the tracing subscriber for structured logging.
///
/// Logs go to stderr so that `--json` output on stdout stays parseable.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["test", "What is group relief?"]);
        assert_eq!(args.query.as_deref(), Some("What is group relief?"));
        assert_eq!(args.session, DEFAULT_SESSION);
        assert!(!args.taxonomies_only);
        assert!(!args.json);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_with_flags() {
        let args = Args::parse_from([
            "test",
            "--taxonomies-only",
            "--json",
            "--verbose",
            "--provider",
            "ollama",
            "--model",
            "llama3.2",
            "--corpus",
            "corpus.json",
            "--max-attempts",
            "5",
            "Test query",
        ]);

        assert_eq!(args.query.as_deref(), Some("Test query"));
        assert!(args.taxonomies_only);
        assert!(args.json);
        assert!(args.verbose);
        assert_eq!(args.provider.as_deref(), Some("ollama"));
        assert_eq!(args.model.as_deref(), Some("llama3.2"));
        assert_eq!(args.corpus, Some(PathBuf::from("corpus.json")));
        assert_eq!(args.max_attempts, Some(5));
    }

    #[test]
    fn test_no_query_means_interactive() {
        let args = Args::parse_from(["test", "--session", "s1", "--history", "user: hi"]);
        assert!(args.query.is_none());
        assert_eq!(args.session, "s1");
        assert_eq!(args.history.as_deref(), Some("user: hi"));
    }
}
