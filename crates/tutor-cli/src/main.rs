//! Adaptive Tutor CLI
//!
//! Runs tutoring conversations against the simulated-student service, serves
//! the HTTP API, and submits batch predictions for evaluation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_orchestrator::{
    collect_pairs, create_router, run_batch, AppState, BatchOutcome, Catalog, Config,
    ConversationRecord, ConversationStore, HttpInterlocutor, LlmGenerator, LlmOracle, OpenAiChat,
    Prediction, SetType, TranscriptEntry, TranscriptLog, TurnExecutor, TurnOutcome, TurnPhase,
    UnderstandingLevel, LOG_FILE_NAME,
};
use tutor_report::{json::JsonGenerator, MarkdownGenerator, ReportGenerator, ReportInput};

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Default number of history entries shown.
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Adaptive Tutor - baseline assessment and adaptive teaching
///
/// Tutors simulated students through short conversations, estimating each
/// student's prior understanding of a topic and adapting the teaching to it.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and WebSocket events
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Run one conversation and write its report
    Run {
        /// Student id
        #[arg(long)]
        student: String,

        /// Topic id
        #[arg(long)]
        topic: String,

        /// Tutor messages to send verbatim, in order. Without any, the tutor
        /// generates messages until the conversation ends.
        #[arg(short, long = "message", value_name = "TEXT")]
        messages: Vec<String>,

        /// Output directory for reports
        #[arg(short, long, value_name = "DIR", default_value = "reports")]
        output_dir: String,
    },

    /// Run every student/topic pair of a set
    Batch {
        /// Evaluation set (mini_dev, dev, eval)
        #[arg(long = "set", value_name = "SET")]
        set_type: SetType,

        /// Stop after this many pairs
        #[arg(long)]
        limit: Option<usize>,

        /// Submit the predicted levels for scoring
        #[arg(long)]
        submit: bool,

        /// Conversations run at once (default: batchConcurrency from config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Score the tutoring quality of a set
    Evaluate {
        /// Evaluation set (mini_dev, dev, eval)
        #[arg(long = "set", value_name = "SET")]
        set_type: SetType,
    },

    /// Show logged conversations, newest first
    History {
        /// Only show this student
        #[arg(long)]
        student: Option<String>,

        /// Only show this topic
        #[arg(long)]
        topic: Option<String>,

        /// Number of entries to show
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Secrets may live in a .env file; a missing file is fine
    let _ = dotenvy::dotenv();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Run {
            student,
            topic,
            messages,
            output_dir,
        } => run_conversation(&config, &student, &topic, messages, Path::new(&output_dir)).await,
        Command::Batch {
            set_type,
            limit,
            submit,
            concurrency,
        } => run_set(&config, set_type, limit, submit, concurrency).await,
        Command::Evaluate { set_type } => evaluate(&config, set_type).await,
        Command::History {
            student,
            topic,
            limit,
        } => show_history(&config, student.as_deref(), topic.as_deref(), limit).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Live adapters shared by every subcommand that talks to the services.
struct Runtime {
    executor: Arc<TurnExecutor>,
    interlocutor: Arc<HttpInterlocutor>,
}

async fn build_runtime(config: &Config) -> anyhow::Result<Runtime> {
    let interlocutor = Arc::new(HttpInterlocutor::from_config(&config.interlocutor)?);
    let chat = Arc::new(OpenAiChat::from_config(&config.llm)?);
    let oracle = Arc::new(LlmOracle::new(
        Arc::clone(&chat),
        config.llm.assessment_temperature,
    ));
    let generator = Arc::new(LlmGenerator::new(chat, config.llm.teaching_temperature));

    let log = TranscriptLog::open(&config.log_dir).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to open transcript log: {e}\n\nSuggestion: Check that '{}' is writable or change logDir in tutor.json",
            config.log_dir
        )
    })?;
    tracing::info!(path = %log.path().display(), "Transcript log opened");

    let executor = TurnExecutor::from_config(
        config,
        ConversationStore::new(),
        oracle,
        generator,
        interlocutor.clone(),
    )
    .with_transcript_log(Arc::new(log));

    Ok(Runtime {
        executor: Arc::new(executor),
        interlocutor,
    })
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

// ============================================================================
// serve
// ============================================================================

async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let runtime = build_runtime(&config).await?;
    let catalog: Arc<dyn Catalog> = runtime.interlocutor.clone();
    let router = create_router(AppState::new(config, runtime.executor, catalog));

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl+C, shutting down");
        })
        .await?;

    Ok(())
}

// ============================================================================
// run
// ============================================================================

async fn run_conversation(
    config: &Config,
    student_id: &str,
    topic_id: &str,
    messages: Vec<String>,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let runtime = build_runtime(config).await?;
    let catalog = runtime.interlocutor.as_ref();

    let profile = catalog.student_profile(student_id).await?;
    let topic = catalog.topic_info(topic_id).await?;
    let session = runtime
        .executor
        .start_conversation(student_id, topic_id, profile, topic)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to start conversation: {e}\n\nSuggestion: Check the student and topic ids and your API key"
            )
        })?;

    let conversation_id = session.record.conversation_id().to_string();
    println!(
        "Conversation {conversation_id} started ({} turns max)",
        session.record.max_turns()
    );
    if let Some(remaining) = session.remaining_quota {
        println!("Conversations remaining: {remaining}");
    }
    println!();

    if messages.is_empty() {
        loop {
            let outcome = runtime.executor.run_turn(&conversation_id, None).await?;
            print_turn(&outcome);
            if outcome.next_phase == TurnPhase::Terminal {
                break;
            }
        }
    } else {
        for message in messages {
            let outcome = runtime
                .executor
                .run_turn(&conversation_id, Some(message))
                .await?;
            print_turn(&outcome);
            if outcome.next_phase == TurnPhase::Terminal {
                break;
            }
        }
    }

    let record = runtime.executor.store().get(&conversation_id)?;
    println!();
    print_summary(&record);
    generate_reports(&record, output_dir)?;

    Ok(())
}

fn print_turn(outcome: &TurnOutcome) {
    println!("--- Turn {} ---", outcome.turn_count);
    println!("TUTOR:   {}", outcome.tutor_message);
    println!("STUDENT: {}", outcome.student_reply);
    tracing::debug!(
        level = outcome.understanding_level.map(UnderstandingLevel::get),
        confidence = outcome.confidence,
        locked = outcome.locked,
        "Estimate after turn"
    );
}

fn print_summary(record: &ConversationRecord) {
    println!("=== Conversation Summary ===");
    println!("Turns: {} / {}", record.turn_count(), record.max_turns());
    match record.understanding_level() {
        Some(level) => println!("Understanding level: {level}"),
        None => println!("Understanding level: not assessed"),
    }
    if let Some(confidence) = record.confidence() {
        println!("Confidence: {confidence:.2}");
    }
    println!("Locked: {}", if record.is_locked() { "yes" } else { "no" });
}

/// Writes Markdown and JSON reports for `record` into `output_dir`.
fn generate_reports(record: &ConversationRecord, output_dir: &Path) -> anyhow::Result<()> {
    println!();
    println!("Generating reports...");

    let input = create_report_input(record)?;
    let report = ReportGenerator::new(&input).generate()?;

    std::fs::create_dir_all(output_dir)?;

    let markdown = MarkdownGenerator::new(&report).generate();
    let md_path = output_dir.join(format!("{}.md", record.conversation_id()));
    std::fs::write(&md_path, markdown)?;
    println!("  Markdown report: {}", md_path.display());

    let json_path = output_dir.join(format!("{}.json", record.conversation_id()));
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    Ok(())
}

/// Converts a record to the report crate's input via its transcript log shape.
fn create_report_input(record: &ConversationRecord) -> anyhow::Result<ReportInput> {
    let entry = serde_json::to_value(TranscriptEntry::from_record(record))?;
    let mut input: ReportInput = serde_json::from_value(entry)?;
    input.evidence = record.evidence().to_string();
    Ok(input)
}

// ============================================================================
// batch
// ============================================================================

#[derive(Debug, Serialize)]
struct BatchSummary<'a> {
    set_type: SetType,
    pairs: usize,
    failed: usize,
    outcomes: &'a [BatchOutcome],
}

async fn run_set(
    config: &Config,
    set_type: SetType,
    limit: Option<usize>,
    submit: bool,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let runtime = build_runtime(config).await?;
    let pairs = collect_pairs(runtime.interlocutor.as_ref(), set_type, limit).await?;
    if pairs.is_empty() {
        anyhow::bail!(
            "No student/topic pairs found for set '{set_type}'\n\nSuggestion: Check the set name (mini_dev, dev, eval)"
        );
    }

    let concurrency = concurrency.unwrap_or(config.batch_concurrency);
    println!(
        "Running {} conversations ({concurrency} at a time)...",
        pairs.len()
    );

    let outcomes = run_batch(
        &runtime.executor,
        runtime.interlocutor.as_ref(),
        pairs,
        concurrency,
    )
    .await;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    for outcome in &outcomes {
        match &outcome.error {
            None => println!(
                "  {} / {}: level {} after {} turns{}",
                outcome.student_id,
                outcome.topic_id,
                outcome.predicted_level,
                outcome.turns,
                if outcome.locked { " (locked)" } else { "" }
            ),
            Some(error) => println!(
                "  {} / {}: FAILED ({error})",
                outcome.student_id, outcome.topic_id
            ),
        }
    }
    println!();
    println!("{} succeeded, {failed} failed", outcomes.len() - failed);

    let results_path = PathBuf::from(&config.log_dir).join(format!("batch-{set_type}.json"));
    let summary = BatchSummary {
        set_type,
        pairs: outcomes.len(),
        failed,
        outcomes: &outcomes,
    };
    std::fs::write(&results_path, serde_json::to_string_pretty(&summary)?)?;
    println!("Results written to {}", results_path.display());

    if submit {
        let predictions: Vec<Prediction> = outcomes.iter().map(BatchOutcome::prediction).collect();
        let result = runtime
            .interlocutor
            .submit_predictions(set_type, &predictions)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to submit predictions: {e}"))?;
        println!();
        println!("=== MSE Evaluation ===");
        println!("MSE: {:.4}", result.mse_score);
        println!("Predictions scored: {}", result.num_predictions);
        println!("Submission #{}", result.submission_number);
        if let Some(remaining) = result.submissions_remaining {
            println!("Submissions remaining: {remaining}");
        }
    }

    Ok(())
}

// ============================================================================
// evaluate
// ============================================================================

async fn evaluate(config: &Config, set_type: SetType) -> anyhow::Result<()> {
    let interlocutor = HttpInterlocutor::from_config(&config.interlocutor)?;
    let result = interlocutor
        .evaluate_tutoring(set_type)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to evaluate tutoring: {e}"))?;

    println!("=== Tutoring Evaluation ({set_type}) ===");
    println!("Score: {:.4}", result.score);
    println!("Conversations scored: {}", result.num_conversations);
    println!("Submission #{}", result.submission_number);
    if let Some(remaining) = result.submissions_remaining {
        println!("Submissions remaining: {remaining}");
    }

    Ok(())
}

// ============================================================================
// history
// ============================================================================

async fn show_history(
    config: &Config,
    student_id: Option<&str>,
    topic_id: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let path = PathBuf::from(&config.log_dir).join(LOG_FILE_NAME);
    let entries = TranscriptLog::load_entries(&path, student_id, topic_id, Some(limit)).await?;

    if entries.is_empty() {
        println!("No logged conversations in {}", path.display());
        return Ok(());
    }

    for entry in entries {
        let level = entry
            .understanding_level
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        println!(
            "{}  {}  student={} topic={} turns={}/{} level={level}{}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.conversation_id,
            entry.student_id,
            entry.topic_id,
            entry.metadata.turn_count,
            entry.metadata.max_turns,
            if entry.locked { " locked" } else { "" },
            if entry.metadata.conversation_ended {
                " ended"
            } else {
                ""
            },
        );
    }

    Ok(())
}
