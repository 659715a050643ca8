use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use futures::FutureExt;
use guide_client::{validate_query, ModelClient};
use guide_config::GuideConfig;
use guide_conversation::{ConversationStore, FileStorage, StoreSettings};
use guide_core::{Message, SystemClock, GENERAL_CONTEXT};
use guide_metrics::MetricsSummary;
use guide_session::{CaptureOutcome, FileCaptureAdapter, Orchestrator, QueryCompletion};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "phone-guide")]
#[command(about = "Screen-aware phone guidance backed by a local vision model", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question about a screen
    Ask {
        /// App context the question is about
        #[arg(short, long, default_value = GENERAL_CONTEXT)]
        context: String,

        #[arg(short, long)]
        query: String,
    },

    /// Interactive session with context switching
    Chat {
        /// Context to start in
        #[arg(short, long, default_value = GENERAL_CONTEXT)]
        context: String,
    },

    /// Check that the model service is reachable
    Health,

    /// Show stored conversations
    History {
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Delete stored conversations
    Clear {
        #[arg(short, long, conflicts_with = "all")]
        context: Option<String>,

        #[arg(long, action = clap::ArgAction::SetTrue)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config_path = cli.config.unwrap_or_else(GuideConfig::default_config_path);
    info!("Loading configuration from: {:?}", config_path);
    let config = GuideConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Ask { context, query } => {
            ask_once(&config, &context, &query).await?;
        }
        Commands::Chat { context } => {
            interactive_chat(&config, &context).await?;
        }
        Commands::Health => {
            check_health(&config).await?;
        }
        Commands::History { context } => {
            show_history(&open_store(&config), context.as_deref());
        }
        Commands::Clear { context, all } => {
            clear_history(open_store(&config), context.as_deref(), all);
        }
    }

    Ok(())
}

fn open_store(config: &GuideConfig) -> ConversationStore {
    ConversationStore::open(
        Arc::new(FileStorage::new(config.paths.home_dir.clone())),
        StoreSettings::from(config),
        Arc::new(SystemClock),
    )
}

fn build_orchestrator(config: &GuideConfig) -> Result<Orchestrator> {
    let client = ModelClient::from_config(config)?;
    let adapter = FileCaptureAdapter::new(config.capture.screens_dir.clone());
    Ok(Orchestrator::new(
        open_store(config),
        Arc::new(adapter),
        Arc::new(client),
        config,
    ))
}

async fn ask_once(config: &GuideConfig, context: &str, query: &str) -> Result<()> {
    if let Err(e) = validate_query(query) {
        anyhow::bail!("{}\nUsage: phone-guide ask --context <CONTEXT> --query <QUESTION>", e);
    }

    let mut orchestrator = build_orchestrator(config)?;
    orchestrator.switch_context(context);

    if let Some(answer) = orchestrator.ask(query).await? {
        println!("{}", answer.text);
    }

    orchestrator.shutdown();
    print_summary(&orchestrator.metrics().get_summary());
    Ok(())
}

async fn in_flight(query: &mut Option<BoxFuture<'static, QueryCompletion>>) -> QueryCompletion {
    match query.as_mut() {
        Some(query) => query.await,
        None => std::future::pending().await,
    }
}

async fn interactive_chat(config: &GuideConfig, context: &str) -> Result<()> {
    let mut orchestrator = build_orchestrator(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_query: Option<BoxFuture<'static, QueryCompletion>> = None;
    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);

    println!("📱 Phone Guide");
    println!("Commands: /switch <context>, /history, /clear, /quit");
    println!("═══════════════════════════════════════\n");

    if !orchestrator.switch_context(context) {
        orchestrator.refresh_if_stale();
    }
    print_transcript(orchestrator.context(), orchestrator.transcript());
    prompt()?;

    loop {
        tokio::select! {
            ticket = orchestrator.next_capture() => {
                match orchestrator.capture(ticket).await {
                    CaptureOutcome::Captured { greeting: Some(message) }
                    | CaptureOutcome::Failed { notice: Some(message) } => {
                        print_message(&message);
                        prompt()?;
                    }
                    _ => {}
                }
            }
            completion = in_flight(&mut pending_query), if pending_query.is_some() => {
                pending_query = None;
                if let Some(answer) = orchestrator.complete_query(completion) {
                    print_message(&answer);
                    prompt()?;
                }
            }
            _ = refresh.tick() => {
                orchestrator.refresh_if_stale();
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let input = line.trim();

                if input.is_empty() {
                    prompt()?;
                    continue;
                }

                if input == "/quit" || input.eq_ignore_ascii_case("exit") {
                    println!("Goodbye!");
                    break;
                }

                if let Some(target) = input.strip_prefix("/switch") {
                    let target = target.trim();
                    if target.is_empty() {
                        println!("Usage: /switch <context>");
                    } else if orchestrator.switch_context(target) {
                        print_transcript(orchestrator.context(), orchestrator.transcript());
                    }
                    prompt()?;
                    continue;
                }

                match input {
                    "/history" => {
                        print_transcript(orchestrator.context(), orchestrator.transcript());
                    }
                    "/clear" => {
                        let current = orchestrator.context().to_string();
                        orchestrator.store_mut().clear(&current);
                        println!("Cleared conversation for {}", current);
                    }
                    _ if pending_query.is_some() => {
                        println!("Still working on your last question, one moment...");
                    }
                    question => {
                        if let Some(
                            CaptureOutcome::Captured { greeting: Some(message) }
                            | CaptureOutcome::Failed { notice: Some(message) },
                        ) = orchestrator.ensure_fresh_capture().await
                        {
                            print_message(&message);
                        }
                        match orchestrator.begin_query(question) {
                            Ok(job) => {
                                pending_query = Some(job.run().boxed());
                                continue;
                            }
                            Err(e) => println!("{}", e),
                        }
                    }
                }
                prompt()?;
            }
        }
    }

    orchestrator.shutdown();
    print_summary(&orchestrator.metrics().get_summary());
    Ok(())
}

async fn check_health(config: &GuideConfig) -> Result<()> {
    println!("\n🔍 Checking model service at {}", config.service.base_url);
    println!("═══════════════════════════════════════");

    let client = ModelClient::from_config(config)?;
    let health = client.health().await;

    if health.healthy {
        println!("✅ Reachable");
        println!("Configured model: {}", client.model());
        println!("Installed models: {}", health.models.join(", "));
        println!(
            "Vision model available: {}",
            if health.vision_model_available { "yes" } else { "no" }
        );
    } else {
        println!("❌ Unreachable");
        println!("Error: {}", health.error.as_deref().unwrap_or("unknown"));
        println!("Answers will use built-in guidance until the service is back.");
    }

    Ok(())
}

fn show_history(store: &ConversationStore, context: Option<&str>) {
    match context {
        Some(context) => print_transcript(context, store.messages(context)),
        None => {
            if store.is_empty() {
                println!("No stored conversations.");
                return;
            }
            println!("\n📚 Stored conversations");
            println!("═══════════════════════════════════════");
            for context in store.contexts() {
                if let Some(conversation) = store.get(context) {
                    println!(
                        "{:<16} {:>4} messages  last updated {}",
                        context,
                        conversation.messages.len(),
                        conversation.last_updated.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }
}

fn clear_history(mut store: ConversationStore, context: Option<&str>, all: bool) {
    match (context, all) {
        (_, true) => {
            store.clear_all();
            println!("Cleared all conversations");
        }
        (Some(context), false) => {
            store.clear(context);
            println!("Cleared conversation for {}", context);
        }
        (None, false) => println!("Nothing to clear: pass --context <name> or --all"),
    }
}

fn print_transcript(context: &str, messages: &[Message]) {
    println!("\n💬 {} ({} messages)", context, messages.len());
    for message in messages {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let who = if message.is_user { "You" } else { "Guide" };
    println!("[{}] {}> {}", message.timestamp.format("%H:%M"), who, message.text);
}

fn prompt() -> Result<()> {
    print!("You> ");
    io::stdout().flush()?;
    Ok(())
}

fn print_summary(summary: &MetricsSummary) {
    println!("\n📊 Session");
    println!("  Questions: {}", summary.total_requests);
    println!("  Fallback rate: {:.1}%", summary.fallback_rate);
    println!("  Average latency: {:.0}ms", summary.average_latency_ms);
    println!("  Captures: {} ({} failed)", summary.captures, summary.capture_failures);
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}
