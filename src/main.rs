//! sqltalk CLI binary entry point.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use sqltalk::agent_loop::{ConversationDriver, TurnEvent, TurnEventPayload, TurnOutcome};
use sqltalk::cli::{Cli, Commands, GlobalArgs, ReplCommand, REPL_HELP};
use sqltalk::config::SqlTalkConfig;
use sqltalk::database::{DatabaseGateway, GatewayFactory, SqliteGatewayFactory};
use sqltalk::error::SqlTalkError;
use sqltalk::generate::{GeneratedAnswer, SqlGenerator};
use sqltalk::provider::{create_provider, ModelProvider};
use sqltalk::session::{Session, SessionManager};
use sqltalk::tools::ToolOutcome;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SESSION_ID: &str = "cli";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match load_config(&cli.global) {
        Ok(config) => match cli.command {
            Commands::Chat => handle_chat(&config, &cli.global).await,
            Commands::Ask(args) => handle_ask(&config, &cli.global, &args.prompt()).await,
            Commands::Generate(args) => handle_generate(&config, &args.prompt()).await,
            Commands::Tables => handle_tables(&config),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(flags: &GlobalArgs) -> Result<SqlTalkConfig, SqlTalkError> {
    let mut config = SqlTalkConfig::load(flags.config.as_deref())?;
    flags.apply(&mut config)?;
    Ok(config)
}

fn gateway_factory(config: &SqlTalkConfig) -> SqliteGatewayFactory {
    let settings = config.settings();
    SqliteGatewayFactory::new(settings.database.clone()).read_only(settings.read_only)
}

fn build_provider(config: &SqlTalkConfig) -> Result<Arc<dyn ModelProvider>, SqlTalkError> {
    let model = config.model()?;
    Ok(Arc::from(create_provider(&model, config)?))
}

fn build_driver(config: &SqlTalkConfig) -> Result<ConversationDriver, SqlTalkError> {
    Ok(ConversationDriver::from_config(build_provider(config)?, config)
        .with_event_sink(Arc::new(print_event)))
}

/// Run one turn with a token armed only for its duration, so Ctrl-C
/// cancels this turn and nothing after it.
async fn run_interruptible(
    driver: &ConversationDriver,
    session: &mut Session,
    prompt: &str,
) -> TurnOutcome {
    let cancel = CancellationToken::new();
    let turn = driver.run_turn_with_cancellation(session, prompt, &cancel);
    tokio::pin!(turn);
    tokio::select! {
        outcome = &mut turn => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            turn.await
        }
    }
}

/// Forward stdin lines from a plain thread so the prompt can race Ctrl-C.
/// The thread is not joined; it dies with the process.
fn stdin_lines() -> mpsc::UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn handle_tables(config: &SqlTalkConfig) -> Result<(), SqlTalkError> {
    let gateway = gateway_factory(config).open()?;
    let tables = gateway.list_tables()?;
    if tables.is_empty() {
        println!("(no tables)");
    }
    for table in tables {
        println!("{table}");
    }
    Ok(())
}

async fn handle_ask(
    config: &SqlTalkConfig,
    flags: &GlobalArgs,
    prompt: &str,
) -> Result<(), SqlTalkError> {
    let driver = build_driver(config)?;
    let mut sessions = SessionManager::new(Arc::new(gateway_factory(config)));
    let session = sessions.open(SESSION_ID)?;

    let outcome = run_interruptible(&driver, session, prompt).await;
    print_outcome(&outcome, flags.show_trace);
    match outcome.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn handle_generate(config: &SqlTalkConfig, question: &str) -> Result<(), SqlTalkError> {
    let generator = SqlGenerator::from_config(build_provider(config)?, config);
    let gateway = gateway_factory(config).open()?;

    let cancel = CancellationToken::new();
    let answer = generator.answer(&*gateway, question, &cancel);
    tokio::pin!(answer);
    let answer = tokio::select! {
        result = &mut answer => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            answer.await
        }
    }?;
    print_generated(&answer);
    Ok(())
}

async fn handle_chat(config: &SqlTalkConfig, flags: &GlobalArgs) -> Result<(), SqlTalkError> {
    let driver = build_driver(config)?;
    let mut sessions = SessionManager::new(Arc::new(gateway_factory(config)));
    let session = sessions.open(SESSION_ID)?;

    println!(
        "SQL Talk with SQLite ({}, {})",
        config.settings().database.display(),
        driver.provider().model_id()
    );
    println!("Ask me about information in the database. /help for commands.");

    let mut lines = stdin_lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        match ReplCommand::parse(&line?) {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => break,
            ReplCommand::Help => println!("{REPL_HELP}"),
            ReplCommand::Clear => {
                session.clear();
                println!("(conversation cleared)");
            }
            ReplCommand::Trace => match session.last_answer().and_then(|m| m.trace.as_ref()) {
                Some(trace) if !trace.is_empty() => println!("{}", trace.render()),
                _ => println!("(no function calls)"),
            },
            ReplCommand::Prompt(prompt) => {
                let outcome = run_interruptible(&driver, session, &prompt).await;
                print_outcome(&outcome, flags.show_trace);
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &TurnOutcome, show_trace: bool) {
    println!("\n{}\n", outcome.answer);
    if show_trace && !outcome.trace.is_empty() {
        println!("Function calls, parameters, and responses:\n");
        println!("{}", outcome.trace.render());
    }
}

fn print_generated(answer: &GeneratedAnswer) {
    println!("Generated SQL Query\n\n{}\n", answer.sql);
    if answer.is_empty() {
        println!("No results found for the given query.");
        return;
    }

    println!("Query Result\n");
    println!("{}", answer.columns.join(" | "));
    for row in &answer.rows {
        let cells: Vec<String> = answer
            .columns
            .iter()
            .map(|column| match row.get(column) {
                Some(serde_json::Value::String(text)) => truncate(text, 60),
                Some(value) => value.to_string(),
                None => String::new(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    if let Some(interpretation) = &answer.interpretation {
        println!("\nInterpretation of the Data\n\n{interpretation}\n");
    }
}

fn print_event(event: TurnEvent) {
    match &event.payload {
        TurnEventPayload::ToolCallStarted { call } => {
            eprintln!("⚡ {} {}", call.name, call.arguments);
        }
        TurnEventPayload::ToolCallCompleted { result } => match &result.outcome {
            ToolOutcome::Rows(rows) => eprintln!("  ✅ {} row(s)", rows.len()),
            ToolOutcome::Error(message) => eprintln!("  ❌ {}", truncate(message, 200)),
        },
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
