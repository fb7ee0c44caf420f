//! Command-line surface for sqltalk.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::SqlTalkConfig;
use crate::error::SqlTalkError;
use crate::models::LanguageModel;

/// Ask questions about a SQLite database in plain language.
#[derive(Parser, Debug)]
#[command(name = "sqltalk", version, about = "SQL Talk: question a SQLite database through an LLM")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every subcommand. Each one overrides the config file
/// and the environment.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// SQLite database file
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Model to use (format: provider:model, e.g. google:gemini-1.5-pro)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum tool calls per question
    #[arg(long, global = true)]
    pub max_tool_calls: Option<usize>,

    /// Only allow single SELECT/WITH/EXPLAIN statements
    #[arg(long, global = true)]
    pub read_only: bool,

    /// Print the tool-call trace after each answer
    #[arg(long, global = true)]
    pub show_trace: bool,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat session
    Chat,
    /// Ask a single question and exit
    Ask(AskArgs),
    /// Generate one SQL query for a question, run it, and explain the rows
    Generate(AskArgs),
    /// List the tables in the database
    Tables,
}

/// Arguments for `sqltalk ask` and `sqltalk generate`.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question (words are joined with spaces)
    #[arg(required = true, num_args = 1..)]
    pub question: Vec<String>,
}

impl AskArgs {
    pub fn prompt(&self) -> String {
        self.question.join(" ")
    }
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl GlobalArgs {
    /// Layer the flags on top of an already loaded config.
    pub fn apply(&self, config: &mut SqlTalkConfig) -> Result<(), SqlTalkError> {
        let settings = config.settings_mut();
        if let Some(database) = &self.database {
            settings.database = database.clone();
        }
        if let Some(model) = &self.model {
            let parsed: LanguageModel = model.parse()?;
            settings.model = parsed.to_string();
        }
        if let Some(max) = self.max_tool_calls {
            if max == 0 {
                return Err(SqlTalkError::InvalidArgument(
                    "--max-tool-calls must be at least 1".into(),
                ));
            }
            settings.max_tool_calls = max;
        }
        if self.read_only {
            settings.read_only = true;
        }
        Ok(())
    }
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Forget the conversation so far.
    Clear,
    /// Show the trace of the last answer.
    Trace,
    Exit,
    Help,
    /// Nothing but whitespace.
    Empty,
    /// A question for the model.
    Prompt(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "/clear" => Self::Clear,
            "/trace" => Self::Trace,
            "/exit" | "/quit" => Self::Exit,
            "/help" => Self::Help,
            _ => Self::Prompt(line.to_string()),
        }
    }
}

pub const REPL_HELP: &str = "\
Commands:
  /clear   forget the conversation
  /trace   show the tool calls behind the last answer
  /exit    leave (also /quit or Ctrl-D)

Sample prompts:
  - What kind of information is in this database?
  - How many rows are in the users table?
  - List 5 product categories.";

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_chat_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sqltalk",
            "chat",
            "--database",
            "billionaires.db",
            "--max-tool-calls",
            "5",
            "--show-trace",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Chat));
        assert_eq!(cli.global.database, Some(PathBuf::from("billionaires.db")));
        assert_eq!(cli.global.max_tool_calls, Some(5));
        assert!(cli.global.show_trace);
        assert!(!cli.global.read_only);
    }

    #[test]
    fn parse_ask_joins_words() {
        let cli = Cli::try_parse_from(["sqltalk", "ask", "how", "many", "albums?"]).unwrap();
        match cli.command {
            Commands::Ask(args) => assert_eq!(args.prompt(), "how many albums?"),
            other => panic!("expected Ask, got {other:?}"),
        }
    }

    #[test]
    fn parse_generate_with_read_only() {
        let cli = Cli::try_parse_from([
            "sqltalk",
            "generate",
            "--read-only",
            "How",
            "many",
            "billionaires",
            "are",
            "self-made?",
        ])
        .unwrap();
        assert!(cli.global.read_only);
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.prompt(), "How many billionaires are self-made?")
            }
            other => panic!("expected Generate, got {other:?}"),
        }
    }

    #[test]
    fn ask_requires_a_question() {
        assert!(Cli::try_parse_from(["sqltalk", "ask"]).is_err());
    }

    #[test]
    fn parse_tables_with_model() {
        let cli =
            Cli::try_parse_from(["sqltalk", "--model", "openai:gpt-4o-mini", "tables"]).unwrap();
        assert!(matches!(cli.command, Commands::Tables));
        assert_eq!(cli.global.model.as_deref(), Some("openai:gpt-4o-mini"));
    }

    #[test]
    fn flags_override_config() {
        let mut config = SqlTalkConfig::new();
        let flags = GlobalArgs {
            database: Some("chinook.db".into()),
            model: Some("OpenAI:gpt-4o".into()),
            max_tool_calls: Some(3),
            read_only: true,
            ..Default::default()
        };
        flags.apply(&mut config).unwrap();

        let settings = config.settings();
        assert_eq!(settings.database, PathBuf::from("chinook.db"));
        assert_eq!(settings.model, "openai:gpt-4o");
        assert_eq!(settings.max_tool_calls, 3);
        assert!(settings.read_only);
    }

    #[test]
    fn zero_tool_calls_is_rejected() {
        let mut config = SqlTalkConfig::new();
        let flags = GlobalArgs {
            max_tool_calls: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            flags.apply(&mut config),
            Err(SqlTalkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn repl_commands() {
        assert_eq!(ReplCommand::parse("  /clear "), ReplCommand::Clear);
        assert_eq!(ReplCommand::parse("/quit"), ReplCommand::Exit);
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
        assert_eq!(
            ReplCommand::parse("List 5 product categories."),
            ReplCommand::Prompt("List 5 product categories.".into())
        );
    }
}
