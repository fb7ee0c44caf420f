//! sqltalk: ask questions about a SQLite database in plain language.
//!
//! A hosted language model is given three tools (`list_tables`,
//! `get_table`, `sql_query`) and a conversation driver runs the
//! call-dispatch-reply loop until the model produces an answer, recording
//! every tool call in a trace shown alongside that answer.
//!
//! [`generate::SqlGenerator`] offers a tool-free alternative: one generated
//! query, its rows, and a plain-language interpretation of them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqltalk::prelude::*;
//!
//! # async fn example() -> sqltalk::error::Result<()> {
//! let config = SqlTalkConfig::load(None)?;
//! let provider = create_provider(&config.model()?, &config)?;
//! let driver = ConversationDriver::from_config(Arc::from(provider), &config);
//!
//! let mut sessions = SessionManager::new(Arc::new(SqliteGatewayFactory::new("music_store.db")));
//! let session = sessions.open("demo")?;
//! let outcome = driver.run_turn(session, "How many albums are there?").await;
//! println!("{}\n\n{}", outcome.answer, outcome.trace.render());
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod database;
pub mod error;
pub mod generate;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod tools;
pub mod trace;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
