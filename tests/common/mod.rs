//! Shared test helpers: a scripted model provider and SQLite fixtures.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sqltalk::agent_loop::ConversationDriver;
use sqltalk::database::{DatabaseGateway, GatewayFactory, SqliteGateway};
use sqltalk::error::SqlTalkError;
use sqltalk::provider::{ModelProvider, ModelReply, ProviderRequest, ProviderResponse};
use sqltalk::session::Session;
use sqltalk::tools::ToolCatalog;
use sqltalk::types::*;
use sqltalk::util::retry::RetryPolicy;

/// Number of rows in the `BILLIONAIRES_DATA` fixture.
pub const BILLIONAIRES_ROWS: i64 = 2640;

/// A provider that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ProviderResponse, SqlTalkError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a final text answer.
    pub fn queue_text(&self, text: &str) {
        self.push(Ok(ProviderResponse {
            reply: ModelReply::Text(text.to_string()),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
            },
            finish_reason: Some(FinishReason::Stop),
        }));
    }

    /// Queue a reply requesting a single tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, args: serde_json::Value) {
        self.queue_tool_calls(vec![call(id, name, args)]);
    }

    /// Queue one reply carrying several tool calls.
    pub fn queue_tool_calls(&self, calls: Vec<AgentToolCall>) {
        self.push(Ok(ProviderResponse {
            reply: ModelReply::ToolCalls { text: None, calls },
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: Some(FinishReason::ToolCalls),
        }));
    }

    pub fn queue_error(&self, err: SqlTalkError) {
        self.push(Err(err));
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Make every call take `latency` before replying.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    fn push(&self, reply: Result<ProviderResponse, SqlTalkError>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, SqlTalkError> {
        self.requests.lock().unwrap().push(request.clone());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SqlTalkError::InvalidState("script exhausted".into())))
    }
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> AgentToolCall {
    AgentToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args,
    }
}

/// Driver over `provider` with retries disabled.
pub fn driver(provider: &Arc<ScriptedProvider>) -> ConversationDriver {
    let provider: Arc<dyn ModelProvider> = provider.clone();
    ConversationDriver::new(provider, ToolCatalog::new()).with_retry_policy(RetryPolicy::none())
}

/// In-memory database with a `BILLIONAIRES_DATA` table of 2640 rows.
pub fn billionaires_gateway() -> SqliteGateway {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    seed_billionaires(&gateway);
    gateway
}

pub fn seed_billionaires(gateway: &dyn DatabaseGateway) {
    gateway
        .run_query(
            "CREATE TABLE BILLIONAIRES_DATA (\
                 rank INTEGER, personName TEXT, age INTEGER, finalWorth REAL, country TEXT)",
        )
        .unwrap();
    gateway
        .run_query(&format!(
            "WITH RECURSIVE seq(n) AS \
                 (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {BILLIONAIRES_ROWS}) \
             INSERT INTO BILLIONAIRES_DATA SELECT n, 'Person ' || n, 30 + (n % 60), 1000.0 + n, \
                    CASE n % 3 WHEN 0 THEN 'United States' WHEN 1 THEN 'China' ELSE 'India' END \
             FROM seq"
        ))
        .unwrap();
}

/// Small music-store schema with two related tables.
pub fn music_store_gateway() -> SqliteGateway {
    let gateway = SqliteGateway::open_in_memory().unwrap();
    gateway
        .run_query("CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name TEXT NOT NULL)")
        .unwrap();
    gateway
        .run_query(
            "CREATE TABLE Album (AlbumId INTEGER PRIMARY KEY, Title TEXT NOT NULL, \
             ArtistId INTEGER REFERENCES Artist(ArtistId))",
        )
        .unwrap();
    gateway
        .run_query("INSERT INTO Artist (Name) VALUES ('AC/DC'), ('Accept')")
        .unwrap();
    gateway
        .run_query(
            "INSERT INTO Album (Title, ArtistId) VALUES \
             ('For Those About To Rock We Salute You', 1), ('Balls to the Wall', 2), \
             ('Restless and Wild', 2)",
        )
        .unwrap();
    gateway
}

pub fn session_with(gateway: SqliteGateway) -> Session {
    Session::new("test-session", Box::new(gateway))
}

/// Opens a freshly seeded in-memory billionaires database per session.
pub struct SeededMemoryFactory;

impl GatewayFactory for SeededMemoryFactory {
    fn open(&self) -> Result<Box<dyn DatabaseGateway>, SqlTalkError> {
        Ok(Box::new(billionaires_gateway()))
    }
}
