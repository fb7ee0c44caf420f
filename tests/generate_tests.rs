//! One-shot SQL generation against a scripted model.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::*;
use sqltalk::database::{DatabaseGateway, ReadOnlyGateway};
use sqltalk::error::SqlTalkError;
use sqltalk::generate::{FewShotExample, SqlGenerator};
use sqltalk::provider::ModelProvider;
use sqltalk::util::retry::RetryPolicy;

fn generator(provider: &Arc<ScriptedProvider>) -> SqlGenerator {
    let provider: Arc<dyn ModelProvider> = provider.clone();
    SqlGenerator::new(provider).with_retry_policy(RetryPolicy::none())
}

#[tokio::test]
async fn single_value_answer_runs_query_and_interprets_it() {
    let provider = ScriptedProvider::new();
    provider.queue_text("```sql\nSELECT COUNT(*) AS total FROM BILLIONAIRES_DATA;\n```");
    provider.queue_text("There are 2640 billionaires in the 2023 data.");
    let gateway = billionaires_gateway();

    let answer = generator(&provider)
        .answer(&gateway, "How many billionaires are there?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(answer.sql, "SELECT COUNT(*) AS total FROM BILLIONAIRES_DATA;");
    assert_eq!(answer.columns, vec!["total"]);
    assert_eq!(answer.rows[0]["total"], json!(BILLIONAIRES_ROWS));
    assert_eq!(
        answer.interpretation.as_deref(),
        Some("There are 2640 billionaires in the 2023 data.")
    );
    assert_eq!(answer.usage.total_tokens, 60);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.tools.is_empty()));
    let schema = requests[0].system.as_deref().unwrap();
    assert!(schema.contains("The table `BILLIONAIRES_DATA` has the following columns:"));
    assert!(requests[1].system.is_none());
    let follow_up = requests[1].messages[0].text();
    assert!(follow_up.starts_with("How many billionaires are there?"));
    assert!(follow_up.contains("Result:\n{\"total\":2640}"));
}

#[tokio::test]
async fn multi_row_results_ask_for_a_summary() {
    let provider = ScriptedProvider::new();
    provider.queue_text("SELECT Name FROM Artist ORDER BY ArtistId");
    provider.queue_text("Two artists: AC/DC and Accept.");
    let gateway = music_store_gateway();

    let answer = generator(&provider)
        .answer(&gateway, "Which artists exist?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(answer.rows.len(), 2);
    assert_eq!(answer.columns, vec!["Name"]);
    let follow_up = provider.requests()[1].messages[0].text();
    assert!(follow_up.contains("Data:\n"));
    assert!(follow_up.contains("key observations"));
}

#[tokio::test]
async fn empty_results_skip_the_interpretation_call() {
    let provider = ScriptedProvider::new();
    provider.queue_text("SELECT * FROM Album WHERE Title = 'Nope'");
    let gateway = music_store_gateway();

    let answer = generator(&provider)
        .answer(&gateway, "Is there an album called Nope?", &CancellationToken::new())
        .await
        .unwrap();

    assert!(answer.is_empty());
    assert!(answer.interpretation.is_none());
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn query_errors_are_returned_without_a_second_call() {
    let provider = ScriptedProvider::new();
    provider.queue_text("SELECT * FROM NoSuchTable");
    let gateway = music_store_gateway();

    let err = generator(&provider)
        .answer(&gateway, "Anything?", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SqlTalkError::Database(ref m) if m.contains("no such table")));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn blank_question_never_reaches_the_model() {
    let provider = ScriptedProvider::new();
    let gateway = music_store_gateway();

    let err = generator(&provider)
        .answer(&gateway, "   ", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SqlTalkError::InvalidArgument(_)));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn tool_call_reply_is_malformed() {
    let provider = ScriptedProvider::new();
    provider.queue_tool_call("c1", "list_tables", json!({}));
    let gateway = music_store_gateway();

    let err = generator(&provider)
        .answer(&gateway, "Tables?", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SqlTalkError::MalformedResponse(_)));
}

#[tokio::test]
async fn read_only_gateway_rejects_generated_writes() {
    let provider = ScriptedProvider::new();
    provider.queue_text("DELETE FROM Artist");
    let gateway = ReadOnlyGateway::new(music_store_gateway());

    let err = generator(&provider)
        .answer(&gateway, "Remove every artist", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SqlTalkError::Database(_)));
    let rows = gateway.run_query("SELECT COUNT(*) AS n FROM Artist").unwrap();
    assert_eq!(rows[0]["n"], json!(2));
}

#[tokio::test]
async fn examples_are_included_in_the_prompt() {
    let provider = ScriptedProvider::new();
    provider.queue_text("SELECT COUNT(*) FROM Album");
    let gateway = music_store_gateway();
    let examples = vec![FewShotExample {
        question: "How many artists are there?".into(),
        sql: "SELECT COUNT(*) FROM Artist;".into(),
    }];

    let (sql, _) = generator(&provider)
        .with_examples(examples)
        .generate_sql(&gateway, "How many albums?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(sql, "SELECT COUNT(*) FROM Album");
    let system = provider.requests()[0].system.clone().unwrap();
    assert!(system.contains("Example 1 - How many artists are there?"));
}

#[tokio::test]
async fn canceled_generation_never_calls_the_model() {
    let provider = ScriptedProvider::new();
    provider.queue_text("SELECT 1");
    let token = CancellationToken::new();
    token.cancel();

    let err = generator(&provider)
        .answer(&music_store_gateway(), "Anything", &token)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlTalkError::Canceled));
    assert_eq!(provider.call_count(), 0);
}
