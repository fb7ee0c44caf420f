//! Tests for layered configuration loading.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use sqltalk::config::SqlTalkConfig;
use sqltalk::error::SqlTalkError;
use sqltalk::generate::FewShotExample;
use sqltalk::models::{LanguageModel, ProviderKind};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 10] = [
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_GEMINI_API_KEY",
    "OPENAI_API_KEY",
    "GOOGLE_BASE_URL",
    "OPENAI_BASE_URL",
    "SQLTALK_DATABASE",
    "SQLTALK_MODEL",
    "SQLTALK_MAX_TOOL_CALLS",
    "SQLTALK_READ_ONLY",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clean_env() -> EnvGuard {
    let guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
    guard
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn file_values_are_loaded() {
    let _env_lock = env_lock_guard();
    let _env_guard = clean_env();
    let file = write_config(
        r#"
database = "billionaires.db"
model = "openai:gpt-4o-mini"
max_tool_calls = 6
model_timeout_secs = 30
system_instruction = "Answer in one sentence."
"#,
    );

    let config = SqlTalkConfig::load(Some(file.path())).unwrap();
    let settings = config.settings();

    assert_eq!(settings.database, PathBuf::from("billionaires.db"));
    assert_eq!(settings.max_tool_calls, 6);
    assert_eq!(settings.max_attempts, 3);
    assert_eq!(config.model_timeout().as_secs(), 30);
    assert_eq!(
        settings.system_instruction.as_deref(),
        Some("Answer in one sentence.")
    );
    assert_eq!(
        config.model().unwrap(),
        LanguageModel::new(ProviderKind::OpenAi, "gpt-4o-mini")
    );
}

#[test]
fn few_shot_examples_are_read_from_tables() {
    let _env_lock = env_lock_guard();
    let _env_guard = clean_env();
    let file = write_config(
        r#"
[[examples]]
question = "How many billionaires have inherited their wealth?"
sql = "SELECT COUNT(*) FROM BILLIONAIRES_DATA WHERE status = 'U';"

[[examples]]
question = "List the top 5 billionaires."
sql = "SELECT * FROM BILLIONAIRES_DATA ORDER BY rank LIMIT 5;"
"#,
    );

    let config = SqlTalkConfig::load(Some(file.path())).unwrap();
    let examples = &config.settings().examples;

    assert_eq!(examples.len(), 2);
    assert_eq!(
        examples[0],
        FewShotExample {
            question: "How many billionaires have inherited their wealth?".into(),
            sql: "SELECT COUNT(*) FROM BILLIONAIRES_DATA WHERE status = 'U';".into(),
        }
    );
}

#[test]
fn environment_beats_the_file() {
    let _env_lock = env_lock_guard();
    let _env_guard = clean_env();
    let file = write_config("database = \"from-file.db\"\nread_only = false\n");

    std::env::set_var("SQLTALK_DATABASE", "from-env.db");
    std::env::set_var("SQLTALK_READ_ONLY", "yes");
    std::env::set_var("GEMINI_API_KEY", "gemini-key");
    std::env::set_var("OPENAI_BASE_URL", "http://localhost:9999/v1");

    let config = SqlTalkConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.settings().database, PathBuf::from("from-env.db"));
    assert!(config.settings().read_only);
    assert_eq!(config.get_api_key("google").as_deref(), Some("gemini-key"));
    assert!(config.has_credentials("google"));
    assert!(!config.has_credentials("openai"));
    assert_eq!(
        config.get_base_url("openai").as_deref(),
        Some("http://localhost:9999/v1")
    );
}

#[test]
fn malformed_file_is_a_configuration_error() {
    let _env_lock = env_lock_guard();
    let _env_guard = clean_env();
    let file = write_config("max_tool_calls = \"many\"");

    let err = SqlTalkConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, SqlTalkError::Configuration(_)));
}

#[test]
fn zero_cap_from_env_is_rejected() {
    let _env_lock = env_lock_guard();
    let _env_guard = clean_env();
    std::env::set_var("SQLTALK_MAX_TOOL_CALLS", "0");

    let err = SqlTalkConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("SQLTALK_MAX_TOOL_CALLS"));
}

#[test]
fn bad_model_string_surfaces_on_use() {
    let _env_lock = env_lock_guard();
    let _env_guard = clean_env();
    std::env::set_var("SQLTALK_MODEL", "gemini-without-provider");

    let config = SqlTalkConfig::from_env().unwrap();
    assert!(matches!(
        config.model(),
        Err(SqlTalkError::InvalidArgument(_))
    ));
}
