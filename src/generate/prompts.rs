//! Prompt text and reply cleanup for one-shot SQL generation.

use serde::{Deserialize, Serialize};

use crate::database::{DatabaseGateway, Row};
use crate::error::SqlTalkError;

/// A worked question/SQL pair shown to the model before the real question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    pub sql: String,
}

const SQL_RULES: &str = "\
Note:
1. The SQL command should be presented without backticks (```), Markdown formatting, or the word 'sql' at the beginning or end.
2. The query should only include valid SQLite syntax.
3. Use single quotes for string values.
4. Answer with exactly one SQL statement and nothing else.";

/// Build the instruction that turns a question into a single query.
///
/// Every user table is described column by column so the model never has
/// to guess names.
pub fn sql_prompt(
    gateway: &dyn DatabaseGateway,
    examples: &[FewShotExample],
) -> Result<String, SqlTalkError> {
    let mut prompt = String::from(
        "You are an expert in converting English questions to SQL queries!\n\
         The SQLite database has the following tables:\n",
    );

    for table in gateway.list_tables()? {
        prompt.push_str(&format!("\nThe table `{table}` has the following columns:\n"));
        for column in gateway.describe_table(&table)? {
            let name = column.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let kind = column.get("type").and_then(|v| v.as_str()).unwrap_or_default();
            if kind.is_empty() {
                prompt.push_str(&format!("- {name}\n"));
            } else {
                prompt.push_str(&format!("- {name} ({kind})\n"));
            }
        }
    }

    if !examples.is_empty() {
        prompt.push_str("\nFor example:\n");
        for (idx, example) in examples.iter().enumerate() {
            prompt.push_str(&format!(
                "\nExample {} - {} The SQL command will be:\n{}\n",
                idx + 1,
                example.question.trim(),
                example.sql.trim()
            ));
        }
    }

    prompt.push('\n');
    prompt.push_str(SQL_RULES);
    Ok(prompt)
}

/// Strip Markdown fences and a leading `sql` tag from a model reply.
pub fn clean_sql(reply: &str) -> Result<String, SqlTalkError> {
    let mut sql = reply.trim();
    if let Some(rest) = sql.strip_prefix("```") {
        sql = rest;
    }
    if let Some(rest) = sql.strip_suffix("```") {
        sql = rest;
    }
    sql = sql.trim();
    let tagged = sql
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("sql"))
        && sql[3..].starts_with(char::is_whitespace);
    if tagged {
        sql = sql[3..].trim_start();
    }

    let sql = sql.trim();
    if sql.is_empty() {
        return Err(SqlTalkError::MalformedResponse(
            "model reply did not contain a SQL statement".into(),
        ));
    }
    Ok(sql.to_string())
}

/// The follow-up prompt asking the model to explain query results.
///
/// A single cell gets a short explanation with recommendations; anything
/// larger gets a summary of observations and trends.
pub fn interpretation_prompt(rows: &[Row]) -> String {
    let data = rows
        .iter()
        .map(|row| serde_json::Value::Object(row.clone()).to_string())
        .collect::<Vec<_>>()
        .join("\n");

    if rows.len() == 1 && rows[0].len() == 1 {
        format!(
            "You are an expert data analyst. Given the result of the following query:\n\n\
             Result:\n{data}\n\n\
             Please explain what this result means in simple terms. Add any useful \
             recommendations based on the query's context. Provide actionable insights if \
             applicable. Avoid using complex formatting."
        )
    } else {
        format!(
            "You are an expert data analyst. Given the following data, provide a detailed \
             summary of the key insights:\n\n\
             Data:\n{data}\n\n\
             Please describe the key observations, trends, and provide any interesting insights \
             that could help the user to better understand the data. Use simple formatting and \
             avoid unnecessary italics or fancy visual representations."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteGateway;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fences_and_tags_are_stripped() {
        assert_eq!(
            clean_sql("```sql\nSELECT COUNT(*) FROM Album;\n```").unwrap(),
            "SELECT COUNT(*) FROM Album;"
        );
        assert_eq!(clean_sql("  SQL SELECT 1  ").unwrap(), "SELECT 1");
        assert_eq!(clean_sql("SELECT 1").unwrap(), "SELECT 1");
    }

    #[test]
    fn identifiers_starting_with_sql_survive() {
        assert_eq!(
            clean_sql("sqlite_version()").unwrap(),
            "sqlite_version()"
        );
    }

    #[test]
    fn empty_reply_is_malformed() {
        let err = clean_sql("```\n```").unwrap_err();
        assert!(matches!(err, SqlTalkError::MalformedResponse(_)));
    }

    #[test]
    fn prompt_describes_every_table_and_example() {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        gateway
            .run_query("CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name NVARCHAR(120))")
            .unwrap();
        let examples = vec![FewShotExample {
            question: "How many artists are there?".into(),
            sql: "SELECT COUNT(*) FROM Artist;".into(),
        }];

        let prompt = sql_prompt(&gateway, &examples).unwrap();

        assert!(prompt.contains("The table `Artist` has the following columns:"));
        assert!(prompt.contains("- ArtistId (INTEGER)\n- Name (NVARCHAR(120))"));
        assert!(prompt.contains(
            "Example 1 - How many artists are there? The SQL command will be:\nSELECT COUNT(*) FROM Artist;"
        ));
        assert!(prompt.ends_with(SQL_RULES));
    }

    #[test]
    fn single_values_get_the_short_prompt() {
        let mut row = Row::new();
        row.insert("COUNT(*)".into(), json!(2640));

        let single = interpretation_prompt(std::slice::from_ref(&row));
        assert!(single.contains("Result:\n{\"COUNT(*)\":2640}"));
        assert!(single.contains("explain what this result means"));

        let many = interpretation_prompt(&[row.clone(), row]);
        assert!(many.contains("Data:\n"));
        assert!(many.contains("key observations"));
    }
}
