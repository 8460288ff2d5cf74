//! Prompt construction and answer formatting
//!
//! Builds the generation prompt from schema context, recent conversation
//! turns, and the question; renders the deterministic answer text for every
//! terminal path. No model call happens here.

use crate::executor::TabularResult;
use crate::guardian::RejectReason;
use crate::session::Turn;

const ANSWER_PREVIEW_CHARS: usize = 100;
const PREVIEW_ROWS: usize = 5;

/// Assemble the SQL-generation prompt
pub fn build_sql_prompt(
    context: &[String],
    history: &[Turn],
    history_window: usize,
    question: &str,
) -> String {
    let schema = if context.is_empty() {
        "No schema context available.".to_string()
    } else {
        context.join("\n")
    };

    format!(
        "You are an expert SQL query generator for database analysis.\n\
         \n\
         Database schema context:\n\
         {schema}\n\
         \n\
         Previous conversation context:\n\
         {conversation}\n\
         \n\
         Current user question:\n\
         {question}\n\
         \n\
         Instructions:\n\
         1. Generate a single PostgreSQL SELECT query answering the question.\n\
         2. Use only tables and columns from the schema context.\n\
         3. Consider the previous conversation when the question refers back to it.\n\
         4. Return ONLY the SQL query, no explanations or markdown formatting.\n\
         \n\
         SQL query:",
        schema = schema,
        conversation = conversation_context(history, history_window),
        question = question,
    )
}

/// Fold the most recent turns into a compact context block, newest last
pub fn conversation_context(history: &[Turn], window: usize) -> String {
    if history.is_empty() || window == 0 {
        return "No previous conversation context.".to_string();
    }

    let start = history.len().saturating_sub(window);
    let mut parts = Vec::new();
    for turn in &history[start..] {
        parts.push(format!("Q: {}", turn.question));
        if let Some(sql) = &turn.sql {
            parts.push(format!("SQL: {}", sql));
        }
        let mut answer: String = turn.answer.chars().take(ANSWER_PREVIEW_CHARS).collect();
        if turn.answer.chars().count() > ANSWER_PREVIEW_CHARS {
            answer.push_str("...");
        }
        parts.push(format!("A: {}", answer));
    }
    parts.join("\n")
}

/// One-line result description stored on the Turn
pub fn result_summary(result: &TabularResult) -> String {
    match result.row_count {
        0 => "Query returned no rows.".to_string(),
        1 => "Query returned 1 row.".to_string(),
        n => format!("Query returned {} rows.", n),
    }
}

/// Answer text for a successful execution: summary plus a small preview table
pub fn success_answer(result: &TabularResult) -> String {
    let mut answer = result_summary(result);
    if !result.rows.is_empty() {
        answer.push('\n');
        answer.push_str(&render_preview(result));
        if result.row_count > PREVIEW_ROWS {
            answer.push_str(&format!(
                "\n(showing first {} of {} rows)",
                PREVIEW_ROWS.min(result.rows.len()),
                result.row_count
            ));
        }
    }
    answer
}

pub fn rejection_answer(reason: RejectReason) -> String {
    format!(
        "The generated query was blocked before execution: {}. \
         Try rephrasing your question.",
        reason.message()
    )
}

pub fn generation_failure_answer(error: &str) -> String {
    format!(
        "I could not generate a SQL query for that question ({}). \
         Please try rephrasing it.",
        error
    )
}

pub fn execution_failure_answer(error: &str) -> String {
    format!(
        "The query failed to execute: {}. \
         The information you asked for may not exist in the database.",
        error
    )
}

/// Pipe-separated preview of the first few rows
fn render_preview(result: &TabularResult) -> String {
    let mut lines = Vec::new();
    if !result.columns.is_empty() {
        lines.push(result.columns.join(" | "));
    }
    for row in result.rows.iter().take(PREVIEW_ROWS) {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        lines.push(cells.join(" | "));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardian::GuardianVerdict;
    use crate::session::TurnStatus;
    use serde_json::json;

    fn turn(question: &str, sql: Option<&str>, answer: &str) -> Turn {
        Turn::new(
            question,
            sql.map(|s| s.to_string()),
            Some(GuardianVerdict::Allow),
            TurnStatus::Completed,
            "1 row",
            answer,
        )
    }

    fn result(rows: usize) -> TabularResult {
        TabularResult {
            columns: vec!["category".to_string(), "count".to_string()],
            rows: (0..rows)
                .map(|i| vec![json!(format!("cat{}", i)), json!(i.to_string())])
                .collect(),
            row_count: rows,
            truncated: false,
        }
    }

    #[test]
    fn test_prompt_contains_schema_history_and_question() {
        let history = vec![turn(
            "how many products?",
            Some("SELECT COUNT(*) FROM products"),
            "42",
        )];
        let prompt = build_sql_prompt(
            &["Table products: contains columns id.".to_string()],
            &history,
            3,
            "and per category?",
        );

        assert!(prompt.contains("Table products"));
        assert!(prompt.contains("Q: how many products?"));
        assert!(prompt.contains("SQL: SELECT COUNT(*) FROM products"));
        assert!(prompt.contains("and per category?"));
        assert!(prompt.contains("Return ONLY the SQL query"));
    }

    #[test]
    fn test_prompt_without_context_says_so() {
        let prompt = build_sql_prompt(&[], &[], 3, "anything?");
        assert!(prompt.contains("No schema context available."));
        assert!(prompt.contains("No previous conversation context."));
    }

    #[test]
    fn test_conversation_context_windows_recent_turns() {
        let history: Vec<Turn> = (0..5)
            .map(|i| turn(&format!("q{}", i), None, &format!("a{}", i)))
            .collect();
        let context = conversation_context(&history, 2);

        assert!(!context.contains("q2"));
        assert!(context.contains("q3"));
        assert!(context.contains("q4"));
    }

    #[test]
    fn test_conversation_context_truncates_long_answers() {
        let long_answer = "x".repeat(300);
        let history = vec![turn("q", None, &long_answer)];
        let context = conversation_context(&history, 3);
        assert!(context.contains("..."));
        assert!(context.len() < 200);
    }

    #[test]
    fn test_result_summary_row_counts() {
        assert_eq!(result_summary(&result(0)), "Query returned no rows.");
        assert_eq!(result_summary(&result(1)), "Query returned 1 row.");
        assert_eq!(result_summary(&result(7)), "Query returned 7 rows.");
    }

    #[test]
    fn test_success_answer_previews_rows() {
        let answer = success_answer(&result(7));
        assert!(answer.starts_with("Query returned 7 rows."));
        assert!(answer.contains("category | count"));
        assert!(answer.contains("cat0 | 0"));
        assert!(answer.contains("showing first 5 of 7 rows"));
        // preview stops at the cap
        assert!(!answer.contains("cat5"));
    }
}
