//! SQL Guardian - query safety validation
//!
//! Classifies candidate SQL text as safe-to-execute or not. Model output is
//! untrusted: it may contain markdown fences, chat labels, stacked statements,
//! or verbs smuggled into subqueries. The Guardian normalizes the text and
//! runs a fixed sequence of checks; it never rewrites a query beyond that
//! normalization and it never talks to the database.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Statement verbs that must never execute, anywhere in the text.
static FORBIDDEN_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "MERGE",
        "GRANT", "REVOKE", "EXEC", "EXECUTE", "CALL", "COPY", "DO", "VACUUM", "SET", "INTO",
    ]
    .into_iter()
    .collect()
});

/// Server-side callables that can disrupt or exfiltrate even inside a SELECT.
static DANGEROUS_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "pg_terminate_backend",
        "pg_cancel_backend",
        "pg_sleep",
        "pg_read_file",
        "pg_ls_dir",
        "dblink",
        "lo_import",
        "lo_export",
    ]
    .into_iter()
    .collect()
});

/// Keywords that may legitimately precede a parenthesis; everything else
/// followed by `(` is treated as a function call for the allow-list check.
static SQL_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "HAVING", "LIMIT", "OFFSET", "JOIN",
        "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ON", "AS", "AND", "OR", "NOT", "IN",
        "EXISTS", "BETWEEN", "LIKE", "ILIKE", "IS", "NULL", "DISTINCT", "UNION", "ALL", "ANY",
        "SOME", "CASE", "WHEN", "THEN", "ELSE", "END", "WITH", "RECURSIVE", "OVER", "PARTITION",
        "ASC", "DESC", "USING", "VALUES", "INTERVAL", "CAST", "TRUE", "FALSE", "FILTER", "LATERAL",
    ]
    .into_iter()
    .collect()
});

/// Aggregate and scalar builtins that stay callable even under an allow-list.
static BUILTIN_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "count", "sum", "avg", "min", "max", "coalesce", "nullif", "greatest", "least", "round",
        "floor", "ceil", "abs", "lower", "upper", "length", "trim", "substring", "concat",
        "now", "date_trunc", "date_part", "extract", "to_char", "to_date", "age",
    ]
    .into_iter()
    .collect()
});

static LEADING_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*sql\s*:\s*").unwrap());
static EDGE_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\s*<[^<>]+>)+|(?:<[^<>]+>\s*)+$").unwrap());

/// Reason codes for a rejected query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    MultipleStatements,
    ForbiddenVerb,
    ForbiddenEmbeddedKeyword,
    DisallowedObject,
    Malformed,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::MultipleStatements => {
                "Only a single SQL statement may be executed per request"
            }
            RejectReason::ForbiddenVerb => {
                "Only read-only SELECT (or WITH ... SELECT) statements are allowed"
            }
            RejectReason::ForbiddenEmbeddedKeyword => {
                "The query embeds a keyword or function that is not permitted"
            }
            RejectReason::DisallowedObject => {
                "The query references a table or function outside the configured allow-list"
            }
            RejectReason::Malformed => "The query text is empty or not syntactically balanced",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of classifying one SQL string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GuardianVerdict {
    Allow,
    Reject { reason: RejectReason },
}

impl GuardianVerdict {
    pub fn reject(reason: RejectReason) -> Self {
        GuardianVerdict::Reject { reason }
    }
}

/// One word-like token outside quoting, with enough surrounding context
/// for reference extraction.
#[derive(Debug)]
struct Token {
    upper: String,
    lower: String,
    /// Next non-whitespace character after the token, if any
    next_char: Option<char>,
}

/// Query safety validator. Stateless apart from its configuration; safe for
/// unlimited concurrent use.
#[derive(Debug, Clone, Default)]
pub struct Guardian {
    /// Lowercased table/function names permitted to appear in queries.
    /// `None` disables the object check entirely.
    allowed_objects: Option<HashSet<String>>,
}

impl Guardian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a Guardian with an object allow-list (table and function names).
    pub fn with_allowed_objects<I, S>(objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_objects: Some(
                objects
                    .into_iter()
                    .map(|s| s.as_ref().to_lowercase())
                    .collect(),
            ),
        }
    }

    pub fn from_allow_list(objects: Option<&[String]>) -> Self {
        match objects {
            Some(list) => Self::with_allowed_objects(list),
            None => Self::new(),
        }
    }

    /// Strip model chatter and normalize the statement body. The returned
    /// text is what gets executed and recorded when the verdict is `Allow`:
    /// comments removed, whitespace collapsed outside literals, one trailing
    /// semicolon dropped. Best-effort on malformed input.
    pub fn normalize(&self, raw: &str) -> String {
        let scrubbed = scrub(raw);
        match split_statements(&scrubbed) {
            Ok(statements) => {
                let non_empty: Vec<&String> =
                    statements.iter().filter(|s| !s.is_empty()).collect();
                match non_empty.as_slice() {
                    [single] => (*single).clone(),
                    _ => scrubbed.trim().to_string(),
                }
            }
            Err(_) => scrubbed.trim().to_string(),
        }
    }

    /// Classify arbitrary SQL text. Pure and deterministic: the same input
    /// always yields the same verdict.
    pub fn classify(&self, sql: &str) -> GuardianVerdict {
        let scrubbed = scrub(sql);

        let statements = match split_statements(&scrubbed) {
            Ok(s) => s,
            Err(reason) => return GuardianVerdict::reject(reason),
        };

        let non_empty: Vec<&String> = statements.iter().filter(|s| !s.is_empty()).collect();
        let statement = match non_empty.as_slice() {
            [] => return GuardianVerdict::reject(RejectReason::Malformed),
            [single] => single.as_str(),
            _ => return GuardianVerdict::reject(RejectReason::MultipleStatements),
        };

        let tokens = tokenize(statement);
        let Some(first) = tokens.first() else {
            return GuardianVerdict::reject(RejectReason::Malformed);
        };

        match first.upper.as_str() {
            "SELECT" => {}
            "WITH" => {
                // A CTE prelude must still resolve to a SELECT; WITH wrapping
                // a data-modifying statement is caught here or by the
                // embedded-keyword scan below.
                let has_select = tokens.iter().skip(1).any(|t| t.upper == "SELECT");
                if !has_select {
                    return GuardianVerdict::reject(RejectReason::ForbiddenVerb);
                }
            }
            _ => return GuardianVerdict::reject(RejectReason::ForbiddenVerb),
        }

        for token in &tokens {
            if FORBIDDEN_KEYWORDS.contains(token.upper.as_str())
                || DANGEROUS_FUNCTIONS.contains(token.lower.as_str())
            {
                return GuardianVerdict::reject(RejectReason::ForbiddenEmbeddedKeyword);
            }
        }

        if let Some(allowed) = &self.allowed_objects {
            if let Some(reason) = check_object_references(&tokens, allowed) {
                return GuardianVerdict::reject(reason);
            }
        }

        GuardianVerdict::Allow
    }
}

/// Remove chat labels, markdown fence markers, stray backticks, and
/// XML-style tags at the edges of the text. Inner content is preserved.
fn scrub(raw: &str) -> String {
    let mut text = LEADING_LABEL.replace(raw.trim(), "").to_string();
    if text.contains("```") {
        text = text
            .replace("```sql", " ")
            .replace("```SQL", " ")
            .replace("```", " ");
    }
    let text = text.trim().trim_matches('`').trim();
    EDGE_TAGS.replace_all(text, "").trim().to_string()
}

/// Split on top-level statement separators, stripping comments and collapsing
/// whitespace outside string literals along the way. Errors on unbalanced
/// quotes, comments, or parentheses.
fn split_statements(input: &str) -> Result<Vec<String>, RejectReason> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut block_depth = 0usize;
    let mut paren_depth = 0i64;
    let mut last_was_space = false;

    while let Some(c) = chars.next() {
        if block_depth > 0 {
            // Postgres block comments nest
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                block_depth -= 1;
            } else if c == '/' && chars.peek() == Some(&'*') {
                chars.next();
                block_depth += 1;
            }
            continue;
        }
        if in_single {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    // doubled quote stays inside the literal
                    current.push(chars.next().unwrap());
                } else {
                    in_single = false;
                }
            }
            continue;
        }
        if in_double {
            current.push(c);
            if c == '"' {
                in_double = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_single = true;
                current.push(c);
                last_was_space = false;
            }
            '"' => {
                in_double = true;
                current.push(c);
                last_was_space = false;
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
                if !last_was_space && !current.is_empty() {
                    current.push(' ');
                }
                last_was_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                block_depth = 1;
                if !last_was_space && !current.is_empty() {
                    current.push(' ');
                }
                last_was_space = true;
            }
            '(' => {
                paren_depth += 1;
                current.push(c);
                last_was_space = false;
            }
            ')' => {
                paren_depth -= 1;
                if paren_depth < 0 {
                    return Err(RejectReason::Malformed);
                }
                current.push(c);
                last_was_space = false;
            }
            ';' if paren_depth == 0 => {
                statements.push(current.trim().to_string());
                current = String::new();
                last_was_space = false;
            }
            c if c.is_whitespace() => {
                if !last_was_space && !current.is_empty() {
                    current.push(' ');
                }
                last_was_space = true;
            }
            _ => {
                current.push(c);
                last_was_space = false;
            }
        }
    }

    if in_single || in_double || block_depth > 0 || paren_depth != 0 {
        return Err(RejectReason::Malformed);
    }

    statements.push(current.trim().to_string());
    Ok(statements)
}

/// Extract word tokens outside quoting. Quoted literals and quoted
/// identifiers are opaque to keyword checks by design.
fn tokenize(statement: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = statement.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if i + 1 < chars.len() && chars[i + 1] == '\'' {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
            i += 1;
        } else if c == '"' {
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                i += 1;
            }
            i += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            tokens.push(Token {
                upper: word.to_uppercase(),
                lower: word.to_lowercase(),
                next_char: chars.get(j).copied(),
            });
        } else {
            i += 1;
        }
    }

    tokens
}

/// Enforce the configured object allow-list: tables named after FROM/JOIN
/// and any identifier used as a callable must be listed (builtins excepted).
fn check_object_references(tokens: &[Token], allowed: &HashSet<String>) -> Option<RejectReason> {
    for (i, token) in tokens.iter().enumerate() {
        let is_table_intro = token.upper == "FROM" || token.upper == "JOIN";
        if is_table_intro && token.next_char != Some('(') {
            if let Some(reference) = tokens.get(i + 1) {
                if SQL_KEYWORDS.contains(reference.upper.as_str()) {
                    continue;
                }
                // schema-qualified names match on either the full path or
                // the bare table name
                let full = if reference.next_char == Some('.') {
                    tokens
                        .get(i + 2)
                        .map(|t| format!("{}.{}", reference.lower, t.lower))
                } else {
                    None
                };
                let bare = match &full {
                    Some(f) => f.split('.').next_back().unwrap_or(f).to_string(),
                    None => reference.lower.clone(),
                };
                let listed = allowed.contains(&bare)
                    || full.as_deref().map(|f| allowed.contains(f)).unwrap_or(false);
                if !listed {
                    return Some(RejectReason::DisallowedObject);
                }
            }
        }

        let is_callable = token.next_char == Some('(')
            && !SQL_KEYWORDS.contains(token.upper.as_str());
        if is_callable
            && !BUILTIN_FUNCTIONS.contains(token.lower.as_str())
            && !allowed.contains(&token.lower)
        {
            return Some(RejectReason::DisallowedObject);
        }
    }
    None
}
