use crate::error::QueryError;
use crate::llm::{GenerationParams, LlmProvider, ProviderError};
use crate::pipeline::guard::{self, GuardViolation};
use crate::pipeline::types::{GeneratedSql, QueryRequest, SchemaContext};
use sqlparser::keywords::ALL_KEYWORDS;
use std::sync::Arc;
use tracing::{debug, info, warn};

// First words that mark a line as SQL rather than prose. Includes the
// write statements so the guard gets to see and reject them.
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
    "GRANT", "REVOKE", "ATTACH", "DETACH", "COPY", "INSTALL", "PRAGMA", "MERGE", "EXPLAIN",
    "SET", "CALL",
];

const LANGUAGE_TAGS: &[&str] = &["sql", "duckdb", "postgresql", "postgres", "sqlite"];

/// Why an attempt did not yield a usable statement.
enum AttemptFailure {
    Unparseable,
    Unsafe(GuardViolation),
    Provider(ProviderError),
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            AttemptFailure::Unparseable => "the response did not contain a SQL query".to_string(),
            AttemptFailure::Unsafe(v) => format!("the query was rejected: {}", v),
            AttemptFailure::Provider(e) => format!("the AI provider failed: {}", e.message),
        }
    }
}

/// Turns a question plus schema context into one guarded SELECT.
pub struct SqlGenerator {
    provider: Arc<dyn LlmProvider>,
    params: GenerationParams,
    max_attempts: u32,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, params: GenerationParams, max_attempts: u32) -> Self {
        Self {
            provider,
            params,
            max_attempts: max_attempts.max(1),
        }
    }

    /// `prior_failure` describes a failed earlier run (for instance an engine
    /// error) and is folded into the first prompt.
    pub async fn generate_sql(
        &self,
        request: &QueryRequest,
        context: &SchemaContext,
        prior_failure: Option<&str>,
    ) -> Result<GeneratedSql, QueryError> {
        let mut failure_note = prior_failure.map(str::to_string);
        let mut last_failure = AttemptFailure::Unparseable;

        for attempt in 1..=self.max_attempts {
            let prompt = build_prompt(request, context, failure_note.as_deref());
            debug!("Generation attempt {} prompt:\n{}", attempt, prompt);

            let failure = match self.provider.generate(&prompt, &self.params).await {
                Err(e) if e.kind.is_transient() => {
                    warn!("Attempt {} hit a transient provider failure: {}", attempt, e);
                    AttemptFailure::Provider(e)
                }
                Err(e) => return Err(e.into()),
                Ok(text) => {
                    debug!("Raw model output: {}", text);
                    match extract_statement(&text) {
                        None => AttemptFailure::Unparseable,
                        Some(candidate) => match guard::check_read_only(&candidate) {
                            Ok(statement) => {
                                info!("Generated SQL on attempt {}: {}", attempt, statement);
                                return Ok(GeneratedSql {
                                    statement,
                                    schema_version: context.version,
                                    attempts: attempt,
                                });
                            }
                            Err(violation) => {
                                warn!("Attempt {} produced an unsafe statement: {}", attempt, violation);
                                AttemptFailure::Unsafe(violation)
                            }
                        },
                    }
                }
            };

            failure_note = Some(failure.describe());
            last_failure = failure;
        }

        Err(match last_failure {
            AttemptFailure::Unsafe(violation) => violation.into(),
            AttemptFailure::Provider(e) => e.into(),
            AttemptFailure::Unparseable => QueryError::GenerationFailed {
                attempts: self.max_attempts,
                reason: AttemptFailure::Unparseable.describe(),
            },
        })
    }
}

fn build_prompt(request: &QueryRequest, context: &SchemaContext, failure: Option<&str>) -> String {
    let mut prompt = format!(
        r#"### Instructions:
Your task is to convert a question into a single read-only SQL query for {}, given a database schema.
Adhere to these rules:
- **Return exactly one SELECT statement** (a WITH prefix is allowed). Never modify data or schema.
- **Use the exact spelling of table and column names as provided in the schema**
- **Use Table Aliases** to prevent ambiguity. For example, `SELECT t1.col1, t2.col1 FROM table1 t1 JOIN table2 t2 ON t1.id = t2.id`.
- When creating a ratio, always cast the numerator as float
- Return only the SQL, with no explanations or commentary

### Schema:
{}
"#,
        context.database_type, context.text
    );

    if let Some(extra) = request.context.as_ref().filter(|m| !m.is_empty()) {
        let rendered = serde_json::to_string_pretty(extra).unwrap_or_default();
        prompt.push_str(&format!("\n### Additional Context:\n{}\n", rendered));
    }

    if let Some(failure) = failure {
        prompt.push_str(&format!(
            "\n### Previous Attempt:\nThe previous attempt failed: {}\nCorrect the problem in your new query.\n",
            failure
        ));
    }

    prompt.push_str(&format!(
        "\n### Input:\nGenerate a SQL query that answers the question `{}`.\n\n### Response:\n",
        request.text.trim()
    ));
    prompt
}

/// Pulls the SQL out of a model reply. A closed code fence is taken whole;
/// otherwise the first run of lines that starts with a statement keyword,
/// ending at the first prose line. `None` when nothing looks like SQL.
pub fn extract_statement(text: &str) -> Option<String> {
    let parts: Vec<&str> = text.split("```").collect();
    if parts.len() >= 3 {
        let block = strip_language_tag(parts[1]);
        if !block.lines().any(|l| starts_with_statement(l.trim())) {
            return None;
        }
        let kept: Vec<&str> = block
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();
        return non_empty(guard::strip_trailing_semicolons(&kept.join("\n")));
    }

    let body = match parts.as_slice() {
        // A lone fence: the model either opened or closed one
        [before, after] if before.trim().is_empty() => strip_language_tag(after),
        [before, _] => before,
        _ => text,
    };
    let lines: Vec<&str> = body.lines().collect();
    let start = lines.iter().position(|l| starts_with_statement(l.trim()))?;

    let mut kept: Vec<&str> = Vec::new();
    let mut terminated = false;
    for line in &lines[start..] {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // After a semicolon only another statement continues the run
        if terminated && !starts_with_statement(trimmed) {
            break;
        }
        let mid_list = kept.last().is_some_and(|prev| prev.ends_with(','));
        if !terminated && !mid_list && is_prose(line) {
            break;
        }
        terminated = trimmed.ends_with(';');
        kept.push(line.trim_end());
    }

    non_empty(guard::strip_trailing_semicolons(&kept.join("\n")))
}

fn non_empty(statement: &str) -> Option<String> {
    if statement.is_empty() { None } else { Some(statement.to_string()) }
}

// A sentence rather than SQL: an unindented line led by a capitalized word
// that is not a keyword, either as a label ("Note:") or opening a phrase.
fn is_prose(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) || line.trim_end().ends_with(',') {
        return false;
    }
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    let (word, labelled) = match first.strip_suffix(':') {
        Some(word) => (word, true),
        None => (first, false),
    };

    let capitalized = word.chars().next().is_some_and(char::is_uppercase)
        && word.chars().skip(1).any(char::is_lowercase)
        && word.chars().all(|c| c.is_alphabetic() || c == '\'');
    if !capitalized || ALL_KEYWORDS.contains(&word.to_uppercase().as_str()) {
        return false;
    }
    labelled || words.count() >= 2
}

fn strip_language_tag(block: &str) -> &str {
    let block = block.trim_start_matches([' ', '\t']);
    match block.split_once('\n') {
        Some((first, rest)) if LANGUAGE_TAGS.contains(&first.trim().to_lowercase().as_str()) => rest,
        _ => block,
    }
}

fn starts_with_statement(line: &str) -> bool {
    let first = line
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
        .to_uppercase();
    STATEMENT_KEYWORDS.contains(&first.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderErrorKind, ProviderKind};
    use crate::testing::ScriptedProvider;
    use chrono::Utc;
    use serde_json::json;

    fn context() -> SchemaContext {
        SchemaContext {
            text: "Database type: duckdb\n\nTable: customers\nColumns: id (INTEGER)\n".to_string(),
            version: Utc::now(),
            database_type: "duckdb".to_string(),
        }
    }

    fn generator(provider: Arc<ScriptedProvider>) -> SqlGenerator {
        SqlGenerator::new(provider, GenerationParams::default(), 2)
    }

    #[test]
    fn extracts_from_fences_and_prose() {
        assert_eq!(
            extract_statement("Here you go:\n```sql\nSELECT id\nFROM customers;\n```\nEnjoy!").as_deref(),
            Some("SELECT id\nFROM customers")
        );
        assert_eq!(
            extract_statement("SELECT 1;\n```").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(
            extract_statement("Sure! The query is:\n\nSELECT COUNT(*) FROM orders;\n\nThis counts the orders.")
                .as_deref(),
            Some("SELECT COUNT(*) FROM orders")
        );
        assert_eq!(extract_statement("I cannot help with that."), None);
        assert_eq!(extract_statement("```sql\n```"), None);
    }

    #[test]
    fn blank_lines_inside_a_statement_are_kept() {
        assert_eq!(
            extract_statement("SELECT COUNT(*) AS n\n\nFROM orders").as_deref(),
            Some("SELECT COUNT(*) AS n\nFROM orders")
        );
        assert_eq!(
            extract_statement("```sql\nSELECT id\n\nFROM customers\n```").as_deref(),
            Some("SELECT id\nFROM customers")
        );
        assert_eq!(
            extract_statement(
                "SELECT region,\n  SUM(amount) AS total\nFROM orders\n\nGROUP BY region\nThis groups revenue by region."
            )
            .as_deref(),
            Some("SELECT region,\n  SUM(amount) AS total\nFROM orders\nGROUP BY region")
        );
        assert_eq!(
            extract_statement("SELECT id FROM customers\nNote: ids are unique").as_deref(),
            Some("SELECT id FROM customers")
        );
    }

    #[test]
    fn chained_statements_stay_together_for_the_guard() {
        let extracted = extract_statement("SELECT 1;\nDROP TABLE users;").unwrap();
        assert!(guard::check_read_only(&extracted).is_err());
    }

    #[test]
    fn prompt_carries_schema_question_and_context_map() {
        let mut request = QueryRequest::new("  top customers by revenue ", "sales");
        request.context = json!({"fiscal_year": 2024}).as_object().cloned();

        let prompt = build_prompt(&request, &context(), Some("Binder Error: column x not found"));
        assert!(prompt.contains("Table: customers"));
        assert!(prompt.contains("`top customers by revenue`"));
        assert!(prompt.contains("\"fiscal_year\": 2024"));
        assert!(prompt.contains("Binder Error: column x not found"));
        assert!(prompt.contains("exactly one SELECT"));
    }

    #[tokio::test]
    async fn first_clean_answer_wins() {
        let provider = ScriptedProvider::replying(&["```sql\nSELECT id FROM customers;\n```"]);
        let ctx = context();
        let generated = generator(Arc::clone(&provider))
            .generate_sql(&QueryRequest::new("ids", "sales"), &ctx, None)
            .await
            .unwrap();

        assert_eq!(generated.statement, "SELECT id FROM customers");
        assert_eq!(generated.attempts, 1);
        assert_eq!(generated.schema_version, ctx.version);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn unsafe_answer_is_retried_with_the_reason() {
        let provider = ScriptedProvider::replying(&["DELETE FROM customers", "SELECT COUNT(*) FROM customers"]);
        let generated = generator(Arc::clone(&provider))
            .generate_sql(&QueryRequest::new("how many customers", "sales"), &context(), None)
            .await
            .unwrap();

        assert_eq!(generated.attempts, 2);
        let prompts = provider.prompts();
        assert!(!prompts[0].contains("### Previous Attempt"));
        assert!(prompts[1].contains("only SELECT statements are allowed, found DELETE"));
    }

    #[tokio::test]
    async fn unsafe_to_the_end_stays_unsafe() {
        let provider = ScriptedProvider::replying(&["DROP TABLE users;", "DROP TABLE users;"]);
        let err = generator(Arc::clone(&provider))
            .generate_sql(&QueryRequest::new("drop it", "sales"), &context(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::UnsafeStatement(_)));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn unreachable_provider_fails_without_retry() {
        let provider = ScriptedProvider::failing(ProviderErrorKind::Unreachable);
        let err = generator(Arc::clone(&provider))
            .generate_sql(&QueryRequest::new("anything", "sales"), &context(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::Provider(ProviderError { kind: ProviderErrorKind::Unreachable, .. })
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transient_provider_failure_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::new(ProviderErrorKind::Timeout, ProviderKind::OpenAi, "slow")),
            Ok("SELECT 1".to_string()),
        ]);
        let generated = generator(Arc::clone(&provider))
            .generate_sql(&QueryRequest::new("one", "sales"), &context(), None)
            .await
            .unwrap();
        assert_eq!(generated.attempts, 2);

        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::new(ProviderErrorKind::Timeout, ProviderKind::OpenAi, "slow")),
            Err(ProviderError::new(ProviderErrorKind::Timeout, ProviderKind::OpenAi, "slow")),
        ]);
        let err = generator(provider)
            .generate_sql(&QueryRequest::new("one", "sales"), &context(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "provider_error.timeout");
    }

    #[tokio::test]
    async fn empty_output_ends_in_generation_failed() {
        let provider = ScriptedProvider::replying(&["", "I am not sure what you mean."]);
        let err = generator(provider)
            .generate_sql(&QueryRequest::new("???", "sales"), &context(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::GenerationFailed { attempts: 2, .. }));
    }
}
