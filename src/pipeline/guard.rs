//! Read-only statement guard shared by the generator and the executor.

use crate::error::QueryError;
use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::ops::ControlFlow;
use thiserror::Error;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    // DuckDB statements that write files or change the catalog
    "ATTACH", "DETACH", "COPY", "INSTALL", "PRAGMA", "MERGE",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("statement is empty")]
    Empty,

    #[error("only SELECT statements are allowed, found {0}")]
    NotSelect(String),

    #[error("forbidden keyword {0}")]
    Forbidden(String),

    #[error("multiple statements are not allowed")]
    MultipleStatements,

    #[error("statement could not be parsed: {0}")]
    Unparseable(String),
}

impl From<GuardViolation> for QueryError {
    fn from(violation: GuardViolation) -> Self {
        QueryError::UnsafeStatement(violation.to_string())
    }
}

/// Drops trailing whitespace and semicolons.
pub fn strip_trailing_semicolons(sql: &str) -> &str {
    let mut trimmed = sql.trim();
    while let Some(rest) = trimmed.strip_suffix(';') {
        trimmed = rest.trim_end();
    }
    trimmed
}

/// Accepts exactly one SELECT (optionally behind a WITH prefix) and returns
/// it without trailing semicolons. Never rewrites the statement.
///
/// Two layers run over the same lexer: a token scan for the leading keyword,
/// chained statements and blacklisted keywords, then a full parse that must
/// yield a single query with no writes anywhere in its tree.
pub fn check_read_only(sql: &str) -> Result<String, GuardViolation> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| GuardViolation::Unparseable(e.to_string()))?;
    scan_tokens(&tokens)?;

    let statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| GuardViolation::Unparseable(e.to_string()))?;
    let statement = match statements.as_slice() {
        [] => return Err(GuardViolation::Empty),
        [statement] => statement,
        _ => return Err(GuardViolation::MultipleStatements),
    };

    if let ControlFlow::Break(violation) = statement.visit(&mut ReadOnlyVisitor) {
        return Err(violation);
    }

    Ok(strip_trailing_semicolons(sql).to_string())
}

fn scan_tokens(tokens: &[Token]) -> Result<(), GuardViolation> {
    let mut seen_semicolon = false;
    let mut words = Vec::new();

    // Whitespace tokens carry the comments
    for token in tokens.iter().filter(|t| !matches!(t, Token::Whitespace(_))) {
        match token {
            Token::SemiColon => seen_semicolon = true,
            _ if seen_semicolon => return Err(GuardViolation::MultipleStatements),
            Token::Word(word) if word.quote_style.is_none() => words.push(word.value.to_uppercase()),
            _ => {}
        }
    }

    let first = words.first().ok_or(GuardViolation::Empty)?;
    if first != "SELECT" && first != "WITH" {
        return Err(GuardViolation::NotSelect(first.clone()));
    }

    if let Some(word) = words.iter().find(|w| FORBIDDEN_KEYWORDS.contains(&w.as_str())) {
        return Err(GuardViolation::Forbidden(word.clone()));
    }

    Ok(())
}

/// Stops at the first node that could write: any statement other than a
/// query, `SELECT ... INTO`, row locks, or a data-modifying query body.
struct ReadOnlyVisitor;

impl Visitor for ReadOnlyVisitor {
    type Break = GuardViolation;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Query(_) => ControlFlow::Continue(()),
            other => ControlFlow::Break(GuardViolation::NotSelect(leading_keyword(other))),
        }
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if !query.locks.is_empty() {
            return ControlFlow::Break(GuardViolation::Forbidden("row locking clause".to_string()));
        }
        match check_body(&query.body) {
            Ok(()) => ControlFlow::Continue(()),
            Err(violation) => ControlFlow::Break(violation),
        }
    }
}

fn check_body(body: &SetExpr) -> Result<(), GuardViolation> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => {
            Err(GuardViolation::Forbidden("SELECT INTO".to_string()))
        }
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left)?;
            check_body(right)
        }
        // Nested queries are visited on their own
        SetExpr::Select(_) | SetExpr::Query(_) | SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        _ => Err(GuardViolation::Forbidden("data-modifying query body".to_string())),
    }
}

fn leading_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}
