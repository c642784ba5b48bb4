//! Integration tests for the generate → validate → repair orchestration loop,
//! driven through a scripted completion provider.

use async_trait::async_trait;
use sqlgate::config::Settings;
use sqlgate::error::{Result, SqlGateError};
use sqlgate::generator::SqlGenerator;
use sqlgate::llm::{ChatMessage, CompletionMode, CompletionProvider};
use sqlgate::query_spec::{render_sql, OrderByClause, Pagination, StructuredQuerySpec, TableRef};
use sqlgate::validator::{validate_sql, IssueCode};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

enum Reply {
    Text(String),
    Empty,
    Timeout,
}

fn text(content: &str) -> Reply {
    Reply::Text(content.to_string())
}

struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<CompletionMode>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<CompletionMode> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, _messages: &[ChatMessage], mode: CompletionMode) -> Result<String> {
        self.calls.lock().unwrap().push(mode);
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Text(content)) => Ok(content),
            Some(Reply::Empty) => Err(SqlGateError::EmptyCompletion),
            Some(Reply::Timeout) => Err(SqlGateError::Timeout),
            None => panic!("provider called more times than scripted"),
        }
    }
}

fn test_settings() -> Settings {
    Settings {
        sql_allowlist: "Production.Product".to_string(),
        ..Settings::default()
    }
}

fn generator(provider: Arc<ScriptedProvider>) -> SqlGenerator {
    SqlGenerator::new(provider, &test_settings())
}

/// Structured response whose rendered SQL passes validation outright.
const GOOD_STRUCTURE: &str = r#"{
    "tables": [{"name": "Production.Product", "alias": "p"}],
    "columns": [{"table": "p", "name": "ProductID", "alias": null, "function": null}],
    "where_conditions": [],
    "joins": [],
    "order_by": [{"column": "p.ProductID", "direction": "ASC"}],
    "pagination": {"offset": 0, "fetch_next": 20}
}"#;

/// Structured response that renders fine but references a table outside the
/// allowlist, so validation fails and the repair loop engages.
const DISALLOWED_STRUCTURE: &str = r#"{
    "tables": [{"name": "Sales.Customer", "alias": "c"}],
    "columns": [{"table": "c", "name": "CustomerID", "alias": null, "function": null}],
    "where_conditions": [],
    "joins": [],
    "order_by": [{"column": "c.CustomerID", "direction": "ASC"}],
    "pagination": {"offset": 0, "fetch_next": 20}
}"#;

const GOOD_REPAIR_SQL: &str =
    "SELECT ProductID FROM Production.Product ORDER BY ProductID OFFSET 0 ROWS FETCH NEXT 20 ROWS ONLY";

const BAD_REPAIR_SQL: &str = "SELECT TOP 10 ProductID FROM Production.Product";

#[tokio::test]
async fn structured_success_needs_no_repair() {
    let provider = ScriptedProvider::new(vec![text(GOOD_STRUCTURE)]);
    let result = generator(provider.clone())
        .generate_sql("list product ids", 1, 20, None)
        .await;

    assert!(result.meta.validation_passed);
    assert_eq!(result.meta.repair_attempts, 0);
    assert!(result.issues.is_empty());
    assert!(result.meta.repair_history.is_empty());
    assert!(result.sql.contains("ORDER BY"));
    assert!(result.sql.ends_with(';'));
    assert!(!result.correlation_id.is_empty());
    assert_eq!(provider.calls(), vec![CompletionMode::Structured]);
}

#[tokio::test]
async fn one_failing_round_then_success() {
    let provider = ScriptedProvider::new(vec![
        text(DISALLOWED_STRUCTURE),
        text(GOOD_REPAIR_SQL),
    ]);
    let result = generator(provider.clone())
        .generate_sql("list customers", 1, 20, None)
        .await;

    assert!(result.meta.validation_passed);
    assert_eq!(result.meta.repair_attempts, 1);
    assert_eq!(result.meta.repair_history.len(), 1);
    assert!(result.meta.repair_history[0].success);
    assert!(result.issues.is_empty());
    assert!(result.sql.contains("Production.Product"));
    assert_eq!(
        provider.calls(),
        vec![CompletionMode::Structured, CompletionMode::Freeform]
    );
}

#[tokio::test]
async fn exhaustion_uses_exactly_max_repair_attempts() {
    let provider = ScriptedProvider::new(vec![
        text(DISALLOWED_STRUCTURE),
        text(BAD_REPAIR_SQL),
        text(BAD_REPAIR_SQL),
        text(BAD_REPAIR_SQL),
    ]);
    let settings = test_settings();
    let result = SqlGenerator::new(provider.clone(), &settings)
        .generate_sql("list customers", 1, 20, None)
        .await;

    assert!(!result.meta.validation_passed);
    assert_eq!(result.meta.repair_attempts, settings.max_repair_attempts);
    assert_eq!(
        result.meta.repair_history.len(),
        settings.max_repair_attempts as usize
    );
    assert!(!result.issues.is_empty());
    // Best-effort SQL is the last candidate, not the empty string.
    assert!(result.sql.contains("TOP 10"));
    assert_eq!(provider.calls().len(), 1 + settings.max_repair_attempts as usize);
}

#[tokio::test]
async fn empty_repair_response_consumes_the_attempt() {
    let provider = ScriptedProvider::new(vec![
        text(DISALLOWED_STRUCTURE),
        Reply::Empty,
        text(GOOD_REPAIR_SQL),
    ]);
    let result = generator(provider)
        .generate_sql("list customers", 1, 20, None)
        .await;

    assert!(result.meta.validation_passed);
    assert_eq!(result.meta.repair_attempts, 2);
    assert_eq!(result.meta.repair_history.len(), 2);
    assert!(!result.meta.repair_history[0].success);
    assert!(result.meta.repair_history[1].success);
}

#[tokio::test]
async fn empty_structured_response_terminates_without_repair() {
    let provider = ScriptedProvider::new(vec![Reply::Empty]);
    let result = generator(provider.clone())
        .generate_sql("list product ids", 1, 20, None)
        .await;

    assert!(!result.meta.validation_passed);
    assert_eq!(result.meta.error.as_deref(), Some("empty_response"));
    assert_eq!(result.sql, "");
    assert!(!result.issues.is_empty());
    assert_eq!(result.meta.repair_attempts, 0);
    // No repair round is spent on a response that could not be parsed.
    assert_eq!(provider.calls(), vec![CompletionMode::Structured]);
}

#[tokio::test]
async fn unparseable_structured_output_terminates_without_repair() {
    let provider = ScriptedProvider::new(vec![text("this is not json")]);
    let result = generator(provider.clone())
        .generate_sql("list product ids", 1, 20, None)
        .await;

    assert!(!result.meta.validation_passed);
    assert_eq!(result.meta.error.as_deref(), Some("parse_error"));
    assert_eq!(result.sql, "");
    let raw = result.meta.raw_response.expect("raw response retained");
    assert!(raw.contains("this is not json"));
    assert_eq!(provider.calls(), vec![CompletionMode::Structured]);
}

#[tokio::test]
async fn render_failure_is_reported_as_parse_error() {
    // Parses as a spec but has no order_by, so rendering refuses it.
    let provider = ScriptedProvider::new(vec![text(
        r#"{
            "tables": [{"name": "Production.Product"}],
            "columns": [{"name": "ProductID"}],
            "where_conditions": [],
            "joins": [],
            "order_by": [],
            "pagination": {"offset": 0, "fetch_next": 20}
        }"#,
    )]);
    let result = generator(provider)
        .generate_sql("list product ids", 1, 20, None)
        .await;

    assert!(!result.meta.validation_passed);
    assert_eq!(result.meta.error.as_deref(), Some("parse_error"));
}

#[tokio::test]
async fn timeout_terminates_with_dedicated_result() {
    let provider = ScriptedProvider::new(vec![Reply::Timeout]);
    let result = generator(provider)
        .generate_sql("list product ids", 1, 20, None)
        .await;

    assert!(!result.meta.validation_passed);
    assert_eq!(result.meta.error.as_deref(), Some("timeout"));
    assert!(!result.correlation_id.is_empty());
}

#[tokio::test]
async fn mid_repair_timeout_keeps_best_effort_sql_and_history() {
    let provider = ScriptedProvider::new(vec![text(DISALLOWED_STRUCTURE), Reply::Timeout]);
    let result = generator(provider)
        .generate_sql("list customers", 1, 20, None)
        .await;

    assert!(!result.meta.validation_passed);
    assert_eq!(result.meta.error.as_deref(), Some("timeout"));
    assert!(result.sql.contains("Sales.Customer"));
    assert!(result
        .issues
        .iter()
        .any(|issue| issue.contains("allowlist")));
}

#[tokio::test]
async fn structured_code_fences_are_tolerated() {
    let provider =
        ScriptedProvider::new(vec![Reply::Text(format!("```json\n{}\n```", GOOD_STRUCTURE))]);
    let result = generator(provider)
        .generate_sql("list product ids", 1, 20, None)
        .await;

    assert!(result.meta.validation_passed, "issues: {:?}", result.issues);
}

#[test]
fn rendered_pagination_always_satisfies_determinism_check() {
    let spec = StructuredQuerySpec {
        tables: vec![TableRef {
            name: "Production.Product".to_string(),
            alias: None,
        }],
        columns: vec![sqlgate::query_spec::ColumnRef {
            table: None,
            name: "ProductID".to_string(),
            alias: None,
            function: None,
        }],
        where_conditions: vec![],
        joins: vec![],
        order_by: vec![OrderByClause {
            column: "ProductID".to_string(),
            direction: "ASC".to_string(),
        }],
        pagination: Some(Pagination {
            offset: 40,
            fetch_next: 20,
        }),
    };
    let sql = render_sql(&spec).unwrap();

    let allowlist: HashSet<String> = ["Production.Product".to_string()].into_iter().collect();
    let result = validate_sql(&sql, &allowlist);
    assert!(result.ok, "issues: {:?}", result.issues);
    assert!(!result
        .issues
        .iter()
        .any(|issue| issue.code == IssueCode::NoOrderBy));
}
