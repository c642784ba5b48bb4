//! Generation orchestrator.
//!
//! One `SqlGenerator` run per request: ask the model for a structured query
//! spec, render it to T-SQL, validate, and on failure run bounded free-text
//! repair rounds. Every terminal path yields a well-formed `SqlGenResult`
//! carrying a correlation id and timestamp; nothing here raises to the
//! caller. Downstream executors must only consume `sql` when
//! `meta.validation_passed` is true.

use crate::config::Settings;
use crate::error::{Result, SqlGateError};
use crate::llm::{ChatMessage, CompletionMode, CompletionProvider};
use crate::prompts;
use crate::query_spec::{render_sql, StructuredQuerySpec};
use crate::schema_context::SchemaContext;
use crate::validator::{validate_sql, ValidationIssue, ValidationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One repair round. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct RepairAttempt {
    pub attempt_number: u32,
    pub original_error: String,
    pub repair_prompt: String,
    pub generated_sql: String,
    pub success: bool,
}

/// Compact per-round record surfaced in result metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RepairSummary {
    pub attempt: u32,
    pub success: bool,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationMeta {
    pub model: String,
    pub repair_attempts: u32,
    pub generation_time_seconds: f64,
    pub validation_passed: bool,
    pub structured_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repair_history: Vec<RepairSummary>,
}

/// Terminal artifact of one generation run. `issues` is empty exactly when
/// the returned SQL passed validation.
#[derive(Debug, Clone, Serialize)]
pub struct SqlGenResult {
    pub sql: String,
    pub issues: Vec<String>,
    pub meta: GenerationMeta,
    pub correlation_id: String,
    pub generated_at: DateTime<Utc>,
}

pub struct SqlGenerator {
    provider: Arc<dyn CompletionProvider>,
    schema: SchemaContext,
    allowed_tables: Vec<String>,
    model: String,
    max_repair_attempts: u32,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: &Settings) -> Self {
        Self::with_schema_context(provider, settings, SchemaContext::default())
    }

    pub fn with_schema_context(
        provider: Arc<dyn CompletionProvider>,
        settings: &Settings,
        schema: SchemaContext,
    ) -> Self {
        let mut allowed_tables: Vec<String> = settings.allowlist_set().into_iter().collect();
        allowed_tables.sort();
        Self {
            provider,
            schema,
            allowed_tables,
            model: settings.openai_model.clone(),
            max_repair_attempts: settings.max_repair_attempts,
        }
    }

    /// Generate a validated T-SQL statement for a natural-language question.
    ///
    /// `allowed_tables` overrides the configured allowlist for this run;
    /// `page`/`page_size` translate to `OFFSET (page-1)*page_size ROWS
    /// FETCH NEXT page_size ROWS ONLY`.
    pub async fn generate_sql(
        &self,
        question: &str,
        page: u32,
        page_size: u32,
        allowed_tables: Option<&[String]>,
    ) -> SqlGenResult {
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let allowed: Vec<String> = match allowed_tables {
            Some(tables) => tables.to_vec(),
            None => self.allowed_tables.clone(),
        };
        let offset = page.saturating_sub(1) * page_size;

        info!(
            "Starting SQL generation for question: '{}' [correlation_id={}]",
            truncate(question, 100),
            correlation_id
        );

        let structured_system =
            prompts::build_structured_system_prompt(&self.schema, &allowed, offset, page_size);
        let user_prompt = prompts::build_user_prompt(question, page, page_size, offset);

        let response = match self
            .provider
            .complete(
                &[
                    ChatMessage::system(structured_system),
                    ChatMessage::user(user_prompt.as_str()),
                ],
                CompletionMode::Structured,
            )
            .await
        {
            Ok(content) => content,
            Err(err) => {
                error!(
                    "Structured generation call failed: {} [correlation_id={}]",
                    err, correlation_id
                );
                return self.error_result(
                    err,
                    None,
                    String::new(),
                    Vec::new(),
                    Vec::new(),
                    correlation_id,
                    started,
                );
            }
        };

        let generated_sql = match self.render_structured(&response) {
            Ok(sql) => sql,
            Err(err) => {
                error!(
                    "Failed to build SQL from structured output: {} [correlation_id={}]",
                    err, correlation_id
                );
                return self.error_result(
                    err,
                    Some(truncate(&response, 500)),
                    String::new(),
                    Vec::new(),
                    Vec::new(),
                    correlation_id,
                    started,
                );
            }
        };

        info!(
            "Generated SQL from structured output [correlation_id={}]: {}",
            correlation_id,
            truncate(&generated_sql, 200)
        );

        let allowset: HashSet<String> = allowed.iter().cloned().collect();
        let mut validation = validate_sql(&generated_sql, &allowset);

        if validation.ok {
            info!("SQL validation passed [correlation_id={}]", correlation_id);
            log_warnings(&validation, &correlation_id);
            return self.success_result(generated_sql, Vec::new(), correlation_id, started);
        }

        warn!(
            "SQL validation failed [correlation_id={}]: {}",
            correlation_id,
            format_issues(&validation.issues)
        );
        let mut issues = issue_messages(&validation.issues);

        let freeform_system = prompts::build_system_prompt(&self.schema, &allowed);
        let mut current_sql = generated_sql;
        let mut history: Vec<RepairAttempt> = Vec::new();

        for attempt in 1..=self.max_repair_attempts {
            info!(
                "Attempting SQL repair #{} [correlation_id={}]",
                attempt, correlation_id
            );

            let raw_error = format_issues(&validation.issues);
            let repair_prompt = prompts::build_repair_prompt(
                &current_sql,
                &raw_error,
                &issue_messages(&validation.issues),
            );

            let repaired = match self
                .provider
                .complete(
                    &[
                        ChatMessage::system(freeform_system.as_str()),
                        ChatMessage::user(repair_prompt.as_str()),
                    ],
                    CompletionMode::Freeform,
                )
                .await
            {
                Ok(content) => content,
                Err(SqlGateError::EmptyCompletion) => {
                    // An empty repair response consumes the attempt but the
                    // loop keeps going with the previous candidate.
                    warn!(
                        "SQL repair #{} returned empty response [correlation_id={}]",
                        attempt, correlation_id
                    );
                    history.push(RepairAttempt {
                        attempt_number: attempt,
                        original_error: raw_error,
                        repair_prompt,
                        generated_sql: String::new(),
                        success: false,
                    });
                    continue;
                }
                Err(err) => {
                    error!(
                        "SQL repair #{} call failed: {} [correlation_id={}]",
                        attempt, err, correlation_id
                    );
                    return self.error_result(
                        err,
                        None,
                        current_sql,
                        issues,
                        history,
                        correlation_id,
                        started,
                    );
                }
            };

            let repaired_sql = ensure_single_statement(&repaired);
            let repair_validation = validate_sql(&repaired_sql, &allowset);

            history.push(RepairAttempt {
                attempt_number: attempt,
                original_error: raw_error,
                repair_prompt,
                generated_sql: repaired_sql.clone(),
                success: repair_validation.ok,
            });

            if repair_validation.ok {
                info!(
                    "SQL repair #{} succeeded [correlation_id={}]",
                    attempt, correlation_id
                );
                log_warnings(&repair_validation, &correlation_id);
                return self.success_result(repaired_sql, history, correlation_id, started);
            }

            warn!(
                "SQL repair #{} failed [correlation_id={}]: {}",
                attempt,
                correlation_id,
                format_issues(&repair_validation.issues)
            );
            issues.extend(issue_messages(&repair_validation.issues));
            current_sql = repaired_sql;
            validation = repair_validation;
        }

        error!(
            "All repair attempts failed [correlation_id={}]",
            correlation_id
        );
        // Rounds often re-report the same defect; the caller gets the union.
        let mut seen = HashSet::new();
        issues.retain(|message| seen.insert(message.clone()));
        SqlGenResult {
            sql: current_sql,
            issues,
            meta: GenerationMeta {
                model: self.model.clone(),
                repair_attempts: self.max_repair_attempts,
                generation_time_seconds: started.elapsed().as_secs_f64(),
                validation_passed: false,
                structured_output: true,
                error: None,
                raw_response: None,
                repair_history: summarize(&history),
            },
            correlation_id,
            generated_at: Utc::now(),
        }
    }

    /// Clean the structured response, parse it into a spec, render, and
    /// normalize down to one `;`-terminated statement.
    fn render_structured(&self, response: &str) -> Result<String> {
        let cleaned = strip_code_fences(response);
        let spec: StructuredQuerySpec = serde_json::from_str(cleaned).map_err(|e| {
            SqlGateError::StructuredOutput(format!("failed to parse structured output: {}", e))
        })?;
        let sql = render_sql(&spec)?;
        Ok(ensure_single_statement(&sql))
    }

    fn success_result(
        &self,
        sql: String,
        history: Vec<RepairAttempt>,
        correlation_id: String,
        started: Instant,
    ) -> SqlGenResult {
        SqlGenResult {
            sql,
            issues: Vec::new(),
            meta: GenerationMeta {
                model: self.model.clone(),
                repair_attempts: history.len() as u32,
                generation_time_seconds: started.elapsed().as_secs_f64(),
                validation_passed: true,
                structured_output: true,
                error: None,
                raw_response: None,
                repair_history: summarize(&history),
            },
            correlation_id,
            generated_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn error_result(
        &self,
        err: SqlGateError,
        raw_response: Option<String>,
        sql: String,
        mut issues: Vec<String>,
        history: Vec<RepairAttempt>,
        correlation_id: String,
        started: Instant,
    ) -> SqlGenResult {
        issues.push(err.to_string());
        SqlGenResult {
            sql,
            issues,
            meta: GenerationMeta {
                model: self.model.clone(),
                repair_attempts: history.len() as u32,
                generation_time_seconds: started.elapsed().as_secs_f64(),
                validation_passed: false,
                structured_output: true,
                error: Some(error_kind(&err).to_string()),
                raw_response,
                repair_history: summarize(&history),
            },
            correlation_id,
            generated_at: Utc::now(),
        }
    }
}

fn error_kind(err: &SqlGateError) -> &'static str {
    match err {
        SqlGateError::Timeout => "timeout",
        SqlGateError::EmptyCompletion => "empty_response",
        SqlGateError::StructuredOutput(_) | SqlGateError::Render(_) => "parse_error",
        _ => "llm_error",
    }
}

fn issue_messages(issues: &[ValidationIssue]) -> Vec<String> {
    issues.iter().map(|i| i.message.clone()).collect()
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("[{}] {}", i.code, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn log_warnings(validation: &ValidationResult, correlation_id: &str) {
    for issue in validation.issues.iter().filter(|i| !i.code.is_fatal()) {
        warn!(
            "Validation warning [{}]: {} [correlation_id={}]",
            issue.code, issue.message, correlation_id
        );
    }
}

fn summarize(history: &[RepairAttempt]) -> Vec<RepairSummary> {
    history
        .iter()
        .map(|attempt| RepairSummary {
            attempt: attempt.attempt_number,
            success: attempt.success,
            sql: truncate(&attempt.generated_sql, 200),
        })
        .collect()
}

fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    for prefix in ["```json", "```sql", "```"] {
        if let Some(stripped) = cleaned.strip_prefix(prefix) {
            cleaned = stripped;
            break;
        }
    }
    if let Some(stripped) = cleaned.strip_suffix("```") {
        cleaned = stripped;
    }
    cleaned.trim()
}

/// Keep only the first `;`-delimited statement and re-terminate it.
fn ensure_single_statement(sql: &str) -> String {
    let cleaned = strip_code_fences(sql);
    let first = cleaned.split(';').next().unwrap_or("").trim();
    format!("{};", first)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max_chars).collect();
        format!("{}...", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_single_statement_strips_fences_and_extra_statements() {
        let cleaned = ensure_single_statement(
            "```sql\nSELECT 1 FROM T ORDER BY x; DROP TABLE T;\n```",
        );
        assert_eq!(cleaned, "SELECT 1 FROM T ORDER BY x;");
    }

    #[test]
    fn ensure_single_statement_appends_terminator() {
        assert_eq!(
            ensure_single_statement("SELECT 1 FROM T ORDER BY x"),
            "SELECT 1 FROM T ORDER BY x;"
        );
    }

    #[test]
    fn strip_code_fences_handles_json_blocks() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn error_kind_mapping() {
        assert_eq!(error_kind(&SqlGateError::Timeout), "timeout");
        assert_eq!(error_kind(&SqlGateError::EmptyCompletion), "empty_response");
        assert_eq!(
            error_kind(&SqlGateError::StructuredOutput("x".into())),
            "parse_error"
        );
        assert_eq!(
            error_kind(&SqlGateError::Transport("x".into())),
            "llm_error"
        );
    }
}
