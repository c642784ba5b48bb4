//! SQL policy validator.
//!
//! `validate_sql` is the gate between the language model and anything that
//! would execute SQL: a pure function that parses a candidate statement and
//! runs an ordered battery of independent checks, aggregating every defect
//! into one `ValidationResult`. It never performs I/O and never panics on
//! malformed input; parse failures are issues, not exceptions.
//!
//! Identifier and CTE extraction is regex-based. That is a heuristic over
//! the permitted statement subset (single read-only SELECTs), not a full
//! T-SQL grammar; a stricter implementation could walk the `sqlparser` AST
//! without changing this module's contract.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashSet};

/// Stable issue identifiers. Callers branch on these, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCode {
    #[serde(rename = "E_EMPTY_QUERY")]
    EmptyQuery,
    #[serde(rename = "E_MULTI_STMT")]
    MultiStatement,
    #[serde(rename = "E_NOT_SELECT")]
    NotSelect,
    #[serde(rename = "E_PARSE_ERROR")]
    ParseError,
    #[serde(rename = "E_NOT_ALLOWLIST")]
    NotAllowlist,
    #[serde(rename = "E_SYSTEM_OBJECT")]
    SystemObject,
    #[serde(rename = "E_CROSS_DB")]
    CrossDatabase,
    #[serde(rename = "E_NO_ORDER_BY")]
    NoOrderBy,
    #[serde(rename = "E_TEMP_TABLE")]
    TempTable,
    #[serde(rename = "E_DYNAMIC_SQL")]
    DynamicSql,
    #[serde(rename = "W_CROSS_JOIN")]
    CrossJoinWarning,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::EmptyQuery => "E_EMPTY_QUERY",
            IssueCode::MultiStatement => "E_MULTI_STMT",
            IssueCode::NotSelect => "E_NOT_SELECT",
            IssueCode::ParseError => "E_PARSE_ERROR",
            IssueCode::NotAllowlist => "E_NOT_ALLOWLIST",
            IssueCode::SystemObject => "E_SYSTEM_OBJECT",
            IssueCode::CrossDatabase => "E_CROSS_DB",
            IssueCode::NoOrderBy => "E_NO_ORDER_BY",
            IssueCode::TempTable => "E_TEMP_TABLE",
            IssueCode::DynamicSql => "E_DYNAMIC_SQL",
            IssueCode::CrossJoinWarning => "W_CROSS_JOIN",
        }
    }

    /// Fatal codes flip `ok`; warnings are reported but do not block.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IssueCode::CrossJoinWarning)
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    /// True iff no fatal-code issue is present.
    pub ok: bool,
    pub issues: Vec<ValidationIssue>,
    /// Every table/view reference resolved out of the statement, original
    /// case preserved. Populated even when validation fails, for auditing.
    pub objects: BTreeSet<String>,
}

lazy_static! {
    static ref LINE_COMMENT_RE: Regex = Regex::new(r"--[^\r\n]*").unwrap();
    static ref BLOCK_COMMENT_RE: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref BANNED_OPERATION_RE: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|ALTER|DROP|CREATE|MERGE|TRUNCATE|EXEC|EXECUTE|BULK|BACKUP|RESTORE|GRANT|REVOKE|DENY|DBCC|SHUTDOWN|KILL|CHECKPOINT|RECONFIGURE)\b"
    )
    .unwrap();
    static ref TABLE_REF_RE: Regex = Regex::new(
        r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)"
    )
    .unwrap();
    static ref CTE_HEAD_RE: Regex =
        Regex::new(r"(?i)\bWITH\s+([A-Za-z_][A-Za-z0-9_]*)\s+AS\s*\(").unwrap();
    static ref CTE_TAIL_RE: Regex =
        Regex::new(r"(?i),\s*([A-Za-z_][A-Za-z0-9_]*)\s+AS\s*\(").unwrap();
    static ref MISSING_COLUMN_LIST_RE: Regex =
        Regex::new(r"(?i)^SELECT\s+(?:FROM|WHERE|ORDER|GROUP|HAVING)\b").unwrap();
    static ref MISSING_TABLE_NAME_RE: Regex =
        Regex::new(r"(?i)\bFROM\s+(?:WHERE|ORDER|GROUP|HAVING)\b|(?i)\bFROM\s*$").unwrap();
    // Covers both `TOP 10` and `TOP (10)`.
    static ref TOP_CLAUSE_RE: Regex = Regex::new(r"(?i)\bTOP\s*\(?\s*\d+").unwrap();
    static ref TEMP_TABLE_RE: Regex = Regex::new(r"#\w+").unwrap();
    static ref DYNAMIC_SQL_RE: Regex = Regex::new(r"(?i)\bEXEC\s*\(").unwrap();
    static ref CROSS_JOIN_RE: Regex = Regex::new(r"(?i)\bCROSS\s+JOIN\b").unwrap();
}

/// Object prefixes that always denote system catalogs, blocked regardless of
/// allowlist membership.
const SYSTEM_OBJECT_PREFIXES: [&str; 6] = [
    "sys.",
    "information_schema.",
    "master.",
    "msdb.",
    "model.",
    "tempdb.",
];

/// Keywords the table-reference regex can capture by accident when a clause
/// is malformed; never real object names.
const NON_TABLE_KEYWORDS: [&str; 7] = ["SELECT", "WHERE", "ORDER", "GROUP", "HAVING", "AS", "ON"];

/// Validate a candidate T-SQL statement against the safety policy.
///
/// Every check runs even after an earlier one fails so the result aggregates
/// all defects in one pass, with two exceptions: an empty input short-circuits
/// (nothing downstream is meaningful), and object/allowlist checks are skipped
/// when the statement does not parse.
pub fn validate_sql(sql: &str, allowlist: &HashSet<String>) -> ValidationResult {
    let mut issues = Vec::new();
    let mut objects = BTreeSet::new();

    if sql.trim().is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::EmptyQuery,
            "SQL query cannot be empty",
        ));
        return ValidationResult {
            ok: false,
            issues,
            objects,
        };
    }

    // Comments are stripped before any keyword scanning so `/* */ DROP ...`
    // cannot slip past the denylist.
    let normalized = normalize_sql(sql);

    if has_multiple_statements(&normalized) {
        issues.push(ValidationIssue::new(
            IssueCode::MultiStatement,
            "Multiple statements not allowed. Only single SELECT statements are permitted.",
        ));
    }

    // Must fire on malformed SQL too, so it runs before (and independent of)
    // the parse stage.
    let banned = banned_operations(&normalized);
    if !banned.is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::NotSelect,
            format!(
                "Operation not allowed: {}. Only SELECT statements are permitted.",
                banned.into_iter().collect::<Vec<_>>().join(", ")
            ),
        ));
    }

    match Parser::parse_sql(&MsSqlDialect {}, &normalized) {
        Err(e) => {
            issues.push(ValidationIssue::new(
                IssueCode::ParseError,
                format!("SQL parsing failed: {}", e),
            ));
        }
        Ok(statements) if statements.is_empty() => {
            issues.push(ValidationIssue::new(
                IssueCode::ParseError,
                "Unable to parse SQL query",
            ));
        }
        Ok(_) => {
            if !starts_with_select(&normalized) {
                issues.push(ValidationIssue::new(
                    IssueCode::NotSelect,
                    "Query must start with SELECT statement (WITH CTEs are allowed)",
                ));
            }

            issues.extend(malformed_select_issues(&normalized));

            objects = extract_table_references(&normalized);

            let allowlist_violations = allowlist_violations(&objects, allowlist);
            if !allowlist_violations.is_empty() {
                issues.push(ValidationIssue::new(
                    IssueCode::NotAllowlist,
                    format!(
                        "Referenced objects not in allowlist: {}",
                        allowlist_violations.join(", ")
                    ),
                ));
            }

            let system_violations: Vec<&String> = objects
                .iter()
                .filter(|obj| {
                    let lower = obj.to_lowercase();
                    SYSTEM_OBJECT_PREFIXES
                        .iter()
                        .any(|prefix| lower.starts_with(prefix))
                })
                .collect();
            if !system_violations.is_empty() {
                issues.push(ValidationIssue::new(
                    IssueCode::SystemObject,
                    format!(
                        "System objects not allowed: {}",
                        system_violations
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ));
            }

            // Three-part `database.schema.table` names reach across databases.
            let cross_db_violations: Vec<&String> = objects
                .iter()
                .filter(|obj| obj.matches('.').count() >= 2)
                .collect();
            if !cross_db_violations.is_empty() {
                issues.push(ValidationIssue::new(
                    IssueCode::CrossDatabase,
                    format!(
                        "Cross-database references not allowed: {}",
                        cross_db_violations
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ));
            }
        }
    }

    issues.extend(determinism_issues(&normalized));
    issues.extend(dangerous_pattern_issues(&normalized));

    let ok = !issues.iter().any(|issue| issue.code.is_fatal());
    ValidationResult {
        ok,
        issues,
        objects,
    }
}

/// Strip comments and collapse whitespace. Naive about comment markers inside
/// string literals, which is acceptable for a gate that only over-rejects.
fn normalize_sql(sql: &str) -> String {
    let without_line = LINE_COMMENT_RE.replace_all(sql, "");
    let without_block = BLOCK_COMMENT_RE.replace_all(&without_line, "");
    without_block.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_multiple_statements(sql: &str) -> bool {
    sql.split(';').filter(|s| !s.trim().is_empty()).count() > 1
}

fn banned_operations(sql: &str) -> BTreeSet<String> {
    BANNED_OPERATION_RE
        .find_iter(sql)
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

fn starts_with_select(sql: &str) -> bool {
    match sql.split_whitespace().next() {
        Some(first) => {
            let first = first.to_uppercase();
            first == "SELECT" || first == "WITH"
        }
        None => false,
    }
}

fn malformed_select_issues(sql: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let upper = sql.to_uppercase();
    if !upper.starts_with("SELECT") {
        return issues;
    }

    if MISSING_COLUMN_LIST_RE.is_match(sql) {
        issues.push(ValidationIssue::new(
            IssueCode::ParseError,
            "Malformed SELECT statement: missing column list",
        ));
    } else if upper.contains("FROM") && MISSING_TABLE_NAME_RE.is_match(sql) {
        issues.push(ValidationIssue::new(
            IssueCode::ParseError,
            "Malformed SELECT statement: missing table name after FROM",
        ));
    }

    issues
}

/// Collect every identifier following FROM/JOIN (all join variants reduce to
/// the JOIN keyword), excluding CTE names, which are synthetic.
fn extract_table_references(sql: &str) -> BTreeSet<String> {
    let cte_names: HashSet<String> = CTE_HEAD_RE
        .captures_iter(sql)
        .chain(CTE_TAIL_RE.captures_iter(sql))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
        .collect();

    TABLE_REF_RE
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| {
            let upper = name.to_uppercase();
            !NON_TABLE_KEYWORDS.contains(&upper.as_str()) && !cte_names.contains(&upper)
        })
        .collect()
}

/// Case-insensitive allowlist membership. An unqualified name is also
/// accepted when `dbo.<name>` is allowlisted; whether `dbo` is the right
/// default schema for every deployment is an open question, but this matches
/// the long-standing behavior downstream callers rely on.
fn allowlist_violations(objects: &BTreeSet<String>, allowlist: &HashSet<String>) -> Vec<String> {
    let allowlist_upper: HashSet<String> = allowlist.iter().map(|s| s.to_uppercase()).collect();

    objects
        .iter()
        .filter(|obj| {
            let upper = obj.to_uppercase();
            if allowlist_upper.contains(&upper) {
                return false;
            }
            if !upper.contains('.') && allowlist_upper.contains(&format!("DBO.{}", upper)) {
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Windowed result sets are unsafe without an explicit ordering: row order
/// is otherwise engine-defined and non-reproducible.
fn determinism_issues(sql: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let upper = sql.to_uppercase();
    let has_order_by = upper.contains("ORDER BY");

    if TOP_CLAUSE_RE.is_match(sql) && !has_order_by {
        issues.push(ValidationIssue::new(
            IssueCode::NoOrderBy,
            "TOP clause requires ORDER BY for deterministic results",
        ));
    }

    if upper.contains("OFFSET") && upper.contains("FETCH") && !has_order_by {
        issues.push(ValidationIssue::new(
            IssueCode::NoOrderBy,
            "OFFSET/FETCH requires ORDER BY for deterministic results",
        ));
    }

    issues
}

fn dangerous_pattern_issues(sql: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let upper = sql.to_uppercase();

    if TEMP_TABLE_RE.is_match(sql) {
        issues.push(ValidationIssue::new(
            IssueCode::TempTable,
            "Temporary tables are not allowed",
        ));
    }

    if DYNAMIC_SQL_RE.is_match(sql) {
        issues.push(ValidationIssue::new(
            IssueCode::DynamicSql,
            "Dynamic SQL execution is not allowed",
        ));
    }

    if CROSS_JOIN_RE.is_match(sql) && !upper.contains("WHERE") {
        issues.push(ValidationIssue::new(
            IssueCode::CrossJoinWarning,
            "CROSS JOIN without WHERE clause may be expensive",
        ));
    }

    issues
}
