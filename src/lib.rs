//! sqlgate: guarded natural-language to T-SQL generation.
//!
//! A language model proposes queries; the validation gate decides what may
//! reach a database. The pipeline is: structured generation → deterministic
//! rendering → policy validation → bounded repair. Only SQL that passes the
//! validator is ever marked safe for execution.

pub mod config;
pub mod error;
pub mod generator;
pub mod llm;
pub mod prompts;
pub mod query_spec;
pub mod schema_context;
pub mod validator;

pub use config::Settings;
pub use error::{Result, SqlGateError};
pub use generator::{SqlGenResult, SqlGenerator};
pub use llm::{ChatMessage, CompletionMode, CompletionProvider, OpenAiClient};
pub use query_spec::{render_sql, StructuredQuerySpec};
pub use schema_context::SchemaContext;
pub use validator::{validate_sql, IssueCode, ValidationIssue, ValidationResult};
