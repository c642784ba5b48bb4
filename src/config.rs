//! Application settings, loaded once from the environment at startup.
//!
//! Call `dotenv::dotenv().ok()` before `Settings::from_env()` so a local
//! `.env` file is honored. The resulting struct is read-only for the
//! lifetime of the process.

use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_ALLOWLIST: &str =
    "Sales.SalesOrderHeader,Sales.SalesOrderDetail,Production.Product,Person.Person";

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub openai_temperature: f32,
    pub openai_max_tokens: u32,
    pub openai_request_timeout: Duration,
    pub openai_max_retries: u32,

    /// Maximum number of repair rounds per generation request.
    pub max_repair_attempts: u32,

    /// Comma-separated schema-qualified table/view names the generator may use.
    pub sql_allowlist: String,
    pub default_page_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_model: "gpt-4".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_temperature: 0.1,
            openai_max_tokens: 800,
            openai_request_timeout: Duration::from_secs(30),
            openai_max_retries: 2,
            max_repair_attempts: 3,
            sql_allowlist: DEFAULT_ALLOWLIST.to_string(),
            default_page_size: 20,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_temperature: env_parsed("OPENAI_TEMPERATURE", defaults.openai_temperature),
            openai_max_tokens: env_parsed("OPENAI_MAX_TOKENS", defaults.openai_max_tokens),
            openai_request_timeout: Duration::from_secs(env_parsed(
                "OPENAI_REQUEST_TIMEOUT",
                defaults.openai_request_timeout.as_secs(),
            )),
            openai_max_retries: env_parsed("OPENAI_MAX_RETRIES", defaults.openai_max_retries),
            max_repair_attempts: env_parsed(
                "SQL_MAX_REPAIR_ATTEMPTS",
                defaults.max_repair_attempts,
            ),
            sql_allowlist: std::env::var("SQL_ALLOWLIST").unwrap_or(defaults.sql_allowlist),
            default_page_size: env_parsed("SQL_PAGE_SIZE", defaults.default_page_size),
        }
    }

    /// Parse the comma-separated allowlist into a set, dropping blanks.
    pub fn allowlist_set(&self) -> HashSet<String> {
        self.sql_allowlist
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
