use anyhow::Result;
use clap::Parser;
use sqlgate::config::Settings;
use sqlgate::generator::SqlGenerator;
use sqlgate::llm::OpenAiClient;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "Guarded natural-language to T-SQL generation")]
struct Args {
    /// The question in natural language
    question: String,

    /// Result page (1-based)
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Rows per page
    #[arg(long)]
    page_size: Option<u32>,

    /// Comma-separated allowlist override (default: SQL_ALLOWLIST env var)
    #[arg(long)]
    allow: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(api_key) = args.api_key {
        settings.openai_api_key = api_key;
    }
    if let Some(allow) = args.allow {
        settings.sql_allowlist = allow;
    }
    let page_size = args.page_size.unwrap_or(settings.default_page_size);

    info!("sqlgate starting, question: {}", args.question);

    let provider = Arc::new(OpenAiClient::new(&settings));
    let generator = SqlGenerator::new(provider, &settings);

    let result = generator
        .generate_sql(&args.question, args.page, page_size, None)
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
