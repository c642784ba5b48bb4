//! Prompt construction for the generation and repair rounds.

use crate::schema_context::SchemaContext;

/// System prompt for the freeform (repair) rounds.
pub fn build_system_prompt(ctx: &SchemaContext, allowed_tables: &[String]) -> String {
    format!(
        r#"You are a T-SQL expert working with Microsoft SQL Server 2022 and the AdventureWorks database.

SCHEMA CONTEXT:
{schema}

CRITICAL REQUIREMENTS:
- Use T-SQL dialect ONLY (Microsoft SQL Server 2022)
- For pagination, ALWAYS use: ORDER BY ... OFFSET {{offset}} ROWS FETCH NEXT {{page_size}} ROWS ONLY
- ALWAYS include ORDER BY with a unique tiebreaker (like primary key) for deterministic results
- Use only these allowed tables: {allowed}
- NO comments in output SQL
- NO multi-statements (semicolons except final terminator)
- NO dynamic SQL construction
- Prefer INNER JOINs over WHERE clause joins
- Use proper table aliases for clarity

PAGINATION RULES:
- If user asks for "top N" or "first N", use ORDER BY + OFFSET 0 ROWS FETCH NEXT N ROWS ONLY
- If user asks for page-based results, calculate OFFSET = (page - 1) * page_size
- ORDER BY clause is MANDATORY for OFFSET/FETCH
- Include unique column (usually primary key) in ORDER BY to ensure deterministic results

Generate ONLY the T-SQL query, no explanations or comments."#,
        schema = ctx.prompt_block(allowed_tables),
        allowed = allowed_tables.join(", "),
    )
}

/// System prompt for the structured round: same schema context, but the model
/// is asked for a JSON object matching the structured query schema instead of
/// SQL text.
pub fn build_structured_system_prompt(
    ctx: &SchemaContext,
    allowed_tables: &[String],
    offset: u32,
    page_size: u32,
) -> String {
    let schema_json = serde_json::to_string_pretty(&ctx.structured_output_schema())
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"You are a T-SQL expert working with Microsoft SQL Server 2022 and the AdventureWorks database.

SCHEMA CONTEXT:
{schema}

REQUIREMENTS:
- Use T-SQL dialect ONLY (Microsoft SQL Server 2022)
- Use only these allowed tables: {allowed}
- For pagination, ALWAYS use OFFSET/FETCH NEXT pattern
- ALWAYS include ORDER BY with unique tiebreaker for deterministic results
- Prefer INNER JOINs over WHERE clause joins

Analyze the user's natural language query and return a structured representation that can be used to build valid T-SQL.

Return your analysis as a JSON object with this exact structure:
{schema_json}

Example response format:
{{
  "tables": [{{"name": "Production.Product", "alias": "p"}}],
  "columns": [{{"table": "p", "name": "ProductID", "alias": null, "function": null}}],
  "where_conditions": [],
  "joins": [],
  "order_by": [{{"column": "p.ProductID", "direction": "ASC"}}],
  "pagination": {{"offset": {offset}, "fetch_next": {page_size}}}
}}"#,
        schema = ctx.prompt_block(allowed_tables),
        allowed = allowed_tables.join(", "),
        schema_json = schema_json,
        offset = offset,
        page_size = page_size,
    )
}

pub fn build_user_prompt(question: &str, page: u32, page_size: u32, offset: u32) -> String {
    format!(
        r#"USER QUESTION: {question}

PAGINATION CONTEXT:
- Return page {page} with {page_size} results per page
- Use OFFSET {offset} ROWS FETCH NEXT {page_size} ROWS ONLY
- Include ORDER BY with unique tiebreaker for deterministic results

Generate the T-SQL query:"#,
        question = question,
        page = page,
        page_size = page_size,
        offset = offset,
    )
}

/// Map each validation issue to a corrective instruction and embed them with
/// the failing SQL into a repair prompt.
pub fn build_repair_prompt(
    previous_sql: &str,
    error_message: &str,
    issue_messages: &[String],
) -> String {
    let mut constraints = Vec::new();

    for issue in issue_messages {
        let lower = issue.to_lowercase();
        if issue.contains("ORDER BY") {
            constraints
                .push("Add ORDER BY clause with unique tiebreaker (primary key)".to_string());
        } else if lower.contains("allowlist") || lower.contains("not allowed") {
            constraints.push("Use only allowed tables from the schema context".to_string());
        } else if lower.contains("column") {
            constraints.push("Use only existing columns from the schema context".to_string());
        }
    }
    constraints.dedup();

    let constraints_text = if constraints.is_empty() {
        "Fix the SQL syntax error".to_string()
    } else {
        constraints.join("\n- ")
    };

    format!(
        r#"The previous query had errors. Fix these issues:

ORIGINAL QUERY:
{previous_sql}

ERROR MESSAGE:
{error_message}

VALIDATION ISSUES:
{issues:?}

REPAIR CONSTRAINTS:
- {constraints}

Generate the corrected T-SQL query following all the original requirements."#,
        previous_sql = previous_sql,
        error_message = error_message,
        issues = issue_messages,
        constraints = constraints_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_prompt_maps_order_by_issue() {
        let prompt = build_repair_prompt(
            "SELECT TOP 10 * FROM Production.Product",
            "[E_NO_ORDER_BY] TOP clause requires ORDER BY for deterministic results",
            &["TOP clause requires ORDER BY for deterministic results".to_string()],
        );
        assert!(prompt.contains("unique tiebreaker"));
        assert!(prompt.contains("SELECT TOP 10 * FROM Production.Product"));
    }

    #[test]
    fn repair_prompt_maps_allowlist_issue() {
        let prompt = build_repair_prompt(
            "SELECT * FROM dbo.Nope ORDER BY id",
            "[E_NOT_ALLOWLIST] Referenced objects not in allowlist: dbo.Nope",
            &["Referenced objects not in allowlist: dbo.Nope".to_string()],
        );
        assert!(prompt.contains("Use only allowed tables"));
    }

    #[test]
    fn repair_prompt_without_known_patterns_falls_back() {
        let prompt = build_repair_prompt("SELEC 1", "[E_PARSE_ERROR] ...", &[]);
        assert!(prompt.contains("Fix the SQL syntax error"));
    }

    #[test]
    fn structured_prompt_embeds_schema_and_pagination() {
        let ctx = SchemaContext::adventure_works();
        let allowed = vec!["Production.Product".to_string()];
        let prompt = build_structured_system_prompt(&ctx, &allowed, 40, 20);
        assert!(prompt.contains("Production.Product"));
        assert!(prompt.contains(r#""fetch_next": 20"#));
        assert!(prompt.contains("where_conditions"));
    }
}
