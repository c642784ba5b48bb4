//! Structured query specification and its deterministic T-SQL renderer.
//!
//! The structured round of generation asks the model for a JSON object
//! matching `StructuredQuerySpec` instead of free SQL text, so intent can be
//! checked before any text parsing. `render_sql` is the only way a spec
//! becomes SQL; it always emits ORDER BY, which is what makes paginated
//! output deterministic by construction rather than by model compliance.

use crate::error::{Result, SqlGateError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default)]
    pub table: Option<String>,
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Aggregate wrapper, e.g. `SUM` or `COUNT`.
    #[serde(default)]
    pub function: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereCondition {
    pub column: String,
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub logical_connector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinClause {
    #[serde(rename = "type")]
    pub join_type: String,
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderByClause {
    pub column: String,
    pub direction: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub fetch_next: u64,
}

/// Declarative form of one SELECT statement, as returned by the model in
/// structured mode. Built once per generation attempt, rendered, discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredQuerySpec {
    #[serde(default)]
    pub tables: Vec<TableRef>,
    #[serde(default)]
    pub columns: Vec<ColumnRef>,
    #[serde(default)]
    pub where_conditions: Vec<WhereCondition>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    #[serde(default)]
    pub order_by: Vec<OrderByClause>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Render a spec to T-SQL. Errors when a required section is missing;
/// the orchestrator treats that as a structured-output failure, not a crash.
pub fn render_sql(spec: &StructuredQuerySpec) -> Result<String> {
    if spec.columns.is_empty() {
        return Err(SqlGateError::Render("column list is empty".to_string()));
    }
    if spec.tables.is_empty() {
        return Err(SqlGateError::Render("table list is empty".to_string()));
    }
    if spec.order_by.is_empty() {
        return Err(SqlGateError::Render(
            "order_by is required for deterministic results".to_string(),
        ));
    }

    let mut sql_parts = vec!["SELECT".to_string()];

    let column_parts: Vec<String> = spec
        .columns
        .iter()
        .map(|col| {
            let mut expr = match non_empty(&col.table) {
                Some(table) => format!("{}.{}", table, col.name),
                None => col.name.clone(),
            };
            if let Some(function) = non_empty(&col.function) {
                expr = format!("{}({})", function, expr);
            }
            if let Some(alias) = non_empty(&col.alias) {
                expr = format!("{} AS {}", expr, alias);
            }
            expr
        })
        .collect();
    sql_parts.push(format!("  {}", column_parts.join(", ")));

    sql_parts.push("FROM".to_string());
    let from_parts: Vec<String> = spec
        .tables
        .iter()
        .map(|table| match non_empty(&table.alias) {
            Some(alias) => format!("{} AS {}", table.name, alias),
            None => table.name.clone(),
        })
        .collect();
    sql_parts.push(format!("  {}", from_parts.join(", ")));

    // Joins are always explicit `<TYPE> JOIN ... ON ...`; implicit comma
    // joins cannot be attributed safely during validation.
    for join in &spec.joins {
        sql_parts.push(format!(
            "  {} JOIN {} ON {}.{} = {}.{}",
            join.join_type.to_uppercase(),
            join.right_table,
            join.left_table,
            join.left_column,
            join.right_table,
            join.right_column
        ));
    }

    if !spec.where_conditions.is_empty() {
        sql_parts.push("WHERE".to_string());
        let where_parts: Vec<String> = spec
            .where_conditions
            .iter()
            .enumerate()
            .map(|(i, cond)| {
                let expr = format!("{} {} {}", cond.column, cond.operator, cond.value);
                if i == 0 {
                    expr
                } else {
                    // Missing connector defaults to AND; a bare pair of
                    // conditions is not valid SQL.
                    let connector = non_empty(&cond.logical_connector).unwrap_or("AND");
                    format!("{} {}", connector.to_uppercase(), expr)
                }
            })
            .collect();
        sql_parts.push(format!("  {}", where_parts.join(" ")));
    }

    sql_parts.push("ORDER BY".to_string());
    let order_parts: Vec<String> = spec
        .order_by
        .iter()
        .map(|order| format!("{} {}", order.column, order.direction.to_uppercase()))
        .collect();
    sql_parts.push(format!("  {}", order_parts.join(", ")));

    if let Some(pagination) = &spec.pagination {
        sql_parts.push(format!("OFFSET {} ROWS", pagination.offset));
        sql_parts.push(format!("FETCH NEXT {} ROWS ONLY", pagination.fetch_next));
    }

    Ok(format!("{};", sql_parts.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec() -> StructuredQuerySpec {
        StructuredQuerySpec {
            tables: vec![TableRef {
                name: "Production.Product".to_string(),
                alias: Some("p".to_string()),
            }],
            columns: vec![ColumnRef {
                table: Some("p".to_string()),
                name: "ProductID".to_string(),
                alias: None,
                function: None,
            }],
            where_conditions: vec![],
            joins: vec![],
            order_by: vec![OrderByClause {
                column: "p.ProductID".to_string(),
                direction: "asc".to_string(),
            }],
            pagination: Some(Pagination {
                offset: 0,
                fetch_next: 20,
            }),
        }
    }

    #[test]
    fn renders_minimal_paginated_select() {
        let sql = render_sql(&minimal_spec()).unwrap();
        assert!(sql.starts_with("SELECT"));
        assert!(sql.contains("FROM\n  Production.Product AS p"));
        assert!(sql.contains("ORDER BY\n  p.ProductID ASC"));
        assert!(sql.contains("OFFSET 0 ROWS"));
        assert!(sql.contains("FETCH NEXT 20 ROWS ONLY"));
        assert!(sql.ends_with(';'));
    }

    #[test]
    fn renders_aggregate_and_alias() {
        let mut spec = minimal_spec();
        spec.columns = vec![ColumnRef {
            table: Some("p".to_string()),
            name: "ListPrice".to_string(),
            alias: Some("AvgPrice".to_string()),
            function: Some("AVG".to_string()),
        }];
        let sql = render_sql(&spec).unwrap();
        assert!(sql.contains("AVG(p.ListPrice) AS AvgPrice"));
    }

    #[test]
    fn renders_explicit_join() {
        let mut spec = minimal_spec();
        spec.joins = vec![JoinClause {
            join_type: "inner".to_string(),
            left_table: "p".to_string(),
            left_column: "ProductCategoryID".to_string(),
            right_table: "Production.ProductCategory".to_string(),
            right_column: "ProductCategoryID".to_string(),
        }];
        let sql = render_sql(&spec).unwrap();
        assert!(sql.contains(
            "INNER JOIN Production.ProductCategory ON p.ProductCategoryID = Production.ProductCategory.ProductCategoryID"
        ));
    }

    #[test]
    fn where_conditions_default_to_and() {
        let mut spec = minimal_spec();
        spec.where_conditions = vec![
            WhereCondition {
                column: "p.Color".to_string(),
                operator: "=".to_string(),
                value: "'Black'".to_string(),
                logical_connector: None,
            },
            WhereCondition {
                column: "p.ListPrice".to_string(),
                operator: ">".to_string(),
                value: "100".to_string(),
                logical_connector: None,
            },
            WhereCondition {
                column: "p.ListPrice".to_string(),
                operator: "<".to_string(),
                value: "2000".to_string(),
                logical_connector: Some("or".to_string()),
            },
        ];
        let sql = render_sql(&spec).unwrap();
        assert!(sql.contains("p.Color = 'Black' AND p.ListPrice > 100 OR p.ListPrice < 2000"));
    }

    #[test]
    fn missing_sections_are_render_errors() {
        let mut no_columns = minimal_spec();
        no_columns.columns.clear();
        assert!(render_sql(&no_columns).is_err());

        let mut no_tables = minimal_spec();
        no_tables.tables.clear();
        assert!(render_sql(&no_tables).is_err());

        let mut no_order = minimal_spec();
        no_order.order_by.clear();
        assert!(render_sql(&no_order).is_err());
    }

    #[test]
    fn empty_string_alias_is_ignored() {
        let mut spec = minimal_spec();
        spec.tables[0].alias = Some(String::new());
        spec.columns[0].table = None;
        let sql = render_sql(&spec).unwrap();
        assert!(sql.contains("FROM\n  Production.Product\n"));
        assert!(!sql.contains(" AS \n"));
    }

    #[test]
    fn deserializes_model_payload() {
        let payload = r#"{
            "tables": [{"name": "Production.Product", "alias": "p"}],
            "columns": [{"table": "p", "name": "ProductID", "alias": null, "function": null}],
            "where_conditions": [],
            "joins": [],
            "order_by": [{"column": "p.ProductID", "direction": "ASC"}],
            "pagination": {"offset": 0, "fetch_next": 20}
        }"#;
        let spec: StructuredQuerySpec = serde_json::from_str(payload).unwrap();
        assert_eq!(spec.tables.len(), 1);
        assert!(render_sql(&spec).is_ok());
    }
}
