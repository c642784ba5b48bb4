//! Schema context for the AdventureWorks sample database.
//!
//! Provides the table/column catalog the generator embeds into prompts and
//! the JSON schema it requests from the model in structured mode. Read-only
//! after construction.

use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub columns: Vec<String>,
    pub description: String,
    /// One representative row, shown to the model as a value-format hint.
    pub sample_row: String,
}

#[derive(Debug, Clone)]
pub struct SchemaContext {
    tables: Vec<(String, TableInfo)>,
}

impl SchemaContext {
    pub fn new(tables: Vec<(String, TableInfo)>) -> Self {
        Self { tables }
    }

    /// Key tables of the AdventureWorks OLTP schema.
    pub fn adventure_works() -> Self {
        fn table(columns: &[&str], description: &str, sample_row: &str) -> TableInfo {
            TableInfo {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                description: description.to_string(),
                sample_row: sample_row.to_string(),
            }
        }

        Self::new(vec![
            (
                "Production.Product".to_string(),
                table(
                    &["ProductID", "Name", "ProductNumber", "Color", "ListPrice",
                      "StandardCost", "ProductCategoryID", "ProductSubcategoryID"],
                    "Products catalog with pricing and categorization",
                    "(1, 'HL Road Frame - Black, 58', 'FR-R92B-58', 'Black', 1431.50, 868.63, 18, 1)",
                ),
            ),
            (
                "Production.ProductCategory".to_string(),
                table(
                    &["ProductCategoryID", "Name", "ModifiedDate"],
                    "Product categories (Bikes, Components, Clothing, Accessories)",
                    "(1, 'Bikes', '2008-04-30 00:00:00.000')",
                ),
            ),
            (
                "Production.ProductSubcategory".to_string(),
                table(
                    &["ProductSubcategoryID", "ProductCategoryID", "Name"],
                    "Product subcategories like Road Bikes, Mountain Bikes, etc.",
                    "(1, 1, 'Mountain Bikes')",
                ),
            ),
            (
                "Sales.Customer".to_string(),
                table(
                    &["CustomerID", "PersonID", "StoreID", "TerritoryID", "AccountNumber"],
                    "Customer records with territory assignments",
                    "(1, NULL, 1, 1, 'AW00000001')",
                ),
            ),
            (
                "Sales.SalesOrderHeader".to_string(),
                table(
                    &["SalesOrderID", "RevisionNumber", "OrderDate", "DueDate", "ShipDate",
                      "Status", "CustomerID", "SalesPersonID", "TerritoryID", "BillToAddressID",
                      "ShipToAddressID", "ShipMethodID", "CreditCardID", "SubTotal", "TaxAmt",
                      "Freight", "TotalDue"],
                    "Sales order headers with customer and financial information",
                    "(43659, 8, '2011-05-31', '2011-06-12', '2011-06-07', 5, 29825, 279, 5, 985, 985, 5, 16281, 20565.62, 1971.5149, 616.0984, 23153.2339)",
                ),
            ),
            (
                "Sales.SalesOrderDetail".to_string(),
                table(
                    &["SalesOrderID", "SalesOrderDetailID", "CarrierTrackingNumber", "OrderQty",
                      "ProductID", "SpecialOfferID", "UnitPrice", "UnitPriceDiscount", "LineTotal"],
                    "Individual line items for sales orders",
                    "(43659, 1, '4911-403C-98', 1, 776, 1, 2024.994, 0.00, 2024.994)",
                ),
            ),
            (
                "Person.Person".to_string(),
                table(
                    &["BusinessEntityID", "PersonType", "NameStyle", "Title", "FirstName",
                      "MiddleName", "LastName", "Suffix", "EmailPromotion"],
                    "Person records for customers and employees",
                    "(1, 'EM', 0, 'Mr.', 'Ken', 'J', 'Sánchez', NULL, 0)",
                ),
            ),
            (
                "Person.Address".to_string(),
                table(
                    &["AddressID", "AddressLine1", "AddressLine2", "City", "StateProvinceID",
                      "PostalCode", "SpatialLocation"],
                    "Address information for customers and locations",
                    "(1, '1970 Napa Ct.', NULL, 'Bothell', 79, '98011', NULL)",
                ),
            ),
        ])
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|(table, _)| table == name)
            .map(|(_, info)| info)
    }

    /// Render the schema block embedded into system prompts, restricted to
    /// the allowed tables. Unknown names are skipped silently: the prompt
    /// only ever describes tables we have a catalog entry for.
    pub fn prompt_block(&self, allowed_tables: &[String]) -> String {
        let mut sections = Vec::new();
        for name in allowed_tables {
            if let Some(info) = self.get(name) {
                sections.push(format!(
                    "\n{}:\n  Description: {}\n  Columns: {}\n  Example: {}\n",
                    name,
                    info.description,
                    info.columns.join(", "),
                    info.sample_row
                ));
            }
        }
        sections.join("\n")
    }

    /// JSON schema the model is asked to follow in structured mode. Mirrors
    /// the `StructuredQuerySpec` deserialization contract.
    pub fn structured_output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tables": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "alias": {"type": "string"}
                        },
                        "required": ["name"],
                        "additionalProperties": false
                    }
                },
                "columns": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "table": {"type": "string"},
                            "name": {"type": "string"},
                            "alias": {"type": "string"},
                            "function": {"type": "string"}
                        },
                        "required": ["name"],
                        "additionalProperties": false
                    }
                },
                "where_conditions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "column": {"type": "string"},
                            "operator": {"type": "string"},
                            "value": {"type": "string"},
                            "logical_connector": {"type": "string"}
                        },
                        "required": ["column", "operator", "value"],
                        "additionalProperties": false
                    }
                },
                "joins": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string"},
                            "left_table": {"type": "string"},
                            "left_column": {"type": "string"},
                            "right_table": {"type": "string"},
                            "right_column": {"type": "string"}
                        },
                        "required": ["type", "left_table", "left_column", "right_table", "right_column"],
                        "additionalProperties": false
                    }
                },
                "order_by": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "column": {"type": "string"},
                            "direction": {"type": "string"}
                        },
                        "required": ["column", "direction"],
                        "additionalProperties": false
                    }
                },
                "pagination": {
                    "type": "object",
                    "properties": {
                        "offset": {"type": "integer"},
                        "fetch_next": {"type": "integer"}
                    },
                    "required": ["offset", "fetch_next"],
                    "additionalProperties": false
                }
            },
            "required": ["tables", "columns", "order_by", "pagination"],
            "additionalProperties": false
        })
    }
}

impl Default for SchemaContext {
    fn default() -> Self {
        Self::adventure_works()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_block_skips_unknown_tables() {
        let ctx = SchemaContext::adventure_works();
        let block = ctx.prompt_block(&[
            "Production.Product".to_string(),
            "dbo.DoesNotExist".to_string(),
        ]);
        assert!(block.contains("Production.Product"));
        assert!(!block.contains("DoesNotExist"));
    }

    #[test]
    fn catalog_lookup() {
        let ctx = SchemaContext::adventure_works();
        let info = ctx.get("Sales.SalesOrderHeader").unwrap();
        assert!(info.columns.iter().any(|c| c == "TotalDue"));
        assert!(ctx.get("Sales.Nope").is_none());
    }
}
