//! Schema Registry
//!
//! Static mapping of table name to column set, loaded once at startup. The
//! registry decides which tables are owner-scoped: any table carrying a
//! `user_id` column.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Column binding a row to the principal that owns it.
pub const OWNER_COLUMN: &str = "user_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table '{0}' is defined more than once")]
    DuplicateTable(String),

    #[error("Table '{0}' has no columns")]
    EmptyTable(String),

    #[error("Table name is empty")]
    EmptyName,
}

/// Table definition as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<String>,
}

/// Immutable table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<String>,
    has_user_id: bool,
}

impl TableSchema {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let has_user_id = columns.iter().any(|c| c.eq_ignore_ascii_case(OWNER_COLUMN));
        Self {
            name: name.into(),
            columns,
            has_user_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether rows of this table belong to a principal.
    pub fn has_user_id(&self) -> bool {
        self.has_user_id
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Lookup of table schemas by (case-insensitive) name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
    order: Vec<String>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Result<Self, SchemaError> {
        let mut registry = Self::default();
        for table in tables {
            if table.name.trim().is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if table.columns.is_empty() {
                return Err(SchemaError::EmptyTable(table.name));
            }
            let key = table.name.to_ascii_lowercase();
            if registry.tables.contains_key(&key) {
                return Err(SchemaError::DuplicateTable(table.name));
            }
            registry.order.push(key.clone());
            registry.tables.insert(key, table);
        }
        Ok(registry)
    }

    pub fn from_definitions(definitions: &[TableDefinition]) -> Result<Self, SchemaError> {
        Self::new(
            definitions
                .iter()
                .map(|d| TableSchema::new(d.name.clone(), d.columns.iter().cloned()))
                .collect(),
        )
    }

    /// Look up a table. Quotes and a schema qualifier (`main.t`) are ignored.
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&normalize_table_name(name))
    }

    /// Whether `name` is a known table carrying `user_id`. Unknown tables are
    /// reported as not scoped.
    pub fn has_user_id(&self, name: &str) -> bool {
        self.get(name).map(TableSchema::has_user_id).unwrap_or(false)
    }

    /// Tables in definition order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.order.iter().filter_map(|key| self.tables.get(key))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn normalize_table_name(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim()
        .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_ascii_lowercase()
}

/// Tables of the pharmacy dataset, shared by unit tests.
#[cfg(test)]
pub(crate) fn pharmacy_registry() -> SchemaRegistry {
    SchemaRegistry::new(vec![
        TableSchema::new(
            "purchases",
            [
                "purchase_id",
                "user_id",
                "drug_id",
                "quantity",
                "unit_price",
                "total_amount",
                "purchase_date",
                "delivery_status",
            ],
        ),
        TableSchema::new(
            "users",
            ["user_id", "first_name", "last_name", "email", "phone", "credit_card_number"],
        ),
        TableSchema::new(
            "drugs",
            ["drug_id", "drug_name", "requires_prescription", "price_per_unit"],
        ),
        TableSchema::new(
            "user_medical_history",
            ["history_id", "user_id", "condition_name", "allergies"],
        ),
        TableSchema::new("sessions", ["session_id", "user_id", "ip_address"]),
        TableSchema::new("admin_users", ["admin_id", "username", "password_hash"]),
        TableSchema::new(
            "drug_interactions",
            ["interaction_id", "drug_id_1", "drug_id_2", "severity_score"],
        ),
    ])
    .expect("pharmacy registry is valid")
}
