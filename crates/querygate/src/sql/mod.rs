//! Minimal SQL structure analysis.
//!
//! Not a SQL engine: the classifier recognises just enough of a statement to
//! scope it, decide on approval and derive its inverse. Anything it cannot
//! place with confidence is a [`ParseError`].

mod classify;
pub mod lexer;

pub use classify::classify;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::schema::OWNER_COLUMN;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Statement is empty")]
    Empty,

    #[error("Unterminated {what} at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("Multiple statements are not allowed")]
    MultipleStatements,

    #[error("Unbalanced parentheses")]
    UnbalancedParens,

    #[error("Unrecognized statement starting with '{0}'")]
    UnrecognizedStatement(String),

    #[error("Cannot parse {clause}: {detail}")]
    Structure { clause: &'static str, detail: String },

    #[error("INSERT row {row} has {values} values for {columns} columns")]
    MalformedInsert {
        row: usize,
        columns: usize,
        values: usize,
    },
}

impl ParseError {
    pub(crate) fn structure(clause: &'static str, detail: impl Into<String>) -> Self {
        Self::Structure {
            clause,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    CreateTable,
    DropTable,
    AlterTable,
    Other,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::CreateTable => "CREATE_TABLE",
            StatementKind::DropTable => "DROP_TABLE",
            StatementKind::AlterTable => "ALTER_TABLE",
            StatementKind::Other => "OTHER",
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            StatementKind::CreateTable | StatementKind::DropTable | StatementKind::AlterTable
        )
    }

    /// Row-level data changes.
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table named in a FROM list, JOIN clause or statement target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Name as written, including quotes or a schema qualifier.
    pub name: String,
    /// Alias as written; the table name when no alias is given.
    pub alias: String,
    aliased: bool,
}

impl TableRef {
    pub(crate) fn new(name: String, alias: Option<String>) -> Self {
        match alias {
            Some(alias) => Self {
                name,
                alias,
                aliased: true,
            },
            None => Self {
                alias: name.clone(),
                name,
                aliased: false,
            },
        }
    }

    pub fn has_alias(&self) -> bool {
        self.aliased
    }

    /// Whether a column qualifier such as `p` in `p.user_id` names this table.
    pub fn answers_to(&self, qualifier: &str) -> bool {
        let qualifier = normalize_path(qualifier);
        if self.aliased {
            return qualifier == normalize_path(&self.alias);
        }
        qualifier == normalize_path(&self.name) || qualifier == last_segment(&self.name)
    }
}

/// A top-level conjunct that pins `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerBinding {
    /// `[q.]user_id = <literal>`
    Literal {
        qualifier: Option<String>,
        value: String,
    },
    /// `[a.]user_id = [b.]user_id`
    Link {
        left: Option<String>,
        right: Option<String>,
    },
}

/// A WHERE or ON condition, located by byte span in the statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub start: usize,
    pub end: usize,
    /// An OR at the condition's own nesting level.
    pub has_or: bool,
    /// Exact `user_id` equalities among the top-level conjuncts. Always empty
    /// when `has_or` is set, since no conjunct is then guaranteed to hold.
    pub bindings: Vec<OwnerBinding>,
    /// `user_id` appears somewhere other than an exact equality conjunct.
    pub loose_owner_reference: bool,
}

impl Condition {
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub column: String,
    pub value: String,
}

impl Assignment {
    pub fn targets_owner(&self) -> bool {
        mentions_owner_column(&self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterAction {
    AddColumn { column: String },
    DropColumn { column: String },
    RenameTable { to: String },
    RenameColumn { from: String, to: String },
    Other,
}

/// SQLite `INSERT OR <action>` / `UPDATE OR <action>` conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Replace,
    Ignore,
    Abort,
    Fail,
    Rollback,
}

impl ConflictAction {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "REPLACE" => Some(ConflictAction::Replace),
            "IGNORE" => Some(ConflictAction::Ignore),
            "ABORT" => Some(ConflictAction::Abort),
            "FAIL" => Some(ConflictAction::Fail),
            "ROLLBACK" => Some(ConflictAction::Rollback),
            _ => None,
        }
    }

    /// REPLACE deletes whichever existing row stands in the way.
    pub fn may_displace_rows(self) -> bool {
        self == ConflictAction::Replace
    }

    /// Whether the statement behaves like a plain INSERT/UPDATE: every row is
    /// written or the whole statement fails.
    pub fn is_all_or_nothing(self) -> bool {
        matches!(
            self,
            ConflictAction::Abort | ConflictAction::Fail | ConflictAction::Rollback
        )
    }
}

/// Structural facts about one statement.
#[derive(Debug, Clone)]
pub struct StatementDescriptor {
    pub kind: StatementKind,
    /// Statement text as submitted.
    pub sql: String,
    pub tables: Vec<TableRef>,
    pub has_where: bool,
    pub where_condition: Option<Condition>,
    pub join_conditions: Vec<Condition>,
    pub columns: Vec<String>,
    pub values: Vec<String>,
    pub additional_rows: Vec<Vec<String>>,
    pub on_conflict: bool,
    /// `OR <action>` after INSERT or UPDATE.
    pub or_action: Option<ConflictAction>,
    pub assignments: Vec<Assignment>,
    pub alter: Option<AlterAction>,
    /// Tables named inside parentheses or in later arms of a compound SELECT.
    pub nested_tables: Vec<String>,
    pub compound: bool,
    /// Byte offset where a missing WHERE clause belongs: after the FROM
    /// section and before any trailing clause or semicolon.
    pub scope_insert_at: usize,
}

impl StatementDescriptor {
    pub(crate) fn new(kind: StatementKind, sql: &str) -> Self {
        Self {
            kind,
            sql: sql.to_string(),
            tables: Vec::new(),
            has_where: false,
            where_condition: None,
            join_conditions: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
            additional_rows: Vec::new(),
            on_conflict: false,
            or_action: None,
            assignments: Vec::new(),
            alter: None,
            nested_tables: Vec::new(),
            compound: false,
            scope_insert_at: sql.trim_end().len(),
        }
    }

    pub fn where_clause_text(&self) -> Option<&str> {
        self.where_condition.as_ref().map(|c| c.text(&self.sql))
    }

    /// The statement's primary table: the INSERT/UPDATE/DELETE/DDL target,
    /// or the first table of a SELECT.
    pub fn target(&self) -> Option<&TableRef> {
        self.tables.first()
    }

    /// Every VALUES row of an INSERT, first row included.
    pub fn value_rows(&self) -> impl Iterator<Item = &[String]> {
        std::iter::once(self.values.as_slice())
            .filter(|row| !row.is_empty())
            .chain(self.additional_rows.iter().map(Vec::as_slice))
    }

    pub fn row_count(&self) -> usize {
        self.value_rows().count()
    }
}

/// Strip identifier quoting: `"x"`, `` `x` `` or `[x]`.
pub fn unquote_ident(ident: &str) -> String {
    let trimmed = ident.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        let inner = &trimmed[1..trimmed.len() - 1];
        match (first, last) {
            (b'"', b'"') => return inner.replace("\"\"", "\""),
            (b'`', b'`') => return inner.replace("``", "`"),
            (b'[', b']') => return inner.to_string(),
            _ => {}
        }
    }
    trimmed.to_string()
}

/// Lowercased, unquoted dotted path: `Main."Purchases"` becomes `main.purchases`.
pub(crate) fn normalize_path(path: &str) -> String {
    path.split('.')
        .map(|segment| unquote_ident(segment).to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn last_segment(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rsplit_once('.') {
        Some((_, last)) => last.to_string(),
        None => normalized,
    }
}

/// Whether a column reference (possibly qualified) names `user_id`.
pub fn is_owner_column(column: &str) -> bool {
    last_segment(column) == OWNER_COLUMN
}

fn mentions_owner_column(text: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case(OWNER_COLUMN))
}
