//! Inverse statements.
//!
//! Pure text derivation from the descriptor of the statement that actually
//! ran. Only inverses that restore the prior state exactly are produced.

use serde::Serialize;
use std::fmt;

use crate::sql::lexer::{tokenize, TokenKind};
use crate::sql::{AlterAction, StatementDescriptor, StatementKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotUndoableReason {
    /// UPDATE/DELETE: the rows were not captured before they changed.
    NoPriorState,
    /// DROP TABLE / DROP COLUMN: the definition is gone.
    NoSchemaDefinition,
    ReadOnly,
    Unsupported,
}

impl fmt::Display for NotUndoableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotUndoableReason::NoPriorState => "no prior state captured",
            NotUndoableReason::NoSchemaDefinition => "no schema definition retained",
            NotUndoableReason::ReadOnly => "read-only statement has nothing to undo",
            NotUndoableReason::Unsupported => "no lossless inverse for this statement",
        };
        f.write_str(text)
    }
}

/// Derive the statement that reverses `desc`.
pub fn undo_statement(desc: &StatementDescriptor) -> Result<String, NotUndoableReason> {
    let table = desc.target().map(|t| t.name.as_str());

    match (desc.kind, table) {
        (StatementKind::Select, _) => Err(NotUndoableReason::ReadOnly),
        (StatementKind::Update | StatementKind::Delete, _) => Err(NotUndoableReason::NoPriorState),
        (StatementKind::DropTable, _) => Err(NotUndoableReason::NoSchemaDefinition),
        (StatementKind::Insert, Some(table)) => undo_insert(desc, table),
        (StatementKind::CreateTable, Some(table)) => Ok(format!("DROP TABLE IF EXISTS {}", table)),
        (StatementKind::AlterTable, Some(table)) => match &desc.alter {
            Some(AlterAction::AddColumn { column }) => {
                Ok(format!("ALTER TABLE {} DROP COLUMN {}", table, column))
            }
            Some(AlterAction::DropColumn { .. }) => Err(NotUndoableReason::NoSchemaDefinition),
            Some(AlterAction::RenameTable { to }) => {
                // The new name lives in the same schema as the old one.
                let (schema, old) = split_schema(table);
                Ok(format!("ALTER TABLE {}{} RENAME TO {}", schema, to, old))
            }
            Some(AlterAction::RenameColumn { from, to }) => Ok(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                table, to, from
            )),
            Some(AlterAction::Other) | None => Err(NotUndoableReason::Unsupported),
        },
        _ => Err(NotUndoableReason::Unsupported),
    }
}

fn undo_insert(desc: &StatementDescriptor, table: &str) -> Result<String, NotUndoableReason> {
    // An upsert may have modified an existing row instead of inserting one.
    if desc.on_conflict || desc.columns.is_empty() {
        return Err(NotUndoableReason::Unsupported);
    }
    // OR REPLACE may have deleted rows; OR IGNORE may have skipped a row that
    // an identical pre-existing one would then stand in for.
    if desc.or_action.is_some_and(|action| !action.is_all_or_nothing()) {
        return Err(NotUndoableReason::Unsupported);
    }
    // The stored value of `now`, random() or a column default cannot be
    // matched again from the statement text.
    if !desc.value_rows().flatten().all(|value| is_plain_literal(value)) {
        return Err(NotUndoableReason::Unsupported);
    }

    let groups: Vec<String> = desc
        .value_rows()
        .map(|row| {
            desc.columns
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    if value.eq_ignore_ascii_case("NULL") {
                        format!("{} IS NULL", column)
                    } else {
                        format!("{} = {}", column, value)
                    }
                })
                .collect::<Vec<_>>()
                .join(" AND ")
        })
        .collect();

    let condition = match groups.as_slice() {
        [] => return Err(NotUndoableReason::Unsupported),
        [single] => single.clone(),
        many => many
            .iter()
            .map(|g| format!("({})", g))
            .collect::<Vec<_>>()
            .join(" OR "),
    };
    Ok(format!("DELETE FROM {} WHERE {}", table, condition))
}

/// A number, string, blob, NULL or boolean; nothing that is evaluated.
fn is_plain_literal(value: &str) -> bool {
    let Ok(tokens) = tokenize(value) else {
        return false;
    };
    let text = |i: usize| tokens[i].text(value);

    match tokens.as_slice() {
        [only] => match only.kind {
            TokenKind::Number | TokenKind::Str => true,
            TokenKind::Word => {
                ["NULL", "TRUE", "FALSE"].iter().any(|w| text(0).eq_ignore_ascii_case(w))
            }
            _ => false,
        },
        [sign, number] => {
            sign.kind == TokenKind::Operator
                && matches!(text(0), "-" | "+")
                && number.kind == TokenKind::Number
        }
        _ => false,
    }
}

/// `main.t` splits into (`main.`, `t`); a bare name has an empty schema part.
fn split_schema(table: &str) -> (&str, &str) {
    match table.rfind('.') {
        Some(dot) => (&table[..=dot], &table[dot + 1..]),
        None => ("", table),
    }
}
