//! Statement classifier.

use super::lexer::{tokenize, Token, TokenKind};
use super::{
    is_owner_column, AlterAction, Assignment, Condition, ConflictAction, OwnerBinding, ParseError,
    StatementDescriptor, StatementKind, TableRef,
};

/// Verbs that are valid SQL but carry no structure the gateway analyses.
const OTHER_VERBS: &[&str] = &[
    "WITH", "EXPLAIN", "PRAGMA", "REPLACE", "VACUUM", "ANALYZE", "REINDEX", "ATTACH", "DETACH",
    "BEGIN", "COMMIT", "END", "ROLLBACK", "SAVEPOINT", "RELEASE", "TRUNCATE", "RENAME",
];

/// Words that end a FROM list.
const FROM_TERMINATORS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT",
    "EXCEPT", "RETURNING",
];

/// Clauses that may follow a SELECT's WHERE condition.
const SELECT_TAIL: &[&str] = &[
    "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
];

/// Clauses that may follow an UPDATE or DELETE WHERE condition.
const DML_TAIL: &[&str] = &["RETURNING", "ORDER", "LIMIT"];

const JOIN_WORDS: &[&str] = &["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL"];

const COMPOUND_WORDS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];

/// Words never taken as a bare alias or table name.
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "UNION",
    "INTERSECT", "EXCEPT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "OUTER",
    "ON", "USING", "AS", "SET", "VALUES", "RETURNING", "AND", "OR", "NOT", "INTO", "INDEXED",
];

/// Classify a single SQL statement.
pub fn classify(sql: &str) -> Result<StatementDescriptor, ParseError> {
    let stmt = Statement::new(sql)?;
    let Some(first) = stmt.word(0) else {
        return Err(ParseError::UnrecognizedStatement(stmt.text(0).to_string()));
    };

    let mut desc = match first.to_ascii_uppercase().as_str() {
        "SELECT" => stmt.select()?,
        "INSERT" => stmt.insert()?,
        "UPDATE" => stmt.update()?,
        "DELETE" => stmt.delete()?,
        "CREATE" => stmt.create()?,
        "DROP" => stmt.drop_table()?,
        "ALTER" => stmt.alter()?,
        verb if OTHER_VERBS.contains(&verb) => StatementDescriptor::new(StatementKind::Other, sql),
        _ => return Err(ParseError::UnrecognizedStatement(first.to_string())),
    };

    desc.nested_tables.extend(stmt.nested_tables());
    Ok(desc)
}

/// Body tokens of one statement with the parenthesis depth of each token.
struct Statement<'a> {
    src: &'a str,
    toks: Vec<Token>,
    depth: Vec<usize>,
}

impl<'a> Statement<'a> {
    fn new(src: &'a str) -> Result<Self, ParseError> {
        let mut toks = tokenize(src)?;

        while toks.last().map(|t| t.kind) == Some(TokenKind::Semicolon) {
            toks.pop();
        }
        if toks.is_empty() {
            return Err(ParseError::Empty);
        }
        if toks.iter().any(|t| t.kind == TokenKind::Semicolon) {
            return Err(ParseError::MultipleStatements);
        }

        let mut depth = Vec::with_capacity(toks.len());
        let mut level = 0usize;
        for tok in &toks {
            match tok.kind {
                TokenKind::LParen => {
                    depth.push(level);
                    level += 1;
                }
                TokenKind::RParen => {
                    level = level.checked_sub(1).ok_or(ParseError::UnbalancedParens)?;
                    depth.push(level);
                }
                _ => depth.push(level),
            }
        }
        if level != 0 {
            return Err(ParseError::UnbalancedParens);
        }

        Ok(Self { src, toks, depth })
    }

    // ----- token helpers -------------------------------------------------

    fn len(&self) -> usize {
        self.toks.len()
    }

    fn kind(&self, i: usize) -> Option<TokenKind> {
        self.toks.get(i).map(|t| t.kind)
    }

    fn text(&self, i: usize) -> &'a str {
        self.toks.get(i).map(|t| t.text(self.src)).unwrap_or("")
    }

    /// Source text covering tokens `a..b`.
    fn span(&self, a: usize, b: usize) -> &'a str {
        if a >= b {
            return "";
        }
        &self.src[self.toks[a].start..self.toks[b - 1].end]
    }

    fn word(&self, i: usize) -> Option<&'a str> {
        match self.kind(i) {
            Some(TokenKind::Word) => Some(self.text(i)),
            _ => None,
        }
    }

    fn is_kw(&self, i: usize, kw: &str) -> bool {
        self.word(i).is_some_and(|w| w.eq_ignore_ascii_case(kw))
    }

    fn is_any_kw(&self, i: usize, kws: &[&str]) -> bool {
        self.word(i)
            .is_some_and(|w| kws.iter().any(|kw| w.eq_ignore_ascii_case(kw)))
    }

    /// Identifier usable as a table name or alias.
    fn is_name(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::QuotedIdent) => true,
            Some(TokenKind::Word) => !self.is_any_kw(i, RESERVED),
            _ => false,
        }
    }

    fn expect_kw(&self, i: usize, kw: &'static str, clause: &'static str) -> Result<usize, ParseError> {
        if self.is_kw(i, kw) {
            Ok(i + 1)
        } else {
            Err(ParseError::structure(
                clause,
                format!("expected {} but found '{}'", kw, self.text(i)),
            ))
        }
    }

    /// First index in `from..` at depth 0 holding one of `kws`.
    fn find_top_level(&self, from: usize, kws: &[&str]) -> Option<usize> {
        (from..self.len()).find(|&i| self.depth[i] == 0 && self.is_any_kw(i, kws))
    }

    fn closing_paren(&self, open: usize) -> Result<usize, ParseError> {
        let level = self.depth[open];
        (open + 1..self.len())
            .find(|&i| self.kind(i) == Some(TokenKind::RParen) && self.depth[i] == level)
            .ok_or(ParseError::UnbalancedParens)
    }

    /// Dotted name starting at `i`; returns its text and the next index.
    fn dotted_name(&self, i: usize) -> Option<(String, usize)> {
        if !self.is_name(i) {
            return None;
        }
        let mut end = i + 1;
        while self.kind(end) == Some(TokenKind::Dot)
            && matches!(self.kind(end + 1), Some(TokenKind::Word | TokenKind::QuotedIdent))
        {
            end += 2;
        }
        Some((self.span(i, end).to_string(), end))
    }

    fn table_name(&self, i: usize, clause: &'static str) -> Result<(String, usize), ParseError> {
        self.dotted_name(i).ok_or_else(|| {
            ParseError::structure(clause, format!("expected a table name, found '{}'", self.text(i)))
        })
    }

    /// Optional `[AS] alias` at `i`.
    fn alias(&self, i: usize, clause: &'static str) -> Result<(Option<String>, usize), ParseError> {
        if self.is_kw(i, "AS") {
            if !self.is_name(i + 1) {
                return Err(ParseError::structure(clause, "AS without an alias"));
            }
            return Ok((Some(self.text(i + 1).to_string()), i + 2));
        }
        if self.is_name(i) {
            return Ok((Some(self.text(i).to_string()), i + 1));
        }
        Ok((None, i))
    }

    /// Comma-separated items inside the parenthesis opened at `open`.
    /// Returns the items' text and the index of the closing parenthesis.
    fn paren_list(&self, open: usize, clause: &'static str) -> Result<(Vec<String>, usize), ParseError> {
        let close = self.closing_paren(open)?;
        let level = self.depth[open] + 1;
        let mut items = Vec::new();
        let mut item_start = open + 1;
        for i in open + 1..=close {
            let boundary = i == close || (self.kind(i) == Some(TokenKind::Comma) && self.depth[i] == level);
            if boundary {
                if item_start == i {
                    return Err(ParseError::structure(clause, "empty list item"));
                }
                items.push(self.span(item_start, i).to_string());
                item_start = i + 1;
            }
        }
        Ok((items, close))
    }

    // ----- statement shapes ----------------------------------------------

    fn select(&self) -> Result<StatementDescriptor, ParseError> {
        let mut desc = StatementDescriptor::new(StatementKind::Select, self.src);
        desc.compound = self.find_top_level(1, COMPOUND_WORDS).is_some();

        let mut i = match self.find_top_level(1, &["FROM"]) {
            Some(from) => self.from_list(from + 1, &mut desc)?,
            None => self
                .find_top_level(1, &["WHERE"])
                .or_else(|| self.find_top_level(1, SELECT_TAIL))
                .unwrap_or(self.len()),
        };

        if self.is_kw(i, "WHERE") {
            let end = self.find_top_level(i + 1, SELECT_TAIL).unwrap_or(self.len());
            desc.where_condition = Some(self.condition(i + 1, end, "WHERE clause")?);
            desc.has_where = true;
            i = end;
        }

        if i > 0 {
            desc.scope_insert_at = self.toks[i - 1].end;
        }
        Ok(desc)
    }

    /// Parse a FROM list starting at `i`, returning the index after it.
    fn from_list(&self, mut i: usize, desc: &mut StatementDescriptor) -> Result<usize, ParseError> {
        const CLAUSE: &str = "FROM clause";
        loop {
            if self.kind(i) == Some(TokenKind::LParen) {
                return Err(ParseError::structure(
                    CLAUSE,
                    "parenthesized subqueries and joins are not supported",
                ));
            }
            let (name, next) = self.table_name(i, CLAUSE)?;
            if self.kind(next) == Some(TokenKind::LParen) {
                return Err(ParseError::structure(
                    CLAUSE,
                    format!("table-valued function '{}' is not supported", name),
                ));
            }
            let (alias, next) = self.alias(next, CLAUSE)?;
            desc.tables.push(TableRef::new(name, alias));
            i = next;

            if self.is_kw(i, "ON") {
                let end = (i + 1..self.len())
                    .find(|&j| self.ends_join_condition(j))
                    .unwrap_or(self.len());
                desc.join_conditions.push(self.condition(i + 1, end, "ON clause")?);
                i = end;
            } else if self.is_kw(i, "USING") {
                if self.kind(i + 1) != Some(TokenKind::LParen) {
                    return Err(ParseError::structure(CLAUSE, "USING without a column list"));
                }
                i = self.closing_paren(i + 1)? + 1;
            }

            if i >= self.len() || self.is_any_kw(i, FROM_TERMINATORS) {
                return Ok(i);
            }
            if self.kind(i) == Some(TokenKind::Comma) {
                i += 1;
                continue;
            }
            match self.join_operator(i) {
                Some(next) => i = next,
                None => {
                    return Err(ParseError::structure(
                        CLAUSE,
                        format!("unexpected '{}'", self.text(i)),
                    ))
                }
            }
        }
    }

    fn ends_join_condition(&self, j: usize) -> bool {
        self.depth[j] == 0
            && (self.kind(j) == Some(TokenKind::Comma)
                || self.is_any_kw(j, JOIN_WORDS)
                || self.is_any_kw(j, FROM_TERMINATORS))
    }

    /// `[NATURAL] [LEFT|RIGHT|FULL] [OUTER] JOIN`, `INNER JOIN`, `CROSS JOIN`.
    fn join_operator(&self, mut i: usize) -> Option<usize> {
        if self.is_kw(i, "NATURAL") {
            i += 1;
        }
        if self.is_any_kw(i, &["LEFT", "RIGHT", "FULL"]) {
            i += 1;
            if self.is_kw(i, "OUTER") {
                i += 1;
            }
        } else if self.is_any_kw(i, &["INNER", "CROSS"]) {
            i += 1;
        }
        self.is_kw(i, "JOIN").then_some(i + 1)
    }

    fn conflict_action(&self, i: usize, clause: &'static str) -> Result<ConflictAction, ParseError> {
        let word = match self.kind(i) {
            Some(TokenKind::Word) => self.text(i),
            _ => "",
        };
        ConflictAction::from_keyword(word).ok_or_else(|| {
            ParseError::structure(clause, format!("unknown conflict action '{}' after OR", word))
        })
    }

    fn insert(&self) -> Result<StatementDescriptor, ParseError> {
        const CLAUSE: &str = "INSERT";
        let mut desc = StatementDescriptor::new(StatementKind::Insert, self.src);

        let mut i = 1;
        if self.is_kw(i, "OR") {
            desc.or_action = Some(self.conflict_action(i + 1, CLAUSE)?);
            i += 2;
        }
        i = self.expect_kw(i, "INTO", CLAUSE)?;
        let (name, next) = self.table_name(i, CLAUSE)?;
        i = next;
        let mut alias = None;
        if self.is_kw(i, "AS") && self.is_name(i + 1) {
            alias = Some(self.text(i + 1).to_string());
            i += 2;
        }
        desc.tables.push(TableRef::new(name, alias));

        if self.kind(i) != Some(TokenKind::LParen) {
            return Err(ParseError::structure(CLAUSE, "missing column list"));
        }
        let (columns, close) = self.paren_list(i, CLAUSE)?;
        let quoted = |c: &str| c.starts_with(['"', '`', '[']);
        if let Some(bad) = columns
            .iter()
            .find(|c| c.contains(char::is_whitespace) && !quoted(c))
        {
            return Err(ParseError::structure(CLAUSE, format!("invalid column '{}'", bad)));
        }
        desc.columns = columns;

        i = close + 1;
        if !self.is_kw(i, "VALUES") {
            return Err(ParseError::structure(CLAUSE, "missing VALUES list"));
        }
        i += 1;

        let mut rows = Vec::new();
        loop {
            if self.kind(i) != Some(TokenKind::LParen) {
                return Err(ParseError::structure(CLAUSE, "expected a parenthesized VALUES row"));
            }
            let (values, close) = self.paren_list(i, CLAUSE)?;
            if values.len() != desc.columns.len() {
                return Err(ParseError::MalformedInsert {
                    row: rows.len() + 1,
                    columns: desc.columns.len(),
                    values: values.len(),
                });
            }
            rows.push(values);
            i = close + 1;
            if self.kind(i) == Some(TokenKind::Comma) {
                i += 1;
            } else {
                break;
            }
        }

        if i < self.len() {
            if self.is_kw(i, "ON") && self.is_kw(i + 1, "CONFLICT") {
                desc.on_conflict = true;
            } else if !self.is_kw(i, "RETURNING") {
                return Err(ParseError::structure(
                    CLAUSE,
                    format!("unexpected '{}' after VALUES", self.text(i)),
                ));
            }
        }

        let mut rows = rows.into_iter();
        desc.values = rows.next().unwrap_or_default();
        desc.additional_rows = rows.collect();
        Ok(desc)
    }

    fn update(&self) -> Result<StatementDescriptor, ParseError> {
        const CLAUSE: &str = "UPDATE";
        let mut desc = StatementDescriptor::new(StatementKind::Update, self.src);

        let mut i = 1;
        if self.is_kw(i, "OR") {
            desc.or_action = Some(self.conflict_action(i + 1, CLAUSE)?);
            i += 2;
        }
        let (name, next) = self.table_name(i, CLAUSE)?;
        let (alias, next) = self.alias(next, CLAUSE)?;
        desc.tables.push(TableRef::new(name, alias));
        i = self.expect_kw(next, "SET", CLAUSE)?;

        let end = (i..self.len())
            .find(|&j| {
                self.depth[j] == 0
                    && (self.is_any_kw(j, &["FROM", "WHERE"]) || self.is_any_kw(j, DML_TAIL))
            })
            .unwrap_or(self.len());
        let mut item_start = i;
        for j in i..=end {
            if j == end || (self.kind(j) == Some(TokenKind::Comma) && self.depth[j] == 0) {
                desc.assignments.push(self.assignment(item_start, j)?);
                item_start = j + 1;
            }
        }
        i = end;

        if self.is_kw(i, "FROM") {
            i = self.from_list(i + 1, &mut desc)?;
        }
        self.dml_where(i, &mut desc, CLAUSE)?;
        Ok(desc)
    }

    fn assignment(&self, a: usize, b: usize) -> Result<Assignment, ParseError> {
        let eq = (a..b)
            .find(|&j| {
                self.depth[j] == self.depth[a]
                    && self.kind(j) == Some(TokenKind::Operator)
                    && self.text(j) == "="
            })
            .filter(|&eq| eq > a && eq + 1 < b)
            .ok_or_else(|| {
                ParseError::structure(
                    "SET clause",
                    format!("malformed assignment '{}'", self.span(a, b)),
                )
            })?;
        Ok(Assignment {
            column: self.span(a, eq).to_string(),
            value: self.span(eq + 1, b).to_string(),
        })
    }

    fn delete(&self) -> Result<StatementDescriptor, ParseError> {
        const CLAUSE: &str = "DELETE";
        let mut desc = StatementDescriptor::new(StatementKind::Delete, self.src);

        let i = self.expect_kw(1, "FROM", CLAUSE)?;
        let (name, next) = self.table_name(i, CLAUSE)?;
        let (alias, next) = self.alias(next, CLAUSE)?;
        desc.tables.push(TableRef::new(name, alias));
        self.dml_where(next, &mut desc, CLAUSE)?;
        Ok(desc)
    }

    /// Optional WHERE of an UPDATE or DELETE, then the allowed tail clauses.
    fn dml_where(&self, mut i: usize, desc: &mut StatementDescriptor, clause: &'static str) -> Result<(), ParseError> {
        if self.is_kw(i, "WHERE") {
            let end = self.find_top_level(i + 1, DML_TAIL).unwrap_or(self.len());
            desc.where_condition = Some(self.condition(i + 1, end, "WHERE clause")?);
            desc.has_where = true;
            i = end;
        }
        if i < self.len() && !self.is_any_kw(i, DML_TAIL) {
            return Err(ParseError::structure(clause, format!("unexpected '{}'", self.text(i))));
        }
        desc.scope_insert_at = self.toks[i.min(self.len()) - 1].end;
        Ok(())
    }

    fn create(&self) -> Result<StatementDescriptor, ParseError> {
        let mut i = 1;
        if self.is_any_kw(i, &["TEMP", "TEMPORARY"]) {
            i += 1;
        }
        if !self.is_kw(i, "TABLE") {
            return Ok(StatementDescriptor::new(StatementKind::Other, self.src));
        }
        i += 1;
        if self.is_kw(i, "IF") && self.is_kw(i + 1, "NOT") && self.is_kw(i + 2, "EXISTS") {
            i += 3;
        }
        let (name, _) = self.table_name(i, "CREATE TABLE")?;
        let mut desc = StatementDescriptor::new(StatementKind::CreateTable, self.src);
        desc.tables.push(TableRef::new(name, None));
        Ok(desc)
    }

    fn drop_table(&self) -> Result<StatementDescriptor, ParseError> {
        if !self.is_kw(1, "TABLE") {
            return Ok(StatementDescriptor::new(StatementKind::Other, self.src));
        }
        let mut i = 2;
        if self.is_kw(i, "IF") && self.is_kw(i + 1, "EXISTS") {
            i += 2;
        }
        let (name, next) = self.table_name(i, "DROP TABLE")?;
        if next < self.len() {
            return Err(ParseError::structure(
                "DROP TABLE",
                format!("unexpected '{}'", self.text(next)),
            ));
        }
        let mut desc = StatementDescriptor::new(StatementKind::DropTable, self.src);
        desc.tables.push(TableRef::new(name, None));
        Ok(desc)
    }

    fn alter(&self) -> Result<StatementDescriptor, ParseError> {
        const CLAUSE: &str = "ALTER TABLE";
        if !self.is_kw(1, "TABLE") {
            return Ok(StatementDescriptor::new(StatementKind::Other, self.src));
        }
        let (name, mut i) = self.table_name(2, CLAUSE)?;
        let mut desc = StatementDescriptor::new(StatementKind::AlterTable, self.src);
        desc.tables.push(TableRef::new(name, None));

        let column_at = |i: usize| -> Option<String> {
            matches!(self.kind(i), Some(TokenKind::Word | TokenKind::QuotedIdent))
                .then(|| self.text(i).to_string())
        };

        let action = if self.is_kw(i, "ADD") {
            i += 1;
            if self.is_kw(i, "COLUMN") {
                i += 1;
            }
            if self.is_any_kw(i, &["CONSTRAINT", "PRIMARY", "UNIQUE", "FOREIGN", "CHECK"]) {
                AlterAction::Other
            } else {
                column_at(i)
                    .map(|column| AlterAction::AddColumn { column })
                    .ok_or_else(|| ParseError::structure(CLAUSE, "ADD without a column"))?
            }
        } else if self.is_kw(i, "DROP") {
            i += 1;
            if self.is_kw(i, "CONSTRAINT") {
                AlterAction::Other
            } else {
                if self.is_kw(i, "COLUMN") {
                    i += 1;
                }
                column_at(i)
                    .map(|column| AlterAction::DropColumn { column })
                    .ok_or_else(|| ParseError::structure(CLAUSE, "DROP without a column"))?
            }
        } else if self.is_kw(i, "RENAME") {
            i += 1;
            if self.is_kw(i, "TO") {
                let (to, _) = self.table_name(i + 1, CLAUSE)?;
                AlterAction::RenameTable { to }
            } else {
                if self.is_kw(i, "COLUMN") {
                    i += 1;
                }
                match (column_at(i), self.is_kw(i + 1, "TO"), column_at(i + 2)) {
                    (Some(from), true, Some(to)) => AlterAction::RenameColumn { from, to },
                    _ => return Err(ParseError::structure(CLAUSE, "malformed RENAME")),
                }
            }
        } else {
            AlterAction::Other
        };

        desc.alter = Some(action);
        Ok(desc)
    }

    // ----- conditions ----------------------------------------------------

    fn condition(&self, a: usize, b: usize, clause: &'static str) -> Result<Condition, ParseError> {
        if a >= b {
            return Err(ParseError::structure(clause, "empty condition"));
        }
        let mut bindings = Vec::new();
        let mut loose = false;
        let has_or = self.collect_conjuncts(a, b, &mut bindings, &mut loose)?;
        if has_or {
            bindings.clear();
            loose = self.mentions_owner(a, b);
        }
        Ok(Condition {
            start: self.toks[a].start,
            end: self.toks[b - 1].end,
            has_or,
            bindings,
            loose_owner_reference: loose,
        })
    }

    /// Split `a..b` on AND at its own level, recording owner bindings.
    /// Returns whether an OR appears at that level.
    fn collect_conjuncts(
        &self,
        a: usize,
        b: usize,
        bindings: &mut Vec<OwnerBinding>,
        loose: &mut bool,
    ) -> Result<bool, ParseError> {
        let level = self.depth[a];
        let mut has_or = false;
        let mut case_depth = 0usize;
        let mut between = false;
        let mut start = a;

        for i in a..=b {
            if i < b {
                if self.depth[i] != level {
                    continue;
                }
                if self.is_kw(i, "CASE") {
                    case_depth += 1;
                } else if self.is_kw(i, "END") && case_depth > 0 {
                    case_depth -= 1;
                }
                if case_depth > 0 {
                    continue;
                }
                if self.is_kw(i, "BETWEEN") {
                    between = true;
                    continue;
                }
                if self.is_kw(i, "OR") {
                    has_or = true;
                    continue;
                }
                if !self.is_kw(i, "AND") {
                    continue;
                }
                if between {
                    between = false;
                    continue;
                }
            }
            if start >= i {
                return Err(ParseError::structure("condition", "dangling AND"));
            }
            self.conjunct(start, i, bindings, loose)?;
            start = i + 1;
        }
        Ok(has_or)
    }

    fn conjunct(
        &self,
        mut a: usize,
        mut b: usize,
        bindings: &mut Vec<OwnerBinding>,
        loose: &mut bool,
    ) -> Result<(), ParseError> {
        let mut stripped = false;
        while self.kind(a) == Some(TokenKind::LParen)
            && a + 1 < b - 1
            && self.closing_paren(a)? == b - 1
        {
            a += 1;
            b -= 1;
            stripped = true;
        }

        if let Some(binding) = self.binding(a, b) {
            bindings.push(binding);
            return Ok(());
        }

        if stripped {
            // A parenthesized conjunction contributes its own conjuncts.
            let mut inner = Vec::new();
            let mut inner_loose = false;
            if !self.collect_conjuncts(a, b, &mut inner, &mut inner_loose)? {
                bindings.extend(inner);
                *loose |= inner_loose;
                return Ok(());
            }
        }

        *loose |= self.mentions_owner(a, b);
        Ok(())
    }

    /// `operand = operand` spanning exactly `a..b` where at least one side is
    /// a `user_id` column.
    fn binding(&self, a: usize, b: usize) -> Option<OwnerBinding> {
        let eq = (a..b).find(|&i| {
            self.depth[i] == self.depth[a]
                && self.kind(i) == Some(TokenKind::Operator)
                && matches!(self.text(i), "=" | "==")
        })?;
        let left = self.operand(a, eq)?;
        let right = self.operand(eq + 1, b)?;
        match (left, right) {
            (Operand::Owner(left), Operand::Owner(right)) => Some(OwnerBinding::Link { left, right }),
            (Operand::Owner(qualifier), Operand::Literal(value))
            | (Operand::Literal(value), Operand::Owner(qualifier)) => {
                Some(OwnerBinding::Literal { qualifier, value })
            }
            _ => None,
        }
    }

    fn operand(&self, a: usize, b: usize) -> Option<Operand> {
        match b.checked_sub(a)? {
            1 if matches!(self.kind(a), Some(TokenKind::Number | TokenKind::Str)) => {
                return Some(Operand::Literal(self.text(a).to_string()))
            }
            2 if self.kind(a) == Some(TokenKind::Operator)
                && matches!(self.text(a), "-" | "+")
                && self.kind(a + 1) == Some(TokenKind::Number) =>
            {
                return Some(Operand::Literal(self.span(a, b).to_string()))
            }
            _ => {}
        }

        let (path, end) = self.column_path(a)?;
        if end != b || !is_owner_column(&path) {
            return None;
        }
        let qualifier = (end - a > 1).then(|| self.span(a, end - 2).to_string());
        Some(Operand::Owner(qualifier))
    }

    fn column_path(&self, a: usize) -> Option<(String, usize)> {
        if !matches!(self.kind(a), Some(TokenKind::Word | TokenKind::QuotedIdent)) {
            return None;
        }
        let mut end = a + 1;
        while self.kind(end) == Some(TokenKind::Dot)
            && matches!(self.kind(end + 1), Some(TokenKind::Word | TokenKind::QuotedIdent))
        {
            end += 2;
        }
        Some((self.span(a, end).to_string(), end))
    }

    fn mentions_owner(&self, a: usize, b: usize) -> bool {
        (a..b).any(|i| {
            matches!(self.kind(i), Some(TokenKind::Word | TokenKind::QuotedIdent))
                && is_owner_column(self.text(i))
        })
    }

    // ----- nested references ---------------------------------------------

    /// Tables named by FROM/JOIN inside parentheses, or in any arm of a
    /// compound SELECT after the first.
    fn nested_tables(&self) -> Vec<String> {
        let first_compound = self.find_top_level(1, COMPOUND_WORDS).unwrap_or(self.len());
        let mut names = Vec::new();
        for i in 0..self.len() {
            let nested = self.depth[i] > 0 || i > first_compound;
            if !nested {
                continue;
            }
            if self.is_kw(i, "FROM") || self.is_kw(i, "JOIN") {
                self.lenient_table_list(i + 1, self.depth[i], &mut names);
            }
        }
        names
    }

    fn lenient_table_list(&self, mut i: usize, level: usize, names: &mut Vec<String>) {
        loop {
            if self.kind(i) == Some(TokenKind::LParen) {
                // Contents are visited by the outer scan at their own depth.
                match self.closing_paren(i) {
                    Ok(close) => i = close + 1,
                    Err(_) => return,
                }
            } else if let Some((name, next)) = self.dotted_name(i) {
                names.push(name);
                i = next;
            } else {
                return;
            }
            if let Ok((_, next)) = self.alias(i, "FROM clause") {
                i = next;
            }
            if self.kind(i) == Some(TokenKind::Comma) && self.depth[i] == level {
                i += 1;
            } else {
                return;
            }
        }
    }
}

enum Operand {
    Owner(Option<String>),
    Literal(String),
}
