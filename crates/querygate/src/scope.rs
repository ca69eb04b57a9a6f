//! Row-scope rewriting.
//!
//! Every SELECT from an untrusted principal that reads a `user_id` table must
//! carry `<alias>.user_id = <principal>` for that table, or be tied to such a
//! table through a `a.user_id = b.user_id` equality. The rewriter splices the
//! missing predicates into the original text and then re-classifies the
//! result to confirm the statement is scoped. Anything it cannot place is a
//! [`BypassRisk`]; the statement must not run.

use thiserror::Error;

use crate::ids::PrincipalId;
use crate::schema::{SchemaRegistry, OWNER_COLUMN};
use crate::sql::{classify, OwnerBinding, StatementDescriptor, StatementKind, TableRef};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct BypassRisk {
    pub reason: String,
}

impl BypassRisk {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Effective SQL for `desc` submitted by `principal`.
///
/// Trusted callers and statements other than SELECT get the text verbatim.
pub fn scope_select(
    desc: &StatementDescriptor,
    registry: &SchemaRegistry,
    principal: PrincipalId,
    trusted: bool,
) -> Result<String, BypassRisk> {
    if trusted || desc.kind != StatementKind::Select {
        return Ok(desc.sql.clone());
    }

    if let Some(nested) = desc
        .nested_tables
        .iter()
        .find(|name| registry.has_user_id(name))
    {
        return Err(BypassRisk::new(format!(
            "'{}' is read inside a subquery or compound select and cannot be scoped",
            nested
        )));
    }

    let scoping = Scoping::analyze(desc, registry, principal);
    if scoping.tables.is_empty() {
        return Ok(desc.sql.clone());
    }
    if desc.compound {
        return Err(BypassRisk::new(
            "compound select over user-owned tables cannot be scoped",
        ));
    }

    let predicates = scoping.missing_predicates();
    if predicates.is_empty() {
        return Ok(desc.sql.clone());
    }

    let rewritten = splice(desc, &predicates.join(" AND "));
    verify(&rewritten, registry, principal)?;

    tracing::debug!(principal = %principal, predicates = predicates.len(), "Scoped SELECT");
    Ok(rewritten)
}

/// Whether `desc` already restricts every user-owned table to `principal`.
pub fn is_scoped(desc: &StatementDescriptor, registry: &SchemaRegistry, principal: PrincipalId) -> bool {
    Scoping::analyze(desc, registry, principal)
        .missing_predicates()
        .is_empty()
}

fn splice(desc: &StatementDescriptor, clause: &str) -> String {
    let sql = desc.sql.as_str();
    match &desc.where_condition {
        None => {
            let at = desc.scope_insert_at;
            format!("{} WHERE {}{}", &sql[..at], clause, &sql[at..])
        }
        Some(cond) if cond.has_or => format!(
            "{}({}) AND {}{}",
            &sql[..cond.start],
            &sql[cond.start..cond.end],
            clause,
            &sql[cond.end..]
        ),
        Some(cond) => format!("{} AND {}{}", &sql[..cond.end], clause, &sql[cond.end..]),
    }
}

fn verify(rewritten: &str, registry: &SchemaRegistry, principal: PrincipalId) -> Result<(), BypassRisk> {
    let desc = classify(rewritten).map_err(|e| {
        BypassRisk::new(format!("rewritten statement no longer parses: {}", e))
    })?;
    if !is_scoped(&desc, registry, principal) {
        return Err(BypassRisk::new("rewritten statement is still not scoped"));
    }
    Ok(())
}

/// User-owned tables of a SELECT and which of them are already pinned.
struct Scoping<'a> {
    principal: PrincipalId,
    tables: Vec<&'a TableRef>,
    bound: Vec<bool>,
    links: Vec<(usize, usize)>,
}

impl<'a> Scoping<'a> {
    fn analyze(desc: &'a StatementDescriptor, registry: &SchemaRegistry, principal: PrincipalId) -> Self {
        let tables: Vec<&TableRef> = desc
            .tables
            .iter()
            .filter(|t| registry.has_user_id(&t.name))
            .collect();
        let mut scoping = Self {
            principal,
            bound: vec![false; tables.len()],
            tables,
            links: Vec::new(),
        };

        // Literal pins only count in WHERE: an ON predicate does not filter
        // the preserved side of an outer join.
        if let Some(cond) = &desc.where_condition {
            for binding in &cond.bindings {
                if let OwnerBinding::Literal { qualifier, value } = binding {
                    if let Some(idx) = scoping.resolve(qualifier.as_deref()) {
                        if principal.matches_literal(value) {
                            scoping.bound[idx] = true;
                        }
                    }
                }
            }
        }

        let conditions = desc.where_condition.iter().chain(desc.join_conditions.iter());
        for cond in conditions {
            for binding in &cond.bindings {
                if let OwnerBinding::Link { left, right } = binding {
                    let pair = (scoping.resolve(left.as_deref()), scoping.resolve(right.as_deref()));
                    if let (Some(a), Some(b)) = pair {
                        if a != b {
                            scoping.links.push((a, b));
                        }
                    }
                }
            }
        }

        scoping.propagate();
        scoping
    }

    /// Index of the user-owned table a `user_id` reference points at. An
    /// unqualified reference resolves only when there is a single candidate.
    fn resolve(&self, qualifier: Option<&str>) -> Option<usize> {
        match qualifier {
            Some(q) => self.tables.iter().position(|t| t.answers_to(q)),
            None if self.tables.len() == 1 => Some(0),
            None => None,
        }
    }

    fn propagate(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for &(a, b) in &self.links {
                if self.bound[a] != self.bound[b] {
                    self.bound[a] = true;
                    self.bound[b] = true;
                    changed = true;
                }
            }
        }
    }

    /// Predicates still needed, scoping table first.
    fn missing_predicates(mut self) -> Vec<String> {
        let mut predicates = Vec::new();
        for idx in 0..self.tables.len() {
            if self.bound[idx] {
                continue;
            }
            predicates.push(format!(
                "{}.{} = {}",
                self.tables[idx].alias, OWNER_COLUMN, self.principal
            ));
            self.bound[idx] = true;
            self.propagate();
        }
        predicates
    }
}
