//! Approval policy.
//!
//! A static rule table maps each statement kind to a rule; evaluating a rule
//! is a pure function of the descriptor, the caller and the schema registry.

use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;
use crate::schema::SchemaRegistry;
use crate::sql::{is_owner_column, OwnerBinding, StatementDescriptor, StatementKind};

/// Approval switches.
///
/// Schema changes are reviewed for every caller by default. Setting
/// `review_trusted_ddl = false` lets trusted callers run DDL directly, which
/// matches the "trusted callers run anything" reading of the trust model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Queue DDL even when the caller is trusted.
    #[serde(default = "default_review_trusted_ddl")]
    pub review_trusted_ddl: bool,
}

fn default_review_trusted_ddl() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            review_trusted_ddl: default_review_trusted_ddl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Execute,
    RequireApproval(String),
}

impl Decision {
    fn review(reason: impl Into<String>) -> Self {
        Decision::RequireApproval(reason.into())
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self, Decision::RequireApproval(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Reads are scoped by the rewriter, not reviewed.
    Execute,
    /// Auto-approved only when the effect is confined to the caller's rows.
    OwnerScoped,
    /// Schema changes.
    SchemaChange,
    ReviewUnlessTrusted,
}

const RULES: &[(StatementKind, Rule)] = &[
    (StatementKind::Select, Rule::Execute),
    (StatementKind::Insert, Rule::OwnerScoped),
    (StatementKind::Update, Rule::OwnerScoped),
    (StatementKind::Delete, Rule::OwnerScoped),
    (StatementKind::CreateTable, Rule::SchemaChange),
    (StatementKind::DropTable, Rule::SchemaChange),
    (StatementKind::AlterTable, Rule::SchemaChange),
    (StatementKind::Other, Rule::ReviewUnlessTrusted),
];

fn rule_for(kind: StatementKind) -> Rule {
    RULES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, rule)| *rule)
        .unwrap_or(Rule::ReviewUnlessTrusted)
}

#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    config: PolicyConfig,
}

impl ApprovalPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn decide(
        &self,
        desc: &StatementDescriptor,
        principal: PrincipalId,
        trusted: bool,
        registry: &SchemaRegistry,
    ) -> Decision {
        match rule_for(desc.kind) {
            Rule::Execute => Decision::Execute,
            Rule::SchemaChange if trusted && !self.config.review_trusted_ddl => Decision::Execute,
            Rule::SchemaChange => Decision::review("schema changes require review"),
            Rule::ReviewUnlessTrusted if trusted => Decision::Execute,
            Rule::ReviewUnlessTrusted => {
                Decision::review(format!("{} statements require review", desc.kind))
            }
            Rule::OwnerScoped if trusted => Decision::Execute,
            Rule::OwnerScoped => owner_scoped(desc, principal, registry),
        }
    }
}

fn owner_scoped(desc: &StatementDescriptor, principal: PrincipalId, registry: &SchemaRegistry) -> Decision {
    let Some(target) = desc.target() else {
        return Decision::review("statement has no target table");
    };
    if !registry.has_user_id(&target.name) {
        return Decision::review(format!("table '{}' has no user_id column", target.name));
    }
    if let Some(nested) = desc.nested_tables.iter().find(|t| registry.has_user_id(t)) {
        return Decision::review(format!("statement reads user-owned table '{}'", nested));
    }
    if desc.on_conflict {
        return Decision::review("ON CONFLICT may modify rows owned by others");
    }
    if desc.or_action.is_some_and(|a| a.may_displace_rows()) {
        return Decision::review("OR REPLACE may delete rows owned by others");
    }

    match desc.kind {
        StatementKind::Insert => insert_rows(desc, principal),
        _ => filtered_rows(desc, principal),
    }
}

fn insert_rows(desc: &StatementDescriptor, principal: PrincipalId) -> Decision {
    let Some(owner_idx) = desc.columns.iter().position(|c| is_owner_column(c)) else {
        return Decision::review("INSERT does not set user_id");
    };
    for (n, row) in desc.value_rows().enumerate() {
        let value = row.get(owner_idx).map(String::as_str).unwrap_or("");
        if !principal.matches_literal(value) {
            return Decision::review(format!(
                "INSERT row {} sets user_id to {} instead of {}",
                n + 1,
                value,
                principal
            ));
        }
    }
    Decision::Execute
}

/// UPDATE and DELETE: one table, a WHERE pinned to exactly this principal.
fn filtered_rows(desc: &StatementDescriptor, principal: PrincipalId) -> Decision {
    if desc.tables.len() != 1 {
        return Decision::review("statement references more than one table");
    }
    let target = &desc.tables[0];
    let Some(cond) = &desc.where_condition else {
        return Decision::review("no WHERE clause; every row would be affected");
    };
    if cond.has_or {
        return Decision::review("WHERE clause contains OR");
    }
    if cond.loose_owner_reference {
        return Decision::review("user_id is constrained by more than a plain equality");
    }

    let mut pinned = false;
    for binding in &cond.bindings {
        let OwnerBinding::Literal { qualifier, value } = binding else {
            continue;
        };
        if let Some(q) = qualifier {
            if !target.answers_to(q) {
                return Decision::review(format!("user_id qualified by unknown table '{}'", q));
            }
        }
        if !principal.matches_literal(value) {
            return Decision::review(format!("WHERE clause binds user_id to {}", value));
        }
        pinned = true;
    }
    if !pinned {
        return Decision::review(format!("WHERE clause does not bind user_id to {}", principal));
    }

    for assignment in desc.assignments.iter().filter(|a| a.targets_owner()) {
        if !is_owner_column(&assignment.column) || !principal.matches_literal(&assignment.value) {
            return Decision::review("UPDATE reassigns user_id");
        }
    }

    Decision::Execute
}
