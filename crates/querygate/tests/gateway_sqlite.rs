//! End-to-end gateway behavior against a seeded in-memory SQLite store.

mod harness;

use harness::{direct, pharmacy_gateway, seeded_sqlite, demo_config, tight_limits};
use querygate::{
    DbValue, Gateway, GatewayError, ListScope, NotUndoableReason, PrincipalId, QueryStatus,
    Submission,
};
use tempfile::TempDir;

fn user_ids(submission: &Submission) -> Vec<DbValue> {
    let output = submission.output().expect("executed");
    (0..output.row_count())
        .map(|row| output.cell(row, "user_id").cloned().expect("user_id column"))
        .collect()
}

#[tokio::test]
async fn test_select_is_pinned_to_the_caller() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit("SELECT * FROM purchases;", PrincipalId(10), false)
        .await
        .unwrap();

    match &submission {
        Submission::Executed { effective_sql, .. } => {
            assert_eq!(effective_sql, "SELECT * FROM purchases WHERE purchases.user_id = 10;");
        }
        other => panic!("expected execution, got {:?}", other),
    }
    let ids = user_ids(&submission);
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|v| *v == DbValue::Integer(10)));
}

#[tokio::test]
async fn test_joined_select_is_scoped_through_the_link() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit(
            "SELECT p.user_id, u.email FROM purchases p JOIN users u ON p.user_id = u.user_id",
            PrincipalId(5),
            false,
        )
        .await
        .unwrap();

    let Submission::Executed { effective_sql, output, .. } = &submission else {
        panic!("expected execution");
    };
    assert!(effective_sql.ends_with("WHERE p.user_id = 5"));
    assert_eq!(output.row_count(), 1);
    assert_eq!(output.cell(0, "email"), Some(&DbValue::from("chloe@example.com")));
}

#[tokio::test]
async fn test_already_scoped_select_is_untouched() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let sql = "SELECT drug_id FROM purchases WHERE user_id = 10";
    let submission = gateway.submit(sql, PrincipalId(10), false).await.unwrap();
    let Submission::Executed { effective_sql, .. } = submission else {
        panic!("expected execution");
    };
    assert_eq!(effective_sql, sql);
}

#[tokio::test]
async fn test_trusted_select_sees_everything() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit("SELECT user_id FROM purchases", PrincipalId(1), true)
        .await
        .unwrap();
    assert_eq!(user_ids(&submission).len(), 4);
}

#[tokio::test]
async fn test_own_update_runs_and_foreign_update_waits() {
    let (gateway, backend) = pharmacy_gateway().await;
    let sql = "UPDATE users SET phone = '+33612345678' WHERE user_id = 2";

    let own = gateway.submit(sql, PrincipalId(2), false).await.unwrap();
    assert!(!own.is_pending());
    assert_eq!(own.output().unwrap().rows_affected, 1);

    direct(&backend, "UPDATE users SET phone = 'reset' WHERE user_id = 2").await;
    let foreign = gateway.submit(sql, PrincipalId(5), false).await.unwrap();
    let Submission::Pending { id, reason } = &foreign else {
        panic!("expected approval to be required");
    };
    assert!(reason.contains("user_id"));

    let phone = direct(&backend, "SELECT phone FROM users WHERE user_id = 2").await;
    assert_eq!(phone.cell(0, "phone"), Some(&DbValue::from("reset")));

    let pending = gateway.pending_queries().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(&pending[0].id, id);

    let output = gateway.approve(id).await.unwrap();
    assert_eq!(output.rows_affected, 1);
    let phone = direct(&backend, "SELECT phone FROM users WHERE user_id = 2").await;
    assert_eq!(phone.cell(0, "phone"), Some(&DbValue::from("+33612345678")));

    assert!(gateway.pending_queries().await.is_empty());
    assert_eq!(gateway.get(id).await.unwrap().status, QueryStatus::Executed);
}

#[tokio::test]
async fn test_rejected_statement_never_runs() {
    let (gateway, backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit("DELETE FROM purchases", PrincipalId(10), false)
        .await
        .unwrap();
    let id = submission.id().clone();
    assert!(submission.is_pending());

    gateway.reject(&id, Some("not today".into())).await.unwrap();

    let record = gateway.get(&id).await.unwrap();
    assert_eq!(record.status, QueryStatus::Rejected);
    assert_eq!(record.error.as_deref(), Some("not today"));

    let err = gateway.approve(&id).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidTransition(_)));

    let count = direct(&backend, "SELECT COUNT(*) AS n FROM purchases").await;
    assert_eq!(count.cell(0, "n"), Some(&DbValue::Integer(4)));
}

#[tokio::test]
async fn test_insert_undo_round_trip() {
    let (gateway, backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit(
            "INSERT INTO purchases (user_id, drug_id, quantity, unit_price, total_amount, purchase_date) \
             VALUES (2, 2, 10, 0.01, 0.1, '2025-07-01')",
            PrincipalId(1),
            true,
        )
        .await
        .unwrap();
    let id = submission.id().clone();

    let count = direct(&backend, "SELECT COUNT(*) AS n FROM purchases WHERE user_id = 2").await;
    assert_eq!(count.cell(0, "n"), Some(&DbValue::Integer(2)));

    let undo_sql = gateway.undo(&id).await.unwrap();
    assert_eq!(
        undo_sql,
        "DELETE FROM purchases WHERE user_id = 2 AND drug_id = 2 AND quantity = 10 \
         AND unit_price = 0.01 AND total_amount = 0.1 AND purchase_date = '2025-07-01'"
    );

    let count = direct(&backend, "SELECT COUNT(*) AS n FROM purchases WHERE user_id = 2").await;
    assert_eq!(count.cell(0, "n"), Some(&DbValue::Integer(1)));
    assert_eq!(gateway.get(&id).await.unwrap().status, QueryStatus::Undone);

    assert!(matches!(
        gateway.undo(&id).await.unwrap_err(),
        GatewayError::InvalidTransition(_)
    ));
}

#[tokio::test]
async fn test_update_cannot_be_undone() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit("UPDATE users SET phone = '0' WHERE user_id = 2", PrincipalId(2), false)
        .await
        .unwrap();
    let id = submission.id().clone();

    let err = gateway.undo(&id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::NotUndoable {
            reason: NotUndoableReason::NoPriorState,
            ..
        }
    ));

    let record = gateway.get(&id).await.unwrap();
    assert_eq!(record.status, QueryStatus::Executed);
    assert!(record.undo_error.is_some());
}

async fn purchase_count(backend: &querygate_db::SqliteBackend, filter: &str) -> DbValue {
    let sql = format!("SELECT COUNT(*) AS n FROM purchases WHERE {}", filter);
    direct(backend, &sql).await.cell(0, "n").cloned().expect("count")
}

#[tokio::test]
async fn test_or_replace_cannot_displace_another_users_row() {
    let (gateway, backend) = pharmacy_gateway().await;

    let insert = gateway
        .submit(
            "INSERT OR REPLACE INTO purchases (purchase_id, user_id, drug_id, quantity) VALUES (1, 10, 1, 1)",
            PrincipalId(10),
            false,
        )
        .await
        .unwrap();
    assert!(insert.is_pending());

    let update = gateway
        .submit(
            "UPDATE OR REPLACE purchases SET purchase_id = 1 WHERE user_id = 10 AND purchase_id = 3",
            PrincipalId(10),
            false,
        )
        .await
        .unwrap();
    assert!(update.is_pending());

    assert_eq!(purchase_count(&backend, "user_id = 2").await, DbValue::Integer(1));
    assert_eq!(purchase_count(&backend, "purchase_id = 1 AND user_id = 2").await, DbValue::Integer(1));

    gateway.approve(insert.id()).await.unwrap();
    let err = gateway.undo(insert.id()).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::NotUndoable {
            reason: NotUndoableReason::Unsupported,
            ..
        }
    ));
}

#[tokio::test]
async fn test_evaluated_insert_values_are_not_undone() {
    let (gateway, backend) = pharmacy_gateway().await;

    let submission = gateway
        .submit(
            "INSERT INTO purchases (user_id, drug_id, quantity, purchase_date) \
             VALUES (10, 3, 1, strftime('%Y-%m-%d %H:%M:%f','now'))",
            PrincipalId(10),
            false,
        )
        .await
        .unwrap();
    let id = submission.id().clone();
    assert!(!submission.is_pending());

    let err = gateway.undo(&id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::NotUndoable {
            reason: NotUndoableReason::Unsupported,
            ..
        }
    ));

    let record = gateway.get(&id).await.unwrap();
    assert_eq!(record.status, QueryStatus::Executed);
    assert_eq!(purchase_count(&backend, "user_id = 10 AND drug_id = 3").await, DbValue::Integer(1));
}

#[tokio::test]
async fn test_undo_refuses_to_delete_a_matching_older_row() {
    let (gateway, backend) = pharmacy_gateway().await;

    // Identical to a seeded purchase, apart from the generated key.
    let submission = gateway
        .submit(
            "INSERT INTO purchases (user_id, drug_id, quantity, unit_price, total_amount, purchase_date) \
             VALUES (10, 2, 30, 0.01, 0.3, '2025-06-10')",
            PrincipalId(10),
            false,
        )
        .await
        .unwrap();
    let id = submission.id().clone();
    let filter = "user_id = 10 AND drug_id = 2";
    assert_eq!(purchase_count(&backend, filter).await, DbValue::Integer(2));

    let err = gateway.undo(&id).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::UndoMismatch {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert_eq!(err.code(), "undo_mismatch");
    assert_eq!(purchase_count(&backend, filter).await, DbValue::Integer(2));

    let record = gateway.get(&id).await.unwrap();
    assert_eq!(record.status, QueryStatus::Executed);
    assert!(record.undo_error.unwrap().contains("expected 1"));
}

#[tokio::test]
async fn test_unreadable_from_clause_is_rejected_without_running() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let err = gateway
        .submit("SELECT * FROM (SELECT * FROM purchases)", PrincipalId(10), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "parse_error");

    let id = err.query_id().cloned().expect("rejection is recorded");
    let record = gateway.get(&id).await.unwrap();
    assert_eq!(record.status, QueryStatus::Rejected);
    assert!(record.rows_affected.is_none());
}

#[tokio::test]
async fn test_store_errors_pass_through() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let err = gateway
        .submit("SELECT * FROM no_such_table", PrincipalId(3), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "execution_error");
    assert!(err.to_string().contains("no such table"));

    let record = gateway.get(err.query_id().unwrap()).await.unwrap();
    assert_eq!(record.status, QueryStatus::Rejected);
    assert!(record.error.unwrap().contains("no such table"));
}

#[tokio::test]
async fn test_result_rows_are_capped() {
    let backend = seeded_sqlite().await;
    let gateway = Gateway::new(backend, demo_config().registry().unwrap())
        .with_limits(tight_limits(2, 5_000));

    let submission = gateway
        .submit("SELECT * FROM purchases", PrincipalId(1), true)
        .await
        .unwrap();
    let output = submission.output().unwrap();
    assert_eq!(output.row_count(), 2);
    assert!(output.truncated);
}

#[tokio::test]
async fn test_listing_is_ordered_and_filtered() {
    let (gateway, _backend) = pharmacy_gateway().await;

    gateway.submit("SELECT * FROM drugs", PrincipalId(2), false).await.unwrap();
    gateway.submit("DELETE FROM sessions", PrincipalId(5), false).await.unwrap();
    let _ = gateway.submit("SELEC nothing", PrincipalId(2), false).await;
    gateway.submit("SELECT * FROM users", PrincipalId(2), false).await.unwrap();

    let all = gateway.list_queries(ListScope::All).await;
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));

    let mine: Vec<QueryStatus> = gateway
        .list_queries(ListScope::Principal(PrincipalId(2)))
        .await
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        mine,
        vec![QueryStatus::Executed, QueryStatus::Rejected, QueryStatus::Executed]
    );
}

#[tokio::test]
async fn test_audit_trail_follows_the_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let mut config = demo_config();
    config.audit_log_path = Some(tmp.path().join("audit.ndjson"));
    let gateway = Gateway::from_config(seeded_sqlite().await, &config).unwrap();

    let pending = gateway
        .submit("UPDATE users SET phone = '1' WHERE user_id = 2", PrincipalId(5), false)
        .await
        .unwrap();
    gateway.approve(pending.id()).await.unwrap();
    let _ = gateway.undo(pending.id()).await;

    let content = std::fs::read_to_string(tmp.path().join("audit.ndjson")).unwrap();
    let events: Vec<String> = content
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(events, vec!["submitted", "queued", "approved", "undo_failed"]);
}
