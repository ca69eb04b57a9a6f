//! JSON-lines front end driven with in-memory streams.

mod harness;

use harness::pharmacy_gateway;
use querygate::protocol;
use serde_json::{json, Value};

async fn exchange(gateway: &querygate::Gateway, requests: &[Value]) -> Vec<Value> {
    let input: String = requests.iter().map(|r| format!("{}\n", r)).collect();
    let mut output = Vec::new();

    let handled = protocol::serve(gateway, input.as_bytes(), &mut output).await.unwrap();
    assert_eq!(handled, requests.len());

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_review_cycle_over_the_wire() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let replies = exchange(
        &gateway,
        &[json!({
            "op": "submit",
            "sql": "UPDATE users SET phone = '+33612345678' WHERE user_id = 2",
            "principal": 5
        })],
    )
    .await;
    assert_eq!(replies[0]["ok"], true);
    assert_eq!(replies[0]["result"]["outcome"], "pending");
    let id = replies[0]["result"]["id"].as_str().unwrap().to_string();

    let replies = exchange(
        &gateway,
        &[
            json!({ "op": "pending" }),
            json!({ "op": "approve", "id": id }),
            json!({ "op": "approve", "id": id }),
            json!({ "op": "undo", "id": id }),
            json!({ "op": "list", "principal": 5 }),
        ],
    )
    .await;

    assert_eq!(replies[0]["result"][0]["id"], id.as_str());
    assert_eq!(replies[0]["result"][0]["status"], "PENDING_APPROVAL");

    assert_eq!(replies[1]["ok"], true);
    assert_eq!(replies[1]["result"]["output"]["rows_affected"], 1);

    assert_eq!(replies[2]["ok"], false);
    assert_eq!(replies[2]["error"]["code"], "invalid_transition");

    assert_eq!(replies[3]["error"]["code"], "not_undoable");
    assert_eq!(replies[3]["error"]["id"], id.as_str());

    let listed = replies[4]["result"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "EXECUTED");
    assert_eq!(listed[0]["principal_id"], 5);
}

#[tokio::test]
async fn test_executed_rows_and_bad_lines() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let replies = exchange(
        &gateway,
        &[
            json!({ "op": "submit", "sql": "SELECT drug_id FROM purchases ORDER BY drug_id", "principal": 10 }),
            json!({ "op": "submit", "sql": "SELECT * FROM (SELECT 1)", "principal": 10 }),
            json!({ "op": "observe", "principal": 10 }),
            json!({ "op": "truncate_everything" }),
        ],
    )
    .await;

    let result = &replies[0]["result"];
    assert_eq!(result["outcome"], "executed");
    assert_eq!(
        result["effective_sql"],
        "SELECT drug_id FROM purchases WHERE purchases.user_id = 10 ORDER BY drug_id"
    );
    assert_eq!(result["output"]["columns"], json!(["drug_id"]));
    assert_eq!(result["output"]["rows"], json!([[1], [2]]));

    assert_eq!(replies[1]["error"]["code"], "parse_error");
    assert!(replies[1]["error"]["id"].is_string());

    assert_eq!(replies[2]["result"]["lag_ms"], 0);

    assert_eq!(replies[3]["ok"], false);
    assert_eq!(replies[3]["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_reject_over_the_wire() {
    let (gateway, _backend) = pharmacy_gateway().await;

    let pending = gateway
        .submit("DELETE FROM purchases", querygate::PrincipalId(2), false)
        .await
        .unwrap();
    let id = pending.id().to_string();

    let replies = exchange(
        &gateway,
        &[
            json!({ "op": "reject", "id": id, "reason": "too broad" }),
            json!({ "op": "list" }),
        ],
    )
    .await;
    assert_eq!(replies[0]["ok"], true);
    assert_eq!(replies[1]["result"][0]["status"], "REJECTED");
    assert_eq!(replies[1]["result"][0]["error"], "too broad");
}
