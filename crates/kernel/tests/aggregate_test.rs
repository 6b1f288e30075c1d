#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Aggregate compiler integration tests.

mod support;

use serde_json::json;

use quarry_kernel::{AggregateRequest, AggregateSpec, Filter, QueryError, ServiceError};
use quarry_test_utils::{assert, invoice_row, test_row};

fn invoices() -> Vec<serde_json::Value> {
    vec![
        invoice_row(1, "paid", 5),
        invoice_row(2, "paid", 7),
        invoice_row(3, "open", 4),
    ]
}

fn request(value: serde_json::Value) -> AggregateRequest {
    serde_json::from_value(value).unwrap()
}

#[test]
fn count_and_sum_compile_to_aliased_selects() {
    let spec = AggregateSpec {
        count: vec!["id".to_string()],
        sum: vec!["amount".to_string()],
        ..Default::default()
    };
    let (sql, values) = support::compiler()
        .compile_aggregate("invoice", &Filter::default(), &spec)
        .unwrap()
        .to_sql();
    assert_eq!(
        sql,
        "SELECT COUNT(\"i\".\"id\") AS \"COUNT_id\", SUM(\"i\".\"amount\") AS \"SUM_amount\" \
         FROM \"invoices\" AS \"i\""
    );
    assert!(values.0.is_empty());
}

#[test]
fn aggregate_filters_become_where() {
    let filter: Filter = serde_json::from_value(json!({ "status": { "eq": "paid" } })).unwrap();
    let spec = AggregateSpec {
        max: vec!["amount".to_string()],
        ..Default::default()
    };
    let (sql, values) = support::compiler()
        .compile_aggregate("invoice", &filter, &spec)
        .unwrap()
        .to_sql();
    assert::contains(&sql, "WHERE (\"i\".\"status\" = $1)");
    assert_eq!(values.0.len(), 1);
}

#[test]
fn empty_spec_is_rejected() {
    let err = support::compiler()
        .compile_aggregate("invoice", &Filter::default(), &AggregateSpec::default())
        .unwrap_err();
    assert_eq!(err, QueryError::NoAggregateFields);
}

#[tokio::test]
async fn count_and_sum_reshape_rows() {
    let service = support::service(vec![("invoice", invoices())]);
    let responses = service
        .aggregate(&request(json!({
            "entity": "invoice",
            "filter": { "status": { "eq": "paid" } },
            "count": ["id"],
            "sum": ["amount"],
        })))
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert::json_eq(
        &serde_json::to_value(&responses[0]).unwrap(),
        &json!({ "count": { "id": 2 }, "sum": { "amount": 12 } }),
    );
}

#[tokio::test]
async fn grouped_aggregates_come_back_ordered_by_group() {
    let service = support::service(vec![("invoice", invoices())]);
    let responses = service
        .aggregate(&request(json!({
            "entity": "invoice",
            "count": ["id"],
            "max": ["amount"],
            "avg": ["amount"],
            "groupBy": ["status"],
        })))
        .await
        .unwrap();

    let shaped: Vec<serde_json::Value> = responses
        .iter()
        .map(|r| serde_json::to_value(r).unwrap())
        .collect();
    assert_eq!(
        shaped,
        vec![
            json!({
                "groupBy": { "status": "open" },
                "count": { "id": 1 },
                "avg": { "amount": 4.0 },
                "max": { "amount": 4 },
            }),
            json!({
                "groupBy": { "status": "paid" },
                "count": { "id": 2 },
                "avg": { "amount": 6.0 },
                "max": { "amount": 7 },
            }),
        ]
    );
}

#[tokio::test]
async fn aggregates_over_no_rows() {
    let service = support::service(vec![("invoice", invoices())]);
    let responses = service
        .aggregate(&request(json!({
            "entity": "invoice",
            "filter": { "status": { "eq": "void" } },
            "count": ["id"],
            "sum": ["amount"],
        })))
        .await
        .unwrap();
    assert_eq!(responses[0].count["id"], json!(0));
    assert_eq!(responses[0].sum["amount"], serde_json::Value::Null);
}

#[tokio::test]
async fn relation_filters_aggregate_each_parent_once() {
    let rows = vec![
        test_row("parent", 4)
            .with_relation("alpha")
            .with_relation("alpine")
            .with_relation("alps")
            .to_json(),
        test_row("other", 9).with_relation("beta").to_json(),
    ];
    let service = support::service(vec![("test", rows)]);
    let req = request(json!({
        "entity": "test",
        "filter": { "relations": { "relation_name": { "like": "al%" } } },
        "count": ["number_type"],
        "sum": ["number_type"],
    }));

    let (sql, _) = service
        .compiler()
        .compile_aggregate(&req.entity, &req.filter, &req.spec)
        .unwrap()
        .to_sql();
    assert::contains(&sql, "FROM (SELECT DISTINCT \"te\".* FROM \"test_entity\" AS \"te\" LEFT JOIN");
    assert::contains(&sql, ") AS \"te\"");

    let responses = service.aggregate(&req).await.unwrap();
    assert::json_eq(
        &serde_json::to_value(&responses[0]).unwrap(),
        &json!({ "count": { "number_type": 1 }, "sum": { "number_type": 4 } }),
    );
}

#[tokio::test]
async fn unknown_entity_fails_before_execution() {
    let service = support::service(vec![]);
    let err = service
        .aggregate(&request(json!({ "entity": "ledger", "count": ["id"] })))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Query(QueryError::UnknownEntity(_))
    ));
}
