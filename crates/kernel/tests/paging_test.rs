#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Cursor pagination integration tests.
//!
//! `todo` pages by keyset (key set `id`); `test` has no key set and pages
//! positionally.

mod support;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};

use quarry_kernel::paging::{Cursor, KeysetField};
use quarry_kernel::{
    ConnectionRequest, Filter, PagingArgs, PagingPolicy, QueryError, ServiceError, SortField,
};
use quarry_test_utils::{assert, test_row, todo_row};

fn foos() -> Vec<Value> {
    vec![
        todo_row(1, "foo1", Some(1)),
        todo_row(2, "foo2", Some(2)),
        todo_row(3, "foo3", Some(3)),
    ]
}

fn request(entity: &str, sort: Vec<SortField>, paging: PagingArgs) -> ConnectionRequest {
    ConnectionRequest {
        entity: entity.to_string(),
        filter: Filter::default(),
        sort,
        paging,
        total_count: false,
    }
}

fn nodes(connection: &quarry_kernel::Connection<Value>) -> Vec<Value> {
    connection.nodes().cloned().collect()
}

// -------------------------------------------------------------------------
// Keyset paging
// -------------------------------------------------------------------------

#[tokio::test]
async fn keyset_first_page_and_next_page() {
    let service = support::service(vec![("todo", foos())]);

    let first = service
        .query_connection(&request("todo", vec![], PagingArgs::first(2)))
        .await
        .unwrap();
    assert::field_values(&nodes(&first), "title", &[json!("foo1"), json!("foo2")]);
    assert!(first.page_info.has_next_page);
    assert!(!first.page_info.has_previous_page);

    let after_foo1 = first.edges[0].cursor.clone();
    let next = service
        .query_connection(&request("todo", vec![], PagingArgs::first(2).after(after_foo1)))
        .await
        .unwrap();
    assert::field_values(&nodes(&next), "title", &[json!("foo2"), json!("foo3")]);
    assert!(!next.page_info.has_next_page);
    assert!(next.page_info.has_previous_page);
}

#[tokio::test]
async fn edge_cursors_are_the_rows_own_cursor() {
    let service = support::service(vec![("todo", foos())]);
    let sort = vec![SortField::desc("priority")];
    let page = service
        .query_connection(&request("todo", sort, PagingArgs::first(3)))
        .await
        .unwrap();

    let effective = vec![SortField::desc("priority"), SortField::asc("id")];
    for edge in &page.edges {
        let recomputed = Cursor::for_row(edge.node.as_object().unwrap(), &effective).encode();
        assert_eq!(edge.cursor, recomputed);

        let decoded = Cursor::decode(&edge.cursor).unwrap();
        assert_eq!(
            decoded,
            Cursor::Keyset(vec![
                KeysetField {
                    field: "priority".to_string(),
                    value: edge.node["priority"].clone(),
                },
                KeysetField {
                    field: "id".to_string(),
                    value: edge.node["id"].clone(),
                },
            ])
        );
    }
    assert_eq!(page.page_info.start_cursor.as_deref(), Some(page.edges[0].cursor.as_str()));
    assert_eq!(page.page_info.end_cursor.as_deref(), Some(page.edges[2].cursor.as_str()));
}

fn mixed_todos() -> Vec<Value> {
    vec![
        todo_row(1, "b", Some(2)),
        todo_row(2, "a", Some(1)),
        todo_row(3, "c", None),
        todo_row(4, "a", Some(2)),
        todo_row(5, "c", Some(1)),
        todo_row(6, "b", None),
        todo_row(7, "a", Some(1)),
        todo_row(8, "d", Some(2)),
    ]
}

#[tokio::test]
async fn seeking_visits_every_row_once_in_order() {
    // [priority ASC, title DESC], nulls last, id breaks ties.
    let sort = vec![SortField::asc("priority"), SortField::desc("title")];
    let service = support::service(vec![("todo", mixed_todos())]);

    let mut effective = sort.clone();
    effective.push(SortField::asc("id"));
    let expected = service
        .query_many("todo", &Filter::default(), &effective, None, 0)
        .await
        .unwrap();

    let mut seen = Vec::new();
    let mut paging = PagingArgs::first(3);
    loop {
        let page = service
            .query_connection(&request("todo", sort.clone(), paging.clone()))
            .await
            .unwrap();
        seen.extend(nodes(&page));
        if !page.page_info.has_next_page {
            break;
        }
        let end = page.page_info.end_cursor.clone().unwrap();
        paging = PagingArgs::first(3).after(end);
    }

    assert_eq!(seen, expected);
    let ids: Vec<Value> = seen.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(
        ids,
        [5, 2, 7, 8, 1, 4, 3, 6].map(|id| json!(id)).to_vec()
    );
}

#[tokio::test]
async fn backward_keyset_page_returns_rows_in_forward_order() {
    let service = support::service(vec![("todo", mixed_todos())]);
    let sort = vec![SortField::asc("id")];

    let all = service
        .query_connection(&request("todo", sort.clone(), PagingArgs::first(8)))
        .await
        .unwrap();
    let before_fifth = all.edges[4].cursor.clone();

    let page = service
        .query_connection(&request(
            "todo",
            sort.clone(),
            PagingArgs::last(2).before(before_fifth),
        ))
        .await
        .unwrap();
    assert::field_values(&nodes(&page), "id", &[json!(3), json!(4)]);
    assert!(page.page_info.has_next_page);
    assert!(page.page_info.has_previous_page);

    let tail = service
        .query_connection(&request("todo", sort, PagingArgs::last(2)))
        .await
        .unwrap();
    assert::field_values(&nodes(&tail), "id", &[json!(7), json!(8)]);
    assert!(!tail.page_info.has_next_page);
    assert!(tail.page_info.has_previous_page);
}

#[test]
fn keyset_cursor_must_match_the_sort() {
    let cursor = Cursor::for_row(
        json!({ "title": "foo1" }).as_object().unwrap(),
        &[SortField::asc("title")],
    );
    let err = support::compiler()
        .compile(
            "todo",
            &Filter::default(),
            &[],
            &PagingArgs::first(2).after(cursor.encode()),
        )
        .unwrap_err();
    assert!(matches!(err, QueryError::CursorDecode(_)), "{err:?}");
}

// -------------------------------------------------------------------------
// Positional paging
// -------------------------------------------------------------------------

fn tests() -> Vec<Value> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .enumerate()
        .map(|(i, name)| test_row(name, i as i64).to_json())
        .collect()
}

#[tokio::test]
async fn positional_pages_use_index_cursors() {
    let service = support::service(vec![("test", tests())]);
    let sort = vec![SortField::asc("string_type")];

    let first = service
        .query_connection(&request("test", sort.clone(), PagingArgs::first(2)))
        .await
        .unwrap();
    assert::field_values(&nodes(&first), "string_type", &[json!("a"), json!("b")]);
    assert_eq!(Cursor::decode(&first.edges[1].cursor).unwrap(), Cursor::Offset(1));
    assert!(first.page_info.has_next_page);

    let end = first.page_info.end_cursor.clone().unwrap();
    let second = service
        .query_connection(&request("test", sort.clone(), PagingArgs::first(2).after(end)))
        .await
        .unwrap();
    assert::field_values(&nodes(&second), "string_type", &[json!("c"), json!("d")]);
    assert!(second.page_info.has_previous_page);
    assert!(second.page_info.has_next_page);

    // Legacy cursors still decode.
    let legacy = service
        .query_connection(&request(
            "test",
            sort,
            PagingArgs::first(5).after(STANDARD.encode("arrayconnection:3")),
        ))
        .await
        .unwrap();
    assert::field_values(&nodes(&legacy), "string_type", &[json!("e")]);
    assert!(!legacy.page_info.has_next_page);
}

#[tokio::test]
async fn positional_backward_window() {
    let service = support::service(vec![("test", tests())]);
    let sort = vec![SortField::asc("string_type")];

    let page = service
        .query_connection(&request(
            "test",
            sort,
            PagingArgs::last(2).before(Cursor::Offset(3).encode()),
        ))
        .await
        .unwrap();
    assert::field_values(&nodes(&page), "string_type", &[json!("b"), json!("c")]);
    assert!(page.page_info.has_next_page);
    assert!(page.page_info.has_previous_page);
}

#[test]
fn positional_last_needs_before() {
    let err = support::compiler()
        .compile("test", &Filter::default(), &[], &PagingArgs::last(2))
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidPaging(_)), "{err:?}");
}

#[tokio::test]
async fn limit_offset_paging() {
    let service = support::service(vec![("test", tests())]);
    let page = service
        .query_connection(&request(
            "test",
            vec![SortField::desc("string_type")],
            PagingArgs::limit(2, 1),
        ))
        .await
        .unwrap();
    assert::field_values(&nodes(&page), "string_type", &[json!("d"), json!("c")]);
    assert!(page.page_info.has_previous_page);
    assert!(page.page_info.has_next_page);
}

// -------------------------------------------------------------------------
// Validation and extras
// -------------------------------------------------------------------------

#[test]
fn page_size_is_capped_unless_unlimited() {
    let err = support::compiler()
        .compile("todo", &Filter::default(), &[], &PagingArgs::first(101))
        .unwrap_err();
    assert_eq!(
        err,
        QueryError::PageSizeExceeded {
            requested: 101,
            max: 100,
        }
    );

    let unlimited = support::compiler_with(PagingPolicy {
        default_page_size: 10,
        max_page_size: None,
    });
    let paged = unlimited
        .compile("todo", &Filter::default(), &[], &PagingArgs::first(5000))
        .unwrap();
    assert_eq!(paged.query.limit, Some(5001));
}

#[test]
fn conflicting_arguments_are_rejected() {
    let compiler = support::compiler();
    let both = PagingArgs {
        first: Some(1),
        last: Some(1),
        ..PagingArgs::default()
    };
    let mixed = PagingArgs {
        first: Some(1),
        offset: Some(2),
        ..PagingArgs::default()
    };
    let negative = PagingArgs::first(-1);

    for args in [both, mixed, negative] {
        let err = compiler
            .compile("todo", &Filter::default(), &[], &args)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidPaging(_)), "{args:?}: {err:?}");
    }
}

#[test]
fn garbage_cursor_is_a_decode_error() {
    let err = support::compiler()
        .compile(
            "todo",
            &Filter::default(),
            &[],
            &PagingArgs::first(1).after("definitely not base64!"),
        )
        .unwrap_err();
    assert!(matches!(err, QueryError::CursorDecode(_)), "{err:?}");
}

#[tokio::test]
async fn total_count_ignores_paging() {
    let service = support::service(vec![("todo", mixed_todos())]);
    let mut req = request("todo", vec![], PagingArgs::first(2));
    req.filter = serde_json::from_value(json!({ "title": { "in": ["a", "b"] } })).unwrap();
    req.total_count = true;

    let page = service.query_connection(&req).await.unwrap();
    assert_eq!(page.edges.len(), 2);
    assert_eq!(page.total_count, Some(5));
    assert_eq!(service.count("todo", &req.filter).await.unwrap(), 5);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Todo {
    id: i64,
    title: String,
    priority: Option<i64>,
}

#[tokio::test]
async fn nodes_convert_to_typed_rows() {
    let service = support::service(vec![("todo", foos())]);
    let page = service
        .query_connection_as::<Todo>(&request("todo", vec![], PagingArgs::first(1)))
        .await
        .unwrap();
    assert_eq!(
        page.edges[0].node,
        Todo {
            id: 1,
            title: "foo1".to_string(),
            priority: Some(1),
        }
    );
}

#[tokio::test]
async fn typed_conversion_errors_are_decode_errors() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Wrong {
        id: String,
    }

    let service = support::service(vec![("todo", foos())]);
    let err = service
        .query_connection_as::<Wrong>(&request("todo", vec![], PagingArgs::first(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Decode(_)), "{err:?}");
}
