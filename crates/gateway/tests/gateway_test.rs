use brigade_gateway::{GatewayError, SortOrder, TableClient};
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn table(server: &MockServer, name: &str) -> TableClient {
    TableClient::new(&server.uri(), "anon_key", name, Client::new()).unwrap()
}

#[tokio::test]
async fn select_builds_filters_and_compound_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/menu_items"))
        .and(query_param("available", "eq.true"))
        .and(query_param("order", "category.asc,name.asc"))
        .and(header("apikey", "anon_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "name": "Espresso"},
            {"id": "b", "name": "Flat White"}
        ])))
        .mount(&server)
        .await;

    let rows: Vec<serde_json::Value> = table(&server, "menu_items")
        .select("*")
        .eq("available", "true")
        .order("category", SortOrder::Ascending)
        .order("name", SortOrder::Ascending)
        .execute()
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Espresso");
}

#[tokio::test]
async fn insert_returns_representation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/orders"))
        .and(header("prefer", "return=representation"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!([{"id": "o1", "customer_name": "Walk-in"}])),
        )
        .mount(&server)
        .await;

    let value = table(&server, "orders")
        .insert(json!({"customer_name": "Walk-in"}))
        .await
        .unwrap();

    assert_eq!(value[0]["id"], "o1");
}

#[tokio::test]
async fn empty_success_body_is_null() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/menu_items"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let value = table(&server, "menu_items").eq("id", "m1").delete().await.unwrap();
    assert!(value.is_null());
}

// Mirrors the row policy: anyone may insert an order, but updating one
// without an admin token is rejected server-side.
#[tokio::test]
async fn anonymous_update_is_policy_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "42501",
            "message": "new row violates row-level security policy",
            "details": null,
            "hint": null
        })))
        .mount(&server)
        .await;

    let err = table(&server, "orders")
        .eq("id", "o1")
        .update(json!({"status": "completed"}))
        .await
        .unwrap_err();

    assert!(err.is_policy_rejection());
    match err {
        GatewayError::ApiError { details, status } => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(details.code.as_deref(), Some("42501"));
        }
        other => panic!("expected parsed ApiError, got {:?}", other),
    }
}

#[tokio::test]
async fn non_json_error_body_is_unparsed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = table(&server, "orders")
        .execute::<serde_json::Value>()
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(err, GatewayError::UnparsedApiError { .. }));
}

#[tokio::test]
async fn bearer_token_is_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(header("authorization", "Bearer jwt_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let rows: Vec<serde_json::Value> = table(&server, "profiles")
        .with_auth("jwt_token")
        .unwrap()
        .execute()
        .await
        .unwrap();

    assert!(rows.is_empty());
}
