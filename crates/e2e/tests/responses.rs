//! Waiting for and decoding backend responses

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tablecheck_e2e::config::TimeoutConfig;
use tablecheck_e2e::driver::Page;
use tablecheck_e2e::sim::{SimContext, SimPage, TableFixture};
use tablecheck_e2e::{
    logging, ApiNamespace, E2eError, HarnessConfig, ResponseWaiter, TableInteractor,
};

const ORIGIN: &str = "https://app.test";

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "Rows")]
    rows: Vec<Vec<String>>,
    #[serde(rename = "TotalCount")]
    total: usize,
}

fn waiter(timeout_ms: u64) -> ResponseWaiter {
    ResponseWaiter::new(&HarnessConfig {
        timeouts: TimeoutConfig {
            response_ms: timeout_ms,
            ..TimeoutConfig::default()
        },
        ..HarnessConfig::default()
    })
}

fn page() -> (SimContext, SimPage) {
    logging::init();
    let context = SimContext::new();
    let page = context.open_table(format!("{}/tables", ORIGIN), TableFixture::numbered(30));
    (context, page)
}

fn endpoint(namespace: &str, method: &str) -> String {
    format!("{}/API/v1/{}.asmx/{}", ORIGIN, namespace, method)
}

#[tokio::test]
async fn payload_round_trips_through_envelope() {
    let (_context, page) = page();
    let payload = json!({ "Widgets": [{ "Id": 7, "Title": "Votes" }], "Version": 3 });
    page.respond_json(endpoint("Dashboards", "GetDashboard"), &json!({ "d": payload.clone() }));

    let envelope = waiter(500)
        .wait::<Value>(&page, ApiNamespace::Dashboards, "GetDashboard")
        .await
        .unwrap();
    assert_eq!(envelope.d, payload);
}

#[tokio::test]
async fn filter_response_decodes_into_typed_page() {
    let (_context, page) = page();
    let table = TableInteractor::default();
    let waiter = waiter(1_000);

    let (response, filtered) = tokio::join!(
        waiter.wait::<QueryPage>(&page, ApiNamespace::Internal, "GetNextQuerySessionPage"),
        table.filter(&page, Some("row-02")),
    );
    filtered.unwrap();
    let query = response.unwrap().d;
    assert_eq!(query.total, 10);
    assert_eq!(query.rows.len(), 10);
    assert!(query.rows.iter().all(|r| r[1].starts_with("row-02")));
}

#[tokio::test]
async fn unclaimed_filter_responses_are_kept_in_order() {
    let (_context, page) = page();
    let table = TableInteractor::default();
    table.filter(&page, Some("row-00")).await.unwrap();
    table.filter(&page, Some("row-02")).await.unwrap();

    let waiter = waiter(200);
    let first = waiter
        .wait::<QueryPage>(&page, ApiNamespace::Internal, "GetNextQuerySessionPage")
        .await
        .unwrap();
    let second = waiter
        .wait::<QueryPage>(&page, ApiNamespace::Internal, "GetNextQuerySessionPage")
        .await
        .unwrap();
    assert_eq!(first.d.total, 9);
    assert_eq!(second.d.total, 10);
}

#[tokio::test]
async fn namespaces_do_not_cross_match() {
    let (_context, page) = page();
    page.respond_json(endpoint("Json", "GetApplication"), &json!({ "d": 1 }));

    let err = waiter(100)
        .wait::<Value>(&page, ApiNamespace::Internal, "GetApplication")
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);

    let ok = waiter(100)
        .wait::<u32>(&page, ApiNamespace::Json, "GetApplication")
        .await
        .unwrap();
    assert_eq!(ok.d, 1);
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (_context, page) = page();
    page.respond(endpoint("Internal", "GetApplication"), 200, "<html>login</html>");

    let err = waiter(500)
        .wait::<Value>(&page, ApiNamespace::Internal, "GetApplication")
        .await
        .unwrap_err();
    match err {
        E2eError::Decode { url, .. } => assert!(url.ends_with("/GetApplication")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn raw_response_exposes_status() {
    let (_context, page) = page();
    page.respond(endpoint("Internal", "SaveView"), 500, "{}");

    let response = waiter(500)
        .wait_response(&page, ApiNamespace::Internal, "SaveView")
        .await
        .unwrap();
    assert!(!response.ok());
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn concurrent_waits_are_served_in_order() {
    let (_context, page) = page();
    let waiter = waiter(1_000);
    let first = waiter.wait::<u32>(&page, ApiNamespace::Json, "Next");
    let second = waiter.wait::<u32>(&page, ApiNamespace::Json, "Next");

    let respond = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        page.respond_json(endpoint("Json", "Next"), &json!({ "d": 1 }));
        page.respond_json(endpoint("Json", "Next"), &json!({ "d": 2 }));
    };
    let (first, second, ()) = tokio::join!(first, second, respond);
    assert_eq!(first.unwrap().d, 1);
    assert_eq!(second.unwrap().d, 2);
}

#[tokio::test]
async fn closed_page_fails_waits() {
    let (_context, page) = page();
    page.close().await.unwrap();
    let err = waiter(200)
        .wait::<Value>(&page, ApiNamespace::Internal, "GetApplication")
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::Driver(_)), "{:?}", err);
}
