use rocket::http::Status;

use crate::common::test_client;

#[test]
fn health_reports_ok_with_zero_activity() {
    let client = test_client();
    let res = client.get("/health").dispatch();
    assert_eq!(res.status(), Status::Ok);

    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["rooms"], 0);
}

#[test]
fn unknown_endpoint_returns_json_404() {
    let client = test_client();
    let res = client.get("/api/does-not-exist").dispatch();
    assert_eq!(res.status(), Status::NotFound);

    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].as_str().unwrap().contains("/api/does-not-exist"));
}
