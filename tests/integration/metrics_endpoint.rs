use rocket::http::Status;

use crate::common::test_client;

#[test]
fn scrape_exposes_the_full_instrument_set() {
    let client = test_client();
    let res = client.get("/metrics").dispatch();
    assert_eq!(res.status(), Status::Ok);

    let body = res.into_string().unwrap();
    for name in [
        "websocket_connections",
        "active_rooms",
        "spawned_tasks",
        "messages_received_total",
        "dropped_messages_total",
        "room_joins_total",
        "room_leaves_total",
        "message_latency_ms",
        "broadcast_duration_ms",
        "connection_duration_seconds",
        "users_per_room",
    ] {
        assert!(body.contains(name), "scrape is missing {name}");
    }
}

#[test]
fn scrape_is_prometheus_text() {
    let client = test_client();
    let body = client.get("/metrics").dispatch().into_string().unwrap();
    assert!(body.contains("# HELP"));
    assert!(body.contains("# TYPE"));
}
