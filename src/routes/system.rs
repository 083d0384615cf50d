use std::sync::Arc;

use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::{Request, State, catch, get};

use crate::hub::Hub;
use crate::metrics::Metrics;

#[get("/health")]
pub fn health(
    hub: &State<Arc<Hub>>,
    metrics: &State<Arc<Metrics>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": metrics.websocket_connections.get(),
        "rooms": hub.room_count(),
    }))
}

/// Prometheus text exposition. Mounted at the configured METRICS_PATH.
#[get("/")]
pub fn metrics_scrape(metrics: &State<Arc<Metrics>>) -> (ContentType, String) {
    (ContentType::Plain, metrics.render())
}

#[catch(404)]
pub fn not_found(req: &Request) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": format!("No such endpoint: {}", req.uri())
    }))
}
