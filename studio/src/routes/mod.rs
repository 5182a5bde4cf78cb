use axum::response::Json;
use serde_json::{json, Value};

pub mod blobs;
pub mod files;
pub mod stories;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
