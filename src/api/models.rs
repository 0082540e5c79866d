//! Model listing endpoint.

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::models;
use crate::AppState;

/// Create the models router. `/models` is an alias some clients expect.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/models", get(list_models))
}

#[derive(Debug, Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    id: &'static str,
    object: &'static str,
    created: i64,
    owned_by: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variants: Option<Vec<&'static str>>,
}

async fn list_models() -> Json<ModelList> {
    let created = chrono::Utc::now().timestamp();
    let data = models::listings()
        .into_iter()
        .map(|(id, variants)| ModelEntry {
            id,
            object: "model",
            created,
            owned_by: "windsurf",
            variants,
        })
        .collect();

    Json(ModelList {
        object: "list",
        data,
    })
}
