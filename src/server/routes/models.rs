//! Model listing endpoint

use crate::api::{ListModelsResponse, ModelInfo};
use crate::catalog;
use crate::server::state::ServerState;
use axum::{extract::State, Json};
use std::collections::BTreeSet;
use tracing::warn;

/// Served model first, then catalog entries and converted models on disk
pub async fn list_models(State(state): State<ServerState>) -> Json<ListModelsResponse> {
    let active = state.model_name.to_string();
    let mut others = BTreeSet::new();

    if let Some(catalog) = &state.catalog {
        others.extend(catalog.model_names().map(str::to_string));
    }
    if let Some(dir) = &state.models_dir {
        match catalog::list_models(dir) {
            Ok(names) => others.extend(names),
            Err(e) => warn!("Failed to list models in {}: {}", dir.display(), e),
        }
    }
    others.remove(&active);

    let data = std::iter::once((active, true))
        .chain(others.into_iter().map(|name| (name, false)))
        .map(|(id, active)| ModelInfo {
            id,
            object: "model".to_string(),
            owned_by: "edgechat".to_string(),
            active,
        })
        .collect();

    Json(ListModelsResponse {
        object: "list".to_string(),
        data,
    })
}
