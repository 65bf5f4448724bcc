//! Cabinet inventory endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::InventoryLine, AppState};

/// Stock of every equipment type in a city's cabinet
#[utoipa::path(
    get,
    path = "/cities/{id}/inventory",
    tag = "inventory",
    params(("id" = i32, Path, description = "City ID")),
    responses(
        (status = 200, description = "Inventory lines by equipment", body = Vec<InventoryLine>)
    )
)]
pub async fn city_inventory(
    State(state): State<AppState>,
    Path(city_id): Path<i32>,
) -> AppResult<Json<Vec<InventoryLine>>> {
    let lines = state.services.inventory.city_inventory(city_id).await?;
    Ok(Json(lines))
}
