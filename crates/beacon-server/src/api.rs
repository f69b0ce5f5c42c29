use axum::extract::{Path, State};
use axum::response::Json;
use serde::Serialize;

use beacon_core::message::ChatMessage;

use crate::error::AppError;
use crate::room_store::RoomSummary;
use crate::state::AppState;

/// GET /api/v1/rooms — room directory with message counts.
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    let broker = state.broker.read().await;
    Json(broker.rooms().list())
}

/// Response for the room history endpoint.
#[derive(Debug, Serialize)]
pub struct RoomHistoryResponse {
    pub display_name: String,
    pub messages: Vec<ChatMessage>,
}

/// GET /api/v1/rooms/:room_id/history — full stored history of one room.
/// A room that has never been created is a 404, not an empty list.
pub async fn room_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomHistoryResponse>, AppError> {
    let broker = state.broker.read().await;
    let Some(display_name) = broker.rooms().display_name(&room_id) else {
        return Err(AppError::NotFound(format!("Room {room_id} not found")));
    };
    Ok(Json(RoomHistoryResponse {
        display_name,
        messages: broker.rooms().history(&room_id, None),
    }))
}
