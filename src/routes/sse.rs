use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/games",
    tag = "sse",
    responses((status = 200, description = "Game list updates; event `games` carries every game", content_type = "text/event-stream", body = String))
)]
/// Stream the full game list on connect and after every change.
pub async fn games_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    info!("New games SSE connection");
    sse_service::to_sse_stream(sse_service::game_events(&state))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/games", get(games_stream))
}
