use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::GameId,
    dto::game::{AddGameRequest, ClaimGameRequest, GameView},
    error::AppError,
    routes::manager::require_manager_pin,
    services::game_service,
    state::SharedState,
};

/// Game schedule routes; scheduling and releasing require the manager PIN.
pub fn router(state: SharedState) -> Router<SharedState> {
    let manager_only = middleware::from_fn_with_state(state, require_manager_pin);

    Router::new()
        .route(
            "/games",
            get(list_games).merge(post(add_game).route_layer(manager_only.clone())),
        )
        .route("/games/{id}/claim", post(claim_game))
        .route(
            "/games/{id}/release",
            post(release_game).route_layer(manager_only),
        )
}

/// List every scheduled game.
#[utoipa::path(
    get,
    path = "/games",
    tag = "games",
    responses((status = 200, description = "Scheduled games", body = [GameView]))
)]
pub async fn list_games(State(state): State<SharedState>) -> Result<Json<Vec<GameView>>, AppError> {
    Ok(Json(game_service::list_games(&state).await?))
}

/// Schedule a new game.
#[utoipa::path(
    post,
    path = "/games",
    tag = "games",
    params(("X-Manager-Pin" = String, Header, description = "Manager PIN")),
    request_body = AddGameRequest,
    responses(
        (status = 200, description = "Game scheduled", body = GameView),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Missing or wrong manager PIN")
    )
)]
pub async fn add_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<AddGameRequest>>,
) -> Result<Json<GameView>, AppError> {
    Ok(Json(game_service::add_game(&state, payload).await?))
}

/// Volunteer to bring snacks to a game.
#[utoipa::path(
    post,
    path = "/games/{id}/claim",
    tag = "games",
    params(("id" = String, Path, description = "Identifier of the game")),
    request_body = ClaimGameRequest,
    responses(
        (status = 200, description = "Claim recorded", body = GameView),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Unknown game"),
        (status = 409, description = "Someone already signed up for this game")
    )
)]
pub async fn claim_game(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<ClaimGameRequest>>,
) -> Result<Json<GameView>, AppError> {
    Ok(Json(
        game_service::claim_game(&state, GameId::new(id), payload).await?,
    ))
}

/// Clear the volunteer of a game.
#[utoipa::path(
    post,
    path = "/games/{id}/release",
    tag = "games",
    params(
        ("X-Manager-Pin" = String, Header, description = "Manager PIN"),
        ("id" = String, Path, description = "Identifier of the game")
    ),
    responses(
        (status = 200, description = "Claim released", body = GameView),
        (status = 401, description = "Missing or wrong manager PIN"),
        (status = 404, description = "Unknown game")
    )
)]
pub async fn release_game(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<GameView>, AppError> {
    Ok(Json(
        game_service::release_game(&state, GameId::new(id)).await?,
    ))
}
