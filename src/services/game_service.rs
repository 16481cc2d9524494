use tracing::info;

use crate::{
    dao::models::GameId,
    dto::game::{AddGameRequest, ClaimGameRequest, GameView},
    error::ServiceError,
    state::SharedState,
};

/// Every game, in the store's order.
pub async fn list_games(state: &SharedState) -> Result<Vec<GameView>, ServiceError> {
    let games = state.store().list_games().await?;
    Ok(games.into_iter().map(Into::into).collect())
}

/// Schedule a new, unclaimed game.
pub async fn add_game(
    state: &SharedState,
    request: AddGameRequest,
) -> Result<GameView, ServiceError> {
    let game = state.store().add_game(request.into()).await?;
    info!(game_id = %game.id, opponent = %game.opponent, "game scheduled");
    Ok(game.into())
}

/// Volunteer for a game.
pub async fn claim_game(
    state: &SharedState,
    id: GameId,
    request: ClaimGameRequest,
) -> Result<GameView, ServiceError> {
    let claim = request.into();
    let game = state.store().claim_game(id, claim).await?;
    info!(game_id = %game.id, "volunteer signed up");
    Ok(game.into())
}

/// Clear the volunteer of a game.
pub async fn release_game(state: &SharedState, id: GameId) -> Result<GameView, ServiceError> {
    let game = state.store().release_game(id).await?;
    info!(game_id = %game.id, "claim released");
    Ok(game.into())
}
