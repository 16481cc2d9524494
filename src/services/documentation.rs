use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the snack roster service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::games::list_games,
        crate::routes::games::add_game,
        crate::routes::games::claim_game,
        crate::routes::games::release_game,
        crate::routes::manager::login,
        crate::routes::sse::games_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::GameView,
            crate::dto::game::ClaimView,
            crate::dto::game::AddGameRequest,
            crate::dto::game::ClaimGameRequest,
            crate::dto::manager::PinRequest,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "games", description = "Game schedule and volunteer sign-ups"),
        (name = "manager", description = "Manager mode"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
