/// OpenAPI documentation generation.
pub mod documentation;
/// Listing, scheduling, claiming and releasing games.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Manager PIN verification.
pub mod manager_service;
/// Server-Sent Events bridge over store subscriptions.
pub mod sse_service;
