pub mod game;
pub mod health;
pub mod manager;
pub mod sse;
pub mod validation;
