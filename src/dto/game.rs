use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{Claim, GameEntity, NewGame},
    dto::validation::validate_not_blank,
};

/// Public projection of a game exposed to REST/SSE clients.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct GameView {
    /// Identifier to use in the claim and release paths.
    pub id: String,
    /// Kick-off time, RFC 3339.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub date: OffsetDateTime,
    /// Opposing team.
    pub opponent: String,
    /// Whether the game is played at home.
    pub is_home: bool,
    /// Present once somebody volunteered.
    pub claim: Option<ClaimView>,
}

/// Volunteer currently signed up for a game.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ClaimView {
    /// Volunteering parent.
    pub parent: String,
    /// Children coming along.
    pub children: String,
}

impl From<Claim> for ClaimView {
    fn from(claim: Claim) -> Self {
        Self {
            parent: claim.parent,
            children: claim.children,
        }
    }
}

impl From<GameEntity> for GameView {
    fn from(game: GameEntity) -> Self {
        Self {
            id: game.id.to_string(),
            date: game.date,
            opponent: game.opponent,
            is_home: game.is_home,
            claim: game.claim.map(Into::into),
        }
    }
}

/// Payload used by managers to schedule a new game.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AddGameRequest {
    /// Kick-off time, RFC 3339.
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub date: OffsetDateTime,
    #[validate(custom(function = "validate_not_blank"))]
    pub opponent: String,
    #[serde(default)]
    pub is_home: bool,
}

impl From<AddGameRequest> for NewGame {
    fn from(request: AddGameRequest) -> Self {
        Self {
            date: request.date,
            opponent: request.opponent.trim().to_owned(),
            is_home: request.is_home,
        }
    }
}

/// Payload submitted when volunteering for a game.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ClaimGameRequest {
    #[validate(custom(function = "validate_not_blank"))]
    pub parent: String,
    #[validate(custom(function = "validate_not_blank"))]
    pub children: String,
}

impl From<ClaimGameRequest> for Claim {
    fn from(request: ClaimGameRequest) -> Self {
        Claim::new(request.parent.trim(), request.children.trim())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::dao::models::GameId;

    #[test]
    fn add_game_request_parses_rfc3339_and_trims() {
        let request: AddGameRequest = serde_json::from_str(
            r#"{"date": "2025-04-12T14:30:00+02:00", "opponent": "  Team C "}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());

        let game: NewGame = request.into();
        assert_eq!(game.date, datetime!(2025-04-12 14:30 +2));
        assert_eq!(game.opponent, "Team C");
        assert!(!game.is_home);
    }

    #[test]
    fn blank_fields_fail_validation() {
        let request: AddGameRequest =
            serde_json::from_str(r#"{"date": "2025-04-12T14:30:00Z", "opponent": "  "}"#)
                .unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("opponent"));

        let request = ClaimGameRequest {
            parent: "Florent".into(),
            children: "".into(),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("children"));
        assert!(!errors.field_errors().contains_key("parent"));
    }

    #[test]
    fn malformed_date_is_rejected() {
        assert!(
            serde_json::from_str::<AddGameRequest>(r#"{"date": "next friday", "opponent": "X"}"#)
                .is_err()
        );
    }

    #[test]
    fn game_view_serializes_claim() {
        let view = GameView::from(GameEntity {
            id: GameId::new("1"),
            date: datetime!(2025-04-12 14:30 UTC),
            opponent: "Team C".into(),
            is_home: true,
            claim: Some(Claim::new("Florent", "Léa")),
        });

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["id"], "1");
        assert_eq!(value["date"], "2025-04-12T14:30:00Z");
        assert_eq!(value["claim"]["parent"], "Florent");
        assert_eq!(value["claim"]["children"], "Léa");
    }
}
