//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "post_status", rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Published,
    Archived,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Archived => "archived",
        }
    }
}

/// Desired like state requested by an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeIntent {
    Liked,
    Unliked,
}

impl LikeIntent {
    /// Counter delta applied when the intent changes membership.
    pub fn delta(self) -> i64 {
        match self {
            LikeIntent::Liked => 1,
            LikeIntent::Unliked => -1,
        }
    }
}

impl TryFrom<i32> for LikeIntent {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(LikeIntent::Liked),
            0 => Ok(LikeIntent::Unliked),
            _ => Err(()),
        }
    }
}

/// Ordering for preview listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    #[default]
    Recent,
    Hot,
}

impl ListOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            ListOrder::Recent => "recent",
            ListOrder::Hot => "hot",
        }
    }
}

impl TryFrom<&str> for ListOrder {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "recent" | "time" => Ok(ListOrder::Recent),
            "hot" => Ok(ListOrder::Hot),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Member,
    Admin,
}

/// Authenticated caller identity, supplied by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn member(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: ActorRole::Member,
        }
    }

    pub fn admin(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: ActorRole::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_intent_from_wire_flag() {
        assert_eq!(LikeIntent::try_from(1), Ok(LikeIntent::Liked));
        assert_eq!(LikeIntent::try_from(0), Ok(LikeIntent::Unliked));
        assert!(LikeIntent::try_from(2).is_err());
    }

    #[test]
    fn list_order_accepts_legacy_time_alias() {
        assert_eq!(ListOrder::try_from("time"), Ok(ListOrder::Recent));
        assert_eq!(ListOrder::try_from("hot"), Ok(ListOrder::Hot));
        assert!(ListOrder::try_from("cold").is_err());
    }
}
