use uuid::Uuid;

use crate::{ContentId, UserId, UserSummary};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum RelationKind {
    Like,
    Follow,
}

/// A toggleable relation between a subject user and an object
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum RelationKey {
    Like { user: UserId, content: ContentId },
    Follow { follower: UserId, followee: UserId },
}

impl RelationKey {
    pub fn like(user: UserId, content: ContentId) -> RelationKey {
        RelationKey::Like { user, content }
    }

    pub fn follow(follower: UserId, followee: UserId) -> RelationKey {
        RelationKey::Follow { follower, followee }
    }

    pub fn kind(&self) -> RelationKind {
        match self {
            RelationKey::Like { .. } => RelationKind::Like,
            RelationKey::Follow { .. } => RelationKind::Follow,
        }
    }

    pub fn subject_id(&self) -> UserId {
        match self {
            RelationKey::Like { user, .. } => *user,
            RelationKey::Follow { follower, .. } => *follower,
        }
    }

    pub fn object_id(&self) -> Uuid {
        match self {
            RelationKey::Like { content, .. } => content.0,
            RelationKey::Follow { followee, .. } => followee.0,
        }
    }
}

/// Server-side truth for a relation, along with the aggregate count displayed
/// next to it (likes on the content, followers of the user)
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RelationStatus {
    pub active: bool,
    pub count: u64,
}

/// One row of a followers list
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FollowerEntry {
    pub user: UserSummary,

    /// Whether the current user follows this follower back
    pub followed_by_me: bool,
    pub followers_count: u64,
}
