//! Cache invalidation tags.
//!
//! A tag is either a collection tag (`Task`) or an entity tag (`Task:t1`).
//! Invalidating a collection tag hits every entry that provides any tag of
//! that kind; invalidating an entity tag hits only entries providing exactly
//! that entity.

use crate::identity::EntityIdType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity families that cache entries can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagKind {
    User,
    Profile,
    Project,
    Task,
    Comment,
    Activity,
    Dashboard,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::User => "User",
            TagKind::Profile => "Profile",
            TagKind::Project => "Project",
            TagKind::Task => "Task",
            TagKind::Comment => "Comment",
            TagKind::Activity => "Activity",
            TagKind::Dashboard => "Dashboard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub kind: TagKind,
    pub id: Option<String>,
}

impl Tag {
    /// Tag covering a whole entity family.
    pub fn collection(kind: TagKind) -> Self {
        Self { kind, id: None }
    }

    /// Tag for a single entity.
    pub fn entity(kind: TagKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }

    pub fn for_id<I: EntityIdType>(kind: TagKind, id: &I) -> Self {
        Self::entity(kind, id.as_str())
    }

    /// Whether invalidating `self` hits an entry that provides `provided`.
    pub fn matches(&self, provided: &Tag) -> bool {
        if self.kind != provided.kind {
            return false;
        }
        match &self.id {
            None => true,
            Some(id) => provided.id.as_deref() == Some(id.as_str()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind.as_str(), id),
            None => f.write_str(self.kind.as_str()),
        }
    }
}
