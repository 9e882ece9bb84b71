//! Labeled links between entities
//!
//! Each relation has a canonical label and an inverse. Only the canonical
//! direction is stored; the store answers queries in either direction.

use serde::{Deserialize, Serialize};

/// Label of a directed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LinkLabel {
    Contains,
    ContainedBy,
    Uses,
    UsedBy,
    Includes,
    IncludedIn,
    Manages,
    ManagedBy,
    MasteredBy,
    Masters,
}

impl LinkLabel {
    pub fn inverse(self) -> LinkLabel {
        match self {
            LinkLabel::Contains => LinkLabel::ContainedBy,
            LinkLabel::ContainedBy => LinkLabel::Contains,
            LinkLabel::Uses => LinkLabel::UsedBy,
            LinkLabel::UsedBy => LinkLabel::Uses,
            LinkLabel::Includes => LinkLabel::IncludedIn,
            LinkLabel::IncludedIn => LinkLabel::Includes,
            LinkLabel::Manages => LinkLabel::ManagedBy,
            LinkLabel::ManagedBy => LinkLabel::Manages,
            LinkLabel::MasteredBy => LinkLabel::Masters,
            LinkLabel::Masters => LinkLabel::MasteredBy,
        }
    }

    /// Whether this label is the stored direction of its pair
    pub fn is_canonical(self) -> bool {
        matches!(
            self,
            LinkLabel::Contains
                | LinkLabel::Uses
                | LinkLabel::Includes
                | LinkLabel::Manages
                | LinkLabel::MasteredBy
        )
    }

    /// Rewrite `(from, self, to)` into its stored form
    pub fn canonicalize<T>(self, from: T, to: T) -> (T, LinkLabel, T) {
        if self.is_canonical() {
            (from, self, to)
        } else {
            (to, self.inverse(), from)
        }
    }
}

impl std::fmt::Display for LinkLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
