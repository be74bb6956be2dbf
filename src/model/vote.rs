use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Ledger status of a vote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteStatus {
    Cast,
    Disputed,
    Invalidated,
}

impl From<VoteStatus> for Bson {
    fn from(status: VoteStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// The administrative annotations a cast vote can receive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Disputed,
    Invalidated,
}

impl AnnotationKind {
    pub fn status(self) -> VoteStatus {
        match self {
            AnnotationKind::Disputed => VoteStatus::Disputed,
            AnnotationKind::Invalidated => VoteStatus::Invalidated,
        }
    }
}

impl VoteStatus {
    /// Can a vote in this state receive the given annotation?
    /// Cast votes may be disputed or invalidated, disputed votes may be
    /// invalidated, and invalidation is final.
    pub fn can_annotate(self, kind: AnnotationKind) -> bool {
        matches!(
            (self, kind),
            (VoteStatus::Cast, _) | (VoteStatus::Disputed, AnnotationKind::Invalidated)
        )
    }
}

/// Who annotated a vote, when and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub by: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// An entry in the vote ledger.
///
/// Votes are written once, at casting time. The store exposes no way to
/// update or delete them; the only later write is an [`Annotation`] together
/// with the matching status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    pub member_id: Id,
    pub member_email: String,
    pub member_name: String,
    pub candidate_id: Id,
    pub position_id: Id,
    pub election_id: Id,
    pub chapter: Option<String>,
    pub link_token: Option<String>,
    pub link_token_hash: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Cast through a verified voting link.
    pub verified: bool,
    pub status: VoteStatus,
    #[serde(default)]
    pub annotation: Option<Annotation>,
}

#[cfg(test)]
mod tests {
    use super::{AnnotationKind, VoteStatus};

    #[test]
    fn invalidation_is_final() {
        assert!(VoteStatus::Cast.can_annotate(AnnotationKind::Disputed));
        assert!(VoteStatus::Cast.can_annotate(AnnotationKind::Invalidated));
        assert!(VoteStatus::Disputed.can_annotate(AnnotationKind::Invalidated));
        assert!(!VoteStatus::Disputed.can_annotate(AnnotationKind::Disputed));
        assert!(!VoteStatus::Invalidated.can_annotate(AnnotationKind::Disputed));
        assert!(!VoteStatus::Invalidated.can_annotate(AnnotationKind::Invalidated));
    }
}
