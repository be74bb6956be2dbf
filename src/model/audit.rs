use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Kinds of audited voting actions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ElectionCreated,
    ElectionStatusChanged,
    BallotChanged,
    LinkGenerated,
    LinkEmailed,
    LinkAccessed,
    LinkRevoked,
    VoteCast,
    VoteFailed,
    VoteDisputed,
    VoteInvalidated,
    ResultsViewed,
    TallyReconciled,
}

impl From<AuditAction> for Bson {
    fn from(action: AuditAction) -> Self {
        to_bson(&action).expect("Serialisation is infallible")
    }
}

/// Who is acting, and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub actor_id: Option<Id>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn actor(actor_id: Id) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Default::default()
        }
    }
}

/// An append-only audit entry. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingLog {
    #[serde(rename = "_id")]
    pub id: Id,
    pub actor_id: Option<Id>,
    pub action: AuditAction,
    pub resource: Option<Id>,
    pub election_id: Option<Id>,
    pub chapter: Option<String>,
    pub details: Document,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl VotingLog {
    /// A successful entry for `action` performed in `ctx`.
    pub fn new(action: AuditAction, ctx: &AuditContext) -> Self {
        Self {
            id: Id::new(),
            actor_id: ctx.actor_id,
            action,
            resource: None,
            election_id: None,
            chapter: None,
            details: Document::new(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    pub fn election(mut self, election_id: Id, chapter: Option<&str>) -> Self {
        self.election_id = Some(election_id);
        self.chapter = chapter.map(str::to_string);
        self
    }

    pub fn resource(mut self, resource: Id) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn details(mut self, details: Document) -> Self {
        self.details = details;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}
