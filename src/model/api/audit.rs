use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    audit::{AuditAction, VotingLog},
};

/// An audit log entry, as shown to organisers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogView {
    pub id: ApiId,
    pub actor_id: Option<ApiId>,
    pub action: AuditAction,
    pub resource: Option<ApiId>,
    pub chapter: Option<String>,
    pub details: Document,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<VotingLog> for LogView {
    fn from(log: VotingLog) -> Self {
        Self {
            id: log.id.into(),
            actor_id: log.actor_id.map(ApiId::from),
            action: log.action,
            resource: log.resource.map(ApiId::from),
            chapter: log.chapter,
            details: log.details,
            ip_address: log.ip_address,
            user_agent: log.user_agent,
            success: log.success,
            timestamp: log.timestamp,
        }
    }
}
