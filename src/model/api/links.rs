use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, link::{LinkStatus, VotingLink}, member::Ineligibility};

/// Request body for generating voting links. With no members listed, links
/// are generated for every member in the election's chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    #[serde(default)]
    pub member_ids: Option<Vec<ApiId>>,
}

/// The outcome of a link generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedLinks {
    pub links: Vec<IssuedLink>,
    pub total: usize,
    pub new_links: usize,
    pub existing_links: usize,
    pub skipped: Vec<SkippedMember>,
}

impl GeneratedLinks {
    pub fn push(&mut self, issued: IssuedLink) {
        if issued.already_exists {
            self.existing_links += 1;
        } else {
            self.new_links += 1;
        }
        self.total += 1;
        self.links.push(issued);
    }
}

/// A link issued to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedLink {
    pub member_id: ApiId,
    pub member_email: String,
    pub link: LinkSummary,
    pub already_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub id: ApiId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub status: LinkStatus,
    pub email_sent: bool,
}

impl From<&VotingLink> for LinkSummary {
    fn from(link: &VotingLink) -> Self {
        Self {
            id: link.id.into(),
            token: link.token.clone(),
            expires_at: link.expires_at,
            status: link.status,
            email_sent: link.email_sent,
        }
    }
}

impl IssuedLink {
    pub fn new(link: &VotingLink, already_exists: bool) -> Self {
        Self {
            member_id: link.member_id.into(),
            member_email: link.member_email.clone(),
            link: link.into(),
            already_exists,
        }
    }
}

/// A member who was not issued a link, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMember {
    pub member_id: ApiId,
    pub reason: Ineligibility,
}
