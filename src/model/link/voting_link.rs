use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::mongodb::{option_datetime, Id};

/// Lifecycle of a voting link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,
    Sent,
    Used,
    Expired,
    Revoked,
}

impl LinkStatus {
    /// Pending and sent links can still authorise votes.
    pub fn is_terminal(self) -> bool {
        !matches!(self, LinkStatus::Pending | LinkStatus::Sent)
    }

    /// The error reported when a link in this state is presented.
    pub fn terminal_error(self) -> Option<Error> {
        match self {
            LinkStatus::Pending | LinkStatus::Sent => None,
            LinkStatus::Used => Some(Error::LinkAlreadyUsed),
            LinkStatus::Expired => Some(Error::LinkExpired),
            LinkStatus::Revoked => Some(Error::LinkRevoked),
        }
    }
}

impl From<LinkStatus> for Bson {
    fn from(status: LinkStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// A single-use authorisation for one member to vote in one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingLink {
    #[serde(rename = "_id")]
    pub id: Id,
    pub member_id: Id,
    /// Copied from the member so the record stays meaningful if they change.
    pub member_email: String,
    pub election_id: Id,
    pub chapter: Option<String>,
    pub token: String,
    pub token_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub status: LinkStatus,
    pub email_sent: bool,
    #[serde(default, with = "option_datetime")]
    pub email_sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "option_datetime")]
    pub accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub generated_by: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "option_datetime")]
    pub used_at: Option<DateTime<Utc>>,
    /// `"<member>:<election>"` while the link is pending or sent, absent
    /// otherwise. A unique sparse index on this field allows at most one live
    /// link per member and election.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_slot: Option<String>,
}

impl VotingLink {
    /// The key that occupies `active_slot` while a link is live.
    pub fn slot_key(member_id: Id, election_id: Id) -> String {
        format!("{member_id}:{election_id}")
    }

    /// Is this link still live but past its expiry time?
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at < now
    }
}
