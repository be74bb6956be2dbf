use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::{option_datetime, Id};

use super::ElectionStatus;

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    /// Chapter the election is scoped to; `None` means organisation-wide.
    pub chapter: Option<String>,
    pub status: ElectionStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Only verified members may vote.
    pub require_verification: bool,
    /// Members may be candidates for several positions at once.
    pub allow_multiple_positions: bool,
    /// Results may be read by anyone while the election runs.
    pub public_results: bool,
    /// Snapshot of the electorate size, taken when the election starts.
    pub total_eligible_voters: u64,
    /// Maintained exclusively by atomic increments during vote casting.
    pub total_votes_cast: u64,
    /// Display value, refreshed after each vote.
    pub turnout_percentage: f64,
    pub created_by: Id,
    pub approved_by: Option<Id>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "option_datetime")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ElectionCore {
    /// Is `now` inside the voting window?
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time
    }

    /// Turnout as a percentage of the possible ballots (eligible voters times
    /// positions), rounded to two decimals and capped at 100.
    pub fn turnout(&self, position_count: usize) -> f64 {
        let possible = self.total_eligible_voters * position_count as u64;
        if possible == 0 {
            return 0.0;
        }
        percentage(self.total_votes_cast, possible).min(100.0)
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Election {
    pub fn new(election: ElectionCore) -> Self {
        Self {
            id: Id::new(),
            election,
        }
    }
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// `part / whole * 100`, rounded to two decimal places. Zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}
