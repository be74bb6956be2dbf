use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A member record, as owned by the wider membership platform.
/// The voting core only ever reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "_id")]
    pub id: Id,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub chapter: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
}

impl Member {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Why this member may not vote in an election with the given scope, if
    /// anything. `None` means eligible.
    pub fn ineligibility(
        &self,
        chapter: Option<&str>,
        require_verification: bool,
    ) -> Option<Ineligibility> {
        if !self.is_active {
            Some(Ineligibility::Inactive)
        } else if chapter.is_some() && self.chapter.as_deref() != chapter {
            Some(Ineligibility::OtherChapter)
        } else if require_verification && !self.is_verified {
            Some(Ineligibility::Unverified)
        } else {
            None
        }
    }
}

/// Reasons a member is left out of an electorate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    Unknown,
    Inactive,
    OtherChapter,
    Unverified,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_rules() {
        let member = Member::example("Ada");
        assert_eq!(member.ineligibility(Some("north"), true), None);
        assert_eq!(member.ineligibility(None, true), None);
        assert_eq!(
            member.ineligibility(Some("south"), false),
            Some(Ineligibility::OtherChapter)
        );

        let unverified = Member {
            is_verified: false,
            ..Member::example("Bo")
        };
        assert_eq!(unverified.ineligibility(Some("north"), false), None);
        assert_eq!(
            unverified.ineligibility(Some("north"), true),
            Some(Ineligibility::Unverified)
        );

        let inactive = Member {
            is_active: false,
            ..Member::example("Cy")
        };
        assert_eq!(
            inactive.ineligibility(None, false),
            Some(Ineligibility::Inactive)
        );
    }
}
