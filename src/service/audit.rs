use crate::error::{Error, Result};
use crate::model::{
    api::{
        audit::LogView,
        pagination::{Paginated, PaginationRequest},
    },
    mongodb::Id,
};
use crate::store::Reader;

use super::Voting;

impl Voting {
    /// One page of an election's audit trail, newest first.
    pub async fn audit_log(
        &self,
        election_id: Id,
        page: PaginationRequest,
    ) -> Result<Paginated<LogView>> {
        let mut reader = self.store.snapshot().await?;
        if reader.election(election_id).await?.is_none() {
            return Err(Error::ElectionNotFound);
        }
        let (total, logs) = reader
            .audit_log(election_id, page.skip(), page.page_size())
            .await?;
        Ok(page.to_paginated(total, logs.into_iter().map(LogView::from).collect()))
    }
}
