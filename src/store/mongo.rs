use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, to_bson, Bson, DateTime as BsonDateTime, Document},
    error::Error as DbError,
    options::{FindOptions, SessionOptions},
    Client, ClientSession, Database, SessionCursor,
};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::model::{
    audit::VotingLog,
    election::{Candidate, Election, ElectionStatus, Position},
    link::{LinkStatus, VotingLink},
    member::Member,
    mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll, Id},
    vote::{Annotation, Vote, VoteStatus},
};

use super::{Reader, StatusChange, Store, Transaction};

/// Handles on every collection the voting core touches.
#[derive(Clone)]
struct Collections {
    elections: Coll<Election>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
    members: Coll<Member>,
    links: Coll<VotingLink>,
    votes: Coll<Vote>,
    logs: Coll<VotingLog>,
}

impl Collections {
    fn from_db(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
            positions: Coll::from_db(db),
            candidates: Coll::from_db(db),
            members: Coll::from_db(db),
            links: Coll::from_db(db),
            votes: Coll::from_db(db),
            logs: Coll::from_db(db),
        }
    }
}

/// A store backed by MongoDB multi-document transactions.
/// Requires a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    colls: Collections,
}

impl MongoStore {
    /// Connect to the given database and make sure its indexes exist.
    pub async fn connect(db_uri: &str, db_name: &str) -> std::result::Result<Self, DbError> {
        let client = Client::with_uri_str(db_uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self {
            colls: Collections::from_db(&db),
            client,
        })
    }
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(Box::new(MongoSession {
            session,
            colls: self.colls.clone(),
        }))
    }

    async fn snapshot(&self) -> Result<Box<dyn Reader>> {
        let options = SessionOptions::builder().snapshot(true).build();
        let session = self.client.start_session(Some(options)).await?;
        Ok(Box::new(MongoSession {
            session,
            colls: self.colls.clone(),
        }))
    }
}

/// A client session, either inside a transaction or reading at a snapshot.
struct MongoSession {
    session: ClientSession,
    colls: Collections,
}

/// Drain a cursor that belongs to `session`.
async fn collect<T>(mut cursor: SessionCursor<T>, session: &mut ClientSession) -> Result<Vec<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let mut items = Vec::new();
    while let Some(item) = cursor.next(session).await {
        items.push(item?);
    }
    Ok(items)
}

fn sorted_by(sort: Document) -> Option<FindOptions> {
    Some(FindOptions::builder().sort(sort).build())
}

fn bson_time(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_chrono(at)
}

fn count_of(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => *n as u64,
        Some(Bson::Int64(n)) => *n as u64,
        _ => 0,
    }
}

#[rocket::async_trait]
impl Reader for MongoSession {
    async fn election(&mut self, id: Id) -> Result<Option<Election>> {
        Ok(self
            .colls
            .elections
            .find_one_with_session(id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn positions(&mut self, election_id: Id) -> Result<Vec<Position>> {
        let cursor = self
            .colls
            .positions
            .find_with_session(
                doc! {"election_id": election_id},
                sorted_by(doc! {"order": 1, "_id": 1}),
                &mut self.session,
            )
            .await?;
        collect(cursor, &mut self.session).await
    }

    async fn position(&mut self, id: Id) -> Result<Option<Position>> {
        Ok(self
            .colls
            .positions
            .find_one_with_session(id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn candidates(&mut self, position_id: Id) -> Result<Vec<Candidate>> {
        let cursor = self
            .colls
            .candidates
            .find_with_session(
                doc! {"position_id": position_id},
                sorted_by(doc! {"order": 1, "_id": 1}),
                &mut self.session,
            )
            .await?;
        collect(cursor, &mut self.session).await
    }

    async fn candidate(&mut self, id: Id) -> Result<Option<Candidate>> {
        Ok(self
            .colls
            .candidates
            .find_one_with_session(id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn member(&mut self, id: Id) -> Result<Option<Member>> {
        Ok(self
            .colls
            .members
            .find_one_with_session(id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn members_in(&mut self, chapter: Option<&str>) -> Result<Vec<Member>> {
        let filter = match chapter {
            Some(chapter) => doc! {"chapter": chapter},
            None => doc! {},
        };
        let cursor = self
            .colls
            .members
            .find_with_session(filter, sorted_by(doc! {"_id": 1}), &mut self.session)
            .await?;
        collect(cursor, &mut self.session).await
    }

    async fn vote(&mut self, id: Id) -> Result<Option<Vote>> {
        Ok(self
            .colls
            .votes
            .find_one_with_session(id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn find_vote(
        &mut self,
        member_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<Option<Vote>> {
        let filter = doc! {
            "member_id": member_id,
            "position_id": position_id,
            "election_id": election_id,
        };
        Ok(self
            .colls
            .votes
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn voted_positions(&mut self, member_id: Id, election_id: Id) -> Result<Vec<Id>> {
        let filter = doc! {
            "member_id": member_id,
            "election_id": election_id,
        };
        let positions = self
            .colls
            .votes
            .distinct_with_session("position_id", filter, None, &mut self.session)
            .await?;
        Ok(positions
            .into_iter()
            .filter_map(|id| id.as_object_id().map(Id::from))
            .collect())
    }

    async fn cast_counts(&mut self, election_id: Id) -> Result<HashMap<Id, u64>> {
        let pipeline = [
            doc! {"$match": {"election_id": election_id, "status": VoteStatus::Cast}},
            doc! {"$group": {"_id": "$candidate_id", "count": {"$sum": 1}}},
        ];
        let cursor = self
            .colls
            .votes
            .aggregate_with_session(pipeline, None, &mut self.session)
            .await?;
        let groups = collect(cursor, &mut self.session).await?;
        Ok(groups
            .into_iter()
            .filter_map(|group| {
                let candidate = group.get_object_id("_id").ok()?;
                Some((Id::from(candidate), count_of(group.get("count"))))
            })
            .collect())
    }

    async fn link(&mut self, id: Id) -> Result<Option<VotingLink>> {
        Ok(self
            .colls
            .links
            .find_one_with_session(id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn link_by_hash(&mut self, token_hash: &str) -> Result<Option<VotingLink>> {
        Ok(self
            .colls
            .links
            .find_one_with_session(doc! {"token_hash": token_hash}, None, &mut self.session)
            .await?)
    }

    async fn live_link(&mut self, member_id: Id, election_id: Id) -> Result<Option<VotingLink>> {
        let filter = doc! {"active_slot": VotingLink::slot_key(member_id, election_id)};
        Ok(self
            .colls
            .links
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn audit_log(
        &mut self,
        election_id: Id,
        skip: u64,
        limit: u32,
    ) -> Result<(u64, Vec<VotingLog>)> {
        let filter = doc! {"election_id": election_id};
        let total = self
            .colls
            .logs
            .count_documents_with_session(filter.clone(), None, &mut self.session)
            .await?;
        let options = FindOptions::builder()
            .sort(doc! {"timestamp": -1, "_id": -1})
            .skip(skip)
            .limit(i64::from(limit))
            .build();
        let cursor = self
            .colls
            .logs
            .find_with_session(filter, options, &mut self.session)
            .await?;
        Ok((total, collect(cursor, &mut self.session).await?))
    }
}

#[rocket::async_trait]
impl Transaction for MongoSession {
    async fn insert_election(&mut self, election: &Election) -> Result<()> {
        self.colls
            .elections
            .insert_one_with_session(election, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn insert_position(&mut self, position: &Position) -> Result<()> {
        self.colls
            .positions
            .insert_one_with_session(position, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> Result<()> {
        self.colls
            .candidates
            .insert_one_with_session(candidate, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn insert_link(&mut self, link: &VotingLink) -> Result<()> {
        match self
            .colls
            .links
            .insert_one_with_session(link, None, &mut self.session)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                Err(Error::Constraint("voting link".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_vote(&mut self, vote: &Vote) -> Result<()> {
        match self
            .colls
            .votes
            .insert_one_with_session(vote, None, &mut self.session)
            .await
        {
            Ok(_) => Ok(()),
            // Lost the race with a concurrent vote for the same position.
            Err(e) if is_duplicate_key_error(&e) => Err(Error::DuplicateVote),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_log(&mut self, log: &VotingLog) -> Result<()> {
        self.colls
            .logs
            .insert_one_with_session(log, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn increment_tallies(
        &mut self,
        candidate_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<()> {
        self.colls
            .candidates
            .update_one_with_session(
                candidate_id.as_doc(),
                doc! {"$inc": {"votes_count": 1_i64}},
                None,
                &mut self.session,
            )
            .await?;
        self.colls
            .positions
            .update_one_with_session(
                position_id.as_doc(),
                doc! {"$inc": {"total_votes": 1_i64}},
                None,
                &mut self.session,
            )
            .await?;
        self.colls
            .elections
            .update_one_with_session(
                election_id.as_doc(),
                doc! {"$inc": {"total_votes_cast": 1_i64}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn update_election_status(
        &mut self,
        id: Id,
        from: ElectionStatus,
        change: &StatusChange,
    ) -> Result<bool> {
        let filter = doc! {"_id": id, "status": from};
        let mut set = doc! {"status": change.status};
        if let Some(approved_by) = change.approved_by {
            set.insert("approved_by", approved_by);
        }
        if let Some(eligible) = change.total_eligible_voters {
            set.insert("total_eligible_voters", eligible as i64);
        }
        if let Some(closed_at) = change.closed_at {
            set.insert("closed_at", bson_time(closed_at));
        }
        let result = self
            .colls
            .elections
            .update_one_with_session(filter, doc! {"$set": set}, None, &mut self.session)
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn withdraw_candidate(&mut self, id: Id) -> Result<bool> {
        let result = self
            .colls
            .candidates
            .update_one_with_session(
                id.as_doc(),
                doc! {"$set": {"is_withdrawn": true}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn transition_link(
        &mut self,
        id: Id,
        from: LinkStatus,
        to: LinkStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let filter = doc! {"_id": id, "status": from};
        let mut set = doc! {"status": to};
        if to == LinkStatus::Used {
            set.insert("used_at", bson_time(at));
        }
        let mut update = doc! {"$set": set};
        if to.is_terminal() {
            update.insert("$unset", doc! {"active_slot": ""});
        }
        let result = self
            .colls
            .links
            .update_one_with_session(filter, update, None, &mut self.session)
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn record_link_access(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
        let update = doc! {
            "$inc": {"access_count": 1_i64},
            "$set": {"accessed_at": bson_time(at)},
        };
        self.colls
            .links
            .update_one_with_session(id.as_doc(), update, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn record_link_email(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
        let update = doc! {
            "$set": {"email_sent": true, "email_sent_at": bson_time(at)},
        };
        self.colls
            .links
            .update_one_with_session(id.as_doc(), update, None, &mut self.session)
            .await?;
        self.colls
            .links
            .update_one_with_session(
                doc! {"_id": id, "status": LinkStatus::Pending},
                doc! {"$set": {"status": LinkStatus::Sent}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn annotate_vote(
        &mut self,
        id: Id,
        from: VoteStatus,
        to: VoteStatus,
        annotation: &Annotation,
    ) -> Result<bool> {
        let annotation = to_bson(annotation).map_err(DbError::from)?;
        let result = self
            .colls
            .votes
            .update_one_with_session(
                doc! {"_id": id, "status": from},
                doc! {"$set": {"status": to, "annotation": annotation}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn set_vote_percentage(&mut self, candidate_id: Id, percentage: f64) -> Result<()> {
        self.colls
            .candidates
            .update_one_with_session(
                candidate_id.as_doc(),
                doc! {"$set": {"vote_percentage": percentage}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn set_turnout(&mut self, election_id: Id, percentage: f64) -> Result<()> {
        self.colls
            .elections
            .update_one_with_session(
                election_id.as_doc(),
                doc! {"$set": {"turnout_percentage": percentage}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn set_candidate_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        self.colls
            .candidates
            .update_one_with_session(
                id.as_doc(),
                doc! {"$set": {"votes_count": votes as i64}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn set_position_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        self.colls
            .positions
            .update_one_with_session(
                id.as_doc(),
                doc! {"$set": {"total_votes": votes as i64}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn set_election_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        self.colls
            .elections
            .update_one_with_session(
                id.as_doc(),
                doc! {"$set": {"total_votes_cast": votes as i64}},
                None,
                &mut self.session,
            )
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.session.commit_transaction().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.session.abort_transaction().await?;
        Ok(())
    }
}
