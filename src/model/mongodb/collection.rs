use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    audit::VotingLog,
    election::{Candidate, Election, Position},
    link::VotingLink,
    member::Member,
    vote::Vote,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for Position {
    const NAME: &'static str = "positions";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

/// Owned by the wider membership platform; read only here.
impl MongoCollection for Member {
    const NAME: &'static str = "members";
}

impl MongoCollection for VotingLink {
    const NAME: &'static str = "voting_links";
}

impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}

impl MongoCollection for VotingLog {
    const NAME: &'static str = "voting_logs";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Votes: the exactly-once guarantee lives here.
    let vote_index = IndexModel::builder()
        .keys(doc! {"member_id": 1, "position_id": 1, "election_id": 1})
        .options(unique.clone())
        .build();
    let vote_election_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1, "status": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_indexes([vote_index, vote_election_index], None)
        .await?;

    // Voting links: lookup by hash, and one live link per member and election.
    let hash_index = IndexModel::builder()
        .keys(doc! {"token_hash": 1})
        .options(unique.clone())
        .build();
    let slot_index = IndexModel::builder()
        .keys(doc! {"active_slot": 1})
        .options(IndexOptions::builder().unique(true).sparse(true).build())
        .build();
    let member_index = IndexModel::builder()
        .keys(doc! {"member_id": 1, "election_id": 1})
        .build();
    Coll::<VotingLink>::from_db(db)
        .create_indexes([hash_index, slot_index, member_index], None)
        .await?;

    // Ballot structure.
    let position_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "order": 1})
        .build();
    Coll::<Position>::from_db(db)
        .create_index(position_index, None)
        .await?;
    let candidate_index = IndexModel::builder()
        .keys(doc! {"position_id": 1, "order": 1})
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    // Audit log, read newest first per election.
    let log_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "timestamp": -1})
        .build();
    Coll::<VotingLog>::from_db(db)
        .create_index(log_index, None)
        .await?;

    Ok(())
}
