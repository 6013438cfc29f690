// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of agora.
//
// agora is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// agora is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with agora.  If not,
// see <http://www.gnu.org/licenses/>.

//! # storage
//!
//! Abstractions for the agora storage layer.
//!
//! The engine never talks to a particular store; it talks to a [Backend], which is handed to it
//! at construction. The one capability that matters most is [Backend::apply_atomically]: every
//! mutation the engine makes goes through it, as a list of [IndexOp]s guarded by a list of
//! [Precondition]s. An implementation may realize that with a multi-key transaction, an optimistic
//! lock, or (for a single-node, in-process store) a lock held across the batch; the engine doesn't
//! care which.

use std::{collections::HashSet, fmt::Display};

use async_trait::async_trait;
use snafu::{Backtrace, prelude::*};

use crate::{
    entities::{CommunityId, Direction, Order, PostId, PostRecord, RecordField, UserId},
    sorted_index::SortedIndex,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("The store reported inconsistent data at {key}: {what}"))]
    Corrupt {
        key: String,
        what: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid batch: {what}"))]
    InvalidBatch { what: String, backtrace: Backtrace },
    #[snafu(display("Storage backend error: {source}"))]
    Other {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[snafu(display("The store is unavailable: {what}"))]
    Unavailable { what: String, backtrace: Backtrace },
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Other {
            source: Box::new(err),
        }
    }
    /// True if retrying the operation that produced this error might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Await `fut`, but for no longer than `timeout`
///
/// Running out of time is reported as [Error::Unavailable], i.e. as a transient failure. Nb. that
/// this drops `fut` on timeout; it's up to the [Backend] implementation to guarantee that doing so
/// doesn't leave anything half-done.
pub async fn bounded<T, F>(timeout: std::time::Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => UnavailableSnafu {
            what: format!("{} timed out after {:?}", op, timeout),
        }
        .fail(),
    }
}

/// Names one ranking: either one of the two global rankings, or a community-scoped view derived
/// from one of them
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RankingKey {
    Global(Order),
    Community(Order, CommunityId),
}

impl RankingKey {
    pub fn order(&self) -> Order {
        match self {
            RankingKey::Global(order) => *order,
            RankingKey::Community(order, _) => *order,
        }
    }
}

impl Display for RankingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankingKey::Global(order) => write!(f, "post:{}", order),
            RankingKey::Community(order, community) => write!(f, "post:{}:{}", order, community),
        }
    }
}

/// A single mutation to be applied as part of an atomic batch
#[derive(Clone, Debug, PartialEq)]
pub enum IndexOp {
    /// Set `post`'s score in one of the global rankings
    UpsertRanking {
        order: Order,
        post: PostId,
        score: f64,
    },
    /// Add `delta` to `post`'s score in one of the global rankings
    IncrementRanking {
        order: Order,
        post: PostId,
        delta: f64,
    },
    /// Record `voter`'s vote on `post`; `direction` must be [Direction::Up] or [Direction::Down]
    SetVote {
        post: PostId,
        voter: UserId,
        direction: Direction,
    },
    /// Remove `voter`'s vote on `post`, if any
    ClearVote { post: PostId, voter: UserId },
    /// Create or replace `post`'s record snapshot
    PutRecord { post: PostId, record: PostRecord },
    /// Add `delta` to one of the numeric fields of `post`'s record snapshot (saturating at zero);
    /// the record must exist
    IncrementField {
        post: PostId,
        field: RecordField,
        delta: i64,
    },
    /// Add `post` to `community`'s post set
    AddToCommunity { community: CommunityId, post: PostId },
}

/// A condition that must hold for an atomic batch to be applied
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Precondition {
    /// `voter`'s vote on `post` is currently `expected` ([Direction::Neutral] meaning "no vote")
    VoteIs {
        post: PostId,
        voter: UserId,
        expected: Direction,
    },
    /// `post` is present in the by-time ranking
    PostExists(PostId),
    /// `post` is *not* present in the by-time ranking
    PostAbsent(PostId),
}

/// The outcome of [Backend::apply_atomically]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Applied {
    /// Every precondition held & every op was applied
    Committed,
    /// At least one precondition failed; nothing was applied
    Conflict,
}

#[async_trait]
pub trait Backend {
    /// Retrieve `post`'s score in the given global ranking; None means it's not there.
    async fn score(&self, order: Order, post: &PostId) -> Result<Option<f64>>;
    /// Retrieve members of the ranking named by `key`, ranks `start` through `stop` inclusive,
    /// highest score first.
    ///
    /// Returns None if `key` names a community-scoped ranking that doesn't exist (or has expired).
    /// The global rankings always exist (they may be empty).
    async fn range_by_rank_desc(
        &self,
        key: &RankingKey,
        start: usize,
        stop: usize,
    ) -> Result<Option<Vec<PostId>>>;
    /// Take a copy of a global ranking, in its entirety
    ///
    /// This is expensive & is only used when a community-scoped ranking can't be materialized in
    /// the store.
    async fn ranking_snapshot(&self, order: Order) -> Result<SortedIndex<PostId>>;
    /// Retrieve `voter`'s current vote on `post`; [Direction::Neutral] means there is none.
    async fn vote(&self, post: &PostId, voter: &UserId) -> Result<Direction>;
    /// Count the votes on `post` whose value lies in `[min, max]`; up-votes are 1 & down-votes -1.
    async fn count_votes(&self, post: &PostId, min: f64, max: f64) -> Result<u64>;
    /// Retrieve record snapshots for `posts`, in order; None for any post without one.
    async fn records(&self, posts: &[PostId]) -> Result<Vec<Option<PostRecord>>>;
    /// Retrieve the IDs of all posts in `community`
    async fn community_members(&self, community: &CommunityId) -> Result<HashSet<PostId>>;
    /// Return true if the community-scoped ranking `(order, community)` exists & hasn't expired
    async fn cached_exists(&self, order: Order, community: &CommunityId) -> Result<bool>;
    /// (Re)build the community-scoped ranking `(order, community)` as the intersection of that
    /// community's post set with the global `order` ranking (each member keeping its global
    /// score), to expire after `ttl`; return the number of members.
    ///
    /// This must be idempotent: building the same ranking twice, concurrently or not, is wasted
    /// work but never incorrect.
    async fn store_intersection(
        &self,
        order: Order,
        community: &CommunityId,
        ttl: std::time::Duration,
    ) -> Result<usize>;
    /// Atomically check `preconditions` & apply `ops`
    ///
    /// If any precondition fails, return [Applied::Conflict] having changed nothing. Otherwise,
    /// apply every op & return [Applied::Committed]. On error, nothing may have been applied.
    /// Dropping the returned future must leave the store either fully committed or untouched.
    async fn apply_atomically(
        &self,
        preconditions: &[Precondition],
        ops: &[IndexOp],
    ) -> Result<Applied>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ranking_keys() {
        assert_eq!(format!("{}", RankingKey::Global(Order::Time)), "post:time");
        assert_eq!(
            format!("{}", RankingKey::Community(Order::Score, CommunityId::new(5))),
            "post:score:5"
        );
        assert_eq!(
            RankingKey::Community(Order::Score, CommunityId::new(5)).order(),
            Order::Score
        );
    }

    #[test]
    fn transience() {
        assert!(
            UnavailableSnafu {
                what: "connection reset"
            }
            .build()
            .is_transient()
        );
        assert!(
            !CorruptSnafu {
                key: "post:1",
                what: "bad ledger"
            }
            .build()
            .is_transient()
        );
        assert!(!Error::new(std::io::Error::other("boom")).is_transient());
    }

    #[tokio::test]
    async fn deadlines() {
        let quick = bounded(std::time::Duration::from_millis(50), "quick", async {
            Ok::<u32, Error>(7)
        })
        .await;
        assert_eq!(quick.unwrap(), 7);

        let slow = bounded(std::time::Duration::from_millis(10), "slow", async {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok::<u32, Error>(7)
        })
        .await;
        assert!(slow.unwrap_err().is_transient());
    }
}
