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

//! # in-memory
//!
//! Single-process implementations of [storage::Backend] & [relational::Relational].
//!
//! [InMemory] is a complete [storage::Backend]: it's what the simulator runs against & what the
//! tests use as a fixture. All state sits behind one [tokio::sync::RwLock]. An atomic batch is
//! applied entirely while holding the write guard, and nothing inside the batch awaits, so a batch
//! can't be observed half-applied & dropping the future either leaves it un-started or
//! finished.
//!
//! [storage::Backend]: crate::storage::Backend
//! [relational::Relational]: crate::relational::Relational

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    clock::Clock,
    entities::{CommunityId, Direction, Order, PostId, PostRecord, RecordField, UserId},
    relational::{self, Community, NewPost, Post, Relational, User},
    sorted_index::SortedIndex,
    storage::{
        self, Applied, Backend, CorruptSnafu, IndexOp, InvalidBatchSnafu, Precondition, RankingKey,
    },
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       storage::Backend                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct Cached {
    index: SortedIndex<PostId>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    by_time: SortedIndex<PostId>,
    by_score: SortedIndex<PostId>,
    ledgers: HashMap<PostId, SortedIndex<UserId>>,
    records: HashMap<PostId, PostRecord>,
    communities: HashMap<CommunityId, HashSet<PostId>>,
    cached: HashMap<(Order, CommunityId), Cached>,
}

impl State {
    fn ranking(&self, order: Order) -> &SortedIndex<PostId> {
        match order {
            Order::Time => &self.by_time,
            Order::Score => &self.by_score,
        }
    }
    fn ranking_mut(&mut self, order: Order) -> &mut SortedIndex<PostId> {
        match order {
            Order::Time => &mut self.by_time,
            Order::Score => &mut self.by_score,
        }
    }
    fn vote(&self, post: &PostId, voter: &UserId) -> storage::Result<Direction> {
        match self.ledgers.get(post).and_then(|l| l.score(voter)) {
            None => Ok(Direction::Neutral),
            Some(score) => Direction::from_ledger_score(score).context(CorruptSnafu {
                key: format!("post:voted:{}", post),
                what: format!("{} has ledger value {}", voter, score),
            }),
        }
    }
    fn holds(&self, precondition: &Precondition) -> storage::Result<bool> {
        Ok(match precondition {
            Precondition::VoteIs {
                post,
                voter,
                expected,
            } => self.vote(post, voter)? == *expected,
            Precondition::PostExists(post) => self.by_time.contains(post),
            Precondition::PostAbsent(post) => !self.by_time.contains(post),
        })
    }
    /// Check that every op in `ops` can be applied, so that [State::apply] can't fail partway
    fn validate(&self, ops: &[IndexOp]) -> storage::Result<()> {
        let mut new_records = HashSet::new();
        for op in ops {
            match op {
                IndexOp::SetVote {
                    direction: Direction::Neutral,
                    ..
                } => {
                    return InvalidBatchSnafu {
                        what: "a neutral vote must be cleared, not set",
                    }
                    .fail();
                }
                IndexOp::PutRecord { post, .. } => {
                    new_records.insert(*post);
                }
                IndexOp::IncrementField { post, .. } => {
                    ensure!(
                        self.records.contains_key(post) || new_records.contains(post),
                        InvalidBatchSnafu {
                            what: format!("post {} has no record", post)
                        }
                    );
                }
                _ => (),
            }
        }
        Ok(())
    }
    fn apply(&mut self, op: &IndexOp) {
        match op {
            IndexOp::UpsertRanking { order, post, score } => {
                self.ranking_mut(*order).upsert(*post, *score);
            }
            IndexOp::IncrementRanking { order, post, delta } => {
                self.ranking_mut(*order).increment_score(*post, *delta);
            }
            IndexOp::SetVote {
                post,
                voter,
                direction,
            } => {
                if let Some(score) = direction.ledger_score() {
                    self.ledgers.entry(*post).or_default().upsert(*voter, score);
                }
            }
            IndexOp::ClearVote { post, voter } => {
                if let Some(ledger) = self.ledgers.get_mut(post) {
                    ledger.remove(voter);
                }
            }
            IndexOp::PutRecord { post, record } => {
                self.records.insert(*post, record.clone());
            }
            IndexOp::IncrementField { post, field, delta } => {
                if let Some(record) = self.records.get_mut(post) {
                    let value = match field {
                        RecordField::Votes => &mut record.votes,
                        RecordField::Comments => &mut record.comments,
                    };
                    *value = value.saturating_add_signed(*delta);
                }
            }
            IndexOp::AddToCommunity { community, post } => {
                self.communities.entry(*community).or_default().insert(*post);
            }
        }
    }
}

/// An in-process [Backend]
pub struct InMemory {
    state: RwLock<State>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl InMemory {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> InMemory {
        InMemory {
            state: RwLock::new(State::default()),
            clock,
        }
    }
}

#[async_trait]
impl Backend for InMemory {
    async fn score(&self, order: Order, post: &PostId) -> storage::Result<Option<f64>> {
        Ok(self.state.read().await.ranking(order).score(post))
    }
    async fn range_by_rank_desc(
        &self,
        key: &RankingKey,
        start: usize,
        stop: usize,
    ) -> storage::Result<Option<Vec<PostId>>> {
        let state = self.state.read().await;
        Ok(match key {
            RankingKey::Global(order) => {
                Some(state.ranking(*order).range_by_rank_desc(start, stop))
            }
            RankingKey::Community(order, community) => state
                .cached
                .get(&(*order, *community))
                .filter(|c| c.expires_at > self.clock.now())
                .map(|c| c.index.range_by_rank_desc(start, stop)),
        })
    }
    async fn ranking_snapshot(&self, order: Order) -> storage::Result<SortedIndex<PostId>> {
        Ok(self.state.read().await.ranking(order).clone())
    }
    async fn vote(&self, post: &PostId, voter: &UserId) -> storage::Result<Direction> {
        self.state.read().await.vote(post, voter)
    }
    async fn count_votes(&self, post: &PostId, min: f64, max: f64) -> storage::Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .ledgers
            .get(post)
            .map(|l| l.count_in_score_range(min, max) as u64)
            .unwrap_or(0))
    }
    async fn records(&self, posts: &[PostId]) -> storage::Result<Vec<Option<PostRecord>>> {
        let state = self.state.read().await;
        Ok(posts
            .iter()
            .map(|post| state.records.get(post).cloned())
            .collect())
    }
    async fn community_members(
        &self,
        community: &CommunityId,
    ) -> storage::Result<HashSet<PostId>> {
        Ok(self
            .state
            .read()
            .await
            .communities
            .get(community)
            .cloned()
            .unwrap_or_default())
    }
    async fn cached_exists(&self, order: Order, community: &CommunityId) -> storage::Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .cached
            .get(&(order, *community))
            .map(|c| c.expires_at > self.clock.now())
            .unwrap_or(false))
    }
    async fn store_intersection(
        &self,
        order: Order,
        community: &CommunityId,
        ttl: std::time::Duration,
    ) -> storage::Result<usize> {
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.state.write().await;
        let index = match state.communities.get(community) {
            Some(members) => state.ranking(order).intersect(|m| members.contains(m)),
            None => SortedIndex::new(),
        };
        let len = index.len();
        state
            .cached
            .insert((order, *community), Cached { index, expires_at });
        debug!("Stored {} members at post:{}:{}", len, order, community);
        Ok(len)
    }
    async fn apply_atomically(
        &self,
        preconditions: &[Precondition],
        ops: &[IndexOp],
    ) -> storage::Result<Applied> {
        let mut state = self.state.write().await;
        // No awaits past this point
        for precondition in preconditions {
            if !state.holds(precondition)? {
                debug!("Precondition {:?} failed", precondition);
                return Ok(Applied::Conflict);
            }
        }
        state.validate(ops)?;
        ops.iter().for_each(|op| state.apply(op));
        Ok(Applied::Committed)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      relational::Relational                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    posts: BTreeMap<PostId, Post>,
    users: HashMap<UserId, User>,
    communities: HashMap<CommunityId, Community>,
}

/// An in-process stand-in for the relational store
#[derive(Debug, Default)]
pub struct InMemoryRelational {
    tables: RwLock<Tables>,
}

impl InMemoryRelational {
    pub fn new() -> InMemoryRelational {
        InMemoryRelational::default()
    }
    pub async fn add_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }
    pub async fn add_community(&self, community: Community) {
        self.tables
            .write()
            .await
            .communities
            .insert(community.id, community);
    }
}

#[async_trait]
impl Relational for InMemoryRelational {
    async fn create_post(&self, post: NewPost) -> Result<PostId, relational::Error> {
        let mut tables = self.tables.write().await;
        tables.next_id += 1;
        let id = PostId::new(tables.next_id);
        tables.posts.insert(
            id,
            Post {
                id,
                author: post.author,
                community: post.community,
                title: post.title,
                content: post.content,
                created_at: post.created_at,
            },
        );
        Ok(id)
    }
    async fn get_post_by_id(&self, id: &PostId) -> Result<Option<Post>, relational::Error> {
        Ok(self.tables.read().await.posts.get(id).cloned())
    }
    async fn get_posts_by_ids(&self, ids: &[PostId]) -> Result<Vec<Post>, relational::Error> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.posts.get(id).cloned())
            .collect())
    }
    async fn get_total_post_count(&self) -> Result<u64, relational::Error> {
        Ok(self.tables.read().await.posts.len() as u64)
    }
    async fn get_total_post_count_for_community(
        &self,
        id: &CommunityId,
    ) -> Result<u64, relational::Error> {
        Ok(self
            .tables
            .read()
            .await
            .posts
            .values()
            .filter(|p| p.community == *id)
            .count() as u64)
    }
    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<User>, relational::Error> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }
    async fn get_community_by_id(
        &self,
        id: &CommunityId,
    ) -> Result<Option<Community>, relational::Error> {
        Ok(self.tables.read().await.communities.get(id).cloned())
    }
}
