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

//! # ranking-cache
//!
//! Community-scoped rankings.
//!
//! The two global rankings are authoritative & always current. A community's ranking is derived:
//! it's the intersection of the community's post set with one of the global rankings, each post
//! keeping its global score. Deriving it is O(community size), so it's materialized in the store
//! with a TTL & rebuilt (from scratch) once that lapses. Votes never touch it, so a community
//! listing can lag the global ranking by up to one TTL.
//!
//! Rebuilds are single-flight per ranking: concurrent callers who find the same ranking missing
//! queue up behind the first, & find it present when their turn comes. That's only about saving
//! work; a redundant rebuild yields the same ranking.
//!
//! If the rebuild fails, the request isn't failed along with it: we compute the intersection
//! locally, use it for this one request, & leave the store alone.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use snafu::{IntoError, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{CommunityId, Order, PostId},
    gauge_setu,
    metrics::{self, Instruments, Sort},
    sorted_index::SortedIndex,
    storage::{self, Backend, RankingKey, bounded},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("While {op}, the store failed: {source}"))]
    Store {
        op: &'static str,
        source: storage::Error,
    },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store { source, .. } => source.is_transient(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("ranking.cache.hits", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("ranking.cache.rebuilds", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("ranking.cache.fallbacks", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("ranking.cache.members", Sort::IntegralGauge) }

/// Where to find a ranking
#[derive(Debug)]
pub enum Resolved {
    /// In the store, under this key
    Stored(RankingKey),
    /// The store couldn't produce it; here's a one-off copy
    Uncached(SortedIndex<PostId>),
}

type Flights = Mutex<HashMap<(Order, CommunityId), Arc<tokio::sync::Mutex<()>>>>;

pub struct RankingCache {
    store: Arc<dyn Backend + Send + Sync>,
    instruments: Arc<Instruments>,
    ttl: std::time::Duration,
    store_timeout: std::time::Duration,
    // One entry per (order, community) ever rebuilt; that's bounded by twice the number of
    // communities, so I don't bother reaping them.
    flights: Flights,
}

impl RankingCache {
    pub fn new(
        store: Arc<dyn Backend + Send + Sync>,
        instruments: Arc<Instruments>,
        ttl: std::time::Duration,
        store_timeout: std::time::Duration,
    ) -> RankingCache {
        RankingCache {
            store,
            instruments,
            ttl,
            store_timeout,
            flights: Mutex::new(HashMap::new()),
        }
    }
    /// Find the ranking for `order`, scoped to `community` if that's given & non-zero
    pub async fn resolve(&self, order: Order, community: Option<CommunityId>) -> Result<Resolved> {
        let community = match community {
            Some(community) if !community.is_unscoped() => community,
            _ => return Ok(Resolved::Stored(RankingKey::Global(order))),
        };
        let key = RankingKey::Community(order, community);
        match self.ensure_cached(order, community).await {
            Ok(()) => Ok(Resolved::Stored(key)),
            Err(err) => {
                warn!("Failed to materialize {}: {}; computing it locally", key, err);
                counter_add!(self.instruments, "ranking.cache.fallbacks", 1, &[]);
                self.intersect_locally(order, community)
                    .await
                    .map(Resolved::Uncached)
            }
        }
    }
    /// Retrieve ranks `start` through `stop` (inclusive) of the ranking for `order`, scoped to
    /// `community` if that's given & non-zero
    pub async fn page(
        &self,
        order: Order,
        community: Option<CommunityId>,
        start: usize,
        stop: usize,
    ) -> Result<Vec<PostId>> {
        match self.resolve(order, community).await? {
            Resolved::Uncached(index) => Ok(index.range_by_rank_desc(start, stop)),
            Resolved::Stored(key) => {
                let page = bounded(
                    self.store_timeout,
                    "ranging",
                    self.store.range_by_rank_desc(&key, start, stop),
                )
                .await
                .map_err(|err| StoreSnafu { op: "reading a ranking" }.into_error(err))?;
                match (page, key) {
                    (Some(page), _) => Ok(page),
                    // It expired between `resolve` & now; don't go around again, just answer this
                    // request directly
                    (None, RankingKey::Community(order, community)) => {
                        debug!("{} expired underneath us", key);
                        Ok(self
                            .intersect_locally(order, community)
                            .await?
                            .range_by_rank_desc(start, stop))
                    }
                    (None, RankingKey::Global(_)) => Ok(Vec::new()),
                }
            }
        }
    }
    async fn ensure_cached(&self, order: Order, community: CommunityId) -> Result<()> {
        if self.cached_exists(order, community).await? {
            counter_add!(self.instruments, "ranking.cache.hits", 1, &[]);
            return Ok(());
        }

        let flight = {
            let mut flights = self.flights.lock().unwrap_or_else(|err| err.into_inner());
            flights.entry((order, community)).or_default().clone()
        };
        let _guard = flight.lock().await;

        // Someone may have rebuilt it while we waited
        if self.cached_exists(order, community).await? {
            counter_add!(self.instruments, "ranking.cache.hits", 1, &[]);
            return Ok(());
        }

        let members = bounded(
            self.store_timeout,
            "rebuilding",
            self.store.store_intersection(order, &community, self.ttl),
        )
        .await
        .map_err(|err| {
            StoreSnafu {
                op: "rebuilding a community ranking",
            }
            .into_error(err)
        })?;
        debug!(
            "Rebuilt {} ({} members)",
            RankingKey::Community(order, community),
            members
        );
        counter_add!(self.instruments, "ranking.cache.rebuilds", 1, &[]);
        gauge_setu!(self.instruments, "ranking.cache.members", members as u64, &[]);
        Ok(())
    }
    async fn cached_exists(&self, order: Order, community: CommunityId) -> Result<bool> {
        bounded(
            self.store_timeout,
            "checking",
            self.store.cached_exists(order, &community),
        )
        .await
        .map_err(|err| {
            StoreSnafu {
                op: "checking for a community ranking",
            }
            .into_error(err)
        })
    }
    async fn intersect_locally(
        &self,
        order: Order,
        community: CommunityId,
    ) -> Result<SortedIndex<PostId>> {
        let (members, ranking) = futures::try_join!(
            bounded(
                self.store_timeout,
                "listing members",
                self.store.community_members(&community)
            ),
            bounded(
                self.store_timeout,
                "copying ranking",
                self.store.ranking_snapshot(order)
            ),
        )
        .map_err(|err| {
            StoreSnafu {
                op: "computing a community ranking",
            }
            .into_error(err)
        })?;
        Ok(ranking.intersect(|m| members.contains(m)))
    }
}
