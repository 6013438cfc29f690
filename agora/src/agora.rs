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

//! # agora
//!
//! The operations agora exposes to its callers (an HTTP layer, in practice).
//!
//! [Agora] owns the vote engine & the ranking cache & is handed the store, the relational
//! collaborator & the clock at construction. The ranking-level operations
//! ([create_ranking](Agora::create_ranking), [cast_vote](Agora::cast_vote),
//! [list_ranking](Agora::list_ranking) & [vote_counts](Agora::vote_counts)) only touch the store;
//! the post-level ones ([create_post](Agora::create_post), [list_posts](Agora::list_posts) &
//! [post_detail](Agora::post_detail)) join in what's needed from the relational store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use snafu::{Backtrace, IntoError, prelude::*};
use tap::Pipe;
use tracing::{debug, info};

use crate::{
    clock::Clock,
    config::EngineConfig,
    counter_add,
    entities::{
        CommunityId, Direction, Order, PostId, PostRecord, RecordField, UserId, score_timestamp,
        timestamp_score, truncate_by_words,
    },
    hot_rank::hot_rank,
    metrics::{self, Instruments, Sort},
    ranking_cache::{self, RankingCache},
    relational::{self, Community, NewPost, Post, Relational},
    storage::{self, Applied, Backend, IndexOp, Precondition, bounded},
    votes::{self, VoteEngine},
};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Post {post} has already been ranked"))]
    AlreadyExists { post: PostId, backtrace: Backtrace },
    #[snafu(display("Page {page} of size {page_size} is not a valid page"))]
    BadPage {
        page: usize,
        page_size: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("No such community: {community}"))]
    CommunityNotFound { community: CommunityId },
    #[snafu(display("No such post: {post}"))]
    PostNotFound { post: PostId },
    #[snafu(display("While reading a ranking: {source}"))]
    Ranking { source: ranking_cache::Error },
    #[snafu(display("While {op}, the relational store failed: {source}"))]
    Relational {
        op: &'static str,
        source: relational::Error,
    },
    #[snafu(display("While {op}, the store failed: {source}"))]
    Store {
        op: &'static str,
        source: storage::Error,
    },
    #[snafu(display("No such user: {user}"))]
    UserNotFound { user: UserId },
}

impl Error {
    /// True if the failure was a transient one in the backing store
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Ranking { source } => source.is_transient(),
            Error::Store { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("posts.created", Sort::IntegralCounter) }

/// One entry in a listing
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostSummary {
    pub id: PostId,
    pub title: String,
    pub summary: String,
    pub author: UserId,
    pub community: CommunityId,
    pub created_at: DateTime<Utc>,
    /// Up-votes
    pub votes: u64,
    pub comments: u64,
}

/// A page of a listing, along with what a client needs to paginate
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostPage {
    pub page: usize,
    pub page_size: usize,
    /// Total number of posts in the listing, per the relational store
    ///
    /// This is read independently of `posts` & may disagree with it momentarily (a community's
    /// ranking may not yet include a just-created post, for instance).
    pub total: u64,
    pub posts: Vec<PostSummary>,
}

/// Everything about a single post
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostDetail {
    pub post: Post,
    pub author_name: String,
    pub community: Community,
    /// Up-votes
    pub votes: u64,
    pub score: f64,
    pub hot_rank: f64,
}

/// The agora engine; see the module documentation
pub struct Agora {
    store: Arc<dyn Backend + Send + Sync>,
    relational: Arc<dyn Relational + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
    instruments: Arc<Instruments>,
    config: EngineConfig,
    votes: VoteEngine,
    rankings: RankingCache,
}

impl Agora {
    pub fn new(
        store: Arc<dyn Backend + Send + Sync>,
        relational: Arc<dyn Relational + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        instruments: Arc<Instruments>,
        config: EngineConfig,
    ) -> Agora {
        let votes = VoteEngine::new(store.clone(), clock.clone(), instruments.clone(), &config);
        let rankings = RankingCache::new(
            store.clone(),
            instruments.clone(),
            config.ranking_cache_ttl,
            config.store_timeout,
        );
        Agora {
            store,
            relational,
            clock,
            instruments,
            config,
            votes,
            rankings,
        }
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = storage::Result<T>>,
    {
        bounded(self.config.store_timeout, op, fut)
            .await
            .map_err(|err| StoreSnafu { op }.into_error(err))
    }
    fn relational_context(op: &'static str) -> impl FnOnce(relational::Error) -> Error {
        move |err| RelationalSnafu { op }.into_error(err)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                     rankings & votes                                     //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Enter a newly-created post into the rankings
    ///
    /// Seeds both global rankings, the post's ledger (its author is deemed to have voted it up),
    /// its record snapshot & its community's post set, all at once. Fails with
    /// [Error::AlreadyExists] (changing nothing) if the post has been ranked before.
    #[tracing::instrument(skip(self, title, summary))]
    pub async fn create_ranking(
        &self,
        post: PostId,
        author: UserId,
        community: CommunityId,
        title: &str,
        summary: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let created = timestamp_score(&created_at);
        let ops = [
            IndexOp::UpsertRanking {
                order: Order::Time,
                post,
                score: created,
            },
            IndexOp::UpsertRanking {
                order: Order::Score,
                post,
                score: created + self.config.vote_weight,
            },
            IndexOp::SetVote {
                post,
                voter: author,
                direction: Direction::Up,
            },
            IndexOp::PutRecord {
                post,
                record: PostRecord {
                    title: title.to_owned(),
                    summary: summary.to_owned(),
                    author,
                    community,
                    created_at,
                    votes: 1,
                    comments: 0,
                },
            },
            IndexOp::AddToCommunity { community, post },
        ];
        match self
            .bounded(
                "seeding a ranking",
                self.store
                    .apply_atomically(&[Precondition::PostAbsent(post)], &ops),
            )
            .await?
        {
            Applied::Committed => {
                debug!("Ranked post {} in community {}", post, community);
                Ok(())
            }
            Applied::Conflict => AlreadyExistsSnafu { post }.fail(),
        }
    }
    /// Record `voter`'s vote of `direction` on `post`; see [VoteEngine::cast_vote]
    pub async fn cast_vote(
        &self,
        voter: UserId,
        post: PostId,
        direction: Direction,
    ) -> votes::Result<()> {
        self.votes.cast_vote(voter, post, direction).await
    }
    /// Record a vote given as a raw integer (-1, 0 or 1)
    pub async fn cast_raw_vote(
        &self,
        voter: UserId,
        post: PostId,
        direction: i8,
    ) -> votes::Result<()> {
        self.votes.cast_raw_vote(voter, post, direction).await
    }
    /// Return page `page` (1-based) of the ranking for `order`, optionally scoped to `community`
    ///
    /// `page_size` defaults to the configured default & is clamped to the configured maximum. A
    /// page past the end is empty, not an error.
    #[tracing::instrument(skip(self))]
    pub async fn list_ranking(
        &self,
        order: Order,
        community: Option<CommunityId>,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<Vec<PostId>> {
        let page_size = self.page_size(page_size);
        let (start, stop) = page_bounds(page, page_size)?;
        self.rankings
            .page(order, community, start, stop)
            .await
            .context(RankingSnafu)
    }
    /// Return the number of up-votes on each of `posts` (zero for unknown posts)
    pub async fn vote_counts(&self, posts: &[PostId]) -> Result<Vec<u64>> {
        posts
            .iter()
            .map(|post| self.bounded("counting votes", self.store.count_votes(post, 1.0, 1.0)))
            .pipe(try_join_all)
            .await
    }
    /// Compute `post`'s "hot" rank from its current votes
    pub async fn hot_rank(&self, post: PostId) -> Result<f64> {
        let created = self
            .bounded("reading creation time", self.store.score(Order::Time, &post))
            .await?
            .and_then(score_timestamp)
            .context(PostNotFoundSnafu { post })?;
        let (ups, downs) = futures::try_join!(
            self.bounded("counting votes", self.store.count_votes(&post, 1.0, 1.0)),
            self.bounded("counting votes", self.store.count_votes(&post, -1.0, -1.0)),
        )?;
        Ok(hot_rank(ups, downs, &created))
    }
    fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_page_size)
            .min(self.config.max_page_size)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////
    //                                          posts                                           //
    ////////////////////////////////////////////////////////////////////////////////////////////

    /// Create a post: persist it, then rank it
    #[tracing::instrument(skip(self, title, content))]
    pub async fn create_post(
        &self,
        author: UserId,
        community: CommunityId,
        title: &str,
        content: &str,
    ) -> Result<PostId> {
        self.relational
            .get_community_by_id(&community)
            .await
            .map_err(Agora::relational_context("looking up a community"))?
            .context(CommunityNotFoundSnafu { community })?;

        let created_at = self.clock.now();
        let post = self
            .relational
            .create_post(NewPost {
                author,
                community,
                title: title.to_owned(),
                content: content.to_owned(),
                created_at,
            })
            .await
            .map_err(Agora::relational_context("creating a post"))?;

        let summary = truncate_by_words(content, self.config.summary_words);
        self.create_ranking(post, author, community, title, &summary, created_at)
            .await?;

        counter_add!(self.instruments, "posts.created", 1, &[]);
        info!("{} created post {} in community {}", author, post, community);
        Ok(post)
    }
    /// Return page `page` of the listing for `order`, optionally scoped to `community`, along
    /// with pagination metadata
    pub async fn list_posts(
        &self,
        order: Order,
        community: Option<CommunityId>,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<PostPage> {
        let total = match community.filter(|c| !c.is_unscoped()) {
            Some(community) => {
                self.relational
                    .get_total_post_count_for_community(&community)
                    .await
            }
            None => self.relational.get_total_post_count().await,
        }
        .map_err(Agora::relational_context("counting posts"))?;

        let page_size = self.page_size(page_size);
        let ids = self.list_ranking(order, community, page, Some(page_size)).await?;
        let (records, votes) = futures::try_join!(
            self.bounded("reading records", self.store.records(&ids)),
            self.vote_counts(&ids),
        )?;

        let posts = ids
            .into_iter()
            .zip(records)
            .zip(votes)
            .filter_map(|((id, record), votes)| {
                record.map(|record| PostSummary {
                    id,
                    title: record.title,
                    summary: record.summary,
                    author: record.author,
                    community: record.community,
                    created_at: record.created_at,
                    votes,
                    comments: record.comments,
                })
            })
            .collect();

        Ok(PostPage {
            page,
            page_size,
            total,
            posts,
        })
    }
    /// Retrieve a post together with its author, community & current standing
    pub async fn post_detail(&self, post: PostId) -> Result<PostDetail> {
        let detail = self
            .relational
            .get_post_by_id(&post)
            .await
            .map_err(Agora::relational_context("looking up a post"))?
            .context(PostNotFoundSnafu { post })?;
        let author = self
            .relational
            .get_user_by_id(&detail.author)
            .await
            .map_err(Agora::relational_context("looking up a user"))?
            .context(UserNotFoundSnafu {
                user: detail.author,
            })?;
        let community = self
            .relational
            .get_community_by_id(&detail.community)
            .await
            .map_err(Agora::relational_context("looking up a community"))?
            .context(CommunityNotFoundSnafu {
                community: detail.community,
            })?;
        let votes = self.vote_counts(&[post]).await?.pop().unwrap_or(0);
        let score = self
            .bounded("reading score", self.store.score(Order::Score, &post))
            .await?
            .context(PostNotFoundSnafu { post })?;
        let hot_rank = self.hot_rank(post).await?;
        Ok(PostDetail {
            post: detail,
            author_name: author.name,
            community,
            votes,
            score,
            hot_rank,
        })
    }
    /// Note that a comment was made on `post`
    pub async fn record_comment(&self, post: PostId) -> Result<()> {
        match self
            .bounded(
                "counting a comment",
                self.store.apply_atomically(
                    &[Precondition::PostExists(post)],
                    &[IndexOp::IncrementField {
                        post,
                        field: RecordField::Comments,
                        delta: 1,
                    }],
                ),
            )
            .await?
        {
            Applied::Committed => Ok(()),
            Applied::Conflict => PostNotFoundSnafu { post }.fail(),
        }
    }
}

/// Map a 1-based page number & page size to an inclusive range of ranks
fn page_bounds(page: usize, page_size: usize) -> Result<(usize, usize)> {
    ensure!(page > 0 && page_size > 0, BadPageSnafu { page, page_size });
    let start = (page - 1)
        .checked_mul(page_size)
        .context(BadPageSnafu { page, page_size })?;
    let stop = start
        .checked_add(page_size - 1)
        .context(BadPageSnafu { page, page_size })?;
    Ok((start, stop))
}
