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

//! # votes
//!
//! The vote engine.
//!
//! # Introduction
//!
//! Each (post, voter) pair is in one of three states: no vote, up or down. A request names the
//! state the voter wants to be in; [transition] works out what that means for the post's score &
//! vote count:
//!
//! | prior   | requested | score delta | count delta |
//! |---------|-----------|-------------|-------------|
//! | none    | up        | +W          | +1          |
//! | none    | down      | -W          | +1          |
//! | up      | down      | -2W         | 0           |
//! | down    | up        | +2W         | 0           |
//! | up      | none      | -W          | -1          |
//! | down    | none      | +W          | -1          |
//!
//! Asking for the state you're already in is refused with [Error::DuplicateVote]. The caller
//! should read that as "already done"; treating it as success would be fine too, but silently
//! applying it again would not.
//!
//! # Concurrency
//!
//! Votes on a post by *different* voters commute (they're just increments to the score & count)
//! and may be applied in any order. Votes by the *same* voter on the same post must serialize,
//! since each one's effect depends on the state the last one left behind. [VoteEngine::cast_vote]
//! handles that optimistically: it reads the voter's current state, computes the transition, and
//! submits the mutation conditioned on the voter's state being unchanged. If someone else got
//! there first, the store refuses the batch & we go around again, up to a configured number of
//! attempts. The condition is on a single ledger slot, so two different voters never conflict.

use std::sync::Arc;

use chrono::Duration;
use snafu::{Backtrace, IntoError, prelude::*};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    config::EngineConfig,
    counter_add,
    entities::{self, Direction, Order, PostId, RecordField, UserId, timestamp_score},
    metrics::{self, Instruments, Sort},
    storage::{self, Applied, Backend, IndexOp, Precondition, bounded},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("User {voter} has already voted {direction} on post {post}"))]
    DuplicateVote {
        post: PostId,
        voter: UserId,
        direction: Direction,
    },
    #[snafu(display("Invalid vote direction: {source}"))]
    InvalidDirection { source: entities::Error },
    #[snafu(display("Post {post} does not exist"))]
    NotFound { post: PostId },
    /// The store failed in a way retrying won't fix; nothing was changed
    #[snafu(display("While {op}, the store failed: {source}"))]
    Storage {
        op: &'static str,
        source: storage::Error,
    },
    #[snafu(display("While {op}, a transient failure occurred: {detail}; it is safe to retry"))]
    Transient {
        op: &'static str,
        detail: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Post {post} is {age_secs}s old; votes are accepted for {window_secs}s"))]
    WindowExpired {
        post: PostId,
        age_secs: i64,
        window_secs: i64,
    },
}

impl Error {
    /// True if the caller may reasonably retry (after backing off)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Map a store failure to [Error::Transient] or [Error::Storage], as appropriate
pub(crate) fn classify(op: &'static str, err: storage::Error) -> Error {
    if err.is_transient() {
        TransientSnafu {
            op,
            detail: err.to_string(),
        }
        .build()
    } else {
        StorageSnafu { op }.into_error(err)
    }
}

/// The effect of a single vote
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    /// The voter's new state
    pub next: Direction,
    /// Change in score, in units of the vote weight
    pub weight_delta: i8,
    /// Change in the number of voters with a non-neutral vote
    pub count_delta: i64,
}

/// Work out the effect of moving from `prior` to `requested`; None means `requested` is `prior`,
/// i.e. the request is a duplicate
pub fn transition(prior: Direction, requested: Direction) -> Option<Transition> {
    if prior == requested {
        return None;
    }
    Some(Transition {
        next: requested,
        weight_delta: requested.as_i8() - prior.as_i8(),
        count_delta: requested.as_i8().abs() as i64 - prior.as_i8().abs() as i64,
    })
}

inventory::submit! { metrics::Registration::new("votes.cast", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.duplicate", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.window_expired", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.conflict_retries", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.transient", Sort::IntegralCounter) }

/// Records votes
pub struct VoteEngine {
    store: Arc<dyn Backend + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
    instruments: Arc<Instruments>,
    vote_weight: f64,
    voting_window: Duration,
    store_timeout: std::time::Duration,
    max_retries: usize,
}

impl VoteEngine {
    pub fn new(
        store: Arc<dyn Backend + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        instruments: Arc<Instruments>,
        config: &EngineConfig,
    ) -> VoteEngine {
        VoteEngine {
            store,
            clock,
            instruments,
            vote_weight: config.vote_weight,
            // Anything too big for a chrono Duration is, for our purposes, forever
            voting_window: Duration::from_std(config.voting_window)
                .unwrap_or_else(|_| Duration::weeks(52 * 1000)),
            store_timeout: config.store_timeout,
            max_retries: config.max_vote_retries,
        }
    }
    /// Record `voter`'s vote of `direction` on `post`
    ///
    /// On success, the post's score, the voter's ledger entry & the post's vote count have all
    /// been updated together. On failure, none of them have.
    #[tracing::instrument(skip(self))]
    pub async fn cast_vote(&self, voter: UserId, post: PostId, direction: Direction) -> Result<()> {
        let result = self.cast_vote1(voter, post, direction).await;
        let name = match &result {
            Ok(_) => Some("votes.cast"),
            Err(Error::DuplicateVote { .. }) => Some("votes.duplicate"),
            Err(Error::WindowExpired { .. }) => Some("votes.window_expired"),
            Err(Error::Transient { .. }) => Some("votes.transient"),
            Err(_) => None,
        };
        if let Some(name) = name {
            counter_add!(self.instruments, name, 1, &[]);
        }
        result
    }
    /// As [cast_vote](VoteEngine::cast_vote), for a direction that hasn't been validated yet
    pub async fn cast_raw_vote(&self, voter: UserId, post: PostId, direction: i8) -> Result<()> {
        let direction = Direction::try_from(direction).context(InvalidDirectionSnafu)?;
        self.cast_vote(voter, post, direction).await
    }
    async fn cast_vote1(&self, voter: UserId, post: PostId, direction: Direction) -> Result<()> {
        // The post's creation time is its score in the by-time ranking; if it's not there, the
        // post doesn't exist.
        let created = bounded(
            self.store_timeout,
            "reading creation time",
            self.store.score(Order::Time, &post),
        )
        .await
        .map_err(|err| classify("reading the post's creation time", err))?
        .context(NotFoundSnafu { post })?;

        let age_secs = (timestamp_score(&self.clock.now()) - created) as i64;
        ensure!(
            age_secs <= self.voting_window.num_seconds(),
            WindowExpiredSnafu {
                post,
                age_secs,
                window_secs: self.voting_window.num_seconds(),
            }
        );

        for attempt in 0..=self.max_retries {
            let prior = bounded(
                self.store_timeout,
                "reading prior vote",
                self.store.vote(&post, &voter),
            )
            .await
            .map_err(|err| classify("reading the prior vote", err))?;

            let step = transition(prior, direction).context(DuplicateVoteSnafu {
                post,
                voter,
                direction,
            })?;

            let mut ops = vec![IndexOp::IncrementRanking {
                order: Order::Score,
                post,
                delta: step.weight_delta as f64 * self.vote_weight,
            }];
            ops.push(match step.next {
                Direction::Neutral => IndexOp::ClearVote { post, voter },
                next => IndexOp::SetVote {
                    post,
                    voter,
                    direction: next,
                },
            });
            if 0 != step.count_delta {
                ops.push(IndexOp::IncrementField {
                    post,
                    field: RecordField::Votes,
                    delta: step.count_delta,
                });
            }

            match bounded(
                self.store_timeout,
                "applying vote",
                self.store.apply_atomically(
                    &[Precondition::VoteIs {
                        post,
                        voter,
                        expected: prior,
                    }],
                    &ops,
                ),
            )
            .await
            .map_err(|err| classify("applying the vote", err))?
            {
                Applied::Committed => {
                    debug!(
                        "{} voted {} on {} (was {}; score {:+})",
                        voter,
                        direction,
                        post,
                        prior,
                        step.weight_delta as f64 * self.vote_weight
                    );
                    return Ok(());
                }
                Applied::Conflict => {
                    debug!(
                        "Lost the race for {}'s vote on {} (attempt {}); retrying",
                        voter, post, attempt
                    );
                    counter_add!(self.instruments, "votes.conflict_retries", 1, &[]);
                }
            }
        }

        warn!(
            "Giving up on {}'s vote on {} after {} attempts",
            voter,
            post,
            self.max_retries + 1
        );
        TransientSnafu {
            op: "applying the vote",
            detail: format!("contention persisted over {} attempts", self.max_retries + 1),
        }
        .fail()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use crate::{
        clock::ManualClock,
        entities::{CommunityId, PostRecord},
        in_memory::InMemory,
        sorted_index::SortedIndex,
        storage::RankingKey,
    };

    const W: f64 = 432.0;

    #[test]
    fn the_transition_table() {
        use Direction::*;
        let table = [
            (Neutral, Up, Some((Up, 1, 1))),
            (Neutral, Down, Some((Down, -1, 1))),
            (Up, Down, Some((Down, -2, 0))),
            (Down, Up, Some((Up, 2, 0))),
            (Up, Neutral, Some((Neutral, -1, -1))),
            (Down, Neutral, Some((Neutral, 1, -1))),
            (Up, Up, None),
            (Down, Down, None),
            (Neutral, Neutral, None),
        ];
        for (prior, requested, expected) in table {
            assert_eq!(
                transition(prior, requested),
                expected.map(|(next, weight_delta, count_delta)| Transition {
                    next,
                    weight_delta,
                    count_delta
                }),
                "{prior:?} -> {requested:?}"
            );
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    const POST: PostId = PostId::new(100);
    const AUTHOR: UserId = UserId::new(1);

    // Seed a post the way post creation does: score = t0 + W, author voted up, one vote.
    async fn seed(store: &InMemory) {
        let ops = [
            IndexOp::UpsertRanking {
                order: Order::Time,
                post: POST,
                score: timestamp_score(&t0()),
            },
            IndexOp::UpsertRanking {
                order: Order::Score,
                post: POST,
                score: timestamp_score(&t0()) + W,
            },
            IndexOp::SetVote {
                post: POST,
                voter: AUTHOR,
                direction: Direction::Up,
            },
            IndexOp::PutRecord {
                post: POST,
                record: PostRecord {
                    title: "title".to_owned(),
                    summary: "summary".to_owned(),
                    author: AUTHOR,
                    community: CommunityId::new(5),
                    created_at: t0(),
                    votes: 1,
                    comments: 0,
                },
            },
        ];
        assert_eq!(
            store.apply_atomically(&[], &ops).await.unwrap(),
            Applied::Committed
        );
    }

    struct Fixture {
        clock: ManualClock,
        store: Arc<InMemory>,
        engine: VoteEngine,
        instruments: Arc<Instruments>,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::new(t0());
        let store = Arc::new(InMemory::new(Arc::new(clock.clone())));
        seed(&store).await;
        let instruments = Arc::new(Instruments::new("agora-test"));
        let engine = VoteEngine::new(
            store.clone(),
            Arc::new(clock.clone()),
            instruments.clone(),
            &EngineConfig::default(),
        );
        Fixture {
            clock,
            store,
            engine,
            instruments,
        }
    }

    async fn snapshot(store: &InMemory) -> (f64, Direction, u64, u64) {
        let voter = UserId::new(2);
        (
            store.score(Order::Score, &POST).await.unwrap().unwrap(),
            store.vote(&POST, &voter).await.unwrap(),
            store.records(&[POST]).await.unwrap()[0]
                .as_ref()
                .unwrap()
                .votes,
            store.count_votes(&POST, -1.0, 1.0).await.unwrap(),
        )
    }

    #[tokio::test]
    async fn up_down_retract() {
        let f = fixture().await;
        let a = UserId::new(2);
        let t0 = timestamp_score(&t0());

        f.engine.cast_vote(a, POST, Direction::Up).await.unwrap();
        assert_eq!(snapshot(&f.store).await, (t0 + 2.0 * W, Direction::Up, 2, 2));

        f.engine.cast_vote(a, POST, Direction::Down).await.unwrap();
        assert_eq!(snapshot(&f.store).await, (t0, Direction::Down, 2, 2));

        f.engine.cast_vote(a, POST, Direction::Neutral).await.unwrap();
        assert_eq!(snapshot(&f.store).await, (t0 + W, Direction::Neutral, 1, 1));

        assert_eq!(f.instruments.total("votes.cast"), Some(3));
    }

    #[tokio::test]
    async fn duplicates_change_nothing() {
        let f = fixture().await;
        let a = UserId::new(2);

        // Retracting a vote that was never cast is a duplicate, too
        let before = snapshot(&f.store).await;
        assert!(matches!(
            f.engine.cast_vote(a, POST, Direction::Neutral).await,
            Err(Error::DuplicateVote { .. })
        ));
        assert_eq!(snapshot(&f.store).await, before);

        for direction in [Direction::Up, Direction::Down] {
            f.engine.cast_vote(a, POST, direction).await.unwrap();
            let before = snapshot(&f.store).await;
            let err = f.engine.cast_vote(a, POST, direction).await.unwrap_err();
            assert!(matches!(err, Error::DuplicateVote { .. }));
            assert!(!err.is_retryable());
            assert_eq!(snapshot(&f.store).await, before);
        }
        assert_eq!(f.instruments.total("votes.duplicate"), Some(3));
    }

    #[tokio::test]
    async fn unknown_posts_and_bad_directions() {
        let f = fixture().await;
        assert!(matches!(
            f.engine
                .cast_vote(UserId::new(2), PostId::new(999), Direction::Up)
                .await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            f.engine.cast_raw_vote(UserId::new(2), POST, 2).await,
            Err(Error::InvalidDirection { .. })
        ));
        f.engine.cast_raw_vote(UserId::new(2), POST, -1).await.unwrap();
        assert_eq!(
            f.store.vote(&POST, &UserId::new(2)).await.unwrap(),
            Direction::Down
        );
    }

    #[tokio::test]
    async fn the_voting_window() {
        let f = fixture().await;
        let a = UserId::new(2);
        f.engine.cast_vote(a, POST, Direction::Up).await.unwrap();

        // Exactly one week old: still open
        f.clock.advance(Duration::weeks(1));
        f.engine.cast_vote(a, POST, Direction::Down).await.unwrap();

        f.clock.advance(Duration::seconds(1));
        let before = snapshot(&f.store).await;
        for direction in [Direction::Up, Direction::Down, Direction::Neutral] {
            for voter in [a, UserId::new(3), AUTHOR] {
                let err = f.engine.cast_vote(voter, POST, direction).await.unwrap_err();
                assert!(matches!(err, Error::WindowExpired { .. }), "{err}");
            }
        }
        assert_eq!(snapshot(&f.store).await, before);
        assert_eq!(f.instruments.total("votes.window_expired"), Some(9));
    }

    #[tokio::test]
    async fn folding_the_table() {
        // For any sequence of requests by one voter, the final score must equal the sum of the
        // documented deltas of those that were accepted.
        let f = fixture().await;
        let a = UserId::new(2);
        let mut rng = StdRng::seed_from_u64(0xa60a);
        let mut state = Direction::Neutral;
        let mut expected = timestamp_score(&t0()) + W;
        for _ in 0..200 {
            let requested = Direction::try_from(rng.gen_range(-1i8..=1)).unwrap();
            let result = f.engine.cast_vote(a, POST, requested).await;
            match transition(state, requested) {
                Some(step) => {
                    result.unwrap();
                    expected += step.weight_delta as f64 * W;
                    state = step.next;
                }
                None => assert!(matches!(result, Err(Error::DuplicateVote { .. }))),
            }
            let (score, vote, votes, _) = snapshot(&f.store).await;
            assert_eq!(score, expected);
            assert_eq!(vote, state);
            assert_eq!(votes, 1 + state.as_i8().unsigned_abs() as u64);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_voters() {
        let f = fixture().await;
        let engine = Arc::new(f.engine);
        let handles: Vec<_> = (2..52u64)
            .map(|voter| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .cast_vote(UserId::new(voter), POST, Direction::Up)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let (score, _, votes, _) = snapshot(&f.store).await;
        assert_eq!(score, timestamp_score(&t0()) + 51.0 * W);
        assert_eq!(votes, 51);
        assert_eq!(f.store.count_votes(&POST, 1.0, 1.0).await.unwrap(), 51);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_voter_racing_themselves() {
        let f = fixture().await;
        let engine = Arc::new(f.engine);
        let a = UserId::new(2);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.cast_vote(a, POST, Direction::Up).await })
            })
            .collect();
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(Error::DuplicateVote { .. }) => (),
                Err(err) => panic!("unexpected {err}"),
            }
        }
        assert_eq!(ok, 1);
        let (score, vote, votes, _) = snapshot(&f.store).await;
        assert_eq!(score, timestamp_score(&t0()) + 2.0 * W);
        assert_eq!(vote, Direction::Up);
        assert_eq!(votes, 2);
    }

    mod mock {
        use super::*;

        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Clone, Copy, Debug, PartialEq)]
        pub enum Misbehavior {
            /// Report a conflict on the first `n` batches
            Conflict(usize),
            /// Hang on every batch
            Hang,
            /// Fail every batch with a transient error
            Unavailable,
            /// Fail every batch complaining of bad data
            Corrupt,
        }

        /// Wraps an [InMemory], misbehaving on [Backend::apply_atomically]
        pub struct Flaky {
            pub inner: Arc<InMemory>,
            pub misbehavior: Misbehavior,
            pub batches: AtomicUsize,
        }

        #[async_trait]
        impl Backend for Flaky {
            async fn score(&self, order: Order, post: &PostId) -> storage::Result<Option<f64>> {
                self.inner.score(order, post).await
            }
            async fn range_by_rank_desc(
                &self,
                key: &RankingKey,
                start: usize,
                stop: usize,
            ) -> storage::Result<Option<Vec<PostId>>> {
                self.inner.range_by_rank_desc(key, start, stop).await
            }
            async fn ranking_snapshot(
                &self,
                order: Order,
            ) -> storage::Result<SortedIndex<PostId>> {
                self.inner.ranking_snapshot(order).await
            }
            async fn vote(&self, post: &PostId, voter: &UserId) -> storage::Result<Direction> {
                self.inner.vote(post, voter).await
            }
            async fn count_votes(
                &self,
                post: &PostId,
                min: f64,
                max: f64,
            ) -> storage::Result<u64> {
                self.inner.count_votes(post, min, max).await
            }
            async fn records(
                &self,
                posts: &[PostId],
            ) -> storage::Result<Vec<Option<PostRecord>>> {
                self.inner.records(posts).await
            }
            async fn community_members(
                &self,
                community: &CommunityId,
            ) -> storage::Result<HashSet<PostId>> {
                self.inner.community_members(community).await
            }
            async fn cached_exists(
                &self,
                order: Order,
                community: &CommunityId,
            ) -> storage::Result<bool> {
                self.inner.cached_exists(order, community).await
            }
            async fn store_intersection(
                &self,
                order: Order,
                community: &CommunityId,
                ttl: std::time::Duration,
            ) -> storage::Result<usize> {
                self.inner.store_intersection(order, community, ttl).await
            }
            async fn apply_atomically(
                &self,
                preconditions: &[Precondition],
                ops: &[IndexOp],
            ) -> storage::Result<Applied> {
                let n = self.batches.fetch_add(1, Ordering::SeqCst);
                match self.misbehavior {
                    Misbehavior::Conflict(k) if n < k => Ok(Applied::Conflict),
                    Misbehavior::Conflict(_) => {
                        self.inner.apply_atomically(preconditions, ops).await
                    }
                    Misbehavior::Hang => {
                        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                        self.inner.apply_atomically(preconditions, ops).await
                    }
                    Misbehavior::Unavailable => storage::UnavailableSnafu {
                        what: "connection refused",
                    }
                    .fail(),
                    Misbehavior::Corrupt => storage::CorruptSnafu {
                        key: "ledger:1",
                        what: "non-numeric score",
                    }
                    .fail(),
                }
            }
        }

        pub async fn engine(misbehavior: Misbehavior) -> (Arc<InMemory>, VoteEngine) {
            let clock = ManualClock::new(t0());
            let store = Arc::new(InMemory::new(Arc::new(clock.clone())));
            seed(&store).await;
            let flaky = Arc::new(Flaky {
                inner: store.clone(),
                misbehavior,
                batches: AtomicUsize::new(0),
            });
            let config = EngineConfig {
                store_timeout: std::time::Duration::from_millis(25),
                max_vote_retries: 3,
                ..Default::default()
            };
            let engine = VoteEngine::new(
                flaky,
                Arc::new(clock),
                Arc::new(Instruments::new("agora-test")),
                &config,
            );
            (store, engine)
        }
    }

    #[tokio::test]
    async fn conflicts_are_retried() {
        let (store, engine) = mock::engine(mock::Misbehavior::Conflict(3)).await;
        engine
            .cast_vote(UserId::new(2), POST, Direction::Down)
            .await
            .unwrap();
        assert_eq!(snapshot(&store).await.0, timestamp_score(&t0()));
    }

    #[test_log::test(tokio::test)]
    async fn persistent_conflict_is_transient() {
        let (store, engine) = mock::engine(mock::Misbehavior::Conflict(4)).await;
        let before = snapshot(&store).await;
        let err = engine
            .cast_vote(UserId::new(2), POST, Direction::Down)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
        assert_eq!(snapshot(&store).await, before);
    }

    #[test_log::test(tokio::test)]
    async fn timeouts_are_transient_and_leave_nothing_behind() {
        let (store, engine) = mock::engine(mock::Misbehavior::Hang).await;
        let before = snapshot(&store).await;
        let err = engine
            .cast_vote(UserId::new(2), POST, Direction::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient { .. }), "{err}");
        assert_eq!(snapshot(&store).await, before);
    }

    #[test_log::test(tokio::test)]
    async fn store_failures_are_transient() {
        let (store, engine) = mock::engine(mock::Misbehavior::Unavailable).await;
        let before = snapshot(&store).await;
        assert!(
            engine
                .cast_vote(UserId::new(2), POST, Direction::Up)
                .await
                .unwrap_err()
                .is_retryable()
        );
        assert_eq!(snapshot(&store).await, before);
    }

    #[test_log::test(tokio::test)]
    async fn store_faults_are_reported_as_such() {
        let (store, engine) = mock::engine(mock::Misbehavior::Corrupt).await;
        let before = snapshot(&store).await;
        let err = engine
            .cast_vote(UserId::new(2), POST, Direction::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }), "{err}");
        assert!(!err.is_retryable());
        assert_eq!(snapshot(&store).await, before);
    }
}
