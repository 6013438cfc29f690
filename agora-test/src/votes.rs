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

//! Integration tests for voting.
//!
//! Store-agnostic test logic for casting votes goes here.

use std::sync::Arc;

use chrono::Duration;
use futures::future::try_join_all;
use libtest_mimic::Failed;
use tracing::debug;

use agora::{
    agora::Agora,
    entities::{CommunityId, Direction, Order, PostId, UserId, timestamp_score},
    hot_rank::hot_rank,
    votes,
};

use crate::Helper;

/// Read `post`'s vote tally from its record snapshot
async fn tally(helper: &(dyn Helper + Send + Sync), post: PostId) -> Result<u64, Failed> {
    Ok(helper
        .record(post)
        .await?
        .ok_or_else(|| format!("No record for {}", post))?
        .votes)
}

/// Walk one voter through up, down & retract, checking every index at each step
pub async fn test_up_down_retract(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    let w = agora.config().vote_weight;
    let t0 = helper.now();
    let base = timestamp_score(&t0);
    let post = PostId::new(1000);
    let (author, voter) = (UserId::new(1), UserId::new(2));
    let community = CommunityId::new(5);

    agora
        .create_ranking(post, author, community, "A post", "Its summary", t0)
        .await?;
    assert_eq!(helper.score(Order::Time, post).await?, Some(base));
    assert_eq!(helper.score(Order::Score, post).await?, Some(base + w));
    assert_eq!(tally(helper.as_ref(), post).await?, 1);
    assert_eq!(agora.vote_counts(&[post]).await?, vec![1]);

    agora.cast_vote(voter, post, Direction::Up).await?;
    assert_eq!(helper.score(Order::Score, post).await?, Some(base + 2.0 * w));
    assert_eq!(tally(helper.as_ref(), post).await?, 2);
    assert_eq!(agora.vote_counts(&[post]).await?, vec![2]);

    agora.cast_vote(voter, post, Direction::Down).await?;
    assert_eq!(helper.score(Order::Score, post).await?, Some(base));
    assert_eq!(tally(helper.as_ref(), post).await?, 2);
    assert_eq!(agora.vote_counts(&[post]).await?, vec![1]);

    agora.cast_vote(voter, post, Direction::Neutral).await?;
    assert_eq!(helper.score(Order::Score, post).await?, Some(base + w));
    assert_eq!(tally(helper.as_ref(), post).await?, 1);
    assert_eq!(agora.vote_counts(&[post]).await?, vec![1]);

    // The by-time score never moves
    assert_eq!(helper.score(Order::Time, post).await?, Some(base));
    assert_eq!(
        agora
            .list_ranking(Order::Score, Some(community), 1, None)
            .await?,
        vec![post]
    );
    Ok(())
}

/// Votes that change nothing are rejected, & change nothing
pub async fn test_rejected_votes(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    let w = agora.config().vote_weight;
    let t0 = helper.now();
    let base = timestamp_score(&t0);
    let post = PostId::new(7);
    let author = UserId::new(1);
    agora
        .create_ranking(post, author, CommunityId::new(1), "t", "s", t0)
        .await?;

    assert!(matches!(
        agora.cast_vote(author, post, Direction::Up).await,
        Err(votes::Error::DuplicateVote { .. })
    ));
    assert!(matches!(
        agora.cast_vote(UserId::new(2), post, Direction::Neutral).await,
        Err(votes::Error::DuplicateVote { .. })
    ));
    assert!(matches!(
        agora.cast_vote(author, PostId::new(8), Direction::Up).await,
        Err(votes::Error::NotFound { .. })
    ));
    assert!(matches!(
        agora.cast_raw_vote(UserId::new(2), post, 2).await,
        Err(votes::Error::InvalidDirection { .. })
    ));
    assert_eq!(helper.score(Order::Score, post).await?, Some(base + w));
    assert_eq!(tally(helper.as_ref(), post).await?, 1);

    // The author is a voter like any other
    agora.cast_raw_vote(author, post, 0).await?;
    assert_eq!(helper.score(Order::Score, post).await?, Some(base));
    assert_eq!(agora.vote_counts(&[post]).await?, vec![0]);
    assert_eq!(tally(helper.as_ref(), post).await?, 0);
    Ok(())
}

/// A post accepts votes for exactly one voting window
pub async fn test_voting_window(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    let w = agora.config().vote_weight;
    let window = Duration::from_std(agora.config().voting_window)?;
    let t0 = helper.now();
    let base = timestamp_score(&t0);
    let post = PostId::new(1);
    agora
        .create_ranking(post, UserId::new(1), CommunityId::new(1), "t", "s", t0)
        .await?;

    helper.advance_clock(window);
    agora.cast_vote(UserId::new(2), post, Direction::Up).await?;

    helper.advance_clock(Duration::seconds(1));
    let err = agora
        .cast_vote(UserId::new(3), post, Direction::Up)
        .await
        .err()
        .ok_or("A vote past the window was accepted")?;
    debug!("Late vote: {}", err);
    assert!(matches!(err, votes::Error::WindowExpired { .. }));
    // Nor may earlier voters change their minds
    assert!(matches!(
        agora.cast_vote(UserId::new(2), post, Direction::Neutral).await,
        Err(votes::Error::WindowExpired { .. })
    ));

    assert_eq!(helper.score(Order::Score, post).await?, Some(base + 2.0 * w));
    assert_eq!(tally(helper.as_ref(), post).await?, 2);
    Ok(())
}

/// Many voters up-voting (then retracting) one post at the same time lose no votes
pub async fn test_concurrent_voters(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    const VOTERS: u64 = 100;
    let w = agora.config().vote_weight;
    let t0 = helper.now();
    let base = timestamp_score(&t0);
    let post = PostId::new(1);
    agora
        .create_ranking(post, UserId::new(1), CommunityId::new(1), "t", "s", t0)
        .await?;

    let cast = |direction: Direction| {
        (2..VOTERS + 2)
            .map(|voter| {
                let agora = agora.clone();
                tokio::spawn(async move {
                    agora
                        .cast_vote(UserId::new(voter), post, direction)
                        .await
                })
            })
            .collect::<Vec<_>>()
    };

    for result in try_join_all(cast(Direction::Up)).await? {
        result?;
    }
    assert_eq!(
        helper.score(Order::Score, post).await?,
        Some(base + (VOTERS + 1) as f64 * w)
    );
    assert_eq!(agora.vote_counts(&[post]).await?, vec![VOTERS + 1]);
    assert_eq!(tally(helper.as_ref(), post).await?, VOTERS + 1);

    for result in try_join_all(cast(Direction::Neutral)).await? {
        result?;
    }
    assert_eq!(helper.score(Order::Score, post).await?, Some(base + w));
    assert_eq!(agora.vote_counts(&[post]).await?, vec![1]);
    assert_eq!(tally(helper.as_ref(), post).await?, 1);
    Ok(())
}

/// Voters changing their minds concurrently leave score, ledger & tally in agreement
pub async fn test_concurrent_changes_of_heart(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    const CYCLE: [Direction; 5] = [
        Direction::Up,
        Direction::Down,
        Direction::Neutral,
        Direction::Up,
        Direction::Down,
    ];
    const VOTERS: u64 = 60;

    let w = agora.config().vote_weight;
    let t0 = helper.now();
    let post = PostId::new(3);
    agora
        .create_ranking(post, UserId::new(1), CommunityId::new(1), "t", "s", t0)
        .await?;

    // Voter v casts the cycle, rotated by v; no two successive entries in the cycle (wrapping
    // around) are equal, so only a leading retraction can be rejected.
    let plan = |voter: u64| -> Vec<Direction> {
        (0..CYCLE.len())
            .map(|i| CYCLE[(i + voter as usize) % CYCLE.len()])
            .collect()
    };

    let handles = (2..VOTERS + 2)
        .map(|voter| {
            let agora = agora.clone();
            let directions = plan(voter);
            tokio::spawn(async move {
                for direction in directions {
                    match agora.cast_vote(UserId::new(voter), post, direction).await {
                        Ok(_) | Err(votes::Error::DuplicateVote { .. }) => (),
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();
    for result in try_join_all(handles).await? {
        result?;
    }

    let (ups, downs) = (2..VOTERS + 2)
        .filter_map(|voter| plan(voter).last().copied())
        .fold((1u64, 0u64), |(ups, downs), direction| match direction {
            Direction::Up => (ups + 1, downs),
            Direction::Down => (ups, downs + 1),
            Direction::Neutral => (ups, downs),
        });

    assert_eq!(
        helper.score(Order::Score, post).await?,
        Some(timestamp_score(&t0) + (ups as f64 - downs as f64) * w)
    );
    assert_eq!(agora.vote_counts(&[post]).await?, vec![ups]);
    assert_eq!(tally(helper.as_ref(), post).await?, ups + downs);
    assert_eq!(agora.hot_rank(post).await?, hot_rank(ups, downs, &t0));
    Ok(())
}
