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

//! Integration tests for listings & posts.

use std::{collections::HashSet, sync::Arc};

use chrono::Duration;
use itertools::Itertools;
use libtest_mimic::Failed;

use agora::{
    agora::{Agora, Error},
    entities::{CommunityId, Direction, Order, PostId, UserId, truncate_by_words},
};

use crate::Helper;

/// Rank `n` posts, post i created i seconds from now; odd posts go in community 5, even in 6
async fn rank_posts(
    agora: &Agora,
    helper: &(dyn Helper + Send + Sync),
    posts: impl Iterator<Item = u64>,
) -> Result<(), Failed> {
    let t0 = helper.now();
    for i in posts {
        agora
            .create_ranking(
                PostId::new(i),
                UserId::new(1),
                CommunityId::new(if i % 2 == 1 { 5 } else { 6 }),
                &format!("Post #{}", i),
                "",
                t0 + Duration::seconds(i as i64),
            )
            .await?;
    }
    Ok(())
}

fn ids(ids: &[u64]) -> Vec<PostId> {
    ids.iter().copied().map(PostId::new).collect()
}

/// Walking the pages of a listing visits every post exactly once
pub async fn test_pagination(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    rank_posts(&agora, helper.as_ref(), 1..=45).await?;

    let mut seen = Vec::new();
    for page in 1..=3 {
        let posts = agora.list_ranking(Order::Time, None, page, Some(20)).await?;
        assert_eq!(posts.len(), if page < 3 { 20 } else { 5 });
        seen.extend(posts);
    }
    assert!(
        agora
            .list_ranking(Order::Time, None, 4, Some(20))
            .await?
            .is_empty()
    );
    assert_eq!(seen.len(), 45);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 45);
    // Newest first
    assert_eq!(seen, (1..=45).rev().map(PostId::new).collect::<Vec<_>>());

    // With no votes beyond the authors', score order is time order
    assert_eq!(
        agora.list_ranking(Order::Score, None, 1, Some(5)).await?,
        ids(&[45, 44, 43, 42, 41])
    );

    let clamped = agora
        .list_ranking(Order::Time, None, 1, Some(usize::MAX))
        .await?;
    assert_eq!(clamped.len(), 45usize.min(agora.config().max_page_size));

    assert!(matches!(
        agora.list_ranking(Order::Time, None, 0, None).await,
        Err(Error::BadPage { .. })
    ));
    assert!(matches!(
        agora.list_ranking(Order::Time, None, 1, Some(0)).await,
        Err(Error::BadPage { .. })
    ));
    Ok(())
}

/// Community listings are built from the global rankings & served from cache until they expire
pub async fn test_community_scoping(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    let ttl = Duration::from_std(agora.config().ranking_cache_ttl)?;
    rank_posts(&agora, helper.as_ref(), 1..=6).await?;

    let odd = Some(CommunityId::new(5));
    assert_eq!(agora.list_ranking(Order::Time, odd, 1, None).await?, ids(&[5, 3, 1]));
    assert_eq!(agora.list_ranking(Order::Score, odd, 1, None).await?, ids(&[5, 3, 1]));
    assert_eq!(
        agora
            .list_ranking(Order::Time, Some(CommunityId::new(6)), 1, None)
            .await?,
        ids(&[6, 4, 2])
    );
    // Community zero means "all of them"
    assert_eq!(
        agora
            .list_ranking(Order::Time, Some(CommunityId::new(0)), 1, Some(3))
            .await?,
        ids(&[6, 5, 4])
    );
    // A community no post belongs to is empty, not an error
    assert!(
        agora
            .list_ranking(Order::Time, Some(CommunityId::new(99)), 1, None)
            .await?
            .is_empty()
    );

    // A new post & a new vote show up globally at once...
    rank_posts(&agora, helper.as_ref(), 7..=7).await?;
    agora
        .cast_vote(UserId::new(10), PostId::new(1), Direction::Up)
        .await?;
    assert_eq!(
        agora.list_ranking(Order::Time, None, 1, Some(2)).await?,
        ids(&[7, 6])
    );
    assert_eq!(
        agora.list_ranking(Order::Score, None, 1, Some(1)).await?,
        ids(&[1])
    );
    // ...but in the community only once the cached rankings expire
    assert_eq!(agora.list_ranking(Order::Time, odd, 1, None).await?, ids(&[5, 3, 1]));
    assert_eq!(agora.list_ranking(Order::Score, odd, 1, None).await?, ids(&[5, 3, 1]));

    helper.advance_clock(ttl + Duration::seconds(1));
    assert_eq!(
        agora.list_ranking(Order::Time, odd, 1, None).await?,
        ids(&[7, 5, 3, 1])
    );
    assert_eq!(
        agora.list_ranking(Order::Score, odd, 1, None).await?,
        ids(&[1, 7, 5, 3])
    );
    Ok(())
}

/// Create posts & read them back
pub async fn test_posts(
    agora: Arc<Agora>,
    helper: Arc<dyn Helper + Send + Sync>,
) -> Result<(), Failed> {
    let (alice, bob) = (UserId::new(1), UserId::new(2));
    let rust = CommunityId::new(5);
    helper.add_user(alice, "alice").await?;
    helper.add_user(bob, "bob").await?;
    helper.add_community(rust, "rust").await?;

    let words = agora.config().summary_words;
    let long = (0..words + 10).map(|i| format!("word{}", i)).join(" ");
    let mut posts = Vec::new();
    for (n, content) in ["Short & sweet.", long.as_str(), "Third!"].iter().enumerate() {
        posts.push(
            agora
                .create_post(alice, rust, &format!("Post #{}", n), content)
                .await?,
        );
        helper.advance_clock(Duration::minutes(1));
    }
    assert!(matches!(
        agora.create_post(alice, CommunityId::new(99), "Nope", "nope").await,
        Err(Error::CommunityNotFound { .. })
    ));

    agora.cast_vote(bob, posts[0], Direction::Up).await?;
    for _ in 0..3 {
        agora.record_comment(posts[1]).await?;
    }
    assert!(matches!(
        agora.record_comment(PostId::new(12345)).await,
        Err(Error::PostNotFound { .. })
    ));

    let page = agora.list_posts(Order::Time, Some(rust), 1, None).await?;
    assert_eq!(page.total, 3);
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, agora.config().default_page_size);
    assert_eq!(
        page.posts.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
        vec!["Post #2", "Post #1", "Post #0"]
    );
    assert_eq!(page.posts[1].summary, truncate_by_words(&long, words));
    assert!(page.posts[1].summary.ends_with("..."));
    assert_eq!(page.posts[1].comments, 3);
    assert_eq!(page.posts[2].summary, "Short & sweet.");
    assert_eq!(page.posts[2].votes, 2);

    let everything = agora.list_posts(Order::Score, None, 1, Some(2)).await?;
    assert_eq!(everything.total, 3);
    assert_eq!(everything.posts.len(), 2);
    assert_eq!(everything.posts[0].id, posts[0]);

    let detail = agora.post_detail(posts[0]).await?;
    assert_eq!(detail.author_name, "alice");
    assert_eq!(detail.community.name, "rust");
    assert_eq!(detail.post.content, "Short & sweet.");
    assert_eq!(detail.votes, 2);
    assert!(matches!(
        agora.post_detail(PostId::new(12345)).await,
        Err(Error::PostNotFound { .. })
    ));
    Ok(())
}
