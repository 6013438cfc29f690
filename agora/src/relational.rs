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

//! # relational
//!
//! The relational store, as seen from agora.
//!
//! Posts, users & communities are owned by a relational database that agora doesn't manage; this
//! module just describes the handful of queries agora needs from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{CommunityId, PostId, UserId};

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

/// A new post, as submitted by an author
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewPost {
    pub author: UserId,
    pub community: CommunityId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    pub community: CommunityId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub introduction: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Relational {
    /// Persist a new post, returning its (freshly minted) ID
    async fn create_post(&self, post: NewPost) -> Result<PostId, Error>;
    /// None means there's no such post
    async fn get_post_by_id(&self, id: &PostId) -> Result<Option<Post>, Error>;
    /// Retrieve posts by ID; the result is in the same order as `ids`, with unknown IDs omitted.
    async fn get_posts_by_ids(&self, ids: &[PostId]) -> Result<Vec<Post>, Error>;
    async fn get_total_post_count(&self) -> Result<u64, Error>;
    async fn get_total_post_count_for_community(&self, id: &CommunityId) -> Result<u64, Error>;
    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<User>, Error>;
    async fn get_community_by_id(&self, id: &CommunityId) -> Result<Option<Community>, Error>;
}
